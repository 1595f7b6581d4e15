//! Command model
//!
//! A [`Command`] is built once, validated once, and never mutated. The same
//! type travels over the control channel inside `execute-command`, so it is
//! serde-tagged with the wire discriminator `type`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::role::Role;

const MIN_SPEED: f64 = 0.01;
const MAX_SPEED: f64 = 1.0;

/// Modifier keys held during an action
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Modifiers {
    #[serde(default)]
    pub ctrl: bool,
    #[serde(default)]
    pub alt: bool,
    #[serde(default)]
    pub shift: bool,
    #[serde(default)]
    pub meta: bool,
}

/// Options shared by pointer and keyboard actions
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ActionOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset_x: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset_y: Option<i32>,
    pub modifiers: Modifiers,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caret_pos: Option<u32>,
    pub replace: bool,
    pub paste: bool,
}

impl ActionOptions {
    fn validate(&self) -> Result<(), String> {
        if let Some(speed) = self.speed {
            validate_speed("options.speed", speed)?;
        }
        Ok(())
    }
}

/// A validated user-requested action against the system under test
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum Command {
    Click {
        selector: String,
        #[serde(default)]
        options: ActionOptions,
    },
    RightClick {
        selector: String,
        #[serde(default)]
        options: ActionOptions,
    },
    DoubleClick {
        selector: String,
        #[serde(default)]
        options: ActionOptions,
    },
    Hover {
        selector: String,
        #[serde(default)]
        options: ActionOptions,
    },
    Drag {
        selector: String,
        drag_offset_x: i32,
        drag_offset_y: i32,
        #[serde(default)]
        options: ActionOptions,
    },
    DragToElement {
        selector: String,
        destination_selector: String,
        #[serde(default)]
        options: ActionOptions,
    },
    TypeText {
        selector: String,
        text: String,
        #[serde(default)]
        options: ActionOptions,
    },
    SelectText {
        selector: String,
        start_pos: Option<u32>,
        end_pos: Option<u32>,
        #[serde(default)]
        options: ActionOptions,
    },
    SelectTextAreaContent {
        selector: String,
        start_line: Option<u32>,
        start_pos: Option<u32>,
        end_line: Option<u32>,
        end_pos: Option<u32>,
        #[serde(default)]
        options: ActionOptions,
    },
    SelectEditableContent {
        start_selector: String,
        end_selector: String,
        #[serde(default)]
        options: ActionOptions,
    },
    PressKey {
        keys: String,
        #[serde(default)]
        options: ActionOptions,
    },
    Wait {
        timeout: u64,
    },
    NavigateTo {
        url: String,
    },
    SetFilesToUpload {
        selector: String,
        file_path: Vec<String>,
    },
    ClearUpload {
        selector: String,
    },
    TakeScreenshot {
        path: Option<String>,
    },
    TakeElementScreenshot {
        selector: String,
        path: Option<String>,
        options: Option<Value>,
    },
    ResizeWindow {
        width: u32,
        height: u32,
    },
    ResizeWindowToFitDevice {
        device: String,
        options: Option<Value>,
    },
    MaximizeWindow,
    SwitchToIframe {
        selector: String,
    },
    SwitchToMainWindow,
    SetNativeDialogHandler {
        dialog_handler: Option<Value>,
    },
    GetNativeDialogHistory,
    GetBrowserConsoleMessages,
    SetTestSpeed {
        speed: f64,
    },
    SetPageLoadTimeout {
        duration: u64,
    },
    UseRole {
        role: Role,
    },
    Debug,
}

impl Command {
    /// Wire name of this command
    pub fn kind(&self) -> &'static str {
        match self {
            Command::Click { .. } => "click",
            Command::RightClick { .. } => "right-click",
            Command::DoubleClick { .. } => "double-click",
            Command::Hover { .. } => "hover",
            Command::Drag { .. } => "drag",
            Command::DragToElement { .. } => "drag-to-element",
            Command::TypeText { .. } => "type-text",
            Command::SelectText { .. } => "select-text",
            Command::SelectTextAreaContent { .. } => "select-text-area-content",
            Command::SelectEditableContent { .. } => "select-editable-content",
            Command::PressKey { .. } => "press-key",
            Command::Wait { .. } => "wait",
            Command::NavigateTo { .. } => "navigate-to",
            Command::SetFilesToUpload { .. } => "set-files-to-upload",
            Command::ClearUpload { .. } => "clear-upload",
            Command::TakeScreenshot { .. } => "take-screenshot",
            Command::TakeElementScreenshot { .. } => "take-element-screenshot",
            Command::ResizeWindow { .. } => "resize-window",
            Command::ResizeWindowToFitDevice { .. } => "resize-window-to-fit-device",
            Command::MaximizeWindow => "maximize-window",
            Command::SwitchToIframe { .. } => "switch-to-iframe",
            Command::SwitchToMainWindow => "switch-to-main-window",
            Command::SetNativeDialogHandler { .. } => "set-native-dialog-handler",
            Command::GetNativeDialogHistory => "get-native-dialog-history",
            Command::GetBrowserConsoleMessages => "get-browser-console-messages",
            Command::SetTestSpeed { .. } => "set-test-speed",
            Command::SetPageLoadTimeout { .. } => "set-page-load-timeout",
            Command::UseRole { .. } => "use-role",
            Command::Debug => "debug",
        }
    }

    /// State reads that bypass the execution chain
    pub fn is_immediate(&self) -> bool {
        matches!(
            self,
            Command::GetNativeDialogHistory | Command::GetBrowserConsoleMessages
        )
    }

    /// Check argument constraints
    ///
    /// Returns a human-readable reason on failure; the caller attaches the
    /// callsite.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Command::Click { selector, options }
            | Command::RightClick { selector, options }
            | Command::DoubleClick { selector, options }
            | Command::Hover { selector, options }
            | Command::Drag {
                selector, options, ..
            }
            | Command::SelectText {
                selector, options, ..
            } => {
                require_selector("selector", selector)?;
                options.validate()
            }
            Command::DragToElement {
                selector,
                destination_selector,
                options,
            } => {
                require_selector("selector", selector)?;
                require_selector("destinationSelector", destination_selector)?;
                options.validate()
            }
            Command::TypeText {
                selector,
                text,
                options,
            } => {
                require_selector("selector", selector)?;
                if text.is_empty() {
                    return Err("\"text\" argument is expected to be a non-empty string".into());
                }
                options.validate()
            }
            Command::SelectTextAreaContent {
                selector,
                start_line,
                start_pos,
                end_line,
                end_pos,
                options,
            } => {
                require_selector("selector", selector)?;
                if let (Some(start), Some(end)) = (start_line, end_line) {
                    if start > end {
                        return Err(format!(
                            "\"startLine\" ({start}) must not be greater than \"endLine\" ({end})"
                        ));
                    }
                    if start == end {
                        if let (Some(sp), Some(ep)) = (start_pos, end_pos) {
                            if sp > ep {
                                return Err(format!(
                                    "\"startPos\" ({sp}) must not be greater than \"endPos\" ({ep}) on the same line"
                                ));
                            }
                        }
                    }
                }
                options.validate()
            }
            Command::SelectEditableContent {
                start_selector,
                end_selector,
                options,
            } => {
                require_selector("startSelector", start_selector)?;
                require_selector("endSelector", end_selector)?;
                options.validate()
            }
            Command::PressKey { keys, options } => {
                validate_keys(keys)?;
                options.validate()
            }
            Command::NavigateTo { url } => {
                if url.trim().is_empty() {
                    return Err("\"url\" argument is expected to be a non-empty string".into());
                }
                if url.chars().any(char::is_whitespace) {
                    return Err(format!("\"url\" argument contains whitespace: {url:?}"));
                }
                Ok(())
            }
            Command::SetFilesToUpload {
                selector,
                file_path,
            } => {
                require_selector("selector", selector)?;
                if file_path.is_empty() || file_path.iter().any(|p| p.trim().is_empty()) {
                    return Err(
                        "\"filePath\" argument is expected to be a non-empty list of non-empty paths"
                            .into(),
                    );
                }
                Ok(())
            }
            Command::ClearUpload { selector } | Command::SwitchToIframe { selector } => {
                require_selector("selector", selector)
            }
            Command::TakeScreenshot { path } => validate_screenshot_path(path.as_deref()),
            Command::TakeElementScreenshot { selector, path, .. } => {
                require_selector("selector", selector)?;
                validate_screenshot_path(path.as_deref())
            }
            Command::ResizeWindow { width, height } => {
                if *width == 0 || *height == 0 {
                    return Err(format!(
                        "window size must be positive, got {width}x{height}"
                    ));
                }
                Ok(())
            }
            Command::ResizeWindowToFitDevice { device, .. } => {
                if device.trim().is_empty() {
                    return Err("\"device\" argument is expected to be a non-empty string".into());
                }
                Ok(())
            }
            Command::SetTestSpeed { speed } => validate_speed("speed", *speed),
            Command::UseRole { role } => {
                if role.id.is_empty() {
                    return Err("role is expected to have a non-empty id".into());
                }
                Ok(())
            }
            Command::Wait { .. }
            | Command::MaximizeWindow
            | Command::SwitchToMainWindow
            | Command::SetNativeDialogHandler { .. }
            | Command::GetNativeDialogHistory
            | Command::GetBrowserConsoleMessages
            | Command::SetPageLoadTimeout { .. }
            | Command::Debug => Ok(()),
        }
    }
}

fn require_selector(name: &str, selector: &str) -> Result<(), String> {
    if selector.trim().is_empty() {
        return Err(format!(
            "\"{name}\" argument is expected to be a non-empty selector"
        ));
    }
    Ok(())
}

fn validate_speed(name: &str, speed: f64) -> Result<(), String> {
    if !(MIN_SPEED..=MAX_SPEED).contains(&speed) {
        return Err(format!(
            "\"{name}\" is expected to be a number between {MIN_SPEED} and {MAX_SPEED}, got {speed}"
        ));
    }
    Ok(())
}

/// Key sequences look like `ctrl+a delete shift+tab`
fn validate_keys(keys: &str) -> Result<(), String> {
    if keys.trim().is_empty() {
        return Err("\"keys\" argument is expected to be a non-empty string".into());
    }

    for combo in keys.split_whitespace() {
        if combo.split('+').any(str::is_empty) {
            return Err(format!("\"keys\" contains an incorrect key combination {combo:?}"));
        }
    }
    Ok(())
}

fn validate_screenshot_path(path: Option<&str>) -> Result<(), String> {
    match path {
        None => Ok(()),
        Some(p) if p.trim().is_empty() => {
            Err("screenshot \"path\" must not be empty when specified".into())
        }
        Some(p) if !p.to_ascii_lowercase().ends_with(".png") => Err(format!(
            "screenshot \"path\" must have the .png extension, got {p:?}"
        )),
        Some(_) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn click(selector: &str) -> Command {
        Command::Click {
            selector: selector.to_string(),
            options: ActionOptions::default(),
        }
    }

    #[test]
    fn test_empty_selector_is_rejected() {
        assert!(click("#submit").validate().is_ok());
        let err = click("  ").validate().unwrap_err();
        assert!(err.contains("selector"));
    }

    #[test]
    fn test_key_combinations() {
        let press = |keys: &str| Command::PressKey {
            keys: keys.to_string(),
            options: ActionOptions::default(),
        };
        assert!(press("ctrl+a delete").validate().is_ok());
        assert!(press("shift+").validate().is_err());
        assert!(press("   ").validate().is_err());
    }

    #[test]
    fn test_speed_bounds() {
        assert!(Command::SetTestSpeed { speed: 0.5 }.validate().is_ok());
        assert!(Command::SetTestSpeed { speed: 0.0 }.validate().is_err());
        assert!(Command::SetTestSpeed { speed: 1.5 }.validate().is_err());

        let fast_click = Command::Click {
            selector: "a".to_string(),
            options: ActionOptions {
                speed: Some(2.0),
                ..Default::default()
            },
        };
        assert!(fast_click.validate().is_err());
    }

    #[test]
    fn test_screenshot_path_extension() {
        assert!(Command::TakeScreenshot { path: None }.validate().is_ok());
        assert!(Command::TakeScreenshot {
            path: Some("shots/home.png".into())
        }
        .validate()
        .is_ok());
        assert!(Command::TakeScreenshot {
            path: Some("shots/home.jpg".into())
        }
        .validate()
        .is_err());
    }

    #[test]
    fn test_text_area_positions() {
        let select = |sl, sp, el, ep| Command::SelectTextAreaContent {
            selector: "textarea".into(),
            start_line: Some(sl),
            start_pos: Some(sp),
            end_line: Some(el),
            end_pos: Some(ep),
            options: ActionOptions::default(),
        };
        assert!(select(0, 2, 1, 0).validate().is_ok());
        assert!(select(2, 0, 1, 0).validate().is_err());
        assert!(select(1, 5, 1, 2).validate().is_err());
    }

    #[test]
    fn test_wire_format() {
        let json = serde_json::json!({
            "type": "type-text",
            "selector": "#name",
            "text": "Peter",
            "options": { "replace": true, "caretPos": 2 }
        });
        let command: Command = serde_json::from_value(json).unwrap();
        assert_eq!(command.kind(), "type-text");
        match command {
            Command::TypeText { options, .. } => {
                assert!(options.replace);
                assert_eq!(options.caret_pos, Some(2));
            }
            other => panic!("unexpected command: {other:?}"),
        }

        let drag: Command = serde_json::from_value(serde_json::json!({
            "type": "drag",
            "selector": "#slider",
            "dragOffsetX": 10,
            "dragOffsetY": -4
        }))
        .unwrap();
        assert!(drag.validate().is_ok());
    }

    #[test]
    fn test_immediate_commands() {
        assert!(Command::GetNativeDialogHistory.is_immediate());
        assert!(Command::GetBrowserConsoleMessages.is_immediate());
        assert!(!click("a").is_immediate());
        assert!(!Command::Debug.is_immediate());
    }
}
