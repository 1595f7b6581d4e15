//! User-facing test API
//!
//! Every chained action returns a [`ResultHandle`]. The handle counts as
//! observed the first time it is awaited or used as the base of a further
//! chained call; until then its callsite stays in the run's await tracker.
//!
//! ```ignore
//! let t = run.controller();
//! t.click("#login", None)?
//!     .chain()
//!     .type_text("#name", "Peter", None)?
//!     .await?;
//! ```

use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::common::Result;

use super::callsite::Callsite;
use super::command::{ActionOptions, Command};
use super::hooks::RequestHookProxy;
use super::role::Role;
use super::scheduler::Settlement;
use super::test_run::TestRun;

/// Observable outcome of one chained action
#[derive(Debug)]
pub struct ResultHandle {
    callsite: Callsite,
    settlement: Settlement,
    observed: AtomicBool,
    controller: TestController,
}

impl ResultHandle {
    pub fn callsite(&self) -> &Callsite {
        &self.callsite
    }

    pub fn is_observed(&self) -> bool {
        self.observed.load(Ordering::SeqCst)
    }

    fn observe(&self) {
        if !self.observed.swap(true, Ordering::SeqCst) {
            self.controller
                .run
                .scheduler()
                .tracker()
                .mark_observed(self.callsite.id());
        }
    }

    /// Continue the chain from this action
    ///
    /// Chaining counts as observing this handle: its outcome is consumed by
    /// the chain, so it no longer needs an explicit await.
    pub fn chain(&self) -> TestController {
        self.observe();
        self.controller.clone()
    }
}

impl IntoFuture for ResultHandle {
    type Output = Result<Value>;
    type IntoFuture = Pin<Box<dyn Future<Output = Result<Value>> + Send>>;

    fn into_future(self) -> Self::IntoFuture {
        self.observe();
        Box::pin(self.settlement)
    }
}

/// Test API bound to one run
#[derive(Debug, Clone)]
pub struct TestController {
    run: Arc<TestRun>,
}

impl TestController {
    pub fn new(run: Arc<TestRun>) -> Self {
        Self { run }
    }

    pub fn test_run(&self) -> &Arc<TestRun> {
        &self.run
    }

    #[track_caller]
    fn enqueue(&self, method: &str, command: Command) -> Result<ResultHandle> {
        let callsite = Callsite::capture(method);
        let settlement = self.run.scheduler().enqueue(callsite.clone(), command)?;

        Ok(ResultHandle {
            callsite,
            settlement,
            observed: AtomicBool::new(false),
            controller: self.clone(),
        })
    }

    #[track_caller]
    fn execute_immediate(&self, method: &str, command: Command) -> Result<Value> {
        let callsite = Callsite::capture(method);
        self.run.scheduler().execute_immediate(&callsite, &command)
    }

    // === Pointer actions ===

    #[track_caller]
    pub fn click(&self, selector: &str, options: Option<ActionOptions>) -> Result<ResultHandle> {
        self.enqueue(
            "click",
            Command::Click {
                selector: selector.to_string(),
                options: options.unwrap_or_default(),
            },
        )
    }

    #[track_caller]
    pub fn right_click(
        &self,
        selector: &str,
        options: Option<ActionOptions>,
    ) -> Result<ResultHandle> {
        self.enqueue(
            "rightClick",
            Command::RightClick {
                selector: selector.to_string(),
                options: options.unwrap_or_default(),
            },
        )
    }

    #[track_caller]
    pub fn double_click(
        &self,
        selector: &str,
        options: Option<ActionOptions>,
    ) -> Result<ResultHandle> {
        self.enqueue(
            "doubleClick",
            Command::DoubleClick {
                selector: selector.to_string(),
                options: options.unwrap_or_default(),
            },
        )
    }

    #[track_caller]
    pub fn hover(&self, selector: &str, options: Option<ActionOptions>) -> Result<ResultHandle> {
        self.enqueue(
            "hover",
            Command::Hover {
                selector: selector.to_string(),
                options: options.unwrap_or_default(),
            },
        )
    }

    #[track_caller]
    pub fn drag(
        &self,
        selector: &str,
        drag_offset_x: i32,
        drag_offset_y: i32,
        options: Option<ActionOptions>,
    ) -> Result<ResultHandle> {
        self.enqueue(
            "drag",
            Command::Drag {
                selector: selector.to_string(),
                drag_offset_x,
                drag_offset_y,
                options: options.unwrap_or_default(),
            },
        )
    }

    #[track_caller]
    pub fn drag_to_element(
        &self,
        selector: &str,
        destination_selector: &str,
        options: Option<ActionOptions>,
    ) -> Result<ResultHandle> {
        self.enqueue(
            "dragToElement",
            Command::DragToElement {
                selector: selector.to_string(),
                destination_selector: destination_selector.to_string(),
                options: options.unwrap_or_default(),
            },
        )
    }

    // === Keyboard and selection ===

    #[track_caller]
    pub fn type_text(
        &self,
        selector: &str,
        text: &str,
        options: Option<ActionOptions>,
    ) -> Result<ResultHandle> {
        self.enqueue(
            "typeText",
            Command::TypeText {
                selector: selector.to_string(),
                text: text.to_string(),
                options: options.unwrap_or_default(),
            },
        )
    }

    #[track_caller]
    pub fn select_text(
        &self,
        selector: &str,
        start_pos: Option<u32>,
        end_pos: Option<u32>,
        options: Option<ActionOptions>,
    ) -> Result<ResultHandle> {
        self.enqueue(
            "selectText",
            Command::SelectText {
                selector: selector.to_string(),
                start_pos,
                end_pos,
                options: options.unwrap_or_default(),
            },
        )
    }

    /// Positions are `(line, column)` pairs
    #[track_caller]
    pub fn select_text_area_content(
        &self,
        selector: &str,
        start: Option<(u32, u32)>,
        end: Option<(u32, u32)>,
        options: Option<ActionOptions>,
    ) -> Result<ResultHandle> {
        self.enqueue(
            "selectTextAreaContent",
            Command::SelectTextAreaContent {
                selector: selector.to_string(),
                start_line: start.map(|(line, _)| line),
                start_pos: start.map(|(_, pos)| pos),
                end_line: end.map(|(line, _)| line),
                end_pos: end.map(|(_, pos)| pos),
                options: options.unwrap_or_default(),
            },
        )
    }

    #[track_caller]
    pub fn select_editable_content(
        &self,
        start_selector: &str,
        end_selector: &str,
        options: Option<ActionOptions>,
    ) -> Result<ResultHandle> {
        self.enqueue(
            "selectEditableContent",
            Command::SelectEditableContent {
                start_selector: start_selector.to_string(),
                end_selector: end_selector.to_string(),
                options: options.unwrap_or_default(),
            },
        )
    }

    #[track_caller]
    pub fn press_key(&self, keys: &str, options: Option<ActionOptions>) -> Result<ResultHandle> {
        self.enqueue(
            "pressKey",
            Command::PressKey {
                keys: keys.to_string(),
                options: options.unwrap_or_default(),
            },
        )
    }

    // === Navigation and timing ===

    #[track_caller]
    pub fn wait(&self, timeout_ms: u64) -> Result<ResultHandle> {
        self.enqueue("wait", Command::Wait { timeout: timeout_ms })
    }

    #[track_caller]
    pub fn navigate_to(&self, url: &str) -> Result<ResultHandle> {
        self.enqueue(
            "navigateTo",
            Command::NavigateTo {
                url: url.to_string(),
            },
        )
    }

    #[track_caller]
    pub fn set_test_speed(&self, speed: f64) -> Result<ResultHandle> {
        self.enqueue("setTestSpeed", Command::SetTestSpeed { speed })
    }

    #[track_caller]
    pub fn set_page_load_timeout(&self, duration_ms: u64) -> Result<ResultHandle> {
        self.enqueue(
            "setPageLoadTimeout",
            Command::SetPageLoadTimeout {
                duration: duration_ms,
            },
        )
    }

    // === Uploads ===

    #[track_caller]
    pub fn set_files_to_upload(&self, selector: &str, paths: &[&str]) -> Result<ResultHandle> {
        self.enqueue(
            "setFilesToUpload",
            Command::SetFilesToUpload {
                selector: selector.to_string(),
                file_path: paths.iter().map(|p| p.to_string()).collect(),
            },
        )
    }

    #[track_caller]
    pub fn clear_upload(&self, selector: &str) -> Result<ResultHandle> {
        self.enqueue(
            "clearUpload",
            Command::ClearUpload {
                selector: selector.to_string(),
            },
        )
    }

    // === Browser manipulation ===

    #[track_caller]
    pub fn take_screenshot(&self, path: Option<&str>) -> Result<ResultHandle> {
        self.enqueue(
            "takeScreenshot",
            Command::TakeScreenshot {
                path: path.map(str::to_string),
            },
        )
    }

    #[track_caller]
    pub fn take_element_screenshot(
        &self,
        selector: &str,
        path: Option<&str>,
        options: Option<Value>,
    ) -> Result<ResultHandle> {
        self.enqueue(
            "takeElementScreenshot",
            Command::TakeElementScreenshot {
                selector: selector.to_string(),
                path: path.map(str::to_string),
                options,
            },
        )
    }

    #[track_caller]
    pub fn resize_window(&self, width: u32, height: u32) -> Result<ResultHandle> {
        self.enqueue("resizeWindow", Command::ResizeWindow { width, height })
    }

    #[track_caller]
    pub fn resize_window_to_fit_device(
        &self,
        device: &str,
        options: Option<Value>,
    ) -> Result<ResultHandle> {
        self.enqueue(
            "resizeWindowToFitDevice",
            Command::ResizeWindowToFitDevice {
                device: device.to_string(),
                options,
            },
        )
    }

    #[track_caller]
    pub fn maximize_window(&self) -> Result<ResultHandle> {
        self.enqueue("maximizeWindow", Command::MaximizeWindow)
    }

    #[track_caller]
    pub fn switch_to_iframe(&self, selector: &str) -> Result<ResultHandle> {
        self.enqueue(
            "switchToIframe",
            Command::SwitchToIframe {
                selector: selector.to_string(),
            },
        )
    }

    #[track_caller]
    pub fn switch_to_main_window(&self) -> Result<ResultHandle> {
        self.enqueue("switchToMainWindow", Command::SwitchToMainWindow)
    }

    #[track_caller]
    pub fn set_native_dialog_handler(&self, handler: Option<Value>) -> Result<ResultHandle> {
        self.enqueue(
            "setNativeDialogHandler",
            Command::SetNativeDialogHandler {
                dialog_handler: handler,
            },
        )
    }

    #[track_caller]
    pub fn use_role(&self, role: Role) -> Result<ResultHandle> {
        self.enqueue("useRole", Command::UseRole { role })
    }

    #[track_caller]
    pub fn debug(&self) -> Result<ResultHandle> {
        self.enqueue("debug", Command::Debug)
    }

    // === Immediate operations ===

    #[track_caller]
    pub fn get_native_dialog_history(&self) -> Result<Value> {
        self.execute_immediate("getNativeDialogHistory", Command::GetNativeDialogHistory)
    }

    #[track_caller]
    pub fn get_browser_console_messages(&self) -> Result<Value> {
        self.execute_immediate(
            "getBrowserConsoleMessages",
            Command::GetBrowserConsoleMessages,
        )
    }

    pub fn ctx(&self) -> Map<String, Value> {
        self.run.ctx()
    }

    pub fn set_ctx(&self, ctx: Map<String, Value>) -> &Self {
        self.run.set_ctx(ctx);
        self
    }

    pub fn fixture_ctx(&self) -> Map<String, Value> {
        self.run.fixture_ctx()
    }

    pub fn add_request_hooks(&self, hooks: Vec<RequestHookProxy>) -> &Self {
        for hook in hooks {
            self.run.add_request_hook(hook);
        }
        self
    }

    pub fn remove_request_hooks(&self, ids: &[&str]) -> &Self {
        for id in ids {
            self.run.remove_request_hook(id);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Error;
    use crate::run::executor::LoggingExecutor;
    use crate::run::test_run::TestRunId;

    fn controller() -> TestController {
        TestRun::new(
            TestRunId::generate(),
            "firefox",
            Arc::new(LoggingExecutor::new("firefox")),
        )
        .controller()
    }

    #[tokio::test]
    async fn test_unawaited_action_stays_pending() {
        let t = controller();
        let handle = t.click("#forgotten", None).unwrap();
        assert!(!handle.is_observed());

        let leftovers = t.test_run().finish();
        assert_eq!(leftovers.len(), 1);
        assert_eq!(leftovers[0].method(), "click");
        assert!(leftovers[0].file().ends_with("controller.rs"));
    }

    #[tokio::test]
    async fn test_awaited_action_is_cleared() {
        let t = controller();
        t.click("#a", None).unwrap().await.unwrap();
        assert!(t.test_run().finish().is_empty());
    }

    #[tokio::test]
    async fn test_chaining_observes_prefix() {
        let t = controller();
        let click = t.click("#a", None).unwrap();
        let typed = click.chain().type_text("#b", "hello", None).unwrap();
        assert!(click.is_observed());

        typed.await.unwrap();
        assert!(t.test_run().scheduler().tracker().is_empty());
    }

    #[tokio::test]
    async fn test_click_then_type_then_await_last() {
        let t = controller();
        let click = t.click("A", None).unwrap();
        let typed = click.chain().type_text("B", "text", None).unwrap();
        typed.await.unwrap();
        assert_eq!(t.test_run().finish().len(), 0);
    }

    struct FailingExecutor;

    #[async_trait::async_trait]
    impl crate::run::executor::CommandExecutor for FailingExecutor {
        async fn execute_command(&self, command: &Command, _callsite: &Callsite) -> Result<Value> {
            Err(Error::execution(command.kind(), "element not found"))
        }

        fn execute_command_sync(&self, _command: &Command, _callsite: &Callsite) -> Result<Value> {
            Ok(Value::Null)
        }
    }

    #[tokio::test]
    async fn test_failed_action_clears_once_awaited() {
        let t = TestRun::new(TestRunId::generate(), "firefox", Arc::new(FailingExecutor))
            .controller();
        let first = t.click("#missing", None).unwrap();
        let second = first.chain().click("#also-missing", None).unwrap();

        assert!(matches!(second.await, Err(Error::Execution { .. })));
        assert!(t.test_run().finish().is_empty());
    }

    #[tokio::test]
    async fn test_validation_error_points_at_user_code() {
        let t = controller();
        let line = line!() + 1;
        let err = t.type_text("#name", "", None).unwrap_err();
        match err {
            Error::Validation { callsite, message } => {
                assert_eq!(callsite.method(), "typeText");
                assert_eq!(callsite.line(), line);
                assert!(callsite.file().ends_with("controller.rs"));
                assert!(message.contains("text"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(t.test_run().finish().is_empty());
    }

    #[tokio::test]
    async fn test_immediate_operations() {
        let t = controller();
        assert_eq!(t.get_native_dialog_history().unwrap(), Value::Array(vec![]));

        let mut ctx = Map::new();
        ctx.insert("user".into(), Value::String("peter".into()));
        t.set_ctx(ctx);
        assert_eq!(t.ctx()["user"], "peter");

        t.add_request_hooks(vec![RequestHookProxy::new("logger")])
            .remove_request_hooks(&["logger"]);
        assert!(t.test_run().request_hooks().is_empty());
        assert!(t.test_run().finish().is_empty());
    }
}
