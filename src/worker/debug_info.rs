//! Debug endpoint resolution from worker flags

use std::net::TcpListener;

use crate::common::config::DebuggerConfig;
use crate::common::{Error, Result};

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 9229;

/// Where the worker's debug endpoint listens
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugInfo {
    pub host: String,
    pub port: u16,
    /// Worker waits for the debugger before running any code
    pub stop_on_start: bool,
    /// Endpoint came from config rather than a user flag, so the worker
    /// still has to be told about it
    pub is_default: bool,
}

impl DebugInfo {
    /// Parse the first `--inspect*` flag
    ///
    /// `--inspect`, `--inspect=9230`, `--inspect=0.0.0.0`,
    /// `--inspect-brk=host:port`. Any `brk` variant stops on start.
    pub fn from_flags(flags: &[String]) -> Result<Option<Self>> {
        let Some(flag) = flags.iter().find(|f| f.starts_with("--inspect")) else {
            return Ok(None);
        };

        let mut info = Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            stop_on_start: flag.contains("brk"),
            is_default: false,
        };

        let Some((_, value)) = flag.split_once('=') else {
            return Ok(Some(info));
        };

        let (host, port) = match value.rsplit_once(':') {
            Some((host, port)) => (host, Some(port)),
            None if value.chars().all(|c| c.is_ascii_digit()) => ("", Some(value)),
            None => (value, None),
        };

        if !host.is_empty() {
            info.host = host.to_string();
        }
        if let Some(port) = port.filter(|p| !p.is_empty()) {
            info.port = port
                .parse()
                .map_err(|_| Error::Config(format!("Invalid debug port in '{}'", flag)))?;
        }

        Ok(Some(info))
    }

    /// Flags first; otherwise the config section if debugging is enabled
    ///
    /// A configured port of 0 is replaced by a free local port.
    pub fn resolve(flags: &[String], config: &DebuggerConfig) -> Result<Option<Self>> {
        if let Some(info) = Self::from_flags(flags)? {
            return Ok(Some(info));
        }
        if !config.enabled {
            return Ok(None);
        }

        let port = match config.port {
            0 => free_port(&config.host)?,
            port => port,
        };

        Ok(Some(Self {
            host: config.host.clone(),
            port,
            stop_on_start: false,
            is_default: true,
        }))
    }

    /// Flag to pass to a worker that was not started with one
    pub fn inspect_flag(&self) -> String {
        let name = if self.stop_on_start {
            "--inspect-brk"
        } else {
            "--inspect"
        };
        format!("{}={}:{}", name, self.host, self.port)
    }
}

fn free_port(host: &str) -> Result<u16> {
    let listener = TcpListener::bind((host, 0))?;
    Ok(listener.local_addr()?.port())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(flag: &str) -> DebugInfo {
        DebugInfo::from_flags(&[flag.to_string()]).unwrap().unwrap()
    }

    #[test]
    fn test_no_inspect_flag() {
        let flags = vec!["--max-old-space-size=4096".to_string()];
        assert_eq!(DebugInfo::from_flags(&flags).unwrap(), None);
    }

    #[test]
    fn test_bare_flags_use_default_endpoint() {
        let info = parse("--inspect");
        assert_eq!((info.host.as_str(), info.port), ("127.0.0.1", 9229));
        assert!(!info.stop_on_start);

        assert!(parse("--inspect-brk").stop_on_start);
    }

    #[test]
    fn test_flag_values() {
        let info = parse("--inspect-brk=0.0.0.0:9230");
        assert_eq!((info.host.as_str(), info.port), ("0.0.0.0", 9230));
        assert!(info.stop_on_start);

        let info = parse("--inspect=9333");
        assert_eq!((info.host.as_str(), info.port), ("127.0.0.1", 9333));

        let info = parse("--inspect=localhost");
        assert_eq!((info.host.as_str(), info.port), ("localhost", 9229));
    }

    #[test]
    fn test_invalid_port() {
        let err = DebugInfo::from_flags(&["--inspect=host:abc".to_string()]).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_config_fallback() {
        let mut config = DebuggerConfig::default();
        assert_eq!(DebugInfo::resolve(&[], &config).unwrap(), None);

        config.enabled = true;
        config.port = 9400;
        let info = DebugInfo::resolve(&[], &config).unwrap().unwrap();
        assert!(info.is_default);
        assert_eq!(info.inspect_flag(), "--inspect=127.0.0.1:9400");

        config.port = 0;
        let info = DebugInfo::resolve(&[], &config).unwrap().unwrap();
        assert_ne!(info.port, 0);
    }
}
