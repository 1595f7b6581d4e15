//! Callsite capture
//!
//! Every API call records where in user code it was made. The location
//! comes from `#[track_caller]`, so public API methods and the helpers
//! they forward to must all carry the attribute for the location to point
//! at user code rather than at this crate.

use std::backtrace::{Backtrace, BacktraceStatus};
use std::fmt;
use std::panic::Location;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

static NEXT_CALLSITE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique callsite identity
///
/// Two calls from the same source line (e.g. in a loop) get distinct ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CallsiteId(u64);

impl CallsiteId {
    fn next() -> Self {
        Self(NEXT_CALLSITE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Source location of one API invocation
#[derive(Debug, Clone)]
pub struct Callsite {
    id: CallsiteId,
    method: String,
    file: String,
    line: u32,
    column: u32,
    backtrace: Option<Arc<Backtrace>>,
}

impl Callsite {
    /// Capture the location of the caller
    ///
    /// A backtrace is attached only when `RUST_BACKTRACE` enables capture.
    #[track_caller]
    pub fn capture(method: &str) -> Self {
        let location = Location::caller();
        let backtrace = Backtrace::capture();
        let backtrace = match backtrace.status() {
            BacktraceStatus::Captured => Some(Arc::new(backtrace)),
            _ => None,
        };

        Self {
            id: CallsiteId::next(),
            method: method.to_string(),
            file: location.file().to_string(),
            line: location.line(),
            column: location.column(),
            backtrace,
        }
    }

    /// Callsite reported by the worker for code running in its process
    pub fn remote(method: &str, location: Option<RemoteLocation>) -> Self {
        let location = location.unwrap_or_default();
        Self {
            id: CallsiteId::next(),
            method: method.to_string(),
            file: location.filename,
            line: location.line,
            column: location.column,
            backtrace: None,
        }
    }

    pub fn id(&self) -> CallsiteId {
        self.id
    }

    /// API method that produced this callsite
    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn file(&self) -> &str {
        &self.file
    }

    pub fn line(&self) -> u32 {
        self.line
    }

    pub fn column(&self) -> u32 {
        self.column
    }

    pub fn backtrace(&self) -> Option<&Backtrace> {
        self.backtrace.as_deref()
    }
}

impl fmt::Display for Callsite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.file.is_empty() {
            write!(f, "<unknown>")
        } else {
            write!(f, "{}:{}:{}", self.file, self.line, self.column)
        }
    }
}

/// Location fields as sent by the worker in `execute-command`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemoteLocation {
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub line: u32,
    #[serde(default)]
    pub column: u32,
}
