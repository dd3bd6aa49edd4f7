//! Control messages posted to the worker by the page.

use serde_json::Value;
use tracing::trace;

/// The literal command that activates a waiting worker immediately.
pub const SKIP_WAITING: &str = "SKIP_WAITING";

/// A recognized control message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessage {
    /// Stop waiting for old clients to close and activate now.
    SkipWaiting,
}

impl ControlMessage {
    /// Interpret posted message data. Anything other than the exact
    /// `"SKIP_WAITING"` string is ignored.
    pub fn parse(data: &Value) -> Option<Self> {
        match data {
            Value::String(s) if s == SKIP_WAITING => Some(Self::SkipWaiting),
            other => {
                trace!(data = %other, "Ignoring unrecognized message");
                None
            }
        }
    }
}
