//! IPC message protocol definitions
//!
//! All messages are JSON-encoded, prefixed with a 4-byte little-endian length.

use serde::{Deserialize, Serialize};

use crate::config::Settings;
use crate::events::SwitchEvent;
use crate::switch::SwitchMethod;

/// Largest frame either side will accept
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Requests from a front end to the daemon
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Ping to check connectivity
    Ping,

    /// Request current daemon status
    GetStatus,

    /// Turn switching on or off; installs or releases the tap
    SetEnabled { enabled: bool },

    /// Allow repeated switches during one Shift hold
    SetMultiTap { enabled: bool },

    /// Choose how the input source is changed
    SetMethod { method: SwitchMethod },

    /// Show the symbol toast after each switch
    SetMiniHud { enabled: bool },

    /// Avoid methods that play the system animation
    SetDisableAnimation { disable: bool },

    /// Reinstall the tap
    RestartTap,

    /// Subscribe to event notifications
    Subscribe,
}

/// Responses from the daemon
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Pong response to ping
    Pong,

    /// Current daemon status
    Status(DaemonStatus),

    /// Request applied
    Ok,

    /// Subscription confirmed
    Subscribed,

    /// Error response
    Error { code: String, message: String },
}

impl Response {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Response::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

/// Push frame sent to subscribed clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "notification")]
pub struct Notification {
    pub event: SwitchEvent,
}

/// Full daemon status snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonStatus {
    /// Daemon version
    pub version: String,

    /// Whether the tap is intercepting events
    pub tap_enabled: bool,

    /// Current user settings
    pub settings: Settings,

    /// Whether secure input currently blocks switching
    pub secure_input: bool,

    /// Whether Input Monitoring must be granted before the tap can run
    pub needs_input_monitoring: bool,

    /// Whether the selected method is blocked on the Accessibility permission
    pub needs_accessibility: bool,

    /// Whether both the English and the Korean source are enabled
    pub switch_available: bool,

    /// Symbol of the currently selected input source
    pub current_symbol: String,

    /// Uptime in seconds
    pub uptime_secs: u64,
}

impl Default for DaemonStatus {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            tap_enabled: false,
            settings: Settings::default(),
            secure_input: false,
            needs_input_monitoring: false,
            needs_accessibility: false,
            switch_available: false,
            current_symbol: String::new(),
            uptime_secs: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization() {
        let req = Request::SetMethod {
            method: SwitchMethod::CapsLock,
        };
        let json = serde_json::to_string(&req).unwrap();
        assert_eq!(json, r#"{"type":"set_method","method":"caps_lock"}"#);
    }

    #[test]
    fn test_request_deserialization() {
        let req: Request = serde_json::from_str(r#"{"type":"set_disable_animation","disable":false}"#).unwrap();
        assert_eq!(req, Request::SetDisableAnimation { disable: false });

        let req: Request = serde_json::from_str(r#"{"type":"restart_tap"}"#).unwrap();
        assert_eq!(req, Request::RestartTap);
    }

    #[test]
    fn test_response_serialization() {
        let resp = Response::Status(DaemonStatus::default());
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains(r#""type":"status""#));
        assert!(json.contains(r#""tap_enabled":false"#));
        assert!(json.contains(r#""switch_available":false"#));

        let resp = Response::error("bad_request", "nope");
        let json = serde_json::to_string(&resp).unwrap();
        assert_eq!(json, r#"{"type":"error","code":"bad_request","message":"nope"}"#);
    }

    #[test]
    fn test_notification_serialization() {
        let note = Notification {
            event: SwitchEvent::Switched {
                symbol: "가".to_string(),
            },
        };
        let json = serde_json::to_string(&note).unwrap();
        assert_eq!(
            json,
            r#"{"type":"notification","event":{"type":"switched","symbol":"가"}}"#
        );
    }
}
