//! Ways of changing the active input source

use std::fmt;

use serde::{Deserialize, Serialize};

/// How a switch is carried out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwitchMethod {
    /// Post a synthetic Caps Lock press (needs Accessibility)
    CapsLock,
    /// Select the opposite input source directly through TIS
    #[default]
    TisToggle,
    /// Post the system Option+Space shortcut (needs Accessibility)
    Shortcut,
}

impl SwitchMethod {
    /// Whether the method posts synthetic events and so needs Accessibility
    pub fn requires_accessibility(self) -> bool {
        match self {
            SwitchMethod::CapsLock | SwitchMethod::Shortcut => true,
            SwitchMethod::TisToggle => false,
        }
    }

    /// Whether the system shows its switch animation for this method
    pub fn plays_animation(self) -> bool {
        matches!(self, SwitchMethod::Shortcut)
    }

    pub(crate) fn as_u8(self) -> u8 {
        match self {
            SwitchMethod::CapsLock => 0,
            SwitchMethod::TisToggle => 1,
            SwitchMethod::Shortcut => 2,
        }
    }

    /// Unknown values decode to the default method
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => SwitchMethod::CapsLock,
            2 => SwitchMethod::Shortcut,
            _ => SwitchMethod::TisToggle,
        }
    }
}

impl fmt::Display for SwitchMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SwitchMethod::CapsLock => write!(f, "caps lock"),
            SwitchMethod::TisToggle => write!(f, "direct input source toggle"),
            SwitchMethod::Shortcut => write!(f, "system shortcut"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_u8_encoding_is_stable() {
        for method in [SwitchMethod::CapsLock, SwitchMethod::TisToggle, SwitchMethod::Shortcut] {
            assert_eq!(SwitchMethod::from_u8(method.as_u8()), method);
        }
        assert_eq!(SwitchMethod::from_u8(200), SwitchMethod::TisToggle);
    }

    #[test]
    fn test_accessibility_requirement() {
        assert!(SwitchMethod::CapsLock.requires_accessibility());
        assert!(SwitchMethod::Shortcut.requires_accessibility());
        assert!(!SwitchMethod::TisToggle.requires_accessibility());
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&SwitchMethod::TisToggle).unwrap();
        assert_eq!(json, "\"tis_toggle\"");
        let method: SwitchMethod = serde_json::from_str("\"caps_lock\"").unwrap();
        assert_eq!(method, SwitchMethod::CapsLock);
    }
}
