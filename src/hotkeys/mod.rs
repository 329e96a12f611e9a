//! Global hotkeys.
//!
//! The pipeline is controlled at runtime by three OS-level shortcuts. The
//! listener owns a hidden message-only window on its own thread and reports
//! presses through a channel (the "action sink"); the orchestrator drains the
//! channel at the start of each tick.

pub mod keys;
#[cfg(windows)]
pub mod listener;

use crossbeam_channel::{Receiver, Sender};
use serde::{Deserialize, Serialize};

use crate::config::AppSettings;

/// Actions a hotkey can trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HotkeyAction {
    ToggleFrameGen,
    ToggleOverlay,
    CycleMode,
}

impl HotkeyAction {
    /// Stable per-action id used for OS registration.
    pub fn id(self) -> i32 {
        match self {
            HotkeyAction::ToggleFrameGen => 1,
            HotkeyAction::ToggleOverlay => 2,
            HotkeyAction::CycleMode => 3,
        }
    }

    pub fn from_id(id: i32) -> Option<Self> {
        match id {
            1 => Some(HotkeyAction::ToggleFrameGen),
            2 => Some(HotkeyAction::ToggleOverlay),
            3 => Some(HotkeyAction::CycleMode),
            _ => None,
        }
    }
}

/// Modifier keys required alongside the main key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Modifiers {
    pub alt: bool,
    pub ctrl: bool,
    pub shift: bool,
    pub win: bool,
}

impl Modifiers {
    pub const ALT: Modifiers = Modifiers {
        alt: true,
        ctrl: false,
        shift: false,
        win: false,
    };
}

/// One registered shortcut.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HotkeyBinding {
    pub action: HotkeyAction,
    pub virtual_key: u32,
    pub modifiers: Modifiers,
}

impl HotkeyBinding {
    /// Display form, e.g. `Alt+F10`.
    pub fn display(&self) -> String {
        let mut out = String::new();
        if self.modifiers.ctrl {
            out.push_str("Ctrl+");
        }
        if self.modifiers.alt {
            out.push_str("Alt+");
        }
        if self.modifiers.shift {
            out.push_str("Shift+");
        }
        if self.modifiers.win {
            out.push_str("Win+");
        }
        out.push_str(&keys::vk_to_string(self.virtual_key));
        out
    }
}

/// The three default bindings derived from settings.
pub fn bindings_from_settings(settings: &AppSettings) -> Vec<HotkeyBinding> {
    let modifiers = if settings.hotkey_require_alt {
        Modifiers::ALT
    } else {
        Modifiers::default()
    };
    vec![
        HotkeyBinding {
            action: HotkeyAction::ToggleFrameGen,
            virtual_key: settings.hotkey_toggle_frame_gen,
            modifiers,
        },
        HotkeyBinding {
            action: HotkeyAction::ToggleOverlay,
            virtual_key: settings.hotkey_toggle_overlay,
            modifiers,
        },
        HotkeyBinding {
            action: HotkeyAction::CycleMode,
            virtual_key: settings.hotkey_cycle_mode,
            modifiers,
        },
    ]
}

/// Create the action sink pair. The sender side goes to the listener; the
/// receiver is drained by the orchestrator between ticks.
pub fn action_channel() -> (Sender<HotkeyAction>, Receiver<HotkeyAction>) {
    // Bounded: a stuck pipeline should not queue minutes of presses.
    crossbeam_channel::bounded(16)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_id_roundtrip() {
        for action in [
            HotkeyAction::ToggleFrameGen,
            HotkeyAction::ToggleOverlay,
            HotkeyAction::CycleMode,
        ] {
            assert_eq!(HotkeyAction::from_id(action.id()), Some(action));
        }
        assert_eq!(HotkeyAction::from_id(99), None);
    }

    #[test]
    fn test_binding_display() {
        let binding = HotkeyBinding {
            action: HotkeyAction::ToggleFrameGen,
            virtual_key: keys::VK_F10,
            modifiers: Modifiers::ALT,
        };
        assert_eq!(binding.display(), "Alt+F10");
    }

    #[test]
    fn test_default_bindings_follow_settings() {
        let mut settings = AppSettings::default();
        settings.hotkey_require_alt = false;
        settings.hotkey_cycle_mode = keys::string_to_vk("F5");
        let bindings = bindings_from_settings(&settings);
        assert_eq!(bindings.len(), 3);
        assert_eq!(bindings[2].display(), "F5");
        assert!(!bindings[0].modifiers.alt);
    }

    #[test]
    fn test_action_channel_delivers_in_order() {
        let (tx, rx) = action_channel();
        tx.send(HotkeyAction::CycleMode).unwrap();
        tx.send(HotkeyAction::ToggleFrameGen).unwrap();
        assert_eq!(rx.try_recv().unwrap(), HotkeyAction::CycleMode);
        assert_eq!(rx.try_recv().unwrap(), HotkeyAction::ToggleFrameGen);
        assert!(rx.try_recv().is_err());
    }
}
