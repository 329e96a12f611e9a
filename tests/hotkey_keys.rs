//! Virtual-key naming and binding behaviour.

use framegen::config::AppSettings;
use framegen::hotkeys::keys::{string_to_vk, vk_to_string};
use framegen::hotkeys::{bindings_from_settings, HotkeyAction};

#[test]
fn every_nameable_key_roundtrips() {
    // Letters, digits, numpad, function keys, and the named table.
    let mut codes: Vec<u32> = Vec::new();
    codes.extend(0x30..=0x39); // digits
    codes.extend(0x41..=0x5A); // letters
    codes.extend(0x60..=0x6F); // numpad incl. operators
    codes.extend(0x70..=0x7B); // F1-F12
    codes.extend([
        0x08, 0x09, 0x0D, 0x13, 0x14, 0x1B, 0x20, 0x21, 0x22, 0x23, 0x24, 0x25, 0x26, 0x27, 0x28,
        0x2C, 0x2D, 0x2E, 0x91,
    ]);

    for vk in codes {
        let name = vk_to_string(vk);
        assert_eq!(string_to_vk(&name), vk, "vk 0x{vk:x} via '{name}'");
    }
}

#[test]
fn default_bindings_read_alt_function_keys() {
    let bindings = bindings_from_settings(&AppSettings::default());
    let display: Vec<String> = bindings.iter().map(|b| b.display()).collect();
    assert_eq!(display, vec!["Alt+F10", "Alt+F11", "Alt+F12"]);

    let actions: Vec<HotkeyAction> = bindings.iter().map(|b| b.action).collect();
    assert_eq!(
        actions,
        vec![
            HotkeyAction::ToggleFrameGen,
            HotkeyAction::ToggleOverlay,
            HotkeyAction::CycleMode
        ]
    );
}

#[test]
fn binding_ids_are_unique_and_stable() {
    let bindings = bindings_from_settings(&AppSettings::default());
    let mut ids: Vec<i32> = bindings.iter().map(|b| b.action.id()).collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), bindings.len());

    for binding in &bindings {
        assert_eq!(HotkeyAction::from_id(binding.action.id()), Some(binding.action));
    }
}
