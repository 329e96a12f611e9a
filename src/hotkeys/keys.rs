//! Virtual-key code naming.
//!
//! The config file stores hotkeys as raw virtual-key codes; these tables give
//! them human-readable names for logs and error messages. `string_to_vk` is
//! the inverse of `vk_to_string` for every named key.

pub const VK_BACK: u32 = 0x08;
pub const VK_TAB: u32 = 0x09;
pub const VK_RETURN: u32 = 0x0D;
pub const VK_PAUSE: u32 = 0x13;
pub const VK_CAPITAL: u32 = 0x14;
pub const VK_ESCAPE: u32 = 0x1B;
pub const VK_SPACE: u32 = 0x20;
pub const VK_PRIOR: u32 = 0x21;
pub const VK_NEXT: u32 = 0x22;
pub const VK_END: u32 = 0x23;
pub const VK_HOME: u32 = 0x24;
pub const VK_LEFT: u32 = 0x25;
pub const VK_UP: u32 = 0x26;
pub const VK_RIGHT: u32 = 0x27;
pub const VK_DOWN: u32 = 0x28;
pub const VK_SNAPSHOT: u32 = 0x2C;
pub const VK_INSERT: u32 = 0x2D;
pub const VK_DELETE: u32 = 0x2E;
pub const VK_NUMPAD0: u32 = 0x60;
pub const VK_MULTIPLY: u32 = 0x6A;
pub const VK_ADD: u32 = 0x6B;
pub const VK_SUBTRACT: u32 = 0x6D;
pub const VK_DECIMAL: u32 = 0x6E;
pub const VK_DIVIDE: u32 = 0x6F;
pub const VK_F1: u32 = 0x70;
pub const VK_F10: u32 = 0x79;
pub const VK_F11: u32 = 0x7A;
pub const VK_F12: u32 = 0x7B;
pub const VK_SCROLL: u32 = 0x91;

/// Human-readable name of a virtual-key code.
pub fn vk_to_string(vk: u32) -> String {
    match vk {
        v if (VK_F1..=VK_F12).contains(&v) => format!("F{}", v - VK_F1 + 1),
        v if (0x41..=0x5A).contains(&v) || (0x30..=0x39).contains(&v) => {
            char::from(v as u8).to_string()
        }
        v if (VK_NUMPAD0..VK_NUMPAD0 + 10).contains(&v) => format!("Num{}", v - VK_NUMPAD0),
        VK_MULTIPLY => "Num*".to_string(),
        VK_ADD => "Num+".to_string(),
        VK_SUBTRACT => "Num-".to_string(),
        VK_DECIMAL => "Num.".to_string(),
        VK_DIVIDE => "Num/".to_string(),
        VK_ESCAPE => "Escape".to_string(),
        VK_TAB => "Tab".to_string(),
        VK_CAPITAL => "CapsLock".to_string(),
        VK_SPACE => "Space".to_string(),
        VK_RETURN => "Enter".to_string(),
        VK_BACK => "Backspace".to_string(),
        VK_DELETE => "Delete".to_string(),
        VK_INSERT => "Insert".to_string(),
        VK_HOME => "Home".to_string(),
        VK_END => "End".to_string(),
        VK_PRIOR => "PageUp".to_string(),
        VK_NEXT => "PageDown".to_string(),
        VK_UP => "Up".to_string(),
        VK_DOWN => "Down".to_string(),
        VK_LEFT => "Left".to_string(),
        VK_RIGHT => "Right".to_string(),
        VK_PAUSE => "Pause".to_string(),
        VK_SCROLL => "ScrollLock".to_string(),
        VK_SNAPSHOT => "PrintScreen".to_string(),
        v => format!("0x{v:x}"),
    }
}

/// Parse a key name back to a virtual-key code. Returns 0 for unknown names.
pub fn string_to_vk(s: &str) -> u32 {
    let s = s.trim();
    if s.is_empty() {
        return 0;
    }

    // Function keys
    if let Some(num) = s.strip_prefix(['F', 'f']) {
        if let Ok(n) = num.parse::<u32>() {
            if (1..=12).contains(&n) {
                return VK_F1 + n - 1;
            }
        }
    }

    // Numpad keys
    if let Some(rest) = s.strip_prefix("Num").or_else(|| s.strip_prefix("num")) {
        match rest {
            "*" => return VK_MULTIPLY,
            "+" => return VK_ADD,
            "-" => return VK_SUBTRACT,
            "." => return VK_DECIMAL,
            "/" => return VK_DIVIDE,
            _ => {
                if let Ok(n) = rest.parse::<u32>() {
                    if n < 10 {
                        return VK_NUMPAD0 + n;
                    }
                }
            }
        }
    }

    // Single letters and digits
    if s.len() == 1 {
        let c = s.as_bytes()[0];
        if c.is_ascii_lowercase() {
            return (c - 32) as u32;
        }
        if c.is_ascii_uppercase() || c.is_ascii_digit() {
            return c as u32;
        }
    }

    // Hex escape produced by vk_to_string for unnamed keys
    if let Some(hex) = s.strip_prefix("0x") {
        if let Ok(v) = u32::from_str_radix(hex, 16) {
            return v;
        }
    }

    match s.to_ascii_lowercase().as_str() {
        "escape" | "esc" => VK_ESCAPE,
        "tab" => VK_TAB,
        "capslock" => VK_CAPITAL,
        "space" => VK_SPACE,
        "enter" | "return" => VK_RETURN,
        "backspace" => VK_BACK,
        "delete" | "del" => VK_DELETE,
        "insert" | "ins" => VK_INSERT,
        "home" => VK_HOME,
        "end" => VK_END,
        "pageup" | "pgup" => VK_PRIOR,
        "pagedown" | "pgdn" => VK_NEXT,
        "up" => VK_UP,
        "down" => VK_DOWN,
        "left" => VK_LEFT,
        "right" => VK_RIGHT,
        "pause" => VK_PAUSE,
        "scrolllock" => VK_SCROLL,
        "printscreen" | "prtsc" => VK_SNAPSHOT,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_named_key_roundtrip() {
        let named = [
            VK_BACK, VK_TAB, VK_RETURN, VK_PAUSE, VK_CAPITAL, VK_ESCAPE, VK_SPACE, VK_PRIOR,
            VK_NEXT, VK_END, VK_HOME, VK_LEFT, VK_UP, VK_RIGHT, VK_DOWN, VK_SNAPSHOT, VK_INSERT,
            VK_DELETE, VK_MULTIPLY, VK_ADD, VK_SUBTRACT, VK_DECIMAL, VK_DIVIDE, VK_SCROLL,
        ];
        for vk in named {
            assert_eq!(string_to_vk(&vk_to_string(vk)), vk, "vk 0x{vk:x}");
        }
    }

    #[test]
    fn test_function_key_roundtrip() {
        for vk in VK_F1..=VK_F12 {
            assert_eq!(string_to_vk(&vk_to_string(vk)), vk);
        }
    }

    #[test]
    fn test_letters_digits_numpad_roundtrip() {
        for vk in 0x30..=0x39u32 {
            assert_eq!(string_to_vk(&vk_to_string(vk)), vk);
        }
        for vk in 0x41..=0x5Au32 {
            assert_eq!(string_to_vk(&vk_to_string(vk)), vk);
        }
        for vk in VK_NUMPAD0..VK_NUMPAD0 + 10 {
            assert_eq!(string_to_vk(&vk_to_string(vk)), vk);
        }
    }

    #[test]
    fn test_lowercase_letter_maps_to_uppercase_code() {
        assert_eq!(string_to_vk("g"), 0x47);
    }

    #[test]
    fn test_unknown_key_hex_roundtrip() {
        assert_eq!(vk_to_string(0xE7), "0xe7");
        assert_eq!(string_to_vk("0xe7"), 0xE7);
    }

    #[test]
    fn test_unknown_name_is_zero() {
        assert_eq!(string_to_vk("hyperspace"), 0);
    }
}
