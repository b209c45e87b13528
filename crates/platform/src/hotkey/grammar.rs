//! Portable hotkey-string grammar (spec §4.6) and the portal naming
//! conversion supplemented from `original_source`'s
//! `_convert_hotkey_format`.

/// One token of a parsed hotkey combination: either a named special key
/// (`<ctrl>`, `<f1>`, ...) or a single literal character.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HotkeyToken {
    Special(String),
    Char(char),
}

/// Splits a hotkey string on `+` into its tokens. `<name>` tokens become
/// `HotkeyToken::Special`; anything else must be a single character.
pub fn parse_hotkey(hotkey: &str) -> Vec<HotkeyToken> {
    hotkey
        .split('+')
        .filter(|s| !s.is_empty())
        .map(|raw| {
            let raw = raw.trim();
            if raw.starts_with('<') && raw.ends_with('>') && raw.len() > 2 {
                HotkeyToken::Special(raw[1..raw.len() - 1].to_lowercase())
            } else {
                HotkeyToken::Char(raw.chars().next().unwrap_or('?').to_ascii_lowercase())
            }
        })
        .collect()
}

/// Converts a portable hotkey string to the XDG portal's naming
/// convention, e.g. `<pause>` -> `Pause`, `<ctrl>+<alt>+r` ->
/// `Control+Alt+R`. Table grounded on the original's
/// `_convert_hotkey_format`.
pub fn to_portal_string(hotkey: &str) -> String {
    parse_hotkey(hotkey)
        .into_iter()
        .map(|tok| match tok {
            HotkeyToken::Special(name) => special_to_portal(&name),
            HotkeyToken::Char(c) => c.to_ascii_uppercase().to_string(),
        })
        .collect::<Vec<_>>()
        .join("+")
}

fn special_to_portal(name: &str) -> String {
    match name {
        "pause" => "Pause".to_string(),
        "ctrl" | "control" => "Control".to_string(),
        "alt" => "Alt".to_string(),
        "shift" => "Shift".to_string(),
        "super" | "cmd" | "meta" => "Super".to_string(),
        "up" => "Up".to_string(),
        "down" => "Down".to_string(),
        "left" => "Left".to_string(),
        "right" => "Right".to_string(),
        "tab" => "Tab".to_string(),
        "esc" | "escape" => "Escape".to_string(),
        "space" => "Space".to_string(),
        "enter" | "return" => "Return".to_string(),
        "backspace" => "BackSpace".to_string(),
        "delete" => "Delete".to_string(),
        other if other.len() == 2 && other.starts_with('f') && other[1..].parse::<u8>().is_ok() => {
            format!("F{}", &other[1..])
        }
        other if other.len() == 3 && other.starts_with('f') && other[1..].parse::<u8>().is_ok() => {
            format!("F{}", &other[1..])
        }
        other => {
            let mut chars = other.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_special() {
        assert_eq!(parse_hotkey("<pause>"), vec![HotkeyToken::Special("pause".into())]);
    }

    #[test]
    fn parses_combination() {
        assert_eq!(
            parse_hotkey("<ctrl>+<alt>+r"),
            vec![
                HotkeyToken::Special("ctrl".into()),
                HotkeyToken::Special("alt".into()),
                HotkeyToken::Char('r'),
            ]
        );
    }

    #[test]
    fn portal_string_matches_conversion_table() {
        assert_eq!(to_portal_string("<pause>"), "Pause");
        assert_eq!(to_portal_string("<ctrl>+<alt>+r"), "Control+Alt+R");
        assert_eq!(to_portal_string("<f9>"), "F9");
        assert_eq!(to_portal_string("<f12>"), "F12");
    }
}
