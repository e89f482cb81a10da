use crate::peer::types::ServerConfig;
use rand::Rng;

pub fn random_id() -> String {
    hex::encode(rand::rng().random::<[u8; 8]>())
}

/// Adds the `stun:`/`turn:` scheme to an ICE server URL when the user left it out.
pub fn add_ice_url_scheme(config: &ServerConfig) -> String {
    if config.url.starts_with("turn:")
        || config.url.starts_with("turns:")
        || config.url.starts_with("stun:")
    {
        config.url.clone()
    } else {
        let scheme = if config.r#type == "turn" {
            "turn:"
        } else {
            "stun:"
        };
        format!("{}{}", scheme, config.url)
    }
}

/// Length in the units every protocol limit is expressed in (Unicode scalar values).
pub fn text_units(text: &str) -> usize {
    text.chars().count()
}

/// Drops C0/C1 control characters (newlines and tabs included).
pub fn strip_control_chars(text: &str) -> String {
    text.chars().filter(|c| !c.is_control()).collect()
}

/// First `max` units of `text`.
pub fn truncate_units(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(kind: &str, url: &str) -> ServerConfig {
        ServerConfig {
            id: "x".into(),
            r#type: kind.into(),
            url: url.into(),
            username: None,
            credential: None,
        }
    }

    #[test]
    fn scheme_is_added_once() {
        assert_eq!(add_ice_url_scheme(&server("stun", "a.org:3478")), "stun:a.org:3478");
        assert_eq!(add_ice_url_scheme(&server("turn", "b.org")), "turn:b.org");
        assert_eq!(add_ice_url_scheme(&server("turn", "stun:c.org")), "stun:c.org");
    }

    #[test]
    fn control_chars_are_stripped() {
        assert_eq!(strip_control_chars("a\u{0}b\nc\td\u{7f}\u{85}e"), "abcde");
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_units("héllo", 2), "hé");
        assert_eq!(truncate_units("hi", 5), "hi");
        assert_eq!(truncate_units("日本語", 0), "");
        assert_eq!(text_units("日本語"), 3);
    }

    #[test]
    fn random_ids_are_16_hex_chars() {
        let id = random_id();
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
