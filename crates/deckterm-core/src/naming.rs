//! External session naming.
//!
//! An application-owned multiplexer session is named
//! `deckterm-<first 8 lowercase hex chars of the session uuid>`. Any other name
//! is invisible to the session backend.

use uuid::Uuid;

/// Reserved prefix carried by every application-owned external session.
pub const SESSION_PREFIX: &str = "deckterm-";

/// Length of the short id embedded after the prefix.
pub const SHORT_ID_LEN: usize = 8;

/// Deterministic external session name for a session id.
pub fn session_name(id: &Uuid) -> String {
    let hex = id.simple().to_string();
    format!("{SESSION_PREFIX}{}", &hex[..SHORT_ID_LEN])
}

/// Recover the short id from an external session name.
///
/// Returns `None` unless the name starts with the reserved prefix followed by
/// eight lowercase hex digits.
pub fn short_id(name: &str) -> Option<&str> {
    let rest = name.strip_prefix(SESSION_PREFIX)?;
    let candidate = rest.get(..SHORT_ID_LEN)?;
    candidate
        .bytes()
        .all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
        .then_some(candidate)
}

/// Whether `name` belongs to this application.
pub fn is_app_session(name: &str) -> bool {
    short_id(name).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn name_uses_first_eight_hex_chars() {
        let id = Uuid::parse_str("deadbeef-1234-4abc-8def-0123456789ab").expect("uuid");
        assert_eq!(session_name(&id), "deckterm-deadbeef");
    }

    #[test]
    fn short_id_rejects_foreign_names() {
        assert_eq!(short_id("main"), None);
        assert_eq!(short_id("deckterm-"), None);
        assert_eq!(short_id("deckterm-1234"), None);
        assert_eq!(short_id("deckterm-DEADBEEF"), None);
        assert_eq!(short_id("deckterm-zzzzzzzz"), None);
        assert_eq!(short_id("xdeckterm-deadbeef"), None);
    }

    #[test]
    fn short_id_accepts_prefixed_names() {
        assert_eq!(short_id("deckterm-0badf00d"), Some("0badf00d"));
        // Only the start of the name is constrained.
        assert_eq!(short_id("deckterm-0badf00d-old"), Some("0badf00d"));
        assert!(is_app_session("deckterm-0badf00d"));
    }

    proptest! {
        #[test]
        fn naming_round_trip(bytes in any::<[u8; 16]>()) {
            let id = Uuid::from_bytes(bytes);
            let name = session_name(&id);
            let expected = id.simple().to_string()[..8].to_ascii_lowercase();
            prop_assert_eq!(short_id(&name), Some(expected.as_str()));
        }
    }
}
