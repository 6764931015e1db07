//! Input validation run at the API boundary, before any cache or network work.

use crate::error::{ProtocolError, ProtocolResult};

/// Maximum length of event and collection ids.
pub const MAX_ID_LEN: usize = 256;
/// Maximum length of collection names.
pub const MAX_NAME_LEN: usize = 100;
/// Maximum number of tags on one bookmark.
pub const MAX_TAGS: usize = 50;
/// Maximum length of a single tag.
pub const MAX_TAG_LEN: usize = 64;
/// Maximum length of a note.
pub const MAX_NOTE_LEN: usize = 4096;

fn validate_id(field: &'static str, value: &str) -> ProtocolResult<()> {
    if value.is_empty() {
        return Err(ProtocolError::invalid(field, "must not be empty"));
    }
    if value.len() > MAX_ID_LEN {
        return Err(ProtocolError::invalid(
            field,
            format!("longer than {MAX_ID_LEN} bytes"),
        ));
    }
    if value.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(ProtocolError::invalid(field, "must not contain whitespace"));
    }
    Ok(())
}

/// Validates an event reference.
pub fn validate_event_id(event_id: &str) -> ProtocolResult<()> {
    validate_id("event_id", event_id)
}

/// Validates a collection id.
pub fn validate_collection_id(collection_id: &str) -> ProtocolResult<()> {
    validate_id("collection_id", collection_id)
}

/// Validates a collection name.
pub fn validate_name(name: &str) -> ProtocolResult<()> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(ProtocolError::invalid("name", "must not be blank"));
    }
    if trimmed.chars().count() > MAX_NAME_LEN {
        return Err(ProtocolError::invalid(
            "name",
            format!("longer than {MAX_NAME_LEN} characters"),
        ));
    }
    Ok(())
}

/// Validates a `#rgb` or `#rrggbb` color.
pub fn validate_color(color: &str) -> ProtocolResult<()> {
    let hex = color
        .strip_prefix('#')
        .ok_or_else(|| ProtocolError::invalid("color", "must start with '#'"))?;
    if !matches!(hex.len(), 3 | 6) || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ProtocolError::invalid(
            "color",
            "expected #rgb or #rrggbb",
        ));
    }
    Ok(())
}

/// Validates bookmark tags.
pub fn validate_tags(tags: &[String]) -> ProtocolResult<()> {
    if tags.len() > MAX_TAGS {
        return Err(ProtocolError::invalid(
            "tags",
            format!("more than {MAX_TAGS} tags"),
        ));
    }
    for tag in tags {
        if tag.trim().is_empty() {
            return Err(ProtocolError::invalid("tags", "tags must not be blank"));
        }
        if tag.chars().count() > MAX_TAG_LEN {
            return Err(ProtocolError::invalid(
                "tags",
                format!("tag {tag:?} longer than {MAX_TAG_LEN} characters"),
            ));
        }
        if tag.chars().any(char::is_control) {
            return Err(ProtocolError::invalid(
                "tags",
                "tags must not contain control characters",
            ));
        }
    }
    Ok(())
}

/// Validates a bookmark note.
pub fn validate_note(note: &str) -> ProtocolResult<()> {
    if note.len() > MAX_NOTE_LEN {
        return Err(ProtocolError::invalid(
            "note",
            format!("longer than {MAX_NOTE_LEN} bytes"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_ids() {
        assert!(validate_event_id("evt1").is_ok());
        assert!(validate_event_id(&"a".repeat(64)).is_ok());
        assert!(validate_event_id("").is_err());
        assert!(validate_event_id("evt 1").is_err());
        assert!(validate_event_id(&"a".repeat(MAX_ID_LEN + 1)).is_err());
    }

    #[test]
    fn colors() {
        assert!(validate_color("#fff").is_ok());
        assert!(validate_color("#A0b1C2").is_ok());
        assert!(validate_color("fff").is_err());
        assert!(validate_color("#ffff").is_err());
        assert!(validate_color("#ggg").is_err());
    }

    #[test]
    fn names() {
        assert!(validate_name("Favorites").is_ok());
        assert!(validate_name("   ").is_err());
        assert!(validate_name(&"x".repeat(MAX_NAME_LEN + 1)).is_err());
    }

    #[test]
    fn tags() {
        assert!(validate_tags(&["rust".into(), "nostr".into()]).is_ok());
        assert!(validate_tags(&[" ".into()]).is_err());
        assert!(validate_tags(&["a\u{0}b".into()]).is_err());
        let many: Vec<String> = (0..=MAX_TAGS).map(|i| format!("t{i}")).collect();
        assert!(validate_tags(&many).is_err());
    }

    #[test]
    fn invalid_input_names_field() {
        let err = validate_collection_id("").unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::InvalidInput {
                field: "collection_id",
                ..
            }
        ));
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn printable_ids_are_accepted(id in "[!-~]{1,256}") {
                prop_assert!(validate_event_id(&id).is_ok());
            }

            #[test]
            fn ids_with_whitespace_are_rejected(a in "[a-z]{0,8}", b in "[a-z]{0,8}", ws in "[ \t\n]") {
                let id = format!("{a}{ws}{b}");
                prop_assert!(validate_event_id(&id).is_err());
            }

            #[test]
            fn hex_colors_are_accepted(hex in "[0-9a-fA-F]{3}|[0-9a-fA-F]{6}") {
                let color = format!("#{hex}");
                prop_assert!(validate_color(&color).is_ok());
            }
        }
    }
}
