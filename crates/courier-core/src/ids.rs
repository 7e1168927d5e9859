//! Identifier validation for chat and message ids.
//!
//! Some provider client libraries hand back structured identifier objects,
//! and upstream code has been observed coercing them into the literal
//! string `"[object Object]"`. Such values must never reach the store or
//! the provider: there is no confirmed mapping from the object's fields to
//! a real identifier, so we reject rather than guess.

use crate::error::CourierError;

/// Marker left behind when a structured identifier was stringified.
const OBJECT_ARTIFACT: &str = "[object";

/// Validate a chat or message identifier before it is used anywhere.
///
/// Rejects empty/whitespace values and stringified-object artifacts with
/// `InvalidIdentifier`. Anything else is accepted as-is — the provider's
/// identifier alphabet is not ours to second-guess.
pub fn validate_identifier(id: &str) -> Result<(), CourierError> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        return Err(CourierError::InvalidIdentifier(
            "empty identifier".to_string(),
        ));
    }
    if trimmed.contains(OBJECT_ARTIFACT) {
        return Err(CourierError::InvalidIdentifier(format!(
            "stringified-object artifact: {trimmed}"
        )));
    }
    Ok(())
}

/// True when the value can serve as a dedup key: present, non-empty, and
/// not an artifact. Unlike [`validate_identifier`] this never errors —
/// callers fall back to content-based dedup instead.
pub fn usable_message_id(id: Option<&str>) -> bool {
    matches!(id, Some(v) if !v.trim().is_empty() && !v.contains(OBJECT_ARTIFACT))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CourierError;

    #[test]
    fn accepts_provider_jids() {
        assert!(validate_identifier("5511999887766@s.whatsapp.net").is_ok());
        assert!(validate_identifier("120363001234567890@g.us").is_ok());
    }

    #[test]
    fn rejects_object_object_literal() {
        let err = validate_identifier("[object Object]").unwrap_err();
        assert!(matches!(err, CourierError::InvalidIdentifier(_)));
    }

    #[test]
    fn rejects_embedded_artifact() {
        assert!(validate_identifier("chat-[object Object]-123").is_err());
        assert!(validate_identifier("[object HTMLElement]").is_err());
    }

    #[test]
    fn rejects_empty_and_whitespace() {
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("   ").is_err());
    }

    #[test]
    fn message_id_usability() {
        assert!(usable_message_id(Some("3EB0ABC123")));
        assert!(!usable_message_id(Some("")));
        assert!(!usable_message_id(Some("[object Object]")));
        assert!(!usable_message_id(None));
    }
}
