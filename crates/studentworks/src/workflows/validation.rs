//! Input shape checks that run before any collaborator is touched.

use crate::error::{FailureKind, TaggedFailure};

/// Upper bound for any free-text field.
pub const MAX_TEXT_LEN: usize = 5_000;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {reason}")]
pub struct ValidationError {
    pub field: &'static str,
    pub reason: String,
}

impl ValidationError {
    pub fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

impl TaggedFailure for ValidationError {
    fn kind(&self) -> FailureKind {
        FailureKind::Validation
    }
}

pub(crate) fn require(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new(field, "is required"));
    }
    limit(field, value)
}

pub(crate) fn limit(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.chars().count() > MAX_TEXT_LEN {
        return Err(ValidationError::new(
            field,
            format!("must be at most {MAX_TEXT_LEN} characters"),
        ));
    }
    Ok(())
}

pub(crate) fn optional(field: &'static str, value: Option<&str>) -> Result<(), ValidationError> {
    match value {
        Some(text) => limit(field, text),
        None => Ok(()),
    }
}

/// Accepts `local@domain.tld` shapes; delivery is the mail transport's problem.
pub(crate) fn email(field: &'static str, value: &str) -> Result<(), ValidationError> {
    let value = value.trim();
    let malformed = || ValidationError::new(field, "must be an e-mail address");

    if value.len() > 254 || value.chars().any(char::is_whitespace) {
        return Err(malformed());
    }
    let (local, domain) = value.split_once('@').ok_or_else(malformed)?;
    if local.is_empty() || domain.contains('@') {
        return Err(malformed());
    }
    match domain.rsplit_once('.') {
        Some((host, tld)) if !host.is_empty() && tld.len() >= 2 => Ok(()),
        _ => Err(malformed()),
    }
}

pub(crate) fn phone(field: &'static str, value: &str) -> Result<(), ValidationError> {
    let digits = value.chars().filter(char::is_ascii_digit).count();
    let allowed = value
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | ' ' | '(' | ')' | '.'));
    if !allowed || !(7..=20).contains(&digits) {
        return Err(ValidationError::new(field, "must be a phone number"));
    }
    Ok(())
}

pub(crate) fn normalized_note(note: Option<String>) -> Option<String> {
    note.map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
}
