/// Failures reported by the keyed document store backing submissions and applications.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("document not found")]
    NotFound,
    #[error("document or attachment already claimed")]
    Duplicate,
    #[error("document changed concurrently")]
    Conflict,
    #[error("document store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub(crate) fn poisoned(store: &str) -> Self {
        StoreError::Unavailable(format!("{store} lock poisoned"))
    }
}
