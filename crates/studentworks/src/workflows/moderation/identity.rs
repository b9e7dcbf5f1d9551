use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::config::ModerationConfig;
use crate::error::{FailureKind, TaggedFailure};

/// The signed-in user as reported by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub email: String,
}

impl Actor {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{email} is not allowed to moderate")]
pub struct AccessDenied {
    pub email: String,
}

impl TaggedFailure for AccessDenied {
    fn kind(&self) -> FailureKind {
        FailureKind::Forbidden
    }
}

/// External predicate deciding who may moderate.
pub trait ModeratorDirectory: Send + Sync {
    fn is_moderator(&self, email: &str) -> bool;

    fn authorize(&self, actor: &Actor) -> Result<(), AccessDenied> {
        if self.is_moderator(&actor.email) {
            Ok(())
        } else {
            Err(AccessDenied {
                email: actor.email.clone(),
            })
        }
    }
}

/// Fixed allow-list, compared case-insensitively.
#[derive(Debug, Clone, Default)]
pub struct StaticModerators {
    emails: HashSet<String>,
}

impl StaticModerators {
    pub fn new<I, T>(emails: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        let emails = emails
            .into_iter()
            .map(|email| email.as_ref().trim().to_ascii_lowercase())
            .filter(|email| !email.is_empty())
            .collect();
        Self { emails }
    }

    pub fn from_config(config: &ModerationConfig) -> Self {
        Self::new(&config.moderator_emails)
    }

    pub fn len(&self) -> usize {
        self.emails.len()
    }

    pub fn is_empty(&self) -> bool {
        self.emails.is_empty()
    }
}

impl ModeratorDirectory for StaticModerators {
    fn is_moderator(&self, email: &str) -> bool {
        self.emails.contains(&email.trim().to_ascii_lowercase())
    }
}
