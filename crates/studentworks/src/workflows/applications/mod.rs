//! Student applications to approved postings.

pub mod domain;
pub mod engine;
pub mod memory;
pub mod repository;

#[cfg(test)]
mod tests;

pub use domain::{
    ApplicantContact, Application, ApplicationDraft, ApplicationId, ApplicationStatus,
    ApplicationStatusView, StatusChange,
};
pub use engine::{ApplicationEngine, ApplicationError, ReconcileSummary};
pub use memory::InMemoryApplicationStore;
pub use repository::ApplicationStore;
