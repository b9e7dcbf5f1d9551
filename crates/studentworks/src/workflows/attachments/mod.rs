//! Binary attachments (resumes, reference letters, administrative uploads).

pub mod domain;
pub mod memory;
pub mod store;

pub use domain::{
    AttachmentContent, AttachmentId, AttachmentRef, AttachmentSummary, Upload, UploadClass,
    ADMIN_MAX_BYTES, APPLICANT_MAX_BYTES,
};
pub use memory::MemoryBlobStore;
pub use store::{AttachmentError, AttachmentStore, BlobError, BlobStore, StoredBlob};
