use bytes::Bytes;
use mime::Mime;
use serde::{Deserialize, Serialize};

/// Ceiling for resumes and reference documents.
pub const APPLICANT_MAX_BYTES: usize = 5 * 1024 * 1024;
/// Ceiling for uploads made by moderators.
pub const ADMIN_MAX_BYTES: usize = 10 * 1024 * 1024;

const DOC: &str = "application/msword";
const DOCX: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

/// Validation policy selector for an upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadClass {
    Applicant,
    Administrative,
}

impl UploadClass {
    pub const fn max_bytes(self) -> usize {
        match self {
            UploadClass::Applicant => APPLICANT_MAX_BYTES,
            UploadClass::Administrative => ADMIN_MAX_BYTES,
        }
    }

    pub fn allows(self, mime: &Mime) -> bool {
        let essence = mime.essence_str();
        if essence == mime::APPLICATION_PDF.essence_str() || essence == DOC || essence == DOCX {
            return true;
        }
        matches!(self, UploadClass::Administrative) && mime.type_() == mime::IMAGE
    }
}

/// File handed over by a submitter before it has been stored.
#[derive(Debug, Clone)]
pub struct Upload {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

impl Upload {
    pub fn new(file_name: impl Into<String>, content_type: Option<&str>, bytes: Bytes) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: content_type.map(str::to_string),
            bytes,
        }
    }

    /// Declared type when it is specific, otherwise a guess from the file extension.
    pub fn resolved_mime(&self) -> Option<Mime> {
        let declared = self
            .content_type
            .as_deref()
            .and_then(|raw| raw.trim().parse::<Mime>().ok())
            .filter(|mime| *mime != mime::APPLICATION_OCTET_STREAM);

        declared.or_else(|| mime_guess::from_path(&self.file_name).first())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttachmentId(pub String);

impl AttachmentId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

/// Handle to a stored object. Minted only by `AttachmentStore::put` and owned by one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentRef {
    pub id: AttachmentId,
    pub owner: String,
    pub file_name: String,
    pub content_type: String,
    pub size: usize,
    pub url: String,
    /// Identity of the signed-in uploader, when there was one.
    #[serde(default)]
    pub uploaded_by: Option<String>,
}

impl AttachmentRef {
    pub fn storage_key(&self) -> String {
        format!("{}/{}", self.owner, self.id.0)
    }

    pub fn is_owned_by(&self, owner: &str) -> bool {
        self.owner == owner
    }

    pub fn summary(&self) -> AttachmentSummary {
        AttachmentSummary {
            id: self.id.clone(),
            file_name: self.file_name.clone(),
            content_type: self.content_type.clone(),
            size: self.size,
        }
    }
}

/// Public listing entry for a stored file; omits the owner, uploader, and storage URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttachmentSummary {
    pub id: AttachmentId,
    pub file_name: String,
    pub content_type: String,
    pub size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentContent {
    pub content_type: String,
    pub bytes: Bytes,
}
