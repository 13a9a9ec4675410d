use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Which backend holds an uploaded object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    /// Managed object store, for files below the routing threshold.
    Local,
    /// Cloud drive reached with a user's OAuth token.
    Remote,
}

impl StorageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageType::Local => "local",
            StorageType::Remote => "remote",
        }
    }
}

impl fmt::Display for StorageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A candidate file held in memory.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub name: String,
    pub content_type: Option<String>,
    pub data: Bytes,
}

impl UploadFile {
    pub fn new(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            content_type: None,
            data: data.into(),
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    /// Declared content type, falling back to a guess from the file name.
    pub fn mime_type(&self) -> String {
        match &self.content_type {
            Some(ct) if !ct.trim().is_empty() => ct.clone(),
            _ => mime_guess::from_path(&self.name)
                .first_or_octet_stream()
                .essence_str()
                .to_string(),
        }
    }
}

/// Normalized outcome of an upload, whichever backend handled it.
///
/// On success exactly one of `storage_path` (local) or `file_id` (remote)
/// is set. `error` is set only on failure. Fields are read-only; build
/// values with [`UploadResult::local`], [`UploadResult::remote`] or
/// [`UploadResult::failure`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResult {
    success: bool,
    storage_type: StorageType,
    #[serde(skip_serializing_if = "Option::is_none")]
    file_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    storage_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    public_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl UploadResult {
    pub fn local(storage_path: impl Into<String>, public_url: Option<String>) -> Self {
        Self {
            success: true,
            storage_type: StorageType::Local,
            file_id: None,
            storage_path: Some(storage_path.into()),
            public_url,
            error: None,
        }
    }

    pub fn remote(file_id: impl Into<String>, public_url: Option<String>) -> Self {
        Self {
            success: true,
            storage_type: StorageType::Remote,
            file_id: Some(file_id.into()),
            storage_path: None,
            public_url,
            error: None,
        }
    }

    pub fn failure(storage_type: StorageType, error: impl fmt::Display) -> Self {
        Self {
            success: false,
            storage_type,
            file_id: None,
            storage_path: None,
            public_url: None,
            error: Some(error.to_string()),
        }
    }

    pub fn success(&self) -> bool {
        self.success
    }

    pub fn storage_type(&self) -> StorageType {
        self.storage_type
    }

    pub fn file_id(&self) -> Option<&str> {
        self.file_id.as_deref()
    }

    pub fn storage_path(&self) -> Option<&str> {
        self.storage_path.as_deref()
    }

    pub fn public_url(&self) -> Option<&str> {
        self.public_url.as_deref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// The backend identifier for this object: the storage path for local
    /// uploads, the file id for remote ones.
    pub fn identifier(&self) -> Option<&str> {
        match self.storage_type {
            StorageType::Local => self.storage_path(),
            StorageType::Remote => self.file_id(),
        }
    }
}

/// Trait implemented by all storage backend adapters.
///
/// Adapters never surface errors across this boundary: upstream failures
/// are logged and folded into a failed [`UploadResult`] or a `false`
/// delete. Validation and routing happen before an adapter is called.
#[async_trait::async_trait]
pub trait BackendAdapter: Send + Sync {
    fn storage_type(&self) -> StorageType;

    /// Upload `file` under `destination` (an object key or file name).
    async fn upload(&self, file: &UploadFile, destination: &str) -> UploadResult;

    /// Delete an object by backend identifier. Returns whether it is gone.
    async fn delete(&self, identifier: &str) -> bool;

    /// Public URL for an object, if the backend can compute one without a
    /// round trip.
    fn public_url(&self, identifier: &str) -> Option<String>;
}
