//! Size-routed file storage: small files go to an S3-compatible object
//! store, large ones to Google Drive under the uploading user's OAuth
//! token.

pub mod backend;
pub mod config;
pub mod crypto;
pub mod oauth;
pub mod router;
pub mod telemetry;

pub use hybridstore_common::backend::{BackendAdapter, StorageType, UploadFile, UploadResult};
pub use hybridstore_common::files;

pub use crate::config::StorageConfig;
pub use crate::oauth::AccessToken;
pub use crate::router::HybridStorage;
