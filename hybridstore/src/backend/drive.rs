//! Google Drive backend adapter (the "remote" backend).
//!
//! Uploads go through a resumable-upload session: the metadata request
//! returns a session URL in its `Location` header and the file body is
//! PUT to that URL. Link sharing is a separate permission call made
//! afterwards, so an upload can succeed while sharing fails; the
//! configured [`ShareFailurePolicy`] decides what happens then.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, error, warn};

use hybridstore_common::backend::{BackendAdapter, StorageType, UploadFile, UploadResult};
use hybridstore_common::files::validate_size;

use crate::config::{DriveConfig, ShareFailurePolicy};
use crate::oauth::AccessToken;

pub const DEFAULT_API_BASE: &str = "https://www.googleapis.com";

const FILE_FIELDS: &str = "id,name,mimeType,size,webViewLink,webContentLink";

#[derive(Debug, thiserror::Error)]
pub enum DriveError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Drive API error: HTTP {status} - {body}")]
    Api { status: u16, body: String },
    #[error("Drive did not return an upload session URL")]
    MissingSessionUrl,
    #[error("File not found: {0}")]
    NotFound(String),
}

/// File resource as returned by the Drive v3 API.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
    /// Drive reports sizes as decimal strings.
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub web_view_link: Option<String>,
    #[serde(default)]
    pub web_content_link: Option<String>,
}

/// Thin Drive v3 REST client. Cheap to clone; every call takes the
/// caller's access token.
#[derive(Clone)]
pub struct DriveClient {
    client: Client,
    api_base: String,
}

impl DriveClient {
    pub fn new(client: Client) -> Self {
        Self::with_base_url(client, DEFAULT_API_BASE)
    }

    pub fn with_base_url(client: Client, api_base: &str) -> Self {
        Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
        }
    }

    fn file_url(&self, file_id: &str) -> String {
        format!(
            "{}/drive/v3/files/{}",
            self.api_base,
            urlencoding::encode(file_id)
        )
    }

    /// Upload `file` as `name` into `folder_id`.
    pub async fn upload_file(
        &self,
        token: &AccessToken,
        folder_id: &str,
        name: &str,
        file: &UploadFile,
    ) -> Result<DriveFile, DriveError> {
        let mime_type = file.mime_type();
        let metadata = serde_json::json!({
            "name": name,
            "parents": [folder_id],
        });

        let resp = self
            .client
            .post(format!("{}/upload/drive/v3/files", self.api_base))
            .query(&[
                ("uploadType", "resumable"),
                ("supportsAllDrives", "true"),
                ("fields", FILE_FIELDS),
            ])
            .bearer_auth(token.secret())
            .header("X-Upload-Content-Type", &mime_type)
            .header("X-Upload-Content-Length", file.size().to_string())
            .json(&metadata)
            .send()
            .await?;
        let resp = check_status(resp).await?;

        let session_url = resp
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
            .ok_or(DriveError::MissingSessionUrl)?;

        let resp = self
            .client
            .put(&session_url)
            .bearer_auth(token.secret())
            .header(reqwest::header::CONTENT_TYPE, &mime_type)
            .body(file.data.clone())
            .send()
            .await?;
        let resp = check_status(resp).await?;

        Ok(resp.json().await?)
    }

    /// Grant `reader` to `anyone` so the file is reachable by link.
    pub async fn share_with_anyone(
        &self,
        token: &AccessToken,
        file_id: &str,
    ) -> Result<(), DriveError> {
        let resp = self
            .client
            .post(format!("{}/permissions", self.file_url(file_id)))
            .query(&[("supportsAllDrives", "true")])
            .bearer_auth(token.secret())
            .json(&serde_json::json!({ "role": "reader", "type": "anyone" }))
            .send()
            .await?;
        check_status(resp).await?;
        Ok(())
    }

    pub async fn get_file(&self, token: &AccessToken, file_id: &str) -> Result<DriveFile, DriveError> {
        let resp = self
            .client
            .get(self.file_url(file_id))
            .query(&[("fields", FILE_FIELDS), ("supportsAllDrives", "true")])
            .bearer_auth(token.secret())
            .send()
            .await?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Err(DriveError::NotFound(file_id.to_string()));
        }
        let resp = check_status(resp).await?;
        Ok(resp.json().await?)
    }

    /// Delete a file. A file that no longer exists counts as deleted.
    pub async fn delete_file(&self, token: &AccessToken, file_id: &str) -> Result<(), DriveError> {
        let resp = self
            .client
            .delete(self.file_url(file_id))
            .query(&[("supportsAllDrives", "true")])
            .bearer_auth(token.secret())
            .send()
            .await?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        check_status(resp).await?;
        Ok(())
    }
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, DriveError> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    Err(DriveError::Api { status, body })
}

/// Browser link for a Drive file id.
pub fn view_url(file_id: &str) -> String {
    format!(
        "https://drive.google.com/file/d/{}/view",
        urlencoding::encode(file_id)
    )
}

/// Drive adapter bound to one user's access token.
pub struct DriveAdapter {
    drive: DriveClient,
    token: AccessToken,
    folder_id: String,
    share_with_link: bool,
    on_share_failure: ShareFailurePolicy,
}

impl DriveAdapter {
    pub fn new(drive: DriveClient, config: &DriveConfig, token: AccessToken) -> Self {
        Self {
            drive,
            token,
            folder_id: config.folder_id.clone(),
            share_with_link: config.share_with_link,
            on_share_failure: config.on_share_failure,
        }
    }

    pub async fn file_metadata(&self, file_id: &str) -> Result<DriveFile, DriveError> {
        self.drive.get_file(&self.token, file_id).await
    }

    pub async fn set_link_sharing(&self, file_id: &str) -> Result<(), DriveError> {
        self.drive.share_with_anyone(&self.token, file_id).await
    }
}

#[async_trait]
impl BackendAdapter for DriveAdapter {
    fn storage_type(&self) -> StorageType {
        StorageType::Remote
    }

    async fn upload(&self, file: &UploadFile, destination: &str) -> UploadResult {
        if let Err(e) = validate_size(file.size()) {
            return UploadResult::failure(StorageType::Remote, e);
        }

        let created = match self
            .drive
            .upload_file(&self.token, &self.folder_id, destination, file)
            .await
        {
            Ok(created) => created,
            Err(e) => {
                error!(name = %destination, error = %e, "Drive upload failed");
                return UploadResult::failure(StorageType::Remote, e);
            }
        };

        if self.share_with_link {
            if let Err(e) = self.set_link_sharing(&created.id).await {
                match self.on_share_failure {
                    ShareFailurePolicy::KeepPrivate => {
                        warn!(
                            file_id = %created.id,
                            error = %e,
                            "Link sharing failed; uploaded file stays private"
                        );
                    }
                    ShareFailurePolicy::DeleteObject => {
                        warn!(
                            file_id = %created.id,
                            error = %e,
                            "Link sharing failed; deleting uploaded file"
                        );
                        if !self.delete(&created.id).await {
                            error!(file_id = %created.id, "Orphaned Drive file after failed share");
                        }
                        return UploadResult::failure(
                            StorageType::Remote,
                            format!("Failed to share uploaded file: {}", e),
                        );
                    }
                }
            }
        }

        debug!(file_id = %created.id, size = file.size(), "Drive upload complete");
        let url = created
            .web_view_link
            .clone()
            .or_else(|| self.public_url(&created.id));
        UploadResult::remote(created.id, url)
    }

    async fn delete(&self, identifier: &str) -> bool {
        match self.drive.delete_file(&self.token, identifier).await {
            Ok(()) => {
                debug!(file_id = %identifier, "Drive delete complete");
                true
            }
            Err(e) => {
                error!(file_id = %identifier, error = %e, "Drive delete failed");
                false
            }
        }
    }

    fn public_url(&self, identifier: &str) -> Option<String> {
        Some(view_url(identifier))
    }
}
