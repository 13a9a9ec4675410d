use tracing::{info, warn};

use hybridstore_common::backend::{BackendAdapter, StorageType, UploadFile, UploadResult};
use hybridstore_common::files::{
    determine_storage_type, format_file_size, generate_unique_filename, object_key, validate_file,
};

use crate::backend::drive::{view_url, DriveAdapter, DriveClient};
use crate::backend::{build_http_client, ObjectStoreAdapter};
use crate::config::{DriveConfig, StorageConfig};
use crate::oauth::AccessToken;

const MISSING_TOKEN: &str = "Remote storage requires a Google Drive access token";

/// Routes uploads to the object store or Drive by file size.
///
/// Holds no per-request state. There is no retry and no fallback
/// between backends: whatever the chosen adapter reports is returned.
pub struct HybridStorage {
    local: ObjectStoreAdapter,
    drive: DriveClient,
    drive_config: DriveConfig,
}

impl HybridStorage {
    pub fn new(local: ObjectStoreAdapter, drive: DriveClient, drive_config: DriveConfig) -> Self {
        Self {
            local,
            drive,
            drive_config,
        }
    }

    pub fn from_config(config: &StorageConfig) -> anyhow::Result<Self> {
        let client = build_http_client(config.http_timeout_secs)?;
        Ok(Self::new(
            ObjectStoreAdapter::new(config.object_store.clone(), client.clone()),
            DriveClient::new(client),
            config.drive.clone(),
        ))
    }

    pub fn local(&self) -> &ObjectStoreAdapter {
        &self.local
    }

    /// Drive adapter acting as the owner of `token`.
    pub fn remote(&self, token: &AccessToken) -> DriveAdapter {
        DriveAdapter::new(self.drive.clone(), &self.drive_config, token.clone())
    }

    pub fn route(&self, size: u64) -> StorageType {
        determine_storage_type(size)
    }

    /// Validate, rename and store `file`.
    ///
    /// `destination` is a key prefix for the object store; Drive uploads
    /// always land in the configured folder. `token` is only needed when
    /// the file routes to Drive.
    pub async fn upload(
        &self,
        file: &UploadFile,
        destination: &str,
        token: Option<&AccessToken>,
    ) -> UploadResult {
        let storage_type = self.route(file.size());

        if let Err(e) = validate_file(file) {
            warn!(name = %file.name, error = %e, "Rejected upload");
            return UploadResult::failure(storage_type, e);
        }

        let name = generate_unique_filename(&file.name);
        info!(
            name = %name,
            size = %format_file_size(file.size()),
            storage = %storage_type,
            "Routing upload"
        );

        match storage_type {
            StorageType::Local => self.local.upload(file, &object_key(destination, &name)).await,
            StorageType::Remote => match token {
                Some(token) => self.remote(token).upload(file, &name).await,
                None => {
                    warn!(name = %name, "Remote upload attempted without an access token");
                    UploadResult::failure(StorageType::Remote, MISSING_TOKEN)
                }
            },
        }
    }

    pub async fn delete(
        &self,
        storage_type: StorageType,
        identifier: &str,
        token: Option<&AccessToken>,
    ) -> bool {
        match storage_type {
            StorageType::Local => self.local.delete(identifier).await,
            StorageType::Remote => match token {
                Some(token) => self.remote(token).delete(identifier).await,
                None => {
                    warn!(file_id = %identifier, "Remote delete attempted without an access token");
                    false
                }
            },
        }
    }

    pub fn public_url(&self, storage_type: StorageType, identifier: &str) -> Option<String> {
        match storage_type {
            StorageType::Local => self.local.public_url(identifier),
            StorageType::Remote => Some(view_url(identifier)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ObjectStoreConfig, ShareFailurePolicy};
    use wiremock::matchers::{method, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn storage(uri: &str) -> HybridStorage {
        let client = reqwest::Client::new();
        HybridStorage::new(
            ObjectStoreAdapter::new(
                ObjectStoreConfig {
                    endpoint: uri.to_string(),
                    region: "us-east-1".to_string(),
                    bucket: "uploads".to_string(),
                    access_key_id: "AKID".to_string(),
                    secret_access_key: "secret".to_string(),
                    public_url: None,
                },
                client.clone(),
            ),
            DriveClient::with_base_url(client, uri),
            DriveConfig {
                folder_id: "folder-1".to_string(),
                share_with_link: true,
                on_share_failure: ShareFailurePolicy::KeepPrivate,
            },
        )
    }

    async fn silent_server() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn test_invalid_files_never_reach_a_backend() {
        let server = silent_server().await;
        let s = storage(&server.uri());

        let empty = s.upload(&UploadFile::new("a.txt", Vec::<u8>::new()), "", None).await;
        assert!(!empty.success());
        assert_eq!(empty.storage_type(), StorageType::Local);
        assert_eq!(empty.error(), Some("File is empty"));

        let unnamed = s.upload(&UploadFile::new(" ", vec![1u8]), "", None).await;
        assert_eq!(unnamed.error(), Some("File name is required"));
    }

    #[tokio::test]
    async fn test_remote_without_token_fails_without_network() {
        let server = silent_server().await;
        let s = storage(&server.uri());
        let file = UploadFile::new("walkthrough.mp4", vec![0u8; 52_428_800]);

        let result = s.upload(&file, "", None).await;
        assert!(!result.success());
        assert_eq!(result.storage_type(), StorageType::Remote);
        assert_eq!(result.error(), Some(MISSING_TOKEN));
    }

    #[tokio::test]
    async fn test_destination_cannot_leave_bucket() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path_regex(r"^/uploads/_/other/a_\d+_[a-z0-9]{6}\.txt$"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let s = storage(&server.uri());
        let result = s.upload(&UploadFile::new("a.txt", vec![1u8]), "../other", None).await;
        assert!(result.success(), "{:?}", result.error());
        let key = result.storage_path().unwrap();
        assert!(key.starts_with("_/other/a_"));
        assert_eq!(
            result.public_url(),
            Some(format!("{}/uploads/{}", server.uri(), key).as_str())
        );
    }

    #[tokio::test]
    async fn test_remote_delete_without_token() {
        let server = silent_server().await;
        assert!(!storage(&server.uri()).delete(StorageType::Remote, "file-1", None).await);
    }

    #[test]
    fn test_route() {
        let s = storage("http://localhost:9000");
        assert_eq!(s.route(10 * 1024 * 1024), StorageType::Local);
        assert_eq!(s.route(52_428_800), StorageType::Remote);
    }

    #[test]
    fn test_public_url_dispatch() {
        let s = storage("http://localhost:9000");
        assert_eq!(
            s.public_url(StorageType::Local, "a/b.png").as_deref(),
            Some("http://localhost:9000/uploads/a/b.png")
        );
        assert_eq!(
            s.public_url(StorageType::Remote, "1AbC").as_deref(),
            Some("https://drive.google.com/file/d/1AbC/view")
        );
    }

    #[test]
    fn test_from_config() {
        let config: StorageConfig = toml::from_str(
            r#"
token_encryption_key = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f"

[object_store]
endpoint = "http://localhost:9000"
bucket = "uploads"
access_key_id = "AKID"
secret_access_key = "secret"

[drive]
folder_id = "folder-1"

[oauth]
client_id = "client"
client_secret = "shh"
redirect_uri = "https://erp.example.com/cb"
"#,
        )
        .unwrap();
        let s = HybridStorage::from_config(&config).unwrap();
        assert_eq!(s.local().bucket(), "uploads");
    }
}
