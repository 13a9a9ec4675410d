//! S3-compatible object store adapter (the "local" backend).
//!
//! Talks to any S3-compatible API (AWS, MinIO, Supabase storage) using
//! path-style URLs and manual AWS Signature V4 signing over reqwest.

use std::collections::BTreeMap;

use anyhow::{bail, Context};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, RequestBuilder};
use sha2::{Digest, Sha256};
use tracing::{debug, error, info};

use hybridstore_common::backend::{BackendAdapter, StorageType, UploadFile, UploadResult};
use hybridstore_common::files::{format_file_size, LOCAL_SIZE_THRESHOLD};

use crate::config::ObjectStoreConfig;

type HmacSha256 = Hmac<Sha256>;

pub struct ObjectStoreAdapter {
    config: ObjectStoreConfig,
    client: Client,
}

impl ObjectStoreAdapter {
    pub fn new(config: ObjectStoreConfig, client: Client) -> Self {
        Self { config, client }
    }

    pub fn bucket(&self) -> &str {
        &self.config.bucket
    }

    fn endpoint(&self) -> &str {
        self.config.endpoint.trim_end_matches('/')
    }

    /// Canonical path for an object, without the leading slash.
    fn object_path(&self, key: &str) -> String {
        format!("{}/{}", self.config.bucket, encode_key(key))
    }

    fn public_base(&self) -> String {
        match &self.config.public_url {
            Some(base) => base.trim_end_matches('/').to_string(),
            None => format!("{}/{}", self.endpoint(), self.config.bucket),
        }
    }

    /// Compute AWS Signature V4 for a request.
    fn sign(
        &self,
        method: &str,
        path: &str,
        query: &str,
        headers: &BTreeMap<String, String>,
        body_hash: &str,
        date_time: &str,
        date: &str,
    ) -> String {
        let canonical_headers: String = headers
            .iter()
            .map(|(k, v)| format!("{}:{}\n", k, v.trim()))
            .collect();
        let signed_headers: String = headers.keys().cloned().collect::<Vec<_>>().join(";");

        let canonical_request = format!(
            "{}\n/{}\n{}\n{}\n{}\n{}",
            method, path, query, canonical_headers, signed_headers, body_hash
        );

        let cr_hash = hex::encode(Sha256::digest(canonical_request.as_bytes()));
        let credential_scope = format!("{}/{}/s3/aws4_request", date, self.config.region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            date_time, credential_scope, cr_hash
        );

        let signing_key =
            derive_signing_key(&self.config.secret_access_key, date, &self.config.region);
        let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes()));

        format!(
            "AWS4-HMAC-SHA256 Credential={}/{},SignedHeaders={},Signature={}",
            self.config.access_key_id, credential_scope, signed_headers, signature
        )
    }

    /// Build a signed request. `extra` headers are both signed and sent.
    fn signed_request(
        &self,
        method: Method,
        path: &str,
        body: &[u8],
        extra: &[(&str, String)],
    ) -> RequestBuilder {
        let now = Utc::now();
        let date_time = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date = now.format("%Y%m%d").to_string();
        let payload_hash = body_hash(body);

        let mut headers = BTreeMap::new();
        headers.insert("host".to_string(), url_host(self.endpoint()));
        headers.insert("x-amz-content-sha256".to_string(), payload_hash.clone());
        headers.insert("x-amz-date".to_string(), date_time.clone());
        for (name, value) in extra {
            headers.insert(name.to_ascii_lowercase(), value.clone());
        }

        let canonical_path = match url_path(self.endpoint()) {
            "" => path.to_string(),
            base => format!("{}/{}", base, path),
        };
        let auth = self.sign(
            method.as_str(),
            &canonical_path,
            "",
            &headers,
            &payload_hash,
            &date_time,
            &date,
        );

        let url = format!("{}/{}", self.endpoint(), path);
        let mut req = self
            .client
            .request(method, url)
            .header("x-amz-date", &date_time)
            .header("x-amz-content-sha256", &payload_hash)
            .header("Authorization", auth);
        for (name, value) in extra {
            req = req.header(*name, value);
        }
        req
    }

    async fn put_object(&self, key: &str, file: &UploadFile) -> anyhow::Result<()> {
        let content_type = file.mime_type();
        let req = self.signed_request(
            Method::PUT,
            &self.object_path(key),
            &file.data,
            &[("content-type", content_type)],
        );

        let resp = req
            .body(file.data.clone())
            .send()
            .await
            .context("Object store PUT request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!("Object store PUT failed: HTTP {} - {}", status, body);
        }
        Ok(())
    }

    async fn delete_object(&self, key: &str) -> anyhow::Result<()> {
        let resp = self
            .signed_request(Method::DELETE, &self.object_path(key), b"", &[])
            .send()
            .await
            .context("Object store DELETE request failed")?;

        if !resp.status().is_success() && resp.status().as_u16() != 404 {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!("Object store DELETE failed: HTTP {} - {}", status, body);
        }
        Ok(())
    }

    /// Fetch an object's bytes.
    pub async fn download(&self, key: &str) -> anyhow::Result<Bytes> {
        let resp = self
            .signed_request(Method::GET, &self.object_path(key), b"", &[])
            .send()
            .await
            .context("Object store GET request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!("Object store GET failed: HTTP {} - {}", status, body);
        }

        Ok(resp.bytes().await.context("Failed to read object store response body")?)
    }

    /// Create the bucket with a public-read ACL unless it already exists.
    pub async fn ensure_bucket(&self) -> anyhow::Result<()> {
        let body = create_bucket_body(&self.config.region);
        let resp = self
            .signed_request(
                Method::PUT,
                &self.config.bucket,
                body.as_bytes(),
                &[("x-amz-acl", "public-read".to_string())],
            )
            .body(body)
            .send()
            .await
            .context("Object store create-bucket request failed")?;

        let status = resp.status().as_u16();
        if status == 200 || status == 201 {
            info!(bucket = %self.config.bucket, "Created bucket");
            return Ok(());
        }

        let body = resp.text().await.unwrap_or_default();
        if status == 409 && body.contains("<Code>BucketAlreadyOwnedByYou</Code>") {
            info!(bucket = %self.config.bucket, "Bucket already exists");
            return Ok(());
        }
        bail!("Object store create-bucket failed: HTTP {} - {}", status, body);
    }
}

/// us-east-1 rejects a location constraint; every other region requires one.
fn create_bucket_body(region: &str) -> String {
    if region == "us-east-1" {
        String::new()
    } else {
        format!(
            "<CreateBucketConfiguration xmlns=\"http://s3.amazonaws.com/doc/2006-03-01/\">\
             <LocationConstraint>{}</LocationConstraint></CreateBucketConfiguration>",
            region
        )
    }
}

fn derive_signing_key(secret: &str, date: &str, region: &str) -> Vec<u8> {
    let key = format!("AWS4{}", secret);
    let k_date = hmac_sha256(key.as_bytes(), date.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, b"s3");
    hmac_sha256(&k_service, b"aws4_request")
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC key length ok");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn body_hash(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// URI-encode each segment of an object key, keeping `/` separators.
fn encode_key(key: &str) -> String {
    key.trim_start_matches('/')
        .split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Extract the host part from a URL for use in signing.
fn url_host(url: &str) -> String {
    let without_scheme = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .unwrap_or(url);
    without_scheme.split('/').next().unwrap_or(without_scheme).to_string()
}

/// Path component of a URL, without surrounding slashes.
fn url_path(url: &str) -> &str {
    let without_scheme = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .unwrap_or(url);
    match without_scheme.find('/') {
        Some(idx) => without_scheme[idx..].trim_matches('/'),
        None => "",
    }
}

#[async_trait]
impl BackendAdapter for ObjectStoreAdapter {
    fn storage_type(&self) -> StorageType {
        StorageType::Local
    }

    async fn upload(&self, file: &UploadFile, destination: &str) -> UploadResult {
        if file.size() >= LOCAL_SIZE_THRESHOLD {
            return UploadResult::failure(
                StorageType::Local,
                format!(
                    "File size {} exceeds the object store limit of {}",
                    format_file_size(file.size()),
                    format_file_size(LOCAL_SIZE_THRESHOLD)
                ),
            );
        }

        match self.put_object(destination, file).await {
            Ok(()) => {
                debug!(key = %destination, size = file.size(), "Object store upload complete");
                UploadResult::local(destination, self.public_url(destination))
            }
            Err(e) => {
                error!(key = %destination, error = %e, "Object store upload failed");
                UploadResult::failure(StorageType::Local, format!("{:#}", e))
            }
        }
    }

    async fn delete(&self, identifier: &str) -> bool {
        match self.delete_object(identifier).await {
            Ok(()) => {
                debug!(key = %identifier, "Object store delete complete");
                true
            }
            Err(e) => {
                error!(key = %identifier, error = %e, "Object store delete failed");
                false
            }
        }
    }

    fn public_url(&self, identifier: &str) -> Option<String> {
        Some(format!("{}/{}", self.public_base(), encode_key(identifier)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, header, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn adapter(endpoint: &str) -> ObjectStoreAdapter {
        ObjectStoreAdapter::new(
            ObjectStoreConfig {
                endpoint: endpoint.to_string(),
                region: "us-east-1".to_string(),
                bucket: "uploads".to_string(),
                access_key_id: "AKIDEXAMPLE".to_string(),
                secret_access_key: "secret".to_string(),
                public_url: None,
            },
            Client::new(),
        )
    }

    #[test]
    fn test_url_host() {
        assert_eq!(url_host("https://s3.us-east-1.amazonaws.com"), "s3.us-east-1.amazonaws.com");
        assert_eq!(url_host("https://xyz.supabase.co/storage/v1/s3"), "xyz.supabase.co");
        assert_eq!(url_host("http://localhost:9000"), "localhost:9000");
    }

    #[test]
    fn test_encode_key() {
        assert_eq!(encode_key("orders/42/a b.pdf"), "orders/42/a%20b.pdf");
        assert_eq!(encode_key("/plain.txt"), "plain.txt");
    }

    #[test]
    fn test_hmac_sha256() {
        let result = hmac_sha256(b"secret", b"data");
        assert_eq!(result.len(), 32);
    }

    #[test]
    fn test_url_path() {
        assert_eq!(url_path("https://xyz.supabase.co/storage/v1/s3/"), "storage/v1/s3");
        assert_eq!(url_path("http://localhost:9000"), "");
    }

    #[test]
    fn test_public_url() {
        let a = adapter("http://localhost:9000/");
        assert_eq!(
            a.public_url("orders/sofa 1.png").as_deref(),
            Some("http://localhost:9000/uploads/orders/sofa%201.png")
        );

        let mut cfg = a.config.clone();
        cfg.public_url = Some("https://cdn.example.com/storage/v1/object/public/uploads/".into());
        let a = ObjectStoreAdapter::new(cfg, Client::new());
        assert_eq!(
            a.public_url("x.pdf").as_deref(),
            Some("https://cdn.example.com/storage/v1/object/public/uploads/x.pdf")
        );
    }

    #[tokio::test]
    async fn test_upload_puts_signed_object() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/uploads/orders/invoice.pdf"))
            .and(header_exists("authorization"))
            .and(header("content-type", "application/pdf"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let a = adapter(&server.uri());
        let file = UploadFile::new("invoice.pdf", vec![7u8; 2048]);
        let result = a.upload(&file, "orders/invoice.pdf").await;

        assert!(result.success());
        assert_eq!(result.storage_path(), Some("orders/invoice.pdf"));
        assert_eq!(
            result.public_url(),
            Some(format!("{}/uploads/orders/invoice.pdf", server.uri()).as_str())
        );
    }

    #[tokio::test]
    async fn test_upload_failure_is_normalized() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(403).set_body_string("AccessDenied"))
            .mount(&server)
            .await;

        let a = adapter(&server.uri());
        let result = a.upload(&UploadFile::new("a.txt", vec![1u8]), "a.txt").await;
        assert!(!result.success());
        assert_eq!(result.storage_type(), StorageType::Local);
        assert!(result.error().unwrap().contains("403"));
        assert!(result.error().unwrap().contains("AccessDenied"));
    }

    #[tokio::test]
    async fn test_upload_rejects_oversized_without_request() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let a = adapter(&server.uri());
        let file = UploadFile::new("big.bin", vec![0u8; LOCAL_SIZE_THRESHOLD as usize]);
        let result = a.upload(&file, "big.bin").await;
        assert!(!result.success());
        assert!(result.error().unwrap().contains("50 MB"));
    }

    #[tokio::test]
    async fn test_delete_treats_missing_as_deleted() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/uploads/gone.txt"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/uploads/locked.txt"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let a = adapter(&server.uri());
        assert!(a.delete("gone.txt").await);
        assert!(!a.delete("locked.txt").await);
    }

    #[tokio::test]
    async fn test_download() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/uploads/a.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"hello".to_vec()))
            .mount(&server)
            .await;

        let a = adapter(&server.uri());
        assert_eq!(a.download("a.txt").await.unwrap(), Bytes::from_static(b"hello"));
        assert!(a.download("missing.txt").await.is_err());
    }

    #[tokio::test]
    async fn test_ensure_bucket_owned_by_us() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/uploads"))
            .and(header("x-amz-acl", "public-read"))
            .respond_with(ResponseTemplate::new(409).set_body_string(
                "<Error><Code>BucketAlreadyOwnedByYou</Code></Error>",
            ))
            .expect(1)
            .mount(&server)
            .await;

        adapter(&server.uri()).ensure_bucket().await.unwrap();
    }

    #[tokio::test]
    async fn test_ensure_bucket_owned_by_someone_else() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/uploads"))
            .respond_with(
                ResponseTemplate::new(409)
                    .set_body_string("<Error><Code>BucketAlreadyExists</Code></Error>"),
            )
            .mount(&server)
            .await;

        let err = adapter(&server.uri()).ensure_bucket().await.unwrap_err();
        assert!(err.to_string().contains("BucketAlreadyExists"));
    }

    #[tokio::test]
    async fn test_ensure_bucket_sends_location_constraint() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/uploads"))
            .and(body_string_contains(
                "<LocationConstraint>eu-west-1</LocationConstraint>",
            ))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let mut a = adapter(&server.uri());
        a.config.region = "eu-west-1".to_string();
        a.ensure_bucket().await.unwrap();
    }

    #[test]
    fn test_create_bucket_body() {
        assert_eq!(create_bucket_body("us-east-1"), "");
        assert!(create_bucket_body("ap-south-1")
            .ends_with("<LocationConstraint>ap-south-1</LocationConstraint></CreateBucketConfiguration>"));
    }
}
