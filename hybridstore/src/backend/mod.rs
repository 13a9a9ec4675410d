pub mod drive;
pub mod object_store;

use std::time::Duration;

use anyhow::Context;
use reqwest::Client;

pub use self::drive::{DriveAdapter, DriveClient, DriveError, DriveFile};
pub use self::object_store::ObjectStoreAdapter;

/// Build the HTTP client shared by every adapter.
///
/// Created once at startup and cloned into the adapters; reqwest clients
/// share their connection pool across clones.
pub fn build_http_client(timeout_secs: u64) -> anyhow::Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .context("Failed to build HTTP client")
}
