//! Remote recordings bucket: an OpenDAL operator rooted at `upload.prefix`,
//! and the object layout recordings use inside it.
//!
//! Layout under the root: `journals/{id}.blob` (the AMRB container, exactly
//! as stored locally) and `journals/{id}.json` (the non-sensitive
//! `JournalRecord`).

use anyhow::{Context, Result};
use opendal::Operator;
use secrecy::{ExposeSecret, SecretString};

use amira_core::config::UploadConfig;

use crate::blob_store::validate_blob_id;
use crate::error::StorageResult;

const JOURNALS_DIR: &str = "journals/";

/// S3 credentials for the recordings bucket
pub struct RemoteCredentials {
    pub access_key_id: String,
    pub secret_access_key: SecretString,
}

/// Operator root for a bucket prefix: `recordings` and `/recordings/` both
/// become `/recordings/`; an empty prefix is the bucket root.
pub fn remote_root(prefix: &str) -> String {
    let trimmed = prefix.trim_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        format!("/{trimmed}/")
    }
}

/// Object key of a recording's container, relative to the remote root.
pub fn blob_object(id: &str) -> StorageResult<String> {
    validate_blob_id(id)?;
    Ok(format!("{JOURNALS_DIR}{id}.blob"))
}

/// Object key of a recording's `JournalRecord`, relative to the remote root.
pub fn record_object(id: &str) -> StorageResult<String> {
    validate_blob_id(id)?;
    Ok(format!("{JOURNALS_DIR}{id}.json"))
}

/// Apply `upload.enforce_tls` to the endpoint.
///
/// Blobs are ciphertext either way, but S3 request signing and record
/// metadata still cross the wire, so plaintext HTTP is an error when TLS is
/// enforced and a warning otherwise.
pub fn check_endpoint(upload: &UploadConfig) -> Result<()> {
    if !upload.endpoint.starts_with("http://") {
        return Ok(());
    }
    if upload.enforce_tls {
        anyhow::bail!(
            "upload endpoint uses plaintext HTTP ({}), but enforce_tls is enabled. \
             Use an HTTPS endpoint or set upload.enforce_tls = false for local development.",
            upload.endpoint
        );
    }
    tracing::warn!(
        endpoint = %upload.endpoint,
        "upload endpoint uses plaintext HTTP; set upload.enforce_tls = true and use HTTPS in production"
    );
    Ok(())
}

/// Open the recordings bucket described by `upload`, rooted at its prefix.
pub fn open_remote(upload: &UploadConfig, creds: &RemoteCredentials) -> Result<Operator> {
    check_endpoint(upload)?;

    let root = remote_root(&upload.prefix);
    let builder = opendal::services::S3::default()
        .endpoint(&upload.endpoint)
        .region(&upload.region)
        .bucket(&upload.bucket)
        .root(&root)
        .access_key_id(&creds.access_key_id)
        .secret_access_key(creds.secret_access_key.expose_secret());

    // no RetryLayer: the upload queue owns attempts and backoff
    let op = Operator::new(builder)
        .with_context(|| format!("opening recordings bucket {}{root}", upload.bucket))?
        .layer(opendal::layers::LoggingLayer::default())
        .finish();
    Ok(op)
}

/// In-memory bucket with the same rooting as `open_remote`.
pub fn memory_remote(prefix: &str) -> Result<Operator> {
    let builder = opendal::services::Memory::default().root(&remote_root(prefix));
    Ok(Operator::new(builder)
        .context("opening in-memory remote")?
        .finish())
}

/// Verify the bucket is reachable by listing the journals directory.
pub async fn check_health(op: &Operator) -> Result<()> {
    op.list(JOURNALS_DIR)
        .await
        .map(|_| ())
        .context("remote store health check failed")
}
