use std::path::PathBuf;
use std::time::Duration;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum RefgenError {
    #[error("no genome config given: pass --genome-config or set $REFGENIE")]
    MissingConfig,

    #[error("failed to read genome config at {0}")]
    ConfigRead(PathBuf),

    #[error("genome config is missing required key: {0}")]
    MissingConfigData(String),

    #[error("{0}")]
    IncompatibleSchemaVersion(String),

    #[error("timed out after {waited:?} waiting for lock on {path}")]
    LockTimeout { path: PathBuf, waited: Duration },

    #[error("genome config structure is malformed: {0}")]
    MalformedRegistryStructure(String),

    #[error("your genomes do not include '{0}'")]
    MissingCollection(String),

    #[error("genome '{collection}' exists, but asset '{asset}' is missing")]
    MissingAsset { collection: String, asset: String },

    #[error("genome/asset bundle '{collection}/{asset}' exists, but tag '{tag}' is missing")]
    MissingTag {
        collection: String,
        asset: String,
        tag: String,
    },

    #[error("{0}")]
    MissingSeekKey(String),

    #[error("{0}")]
    AssetPathMissing(String),

    #[error("invalid insert data: {0}")]
    InvalidInsertData(String),

    #[error("invalid asset reference (expected asset:tag): {0}")]
    InvalidAssetReference(String),

    #[error("invalid registry path (expected genome/asset.seek_key:tag): {0}")]
    InvalidRegistryPath(String),

    #[error("genome folder contains unbound environment variables: {0}")]
    UnboundEnvironmentVariable(String),

    #[error("failed to fetch metadata from {url}: {message}")]
    RemoteMetadataFetchFailed { url: String, message: String },

    #[error("digest mismatch for {subject} (local: {local}; remote: {remote})")]
    DigestMismatch {
        subject: String,
        local: String,
        remote: String,
    },

    #[error("archive not found on server: {0}")]
    ArchiveNotFound(String),

    #[error("server refused download: {0}")]
    ConnectionRefused(String),

    #[error("download incomplete: {0}")]
    TruncatedDownload(String),

    #[error("catalog request failed: {0}")]
    CatalogHttp(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

impl RefgenError {
    pub fn missing_asset(collection: &str, asset: &str) -> Self {
        RefgenError::MissingAsset {
            collection: collection.to_string(),
            asset: asset.to_string(),
        }
    }

    pub fn missing_tag(collection: &str, asset: &str, tag: &str) -> Self {
        RefgenError::MissingTag {
            collection: collection.to_string(),
            asset: asset.to_string(),
            tag: tag.to_string(),
        }
    }
}
