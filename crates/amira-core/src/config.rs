use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{AmiraError, AmiraResult};

/// Top-level client configuration (loaded from amira.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AmiraConfig {
    pub storage: StorageConfig,
    pub crypto: CryptoConfig,
    pub upload: UploadConfig,
    pub audio: AudioConfig,
    pub log: LogConfig,
}

impl AmiraConfig {
    /// Load configuration from a TOML file, falling back to defaults when the
    /// file does not exist. Reporting the fallback is left to the caller,
    /// which has logging set up by then.
    pub fn load(path: &Path) -> AmiraResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
            .map_err(|e| AmiraError::Config(format!("parsing {}: {e}", path.display())))
    }

    pub fn parse(content: &str) -> AmiraResult<Self> {
        toml::from_str(content).map_err(|e| AmiraError::Config(e.to_string()))
    }
}

/// Local durable storage layout
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root data directory (default: ~/.local/share/amira)
    pub data_dir: PathBuf,
    /// Encrypted blob directory, relative to data_dir unless absolute
    pub blob_dir: PathBuf,
    /// Journal index JSON file, relative to data_dir unless absolute
    pub journal_index: PathBuf,
    /// User key material (salt + KDF params), relative to data_dir unless absolute
    pub key_material: PathBuf,
}

impl StorageConfig {
    fn resolve(&self, p: &Path) -> PathBuf {
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.data_dir.join(p)
        }
    }

    pub fn blob_dir_path(&self) -> PathBuf {
        self.resolve(&self.blob_dir)
    }

    pub fn journal_index_path(&self) -> PathBuf {
        self.resolve(&self.journal_index)
    }

    pub fn key_material_path(&self) -> PathBuf {
        self.resolve(&self.key_material)
    }
}

/// Master-key session policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// Clear the cached master key after this many idle seconds (default: 900)
    pub session_timeout_secs: u64,
    /// Clear the cached master key if the app stays backgrounded longer than this (default: 60)
    pub background_grace_secs: u64,
    /// Cache the master key in the platform keychain between runs
    pub use_keychain: bool,
}

impl CryptoConfig {
    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }

    pub fn background_grace(&self) -> Duration {
        Duration::from_secs(self.background_grace_secs)
    }
}

/// Remote blob store + upload retry policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// S3-compatible endpoint for encrypted blobs
    pub endpoint: String,
    /// S3 region (default: us-east-1)
    pub region: String,
    /// Bucket name
    pub bucket: String,
    /// Key prefix inside the bucket
    pub prefix: String,
    /// Refuse plaintext HTTP endpoints
    pub enforce_tls: bool,
    /// First retry delay in milliseconds (default: 2000)
    pub backoff_base_ms: u64,
    /// Maximum retry delay in seconds (default: 300)
    pub backoff_cap_secs: u64,
    /// Attempts per recording per pass before it is left queued (default: 5)
    pub max_attempts_per_pass: u32,
    /// Concurrent uploads (default: 2)
    pub concurrency: usize,
}

impl UploadConfig {
    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_cap(&self) -> Duration {
        Duration::from_secs(self.backoff_cap_secs)
    }
}

/// Capture format of raw PCM audio
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("~/.local/share/amira"),
            blob_dir: PathBuf::from("blobs"),
            journal_index: PathBuf::from("journal.json"),
            key_material: PathBuf::from("key_material.json"),
        }
    }
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            session_timeout_secs: 900,
            background_grace_secs: 60,
            use_keychain: false,
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:9000".into(),
            region: "us-east-1".into(),
            bucket: "amira-journals".into(),
            prefix: "recordings".into(),
            enforce_tls: false,
            backoff_base_ms: 2000,
            backoff_cap_secs: 300,
            max_attempts_per_pass: 5,
            concurrency: 2,
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            channels: 1,
            bits_per_sample: 16,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
[storage]
data_dir = "/var/lib/amira"
blob_dir = "/mnt/secure/blobs"

[crypto]
session_timeout_secs = 300
background_grace_secs = 10
use_keychain = true

[upload]
endpoint = "https://s3.example.com"
bucket = "journals"
enforce_tls = true
backoff_base_ms = 500
max_attempts_per_pass = 8
concurrency = 4

[audio]
sample_rate = 48000
channels = 2

[log]
level = "debug"
format = "json"
"#;
        let config = AmiraConfig::parse(toml_str).unwrap();

        assert_eq!(config.storage.data_dir, PathBuf::from("/var/lib/amira"));
        assert_eq!(
            config.storage.blob_dir_path(),
            PathBuf::from("/mnt/secure/blobs")
        );
        assert_eq!(
            config.storage.journal_index_path(),
            PathBuf::from("/var/lib/amira/journal.json")
        );
        assert!(config.crypto.use_keychain);
        assert_eq!(config.crypto.session_timeout(), Duration::from_secs(300));
        assert!(config.upload.enforce_tls);
        assert_eq!(config.upload.backoff_base(), Duration::from_millis(500));
        assert_eq!(config.upload.max_attempts_per_pass, 8);
        assert_eq!(config.audio.sample_rate, 48000);
        assert_eq!(config.audio.bits_per_sample, 16);
        assert_eq!(config.log.format, "json");
    }

    #[test]
    fn test_parse_defaults() {
        let config = AmiraConfig::parse("").unwrap();

        assert_eq!(config.upload.backoff_base(), Duration::from_secs(2));
        assert_eq!(config.upload.backoff_cap(), Duration::from_secs(300));
        assert_eq!(config.crypto.background_grace_secs, 60);
        assert!(!config.crypto.use_keychain);
        assert_eq!(config.audio.sample_rate, 44_100);
        assert_eq!(config.log.level, "info");
    }

    #[test]
    fn test_parse_invalid_config() {
        let result = AmiraConfig::parse("[upload]\nconcurrency = \"many\"\n");
        assert!(matches!(result, Err(AmiraError::Config(_))));
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AmiraConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.upload.bucket, "amira-journals");
    }

    #[test]
    fn test_load_reads_file_and_reports_errors() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("amira.toml");
        std::fs::write(&good, "[upload]\nbucket = \"elsewhere\"\n").unwrap();
        assert_eq!(AmiraConfig::load(&good).unwrap().upload.bucket, "elsewhere");

        let bad = dir.path().join("broken.toml");
        std::fs::write(&bad, "[upload\n").unwrap();
        assert!(matches!(AmiraConfig::load(&bad), Err(AmiraError::Config(_))));

        // a directory where the file should be is an I/O error, not a silent default
        let not_a_file = dir.path().join("as-dir.toml");
        std::fs::create_dir(&not_a_file).unwrap();
        assert!(matches!(AmiraConfig::load(&not_a_file), Err(AmiraError::Io(_))));
    }

    #[test]
    fn test_serialize_roundtrip() {
        let config = AmiraConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed = AmiraConfig::parse(&toml_str).unwrap();

        assert_eq!(config.storage.data_dir, parsed.storage.data_dir);
        assert_eq!(config.upload.endpoint, parsed.upload.endpoint);
    }
}
