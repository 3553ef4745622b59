//! amira: voice journal vault CLI
//!
//! Commands:
//!   init                         - create key material for a new vault
//!   record <pcm>                 - encrypt a raw PCM recording into the vault
//!   list                         - show journal entries and their upload state
//!   play <id> <out>              - decrypt a recording to a raw PCM file
//!   delete <id>                  - erase a recording locally (and remotely on next sync)
//!   sync                         - upload queued recordings to the remote store
//!   export <out> [ids...]        - write a password-protected export package
//!   import <pkg>                 - import recordings from an export package
//!   rotate                       - change the passphrase and re-wrap every recording key
//!   config show                  - display the active configuration

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use secrecy::{ExposeSecret, SecretString};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use zeroize::Zeroizing;

use amira_core::config::AmiraConfig;
use amira_core::types::{CheckinContext, EmotionalCheckin, JournalRecord};
use amira_crypto::{
    export_package, import_package, CryptoError, ExportPackage, KdfParams, KeyManager,
    UserKeyMaterial,
};
use amira_lifecycle::{
    change_passphrase, open_recording, AudioDevice, AudioFormat, CaptureLease, JournalIndex,
    LifecycleError, LifecycleEvent, OpendalUploader, RecordingController, RecordingMetadata,
    RecordingState, ResourceError, UploadQueue,
};
use amira_storage::{KeyringStore, LocalBlobStore, RemoteCredentials};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "amira",
    version,
    about = "Amira voice journal vault",
    long_about = "amira: record, encrypt, sync, and export voice journals. \
                  Audio is encrypted on this device; only ciphertext is stored or uploaded."
)]
struct Cli {
    /// Path to amira.toml configuration file
    #[arg(
        long,
        short = 'c',
        env = "AMIRA_CONFIG",
        default_value = "~/.config/amira/amira.toml"
    )]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides [log] level
    #[arg(long, env = "AMIRA_LOG")]
    log: Option<String>,

    /// Log format (json, text); overrides [log] format
    #[arg(long, env = "AMIRA_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create key material (salt + key check) for a new vault
    ///
    /// The passphrase is read from AMIRA_PASSPHRASE or prompted twice.
    Init {
        /// User identifier recorded in the key material
        #[arg(long, env = "USER", default_value = "local")]
        user: String,
    },

    /// Encrypt a raw PCM recording (format from [audio]) into the vault
    Record {
        /// Raw PCM input file
        input: PathBuf,
        #[arg(long, short = 't')]
        title: Option<String>,
        /// Check-in before journaling, e.g. joy:4
        #[arg(long)]
        pre: Option<String>,
        /// Check-in after journaling, e.g. calm:7
        #[arg(long)]
        post: Option<String>,
    },

    /// List journal entries
    List {
        /// Print entries as JSON
        #[arg(long)]
        json: bool,
    },

    /// Decrypt a recording to a raw PCM file
    Play {
        id: String,
        out: PathBuf,
    },

    /// Securely erase a recording; its remote copy is removed on the next sync
    Delete {
        id: String,
    },

    /// Upload queued recordings and apply pending remote deletes
    ///
    /// Credentials are read from AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY.
    Sync,

    /// Write a password-protected export package
    ///
    /// The export password is read from AMIRA_EXPORT_PASSPHRASE or prompted twice.
    Export {
        out: PathBuf,
        /// Recordings to include (default: all)
        ids: Vec<String>,
    },

    /// Import recordings from an export package
    Import {
        package: PathBuf,
    },

    /// Change the vault passphrase and re-wrap every recording key
    ///
    /// Audio ciphertext is untouched. Interrupted rotations resume when run again.
    Rotate,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = expand_tilde(&cli.config);
    let config = AmiraConfig::load(&config_path)
        .with_context(|| format!("loading config: {}", config_path.display()))?;

    let level = cli.log.clone().unwrap_or_else(|| config.log.level.clone());
    let format = cli.log_format.clone().unwrap_or(match config.log.format.as_str() {
        "json" => LogFormat::Json,
        _ => LogFormat::Text,
    });
    init_logging(&level, &format);

    if !config_path.exists() {
        warn!("config file not found: {}  (using defaults)", config_path.display());
    }

    match cli.command {
        Commands::Init { user } => cmd_init(&config, &user).await,
        Commands::Record { input, title, pre, post } => {
            cmd_record(&config, &input, title, pre.as_deref(), post.as_deref()).await
        }
        Commands::List { json } => cmd_list(&config, json).await,
        Commands::Play { id, out } => cmd_play(&config, &id, &out).await,
        Commands::Delete { id } => cmd_delete(&config, &id).await,
        Commands::Sync => cmd_sync(&config).await,
        Commands::Export { out, ids } => cmd_export(&config, &out, &ids).await,
        Commands::Import { package } => cmd_import(&config, &package).await,
        Commands::Rotate => cmd_rotate(&config).await,
        Commands::Config { action: ConfigAction::Show } => cmd_config_show(&config, &config_path),
    }
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // stdout carries command output
    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

// ── Vault handles ─────────────────────────────────────────────────────────────

/// Local vault state shared by the commands.
struct Vault {
    material: UserKeyMaterial,
    material_path: PathBuf,
    keys: Arc<Mutex<KeyManager>>,
    store: LocalBlobStore,
    journal: Arc<Mutex<JournalIndex>>,
}

impl Vault {
    /// Open the blob store and journal index, repairing anything an unclean
    /// shutdown left behind. Does not unlock.
    async fn open(config: &AmiraConfig) -> Result<Self> {
        let material_path = expand_tilde(&config.storage.key_material_path());
        let material = amira_storage::load_key_material(&material_path)
            .with_context(|| format!("reading key material: {}", material_path.display()))?
            .with_context(|| {
                format!(
                    "no vault at {} (run `amira init` first)",
                    material_path.display()
                )
            })?;

        let blob_dir = expand_tilde(&config.storage.blob_dir_path());
        let store = LocalBlobStore::open(&blob_dir)
            .with_context(|| format!("opening blob store: {}", blob_dir.display()))?;

        let journal_path = expand_tilde(&config.storage.journal_index_path());
        let mut journal = JournalIndex::open(&journal_path)?;
        let recovered = journal.recover(&store).context("recovering journal index")?;
        for id in &recovered.failed {
            eprintln!("warning: recording {id} is damaged and cannot be uploaded");
        }

        Ok(Self {
            material,
            material_path,
            keys: Arc::new(Mutex::new(key_manager(config))),
            store,
            journal: Arc::new(Mutex::new(journal)),
        })
    }

    /// Unlock from the keychain cache if possible, otherwise from the passphrase.
    ///
    /// Refused while a passphrase change is unfinished: some recordings are
    /// already on the new key and only `amira rotate` can reconcile them.
    async fn unlock(&self) -> Result<()> {
        if self.material.rotation_pending() {
            anyhow::bail!(
                "a passphrase change was interrupted; run `amira rotate` with the same new passphrase to finish it"
            );
        }
        let mut keys = self.keys.lock().await;
        match keys.restore(&self.material) {
            Ok(true) => return Ok(()),
            Ok(false) => {}
            Err(e) => warn!("keychain unavailable, falling back to passphrase: {e}"),
        }

        let passphrase = read_secret("AMIRA_PASSPHRASE", "Passphrase: ")?;
        let pb = make_spinner("unlock");
        pb.set_message("deriving key...");
        let result = keys.unlock(&passphrase, &self.material);
        pb.finish_and_clear();
        result.context("unlocking vault")
    }

    fn upload_queue(&self, config: &AmiraConfig) -> UploadQueue {
        UploadQueue::new(self.journal.clone(), self.store.clone(), &config.upload)
    }
}

fn key_manager(config: &AmiraConfig) -> KeyManager {
    let keys = KeyManager::new(
        config.crypto.session_timeout(),
        config.crypto.background_grace(),
    );
    if config.crypto.use_keychain {
        let keychain = KeyringStore::new();
        if keychain.is_available() {
            return keys.with_key_store(Arc::new(keychain));
        }
        warn!("platform keychain not reachable; the passphrase is needed on every run");
    }
    keys
}

/// The input file stands in for the microphone.
struct PcmFileDevice {
    format: AudioFormat,
}

impl AudioDevice for PcmFileDevice {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn acquire(&self) -> Result<CaptureLease, ResourceError> {
        Ok(CaptureLease::new(|| {}))
    }
}

// ── Secrets and storage from the environment ──────────────────────────────────

fn read_secret(env: &str, prompt: &str) -> Result<SecretString> {
    if let Ok(value) = std::env::var(env) {
        return Ok(SecretString::from(value));
    }
    let value = rpassword::prompt_password(prompt).context("reading passphrase")?;
    Ok(SecretString::from(value))
}

/// Read a new secret, prompting twice unless it comes from the environment.
fn read_new_secret(env: &str, prompt: &str) -> Result<SecretString> {
    if let Ok(value) = std::env::var(env) {
        return Ok(SecretString::from(value));
    }
    let first = read_secret(env, prompt)?;
    let second = read_secret(env, "Repeat: ")?;
    if first.expose_secret() != second.expose_secret() {
        anyhow::bail!("passphrases do not match");
    }
    if first.expose_secret().is_empty() {
        anyhow::bail!("passphrase must not be empty");
    }
    Ok(first)
}

/// Open the recordings bucket using credentials from environment variables.
///
/// Reads AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY (standard S3 env vars).
fn open_remote_from_env(config: &AmiraConfig) -> Result<opendal::Operator> {
    let access_key_id = std::env::var("AWS_ACCESS_KEY_ID")
        .or_else(|_| std::env::var("AMIRA_ACCESS_KEY_ID"))
        .context(
            "S3 credentials not set\n\
             Set AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY environment variables.",
        )?;
    let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY")
        .or_else(|_| std::env::var("AMIRA_SECRET_ACCESS_KEY"))
        .context("AWS_SECRET_ACCESS_KEY environment variable not set")?;

    let creds = RemoteCredentials {
        access_key_id,
        secret_access_key: SecretString::from(secret_access_key),
    };
    amira_storage::open_remote(&config.upload, &creds).context("opening recordings bucket")
}

/// Expand `~` in path to the user's home directory
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    match s.strip_prefix("~/") {
        Some(rest) => {
            let home = std::env::var("HOME").unwrap_or_default();
            PathBuf::from(home).join(rest)
        }
        None => path.to_path_buf(),
    }
}

/// Cancel `token` on Ctrl-C.
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\ninterrupted, stopping...");
            token.cancel();
        }
    });
}

/// Mirror lifecycle events into a progress bar's message.
fn follow_events(mut events: broadcast::Receiver<LifecycleEvent>, pb: ProgressBar) {
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            pb.set_message(format!("{} {}", short_id(&event.recording_id), event.to));
        }
    });
}

// ── Progress bar helpers ──────────────────────────────────────────────────────

fn make_progress_bar(total: u64, prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::with_template("{prefix:.bold} [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-"),
    );
    pb.set_prefix(prefix.to_string());
    pb
}

fn make_spinner(prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{prefix:.bold} {spinner} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

// ── `amira init` ──────────────────────────────────────────────────────────────

async fn cmd_init(config: &AmiraConfig, user: &str) -> Result<()> {
    let material_path = expand_tilde(&config.storage.key_material_path());
    if amira_storage::load_key_material(&material_path)?.is_some() {
        anyhow::bail!("a vault already exists at {}", material_path.display());
    }

    let passphrase = read_new_secret("AMIRA_PASSPHRASE", "New passphrase: ")?;

    let pb = make_spinner("init");
    pb.set_message("deriving key (Argon2id, 64 MiB)...");
    let (material, _master) = UserKeyMaterial::create(user, &passphrase, KdfParams::V1)
        .context("creating key material")?;
    amira_storage::save_key_material(&material_path, &material)
        .with_context(|| format!("writing key material: {}", material_path.display()))?;

    let blob_dir = expand_tilde(&config.storage.blob_dir_path());
    LocalBlobStore::open(&blob_dir)
        .with_context(|| format!("creating blob store: {}", blob_dir.display()))?;
    pb.finish_and_clear();

    info!(user, "vault initialized");
    println!("Vault created:");
    println!("  key material: {}", material_path.display());
    println!("  blobs:        {}", blob_dir.display());
    println!();
    println!("The passphrase cannot be recovered. Without it, recordings cannot be decrypted.");
    Ok(())
}

// ── `amira record` ────────────────────────────────────────────────────────────

async fn cmd_record(
    config: &AmiraConfig,
    input: &Path,
    title: Option<String>,
    pre: Option<&str>,
    post: Option<&str>,
) -> Result<()> {
    let pre = pre
        .map(|s| EmotionalCheckin::parse(s, CheckinContext::PreJournaling))
        .transpose()
        .context("--pre")?;
    let post = post
        .map(|s| EmotionalCheckin::parse(s, CheckinContext::PostJournaling))
        .transpose()
        .context("--post")?;

    let vault = Vault::open(config).await?;
    vault.unlock().await?;

    let pcm = Zeroizing::new(
        tokio::fs::read(input)
            .await
            .with_context(|| format!("reading {}", input.display()))?,
    );
    if pcm.is_empty() {
        anyhow::bail!("{} is empty", input.display());
    }

    let format = AudioFormat::from(&config.audio);
    let mut controller = RecordingController::new(
        Arc::new(PcmFileDevice { format }),
        vault.keys.clone(),
        vault.store.clone(),
        vault.journal.clone(),
        vault.material.user_id.clone(),
    );

    let pb = make_progress_bar(pcm.len() as u64, "record");
    follow_events(controller.subscribe(), pb.clone());

    controller.start(title)?;
    if let Some(checkin) = pre {
        controller.set_pre_checkin(checkin)?;
    }
    let second = format.bytes_per_second().max(1) as usize;
    for chunk in pcm.chunks(second) {
        controller.write_samples(chunk)?;
        pb.inc(chunk.len() as u64);
    }
    controller.stop()?;
    if let Some(checkin) = post {
        controller.set_post_checkin(checkin)?;
    }

    if let Some(cancel) = controller.cancel_handle() {
        cancel_on_ctrl_c(cancel);
    }
    let record = controller.finalize().await.context("encrypting recording")?;
    pb.finish_with_message("queued for upload");

    println!();
    println!("Recorded:");
    println!("  id:        {}", record.id);
    println!("  duration:  {}s", record.duration_seconds);
    println!("  blob:      {}", record.storage_reference);
    println!("  uploaded:  no (run `amira sync`)");
    Ok(())
}

// ── `amira list` ──────────────────────────────────────────────────────────────

async fn cmd_list(config: &AmiraConfig, json: bool) -> Result<()> {
    let vault = Vault::open(config).await?;
    let journal = vault.journal.lock().await;
    let entries = journal.records();

    if json {
        let records: Vec<&JournalRecord> = entries.iter().map(|e| &e.record).collect();
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("No recordings.");
        return Ok(());
    }
    println!("{:<10} {:<18} {:>8}  {:<8}  title", "id", "state", "duration", "uploaded");
    for entry in entries {
        println!(
            "{:<10} {:<18} {:>7}s  {:<8}  {}",
            short_id(&entry.record.id),
            entry.state,
            entry.record.duration_seconds,
            if entry.record.is_uploaded { "yes" } else { "no" },
            entry.record.title.as_deref().unwrap_or("-"),
        );
        if let Some(err) = &entry.last_error {
            println!("           last error: {err}");
        }
    }
    Ok(())
}

// ── `amira play` ──────────────────────────────────────────────────────────────

async fn cmd_play(config: &AmiraConfig, id: &str, out: &Path) -> Result<()> {
    let vault = Vault::open(config).await?;
    let id = resolve_id(&vault, id).await?;
    vault.unlock().await?;

    let recording = open_recording(&vault.keys, &vault.store, &id)
        .await
        .with_context(|| format!("decrypting {id}"))?;
    tokio::fs::write(out, recording.audio.as_slice())
        .await
        .with_context(|| format!("writing {}", out.display()))?;

    println!("Decrypted {} → {}", short_id(&id), out.display());
    println!("  bytes:  {}", fmt_bytes(recording.audio.len() as u64));
    if let Some(meta) = &recording.metadata {
        print_metadata(meta);
    }
    Ok(())
}

fn print_metadata(meta: &RecordingMetadata) {
    println!(
        "  format: {} Hz, {} ch, {}-bit PCM",
        meta.format.sample_rate, meta.format.channels, meta.format.bits_per_sample
    );
    if let Some(pre) = &meta.pre_checkin {
        println!("  before: {} ({}/10)", pre.emotion, pre.intensity);
    }
    if let Some(post) = &meta.post_checkin {
        println!("  after:  {} ({}/10)", post.emotion, post.intensity);
    }
    if let Some(shift) = meta.shift() {
        println!(
            "  shift:  {} → {} ({:+})",
            shift.from, shift.to, shift.intensity_change
        );
    }
}

// ── `amira delete` ────────────────────────────────────────────────────────────

async fn cmd_delete(config: &AmiraConfig, id: &str) -> Result<()> {
    let vault = Vault::open(config).await?;
    let id = resolve_id(&vault, id).await?;
    vault.upload_queue(config).delete_recording(&id).await?;

    let remote_pending = vault
        .journal
        .lock()
        .await
        .get(&id)
        .is_some_and(|e| e.pending_remote_delete);
    println!("Deleted {}", short_id(&id));
    if remote_pending {
        println!("  remote copy will be removed on the next `amira sync`");
    }
    Ok(())
}

// ── `amira sync` ──────────────────────────────────────────────────────────────

async fn cmd_sync(config: &AmiraConfig) -> Result<()> {
    let vault = Vault::open(config).await?;
    let op = open_remote_from_env(config)?;
    amira_storage::check_health(&op)
        .await
        .with_context(|| format!("remote store unreachable: {}", config.upload.endpoint))?;

    let uploader = OpendalUploader::new(op);
    let (events, _) = broadcast::channel(64);
    let queue = vault.upload_queue(config).with_events(events.clone());

    let pb = make_spinner("sync");
    pb.set_message("uploading...");
    follow_events(events.subscribe(), pb.clone());

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());
    let report = queue.run_pass(&uploader, &cancel).await?;
    pb.finish_and_clear();

    println!("Sync {}:", if report.cancelled { "interrupted" } else { "complete" });
    println!("  uploaded:       {}", report.uploaded.len());
    println!("  still queued:   {}", report.still_queued.len());
    println!("  failed:         {}", report.failed.len());
    println!("  remote deletes: {}", report.remote_deleted.len());
    for id in &report.failed {
        println!("  damaged: {id}");
    }
    Ok(())
}

// ── `amira export` ────────────────────────────────────────────────────────────

async fn cmd_export(config: &AmiraConfig, out: &Path, ids: &[String]) -> Result<()> {
    let vault = Vault::open(config).await?;
    let ids = if ids.is_empty() {
        vault
            .journal
            .lock()
            .await
            .records()
            .iter()
            .filter(|e| e.state != RecordingState::Failed)
            .map(|e| e.record.id.clone())
            .collect()
    } else {
        let mut resolved = Vec::with_capacity(ids.len());
        for id in ids {
            resolved.push(resolve_id(&vault, id).await?);
        }
        resolved
    };
    if ids.is_empty() {
        anyhow::bail!("nothing to export");
    }

    vault.unlock().await?;
    let blobs = ids
        .iter()
        .map(|id| vault.store.get(id).with_context(|| format!("reading blob {id}")))
        .collect::<Result<Vec<_>>>()?;

    let password = read_new_secret("AMIRA_EXPORT_PASSPHRASE", "Export password: ")?;
    let pb = make_spinner("export");
    pb.set_message(format!("packaging {} recordings...", blobs.len()));
    let package = {
        let mut keys = vault.keys.lock().await;
        export_package(&blobs, &password, &mut keys, &KdfParams::V1)?
    };
    let bytes = package.to_bytes()?;
    amira_storage::write_atomic(out, &bytes)
        .with_context(|| format!("writing {}", out.display()))?;
    pb.finish_and_clear();

    println!("Exported {} recordings → {}", package.len(), out.display());
    println!("  size: {}", fmt_bytes(bytes.len() as u64));
    Ok(())
}

// ── `amira import` ────────────────────────────────────────────────────────────

async fn cmd_import(config: &AmiraConfig, path: &Path) -> Result<()> {
    let vault = Vault::open(config).await?;
    let data = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let package = ExportPackage::from_bytes(&data).context("parsing export package")?;

    vault.unlock().await?;
    let password = read_secret("AMIRA_EXPORT_PASSPHRASE", "Export password: ")?;

    let pb = make_spinner("import");
    pb.set_message(format!("verifying {} recordings...", package.len()));
    let mut keys = vault.keys.lock().await;
    let blobs = import_package(&package, &password, &mut keys).context("importing package")?;

    let mut journal = vault.journal.lock().await;
    let mut imported = 0usize;
    let mut skipped = 0usize;
    for blob in blobs {
        if journal.get(&blob.blob_id).is_some() {
            skipped += 1;
            continue;
        }
        let key = keys.unwrap_recording_key(&blob.wrapped_key)?;
        let metadata = blob
            .open_metadata(&key)?
            .map(|bytes| RecordingMetadata::from_bytes(&bytes))
            .transpose()?;
        let storage_reference = vault.store.put(&blob)?;

        let record = JournalRecord {
            id: blob.blob_id.clone(),
            user_id: vault.material.user_id.clone(),
            title: None,
            duration_seconds: metadata.map(|m| m.duration_seconds).unwrap_or(0),
            created_at: blob.created_at,
            is_favorite: false,
            is_uploaded: false,
            is_deleted: false,
            storage_reference,
        };
        journal.insert(record, RecordingState::PersistedLocal);
        journal.set_state(&blob.blob_id, RecordingState::QueuedForUpload)?;
        imported += 1;
    }
    journal.flush()?;
    pb.finish_and_clear();

    println!("Imported {imported} recordings ({skipped} already present)");
    Ok(())
}

// ── `amira rotate` ────────────────────────────────────────────────────────────

async fn cmd_rotate(config: &AmiraConfig) -> Result<()> {
    let vault = Vault::open(config).await?;

    // always ask for the current passphrase, even with a cached key
    let current = read_secret("AMIRA_PASSPHRASE", "Current passphrase: ")?;
    vault
        .keys
        .lock()
        .await
        .unlock(&current, &vault.material)
        .context("unlocking vault")?;

    if vault.material.rotation_pending() {
        println!("Resuming an interrupted passphrase change; enter the same new passphrase.");
    }
    let new = read_new_secret("AMIRA_NEW_PASSPHRASE", "New passphrase: ")?;
    let pb = make_spinner("rotate");
    pb.set_message("re-wrapping recording keys...");
    let result = change_passphrase(
        &vault.keys,
        &vault.store,
        &vault.material_path,
        &vault.material,
        &new,
    )
    .await;
    pb.finish_and_clear();

    let report = match result {
        Ok((_, report)) => report,
        Err(LifecycleError::Crypto(CryptoError::RotationMismatch)) => anyhow::bail!(
            "that is not the new passphrase the interrupted change was started with"
        ),
        Err(LifecycleError::RotationStranded(ids)) => {
            for id in &ids {
                eprintln!("  {} does not unwrap under either passphrase", short_id(id));
            }
            anyhow::bail!(
                "passphrase change left unfinished: restore or `amira delete` the recordings above, then rerun `amira rotate`"
            );
        }
        Err(e) => return Err(anyhow::Error::new(e).context("changing passphrase")),
    };
    let requeued = vault.upload_queue(config).requeue(&report.moved()).await?;

    println!("Passphrase changed:");
    println!("  re-wrapped:      {}", report.rewrapped.len());
    println!("  already rotated: {}", report.already_rotated.len());
    println!("  re-upload:       {requeued}");
    for (id, reason) in &report.skipped {
        println!("  skipped {}: {reason}", short_id(id));
    }
    Ok(())
}

// ── `amira config show` ───────────────────────────────────────────────────────

fn cmd_config_show(config: &AmiraConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}

// ── Utilities ─────────────────────────────────────────────────────────────────

fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

/// Accept a full id or a unique prefix of one (as printed by `list`).
async fn resolve_id(vault: &Vault, id: &str) -> Result<String> {
    let journal = vault.journal.lock().await;
    if journal.get(id).is_some() {
        return Ok(id.to_string());
    }
    let matches: Vec<String> = journal
        .records()
        .iter()
        .filter(|e| e.record.id.starts_with(id))
        .map(|e| e.record.id.clone())
        .collect();
    match matches.as_slice() {
        [one] => Ok(one.clone()),
        [] => anyhow::bail!("no recording matches {id:?}"),
        _ => anyhow::bail!("{id:?} is ambiguous ({} matches)", matches.len()),
    }
}

fn fmt_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
