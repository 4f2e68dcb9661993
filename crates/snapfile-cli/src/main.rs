//! snapfile: command-line client for snapfile folders
//!
//! Commands:
//!   signup [--age SECS]           - create a folder and log in to it
//!   login                         - log in to an existing folder
//!   logout                        - end the session and forget the identity
//!   chat                          - live message list; stdin lines are sent
//!   upload <file>...              - encrypt and upload files
//!   download <id> <name> [--dest] - download and decrypt a file
//!   config show                   - display current configuration

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use secrecy::{ExposeSecret, SecretString};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncBufReadExt;
use tokio_util::sync::CancellationToken;

use snapfile_core::config::{expand_tilde, SnapfileConfig};
use snapfile_core::types::format_size;
use snapfile_core::{IdentityStore, Session, SnapfileError, StoredIdentity};
use snapfile_sync::{Backoff, ConnState, SyncClient, SyncCommand, SyncEvent, SyncExit, WsConnector};
use snapfile_transfer::{ApiClient, ProgressFn, TransferOrchestrator};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "snapfile",
    version,
    about = "End-to-end encrypted messages and files between your devices"
)]
struct Cli {
    /// Path to snapfile.toml configuration file
    #[arg(
        long,
        short = 'c',
        env = "SNAPFILE_CONFIG",
        default_value = "~/.config/snapfile/snapfile.toml"
    )]
    config: PathBuf,

    /// Server base URL (overrides config)
    #[arg(long, env = "SNAPFILE_SERVER")]
    server: Option<String>,

    /// Identity file (overrides config)
    #[arg(long, env = "SNAPFILE_IDENTITY")]
    identity: Option<PathBuf>,

    /// Log level or filter directive (overrides config)
    #[arg(long, env = "SNAPFILE_LOG")]
    log: Option<String>,

    /// Log output format (overrides config)
    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a new folder and log in to it
    Signup {
        /// Folder lifetime in seconds (server default if omitted)
        #[arg(long)]
        age: Option<u64>,
    },

    /// Log in to an existing folder
    Login,

    /// End the session and forget the stored identity
    Logout,

    /// Follow the folder's message list; each line typed on stdin is sent
    ///
    /// `/reconnect` forces a new connection, `/quit` (or EOF) leaves.
    Chat,

    /// Encrypt and upload one or more files
    Upload {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Download and decrypt a file by id
    Download {
        file_id: String,
        /// File name as listed in the folder
        name: String,
        /// Destination directory (default: transfer.download_dir)
        #[arg(long, short = 'd')]
        dest: Option<PathBuf>,
    },

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

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = expand_tilde(&cli.config);
    let (mut config, from_file) = load_config(&config_path).await?;

    let level = cli.log.clone().unwrap_or_else(|| config.log.level.clone());
    let format = cli.log_format.unwrap_or(match config.log.format.as_str() {
        "json" => LogFormat::Json,
        _ => LogFormat::Text,
    });
    init_logging(&level, format);
    if !from_file {
        tracing::warn!(
            "config file not found: {}  (using defaults)",
            config_path.display()
        );
    }

    if let Some(server) = cli.server {
        config.server.url = server;
    }
    if let Some(identity) = cli.identity {
        config.session.identity_file = identity;
    }
    config.validate().context("invalid configuration")?;

    let store = IdentityStore::new(expand_tilde(&config.session.identity_file));

    match cli.command {
        Commands::Signup { age } => cmd_signup(&config, &store, age).await,
        Commands::Login => cmd_login(&config, &store).await,
        Commands::Logout => cmd_logout(&config, &store).await,
        Commands::Chat => cmd_chat(&config, &store).await,
        Commands::Upload { files } => cmd_upload(&config, &store, &files).await,
        Commands::Download {
            file_id,
            name,
            dest,
        } => cmd_download(&config, &store, &file_id, &name, dest.as_deref()).await,
        Commands::Config {
            action: ConfigAction::Show,
        } => cmd_config_show(&config, &config_path, from_file),
    }
}

// ── Config + logging ──────────────────────────────────────────────────────────

/// Returns the config and whether it came from a file.
async fn load_config(path: &Path) -> Result<(SnapfileConfig, bool)> {
    if path.exists() {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading config: {}", path.display()))?;
        let config = toml::from_str(&content)
            .with_context(|| format!("parsing config: {}", path.display()))?;
        Ok((config, true))
    } else {
        Ok((SnapfileConfig::default(), false))
    }
}

fn init_logging(level: &str, format: LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    let layer = fmt::layer().with_writer(std::io::stderr);

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(layer.json())
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(layer)
                .init();
        }
    }
}

// ── Session helpers ───────────────────────────────────────────────────────────

fn prompt_passcode() -> Result<SecretString> {
    let passcode = rpassword::prompt_password("Folder passcode: ").context("reading passcode")?;
    anyhow::ensure!(!passcode.is_empty(), "passcode must not be empty");
    Ok(SecretString::from(passcode))
}

/// PBKDF2 is deliberately slow, so it runs off the async workers.
async fn derive_session_key(
    config: &SnapfileConfig,
    identity: &SecretString,
) -> Result<Arc<snapfile_crypto::SessionKey>> {
    let passcode = SecretString::from(identity.expose_secret().to_string());
    let params = config.crypto.kdf_params();
    let spinner = make_spinner("key");
    spinner.set_message("deriving encryption key...");
    let key = tokio::task::spawn_blocking(move || snapfile_crypto::derive_key(&passcode, &params))
        .await
        .context("key derivation task")?
        .map_err(SnapfileError::from)?;
    spinner.finish_and_clear();
    Ok(Arc::new(key))
}

/// Rebuild the session from the identity file.
async fn open_session(config: &SnapfileConfig, store: &IdentityStore) -> Result<Session> {
    let stored = store
        .load()?
        .context("not logged in (run `snapfile login` or `snapfile signup` first)")?;
    let identity = SecretString::from(stored.identity.clone());
    let key = derive_session_key(config, &identity).await?;
    Ok(Session::new(&config.server.url, identity, key).with_cookie(stored.cookie.clone()))
}

fn orchestrator(config: &SnapfileConfig, session: &Session) -> Result<TransferOrchestrator> {
    let api = ApiClient::for_session(session)?;
    Ok(
        TransferOrchestrator::new(api, session.key(), config.crypto.chunk_codec()?)
            .with_read_buffer_size(config.transfer.read_buffer_size),
    )
}

fn save_identity(store: &IdentityStore, identity: &SecretString, api: &ApiClient) -> Result<()> {
    store.save(&StoredIdentity {
        identity: identity.expose_secret().to_string(),
        cookie: api.cookie().map(str::to_string),
    })?;
    Ok(())
}

/// Cancel `token` on the first Ctrl-C.
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\ninterrupted, cancelling...");
            token.cancel();
        }
    });
}

// ── Progress bar helpers ──────────────────────────────────────────────────────

fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "{prefix:.bold} [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("=>-")
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

/// One bar shared by every file of a transfer; the message shows the current file.
fn make_transfer_progress(prefix: &str) -> (ProgressBar, ProgressFn) {
    let pb = ProgressBar::new(0);
    pb.set_style(bar_style());
    pb.set_prefix(prefix.to_string());

    let current = Mutex::new(String::new());
    let pb_clone = pb.clone();
    let progress: ProgressFn = Arc::new(move |done, total, name| {
        if let Ok(mut current) = current.lock() {
            if current.as_str() != name {
                *current = name.to_string();
                pb_clone.reset();
                pb_clone.set_message(name.to_string());
            }
        }
        pb_clone.set_length(total);
        pb_clone.set_position(done);
    });
    (pb, progress)
}

// ── `snapfile signup` / `login` / `logout` ───────────────────────────────────

async fn cmd_signup(config: &SnapfileConfig, store: &IdentityStore, age: Option<u64>) -> Result<()> {
    let identity = prompt_passcode()?;
    let mut api = ApiClient::new(&config.server.url)?;
    api.signup(&identity, age)
        .await
        .with_context(|| format!("creating folder on {}", config.server.url))?;
    save_identity(store, &identity, &api)?;
    println!("Folder created on {}", config.server.url);
    println!("  identity: {}", store.path().display());
    Ok(())
}

async fn cmd_login(config: &SnapfileConfig, store: &IdentityStore) -> Result<()> {
    let identity = prompt_passcode()?;
    let mut api = ApiClient::new(&config.server.url)?;
    match api.login(&identity).await {
        Ok(()) => {}
        Err(SnapfileError::Unauthorized) => {
            anyhow::bail!("login refused: unknown or expired folder")
        }
        Err(e) => return Err(e).with_context(|| format!("logging in to {}", config.server.url)),
    }
    save_identity(store, &identity, &api)?;
    println!("Logged in to {}", config.server.url);
    Ok(())
}

async fn cmd_logout(config: &SnapfileConfig, store: &IdentityStore) -> Result<()> {
    let Some(stored) = store.load()? else {
        println!("Not logged in");
        return Ok(());
    };
    let mut api = ApiClient::new(&config.server.url)?.with_cookie(stored.cookie.clone());
    if let Err(e) = api.logout().await {
        tracing::warn!(error = %e, "server logout failed; forgetting the local identity anyway");
    }
    store.clear()?;
    println!("Logged out");
    Ok(())
}

// ── `snapfile chat` ───────────────────────────────────────────────────────────

async fn cmd_chat(config: &SnapfileConfig, store: &IdentityStore) -> Result<()> {
    let session = open_session(config, store).await?;
    let connector = WsConnector::for_session(&session)?;
    let backoff = Backoff::new(config.sync.backoff_base(), config.sync.backoff_ceiling());
    let (client, handle) = SyncClient::new(connector, session.key(), backoff);
    let task = tokio::spawn(client.run());
    let (commands, mut events) = handle.into_parts();

    tracing::info!(server = %session.server_url(), "starting chat");
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("reading stdin")? else { break };
                let command = match line.trim() {
                    "" => continue,
                    "/quit" => break,
                    "/reconnect" => SyncCommand::Reconnect,
                    _ => SyncCommand::Send(line),
                };
                if commands.send(command).await.is_err() {
                    break;
                }
            }
            event = events.recv() => match event {
                Some(event) => print_event(&event),
                None => break,
            },
            _ = &mut ctrl_c => break,
        }
    }

    drop(commands);
    drop(events);
    match task.await.context("sync task")? {
        SyncExit::Shutdown => {}
        SyncExit::Fatal(reason) => {
            store.clear()?;
            anyhow::bail!("session ended: {reason} (run `snapfile login` again)");
        }
        // the saved identity is still good, only the settings are wrong
        SyncExit::Misconfigured(reason) => anyhow::bail!("cannot connect: {reason}"),
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stream {
    Stdout,
    Stderr,
}

/// Chat content goes to stdout, status lines to stderr.
fn format_event(event: &SyncEvent) -> (Stream, String) {
    match event {
        SyncEvent::State(ConnState::Connected) => {
            (Stream::Stderr, "* connected (type /quit to leave)".into())
        }
        SyncEvent::State(state) => (Stream::Stderr, format!("* {state}")),
        SyncEvent::Session(info) => (Stream::Stdout, info.to_string()),
        SyncEvent::Message(msg) => (Stream::Stdout, msg.to_string()),
        SyncEvent::SendFailed(e) => (Stream::Stderr, format!("! message not sent: {e}")),
        SyncEvent::ReauthRequired(reason) => (Stream::Stderr, format!("! {reason}")),
    }
}

fn print_event(event: &SyncEvent) {
    match format_event(event) {
        (Stream::Stdout, line) => println!("{line}"),
        (Stream::Stderr, line) => eprintln!("{line}"),
    }
}

// ── `snapfile upload` ─────────────────────────────────────────────────────────

async fn cmd_upload(config: &SnapfileConfig, store: &IdentityStore, files: &[PathBuf]) -> Result<()> {
    let session = open_session(config, store).await?;
    let orch = orchestrator(config, &session)?;
    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let (pb, progress) = make_transfer_progress("upload");
    let outcomes = orch.upload_batch(files, Some(&progress), &cancel).await;
    pb.finish_and_clear();

    let mut failed = 0;
    for outcome in &outcomes {
        match &outcome.result {
            Ok(r) => println!("  ok     {} ({})", r.name, format_size(r.bytes)),
            Err(e) => {
                failed += 1;
                println!("  failed {}: {}", outcome.path.display(), describe(e));
            }
        }
    }
    anyhow::ensure!(failed == 0, "{failed} of {} uploads failed", outcomes.len());
    Ok(())
}

fn describe(e: &SnapfileError) -> String {
    match e {
        SnapfileError::QuotaExceeded => "folder storage limit reached".into(),
        SnapfileError::PayloadTooLarge => "file too large for the server".into(),
        SnapfileError::Unauthorized => "session expired (run `snapfile login`)".into(),
        other => other.to_string(),
    }
}

// ── `snapfile download` ───────────────────────────────────────────────────────

async fn cmd_download(
    config: &SnapfileConfig,
    store: &IdentityStore,
    file_id: &str,
    name: &str,
    dest: Option<&Path>,
) -> Result<()> {
    let session = open_session(config, store).await?;
    let orch = orchestrator(config, &session)?;
    let dest = dest
        .map(Path::to_path_buf)
        .unwrap_or_else(|| expand_tilde(&config.transfer.download_dir));
    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let (pb, progress) = make_transfer_progress("download");
    let result = orch
        .download_file(file_id, name, &dest, Some(&progress), &cancel)
        .await;
    pb.finish_and_clear();

    match result {
        Ok(r) => {
            println!("Downloaded {} ({})", r.local_path.display(), format_size(r.bytes));
            Ok(())
        }
        Err(e) if e.is_decryption_failure() => {
            anyhow::bail!("could not decrypt {name}: wrong passcode or corrupted file")
        }
        Err(e) => Err(anyhow::Error::new(e).context(format!("downloading {name}"))),
    }
}

// ── `snapfile config show` ────────────────────────────────────────────────────

fn cmd_config_show(config: &SnapfileConfig, config_path: &Path, from_file: bool) -> Result<()> {
    if from_file {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}
