mod config;
mod demo;
mod terminal_output;

use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use crossverify_config::{apply_all_defaults, write_config, IdentityConfig, VerificationConfig};
use crossverify_core::check_lazy_loading;
use tracing::info;

use config::{resolve_path, Settings, DEMO_DEVICE_ID, DEMO_USER_ID};
use terminal_output::{note_error, note_info, note_success, note_warn, render_pairs};

#[derive(Parser)]
#[command(name = "crossverify")]
#[command(about = "Interactive device verification with cross-signing key recovery")]
#[command(version)]
struct Cli {
    /// Config file (default: crossverify.yaml in $CROSSVERIFY_CONFIG_DIR or ~/.crossverify)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Verify this device against an in-memory second device of the same user
    Demo {
        /// Override the transaction timeout in seconds
        #[arg(long)]
        timeout_secs: Option<u64>,
    },
    /// Load, validate and summarise the config file
    CheckConfig {
        /// Lazy-loading setting the existing client store was written with
        #[arg(long)]
        stored_lazy_loading: Option<bool>,
    },
    /// Write a config file with defaults filled in
    InitConfig {
        #[arg(long, default_value = DEMO_USER_ID)]
        user_id: String,
        #[arg(long, default_value = DEMO_DEVICE_ID)]
        device_id: String,
        /// Overwrite an existing file (the old one is kept as a backup)
        #[arg(short, long)]
        force: bool,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Demo { timeout_secs } => {
            let settings = Settings::load(cli.config).await?;
            logging::init_logger(settings.config.log_dir(), settings.config.log_level());
            run_demo(settings, timeout_secs).await
        }
        Commands::CheckConfig {
            stored_lazy_loading,
        } => {
            logging::init_console_logger("warn");
            check_config(cli.config, stored_lazy_loading).await
        }
        Commands::InitConfig {
            user_id,
            device_id,
            force,
        } => {
            logging::init_console_logger("info");
            init_config(cli.config, user_id, device_id, force).await
        }
    }
}

async fn run_demo(settings: Settings, timeout_secs: Option<u64>) -> Result<()> {
    if !settings.report.is_valid() {
        bail!(
            "config at {} has {} error(s); run `crossverify check-config`",
            settings.path.display(),
            settings.report.errors.len()
        );
    }

    let mut options = settings.transaction_options();
    if let Some(secs) = timeout_secs {
        options.timeout = std::time::Duration::from_secs(secs);
    }
    let identity = settings.local_identity();
    info!(user_id = %identity.user_id, device_id = %identity.device_id, "Starting demo");

    let report = demo::run_demo(identity, options).await?;

    note_success("Loopback verification done");
    let cached: Vec<&str> = report.cached_keys.iter().map(|k| k.as_str()).collect();
    print!(
        "{}",
        render_pairs(&[
            ("transaction", report.txn_id.clone()),
            ("user", report.initiator.user_id.clone()),
            ("this device", report.initiator.device_id.clone()),
            ("other device", report.responder.device_id.clone()),
            ("we verified them", report.initiator_verified_peer.to_string()),
            ("they verified us", report.responder_verified_peer.to_string()),
            ("cached keys", cached.join(", ")),
        ])
    );
    if report.cached_keys.is_empty() && options.request_cross_signing_keys {
        note_warn("No cross-signing keys were cached; see the log for the key fetch outcome");
    }
    Ok(())
}

async fn check_config(path: Option<PathBuf>, stored_lazy_loading: Option<bool>) -> Result<()> {
    let settings = Settings::load(path).await?;
    note_info(&format!("Config: {}", settings.path.display()));

    for warning in &settings.report.warnings {
        note_warn(&format!("{}: {}", warning.path, warning.message));
    }
    for error in &settings.report.errors {
        note_error(&format!("{}: {}", error.path, error.message));
    }

    if let Some(stored) = stored_lazy_loading {
        check_lazy_loading(stored, settings.config.lazy_load_members())?;
    }

    if !settings.report.is_valid() {
        bail!("{} config error(s)", settings.report.errors.len());
    }

    let identity = settings.local_identity();
    let options = settings.transaction_options();
    print!(
        "{}",
        render_pairs(&[
            ("user", identity.user_id),
            ("device", identity.device_id),
            ("transaction timeout", format!("{:?}", options.timeout)),
            ("key fetch timeout", format!("{:?}", options.key_fetch_timeout)),
            ("request keys", options.request_cross_signing_keys.to_string()),
            ("log level", settings.config.log_level().to_string()),
        ])
    );
    note_success("Config is valid");
    Ok(())
}

async fn init_config(
    path: Option<PathBuf>,
    user_id: String,
    device_id: String,
    force: bool,
) -> Result<()> {
    let path = resolve_path(path);
    if path.exists() && !force {
        bail!("{} already exists; pass --force to overwrite", path.display());
    }

    let config = apply_all_defaults(VerificationConfig {
        identity: Some(IdentityConfig {
            user_id: Some(user_id),
            device_id: Some(device_id),
        }),
        ..Default::default()
    });
    let report = crossverify_config::validate(&config);
    if !report.is_valid() {
        for error in &report.errors {
            note_error(&format!("{}: {}", error.path, error.message));
        }
        bail!("refusing to write an invalid config");
    }

    write_config(&config, &path).await?;
    note_success(&format!("Wrote {}", path.display()));
    Ok(())
}
