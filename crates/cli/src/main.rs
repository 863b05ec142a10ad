mod features_commands;
mod run_commands;

use std::{path::PathBuf, sync::Arc};

use {
    clap::{Parser, Subcommand},
    roost_config::RoostConfig,
    roost_features::{FeatureCatalog, FeatureManager, LoadReport},
    tracing::{debug, info},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "roost", about = "roost, a feature host with a cancellable event bus")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (default: ./roost.toml, then the user config dir).
    #[arg(long, global = true, env = "ROOST_CONFIG")]
    config: Option<PathBuf>,

    /// Features directory (overrides config value).
    #[arg(long, global = true, env = "ROOST_FEATURES_DIR")]
    features_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect discovered features.
    Features {
        #[command(subcommand)]
        action: features_commands::FeatureAction,
    },
    /// Load and enable every feature, report problems, then shut down.
    Check,
    /// Dispatch a single event and print the report.
    Dispatch {
        /// Event name.
        event: String,
        /// JSON payload.
        #[arg(short, long, default_value = "{}")]
        payload: String,
    },
    /// Run the host, reading JSON-lines events from stdin.
    Run,
}

/// Where the config comes from. Kept so `run` can re-read it on reload.
#[derive(Clone)]
pub(crate) struct ConfigSource {
    path: Option<PathBuf>,
    features_dir: Option<PathBuf>,
}

impl ConfigSource {
    /// An explicit config file must parse; a discovered one falls back to
    /// defaults.
    pub(crate) fn load(&self) -> anyhow::Result<RoostConfig> {
        let mut config = match &self.path {
            Some(path) => roost_config::load_config(path)?,
            None => roost_config::discover_and_load(),
        };
        if let Some(dir) = &self.features_dir {
            config.host.features_dir.clone_from(dir);
        }
        debug!(
            features_dir = %config.host.features_dir.display(),
            events = config.host.events.len(),
            "config resolved"
        );
        Ok(config)
    }
}

/// A manager built from config with the bundled catalog, features loaded.
/// The load report carries manifests that failed to load.
pub(crate) async fn start_host(
    source: &ConfigSource,
) -> anyhow::Result<(Arc<FeatureManager>, LoadReport)> {
    let config = source.load()?;
    let manager = Arc::new(FeatureManager::from_config(
        &config,
        FeatureCatalog::with_bundled(),
    ));
    let report = manager.load_all().await?;
    Ok((manager, report))
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    // stdout carries command output; logs go to stderr.
    if cli.json_logs {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_telemetry(&cli);

    debug!(version = env!("CARGO_PKG_VERSION"), "roost starting");

    let source = ConfigSource {
        path: cli.config.clone(),
        features_dir: cli.features_dir.clone(),
    };

    match cli.command {
        Commands::Features { action } => features_commands::handle_features(action, &source).await,
        Commands::Check => check(&source).await,
        Commands::Dispatch { event, payload } => dispatch(&source, &event, &payload).await,
        Commands::Run => run_commands::run(&source).await,
    }
}

async fn check(source: &ConfigSource) -> anyhow::Result<()> {
    let config = source.load()?;
    let manager = FeatureManager::from_config(&config, FeatureCatalog::with_bundled());

    let load = manager.load_all().await?;
    for failure in &load.failed {
        println!("  ✗ {}: {}", failure.path.display(), failure.error);
    }

    let enable = manager.enable_all().await;
    for name in &enable.enabled {
        println!("  ✓ {name}");
    }
    for failure in &enable.failed {
        println!("  ✗ {}: {}", failure.feature, failure.error);
    }
    for unresolved in &enable.unresolved {
        println!(
            "  ✗ {}: missing dependencies: {}",
            unresolved.feature,
            unresolved.missing.join(", ")
        );
    }

    manager.disable_all().await;

    let problems = load.failed.len() + enable.failed.len() + enable.unresolved.len();
    if problems > 0 {
        anyhow::bail!("{problems} problem(s) found");
    }
    info!(features = manager.feature_names().len(), "all features enabled cleanly");
    Ok(())
}

async fn dispatch(source: &ConfigSource, event: &str, payload: &str) -> anyhow::Result<()> {
    let payload: serde_json::Value = serde_json::from_str(payload)?;
    let (manager, _) = start_host(source).await?;
    manager.enable_all().await;

    let report = manager.dispatch(event, payload).await;
    println!("{}", serde_json::to_string_pretty(&report)?);

    manager.disable_all().await;
    Ok(())
}
