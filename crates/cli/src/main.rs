use clap::{Parser, Subcommand};
use std::num::NonZeroU32;
use std::sync::Arc;

use gexray_core::config::AppConfig;
use gexray_core::{ActivityLog, ConfigLoader, TradingCalendar, Universe};
use gexray_exposure::SnapshotStore;
use gexray_fetcher::FetchService;
use gexray_schwab::{
    SchwabClient, SchwabClientConfig, TokenManager, TokenManagerConfig, TokenStore,
};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "gexray")]
#[command(about = "Options dealer-exposure pipeline for Schwab market data", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the fetch pipeline daemon
    Run {
        /// Config file path
        #[arg(short, long, default_value = "config/Config.toml")]
        config: String,
    },
    /// Force a token refresh now and persist the result
    RefreshToken {
        /// Config file path
        #[arg(short, long, default_value = "config/Config.toml")]
        config: String,
    },
    /// Show both credential clocks without touching the network
    TokenStatus {
        /// Config file path
        #[arg(short, long, default_value = "config/Config.toml")]
        config: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config } => {
            run_pipeline(&config).await?;
        }
        Commands::RefreshToken { config } => {
            run_refresh_token(&config).await?;
        }
        Commands::TokenStatus { config } => {
            run_token_status(&config).await?;
        }
    }

    Ok(())
}

fn build_token_manager(config: &AppConfig) -> anyhow::Result<(Arc<TokenManager>, ActivityLog)> {
    let activity = ActivityLog::new(&config.activity.path);

    let mut manager_config = TokenManagerConfig::from_env(
        &config.schwab.token_url,
        &config.schwab.app_key_env,
        &config.schwab.app_secret_env,
    )?;
    manager_config.retry_attempts = config.fetcher.retry_attempts;
    manager_config.retry_base_delay_secs = config.fetcher.retry_base_delay_secs;
    manager_config.timeout_secs = config.schwab.timeout_secs;

    let store = TokenStore::new(&config.schwab.token_path);
    let tokens = Arc::new(TokenManager::new(manager_config, store, activity.clone())?);
    Ok((tokens, activity))
}

async fn run_pipeline(config_path: &str) -> anyhow::Result<()> {
    tracing::info!("Starting gexray pipeline with config: {}", config_path);

    let config = ConfigLoader::load_from(config_path)?;
    let calendar = TradingCalendar::from_config(&config.market_hours)?;
    let universe = Universe::from_config(&config.universe);
    let (tokens, activity) = build_token_manager(&config)?;

    let requests_per_minute = NonZeroU32::new(config.schwab.requests_per_minute)
        .ok_or_else(|| anyhow::anyhow!("schwab.requests_per_minute must be nonzero"))?;
    let client_config = SchwabClientConfig {
        base_url: config.schwab.api_base_url.clone(),
        requests_per_minute,
        timeout_secs: config.schwab.timeout_secs,
        strike_count: config.schwab.strike_count,
    };
    let client = SchwabClient::new(client_config, tokens.clone())?;

    let store = Arc::new(SnapshotStore::new());
    let cancel = CancellationToken::new();

    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown signal received, stopping after current cycle");
            ctrl_c_cancel.cancel();
        }
    });

    let service = FetchService::new(
        config.fetcher.clone(),
        calendar,
        universe,
        client,
        tokens,
        store,
        activity,
        cancel,
    );

    service.run().await
}

async fn run_refresh_token(config_path: &str) -> anyhow::Result<()> {
    let config = ConfigLoader::load_from(config_path)?;
    let (tokens, _activity) = build_token_manager(&config)?;

    let credential = tokens.force_refresh().await?;
    println!("Token refreshed.");
    println!("  Access token expires:  {}", credential.access_expires_at());
    println!("  Refresh token expires: {}", credential.refresh_expires_at());
    Ok(())
}

async fn run_token_status(config_path: &str) -> anyhow::Result<()> {
    let config = ConfigLoader::load_from(config_path)?;
    let store = TokenStore::new(&config.schwab.token_path);
    let credential = store.load()?;

    let now = chrono::Utc::now();
    println!("Token file: {}", config.schwab.token_path);
    println!(
        "  Access token:  issued {}, expires {}, age {}m",
        credential.access_issued_at,
        credential.access_expires_at(),
        credential.access_age(now).num_minutes()
    );
    println!(
        "  Refresh token: issued {}, expires {}, age {}h",
        credential.refresh_issued_at,
        credential.refresh_expires_at(),
        credential.refresh_age(now).num_hours()
    );
    if credential.is_refresh_expired(now) {
        println!("  Status: refresh window LAPSED, rerun the one-shot authorization flow");
    } else if credential.needs_refresh(now) {
        println!("  Status: access token stale, will refresh on next use");
    } else {
        println!("  Status: fresh");
    }
    Ok(())
}
