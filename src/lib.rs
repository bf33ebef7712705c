pub mod cli;
pub mod client;
pub mod error;
pub mod models;
pub mod ratelimit;
pub mod server;
pub mod upstream;

use cli::Args;
use log::{ error, info };
use ratelimit::{ CounterStore, InMemoryCounterStore };
use server::api::AppState;
use server::Server;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;
use upstream::shape::HistoryMode;

pub async fn run(args: Args) -> Result<(), Box<dyn Error + Send + Sync>> {
    info!("--- Core Configuration ---");
    info!("Server Address: {}", args.server_addr);
    info!("Upstream Base URL: {}", args.gemini_base_url);
    info!("Upstream Model: {}", args.gemini_model);
    info!("Upstream Timeout: {}s", args.upstream_timeout_secs);
    info!("Upstream Max Retries: {}", args.upstream_max_retries);
    info!("Initial Backoff: {}ms", args.upstream_initial_backoff_ms);
    info!("Forward Full History: {}", args.forward_history);
    info!("Rate Limit Enabled: {}", args.enable_rate_limit);
    if args.enable_rate_limit {
        info!("Rate Limit Window: {}s", args.rate_limit_window_secs);
        info!("Rate Limit Max Requests: {}", args.rate_limit_max_requests);
    }
    info!("-------------------------");

    if args.gemini_api_key.as_deref().map_or(true, |k| k.trim().is_empty()) {
        error!("GEMINI_API_KEY is not set; chat requests will fail with a configuration error");
    }

    let upstream = upstream::new_client(&args)?;

    let limiter: Option<Arc<dyn CounterStore>> = if args.enable_rate_limit {
        let window = Duration::from_secs(args.rate_limit_window_secs);
        let store: Arc<dyn CounterStore> = Arc::new(
            InMemoryCounterStore::new(window, args.rate_limit_max_requests)
        );
        ratelimit::spawn_sweeper(Arc::clone(&store), window);
        Some(store)
    } else {
        None
    };

    let history_mode = if args.forward_history {
        HistoryMode::FullHistory
    } else {
        HistoryMode::LatestOnly
    };

    let state = AppState { upstream, limiter, history_mode };
    let server = Server::new(args.server_addr.clone(), state, args.clone());
    server.run().await
}
