use segmq::config::Config;
use segmq::Broker;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

// ========================================
// MAIN ENTRY POINT
// ========================================

#[tokio::main]
async fn main() {
    let config = Config::global();

    let filter = EnvFilter::try_from_env("BROKER_LOG")
        .unwrap_or_else(|_| EnvFilter::new(&config.server.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("🚀 segmq v{} starting...", env!("CARGO_PKG_VERSION"));

    let broker = match Broker::from_config(config) {
        Ok(broker) => broker,
        Err(e) => {
            error!("[Broker] failed to open topics: {}", e);
            std::process::exit(1);
        }
    };

    tokio::select! {
        result = broker.run() => {
            if let Err(e) = result {
                error!("[Server] failed on {}: {}", broker.addr(), e);
                std::process::exit(1);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("[Server] shutting down");
            broker.shutdown();
        }
    }
}
