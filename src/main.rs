use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use truthroom::{config, reaper, router, state::AppState};

#[tokio::main]
async fn main() {
    config::load_dotenv();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "truthroom=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting truthroom server...");

    let server_config = match config::ServerConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("{}", e);
            eprintln!("Cannot start: {}", e);
            std::process::exit(1);
        }
    };

    let state = Arc::new(AppState::from_config(&server_config));

    // Abandoned rooms are removed here, leaves on exit are best effort only
    reaper::spawn_room_reaper(
        state.clone(),
        server_config.room_ttl,
        server_config.reaper_interval,
    );

    let app = router(state);

    let listener = match tokio::net::TcpListener::bind(server_config.bind_addr).await {
        Ok(l) => l,
        Err(e) => {
            eprintln!("Cannot bind {}: {}", server_config.bind_addr, e);
            std::process::exit(1);
        }
    };
    tracing::info!("Listening on http://{}", server_config.bind_addr);

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!("Server error: {}", e);
    }
}
