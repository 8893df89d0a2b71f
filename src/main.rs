//! portavia relay server
//!
//! Environment variables:
//! - `PORTAVIA_PORT` - Listen port (overrides the configured port)
//! - `RUST_LOG` - Log filter (default: info)

use std::sync::Arc;

use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _guard = portavia::init_logging();

    info!("Starting portavia relay");

    if let Some(dir) = portavia::log_dir() {
        info!("Log files saved to: {}", dir.display());
    }

    let state = Arc::new(portavia::AppState::new()?);

    let config_port = state.config.read().await.port;
    let port: u16 = std::env::var("PORTAVIA_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(config_port);

    if state.config.read().await.render_mode {
        info!("Serving /proxy through headless Chrome (render mode)");
    } else {
        info!("Serving /proxy as direct fetch (override per request with ?render=1)");
    }

    tokio::select! {
        result = portavia::web::start_server(state.clone(), port) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!(
                "Shutting down ({} render session(s) open)",
                state.render_pool.session_count().await
            );
            state.render_pool.close_all().await;
        }
    }

    Ok(())
}
