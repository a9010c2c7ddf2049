// Draft room server entry point.
//
// Startup sequence:
// 1. Initialize tracing
// 2. Load config
// 3. Load the candidate catalog
// 4. Build the app and start the session sweeper
// 5. Serve WebSocket clients until Ctrl+C

use std::path::Path;
use std::sync::Arc;

use draft_room::app::App;
use draft_room::catalog::Catalog;
use draft_room::config;
use draft_room::ws_server;

use anyhow::Context;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing()?;
    info!("Draft room starting up");

    let config = config::load_config().context("failed to load configuration")?;
    info!(
        "Config loaded: {} rounds, {} ticks per turn, ranking deadline {}s",
        config.draft.rounds, config.draft.turn_ticks, config.ranking.deadline_secs
    );

    let catalog = Catalog::load(Path::new(&config.catalog.path))
        .with_context(|| format!("failed to load catalog from {}", config.catalog.path))?;
    info!(
        "Loaded {} candidates (primary column {:?})",
        catalog.len(),
        catalog.primary_column()
    );

    let app = Arc::new(App::new(&config, catalog));
    let sweeper = app.spawn_sweeper(config.sessions.sweep_interval());

    let addr = format!("{}:{}", config.server.bind, config.server.port);
    let listener = ws_server::TungsteniteListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Listening on {}", listener.local_addr()?);

    tokio::select! {
        result = ws_server::run(listener, Arc::clone(&app)) => {
            if let Err(e) = result {
                error!("WebSocket server error: {e}");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl+C received, shutting down");
        }
    }

    sweeper.abort();
    info!("Draft room shut down cleanly");
    Ok(())
}

/// Log to stderr, filtered by `RUST_LOG` when set.
fn init_tracing() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("draft_room=info,warn")),
        )
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    Ok(())
}
