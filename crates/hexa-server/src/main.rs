// codegen-hexa backend entry point.
//
// Startup sequence:
// 1. Load config (copies defaults on first run)
// 2. Initialize tracing (file or stderr, per [logging])
// 3. Open the notebook store
// 4. Build the LLM client and the container client
// 5. Serve HTTP + WebSocket until Ctrl+C

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{info, warn};

use hexa_core::config::{self, LoggingConfig};
use hexa_core::store::NotebookStore;
use hexa_llm::LlmClient;
use hexa_server::{create_router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Config comes first so the log destination is known.
    let config = config::load_config().context("failed to load configuration")?;

    // 2. Tracing
    init_tracing(&config.logging)?;
    info!("codegen-hexa backend starting up");
    info!(
        strategy = config.notebook.strategy.as_str(),
        container_enabled = config.container.enabled,
        proxy = config.container.proxy,
        "config loaded"
    );

    // 3. Store
    let db_path = config.database.resolved_path();
    let store = NotebookStore::open(&db_path).context("failed to open notebook store")?;
    info!(
        "Notebook store opened at {} ({} notebooks)",
        db_path.display(),
        store.notebook_count()?
    );

    // 4. Clients
    let llm = LlmClient::from_config(&config);
    if llm.is_active() {
        info!("LLM client initialized (API key configured)");
    } else {
        warn!("LLM client disabled (no API key)");
    }

    let bind_addr = config.server.bind_addr();
    let state = AppState::new(config, llm, store).context("failed to build container client")?;
    if let Some(id) = state.restore_session()? {
        info!(session_id = %id, "restored session from previous run");
    }
    spawn_session_logger(&state);

    // 5. Serve
    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("codegen-hexa backend shut down cleanly");
    Ok(())
}

/// Initialize tracing. Logs go to `[logging] file` when set, otherwise to
/// stderr. `RUST_LOG` overrides `[logging] filter`.
fn init_tracing(logging: &LoggingConfig) -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging.filter));

    let builder = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true);

    match &logging.file {
        Some(file) if !file.is_empty() => {
            let path = std::env::current_dir()?.join(file);
            if let Some(dir) = path.parent() {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("failed to create {}", dir.display()))?;
            }
            let log_file = std::fs::File::create(&path)
                .with_context(|| format!("failed to create {}", path.display()))?;
            let subscriber = builder.with_writer(log_file).with_ansi(false).finish();
            tracing::subscriber::set_global_default(subscriber)
                .context("failed to set tracing subscriber")?;
        }
        _ => {
            let subscriber = builder.with_writer(std::io::stderr).finish();
            tracing::subscriber::set_global_default(subscriber)
                .context("failed to set tracing subscriber")?;
        }
    }

    Ok(())
}

/// Log and persist every session change so voice and notebook activity can
/// be correlated, including across restarts.
fn spawn_session_logger(state: &AppState) {
    let mut rx = state.sessions.subscribe();
    let state = state.clone();
    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let current = rx.borrow_and_update().clone();
            match &current {
                Some(id) => info!(session_id = %id, "session changed"),
                None => info!("session cleared"),
            }
            if let Err(e) = state.persist_session(current.as_deref()) {
                warn!("failed to persist session: {e:#}");
            }
        }
    });
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for Ctrl+C: {e}");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
