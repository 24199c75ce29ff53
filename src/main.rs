use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use tokio::signal;
use tracing::{error, info, warn};

use storefront_api as api;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = api::config::load_config().context("loading configuration")?;
    api::config::init_tracing(cfg.log_level(), cfg.log_json);

    // Init DB
    let db_pool = api::db::establish_connection_from_app_config(&cfg)
        .await
        .context("connecting to the database")?;
    if cfg.auto_migrate {
        api::db::run_migrations(&db_pool).await.map_err(|e| {
            error!("Failed running migrations: {}", e);
            e
        })?;
    }
    let db = Arc::new(db_pool);

    // Init events
    let (event_sender, event_rx) = api::events::channel(cfg.event_channel_capacity);
    let events_task = tokio::spawn(api::events::process_events(event_rx));

    // Outbound collaborators
    let gateway = Arc::new(
        api::gateway::StripeGateway::new(&cfg.gateway).context("building gateway client")?,
    );
    let notifier = api::notifications::notifier_from_config(&cfg.notification)
        .context("building notifier")?;
    if cfg.notification.relay_url.is_none() {
        info!("No mail relay configured; order confirmations are written to the log");
    }

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{}", cfg.host, cfg.port))?;

    let state = Arc::new(api::AppState::new(
        db.clone(),
        cfg,
        event_sender,
        gateway,
        notifier,
    ));
    let app = api::build_router(state);

    // Bind and serve
    info!("storefront-api listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // The router held the last senders; the processor drains and exits
    match tokio::time::timeout(Duration::from_secs(5), events_task).await {
        Ok(Err(e)) => error!("event processor ended abnormally: {}", e),
        Err(_) => warn!("event processor did not drain within 5s"),
        Ok(Ok(())) => {}
    }

    match Arc::try_unwrap(db) {
        Ok(pool) => api::db::close_pool(pool).await?,
        Err(_) => info!("database pool still shared at shutdown; leaving it to drop"),
    }

    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
