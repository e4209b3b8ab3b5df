use actix_web::{middleware, web, App, HttpServer};
use anyhow::Context;
use std::sync::Arc;

use delivery_hub::storage::{migrations, InMemoryStore, MessageStore, NotificationStore, PgStore};
use delivery_hub::{configure_routes, logging, metrics, AppState, Config, Reconciler};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    logging::init_tracing();

    let config = Config::from_env().context("invalid configuration")?;
    tracing::info!(
        port = config.port,
        watermark = %config.reconcile.watermark,
        interval_secs = config.reconcile.interval.as_secs(),
        "starting delivery-hub"
    );

    match config.database.clone() {
        Some(db) => {
            let store = PgStore::connect(&db.url, db.max_connections)
                .await
                .context("failed to connect to database")?;
            tracing::info!("connected to database");

            if db.run_migrations {
                migrations::run_all(store.pool())
                    .await
                    .context("failed to run migrations")?;
                tracing::info!("migrations applied");
            }
            serve(config, Arc::new(store)).await
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory storage");
            serve(config, Arc::new(InMemoryStore::new())).await
        }
    }
}

async fn serve<S>(config: Config, store: Arc<S>) -> anyhow::Result<()>
where
    S: MessageStore + NotificationStore + 'static,
{
    let addr = format!("0.0.0.0:{}", config.port);
    let state = AppState::new(config, store.clone());

    let reconciler = Reconciler::new(
        state.registry.clone(),
        store,
        &state.config.reconcile,
        state.config.websocket.write_timeout,
    );
    let (reconcile_shutdown, reconcile_handle) = reconciler.spawn();

    let data = web::Data::new(state);
    tracing::info!("HTTP server listening on {}", addr);

    let server = HttpServer::new(move || {
        App::new()
            .app_data(data.clone())
            .wrap(middleware::Logger::default())
            .wrap(metrics::HttpMetrics)
            .configure(configure_routes)
    })
    .bind(&addr)
    .with_context(|| format!("failed to bind {addr}"))?
    .shutdown_timeout(10)
    .disable_signals()
    .run();

    let handle = server.handle();
    let server_task = actix_web::rt::spawn(server);

    shutdown_signal().await;
    tracing::info!("shutdown signal received");

    let _ = reconcile_shutdown.send(());
    handle.stop(true).await;

    server_task.await.context("server task panicked")??;
    if let Err(e) = reconcile_handle.await {
        tracing::error!(error = %e, "reconciler task failed");
    }

    tracing::info!("delivery-hub stopped");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = terminate.recv() => {},
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
