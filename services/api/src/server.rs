use crate::cli::ServeArgs;
use crate::infra::{build_board, AppState, LogMailer};
use crate::routes::with_service_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use studentworks::config::AppConfig;
use studentworks::error::AppError;
use studentworks::telemetry;
use studentworks::workflows::notifications::NotificationDispatcher;
use tracing::{info, warn};

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    if config.moderation.moderator_emails.is_empty() {
        warn!("MODERATOR_EMAILS is empty; every moderation request will be refused");
    }

    let dispatcher = NotificationDispatcher::from_config(Arc::new(LogMailer), &config.notifications);
    let board = Arc::new(build_board(&config, Arc::new(dispatcher.clone())));

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
        notifications: dispatcher.clone(),
    };

    let app = with_service_routes(board)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, "student works board ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(readiness_flag))
        .await?;

    dispatcher.flush().await;
    let stats = dispatcher.stats();
    info!(
        delivered = stats.delivered,
        dropped = stats.dropped,
        "notification queue drained"
    );
    Ok(())
}

async fn shutdown_signal(readiness: Arc<AtomicBool>) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    readiness.store(false, Ordering::Release);
    info!("shutdown requested");
}
