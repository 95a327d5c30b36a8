use crate::cli::ServeArgs;
use crate::infra::{build_portal, seed, AppState};
use crate::routes::with_service_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use portal_enrollment::config::AppConfig;
use portal_enrollment::error::AppError;
use portal_enrollment::telemetry;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::info;

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let handles = build_portal(&config.enrollment);
    if args.seed {
        seed(&handles)?;
    }

    let app = with_service_routes(Arc::clone(&handles.portal))
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        ?config.environment,
        %addr,
        selection_ttl_minutes = config.enrollment.selection_ttl_minutes,
        auto_capture = config.enrollment.auto_capture_payments,
        "enrollment portal ready"
    );

    axum::serve(listener, app).await?;
    Ok(())
}
