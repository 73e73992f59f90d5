use api::auth::middleware::log_request;
use api::routes::routes;
use axum::{Router, middleware::from_fn};
use common::events::{AttendanceEvent, EventDispatcher};
use common::state::AppState;
use db::connect;
use std::net::SocketAddr;
use tokio::sync::mpsc::UnboundedReceiver;
use tower_http::cors::CorsLayer;
use tracing_appender::rolling;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let _log_guard = init_logging(&common::config::log_file());

    // Set up dependencies
    let db = connect().await;
    let (events, event_rx) = EventDispatcher::new();
    let app_state = AppState::new(db, events);

    // Drain engine events; stand-in for the notification pipeline.
    spawn_event_drain(event_rx);

    // Configure middleware
    let cors = CorsLayer::very_permissive();

    // Build app router
    let app = Router::new()
        .nest("/api", routes(app_state.clone()))
        .layer(from_fn(log_request))
        .layer(cors);

    // Start server
    let addr: SocketAddr = format!("{}:{}", common::config::host(), common::config::port())
        .parse()
        .expect("Invalid address");

    println!(
        "Starting {} on http://{}:{}",
        common::config::project_name(),
        common::config::host(),
        common::config::port()
    );

    axum::serve(
        tokio::net::TcpListener::bind(&addr)
            .await
            .expect("Failed to bind"),
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .expect("Server crashed");
}

fn init_logging(log_file: &str) -> tracing_appender::non_blocking::WorkerGuard {
    use std::fs;
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    fs::create_dir_all("logs").ok();

    let file_appender = rolling::daily("logs", log_file);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(file_writer)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true);

    let stdout_layer = fmt::layer()
        .with_writer(std::io::stdout)
        .with_ansi(true)
        .with_target(true);

    let env_filter =
        EnvFilter::try_from_env("LOG_LEVEL").unwrap_or_else(|_| EnvFilter::new("api=info"));

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer);

    if common::config::log_to_stdout() {
        registry.with(stdout_layer).init();
    } else {
        registry.init();
    }

    guard
}

/// Logs every engine event as it fires. Delivery to external consumers
/// (notifications, dashboards) would hang off this receiver.
fn spawn_event_drain(mut rx: UnboundedReceiver<AttendanceEvent>) {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(payload) => tracing::info!(event = %payload, "attendance event"),
                Err(e) => tracing::warn!(error = %e, "unserializable attendance event"),
            }
        }
    });
}
