use axum::{
    http::HeaderValue,
    routing::{any, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::warn;

use super::handlers;
use super::ws::ws_handler;
use crate::state::AppState;

/// Create the main application router
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config.get().web.cors_origins);

    let device_routes = Router::new()
        .route("/devices", get(handlers::list_devices))
        .route("/devices/refresh", post(handlers::refresh_devices))
        .route("/devices/:device_id", get(handlers::get_device))
        .route("/devices/:device_id/sensors", get(handlers::list_sensors))
        .route(
            "/devices/:device_id/sensors/:sensor_id",
            get(handlers::get_sensor),
        )
        .route(
            "/devices/:device_id/sensors/:sensor_id/options",
            get(handlers::list_options),
        )
        .route(
            "/devices/:device_id/sensors/:sensor_id/options/:option_id",
            get(handlers::get_option).put(handlers::set_option),
        );

    let stream_routes = Router::new()
        .route(
            "/devices/:device_id/stream/start",
            post(handlers::stream_start),
        )
        .route("/devices/:device_id/stream/stop", post(handlers::stream_stop))
        .route(
            "/devices/:device_id/stream/status",
            get(handlers::stream_status),
        )
        .route("/streams", get(handlers::list_streams))
        .route(
            "/devices/:device_id/point_cloud/activate",
            post(handlers::point_cloud_activate),
        )
        .route(
            "/devices/:device_id/point_cloud/deactivate",
            post(handlers::point_cloud_deactivate),
        )
        .route(
            "/devices/:device_id/point_cloud/status",
            get(handlers::point_cloud_status),
        );

    let webrtc_routes = Router::new()
        .route("/webrtc/offer", post(handlers::webrtc_offer))
        .route("/webrtc/ice", post(handlers::webrtc_ice_candidate))
        .route("/webrtc/keepalive", post(handlers::webrtc_keepalive))
        .route("/webrtc/close", post(handlers::webrtc_close_session))
        .route("/webrtc/sessions", get(handlers::webrtc_sessions))
        .route("/webrtc/ice-servers", get(handlers::webrtc_ice_servers))
        // Signaling and event socket
        .route("/ws", any(ws_handler));

    let api_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .merge(device_routes)
        .merge(stream_routes)
        .merge(webrtc_routes);

    Router::new()
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let base = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return base.allow_origin(Any);
    }

    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                warn!("Ignoring invalid CORS origin: {}", o);
                None
            }
        })
        .collect();
    base.allow_origin(AllowOrigin::list(parsed))
}
