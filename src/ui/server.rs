//! HTTP server setup and routing

use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;

use crate::config::UiConfig;
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::ui::{handlers, websocket};

/// State shared by all handlers
#[derive(Clone)]
pub struct AppState {
    pub engine: Engine,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/status", get(handlers::get_status))
        .route("/api/buffer", get(handlers::get_buffer))
        .route("/api/eq", get(handlers::get_equalizer))
        .route("/api/play", post(handlers::play))
        .route("/api/stop", post(handlers::stop))
        .route("/api/pause", post(handlers::pause))
        .route("/api/resume", post(handlers::resume))
        .route("/api/next", post(handlers::next))
        .route("/api/volume", post(handlers::set_volume))
        .route("/api/mute", post(handlers::set_mute))
        .route("/api/eq/band", post(handlers::set_band))
        .route("/api/eq/preset", post(handlers::apply_preset))
        .route("/api/eq/balance", post(handlers::set_balance))
        .route("/ws", get(websocket::ws_handler))
        .with_state(state)
        .layer(ServiceBuilder::new().layer(CorsLayer::permissive()))
}

/// Web control server
pub struct WebServer {
    addr: SocketAddr,
    state: AppState,
}

impl WebServer {
    pub fn new(config: &UiConfig, engine: Engine) -> Result<Self> {
        let addr: SocketAddr = format!("{}:{}", config.bind_address, config.http_port)
            .parse()
            .map_err(|e| Error::Config(format!("invalid bind address: {}", e)))?;
        Ok(Self {
            addr,
            state: AppState { engine },
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Serve until the listener fails
    pub async fn run(self) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!("Web UI listening on http://{}", self.addr);
        axum::serve(listener, create_router(self.state))
            .await
            .map_err(Error::Io)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::config::EngineConfig;

    async fn call(app: &Router, method: &str, path: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(path);
        let body = match body {
            Some(body) => {
                request = request.header("content-type", "application/json");
                Body::from(body.to_string())
            }
            None => Body::empty(),
        };
        let response = app.clone().oneshot(request.body(body).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), 64 * 1024).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn app() -> (Engine, Router) {
        let engine = Engine::builder(EngineConfig::default()).start().unwrap();
        let router = create_router(AppState {
            engine: engine.clone(),
        });
        (engine, router)
    }

    #[tokio::test]
    async fn test_status_and_buffer() {
        let (_engine, app) = app();
        let (code, body) = call(&app, "GET", "/api/status", None).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["state"], "idle");

        let (code, body) = call(&app, "GET", "/api/buffer", None).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["data"]["percent"], 0);
    }

    #[tokio::test]
    async fn test_errors_map_to_status_codes() {
        let (_engine, app) = app();
        let (code, body) = call(&app, "POST", "/api/play", Some(json!({ "source": "" }))).await;
        assert_eq!(code, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "invalid_argument");

        let (code, _) = call(&app, "POST", "/api/next", None).await;
        assert_eq!(code, StatusCode::CONFLICT);

        let (code, _) = call(&app, "POST", "/api/eq/preset", Some(json!({ "preset": "polka" }))).await;
        assert_eq!(code, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_equalizer_routes() {
        let (engine, app) = app();
        let (code, body) = call(&app, "POST", "/api/eq/preset", Some(json!({ "preset": "Bass+" }))).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["data"]["preset"], "bass_boost");

        let (code, _) = call(&app, "POST", "/api/eq/balance", Some(json!({ "balance": 250 }))).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(engine.equalizer().balance(), 100);

        let (code, _) = call(&app, "POST", "/api/volume", Some(json!({ "volume": 42 }))).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(engine.status().volume, 42);
    }
}
