#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
mod address;
mod config;

use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    extract::{Path, Request, State},
    http::{
        header::{CACHE_CONTROL, CONTENT_TYPE, InvalidHeaderValue},
        HeaderName, HeaderValue, StatusCode,
    },
    middleware::Next,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use craftprobe::{CachedProber, MemoryCache, Platform, Prober, ServerStatus};
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::{
    address::AddressError,
    config::{Config, ConfigError},
};

#[macro_use]
extern crate tracing;

const FAVICON_PREFIX: &str = "data:image/png;base64,";
const DEFAULT_LOG: &str = concat!(env!("CARGO_PKG_NAME"), "=info,craftprobe=info");

#[derive(Debug, thiserror::Error)]
enum StartupError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("invalid `LOG` filter: {0}")]
    LogFilter(#[from] tracing_subscriber::filter::ParseError),
    #[error("cache TTL does not fit in a header: {0}")]
    Header(#[from] InvalidHeaderValue),
    #[error("server I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Clone)]
struct AppState {
    prober: Arc<CachedProber<Prober, MemoryCache>>,
    cache_control: HeaderValue,
}

impl AppState {
    fn new(config: &Config) -> Result<Self, StartupError> {
        Ok(Self {
            prober: Arc::new(CachedProber::new(
                Prober::new(config.probe.clone()),
                MemoryCache::new(),
                config.cache_ttl,
            )),
            cache_control: HeaderValue::try_from(format!("s-maxage={}", config.cache_ttl.as_secs()))?,
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), StartupError> {
    start_tracing()?;
    let config = Config::from_env()?;
    let state = AppState::new(&config)?;

    tokio::spawn(purge_expired(
        Arc::clone(&state.prober),
        config.cache_ttl.max(Duration::from_secs(1)),
    ));

    let app = router(state);
    let socket_address = SocketAddr::from(([0, 0, 0, 0], config.port));
    let tcp = TcpListener::bind(socket_address).await?;
    info!(%socket_address, "listening");
    axum::serve(tcp, app)
        .with_graceful_shutdown(vss::shutdown_signal())
        .await?;
    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/:address", get(handle_java_ping))
        .route("/api/java/:address", get(handle_java_ping))
        .route("/api/java/:address/icon", get(handle_java_icon))
        .route("/api/bedrock/:address", get(handle_bedrock_ping))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            noindex_cache,
        ))
        .route("/health", get(|| async { "ok" }))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Sweeps expired statuses out of the cache until shutdown.
async fn purge_expired(prober: Arc<CachedProber<Prober, MemoryCache>>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    let shutdown = vss::shutdown_signal();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let purged = prober.cache().purge_expired();
                if purged > 0 {
                    debug!(purged, remaining = prober.cache().len(), "purged expired statuses");
                }
            }
            () = &mut shutdown => return,
        }
    }
}

static ROBOTS_NAME: HeaderName = HeaderName::from_static("x-robots-tag");
static ROBOTS_VALUE: HeaderValue = HeaderValue::from_static("noindex");

async fn noindex_cache(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let mut resp = next.run(req).await;
    resp.headers_mut()
        .insert(ROBOTS_NAME.clone(), ROBOTS_VALUE.clone());
    resp.headers_mut()
        .insert(CACHE_CONTROL, state.cache_control.clone());
    resp
}

async fn lookup(state: &AppState, platform: Platform, address: &str) -> Result<ServerStatus, Failure> {
    let request = address::parse(platform, address)?;
    Ok(state.prober.probe(&request).await?)
}

async fn handle_java_ping(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Result<Json<ServerStatus>, Failure> {
    lookup(&state, Platform::Java, &address).await.map(Json)
}

async fn handle_bedrock_ping(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Result<Json<ServerStatus>, Failure> {
    lookup(&state, Platform::Bedrock, &address).await.map(Json)
}

async fn handle_java_icon(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Result<Response, Failure> {
    static PNG_CTYPE: HeaderValue = HeaderValue::from_static("image/png");

    let ServerStatus::Java(status) = lookup(&state, Platform::Java, &address).await? else {
        return Err(Failure::NoIcon);
    };
    let favicon = status.favicon.ok_or(Failure::NoIcon)?;
    let png = STANDARD.decode(favicon.strip_prefix(FAVICON_PREFIX).unwrap_or(&favicon))?;
    Ok(([(CONTENT_TYPE, PNG_CTYPE.clone())], png).into_response())
}

#[derive(thiserror::Error, Debug)]
enum Failure {
    #[error("Could not get a status from the server")]
    NotFound(#[from] craftprobe::Error),
    #[error("Invalid server address: {0}")]
    BadAddress(#[from] AddressError),
    #[error("The server has no icon")]
    NoIcon,
    #[error("The server sent an icon that could not be decoded")]
    BadIcon(#[from] base64::DecodeError),
}

impl IntoResponse for Failure {
    fn into_response(self) -> Response {
        let status = match self {
            Self::NotFound(_) | Self::NoIcon => StatusCode::NOT_FOUND,
            Self::BadAddress(_) => StatusCode::BAD_REQUEST,
            Self::BadIcon(_) => StatusCode::BAD_GATEWAY,
        };
        debug!(error = ?self, "request failed");
        let ser = ErrorSerialization {
            error: self.to_string(),
        };
        (status, Json(ser)).into_response()
    }
}

#[derive(serde::Serialize)]
pub struct ErrorSerialization {
    error: String,
}

pub struct Json<T: Serialize>(pub T);

impl<T: Serialize> IntoResponse for Json<T> {
    fn into_response(self) -> Response {
        static JSON_CTYPE: HeaderValue = HeaderValue::from_static("application/json;charset=utf-8");

        let body = serde_json::to_vec_pretty(&self.0).unwrap_or_else(|_| {
            r#"{"error": "JSON Serialization failed, please make a bug report"}"#
                .as_bytes()
                .to_vec()
        });
        ([(CONTENT_TYPE, JSON_CTYPE.clone())], body).into_response()
    }
}

fn start_tracing() -> Result<(), StartupError> {
    let directives = std::env::var("LOG").unwrap_or_else(|_| DEFAULT_LOG.to_owned());
    let env_filter = tracing_subscriber::EnvFilter::builder().parse(directives)?;
    let registry = tracing_subscriber::registry().with(env_filter);
    if std::env::var("LOG_JSON").is_ok_and(|v| v == "1") {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
    Ok(())
}
