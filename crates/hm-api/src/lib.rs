use std::collections::HashMap;
use std::env;
use std::net::{IpAddr, SocketAddr};
use std::num::NonZeroU32;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::connect_info::ConnectInfo,
    extract::State,
    http::header::{CONTENT_TYPE, HeaderName, HeaderValue},
    http::Method,
    http::Request,
    middleware,
    middleware::Next,
    response::Response,
    routing::get,
    Router,
};
use clap::Parser;
use dotenvy::dotenv;
use governor::{clock::DefaultClock, middleware::NoOpMiddleware, state::keyed::DashMapStateStore, Quota, RateLimiter};
use tower_http::{
    cors::CorsLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::info;

use hm_common::clock::{Clock, SystemClock};
use hm_common::db::{create_pool_from_url, PgPool};
use hm_common::index::{ElasticConfig, ElasticIndex};
use hm_common::logging::{init_logging, LoggingConfig};
use hm_common::mapping::{OccupationIndustryMapping, OccupationIndustryPair, SimplifyConfig};
use hm_common::reference::{load_reference_file, ContactModeTable, ReferenceData};
use hm_common::search::SearchSettings;

pub mod error;
pub mod handlers;

use error::ApiError;
use handlers::{companies, health, search};

const SHUTDOWN_DRAIN_GRACE: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Parser)]
#[command(name = "hm-api", about = "Hidden-market company search API")]
struct Cli {
    /// PostgreSQL connection string of the company system of record
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    /// Server port
    #[arg(long, env = "PORT", default_value_t = 8080)]
    port: u16,

    /// Base URL of the Elasticsearch-compatible index
    #[arg(long, env = "HM_INDEX_URL", default_value = "http://localhost:9200")]
    index_url: String,

    /// Name of the company index
    #[arg(long, env = "HM_INDEX_NAME", default_value = "etablissements")]
    index_name: String,

    /// JSON reference bundle (labels, occupation/industry pairs, contact modes)
    #[arg(long, env = "HM_REFERENCE_DATA")]
    reference_data: PathBuf,

    /// Comma separated list of allowed CORS origins
    #[arg(long, env = "HM_CORS_ORIGINS", default_value = "http://localhost:3000")]
    cors_origins: String,

    /// Prometheus exporter port
    #[arg(long, env = "HM_METRICS_PORT", default_value_t = 9464)]
    metrics_port: u16,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub port: u16,
    pub index_url: String,
    pub index_name: String,
    pub reference_data: PathBuf,
    pub cors_origins: Vec<String>,
    pub metrics_port: u16,
}

impl AppConfig {
    fn from_cli(cli: Cli) -> Result<Self, ApiError> {
        let cors_origins = cli
            .cors_origins
            .split(',')
            .map(|origin| origin.trim().to_string())
            .filter(|origin| !origin.is_empty())
            .collect::<Vec<_>>();

        if cors_origins.iter().any(|origin| origin == "*") {
            return Err(ApiError::Startup("HM_CORS_ORIGINS must list explicit origins".into()));
        }
        if !(cli.index_url.starts_with("http://") || cli.index_url.starts_with("https://")) {
            return Err(ApiError::Startup("HM_INDEX_URL must be an http(s) URL".into()));
        }

        Ok(Self {
            database_url: cli.database_url,
            port: cli.port,
            index_url: cli.index_url,
            index_name: cli.index_name,
            reference_data: cli.reference_data,
            cors_origins,
            metrics_port: cli.metrics_port,
        })
    }

    pub fn for_tests() -> Self {
        Self {
            database_url: "postgres://hm:hm@localhost:5432/hidden_market".into(),
            port: 8080,
            index_url: "http://127.0.0.1:9".into(),
            index_name: "etablissements".into(),
            reference_data: PathBuf::from("reference.json"),
            cors_origins: vec!["http://localhost:3000".into()],
            metrics_port: 9464,
        }
    }
}

type IpRateLimiter = RateLimiter<IpAddr, DashMapStateStore<IpAddr>, DefaultClock, NoOpMiddleware>;

#[derive(Clone)]
pub struct RateLimits {
    global: Arc<IpRateLimiter>,
    search: Arc<IpRateLimiter>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub global_per_sec: u64,
    pub global_burst: u32,
    pub search_per_sec: u64,
    pub search_burst: u32,
}

impl RateLimitConfig {
    fn parse_env<T: std::str::FromStr + PartialOrd + Default>(name: &str) -> Option<T> {
        env::var(name)
            .ok()
            .and_then(|value| value.trim().parse::<T>().ok())
            .filter(|value| *value > T::default())
    }

    pub fn from_env() -> Self {
        Self {
            global_per_sec: Self::parse_env("HM_RATE_LIMIT_GLOBAL_PER_SEC").unwrap_or(20),
            global_burst: Self::parse_env("HM_RATE_LIMIT_GLOBAL_BURST").unwrap_or(40),
            search_per_sec: Self::parse_env("HM_RATE_LIMIT_SEARCH_PER_SEC").unwrap_or(5),
            search_burst: Self::parse_env("HM_RATE_LIMIT_SEARCH_BURST").unwrap_or(10),
        }
    }
}

/// Everything a request needs. Reference data and settings are read-only.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub index: ElasticIndex,
    pub reference: Arc<ReferenceData>,
    pub settings: SearchSettings,
    pub clock: Arc<dyn Clock>,
    pub config: AppConfig,
    pub(crate) rate_limits: RateLimits,
    pub readiness: Arc<AtomicBool>,
}

pub type SharedState = Arc<AppState>;

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed = origins
        .iter()
        .filter_map(|origin| origin.parse::<HeaderValue>().ok())
        .collect::<Vec<_>>();

    CorsLayer::new()
        .allow_origin(allowed)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE, HeaderName::from_static("x-request-id")])
}

fn build_ip_limiter(per_second: u64, burst_size: u32) -> Arc<IpRateLimiter> {
    let nanos_per_token = (1_000_000_000u64 / per_second.max(1)).max(1);
    let burst = NonZeroU32::new(burst_size).unwrap_or(NonZeroU32::MIN);
    let quota = Quota::with_period(Duration::from_nanos(nanos_per_token))
        .unwrap_or_else(|| Quota::per_second(burst))
        .allow_burst(burst);

    Arc::new(RateLimiter::keyed(quota))
}

pub fn default_rate_limits() -> RateLimits {
    let cfg = RateLimitConfig::from_env();
    RateLimits {
        global: build_ip_limiter(cfg.global_per_sec, cfg.global_burst),
        search: build_ip_limiter(cfg.search_per_sec, cfg.search_burst),
    }
}

fn request_ip<B>(req: &Request<B>) -> Option<IpAddr> {
    req.extensions().get::<ConnectInfo<SocketAddr>>().map(|info| info.0.ip())
}

fn enforce_rate_limit(limiter: &IpRateLimiter, ip: Option<IpAddr>) -> Result<(), ApiError> {
    match ip {
        Some(client_ip) if limiter.check_key(&client_ip).is_err() => {
            Err(ApiError::TooManyRequests("rate limit exceeded".into()))
        }
        _ => Ok(()),
    }
}

async fn global_rate_limit(State(state): State<SharedState>, req: Request<Body>, next: Next) -> Result<Response, ApiError> {
    enforce_rate_limit(&state.rate_limits.global, request_ip(&req))?;
    Ok(next.run(req).await)
}

async fn search_rate_limit(State(state): State<SharedState>, req: Request<Body>, next: Next) -> Result<Response, ApiError> {
    enforce_rate_limit(&state.rate_limits.search, request_ip(&req))?;
    Ok(next.run(req).await)
}

async fn attach_request_id_context(req: Request<Body>, next: Next) -> Result<Response, ApiError> {
    let request_id = req
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string());

    Ok(error::with_request_id(request_id, next.run(req)).await)
}

pub fn create_router(state: SharedState) -> Router {
    let cors = cors_layer(&state.config.cors_origins);

    let request_id_header = HeaderName::from_static("x-request-id");
    let trace_header = request_id_header.clone();

    let trace = TraceLayer::new_for_http().make_span_with(move |request: &Request<Body>| {
        let request_id = request
            .headers()
            .get(&trace_header)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("");

        tracing::info_span!(
            "http_request",
            method = %request.method(),
            uri = %request.uri(),
            request_id = %request_id,
            status = tracing::field::Empty,
        )
    });

    let api_routes = Router::new()
        .route(
            "/search",
            get(search::search).route_layer(middleware::from_fn_with_state(state.clone(), search_rate_limit)),
        )
        .route("/count", get(search::count))
        .route("/companies/:siret", get(companies::get_company));

    Router::new()
        .route("/health", get(health::readyz))
        .route("/livez", get(health::livez))
        .route("/readyz", get(health::readyz))
        .nest("/api", api_routes)
        .layer(middleware::from_fn_with_state(state.clone(), global_rate_limit))
        .layer(middleware::from_fn(attach_request_id_context))
        .layer(trace)
        .layer(PropagateRequestIdLayer::new(request_id_header.clone()))
        .layer(SetRequestIdLayer::new(request_id_header, MakeRequestUuid))
        .layer(cors)
        .with_state(state)
}

/// Small reference table for tests: two butchery/retail occupations.
pub fn test_reference() -> ReferenceData {
    let pair = |occupation: &str, industry: &str, weight: f64| OccupationIndustryPair {
        occupation_code: occupation.into(),
        industry_code: industry.into(),
        weight,
    };

    ReferenceData::new(
        HashMap::from([
            ("D1101".to_string(), "Boucherie".to_string()),
            ("D1106".to_string(), "Vente en alimentation".to_string()),
        ]),
        HashMap::from([
            ("4711D".to_string(), "Supermarchés".to_string()),
            ("4722Z".to_string(), "Commerce de détail de viandes".to_string()),
        ]),
        OccupationIndustryMapping::from_pairs(&[
            pair("D1101", "4722Z", 120.0),
            pair("D1101", "4711D", 40.0),
            pair("D1106", "4711D", 300.0),
        ]),
        ContactModeTable::default(),
    )
}

/// State whose pool and index never connect; enough for validation paths.
pub fn test_state() -> SharedState {
    let config = AppConfig::for_tests();
    let pool = create_pool_from_url(&config.database_url).expect("pool should build without connecting");
    let index = ElasticIndex::new(ElasticConfig::new(config.index_url.clone(), config.index_name.clone()))
        .expect("http client should build");

    Arc::new(AppState {
        pool,
        index,
        reference: Arc::new(test_reference()),
        settings: SearchSettings::default(),
        clock: Arc::new(SystemClock),
        config,
        rate_limits: default_rate_limits(),
        readiness: Arc::new(AtomicBool::new(true)),
    })
}

pub async fn run() -> Result<(), ApiError> {
    dotenv().ok();
    init_logging(env!("CARGO_PKG_NAME"), &LoggingConfig::from_env());

    let cli = Cli::parse();
    let config = AppConfig::from_cli(cli)?;

    let settings = SearchSettings::from_env().map_err(|err| ApiError::Startup(err.to_string()))?;
    settings.validate().map_err(|err| ApiError::Startup(err.to_string()))?;
    let reference = load_reference_file(&config.reference_data, &SimplifyConfig::from_env())
        .map_err(|err| ApiError::Startup(err.to_string()))?;
    let pool = create_pool_from_url(&config.database_url).map_err(|err| ApiError::Startup(err.to_string()))?;
    let index = ElasticIndex::new(ElasticConfig::new(config.index_url.clone(), config.index_name.clone()).with_env_timeout())
        .map_err(|err| ApiError::Startup(err.to_string()))?;

    hm_metrics::init_metrics("HM_METRICS_PORT", config.metrics_port);

    let state = Arc::new(AppState {
        pool,
        index,
        reference,
        settings,
        clock: Arc::new(SystemClock),
        config: config.clone(),
        rate_limits: default_rate_limits(),
        readiness: Arc::new(AtomicBool::new(true)),
    });

    let addr: SocketAddr = ([0, 0, 0, 0], config.port).into();
    let app = create_router(state.clone());

    info!(%addr, index = %config.index_name, "hm-api listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|err| ApiError::Startup(err.to_string()))?;

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal(state.clone()))
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?;

    Ok(())
}

async fn shutdown_signal(state: SharedState) {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
            let _ = sigterm.recv().await;
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    state.readiness.store(false, Ordering::SeqCst);

    // Load balancers need a moment to see /readyz fail before the listener closes.
    tokio::time::sleep(SHUTDOWN_DRAIN_GRACE).await;
}
