use axum::http::{HeaderValue, Method};
use smart_bookmark::{app, build_backend, config::Config, state::AppState};
use std::sync::Arc;
use tokio::time::{interval, Duration};
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 加载配置
    dotenv::dotenv().ok();
    let config = Config::from_env()?;

    // 初始化日志
    init_tracing(&config);

    info!("Starting smart-bookmark service ({})...", config.environment);

    if config.is_production() && !config.cookie_secure {
        warn!("COOKIE_SECURE is disabled in production");
    }

    let backend = build_backend(&config)?;
    let app_state = Arc::new(AppState::new(config.clone(), backend));

    // 启动后台任务
    start_background_tasks(app_state.clone());

    // 配置 CORS
    let origins = config
        .cors_allowed_origins
        .split(',')
        .filter_map(|origin| match origin.trim().parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect::<Vec<_>>();
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any)
        .allow_origin(origins);

    let router = app(app_state)
        .layer(cors)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http());

    // 启动主服务器
    let addr = format!("{}:{}", config.server_host, config.server_port);
    info!("Starting server on http://{}", addr);

    axum::Server::bind(&addr.parse()?)
        .serve(router.into_make_service())
        .await?;

    Ok(())
}

fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::new(&config.log_level);

    if config.log_format == "json" || config.is_production() {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

fn start_background_tasks(app_state: Arc<AppState>) {
    // 清理过期的用户缓存
    let auth_state = app_state.clone();
    tokio::spawn(async move {
        let period = auth_state.config.user_cache_ttl.max(60);
        let mut interval = interval(Duration::from_secs(period));

        loop {
            interval.tick().await;
            let removed = auth_state.auth_service.cleanup_expired_sessions().await;
            if removed > 0 {
                info!("Removed {} expired cached users", removed);
            }
        }
    });

    info!("Background tasks started successfully");
}
