//! # Application Context and HTTP Server
//!
//! [`AppContext`] owns every long-lived component: the key-value store, the
//! cache service, the performance monitor and the background task tracker.
//! It is built once at startup, handed to whatever needs it, and shut down
//! explicitly.
//!
//! Middleware order on the assembled router, outermost first:
//! rate limiting, request timing, request tracing, then the routes.

use axum::{middleware::from_fn_with_state, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::admin::{create_performance_routes, PerformanceAdminState};
use crate::caching::{CacheService, InvalidationState, KeyValueStore, ResponseCacheState};
use crate::core::background::BackgroundTasks;
use crate::core::config::AppConfig;
use crate::core::error::{ServiceError, ServiceResult};
use crate::middleware::{rate_limit_middleware, timing_middleware, RateLimitState, TimingState};
use crate::observability::performance::PerformanceMonitor;

/// Mount point of the performance admin endpoints
pub const PERFORMANCE_ROUTES_PREFIX: &str = "/api/performance";

#[derive(Debug, Clone)]
pub struct AppContext {
    pub config: AppConfig,
    pub store: Arc<KeyValueStore>,
    pub cache: CacheService,
    pub monitor: Arc<PerformanceMonitor>,
    pub tasks: BackgroundTasks,
}

impl AppContext {
    /// Build every component from `config` and start connecting the store
    /// in the background. Requests are served without cache until the
    /// connection is up; an unreachable store leaves it that way.
    pub async fn initialize(config: AppConfig) -> ServiceResult<Self> {
        config.validate()?;

        let store = Arc::new(KeyValueStore::from_config(&config.redis));
        let context = Self::with_store(config, store.clone());

        context.tasks.spawn("store_connect", async move {
            if store.connect().await {
                info!(backend = store.backend_name(), "Cache store connected");
            } else {
                warn!(backend = store.backend_name(), "Running without a reachable cache store");
            }
            Ok(())
        });

        Ok(context)
    }

    /// Build the components around an existing store without connecting it.
    pub fn with_store(config: AppConfig, store: Arc<KeyValueStore>) -> Self {
        let tasks = BackgroundTasks::new();
        let cache = CacheService::new(store.clone());
        let monitor = Arc::new(PerformanceMonitor::from_settings(
            &config.performance,
            store.clone(),
            tasks.clone(),
        ));

        Self {
            config,
            store,
            cache,
            monitor,
            tasks,
        }
    }

    /// State for the response cache middleware, using the configured TTL
    pub fn response_cache_state(&self) -> ResponseCacheState {
        ResponseCacheState::new(self.store.clone(), self.tasks.clone())
            .with_ttl(self.config.cache.response_ttl)
            .with_max_body_bytes(self.config.cache.max_body_bytes)
    }

    /// State for the invalidation middleware over `patterns`
    pub fn invalidation_state<I, S>(&self, patterns: I) -> InvalidationState
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        InvalidationState::new(self.store.clone(), self.tasks.clone(), patterns)
    }

    pub fn admin_state(&self) -> PerformanceAdminState {
        PerformanceAdminState::new(self.cache.clone(), self.monitor.clone(), self.tasks.clone())
    }

    /// Wrap the caller's routes and the performance endpoints in the
    /// rate-limit, timing and trace layers.
    pub fn router(&self, api: Router) -> Router {
        let rate_limit = RateLimitState::from_settings(
            self.cache.rate_limiter().clone(),
            &self.config.rate_limit,
        );
        let timing = TimingState::new(self.monitor.clone());

        api.nest(
            PERFORMANCE_ROUTES_PREFIX,
            create_performance_routes().with_state(self.admin_state()),
        )
        .layer(TraceLayer::new_for_http())
        .layer(from_fn_with_state(timing, timing_middleware))
        .layer(from_fn_with_state(rate_limit, rate_limit_middleware))
    }

    /// Wait for background tasks, bounded by the configured shutdown
    /// timeout, then disconnect the store.
    pub async fn shutdown(&self) {
        let pending = self.tasks.pending();
        info!(pending, "Draining background tasks");

        if tokio::time::timeout(self.config.server.shutdown_timeout, self.tasks.shutdown())
            .await
            .is_err()
        {
            warn!(
                pending = self.tasks.pending(),
                "Background tasks still running at shutdown timeout"
            );
        }

        self.store.disconnect().await;
        info!("Application context shut down");
    }
}

/// Bind the configured address and serve `api` until Ctrl-C or SIGTERM,
/// then shut the context down.
pub async fn serve(context: AppContext, api: Router) -> ServiceResult<()> {
    let addr = format!(
        "{}:{}",
        context.config.server.bind_address, context.config.server.port
    );
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| ServiceError::internal(format!("Failed to bind server to {}: {}", addr, e)))?;

    info!(address = %addr, "HTTP server listening");

    let app = context.router(api);
    let result = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await;

    context.shutdown().await;

    result.map_err(|e| ServiceError::internal(format!("Server error: {}", e)))
}

/// Resolves on Ctrl-C or, on unix, SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
