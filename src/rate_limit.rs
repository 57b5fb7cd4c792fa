use std::net::SocketAddr;
use std::time::{Duration, Instant};

use axum::{
    extract::{ConnectInfo, MatchedPath, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::{debug, warn};

use crate::{cache::TtlCache, config::RateLimitConfig, error::AppError, state::AppState};

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u32,
    resets_at: Instant,
}

/// Fixed-window request counter keyed by client, method and route.
pub struct RateLimiter {
    windows: TtlCache<String, Window>,
    max: u32,
    window: Duration,
}

impl RateLimiter {
    pub fn new(cfg: &RateLimitConfig) -> Self {
        Self {
            windows: TtlCache::new(),
            max: cfg.max_requests,
            window: Duration::from_secs(cfg.window_secs.max(1)),
        }
    }

    pub fn check(&self, key: &str) -> Result<(), AppError> {
        self.check_at(key, Instant::now())
    }

    pub fn sweep(&self) -> usize {
        self.windows.sweep()
    }

    fn check_at(&self, key: &str, now: Instant) -> Result<(), AppError> {
        let (max, window) = (self.max, self.window);
        self.windows
            .try_update_at(key.to_string(), now, |live| {
                let current = live.copied().unwrap_or(Window {
                    count: 0,
                    resets_at: now + window,
                });
                if current.count >= max {
                    let retry_after_secs =
                        current.resets_at.saturating_duration_since(now).as_secs().max(1);
                    return Err(AppError::TooManyRequests { retry_after_secs });
                }
                let ttl = current.resets_at.saturating_duration_since(now);
                Ok((
                    Window {
                        count: current.count + 1,
                        ..current
                    },
                    ttl,
                ))
            })
            .map(|_| ())
    }
}

fn client_ip(req: &Request) -> String {
    if let Some(ConnectInfo(addr)) = req.extensions().get::<ConnectInfo<SocketAddr>>() {
        return addr.ip().to_string();
    }
    req.headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

pub async fn throttle(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());
    let key = format!("{}|{}|{}", client_ip(&req), req.method(), route);

    if let Err(e) = state.limiter.check(&key) {
        warn!(%key, "rate limit exceeded");
        return e.into_response();
    }
    next.run(req).await
}

/// Periodically drops expired windows so idle clients do not accumulate.
pub fn spawn_sweeper(state: AppState) {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(60));
        loop {
            tick.tick().await;
            let evicted = state.limiter.sweep();
            if evicted > 0 {
                debug!(evicted, "rate limit windows swept");
            }
        }
    });
}
