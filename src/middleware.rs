//! Request guards wrapped around the HTTP API.
//!
//! - **RateLimit**: fixed-window request budget per client IP. Health checks
//!   are never counted.
//! - **security_headers**: hardening headers added to every response,
//!   rejections included.

use crate::config::RateLimitConfig;
use crate::server::error_response;
use actix_web::body::{BoxBody, EitherBody};
use actix_web::dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::http::header::{HeaderMap, HeaderName, HeaderValue, RETRY_AFTER};
use actix_web::middleware::DefaultHeaders;
use actix_web::Error;
use futures_util::future::LocalBoxFuture;
use log::warn;
use std::collections::HashMap;
use std::future::{ready, Ready};
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub const RATE_LIMIT_MESSAGE: &str = "Too many requests from this IP, please try again later.";

/// Paths that never count against a client's budget.
const EXEMPT_PATHS: &[&str] = &["/api/health"];

/// Expired windows are swept once this many clients are tracked.
const SWEEP_THRESHOLD: usize = 10_000;

/// Hardening headers for a JSON-only API. Headers a handler already set win.
pub fn security_headers() -> DefaultHeaders {
    DefaultHeaders::new()
        .add(("Content-Security-Policy", "default-src 'none'; frame-ancestors 'none'"))
        .add(("Cross-Origin-Opener-Policy", "same-origin"))
        .add(("Cross-Origin-Resource-Policy", "same-origin"))
        .add(("Referrer-Policy", "no-referrer"))
        .add(("Strict-Transport-Security", "max-age=15552000; includeSubDomains"))
        .add(("X-Content-Type-Options", "nosniff"))
        .add(("X-DNS-Prefetch-Control", "off"))
        .add(("X-Download-Options", "noopen"))
        .add(("X-Frame-Options", "SAMEORIGIN"))
        .add(("X-Permitted-Cross-Domain-Policies", "none"))
        .add(("X-XSS-Protection", "0"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed { remaining: u32, reset: Duration },
    Limited { reset: Duration },
}

#[derive(Debug)]
struct Window {
    started: Instant,
    hits: u32,
}

/// Counts requests per client in fixed windows that start at the client's
/// first request.
#[derive(Debug)]
pub struct FixedWindowLimiter {
    max_requests: u32,
    window: Duration,
    clients: Mutex<HashMap<Option<IpAddr>, Window>>,
}

impl FixedWindowLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            clients: Mutex::new(HashMap::new()),
        }
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    /// Record one request from `client`. Requests with no known peer share
    /// one budget.
    pub fn check(&self, client: Option<IpAddr>) -> RateDecision {
        self.check_at(client, Instant::now())
    }

    fn check_at(&self, client: Option<IpAddr>, now: Instant) -> RateDecision {
        let mut clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());
        if clients.len() >= SWEEP_THRESHOLD {
            let window = self.window;
            clients.retain(|_, w| now.duration_since(w.started) < window);
        }

        let entry = clients.entry(client).or_insert(Window {
            started: now,
            hits: 0,
        });
        if now.duration_since(entry.started) >= self.window {
            entry.started = now;
            entry.hits = 0;
        }

        let reset = self.window.saturating_sub(now.duration_since(entry.started));
        if entry.hits >= self.max_requests {
            return RateDecision::Limited { reset };
        }
        entry.hits += 1;
        RateDecision::Allowed {
            remaining: self.max_requests - entry.hits,
            reset,
        }
    }
}

/// Rate limit middleware factory. A zero budget disables it.
#[derive(Clone)]
pub struct RateLimit {
    limiter: Option<Arc<FixedWindowLimiter>>,
}

impl RateLimit {
    pub fn new(config: &RateLimitConfig) -> Self {
        let limiter = (config.max_requests > 0)
            .then(|| Arc::new(FixedWindowLimiter::new(config.max_requests, config.window)));
        Self { limiter }
    }
}

impl<S, B> Transform<S, ServiceRequest> for RateLimit
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B, BoxBody>>;
    type Error = Error;
    type InitError = ();
    type Transform = RateLimitMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RateLimitMiddleware {
            service,
            limiter: self.limiter.clone(),
        }))
    }
}

pub struct RateLimitMiddleware<S> {
    service: S,
    limiter: Option<Arc<FixedWindowLimiter>>,
}

impl<S, B> Service<ServiceRequest> for RateLimitMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B, BoxBody>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let exempt = EXEMPT_PATHS.contains(&req.path());
        let limiter = match &self.limiter {
            Some(limiter) if !exempt => limiter.clone(),
            _ => {
                let fut = self.service.call(req);
                return Box::pin(async move { Ok(fut.await?.map_into_left_body()) });
            }
        };

        // The socket peer, not a forwarded header: clients cannot pick
        // their own bucket.
        let client = req.peer_addr().map(|addr| addr.ip());
        let limit = limiter.max_requests();

        match limiter.check(client) {
            RateDecision::Allowed { remaining, reset } => {
                let fut = self.service.call(req);
                Box::pin(async move {
                    let mut res = fut.await?;
                    insert_budget_headers(res.headers_mut(), limit, remaining, reset);
                    Ok(res.map_into_left_body())
                })
            }
            RateDecision::Limited { reset } => {
                warn!(
                    "rate limit exceeded: client={} path={}",
                    client.map_or_else(|| "unknown".to_string(), |ip| ip.to_string()),
                    req.path()
                );
                let mut response = error_response(429, RATE_LIMIT_MESSAGE, None);
                insert_budget_headers(response.headers_mut(), limit, 0, reset);
                response
                    .headers_mut()
                    .insert(RETRY_AFTER, HeaderValue::from(whole_seconds(reset)));
                Box::pin(async move { Ok(req.into_response(response).map_into_right_body()) })
            }
        }
    }
}

fn insert_budget_headers(headers: &mut HeaderMap, limit: u32, remaining: u32, reset: Duration) {
    headers.insert(
        HeaderName::from_static("ratelimit-limit"),
        HeaderValue::from(limit),
    );
    headers.insert(
        HeaderName::from_static("ratelimit-remaining"),
        HeaderValue::from(remaining),
    );
    headers.insert(
        HeaderName::from_static("ratelimit-reset"),
        HeaderValue::from(whole_seconds(reset)),
    );
}

fn whole_seconds(duration: Duration) -> u64 {
    duration.as_secs() + u64::from(duration.subsec_nanos() > 0)
}
