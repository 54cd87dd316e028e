//! Per-client request rate limits for sign-in and job intake.

use std::convert::Infallible;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::num::NonZeroU32;

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::request::Parts;
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};

use super::api::ApiError;

/// Address of the connected peer. Forwarding headers are not trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientIp(pub IpAddr);

impl<S> FromRequestParts<S> for ClientIp
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let ip = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip())
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        Ok(ClientIp(ip))
    }
}

pub struct RateLimits {
    auth: Option<DefaultKeyedRateLimiter<IpAddr>>,
    jobs: Option<DefaultKeyedRateLimiter<IpAddr>>,
}

impl RateLimits {
    /// A zero rate disables that limit.
    pub fn new(auth_per_minute: u32, jobs_per_hour: u32) -> Self {
        Self {
            auth: NonZeroU32::new(auth_per_minute)
                .map(|n| RateLimiter::keyed(Quota::per_minute(n))),
            jobs: NonZeroU32::new(jobs_per_hour).map(|n| RateLimiter::keyed(Quota::per_hour(n))),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(0, 0)
    }

    pub fn check_auth(&self, ip: IpAddr) -> Result<(), ApiError> {
        check(self.auth.as_ref(), ip, "sign-in")
    }

    pub fn check_jobs(&self, ip: IpAddr) -> Result<(), ApiError> {
        check(self.jobs.as_ref(), ip, "job submission")
    }

    /// Drop state for clients whose quota has fully replenished.
    pub fn compact(&self) {
        for limiter in [&self.auth, &self.jobs].into_iter().flatten() {
            limiter.retain_recent();
        }
    }
}

fn check(
    limiter: Option<&DefaultKeyedRateLimiter<IpAddr>>,
    ip: IpAddr,
    what: &str,
) -> Result<(), ApiError> {
    match limiter {
        Some(limiter) if limiter.check_key(&ip).is_err() => {
            tracing::warn!(%ip, what, "rate limit exceeded");
            Err(ApiError::TooManyRequests(format!(
                "Too many {} requests; try again later",
                what
            )))
        }
        _ => Ok(()),
    }
}
