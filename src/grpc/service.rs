//! Rate limit service implementation.

use std::net::SocketAddr;
use std::sync::Arc;
use tonic::metadata::MetadataMap;
use tonic::{Request, Response, Status};
use tracing::{debug, info, instrument, warn};

use super::proto::tollgate::v1::{
    rate_limit_service_server::RateLimitService, CheckRequest, CheckResponse, ResetRequest,
    ResetResponse, TierUsage, UsageRequest, UsageResponse,
};

use crate::error::TollgateError;
use crate::ratelimit::RateLimiter;

/// Identifier used when a caller cannot be identified at all.
const UNKNOWN_CLIENT: &str = "unknown";

/// Implementation of the Tollgate RateLimitService gRPC interface.
pub struct RateLimitServiceImpl {
    /// The rate limiter instance
    rate_limiter: Arc<RateLimiter>,
}

impl RateLimitServiceImpl {
    /// Create a new RateLimitServiceImpl with the given rate limiter.
    pub fn new(rate_limiter: Arc<RateLimiter>) -> Self {
        Self { rate_limiter }
    }
}

/// Derive a caller identity from proxy headers, falling back to the peer address.
///
/// The first hop of `x-forwarded-for` wins over `x-real-ip`.
pub fn client_identifier(metadata: &MetadataMap, peer: Option<SocketAddr>) -> String {
    let forwarded = header(metadata, "x-forwarded-for")
        .and_then(|value| value.split(',').map(str::trim).find(|hop| !hop.is_empty()));

    forwarded
        .or_else(|| header(metadata, "x-real-ip"))
        .map(str::to_string)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}

fn header<'a>(metadata: &'a MetadataMap, name: &str) -> Option<&'a str> {
    metadata
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn to_status(err: TollgateError) -> Status {
    match err {
        TollgateError::InvalidPolicy(msg) => Status::invalid_argument(msg),
        TollgateError::UnknownScope(scope) => {
            Status::not_found(format!("no rate limit policy for scope '{}'", scope))
        }
        TollgateError::Store(e) => Status::unavailable(e.to_string()),
        other => Status::internal(other.to_string()),
    }
}

fn require(field: &str, value: &str) -> Result<(), Status> {
    if value.is_empty() {
        warn!(field = field, "Received rate limit request with empty field");
        return Err(Status::invalid_argument(format!("{} is required", field)));
    }
    Ok(())
}

#[tonic::async_trait]
impl RateLimitService for RateLimitServiceImpl {
    /// Count one request and decide whether it may proceed.
    #[instrument(
        skip(self, request),
        fields(
            scope = %request.get_ref().scope,
            max_attempts = request.get_ref().max_attempts,
            window_seconds = request.get_ref().window_seconds
        )
    )]
    async fn check(
        &self,
        request: Request<CheckRequest>,
    ) -> Result<Response<CheckResponse>, Status> {
        let identifier = if request.get_ref().identifier.is_empty() {
            client_identifier(request.metadata(), request.remote_addr())
        } else {
            request.get_ref().identifier.clone()
        };
        let req = request.into_inner();

        require("scope", &req.scope)?;

        debug!(
            scope = %req.scope,
            identifier = %identifier,
            "Processing rate limit check"
        );

        let decision = match (req.max_attempts, req.window_seconds) {
            (0, 0) => self.rate_limiter.check_named(&req.scope, &identifier).await,
            (max_attempts, window_seconds) => {
                self.rate_limiter
                    .check(&req.scope, &identifier, max_attempts, window_seconds)
                    .await
            }
        }
        .map_err(to_status)?;

        let retry_after_seconds = if decision.admitted {
            0
        } else {
            decision.retry_after_secs(self.rate_limiter.now())
        };

        info!(
            scope = %req.scope,
            identifier = %identifier,
            admitted = decision.admitted,
            remaining = decision.remaining,
            "Rate limit decision made"
        );

        Ok(Response::new(CheckResponse {
            admitted: decision.admitted,
            remaining: decision.remaining,
            limit: decision.limit,
            reset_at_unix_ms: decision.reset_at.timestamp_millis(),
            retry_after_seconds,
        }))
    }

    /// Report per-tier usage for the scope's configured policy.
    #[instrument(skip(self, request), fields(scope = %request.get_ref().scope))]
    async fn usage(
        &self,
        request: Request<UsageRequest>,
    ) -> Result<Response<UsageResponse>, Status> {
        let req = request.into_inner();
        require("scope", &req.scope)?;
        require("identifier", &req.identifier)?;

        let report = self
            .rate_limiter
            .usage_named(&req.scope, &req.identifier)
            .await
            .map_err(to_status)?;

        let tiers = report
            .into_iter()
            .map(|(label, usage)| TierUsage {
                label,
                used: usage.used,
                limit: usage.limit,
                remaining: usage.remaining,
                reset_at_unix_ms: usage.reset_at.map_or(0, |at| at.timestamp_millis()),
            })
            .collect();

        Ok(Response::new(UsageResponse { tiers }))
    }

    /// Drop every counter of the scope's configured policy.
    #[instrument(skip(self, request), fields(scope = %request.get_ref().scope))]
    async fn reset(
        &self,
        request: Request<ResetRequest>,
    ) -> Result<Response<ResetResponse>, Status> {
        let req = request.into_inner();
        require("scope", &req.scope)?;
        require("identifier", &req.identifier)?;

        let cleared = self
            .rate_limiter
            .reset_named(&req.scope, &req.identifier)
            .await
            .map_err(to_status)?;

        info!(
            scope = %req.scope,
            identifier = %req.identifier,
            cleared = cleared,
            "Rate limit entries reset"
        );

        Ok(Response::new(ResetResponse {
            cleared: u32::try_from(cleared).unwrap_or(u32::MAX),
        }))
    }
}
