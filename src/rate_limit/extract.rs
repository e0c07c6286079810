use std::{marker::PhantomData, net::SocketAddr};

use axum::{
    async_trait,
    extract::{ConnectInfo, FromRequestParts, MatchedPath},
    http::request::Parts,
};

use super::{Decision, RouteQuota};
use crate::{
    auth::{claims::TokenKind, extractors::bearer_token},
    config::RateLimitConfig,
    error::AppError,
    state::AppState,
};

/// What a route's counters are keyed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Identity {
    /// Client network address.
    Peer,
    /// Subject of a valid access token, falling back to the peer address.
    Subject,
}

/// A family of routes sharing one configured quota.
pub trait RouteClass: Send + Sync + 'static {
    const IDENTITY: Identity;
    fn quota(cfg: &RateLimitConfig) -> RouteQuota;
}

macro_rules! route_class {
    ($name:ident, $field:ident, $identity:expr) => {
        pub struct $name;

        impl RouteClass for $name {
            const IDENTITY: Identity = $identity;
            fn quota(cfg: &RateLimitConfig) -> RouteQuota {
                cfg.$field
            }
        }
    };
}

route_class!(ReadContacts, read, Identity::Peer);
route_class!(CreateContact, create, Identity::Peer);
route_class!(UpdateContact, update, Identity::Peer);
route_class!(DeleteContact, delete, Identity::Peer);
route_class!(ViewProfile, profile, Identity::Subject);
route_class!(ChangeAvatar, avatar, Identity::Subject);

/// Admission guard. Put it first in a handler's arguments so it runs before authentication.
pub struct Throttle<R>(PhantomData<fn() -> R>);

#[async_trait]
impl<R: RouteClass> FromRequestParts<AppState> for Throttle<R> {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let identity = match R::IDENTITY {
            Identity::Subject => bearer_token(&parts.headers)
                .and_then(|t| state.keys.decode(t, TokenKind::Access).ok())
                .map(|subject| format!("user:{subject}"))
                .unwrap_or_else(|| peer_identity(parts)),
            Identity::Peer => peer_identity(parts),
        };
        let path = parts
            .extensions
            .get::<MatchedPath>()
            .map(|p| p.as_str().to_string())
            .unwrap_or_else(|| parts.uri.path().to_string());
        let route_key = format!("{} {}", parts.method, path);

        let quota = R::quota(&state.config.rate_limit);
        match state.limiter.admit(&identity, &route_key, quota).await? {
            Decision::Allowed { .. } => Ok(Throttle(PhantomData)),
            Decision::Limited { retry_after_secs } => Err(AppError::RateLimited { retry_after_secs }),
        }
    }
}

fn peer_identity(parts: &Parts) -> String {
    parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| format!("ip:{}", addr.ip()))
        .unwrap_or_else(|| "ip:unknown".to_string())
}
