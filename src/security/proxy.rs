//! Effective client address behind a reverse proxy.
//!
//! With `trust_proxy` enabled the first address of `X-Forwarded-For` wins;
//! otherwise the socket peer. Enabling trust without a proxy that rewrites the
//! header lets clients choose their own address (and rate-limit key).

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use async_trait::async_trait;
use axum::{
    body::Body,
    extract::{ConnectInfo, FromRequestParts},
    http::{request::Parts, Request},
};

use crate::config::schema::ProxyConfig;
use crate::pipeline::{Next, Stage, StageResult};

pub const X_FORWARDED_FOR: &str = "x-forwarded-for";
pub const X_FORWARDED_PROTO: &str = "x-forwarded-proto";

/// The resolved client, attached to every request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientAddr {
    pub ip: IpAddr,
    /// Scheme reported by a trusted proxy.
    pub forwarded_proto: Option<String>,
}

impl ClientAddr {
    /// Whether the client reached the proxy over TLS.
    pub fn is_https(&self) -> bool {
        self.forwarded_proto.as_deref() == Some("https")
    }
}

impl<S: Send + Sync> FromRequestParts<S> for ClientAddr {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts.extensions.get::<ClientAddr>().cloned().unwrap_or(ClientAddr {
            ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            forwarded_proto: None,
        }))
    }
}

/// Pick the effective client address.
pub fn resolve_client_ip(peer: Option<IpAddr>, forwarded_for: Option<&str>, trust_proxy: bool) -> IpAddr {
    let forwarded = forwarded_for
        .filter(|_| trust_proxy)
        .and_then(|chain| chain.split(',').find_map(|hop| parse_hop(hop.trim())));

    forwarded
        .or(peer)
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

fn parse_hop(hop: &str) -> Option<IpAddr> {
    hop.parse::<IpAddr>()
        .ok()
        .or_else(|| hop.parse::<SocketAddr>().ok().map(|a| a.ip()))
}

/// Stage 1: attach [`ClientAddr`].
pub struct ProxyTrust {
    trust_proxy: bool,
}

impl ProxyTrust {
    pub fn new(config: &ProxyConfig) -> Self {
        Self {
            trust_proxy: config.trust_proxy,
        }
    }
}

#[async_trait]
impl Stage for ProxyTrust {
    fn name(&self) -> &'static str {
        "proxy_trust"
    }

    async fn handle(&self, mut request: Request<Body>, next: Next) -> StageResult {
        let headers = request.headers();
        let peer = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());
        let forwarded_for = headers.get(X_FORWARDED_FOR).and_then(|v| v.to_str().ok());

        let ip = resolve_client_ip(peer, forwarded_for, self.trust_proxy);
        let forwarded_proto = if self.trust_proxy {
            headers
                .get(X_FORWARDED_PROTO)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(',').next())
                .map(|v| v.trim().to_ascii_lowercase())
        } else {
            None
        };

        request.extensions_mut().insert(ClientAddr { ip, forwarded_proto });
        Ok(next.run(request).await)
    }
}
