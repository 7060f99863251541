//! # Shared Request Types
//!
//! Small types that travel in request extensions between the authentication
//! layer of the host application and the middleware in this crate.

use axum::extract::{ConnectInfo, Request};
use std::net::SocketAddr;

/// Identity of the caller, inserted into request extensions by the host
/// application's authentication middleware.
///
/// The cache, rate-limit and timing middleware only read it; requests without
/// it are treated as anonymous.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub user_id: String,
}

impl AuthenticatedUser {
    pub fn new<S: Into<String>>(user_id: S) -> Self {
        Self {
            user_id: user_id.into(),
        }
    }
}

/// User id of the authenticated caller, if any.
pub fn request_user_id(request: &Request) -> Option<String> {
    request
        .extensions()
        .get::<AuthenticatedUser>()
        .map(|user| user.user_id.clone())
}

/// Best-effort client address: `X-Forwarded-For`, then `X-Real-IP`, then the
/// socket peer address when the server was started with connect info.
pub fn extract_client_ip(request: &Request) -> String {
    if let Some(forwarded) = request.headers().get("x-forwarded-for") {
        if let Ok(forwarded_str) = forwarded.to_str() {
            if let Some(ip) = forwarded_str.split(',').next() {
                let ip = ip.trim();
                if !ip.is_empty() {
                    return ip.to_string();
                }
            }
        }
    }

    if let Some(real_ip) = request.headers().get("x-real-ip") {
        if let Ok(ip_str) = real_ip.to_str() {
            return ip_str.trim().to_string();
        }
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    #[test]
    fn test_forwarded_for_takes_first_hop() {
        let request = Request::builder()
            .uri("/")
            .header("x-forwarded-for", "10.0.0.1, 172.16.0.1")
            .body(Body::empty())
            .unwrap();
        assert_eq!(extract_client_ip(&request), "10.0.0.1");
    }

    #[test]
    fn test_connect_info_fallback() {
        let mut request = Request::builder().uri("/").body(Body::empty()).unwrap();
        let addr: SocketAddr = "1.2.3.4:5555".parse().unwrap();
        request.extensions_mut().insert(ConnectInfo(addr));
        assert_eq!(extract_client_ip(&request), "1.2.3.4");
    }

    #[test]
    fn test_unknown_client() {
        let request = Request::builder().uri("/").body(Body::empty()).unwrap();
        assert_eq!(extract_client_ip(&request), "unknown");
        assert_eq!(request_user_id(&request), None);
    }

    #[test]
    fn test_authenticated_user_extension() {
        let mut request = Request::builder().uri("/").body(Body::empty()).unwrap();
        request.extensions_mut().insert(AuthenticatedUser::new("u1"));
        assert_eq!(request_user_id(&request).as_deref(), Some("u1"));
    }
}
