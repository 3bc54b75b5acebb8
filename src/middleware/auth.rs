//! API key authentication middleware

use axum::{
    body::Body,
    http::{header::AUTHORIZATION, Request},
    response::{IntoResponse, Response},
};
use futures::future::BoxFuture;
use std::{
    collections::HashSet,
    sync::Arc,
    task::{Context, Poll},
};
use tower::{Layer, Service};
use tracing::warn;

use crate::config::AuthConfig;
use crate::error::AppError;

/// Paths that are served without a key
const PUBLIC_PATHS: &[&str] = &["/health"];

/// Authentication layer
#[derive(Clone)]
pub struct AuthLayer {
    api_keys: Arc<HashSet<String>>,
}

impl AuthLayer {
    /// An empty key list lets every request through
    pub fn new(api_keys: Vec<String>) -> Self {
        Self {
            api_keys: Arc::new(api_keys.into_iter().filter(|k| !k.is_empty()).collect()),
        }
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        if config.enabled {
            Self::new(config.api_keys.clone())
        } else {
            Self::new(vec![])
        }
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthMiddleware {
            inner,
            api_keys: self.api_keys.clone(),
        }
    }
}

/// Authentication middleware service
#[derive(Clone)]
pub struct AuthMiddleware<S> {
    inner: S,
    api_keys: Arc<HashSet<String>>,
}

impl<S> AuthMiddleware<S> {
    fn check(&self, request: &Request<Body>) -> Result<(), AppError> {
        if self.api_keys.is_empty() || PUBLIC_PATHS.contains(&request.uri().path()) {
            return Ok(());
        }

        let key = request
            .headers()
            .get(AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .map(|h| h.strip_prefix("Bearer ").unwrap_or(h).trim());

        match key {
            Some(key) if self.api_keys.contains(key) => Ok(()),
            Some(_) => {
                warn!("Invalid API key provided");
                Err(AppError::AuthenticationFailed("Invalid API key".to_string()))
            }
            None => {
                warn!("No API key provided");
                Err(AppError::AuthenticationFailed(
                    "API key required. Provide via Authorization header: 'Bearer YOUR_API_KEY'".to_string(),
                ))
            }
        }
    }
}

impl<S> Service<Request<Body>> for AuthMiddleware<S>
where
    S: Service<Request<Body>, Response = Response> + Send + Clone + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        match self.check(&request) {
            Ok(()) => Box::pin(self.inner.call(request)),
            Err(e) => Box::pin(async move { Ok(e.into_response()) }),
        }
    }
}
