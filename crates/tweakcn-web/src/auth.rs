//! Caller identity.
//!
//! Sessions live in the authentication service, not here.  The server only
//! asks "who is this?" by forwarding the caller's credentials to a session
//! endpoint; any failure means the caller is anonymous.

use async_trait::async_trait;
use axum::http::HeaderMap;
use axum::http::header::{AUTHORIZATION, CACHE_CONTROL, COOKIE};
use serde::Deserialize;

/// Resolves the caller of a request to a user id.
#[async_trait]
pub trait SessionResolver: Send + Sync {
    async fn resolve(&self, headers: &HeaderMap) -> Option<String>;
}

/// Treats every caller as anonymous.
#[derive(Debug, Default, Clone, Copy)]
pub struct AnonymousSessions;

#[async_trait]
impl SessionResolver for AnonymousSessions {
    async fn resolve(&self, _headers: &HeaderMap) -> Option<String> {
        None
    }
}

#[derive(Deserialize)]
struct SessionUser {
    id: String,
}

#[derive(Deserialize)]
struct SessionBody {
    user: Option<SessionUser>,
}

/// Looks sessions up at a remote endpoint (`GET`, credentials forwarded,
/// never cached).  The endpoint answers `{"user": {"id": ...}}` or `null`.
#[derive(Debug, Clone)]
pub struct RemoteSessionResolver {
    http: reqwest::Client,
    url: String,
}

impl RemoteSessionResolver {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: url.into(),
        }
    }

    async fn lookup(&self, headers: &HeaderMap) -> Result<Option<String>, reqwest::Error> {
        let mut request = self.http.get(&self.url).header(CACHE_CONTROL, "no-store");
        for name in [COOKIE, AUTHORIZATION] {
            if let Some(value) = headers.get(&name) {
                request = request.header(name, value.clone());
            }
        }

        let resp = request.send().await?.error_for_status()?;
        let body: Option<SessionBody> = resp.json().await?;
        Ok(body.and_then(|b| b.user).map(|u| u.id))
    }
}

#[async_trait]
impl SessionResolver for RemoteSessionResolver {
    async fn resolve(&self, headers: &HeaderMap) -> Option<String> {
        if !headers.contains_key(COOKIE) && !headers.contains_key(AUTHORIZATION) {
            return None;
        }
        match self.lookup(headers).await {
            Ok(user) => user,
            Err(e) => {
                tracing::warn!(error = %e, "session lookup failed, treating caller as anonymous");
                None
            }
        }
    }
}
