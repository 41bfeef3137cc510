//! Authentication and per-topic authorization
//!
//! Credentials arrive as HTTP Basic, or as a base64-encoded `auth` query
//! parameter carrying the same header value (browser WebSocket clients cannot
//! set headers on the upgrade request). The provider itself is the injected
//! [`Auther`] trait; the default [`AllowAll`] accepts everyone.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use axum::http::HeaderMap;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use thiserror::Error;

use super::types::ApiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    Read,
    Write,
}

/// Authenticated identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub name: String,
}

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("access to topic denied")]
    Forbidden,
}

#[async_trait]
pub trait Auther: Send + Sync {
    /// Verify a username/password pair
    async fn authenticate(&self, username: &str, password: &str) -> Result<User, AuthError>;

    /// Check whether a (possibly anonymous) user may read or write a topic
    async fn authorize(
        &self,
        user: Option<&User>,
        topic: &str,
        permission: Permission,
    ) -> Result<(), AuthError>;
}

/// Default provider: everyone may do everything.
pub struct AllowAll;

#[async_trait]
impl Auther for AllowAll {
    async fn authenticate(&self, username: &str, _password: &str) -> Result<User, AuthError> {
        Ok(User {
            name: username.to_string(),
        })
    }

    async fn authorize(
        &self,
        _user: Option<&User>,
        _topic: &str,
        _permission: Permission,
    ) -> Result<(), AuthError> {
        Ok(())
    }
}

/// In-memory provider with explicit users and per-topic grants. Topics with
/// no grant entry are open to everyone.
#[derive(Default)]
pub struct MemoryAuther {
    users: HashMap<String, String>,
    grants: HashMap<String, HashSet<(String, Permission)>>,
}

impl MemoryAuther {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, name: &str, password: &str) -> Self {
        self.users.insert(name.to_string(), password.to_string());
        self
    }

    /// Restrict a topic; only listed (user, permission) pairs pass.
    pub fn with_grant(mut self, topic: &str, user: &str, permission: Permission) -> Self {
        self.grants
            .entry(topic.to_string())
            .or_default()
            .insert((user.to_string(), permission));
        self
    }

    /// Restrict a topic without granting anyone access.
    pub fn with_protected_topic(mut self, topic: &str) -> Self {
        self.grants.entry(topic.to_string()).or_default();
        self
    }
}

#[async_trait]
impl Auther for MemoryAuther {
    async fn authenticate(&self, username: &str, password: &str) -> Result<User, AuthError> {
        match self.users.get(username) {
            Some(stored) if stored == password => Ok(User {
                name: username.to_string(),
            }),
            _ => Err(AuthError::InvalidCredentials),
        }
    }

    async fn authorize(
        &self,
        user: Option<&User>,
        topic: &str,
        permission: Permission,
    ) -> Result<(), AuthError> {
        let Some(granted) = self.grants.get(topic) else {
            return Ok(());
        };
        match user {
            Some(user) if granted.contains(&(user.name.clone(), permission)) => Ok(()),
            _ => Err(AuthError::Forbidden),
        }
    }
}

/// Pull Basic credentials from the Authorization header, falling back to the
/// base64-encoded `auth` query parameter.
pub fn extract_credentials(
    headers: &HeaderMap,
    query: &HashMap<String, String>,
) -> Option<(String, String)> {
    let header_value = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| {
            let encoded = query.get("auth")?;
            let decoded = BASE64.decode(encoded).ok()?;
            String::from_utf8(decoded).ok()
        })?;

    let encoded = header_value.strip_prefix("Basic ")?;
    let decoded = BASE64.decode(encoded).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, pass) = decoded.split_once(':')?;
    Some((user.to_string(), pass.to_string()))
}

/// Authenticate the request (if credentials are present) and authorize the
/// requested permission on every topic. Missing credentials stay anonymous;
/// an authorization failure maps to 401 for anonymous callers and 403 for
/// authenticated ones.
pub async fn authorize_topics(
    auther: &dyn Auther,
    headers: &HeaderMap,
    query: &HashMap<String, String>,
    topics: &[&str],
    permission: Permission,
) -> Result<Option<User>, ApiError> {
    let user = match extract_credentials(headers, query) {
        Some((username, password)) => Some(
            auther
                .authenticate(&username, &password)
                .await
                .map_err(|_| ApiError::unauthorized())?,
        ),
        None => None,
    };

    for topic in topics {
        if auther
            .authorize(user.as_ref(), topic, permission)
            .await
            .is_err()
        {
            return Err(if user.is_some() {
                ApiError::forbidden()
            } else {
                ApiError::unauthorized()
            });
        }
    }
    Ok(user)
}
