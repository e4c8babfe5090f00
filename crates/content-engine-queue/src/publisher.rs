//! Publisher seam: the platform-specific network call behind a trait.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::{Credentials, Platform};

/// Errors from a publish attempt.
#[derive(Debug, Error)]
pub enum PublishError {
    /// Transport failure: connect, timeout, body read.
    #[error("network error: {0}")]
    Network(String),

    /// The platform answered with a non-success status.
    #[error("{platform} API error ({status}): {message}")]
    Api {
        platform: Platform,
        status: u16,
        message: String,
    },

    /// The platform accepted the post but the response was unusable.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Content exceeds the platform's length limit.
    #[error("content too long: {length} characters (limit {limit})")]
    ContentTooLong { length: usize, limit: usize },

    /// No stored credentials for the platform.
    #[error("no credentials stored for {0}")]
    MissingCredentials(Platform),

    /// No publisher is registered for the platform.
    #[error("unsupported platform: {0}")]
    Unsupported(Platform),
}

impl PublishError {
    /// Whether another attempt could plausibly succeed.
    ///
    /// Unsupported platforms and over-length content fail the same way every
    /// time, so they skip the backoff schedule.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            PublishError::Unsupported(_) | PublishError::ContentTooLong { .. }
        )
    }
}

/// Publishes content to one platform and returns the platform's id for it.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// The platform this publisher talks to.
    fn platform(&self) -> Platform;

    /// Publish `content` using `credentials`.
    async fn publish(&self, content: &str, credentials: &Credentials)
    -> Result<String, PublishError>;
}

/// Map from platform to its publisher.
#[derive(Clone, Default)]
pub struct PublisherRegistry {
    publishers: HashMap<Platform, Arc<dyn Publisher>>,
}

impl PublisherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `publisher` under its own platform, replacing any previous one.
    pub fn register(&mut self, publisher: Arc<dyn Publisher>) -> &mut Self {
        self.publishers.insert(publisher.platform(), publisher);
        self
    }

    /// Builder form of [`register`](Self::register).
    pub fn with(mut self, publisher: Arc<dyn Publisher>) -> Self {
        self.register(publisher);
        self
    }

    /// The publisher for `platform`.
    pub fn get(&self, platform: Platform) -> Result<Arc<dyn Publisher>, PublishError> {
        self.publishers
            .get(&platform)
            .cloned()
            .ok_or(PublishError::Unsupported(platform))
    }

    /// Platforms with a registered publisher.
    pub fn platforms(&self) -> Vec<Platform> {
        Platform::ALL
            .iter()
            .copied()
            .filter(|p| self.publishers.contains_key(p))
            .collect()
    }
}

impl std::fmt::Debug for PublisherRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublisherRegistry")
            .field("platforms", &self.platforms())
            .finish()
    }
}
