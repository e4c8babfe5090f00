//! Platform publishers for the Content Engine queue.
//!
//! Only LinkedIn publishing is implemented. Twitter and blog posts have no
//! publisher, so the worker fails their jobs as unsupported.

mod linkedin;

use std::sync::Arc;

use content_engine_queue::{PublishError, PublisherRegistry};

pub use linkedin::{DEFAULT_API_BASE, LinkedInPublisher, MAX_CONTENT_CHARS};

/// Where each publisher sends its requests.
#[derive(Debug, Clone)]
pub struct PublishConfig {
    pub linkedin_api_base: String,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            linkedin_api_base: DEFAULT_API_BASE.to_string(),
        }
    }
}

/// Registry with every implemented publisher.
pub fn default_registry(config: &PublishConfig) -> Result<PublisherRegistry, PublishError> {
    let linkedin = LinkedInPublisher::new(config.linkedin_api_base.clone())?;
    Ok(PublisherRegistry::new().with(Arc::new(linkedin)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use content_engine_queue::Platform;

    #[test]
    fn test_default_registry_platforms() {
        let registry = default_registry(&PublishConfig::default()).unwrap();
        assert_eq!(registry.platforms(), vec![Platform::LinkedIn]);
        assert!(matches!(
            registry.get(Platform::Blog),
            Err(PublishError::Unsupported(Platform::Blog))
        ));
    }
}
