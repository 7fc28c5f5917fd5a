use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::gateway::ServerGateway;
use crate::repository::FlagsRepository;

/// Runs one synchronization pass.
#[async_trait]
pub trait FeatureFlagLoader: Send + Sync {
    async fn load_flags(&self, cancel: &CancellationToken) -> Result<()>;
}

/// Fetches the flag set from the server and replaces the local cache with it.
pub struct FlagLoader {
    offline: bool,
    gateway: Arc<dyn ServerGateway>,
    repository: Arc<dyn FlagsRepository>,
}

impl FlagLoader {
    pub fn new(
        offline: bool,
        gateway: Arc<dyn ServerGateway>,
        repository: Arc<dyn FlagsRepository>,
    ) -> Self {
        Self {
            offline,
            gateway,
            repository,
        }
    }
}

#[async_trait]
impl FeatureFlagLoader for FlagLoader {
    async fn load_flags(&self, cancel: &CancellationToken) -> Result<()> {
        if self.offline {
            tracing::warn!(
                "provider is running offline, skipping the loading of feature flags from the Grapio server"
            );
            return Ok(());
        }

        tracing::info!("loading feature flags from the Grapio server");
        let flags = self.gateway.fetch_feature_flags(cancel).await?;
        let count = flags.len();

        tracing::info!(count, "saving feature flags from the Grapio server");
        self.repository.save_flags(flags, cancel).await?;
        Ok(())
    }
}
