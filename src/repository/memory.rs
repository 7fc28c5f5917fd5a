use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use super::FlagsRepository;
use crate::error::{Error, Result};
use crate::flag::{FeatureFlag, FlagValue};

/// In-memory flag cache backed by a `RwLock<HashMap>`.
///
/// Nothing survives the process. Saves build the new map first and swap it
/// in under the write lock, so readers see either the old or the new set.
#[derive(Default)]
pub struct MemoryFlagsRepository {
    data: RwLock<HashMap<String, FlagValue>>,
}

impl MemoryFlagsRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.data.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.data.read().await.is_empty()
    }
}

#[async_trait]
impl FlagsRepository for MemoryFlagsRepository {
    async fn save_flags(&self, flags: Vec<FeatureFlag>, cancel: &CancellationToken) -> Result<()> {
        let mut replacement = HashMap::with_capacity(flags.len());
        for flag in flags {
            if cancel.is_cancelled() {
                tracing::info!("discarding feature flag replacement, cancellation was requested");
                return Err(Error::Cancelled);
            }
            let (key, value) = flag.into_parts();
            replacement.insert(key, value);
        }

        *self.data.write().await = replacement;
        Ok(())
    }

    async fn fetch_flag(
        &self,
        key: &str,
        _cancel: &CancellationToken,
    ) -> Result<(bool, FeatureFlag)> {
        if key.is_empty() {
            return Err(Error::invalid_argument("flag key must not be empty"));
        }

        let data = self.data.read().await;
        match data.get(key) {
            Some(value) => Ok((true, FeatureFlag::new(key, value.clone())?)),
            None => Ok((false, FeatureFlag::null())),
        }
    }
}
