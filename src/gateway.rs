use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::builders::BuilderRegistry;
use crate::connection::{FlagStream, ServerConnection};
use crate::error::{Error, Result};
use crate::flag::FeatureFlag;
use crate::proto::FeatureFlagReply;

/// Source of the full flag set.
#[async_trait]
pub trait ServerGateway: Send + Sync {
    async fn fetch_feature_flags(&self, cancel: &CancellationToken) -> Result<Vec<FeatureFlag>>;
}

/// Gateway that downloads flags over a [`ServerConnection`] and converts
/// them with a [`BuilderRegistry`].
///
/// A fetch either yields every record of a successfully completed stream or
/// fails; it never hands back part of a stream.
pub struct GrapioServerGateway {
    connection: Arc<dyn ServerConnection>,
    builders: BuilderRegistry,
    requester: String,
}

impl GrapioServerGateway {
    pub fn new(
        connection: Arc<dyn ServerConnection>,
        builders: BuilderRegistry,
        requester: impl Into<String>,
    ) -> Self {
        Self {
            connection,
            builders,
            requester: requester.into(),
        }
    }

    async fn drain(
        &self,
        mut stream: FlagStream,
        cancel: &CancellationToken,
    ) -> Result<Vec<FeatureFlagReply>> {
        let mut records = Vec::new();
        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                next = stream.next() => next,
            };
            match next {
                Some(Ok(record)) => records.push(record),
                Some(Err(status)) => {
                    tracing::error!(
                        code = ?status.code(),
                        received = records.len(),
                        "flag stream ended with a non-OK status: {}",
                        status.message()
                    );
                    return Err(Error::from(status));
                }
                None => return Ok(records),
            }
        }
    }
}

#[async_trait]
impl ServerGateway for GrapioServerGateway {
    async fn fetch_feature_flags(&self, cancel: &CancellationToken) -> Result<Vec<FeatureFlag>> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let stream = self.connection.fetch_flags(&self.requester).await?;
        let records = self.drain(stream, cancel).await?;

        let flags = records
            .iter()
            .map(|record| self.builders.build(record))
            .collect::<Result<Vec<_>>>()
            .inspect_err(|e| {
                tracing::error!("error converting feature flags from the server: {}", e);
            })?;

        tracing::debug!(count = flags.len(), "fetched feature flags");
        Ok(flags)
    }
}
