use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use tonic::transport::{Channel, Endpoint};
use tonic::Request;

use crate::error::{Error, Result};
use crate::proto::{FeatureFlagReply, FeatureFlagsRequest, GrapioServiceClient};

/// Records of one streaming call. A non-OK terminal status arrives as an
/// `Err` item.
pub type FlagStream = Pin<Box<dyn Stream<Item = Result<FeatureFlagReply, tonic::Status>> + Send>>;

/// Opens streaming calls against the flag server.
#[async_trait]
pub trait ServerConnection: Send + Sync {
    /// Opens exactly one `FetchFeatureFlags` call for `requester`.
    async fn fetch_flags(&self, requester: &str) -> Result<FlagStream>;
}

/// gRPC connection to a Grapio server.
///
/// The channel connects lazily on the first call and is reused afterwards.
pub struct GrpcServerConnection {
    client: GrapioServiceClient<Channel>,
}

impl GrpcServerConnection {
    pub fn new(server_address: &str) -> Result<Self> {
        let endpoint = Endpoint::from_shared(server_address.to_string())?;
        Ok(Self::from_channel(endpoint.connect_lazy()))
    }

    pub fn from_channel(channel: Channel) -> Self {
        Self {
            client: GrapioServiceClient::new(channel),
        }
    }
}

#[async_trait]
impl ServerConnection for GrpcServerConnection {
    async fn fetch_flags(&self, requester: &str) -> Result<FlagStream> {
        tracing::info!(requester, "loading feature flags from the Grapio server");

        let mut client = self.client.clone();
        let request = Request::new(FeatureFlagsRequest {
            requester: requester.to_string(),
        });

        match client.fetch_feature_flags(request).await {
            Ok(response) => {
                tracing::debug!("opened feature flag stream");
                Ok(Box::pin(response.into_inner()))
            }
            Err(status) => {
                tracing::error!(
                    code = ?status.code(),
                    "failed to fetch feature flags from the Grapio server: {}",
                    status.message()
                );
                Err(Error::from(status))
            }
        }
    }
}
