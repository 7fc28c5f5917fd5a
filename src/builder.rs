use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::builders::BuilderRegistry;
use crate::config::{self, Configuration};
use crate::connection::{FlagStream, GrpcServerConnection, ServerConnection};
use crate::error::{Error, Result};
use crate::gateway::GrapioServerGateway;
use crate::loader::FlagLoader;
use crate::provider::GrapioProvider;
use crate::refresher::{Refresher, RefresherHandle};
use crate::repository::SqliteFlagsRepository;

pub struct GrapioBuilder {
    config: Configuration,
    permit: Option<Arc<Semaphore>>,
}

pub fn create_builder() -> GrapioBuilder {
    GrapioBuilder {
        config: Configuration::default(),
        permit: None,
    }
}

impl GrapioBuilder {
    pub fn requester(mut self, requester: &str) -> Self {
        self.config.requester = requester.to_string();
        self
    }

    pub fn server_address(mut self, address: &str) -> Self {
        self.config.server_address = address.to_string();
        self
    }

    pub fn connection_string(mut self, connection_string: &str) -> Self {
        self.config.connection_string = connection_string.to_string();
        self
    }

    /// Seconds between refresh passes.
    pub fn refresh_interval(mut self, seconds: i64) -> Self {
        self.config.refresh_interval = seconds;
        self
    }

    pub fn offline(mut self, offline: bool) -> Self {
        self.config.offline = offline;
        self
    }

    /// Replace every setting at once, e.g. with one loaded from a file.
    pub fn configuration(mut self, config: Configuration) -> Self {
        self.config = config;
        self
    }

    /// Serialize refresh passes on `permit` instead of the process-wide one.
    pub fn refresh_permit(mut self, permit: Arc<Semaphore>) -> Self {
        self.permit = Some(permit);
        self
    }

    /// Validates the configuration and wires the provider together.
    ///
    /// Must be called inside a Tokio runtime; the gRPC channel is created
    /// lazily and nothing is contacted until the first sync.
    pub fn build(self) -> Result<Grapio> {
        let violations = config::validate(&self.config);
        if !violations.is_empty() {
            return Err(Error::InvalidConfiguration(violations));
        }

        let connection: Arc<dyn ServerConnection> = if self.config.offline {
            Arc::new(Disconnected)
        } else {
            Arc::new(GrpcServerConnection::new(&self.config.server_address)?)
        };
        let gateway = Arc::new(GrapioServerGateway::new(
            connection,
            BuilderRegistry::new(),
            self.config.requester.clone(),
        ));
        let repository = Arc::new(SqliteFlagsRepository::new(&self.config.connection_string)?);
        let loader = Arc::new(FlagLoader::new(
            self.config.offline,
            gateway,
            repository.clone(),
        ));
        let provider = Arc::new(GrapioProvider::new(loader.clone(), repository.clone()));

        tracing::debug!(
            offline = self.config.offline,
            server = %self.config.server_address,
            "built Grapio provider"
        );

        Ok(Grapio {
            config: self.config,
            permit: self.permit,
            provider,
            loader,
            repository,
        })
    }
}

/// A wired provider with its sync pipeline.
pub struct Grapio {
    config: Configuration,
    permit: Option<Arc<Semaphore>>,
    provider: Arc<GrapioProvider>,
    loader: Arc<FlagLoader>,
    repository: Arc<SqliteFlagsRepository>,
}

impl Grapio {
    pub fn configuration(&self) -> &Configuration {
        &self.config
    }

    pub fn provider(&self) -> Arc<GrapioProvider> {
        Arc::clone(&self.provider)
    }

    pub fn loader(&self) -> Arc<FlagLoader> {
        Arc::clone(&self.loader)
    }

    pub fn repository(&self) -> Arc<SqliteFlagsRepository> {
        Arc::clone(&self.repository)
    }

    /// Initializes the provider, then keeps the cache fresh in the background.
    ///
    /// Returns `None` when offline, since there is nothing to refresh.
    pub async fn start(&self, cancel: CancellationToken) -> Result<Option<RefresherHandle>> {
        self.provider.initialize(&cancel).await?;
        if self.config.offline {
            return Ok(None);
        }

        let mut refresher = Refresher::new(self.loader.clone(), self.config.refresh_period());
        if let Some(permit) = &self.permit {
            refresher = refresher.with_permit(Arc::clone(permit));
        }
        Ok(Some(refresher.spawn(cancel)))
    }
}

/// Connection used while offline. The loader never reaches it.
struct Disconnected;

#[async_trait]
impl ServerConnection for Disconnected {
    async fn fetch_flags(&self, _requester: &str) -> Result<FlagStream> {
        Err(Error::SyncFailed {
            code: tonic::Code::Unavailable,
            message: "provider is offline".into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::provider::ProviderState;
    use crate::resolution::ErrorKind;

    fn connection_string(dir: &TempDir) -> String {
        format!("Data Source={}", dir.path().join("grapio.db").display())
    }

    #[tokio::test]
    async fn test_build_rejects_invalid_configuration() {
        let err = create_builder()
            .connection_string("Data Source=:memory:")
            .refresh_interval(1)
            .build()
            .err()
            .unwrap();

        match err {
            Error::InvalidConfiguration(violations) => {
                let fields: Vec<_> = violations.iter().map(|v| v.field).collect();
                assert_eq!(fields, vec!["connection_string", "requester", "refresh_interval"]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_offline_start_marks_the_cache_authoritative() {
        let dir = TempDir::new().unwrap();
        let grapio = create_builder()
            .offline(true)
            .server_address("not a uri")
            .connection_string(&connection_string(&dir))
            .build()
            .unwrap();

        let handle = grapio.start(CancellationToken::new()).await.unwrap();
        assert!(handle.is_none());

        let provider = grapio.provider();
        assert_eq!(provider.state(), ProviderState::Ready);
        let details = provider.resolve_boolean_value("anything", true).await.unwrap();
        assert_eq!(details.error_kind, ErrorKind::FlagNotFound);
    }

    #[tokio::test]
    async fn test_online_start_fails_when_server_is_unreachable() {
        let dir = TempDir::new().unwrap();
        let grapio = create_builder()
            .requester("builder-tests")
            .server_address("http://127.0.0.1:9")
            .connection_string(&connection_string(&dir))
            .build()
            .unwrap();

        let err = grapio.start(CancellationToken::new()).await.err().unwrap();
        assert!(matches!(err, Error::SyncFailed { .. }));
        assert_eq!(grapio.provider().state(), ProviderState::Error);
    }

    #[test]
    fn test_configuration_replaces_settings() {
        let config = Configuration {
            requester: "svc".into(),
            refresh_interval: 60,
            ..Default::default()
        };
        let builder = create_builder().offline(true).configuration(config.clone());
        assert_eq!(builder.config, config);
    }
}
