//! Flag resolution against the local cache.
//!
//! Resolution never talks to the server. It reads whatever the last
//! successful sync left in the repository and reports misses as data
//! ([`ErrorKind`]) rather than as errors.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::loader::FeatureFlagLoader;
use crate::repository::FlagsRepository;
use crate::resolution::{ErrorKind, FlagType, ResolutionDetails};

const PROVIDER_NAME: &str = "Grapio Provider";
const BLANK_KEY_MESSAGE: &str = "Flag key is blank or null";
const NOT_FOUND_MESSAGE: &str = "Flag key was not found in the database";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ProviderState {
    NotReady = 0,
    Ready = 1,
    Error = 2,
}

impl ProviderState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => ProviderState::Ready,
            2 => ProviderState::Error,
            _ => ProviderState::NotReady,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderMetadata {
    pub name: &'static str,
}

pub struct GrapioProvider {
    loader: Arc<dyn FeatureFlagLoader>,
    repository: Arc<dyn FlagsRepository>,
    state: AtomicU8,
    init_lock: Mutex<()>,
}

impl GrapioProvider {
    pub fn new(loader: Arc<dyn FeatureFlagLoader>, repository: Arc<dyn FlagsRepository>) -> Self {
        Self {
            loader,
            repository,
            state: AtomicU8::new(ProviderState::NotReady as u8),
            init_lock: Mutex::new(()),
        }
    }

    pub fn metadata(&self) -> ProviderMetadata {
        ProviderMetadata {
            name: PROVIDER_NAME,
        }
    }

    pub fn state(&self) -> ProviderState {
        ProviderState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: ProviderState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Runs the first synchronization pass and marks the provider ready.
    ///
    /// Concurrent callers are serialized; once ready, further calls return
    /// immediately. A failed pass leaves the provider in
    /// [`ProviderState::Error`] and may be retried.
    pub async fn initialize(&self, cancel: &CancellationToken) -> Result<()> {
        let _guard = self.init_lock.lock().await;
        if self.state() == ProviderState::Ready {
            return Ok(());
        }

        tracing::info!("initializing Grapio provider");
        match self.loader.load_flags(cancel).await {
            Ok(()) => {
                self.set_state(ProviderState::Ready);
                tracing::info!("Grapio provider is ready");
                Ok(())
            }
            Err(e) => {
                self.set_state(ProviderState::Error);
                tracing::error!("failed to initialize Grapio provider: {}", e);
                Err(e)
            }
        }
    }

    pub async fn resolve<T: FlagType>(
        &self,
        flag_key: &str,
        default_value: T,
    ) -> Result<ResolutionDetails<T>> {
        if self.state() != ProviderState::Ready {
            return Ok(ResolutionDetails::fallback(
                flag_key,
                default_value,
                ErrorKind::ProviderNotReady,
                None,
            ));
        }

        if flag_key.is_empty() {
            return Ok(ResolutionDetails::fallback(
                flag_key,
                default_value,
                ErrorKind::InvalidArgument,
                Some(BLANK_KEY_MESSAGE),
            ));
        }

        let (found, flag) = match self
            .repository
            .fetch_flag(flag_key, &CancellationToken::new())
            .await
        {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(flag_key, "failed to read feature flag from the cache: {}", e);
                return Err(e);
            }
        };

        if !found {
            tracing::debug!(flag_key, "feature flag not found in the cache");
            return Ok(ResolutionDetails::fallback(
                flag_key,
                default_value,
                ErrorKind::FlagNotFound,
                Some(NOT_FOUND_MESSAGE),
            ));
        }

        match T::from_flag_value(flag.value()) {
            Some(value) => Ok(ResolutionDetails::cached(flag_key, value)),
            None => Err(Error::TypeMismatch {
                key: flag_key.to_string(),
                expected: T::KIND,
                found: flag.value().kind(),
            }),
        }
    }

    pub async fn resolve_boolean_value(
        &self,
        flag_key: &str,
        default_value: bool,
    ) -> Result<ResolutionDetails<bool>> {
        self.resolve(flag_key, default_value).await
    }

    pub async fn resolve_string_value(
        &self,
        flag_key: &str,
        default_value: impl Into<String>,
    ) -> Result<ResolutionDetails<String>> {
        self.resolve(flag_key, default_value.into()).await
    }

    pub async fn resolve_integer_value(
        &self,
        flag_key: &str,
        default_value: i64,
    ) -> Result<ResolutionDetails<i64>> {
        self.resolve(flag_key, default_value).await
    }

    pub async fn resolve_double_value(
        &self,
        flag_key: &str,
        default_value: f64,
    ) -> Result<ResolutionDetails<f64>> {
        self.resolve(flag_key, default_value).await
    }

    pub async fn resolve_structure_value(
        &self,
        flag_key: &str,
        default_value: serde_json::Value,
    ) -> Result<ResolutionDetails<serde_json::Value>> {
        self.resolve(flag_key, default_value).await
    }
}
