//! Cached feature-flag provider for Grapio.
//!
//! Flags are downloaded from a Grapio server over a streaming gRPC call,
//! stored in a local SQLite cache, and resolved from that cache. A background
//! refresher keeps the cache current; if the server is unreachable the last
//! successful download keeps being served.
//!
//! # Examples
//! ```no_run
//! # async fn run() -> grapio::Result<()> {
//! use tokio_util::sync::CancellationToken;
//!
//! let grapio = grapio::init()
//!     .requester("checkout-service")
//!     .server_address("http://flags.internal:3278")
//!     .refresh_interval(60)
//!     .build()?;
//!
//! let refresher = grapio.start(CancellationToken::new()).await?;
//! let details = grapio
//!     .provider()
//!     .resolve_boolean_value("new-checkout", false)
//!     .await?;
//! println!("new-checkout = {}", details.value);
//!
//! if let Some(refresher) = refresher {
//!     refresher.stop().await?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod builders;
pub mod config;
pub mod connection;
pub mod error;
pub mod flag;
pub mod gateway;
pub mod loader;
pub mod proto;
pub mod provider;
pub mod refresher;
pub mod repository;
pub mod resolution;

pub use builder::{Grapio, GrapioBuilder};
pub use builders::{BuilderRegistry, FlagBuilder};
pub use config::{validate, Configuration, Violation};
pub use connection::{GrpcServerConnection, ServerConnection};
pub use error::{Error, Result};
pub use flag::{FeatureFlag, FlagValue, ValueKind};
pub use gateway::{GrapioServerGateway, ServerGateway};
pub use loader::{FeatureFlagLoader, FlagLoader};
pub use provider::{GrapioProvider, ProviderMetadata, ProviderState};
pub use refresher::{RefreshStatus, Refresher, RefresherHandle};
pub use repository::{FlagsRepository, MemoryFlagsRepository, SqliteFlagsRepository};
pub use resolution::{ErrorKind, FlagType, Reason, ResolutionDetails};

/// Returns a builder for wiring up a provider.
///
/// Without any chaining the builder holds the default configuration, which
/// still needs a requester unless it is switched to offline.
pub fn init() -> GrapioBuilder {
    builder::create_builder()
}
