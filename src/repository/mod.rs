pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::flag::FeatureFlag;

pub use memory::MemoryFlagsRepository;
pub use sqlite::SqliteFlagsRepository;

/// Local flag cache. Implementations must be thread-safe.
#[async_trait]
pub trait FlagsRepository: Send + Sync {
    /// Replace every stored flag with `flags`.
    ///
    /// The replacement is atomic: on failure or cancellation the previous
    /// contents stay in place. Later duplicates of a key win.
    async fn save_flags(&self, flags: Vec<FeatureFlag>, cancel: &CancellationToken) -> Result<()>;

    /// Look up a single flag by its exact key.
    ///
    /// Returns `(false, FeatureFlag::null())` when the key is absent. An
    /// empty key is rejected with `InvalidArgument`.
    async fn fetch_flag(&self, key: &str, cancel: &CancellationToken)
        -> Result<(bool, FeatureFlag)>;
}
