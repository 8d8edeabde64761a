pub mod mock;

use async_trait::async_trait;
use cotrelay_core::RawEvent;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub use mock::MockPluginSource;

/// A polling data source. Each received `Vec<RawEvent>` is one poll's
/// worth of position reports, to be admitted as a single batch.
#[async_trait]
pub trait PluginSource {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn start(
        &self,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<Vec<RawEvent>>, Self::Error>;
}
