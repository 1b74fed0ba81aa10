// Source trait for daily observation records
use crate::domain::series::RawRecord;
use async_trait::async_trait;

#[async_trait]
pub trait ObservationSource: Send + Sync {
    /// Fetch the complete history in one call. Failures are final; there is
    /// no retry.
    async fn fetch(&self) -> anyhow::Result<Vec<RawRecord>>;
}
