mod engine;

pub use engine::{decode_state, encode_state, ConnectOutcome, SyncEngine};

/// Aggregate outcome of one sync invocation.
///
/// Counts are summed across every attempted connection; errors are
/// provider-scoped strings in attempt order. A sync call always produces a
/// report, even when every connection failed.
#[derive(Debug, Default)]
pub struct SyncReport {
    pub accounts_updated: u32,
    pub transactions_added: u32,
    pub transactions_updated: u32,
    pub errors: Vec<String>,
}

impl SyncReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}
