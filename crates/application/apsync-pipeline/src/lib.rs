pub mod sync;

pub use sync::engine::{StatusReport, SyncEngine};
pub use sync::{SyncError, TransferEvent};
