//! Cache maintenance for Tessera.
//!
//! - [`populate`]: idempotent fetch-and-store of one key, or a forced resync
//! - [`sweep`]: one page of staleness reconciliation against the origin
//! - [`queue`]: the continuation queue linking sweep pages into a full pass

pub mod populate;
pub mod queue;
pub mod sweep;

pub use populate::{PopulateOutcome, Populator};
pub use queue::{ChannelQueue, QueueError, QueueReceiver, SweepMessage, WorkQueue, decode_batch};
pub use sweep::{ReconciliationSweep, SweepError, SweepOptions, SweepReport};
