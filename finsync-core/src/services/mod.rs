//! Service layer - sync orchestration
//!
//! Services combine domain logic with the ports. The coordinator is the
//! only component that writes to the store during a sync cycle.

pub mod events;
pub mod logging;
pub mod migration;
pub mod reconcile;
pub mod retry;
pub mod scheduler;
pub mod sync;

pub use events::{Change, ChangeSet, ObservationBus, SyncEvent, SyncState};
pub use logging::init_logging;
pub use migration::{MigrationResult, MigrationService};
pub use reconcile::reconcile;
pub use retry::RetryPolicy;
pub use scheduler::AutoSyncScheduler;
pub use sync::{SyncCoordinator, SyncFuture, SyncOutcome, SyncReport, SyncResult};
