/// Keepsake core: the scheduled capsule lifecycle.
///
/// A capsule carries a release timestamp and fans out to one or more groups.
/// The core tracks time until release, reminds exactly once per release,
/// lets eligible members open a ready capsule, and keeps the open transition
/// idempotent across concurrent callers and across groups sharing one
/// capsule. Everything stateful goes through injected collaborators so the
/// whole lifecycle runs against fakes in tests.

pub mod bus;
pub mod clock;
pub mod error;
pub mod external;
pub mod opener;
pub mod readiness;
pub mod reminders;
pub mod scheduler;
pub mod store;

pub use bus::EventBus;
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::CapsuleError;
pub use external::{AccessGranter, MembershipService, SqliteGranter, SqliteMembership};
pub use opener::{CapsuleOpener, OpenOutcome};
pub use reminders::ReminderScheduler;
pub use scheduler::CapsuleScheduler;
pub use store::CapsuleStore;

#[cfg(test)]
pub(crate) mod testutil;
