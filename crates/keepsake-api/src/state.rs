use std::sync::Arc;

use keepsake_core::{CapsuleOpener, CapsuleScheduler, Clock, EventBus};
use keepsake_db::Database;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub scheduler: CapsuleScheduler,
    pub opener: CapsuleOpener,
    pub clock: Arc<dyn Clock>,
    pub bus: EventBus,
}
