//! Update orchestration.
//!
//! A session tracks one module's progress through the update state
//! machine; the coordinator owns all sessions, the cross-module thread
//! budget, and the tick loop that turns worker events into
//! notifications.

mod coordinator;
mod session;

pub use coordinator::{UpdateCoordinator, UpdateNotification};
pub use session::SessionPhase;
