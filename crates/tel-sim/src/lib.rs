//! In-process data source speaking the collaborator traits of
//! `tel-protocol`. Used by the daemon's `simulated` driver and as the
//! protocol fake in pipeline tests.

mod session;
mod state;
mod subscription;
mod values;

pub use session::{SimMonitor, SimSession, SimulatedSource};
pub use subscription::SimSubscription;
pub use values::synthesize;
