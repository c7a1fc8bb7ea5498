pub mod orchestrator;
pub mod types;

pub use orchestrator::{Orchestrator, interrupt_on_ctrl_c};
pub use types::{HarnessConfig, HarnessError, HarnessResult};
