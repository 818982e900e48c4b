// Cross-chain coordination: state machine, refunds and scheduling

pub mod failure_handler;
pub mod retry;
pub mod supervisor;
pub mod swap_coordinator;
pub mod types;

pub use failure_handler::{FailureHandler, FailureReport};
pub use retry::RetryPolicy;
pub use supervisor::SwapSupervisor;
pub use swap_coordinator::{decide, SwapCoordinator};
pub use types::{Decision, LegOutcome, PassAction, PassOutcome, PassReport, Settlement};
