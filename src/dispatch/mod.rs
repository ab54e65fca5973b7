//! Dispatch — fan-out rule evaluation and destination delivery.

pub mod coordinator;
pub mod destination;

pub use coordinator::{DispatchCoordinator, RuleOutcome};
pub use destination::{DestinationGateway, Gateway, SendOutcome};
