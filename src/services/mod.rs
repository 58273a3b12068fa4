//! Business logic: classification, routing, validation, and execution.

pub mod classifier;
pub mod executor;
pub mod router;
pub mod validator;

pub use classifier::{classify, ClassificationResult};
pub use executor::{next_escalation, ExecutionResult};
pub use router::{route, Overrides, RoutingDecision, SessionOverride};
pub use validator::{validate, Validation};
