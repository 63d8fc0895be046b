//! Declarative plan model for kflow.
//!
//! - [`logical_plan`]: expressions and the plan-node arena
//! - [`builders`]: pure constructors composing plans
//! - [`function_options`]: options contract for registry functions
//! - [`explain`]: human-readable plan rendering

pub mod builders;
pub mod explain;
pub mod function_options;
pub mod logical_plan;

pub use builders::*;
pub use explain::{explain_plan, fmt_expr};
pub use function_options::*;
pub use logical_plan::*;
