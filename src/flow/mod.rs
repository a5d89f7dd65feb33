//! The flow-analysis engine: fingerprints, proof conditions, guard
//! decomposition, the control-flow-shaped condition tree and the point
//! queries over it.

pub mod analysis;
pub mod condition;
mod decompose;
pub mod fingerprint;
pub mod tree;

pub use analysis::{analyze_method, analyze_methods, ExpressionStatus, FlowFacts};
pub use condition::{Atom, Combinator, Condition, ConditionKind};
pub use fingerprint::Fingerprint;
pub use tree::{Assignment, BodyNode, Branch, BranchId, BranchTree};
