//! Intra-procedural nullability flow analysis.
//!
//! Given a parsed, symbol-resolved method body, the engine builds a
//! control-flow-shaped tree of reachability conditions, decomposes boolean
//! guards into atomic null facts, and answers point queries: is this
//! expression provably non-null here, provably null, unneeded to check, or
//! invalidated by a later write?
//!
//! Symbol and type information comes from a [`semantics::SemanticModel`]
//! capability injected by the caller; [`ast::AstBuilder`] plus
//! [`semantics::SymbolTable`] provide a table-backed pair for hosts without
//! a compiler attached. One call to [`flow::analyze_method`] produces the
//! immutable [`flow::FlowFacts`] for a body; queries on it are read-only
//! and safe to share across threads. Recomputation is pure, so the results
//! suit an externally-owned memoizing cache.

pub mod ast;
pub mod flow;
pub mod known;
pub mod semantics;
pub mod timings;
pub mod value;

pub use ast::{Ast, AstBuilder, ExprId, MethodBody, Span, StmtId, TypeId};
pub use flow::{
    analyze_method, analyze_methods, Assignment, Branch, BranchId, BranchTree, Combinator,
    Condition, ConditionKind, ExpressionStatus, Fingerprint, FlowFacts,
};
pub use known::KnownMembers;
pub use semantics::{CheckIdiom, SemanticModel, SymbolId, SymbolKind, SymbolTable};
pub use value::{value_state_of, ParseFailed, ValueState};
