use std::collections::BTreeSet;

use anyhow::Result;
use rayon::prelude::*;
use tracing::debug;

use crate::ast::{Ast, ExprId, MethodBody, StmtId};
use crate::flow::condition::{Condition, ConditionKind};
use crate::flow::fingerprint::Fingerprint;
use crate::flow::tree::{build_flow, Assignment, BranchId, BranchTree};
use crate::semantics::{SemanticModel, SymbolId};
use crate::timings::{OperationTimer, TimingOperation};
use crate::value::ValueState;

/// Answer of a point query: is the target provably non-null where it is
/// used?
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ExpressionStatus {
    /// Proven non-null at the query point.
    Assigned,
    /// A proof exists, but a later `null`/unknown write may have undone it.
    ReassignedAfterCondition,
    /// No proof anywhere; conservatively unsafe.
    NotAssigned,
    /// Proven, and additionally covered by an explicit constraint that the
    /// proof makes redundant.
    AssignedWithRedundantConstraint,
}

impl ExpressionStatus {
    pub fn is_assigned(&self) -> bool {
        matches!(
            self,
            ExpressionStatus::Assigned | ExpressionStatus::AssignedWithRedundantConstraint
        )
    }
}

/// Flow facts for one analyzed body: the condition tree, detached closure
/// trees, observed assignments and whole-method non-null locals. Immutable
/// once built; point queries read it concurrently without locking.
#[derive(Clone, Debug)]
pub struct FlowFacts {
    assignments: Vec<Assignment>,
    always_not_null: BTreeSet<SymbolId>,
    tree: BranchTree,
    lambda_roots: Vec<BranchId>,
    has_constraints: bool,
    returns: Vec<StmtId>,
}

/// Builds the flow facts for one method or constructor body. Pure and
/// deterministic: rebuilding from equal input yields an equal tree, which
/// is what makes the external result cache sound.
pub fn analyze_method<M: SemanticModel + ?Sized>(
    ast: &Ast,
    model: &M,
    body: &MethodBody,
) -> Result<FlowFacts> {
    let built = build_flow(ast, model, body)?;

    let null_assigned: BTreeSet<SymbolId> = built
        .assignments
        .iter()
        .filter(|a| a.state != ValueState::NotNull)
        .map(|a| a.symbol)
        .collect();
    // Assigned on every path, and no recorded write was nullable.
    let mut always_not_null: BTreeSet<SymbolId> = model
        .always_assigned(body)
        .into_iter()
        .filter(|symbol| !null_assigned.contains(symbol))
        .collect();
    for &parameter in &body.parameters {
        if model.annotated_non_null(parameter) {
            always_not_null.insert(parameter);
        }
    }

    debug!(
        assignments = built.assignments.len(),
        lambdas = built.lambda_roots.len(),
        returns = built.returns.len(),
        "analyzed body"
    );

    Ok(FlowFacts {
        assignments: built.assignments,
        always_not_null,
        tree: built.tree,
        lambda_roots: built.lambda_roots,
        has_constraints: built.has_constraints,
        returns: built.returns,
    })
}

/// Analyzes many bodies in parallel. Each body builds its own tree and
/// assignment list; the model is shared read-only.
pub fn analyze_methods<M: SemanticModel + Sync>(
    ast: &Ast,
    model: &M,
    bodies: &[MethodBody],
) -> Vec<Result<FlowFacts>> {
    bodies
        .par_iter()
        .map(|body| analyze_method(ast, model, body))
        .collect()
}

impl FlowFacts {
    pub fn tree(&self) -> &BranchTree {
        &self.tree
    }

    pub fn assignments(&self) -> &[Assignment] {
        &self.assignments
    }

    pub fn has_explicit_constraints(&self) -> bool {
        self.has_constraints
    }

    /// Return sites of the analyzed body itself (closures excluded).
    pub fn return_statements(&self) -> &[StmtId] {
        &self.returns
    }

    /// Whether `target` is provably non-null at `at`. `target` names the
    /// value being checked; `at` is the occurrence to resolve against the
    /// tree (usually the same node, or an enclosing one).
    pub fn is_proven<M: SemanticModel + ?Sized>(
        &self,
        ast: &Ast,
        model: &M,
        target: ExprId,
        at: ExprId,
    ) -> ExpressionStatus {
        let _timer = OperationTimer::new(TimingOperation::IsProven);
        let symbol = model.symbol_of(target);
        let key = Fingerprint::of(ast, target);

        if let Some(symbol) = symbol {
            if self.whole_method_not_null(model, symbol) {
                // The fact holds everywhere, so any constraint over the
                // same value is redundant.
                if self.under_constraint_for(ast, &key, at) {
                    return ExpressionStatus::AssignedWithRedundantConstraint;
                }
                return ExpressionStatus::Assigned;
            }
        }

        let Some((found, inline)) = self.find_branch(ast, at) else {
            return ExpressionStatus::NotAssigned;
        };

        // Inside the guard itself only the truncated prefix has run; if it
        // already proves the value, no ancestor walk is needed.
        if let Some(inline) = &inline {
            if inline.is_not_null_short_circuit(&key) {
                return ExpressionStatus::Assigned;
            }
        }

        let (proving, redundant_constraint) = self.proving_branch(found, &key);
        let Some(proving) = proving else {
            return ExpressionStatus::NotAssigned;
        };

        if self.reassigned_since(ast, model, symbol, target, proving) {
            return ExpressionStatus::ReassignedAfterCondition;
        }

        if redundant_constraint {
            ExpressionStatus::AssignedWithRedundantConstraint
        } else {
            ExpressionStatus::Assigned
        }
    }

    /// Assignments that happen under an explicit constraint over the same
    /// value; callers flag these as constraint-after-assignment misuse.
    pub fn assignments_after_constraints(&self, ast: &Ast) -> Vec<&Assignment> {
        self.assignments
            .iter()
            .filter(|assignment| {
                let Some(target) = assignment.target else {
                    return false;
                };
                let key = Fingerprint::of(ast, target);
                let Some((found, _)) = self.find_branch(ast, assignment.expr) else {
                    return false;
                };
                std::iter::once(found)
                    .chain(self.tree.ancestors(found))
                    .any(|branch| self.tree.branch(branch).condition().is_constraint_for(&key))
            })
            .collect()
    }

    /// A whole-method fact: always assigned non-null, or a local whose
    /// every recorded write is non-null.
    fn whole_method_not_null<M: SemanticModel + ?Sized>(&self, model: &M, symbol: SymbolId) -> bool {
        if self.always_not_null.contains(&symbol) {
            return true;
        }
        if !model.kind_of(symbol).is_local() {
            // Fields and properties can be written elsewhere; only locals
            // are fully visible to this pass.
            return false;
        }
        let mut seen = false;
        for assignment in self.assignments.iter().filter(|a| a.symbol == symbol) {
            if assignment.state != ValueState::NotNull {
                return false;
            }
            seen = true;
        }
        seen
    }

    fn under_constraint_for(&self, ast: &Ast, key: &Fingerprint, at: ExprId) -> bool {
        let Some((found, _)) = self.find_branch(ast, at) else {
            return false;
        };
        std::iter::once(found)
            .chain(self.tree.ancestors(found))
            .any(|branch| self.tree.branch(branch).condition().is_constraint_for(key))
    }

    /// Closure trees are searched first, innermost first: a query inside a
    /// closure must resolve against the closure's own scope before the
    /// enclosing method's.
    fn find_branch(&self, ast: &Ast, node: ExprId) -> Option<(BranchId, Option<Condition>)> {
        for &root in &self.lambda_roots {
            if let Some(found) = self.tree.find_branch(ast, root, node) {
                return Some(found);
            }
        }
        self.tree.find_branch(ast, self.tree.root(), node)
    }

    /// Walks from `from` upward to the nearest proving condition. A
    /// `Constraint` proof is remembered but the walk continues; a farther
    /// non-constraint proof supersedes it and marks it redundant.
    fn proving_branch(&self, from: BranchId, key: &Fingerprint) -> (Option<BranchId>, bool) {
        let mut constraint: Option<BranchId> = None;
        let mut proving: Option<BranchId> = None;
        for branch in std::iter::once(from).chain(self.tree.ancestors(from)) {
            let condition = self.tree.branch(branch).condition();
            if condition.is_not_null(key) {
                proving = Some(branch);
                if condition.kind() != ConditionKind::Constraint {
                    break;
                }
                constraint = Some(branch);
            }
        }
        let redundant = constraint.is_some() && constraint != proving;
        (proving, redundant)
    }

    /// Checks recorded nullable writes against the proving branch. Inside
    /// a `While` guard over the same symbol, only a write positioned
    /// before the query disqualifies: the guard re-proves the value on the
    /// next iteration for writes after it.
    fn reassigned_since<M: SemanticModel + ?Sized>(
        &self,
        ast: &Ast,
        model: &M,
        symbol: Option<SymbolId>,
        target: ExprId,
        proving: BranchId,
    ) -> bool {
        let Some(symbol) = symbol else {
            return false;
        };
        let proving_condition = self.tree.branch(proving).condition();
        for assignment in self
            .assignments
            .iter()
            .filter(|a| a.symbol == symbol && a.state != ValueState::NotNull)
        {
            let Some((assigned_in, _)) =
                self.tree.find_branch(ast, self.tree.root(), assignment.expr)
            else {
                continue;
            };
            let in_path =
                assigned_in == proving || self.tree.is_ancestor_of(proving, assigned_in);
            if !in_path {
                continue;
            }
            if proving_condition.is_while_over(model, symbol) {
                if ast.expr_span(assignment.expr).start < ast.expr_span(target).start {
                    return true;
                }
                continue;
            }
            return true;
        }
        false
    }
}
