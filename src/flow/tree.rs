use std::collections::VecDeque;

use crate::ast::{Ast, ExprId, ExprKind, LambdaBody, MethodBody, StmtId, StmtKind};
use crate::flow::condition::{Atom, Condition, ConditionKind};
use crate::flow::decompose::GuardDecomposer;
use crate::flow::fingerprint::Fingerprint;
use crate::semantics::{CheckIdiom, SemanticModel, SymbolId};
use crate::timings::{OperationTimer, TimingOperation};
use crate::value::{value_state_of, ParseFailed, ValueState};

/// Handle to a branch in the tree arena.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub struct BranchId(u32);

/// A node a branch body can own: statements directly, or bare expressions
/// for conditional arms and expression-bodied lambdas.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BodyNode {
    Stmt(StmtId),
    Expr(ExprId),
}

/// One node of the control-flow tree: the statements reachable under one
/// specific condition. The body holds only directly-owned nodes, never a
/// descendant's.
#[derive(Clone, Debug)]
pub struct Branch {
    parent: Option<BranchId>,
    condition: Condition,
    body: Vec<BodyNode>,
    children: Vec<BranchId>,
}

impl Branch {
    pub fn parent(&self) -> Option<BranchId> {
        self.parent
    }

    pub fn condition(&self) -> &Condition {
        &self.condition
    }

    pub fn body(&self) -> &[BodyNode] {
        &self.body
    }

    pub fn children(&self) -> &[BranchId] {
        &self.children
    }
}

/// Arena of branches. Parent links are indices, so the tree is owned flat
/// and back-references cannot form cycles.
#[derive(Clone, Debug, Default)]
pub struct BranchTree {
    branches: Vec<Branch>,
}

impl BranchTree {
    /// The branch for the whole method body; always allocated first.
    pub fn root(&self) -> BranchId {
        BranchId(0)
    }

    pub fn branch(&self, id: BranchId) -> &Branch {
        &self.branches[id.0 as usize]
    }

    fn alloc(&mut self, parent: Option<BranchId>, condition: Condition) -> BranchId {
        self.branches.push(Branch {
            parent,
            condition,
            body: Vec::new(),
            children: Vec::new(),
        });
        let id = BranchId((self.branches.len() - 1) as u32);
        if let Some(parent) = parent {
            self.branches[parent.0 as usize].children.push(id);
        }
        id
    }

    pub fn ancestors(&self, id: BranchId) -> impl Iterator<Item = BranchId> + '_ {
        let mut current = self.branch(id).parent;
        std::iter::from_fn(move || {
            let next = current?;
            current = self.branch(next).parent;
            Some(next)
        })
    }

    pub fn is_ancestor_of(&self, ancestor: BranchId, descendant: BranchId) -> bool {
        self.ancestors(descendant).any(|id| id == ancestor)
    }

    /// Locates the branch owning `node`, searching the subtree under
    /// `from`. A node inside a branch's own condition resolves to the
    /// parent branch plus the short-circuit-safe truncated prefix.
    pub fn find_branch(
        &self,
        ast: &Ast,
        from: BranchId,
        node: ExprId,
    ) -> Option<(BranchId, Option<Condition>)> {
        let _timer = OperationTimer::new(TimingOperation::FindBranch);
        self.find_in(ast, from, node)
    }

    fn find_in(
        &self,
        ast: &Ast,
        at: BranchId,
        node: ExprId,
    ) -> Option<(BranchId, Option<Condition>)> {
        let branch = self.branch(at);
        if let Some(prefix) = branch.condition.truncate_before(ast, node) {
            return branch.parent.map(|parent| (parent, Some(prefix)));
        }
        if self.node_in_body(ast, at, node) {
            return Some((at, None));
        }
        for &child in &branch.children {
            if let Some(found) = self.find_in(ast, child, node) {
                return Some(found);
            }
        }
        None
    }

    /// Membership in this branch's own body; does not look into children.
    fn node_in_body(&self, ast: &Ast, at: BranchId, node: ExprId) -> bool {
        let span = ast.expr_span(node);
        self.branch(at).body.iter().any(|owned| match owned {
            BodyNode::Stmt(stmt) => ast.stmt_span(*stmt).contains(span),
            BodyNode::Expr(expr) => *expr == node || ast.expr_span(*expr).contains(span),
        })
    }
}

/// A value binding observed while building the tree.
#[derive(Clone, Debug)]
pub struct Assignment {
    pub symbol: SymbolId,
    /// Node carrying the assignment's source position.
    pub expr: ExprId,
    /// Assigned place, when the binding has one (used for constraint
    /// matching; declarators and pattern bindings have none).
    pub target: Option<ExprId>,
    pub state: ValueState,
}

/// Everything one tree-building pass produces.
#[derive(Clone, Debug)]
pub(crate) struct BuiltFlow {
    pub(crate) tree: BranchTree,
    pub(crate) lambda_roots: Vec<BranchId>,
    pub(crate) assignments: Vec<Assignment>,
    pub(crate) returns: Vec<StmtId>,
    pub(crate) has_constraints: bool,
}

/// Walks a statement sequence into a branch tree, recording assignments
/// and queuing lambdas for detached construction.
pub(crate) struct TreeBuilder<'a, M: SemanticModel + ?Sized> {
    ast: &'a Ast,
    model: &'a M,
    tree: BranchTree,
    assignments: Vec<Assignment>,
    lambdas: VecDeque<(BranchId, ExprId)>,
    returns: Vec<StmtId>,
    has_constraints: bool,
}

pub(crate) fn build_flow<M: SemanticModel + ?Sized>(
    ast: &Ast,
    model: &M,
    body: &MethodBody,
) -> Result<BuiltFlow, ParseFailed> {
    let _timer = OperationTimer::new(TimingOperation::BuildTree);
    let mut builder = TreeBuilder {
        ast,
        model,
        tree: BranchTree::default(),
        assignments: Vec::new(),
        lambdas: VecDeque::new(),
        returns: Vec::new(),
        has_constraints: false,
    };

    let nodes: Vec<BodyNode> = body.statements.iter().map(|s| BodyNode::Stmt(*s)).collect();
    builder.build(None, Condition::empty(ConditionKind::None), &nodes, false)?;

    // A closure may run at any time, so its statements are not part of the
    // enclosing tree; each gets its own tree rooted at the branch that was
    // active when it was declared. Building drains the queue in declaration
    // order; the roots are then reversed so that queries hit the innermost
    // closure first (an outer closure's span contains the inner one's).
    let mut lambda_roots = Vec::new();
    while let Some((declared_at, lambda)) = builder.lambdas.pop_front() {
        let nodes: Vec<BodyNode> = match &builder.ast.expr(lambda).kind {
            ExprKind::Lambda {
                body: LambdaBody::Block(stmts),
            } => stmts.iter().map(|s| BodyNode::Stmt(*s)).collect(),
            ExprKind::Lambda {
                body: LambdaBody::Expr(expr),
            } => vec![BodyNode::Expr(*expr)],
            _ => Vec::new(),
        };
        lambda_roots.push(builder.build(
            Some(declared_at),
            Condition::empty(ConditionKind::None),
            &nodes,
            true,
        )?);
    }
    lambda_roots.reverse();

    Ok(BuiltFlow {
        tree: builder.tree,
        lambda_roots,
        assignments: builder.assignments,
        returns: builder.returns,
        has_constraints: builder.has_constraints,
    })
}

impl<'a, M: SemanticModel + ?Sized> TreeBuilder<'a, M> {
    fn decomposer(&self) -> GuardDecomposer<'a, M> {
        GuardDecomposer::new(self.ast, self.model)
    }

    fn build(
        &mut self,
        parent: Option<BranchId>,
        condition: Condition,
        nodes: &[BodyNode],
        in_lambda: bool,
    ) -> Result<BranchId, ParseFailed> {
        let branch = self.tree.alloc(parent, condition);
        let mut index = 0;
        while index < nodes.len() {
            let node = nodes[index];
            let rest = &nodes[index + 1..];
            index += 1;

            let stmt = match node {
                BodyNode::Stmt(stmt) => stmt,
                BodyNode::Expr(expr) => {
                    // A bare boolean expression in body position (a ternary
                    // arm, an expression-bodied member) is treated like a
                    // guarded return site.
                    if matches!(self.ast.expr(expr).kind, ExprKind::Binary { .. }) {
                        self.visit_expr(branch, expr)?;
                        let condition = self.decomposer().parse(ConditionKind::Return, expr);
                        self.tree.alloc(Some(branch), condition);
                    } else {
                        self.visit_expr(branch, expr)?;
                        self.tree_body(branch).push(node);
                    }
                    continue;
                }
            };

            match self.ast.stmt(stmt).kind.clone() {
                StmtKind::If { cond, then, els } => {
                    let if_condition = self.decomposer().parse(ConditionKind::If, cond);
                    self.visit_expr(branch, cond)?;
                    let then_nodes = as_body_nodes(&then);
                    self.build(Some(branch), if_condition.clone(), &then_nodes, in_lambda)?;
                    if exits_in_all_paths(self.ast, &then) {
                        // The negated guard covers everything after the if,
                        // else clause included; nothing further to walk here.
                        let mut tail: Vec<BodyNode> =
                            els.as_deref().map(as_body_nodes).unwrap_or_default();
                        tail.extend_from_slice(rest);
                        self.build(Some(branch), if_condition.negate(), &tail, in_lambda)?;
                        break;
                    }
                    if let Some(els) = els {
                        let els_nodes = as_body_nodes(&els);
                        self.build(Some(branch), if_condition.negate(), &els_nodes, in_lambda)?;
                    }
                }
                StmtKind::Return(expr) => {
                    if !in_lambda {
                        self.returns.push(stmt);
                    }
                    self.visit_stmt(branch, stmt)?;
                    if let Some(expr) = expr {
                        if let ExprKind::Conditional {
                            cond,
                            when_true,
                            when_false,
                        } = self.ast.expr(expr).kind
                        {
                            let condition = self.decomposer().parse(ConditionKind::Return, cond);
                            self.build(
                                Some(branch),
                                condition.clone(),
                                &[BodyNode::Expr(when_true)],
                                in_lambda,
                            )?;
                            self.build(
                                Some(branch),
                                condition.negate(),
                                &[BodyNode::Expr(when_false)],
                                in_lambda,
                            )?;
                        } else {
                            let condition = self.decomposer().parse(ConditionKind::Return, expr);
                            self.tree.alloc(Some(branch), condition);
                        }
                    }
                }
                StmtKind::While { cond, body } => {
                    self.visit_expr(branch, cond)?;
                    let condition = self.decomposer().parse(ConditionKind::While, cond);
                    self.build(Some(branch), condition, &as_body_nodes(&body), in_lambda)?;
                }
                StmtKind::Do { body, .. } => {
                    self.build(
                        Some(branch),
                        Condition::empty(ConditionKind::While),
                        &as_body_nodes(&body),
                        in_lambda,
                    )?;
                }
                StmtKind::For { body } => {
                    self.build(
                        Some(branch),
                        Condition::empty(ConditionKind::ForEach),
                        &as_body_nodes(&body),
                        in_lambda,
                    )?;
                }
                StmtKind::ForEach {
                    symbol,
                    iterable,
                    body,
                } => {
                    // The iteration variable always holds an element.
                    self.assignments.push(Assignment {
                        symbol,
                        expr: iterable,
                        target: None,
                        state: ValueState::NotNull,
                    });
                    self.build(
                        Some(branch),
                        Condition::empty(ConditionKind::ForEach),
                        &as_body_nodes(&body),
                        in_lambda,
                    )?;
                }
                StmtKind::Switch {
                    scrutinee,
                    sections,
                } => {
                    self.visit_expr(branch, scrutinee)?;
                    for section in sections {
                        if let Some(binding) = section.binding {
                            // A matched pattern label binds a non-null value.
                            self.assignments.push(Assignment {
                                symbol: binding,
                                expr: scrutinee,
                                target: None,
                                state: ValueState::NotNull,
                            });
                        }
                        self.build(
                            Some(branch),
                            Condition::empty(ConditionKind::None),
                            &as_body_nodes(&section.body),
                            in_lambda,
                        )?;
                    }
                }
                StmtKind::Try {
                    body,
                    catches,
                    finally,
                } => {
                    self.build(
                        Some(branch),
                        Condition::empty(ConditionKind::None),
                        &as_body_nodes(&body),
                        in_lambda,
                    )?;
                    for catch in catches {
                        self.build(
                            Some(branch),
                            Condition::empty(ConditionKind::None),
                            &as_body_nodes(&catch),
                            in_lambda,
                        )?;
                    }
                    if let Some(finally) = finally {
                        self.build(
                            Some(branch),
                            Condition::empty(ConditionKind::None),
                            &as_body_nodes(&finally),
                            in_lambda,
                        )?;
                    }
                }
                StmtKind::Using { body } | StmtKind::Lock { body } => {
                    self.build(
                        Some(branch),
                        Condition::empty(ConditionKind::None),
                        &as_body_nodes(&body),
                        in_lambda,
                    )?;
                }
                StmtKind::Block(body) => {
                    self.build(
                        Some(branch),
                        Condition::empty(ConditionKind::None),
                        &as_body_nodes(&body),
                        in_lambda,
                    )?;
                }
                StmtKind::Expr(expr) => {
                    if let Some(target) = self.constraint_target(expr) {
                        // The assertion proves its target for the rest of
                        // the enclosing sequence.
                        self.has_constraints = true;
                        let atom = Atom::State {
                            key: Fingerprint::of(self.ast, target),
                            expr: target,
                            state: ValueState::NotNull,
                        };
                        let condition = Condition::single(ConditionKind::Constraint, atom);
                        self.build(Some(branch), condition, rest, in_lambda)?;
                        break;
                    }
                    if let ExprKind::Assign { value, .. } = self.ast.expr(expr).kind {
                        if let ExprKind::Conditional {
                            cond,
                            when_true,
                            when_false,
                        } = self.ast.expr(value).kind
                        {
                            self.visit_stmt(branch, stmt)?;
                            let condition = self.decomposer().parse(ConditionKind::Return, cond);
                            self.build(
                                Some(branch),
                                condition.clone(),
                                &[BodyNode::Expr(when_true)],
                                in_lambda,
                            )?;
                            self.build(
                                Some(branch),
                                condition.negate(),
                                &[BodyNode::Expr(when_false)],
                                in_lambda,
                            )?;
                            continue;
                        }
                    }
                    self.visit_stmt(branch, stmt)?;
                    self.tree_body(branch).push(node);
                }
                _ => {
                    self.visit_stmt(branch, stmt)?;
                    self.tree_body(branch).push(node);
                }
            }
        }
        Ok(branch)
    }

    fn tree_body(&mut self, branch: BranchId) -> &mut Vec<BodyNode> {
        &mut self.tree.branches[branch.0 as usize].body
    }

    /// Recognizes an assert-not-null-or-fail statement over a single
    /// field/property/local, directly or behind a lambda argument.
    fn constraint_target(&self, expr: ExprId) -> Option<ExprId> {
        let ExprKind::Invoke { callee, args } = &self.ast.expr(expr).kind else {
            return None;
        };
        let symbol = self.model.symbol_of(*callee)?;
        if self.model.check_idiom(symbol) != Some(CheckIdiom::Constraint) {
            return None;
        }
        let first = args.first()?.expr;
        let target = match &self.ast.expr(first).kind {
            ExprKind::Lambda {
                body: LambdaBody::Expr(body),
            } => *body,
            _ => first,
        };
        match self.ast.expr(target).kind {
            ExprKind::Ident(_) | ExprKind::Member { .. } => Some(target),
            _ => None,
        }
    }

    fn visit_stmt(&mut self, branch: BranchId, stmt: StmtId) -> Result<(), ParseFailed> {
        match self.ast.stmt(stmt).kind.clone() {
            StmtKind::Expr(expr) => self.visit_expr(branch, expr),
            StmtKind::Local { symbol, init } => {
                if let Some(init) = init {
                    let state = value_state_of(self.ast, self.model, init)?;
                    self.assignments.push(Assignment {
                        symbol,
                        expr: init,
                        target: None,
                        state,
                    });
                    self.visit_expr(branch, init)?;
                }
                Ok(())
            }
            StmtKind::Return(expr) | StmtKind::Throw(expr) => match expr {
                Some(expr) => self.visit_expr(branch, expr),
                None => Ok(()),
            },
            _ => Ok(()),
        }
    }

    /// Scans an expression for assignments, out-bindings, pattern bindings
    /// and nested closures. Closures are queued, not entered: their
    /// statements belong to their own detached tree.
    fn visit_expr(&mut self, branch: BranchId, expr: ExprId) -> Result<(), ParseFailed> {
        match self.ast.expr(expr).kind.clone() {
            ExprKind::Assign { target, value } => {
                if let Some(symbol) = self.model.symbol_of(target) {
                    let state = value_state_of(self.ast, self.model, value)?;
                    self.assignments.push(Assignment {
                        symbol,
                        expr,
                        target: Some(target),
                        state,
                    });
                }
                self.visit_expr(branch, target)?;
                self.visit_expr(branch, value)
            }
            ExprKind::Invoke { callee, args } => {
                self.visit_expr(branch, callee)?;
                for arg in args {
                    if arg.is_out {
                        if let Some(symbol) = self.model.symbol_of(arg.expr) {
                            // Write-only until proven otherwise.
                            self.assignments.push(Assignment {
                                symbol,
                                expr: arg.expr,
                                target: None,
                                state: ValueState::Unknown,
                            });
                        }
                    }
                    self.visit_expr(branch, arg.expr)?;
                }
                Ok(())
            }
            ExprKind::Is {
                operand, binding, ..
            } => {
                if let Some(binding) = binding {
                    // A successful test guarantees a non-null instance.
                    self.assignments.push(Assignment {
                        symbol: binding,
                        expr: operand,
                        target: None,
                        state: ValueState::NotNull,
                    });
                }
                self.visit_expr(branch, operand)
            }
            ExprKind::Lambda { .. } => {
                self.lambdas.push_back((branch, expr));
                Ok(())
            }
            ExprKind::Member { recv, .. } | ExprKind::CondAccess { recv, .. } => {
                self.visit_expr(branch, recv)
            }
            ExprKind::Binary { lhs, rhs, .. } => {
                self.visit_expr(branch, lhs)?;
                self.visit_expr(branch, rhs)
            }
            ExprKind::Not { operand }
            | ExprKind::Cast { operand, .. }
            | ExprKind::As { operand, .. }
            | ExprKind::Paren(operand)
            | ExprKind::Await(operand) => self.visit_expr(branch, operand),
            ExprKind::Conditional {
                cond,
                when_true,
                when_false,
            } => {
                self.visit_expr(branch, cond)?;
                self.visit_expr(branch, when_true)?;
                self.visit_expr(branch, when_false)
            }
            ExprKind::New { args, .. } => {
                for arg in args {
                    self.visit_expr(branch, arg)?;
                }
                Ok(())
            }
            ExprKind::Index { recv, index } => {
                self.visit_expr(branch, recv)?;
                self.visit_expr(branch, index)
            }
            ExprKind::Ident(_)
            | ExprKind::Null
            | ExprKind::Str(_)
            | ExprKind::Int(_)
            | ExprKind::Bool(_)
            | ExprKind::This
            | ExprKind::Opaque(_) => Ok(()),
        }
    }
}

fn as_body_nodes(stmts: &[StmtId]) -> Vec<BodyNode> {
    stmts.iter().map(|s| BodyNode::Stmt(*s)).collect()
}

/// Shallow exit check: only an immediate `return`/`throw`/`continue` child
/// counts. Exits buried in nested conditionals are deliberately not
/// detected; hoisting stays conservative.
fn exits_in_all_paths(ast: &Ast, stmts: &[StmtId]) -> bool {
    stmts.iter().any(|stmt| {
        matches!(
            ast.stmt(*stmt).kind,
            StmtKind::Return(_) | StmtKind::Throw(_) | StmtKind::Continue
        )
    })
}
