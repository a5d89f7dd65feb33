use std::collections::VecDeque;

use crate::ast::{Ast, BinaryOp, ExprId, ExprKind, TypeId};
use crate::flow::condition::{Atom, Combinator, Condition, ConditionKind};
use crate::flow::fingerprint::Fingerprint;
use crate::semantics::{CheckIdiom, SemanticModel};
use crate::timings::{OperationTimer, TimingOperation};
use crate::value::ValueState;

/// Pending combinator between a worklist entry and the one after it.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum PendingOp {
    Or,
    And,
    None,
}

/// One partially-reduced sub-expression of the guard. The worklist keeps
/// rewriting entries in place until only atomic facts remain; the order of
/// entries mirrors evaluation order.
#[derive(Clone, Debug)]
struct Entry {
    expr: ExprId,
    op: PendingOp,
    value: ValueState,
    negated: bool,
    narrow: Option<TypeId>,
    is_null_check: bool,
}

impl Entry {
    fn seed(expr: ExprId) -> Entry {
        Entry {
            expr,
            op: PendingOp::None,
            value: ValueState::Discard,
            negated: false,
            narrow: None,
            is_null_check: false,
        }
    }
}

/// Parses a boolean guard into a `Condition`, rewriting known idioms into
/// null facts. Unrecognized shapes stay behind as inert atoms: they prove
/// nothing but keep their position, which short-circuit truncation needs.
pub(crate) struct GuardDecomposer<'a, M: SemanticModel + ?Sized> {
    ast: &'a Ast,
    model: &'a M,
}

impl<'a, M: SemanticModel + ?Sized> GuardDecomposer<'a, M> {
    pub(crate) fn new(ast: &'a Ast, model: &'a M) -> Self {
        Self { ast, model }
    }

    pub(crate) fn parse(&self, kind: ConditionKind, guard: ExprId) -> Condition {
        let _timer = OperationTimer::new(TimingOperation::DecomposeGuard);
        let mut entries = vec![Entry::seed(guard)];
        let mut order = vec![0usize];
        let mut queue = VecDeque::from([0usize]);

        while let Some(index) = queue.pop_front() {
            self.explode(&mut entries, &mut order, &mut queue, index);
        }

        let mut condition = Condition::empty(kind);
        let mut last_op = PendingOp::None;
        for &index in &order {
            let entry = &entries[index];
            let op = match last_op {
                PendingOp::Or => Combinator::Or,
                PendingOp::And => Combinator::And,
                PendingOp::None => Combinator::Mixed,
            };
            condition = condition.with(op, self.atom_for(entry));
            last_op = entry.op;
        }
        condition
    }

    fn atom_for(&self, entry: &Entry) -> Atom {
        if let Some(ty) = entry.narrow {
            return Atom::TypeTest {
                key: Fingerprint::narrowed(self.ast, entry.expr, ty),
                expr: entry.expr,
                negated: entry.negated,
            };
        }
        let state = if entry.negated {
            entry.value.negated()
        } else {
            entry.value
        };
        Atom::State {
            key: Fingerprint::of(self.ast, entry.expr),
            expr: entry.expr,
            state,
        }
    }

    fn explode(
        &self,
        entries: &mut Vec<Entry>,
        order: &mut Vec<usize>,
        queue: &mut VecDeque<usize>,
        index: usize,
    ) {
        let expr = entries[index].expr;
        match self.ast.expr(expr).kind.clone() {
            ExprKind::Binary { op, lhs, rhs } => match op {
                BinaryOp::Eq | BinaryOp::Ne => {
                    if let Some(target) = null_comparison_target(self.ast, lhs, rhs) {
                        let state = if op == BinaryOp::Ne {
                            ValueState::NotNull
                        } else {
                            ValueState::Null
                        };
                        let entry = &mut entries[index];
                        entry.expr = target;
                        entry.value = if entry.negated { state.negated() } else { state };
                        entry.negated = false;
                        entry.is_null_check = true;
                        queue.push_back(index);
                    }
                }
                BinaryOp::And | BinaryOp::Or => {
                    let parent = entries[index].clone();
                    // Under a pending negation the split applies De Morgan:
                    // the operator flips and both halves stay negated.
                    let mut split = match op {
                        BinaryOp::And => PendingOp::And,
                        _ => PendingOp::Or,
                    };
                    if parent.negated {
                        split = match split {
                            PendingOp::And => PendingOp::Or,
                            PendingOp::Or => PendingOp::And,
                            PendingOp::None => PendingOp::None,
                        };
                    }
                    let mut left = Entry::seed(lhs);
                    left.op = split;
                    left.negated = parent.negated;
                    entries[index] = left;
                    queue.push_back(index);

                    let mut right = Entry::seed(rhs);
                    right.op = parent.op;
                    right.negated = parent.negated;
                    entries.push(right);
                    let new_index = entries.len() - 1;
                    insert_after(order, index, new_index);
                    queue.push_back(new_index);
                }
                _ => {}
            },
            ExprKind::Not { operand } => {
                let entry = &mut entries[index];
                entry.expr = operand;
                entry.negated = !entry.negated;
                queue.push_back(index);
            }
            ExprKind::Is { operand, ty, .. } => {
                let entry = &mut entries[index];
                entry.expr = operand;
                entry.narrow = Some(ty);
                queue.push_back(index);
            }
            ExprKind::Invoke { callee, args } => {
                let Some(symbol) = self.model.symbol_of(callee) else {
                    return;
                };
                match self.model.check_idiom(symbol) {
                    Some(CheckIdiom::Emptiness) => {
                        // Truth of the predicate is the null case.
                        let Some(arg) = args.first() else {
                            return;
                        };
                        let entry = &mut entries[index];
                        entry.value = if entry.negated {
                            ValueState::NotNull
                        } else {
                            ValueState::Null
                        };
                        entry.expr = arg.expr;
                        entry.negated = false;
                        entry.is_null_check = true;
                        queue.push_back(index);
                    }
                    Some(CheckIdiom::TryParse) => {
                        // Success of the call proves the out binding.
                        let Some(out) = args.iter().find(|arg| arg.is_out) else {
                            return;
                        };
                        let entry = &mut entries[index];
                        entry.value = if entry.negated {
                            ValueState::Null
                        } else {
                            ValueState::NotNull
                        };
                        entry.expr = out.expr;
                        entry.negated = false;
                        entry.is_null_check = true;
                        queue.push_back(index);
                    }
                    _ => {}
                }
            }
            ExprKind::CondAccess { recv, .. } => {
                let parent = entries[index].clone();
                let null_direction = (parent.value == ValueState::Null) != parent.negated;
                let (state, link_op) = if null_direction {
                    (ValueState::Null, PendingOp::Or)
                } else {
                    (ValueState::NotNull, PendingOp::And)
                };

                // The receiver check comes first in evaluation order.
                let mut receiver = Entry::seed(recv);
                receiver.op = link_op;
                receiver.value = state;
                receiver.is_null_check = true;
                entries[index] = receiver;
                queue.push_back(index);

                // The member itself; its fingerprint flattens `?.` so it is
                // already fully reduced.
                let mut link = Entry::seed(expr);
                link.op = parent.op;
                link.value = state;
                link.is_null_check = true;
                entries.push(link);
                let new_index = entries.len() - 1;
                insert_after(order, index, new_index);
            }
            ExprKind::Paren(inner) => {
                entries[index].expr = inner;
                queue.push_back(index);
            }
            ExprKind::Assign { target, .. } => {
                // Only null checks look through assignments, for guards of
                // the shape `while ((x = Next()) != null)`.
                if entries[index].is_null_check {
                    entries[index].expr = target;
                }
            }
            _ => {}
        }
    }
}

fn null_comparison_target(ast: &Ast, lhs: ExprId, rhs: ExprId) -> Option<ExprId> {
    let lhs_null = matches!(ast.expr(lhs).kind, ExprKind::Null);
    let rhs_null = matches!(ast.expr(rhs).kind, ExprKind::Null);
    if lhs_null && !rhs_null {
        return Some(rhs);
    }
    if rhs_null {
        return Some(lhs);
    }
    None
}

fn insert_after(order: &mut Vec<usize>, after: usize, value: usize) {
    let position = order
        .iter()
        .position(|&index| index == after)
        .map(|position| position + 1)
        .unwrap_or(order.len());
    order.insert(position, value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::AstBuilder;

    fn key_of(ast: &Ast, expr: ExprId) -> Fingerprint {
        Fingerprint::of(ast, expr)
    }

    #[test]
    fn null_comparisons_become_state_atoms() {
        let mut b = AstBuilder::new();
        let a = b.symbols_mut().declare_local("a");
        let ident = b.ident(a);
        let guard = b.ne_null(ident);
        let probe = b.ident(a);
        let (ast, symbols) = b.finish();

        let condition = GuardDecomposer::new(&ast, &symbols).parse(ConditionKind::If, guard);

        assert!(condition.is_not_null(&key_of(&ast, probe)));
        assert_eq!(1, condition.atoms().len());
        assert_eq!(None, condition.combinator());
    }

    #[test]
    fn negated_null_comparison_flips_state() {
        let mut b = AstBuilder::new();
        let a = b.symbols_mut().declare_local("a");
        let ident = b.ident(a);
        let check = b.eq_null(ident);
        let guard = b.not(check);
        let probe = b.ident(a);
        let (ast, symbols) = b.finish();

        let condition = GuardDecomposer::new(&ast, &symbols).parse(ConditionKind::If, guard);

        assert!(condition.is_not_null(&key_of(&ast, probe)));
    }

    #[test]
    fn conjunction_preserves_atom_order() {
        let mut b = AstBuilder::new();
        let a = b.symbols_mut().declare_local("a");
        let use_sym = b.symbols_mut().declare_method("Use", "C.Use");
        let ident = b.ident(a);
        let check = b.ne_null(ident);
        let callee = b.ident(use_sym);
        let arg = b.ident(a);
        let call = b.invoke(callee, &[arg]);
        let guard = b.and(check, call);
        let (ast, symbols) = b.finish();

        let condition = GuardDecomposer::new(&ast, &symbols).parse(ConditionKind::If, guard);

        assert_eq!(2, condition.atoms().len());
        assert_eq!(Some(Combinator::And), condition.combinator());
        // The inert call atom sits after the null check.
        assert!(condition.atoms()[0].proves_not_null(&key_of(&ast, ident)));
        assert!(!condition.atoms()[1].proves_not_null(&key_of(&ast, ident)));
    }

    #[test]
    fn de_morgan_applies_under_negation() {
        // !(a == null || c == null) proves both a and c.
        let mut b = AstBuilder::new();
        let a = b.symbols_mut().declare_local("a");
        let c = b.symbols_mut().declare_local("c");
        let ea = b.ident(a);
        let left = b.eq_null(ea);
        let ec = b.ident(c);
        let right = b.eq_null(ec);
        let both = b.or(left, right);
        let guard = b.not(both);
        let (ast, symbols) = b.finish();

        let condition = GuardDecomposer::new(&ast, &symbols).parse(ConditionKind::If, guard);

        assert_eq!(Some(Combinator::And), condition.combinator());
        assert!(condition.is_not_null(&key_of(&ast, ea)));
        assert!(condition.is_not_null(&key_of(&ast, ec)));
    }

    #[test]
    fn emptiness_idiom_matches_plain_null_check() {
        let mut b = AstBuilder::new();
        let s = b.symbols_mut().declare_parameter("s");
        let is_empty = b
            .symbols_mut()
            .declare_method("IsNullOrEmpty", "String.IsNullOrEmpty");
        let callee = b.ident(is_empty);
        let arg = b.ident(s);
        let call = b.invoke(callee, &[arg]);
        let idiom_guard = b.not(call);
        let plain = b.ident(s);
        let plain_guard = b.ne_null(plain);
        let (ast, symbols) = b.finish();
        let decomposer = GuardDecomposer::new(&ast, &symbols);

        let via_idiom = decomposer.parse(ConditionKind::If, idiom_guard);
        let via_null = decomposer.parse(ConditionKind::If, plain_guard);

        let key = key_of(&ast, plain);
        assert!(via_idiom.is_not_null(&key));
        assert!(via_null.is_not_null(&key));
        assert_eq!(via_null.atoms().len(), via_idiom.atoms().len());
    }

    #[test]
    fn try_parse_idiom_promotes_the_out_argument() {
        let mut b = AstBuilder::new();
        let raw = b.symbols_mut().declare_parameter("raw");
        let uri = b.symbols_mut().declare_local("uri");
        let try_create = b.symbols_mut().declare_method("TryCreate", "Uri.TryCreate");
        let callee = b.ident(try_create);
        let input = b.ident(raw);
        let out_expr = b.ident(uri);
        let out = b.out_arg(out_expr);
        let call = b.invoke_with(
            callee,
            vec![
                crate::ast::Arg {
                    expr: input,
                    is_out: false,
                },
                out,
            ],
        );
        let (ast, symbols) = b.finish();

        let condition = GuardDecomposer::new(&ast, &symbols).parse(ConditionKind::If, call);

        assert!(condition.is_not_null(&key_of(&ast, out_expr)));
    }

    #[test]
    fn conditional_access_chain_expands_to_prefixes() {
        // item?.Id != null  ==>  item != null && item.Id != null
        let mut b = AstBuilder::new();
        let item = b.symbols_mut().declare_parameter("item");
        let id = b.symbols_mut().declare_property("Id");
        let recv = b.ident(item);
        let access = b.cond_access(recv, id);
        let guard = b.ne_null(access);
        let plain_recv = b.ident(item);
        let plain = b.member(plain_recv, id);
        let (ast, symbols) = b.finish();

        let condition = GuardDecomposer::new(&ast, &symbols).parse(ConditionKind::If, guard);

        assert_eq!(2, condition.atoms().len());
        assert_eq!(Some(Combinator::And), condition.combinator());
        assert!(condition.is_not_null(&key_of(&ast, recv)));
        assert!(condition.is_not_null(&key_of(&ast, plain)));
    }

    #[test]
    fn negative_conditional_access_expands_with_or() {
        // item?.Id == null  ==>  item == null || item.Id == null
        let mut b = AstBuilder::new();
        let item = b.symbols_mut().declare_parameter("item");
        let id = b.symbols_mut().declare_property("Id");
        let recv = b.ident(item);
        let access = b.cond_access(recv, id);
        let guard = b.eq_null(access);
        let (ast, symbols) = b.finish();

        let condition = GuardDecomposer::new(&ast, &symbols).parse(ConditionKind::If, guard);

        assert_eq!(2, condition.atoms().len());
        assert_eq!(Some(Combinator::Or), condition.combinator());
        assert!(!condition.is_not_null(&key_of(&ast, recv)));
    }

    #[test]
    fn deep_conditional_access_orders_prefixes() {
        // a?.B?.C != null  ==>  a != null && a.B != null && a.B.C != null
        let mut b = AstBuilder::new();
        let a = b.symbols_mut().declare_parameter("a");
        let prop_b = b.symbols_mut().declare_property("B");
        let prop_c = b.symbols_mut().declare_property("C");
        let root = b.ident(a);
        let ab = b.cond_access(root, prop_b);
        let abc = b.cond_access(ab, prop_c);
        let guard = b.ne_null(abc);
        let (ast, symbols) = b.finish();

        let condition = GuardDecomposer::new(&ast, &symbols).parse(ConditionKind::If, guard);

        let keys: Vec<String> = condition
            .atoms()
            .iter()
            .map(|atom| atom.key().key().to_string())
            .collect();
        assert_eq!(vec!["a", "a.B", "a.B.C"], keys);
    }

    #[test]
    fn loop_guard_assignment_reduces_to_its_target() {
        // while ((x = Next()) != null)
        let mut b = AstBuilder::new();
        let x = b.symbols_mut().declare_local("x");
        let next = b.symbols_mut().declare_method("Next", "Source.Next");
        let target = b.ident(x);
        let callee = b.ident(next);
        let call = b.invoke(callee, &[]);
        let assign = b.assign(target, call);
        let paren = b.paren(assign);
        let guard = b.ne_null(paren);
        let probe = b.ident(x);
        let (ast, symbols) = b.finish();

        let condition = GuardDecomposer::new(&ast, &symbols).parse(ConditionKind::While, guard);

        assert!(condition.is_not_null(&key_of(&ast, probe)));
        assert_eq!(ConditionKind::While, condition.kind());
    }

    #[test]
    fn type_test_produces_a_narrowed_atom() {
        let mut b = AstBuilder::new();
        let x = b.symbols_mut().declare_parameter("x");
        let item_ty = b.intern_type("Item");
        let operand = b.ident(x);
        let guard = b.is_type(operand, item_ty, None);
        let probe = b.ident(x);
        let (ast, symbols) = b.finish();

        let condition = GuardDecomposer::new(&ast, &symbols).parse(ConditionKind::If, guard);

        // The broad type-less query key matches the narrowed fact.
        assert!(condition.is_not_null(&key_of(&ast, probe)));
        // Negating turns the test into a negated atom, which proves nothing.
        assert!(!condition.negate().is_not_null(&key_of(&ast, probe)));
    }

    #[test]
    fn unrecognized_shapes_are_dropped_silently() {
        let mut b = AstBuilder::new();
        let opaque = b.opaque("ptr->field");
        let a = b.symbols_mut().declare_local("a");
        let ident = b.ident(a);
        let check = b.ne_null(ident);
        let guard = b.and(opaque, check);
        let (ast, symbols) = b.finish();

        let condition = GuardDecomposer::new(&ast, &symbols).parse(ConditionKind::If, guard);

        // The opaque atom keeps its position but proves nothing.
        assert_eq!(2, condition.atoms().len());
        assert!(condition.is_not_null(&key_of(&ast, ident)));
        assert!(!condition.atoms()[0].proves_not_null(&key_of(&ast, ident)));
    }
}
