use std::fmt;

use crate::ast::{Ast, ExprId};
use crate::flow::fingerprint::Fingerprint;
use crate::semantics::{SemanticModel, SymbolId};
use crate::value::ValueState;

/// Which construct produced a condition; drives the loop-carried and
/// constraint special cases in the point queries.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConditionKind {
    None,
    If,
    While,
    ForEach,
    Constraint,
    Return,
}

/// How the atoms of a condition combine.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Combinator {
    Or,
    And,
    Mixed,
}

/// One provable fact inside a condition. The expression records where in
/// the guard the fact sits, which is what short-circuit truncation orders
/// by.
#[derive(Clone, Debug)]
pub enum Atom {
    State {
        key: Fingerprint,
        expr: ExprId,
        state: ValueState,
    },
    TypeTest {
        key: Fingerprint,
        expr: ExprId,
        negated: bool,
    },
}

impl Atom {
    pub fn key(&self) -> &Fingerprint {
        match self {
            Atom::State { key, .. } | Atom::TypeTest { key, .. } => key,
        }
    }

    pub fn expr(&self) -> ExprId {
        match self {
            Atom::State { expr, .. } | Atom::TypeTest { expr, .. } => *expr,
        }
    }

    pub fn proves_not_null(&self, key: &Fingerprint) -> bool {
        match self {
            Atom::State {
                key: own, state, ..
            } => *state == ValueState::NotNull && own.contains(key),
            Atom::TypeTest {
                key: own, negated, ..
            } => !negated && own.contains(key),
        }
    }

    pub fn proves_null(&self, key: &Fingerprint) -> bool {
        match self {
            Atom::State {
                key: own, state, ..
            } => *state == ValueState::Null && own.contains(key),
            Atom::TypeTest {
                key: own, negated, ..
            } => *negated && own.contains(key),
        }
    }

    pub fn negated(&self) -> Atom {
        match self {
            Atom::State { key, expr, state } => Atom::State {
                key: key.clone(),
                expr: *expr,
                state: state.negated(),
            },
            Atom::TypeTest { key, expr, negated } => Atom::TypeTest {
                key: key.clone(),
                expr: *expr,
                negated: !negated,
            },
        }
    }
}

/// An immutable boolean fact known to hold where a branch is reachable:
/// ordered atoms joined by one combinator. The order of atoms mirrors
/// evaluation order and is load-bearing for short-circuit truncation.
#[derive(Clone, Debug)]
pub struct Condition {
    kind: ConditionKind,
    combinator: Option<Combinator>,
    atoms: Vec<Atom>,
}

impl Condition {
    pub fn empty(kind: ConditionKind) -> Condition {
        Condition {
            kind,
            combinator: None,
            atoms: Vec::new(),
        }
    }

    pub fn single(kind: ConditionKind, atom: Atom) -> Condition {
        Condition {
            kind,
            combinator: None,
            atoms: vec![atom],
        }
    }

    fn assemble(
        kind: ConditionKind,
        combinator: Option<Combinator>,
        atoms: Vec<Atom>,
        partial: bool,
    ) -> Condition {
        let combinator = if atoms.len() > 1 {
            match combinator {
                Some(combinator) => Some(combinator),
                None => panic!("a condition with multiple atoms requires a combinator"),
            }
        } else if partial {
            // A truncated prefix keeps its parent's combinator even with a
            // single atom so later queries inherit the short-circuit
            // semantics of the full guard.
            combinator
        } else {
            None
        };
        Condition {
            kind,
            combinator,
            atoms,
        }
    }

    fn combine(existing: Option<Combinator>, new: Combinator) -> Combinator {
        match new {
            Combinator::And => match existing {
                None | Some(Combinator::And) => Combinator::And,
                _ => Combinator::Mixed,
            },
            Combinator::Or => match existing {
                None | Some(Combinator::Or) => Combinator::Or,
                _ => Combinator::Mixed,
            },
            Combinator::Mixed => Combinator::Mixed,
        }
    }

    /// Appends an atom joined by `op` to the atoms already present.
    pub fn with(self, op: Combinator, atom: Atom) -> Condition {
        let combinator = Self::combine(self.combinator, op);
        let mut atoms = self.atoms;
        atoms.push(atom);
        Self::assemble(self.kind, Some(combinator), atoms, false)
    }

    pub fn kind(&self) -> ConditionKind {
        self.kind
    }

    pub fn combinator(&self) -> Option<Combinator> {
        self.combinator
    }

    pub fn atoms(&self) -> &[Atom] {
        &self.atoms
    }

    pub fn negate(&self) -> Condition {
        let combinator = self.combinator.map(|combinator| match combinator {
            Combinator::Or => Combinator::And,
            Combinator::And => Combinator::Or,
            Combinator::Mixed => Combinator::Mixed,
        });
        let atoms = self.atoms.iter().map(Atom::negated).collect();
        Condition {
            kind: self.kind,
            combinator,
            atoms,
        }
    }

    /// Whether this condition as a whole proves `key` non-null. Only an
    /// all-`And` (or single-atom) condition guarantees every atom held.
    pub fn is_not_null(&self, key: &Fingerprint) -> bool {
        match self.combinator {
            None | Some(Combinator::And) => {
                self.atoms.iter().any(|atom| atom.proves_not_null(key))
            }
            _ => false,
        }
    }

    /// Like `is_not_null`, but valid for a truncated prefix evaluated
    /// inside the guard itself. Under `And` every earlier atom held, so a
    /// non-null atom suffices; under `Or` a later disjunct only runs when
    /// the earlier one was false, so a null atom proves the opposite.
    pub fn is_not_null_short_circuit(&self, key: &Fingerprint) -> bool {
        match self.combinator {
            None | Some(Combinator::And) => {
                self.atoms.iter().any(|atom| atom.proves_not_null(key))
            }
            Some(Combinator::Or) => self.atoms.iter().any(|atom| atom.proves_null(key)),
            Some(Combinator::Mixed) => false,
        }
    }

    /// The ordered prefix of atoms evaluated strictly before `node`, or
    /// `None` when `node` is not part of this condition at all.
    pub fn truncate_before(&self, ast: &Ast, node: ExprId) -> Option<Condition> {
        let node_span = ast.expr_span(node);
        let prefix: Vec<Atom> = self
            .atoms
            .iter()
            .take_while(|atom| {
                atom.expr() != node && !ast.expr_span(atom.expr()).contains(node_span)
            })
            .cloned()
            .collect();
        if prefix.len() == self.atoms.len() {
            return None;
        }
        Some(Self::assemble(self.kind, self.combinator, prefix, true))
    }

    pub fn is_constraint_for(&self, key: &Fingerprint) -> bool {
        self.kind == ConditionKind::Constraint && self.atoms.iter().any(|atom| atom.key() == key)
    }

    /// Whether this is a loop guard over `symbol`.
    pub fn is_while_over<M: SemanticModel + ?Sized>(&self, model: &M, symbol: SymbolId) -> bool {
        self.kind == ConditionKind::While
            && self
                .atoms
                .iter()
                .any(|atom| model.symbol_of(atom.expr()) == Some(symbol))
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.atoms.is_empty() {
            return write!(f, "if (true)");
        }
        let prefix = match self.kind {
            ConditionKind::While => "while",
            ConditionKind::Constraint => "Constraint",
            _ => "if",
        };
        write!(f, "{prefix} (")?;
        for (index, atom) in self.atoms.iter().enumerate() {
            if index > 0 {
                write!(f, " {:?} ", self.combinator.unwrap_or(Combinator::Mixed))?;
            }
            match atom {
                Atom::State { key, state, .. } => match state {
                    ValueState::NotNull => write!(f, "{key} != null")?,
                    ValueState::Null => write!(f, "{key} == null")?,
                    ValueState::Unknown => write!(f, "{key} == unknown")?,
                    ValueState::Discard => write!(f, "{key}")?,
                },
                Atom::TypeTest { key, negated, .. } => {
                    if *negated {
                        write!(f, "!({key} is ...)")?;
                    } else {
                        write!(f, "{key} is ...")?;
                    }
                }
            }
        }
        write!(f, ")")
    }
}
