use std::fmt;

use crate::ast::{Ast, BinaryOp, ExprId, ExprKind, Span};
use crate::semantics::{SemanticModel, SymbolKind};

/// What is known about the nullness of one value.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum ValueState {
    /// No information either way.
    Unknown,
    /// Cannot be null.
    NotNull,
    /// Can be (or is) null.
    Null,
    /// Throw-away classification; cheaper than making the lattice optional.
    Discard,
}

impl ValueState {
    pub fn negated(self) -> ValueState {
        match self {
            ValueState::NotNull => ValueState::Null,
            ValueState::Null => ValueState::NotNull,
            ValueState::Discard => ValueState::Discard,
            ValueState::Unknown => ValueState::Unknown,
        }
    }

    /// Pointwise combination of the two arms of a conditional expression.
    pub fn combine(self, other: ValueState) -> ValueState {
        if self == ValueState::Unknown || other == ValueState::Unknown {
            return ValueState::Unknown;
        }
        if self != other {
            return ValueState::Unknown;
        }
        self
    }
}

/// The one hard failure of the engine: an expression shape the value
/// classifier cannot see through. Carries the offending span so the host
/// can surface a single diagnostic instead of losing the whole unit.
#[derive(Clone, Debug)]
pub struct ParseFailed {
    pub span: Span,
    pub what: String,
}

impl fmt::Display for ParseFailed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "parse failed on {} at {}..{}",
            self.what, self.span.start, self.span.end
        )
    }
}

impl std::error::Error for ParseFailed {}

/// Peels wrapper expressions down to the value-producing core: the member
/// of an access chain, the right side of assignments and `??`, the operand
/// of casts, parens and `await`.
pub fn find_underlying_member(ast: &Ast, expr: ExprId) -> Result<ExprId, ParseFailed> {
    match &ast.expr(expr).kind {
        ExprKind::Paren(inner)
        | ExprKind::Cast { operand: inner, .. }
        | ExprKind::Not { operand: inner }
        | ExprKind::As { operand: inner, .. }
        | ExprKind::Await(inner) => find_underlying_member(ast, *inner),
        ExprKind::Assign { value, .. } => find_underlying_member(ast, *value),
        ExprKind::Binary {
            op: BinaryOp::Coalesce,
            rhs,
            ..
        } => find_underlying_member(ast, *rhs),
        ExprKind::Opaque(text) => Err(ParseFailed {
            span: ast.expr_span(expr),
            what: text.clone(),
        }),
        _ => Ok(expr),
    }
}

/// Classifies the value an expression produces, for assignment tracking.
pub fn value_state_of<M: SemanticModel + ?Sized>(
    ast: &Ast,
    model: &M,
    expr: ExprId,
) -> Result<ValueState, ParseFailed> {
    let state = match &ast.expr(expr).kind {
        ExprKind::Null => ValueState::Null,
        ExprKind::Str(_) | ExprKind::Int(_) | ExprKind::Bool(_) => ValueState::NotNull,
        ExprKind::This
        | ExprKind::Lambda { .. }
        | ExprKind::New { .. }
        | ExprKind::Index { .. } => ValueState::NotNull,
        ExprKind::Ident(_) | ExprKind::Member { .. } | ExprKind::CondAccess { .. } => {
            symbol_state(model, expr)
        }
        ExprKind::Invoke { callee, .. } => invocation_state(model, *callee),
        ExprKind::Assign { value, .. } => value_state_of(ast, model, *value)?,
        ExprKind::Binary {
            op: BinaryOp::Coalesce,
            rhs,
            ..
        } => {
            let member = find_underlying_member(ast, *rhs)?;
            value_state_of(ast, model, member)?
        }
        ExprKind::Binary {
            op: BinaryOp::Add,
            lhs,
            rhs,
        } => {
            // String concatenation never yields null; anything else is out
            // of scope for this analysis.
            let literal = matches!(ast.expr(*lhs).kind, ExprKind::Str(_))
                || matches!(ast.expr(*rhs).kind, ExprKind::Str(_));
            if literal {
                ValueState::NotNull
            } else {
                ValueState::Unknown
            }
        }
        ExprKind::Conditional {
            when_true,
            when_false,
            ..
        } => {
            let when_true = value_state_of(ast, model, *when_true)?;
            let when_false = value_state_of(ast, model, *when_false)?;
            when_true.combine(when_false)
        }
        ExprKind::Cast { operand, .. } | ExprKind::Paren(operand) | ExprKind::Await(operand) => {
            value_state_of(ast, model, *operand)?
        }
        ExprKind::Is { .. } => ValueState::NotNull,
        ExprKind::As { .. }
        | ExprKind::Not { .. }
        | ExprKind::Binary { .. }
        | ExprKind::Opaque(_) => ValueState::Unknown,
    };
    Ok(state)
}

fn symbol_state<M: SemanticModel + ?Sized>(model: &M, expr: ExprId) -> ValueState {
    let Some(symbol) = model.symbol_of(expr) else {
        return ValueState::Unknown;
    };
    match model.kind_of(symbol) {
        SymbolKind::Local { foreach: true } => ValueState::NotNull,
        SymbolKind::Local { foreach: false } => ValueState::Unknown,
        _ => {
            if model.annotated_non_null(symbol) || model.known_non_null(symbol) {
                ValueState::NotNull
            } else {
                ValueState::Unknown
            }
        }
    }
}

fn invocation_state<M: SemanticModel + ?Sized>(model: &M, callee: ExprId) -> ValueState {
    let Some(symbol) = model.symbol_of(callee) else {
        return ValueState::Unknown;
    };
    if model.annotated_non_null(symbol) || model.known_non_null(symbol) {
        return ValueState::NotNull;
    }
    if model.returns_value_type(symbol) {
        return ValueState::NotNull;
    }
    // An unannotated call returning a reference may hand back null.
    ValueState::Null
}
