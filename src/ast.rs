use crate::semantics::{SymbolId, SymbolKind, SymbolTable};

/// Source region of a node, used for order and containment queries.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub struct Span {
    pub start: u32,
    pub end: u32,
}

impl Span {
    pub fn contains(&self, other: Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

/// Handle to an expression in the arena.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ExprId(pub(crate) u32);

/// Handle to a statement in the arena.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct StmtId(pub(crate) u32);

/// Handle to an interned type name.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct TypeId(pub(crate) u32);

/// Expression node with its source span.
#[derive(Clone, Debug)]
pub struct Expr {
    pub span: Span,
    pub kind: ExprKind,
}

/// Statement node with its source span.
#[derive(Clone, Debug)]
pub struct Stmt {
    pub span: Span,
    pub kind: StmtKind,
}

/// Invocation argument, possibly an `out` binding.
#[derive(Clone, Debug)]
pub struct Arg {
    pub expr: ExprId,
    pub is_out: bool,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BinaryOp {
    Eq,
    Ne,
    And,
    Or,
    Coalesce,
    Add,
}

/// Expression shapes the engine understands. Constructs a frontend cannot
/// express are passed through as `Opaque` and contribute no facts.
#[derive(Clone, Debug)]
pub enum ExprKind {
    Ident(String),
    Null,
    Str(String),
    Int(i64),
    Bool(bool),
    This,
    Member {
        recv: ExprId,
        name: String,
    },
    /// One `?.` link; chains nest in the receiver position.
    CondAccess {
        recv: ExprId,
        name: String,
    },
    Invoke {
        callee: ExprId,
        args: Vec<Arg>,
    },
    Binary {
        op: BinaryOp,
        lhs: ExprId,
        rhs: ExprId,
    },
    Not {
        operand: ExprId,
    },
    Cast {
        ty: TypeId,
        operand: ExprId,
    },
    As {
        operand: ExprId,
        ty: TypeId,
    },
    Is {
        operand: ExprId,
        ty: TypeId,
        binding: Option<SymbolId>,
    },
    Paren(ExprId),
    Assign {
        target: ExprId,
        value: ExprId,
    },
    Conditional {
        cond: ExprId,
        when_true: ExprId,
        when_false: ExprId,
    },
    Lambda {
        body: LambdaBody,
    },
    New {
        ty: TypeId,
        args: Vec<ExprId>,
    },
    Index {
        recv: ExprId,
        index: ExprId,
    },
    Await(ExprId),
    Opaque(String),
}

/// Body of a lambda: a bare expression or a statement block.
#[derive(Clone, Debug)]
pub enum LambdaBody {
    Expr(ExprId),
    Block(Vec<StmtId>),
}

/// One `switch` section; a pattern label binds a fresh symbol.
#[derive(Clone, Debug)]
pub struct SwitchSection {
    pub binding: Option<SymbolId>,
    pub body: Vec<StmtId>,
}

#[derive(Clone, Debug)]
pub enum StmtKind {
    Expr(ExprId),
    Local {
        symbol: SymbolId,
        init: Option<ExprId>,
    },
    If {
        cond: ExprId,
        then: Vec<StmtId>,
        els: Option<Vec<StmtId>>,
    },
    While {
        cond: ExprId,
        body: Vec<StmtId>,
    },
    Do {
        body: Vec<StmtId>,
        cond: ExprId,
    },
    For {
        body: Vec<StmtId>,
    },
    ForEach {
        symbol: SymbolId,
        iterable: ExprId,
        body: Vec<StmtId>,
    },
    Switch {
        scrutinee: ExprId,
        sections: Vec<SwitchSection>,
    },
    Try {
        body: Vec<StmtId>,
        catches: Vec<Vec<StmtId>>,
        finally: Option<Vec<StmtId>>,
    },
    Using {
        body: Vec<StmtId>,
    },
    Lock {
        body: Vec<StmtId>,
    },
    Block(Vec<StmtId>),
    Return(Option<ExprId>),
    Throw(Option<ExprId>),
    Break,
    Continue,
}

/// One analyzed unit: a method or constructor body.
#[derive(Clone, Debug)]
pub struct MethodBody {
    pub parameters: Vec<SymbolId>,
    pub statements: Vec<StmtId>,
}

/// Arena holding the parsed, symbol-resolved representation the engine
/// consumes. Immutable once built; spans encode source order.
#[derive(Clone, Debug, Default)]
pub struct Ast {
    exprs: Vec<Expr>,
    stmts: Vec<Stmt>,
    type_names: Vec<String>,
}

impl Ast {
    pub fn expr(&self, id: ExprId) -> &Expr {
        &self.exprs[id.0 as usize]
    }

    pub fn stmt(&self, id: StmtId) -> &Stmt {
        &self.stmts[id.0 as usize]
    }

    pub fn expr_span(&self, id: ExprId) -> Span {
        self.exprs[id.0 as usize].span
    }

    pub fn stmt_span(&self, id: StmtId) -> Span {
        self.stmts[id.0 as usize].span
    }

    pub fn type_name(&self, id: TypeId) -> &str {
        &self.type_names[id.0 as usize]
    }
}

/// Builds the arena in source order and records symbol resolutions as it
/// goes. Frontends with a real compiler behind them can implement
/// `SemanticModel` themselves instead; the builder doubles as the table
/// population path for tests and lightweight embedders.
#[derive(Default)]
pub struct AstBuilder {
    ast: Ast,
    symbols: SymbolTable,
    cursor: u32,
}

impl AstBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn finish(self) -> (Ast, SymbolTable) {
        (self.ast, self.symbols)
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    pub fn symbols_mut(&mut self) -> &mut SymbolTable {
        &mut self.symbols
    }

    pub fn intern_type(&mut self, name: &str) -> TypeId {
        if let Some(index) = self.ast.type_names.iter().position(|n| n == name) {
            return TypeId(index as u32);
        }
        self.ast.type_names.push(name.to_string());
        TypeId((self.ast.type_names.len() - 1) as u32)
    }

    fn span_over(&mut self, children: &[Span]) -> Span {
        self.cursor += 1;
        let end = self.cursor;
        let start = children
            .iter()
            .map(|span| span.start)
            .min()
            .unwrap_or(end - 1);
        Span { start, end }
    }

    fn push_expr(&mut self, span: Span, kind: ExprKind) -> ExprId {
        self.ast.exprs.push(Expr { span, kind });
        ExprId((self.ast.exprs.len() - 1) as u32)
    }

    fn push_stmt(&mut self, span: Span, kind: StmtKind) -> StmtId {
        self.ast.stmts.push(Stmt { span, kind });
        StmtId((self.ast.stmts.len() - 1) as u32)
    }

    fn child_spans_expr(&self, ids: &[ExprId]) -> Vec<Span> {
        ids.iter().map(|id| self.ast.expr_span(*id)).collect()
    }

    /// Fresh leaf expression resolving to `symbol`.
    pub fn ident(&mut self, symbol: SymbolId) -> ExprId {
        let span = self.span_over(&[]);
        let name = self.symbols.name(symbol).to_string();
        let id = self.push_expr(span, ExprKind::Ident(name));
        self.symbols.resolve(id, symbol);
        id
    }

    pub fn null(&mut self) -> ExprId {
        let span = self.span_over(&[]);
        self.push_expr(span, ExprKind::Null)
    }

    pub fn string(&mut self, value: &str) -> ExprId {
        let span = self.span_over(&[]);
        self.push_expr(span, ExprKind::Str(value.to_string()))
    }

    pub fn int(&mut self, value: i64) -> ExprId {
        let span = self.span_over(&[]);
        self.push_expr(span, ExprKind::Int(value))
    }

    pub fn bool(&mut self, value: bool) -> ExprId {
        let span = self.span_over(&[]);
        self.push_expr(span, ExprKind::Bool(value))
    }

    pub fn this(&mut self) -> ExprId {
        let span = self.span_over(&[]);
        self.push_expr(span, ExprKind::This)
    }

    pub fn opaque(&mut self, text: &str) -> ExprId {
        let span = self.span_over(&[]);
        self.push_expr(span, ExprKind::Opaque(text.to_string()))
    }

    /// Member access `recv.member`, resolving to the member's symbol.
    pub fn member(&mut self, recv: ExprId, symbol: SymbolId) -> ExprId {
        let span = self.span_over(&self.child_spans_expr(&[recv]));
        let name = self.symbols.name(symbol).to_string();
        let id = self.push_expr(span, ExprKind::Member { recv, name });
        self.symbols.resolve(id, symbol);
        id
    }

    /// Conditional access `recv?.member`.
    pub fn cond_access(&mut self, recv: ExprId, symbol: SymbolId) -> ExprId {
        let span = self.span_over(&self.child_spans_expr(&[recv]));
        let name = self.symbols.name(symbol).to_string();
        let id = self.push_expr(span, ExprKind::CondAccess { recv, name });
        self.symbols.resolve(id, symbol);
        id
    }

    pub fn invoke(&mut self, callee: ExprId, args: &[ExprId]) -> ExprId {
        let arg_list = args
            .iter()
            .map(|expr| Arg {
                expr: *expr,
                is_out: false,
            })
            .collect();
        self.invoke_with(callee, arg_list)
    }

    pub fn invoke_with(&mut self, callee: ExprId, args: Vec<Arg>) -> ExprId {
        let mut spans = self.child_spans_expr(&[callee]);
        for arg in &args {
            spans.push(self.ast.expr_span(arg.expr));
        }
        let span = self.span_over(&spans);
        self.push_expr(span, ExprKind::Invoke { callee, args })
    }

    pub fn out_arg(&self, expr: ExprId) -> Arg {
        Arg { expr, is_out: true }
    }

    pub fn binary(&mut self, op: BinaryOp, lhs: ExprId, rhs: ExprId) -> ExprId {
        let span = self.span_over(&self.child_spans_expr(&[lhs, rhs]));
        self.push_expr(span, ExprKind::Binary { op, lhs, rhs })
    }

    pub fn eq_null(&mut self, expr: ExprId) -> ExprId {
        let null = self.null();
        self.binary(BinaryOp::Eq, expr, null)
    }

    pub fn ne_null(&mut self, expr: ExprId) -> ExprId {
        let null = self.null();
        self.binary(BinaryOp::Ne, expr, null)
    }

    pub fn and(&mut self, lhs: ExprId, rhs: ExprId) -> ExprId {
        self.binary(BinaryOp::And, lhs, rhs)
    }

    pub fn or(&mut self, lhs: ExprId, rhs: ExprId) -> ExprId {
        self.binary(BinaryOp::Or, lhs, rhs)
    }

    pub fn not(&mut self, operand: ExprId) -> ExprId {
        let span = self.span_over(&self.child_spans_expr(&[operand]));
        self.push_expr(span, ExprKind::Not { operand })
    }

    pub fn cast(&mut self, ty: TypeId, operand: ExprId) -> ExprId {
        let span = self.span_over(&self.child_spans_expr(&[operand]));
        self.push_expr(span, ExprKind::Cast { ty, operand })
    }

    pub fn as_type(&mut self, operand: ExprId, ty: TypeId) -> ExprId {
        let span = self.span_over(&self.child_spans_expr(&[operand]));
        self.push_expr(span, ExprKind::As { operand, ty })
    }

    /// Type test `operand is ty`, optionally binding a pattern variable.
    pub fn is_type(&mut self, operand: ExprId, ty: TypeId, binding: Option<SymbolId>) -> ExprId {
        let span = self.span_over(&self.child_spans_expr(&[operand]));
        self.push_expr(
            span,
            ExprKind::Is {
                operand,
                ty,
                binding,
            },
        )
    }

    pub fn paren(&mut self, expr: ExprId) -> ExprId {
        let span = self.span_over(&self.child_spans_expr(&[expr]));
        self.push_expr(span, ExprKind::Paren(expr))
    }

    pub fn assign(&mut self, target: ExprId, value: ExprId) -> ExprId {
        let span = self.span_over(&self.child_spans_expr(&[target, value]));
        self.push_expr(span, ExprKind::Assign { target, value })
    }

    pub fn conditional(
        &mut self,
        cond: ExprId,
        when_true: ExprId,
        when_false: ExprId,
    ) -> ExprId {
        let span = self.span_over(&self.child_spans_expr(&[cond, when_true, when_false]));
        self.push_expr(
            span,
            ExprKind::Conditional {
                cond,
                when_true,
                when_false,
            },
        )
    }

    pub fn lambda_expr(&mut self, body: ExprId) -> ExprId {
        let span = self.span_over(&self.child_spans_expr(&[body]));
        self.push_expr(
            span,
            ExprKind::Lambda {
                body: LambdaBody::Expr(body),
            },
        )
    }

    pub fn lambda_block(&mut self, body: Vec<StmtId>) -> ExprId {
        let spans: Vec<Span> = body.iter().map(|id| self.ast.stmt_span(*id)).collect();
        let span = self.span_over(&spans);
        self.push_expr(
            span,
            ExprKind::Lambda {
                body: LambdaBody::Block(body),
            },
        )
    }

    pub fn new_object(&mut self, ty: TypeId, args: &[ExprId]) -> ExprId {
        let span = self.span_over(&self.child_spans_expr(args));
        self.push_expr(
            span,
            ExprKind::New {
                ty,
                args: args.to_vec(),
            },
        )
    }

    pub fn index(&mut self, recv: ExprId, index: ExprId) -> ExprId {
        let span = self.span_over(&self.child_spans_expr(&[recv, index]));
        self.push_expr(span, ExprKind::Index { recv, index })
    }

    pub fn await_expr(&mut self, expr: ExprId) -> ExprId {
        let span = self.span_over(&self.child_spans_expr(&[expr]));
        self.push_expr(span, ExprKind::Await(expr))
    }

    pub fn expr_stmt(&mut self, expr: ExprId) -> StmtId {
        let span = self.span_over(&[self.ast.expr_span(expr)]);
        self.push_stmt(span, StmtKind::Expr(expr))
    }

    pub fn local_stmt(&mut self, symbol: SymbolId, init: Option<ExprId>) -> StmtId {
        let spans: Vec<Span> = init.iter().map(|id| self.ast.expr_span(*id)).collect();
        let span = self.span_over(&spans);
        self.push_stmt(span, StmtKind::Local { symbol, init })
    }

    pub fn if_stmt(&mut self, cond: ExprId, then: Vec<StmtId>, els: Option<Vec<StmtId>>) -> StmtId {
        let mut spans = vec![self.ast.expr_span(cond)];
        spans.extend(then.iter().map(|id| self.ast.stmt_span(*id)));
        if let Some(els) = &els {
            spans.extend(els.iter().map(|id| self.ast.stmt_span(*id)));
        }
        let span = self.span_over(&spans);
        self.push_stmt(span, StmtKind::If { cond, then, els })
    }

    pub fn while_stmt(&mut self, cond: ExprId, body: Vec<StmtId>) -> StmtId {
        let mut spans = vec![self.ast.expr_span(cond)];
        spans.extend(body.iter().map(|id| self.ast.stmt_span(*id)));
        let span = self.span_over(&spans);
        self.push_stmt(span, StmtKind::While { cond, body })
    }

    pub fn do_stmt(&mut self, body: Vec<StmtId>, cond: ExprId) -> StmtId {
        let mut spans: Vec<Span> = body.iter().map(|id| self.ast.stmt_span(*id)).collect();
        spans.push(self.ast.expr_span(cond));
        let span = self.span_over(&spans);
        self.push_stmt(span, StmtKind::Do { body, cond })
    }

    pub fn for_stmt(&mut self, body: Vec<StmtId>) -> StmtId {
        let spans: Vec<Span> = body.iter().map(|id| self.ast.stmt_span(*id)).collect();
        let span = self.span_over(&spans);
        self.push_stmt(span, StmtKind::For { body })
    }

    /// `foreach` over `iterable`; the declared loop variable is marked as a
    /// foreach local in the symbol table.
    pub fn foreach_stmt(
        &mut self,
        symbol: SymbolId,
        iterable: ExprId,
        body: Vec<StmtId>,
    ) -> StmtId {
        let mut spans = vec![self.ast.expr_span(iterable)];
        spans.extend(body.iter().map(|id| self.ast.stmt_span(*id)));
        let span = self.span_over(&spans);
        self.symbols.set_kind(symbol, SymbolKind::Local { foreach: true });
        self.push_stmt(
            span,
            StmtKind::ForEach {
                symbol,
                iterable,
                body,
            },
        )
    }

    pub fn switch_stmt(&mut self, scrutinee: ExprId, sections: Vec<SwitchSection>) -> StmtId {
        let mut spans = vec![self.ast.expr_span(scrutinee)];
        for section in &sections {
            spans.extend(section.body.iter().map(|id| self.ast.stmt_span(*id)));
        }
        let span = self.span_over(&spans);
        self.push_stmt(
            span,
            StmtKind::Switch {
                scrutinee,
                sections,
            },
        )
    }

    pub fn try_stmt(
        &mut self,
        body: Vec<StmtId>,
        catches: Vec<Vec<StmtId>>,
        finally: Option<Vec<StmtId>>,
    ) -> StmtId {
        let mut spans: Vec<Span> = body.iter().map(|id| self.ast.stmt_span(*id)).collect();
        for catch in &catches {
            spans.extend(catch.iter().map(|id| self.ast.stmt_span(*id)));
        }
        if let Some(finally) = &finally {
            spans.extend(finally.iter().map(|id| self.ast.stmt_span(*id)));
        }
        let span = self.span_over(&spans);
        self.push_stmt(
            span,
            StmtKind::Try {
                body,
                catches,
                finally,
            },
        )
    }

    pub fn using_stmt(&mut self, body: Vec<StmtId>) -> StmtId {
        let spans: Vec<Span> = body.iter().map(|id| self.ast.stmt_span(*id)).collect();
        let span = self.span_over(&spans);
        self.push_stmt(span, StmtKind::Using { body })
    }

    pub fn lock_stmt(&mut self, body: Vec<StmtId>) -> StmtId {
        let spans: Vec<Span> = body.iter().map(|id| self.ast.stmt_span(*id)).collect();
        let span = self.span_over(&spans);
        self.push_stmt(span, StmtKind::Lock { body })
    }

    pub fn block_stmt(&mut self, body: Vec<StmtId>) -> StmtId {
        let spans: Vec<Span> = body.iter().map(|id| self.ast.stmt_span(*id)).collect();
        let span = self.span_over(&spans);
        self.push_stmt(span, StmtKind::Block(body))
    }

    pub fn return_stmt(&mut self, expr: Option<ExprId>) -> StmtId {
        let spans: Vec<Span> = expr.iter().map(|id| self.ast.expr_span(*id)).collect();
        let span = self.span_over(&spans);
        self.push_stmt(span, StmtKind::Return(expr))
    }

    pub fn throw_stmt(&mut self, expr: Option<ExprId>) -> StmtId {
        let spans: Vec<Span> = expr.iter().map(|id| self.ast.expr_span(*id)).collect();
        let span = self.span_over(&spans);
        self.push_stmt(span, StmtKind::Throw(expr))
    }

    pub fn break_stmt(&mut self) -> StmtId {
        let span = self.span_over(&[]);
        self.push_stmt(span, StmtKind::Break)
    }

    pub fn continue_stmt(&mut self) -> StmtId {
        let span = self.span_over(&[]);
        self.push_stmt(span, StmtKind::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spans_follow_construction_order() {
        let mut b = AstBuilder::new();
        let x = b.symbols_mut().declare_local("x");
        let first = b.ident(x);
        let second = b.ident(x);
        assert!(b.ast.expr_span(first).start < b.ast.expr_span(second).start);
    }

    #[test]
    fn parent_spans_contain_children() {
        let mut b = AstBuilder::new();
        let x = b.symbols_mut().declare_local("x");
        let ident = b.ident(x);
        let check = b.ne_null(ident);
        let stmt = b.expr_stmt(check);
        let (ast, _) = b.finish();
        assert!(ast.stmt_span(stmt).contains(ast.expr_span(check)));
        assert!(ast.expr_span(check).contains(ast.expr_span(ident)));
    }

    #[test]
    fn type_names_are_interned() {
        let mut b = AstBuilder::new();
        let first = b.intern_type("Item");
        let second = b.intern_type("Item");
        let other = b.intern_type("Folder");
        assert_eq!(first, second);
        assert_ne!(first, other);
    }
}
