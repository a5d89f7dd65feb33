use std::fmt;

use crate::ast::{Ast, BinaryOp, ExprId, ExprKind, LambdaBody, TypeId};

/// Canonical identity for a value-producing expression, used to recognize
/// repeated references to the same value across a method body. Two
/// occurrences compare equal when their canonical renderings match and
/// their narrowing types (from `as` casts or type tests) agree.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Fingerprint {
    key: String,
    narrowed: Option<TypeId>,
}

impl Fingerprint {
    /// Fingerprint of an expression. Parens and casts are stripped, an
    /// assignment contributes its resulting value, and a top-level
    /// `operand as T` narrows the fingerprint to `T`.
    pub fn of(ast: &Ast, expr: ExprId) -> Fingerprint {
        let basic = strip_wrappers(ast, expr);
        if let ExprKind::As { operand, ty } = &ast.expr(basic).kind {
            let operand = strip_wrappers(ast, *operand);
            return Fingerprint {
                key: render_to_string(ast, operand),
                narrowed: Some(*ty),
            };
        }
        Fingerprint {
            key: render_to_string(ast, basic),
            narrowed: None,
        }
    }

    /// Fingerprint of an expression narrowed by an explicit type test.
    pub fn narrowed(ast: &Ast, expr: ExprId, ty: TypeId) -> Fingerprint {
        let basic = strip_wrappers(ast, expr);
        Fingerprint {
            key: render_to_string(ast, basic),
            narrowed: Some(ty),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn narrowed_type(&self) -> Option<TypeId> {
        self.narrowed
    }

    /// Directional match: a type-less fact subsumes a narrowed fact with
    /// the same key, but not the other way around.
    pub fn contains(&self, other: &Fingerprint) -> bool {
        match other.narrowed {
            None => self.key == other.key,
            Some(ty) => self.key == other.key && self.narrowed == Some(ty),
        }
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

fn strip_wrappers(ast: &Ast, expr: ExprId) -> ExprId {
    match &ast.expr(expr).kind {
        ExprKind::Paren(inner) | ExprKind::Cast { operand: inner, .. } => {
            strip_wrappers(ast, *inner)
        }
        ExprKind::Assign { value, .. } => strip_wrappers(ast, *value),
        _ => expr,
    }
}

fn render_to_string(ast: &Ast, expr: ExprId) -> String {
    let mut out = String::new();
    render(ast, expr, &mut out);
    out
}

/// Deterministic whitespace-free rendering; `?.` chains flatten to `.` so
/// a conditional access compares equal to the null-tested plain access.
fn render(ast: &Ast, expr: ExprId, out: &mut String) {
    match &ast.expr(expr).kind {
        ExprKind::Ident(name) => out.push_str(name),
        ExprKind::Null => out.push_str("null"),
        ExprKind::Str(value) => {
            out.push('"');
            out.push_str(value);
            out.push('"');
        }
        ExprKind::Int(value) => out.push_str(&value.to_string()),
        ExprKind::Bool(value) => out.push_str(if *value { "true" } else { "false" }),
        ExprKind::This => out.push_str("this"),
        ExprKind::Member { recv, name } | ExprKind::CondAccess { recv, name } => {
            render(ast, *recv, out);
            out.push('.');
            out.push_str(name);
        }
        ExprKind::Invoke { callee, args } => {
            render(ast, *callee, out);
            out.push('(');
            for (index, arg) in args.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                if arg.is_out {
                    out.push_str("out");
                }
                render(ast, arg.expr, out);
            }
            out.push(')');
        }
        ExprKind::Binary { op, lhs, rhs } => {
            render(ast, *lhs, out);
            out.push_str(match op {
                BinaryOp::Eq => "==",
                BinaryOp::Ne => "!=",
                BinaryOp::And => "&&",
                BinaryOp::Or => "||",
                BinaryOp::Coalesce => "??",
                BinaryOp::Add => "+",
            });
            render(ast, *rhs, out);
        }
        ExprKind::Not { operand } => {
            out.push('!');
            render(ast, *operand, out);
        }
        ExprKind::Cast { ty, operand } => {
            out.push('(');
            out.push_str(ast.type_name(*ty));
            out.push(')');
            render(ast, *operand, out);
        }
        ExprKind::As { operand, ty } => {
            render(ast, *operand, out);
            out.push_str("as");
            out.push_str(ast.type_name(*ty));
        }
        ExprKind::Is { operand, ty, .. } => {
            render(ast, *operand, out);
            out.push_str("is");
            out.push_str(ast.type_name(*ty));
        }
        ExprKind::Paren(inner) => {
            out.push('(');
            render(ast, *inner, out);
            out.push(')');
        }
        ExprKind::Assign { target, value } => {
            render(ast, *target, out);
            out.push('=');
            render(ast, *value, out);
        }
        ExprKind::Conditional {
            cond,
            when_true,
            when_false,
        } => {
            render(ast, *cond, out);
            out.push('?');
            render(ast, *when_true, out);
            out.push(':');
            render(ast, *when_false, out);
        }
        ExprKind::Lambda { body } => match body {
            LambdaBody::Expr(inner) => {
                out.push_str("()=>");
                render(ast, *inner, out);
            }
            LambdaBody::Block(stmts) => {
                out.push_str("()=>{");
                out.push_str(&stmts.len().to_string());
                out.push('}');
            }
        },
        ExprKind::New { ty, args } => {
            out.push_str("new");
            out.push_str(ast.type_name(*ty));
            out.push('(');
            for (index, arg) in args.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                render(ast, *arg, out);
            }
            out.push(')');
        }
        ExprKind::Index { recv, index } => {
            render(ast, *recv, out);
            out.push('[');
            render(ast, *index, out);
            out.push(']');
        }
        ExprKind::Await(inner) => {
            out.push_str("await");
            render(ast, *inner, out);
        }
        ExprKind::Opaque(text) => {
            out.extend(text.chars().filter(|c| !c.is_whitespace()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::AstBuilder;

    #[test]
    fn conditional_access_flattens_to_plain_access() {
        let mut b = AstBuilder::new();
        let item = b.symbols_mut().declare_local("item");
        let id = b.symbols_mut().declare_property("Id");
        let recv = b.ident(item);
        let cond = b.cond_access(recv, id);
        let recv2 = b.ident(item);
        let plain = b.member(recv2, id);
        let (ast, _) = b.finish();
        assert_eq!(Fingerprint::of(&ast, cond), Fingerprint::of(&ast, plain));
    }

    #[test]
    fn parens_and_casts_are_transparent() {
        let mut b = AstBuilder::new();
        let item = b.symbols_mut().declare_local("item");
        let ty = b.intern_type("Item");
        let bare = b.ident(item);
        let inner = b.ident(item);
        let cast = b.cast(ty, inner);
        let wrapped = b.paren(cast);
        let (ast, _) = b.finish();
        assert_eq!(Fingerprint::of(&ast, bare), Fingerprint::of(&ast, wrapped));
    }

    #[test]
    fn assignment_fingerprints_its_resulting_value() {
        let mut b = AstBuilder::new();
        let x = b.symbols_mut().declare_local("x");
        let next = b.symbols_mut().declare_method("Next", "Source.Next");
        let callee = b.ident(next);
        let call = b.invoke(callee, &[]);
        let target = b.ident(x);
        let assign = b.assign(target, call);
        let callee2 = b.ident(next);
        let call2 = b.invoke(callee2, &[]);
        let (ast, _) = b.finish();
        assert_eq!(Fingerprint::of(&ast, assign), Fingerprint::of(&ast, call2));
    }

    #[test]
    fn narrowing_type_gates_equality() {
        let mut b = AstBuilder::new();
        let x = b.symbols_mut().declare_local("x");
        let item_ty = b.intern_type("Item");
        let folder_ty = b.intern_type("Folder");
        let e1 = b.ident(x);
        let as_item = b.as_type(e1, item_ty);
        let e2 = b.ident(x);
        let as_folder = b.as_type(e2, folder_ty);
        let e3 = b.ident(x);
        let (ast, _) = b.finish();

        let item = Fingerprint::of(&ast, as_item);
        let folder = Fingerprint::of(&ast, as_folder);
        let bare = Fingerprint::of(&ast, e3);

        assert_ne!(item, folder);
        // A type-less key matches the narrowed fact, not the reverse.
        assert!(item.contains(&bare));
        assert!(!bare.contains(&item));
        assert!(!item.contains(&folder));
    }

    #[test]
    fn opaque_falls_back_to_raw_text() {
        let mut b = AstBuilder::new();
        let first = b.opaque("stackalloc  int [4]");
        let second = b.opaque("stackalloc int[4]");
        let (ast, _) = b.finish();
        assert_eq!(Fingerprint::of(&ast, first), Fingerprint::of(&ast, second));
    }
}
