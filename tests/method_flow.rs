use nullflow::ast::{Ast, AstBuilder, ExprId, MethodBody, StmtId};
use nullflow::flow::tree::BranchId;
use nullflow::semantics::CheckIdiom;
use nullflow::{analyze_method, ExpressionStatus, FlowFacts, SymbolId, SymbolTable};

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("nullflow=debug")),
        )
        .with_test_writer()
        .try_init();
}

fn analyze(
    b: AstBuilder,
    parameters: Vec<SymbolId>,
    statements: Vec<StmtId>,
) -> (Ast, SymbolTable, FlowFacts) {
    init_logging();
    let (ast, symbols) = b.finish();
    let body = MethodBody {
        parameters,
        statements,
    };
    let facts = analyze_method(&ast, &symbols, &body).expect("analyze body");
    (ast, symbols, facts)
}

fn status(ast: &Ast, symbols: &SymbolTable, facts: &FlowFacts, expr: ExprId) -> ExpressionStatus {
    facts.is_proven(ast, symbols, expr, expr)
}

/// Structural rendering of a tree for idempotence comparison.
fn render_tree(facts: &FlowFacts, at: BranchId, out: &mut String) {
    let branch = facts.tree().branch(at);
    out.push_str(&format!(
        "[{} body={} ",
        branch.condition(),
        branch.body().len()
    ));
    for &child in branch.children() {
        render_tree(facts, child, out);
    }
    out.push(']');
}

#[test]
fn building_twice_yields_equal_trees() {
    let build = || {
        let mut b = AstBuilder::new();
        let item = b.symbols_mut().declare_parameter("item");
        let use_m = b.symbols_mut().declare_method("Use", "C.Use");
        let check = b.ident(item);
        let cond = b.ne_null(check);
        let callee = b.ident(use_m);
        let arg = b.ident(item);
        let call = b.invoke(callee, &[arg]);
        let call_stmt = b.expr_stmt(call);
        let ret = b.return_stmt(None);
        let if_stmt = b.if_stmt(cond, vec![call_stmt, ret], None);
        analyze(b, vec![item], vec![if_stmt])
    };
    let (_, _, first) = build();
    let (_, _, second) = build();

    let mut left = String::new();
    render_tree(&first, first.tree().root(), &mut left);
    let mut right = String::new();
    render_tree(&second, second.tree().root(), &mut right);

    assert_eq!(left, right);
    assert_eq!(first.assignments().len(), second.assignments().len());
}

#[test]
fn short_circuit_and_proves_the_later_operand() {
    // return item != null && M(item);
    let mut b = AstBuilder::new();
    let item = b.symbols_mut().declare_parameter("item");
    let m = b.symbols_mut().declare_method("M", "C.M");
    let check_read = b.ident(item);
    let check = b.ne_null(check_read);
    let callee = b.ident(m);
    let arg = b.ident(item);
    let call = b.invoke(callee, &[arg]);
    let guard = b.and(check, call);
    let ret = b.return_stmt(Some(guard));
    let (ast, symbols, facts) = analyze(b, vec![item], vec![ret]);

    assert_eq!(
        ExpressionStatus::Assigned,
        status(&ast, &symbols, &facts, arg)
    );
}

#[test]
fn narrowing_check_placed_after_the_use_proves_nothing_there() {
    // item != null && M(item.Id) && item.Id != null: by the time the second
    // operand runs, only the first atom has executed.
    let mut b = AstBuilder::new();
    let item = b.symbols_mut().declare_parameter("item");
    let id = b.symbols_mut().declare_property("Id");
    let m = b.symbols_mut().declare_method("M", "C.M");
    let check_read = b.ident(item);
    let check = b.ne_null(check_read);
    let callee = b.ident(m);
    let recv = b.ident(item);
    let arg = b.member(recv, id);
    let call = b.invoke(callee, &[arg]);
    let left = b.and(check, call);
    let recv_late = b.ident(item);
    let late_read = b.member(recv_late, id);
    let late_check = b.ne_null(late_read);
    let guard = b.and(left, late_check);
    let ret = b.return_stmt(Some(guard));
    let (ast, symbols, facts) = analyze(b, vec![item], vec![ret]);

    assert_eq!(
        ExpressionStatus::NotAssigned,
        status(&ast, &symbols, &facts, arg)
    );
}

#[test]
fn use_before_late_narrowing_still_sees_the_first_atom() {
    // item != null && M(item) && item.Id != null: M's argument is proven by
    // the first atom alone, wherever the narrowing check sits.
    let mut b = AstBuilder::new();
    let item = b.symbols_mut().declare_parameter("item");
    let id = b.symbols_mut().declare_property("Id");
    let m = b.symbols_mut().declare_method("M", "C.M");
    let check_read = b.ident(item);
    let check = b.ne_null(check_read);
    let callee = b.ident(m);
    let arg = b.ident(item);
    let call = b.invoke(callee, &[arg]);
    let left = b.and(check, call);
    let recv_late = b.ident(item);
    let late_read = b.member(recv_late, id);
    let late_check = b.ne_null(late_read);
    let guard = b.and(left, late_check);
    let ret = b.return_stmt(Some(guard));
    let (ast, symbols, facts) = analyze(b, vec![item], vec![ret]);

    assert_eq!(
        ExpressionStatus::Assigned,
        status(&ast, &symbols, &facts, arg)
    );
}

#[test]
fn reassignment_after_the_proof_invalidates_it() {
    // if (x != null) { x = null; Sink(x); }
    let mut b = AstBuilder::new();
    let x = b.symbols_mut().declare_parameter("x");
    let sink = b.symbols_mut().declare_method("Sink", "C.Sink");
    let check_read = b.ident(x);
    let cond = b.ne_null(check_read);
    let target = b.ident(x);
    let null = b.null();
    let wipe = b.assign(target, null);
    let wipe_stmt = b.expr_stmt(wipe);
    let callee = b.ident(sink);
    let arg = b.ident(x);
    let call = b.invoke(callee, &[arg]);
    let call_stmt = b.expr_stmt(call);
    let if_stmt = b.if_stmt(cond, vec![wipe_stmt, call_stmt], None);
    let (ast, symbols, facts) = analyze(b, vec![x], vec![if_stmt]);

    assert_eq!(
        ExpressionStatus::ReassignedAfterCondition,
        status(&ast, &symbols, &facts, arg)
    );
}

#[test]
fn assignment_before_the_check_is_re_proven() {
    // x = null; if (x != null) { Sink(x); }
    let mut b = AstBuilder::new();
    let x = b.symbols_mut().declare_parameter("x");
    let sink = b.symbols_mut().declare_method("Sink", "C.Sink");
    let target = b.ident(x);
    let null = b.null();
    let wipe = b.assign(target, null);
    let wipe_stmt = b.expr_stmt(wipe);
    let check_read = b.ident(x);
    let cond = b.ne_null(check_read);
    let callee = b.ident(sink);
    let arg = b.ident(x);
    let call = b.invoke(callee, &[arg]);
    let call_stmt = b.expr_stmt(call);
    let if_stmt = b.if_stmt(cond, vec![call_stmt], None);
    let (ast, symbols, facts) = analyze(b, vec![x], vec![wipe_stmt, if_stmt]);

    assert_eq!(
        ExpressionStatus::Assigned,
        status(&ast, &symbols, &facts, arg)
    );
}

fn constraint_symbol(b: &mut AstBuilder) -> nullflow::SymbolId {
    let symbol = b
        .symbols_mut()
        .declare_method("NotNull", "Constraint.NotNull");
    b.symbols_mut().mark_idiom(symbol, CheckIdiom::Constraint);
    symbol
}

#[test]
fn constraint_under_an_equivalent_check_is_redundant() {
    // if (x != null) { Constraint.NotNull(() => x); Sink(x); }
    let mut b = AstBuilder::new();
    let x = b.symbols_mut().declare_parameter("x");
    let sink = b.symbols_mut().declare_method("Sink", "C.Sink");
    let assert_sym = constraint_symbol(&mut b);
    let check_read = b.ident(x);
    let cond = b.ne_null(check_read);
    let assert_callee = b.ident(assert_sym);
    let target = b.ident(x);
    let lambda = b.lambda_expr(target);
    let assert_call = b.invoke(assert_callee, &[lambda]);
    let assert_stmt = b.expr_stmt(assert_call);
    let callee = b.ident(sink);
    let arg = b.ident(x);
    let call = b.invoke(callee, &[arg]);
    let call_stmt = b.expr_stmt(call);
    let if_stmt = b.if_stmt(cond, vec![assert_stmt, call_stmt], None);
    let (ast, symbols, facts) = analyze(b, vec![x], vec![if_stmt]);

    assert!(facts.has_explicit_constraints());
    assert_eq!(
        ExpressionStatus::AssignedWithRedundantConstraint,
        status(&ast, &symbols, &facts, arg)
    );
}

#[test]
fn constraint_over_a_whole_method_fact_is_redundant() {
    // Constraint.NotNull(() => x) where x is already annotated non-null.
    let mut b = AstBuilder::new();
    let x = b.symbols_mut().declare_parameter("x");
    b.symbols_mut().mark_annotated_non_null(x);
    let sink = b.symbols_mut().declare_method("Sink", "C.Sink");
    let assert_sym = constraint_symbol(&mut b);
    let assert_callee = b.ident(assert_sym);
    let target = b.ident(x);
    let lambda = b.lambda_expr(target);
    let assert_call = b.invoke(assert_callee, &[lambda]);
    let assert_stmt = b.expr_stmt(assert_call);
    let callee = b.ident(sink);
    let arg = b.ident(x);
    let call = b.invoke(callee, &[arg]);
    let call_stmt = b.expr_stmt(call);
    let (ast, symbols, facts) = analyze(b, vec![x], vec![assert_stmt, call_stmt]);

    assert_eq!(
        ExpressionStatus::AssignedWithRedundantConstraint,
        status(&ast, &symbols, &facts, arg)
    );
}

#[test]
fn needed_constraint_stays_plain_assigned() {
    // Constraint.NotNull(() => x); Sink(x); — nothing else proves x.
    let mut b = AstBuilder::new();
    let x = b.symbols_mut().declare_parameter("x");
    let sink = b.symbols_mut().declare_method("Sink", "C.Sink");
    let assert_sym = constraint_symbol(&mut b);
    let assert_callee = b.ident(assert_sym);
    let target = b.ident(x);
    let lambda = b.lambda_expr(target);
    let assert_call = b.invoke(assert_callee, &[lambda]);
    let assert_stmt = b.expr_stmt(assert_call);
    let callee = b.ident(sink);
    let arg = b.ident(x);
    let call = b.invoke(callee, &[arg]);
    let call_stmt = b.expr_stmt(call);
    let (ast, symbols, facts) = analyze(b, vec![x], vec![assert_stmt, call_stmt]);

    assert_eq!(
        ExpressionStatus::Assigned,
        status(&ast, &symbols, &facts, arg)
    );
}

fn while_loop_fixture(reassign_first: bool) -> (Ast, SymbolTable, FlowFacts, ExprId) {
    // while ((x = Next()) != null) { Use(x); x = Next(); } and the swapped
    // variant with the reassignment ahead of the use.
    let mut b = AstBuilder::new();
    let x = b.symbols_mut().declare_local("x");
    let next = b.symbols_mut().declare_method("Next", "Source.Next");
    let use_m = b.symbols_mut().declare_method("Use", "C.Use");
    let guard_target = b.ident(x);
    let guard_callee = b.ident(next);
    let guard_call = b.invoke(guard_callee, &[]);
    let guard_assign = b.assign(guard_target, guard_call);
    let guard_paren = b.paren(guard_assign);
    let guard = b.ne_null(guard_paren);

    let mut body = Vec::new();
    let arg;
    if reassign_first {
        let target = b.ident(x);
        let callee = b.ident(next);
        let call = b.invoke(callee, &[]);
        let assign = b.assign(target, call);
        body.push(b.expr_stmt(assign));
        let use_callee = b.ident(use_m);
        arg = b.ident(x);
        let use_call = b.invoke(use_callee, &[arg]);
        body.push(b.expr_stmt(use_call));
    } else {
        let use_callee = b.ident(use_m);
        arg = b.ident(x);
        let use_call = b.invoke(use_callee, &[arg]);
        body.push(b.expr_stmt(use_call));
        let target = b.ident(x);
        let callee = b.ident(next);
        let call = b.invoke(callee, &[]);
        let assign = b.assign(target, call);
        body.push(b.expr_stmt(assign));
    }

    let while_stmt = b.while_stmt(guard, body);
    let (ast, symbols, facts) = analyze(b, Vec::new(), vec![while_stmt]);
    (ast, symbols, facts, arg)
}

#[test]
fn loop_carried_reassignment_after_the_use_is_fine() {
    let (ast, symbols, facts, arg) = while_loop_fixture(false);
    assert_eq!(
        ExpressionStatus::Assigned,
        status(&ast, &symbols, &facts, arg)
    );
}

#[test]
fn loop_reassignment_before_the_use_invalidates_the_guard() {
    let (ast, symbols, facts, arg) = while_loop_fixture(true);
    assert_eq!(
        ExpressionStatus::ReassignedAfterCondition,
        status(&ast, &symbols, &facts, arg)
    );
}

#[test]
fn emptiness_guard_proves_like_a_null_check() {
    // if (!string.IsNullOrEmpty(s)) { Use(s); }
    let mut b = AstBuilder::new();
    let s = b.symbols_mut().declare_parameter("s");
    let is_empty = b
        .symbols_mut()
        .declare_method("IsNullOrEmpty", "String.IsNullOrEmpty");
    let use_m = b.symbols_mut().declare_method("Use", "C.Use");
    let callee = b.ident(is_empty);
    let checked = b.ident(s);
    let call = b.invoke(callee, &[checked]);
    let cond = b.not(call);
    let use_callee = b.ident(use_m);
    let arg = b.ident(s);
    let use_call = b.invoke(use_callee, &[arg]);
    let use_stmt = b.expr_stmt(use_call);
    let if_stmt = b.if_stmt(cond, vec![use_stmt], None);
    let (ast, symbols, facts) = analyze(b, vec![s], vec![if_stmt]);

    assert_eq!(
        ExpressionStatus::Assigned,
        status(&ast, &symbols, &facts, arg)
    );
}

#[test]
fn try_parse_guard_proves_the_out_binding() {
    // if (Uri.TryCreate(raw, out uri)) { Use(uri); }
    let mut b = AstBuilder::new();
    let raw = b.symbols_mut().declare_parameter("raw");
    let uri = b.symbols_mut().declare_local("uri");
    let try_create = b.symbols_mut().declare_method("TryCreate", "Uri.TryCreate");
    let use_m = b.symbols_mut().declare_method("Use", "C.Use");
    let callee = b.ident(try_create);
    let input = b.ident(raw);
    let out_read = b.ident(uri);
    let out = b.out_arg(out_read);
    let cond = b.invoke_with(
        callee,
        vec![
            nullflow::ast::Arg {
                expr: input,
                is_out: false,
            },
            out,
        ],
    );
    let use_callee = b.ident(use_m);
    let arg = b.ident(uri);
    let use_call = b.invoke(use_callee, &[arg]);
    let use_stmt = b.expr_stmt(use_call);
    let if_stmt = b.if_stmt(cond, vec![use_stmt], None);
    let (ast, symbols, facts) = analyze(b, vec![raw], vec![if_stmt]);

    assert_eq!(
        ExpressionStatus::Assigned,
        status(&ast, &symbols, &facts, arg)
    );
}

#[test]
fn conditional_access_guard_covers_the_whole_chain() {
    // if (item?.Id != null) { Use(item.Id); Use(item); }
    let mut b = AstBuilder::new();
    let item = b.symbols_mut().declare_parameter("item");
    let id = b.symbols_mut().declare_property("Id");
    let use_m = b.symbols_mut().declare_method("Use", "C.Use");
    let recv = b.ident(item);
    let access = b.cond_access(recv, id);
    let cond = b.ne_null(access);
    let use_callee = b.ident(use_m);
    let member_recv = b.ident(item);
    let member_arg = b.member(member_recv, id);
    let use_call = b.invoke(use_callee, &[member_arg]);
    let use_stmt = b.expr_stmt(use_call);
    let use_callee2 = b.ident(use_m);
    let item_arg = b.ident(item);
    let use_call2 = b.invoke(use_callee2, &[item_arg]);
    let use_stmt2 = b.expr_stmt(use_call2);
    let if_stmt = b.if_stmt(cond, vec![use_stmt, use_stmt2], None);
    let (ast, symbols, facts) = analyze(b, vec![item], vec![if_stmt]);

    assert_eq!(
        ExpressionStatus::Assigned,
        status(&ast, &symbols, &facts, member_arg)
    );
    assert_eq!(
        ExpressionStatus::Assigned,
        status(&ast, &symbols, &facts, item_arg)
    );
}

#[test]
fn early_exit_guard_covers_the_rest_of_the_method() {
    // if (item == null) { return; } Sink(item);
    let mut b = AstBuilder::new();
    let item = b.symbols_mut().declare_parameter("item");
    let sink = b.symbols_mut().declare_method("Sink", "C.Sink");
    let check_read = b.ident(item);
    let cond = b.eq_null(check_read);
    let ret = b.return_stmt(None);
    let if_stmt = b.if_stmt(cond, vec![ret], None);
    let callee = b.ident(sink);
    let arg = b.ident(item);
    let call = b.invoke(callee, &[arg]);
    let call_stmt = b.expr_stmt(call);
    let (ast, symbols, facts) = analyze(b, vec![item], vec![if_stmt, call_stmt]);

    assert_eq!(
        ExpressionStatus::Assigned,
        status(&ast, &symbols, &facts, arg)
    );
}

#[test]
fn enclosing_proof_does_not_leak_into_a_closure() {
    // if (x != null) { Use(x); }
    // var f = () => Use(x);
    let mut b = AstBuilder::new();
    let x = b.symbols_mut().declare_parameter("x");
    let f = b.symbols_mut().declare_local("f");
    let use_m = b.symbols_mut().declare_method("Use", "C.Use");
    let check_read = b.ident(x);
    let cond = b.ne_null(check_read);
    let use_callee = b.ident(use_m);
    let direct_arg = b.ident(x);
    let use_call = b.invoke(use_callee, &[direct_arg]);
    let use_stmt = b.expr_stmt(use_call);
    let if_stmt = b.if_stmt(cond, vec![use_stmt], None);
    let lambda_callee = b.ident(use_m);
    let closure_arg = b.ident(x);
    let lambda_call = b.invoke(lambda_callee, &[closure_arg]);
    let lambda = b.lambda_expr(lambda_call);
    let decl = b.local_stmt(f, Some(lambda));
    let (ast, symbols, facts) = analyze(b, vec![x], vec![if_stmt, decl]);

    assert_eq!(
        ExpressionStatus::Assigned,
        status(&ast, &symbols, &facts, direct_arg)
    );
    assert_eq!(
        ExpressionStatus::NotAssigned,
        status(&ast, &symbols, &facts, closure_arg)
    );
}

#[test]
fn a_closure_proves_its_own_facts() {
    // var f = () => { if (x != null) { Use(x); } };
    let mut b = AstBuilder::new();
    let x = b.symbols_mut().declare_parameter("x");
    let f = b.symbols_mut().declare_local("f");
    let use_m = b.symbols_mut().declare_method("Use", "C.Use");
    let check_read = b.ident(x);
    let cond = b.ne_null(check_read);
    let use_callee = b.ident(use_m);
    let arg = b.ident(x);
    let use_call = b.invoke(use_callee, &[arg]);
    let use_stmt = b.expr_stmt(use_call);
    let inner_if = b.if_stmt(cond, vec![use_stmt], None);
    let lambda = b.lambda_block(vec![inner_if]);
    let decl = b.local_stmt(f, Some(lambda));
    let (ast, symbols, facts) = analyze(b, vec![x], vec![decl]);

    assert_eq!(
        ExpressionStatus::Assigned,
        status(&ast, &symbols, &facts, arg)
    );
}

#[test]
fn assignments_after_constraints_are_flagged() {
    // Constraint.NotNull(() => x); x = null;
    let mut b = AstBuilder::new();
    let x = b.symbols_mut().declare_parameter("x");
    let assert_sym = constraint_symbol(&mut b);
    let assert_callee = b.ident(assert_sym);
    let target = b.ident(x);
    let lambda = b.lambda_expr(target);
    let assert_call = b.invoke(assert_callee, &[lambda]);
    let assert_stmt = b.expr_stmt(assert_call);
    let wipe_target = b.ident(x);
    let null = b.null();
    let wipe = b.assign(wipe_target, null);
    let wipe_stmt = b.expr_stmt(wipe);
    let (ast, symbols, facts) = analyze(b, vec![x], vec![assert_stmt, wipe_stmt]);

    let flagged = facts.assignments_after_constraints(&ast);
    assert_eq!(1, flagged.len());
    assert_eq!(x, flagged[0].symbol);
}

#[test]
fn return_sites_are_enumerable() {
    let mut b = AstBuilder::new();
    let x = b.symbols_mut().declare_parameter("x");
    let read = b.ident(x);
    let ret = b.return_stmt(Some(read));
    let (_, _, facts) = analyze(b, vec![x], vec![ret]);

    assert_eq!(vec![ret], facts.return_statements().to_vec());
}
