use super::*;
use ember_ast::{ExprKind, Module};
use insta::assert_snapshot;

/// A module that grows one input at a time, checked by one session.
struct Repl {
    module: Module,
    session: Session,
}

impl Repl {
    fn new() -> Self {
        Self::with_options(SessionOptions::default())
    }

    fn with_options(options: SessionOptions) -> Self {
        Self {
            module: Module::new(),
            session: Session::new(options),
        }
    }

    /// Check every form of `source`, stopping at the first type error.
    fn eval(&mut self, source: &str) -> Result<Vec<CheckedForm>, TypeError> {
        let (forms, errors) = ember_parser::parse_into(&mut self.module, source);
        assert!(errors.is_empty(), "parse errors in {:?}: {:?}", source, errors);
        forms
            .into_iter()
            .map(|form| self.session.check_form(&self.module, form))
            .collect()
    }

    fn ok(&mut self, source: &str) -> Vec<CheckedForm> {
        match self.eval(source) {
            Ok(forms) => forms,
            Err(err) => panic!("{:?} failed: {}", source, err),
        }
    }

    /// Printed type of the last form of `source`.
    fn type_of_last(&mut self, source: &str) -> String {
        let forms = self.ok(source);
        let last = forms.last().expect("no forms");
        self.session.display_type(last.ty)
    }

    fn err(&mut self, source: &str) -> String {
        match self.eval(source) {
            Ok(_) => panic!("{:?} should not check", source),
            Err(err) => err.kind.to_string(),
        }
    }

    fn ty(&self, name: &str) -> String {
        self.session
            .type_of(name)
            .unwrap_or_else(|| panic!("'{}' is not bound", name))
    }

    fn fn_decl(&self, name: &str) -> ExprId {
        self.find(|kind| match kind {
            ExprKind::FnDecl { name: binder, .. } => self.binder_is(*binder, name),
            _ => false,
        })
    }

    /// Lambda whose first parameter is `param`; `""` finds a nullary one.
    fn lambda(&self, param: &str) -> ExprId {
        self.find(|kind| match kind {
            ExprKind::Lambda { params, .. } => match params.first() {
                Some(&first) => self.binder_is(first, param),
                None => param.is_empty(),
            },
            _ => false,
        })
    }

    fn find(&self, pred: impl Fn(&ExprKind) -> bool) -> ExprId {
        self.module
            .exprs
            .iter()
            .find(|(_, expr)| pred(&expr.kind))
            .map(|(id, _)| id)
            .expect("no such node")
    }

    fn binder_is(&self, id: ExprId, name: &str) -> bool {
        matches!(&self.module.exprs[id].kind, ExprKind::Binder(n) if n == name)
    }

    fn capture_names(&self, site: ExprId) -> Vec<String> {
        self.session
            .captures(site)
            .iter()
            .map(|&id| self.session.symbol_name(self.session.binding(id).symbol).to_string())
            .collect()
    }
}

// ── Scenarios ────────────────────────────────────────────────────

#[test]
fn var_with_literal_initializer() {
    let mut repl = Repl::new();
    let forms = repl.ok("var x = 5;");
    assert!(!forms[0].is_expression);
    assert_eq!(repl.ty("x"), "int");
    assert!(repl.session.unifier().pending().is_empty());
    let (name, ty) = &forms[0].declarations[0];
    assert_eq!(name, "x");
    assert_eq!(repl.session.display_type(*ty), "int");
}

#[test]
fn int_plus_double_is_a_mismatch() {
    let mut repl = Repl::new();
    repl.ok("var x = 5;");
    assert_snapshot!(repl.err("x + 2.0;"), @"type mismatch: expected int, found double");
}

#[test]
fn function_declaration_and_call() {
    let mut repl = Repl::new();
    repl.ok("fn add(a, b) { return a + b; }");
    let result = repl.type_of_last("add(1, 2);");
    assert_eq!(result, "int");
    assert_eq!(repl.ty("add"), "fn(int, int) -> int");
}

#[test]
fn lambda_captures_enclosing_local() {
    let mut repl = Repl::new();
    repl.ok("{ var n = 10; var f = fn(x) { return x + n; }; }");
    let lambda = repl.lambda("x");
    let ty = repl.session.expr_type(lambda).expect("lambda is typed");
    assert_eq!(repl.session.display_type(ty), "closure(int) -> int");
    assert_eq!(repl.capture_names(lambda), ["n"]);
}

#[test]
fn duplicate_name_in_one_statement() {
    let mut repl = Repl::new();
    assert_snapshot!(repl.err("var a = 1, a = 2;"), @"'a' is declared twice in the same statement");
}

#[test]
fn undeclared_identifier() {
    let mut repl = Repl::new();
    let err = repl.eval("y + 1;").unwrap_err();
    assert_snapshot!(err.to_string(), @"[0:1] unbound symbol 'y'");
}

// ── Rewind ───────────────────────────────────────────────────────

#[test]
fn failed_statement_leaves_no_bindings() {
    let mut repl = Repl::new();
    repl.ok("var keep = 1;");
    assert_snapshot!(repl.err("var a = 1, b = missing;"), @"unbound symbol 'missing'");
    assert!(repl.session.lookup("a").is_none());
    assert!(repl.session.lookup("b").is_none());
    assert_eq!(repl.ty("keep"), "int");
}

#[test]
fn failed_form_undoes_its_assignments() {
    let mut repl = Repl::new();
    repl.ok("var v;");
    let before = repl.ty("v");
    repl.err("{ v = 1; v + true; }");
    assert_eq!(repl.ty("v"), before);
    assert!(repl.session.unifier().pending().is_empty());
    repl.ok("v = \"now a string\";");
    assert_eq!(repl.ty("v"), "string");
}

#[test]
fn failed_form_undoes_initialization() {
    let mut repl = Repl::new();
    repl.ok("var z;");
    repl.err("{ z = 1; nope; }");
    assert_snapshot!(repl.err("z + 1;"), @"unbound symbol 'z'");
}

#[test]
fn failed_datatype_is_not_registered() {
    let mut repl = Repl::new();
    repl.err("datatype P(x: int, x: int);");
    assert_snapshot!(repl.err("datatype Q(p: P);"), @"unknown type 'P'");
}

// ── Errors ───────────────────────────────────────────────────────

#[test]
fn local_redefinition() {
    let mut repl = Repl::new();
    assert_snapshot!(
        repl.err("fn f() { var a = 1; var a = 2; }"),
        @"'a' is already defined in this scope"
    );
    assert_snapshot!(repl.err("fn g(p, p) { }"), @"'p' is already defined in this scope");
}

#[test]
fn global_redefinition_shadows() {
    let mut repl = Repl::new();
    repl.ok("var a = 1;");
    repl.ok("var a = \"s\";");
    assert_eq!(repl.ty("a"), "string");
}

#[test]
fn return_is_reserved() {
    let mut repl = Repl::new();
    assert_snapshot!(
        repl.err("fn f(return) { }"),
        @"'return' is reserved and cannot be used as a parameter or slot name"
    );
    assert_snapshot!(
        repl.err("datatype D(return: int);"),
        @"'return' is reserved and cannot be used as a parameter or slot name"
    );
}

#[test]
fn wrong_arity() {
    let mut repl = Repl::new();
    repl.ok("fn add(a, b) { return a + b; } datatype Point(x: int, y: int);");
    assert_snapshot!(repl.err("add(1);"), @"function 'add' expects 2 arguments, got 1");
    assert_snapshot!(repl.err("Point(1);"), @"constructor Point expects 2 arguments, got 1");
}

#[test]
fn assign_to_function() {
    let mut repl = Repl::new();
    repl.ok("fn f() { } datatype Unit(u: nil);");
    assert_snapshot!(repl.err("f = 1;"), @"cannot assign to function 'f'");
    assert_snapshot!(repl.err("Unit = 1;"), @"cannot assign to function 'Unit'");
}

#[test]
fn break_outside_loop() {
    let mut repl = Repl::new();
    assert_snapshot!(repl.err("break;"), @"'break' outside of a loop");
    repl.ok("while (true) { break; }");
    assert_snapshot!(
        repl.err("while (true) { fn g() { break; } }"),
        @"'break' outside of a loop"
    );
}

#[test]
fn return_outside_function() {
    let mut repl = Repl::new();
    assert_snapshot!(repl.err("return 1;"), @"'return' outside of a function");
    assert_snapshot!(repl.err("{ return; }"), @"'return' outside of a function");
}

#[test]
fn unresolved_expression_type() {
    let mut repl = Repl::new();
    assert_snapshot!(repl.err("[];"), @"cannot resolve type [T1]");
    // Declarations may leave variables for later forms.
    repl.ok("var empty = [];");
    repl.ok("empty[0] = 'c';");
    assert_eq!(repl.ty("empty"), "[char]");
}

#[test]
fn unknown_slot_type() {
    let mut repl = Repl::new();
    assert_snapshot!(repl.err("datatype P(x: Q);"), @"unknown type 'Q'");
}

#[test]
fn nonexistent_slot() {
    let mut repl = Repl::new();
    repl.ok("datatype Point(x: int, y: int); var p = Point(1, 2);");
    assert_eq!(repl.type_of_last("p.x;"), "int");
    assert_snapshot!(repl.err("p.z;"), @"type Point has no slot 'z'");
}

#[test]
fn uninitialized_reads() {
    let mut repl = Repl::new();
    repl.ok("var u;");
    assert_snapshot!(repl.err("u + 1;"), @"unbound symbol 'u'");
    assert_snapshot!(repl.err("u += 1;"), @"unbound symbol 'u'");
    assert_snapshot!(repl.err("u++;"), @"unbound symbol 'u'");
    repl.ok("u = 1;");
    assert_eq!(repl.type_of_last("u + 1;"), "int");
}

#[test]
fn if_expression_branches_agree() {
    let mut repl = Repl::new();
    assert_snapshot!(
        repl.err("var v = if (true) 1 else \"s\";"),
        @"type mismatch: expected int, found string"
    );
    repl.ok("var c = if (1 < 2) 'a' else 'b';");
    assert_eq!(repl.ty("c"), "char");
}

#[test]
fn conditions_are_bool() {
    let mut repl = Repl::new();
    assert_snapshot!(repl.err("while (1) { }"), @"type mismatch: expected bool, found int");
    assert_snapshot!(repl.err("if (\"s\") { }"), @"type mismatch: expected bool, found string");
}

#[test]
fn right_operand_is_checked_first() {
    let mut repl = Repl::new();
    assert_snapshot!(repl.err("a + b;"), @"unbound symbol 'b'");
}

#[test]
fn logical_operators_take_bools() {
    let mut repl = Repl::new();
    assert_eq!(repl.type_of_last("true && !false;"), "bool");
    assert_snapshot!(repl.err("1 && true;"), @"type mismatch: expected bool, found int");
}

// ── Structure ────────────────────────────────────────────────────

#[test]
fn aggregates() {
    let mut repl = Repl::new();
    assert_eq!(repl.type_of_last("(1, \"a\", true);"), "(int, string, bool)");
    repl.ok("var xs = [1, 2];");
    assert_eq!(repl.ty("xs"), "[int]");
    assert_eq!(repl.type_of_last("xs[0];"), "int");
    assert_snapshot!(repl.err("xs[true];"), @"type mismatch: expected int, found bool");
    repl.ok("var rec = {x: 1, y: 2.5};");
    assert_eq!(repl.ty("rec"), "{x: int, y: double}");
    assert_snapshot!(repl.err("var dup = {x: 1, x: 2};"), @"'x' is declared twice in the same statement");
}

#[test]
fn open_records_merge_at_call() {
    let mut repl = Repl::new();
    repl.ok("fn getx(r) { return r.x; }");
    assert_eq!(repl.ty("getx"), "fn({x: T3}) -> T3");
    assert_eq!(repl.type_of_last("getx({x: 1, y: true});"), "int");
    assert_eq!(repl.ty("getx"), "fn({x: int, y: bool}) -> int");
}

#[test]
fn open_record_widens_to_datatype() {
    let mut repl = Repl::new();
    repl.ok("datatype Point(x: int, y: int); fn getx(r) { return r.x; }");
    assert_eq!(repl.type_of_last("getx(Point(1, 2));"), "int");
    assert_eq!(repl.ty("getx"), "fn(Point) -> int");
}

#[test]
fn open_record_missing_from_datatype() {
    let mut repl = Repl::new();
    repl.ok("datatype Point(x: int, y: int); fn getz(r) { return r.z; }");
    assert_snapshot!(repl.err("getz(Point(1, 2));"), @"type Point has no slot 'z'");
}

#[test]
fn recursive_datatype() {
    let mut repl = Repl::new();
    repl.ok("datatype List(head: int, tail: List);");
    assert_eq!(repl.ty("List"), "fn(int, List) -> List");
}

#[test]
fn recursive_structural_type() {
    let mut repl = Repl::new();
    repl.ok("fn last(node) { node = node.next; return 0; }");
    assert_eq!(repl.ty("last"), "fn({next: ...}) -> int");
}

// ── Functions and closures ───────────────────────────────────────

#[test]
fn function_passed_where_closure_expected() {
    let mut repl = Repl::new();
    repl.ok("fn inc(x) { return x + 1; } fn apply(f, v) { return f(v); }");
    assert_eq!(repl.type_of_last("apply(inc, 41);"), "int");
    assert_eq!(repl.ty("apply"), "fn(closure(int) -> int, int) -> int");
}

#[test]
fn function_assigned_to_closure_variable() {
    let mut repl = Repl::new();
    repl.ok("fn inc(x) { return x + 1; } var g = fn(x) { return x; };");
    repl.ok("g = inc;");
    assert_eq!(repl.ty("g"), "closure(int) -> int");
    assert_eq!(repl.ty("inc"), "fn(int) -> int");
}

#[test]
fn function_used_as_closure_within_one_form() {
    let mut repl = Repl::new();
    repl.ok("fn inc(x) { return x + 1; }");
    repl.ok("{ var k = fn(h) { return h(2); }; k(inc); }");
    repl.ok("var r = (fn(h) { return h(2); })(inc);");
    assert_eq!(repl.ty("r"), "int");
    repl.ok("fn main() { fn twice(f, x) { return f(f(x)); } return twice(inc, 1); }");
    assert_eq!(repl.ty("main"), "fn() -> int");
}

#[test]
fn function_and_closure_mix_in_arrays() {
    let mut repl = Repl::new();
    repl.ok("fn inc(x) { return x + 1; }");
    repl.ok("var fs = [fn(x) { return x; }, inc];");
    assert_eq!(repl.ty("fs"), "[closure(int) -> int]");
    repl.ok("var gs = [inc, fn(x) { return x; }];");
    assert_eq!(repl.ty("gs"), "[closure(int) -> int]");
    repl.ok("var hs = [inc, inc];");
    assert_eq!(repl.ty("hs"), "[fn(int) -> int]");
}

#[test]
fn function_and_closure_mix_in_if_expression() {
    let mut repl = Repl::new();
    repl.ok("fn inc(x) { return x + 1; }");
    repl.ok("var p = if (true) fn(x) { return x; } else inc;");
    assert_eq!(repl.ty("p"), "closure(int) -> int");
    repl.ok("var q = if (false) inc else fn(x) { return x; };");
    assert_eq!(repl.ty("q"), "closure(int) -> int");
    assert_eq!(repl.ty("inc"), "fn(int) -> int");
}

#[test]
fn closure_cannot_become_function() {
    let mut repl = Repl::new();
    repl.ok("fn inc(x) { return x + 1; }");
    assert_snapshot!(
        repl.err("inc = fn(x) { return x; };"),
        @"cannot assign to function 'inc'"
    );
    repl.ok("var h = inc;");
    assert_snapshot!(
        repl.err("h = fn(x) { return x; };"),
        @"type mismatch: expected fn(int) -> int, found closure(T6) -> T7"
    );
}

#[test]
fn function_without_return_yields_nil() {
    let mut repl = Repl::new();
    repl.ok("fn noop(x) { x + 1; }");
    assert_eq!(repl.ty("noop"), "fn(int) -> nil");
}

#[test]
fn local_function_is_a_closure() {
    let mut repl = Repl::new();
    repl.ok("fn outer(n) { fn inner(x) { return x + n * 1; } return inner; }");
    assert_eq!(repl.ty("outer"), "fn(int) -> closure(int) -> int");
    assert_eq!(repl.capture_names(repl.fn_decl("inner")), ["n"]);
    assert!(repl.capture_names(repl.fn_decl("outer")).is_empty());
}

#[test]
fn recursive_function() {
    let mut repl = Repl::new();
    repl.ok("fn fact(n) { if (n < 2) return 1; return n * fact(n - 1); }");
    assert_eq!(repl.ty("fact"), "fn(int) -> int");
}

// ── Captures ─────────────────────────────────────────────────────

#[test]
fn globals_are_not_captured() {
    let mut repl = Repl::new();
    repl.ok("var n = 10; var f = fn(x) { return x + n; };");
    assert!(repl.session.is_global(repl.session.lookup("n").unwrap()));
    assert!(repl.capture_names(repl.lambda("x")).is_empty());
    assert_eq!(repl.ty("f"), "closure(int) -> int");
}

#[test]
fn nested_lambdas_capture_transitively() {
    let mut repl = Repl::new();
    repl.ok("{ var a = 1; fn f() { return fn(x) { return fn(y) { return x + y + a; }; }; } }");
    assert_eq!(repl.capture_names(repl.fn_decl("f")), ["a"]);
    assert_eq!(repl.capture_names(repl.lambda("x")), ["a"]);
    assert_eq!(repl.capture_names(repl.lambda("y")), ["x", "a"]);
}

#[test]
fn captures_are_deduplicated_in_first_use_order() {
    let mut repl = Repl::new();
    repl.ok("{ var a = 1, b = 2; var f = fn() { return b + a + b; }; }");
    assert_eq!(repl.capture_names(repl.lambda("")), ["b", "a"]);
}

#[test]
fn assignment_targets_are_captured() {
    let mut repl = Repl::new();
    repl.ok("{ var count = 0; var bump = fn() { count += 1; return count; }; }");
    assert_eq!(repl.capture_names(repl.lambda("")), ["count"]);
}

#[test]
fn identifiers_resolve_to_bindings() {
    let mut repl = Repl::new();
    repl.ok("var x = 1;");
    let forms = repl.ok("x;");
    let binding = repl.session.binding_of(forms[0].form).expect("resolved");
    assert_eq!(Some(binding), repl.session.lookup("x"));
    assert!(repl.session.binding(binding).initialized);
    assert_eq!(repl.session.binding(binding).kind, BindingKind::Variable);
}

#[test]
fn function_bindings_remember_their_definition() {
    let mut repl = Repl::new();
    repl.ok("fn f() { }");
    let binding = repl.session.binding(repl.session.lookup("f").unwrap());
    assert_eq!(binding.kind, BindingKind::Function);
    assert_eq!(binding.defining_ast, Some(repl.fn_decl("f")));
}

// ── Trace ────────────────────────────────────────────────────────

#[test]
fn trace_shows_types_and_assignments() {
    let mut repl = Repl::with_options(SessionOptions { trace: true });
    let forms = repl.ok("var x = 5;");
    assert_snapshot!(forms[0].trace.as_deref().unwrap_or_default(), @r###"
    + var : nil
      + binder(x) : int
        + int(5) : int
    assignments:
      T1 := int
    "###);
}

#[test]
fn trace_is_off_by_default() {
    let mut repl = Repl::new();
    assert!(repl.ok("1;")[0].trace.is_none());
}
