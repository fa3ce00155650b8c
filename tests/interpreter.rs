use std::rc::Rc;

use ezlang::{
    RuntimeConfig,
    diagnostics::{DiagnosticKind, EzError},
    runtime::{ExecutionContext, Interpreter},
    value::{HostCapability, Value, ValueKind},
};
use indexmap::IndexMap;

fn eval(source: &str) -> Value {
    let mut interpreter = Interpreter::new();
    interpreter
        .eval_source(source)
        .expect("evaluation should succeed")
}

fn eval_error(source: &str) -> EzError {
    let mut interpreter = Interpreter::new();
    match interpreter.eval_source(source) {
        Ok(value) => panic!("expected error, received value {value}"),
        Err(err) => err,
    }
}

fn expect_number(value: &Value) -> f64 {
    match value.kind() {
        ValueKind::Number(n) => *n,
        _ => panic!("expected number, found {}", value.type_name()),
    }
}

fn expect_string(value: &Value) -> String {
    match value.kind() {
        ValueKind::String(s) => s.clone(),
        _ => panic!("expected string, found {}", value.type_name()),
    }
}

fn expect_bool(value: &Value) -> bool {
    match value.kind() {
        ValueKind::Boolean(b) => *b,
        _ => panic!("expected boolean, found {}", value.type_name()),
    }
}

fn runtime_message(err: EzError) -> String {
    match err {
        EzError::Diagnostic(diag) => {
            assert_eq!(diag.kind, DiagnosticKind::Runtime);
            diag.message
        }
        other => panic!("expected runtime diagnostic, found {other}"),
    }
}

#[test]
fn evaluates_basic_arithmetic() {
    let value = eval("return 2 + 2 * 3;");
    assert_eq!(expect_number(&value), 8.0);
}

#[test]
fn returns_last_expression_from_script() {
    let value = eval(
        r#"
        var x = 40
        x + 2
        "#,
    );
    assert_eq!(expect_number(&value), 42.0);
}

#[test]
fn plus_concatenates_when_either_side_is_string() {
    assert_eq!(expect_string(&eval(r#""n=" + 1"#)), "n=1");
    assert_eq!(expect_string(&eval(r#"1 + "2""#)), "12");
    assert_eq!(expect_string(&eval(r#""list: " + [1, 2]"#)), "list: [1, 2]");
}

#[test]
fn loose_equality_coerces_scalars() {
    assert!(expect_bool(&eval("null == false")));
    assert!(expect_bool(&eval("null == 0")));
    assert!(expect_bool(&eval(r#""42" == 42"#)));
    assert!(expect_bool(&eval(r#""4px" == 4"#)));
    assert!(expect_bool(&eval("true == 1")));
    assert!(!expect_bool(&eval(r#""abc" == 0"#)));
    assert!(expect_bool(&eval("[1, [2]] == [1, [2]]")));
}

#[test]
fn records_compare_by_identity() {
    let value = eval(
        r#"
        var a = {x: 1}
        var b = {x: 1}
        var alias = a;
        [a == b, a == alias]
        "#,
    );
    assert_eq!(value.to_string(), "[false, true]");
}

#[test]
fn self_containing_array_prints_and_compares() {
    let value = eval(
        r#"
        var a = []
        push(a, a);
        [str(a), a == a, a == [a]]
        "#,
    );
    assert_eq!(value.to_string(), "[[[...]], true, true]");
}

#[test]
fn truthiness_drives_conditionals() {
    assert_eq!(expect_number(&eval("if 0 { return 1 } else { return 2 }")), 2.0);
    assert!(expect_bool(&eval(r#"!"""#)));
    assert!(!expect_bool(&eval("![]")));
    assert!(!expect_bool(&eval("!{}")));
}

#[test]
fn redeclaring_in_same_scope_is_rejected() {
    let err = eval_error("var x = 1\nvar x = 2");
    assert!(matches!(err, EzError::AlreadyDeclared(name) if name == "x"));
}

#[test]
fn block_declarations_shadow_outer_bindings() {
    let value = eval(
        r#"
        var x = 1
        {
            var x = 2
        }
        x
        "#,
    );
    assert_eq!(expect_number(&value), 1.0);
}

#[test]
fn assigning_undeclared_name_fails() {
    let err = eval_error("y = 3");
    assert!(matches!(err, EzError::UndefinedVariable(name) if name == "y"));
}

#[test]
fn closures_capture_their_scope() {
    let value = eval(
        r#"
        function make_counter() {
            var count = 0
            function next() {
                count = count + 1
                return count
            }
            return next
        }
        var counter = make_counter()
        counter()
        counter()
        "#,
    );
    assert_eq!(expect_number(&value), 2.0);
}

#[test]
fn recursive_function_evaluates() {
    let value = eval(
        r#"
        function factorial(n) {
            if n <= 1 { return 1 }
            return n * factorial(n - 1)
        }
        factorial(10)
        "#,
    );
    assert_eq!(expect_number(&value), 3_628_800.0);
}

#[test]
fn functions_without_return_yield_null() {
    assert!(eval("function noop() { 1 + 1 }\nnoop()").is_null());
}

#[test]
fn runaway_recursion_hits_call_depth_limit() {
    let mut interpreter = Interpreter::with_config(RuntimeConfig {
        max_call_depth: 16,
        ..RuntimeConfig::default()
    });
    let err = interpreter
        .eval_source("function dive(n) { return dive(n + 1) }\ndive(0)")
        .unwrap_err();
    assert!(runtime_message(err).contains("maximum call depth of 16"));
}

#[test]
fn arrays_are_shared_between_aliases() {
    let value = eval(
        r#"
        var a = [1, 2]
        var b = a
        push(b, 3)
        b[0] = 10
        length(a) + a[0]
        "#,
    );
    assert_eq!(expect_number(&value), 13.0);
}

#[test]
fn array_indexes_are_floored_and_bounds_checked() {
    assert_eq!(expect_number(&eval("[1, 2, 3][1.7]")), 2.0);
    let message = runtime_message(eval_error("[1][5]"));
    assert!(message.contains("out of bounds"), "{message}");
}

#[test]
fn record_fields_read_null_when_missing() {
    let value = eval(
        r#"
        var r = {a: 1}
        r.b = r.a + 1;
        [r.b, type_of(r.missing)]
        "#,
    );
    assert_eq!(value.to_string(), "[2, null]");
    let message = runtime_message(eval_error("var n = 3\nn.field"));
    assert!(message.contains("cannot read property 'field'"), "{message}");
}

#[test]
fn for_loop_visits_keys_and_characters() {
    let value = eval(
        r#"
        var r = {a: 1, b: 2}
        var out = ""
        for key in r { out = out + key }
        for ch in "xy" { out = out + ch }
        out
        "#,
    );
    assert_eq!(expect_string(&value), "abxy");
}

#[test]
fn logical_operators_short_circuit() {
    let value = eval(
        r#"
        var hit = false
        function touch() {
            hit = true
            return true
        }
        false && touch()
        true || touch()
        hit
        "#,
    );
    assert!(!expect_bool(&value));
}

#[test]
fn comparisons_require_numbers() {
    let message = runtime_message(eval_error(r#""a" < 1"#));
    assert!(message.contains("comparison requires numbers"), "{message}");
    let message = runtime_message(eval_error(r#""a" - 1"#));
    assert!(message.contains("arithmetic requires numbers"), "{message}");
}

#[test]
fn return_escapes_nested_loops() {
    let value = eval(
        r#"
        function first_over(limit) {
            var i = 0
            while true {
                i = i + 1
                if i > limit { return i }
            }
        }
        first_over(3)
        "#,
    );
    assert_eq!(expect_number(&value), 4.0);
}

#[test]
fn builtins_cover_common_helpers() {
    assert_eq!(expect_string(&eval("type_of({})")), "object");
    assert_eq!(expect_string(&eval("type_of(print)")), "native-function");
    assert_eq!(expect_string(&eval("str(1.5)")), "1.5");
    assert_eq!(expect_string(&eval("str(3.0)")), "3");
    assert_eq!(expect_string(&eval("str(1 / 0)")), "Infinity");
    assert_eq!(expect_number(&eval(r#"num("3.5px")"#)), 3.5);
    assert!(expect_number(&eval(r#"num("abc")"#)).is_nan());
    assert_eq!(eval("range(3)").to_string(), "[0, 1, 2]");
    assert_eq!(eval("range(2, 5)").to_string(), "[2, 3, 4]");
    assert_eq!(eval("keys({x: 1, y: 2})").to_string(), "[x, y]");
    assert!(eval("pop([])").is_null());
    assert_eq!(expect_number(&eval(r#"len("héllo")"#)), 5.0);
}

#[test]
fn builtin_arity_is_checked() {
    let message = runtime_message(eval_error("length(1, 2)"));
    assert!(message.contains("expects 1 argument(s), got 2"), "{message}");
    let message = runtime_message(eval_error("range()"));
    assert!(message.contains("1 or 2"), "{message}");
}

#[test]
fn syntax_errors_carry_position() {
    let mut interpreter = Interpreter::new();
    let source = "var ok = 1\nvar = 3";
    let err = interpreter.eval_source(source).unwrap_err();
    match &err {
        EzError::Diagnostic(diag) => assert_eq!(diag.kind, DiagnosticKind::Parser),
        other => panic!("expected parser diagnostic, found {other}"),
    }
    assert!(Interpreter::render_error(&err, source).starts_with("2:"));

    let err = eval_error("var a = 1 @ 2");
    assert!(matches!(err, EzError::Diagnostic(diag) if diag.kind == DiagnosticKind::Lexer));
}

#[test]
fn host_functions_can_be_called_from_scripts() {
    let mut interpreter = Interpreter::new();
    interpreter.define_global(
        "twice",
        Value::native("twice", Some(1), |_, args| {
            let n = args[0].as_number().unwrap_or(0.0);
            Ok(Value::number(n * 2.0))
        }),
    );
    let value = interpreter.eval_source("twice(21)").expect("call host fn");
    assert_eq!(expect_number(&value), 42.0);

    let script_fn = interpreter
        .eval_source("function greet(who) { return \"hi \" + who }\ngreet")
        .expect("function value");
    let greeting = interpreter
        .call_function(&script_fn, &[Value::string("host")])
        .expect("call script fn");
    assert_eq!(expect_string(&greeting), "hi host");
}

struct Recorder;

impl HostCapability for Recorder {
    fn invoke(
        &self,
        _ctx: &mut ExecutionContext<'_>,
        method: &str,
        args: &[Value],
    ) -> ezlang::Result<Value> {
        let rendered: Vec<String> = args.iter().map(ToString::to_string).collect();
        Ok(Value::string(format!("{method}({})", rendered.join(", "))))
    }
}

#[test]
fn host_proxy_reads_members_then_dispatches() {
    let mut interpreter = Interpreter::new();
    let mut members = IndexMap::new();
    members.insert("prefix".to_string(), Value::string("!"));
    interpreter.define_global(
        "bot",
        Value::host_proxy("bot", members, Some(Rc::new(Recorder))),
    );

    let value = interpreter
        .eval_source(r#"[bot.prefix, bot.send("general", 3), type_of(bot)]"#)
        .expect("proxy access");
    assert_eq!(value.to_string(), "[!, send(general, 3), host]");

    let value = interpreter
        .eval_source(r#"bot.prefix = "?"
bot["prefix"]"#)
        .expect("proxy write");
    assert_eq!(expect_string(&value), "?");
}
