//! End-to-end scenarios: source in, printed `[Out]:` lines out.

use lox::{interpret, InterpretResult};

fn run(source: &str) -> (InterpretResult, String) {
    let mut out = Vec::new();
    let result = interpret(source, &mut out);
    (result, String::from_utf8(out).unwrap())
}

fn run_ok(source: &str) -> String {
    let (result, out) = run(source);
    assert_eq!(result, InterpretResult::Ok, "output so far: {}", out);
    out
}

#[test]
fn fibonacci() {
    let out = run_ok(
        "fun fib(n) { if (n < 2) return n; return fib(n-1) + fib(n-2); }\n\
         print fib(10);\n",
    );
    assert_eq!(out, "[Out]: 55\n");
}

#[test]
fn closures_and_upvalues() {
    let out = run_ok(
        "fun make() { var x = 0; fun inc() { x = x + 1; return x; } return inc; }\n\
         var c = make(); print c(); print c(); print c();\n",
    );
    assert_eq!(out, "[Out]: 1\n[Out]: 2\n[Out]: 3\n");
}

#[test]
fn classes_and_bound_methods() {
    let out = run_ok(
        "class Greeter { init(name) { this.name = name; }\n\
           hi() { return \"hello \" + this.name; } }\n\
         var g = Greeter(\"world\"); print g.hi();\n",
    );
    assert_eq!(out, "[Out]: hello world\n");
}

#[test]
fn inheritance_and_super() {
    let out = run_ok(
        "class A { f() { return \"A\"; } }\n\
         class B < A { f() { return super.f() + \"B\"; } }\n\
         print B().f();\n",
    );
    assert_eq!(out, "[Out]: AB\n");
}

#[test]
fn short_circuit_evaluation() {
    let out = run_ok(
        "fun boom() { print \"boom\"; return true; }\n\
         print false and boom(); print true or boom();\n",
    );
    assert_eq!(out, "[Out]: false\n[Out]: true\n");
}

#[test]
fn add_stringifies_mixed_operands() {
    let out = run_ok("print 1 + \"a\";");
    assert_eq!(out, "[Out]: 1a\n");
}

#[test]
fn undefined_variable_is_a_runtime_error() {
    let (result, out) = run("print x;");
    assert_eq!(result, InterpretResult::RuntimeError);
    assert_eq!(out, "");
}

#[test]
fn parse_errors_report_as_compile_errors() {
    let (result, _) = run("print 1");
    assert_eq!(result, InterpretResult::CompileError);
    let (result, _) = run("var 1 = x;");
    assert_eq!(result, InterpretResult::CompileError);
}

#[test]
fn scope_errors_report_as_compile_errors() {
    let (result, _) = run("{ var a = a; }");
    assert_eq!(result, InterpretResult::CompileError);
    let (result, _) = run("{ var a = 1; var a = 2; }");
    assert_eq!(result, InterpretResult::CompileError);
}

#[test]
fn locals_and_shadowing() {
    let out = run_ok(
        "var a = \"global\";\n\
         { var a = \"outer\"; { var a = \"inner\"; print a; } print a; }\n\
         print a;\n",
    );
    assert_eq!(out, "[Out]: inner\n[Out]: outer\n[Out]: global\n");
}

#[test]
fn for_loop_counts() {
    let out = run_ok("for (var i = 0; i < 3; i = i + 1) print i;");
    assert_eq!(out, "[Out]: 0\n[Out]: 1\n[Out]: 2\n");
}

#[test]
fn top_level_return_ends_the_script() {
    let out = run_ok("print 1; return; print 2;");
    assert_eq!(out, "[Out]: 1\n");
}

#[test]
fn methods_dispatch_through_inheritance_chains() {
    let out = run_ok(
        "class A { who() { return \"A\"; } name() { return \"I am \" + this.who(); } }\n\
         class B < A { who() { return \"B\"; } }\n\
         print A().name(); print B().name();\n",
    );
    assert_eq!(out, "[Out]: I am A\n[Out]: I am B\n");
}

#[test]
fn block_comments_and_line_comments() {
    let out = run_ok("/* a\nmultiline comment */ print 1; // trailing\n");
    assert_eq!(out, "[Out]: 1\n");
}
