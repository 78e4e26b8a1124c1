use std::io::Write;
use std::process::{Command, Output};

use tempfile::NamedTempFile;

fn cinder() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_cinder"));
    cmd.env_remove("CINDER_LOG");
    cmd
}

fn script(source: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".cn").tempfile().expect("create temp file");
    file.write_all(source.as_bytes()).expect("write script");
    file
}

fn run(source: &str, args: &[&str]) -> Output {
    let file = script(source);
    cinder()
        .arg(file.path())
        .args(args)
        .env("NO_COLOR", "1")
        .output()
        .expect("failed to run cinder")
}

fn stdout(out: &Output) -> String {
    String::from_utf8_lossy(&out.stdout).into_owned()
}

fn stderr(out: &Output) -> String {
    String::from_utf8_lossy(&out.stderr).into_owned()
}

// --- Programs that finish ---

#[test]
fn function_call() {
    let out = run("func add(a,b){ return a+b; } print(add(2,3));", &[]);
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    assert_eq!(stdout(&out), "5\n");
}

#[test]
fn while_loop() {
    let out = run("var x = 0; while(x<3){ print(x); x = x+1; }", &[]);
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    assert_eq!(stdout(&out), "0\n1\n2\n");
}

#[test]
fn for_loop_with_break_and_continue() {
    let out = run("for(var i=0; i<5; i=i+1){ if(i==2) continue; if(i==4) break; print(i); }", &[]);
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    assert_eq!(stdout(&out), "0\n1\n3\n");
}

#[test]
fn class_with_constructor_and_method() {
    let src = "class Point{ field x; field y;\n  Point(a,b){ this.x=a; this.y=b; return this; }\n  \
               meth sum(){ return this.x+this.y; }\n}\nvar p = Point(2,5);\nprint(p.sum());\n";
    let out = run(src, &[]);
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    assert_eq!(stdout(&out), "7\n");
}

#[test]
fn string_concatenation() {
    let out = run("print(\"a\"+\"b\");\nprint(\"a\"+\"b\");", &[]);
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    assert_eq!(stdout(&out), "ab\nab\n");
}

#[test]
fn gc_stress_does_not_change_output() {
    let src = "class Box { field v; Box(x) { v = x; } meth get() { return v; } }\n\
               var s = \"\";\n\
               for (var i = 0; i < 20; i++) { var b = Box(\"x\"); s = s + b.get(); }\n\
               print(s);";
    let out = run(src, &["--gc-stress"]);
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    assert_eq!(stdout(&out), format!("{}\n", "x".repeat(20)));
}

#[test]
fn stdin_reaches_getchar() {
    let file = script("print(getchar());\nprint(getchar());");
    let mut child = cinder()
        .arg(file.path())
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::piped())
        .spawn()
        .expect("failed to run cinder");
    child.stdin.take().expect("stdin").write_all(b"ok").expect("write stdin");
    let out = child.wait_with_output().expect("wait for cinder");
    assert!(out.status.success());
    assert_eq!(stdout(&out), "o\nk\n");
}

#[test]
fn top_level_loop_reads_stdin_to_eof() {
    let src = "var done = false;\nvar n = 0;\n\
               while (!done) { var c = getchar(); if (isnone(c)) { done = true; } else { n++; } }\n\
               print(n);\n\
               var last = getchar();\n\
               print(isnone(last));\n";
    let file = script(src);
    let mut child = cinder()
        .arg(file.path())
        .env("NO_COLOR", "1")
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .spawn()
        .expect("failed to run cinder");
    child.stdin.take().expect("stdin").write_all(b"abc").expect("write stdin");
    let out = child.wait_with_output().expect("wait for cinder");
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    assert_eq!(stdout(&out), "3\ntrue\n");
}

// --- Exit codes ---

#[test]
fn exit_native_sets_status() {
    let out = run("print(1);\nexit(7);\nprint(2);", &[]);
    assert_eq!(out.status.code(), Some(7));
    assert_eq!(stdout(&out), "1\n");
}

#[test]
fn missing_file() {
    let out = cinder()
        .arg("/definitely/not/here.cn")
        .env("NO_COLOR", "1")
        .output()
        .expect("failed to run cinder");
    assert_eq!(out.status.code(), Some(1));
    assert!(stderr(&out).starts_with("Failed to open /definitely/not/here.cn: "), "{}", stderr(&out));
}

// --- Diagnostics ---

#[test]
fn undefined_function_is_a_compile_error() {
    let out = run("print(1);\nnope();\n", &[]);
    assert_eq!(out.status.code(), Some(1));
    assert!(stdout(&out).is_empty(), "nothing should run: {}", stdout(&out));
    let err = stderr(&out);
    assert!(err.starts_with("Syntax error at line 2: Undefined function 'nope'\n"), "{err}");
    assert!(err.contains("2 | nope();"), "{err}");
    assert!(err.contains("^^^^"), "{err}");
}

#[test]
fn wrong_argument_count_is_a_compile_error() {
    let out = run("func f(a) { return a; }\nprint(f(1, 2));", &[]);
    assert_eq!(out.status.code(), Some(1));
    assert!(stdout(&out).is_empty());
    assert!(stderr(&out).starts_with("Syntax error at line 2: Expected 1 arguments in 'f' function call, found 2"));
}

#[test]
fn runtime_error_after_output() {
    let out = run("print(\"before\");\nvar a = 0;\nprint(1 / a);", &[]);
    assert_eq!(out.status.code(), Some(1));
    assert_eq!(stdout(&out), "before\n");
    let err = stderr(&out);
    assert!(err.starts_with("Error at line 3: Division by zero\n"), "{err}");
    assert!(err.contains("print(1 / a);"), "{err}");
}

#[test]
fn no_color_means_plain_text() {
    let out = run("nope();", &[]);
    assert!(!stderr(&out).contains("\x1b["));
    let out = run("nope();", &["--no-color"]);
    assert!(!stderr(&out).contains("\x1b["));
}

#[test]
fn json_diagnostics() {
    let out = run("var a = 1;\nvar a = 2;", &["--json"]);
    assert_eq!(out.status.code(), Some(1));
    let v: serde_json::Value = serde_json::from_str(stderr(&out).trim()).expect("valid JSON");
    assert_eq!(v["stage"], "syntax");
    assert_eq!(v["line"], 2);
    assert_eq!(v["message"], "'a' has already been defined");
    assert_eq!(v["label"]["line"], 2);
}

#[test]
fn stack_overflow_is_fatal() {
    let out = run("func f(n) { return f(n + 1); }\nf(0);", &["--stack-size", "128"]);
    assert_eq!(out.status.code(), Some(1));
    assert!(stderr(&out).starts_with("FATAL: Stack overflow"), "{}", stderr(&out));
}

// --- Dumps ---

#[test]
fn dump_tokens() {
    let out = run("var x = 1;", &["--dump", "tokens"]);
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    let text = stdout(&out);
    let lines: Vec<_> = text.lines().collect();
    assert_eq!(lines.len(), 5, "{text}");
    assert!(lines[0].contains("KEYWORD") && lines[0].ends_with("var"), "{text}");
    assert!(lines[1].contains("IDENT") && lines[1].ends_with('x'), "{text}");
    assert!(lines[3].contains("INT"), "{text}");
}

#[test]
fn dump_bytecode_json_does_not_run() {
    let out = run("print(42);", &["--dump", "bytecode", "--json"]);
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    let v: serde_json::Value = serde_json::from_str(&stdout(&out)).expect("valid JSON");
    let ops: Vec<_> = v.as_array().unwrap().iter().map(|i| i["op"].as_str().unwrap().to_string()).collect();
    assert!(ops.contains(&"NATIVE_CALL".to_string()), "{ops:?}");
    assert_eq!(ops.last().map(String::as_str), Some("RETURN"));
}

#[test]
fn dump_reports_compile_errors() {
    let out = run("var = 3;", &["--dump", "bytecode"]);
    assert_eq!(out.status.code(), Some(1));
    assert!(stderr(&out).starts_with("Syntax error at line 1: "), "{}", stderr(&out));
}
