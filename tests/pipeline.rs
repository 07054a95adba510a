use js_deobfuscator::{
    deobfuscate_source, generate, parse_program, DeobfuscationOptions, TargetSelection,
};

/// Compares two sources structurally by parsing both and generating
/// them through the same emitter.
fn assert_code_eq(actual: &str, expected: &str) {
    let actual_program = parse_program(actual).expect("actual failed to parse");
    let expected_program = parse_program(expected).expect("expected failed to parse");
    assert_eq!(generate(&actual_program), generate(&expected_program));
}

fn abba_options() -> DeobfuscationOptions {
    DeobfuscationOptions {
        target: TargetSelection::Id("abba".into()),
        ..DeobfuscationOptions::default()
    }
}

#[test]
fn obfuscator_io_output_reparses_and_converges() {
    let source = concat!(
        "var f = (function () {",
        "  var A = [\"hello\", \"world\"];",
        "  return function (i) { return A[i]; };",
        "})();",
        "console.log(f(0) + \" \" + f(1));",
    );

    let options = DeobfuscationOptions::with_sandbox();
    let output = deobfuscate_source(source, &options).expect("pipeline failed");

    // Round trip: generating and reparsing the output yields a
    // structurally equal tree.
    assert_code_eq(&output, &output);
    assert_code_eq(&output, "console.log(\"hello world\");");
}

#[test]
fn inlined_strings_match_what_the_evaluator_computed() {
    // The decoder builds its result, so the inlined literals can only
    // come from actual evaluation.
    let source = concat!(
        "var A = [\"X\", \"unused\"];",
        "function dec(i) {",
        "  var s = A[0];",
        "  var out = \"\";",
        "  for (var j = 0; j < i; j++) { out += s; }",
        "  return out;",
        "}",
        "use(dec(1), dec(2), dec(3));",
    );

    let options = DeobfuscationOptions::with_sandbox();
    let output = deobfuscate_source(source, &options).expect("pipeline failed");
    assert!(output.contains("use(\"X\", \"XX\", \"XXX\")"));
    assert!(!output.contains("dec("));
}

#[test]
fn decoder_wrappers_collapse_onto_the_canonical_decoder() {
    let source = concat!(
        "var A = [\"alpha\", \"bravo\", \"charlie\", \"delta\"];",
        "function dec(i) { return A[i - 2]; }",
        "function wrap(x) { return dec(x + 1); }",
        "var alias = wrap;",
        "console.log(alias(3), wrap(2));",
    );

    let options = DeobfuscationOptions::with_sandbox();
    let output = deobfuscate_source(source, &options).expect("pipeline failed");
    // alias(3) -> wrap(3) -> dec(4) -> A[2]; wrap(2) -> dec(3) -> A[1]
    assert!(output.contains("console.log(\"charlie\", \"bravo\")"));
    assert!(!output.contains("function dec"));
    assert!(!output.contains("function wrap"));
    assert!(!output.contains("alias"));
}

#[test]
fn folded_apart_indices_decode() {
    let source = concat!(
        "var A = [\"left\", \"right\"];",
        "function dec(i) { return A[i]; }",
        "use(dec(-0x12e + 0x12f), dec(0x2 * 0x0));",
    );

    let options = DeobfuscationOptions::with_sandbox();
    let output = deobfuscate_source(source, &options).expect("pipeline failed");
    assert!(output.contains("use(\"right\", \"left\")"));
}

#[test]
fn calls_with_runtime_arguments_survive() {
    let source = concat!(
        "var A = [\"a\", \"b\"];",
        "function dec(i) { return A[i]; }",
        "use(dec(0), dec(someIndex));",
    );

    let options = DeobfuscationOptions::with_sandbox();
    let output = deobfuscate_source(source, &options).expect("pipeline failed");
    assert!(output.contains("\"a\""));
    // The non-literal call is left in place, untouched.
    assert!(output.contains("dec(someIndex)"));
}

#[test]
fn abba_rotation_permutes_by_shift_push() {
    // rotation R on length L must produce [R mod L .. L-1, 0 .. R mod L - 1]
    for (rotation, expected_first) in [(1usize, "bravo"), (3, "delta"), (7, "charlie")] {
        let source = format!(
            concat!(
                "var a = ['alpha', 'bravo', 'charlie', 'delta', 'echo'];",
                "(function (e, f) {{ while (f--) {{ e['push'](e['shift']()); }} }}(a, {}));",
                "use(a);",
            ),
            rotation
        );

        let output = deobfuscate_source(&source, &abba_options()).expect("pipeline failed");
        let bracket = output.find('[').expect("array missing");
        let first = &output[bracket..bracket + 20];
        assert!(
            first.contains(expected_first),
            "rotation {}: expected {} first, got {}",
            rotation,
            expected_first,
            output
        );
        assert!(!output.contains("shift"));
    }
}

#[test]
fn abba_full_cascade() {
    let source = concat!(
        "var _0x1 = (function (a, b) { return ['alpha', 'beta', 'gamma']; }(this, 'seed'));",
        "function p(d) { d = d - 0x10; return _0x1[d]; }",
        "var R = {};",
        "function M(j, k) { var m = R; var parts = j.split('.'); m[parts[0]] = k(m[parts[0]]); }",
        "M('core', function (v) { return v || {}; });",
        "console.log(p(0x10), p(0x11));",
    );

    let output = deobfuscate_source(source, &abba_options()).expect("pipeline failed");

    assert!(output.contains("console.log(\"alpha\", \"beta\")"));
    assert!(output.contains("R[\"core\"] = (function"));
    // The proxy, the loader, and the now-unreferenced string array are
    // all gone after one run.
    assert!(!output.contains("function p"));
    assert!(!output.contains("function M"));
    assert!(!output.contains("_0x1"));
}

#[test]
fn abba_second_run_is_a_no_op() {
    let source = concat!(
        "var _0x1 = (function (a, b) { return ['alpha', 'beta']; }(this, 0x42));",
        "use(_0x1[0x0]);",
    );

    let first = deobfuscate_source(source, &abba_options()).expect("first run failed");
    let second = deobfuscate_source(&first, &abba_options()).expect("second run failed");
    assert_code_eq(&first, &second);
}

#[test]
fn auto_detection_picks_the_obfuscator_io_family() {
    use js_deobfuscator::{run_deobfuscation, LogLevel};
    use std::sync::{Arc, Mutex};

    let source = concat!(
        "var A = ['one', 'two', 'three'];",
        "function dec(i) { return A[i]; }",
        "console.log(dec(0));",
    );

    let lines: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&lines);
    let options = DeobfuscationOptions {
        on_log: Some(Box::new(move |level, message| {
            if level == LogLevel::Info {
                sink.lock().unwrap().push(message.to_string());
            }
        })),
        ..DeobfuscationOptions::with_sandbox()
    };

    let mut program = parse_program(source).unwrap();
    let state = run_deobfuscation(&mut program, &options).expect("run failed");
    assert!(state.changes > 0);
    assert!(lines
        .lock()
        .unwrap()
        .iter()
        .any(|line| line.contains("obfuscator-io")));
    assert!(generate(&program).contains("\"one\""));
}

#[test]
fn control_flow_cleanup_runs_after_string_inlining() {
    let source = concat!(
        "var A = ['go', 'stop'];",
        "function dec(i) { return A[i]; }",
        "var order = '1|0'.split('|'), i = 0;",
        "while (true) {",
        "  switch (order[i++]) {",
        "    case '0': first(dec(0)); continue;",
        "    case '1': second(dec(1)); continue;",
        "  }",
        "  break;",
        "}",
    );

    let options = DeobfuscationOptions::with_sandbox();
    let output = deobfuscate_source(source, &options).expect("pipeline failed");

    assert!(!output.contains("switch"));
    assert!(!output.contains("while"));
    let second = output.find("second(\"stop\")").expect("second missing");
    let first = output.find("first(\"go\")").expect("first missing");
    assert!(second < first, "dispatch order not honored: {}", output);
}
