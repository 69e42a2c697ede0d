//! End-to-end resolver scenarios: higher-order calls, captures, strictness,
//! blocked declarations, cancellation, and JSON input/output.

use purity_checker::diagnostics::Diagnostic;
use purity_checker::{
    build_graph, check, resolve_with_cancel, CancellationToken, CheckOptions, CompilationUnit,
    DeclarationRecord, Graph, Parameter, PurityVerdict, Resolution, ResolveError, Rule, Severity,
};

fn run(unit: &CompilationUnit) -> Resolution {
    check(unit, &CheckOptions::default())
}

fn verdict(res: &Resolution, id: &str) -> PurityVerdict {
    res.verdict(id)
        .cloned()
        .unwrap_or_else(|| panic!("no verdict for '{}'", id))
}

fn find<'a>(res: &'a Resolution, rule: Rule, decl: &str) -> &'a Diagnostic {
    res.diagnostics
        .iter()
        .find(|d| d.rule == rule && d.decl.as_str() == decl)
        .unwrap_or_else(|| panic!("no {:?} on '{}': {:?}", rule, decl, res.diagnostics))
}

fn assert_clean(res: &Resolution) {
    assert!(
        res.diagnostics.is_empty(),
        "expected no diagnostics, got:\n{}",
        res.diagnostics
            .iter()
            .map(Diagnostic::render_plain)
            .collect::<String>()
    );
}

// ═══════════════════════════════════════════════════════════════════
// Higher-order calls
// ═══════════════════════════════════════════════════════════════════

#[test]
fn forwarded_parameter_becomes_outer_obligation() {
    // h(transform) { transform() }   outer(g) { h(g) }
    let unit = CompilationUnit::new()
        .declare(
            DeclarationRecord::function("h")
                .param(Parameter::callable("transform"))
                .call("h0", "transform"),
        )
        .declare(
            DeclarationRecord::function("outer")
                .param(Parameter::callable("g"))
                .call_with("o0", "h", &[("transform", "g")]),
        );
    let res = run(&unit);
    assert_eq!(
        verdict(&res, "outer"),
        PurityVerdict::conditionally_pure(&"outer".into(), ["g"])
    );
    assert_clean(&res);
}

#[test]
fn forwarding_a_pure_parameter_discharges_the_obligation() {
    let unit = CompilationUnit::new()
        .declare(
            DeclarationRecord::function("h")
                .param(Parameter::callable("transform"))
                .call("h0", "transform"),
        )
        .declare(
            DeclarationRecord::function("outer")
                .pure()
                .param(Parameter::pure_callable("g"))
                .call_with("o0", "h", &[("transform", "g")]),
        );
    let res = run(&unit);
    assert_eq!(verdict(&res, "outer"), PurityVerdict::Pure);
    assert_clean(&res);
}

#[test]
fn passing_a_primitive_is_impure() {
    let unit = CompilationUnit::new()
        .primitive("print")
        .declare(
            DeclarationRecord::function("h")
                .param(Parameter::callable("transform"))
                .call("h0", "transform"),
        )
        .declare(DeclarationRecord::function("caller").call_with(
            "c0",
            "h",
            &[("transform", "print")],
        ));
    let res = run(&unit);
    assert_eq!(verdict(&res, "caller"), PurityVerdict::Impure);
    assert_eq!(
        res.call_site("caller", "c0").map(|c| &c.verdict),
        Some(&PurityVerdict::Impure)
    );
    let warning = find(&res, Rule::DegradedCallSite, "caller");
    assert!(warning.message.contains("'print'"), "{}", warning.message);
}

#[test]
fn unmarked_caller_passing_impure_argument_gets_a_call_site_warning() {
    // h(transform) { transform() }   caller() { h(log) }
    let unit = CompilationUnit::new()
        .primitive("print")
        .declare(DeclarationRecord::function("log").call("l0", "print"))
        .declare(
            DeclarationRecord::function("h")
                .param(Parameter::callable("transform"))
                .call("h0", "transform"),
        )
        .declare(DeclarationRecord::function("caller").call_with(
            "c0",
            "h",
            &[("transform", "log")],
        ));
    let res = run(&unit);
    assert!(verdict(&res, "h").is_conditional());
    assert_eq!(verdict(&res, "caller"), PurityVerdict::Impure);
    assert_eq!(
        res.call_site("caller", "c0").map(|c| &c.verdict),
        Some(&PurityVerdict::Impure)
    );

    assert_eq!(res.diagnostics.len(), 1, "{:?}", res.diagnostics);
    let warning = find(&res, Rule::DegradedCallSite, "caller");
    assert_eq!(warning.severity, Severity::Warning);
    assert_eq!(warning.code, "P0403");
    assert_eq!(warning.site.as_ref().map(|s| s.as_str()), Some("c0"));
    assert_eq!(
        warning.message,
        "call to conditionally pure 'h' is impure: 'log' passed for parameter 'transform' is impure"
    );
    assert!(!res.has_errors());
}

#[test]
fn pure_argument_leaves_the_call_site_clean() {
    let unit = CompilationUnit::new()
        .declare(DeclarationRecord::function("id"))
        .declare(
            DeclarationRecord::function("h")
                .param(Parameter::callable("transform"))
                .call("h0", "transform"),
        )
        .declare(DeclarationRecord::function("caller").call_with(
            "c0",
            "h",
            &[("transform", "id")],
        ));
    let res = run(&unit);
    assert_eq!(verdict(&res, "caller"), PurityVerdict::Pure);
    assert_clean(&res);
}

#[test]
fn pure_caller_passing_impure_argument_is_a_mismatch() {
    let unit = CompilationUnit::new()
        .primitive("print")
        .declare(DeclarationRecord::function("log").call("l0", "print"))
        .declare(
            DeclarationRecord::function("h")
                .conditionally_pure()
                .param(Parameter::callable("transform"))
                .call("h0", "transform"),
        )
        .declare(DeclarationRecord::function("user").pure().call_with(
            "u0",
            "h",
            &[("transform", "log")],
        ));
    let res = run(&unit);
    assert!(verdict(&res, "h").is_conditional());
    assert_eq!(verdict(&res, "user"), PurityVerdict::Impure);
    let diag = find(&res, Rule::ImpureDeclaration, "user");
    assert_eq!(diag.site.as_ref().map(|s| s.as_str()), Some("u0"));
    assert_eq!(
        diag.notes,
        vec!["passes impure 'log' as 'transform' to 'h' at site 'u0'".to_string()]
    );
    // `transform` does not require purity: the call site is degraded, which
    // is a warning, and the annotation mismatch is the error.
    assert!(!res.diagnostics.iter().any(|d| d.rule == Rule::ImpureArgument));
    let warning = find(&res, Rule::DegradedCallSite, "user");
    assert_eq!(warning.site.as_ref().map(|s| s.as_str()), Some("u0"));
    assert_eq!(res.error_count(), 1);
    assert_eq!(res.warning_count(), 1);
}

// ═══════════════════════════════════════════════════════════════════
// Captures
// ═══════════════════════════════════════════════════════════════════

#[test]
fn capturing_declarations_follows_their_verdicts() {
    let unit = CompilationUnit::new()
        .primitive("print")
        .declare(DeclarationRecord::closure("pure_cl"))
        .declare(DeclarationRecord::closure("impure_cl").call("i0", "print"))
        .declare(
            DeclarationRecord::closure("cond_cl")
                .param(Parameter::callable("k"))
                .call("k0", "k"),
        )
        .declare(
            DeclarationRecord::function("uses_pure")
                .pure()
                .capture("pure_cl")
                .capture("cond_cl"),
        )
        .declare(
            DeclarationRecord::function("uses_impure")
                .pure()
                .capture("impure_cl"),
        );
    let res = run(&unit);
    assert_eq!(verdict(&res, "uses_pure"), PurityVerdict::Pure);
    assert_eq!(verdict(&res, "uses_impure"), PurityVerdict::Impure);
    let diag = find(&res, Rule::ImpureDeclaration, "uses_impure");
    assert_eq!(diag.notes, vec!["captures impure declaration 'impure_cl'".to_string()]);
    assert_eq!(res.diagnostics.len(), 1);
}

#[test]
fn pure_closure_capturing_global_is_a_structural_violation() {
    let unit = CompilationUnit::new().global("config").declare(
        DeclarationRecord::closure("reader")
            .pure()
            .capture("config"),
    );
    let res = run(&unit);
    assert_eq!(verdict(&res, "reader"), PurityVerdict::Impure);
    let codes: Vec<&str> = res.diagnostics.iter().map(|d| d.code).collect();
    assert_eq!(codes, vec!["P0101", "P0400"]);
}

// ═══════════════════════════════════════════════════════════════════
// Blocked declarations
// ═══════════════════════════════════════════════════════════════════

#[test]
fn unresolved_reference_blocks_only_its_declaration() {
    let unit = CompilationUnit::new()
        .declare(DeclarationRecord::function("broken").call("b0", "missing"))
        .declare(DeclarationRecord::function("caller").call("c0", "broken"))
        .declare(DeclarationRecord::function("bystander"));
    let res = run(&unit);
    assert_eq!(verdict(&res, "broken"), PurityVerdict::Unresolvable);
    assert_eq!(verdict(&res, "caller"), PurityVerdict::Impure);
    assert_eq!(verdict(&res, "bystander"), PurityVerdict::Pure);

    assert!(find(&res, Rule::UnresolvedCallee, "broken").is_error());
    let warning = find(&res, Rule::UnresolvableDependency, "caller");
    assert_eq!(warning.severity, Severity::Warning);
    assert_eq!(warning.site.as_ref().map(|s| s.as_str()), Some("c0"));
    assert_eq!(
        res.call_site("caller", "c0").map(|c| &c.verdict),
        Some(&PurityVerdict::Unresolvable)
    );
}

#[test]
fn unresolvable_argument_is_reported_at_the_call_site() {
    let unit = CompilationUnit::new()
        .declare(DeclarationRecord::function("broken").capture("nowhere"))
        .declare(
            DeclarationRecord::function("apply")
                .param(Parameter::pure_callable("f"))
                .call("a0", "f"),
        )
        .declare(DeclarationRecord::function("caller").call_with(
            "c0",
            "apply",
            &[("f", "broken")],
        ));
    let res = run(&unit);
    assert_eq!(verdict(&res, "caller"), PurityVerdict::Impure);
    find(&res, Rule::UnresolvedCapture, "broken");
    let warning = find(&res, Rule::UnresolvableDependency, "caller");
    assert!(warning.message.contains("'broken'"), "{}", warning.message);
    assert!(
        !res.diagnostics.iter().any(|d| d.rule == Rule::ImpureArgument),
        "unresolvable arguments are warnings, not impure-argument errors"
    );
}

// ═══════════════════════════════════════════════════════════════════
// Strictness
// ═══════════════════════════════════════════════════════════════════

#[test]
fn strict_mode_only_affects_open_obligations() {
    let unit = CompilationUnit::new()
        .declare(DeclarationRecord::function("id"))
        .declare(
            DeclarationRecord::function("h")
                .param(Parameter::callable("transform"))
                .call("h0", "transform"),
        )
        .declare(DeclarationRecord::function("user").call_with(
            "u0",
            "h",
            &[("transform", "id")],
        ));

    let lenient = check(&unit, &CheckOptions::default());
    let strict = check(&unit, &CheckOptions::strict());

    assert!(verdict(&lenient, "h").is_conditional());
    assert_eq!(verdict(&strict, "h"), PurityVerdict::Impure);
    // Callers inside the unit were resolved against the conditional verdict.
    assert_eq!(verdict(&strict, "user"), PurityVerdict::Pure);
    assert_eq!(verdict(&strict, "id"), PurityVerdict::Pure);

    let warnings: Vec<&str> = strict
        .diagnostics
        .iter()
        .map(|d| d.decl.as_str())
        .collect();
    assert_eq!(warnings, vec!["h"]);
    assert_eq!(strict.warning_count(), 1);
}

#[test]
fn strict_mode_settles_captured_conditional_closures() {
    // cond_cl(k) { k() }   user() [pure] captures cond_cl
    let unit = CompilationUnit::new()
        .declare(
            DeclarationRecord::closure("cond_cl")
                .param(Parameter::callable("k"))
                .call("k0", "k"),
        )
        .declare(DeclarationRecord::function("user").pure().capture("cond_cl"));

    let lenient = check(&unit, &CheckOptions::default());
    assert_eq!(verdict(&lenient, "user"), PurityVerdict::Pure);
    assert_clean(&lenient);

    let strict = check(&unit, &CheckOptions::strict());
    assert_eq!(verdict(&strict, "cond_cl"), PurityVerdict::Impure);
    assert_eq!(verdict(&strict, "user"), PurityVerdict::Impure);
    find(&strict, Rule::UnresolvedObligation, "cond_cl");
    let mismatch = find(&strict, Rule::ImpureDeclaration, "user");
    assert_eq!(
        mismatch.notes,
        vec!["captures 'cond_cl', whose obligations stay open".to_string()]
    );
    assert_eq!(strict.error_count(), 1);
}

#[test]
fn strict_mode_settles_conditional_arguments() {
    // map(f) { f() }   h(transform) { transform() }   apply(g: pure) { g() }
    // user() { h(map) }   checked() { apply(map) }
    let unit = CompilationUnit::new()
        .declare(
            DeclarationRecord::function("map")
                .param(Parameter::callable("f"))
                .call("m0", "f"),
        )
        .declare(
            DeclarationRecord::function("h")
                .param(Parameter::callable("transform"))
                .call("h0", "transform"),
        )
        .declare(
            DeclarationRecord::function("apply")
                .param(Parameter::pure_callable("g"))
                .call("a0", "g"),
        )
        .declare(DeclarationRecord::function("user").call_with(
            "u0",
            "h",
            &[("transform", "map")],
        ))
        .declare(DeclarationRecord::function("checked").call_with(
            "c0",
            "apply",
            &[("g", "map")],
        ));

    let lenient = check(&unit, &CheckOptions::default());
    assert_eq!(verdict(&lenient, "user"), PurityVerdict::Pure);
    assert_eq!(verdict(&lenient, "checked"), PurityVerdict::Pure);
    assert_clean(&lenient);

    let strict = check(&unit, &CheckOptions::strict());
    assert_eq!(verdict(&strict, "user"), PurityVerdict::Impure);
    assert_eq!(verdict(&strict, "checked"), PurityVerdict::Impure);
    assert_eq!(
        strict.call_site("user", "u0").map(|c| &c.verdict),
        Some(&PurityVerdict::Impure)
    );
    assert_eq!(find(&strict, Rule::DegradedCallSite, "user").severity, Severity::Warning);
    assert!(find(&strict, Rule::ImpureArgument, "checked").is_error());

    let codes: Vec<(&str, &str)> = strict
        .diagnostics
        .iter()
        .map(|d| (d.decl.as_str(), d.code))
        .collect();
    assert_eq!(
        codes,
        vec![
            ("map", "P0500"),
            ("h", "P0500"),
            ("user", "P0403"),
            ("checked", "P0401"),
        ]
    );
}

// ═══════════════════════════════════════════════════════════════════
// Cancellation
// ═══════════════════════════════════════════════════════════════════

#[test]
fn cancellation_is_reported_not_swallowed() {
    let unit = CompilationUnit::new()
        .declare(DeclarationRecord::function("a"))
        .declare(DeclarationRecord::function("b").call("b0", "a"));
    let graph = build_graph(&unit).expect("well-formed unit");
    let token = CancellationToken::new();

    let res = resolve_with_cancel(&graph, &CheckOptions::default(), &token).expect("not cancelled");
    assert_eq!(verdict(&res, "b"), PurityVerdict::Pure);

    token.cancel();
    for jobs in [1, 4] {
        let err = resolve_with_cancel(&graph, &CheckOptions::default().with_jobs(jobs), &token)
            .expect_err("cancelled");
        assert!(matches!(err, ResolveError::Cancelled { resolved: 0, total: 2 }));
    }
}

// ═══════════════════════════════════════════════════════════════════
// JSON
// ═══════════════════════════════════════════════════════════════════

const UNIT_JSON: &str = r#"{
    "name": "shapes",
    "externals": [
        {"name": "print", "kind": "primitive"},
        {"name": "counter", "kind": "global"}
    ],
    "declarations": [
        {"id": "area", "kind": "method", "intent": "pure",
         "params": [{"name": "shape"}],
         "receiver": {"owner": "Shape", "access": {"kind": "alias", "param": "shape"}},
         "span": {"file": "shapes.src", "line": 3, "col": 5}},
        {"id": "describe", "kind": "method", "intent": "pure",
         "receiver": {"owner": "Shape", "access": {"kind": "implicit"}},
         "calls": [{"site": "d0", "callee": "print"}],
         "span": {"file": "shapes.src", "line": 9, "col": 5}},
        {"id": "map_area", "kind": "function", "intent": "conditionally_pure",
         "params": [{"name": "f", "callable": true}],
         "calls": [{"site": "m0", "callee": "f"}, {"site": "m1", "callee": "area"}]}
    ]
}"#;

#[test]
fn unit_from_json_resolves() {
    let unit = CompilationUnit::from_json(UNIT_JSON).expect("valid json");
    let res = check(&unit, &CheckOptions::default());
    assert_eq!(verdict(&res, "area"), PurityVerdict::Pure);
    assert_eq!(verdict(&res, "describe"), PurityVerdict::Impure);
    assert!(verdict(&res, "map_area").is_conditional());

    let mismatch = find(&res, Rule::ImpureDeclaration, "describe");
    assert_eq!(mismatch.site.as_ref().map(|s| s.as_str()), Some("d0"));
    let text = mismatch.render_plain();
    assert!(text.contains("--> shapes.src:9:5 in 'describe' at call site 'd0'"), "{}", text);
}

#[test]
fn resolution_serializes_verdicts_and_diagnostics() {
    let unit = CompilationUnit::from_json(UNIT_JSON).expect("valid json");
    let res = check(&unit, &CheckOptions::default());
    let json = serde_json::to_value(&res).expect("serializable");

    assert_eq!(json["verdicts"]["area"]["verdict"], "pure");
    assert_eq!(json["verdicts"]["map_area"]["verdict"], "conditionally_pure");
    assert_eq!(json["verdicts"]["map_area"]["obligations"][0]["name"], "f");
    let codes: Vec<&str> = json["diagnostics"]
        .as_array()
        .expect("array")
        .iter()
        .filter_map(|d| d["code"].as_str())
        .collect();
    assert!(codes.contains(&"P0102"), "{:?}", codes);
    assert!(codes.contains(&"P0400"), "{:?}", codes);
}

#[test]
fn graph_build_rejects_duplicate_json_declarations() {
    let unit = CompilationUnit::from_json(
        r#"{"declarations": [
            {"id": "f", "kind": "function"},
            {"id": "f", "kind": "closure"}
        ]}"#,
    )
    .expect("valid json");
    assert!(Graph::build(&unit).is_err());
    let res = check(&unit, &CheckOptions::default());
    assert_eq!(res.verdicts.len(), 1);
    find(&res, Rule::DuplicateDeclaration, "f");
}
