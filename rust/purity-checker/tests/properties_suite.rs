//! Whole-pipeline properties of the purity resolver: idempotence,
//! monotonicity, conditional soundness, cycle handling, the method receiver
//! rule, and independence from the worker count.

use purity_checker::{
    check, resolve_detailed, Category, CheckOptions, CompilationUnit, DeclarationRecord, Graph,
    Parameter, PurityVerdict, ReceiverAccess, Resolution, Rule,
};

fn verdict(res: &Resolution, id: &str) -> PurityVerdict {
    res.verdict(id)
        .cloned()
        .unwrap_or_else(|| panic!("no verdict for '{}'", id))
}

fn conditional(decl: &str, params: &[&str]) -> PurityVerdict {
    PurityVerdict::conditionally_pure(&decl.into(), params.iter().copied())
}

/// Distance from `Pure` in the lattice.
fn rank(v: &PurityVerdict) -> u8 {
    match v {
        PurityVerdict::Pure => 0,
        PurityVerdict::ConditionallyPure(_) => 1,
        PurityVerdict::Impure | PurityVerdict::Unresolvable => 2,
    }
}

fn base_unit() -> CompilationUnit {
    CompilationUnit::new()
        .primitive("print")
        .declare(DeclarationRecord::function("log").call("l0", "print"))
        .declare(DeclarationRecord::function("id").param(Parameter::value("x")))
        .declare(
            DeclarationRecord::function("h")
                .param(Parameter::callable("transform"))
                .call("h0", "transform"),
        )
        .declare(DeclarationRecord::function("use_h").call_with(
            "u0",
            "h",
            &[("transform", "id")],
        ))
        .declare(DeclarationRecord::function("even").call("e0", "odd"))
        .declare(DeclarationRecord::function("odd").call("o0", "even"))
        .declare(
            DeclarationRecord::function("main")
                .call("m0", "use_h")
                .call("m1", "even"),
        )
}

// ═══════════════════════════════════════════════════════════════════
// Idempotence
// ═══════════════════════════════════════════════════════════════════

#[test]
fn resolving_twice_gives_identical_results() {
    let graph = Graph::build_partial(&base_unit());
    let first = resolve_detailed(&graph, &CheckOptions::default());
    let second = resolve_detailed(&graph, &CheckOptions::default());
    assert_eq!(first, second);
}

// ═══════════════════════════════════════════════════════════════════
// Monotonicity
// ═══════════════════════════════════════════════════════════════════

#[test]
fn adding_an_impure_call_never_improves_a_verdict() {
    let before = check(&base_unit(), &CheckOptions::default());

    for target in ["id", "h", "use_h", "even", "odd", "main"] {
        let mut unit = base_unit();
        for decl in unit.declarations.iter_mut() {
            if decl.id.as_str() == target {
                *decl = decl.clone().call("extra", "log");
            }
        }
        let after = check(&unit, &CheckOptions::default());

        assert_eq!(rank(&verdict(&after, target)), 2, "'{}' now calls log", target);
        for (id, old) in &before.verdicts {
            let new = &after.verdicts[id];
            assert!(
                rank(new) >= rank(old),
                "adding log call to '{}' moved '{}' from {} to {}",
                target,
                id,
                old,
                new
            );
        }
    }
}

#[test]
fn pure_leaf_becomes_impure_when_calling_impure() {
    let unit = CompilationUnit::new()
        .primitive("print")
        .declare(DeclarationRecord::function("log").call("l0", "print"))
        .declare(DeclarationRecord::function("f"));
    assert_eq!(
        verdict(&check(&unit, &CheckOptions::default()), "f"),
        PurityVerdict::Pure
    );

    let unit = CompilationUnit::new()
        .primitive("print")
        .declare(DeclarationRecord::function("log").call("l0", "print"))
        .declare(DeclarationRecord::function("f").call("f0", "log"));
    assert_eq!(
        verdict(&check(&unit, &CheckOptions::default()), "f"),
        PurityVerdict::Impure
    );
}

// ═══════════════════════════════════════════════════════════════════
// Worked examples and conditional soundness
// ═══════════════════════════════════════════════════════════════════

fn example_unit() -> CompilationUnit {
    CompilationUnit::new()
        .primitive("print")
        .global("global_counter")
        // f(x: Int) -> Int { return x + 1 }
        .declare(DeclarationRecord::function("f").param(Parameter::value("x")))
        // g() -> Int { return global_counter }
        .declare(DeclarationRecord::function("g").capture("global_counter"))
        // h(transform) -> Int { return transform(1) }
        .declare(
            DeclarationRecord::function("h")
                .param(Parameter::callable("transform"))
                .call("h0", "transform"),
        )
        .declare(DeclarationRecord::function("log").call("l0", "print"))
        .declare(DeclarationRecord::function("with_pure").call_with(
            "p0",
            "h",
            &[("transform", "f")],
        ))
        .declare(DeclarationRecord::function("with_impure").call_with(
            "i0",
            "h",
            &[("transform", "log")],
        ))
}

#[test]
fn worked_examples() {
    let res = check(&example_unit(), &CheckOptions::default());
    assert_eq!(verdict(&res, "f"), PurityVerdict::Pure);
    assert_eq!(verdict(&res, "g"), PurityVerdict::Impure);
    assert_eq!(verdict(&res, "h"), conditional("h", &["transform"]));
    assert_eq!(verdict(&res, "with_pure"), PurityVerdict::Pure);
    assert_eq!(verdict(&res, "with_impure"), PurityVerdict::Impure);

    // The only finding is the degraded call in `with_impure`.
    let findings: Vec<(&str, Rule, Option<&str>)> = res
        .diagnostics
        .iter()
        .map(|d| (d.decl.as_str(), d.rule, d.site.as_ref().map(|s| s.as_str())))
        .collect();
    assert_eq!(
        findings,
        vec![("with_impure", Rule::DegradedCallSite, Some("i0"))]
    );
    assert!(!res.has_errors());
}

#[test]
fn conditional_call_sites_follow_their_arguments() {
    let res = check(&example_unit(), &CheckOptions::default());

    for site in &res.call_sites {
        let Some(callee) = &site.callee else { continue };
        let Some(PurityVerdict::ConditionallyPure(_)) = res.verdicts.get(callee) else {
            continue;
        };
        let expected = match site.caller.as_str() {
            "with_pure" => PurityVerdict::Pure,
            "with_impure" => PurityVerdict::Impure,
            other => panic!("unexpected caller '{}'", other),
        };
        assert_eq!(site.verdict, expected, "call site {}", site.site);
    }
    assert_eq!(
        res.call_site("h", "h0").map(|c| &c.verdict),
        Some(&conditional("h", &["transform"]))
    );
}

#[test]
fn conditionally_pure_argument_satisfies_obligation() {
    // map(f) { f() }; apply(g) { g() }; user() { apply(map) }
    let unit = CompilationUnit::new()
        .declare(
            DeclarationRecord::function("map")
                .param(Parameter::callable("f"))
                .call("m0", "f"),
        )
        .declare(
            DeclarationRecord::function("apply")
                .param(Parameter::callable("g"))
                .call("a0", "g"),
        )
        .declare(DeclarationRecord::function("user").call_with(
            "u0",
            "apply",
            &[("g", "map")],
        ));
    let res = check(&unit, &CheckOptions::default());
    assert_eq!(verdict(&res, "user"), PurityVerdict::Pure);
}

// ═══════════════════════════════════════════════════════════════════
// Cycles
// ═══════════════════════════════════════════════════════════════════

#[test]
fn two_member_cycle_without_effects_is_pure() {
    let unit = CompilationUnit::new()
        .declare(DeclarationRecord::function("ping").call("p0", "pong"))
        .declare(DeclarationRecord::function("pong").call("q0", "ping"));
    let res = check(&unit, &CheckOptions::default());
    assert_eq!(verdict(&res, "ping"), PurityVerdict::Pure);
    assert_eq!(verdict(&res, "pong"), PurityVerdict::Pure);
    assert!(res.diagnostics.is_empty());
}

#[test]
fn three_member_cycle_with_external_call_is_unresolvable() {
    let unit = CompilationUnit::new()
        .primitive("print")
        .declare(DeclarationRecord::function("a").call("a0", "b"))
        .declare(DeclarationRecord::function("b").call("b0", "c"))
        .declare(
            DeclarationRecord::function("c")
                .call("c0", "a")
                .call("c1", "print"),
        );
    let res = check(&unit, &CheckOptions::default());
    for id in ["a", "b", "c"] {
        assert_eq!(verdict(&res, id), PurityVerdict::Unresolvable, "{}", id);
    }

    let cycle_errors: Vec<_> = res
        .diagnostics
        .iter()
        .filter(|d| d.category == Category::PurityCycleError)
        .collect();
    assert_eq!(cycle_errors.len(), 1, "{:?}", res.diagnostics);
    let related: Vec<&str> = cycle_errors[0].related.iter().map(|d| d.as_str()).collect();
    assert_eq!(related, vec!["a", "b", "c"]);
}

#[test]
fn conditional_cycle_keeps_obligations() {
    // a(f) { f(); b(f) }   b(g) { a(g) }
    let unit = CompilationUnit::new()
        .declare(
            DeclarationRecord::function("a")
                .param(Parameter::callable("f"))
                .call("a0", "f")
                .call_with("a1", "b", &[("g", "f")]),
        )
        .declare(
            DeclarationRecord::function("b")
                .param(Parameter::callable("g"))
                .call_with("b0", "a", &[("f", "g")]),
        );
    let res = check(&unit, &CheckOptions::default());
    assert_eq!(verdict(&res, "a"), conditional("a", &["f"]));
    assert_eq!(verdict(&res, "b"), conditional("b", &["g"]));
}

// ═══════════════════════════════════════════════════════════════════
// Method receiver rule
// ═══════════════════════════════════════════════════════════════════

#[test]
fn pure_method_reading_receiver_directly_is_rejected() {
    let unit = CompilationUnit::new().declare(
        DeclarationRecord::method("area", "Shape")
            .pure()
            .receiver_access(ReceiverAccess::Implicit),
    );
    let res = check(&unit, &CheckOptions::default());
    assert_eq!(verdict(&res, "area"), PurityVerdict::Impure);
    let rules: Vec<Rule> = res.diagnostics.iter().map(|d| d.rule).collect();
    assert!(rules.contains(&Rule::ImplicitReceiverAccess), "{:?}", rules);
    assert!(rules.contains(&Rule::ImpureDeclaration), "{:?}", rules);
}

#[test]
fn pure_method_with_explicit_receiver_parameter_is_pure() {
    let unit = CompilationUnit::new().declare(
        DeclarationRecord::method("area", "Shape")
            .pure()
            .param(Parameter::value("shape"))
            .receiver_access(ReceiverAccess::Alias {
                param: "shape".into(),
            }),
    );
    let res = check(&unit, &CheckOptions::default());
    assert_eq!(verdict(&res, "area"), PurityVerdict::Pure);
    assert!(res.diagnostics.is_empty(), "{:?}", res.diagnostics);
}

// ═══════════════════════════════════════════════════════════════════
// Scheduling
// ═══════════════════════════════════════════════════════════════════

fn wide_unit(n: usize) -> CompilationUnit {
    let mut unit = CompilationUnit::new().primitive("print");
    for i in 0..n {
        let mut decl = DeclarationRecord::function(format!("d{}", i));
        if i > 0 {
            decl = decl.call(format!("d{}:parent", i), format!("d{}", i / 2));
        }
        if i % 7 == 6 {
            decl = decl.call(format!("d{}:print", i), "print");
        }
        if i % 10 == 3 && i + 1 < n {
            decl = decl.call(format!("d{}:next", i), format!("d{}", i + 1));
        }
        if i % 10 == 4 {
            decl = decl.call(format!("d{}:prev", i), format!("d{}", i - 1));
        }
        unit = unit.declare(decl);
    }
    unit
}

#[test]
fn result_does_not_depend_on_worker_count() {
    let graph = Graph::build_partial(&wide_unit(300));
    let sequential = resolve_detailed(&graph, &CheckOptions::default());
    for jobs in [0, 2, 4, 16] {
        let parallel = resolve_detailed(&graph, &CheckOptions::default().with_jobs(jobs));
        assert_eq!(sequential, parallel, "jobs = {}", jobs);
    }
    assert!(sequential
        .verdicts
        .values()
        .any(|v| *v == PurityVerdict::Unresolvable));
}
