//! Rendering of a checker run: verdict table, diagnostics, summary, and the
//! machine-readable JSON report.

use crate::colors::Palette;
use crate::error::CliError;
use purity_checker::checker::graph::NodeStatus;
use purity_checker::{
    CallSiteVerdict, CompilationUnit, Diagnostic, Graph, PurityVerdict, Resolution, VerdictMap,
};
use serde::Serialize;

/// Verdict and finding counts of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub declarations: usize,
    pub pure: usize,
    pub impure: usize,
    pub conditionally_pure: usize,
    pub unresolvable: usize,
    pub errors: usize,
    pub warnings: usize,
}

impl Summary {
    pub fn of(res: &Resolution) -> Self {
        let mut summary = Summary {
            declarations: res.verdicts.len(),
            errors: res.error_count(),
            warnings: res.warning_count(),
            ..Summary::default()
        };
        for verdict in res.verdicts.values() {
            match verdict {
                PurityVerdict::Pure => summary.pure += 1,
                PurityVerdict::Impure => summary.impure += 1,
                PurityVerdict::ConditionallyPure(_) => summary.conditionally_pure += 1,
                PurityVerdict::Unresolvable => summary.unresolvable += 1,
            }
        }
        summary
    }
}

#[derive(Serialize)]
struct JsonReport<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    unit: Option<&'a str>,
    summary: Summary,
    verdicts: &'a VerdictMap,
    call_sites: &'a [CallSiteVerdict],
    diagnostics: &'a [Diagnostic],
}

/// Serialize the whole resolution as pretty-printed JSON.
pub fn render_json(unit: &CompilationUnit, res: &Resolution) -> Result<String, CliError> {
    let report = JsonReport {
        unit: unit.name.as_deref(),
        summary: Summary::of(res),
        verdicts: &res.verdicts,
        call_sites: &res.call_sites,
        diagnostics: &res.diagnostics,
    };
    Ok(serde_json::to_string_pretty(&report)?)
}

fn paint_verdict(palette: &Palette, verdict: &PurityVerdict) -> String {
    let text = verdict.to_string();
    match verdict {
        PurityVerdict::Pure => palette.green(&text),
        PurityVerdict::Impure => palette.red(&text),
        PurityVerdict::ConditionallyPure(_) => palette.yellow(&text),
        PurityVerdict::Unresolvable => palette.gray(&text),
    }
}

/// Human-readable report. Verdicts are listed in declaration order,
/// followed by every diagnostic and a one-line summary.
pub fn render_text(unit: &CompilationUnit, res: &Resolution, palette: &Palette) -> String {
    let mut out = String::new();

    let ids: Vec<&str> = unit.declarations.iter().map(|d| d.id.as_str()).collect();
    let width = ids.iter().map(|id| id.len()).max().unwrap_or(0);
    let mut listed = std::collections::HashSet::new();
    for id in ids {
        // Duplicate records share one verdict.
        if !listed.insert(id) {
            continue;
        }
        if let Some(verdict) = res.verdict(id) {
            out.push_str(&format!(
                "  {:<width$}  {}\n",
                id,
                paint_verdict(palette, verdict),
                width = width
            ));
        }
    }

    for diag in &res.diagnostics {
        out.push('\n');
        if palette.enabled {
            out.push_str(&diag.render_ansi());
        } else {
            out.push_str(&diag.render_plain());
        }
    }

    let s = Summary::of(res);
    out.push('\n');
    out.push_str(&format!(
        "{} {} declaration(s): {} pure, {} impure, {} conditionally pure, {} unresolvable\n",
        palette.bold("checked"),
        s.declarations,
        s.pure,
        s.impure,
        s.conditionally_pure,
        s.unresolvable
    ));
    if s.errors == 0 && s.warnings == 0 {
        out.push_str(&format!("{} {}\n", palette.green("✓"), palette.gray("no problems found")));
    } else {
        out.push_str(&format!(
            "{} {} error(s), {} warning(s)\n",
            if s.errors > 0 {
                palette.red("✗")
            } else {
                palette.yellow("!")
            },
            s.errors,
            s.warnings
        ));
    }
    out
}

/// Resolution partitions in scheduling order, one per line.
pub fn render_graph(graph: &Graph, palette: &Palette) -> String {
    let mut out = String::new();
    for (index, component) in graph.components().iter().enumerate() {
        let members: Vec<String> = component
            .members
            .iter()
            .map(|&n| {
                let node = graph.node(n);
                let tag = match node.status {
                    NodeStatus::Ok => return node.id().to_string(),
                    NodeStatus::Quarantined => "[malformed]",
                    NodeStatus::Unresolved => "[unresolved]",
                };
                format!("{} {}", node.id(), palette.gray(tag))
            })
            .collect();
        out.push_str(&format!("{:>4}  ", format!("#{}", index)));
        if component.cyclic {
            out.push_str(&palette.yellow("cycle "));
        }
        out.push_str(&members.join(", "));
        if !component.deps.is_empty() {
            let deps: Vec<String> = component.deps.iter().map(|d| format!("#{}", d)).collect();
            out.push_str(&palette.gray(&format!("  <- {}", deps.join(", "))));
        }
        out.push('\n');
    }
    out.push_str(&format!(
        "{} declaration(s) in {} partition(s)\n",
        graph.len(),
        graph.components().len()
    ));
    out
}

/// Exit status of a `check` run: `1` when any error was reported, or any
/// warning under `deny_warnings`.
pub fn exit_status(res: &Resolution, deny_warnings: bool) -> i32 {
    if res.has_errors() || (deny_warnings && res.warning_count() > 0) {
        1
    } else {
        0
    }
}
