//! Purity resolver — computes a verdict for every declaration of a graph.
//!
//! Components are resolved callees-first. Within a component:
//!
//! - an acyclic declaration is evaluated once against its dependencies'
//!   published verdicts;
//! - a self-recursive declaration iterates from `Pure` until its verdict
//!   stops changing;
//! - a mutually recursive group assumes every member `Pure` and iterates to
//!   a fixed point. If any member ends impure the assumption was
//!   contradicted, and every member becomes `Unresolvable` with a single
//!   cycle error naming all of them.
//!
//! Every call edge also gets its own effective verdict, so a conditionally
//! pure callee is judged per call site against the arguments bound there.
//!
//! Under [`Strictness::Strict`] a conditionally pure closure that is captured
//! or passed as a value counts as impure while resolving, since no call in
//! the unit discharges its obligations.

use crate::checker::error_codes::{Rule, Severity};
use crate::checker::graph::{
    ArgBinding, ArgValue, Component, EdgeKind, Graph, Node, NodeId, Target,
};
use crate::checker::lattice::{
    instantiate, ArgumentEffect, EffectSummary, ImpurityCause, ParamRef, PurityVerdict,
};
use crate::checker::model::{DeclId, SiteId};
use crate::checker::scheduler::{self, CancellationToken};
use crate::diagnostics::{sort_diagnostics, Diagnostic};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use thiserror::Error;
use tracing::{debug, info, trace};

// ── Options ─────────────────────────────────────────────────────────

/// What happens to conditional verdicts still open at the end of a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Strictness {
    /// Leave them conditionally pure for callers outside the unit.
    #[default]
    Lenient,
    /// Treat them as impure.
    Strict,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckOptions {
    pub strictness: Strictness,
    /// Worker threads for partition scheduling. `0` means one per CPU.
    pub jobs: usize,
}

impl Default for CheckOptions {
    fn default() -> Self {
        CheckOptions {
            strictness: Strictness::Lenient,
            jobs: 1,
        }
    }
}

impl CheckOptions {
    pub fn strict() -> Self {
        CheckOptions {
            strictness: Strictness::Strict,
            ..Self::default()
        }
    }

    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs;
        self
    }

    pub fn worker_count(&self) -> usize {
        if self.jobs == 0 {
            num_cpus::get()
        } else {
            self.jobs
        }
    }
}

// ── Results ─────────────────────────────────────────────────────────

pub type VerdictMap = BTreeMap<DeclId, PurityVerdict>;

/// The effective verdict of one call edge given the arguments bound there.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallSiteVerdict {
    pub caller: DeclId,
    pub site: SiteId,
    /// `None` for calls of parameters and externals.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callee: Option<DeclId>,
    pub verdict: PurityVerdict,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Resolution {
    pub verdicts: VerdictMap,
    pub call_sites: Vec<CallSiteVerdict>,
    pub diagnostics: Vec<Diagnostic>,
}

impl Resolution {
    pub fn verdict(&self, id: &str) -> Option<&PurityVerdict> {
        self.verdicts.get(&DeclId::new(id))
    }

    pub fn call_site(&self, caller: &str, site: &str) -> Option<&CallSiteVerdict> {
        self.call_sites
            .iter()
            .find(|c| c.caller.as_str() == caller && c.site.as_str() == site)
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(Diagnostic::is_error)
    }

    pub fn error_count(&self) -> usize {
        self.diagnostics.iter().filter(|d| d.is_error()).count()
    }

    pub fn warning_count(&self) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Warning)
            .count()
    }

    pub fn into_parts(self) -> (VerdictMap, Vec<Diagnostic>) {
        (self.verdicts, self.diagnostics)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("resolution cancelled after {resolved} of {total} partitions")]
    Cancelled { resolved: usize, total: usize },
}

// ── Entry points ────────────────────────────────────────────────────

/// Resolve every declaration of `graph`.
pub fn resolve(graph: &Graph, options: &CheckOptions) -> (VerdictMap, Vec<Diagnostic>) {
    resolve_detailed(graph, options).into_parts()
}

/// Like [`resolve`], also returning the per-call-site verdicts.
pub fn resolve_detailed(graph: &Graph, options: &CheckOptions) -> Resolution {
    let partitions = scheduler::run(
        graph,
        options.strictness,
        options.worker_count(),
        &CancellationToken::new(),
    );
    assemble(graph, options, partitions)
}

/// Resolve with a cooperative cancellation checkpoint between partitions.
pub fn resolve_with_cancel(
    graph: &Graph,
    options: &CheckOptions,
    cancel: &CancellationToken,
) -> Result<Resolution, ResolveError> {
    let partitions = scheduler::run(graph, options.strictness, options.worker_count(), cancel);
    let resolved = partitions.iter().filter(|p| p.is_some()).count();
    if resolved < partitions.len() {
        return Err(ResolveError::Cancelled {
            resolved,
            total: partitions.len(),
        });
    }
    Ok(assemble(graph, options, partitions))
}

fn assemble(
    graph: &Graph,
    options: &CheckOptions,
    partitions: Vec<Option<PartitionResult>>,
) -> Resolution {
    let mut verdicts = VerdictMap::new();
    let mut call_sites = Vec::new();
    let mut diagnostics = graph.diagnostics().to_vec();

    for partition in partitions.into_iter().flatten() {
        for (node, verdict) in partition.verdicts {
            verdicts.insert(graph.node(node).id().clone(), verdict);
        }
        call_sites.extend(partition.call_sites);
        diagnostics.extend(partition.diagnostics);
    }
    for node in graph.nodes() {
        verdicts
            .entry(node.id().clone())
            .or_insert(PurityVerdict::Unresolvable);
    }

    if options.strictness == Strictness::Strict {
        close_obligations(&mut verdicts, &mut call_sites, &mut diagnostics, graph);
    }

    sort_diagnostics(&mut diagnostics, |id| graph.position(id));
    call_sites.sort_by(|a, b| {
        graph
            .position(&a.caller)
            .cmp(&graph.position(&b.caller))
            .then_with(|| a.site.cmp(&b.site))
    });

    let count = |f: fn(&PurityVerdict) -> bool| verdicts.values().filter(|v| f(v)).count();
    info!(
        declarations = verdicts.len(),
        pure = count(PurityVerdict::is_pure),
        impure = count(PurityVerdict::is_impure),
        conditional = count(PurityVerdict::is_conditional),
        unresolvable = count(|v| matches!(v, PurityVerdict::Unresolvable)),
        diagnostics = diagnostics.len(),
        "resolution finished"
    );

    Resolution {
        verdicts,
        call_sites,
        diagnostics,
    }
}

/// Strict mode: no obligation survives the end of the unit. Captures and
/// arguments were already settled during resolution; what is left are the
/// declarations' own verdicts and the call sites forwarding them.
fn close_obligations(
    verdicts: &mut VerdictMap,
    call_sites: &mut [CallSiteVerdict],
    diagnostics: &mut Vec<Diagnostic>,
    graph: &Graph,
) {
    for (id, verdict) in verdicts.iter_mut() {
        if let PurityVerdict::ConditionallyPure(_) = verdict {
            let span = graph
                .lookup(id)
                .and_then(|n| graph.node(n).decl.span.as_ref());
            diagnostics.push(
                Diagnostic::new(
                    Rule::UnresolvedObligation,
                    id,
                    format!(
                        "'{}' is {} at the end of the unit; treated as impure",
                        id, verdict
                    ),
                )
                .with_span(span),
            );
            *verdict = PurityVerdict::Impure;
        }
    }
    for site in call_sites.iter_mut().filter(|c| c.verdict.is_conditional()) {
        site.verdict = PurityVerdict::Impure;
    }
}

// ── Partitions ──────────────────────────────────────────────────────

/// Everything resolving one component produces. Committed as a whole.
#[derive(Debug, Default)]
pub(crate) struct PartitionResult {
    pub(crate) verdicts: Vec<(NodeId, PurityVerdict)>,
    pub(crate) call_sites: Vec<CallSiteVerdict>,
    pub(crate) diagnostics: Vec<Diagnostic>,
}

/// Resolve component `index`. `published` must answer for every component
/// the partition depends on.
pub(crate) fn resolve_partition(
    graph: &Graph,
    index: usize,
    strictness: Strictness,
    published: &dyn Fn(NodeId) -> PurityVerdict,
) -> PartitionResult {
    let component = &graph.components()[index];

    let evals = if component.cyclic {
        match fixed_point(graph, component, strictness, published) {
            Ok(evals) => evals,
            Err(evals) => return inconsistent_cycle(graph, component, evals),
        }
    } else {
        let node = component.members[0];
        vec![(node, evaluate(graph, node, strictness, published))]
    };

    let mut result = PartitionResult::default();
    for (node, eval) in evals {
        if let Some(diag) = mismatch(graph.node(node), &eval) {
            result.diagnostics.push(diag);
        }
        result.diagnostics.extend(eval.diagnostics);
        result.call_sites.extend(eval.call_sites);
        result.verdicts.push((node, eval.verdict));
    }

    debug!(
        partition = index,
        members = component.members.len(),
        cyclic = component.cyclic,
        "resolved partition"
    );
    result
}

/// Upper bound on fixed-point rounds. Each round that changes anything moves
/// at least one member up the lattice, and a member can only move through
/// `Pure`, a growing obligation set over its own callable parameters, and
/// `Impure`.
fn iteration_limit(graph: &Graph, component: &Component) -> usize {
    let callables: usize = component
        .members
        .iter()
        .map(|&m| graph.node(m).decl.callable_params().count())
        .sum();
    callables + 2 * component.members.len() + 2
}

type Evaluations = Vec<(NodeId, NodeEval)>;

fn fixed_point(
    graph: &Graph,
    component: &Component,
    strictness: Strictness,
    published: &dyn Fn(NodeId) -> PurityVerdict,
) -> Result<Evaluations, Evaluations> {
    let mut assumed: HashMap<NodeId, PurityVerdict> = component
        .members
        .iter()
        .map(|&m| (m, PurityVerdict::Pure))
        .collect();
    let limit = iteration_limit(graph, component);
    let mut evals = Vec::new();

    for round in 1..=limit {
        evals = {
            let lookup = |n: NodeId| assumed.get(&n).cloned().unwrap_or_else(|| published(n));
            component
                .members
                .iter()
                .map(|&m| (m, evaluate(graph, m, strictness, &lookup)))
                .collect::<Evaluations>()
        };

        let stable = evals
            .iter()
            .all(|(m, e)| assumed.get(m) == Some(&e.verdict));
        if stable {
            trace!(rounds = round, members = component.members.len(), "cycle stabilised");
            let contradicted = component.is_mutual_recursion()
                && evals.iter().any(|(_, e)| {
                    matches!(e.verdict, PurityVerdict::Impure | PurityVerdict::Unresolvable)
                });
            return if contradicted { Err(evals) } else { Ok(evals) };
        }

        for (m, e) in &evals {
            assumed.insert(*m, e.verdict.clone());
        }
    }

    debug!(limit, "cycle did not stabilise");
    Err(evals)
}

fn inconsistent_cycle(graph: &Graph, component: &Component, evals: Evaluations) -> PartitionResult {
    let members: Vec<DeclId> = component
        .members
        .iter()
        .map(|&m| graph.node(m).id().clone())
        .collect();
    let first = graph.node(component.members[0]);

    let mut diag = Diagnostic::new(
        Rule::InconsistentCycle,
        first.id(),
        format!(
            "recursive declarations {} cannot be proven pure",
            members
                .iter()
                .map(|id| format!("'{}'", id))
                .collect::<Vec<_>>()
                .join(", ")
        ),
    )
    .with_span(first.decl.span.as_ref())
    .with_related(members);
    for (m, eval) in &evals {
        for cause in &eval.causes {
            diag = diag.with_note(format!("'{}' {}", graph.node(*m).id(), cause));
        }
    }

    let mut result = PartitionResult {
        diagnostics: vec![diag],
        ..PartitionResult::default()
    };
    for (m, eval) in evals {
        for mut site in eval.call_sites {
            let in_cycle = site
                .callee
                .as_ref()
                .and_then(|c| graph.lookup(c))
                .is_some_and(|c| component.members.contains(&c));
            if in_cycle {
                site.verdict = PurityVerdict::Unresolvable;
            }
            result.call_sites.push(site);
        }
        result.verdicts.push((m, PurityVerdict::Unresolvable));
    }

    debug!(members = component.members.len(), "inconsistent cycle");
    result
}

fn mismatch(node: &Node, eval: &NodeEval) -> Option<Diagnostic> {
    let decl = &node.decl;
    if !decl.intent.is_asserted() || !eval.verdict.is_impure() {
        return None;
    }
    let mut diag = Diagnostic::new(
        Rule::ImpureDeclaration,
        &decl.id,
        format!("'{}' is annotated {} but is impure", decl.id, decl.intent),
    )
    .with_span(decl.span.as_ref());
    if let Some(site) = eval.causes.iter().find_map(ImpurityCause::site) {
        diag = diag.at_site(site);
    }
    for cause in &eval.causes {
        diag = diag.with_note(cause.to_string());
    }
    Some(diag)
}

// ── Per-declaration evaluation ──────────────────────────────────────

#[derive(Debug)]
struct NodeEval {
    verdict: PurityVerdict,
    causes: Vec<ImpurityCause>,
    call_sites: Vec<CallSiteVerdict>,
    diagnostics: Vec<Diagnostic>,
}

fn evaluate(
    graph: &Graph,
    n: NodeId,
    strictness: Strictness,
    lookup: &dyn Fn(NodeId) -> PurityVerdict,
) -> NodeEval {
    let node = graph.node(n);
    if node.is_blocked() {
        return NodeEval {
            verdict: PurityVerdict::Unresolvable,
            causes: Vec::new(),
            call_sites: Vec::new(),
            diagnostics: Vec::new(),
        };
    }

    let mut eval = Evaluation {
        graph,
        node,
        strictness,
        lookup,
        summary: EffectSummary::pure(),
        call_sites: Vec::new(),
        diagnostics: Vec::new(),
    };
    for edge in &node.edges {
        match (edge.kind, &edge.target, &edge.site) {
            (EdgeKind::Receiver, _, _) => {
                eval.summary
                    .join(EffectSummary::impure(ImpurityCause::ReceiverAccess));
            }
            (EdgeKind::Capture, Target::MutableState(binding), _) => {
                eval.summary
                    .join(EffectSummary::impure(ImpurityCause::MutableCapture {
                        binding: binding.clone(),
                    }));
            }
            (EdgeKind::Capture, Target::Decl(target), _) => eval.capture(*target),
            (EdgeKind::Call, target, Some(site)) => eval.call(site, target, &edge.args),
            // Captures never classify to parameters or primitives, and every
            // call edge carries its site.
            _ => {}
        }
    }

    let verdict = eval.summary.to_verdict();
    trace!(decl = %node.id(), %verdict, "evaluated declaration");
    NodeEval {
        verdict,
        causes: eval.summary.into_causes(),
        call_sites: eval.call_sites,
        diagnostics: eval.diagnostics,
    }
}

struct Evaluation<'a> {
    graph: &'a Graph,
    node: &'a Node,
    strictness: Strictness,
    lookup: &'a dyn Fn(NodeId) -> PurityVerdict,
    summary: EffectSummary,
    call_sites: Vec<CallSiteVerdict>,
    diagnostics: Vec<Diagnostic>,
}

impl<'a> Evaluation<'a> {
    fn id(&self) -> &'a DeclId {
        self.node.id()
    }

    fn capture(&mut self, target: NodeId) {
        let graph = self.graph;
        let binding = graph.node(target).id().clone();
        match (self.lookup)(target) {
            PurityVerdict::Pure => {}
            PurityVerdict::ConditionallyPure(_) if self.strictness == Strictness::Strict => self
                .summary
                .join(EffectSummary::impure(ImpurityCause::OpenCapture { binding })),
            PurityVerdict::ConditionallyPure(_) => {}
            PurityVerdict::Impure => self
                .summary
                .join(EffectSummary::impure(ImpurityCause::ImpureCapture { binding })),
            PurityVerdict::Unresolvable => {
                self.diagnostics.push(
                    Diagnostic::new(
                        Rule::UnresolvableDependency,
                        self.id(),
                        format!(
                            "'{}' captures '{}', whose purity could not be resolved",
                            self.id(),
                            binding
                        ),
                    )
                    .with_span(self.node.decl.span.as_ref()),
                );
                self.summary
                    .join(EffectSummary::impure(ImpurityCause::ImpureCapture { binding }));
            }
        }
    }

    fn call(&mut self, site: &SiteId, target: &Target, args: &[ArgBinding]) {
        let node = self.node;
        match target {
            Target::External(symbol) => {
                self.summary
                    .join(EffectSummary::impure(ImpurityCause::ExternalCall {
                        site: site.clone(),
                        symbol: symbol.clone(),
                    }));
                self.record_site(site, None, PurityVerdict::Impure);
            }
            Target::Param(index) => {
                let param = &node.decl.params[*index];
                let verdict = if param.requires_pure {
                    PurityVerdict::Pure
                } else {
                    let obligation = ParamRef::new(self.id(), &param.name);
                    self.summary.join(EffectSummary::obligation(obligation));
                    PurityVerdict::conditionally_pure(self.id(), [param.name.as_str()])
                };
                self.record_site(site, None, verdict);
            }
            Target::Decl(callee) => self.call_declaration(site, *callee, args),
            Target::MutableState(state) => {
                self.summary
                    .join(EffectSummary::impure(ImpurityCause::MutableCapture {
                        binding: state.clone(),
                    }));
                self.record_site(site, None, PurityVerdict::Impure);
            }
        }
    }

    fn argument_effect(&self, arg: &ArgBinding) -> ArgumentEffect {
        match &arg.value {
            // Strict mode: a conditionally pure value never gets its
            // obligations discharged by the callee that receives it.
            ArgValue::Decl(n) => match (self.lookup)(*n) {
                PurityVerdict::ConditionallyPure(_) if self.strictness == Strictness::Strict => {
                    ArgumentEffect::Impure
                }
                verdict => ArgumentEffect::of_verdict(&verdict),
            },
            ArgValue::Param(index) => {
                let param = &self.node.decl.params[*index];
                if param.requires_pure {
                    ArgumentEffect::Pure
                } else {
                    ArgumentEffect::Obligation(ParamRef::new(self.id(), &param.name))
                }
            }
            ArgValue::External(_) => ArgumentEffect::Impure,
        }
    }

    fn call_declaration(&mut self, site: &SiteId, callee: NodeId, args: &[ArgBinding]) {
        let graph = self.graph;
        let callee_node = graph.node(callee);
        let callee_id = callee_node.id().clone();
        let callee_verdict = (self.lookup)(callee);
        let bound = |param: &str| args.iter().find(|a| a.param == param);

        let required: BTreeSet<&str> = callee_node
            .decl
            .callable_params()
            .filter(|p| p.requires_pure)
            .map(|p| p.name.as_str())
            .collect();
        let composition = instantiate(&callee_verdict, required.iter().copied(), |param| {
            bound(param).map(|a| self.argument_effect(a))
        });

        // Arguments the composition consulted get call-site diagnostics.
        let mut consulted = required.clone();
        if let Some(obligations) = callee_verdict.obligations() {
            consulted.extend(obligations.iter().map(|p| p.name.as_str()));
        }
        for arg in args.iter().filter(|a| consulted.contains(a.param.as_str())) {
            self.check_argument(site, &callee_id, arg, required.contains(arg.param.as_str()));
        }

        let mut contribution = EffectSummary::pure();
        if composition.callee_impure {
            let cause = if callee_verdict == PurityVerdict::Unresolvable {
                self.diagnostics.push(
                    Diagnostic::new(
                        Rule::UnresolvableDependency,
                        self.id(),
                        format!(
                            "call to '{}', whose purity could not be resolved, is treated as impure",
                            callee_id
                        ),
                    )
                    .at_site(site)
                    .with_span(self.node.decl.span.as_ref()),
                );
                ImpurityCause::UnresolvableCallee {
                    site: site.clone(),
                    callee: callee_id.clone(),
                }
            } else {
                ImpurityCause::ImpureCallee {
                    site: site.clone(),
                    callee: callee_id.clone(),
                }
            };
            contribution.join(EffectSummary::impure(cause));
        }
        for param in &composition.impure_params {
            let value = bound(param).map_or_else(|| "<unbound>".to_string(), |a| a.source.clone());
            contribution.join(EffectSummary::impure(ImpurityCause::ImpureArgument {
                site: site.clone(),
                callee: callee_id.clone(),
                param: param.clone(),
                value,
            }));
        }
        for obligation in &composition.obligations {
            contribution.join(EffectSummary::obligation(obligation.clone()));
        }
        self.summary.join(contribution);

        let verdict = if callee_verdict == PurityVerdict::Unresolvable {
            PurityVerdict::Unresolvable
        } else {
            composition.to_verdict()
        };
        self.record_site(site, Some(callee_id), verdict);
    }

    fn check_argument(&mut self, site: &SiteId, callee: &DeclId, arg: &ArgBinding, required: bool) {
        if let ArgValue::Decl(n) = arg.value {
            if (self.lookup)(n) == PurityVerdict::Unresolvable {
                self.diagnostics.push(
                    Diagnostic::new(
                        Rule::UnresolvableDependency,
                        self.id(),
                        format!(
                            "argument '{}' passed as '{}' to '{}' could not be resolved; treated as impure",
                            arg.source, arg.param, callee
                        ),
                    )
                    .at_site(site)
                    .with_span(self.node.decl.span.as_ref()),
                );
                return;
            }
        }
        if self.argument_effect(arg) != ArgumentEffect::Impure {
            return;
        }
        let diag = if required {
            Diagnostic::new(
                Rule::ImpureArgument,
                self.id(),
                format!(
                    "impure '{}' passed for parameter '{}' of '{}', which requires a pure argument",
                    arg.source, arg.param, callee
                ),
            )
        } else {
            Diagnostic::new(
                Rule::DegradedCallSite,
                self.id(),
                format!(
                    "call to conditionally pure '{}' is impure: '{}' passed for parameter '{}' is impure",
                    callee, arg.source, arg.param
                ),
            )
        };
        self.diagnostics
            .push(diag.at_site(site).with_span(self.node.decl.span.as_ref()));
    }

    fn record_site(&mut self, site: &SiteId, callee: Option<DeclId>, verdict: PurityVerdict) {
        self.call_sites.push(CallSiteVerdict {
            caller: self.id().clone(),
            site: site.clone(),
            callee,
            verdict,
        });
    }
}
