//! Call graph builder — classifies every edge a declaration exposes.
//!
//! Every call target, capture, and callable argument is resolved to one of:
//!
//! - another declaration of the unit (a graph edge),
//! - a callable parameter of the declaration itself,
//! - an external primitive (terminal `Impure` sink),
//! - external mutable state (a captured global, or a method's implicit
//!   receiver).
//!
//! Anything else is an unresolved reference. Unresolved references are hard
//! errors: the declaration that contains one is marked
//! [`NodeStatus::Unresolved`] and resolves to `Unresolvable`, it is never
//! silently defaulted to impure.
//!
//! The builder also performs the local structural checks on annotated
//! declarations and computes the strongly-connected components the resolver
//! walks.

use crate::checker::model::{
    CallRecord, CompilationUnit, DeclId, DeclKind, DeclarationModel, DeclarationRecord,
    MalformedDeclaration, PurityIntent, ReceiverAccess, SiteId, Span,
};
use crate::checker::error_codes::Rule;
use crate::checker::scc::tarjan_scc;
use crate::diagnostics::{suggest_similar, Diagnostic};
use serde::Serialize;
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, trace};

pub type NodeId = usize;

/// Name of the implicit receiver binding of a method.
pub const RECEIVER_BINDING: &str = "self";

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("{} malformed declaration(s): {}", .0.len(), join_malformed(.0))]
    Malformed(Vec<MalformedDeclaration>),
}

fn join_malformed(errors: &[MalformedDeclaration]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

// ── Graph types ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    Call,
    Capture,
    /// The always-present capture of `self` by a method that reaches its
    /// receiver implicitly.
    Receiver,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "target", content = "ref", rename_all = "snake_case")]
pub enum Target {
    Decl(NodeId),
    /// Index into the source declaration's parameter list.
    Param(usize),
    External(String),
    MutableState(String),
}

/// What was passed for a callable parameter of the callee.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "value", content = "ref", rename_all = "snake_case")]
pub enum ArgValue {
    Decl(NodeId),
    /// One of the caller's own callable parameters, forwarded.
    Param(usize),
    External(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArgBinding {
    /// Callee parameter the argument is bound to.
    pub param: String,
    pub value: ArgValue,
    /// The symbol as written by the front end.
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Edge {
    pub kind: EdgeKind,
    pub site: Option<SiteId>,
    pub target: Target,
    pub args: Vec<ArgBinding>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span: Option<Span>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Ok,
    /// The declaration record is malformed; it is kept only so references
    /// to it still classify.
    Quarantined,
    /// At least one edge could not be classified.
    Unresolved,
}

#[derive(Debug, Clone)]
pub struct Node {
    pub decl: DeclarationRecord,
    pub edges: Vec<Edge>,
    pub status: NodeStatus,
}

impl Node {
    pub fn id(&self) -> &DeclId {
        &self.decl.id
    }

    /// Blocked declarations resolve to `Unresolvable` without traversal.
    pub fn is_blocked(&self) -> bool {
        self.status != NodeStatus::Ok
    }
}

/// A strongly-connected component of the call graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Component {
    pub members: Vec<NodeId>,
    /// Mutual recursion, or a single self-recursive declaration.
    pub cyclic: bool,
    /// Components this one depends on. Always smaller indices.
    pub deps: Vec<usize>,
}

impl Component {
    pub fn is_mutual_recursion(&self) -> bool {
        self.members.len() > 1
    }
}

/// The materialised call/capture graph of one compilation unit.
#[derive(Debug, Clone)]
pub struct Graph {
    nodes: Vec<Node>,
    index: HashMap<DeclId, NodeId>,
    components: Vec<Component>,
    component_of: Vec<usize>,
    diagnostics: Vec<Diagnostic>,
    malformed: Vec<MalformedDeclaration>,
}

impl Graph {
    /// Build the graph, rejecting the unit if any declaration is malformed.
    pub fn build(unit: &CompilationUnit) -> Result<Graph, BuildError> {
        let graph = Self::build_partial(unit);
        if graph.malformed.is_empty() {
            Ok(graph)
        } else {
            Err(BuildError::Malformed(graph.malformed))
        }
    }

    /// Build the graph, quarantining malformed declarations instead of
    /// rejecting the unit. Their defects are reported as diagnostics.
    pub fn build_partial(unit: &CompilationUnit) -> Graph {
        let (model, malformed) = DeclarationModel::from_unit(unit);
        let mut builder = GraphBuilder {
            model: &model,
            diagnostics: malformed
                .iter()
                .map(|e| {
                    Diagnostic::from_malformed(
                        e,
                        model.get(e.decl()).and_then(|d| d.span.clone()),
                    )
                })
                .collect(),
        };

        let nodes: Vec<Node> = (0..model.len()).map(|pos| builder.build_node(pos)).collect();
        let diagnostics = builder.diagnostics;
        let index = nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.id().clone(), i))
            .collect();

        let successors: Vec<Vec<NodeId>> = nodes.iter().map(dependencies).collect();
        let (components, component_of) = condense(&successors);

        debug!(
            declarations = nodes.len(),
            components = components.len(),
            malformed = malformed.len(),
            "built call graph"
        );

        Graph {
            nodes,
            index,
            components,
            component_of,
            diagnostics,
            malformed,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    pub fn lookup(&self, id: &DeclId) -> Option<NodeId> {
        self.index.get(id).copied()
    }

    /// Declaration order of `id`; unknown ids sort last.
    pub fn position(&self, id: &DeclId) -> usize {
        self.lookup(id).unwrap_or(usize::MAX)
    }

    /// Components in dependency order: callees before callers.
    pub fn components(&self) -> &[Component] {
        &self.components
    }

    pub fn component_of(&self, node: NodeId) -> usize {
        self.component_of[node]
    }

    /// Malformed-declaration, structural, and unresolved-reference findings.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn malformed(&self) -> &[MalformedDeclaration] {
        &self.malformed
    }
}

/// Every declaration `node` needs a verdict for: call targets, captured
/// declarations, and declarations passed as arguments.
fn dependencies(node: &Node) -> Vec<NodeId> {
    let mut deps = Vec::new();
    for edge in &node.edges {
        if let Target::Decl(n) = edge.target {
            deps.push(n);
        }
        for arg in &edge.args {
            if let ArgValue::Decl(n) = arg.value {
                deps.push(n);
            }
        }
    }
    deps.sort_unstable();
    deps.dedup();
    deps
}

fn condense(successors: &[Vec<NodeId>]) -> (Vec<Component>, Vec<usize>) {
    let sccs = tarjan_scc(successors);
    let mut component_of = vec![0; successors.len()];
    for (ci, members) in sccs.iter().enumerate() {
        for &m in members {
            component_of[m] = ci;
        }
    }

    let components = sccs
        .into_iter()
        .enumerate()
        .map(|(ci, members)| {
            let cyclic = members.len() > 1 || successors[members[0]].contains(&members[0]);
            let mut deps: Vec<usize> = members
                .iter()
                .flat_map(|&m| successors[m].iter().map(|&s| component_of[s]))
                .filter(|&c| c != ci)
                .collect();
            deps.sort_unstable();
            deps.dedup();
            Component {
                members,
                cyclic,
                deps,
            }
        })
        .collect();

    (components, component_of)
}

// ── Builder ─────────────────────────────────────────────────────────

struct GraphBuilder<'a> {
    model: &'a DeclarationModel,
    diagnostics: Vec<Diagnostic>,
}

impl GraphBuilder<'_> {
    fn build_node(&mut self, pos: usize) -> Node {
        let model = self.model;
        let decl = model.at(pos);
        if model.is_malformed(pos) {
            return Node {
                decl: decl.clone(),
                edges: Vec::new(),
                status: NodeStatus::Quarantined,
            };
        }

        let mut edges = Vec::new();
        let mut unresolved = false;

        for call in &decl.calls {
            match self.classify_call(decl, call) {
                Ok(edge) => edges.push(edge),
                Err(errors) => {
                    unresolved = true;
                    self.diagnostics.extend(errors);
                }
            }
        }

        for capture in &decl.captures {
            let target = if let Some(n) = model.position(&capture.binding) {
                Target::Decl(n)
            } else if model.external(&capture.binding).is_some() {
                Target::MutableState(capture.binding.clone())
            } else {
                unresolved = true;
                let diag = Diagnostic::new(
                    Rule::UnresolvedCapture,
                    &decl.id,
                    format!(
                        "captured binding '{}' of '{}' is not a known declaration or external",
                        capture.binding, decl.id
                    ),
                )
                .with_span(capture.span.as_ref().or(decl.span.as_ref()))
                .with_suggestions(self.did_you_mean(decl, &capture.binding));
                self.diagnostics.push(diag);
                continue;
            };
            trace!(decl = %decl.id, binding = %capture.binding, ?target, "classified capture");
            edges.push(Edge {
                kind: EdgeKind::Capture,
                site: None,
                target,
                args: Vec::new(),
                span: capture.span.clone(),
            });
        }

        if decl.kind == DeclKind::Method {
            let aliased = matches!(
                decl.receiver.as_ref().and_then(|r| r.access.as_ref()),
                Some(ReceiverAccess::Alias { .. })
            );
            if !aliased {
                edges.push(Edge {
                    kind: EdgeKind::Receiver,
                    site: None,
                    target: Target::MutableState(RECEIVER_BINDING.to_string()),
                    args: Vec::new(),
                    span: None,
                });
            }
        }

        self.check_structure(decl, &edges);

        if unresolved {
            // An unresolved declaration is terminal; its edges would only
            // drag it into cycles it cannot take part in.
            edges.clear();
        }

        Node {
            decl: decl.clone(),
            edges,
            status: if unresolved {
                NodeStatus::Unresolved
            } else {
                NodeStatus::Ok
            },
        }
    }

    fn classify_call(
        &self,
        decl: &DeclarationRecord,
        call: &CallRecord,
    ) -> Result<Edge, Vec<Diagnostic>> {
        let span = call.span.as_ref().or(decl.span.as_ref());
        let target = if let Some((i, param)) = decl.find_param(&call.callee) {
            if !param.callable {
                return Err(vec![Diagnostic::new(
                    Rule::NonCallableInvoked,
                    &decl.id,
                    format!(
                        "'{}' calls parameter '{}', which is not callable",
                        decl.id, param.name
                    ),
                )
                .at_site(&call.site)
                .with_span(span)]);
            }
            Target::Param(i)
        } else if let Some(n) = self.model.position(&call.callee) {
            Target::Decl(n)
        } else if self.model.external(&call.callee).is_some() {
            Target::External(call.callee.clone())
        } else {
            return Err(vec![Diagnostic::new(
                Rule::UnresolvedCallee,
                &decl.id,
                format!(
                    "call to '{}' in '{}' does not resolve to a declaration, parameter, or external",
                    call.callee, decl.id
                ),
            )
            .at_site(&call.site)
            .with_span(span)
            .with_suggestions(self.did_you_mean(decl, &call.callee))]);
        };

        let mut errors = Vec::new();
        let mut args = Vec::new();
        let callee = match target {
            Target::Decl(n) => Some(self.model.at(n)),
            _ => None,
        };

        for arg in &call.args {
            let Some(value) = self.classify_value(decl, &arg.value) else {
                errors.push(
                    Diagnostic::new(
                        Rule::UnresolvedArgument,
                        &decl.id,
                        format!(
                            "argument '{}' passed for '{}' is not a callable declaration, parameter, or external",
                            arg.value, arg.param
                        ),
                    )
                    .at_site(&call.site)
                    .with_span(span)
                    .with_suggestions(self.did_you_mean(decl, &arg.value)),
                );
                continue;
            };
            if let Some(callee) = callee {
                let bound = callee.find_param(&arg.param).map(|(_, p)| p.callable);
                if bound != Some(true) {
                    errors.push(
                        Diagnostic::new(
                            Rule::UnknownArgumentParameter,
                            &decl.id,
                            format!(
                                "'{}' has no callable parameter '{}'",
                                callee.id, arg.param
                            ),
                        )
                        .at_site(&call.site)
                        .with_span(span),
                    );
                    continue;
                }
            }
            args.push(ArgBinding {
                param: arg.param.clone(),
                value,
                source: arg.value.clone(),
            });
        }

        if let Some(callee) = callee {
            for param in callee.callable_params() {
                if !call.args.iter().any(|a| a.param == param.name) {
                    errors.push(
                        Diagnostic::new(
                            Rule::UnboundCallableArgument,
                            &decl.id,
                            format!(
                                "call to '{}' does not bind its callable parameter '{}'",
                                callee.id, param.name
                            ),
                        )
                        .at_site(&call.site)
                        .with_span(span),
                    );
                }
            }
        }

        if !errors.is_empty() {
            return Err(errors);
        }

        trace!(decl = %decl.id, site = %call.site, ?target, "classified call");
        Ok(Edge {
            kind: EdgeKind::Call,
            site: Some(call.site.clone()),
            target,
            args,
            span: call.span.clone(),
        })
    }

    fn classify_value(&self, decl: &DeclarationRecord, name: &str) -> Option<ArgValue> {
        if let Some((i, param)) = decl.find_param(name) {
            return param.callable.then_some(ArgValue::Param(i));
        }
        if let Some(n) = self.model.position(name) {
            return Some(ArgValue::Decl(n));
        }
        self.model
            .external(name)
            .map(|_| ArgValue::External(name.to_string()))
    }

    /// Local rules for annotated declarations; no traversal needed.
    fn check_structure(&mut self, decl: &DeclarationRecord, edges: &[Edge]) {
        if !decl.intent.is_asserted() {
            return;
        }
        let annotation = decl.intent;
        let span = decl.span.as_ref();

        for param in decl.params.iter().filter(|p| p.inout) {
            self.diagnostics.push(
                Diagnostic::new(
                    Rule::MutableParameter,
                    &decl.id,
                    format!(
                        "{} {} '{}' takes by-reference mutable parameter '{}'",
                        annotation, decl.kind, decl.id, param.name
                    ),
                )
                .with_span(span),
            );
        }

        for edge in edges {
            match (edge.kind, &edge.target) {
                (EdgeKind::Capture, Target::MutableState(binding)) => self.diagnostics.push(
                    Diagnostic::new(
                        Rule::MutableCapture,
                        &decl.id,
                        format!(
                            "{} {} '{}' captures external mutable state '{}'",
                            annotation, decl.kind, decl.id, binding
                        ),
                    )
                    .with_span(edge.span.as_ref().or(span)),
                ),
                (EdgeKind::Receiver, _) => self.diagnostics.push(
                    Diagnostic::new(
                        Rule::ImplicitReceiverAccess,
                        &decl.id,
                        format!(
                            "{} method '{}' accesses its receiver without an explicit parameter",
                            annotation, decl.id
                        ),
                    )
                    .with_span(span)
                    .with_suggestions(vec![
                        "take the receiver as an explicit parameter and declare it as the receiver alias"
                            .to_string(),
                    ]),
                ),
                _ => {}
            }
        }

        if decl.intent == PurityIntent::Pure {
            for param in decl.callable_params().filter(|p| !p.requires_pure) {
                self.diagnostics.push(
                    Diagnostic::new(
                        Rule::UnrestrictedCallableParameter,
                        &decl.id,
                        format!(
                            "pure {} '{}' accepts callable '{}' without requiring it to be pure",
                            decl.kind, decl.id, param.name
                        ),
                    )
                    .with_span(span)
                    .with_suggestions(vec![format!(
                        "mark '{}' as requiring purity, or annotate '{}' as conditionally pure",
                        param.name, decl.id
                    )]),
                );
            }
        }
    }

    fn did_you_mean(&self, decl: &DeclarationRecord, name: &str) -> Vec<String> {
        let mut candidates = self.model.known_names();
        candidates.extend(decl.params.iter().map(|p| p.name.as_str()));
        suggest_similar(name, &candidates, 2)
            .into_iter()
            .map(|s| format!("did you mean '{}'?", s))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checker::model::Parameter;

    fn build(unit: CompilationUnit) -> Graph {
        Graph::build_partial(&unit)
    }

    fn rules(graph: &Graph) -> Vec<Rule> {
        graph.diagnostics().iter().map(|d| d.rule).collect()
    }

    #[test]
    fn classifies_each_kind_of_target() {
        let g = build(
            CompilationUnit::new()
                .primitive("print")
                .global("counter")
                .declare(DeclarationRecord::function("helper"))
                .declare(
                    DeclarationRecord::function("f")
                        .param(Parameter::callable("cb"))
                        .call("s0", "helper")
                        .call("s1", "cb")
                        .call("s2", "print")
                        .capture("counter"),
                ),
        );
        assert!(g.diagnostics().is_empty(), "{:?}", g.diagnostics());
        let f = g.node(g.lookup(&"f".into()).unwrap());
        let targets: Vec<&Target> = f.edges.iter().map(|e| &e.target).collect();
        assert_eq!(
            targets,
            vec![
                &Target::Decl(0),
                &Target::Param(0),
                &Target::External("print".into()),
                &Target::MutableState("counter".into()),
            ]
        );
    }

    #[test]
    fn unknown_callee_is_unresolved_not_impure() {
        let g = build(
            CompilationUnit::new()
                .declare(DeclarationRecord::function("helper"))
                .declare(DeclarationRecord::function("f").call("s0", "helpr")),
        );
        let f = g.node(1);
        assert_eq!(f.status, NodeStatus::Unresolved);
        assert!(f.edges.is_empty());
        let diag = &g.diagnostics()[0];
        assert_eq!(diag.rule, Rule::UnresolvedCallee);
        assert_eq!(diag.site.as_ref().map(SiteId::as_str), Some("s0"));
        assert_eq!(diag.suggestions, vec!["did you mean 'helper'?".to_string()]);
    }

    #[test]
    fn calling_a_value_parameter_is_unresolved() {
        let g = build(CompilationUnit::new().declare(
            DeclarationRecord::function("f")
                .param(Parameter::value("x"))
                .call("s0", "x"),
        ));
        assert_eq!(rules(&g), vec![Rule::NonCallableInvoked]);
    }

    #[test]
    fn callable_parameters_of_callee_must_be_bound() {
        let g = build(
            CompilationUnit::new()
                .declare(
                    DeclarationRecord::function("h")
                        .param(Parameter::callable("transform"))
                        .call("h0", "transform"),
                )
                .declare(DeclarationRecord::function("caller").call("c0", "h")),
        );
        assert_eq!(rules(&g), vec![Rule::UnboundCallableArgument]);
    }

    #[test]
    fn argument_bound_to_unknown_parameter() {
        let g = build(
            CompilationUnit::new()
                .declare(DeclarationRecord::function("id"))
                .declare(
                    DeclarationRecord::function("h")
                        .param(Parameter::callable("transform")),
                )
                .declare(DeclarationRecord::function("caller").call_with(
                    "c0",
                    "h",
                    &[("transform", "id"), ("other", "id")],
                )),
        );
        assert_eq!(rules(&g), vec![Rule::UnknownArgumentParameter]);
    }

    #[test]
    fn implicit_receiver_adds_capture_of_self() {
        let g = build(CompilationUnit::new().declare(
            DeclarationRecord::method("len", "List").receiver_access(ReceiverAccess::Implicit),
        ));
        let edges = &g.node(0).edges;
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].kind, EdgeKind::Receiver);
        assert_eq!(edges[0].target, Target::MutableState(RECEIVER_BINDING.into()));
    }

    #[test]
    fn aliased_receiver_adds_no_edge() {
        let g = build(CompilationUnit::new().declare(
            DeclarationRecord::method("len", "List")
                .pure()
                .param(Parameter::value("list"))
                .receiver_access(ReceiverAccess::Alias {
                    param: "list".into(),
                }),
        ));
        assert!(g.node(0).edges.is_empty());
        assert!(g.diagnostics().is_empty());
    }

    #[test]
    fn structural_rules_for_pure_declarations() {
        let g = build(
            CompilationUnit::new().global("state").declare(
                DeclarationRecord::function("f")
                    .pure()
                    .param(Parameter::inout("buf"))
                    .param(Parameter::callable("cb"))
                    .capture("state"),
            ),
        );
        let mut got = rules(&g);
        got.sort_by_key(|r| r.code());
        assert_eq!(
            got,
            vec![
                Rule::MutableParameter,
                Rule::MutableCapture,
                Rule::UnrestrictedCallableParameter
            ]
        );
    }

    #[test]
    fn conditionally_pure_may_take_unmarked_callables() {
        let g = build(CompilationUnit::new().declare(
            DeclarationRecord::function("h")
                .conditionally_pure()
                .param(Parameter::callable("transform"))
                .call("h0", "transform"),
        ));
        assert!(g.diagnostics().is_empty(), "{:?}", g.diagnostics());
    }

    #[test]
    fn malformed_declarations_are_quarantined() {
        let unit = CompilationUnit::new().declare(
            DeclarationRecord::closure("c")
                .param(Parameter::value("x"))
                .capture("x"),
        );
        let g = Graph::build_partial(&unit);
        assert_eq!(g.node(0).status, NodeStatus::Quarantined);
        assert_eq!(rules(&g), vec![Rule::CaptureShadowsParameter]);
        assert!(matches!(Graph::build(&unit), Err(BuildError::Malformed(e)) if e.len() == 1));
    }

    #[test]
    fn components_follow_dependencies() {
        let g = build(
            CompilationUnit::new()
                .declare(DeclarationRecord::function("even").call("e0", "odd"))
                .declare(DeclarationRecord::function("odd").call("o0", "even"))
                .declare(DeclarationRecord::function("main").call("m0", "even"))
                .declare(DeclarationRecord::function("fact").call("f0", "fact")),
        );
        let comps = g.components();
        let cycle = g.component_of(0);
        assert_eq!(comps[cycle].members, vec![0, 1]);
        assert!(comps[cycle].is_mutual_recursion());
        let main = g.component_of(2);
        assert_eq!(comps[main].deps, vec![cycle]);
        assert!(cycle < main);
        let fact = &comps[g.component_of(3)];
        assert!(fact.cyclic && !fact.is_mutual_recursion());
    }

    #[test]
    fn arguments_count_as_dependencies() {
        let g = build(
            CompilationUnit::new()
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
                )),
        );
        let caller = &g.components()[g.component_of(2)];
        assert_eq!(caller.deps.len(), 2);
    }
}
