//! Purity Checker
//!
//! Decides, and explains, whether each declaration of a compilation unit is
//! pure, impure, or conditionally pure over its callable parameters.

pub mod checker;
pub mod diagnostics;

pub use checker::error_codes::{all_error_codes, error_doc, Category, Rule, Severity};
pub use checker::graph::{BuildError, Graph};
pub use checker::lattice::{Effect, ParamRef, PurityVerdict};
pub use checker::model::{
    CompilationUnit, DeclId, DeclKind, DeclarationModel, DeclarationRecord, MalformedDeclaration,
    Parameter, PurityIntent, ReceiverAccess, SiteId, Span,
};
pub use checker::resolver::{
    resolve, resolve_detailed, resolve_with_cancel, CallSiteVerdict, CheckOptions, Resolution,
    ResolveError, Strictness, VerdictMap,
};
pub use checker::scheduler::CancellationToken;
pub use diagnostics::Diagnostic;

use tracing::debug;

/// Build the call graph of a unit, rejecting it if any declaration is
/// malformed.
pub fn build_graph(unit: &CompilationUnit) -> Result<Graph, BuildError> {
    Graph::build(unit)
}

/// Run the whole pipeline on one unit.
///
/// Never fails: malformed declarations are quarantined and reported, and
/// every declaration of the unit gets a verdict.
pub fn check(unit: &CompilationUnit, options: &CheckOptions) -> Resolution {
    debug!(
        unit = unit.name.as_deref().unwrap_or("<anonymous>"),
        declarations = unit.declarations.len(),
        "checking unit"
    );
    let graph = Graph::build_partial(unit);
    resolve_detailed(&graph, options)
}
