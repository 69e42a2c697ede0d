//! The effect lattice: the purity domain and its composition rules.
//!
//! The domain is the two-point lattice `Pure < Impure`, with `Pure` as the
//! identity of [`Effect::join`]. A dependency on one of the declaration's own
//! callable parameters contributes `Pure` *provisionally*: it is recorded as
//! an obligation in the [`EffectSummary`] and surfaces in the final verdict as
//! [`PurityVerdict::ConditionallyPure`].
//!
//! [`instantiate`] composes a call to a callee whose verdict is known with
//! the callable arguments bound at the call site. Direct calls, captured
//! closures, and passed-in callables all go through the same join.

use crate::checker::model::{DeclId, SiteId};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

// ── Effect ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Effect {
    #[default]
    Pure,
    Impure,
}

impl Effect {
    /// Least upper bound.
    pub fn join(self, other: Effect) -> Effect {
        self.max(other)
    }
}

// ── Verdicts ────────────────────────────────────────────────────────

/// A callable parameter a conditional verdict depends on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ParamRef {
    pub decl: DeclId,
    pub name: String,
}

impl ParamRef {
    pub fn new(decl: &DeclId, name: impl Into<String>) -> Self {
        ParamRef {
            decl: decl.clone(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ParamRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// The checker's classification of one declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", content = "obligations", rename_all = "snake_case")]
pub enum PurityVerdict {
    Pure,
    Impure,
    /// Pure iff every listed callable parameter is pure at the call site.
    ConditionallyPure(BTreeSet<ParamRef>),
    /// Part of a cycle that could not be resolved, or blocked by a defect in
    /// the declaration itself.
    Unresolvable,
}

impl PurityVerdict {
    pub fn conditionally_pure<I>(decl: &DeclId, params: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        PurityVerdict::ConditionallyPure(
            params.into_iter().map(|p| ParamRef::new(decl, p)).collect(),
        )
    }

    pub fn is_pure(&self) -> bool {
        matches!(self, PurityVerdict::Pure)
    }

    pub fn is_impure(&self) -> bool {
        matches!(self, PurityVerdict::Impure)
    }

    pub fn is_conditional(&self) -> bool {
        matches!(self, PurityVerdict::ConditionallyPure(_))
    }

    /// A pure declaration may be moved freely across concurrency boundaries.
    pub fn is_transferable(&self) -> bool {
        self.is_pure()
    }

    pub fn obligations(&self) -> Option<&BTreeSet<ParamRef>> {
        match self {
            PurityVerdict::ConditionallyPure(obligations) => Some(obligations),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            PurityVerdict::Pure => "pure",
            PurityVerdict::Impure => "impure",
            PurityVerdict::ConditionallyPure(_) => "conditionally pure",
            PurityVerdict::Unresolvable => "unresolvable",
        }
    }
}

impl fmt::Display for PurityVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PurityVerdict::ConditionallyPure(obligations) => {
                let names: Vec<&str> = obligations.iter().map(|p| p.name.as_str()).collect();
                write!(f, "conditionally pure over {{{}}}", names.join(", "))
            }
            other => f.write_str(other.label()),
        }
    }
}

// ── Impurity causes ─────────────────────────────────────────────────

/// Why a summary joined to `Impure`. Kept so diagnostics can explain a
/// verdict down to the edge that caused it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "cause", rename_all = "snake_case")]
pub enum ImpurityCause {
    ExternalCall { site: SiteId, symbol: String },
    MutableCapture { binding: String },
    ReceiverAccess,
    ImpureCapture { binding: DeclId },
    /// Strict mode: a captured conditionally pure closure whose obligations
    /// nothing will discharge.
    OpenCapture { binding: DeclId },
    ImpureCallee { site: SiteId, callee: DeclId },
    UnresolvableCallee { site: SiteId, callee: DeclId },
    ImpureArgument {
        site: SiteId,
        callee: DeclId,
        param: String,
        value: String,
    },
}

impl ImpurityCause {
    pub fn site(&self) -> Option<&SiteId> {
        match self {
            ImpurityCause::ExternalCall { site, .. }
            | ImpurityCause::ImpureCallee { site, .. }
            | ImpurityCause::UnresolvableCallee { site, .. }
            | ImpurityCause::ImpureArgument { site, .. } => Some(site),
            ImpurityCause::MutableCapture { .. }
            | ImpurityCause::ReceiverAccess
            | ImpurityCause::ImpureCapture { .. }
            | ImpurityCause::OpenCapture { .. } => None,
        }
    }
}

impl fmt::Display for ImpurityCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImpurityCause::ExternalCall { site, symbol } => {
                write!(f, "calls external '{}' at site '{}'", symbol, site)
            }
            ImpurityCause::MutableCapture { binding } => {
                write!(f, "captures external mutable state '{}'", binding)
            }
            ImpurityCause::ReceiverAccess => {
                write!(f, "accesses its receiver without an explicit parameter")
            }
            ImpurityCause::ImpureCapture { binding } => {
                write!(f, "captures impure declaration '{}'", binding)
            }
            ImpurityCause::OpenCapture { binding } => {
                write!(f, "captures '{}', whose obligations stay open", binding)
            }
            ImpurityCause::ImpureCallee { site, callee } => {
                write!(f, "calls impure '{}' at site '{}'", callee, site)
            }
            ImpurityCause::UnresolvableCallee { site, callee } => {
                write!(f, "calls unresolvable '{}' at site '{}'", callee, site)
            }
            ImpurityCause::ImpureArgument {
                site,
                callee,
                param,
                value,
            } => write!(
                f,
                "passes impure '{}' as '{}' to '{}' at site '{}'",
                value, param, callee, site
            ),
        }
    }
}

// ── Summaries ───────────────────────────────────────────────────────

/// Running join of everything a declaration touches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EffectSummary {
    effect: Effect,
    obligations: BTreeSet<ParamRef>,
    causes: Vec<ImpurityCause>,
}

impl EffectSummary {
    pub fn pure() -> Self {
        Self::default()
    }

    pub fn impure(cause: ImpurityCause) -> Self {
        EffectSummary {
            effect: Effect::Impure,
            obligations: BTreeSet::new(),
            causes: vec![cause],
        }
    }

    pub fn obligation(param: ParamRef) -> Self {
        let mut summary = Self::pure();
        summary.obligations.insert(param);
        summary
    }

    pub fn join(&mut self, other: EffectSummary) {
        self.effect = self.effect.join(other.effect);
        self.obligations.extend(other.obligations);
        self.causes.extend(other.causes);
    }

    pub fn effect(&self) -> Effect {
        self.effect
    }

    pub fn obligations(&self) -> &BTreeSet<ParamRef> {
        &self.obligations
    }

    pub fn causes(&self) -> &[ImpurityCause] {
        &self.causes
    }

    pub fn into_causes(self) -> Vec<ImpurityCause> {
        self.causes
    }

    /// Collapse the join into a verdict. Obligations are irrelevant once the
    /// summary is impure.
    pub fn to_verdict(&self) -> PurityVerdict {
        match self.effect {
            Effect::Impure => PurityVerdict::Impure,
            Effect::Pure if self.obligations.is_empty() => PurityVerdict::Pure,
            Effect::Pure => PurityVerdict::ConditionallyPure(self.obligations.clone()),
        }
    }
}

// ── Higher-order composition ────────────────────────────────────────

/// Effect of a callable passed as an argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgumentEffect {
    Pure,
    Impure,
    /// The caller forwards one of its own callable parameters.
    Obligation(ParamRef),
}

impl ArgumentEffect {
    /// A declaration passed by name. A conditionally pure argument joins as
    /// pure: its own obligations are re-checked wherever the callee invokes it.
    pub fn of_verdict(verdict: &PurityVerdict) -> Self {
        match verdict {
            PurityVerdict::Pure | PurityVerdict::ConditionallyPure(_) => ArgumentEffect::Pure,
            PurityVerdict::Impure | PurityVerdict::Unresolvable => ArgumentEffect::Impure,
        }
    }
}

/// Result of composing one call.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Composition {
    pub effect: Effect,
    pub obligations: BTreeSet<ParamRef>,
    /// Callee parameters whose argument forced the join to `Impure`.
    pub impure_params: Vec<String>,
    /// The callee itself is impure or unresolvable.
    pub callee_impure: bool,
}

impl Composition {
    pub fn to_verdict(&self) -> PurityVerdict {
        match self.effect {
            Effect::Impure => PurityVerdict::Impure,
            Effect::Pure if self.obligations.is_empty() => PurityVerdict::Pure,
            Effect::Pure => PurityVerdict::ConditionallyPure(self.obligations.clone()),
        }
    }
}

/// Compose a call to a callee with verdict `callee`.
///
/// `required` lists the callee's purity-required parameters, whose arguments
/// are always joined. For a conditionally pure callee the arguments bound to
/// its obligations are joined too. `bind` returns the effect of the argument
/// bound to a callee parameter; an unbound parameter joins as `Impure`.
pub fn instantiate<'a, I, F>(callee: &PurityVerdict, required: I, bind: F) -> Composition
where
    I: IntoIterator<Item = &'a str>,
    F: Fn(&str) -> Option<ArgumentEffect>,
{
    let mut params: BTreeSet<&str> = required.into_iter().collect();
    match callee {
        PurityVerdict::Impure | PurityVerdict::Unresolvable => {
            return Composition {
                effect: Effect::Impure,
                callee_impure: true,
                ..Composition::default()
            };
        }
        PurityVerdict::ConditionallyPure(obligations) => {
            params.extend(obligations.iter().map(|p| p.name.as_str()));
        }
        PurityVerdict::Pure => {}
    }

    let mut composition = Composition::default();
    for param in params {
        match bind(param).unwrap_or(ArgumentEffect::Impure) {
            ArgumentEffect::Pure => {}
            ArgumentEffect::Impure => {
                composition.effect = Effect::Impure;
                composition.impure_params.push(param.to_string());
            }
            ArgumentEffect::Obligation(p) => {
                composition.obligations.insert(p);
            }
        }
    }
    composition
}
