//! Declaration model — the records a front end hands to the checker.
//!
//! A [`CompilationUnit`] is an ordered list of [`DeclarationRecord`]s plus the
//! table of external symbols (I/O primitives, module-level mutable bindings)
//! the unit may touch. Each record already carries its flat edge list: the
//! calls it makes and the bindings it captures. The checker never re-reads
//! source syntax.
//!
//! [`DeclarationModel::from_unit`] validates the records and indexes them by
//! [`DeclId`]. The model is read-only once built.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use thiserror::Error;

// ── Identifiers ─────────────────────────────────────────────────────

/// Stable identifier of a declaration within a compilation unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeclId(pub String);

impl DeclId {
    pub fn new(id: impl Into<String>) -> Self {
        DeclId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeclId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeclId {
    fn from(s: &str) -> Self {
        DeclId(s.to_string())
    }
}

/// Identifier of a call site, unique within its declaration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SiteId(pub String);

impl SiteId {
    pub fn new(id: impl Into<String>) -> Self {
        SiteId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SiteId {
    fn from(s: &str) -> Self {
        SiteId(s.to_string())
    }
}

/// Source position reported back in diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    pub line: usize,
    #[serde(default)]
    pub col: usize,
}

impl Span {
    pub fn new(line: usize, col: usize) -> Self {
        Span {
            file: None,
            line,
            col,
        }
    }

    pub fn in_file(mut self, file: impl Into<String>) -> Self {
        self.file = Some(file.into());
        self
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref file) = self.file {
            write!(f, "{}:", file)?;
        }
        if self.col > 0 {
            write!(f, "{}:{}", self.line, self.col)
        } else {
            write!(f, "{}", self.line)
        }
    }
}

// ── Records ─────────────────────────────────────────────────────────

/// What sort of callable a declaration is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeclKind {
    Function,
    Closure,
    Method,
}

impl fmt::Display for DeclKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeclKind::Function => write!(f, "function"),
            DeclKind::Closure => write!(f, "closure"),
            DeclKind::Method => write!(f, "method"),
        }
    }
}

/// The purity the author declared for a callable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurityIntent {
    #[default]
    Unmarked,
    Pure,
    ConditionallyPure,
}

impl PurityIntent {
    /// `true` for any explicit purity annotation.
    pub fn is_asserted(self) -> bool {
        !matches!(self, PurityIntent::Unmarked)
    }
}

impl fmt::Display for PurityIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PurityIntent::Unmarked => write!(f, "unmarked"),
            PurityIntent::Pure => write!(f, "pure"),
            PurityIntent::ConditionallyPure => write!(f, "conditionally pure"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    /// The parameter's type is a function/closure type.
    #[serde(default)]
    pub callable: bool,
    /// Callable parameter annotated as requiring a pure argument.
    #[serde(default)]
    pub requires_pure: bool,
    /// By-reference mutable parameter.
    #[serde(default)]
    pub inout: bool,
}

impl Parameter {
    pub fn value(name: impl Into<String>) -> Self {
        Parameter {
            name: name.into(),
            callable: false,
            requires_pure: false,
            inout: false,
        }
    }

    pub fn callable(name: impl Into<String>) -> Self {
        Parameter {
            callable: true,
            ..Parameter::value(name)
        }
    }

    pub fn pure_callable(name: impl Into<String>) -> Self {
        Parameter {
            callable: true,
            requires_pure: true,
            ..Parameter::value(name)
        }
    }

    pub fn inout(name: impl Into<String>) -> Self {
        Parameter {
            inout: true,
            ..Parameter::value(name)
        }
    }
}

/// A binding referenced from an enclosing scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureRecord {
    pub binding: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span: Option<Span>,
}

/// A callable argument passed at a call site, bound to the callee's
/// parameter `param`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArgumentRecord {
    pub param: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallRecord {
    pub site: SiteId,
    pub callee: String,
    #[serde(default)]
    pub args: Vec<ArgumentRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span: Option<Span>,
}

/// How a method reaches its receiver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReceiverAccess {
    /// Reads or writes `self` directly.
    Implicit,
    /// Only reads the receiver through the named explicit parameter.
    Alias { param: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receiver {
    /// Name of the owning type. A back-reference only.
    pub owner: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access: Option<ReceiverAccess>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeclarationRecord {
    pub id: DeclId,
    pub kind: DeclKind,
    #[serde(default)]
    pub intent: PurityIntent,
    #[serde(default)]
    pub params: Vec<Parameter>,
    #[serde(default)]
    pub captures: Vec<CaptureRecord>,
    #[serde(default)]
    pub calls: Vec<CallRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver: Option<Receiver>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span: Option<Span>,
}

impl DeclarationRecord {
    fn new(id: impl Into<String>, kind: DeclKind) -> Self {
        DeclarationRecord {
            id: DeclId::new(id),
            kind,
            intent: PurityIntent::Unmarked,
            params: Vec::new(),
            captures: Vec::new(),
            calls: Vec::new(),
            receiver: None,
            span: None,
        }
    }

    pub fn function(id: impl Into<String>) -> Self {
        Self::new(id, DeclKind::Function)
    }

    pub fn closure(id: impl Into<String>) -> Self {
        Self::new(id, DeclKind::Closure)
    }

    pub fn method(id: impl Into<String>, owner: impl Into<String>) -> Self {
        let mut decl = Self::new(id, DeclKind::Method);
        decl.receiver = Some(Receiver {
            owner: owner.into(),
            access: None,
        });
        decl
    }

    pub fn pure(mut self) -> Self {
        self.intent = PurityIntent::Pure;
        self
    }

    pub fn conditionally_pure(mut self) -> Self {
        self.intent = PurityIntent::ConditionallyPure;
        self
    }

    pub fn param(mut self, param: Parameter) -> Self {
        self.params.push(param);
        self
    }

    pub fn capture(mut self, binding: impl Into<String>) -> Self {
        self.captures.push(CaptureRecord {
            binding: binding.into(),
            span: None,
        });
        self
    }

    pub fn call(self, site: impl Into<String>, callee: impl Into<String>) -> Self {
        self.call_with(site, callee, &[])
    }

    /// Add a call edge binding callable arguments as `(callee_param, value)` pairs.
    pub fn call_with(
        mut self,
        site: impl Into<String>,
        callee: impl Into<String>,
        args: &[(&str, &str)],
    ) -> Self {
        self.calls.push(CallRecord {
            site: SiteId::new(site),
            callee: callee.into(),
            args: args
                .iter()
                .map(|(param, value)| ArgumentRecord {
                    param: param.to_string(),
                    value: value.to_string(),
                })
                .collect(),
            span: None,
        });
        self
    }

    pub fn receiver_access(mut self, access: ReceiverAccess) -> Self {
        if let Some(ref mut receiver) = self.receiver {
            receiver.access = Some(access);
        }
        self
    }

    pub fn at(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    /// Look up a parameter by name, returning its position too.
    pub fn find_param(&self, name: &str) -> Option<(usize, &Parameter)> {
        self.params.iter().enumerate().find(|(_, p)| p.name == name)
    }

    pub fn callable_params(&self) -> impl Iterator<Item = &Parameter> {
        self.params.iter().filter(|p| p.callable)
    }
}

/// Classification of a symbol that lives outside the unit's declarations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExternalKind {
    /// I/O primitive, foreign call, or any other opaque callable.
    Primitive,
    /// Module-level mutable binding.
    Global,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalSymbol {
    pub name: String,
    pub kind: ExternalKind,
}

/// Everything the front end emits for one compilation unit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompilationUnit {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub declarations: Vec<DeclarationRecord>,
    #[serde(default)]
    pub externals: Vec<ExternalSymbol>,
}

impl CompilationUnit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare(mut self, decl: DeclarationRecord) -> Self {
        self.declarations.push(decl);
        self
    }

    pub fn primitive(mut self, name: impl Into<String>) -> Self {
        self.externals.push(ExternalSymbol {
            name: name.into(),
            kind: ExternalKind::Primitive,
        });
        self
    }

    pub fn global(mut self, name: impl Into<String>) -> Self {
        self.externals.push(ExternalSymbol {
            name: name.into(),
            kind: ExternalKind::Global,
        });
        self
    }

    pub fn from_json(src: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(src)
    }
}

// ── Validation ──────────────────────────────────────────────────────

/// Structural input defect found before the graph is built.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "defect", rename_all = "snake_case")]
pub enum MalformedDeclaration {
    #[error("duplicate declaration '{decl}'")]
    DuplicateDeclaration { decl: DeclId },
    #[error("parameter '{param}' is declared more than once in '{decl}'")]
    DuplicateParameter { decl: DeclId, param: String },
    #[error("capture '{binding}' of '{decl}' duplicates a parameter name")]
    CaptureShadowsParameter { decl: DeclId, binding: String },
    #[error("method '{decl}' has no receiver")]
    MissingReceiver { decl: DeclId },
    #[error("{kind} '{decl}' declares a receiver but is not a method")]
    UnexpectedReceiver { decl: DeclId, kind: DeclKind },
    #[error("method '{decl}' has a purity annotation but does not declare its receiver access")]
    UndeclaredReceiverAccess { decl: DeclId },
    #[error("receiver alias '{param}' of '{decl}' is not one of its parameters")]
    UnknownReceiverAlias { decl: DeclId, param: String },
}

impl MalformedDeclaration {
    pub fn decl(&self) -> &DeclId {
        match self {
            MalformedDeclaration::DuplicateDeclaration { decl }
            | MalformedDeclaration::DuplicateParameter { decl, .. }
            | MalformedDeclaration::CaptureShadowsParameter { decl, .. }
            | MalformedDeclaration::MissingReceiver { decl }
            | MalformedDeclaration::UnexpectedReceiver { decl, .. }
            | MalformedDeclaration::UndeclaredReceiverAccess { decl }
            | MalformedDeclaration::UnknownReceiverAlias { decl, .. } => decl,
        }
    }
}

fn validate(decl: &DeclarationRecord, errors: &mut Vec<MalformedDeclaration>) {
    let mut seen = HashSet::new();
    for p in &decl.params {
        if !seen.insert(p.name.as_str()) {
            errors.push(MalformedDeclaration::DuplicateParameter {
                decl: decl.id.clone(),
                param: p.name.clone(),
            });
        }
    }

    for c in &decl.captures {
        if seen.contains(c.binding.as_str()) {
            errors.push(MalformedDeclaration::CaptureShadowsParameter {
                decl: decl.id.clone(),
                binding: c.binding.clone(),
            });
        }
    }

    match (decl.kind, &decl.receiver) {
        (DeclKind::Method, None) => errors.push(MalformedDeclaration::MissingReceiver {
            decl: decl.id.clone(),
        }),
        (DeclKind::Method, Some(receiver)) => match &receiver.access {
            None if decl.intent.is_asserted() => {
                errors.push(MalformedDeclaration::UndeclaredReceiverAccess {
                    decl: decl.id.clone(),
                })
            }
            Some(ReceiverAccess::Alias { param }) if decl.find_param(param).is_none() => {
                errors.push(MalformedDeclaration::UnknownReceiverAlias {
                    decl: decl.id.clone(),
                    param: param.clone(),
                })
            }
            _ => {}
        },
        (kind, Some(_)) => errors.push(MalformedDeclaration::UnexpectedReceiver {
            decl: decl.id.clone(),
            kind,
        }),
        (_, None) => {}
    }
}

// ── The model ───────────────────────────────────────────────────────

/// Indexed, read-only view over a compilation unit's declarations.
#[derive(Debug, Clone)]
pub struct DeclarationModel {
    decls: Vec<DeclarationRecord>,
    index: HashMap<DeclId, usize>,
    externals: HashMap<String, ExternalKind>,
    malformed: HashSet<usize>,
}

impl DeclarationModel {
    /// Index the unit's declarations.
    ///
    /// The first declaration with a given id wins; later duplicates are
    /// reported and left out of the model. Declarations with any other
    /// defect stay in the model but are flagged, see [`Self::is_malformed`].
    pub fn from_unit(unit: &CompilationUnit) -> (Self, Vec<MalformedDeclaration>) {
        let mut decls = Vec::with_capacity(unit.declarations.len());
        let mut index = HashMap::new();
        let mut malformed = HashSet::new();
        let mut errors = Vec::new();

        for decl in &unit.declarations {
            if index.contains_key(&decl.id) {
                errors.push(MalformedDeclaration::DuplicateDeclaration {
                    decl: decl.id.clone(),
                });
                continue;
            }
            let before = errors.len();
            validate(decl, &mut errors);
            let pos = decls.len();
            if errors.len() > before {
                malformed.insert(pos);
            }
            index.insert(decl.id.clone(), pos);
            decls.push(decl.clone());
        }

        let externals = unit
            .externals
            .iter()
            .map(|e| (e.name.clone(), e.kind))
            .collect();

        (
            DeclarationModel {
                decls,
                index,
                externals,
                malformed,
            },
            errors,
        )
    }

    pub fn len(&self) -> usize {
        self.decls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decls.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DeclarationRecord> {
        self.decls.iter()
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.index.get(&DeclId::new(id)).copied()
    }

    pub fn at(&self, pos: usize) -> &DeclarationRecord {
        &self.decls[pos]
    }

    pub fn get(&self, id: &DeclId) -> Option<&DeclarationRecord> {
        self.index.get(id).map(|&pos| &self.decls[pos])
    }

    pub fn parameters(&self, id: &DeclId) -> Option<&[Parameter]> {
        self.get(id).map(|d| d.params.as_slice())
    }

    pub fn captures(&self, id: &DeclId) -> Option<&[CaptureRecord]> {
        self.get(id).map(|d| d.captures.as_slice())
    }

    /// Receiver of a method. `None` for every other kind of declaration.
    pub fn receiver(&self, id: &DeclId) -> Option<&Receiver> {
        self.get(id)
            .filter(|d| d.kind == DeclKind::Method)
            .and_then(|d| d.receiver.as_ref())
    }

    pub fn external(&self, name: &str) -> Option<ExternalKind> {
        self.externals.get(name).copied()
    }

    pub fn is_malformed(&self, pos: usize) -> bool {
        self.malformed.contains(&pos)
    }

    /// Every name a reference could legally resolve to, for suggestions.
    pub fn known_names(&self) -> Vec<&str> {
        self.decls
            .iter()
            .map(|d| d.id.as_str())
            .chain(self.externals.keys().map(String::as_str))
            .collect()
    }
}
