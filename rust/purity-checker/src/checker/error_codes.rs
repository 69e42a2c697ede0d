//! Stable codes for every rule the checker enforces.
//!
//! Code ranges:
//!   P0001–P0099  Malformed declarations
//!   P0100–P0199  Structural violations
//!   P0200–P0299  Unresolved references
//!   P0300–P0399  Purity cycles
//!   P0400–P0499  Purity mismatches and call-site degradation
//!   P0500–P0599  Unresolved obligations

use crate::checker::model::MalformedDeclaration;
use serde::Serialize;
use std::fmt;
use strum_macros::{EnumCount, EnumIter, IntoStaticStr};

/// Error taxonomy a rule belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    MalformedDeclaration,
    StructuralViolation,
    UnresolvedReference,
    PurityCycleError,
    PurityMismatch,
    CallSiteDegradation,
    UnresolvedObligation,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Category::MalformedDeclaration => "malformed declaration",
            Category::StructuralViolation => "structural violation",
            Category::UnresolvedReference => "unresolved reference",
            Category::PurityCycleError => "purity cycle",
            Category::PurityMismatch => "purity mismatch",
            Category::CallSiteDegradation => "call-site degradation",
            Category::UnresolvedObligation => "unresolved obligation",
        };
        f.write_str(name)
    }
}

/// Severity level for diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
    Note,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
            Severity::Note => write!(f, "note"),
        }
    }
}

/// One checked rule. The snake_case name doubles as the message template key.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, EnumIter, EnumCount, IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Rule {
    // Malformed
    DuplicateDeclaration,
    DuplicateParameter,
    CaptureShadowsParameter,
    MissingReceiver,
    UnexpectedReceiver,
    UndeclaredReceiverAccess,
    UnknownReceiverAlias,
    // Structural
    MutableParameter,
    MutableCapture,
    ImplicitReceiverAccess,
    UnrestrictedCallableParameter,
    // Unresolved
    UnresolvedCallee,
    UnresolvedCapture,
    NonCallableInvoked,
    UnknownArgumentParameter,
    UnresolvedArgument,
    UnboundCallableArgument,
    // Cycles
    InconsistentCycle,
    // Mismatch / call sites
    ImpureDeclaration,
    ImpureArgument,
    UnresolvableDependency,
    DegradedCallSite,
    // Obligations
    UnresolvedObligation,
}

impl Rule {
    pub fn code(self) -> &'static str {
        match self {
            Rule::DuplicateDeclaration => "P0001",
            Rule::DuplicateParameter => "P0002",
            Rule::CaptureShadowsParameter => "P0003",
            Rule::MissingReceiver => "P0004",
            Rule::UnexpectedReceiver => "P0005",
            Rule::UndeclaredReceiverAccess => "P0006",
            Rule::UnknownReceiverAlias => "P0007",
            Rule::MutableParameter => "P0100",
            Rule::MutableCapture => "P0101",
            Rule::ImplicitReceiverAccess => "P0102",
            Rule::UnrestrictedCallableParameter => "P0103",
            Rule::UnresolvedCallee => "P0200",
            Rule::UnresolvedCapture => "P0201",
            Rule::NonCallableInvoked => "P0202",
            Rule::UnknownArgumentParameter => "P0203",
            Rule::UnresolvedArgument => "P0204",
            Rule::UnboundCallableArgument => "P0205",
            Rule::InconsistentCycle => "P0300",
            Rule::ImpureDeclaration => "P0400",
            Rule::ImpureArgument => "P0401",
            Rule::UnresolvableDependency => "P0402",
            Rule::DegradedCallSite => "P0403",
            Rule::UnresolvedObligation => "P0500",
        }
    }

    pub fn category(self) -> Category {
        match self {
            Rule::DuplicateDeclaration
            | Rule::DuplicateParameter
            | Rule::CaptureShadowsParameter
            | Rule::MissingReceiver
            | Rule::UnexpectedReceiver
            | Rule::UndeclaredReceiverAccess
            | Rule::UnknownReceiverAlias => Category::MalformedDeclaration,
            Rule::MutableParameter
            | Rule::MutableCapture
            | Rule::ImplicitReceiverAccess
            | Rule::UnrestrictedCallableParameter => Category::StructuralViolation,
            Rule::UnresolvedCallee
            | Rule::UnresolvedCapture
            | Rule::NonCallableInvoked
            | Rule::UnknownArgumentParameter
            | Rule::UnresolvedArgument
            | Rule::UnboundCallableArgument => Category::UnresolvedReference,
            Rule::InconsistentCycle => Category::PurityCycleError,
            Rule::ImpureDeclaration => Category::PurityMismatch,
            Rule::ImpureArgument | Rule::UnresolvableDependency | Rule::DegradedCallSite => {
                Category::CallSiteDegradation
            }
            Rule::UnresolvedObligation => Category::UnresolvedObligation,
        }
    }

    pub fn severity(self) -> Severity {
        match self {
            Rule::UnresolvableDependency
            | Rule::DegradedCallSite
            | Rule::UnresolvedObligation => Severity::Warning,
            _ => Severity::Error,
        }
    }

    /// Message template key, e.g. `purity.impure_declaration`.
    pub fn template(self) -> String {
        let name: &'static str = self.into();
        format!("purity.{}", name)
    }

    pub fn from_code(code: &str) -> Option<Rule> {
        use strum::IntoEnumIterator;
        Rule::iter().find(|r| r.code().eq_ignore_ascii_case(code))
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name: &'static str = (*self).into();
        f.write_str(name)
    }
}

/// Rule violated by a malformed declaration record.
pub fn malformed_rule(e: &MalformedDeclaration) -> Rule {
    match e {
        MalformedDeclaration::DuplicateDeclaration { .. } => Rule::DuplicateDeclaration,
        MalformedDeclaration::DuplicateParameter { .. } => Rule::DuplicateParameter,
        MalformedDeclaration::CaptureShadowsParameter { .. } => Rule::CaptureShadowsParameter,
        MalformedDeclaration::MissingReceiver { .. } => Rule::MissingReceiver,
        MalformedDeclaration::UnexpectedReceiver { .. } => Rule::UnexpectedReceiver,
        MalformedDeclaration::UndeclaredReceiverAccess { .. } => Rule::UndeclaredReceiverAccess,
        MalformedDeclaration::UnknownReceiverAlias { .. } => Rule::UnknownReceiverAlias,
    }
}

/// Stable code for a malformed declaration record.
pub fn malformed_code(e: &MalformedDeclaration) -> &'static str {
    malformed_rule(e).code()
}

/// Return a short (2–3 sentence) documentation string for the given
/// rule code.
pub fn error_doc(code: &str) -> &'static str {
    match code {
        // Malformed
        "P0001" => "Two declarations in the same compilation unit share an identifier. The first one is kept; rename or remove the other.",
        "P0002" => "A parameter name appears more than once in one declaration. Parameter names must be unique.",
        "P0003" => "A closure's capture list names a binding that is also one of its parameters. A parameter cannot be captured; drop the capture entry.",
        "P0004" => "A method record carries no receiver. Every method must name the type that owns it.",
        "P0005" => "A free function or closure record carries a receiver. Only methods have receivers.",
        "P0006" => "A method carries a purity annotation but does not say how it reaches its receiver. Declare the access as implicit or as an alias of an explicit parameter.",
        "P0007" => "A method's receiver alias names a parameter the method does not have. Point the alias at one of the declared parameters.",

        // Structural
        "P0100" => "A declaration annotated as pure takes a by-reference mutable parameter. Pure code cannot write through its arguments; pass the value and return the result instead.",
        "P0101" => "A declaration annotated as pure captures external mutable state. Pass the state in as an explicit parameter.",
        "P0102" => "A method annotated as pure reads or writes its receiver directly. Pure methods may only reach the receiver through an explicit parameter.",
        "P0103" => "A declaration annotated as pure accepts a callable parameter that is not marked as requiring purity. Mark the parameter pure, or annotate the declaration as conditionally pure.",

        // Unresolved
        "P0200" => "A call target could not be classified as a declaration, a callable parameter, or an external symbol. This is a front-end integration defect; the declaration is left unresolvable.",
        "P0201" => "A captured binding is neither a declaration nor an external symbol. The declaration is left unresolvable.",
        "P0202" => "A parameter that is not callable is invoked as a function. The declaration is left unresolvable.",
        "P0203" => "A call site binds an argument to a parameter the callee does not have, or that is not callable.",
        "P0204" => "A callable argument passed at a call site could not be classified.",
        "P0205" => "A call site does not bind one of the callee's callable parameters, so the callee's obligations cannot be checked there.",

        // Cycles
        "P0300" => "A group of mutually recursive declarations cannot be proven pure: assuming every member pure leads to a contradiction. All members are left unresolvable.",

        // Mismatch / call sites
        "P0400" => "A declaration annotated as pure or conditionally pure was found to be impure. The notes list every edge that made it impure.",
        "P0401" => "An impure callable is passed for a parameter that requires a pure argument.",
        "P0402" => "A call, capture, or argument refers to a declaration whose purity could not be resolved. The edge is treated as impure.",
        "P0403" => "An impure callable is passed for a parameter the callee's purity is conditional on. That call site, and so the caller, is impure even though the callee is conditionally pure.",

        // Obligations
        "P0500" => "Strict mode: a conditionally pure verdict was still open at the end of the compilation unit and has been treated as impure.",

        _ => "Unknown rule code.",
    }
}

/// Documentation for a rule.
pub fn rule_doc(rule: Rule) -> &'static str {
    error_doc(rule.code())
}

/// Return all registered rule codes with their short description.
pub fn all_error_codes() -> Vec<(&'static str, &'static str)> {
    use strum::IntoEnumIterator;
    Rule::iter().map(|r| (r.code(), rule_doc(r))).collect()
}
