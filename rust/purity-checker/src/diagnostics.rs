//! Structured, position-tagged diagnostics and their terminal rendering.

use crate::checker::error_codes::{self, Category, Rule, Severity};
use crate::checker::model::{DeclId, MalformedDeclaration, SiteId, Span};
use serde::Serialize;

/// One finding, attributable to a declaration and, where applicable, a
/// single call site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: &'static str,
    pub rule: Rule,
    /// Message template key, e.g. `purity.impure_declaration`.
    pub template: String,
    pub category: Category,
    pub decl: DeclId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site: Option<SiteId>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub related: Vec<DeclId>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span: Option<Span>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
}

impl Diagnostic {
    pub fn new(rule: Rule, decl: &DeclId, message: impl Into<String>) -> Self {
        Diagnostic {
            severity: rule.severity(),
            code: rule.code(),
            rule,
            template: rule.template(),
            category: rule.category(),
            decl: decl.clone(),
            site: None,
            related: Vec::new(),
            message: message.into(),
            span: None,
            notes: Vec::new(),
            suggestions: Vec::new(),
        }
    }

    pub fn from_malformed(error: &MalformedDeclaration, span: Option<Span>) -> Self {
        let rule = error_codes::malformed_rule(error);
        let mut diag = Diagnostic::new(rule, error.decl(), error.to_string());
        diag.span = span;
        diag
    }

    pub fn at_site(mut self, site: &SiteId) -> Self {
        self.site = Some(site.clone());
        self
    }

    pub fn with_span(mut self, span: Option<&Span>) -> Self {
        if let Some(span) = span {
            self.span = Some(span.clone());
        }
        self
    }

    pub fn with_related(mut self, related: Vec<DeclId>) -> Self {
        self.related = related;
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    pub fn with_suggestions(mut self, suggestions: Vec<String>) -> Self {
        self.suggestions = suggestions;
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }

    /// Render with ANSI colors for terminal
    pub fn render_ansi(&self) -> String {
        let mut out = String::new();

        let severity_label = match self.severity {
            Severity::Error => red("error"),
            Severity::Warning => yellow("warning"),
            Severity::Note => cyan("note"),
        };
        out.push_str(&format!("{}[{}]: ", severity_label, bold(self.code)));
        out.push_str(&bold(&self.message));
        out.push('\n');

        out.push_str(&format!("  {} {}\n", cyan("-->"), self.location()));

        if !self.related.is_empty() {
            out.push_str(&format!("   {}\n", cyan("|")));
            out.push_str(&format!(
                "   {} {}: {}\n",
                cyan("="),
                cyan("involves"),
                join_ids(&self.related)
            ));
        }
        for note in &self.notes {
            out.push_str(&format!("   {} {}: {}\n", cyan("="), cyan("note"), note));
        }
        for suggestion in &self.suggestions {
            out.push_str(&format!("   {} {}: {}\n", cyan("="), cyan("help"), suggestion));
        }

        out
    }

    /// Render without colors (for tests and machine-readable logs)
    pub fn render_plain(&self) -> String {
        let mut out = String::new();

        out.push_str(&format!("{}[{}]: {}\n", self.severity, self.code, self.message));
        out.push_str(&format!("  --> {}\n", self.location()));

        if !self.related.is_empty() {
            out.push_str("   |\n");
            out.push_str(&format!("   = involves: {}\n", join_ids(&self.related)));
        }
        for note in &self.notes {
            out.push_str(&format!("   = note: {}\n", note));
        }
        for suggestion in &self.suggestions {
            out.push_str(&format!("   = help: {}\n", suggestion));
        }

        out
    }

    fn location(&self) -> String {
        let mut loc = match self.span {
            Some(ref span) => format!("{} in '{}'", span, self.decl),
            None => format!("'{}'", self.decl),
        };
        if let Some(ref site) = self.site {
            loc.push_str(&format!(" at call site '{}'", site));
        }
        loc
    }
}

fn join_ids(ids: &[DeclId]) -> String {
    ids.iter()
        .map(|id| format!("'{}'", id))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Order diagnostics deterministically: by declaration position, then
/// code, then call site.
pub fn sort_diagnostics<F>(diagnostics: &mut [Diagnostic], position: F)
where
    F: Fn(&DeclId) -> usize,
{
    diagnostics.sort_by(|a, b| {
        position(&a.decl)
            .cmp(&position(&b.decl))
            .then_with(|| a.code.cmp(b.code))
            .then_with(|| a.site.cmp(&b.site))
            .then_with(|| a.message.cmp(&b.message))
    });
}

// ANSI color helpers
fn red(s: &str) -> String {
    format!("\x1b[31m{}\x1b[0m", s)
}

fn yellow(s: &str) -> String {
    format!("\x1b[33m{}\x1b[0m", s)
}

fn cyan(s: &str) -> String {
    format!("\x1b[36m{}\x1b[0m", s)
}

fn bold(s: &str) -> String {
    format!("\x1b[1m{}\x1b[0m", s)
}

// Edit distance for suggestions
fn edit_distance(a: &str, b: &str) -> usize {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    let a_len = a_chars.len();
    let b_len = b_chars.len();

    if a_len == 0 {
        return b_len;
    }
    if b_len == 0 {
        return a_len;
    }

    let mut prev: Vec<usize> = (0..=b_len).collect();
    let mut cur = vec![0; b_len + 1];
    for i in 1..=a_len {
        cur[0] = i;
        for j in 1..=b_len {
            let cost = if a_chars[i - 1] == b_chars[j - 1] {
                0
            } else {
                1
            };
            cur[j] = (prev[j] + 1).min(cur[j - 1] + 1).min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut cur);
    }

    prev[b_len]
}

/// Up to three candidates within `max_distance` edits of `name`, closest first.
pub fn suggest_similar(name: &str, candidates: &[&str], max_distance: usize) -> Vec<String> {
    let mut matches: Vec<(usize, String)> = candidates
        .iter()
        .filter(|c| **c != name)
        .filter_map(|c| {
            let d = edit_distance(name, c);
            if d <= max_distance {
                Some((d, c.to_string()))
            } else {
                None
            }
        })
        .collect();

    matches.sort();
    matches.dedup();
    matches.into_iter().map(|(_, s)| s).take(3).collect()
}
