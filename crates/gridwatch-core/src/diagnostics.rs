//! Collector for non-fatal issues encountered while building the topology
//! (§4.1) or assembling a tick's loads (§4.5): unknown cable type
//! substitutions, duplicate names, residual-allocation fallbacks. Distinct
//! from the `tracing` log line emitted at the orchestrator boundary — this
//! collects structured facts a caller may want to inspect or serialize,
//! the log line is for the operator watching stderr.
//!
//! ```
//! use gridwatch_core::diagnostics::{Diagnostics, Severity};
//!
//! let mut diag = Diagnostics::new();
//! diag.add_warning("topology", "unknown cable type 'XLPE-95', using fallback");
//! assert_eq!(diag.warning_count(), 1);
//! ```

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticIssue {
    pub severity: Severity,
    pub category: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity: Option<String>,
}

impl DiagnosticIssue {
    pub fn new(severity: Severity, category: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity,
            category: category.into(),
            message: message.into(),
            entity: None,
        }
    }

    pub fn with_entity(mut self, entity: impl Into<String>) -> Self {
        self.entity = Some(entity.into());
        self
    }
}

impl std::fmt::Display for DiagnosticIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let severity = match self.severity {
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        write!(f, "[{}:{}] {}", severity, self.category, self.message)?;
        if let Some(entity) = &self.entity {
            write!(f, " ({})", entity)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Diagnostics {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<DiagnosticIssue>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, issue: DiagnosticIssue) {
        self.issues.push(issue);
    }

    pub fn add_warning(&mut self, category: &str, message: &str) {
        self.issues
            .push(DiagnosticIssue::new(Severity::Warning, category, message));
    }

    pub fn add_warning_with_entity(&mut self, category: &str, message: &str, entity: &str) {
        self.issues
            .push(DiagnosticIssue::new(Severity::Warning, category, message).with_entity(entity));
    }

    pub fn add_error(&mut self, category: &str, message: &str) {
        self.issues
            .push(DiagnosticIssue::new(Severity::Error, category, message));
    }

    pub fn add_error_with_entity(&mut self, category: &str, message: &str, entity: &str) {
        self.issues
            .push(DiagnosticIssue::new(Severity::Error, category, message).with_entity(entity));
    }

    pub fn warning_count(&self) -> usize {
        self.issues.iter().filter(|i| i.severity == Severity::Warning).count()
    }

    pub fn error_count(&self) -> usize {
        self.issues.iter().filter(|i| i.severity == Severity::Error).count()
    }

    pub fn has_issues(&self) -> bool {
        !self.issues.is_empty()
    }

    pub fn has_errors(&self) -> bool {
        self.issues.iter().any(|i| i.severity == Severity::Error)
    }

    pub fn merge(&mut self, other: Diagnostics) {
        self.issues.extend(other.issues);
    }

    pub fn summary(&self) -> String {
        let (w, e) = (self.warning_count(), self.error_count());
        match (w, e) {
            (0, 0) => "no issues".to_string(),
            (w, 0) => format!("{w} warning{}", if w == 1 { "" } else { "s" }),
            (0, e) => format!("{e} error{}", if e == 1 { "" } else { "s" }),
            (w, e) => format!(
                "{w} warning{}, {e} error{}",
                if w == 1 { "" } else { "s" },
                if e == 1 { "" } else { "s" }
            ),
        }
    }
}

impl std::fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "diagnostics: {}", self.summary())?;
        for issue in &self.issues {
            writeln!(f, "  {issue}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_by_severity() {
        let mut diag = Diagnostics::new();
        diag.add_warning("topology", "w1");
        diag.add_error("topology", "e1");
        diag.add_warning("assembly", "w2");
        assert_eq!(diag.warning_count(), 2);
        assert_eq!(diag.error_count(), 1);
        assert!(diag.has_errors());
    }

    #[test]
    fn entity_is_included_in_display() {
        let mut diag = Diagnostics::new();
        diag.add_warning_with_entity("topology", "unknown cable type", "LINE-7");
        let rendered = diag.to_string();
        assert!(rendered.contains("LINE-7"));
    }

    #[test]
    fn merge_combines_issues() {
        let mut a = Diagnostics::new();
        a.add_warning("x", "one");
        let mut b = Diagnostics::new();
        b.add_error("x", "two");
        a.merge(b);
        assert_eq!(a.warning_count(), 1);
        assert_eq!(a.error_count(), 1);
    }

    #[test]
    fn summary_string() {
        let mut diag = Diagnostics::new();
        assert_eq!(diag.summary(), "no issues");
        diag.add_warning("x", "w");
        assert_eq!(diag.summary(), "1 warning");
    }
}
