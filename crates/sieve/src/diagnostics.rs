use serde::Serialize;
use sieve_contracts::SIEVE_REPORT_SCHEMA_VERSION;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// A position in the script source, as reported by the parser front end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Default)]
pub struct Span {
    pub line: u32,
    pub col: u32,
}

impl Span {
    pub fn new(line: u32, col: u32) -> Self {
        Self { line, col }
    }

    pub fn at_line(line: u32) -> Self {
        Self { line, col: 0 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub code: String,
    pub severity: Severity,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span: Option<Span>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related: Vec<Span>,
}

impl Diagnostic {
    pub fn error(code: &str, span: Span, message: String) -> Self {
        Self {
            code: code.to_string(),
            severity: Severity::Error,
            message,
            span: Some(span),
            related: Vec::new(),
        }
    }

    pub fn warning(code: &str, span: Span, message: String) -> Self {
        Self {
            code: code.to_string(),
            severity: Severity::Warning,
            message,
            span: Some(span),
            related: Vec::new(),
        }
    }
}

/// Accumulated compile diagnostics.
///
/// `ok` is false as soon as any error-severity diagnostic was recorded;
/// warnings alone never fail a compile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Report {
    pub schema_version: String,
    pub ok: bool,
    pub diagnostics: Vec<Diagnostic>,
}

impl Report {
    pub fn ok() -> Self {
        Self {
            schema_version: SIEVE_REPORT_SCHEMA_VERSION.to_string(),
            ok: true,
            diagnostics: Vec::new(),
        }
    }

    pub fn with_diagnostics(mut self, mut diagnostics: Vec<Diagnostic>) -> Self {
        diagnostics.sort_by(|a, b| {
            a.span
                .cmp(&b.span)
                .then_with(|| a.code.cmp(&b.code))
                .then_with(|| a.message.cmp(&b.message))
        });
        self.ok = diagnostics.iter().all(|d| d.severity != Severity::Error);
        self.diagnostics = diagnostics;
        self
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_sorts_and_flags_errors() {
        let report = Report::ok().with_diagnostics(vec![
            Diagnostic::warning("w", Span::at_line(9), "later".to_string()),
            Diagnostic::error("e", Span::at_line(2), "earlier".to_string()),
        ]);
        assert!(!report.ok);
        assert_eq!(report.diagnostics[0].span, Some(Span::at_line(2)));
        assert_eq!(report.errors().count(), 1);
    }

    #[test]
    fn warnings_alone_keep_ok() {
        let report = Report::ok().with_diagnostics(vec![Diagnostic::warning(
            "w",
            Span::at_line(1),
            "note".to_string(),
        )]);
        assert!(report.ok);
    }
}
