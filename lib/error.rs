use std::fmt;

use crate::snippet::SnippetId;

/// A compile or load error reported about one snippet.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub message: String,
    pub snippet: Option<SnippetId>,
}

impl Diagnostic {
    pub fn error(snippet: SnippetId, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            snippet: Some(snippet),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.snippet {
            Some(snippet) => write!(f, "error[Line_{snippet}]: {}", self.message),
            None => write!(f, "error: {}", self.message),
        }
    }
}

/// Which part of a library integration a failure belongs to, so that user
/// facing messages can tell rendering problems apart from evaluation ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProblemPart {
    Renderers,
}

impl fmt::Display for ProblemPart {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ProblemPart::Renderers => write!(f, "renderers"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    /// `eval` was entered while another evaluation on the same instance was
    /// still in flight.
    #[error("recursive execution is not supported")]
    ConcurrencyViolation,

    #[error("snippet {snippet} failed to compile:\n{}", format_diagnostics(.diagnostics))]
    Compilation {
        snippet: SnippetId,
        code: String,
        diagnostics: Vec<Diagnostic>,
    },

    #[error("{message}")]
    EvaluationRuntime {
        message: String,
        #[source]
        cause: Option<anyhow::Error>,
    },

    #[error("failure in library {part}: {source}")]
    RendererFailure {
        part: ProblemPart,
        #[source]
        source: anyhow::Error,
    },

    #[error("internal consistency error: {0}")]
    InternalConsistency(String),

    #[error("could not serialize compiled unit: {0}")]
    Serialization(#[source] anyhow::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl KernelError {
    pub fn problem_part(&self) -> Option<ProblemPart> {
        match self {
            KernelError::RendererFailure { part, .. } => Some(*part),
            _ => None,
        }
    }
}

fn format_diagnostics(diagnostics: &[Diagnostic]) -> String {
    diagnostics
        .iter()
        .map(|diagnostic| format!("  {diagnostic}"))
        .collect::<Vec<String>>()
        .join("\n")
}

/// Runs a library-provided callback and tags any failure with `part`.
pub fn rethrow_as_library_error<T>(
    part: ProblemPart,
    callback: impl FnOnce() -> anyhow::Result<T>,
) -> Result<T, KernelError> {
    callback().map_err(|source| KernelError::RendererFailure { part, source })
}

#[cfg(test)]
mod tests {
    use anyhow::anyhow;

    use super::*;

    #[test]
    fn test_compilation_error_lists_every_diagnostic() {
        let err = KernelError::Compilation {
            snippet: SnippetId(4),
            code: "let = ".to_string(),
            diagnostics: vec![
                Diagnostic::error(SnippetId(4), "expected identifier, found ="),
                Diagnostic::error(SnippetId(4), "unexpected end of input"),
            ],
        };

        assert_eq!(
            err.to_string(),
            "snippet 4 failed to compile:\n  error[Line_4]: expected identifier, found =\n  error[Line_4]: unexpected end of input"
        );
    }

    #[test]
    fn test_rethrow_tags_problem_part() {
        let err = rethrow_as_library_error::<()>(ProblemPart::Renderers, || Err(anyhow!("boom")))
            .unwrap_err();

        assert_eq!(err.problem_part(), Some(ProblemPart::Renderers));
        assert_eq!(err.to_string(), "failure in library renderers: boom");
        assert!(std::error::Error::source(&err).is_some());
    }
}
