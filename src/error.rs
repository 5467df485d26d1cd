use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DocBindError {
    #[error("invalid configuration: {0}")]
    Configuration(String),
    #[error("cannot load template {}: {message}", .path.display())]
    TemplateLoad { path: PathBuf, message: String },
    #[error("template {name} is malformed: {message}")]
    TemplateParse { name: String, message: String },
    #[error("template rendering failed: {0}")]
    TemplateRender(String),
    #[error("markup conversion failed: {0}")]
    Conversion(String),
    #[error("pdf error: {0}")]
    Pdf(String),
    #[error("post-processor {step} failed: {message}")]
    PostProcessor { step: String, message: String },
    #[error("generation cancelled")]
    Cancelled,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl DocBindError {
    pub fn config(message: impl Into<String>) -> Self {
        DocBindError::Configuration(message.into())
    }

    /// Cancellation is an abandonment signal, not a failure of the inputs.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, DocBindError::Cancelled)
    }
}

/// Failure of a single placeholder. The form and sheet paths recover from it.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ResolveError {
    #[error("value is not a finite number: {0}")]
    NonFinite(f64),
    #[error("invalid date pattern {pattern:?}")]
    DatePattern { pattern: String },
    #[error("cannot serialize collection element: {0}")]
    Collection(String),
    #[error("chart rendering failed: {0}")]
    Chart(String),
    #[error("{0}")]
    Custom(String),
}

impl ResolveError {
    pub fn custom(message: impl Into<String>) -> Self {
        ResolveError::Custom(message.into())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct PostProcessError(pub String);

impl PostProcessError {
    pub fn new(message: impl Into<String>) -> Self {
        PostProcessError(message.into())
    }
}

pub type Result<T, E = DocBindError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_load_message_names_path() {
        let err = DocBindError::TemplateLoad {
            path: PathBuf::from("forms/w9.pdf"),
            message: "missing AcroForm".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "cannot load template forms/w9.pdf: missing AcroForm"
        );
    }

    #[test]
    fn only_cancelled_reports_cancellation() {
        assert!(DocBindError::Cancelled.is_cancelled());
        assert!(!DocBindError::config("x").is_cancelled());
    }

    #[test]
    fn io_errors_convert() {
        let err: DocBindError = std::io::Error::other("disk gone").into();
        assert!(matches!(err, DocBindError::Io(_)));
        assert!(err.to_string().contains("disk gone"));
    }
}
