use crate::license::LicenseMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningCode {
    PlaceholderResolution,
    MissingSlot,
    MissingRemovalField,
    UnsupportedSlotValue,
    RepeatedSlotWrite,
    SlotWriteFailed,
    LicenseUnavailable,
    ResourceDenied,
    ResourceUnavailable,
}

impl WarningCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            WarningCode::PlaceholderResolution => "PLACEHOLDER_RESOLUTION",
            WarningCode::MissingSlot => "MISSING_SLOT",
            WarningCode::MissingRemovalField => "MISSING_REMOVAL_FIELD",
            WarningCode::UnsupportedSlotValue => "UNSUPPORTED_SLOT_VALUE",
            WarningCode::RepeatedSlotWrite => "REPEATED_SLOT_WRITE",
            WarningCode::SlotWriteFailed => "SLOT_WRITE_FAILED",
            WarningCode::LicenseUnavailable => "LICENSE_UNAVAILABLE",
            WarningCode::ResourceDenied => "RESOURCE_DENIED",
            WarningCode::ResourceUnavailable => "RESOURCE_UNAVAILABLE",
        }
    }
}

/// A recovered, non-fatal problem. Generation carried on past it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationWarning {
    pub code: WarningCode,
    /// Placeholder, field, or resource the warning is about.
    pub subject: Option<String>,
    pub message: String,
}

impl std::fmt::Display for GenerationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.subject {
            Some(subject) => write!(f, "{} [{}]: {}", self.code.as_str(), subject, self.message),
            None => write!(f, "{}: {}", self.code.as_str(), self.message),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GenerationReport {
    pub warnings: Vec<GenerationWarning>,
    pub license: LicenseMode,
    /// Slots (form fields, template variables, sheet bindings) that received a value.
    pub slots_written: usize,
    /// Post-processor names in the order they ran.
    pub post_processors: Vec<String>,
}

impl GenerationReport {
    pub(crate) fn warn(
        &mut self,
        code: WarningCode,
        subject: Option<&str>,
        message: impl Into<String>,
    ) {
        let warning = GenerationWarning {
            code,
            subject: subject.map(str::to_string),
            message: message.into(),
        };
        tracing::warn!(
            code = warning.code.as_str(),
            subject = warning.subject.as_deref().unwrap_or(""),
            "{}",
            warning.message
        );
        self.warnings.push(warning);
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    pub fn warnings_with(&self, code: WarningCode) -> impl Iterator<Item = &GenerationWarning> {
        self.warnings.iter().filter(move |warning| warning.code == code)
    }
}

/// Final bytes of one generation plus what happened on the way.
#[derive(Debug, Clone)]
pub struct GenerationOutput {
    pub bytes: Vec<u8>,
    pub report: GenerationReport,
}

#[derive(Debug, Clone)]
pub struct RenderedMarkup {
    pub text: String,
    pub report: GenerationReport,
}
