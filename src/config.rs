use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::cancel::Cancellation;
use crate::error::DocBindError;
use crate::locale::Locale;
use crate::placeholder::Placeholder;
use crate::policy::ResourceAccessPolicy;
use crate::postprocess::PostProcessor;

pub const DEFAULT_MAX_LOGGED_MARKUP_LEN: usize = 2000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticOptions {
    pub log_rendered_markup: bool,
    /// In characters. Always positive.
    pub max_logged_markup_len: usize,
    pub debug_log: Option<PathBuf>,
}

impl Default for DiagnosticOptions {
    fn default() -> Self {
        Self {
            log_rendered_markup: true,
            max_logged_markup_len: DEFAULT_MAX_LOGGED_MARKUP_LEN,
            debug_log: None,
        }
    }
}

/// Everything one generation needs. Built once, consumed once.
///
/// Nothing is cross-checked while the builder runs; [`GenerationConfig::validate`]
/// is called by the generator when the run starts.
pub struct GenerationConfig<T> {
    template_path: Option<PathBuf>,
    data: Option<T>,
    locale: Option<Locale>,
    placeholders: Vec<Placeholder<T>>,
    fields_to_remove: Vec<String>,
    flatten: bool,
    resource_policy: Option<Arc<ResourceAccessPolicy>>,
    base_path: Option<PathBuf>,
    post_processors: Vec<Box<dyn PostProcessor>>,
    license_path: Option<PathBuf>,
    cancellation: Cancellation,
    diagnostics: DiagnosticOptions,
}

impl<T> GenerationConfig<T> {
    pub fn builder() -> GenerationConfigBuilder<T> {
        GenerationConfigBuilder::new()
    }

    pub fn validate(&self) -> Result<(), DocBindError> {
        self.require_template_path()?;
        self.require_data()?;
        if self.placeholders.is_empty() {
            return Err(DocBindError::config("at least one placeholder is required"));
        }
        Ok(())
    }

    pub(crate) fn require_template_path(&self) -> Result<&Path, DocBindError> {
        match self.template_path.as_deref() {
            Some(path) if !path.as_os_str().is_empty() => Ok(path),
            _ => Err(DocBindError::config("template path is required")),
        }
    }

    pub(crate) fn require_data(&self) -> Result<&T, DocBindError> {
        self.data
            .as_ref()
            .ok_or_else(|| DocBindError::config("a data item is required"))
    }

    pub fn template_path(&self) -> Option<&Path> {
        self.template_path.as_deref()
    }

    pub fn data(&self) -> Option<&T> {
        self.data.as_ref()
    }

    pub fn locale(&self) -> Option<&Locale> {
        self.locale.as_ref()
    }

    pub fn placeholders(&self) -> &[Placeholder<T>] {
        &self.placeholders
    }

    pub fn fields_to_remove(&self) -> &[String] {
        &self.fields_to_remove
    }

    pub fn flatten(&self) -> bool {
        self.flatten
    }

    pub fn resource_policy(&self) -> Option<&Arc<ResourceAccessPolicy>> {
        self.resource_policy.as_ref()
    }

    /// Explicit base path, else the template's directory.
    pub fn base_path(&self) -> Option<&Path> {
        self.base_path
            .as_deref()
            .or_else(|| self.template_path.as_deref().and_then(Path::parent))
    }

    pub fn post_processors(&self) -> &[Box<dyn PostProcessor>] {
        &self.post_processors
    }

    pub fn license_path(&self) -> Option<&Path> {
        self.license_path.as_deref()
    }

    pub fn cancellation(&self) -> &Cancellation {
        &self.cancellation
    }

    pub fn diagnostics(&self) -> &DiagnosticOptions {
        &self.diagnostics
    }
}

pub struct GenerationConfigBuilder<T> {
    config: GenerationConfig<T>,
}

impl<T> Default for GenerationConfigBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> GenerationConfigBuilder<T> {
    pub fn new() -> Self {
        Self {
            config: GenerationConfig {
                template_path: None,
                data: None,
                locale: None,
                placeholders: Vec::new(),
                fields_to_remove: Vec::new(),
                flatten: false,
                resource_policy: None,
                base_path: None,
                post_processors: Vec::new(),
                license_path: None,
                cancellation: Cancellation::default(),
                diagnostics: DiagnosticOptions::default(),
            },
        }
    }

    pub fn template_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.template_path = Some(path.into());
        self
    }

    pub fn data(mut self, data: T) -> Self {
        self.config.data = Some(data);
        self
    }

    // Without a locale the ambient one (see LocaleScope) stays active.
    pub fn locale(mut self, locale: Locale) -> Self {
        self.config.locale = Some(locale);
        self
    }

    pub fn locale_tag(self, tag: &str) -> Result<Self, DocBindError> {
        let locale = Locale::from_tag(tag)
            .ok_or_else(|| DocBindError::config(format!("unknown locale tag {tag:?}")))?;
        Ok(self.locale(locale))
    }

    // Order matters: form fields written twice keep the later value.
    pub fn placeholder(mut self, placeholder: Placeholder<T>) -> Self {
        self.config.placeholders.push(placeholder);
        self
    }

    pub fn placeholders(mut self, placeholders: impl IntoIterator<Item = Placeholder<T>>) -> Self {
        self.config.placeholders.extend(placeholders);
        self
    }

    // Form path only.
    pub fn remove_field(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if !self.config.fields_to_remove.contains(&name) {
            self.config.fields_to_remove.push(name);
        }
        self
    }

    // Form path only.
    pub fn flatten(mut self, enabled: bool) -> Self {
        self.config.flatten = enabled;
        self
    }

    pub fn resource_policy(mut self, policy: Arc<ResourceAccessPolicy>) -> Self {
        self.config.resource_policy = Some(policy);
        self
    }

    pub fn base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.base_path = Some(path.into());
        self
    }

    pub fn post_processor(mut self, processor: impl PostProcessor + 'static) -> Self {
        self.config.post_processors.push(Box::new(processor));
        self
    }

    pub fn boxed_post_processor(mut self, processor: Box<dyn PostProcessor>) -> Self {
        self.config.post_processors.push(processor);
        self
    }

    pub fn license_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.license_path = Some(path.into());
        self
    }

    pub fn cancellation(mut self, cancellation: Cancellation) -> Self {
        self.config.cancellation = cancellation;
        self
    }

    // JSONL chain-of-custody log, one line per placeholder/field/step event.
    pub fn debug_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.diagnostics.debug_log = Some(path.into());
        self
    }

    pub fn log_rendered_markup(mut self, enabled: bool) -> Self {
        self.config.diagnostics.log_rendered_markup = enabled;
        self
    }

    /// Rejected right away when zero, unlike the template/data checks.
    pub fn max_logged_markup_len(mut self, chars: usize) -> Result<Self, DocBindError> {
        if chars == 0 {
            return Err(DocBindError::config(
                "max_logged_markup_len must be greater than zero",
            ));
        }
        self.config.diagnostics.max_logged_markup_len = chars;
        Ok(self)
    }

    pub fn build(self) -> GenerationConfig<T> {
        self.config
    }
}
