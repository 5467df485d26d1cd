use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use serde_json::{Value as JsonValue, json};

use crate::acroform::{AcroFormBackend, FormBackend, SlotValue};
use crate::assets::{FilteringRetriever, RetrievalIssue};
use crate::cancel::Cancellation;
use crate::config::GenerationConfig;
use crate::debug::DebugLogger;
use crate::error::DocBindError;
use crate::license::{License, LicenseMode};
use crate::locale::Locale;
use crate::markup::{self, ConversionRequest, MarkupConverter, truncate_for_log};
use crate::placeholder::{Placeholder, ResolvedValue};
use crate::postprocess::{PostProcessor, PostProcessorChain};
use crate::report::{GenerationOutput, GenerationReport, RenderedMarkup, WarningCode};
use crate::scope::LocaleScope;
use crate::sheet::{CellValue, SheetBinding, SheetWriter, rows_to_cells};

/// Runs generations. Holds no per-call state, so one generator can serve
/// concurrent calls on different threads.
pub struct Generator {
    form_backend: Arc<dyn FormBackend>,
}

impl Default for Generator {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-call bookkeeping: warnings, custody log, license outcome.
struct Run {
    context: &'static str,
    report: GenerationReport,
    logger: Option<DebugLogger>,
}

impl Run {
    fn begin<T>(context: &'static str, config: &GenerationConfig<T>) -> Result<Self, DocBindError> {
        config.cancellation().check()?;
        config.validate()?;
        let logger = match &config.diagnostics().debug_log {
            Some(path) => Some(DebugLogger::new(path)?),
            None => None,
        };
        let mut run = Self {
            context,
            report: GenerationReport::default(),
            logger,
        };
        run.report.license = run.load_license(config.license_path());
        let template = config
            .template_path()
            .map(|path| path.display().to_string())
            .unwrap_or_default();
        tracing::info!(
            context,
            template = %template,
            placeholders = config.placeholders().len(),
            licensed = run.report.license.is_licensed(),
            "generation started"
        );
        config.cancellation().check()?;
        Ok(run)
    }

    fn load_license(&mut self, path: Option<&Path>) -> LicenseMode {
        let Some(path) = path else {
            return LicenseMode::Unlicensed;
        };
        match License::load(path) {
            Ok(license) => {
                tracing::debug!(licensee = license.licensee(), "license loaded");
                license.mode()
            }
            Err(err) => {
                let subject = path.display().to_string();
                self.report.warn(
                    WarningCode::LicenseUnavailable,
                    Some(&subject),
                    format!("continuing unlicensed: {err}"),
                );
                LicenseMode::Unlicensed
            }
        }
    }

    fn event(&self, kind: &str, fields: JsonValue) {
        if let Some(logger) = &self.logger {
            logger.log_event(kind, fields);
        }
    }

    fn skip(&mut self, code: WarningCode, name: &str, message: String) {
        self.event("placeholder.skip", json!({ "name": name, "code": code.as_str() }));
        self.report.warn(code, Some(name), message);
    }

    /// `None` when resolution failed; the failure is already reported.
    fn resolve<T>(
        &mut self,
        placeholder: &Placeholder<T>,
        data: &T,
        locale: &Locale,
    ) -> Option<Option<ResolvedValue>> {
        match placeholder.resolve(data, locale) {
            Ok(value) => Some(value),
            Err(err) => {
                let name = placeholder.name();
                self.event(
                    "placeholder.error",
                    json!({ "name": name, "kind": placeholder.kind().as_str(), "error": err.to_string() }),
                );
                self.report.warn(
                    WarningCode::PlaceholderResolution,
                    Some(name),
                    format!("cannot resolve {name}: {err}"),
                );
                None
            }
        }
    }

    fn wrote(&mut self, placeholder: &str, slot: &str) {
        self.report.slots_written += 1;
        self.event("placeholder.write", json!({ "name": placeholder, "slot": slot }));
    }

    fn post_process(
        &mut self,
        bytes: Vec<u8>,
        processors: &[Box<dyn PostProcessor>],
        cancel: &Cancellation,
    ) -> Result<Vec<u8>, DocBindError> {
        let chain = PostProcessorChain::plan(processors)?;
        let names: Vec<String> = chain.step_names().into_iter().map(str::to_string).collect();
        let bytes = chain.run(bytes, cancel)?;
        for (position, name) in names.iter().enumerate() {
            self.event("postprocess.step", json!({ "position": position, "name": name }));
        }
        self.report.post_processors = names;
        Ok(bytes)
    }

    fn finish(self) -> GenerationReport {
        if let Some(logger) = &self.logger {
            logger.emit_summary(self.context);
            logger.flush();
        }
        tracing::info!(
            context = self.context,
            slots_written = self.report.slots_written,
            warnings = self.report.warnings.len(),
            "generation finished"
        );
        self.report
    }
}

impl Generator {
    pub fn new() -> Self {
        Self {
            form_backend: Arc::new(AcroFormBackend),
        }
    }

    pub fn with_form_backend(mut self, backend: Arc<dyn FormBackend>) -> Self {
        self.form_backend = backend;
        self
    }

    /// Populates a fixed-field form template.
    ///
    /// Bad placeholders, missing fields and unsupported values become
    /// warnings in the report; only configuration, template, serialization,
    /// post-processing failures and cancellation abort the call.
    pub fn fill_form<T>(&self, config: GenerationConfig<T>) -> Result<GenerationOutput, DocBindError> {
        let mut run = Run::begin("fill_form", &config)?;
        let cancel = config.cancellation();
        let data = config.require_data()?;
        let template_path = config.require_template_path()?;

        let scope = LocaleScope::enter(config.locale().cloned());
        let locale = scope.locale();

        let mut form = self.form_backend.open(template_path)?;
        cancel.check()?;

        for name in config.fields_to_remove() {
            if form.remove_slot(name)? {
                run.event("field.remove", json!({ "name": name }));
            } else {
                run.report.warn(
                    WarningCode::MissingRemovalField,
                    Some(name),
                    format!("no field named {name} to remove"),
                );
            }
        }
        cancel.check()?;

        let mut written: HashSet<&str> = HashSet::new();
        for placeholder in config.placeholders() {
            cancel.check()?;
            let name = placeholder.name();
            if !form.has_slot(name) {
                run.skip(
                    WarningCode::MissingSlot,
                    name,
                    format!("template has no field named {name}"),
                );
                continue;
            }
            let Some(value) = run.resolve(placeholder, data, &locale) else {
                continue;
            };
            let slot_value = match value {
                None => SlotValue::Text(String::new()),
                Some(ResolvedValue::Text(text)) => SlotValue::Text(text),
                Some(ResolvedValue::Flag(checked)) => SlotValue::Flag {
                    checked,
                    text: locale.flag_word(checked).to_string(),
                },
                Some(ResolvedValue::Collection(_) | ResolvedValue::Graphic(_)) => {
                    run.skip(
                        WarningCode::UnsupportedSlotValue,
                        name,
                        format!(
                            "form field {name} cannot hold a {} value",
                            placeholder.kind().as_str()
                        ),
                    );
                    continue;
                }
            };
            if !written.insert(name) {
                run.report.warn(
                    WarningCode::RepeatedSlotWrite,
                    Some(name),
                    format!("field {name} written again; the later placeholder wins"),
                );
            }
            match form.set_slot(name, &slot_value) {
                Ok(()) => run.wrote(name, name),
                Err(err) => run.skip(
                    WarningCode::SlotWriteFailed,
                    name,
                    format!("cannot write field {name}: {err}"),
                ),
            }
        }

        if config.flatten() {
            cancel.check()?;
            form.flatten()?;
            run.event("form.flatten", JsonValue::Null);
        }
        cancel.check()?;
        let bytes = form.to_bytes()?;
        scope.exit();

        let bytes = run.post_process(bytes, config.post_processors(), cancel)?;
        Ok(GenerationOutput {
            bytes,
            report: run.finish(),
        })
    }

    /// Renders a markup template to text without converting it.
    pub fn render_markup<T>(&self, config: GenerationConfig<T>) -> Result<RenderedMarkup, DocBindError> {
        let mut run = Run::begin("render_markup", &config)?;
        let scope = LocaleScope::enter(config.locale().cloned());
        let text = self.render_with(&config, &mut run, &scope.locale())?;
        scope.exit();
        Ok(RenderedMarkup {
            text,
            report: run.finish(),
        })
    }

    /// Renders, converts through `converter` with policy-filtered asset
    /// access, then post-processes.
    pub fn generate_from_markup<T>(
        &self,
        config: GenerationConfig<T>,
        converter: &dyn MarkupConverter,
    ) -> Result<GenerationOutput, DocBindError> {
        let mut run = Run::begin("generate_from_markup", &config)?;
        let cancel = config.cancellation();
        let scope = LocaleScope::enter(config.locale().cloned());
        let text = self.render_with(&config, &mut run, &scope.locale())?;
        cancel.check()?;

        let policy = config.resource_policy().cloned();
        let retriever = FilteringRetriever::new(policy.clone(), config.base_path());
        let request = ConversionRequest {
            text: &text,
            base_path: config.base_path(),
            policy: policy.as_deref(),
            cancellation: cancel,
            retriever: &retriever,
        };
        let bytes = converter.convert(&request)?;
        for issue in retriever.issues() {
            let kind = issue.kind().as_str();
            match issue {
                RetrievalIssue::Denied { uri, .. } => {
                    run.event("resource.denied", json!({ "uri": uri, "kind": kind }));
                    run.report.warn(
                        WarningCode::ResourceDenied,
                        Some(&uri),
                        format!("resource access policy denied the fetch; {kind} asset omitted"),
                    );
                }
                RetrievalIssue::Failed { uri, reason, .. } => run.report.warn(
                    WarningCode::ResourceUnavailable,
                    Some(&uri),
                    format!("{kind} asset omitted: {reason}"),
                ),
            }
        }
        cancel.check()?;
        scope.exit();

        let bytes = run.post_process(bytes, config.post_processors(), cancel)?;
        Ok(GenerationOutput {
            bytes,
            report: run.finish(),
        })
    }

    /// Writes placeholders into an opened sheet template. Placeholders
    /// without an entry in `bindings` target a range named after themselves.
    ///
    /// `writer` already holds the opened workbook, so the configured
    /// template path is never read here; it only identifies the workbook in
    /// logs and in the custody log's `sheet.open` event.
    pub fn fill_sheet<T>(
        &self,
        config: GenerationConfig<T>,
        writer: &mut dyn SheetWriter,
        bindings: &[SheetBinding],
    ) -> Result<GenerationOutput, DocBindError> {
        let mut run = Run::begin("fill_sheet", &config)?;
        let cancel = config.cancellation();
        let data = config.require_data()?;
        let template_path = config.require_template_path()?;
        run.event("sheet.open", json!({ "template": template_path.display().to_string() }));
        let scope = LocaleScope::enter(config.locale().cloned());
        let locale = scope.locale();

        let mut written: HashSet<String> = HashSet::new();
        for placeholder in config.placeholders() {
            cancel.check()?;
            let name = placeholder.name();
            let binding = bindings
                .iter()
                .find(|binding| binding.placeholder == name)
                .cloned()
                .unwrap_or_else(|| SheetBinding::new(name));
            if !writer.has_binding(&binding.range) {
                run.skip(
                    WarningCode::MissingSlot,
                    name,
                    format!("sheet has no binding named {}", binding.range),
                );
                continue;
            }
            let Some(value) = run.resolve(placeholder, data, &locale) else {
                continue;
            };
            if !written.insert(binding.range.clone()) {
                run.report.warn(
                    WarningCode::RepeatedSlotWrite,
                    Some(name),
                    format!("binding {} written again; the later placeholder wins", binding.range),
                );
            }
            let range = binding.range.as_str();
            let number_format = binding.number_format.as_deref();
            let outcome = match value {
                None => writer.bind_value(range, CellValue::Empty, None),
                Some(ResolvedValue::Text(text)) => {
                    writer.bind_value(range, CellValue::Text(text), number_format)
                }
                Some(ResolvedValue::Flag(flag)) => writer.bind_value(range, CellValue::Bool(flag), None),
                Some(ResolvedValue::Collection(rows)) => {
                    let columns = binding.effective_columns(&rows);
                    let cells = rows_to_cells(&rows, &columns);
                    writer.bind_rows(range, cells, &columns, binding.mode)
                }
                Some(ResolvedValue::Graphic(_)) => {
                    run.skip(
                        WarningCode::UnsupportedSlotValue,
                        name,
                        format!("sheet binding {range} cannot hold a graphic"),
                    );
                    continue;
                }
            };
            match outcome {
                Ok(()) => run.wrote(name, range),
                Err(err) if err.is_cancelled() => return Err(err),
                Err(err) => run.skip(
                    WarningCode::SlotWriteFailed,
                    name,
                    format!("cannot write binding {range}: {err}"),
                ),
            }
        }

        cancel.check()?;
        let bytes = writer.to_bytes()?;
        scope.exit();

        let bytes = run.post_process(bytes, config.post_processors(), cancel)?;
        Ok(GenerationOutput {
            bytes,
            report: run.finish(),
        })
    }

    fn render_with<T>(
        &self,
        config: &GenerationConfig<T>,
        run: &mut Run,
        locale: &Locale,
    ) -> Result<String, DocBindError> {
        let cancel = config.cancellation();
        markup::ensure_unique_names(config.placeholders())?;
        let data = config.require_data()?;
        let template_path = config.require_template_path()?;
        let source = std::fs::read_to_string(template_path).map_err(|err| {
            DocBindError::TemplateLoad {
                path: template_path.to_path_buf(),
                message: err.to_string(),
            }
        })?;
        cancel.check()?;

        let mut context = BTreeMap::new();
        for placeholder in config.placeholders() {
            cancel.check()?;
            let name = placeholder.name();
            let value = run.resolve(placeholder, data, locale).flatten();
            if value.is_some() {
                run.wrote(name, name);
            }
            context.insert(name.to_string(), markup::template_value(value));
        }

        let template_name = template_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "template".to_string());
        let env = markup::environment(locale);
        let text = markup::render(&env, &template_name, &source, context)?;

        let diagnostics = config.diagnostics();
        if diagnostics.log_rendered_markup {
            tracing::debug!(
                template = %template_name,
                chars = text.chars().count(),
                markup = %truncate_for_log(&text, diagnostics.max_logged_markup_len),
                "rendered markup"
            );
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acroform::tests::make_form_pdf_bytes;
    use crate::acroform::AcroFormDocument;
    use crate::error::ResolveError;
    use crate::finalize::{DigestSeal, InfoStamp};
    use crate::locale::{DateFormat, DatePreset};
    use crate::placeholder::ValueKind;
    use crate::policy::ResourceAccessPolicy;
    use crate::postprocess::FnPostProcessor;
    use crate::scope::current_locale;
    use crate::sheet::tests::RecordingSheet;
    use crate::sheet::{ColumnBinding, RowWriteMode};
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;
    use serde::Serialize;
    use std::path::PathBuf;

    #[derive(Serialize)]
    struct Line {
        sku: String,
        qty: u32,
    }

    struct Invoice {
        customer: String,
        city: String,
        total: f64,
        paid: bool,
        due: NaiveDate,
        lines: Vec<Line>,
    }

    fn invoice() -> Invoice {
        Invoice {
            customer: "Müller GmbH".to_string(),
            city: "Köln".to_string(),
            total: 1234.56,
            paid: true,
            due: NaiveDate::from_ymd_opt(2025, 1, 10).expect("date"),
            lines: vec![
                Line { sku: "A-1".to_string(), qty: 2 },
                Line { sku: "B-7".to_string(), qty: 1 },
            ],
        }
    }

    fn form_template(dir: &Path) -> PathBuf {
        let path = dir.join("invoice.pdf");
        std::fs::write(&path, make_form_pdf_bytes()).expect("write template");
        path
    }

    fn failing(name: &str) -> Placeholder<Invoice> {
        Placeholder::computed(name, ValueKind::Text, |_: &Invoice, _: &Locale| {
            Err(ResolveError::custom("upstream lookup failed"))
        })
    }

    fn reopen(bytes: &[u8]) -> AcroFormDocument {
        AcroFormDocument::from_bytes(bytes).expect("reopen output")
    }

    #[test]
    fn fill_form_writes_slots_and_tolerates_bad_placeholders() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = GenerationConfig::builder()
            .template_path(form_template(dir.path()))
            .data(invoice())
            .locale(Locale::de_de())
            .placeholder(Placeholder::text("customer", |i: &Invoice| Some(i.customer.clone())))
            .placeholder(failing("notes"))
            .placeholder(Placeholder::currency("total", |i: &Invoice| Some(i.total), "€", 2))
            .placeholder(Placeholder::text("address.city", |i: &Invoice| Some(i.city.clone())))
            .placeholder(Placeholder::flag("paid", |i: &Invoice| Some(i.paid)))
            .placeholder(Placeholder::text("vat_id", |_: &Invoice| Some("DE123")))
            .remove_field("ghost")
            .build();

        let output = Generator::new().fill_form(config).expect("generation");
        let form = reopen(&output.bytes);
        assert_eq!(form.slot_value("customer").as_deref(), Some("Müller GmbH"));
        assert_eq!(form.slot_value("total").as_deref(), Some("1.234,56 €"));
        assert_eq!(form.slot_value("address.city").as_deref(), Some("Köln"));
        assert_eq!(form.slot_value("paid").as_deref(), Some("Yes"));
        assert_eq!(form.slot_value("notes"), None);

        let report = &output.report;
        assert_eq!(report.slots_written, 4);
        assert_eq!(report.warnings_with(WarningCode::PlaceholderResolution).count(), 1);
        assert_eq!(report.warnings_with(WarningCode::MissingSlot).count(), 1);
        assert_eq!(report.warnings_with(WarningCode::MissingRemovalField).count(), 1);
        assert_eq!(report.license, LicenseMode::Unlicensed);
    }

    #[test]
    fn form_path_lets_the_later_duplicate_win() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = GenerationConfig::builder()
            .template_path(form_template(dir.path()))
            .data(invoice())
            .placeholder(Placeholder::text("customer", |_: &Invoice| Some("first")))
            .placeholder(Placeholder::text("customer", |_: &Invoice| Some("second")))
            .build();
        let output = Generator::new().fill_form(config).expect("generation");
        assert_eq!(reopen(&output.bytes).slot_value("customer").as_deref(), Some("second"));
        assert_eq!(
            output.report.warnings_with(WarningCode::RepeatedSlotWrite).count(),
            1
        );
    }

    #[test]
    fn removed_and_flattened_form_is_post_processed_in_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = GenerationConfig::builder()
            .template_path(form_template(dir.path()))
            .data(invoice())
            .placeholder(Placeholder::text("customer", |i: &Invoice| Some(i.customer.clone())))
            .remove_field("notes")
            .flatten(true)
            .post_processor(DigestSeal)
            .post_processor(InfoStamp::new().title("Invoice"))
            .build();
        let output = Generator::new().fill_form(config).expect("generation");
        assert_eq!(output.report.post_processors, vec!["info-stamp", "digest-seal"]);
        assert!(DigestSeal::verify(&output.bytes));
        assert!(matches!(
            AcroFormDocument::from_bytes(&output.bytes),
            Err(DocBindError::TemplateLoad { .. })
        ));
    }

    #[test]
    fn two_terminal_post_processors_fail_the_call() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = GenerationConfig::builder()
            .template_path(form_template(dir.path()))
            .data(invoice())
            .placeholder(Placeholder::text("customer", |i: &Invoice| Some(i.customer.clone())))
            .post_processor(DigestSeal)
            .post_processor(FnPostProcessor::terminal("sign", Ok))
            .build();
        let err = Generator::new().fill_form(config).unwrap_err();
        assert!(matches!(err, DocBindError::Configuration(_)));
    }

    #[test]
    fn configuration_is_validated_when_generation_starts() {
        let config = GenerationConfig::<Invoice>::builder()
            .template_path("unused.pdf")
            .data(invoice())
            .build();
        let err = Generator::new().fill_form(config).unwrap_err();
        assert!(err.to_string().contains("at least one placeholder"));
    }

    #[test]
    fn cancellation_is_honoured_between_placeholders() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cancel = Cancellation::new();
        let trip = cancel.clone();
        let config = GenerationConfig::builder()
            .template_path(form_template(dir.path()))
            .data(invoice())
            .cancellation(cancel)
            .placeholder(Placeholder::computed("customer", ValueKind::Text, move |_: &Invoice, _: &Locale| {
                trip.cancel();
                Ok(Some(ResolvedValue::Text("x".to_string())))
            }))
            .placeholder(Placeholder::text("total", |_: &Invoice| Some("1")))
            .build();
        let err = Generator::new().fill_form(config).unwrap_err();
        assert!(err.is_cancelled());

        let cancelled = Cancellation::new();
        cancelled.cancel();
        let config = GenerationConfig::builder()
            .template_path("never-opened.pdf")
            .data(invoice())
            .cancellation(cancelled)
            .placeholder(Placeholder::text("customer", |_: &Invoice| Some("x")))
            .build();
        assert!(Generator::new().fill_form(config).unwrap_err().is_cancelled());
    }

    #[test]
    fn locale_scope_wraps_the_run_and_is_restored_on_failure() {
        let before = current_locale();
        let dir = tempfile::tempdir().expect("tempdir");
        let config = GenerationConfig::builder()
            .template_path(form_template(dir.path()))
            .data(invoice())
            .locale(Locale::fr_fr())
            .placeholder(Placeholder::computed("customer", ValueKind::Text, |_: &Invoice, _: &Locale| {
                Ok(Some(ResolvedValue::Text(current_locale().tag().to_string())))
            }))
            .build();
        let output = Generator::new().fill_form(config).expect("generation");
        assert_eq!(reopen(&output.bytes).slot_value("customer").as_deref(), Some("fr-FR"));
        assert_eq!(current_locale(), before);

        let config = GenerationConfig::builder()
            .template_path(dir.path().join("missing.pdf"))
            .data(invoice())
            .locale(Locale::de_de())
            .placeholder(Placeholder::text("customer", |_: &Invoice| Some("x")))
            .build();
        let err = Generator::new().fill_form(config).unwrap_err();
        assert!(matches!(err, DocBindError::TemplateLoad { .. }));
        assert_eq!(current_locale(), before);
    }

    #[test]
    fn license_presence_sets_the_mode() {
        let dir = tempfile::tempdir().expect("tempdir");
        let template = form_template(dir.path());
        let license = dir.path().join("docbind.lic");
        std::fs::write(&license, "Acme Reporting Ltd\n").expect("license");

        let build = |license_path: PathBuf| {
            GenerationConfig::builder()
                .template_path(template.clone())
                .data(invoice())
                .license_path(license_path)
                .placeholder(Placeholder::text("customer", |_: &Invoice| Some("x")))
                .build()
        };
        let licensed = Generator::new().fill_form(build(license)).expect("licensed");
        assert!(licensed.report.license.is_licensed());
        assert!(!licensed.report.has_warnings());

        let unlicensed = Generator::new()
            .fill_form(build(dir.path().join("absent.lic")))
            .expect("unlicensed");
        assert_eq!(unlicensed.report.license, LicenseMode::Unlicensed);
        assert_eq!(
            unlicensed.report.warnings_with(WarningCode::LicenseUnavailable).count(),
            1
        );
    }

    #[test]
    fn custody_log_records_each_event() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log_path = dir.path().join("custody.jsonl");
        let config = GenerationConfig::builder()
            .template_path(form_template(dir.path()))
            .data(invoice())
            .debug_log(&log_path)
            .remove_field("notes")
            .placeholder(Placeholder::text("customer", |i: &Invoice| Some(i.customer.clone())))
            .placeholder(Placeholder::text("vat_id", |_: &Invoice| Some("x")))
            .placeholder(failing("total"))
            .post_processor(InfoStamp::new().producer("docbind"))
            .build();
        Generator::new().fill_form(config).expect("generation");

        let raw = std::fs::read_to_string(&log_path).expect("log");
        let kinds: Vec<String> = raw
            .lines()
            .map(|line| {
                let value: JsonValue = serde_json::from_str(line).expect("json");
                value["type"].as_str().unwrap_or_default().to_string()
            })
            .collect();
        assert_eq!(
            kinds,
            vec![
                "field.remove",
                "placeholder.write",
                "placeholder.skip",
                "placeholder.error",
                "postprocess.step",
                "debug.summary",
            ]
        );
    }

    fn write_markup(dir: &Path, name: &str, source: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, source).expect("write template");
        path
    }

    struct PrefetchingConverter;

    impl MarkupConverter for PrefetchingConverter {
        fn convert(&self, request: &ConversionRequest<'_>) -> Result<Vec<u8>, DocBindError> {
            request.cancellation.check()?;
            let bundle = request.retriever.prefetch(request.text);
            Ok(format!(
                "assets={} logo={}",
                bundle.assets.len(),
                bundle.get("logo.png").is_some()
            )
            .into_bytes())
        }
    }

    struct CrashingConverter;

    impl MarkupConverter for CrashingConverter {
        fn convert(&self, _request: &ConversionRequest<'_>) -> Result<Vec<u8>, DocBindError> {
            Err(DocBindError::Conversion("renderer crashed".to_string()))
        }
    }

    fn markup_placeholders() -> Vec<Placeholder<Invoice>> {
        vec![
            Placeholder::text("customer", |i: &Invoice| Some(i.customer.clone())),
            Placeholder::number("total", |i: &Invoice| Some(i.total), 2),
            Placeholder::date("due", |i: &Invoice| Some(i.due), DateFormat::Preset(DatePreset::Iso)),
            Placeholder::collection("lines", |i: &Invoice| i.lines.as_slice()),
        ]
    }

    #[test]
    fn render_markup_binds_placeholders_and_filters() {
        let dir = tempfile::tempdir().expect("tempdir");
        let template = write_markup(
            dir.path(),
            "invoice.html",
            "<p>{{ customer }} {{ total }} {{ due }}</p>\
             {% for l in lines %}<li>{{ l.sku }}</li>{% endfor %}\
             <p>{{ 99.5 | currency('€') }}</p>",
        );
        let config = GenerationConfig::builder()
            .template_path(template)
            .data(invoice())
            .locale(Locale::it_it())
            .placeholders(markup_placeholders())
            .max_logged_markup_len(16)
            .expect("length")
            .build();
        let rendered = Generator::new().render_markup(config).expect("render");
        assert_eq!(
            rendered.text,
            "<p>Müller GmbH 1.234,56 2025-01-10</p><li>A-1</li><li>B-7</li><p>99,50 €</p>"
        );
        assert_eq!(rendered.report.slots_written, 4);
    }

    #[test]
    fn markup_path_rejects_duplicate_names() {
        let dir = tempfile::tempdir().expect("tempdir");
        let template = write_markup(dir.path(), "invoice.txt", "{{ total }}");
        let config = GenerationConfig::builder()
            .template_path(template)
            .data(invoice())
            .placeholder(Placeholder::number("total", |i: &Invoice| Some(i.total), 2))
            .placeholder(Placeholder::number("total", |i: &Invoice| Some(i.total), 0))
            .build();
        let err = Generator::new().render_markup(config).unwrap_err();
        assert!(matches!(err, DocBindError::Configuration(_)));
        assert!(err.to_string().contains("duplicate placeholder name"));
    }

    #[test]
    fn markup_resolution_failure_renders_as_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        let template = write_markup(
            dir.path(),
            "note.txt",
            "{% if notes %}{{ notes }}{% else %}-{% endif %}",
        );
        let config = GenerationConfig::builder()
            .template_path(template)
            .data(invoice())
            .log_rendered_markup(false)
            .placeholder(failing("notes"))
            .build();
        let rendered = Generator::new().render_markup(config).expect("render");
        assert_eq!(rendered.text, "-");
        assert_eq!(
            rendered.report.warnings_with(WarningCode::PlaceholderResolution).count(),
            1
        );
    }

    #[test]
    fn generate_from_markup_filters_assets_through_the_policy() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("logo.png"), b"\x89PNG").expect("logo");
        let template = write_markup(
            dir.path(),
            "letter.html",
            "<img src=\"logo.png\"><img src=\"https://tracker.example.net/pixel.gif\"><p>{{ customer }}</p>",
        );
        let policy = Arc::new(ResourceAccessPolicy::new(["file"], Vec::<String>::new()).expect("policy"));
        let config = GenerationConfig::builder()
            .template_path(template)
            .data(invoice())
            .resource_policy(policy)
            .placeholder(Placeholder::text("customer", |i: &Invoice| Some(i.customer.clone())))
            .post_processor(FnPostProcessor::new("wrap", |mut bytes: Vec<u8>| {
                bytes.extend_from_slice(b"|wrapped");
                Ok(bytes)
            }))
            .build();

        let output = Generator::new()
            .generate_from_markup(config, &PrefetchingConverter)
            .expect("generation");
        assert_eq!(output.bytes, b"assets=1 logo=true|wrapped");
        let denied: Vec<_> = output.report.warnings_with(WarningCode::ResourceDenied).collect();
        assert_eq!(denied.len(), 1);
        assert_eq!(
            denied[0].subject.as_deref(),
            Some("https://tracker.example.net/pixel.gif")
        );
    }

    #[test]
    fn converter_failures_abort_the_call() {
        let dir = tempfile::tempdir().expect("tempdir");
        let template = write_markup(dir.path(), "t.txt", "{{ customer }}");
        let config = GenerationConfig::builder()
            .template_path(template)
            .data(invoice())
            .placeholder(Placeholder::text("customer", |_: &Invoice| Some("x")))
            .build();
        let err = Generator::new()
            .generate_from_markup(config, &CrashingConverter)
            .unwrap_err();
        assert!(matches!(err, DocBindError::Conversion(_)));
    }

    fn cancelling(name: &str, token: &Cancellation) -> Placeholder<Invoice> {
        let trip = token.clone();
        Placeholder::computed(name, ValueKind::Text, move |_: &Invoice, _: &Locale| {
            trip.cancel();
            Ok(Some(ResolvedValue::Text("x".to_string())))
        })
    }

    #[test]
    fn render_markup_honours_cancellation() {
        let dir = tempfile::tempdir().expect("tempdir");
        let template = write_markup(dir.path(), "t.txt", "{{ customer }} {{ total }}");
        let cancel = Cancellation::new();
        let config = GenerationConfig::builder()
            .template_path(template)
            .data(invoice())
            .cancellation(cancel.clone())
            .placeholder(cancelling("customer", &cancel))
            .placeholder(Placeholder::number("total", |i: &Invoice| Some(i.total), 2))
            .build();
        let err = Generator::new().render_markup(config).unwrap_err();
        assert!(err.is_cancelled());
    }

    struct CancellingConverter;

    impl MarkupConverter for CancellingConverter {
        fn convert(&self, request: &ConversionRequest<'_>) -> Result<Vec<u8>, DocBindError> {
            request.cancellation.cancel();
            Ok(request.text.as_bytes().to_vec())
        }
    }

    #[test]
    fn generate_from_markup_stops_at_checkpoints_around_conversion() {
        let dir = tempfile::tempdir().expect("tempdir");
        let template = write_markup(dir.path(), "t.txt", "{{ customer }}");

        let cancel = Cancellation::new();
        let config = GenerationConfig::builder()
            .template_path(template.clone())
            .data(invoice())
            .cancellation(cancel.clone())
            .placeholder(cancelling("customer", &cancel))
            .build();
        let err = Generator::new()
            .generate_from_markup(config, &CrashingConverter)
            .unwrap_err();
        assert!(err.is_cancelled(), "converter ran after cancellation: {err}");

        let config = GenerationConfig::builder()
            .template_path(template)
            .data(invoice())
            .placeholder(Placeholder::text("customer", |_: &Invoice| Some("x")))
            .post_processor(FnPostProcessor::new("reject", |_: Vec<u8>| {
                Err(crate::error::PostProcessError::new("post-processor ran after cancellation"))
            }))
            .build();
        let err = Generator::new()
            .generate_from_markup(config, &CancellingConverter)
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[test]
    fn resource_warnings_name_the_asset_kind() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log_path = dir.path().join("custody.jsonl");
        let template = write_markup(
            dir.path(),
            "page.html",
            "<link rel=\"stylesheet\" href=\"https://fonts.example.org/site.css\"><p>{{ customer }}</p>",
        );
        let policy = Arc::new(ResourceAccessPolicy::new(["file"], Vec::<String>::new()).expect("policy"));
        let config = GenerationConfig::builder()
            .template_path(template)
            .data(invoice())
            .resource_policy(policy)
            .debug_log(&log_path)
            .placeholder(Placeholder::text("customer", |i: &Invoice| Some(i.customer.clone())))
            .build();
        let output = Generator::new()
            .generate_from_markup(config, &PrefetchingConverter)
            .expect("generation");
        let denied: Vec<_> = output.report.warnings_with(WarningCode::ResourceDenied).collect();
        assert_eq!(denied.len(), 1);
        assert!(denied[0].message.contains("css asset omitted"));

        let raw = std::fs::read_to_string(&log_path).expect("log");
        let event = raw
            .lines()
            .map(|line| serde_json::from_str::<JsonValue>(line).expect("json"))
            .find(|value| value["type"] == "resource.denied")
            .expect("denied event");
        assert_eq!(event["kind"], "css");
    }

    #[test]
    fn fill_sheet_logs_the_workbook_it_was_handed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log_path = dir.path().join("custody.jsonl");
        let mut sheet = RecordingSheet::with_ranges(&["customer"]);
        let config = GenerationConfig::builder()
            .template_path("reports/q1.xlsx")
            .data(invoice())
            .debug_log(&log_path)
            .placeholder(Placeholder::text("customer", |i: &Invoice| Some(i.customer.clone())))
            .build();
        Generator::new()
            .fill_sheet(config, &mut sheet, &[])
            .expect("generation");

        let raw = std::fs::read_to_string(&log_path).expect("log");
        let first: JsonValue = serde_json::from_str(raw.lines().next().expect("line")).expect("json");
        assert_eq!(first["type"], "sheet.open");
        assert_eq!(first["template"], "reports/q1.xlsx");
    }

    #[test]
    fn fill_sheet_binds_values_and_rows() {
        let mut sheet = RecordingSheet::with_ranges(&["Customer", "lines", "paid"]);
        let bindings = vec![
            SheetBinding::new("customer").range("Customer").number_format("@"),
            SheetBinding::new("lines")
                .mode(RowWriteMode::Overwrite)
                .column(ColumnBinding::new("sku"))
                .column(ColumnBinding::new("qty").number_format("0")),
        ];
        let config = GenerationConfig::builder()
            .template_path("report.xlsx")
            .data(invoice())
            .placeholder(Placeholder::text("customer", |i: &Invoice| Some(i.customer.clone())))
            .placeholder(Placeholder::collection("lines", |i: &Invoice| i.lines.as_slice()))
            .placeholder(Placeholder::flag("paid", |i: &Invoice| Some(i.paid)))
            .placeholder(Placeholder::text("missing_range", |_: &Invoice| Some("x")))
            .build();

        let output = Generator::new()
            .fill_sheet(config, &mut sheet, &bindings)
            .expect("generation");
        assert_eq!(output.report.slots_written, 3);
        assert_eq!(output.report.warnings_with(WarningCode::MissingSlot).count(), 1);
        assert_eq!(
            sheet.values["Customer"],
            (CellValue::Text("Müller GmbH".into()), Some("@".to_string()))
        );
        assert_eq!(sheet.values["paid"].0, CellValue::Bool(true));
        let (rows, keys, mode) = &sheet.rows["lines"];
        assert_eq!(keys, &vec!["sku".to_string(), "qty".to_string()]);
        assert_eq!(*mode, RowWriteMode::Overwrite);
        assert_eq!(
            rows[1],
            vec![CellValue::Text("B-7".into()), CellValue::Number(1.0)]
        );
        assert!(String::from_utf8_lossy(&output.bytes).contains("lines=<2 rows>"));
    }
}
