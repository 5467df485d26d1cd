//! Markup templates rendered with minijinja, and the conversion seam to the
//! final output bytes.

use std::borrow::Cow;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use chrono::NaiveDate;
use minijinja::value::Value;
use minijinja::{Environment, ErrorKind};

use crate::assets::FilteringRetriever;
use crate::cancel::Cancellation;
use crate::error::{DocBindError, ResolveError};
use crate::locale::{DateFormat, DatePreset, Locale};
use crate::placeholder::{Placeholder, ResolvedValue};
use crate::policy::ResourceAccessPolicy;

pub const TRUNCATION_MARKER: &str = "…[truncated]";

/// Input handed to a [`MarkupConverter`].
pub struct ConversionRequest<'a> {
    pub text: &'a str,
    /// Directory relative asset references resolve against.
    pub base_path: Option<&'a Path>,
    pub policy: Option<&'a ResourceAccessPolicy>,
    pub cancellation: &'a Cancellation,
    /// Fetches assets through `policy`. Denials are recorded, not raised.
    pub retriever: &'a FilteringRetriever,
}

/// Turns rendered markup into the output document (usually HTML to PDF).
pub trait MarkupConverter: Send + Sync {
    fn convert(&self, request: &ConversionRequest<'_>) -> Result<Vec<u8>, DocBindError>;
}

fn filter_err(err: ResolveError) -> minijinja::Error {
    minijinja::Error::new(ErrorKind::InvalidOperation, err.to_string())
}

fn filter_locale(active: &Locale, tag: Option<String>) -> Result<Cow<'_, Locale>, minijinja::Error> {
    match tag {
        None => Ok(Cow::Borrowed(active)),
        Some(tag) => Locale::from_tag(&tag).map(Cow::Owned).ok_or_else(|| {
            minijinja::Error::new(ErrorKind::InvalidOperation, format!("unknown locale {tag:?}"))
        }),
    }
}

fn parse_date(raw: &str) -> Result<NaiveDate, minijinja::Error> {
    let head = raw.trim().get(..10).unwrap_or(raw.trim());
    NaiveDate::parse_from_str(head, "%Y-%m-%d").map_err(|err| {
        minijinja::Error::new(
            ErrorKind::InvalidOperation,
            format!("expected an ISO date, got {raw:?}: {err}"),
        )
    })
}

/// Environment with the locale-aware `number`, `currency`, `date` and
/// `date_preset` filters bound to `locale`.
pub(crate) fn environment(locale: &Locale) -> Environment<'static> {
    let mut env = Environment::new();

    let active = locale.clone();
    env.add_filter(
        "number",
        move |value: f64, decimals: Option<usize>, tag: Option<String>| {
            let locale = filter_locale(&active, tag)?;
            locale
                .format_number(value, decimals.unwrap_or(2))
                .map_err(filter_err)
        },
    );

    let active = locale.clone();
    env.add_filter(
        "currency",
        move |value: f64, symbol: String, decimals: Option<usize>, tag: Option<String>| {
            let locale = filter_locale(&active, tag)?;
            locale
                .format_currency(value, &symbol, decimals.unwrap_or(2))
                .map_err(filter_err)
        },
    );

    let active = locale.clone();
    env.add_filter(
        "date",
        move |value: String, pattern: Option<String>, tag: Option<String>| {
            let locale = filter_locale(&active, tag)?;
            let format = pattern.map(DateFormat::Pattern).unwrap_or_default();
            locale
                .format_date(parse_date(&value)?, &format)
                .map_err(filter_err)
        },
    );

    let active = locale.clone();
    env.add_filter(
        "date_preset",
        move |value: String, preset: String, tag: Option<String>| {
            let locale = filter_locale(&active, tag)?;
            let preset = DatePreset::from_str(&preset).ok_or_else(|| {
                minijinja::Error::new(
                    ErrorKind::InvalidOperation,
                    format!("unknown date preset {preset:?}"),
                )
            })?;
            locale
                .format_date(parse_date(&value)?, &DateFormat::Preset(preset))
                .map_err(filter_err)
        },
    );

    env
}

/// The render context has no notion of a claimed slot, so a repeated name
/// is an error here rather than a last-wins overwrite.
pub(crate) fn ensure_unique_names<T>(placeholders: &[Placeholder<T>]) -> Result<(), DocBindError> {
    let mut seen = HashSet::new();
    for placeholder in placeholders {
        if !seen.insert(placeholder.name()) {
            return Err(DocBindError::config(format!(
                "duplicate placeholder name {:?}",
                placeholder.name()
            )));
        }
    }
    Ok(())
}

pub(crate) fn template_value(value: Option<ResolvedValue>) -> Value {
    match value {
        None => Value::from(()),
        Some(ResolvedValue::Text(text)) => Value::from(text),
        Some(ResolvedValue::Flag(flag)) => Value::from(flag),
        Some(ResolvedValue::Collection(items)) => Value::from_serialize(&items),
        Some(ResolvedValue::Graphic(svg)) => Value::from_safe_string(svg),
    }
}

/// `name` selects auto-escaping: `.html`, `.htm` and `.xml` templates escape.
pub(crate) fn render(
    env: &Environment<'_>,
    name: &str,
    source: &str,
    context: BTreeMap<String, Value>,
) -> Result<String, DocBindError> {
    let template = env.template_from_named_str(name, source).map_err(|err| {
        if err.kind() == ErrorKind::SyntaxError {
            DocBindError::TemplateParse {
                name: name.to_string(),
                message: err.to_string(),
            }
        } else {
            DocBindError::TemplateRender(err.to_string())
        }
    })?;
    template
        .render(Value::from(context))
        .map_err(|err| DocBindError::TemplateRender(err.to_string()))
}

/// Cuts `text` to `max_chars` characters and appends [`TRUNCATION_MARKER`].
pub fn truncate_for_log(text: &str, max_chars: usize) -> Cow<'_, str> {
    match text.char_indices().nth(max_chars) {
        None => Cow::Borrowed(text),
        Some((cut, _)) => Cow::Owned(format!("{}{}", &text[..cut], TRUNCATION_MARKER)),
    }
}
