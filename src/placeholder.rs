use std::fmt;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::Serialize;

use crate::chart::{ChartPoint, ChartRenderer, ChartSpec, SvgBarChart, check_svg_document};
use crate::error::ResolveError;
use crate::locale::{DateFormat, Locale};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Text,
    Number,
    Date,
    Boolean,
    Collection,
    Composite,
    Graphic,
}

impl ValueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueKind::Text => "text",
            ValueKind::Number => "number",
            ValueKind::Date => "date",
            ValueKind::Boolean => "boolean",
            ValueKind::Collection => "collection",
            ValueKind::Composite => "composite",
            ValueKind::Graphic => "graphic",
        }
    }
}

/// Output of one placeholder resolution. Numbers, dates and composites are
/// already formatted into `Text` by the time they leave the placeholder.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedValue {
    Text(String),
    Flag(bool),
    /// Raw elements; templates iterate them, nothing is formatted here.
    Collection(Vec<serde_json::Value>),
    /// SVG markup.
    Graphic(String),
}

type Getter<T, V> = Box<dyn Fn(&T) -> Option<V> + Send + Sync>;
type CollectionGetter<T> =
    Box<dyn Fn(&T) -> Result<Vec<serde_json::Value>, ResolveError> + Send + Sync>;
type ComputedResolver<T> =
    Box<dyn Fn(&T, &Locale) -> Result<Option<ResolvedValue>, ResolveError> + Send + Sync>;

enum Resolver<T> {
    Text(Getter<T, String>),
    Number {
        get: Getter<T, f64>,
        decimals: usize,
        currency: Option<String>,
        locale: Option<Locale>,
    },
    Date {
        get: Getter<T, NaiveDate>,
        format: DateFormat,
        locale: Option<Locale>,
    },
    Flag(Getter<T, bool>),
    Collection(CollectionGetter<T>),
    Composite {
        number: Getter<T, f64>,
        text: Getter<T, String>,
        decimals: usize,
        locale: Option<Locale>,
    },
    Chart {
        points: Box<dyn Fn(&T) -> Vec<ChartPoint> + Send + Sync>,
        spec: ChartSpec,
        renderer: Arc<dyn ChartRenderer>,
    },
    Computed {
        kind: ValueKind,
        resolve: ComputedResolver<T>,
    },
}

/// A named, stateless resolver from one data item to a template value.
///
/// The name is the key into the template's slot space (form field name,
/// template variable, or sheet binding).
pub struct Placeholder<T> {
    name: String,
    resolver: Resolver<T>,
}

impl<T> Placeholder<T> {
    fn with_resolver(name: impl Into<String>, resolver: Resolver<T>) -> Self {
        Self {
            name: name.into(),
            resolver,
        }
    }

    pub fn text<S, F>(name: impl Into<String>, get: F) -> Self
    where
        S: Into<String>,
        F: Fn(&T) -> Option<S> + Send + Sync + 'static,
    {
        Self::with_resolver(name, Resolver::Text(Box::new(move |d| get(d).map(Into::into))))
    }

    pub fn number<F>(name: impl Into<String>, get: F, decimals: usize) -> Self
    where
        F: Fn(&T) -> Option<f64> + Send + Sync + 'static,
    {
        Self::with_resolver(
            name,
            Resolver::Number {
                get: Box::new(get),
                decimals,
                currency: None,
                locale: None,
            },
        )
    }

    /// Renders as `"<formatted number> <symbol>"`.
    pub fn currency<F>(
        name: impl Into<String>,
        get: F,
        symbol: impl Into<String>,
        decimals: usize,
    ) -> Self
    where
        F: Fn(&T) -> Option<f64> + Send + Sync + 'static,
    {
        Self::with_resolver(
            name,
            Resolver::Number {
                get: Box::new(get),
                decimals,
                currency: Some(symbol.into()),
                locale: None,
            },
        )
    }

    pub fn date<F>(name: impl Into<String>, get: F, format: DateFormat) -> Self
    where
        F: Fn(&T) -> Option<NaiveDate> + Send + Sync + 'static,
    {
        Self::with_resolver(
            name,
            Resolver::Date {
                get: Box::new(get),
                format,
                locale: None,
            },
        )
    }

    pub fn flag<F>(name: impl Into<String>, get: F) -> Self
    where
        F: Fn(&T) -> Option<bool> + Send + Sync + 'static,
    {
        Self::with_resolver(name, Resolver::Flag(Box::new(get)))
    }

    pub fn collection<E, F>(name: impl Into<String>, get: F) -> Self
    where
        E: Serialize,
        F: Fn(&T) -> &[E] + Send + Sync + 'static,
    {
        Self::with_resolver(
            name,
            Resolver::Collection(Box::new(move |d| {
                get(d)
                    .iter()
                    .map(|item| {
                        serde_json::to_value(item)
                            .map_err(|err| ResolveError::Collection(err.to_string()))
                    })
                    .collect()
            })),
        )
    }

    /// `"<formatted number> <text>"`, or no value when the number is absent.
    pub fn composite<N, S, X>(name: impl Into<String>, number: N, text: X, decimals: usize) -> Self
    where
        N: Fn(&T) -> Option<f64> + Send + Sync + 'static,
        S: Into<String>,
        X: Fn(&T) -> Option<S> + Send + Sync + 'static,
    {
        Self::with_resolver(
            name,
            Resolver::Composite {
                number: Box::new(number),
                text: Box::new(move |d| text(d).map(Into::into)),
                decimals,
                locale: None,
            },
        )
    }

    pub fn chart<F>(name: impl Into<String>, points: F, spec: ChartSpec) -> Self
    where
        F: Fn(&T) -> Vec<ChartPoint> + Send + Sync + 'static,
    {
        Self::chart_with_renderer(name, points, spec, Arc::new(SvgBarChart))
    }

    pub fn chart_with_renderer<F>(
        name: impl Into<String>,
        points: F,
        spec: ChartSpec,
        renderer: Arc<dyn ChartRenderer>,
    ) -> Self
    where
        F: Fn(&T) -> Vec<ChartPoint> + Send + Sync + 'static,
    {
        Self::with_resolver(
            name,
            Resolver::Chart {
                points: Box::new(points),
                spec,
                renderer,
            },
        )
    }

    /// Free-form resolver for values the typed constructors do not cover.
    pub fn computed<F>(name: impl Into<String>, kind: ValueKind, resolve: F) -> Self
    where
        F: Fn(&T, &Locale) -> Result<Option<ResolvedValue>, ResolveError> + Send + Sync + 'static,
    {
        Self::with_resolver(
            name,
            Resolver::Computed {
                kind,
                resolve: Box::new(resolve),
            },
        )
    }

    /// Locale that wins over the ambient one for number, date, composite and
    /// chart placeholders. Other kinds ignore it.
    pub fn with_locale(mut self, override_locale: Locale) -> Self {
        match &mut self.resolver {
            Resolver::Number { locale, .. }
            | Resolver::Date { locale, .. }
            | Resolver::Composite { locale, .. } => *locale = Some(override_locale),
            Resolver::Chart { spec, .. } => spec.locale = Some(override_locale),
            Resolver::Text(_)
            | Resolver::Flag(_)
            | Resolver::Collection(_)
            | Resolver::Computed { .. } => {}
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ValueKind {
        match &self.resolver {
            Resolver::Text(_) => ValueKind::Text,
            Resolver::Number { .. } => ValueKind::Number,
            Resolver::Date { .. } => ValueKind::Date,
            Resolver::Flag(_) => ValueKind::Boolean,
            Resolver::Collection(_) => ValueKind::Collection,
            Resolver::Composite { .. } => ValueKind::Composite,
            Resolver::Chart { .. } => ValueKind::Graphic,
            Resolver::Computed { kind, .. } => *kind,
        }
    }

    /// `Ok(None)` means "no value available": callers write nothing (or an
    /// empty string for form fields).
    pub fn resolve(&self, data: &T, ambient: &Locale) -> Result<Option<ResolvedValue>, ResolveError> {
        match &self.resolver {
            Resolver::Text(get) => Ok(get(data).map(ResolvedValue::Text)),
            Resolver::Number {
                get,
                decimals,
                currency,
                locale,
            } => {
                let Some(value) = get(data) else {
                    return Ok(None);
                };
                let locale = locale.as_ref().unwrap_or(ambient);
                let text = match currency {
                    Some(symbol) => locale.format_currency(value, symbol, *decimals)?,
                    None => locale.format_number(value, *decimals)?,
                };
                Ok(Some(ResolvedValue::Text(text)))
            }
            Resolver::Date {
                get,
                format,
                locale,
            } => {
                let Some(date) = get(data) else {
                    return Ok(None);
                };
                let locale = locale.as_ref().unwrap_or(ambient);
                Ok(Some(ResolvedValue::Text(locale.format_date(date, format)?)))
            }
            Resolver::Flag(get) => Ok(get(data).map(ResolvedValue::Flag)),
            Resolver::Collection(get) => Ok(Some(ResolvedValue::Collection(get(data)?))),
            Resolver::Composite {
                number,
                text,
                decimals,
                locale,
            } => {
                let Some(value) = number(data) else {
                    return Ok(None);
                };
                let locale = locale.as_ref().unwrap_or(ambient);
                let formatted = locale.format_number(value, *decimals)?;
                let rendered = match text(data) {
                    Some(suffix) if !suffix.is_empty() => format!("{formatted} {suffix}"),
                    _ => formatted,
                };
                Ok(Some(ResolvedValue::Text(rendered)))
            }
            Resolver::Chart {
                points,
                spec,
                renderer,
            } => {
                let locale = spec.locale.as_ref().unwrap_or(ambient);
                let markup = renderer.render(spec, &points(data), locale)?;
                check_svg_document(&markup)?;
                Ok(Some(ResolvedValue::Graphic(markup)))
            }
            Resolver::Computed { resolve, .. } => resolve(data, ambient),
        }
    }
}

impl<T> fmt::Debug for Placeholder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Placeholder")
            .field("name", &self.name)
            .field("kind", &self.kind())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locale::DatePreset;
    use serde_json::json;

    #[derive(Serialize)]
    struct Line {
        sku: &'static str,
        qty: u32,
    }

    struct Invoice {
        customer: String,
        total: Option<f64>,
        due: NaiveDate,
        paid: bool,
        weight: f64,
        unit: Option<String>,
        lines: Vec<Line>,
    }

    fn invoice() -> Invoice {
        Invoice {
            customer: "Ada Lovelace".to_string(),
            total: Some(1234.56),
            due: NaiveDate::from_ymd_opt(2025, 1, 10).expect("date"),
            paid: true,
            weight: 12.5,
            unit: Some("kg".to_string()),
            lines: vec![Line { sku: "A-1", qty: 2 }, Line { sku: "B-7", qty: 1 }],
        }
    }

    fn text(value: Option<ResolvedValue>) -> String {
        match value {
            Some(ResolvedValue::Text(s)) => s,
            other => panic!("expected text, got {other:?}"),
        }
    }

    #[test]
    fn text_and_flag_pass_through() {
        let inv = invoice();
        let name = Placeholder::text("customer", |i: &Invoice| Some(i.customer.clone()));
        assert_eq!(name.kind(), ValueKind::Text);
        assert_eq!(text(name.resolve(&inv, &Locale::en_us()).unwrap()), "Ada Lovelace");

        let paid = Placeholder::flag("paid", |i: &Invoice| Some(i.paid));
        assert_eq!(
            paid.resolve(&inv, &Locale::en_us()).unwrap(),
            Some(ResolvedValue::Flag(true))
        );
    }

    #[test]
    fn currency_uses_ambient_locale_unless_overridden() {
        let inv = invoice();
        let total = Placeholder::currency("total", |i: &Invoice| i.total, "€", 2);
        assert_eq!(text(total.resolve(&inv, &Locale::de_de()).unwrap()), "1.234,56 €");

        let pinned = Placeholder::currency("total", |i: &Invoice| i.total, "€", 2)
            .with_locale(Locale::en_us());
        assert_eq!(text(pinned.resolve(&inv, &Locale::de_de()).unwrap()), "1,234.56 €");
    }

    #[test]
    fn missing_number_resolves_to_none() {
        let mut inv = invoice();
        inv.total = None;
        let total = Placeholder::number("total", |i: &Invoice| i.total, 2);
        assert_eq!(total.resolve(&inv, &Locale::en_us()).unwrap(), None);
    }

    #[test]
    fn dates_follow_format_and_override() {
        let inv = invoice();
        let due = Placeholder::date("due", |i: &Invoice| Some(i.due), DateFormat::Default);
        assert_eq!(text(due.resolve(&inv, &Locale::it_it()).unwrap()), "10/01/2025");

        let iso = Placeholder::date(
            "due",
            |i: &Invoice| Some(i.due),
            DateFormat::Preset(DatePreset::Iso),
        )
        .with_locale(Locale::de_de());
        assert_eq!(text(iso.resolve(&inv, &Locale::en_us()).unwrap()), "2025-01-10");
    }

    #[test]
    fn composite_joins_number_and_text() {
        let inv = invoice();
        let weight = Placeholder::composite(
            "weight",
            |i: &Invoice| Some(i.weight),
            |i: &Invoice| i.unit.clone(),
            1,
        );
        assert_eq!(weight.kind(), ValueKind::Composite);
        assert_eq!(text(weight.resolve(&inv, &Locale::de_de()).unwrap()), "12,5 kg");

        let no_number = Placeholder::composite(
            "weight",
            |_: &Invoice| None,
            |i: &Invoice| i.unit.clone(),
            1,
        );
        assert_eq!(no_number.resolve(&inv, &Locale::de_de()).unwrap(), None);
    }

    #[test]
    fn collections_keep_raw_elements() {
        let inv = invoice();
        let lines = Placeholder::collection("lines", |i: &Invoice| i.lines.as_slice());
        assert_eq!(
            lines.resolve(&inv, &Locale::de_de()).unwrap(),
            Some(ResolvedValue::Collection(vec![
                json!({"sku": "A-1", "qty": 2}),
                json!({"sku": "B-7", "qty": 1}),
            ]))
        );
    }

    #[test]
    fn chart_renders_svg_with_override_locale() {
        let inv = invoice();
        let chart = Placeholder::chart(
            "qty_chart",
            |i: &Invoice| {
                i.lines
                    .iter()
                    .map(|l| ChartPoint::new(l.sku, f64::from(l.qty) * 1000.0))
                    .collect()
            },
            ChartSpec::default(),
        )
        .with_locale(Locale::de_de());
        match chart.resolve(&inv, &Locale::en_us()).unwrap() {
            Some(ResolvedValue::Graphic(svg)) => {
                assert!(svg.starts_with("<svg"));
                assert!(svg.contains(">2.000<"));
            }
            other => panic!("expected graphic, got {other:?}"),
        }
    }

    #[test]
    fn chart_rejects_non_svg_renderers() {
        struct HtmlRenderer;
        impl ChartRenderer for HtmlRenderer {
            fn render(
                &self,
                _spec: &ChartSpec,
                _points: &[ChartPoint],
                _locale: &Locale,
            ) -> Result<String, ResolveError> {
                Ok("<div>chart</div>".to_string())
            }
        }

        let chart = Placeholder::chart_with_renderer(
            "c",
            |_: &Invoice| Vec::new(),
            ChartSpec::default(),
            Arc::new(HtmlRenderer),
        );
        assert!(matches!(
            chart.resolve(&invoice(), &Locale::en_us()),
            Err(ResolveError::Chart(_))
        ));
    }

    #[test]
    fn computed_errors_surface() {
        let broken = Placeholder::computed("broken", ValueKind::Text, |_: &Invoice, _| {
            Err(ResolveError::custom("lookup failed"))
        });
        assert_eq!(broken.kind(), ValueKind::Text);
        assert_eq!(
            broken.resolve(&invoice(), &Locale::en_us()).unwrap_err(),
            ResolveError::custom("lookup failed")
        );
        assert_eq!(
            format!("{broken:?}"),
            "Placeholder { name: \"broken\", kind: Text }"
        );
    }
}
