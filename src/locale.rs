use std::fmt::Write as _;

use chrono::NaiveDate;
use chrono::format::{Item, StrftimeItems};

use crate::error::ResolveError;

const EN_MONTHS: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];
const DE_MONTHS: [&str; 12] = [
    "Januar",
    "Februar",
    "März",
    "April",
    "Mai",
    "Juni",
    "Juli",
    "August",
    "September",
    "Oktober",
    "November",
    "Dezember",
];
const FR_MONTHS: [&str; 12] = [
    "janvier",
    "février",
    "mars",
    "avril",
    "mai",
    "juin",
    "juillet",
    "août",
    "septembre",
    "octobre",
    "novembre",
    "décembre",
];
const IT_MONTHS: [&str; 12] = [
    "gennaio",
    "febbraio",
    "marzo",
    "aprile",
    "maggio",
    "giugno",
    "luglio",
    "agosto",
    "settembre",
    "ottobre",
    "novembre",
    "dicembre",
];
const ES_MONTHS: [&str; 12] = [
    "enero",
    "febrero",
    "marzo",
    "abril",
    "mayo",
    "junio",
    "julio",
    "agosto",
    "septiembre",
    "octubre",
    "noviembre",
    "diciembre",
];
const NL_MONTHS: [&str; 12] = [
    "januari",
    "februari",
    "maart",
    "april",
    "mei",
    "juni",
    "juli",
    "augustus",
    "september",
    "oktober",
    "november",
    "december",
];

/// Number, date and boolean conventions for one culture.
///
/// Values are plain data: a locale can be cloned into a configuration, a
/// placeholder override, or a template filter without any process-wide
/// state. [`crate::LocaleScope`] layers the thread-ambient default on top.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locale {
    tag: String,
    decimal_separator: char,
    group_separator: Option<char>,
    short_date: String,
    long_date: String,
    month_year: String,
    months: Vec<String>,
    yes: String,
    no: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatePreset {
    Iso,
    Short,
    Long,
    MonthYear,
}

impl DatePreset {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatePreset::Iso => "iso",
            DatePreset::Short => "short",
            DatePreset::Long => "long",
            DatePreset::MonthYear => "month-year",
        }
    }

    pub fn from_str(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "iso" => Some(DatePreset::Iso),
            "short" => Some(DatePreset::Short),
            "long" => Some(DatePreset::Long),
            "month-year" | "monthyear" | "month_year" => Some(DatePreset::MonthYear),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DateFormat {
    /// The locale's short (day/month/year style) pattern.
    #[default]
    Default,
    Preset(DatePreset),
    /// A `chrono` strftime pattern. `%B`/`%b` use the locale's month names.
    Pattern(String),
}

impl Locale {
    fn preset(
        tag: &str,
        decimal_separator: char,
        group_separator: char,
        short_date: &str,
        long_date: &str,
        month_year: &str,
        months: &[&str; 12],
        yes: &str,
        no: &str,
    ) -> Self {
        Self {
            tag: tag.to_string(),
            decimal_separator,
            group_separator: Some(group_separator),
            short_date: short_date.to_string(),
            long_date: long_date.to_string(),
            month_year: month_year.to_string(),
            months: months.iter().map(|m| m.to_string()).collect(),
            yes: yes.to_string(),
            no: no.to_string(),
        }
    }

    pub fn invariant() -> Self {
        Self::preset(
            "", '.', ',', "%m/%d/%Y", "%d %B %Y", "%B %Y", &EN_MONTHS, "Yes", "No",
        )
    }

    pub fn en_us() -> Self {
        Self::preset(
            "en-US", '.', ',', "%m/%d/%Y", "%B %-d, %Y", "%B %Y", &EN_MONTHS, "Yes", "No",
        )
    }

    pub fn en_gb() -> Self {
        Self::preset(
            "en-GB", '.', ',', "%d/%m/%Y", "%-d %B %Y", "%B %Y", &EN_MONTHS, "Yes", "No",
        )
    }

    pub fn de_de() -> Self {
        Self::preset(
            "de-DE", ',', '.', "%d.%m.%Y", "%-d. %B %Y", "%B %Y", &DE_MONTHS, "Ja", "Nein",
        )
    }

    pub fn fr_fr() -> Self {
        Self::preset(
            "fr-FR", ',', '\u{202f}', "%d/%m/%Y", "%-d %B %Y", "%B %Y", &FR_MONTHS, "Oui", "Non",
        )
    }

    pub fn it_it() -> Self {
        Self::preset(
            "it-IT", ',', '.', "%d/%m/%Y", "%-d %B %Y", "%B %Y", &IT_MONTHS, "Sì", "No",
        )
    }

    pub fn es_es() -> Self {
        Self::preset(
            "es-ES", ',', '.', "%d/%m/%Y", "%-d de %B de %Y", "%B de %Y", &ES_MONTHS, "Sí", "No",
        )
    }

    pub fn nl_nl() -> Self {
        Self::preset(
            "nl-NL", ',', '.', "%d-%m-%Y", "%-d %B %Y", "%B %Y", &NL_MONTHS, "Ja", "Nee",
        )
    }

    /// Looks up a built-in locale by BCP-47 style tag (`de-DE`, `de_de`, `de`).
    pub fn from_tag(tag: &str) -> Option<Self> {
        let normalized = tag.trim().replace('_', "-").to_ascii_lowercase();
        let exact = match normalized.as_str() {
            "" | "invariant" => Some(Self::invariant()),
            "en-us" => Some(Self::en_us()),
            "en-gb" => Some(Self::en_gb()),
            "de-de" => Some(Self::de_de()),
            "fr-fr" => Some(Self::fr_fr()),
            "it-it" => Some(Self::it_it()),
            "es-es" => Some(Self::es_es()),
            "nl-nl" => Some(Self::nl_nl()),
            _ => None,
        };
        if exact.is_some() {
            return exact;
        }
        let language = normalized.split('-').next().unwrap_or_default();
        match language {
            "en" => Some(Self::en_us()),
            "de" => Some(Self::de_de()),
            "fr" => Some(Self::fr_fr()),
            "it" => Some(Self::it_it()),
            "es" => Some(Self::es_es()),
            "nl" => Some(Self::nl_nl()),
            _ => None,
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn decimal_separator(&self) -> char {
        self.decimal_separator
    }

    pub fn group_separator(&self) -> Option<char> {
        self.group_separator
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }

    pub fn with_decimal_separator(mut self, separator: char) -> Self {
        self.decimal_separator = separator;
        self
    }

    pub fn with_group_separator(mut self, separator: Option<char>) -> Self {
        self.group_separator = separator;
        self
    }

    pub fn with_short_date(mut self, pattern: impl Into<String>) -> Self {
        self.short_date = pattern.into();
        self
    }

    pub fn with_long_date(mut self, pattern: impl Into<String>) -> Self {
        self.long_date = pattern.into();
        self
    }

    pub fn with_flag_words(mut self, yes: impl Into<String>, no: impl Into<String>) -> Self {
        self.yes = yes.into();
        self.no = no.into();
        self
    }

    pub fn flag_word(&self, value: bool) -> &str {
        if value { &self.yes } else { &self.no }
    }

    /// Fixed-point rendering with grouped thousands, e.g. `1.234,56` for de-DE.
    pub fn format_number(&self, value: f64, decimals: usize) -> Result<String, ResolveError> {
        if !value.is_finite() {
            return Err(ResolveError::NonFinite(value));
        }
        let raw = round_half_away(value.abs(), decimals);
        let (int_part, frac_part) = match raw.split_once('.') {
            Some((i, f)) => (i, Some(f)),
            None => (raw.as_str(), None),
        };

        let mut out = String::with_capacity(raw.len() + raw.len() / 3 + 1);
        let is_zero = raw.bytes().all(|b| b == b'0' || b == b'.');
        if value.is_sign_negative() && !is_zero {
            out.push('-');
        }
        let digits = int_part.len();
        for (idx, ch) in int_part.chars().enumerate() {
            if idx > 0 && (digits - idx) % 3 == 0 {
                if let Some(sep) = self.group_separator {
                    out.push(sep);
                }
            }
            out.push(ch);
        }
        if let Some(frac) = frac_part {
            out.push(self.decimal_separator);
            out.push_str(frac);
        }
        Ok(out)
    }

    /// `"<formatted number> <symbol>"`; the symbol always trails.
    pub fn format_currency(
        &self,
        value: f64,
        symbol: &str,
        decimals: usize,
    ) -> Result<String, ResolveError> {
        let number = self.format_number(value, decimals)?;
        if symbol.is_empty() {
            return Ok(number);
        }
        Ok(format!("{number} {symbol}"))
    }

    pub fn format_date(&self, date: NaiveDate, format: &DateFormat) -> Result<String, ResolveError> {
        let pattern = match format {
            DateFormat::Default | DateFormat::Preset(DatePreset::Short) => self.short_date.as_str(),
            DateFormat::Preset(DatePreset::Iso) => "%Y-%m-%d",
            DateFormat::Preset(DatePreset::Long) => self.long_date.as_str(),
            DateFormat::Preset(DatePreset::MonthYear) => self.month_year.as_str(),
            DateFormat::Pattern(pattern) => pattern.as_str(),
        };
        self.format_date_pattern(date, pattern)
    }

    fn format_date_pattern(&self, date: NaiveDate, pattern: &str) -> Result<String, ResolveError> {
        let localized = self.localize_month_names(date, pattern);
        let items: Vec<Item<'_>> = StrftimeItems::new(&localized).collect();
        if items.iter().any(|item| matches!(item, Item::Error)) {
            return Err(ResolveError::DatePattern {
                pattern: pattern.to_string(),
            });
        }
        let mut out = String::new();
        write!(out, "{}", date.format_with_items(items.into_iter())).map_err(|_| {
            ResolveError::DatePattern {
                pattern: pattern.to_string(),
            }
        })?;
        Ok(out)
    }

    fn localize_month_names(&self, date: NaiveDate, pattern: &str) -> String {
        use chrono::Datelike;

        let Some(month) = self.months.get(date.month0() as usize) else {
            return pattern.to_string();
        };
        let short: String = month.chars().take(3).collect();
        let mut out = String::with_capacity(pattern.len() + month.len());
        let mut chars = pattern.chars().peekable();
        while let Some(ch) = chars.next() {
            if ch != '%' {
                out.push(ch);
                continue;
            }
            match chars.peek() {
                Some('B') => {
                    chars.next();
                    out.push_str(&month.replace('%', "%%"));
                }
                Some('b') => {
                    chars.next();
                    out.push_str(&short.replace('%', "%%"));
                }
                Some(other) => {
                    out.push('%');
                    out.push(*other);
                    chars.next();
                }
                None => out.push('%'),
            }
        }
        out
    }
}

impl Default for Locale {
    fn default() -> Self {
        Self::invariant()
    }
}

/// Fixed-point digits of a non-negative `value`, rounded half away from
/// zero at `decimals` places.
fn round_half_away(value: f64, decimals: usize) -> String {
    // Above 2^53 every f64 is an integer and carries no fraction to round.
    const EXACT_LIMIT: f64 = 9_007_199_254_740_992.0;
    let scaled = i32::try_from(decimals)
        .ok()
        .map(|exp| value * 10f64.powi(exp))
        .filter(|scaled| scaled.is_finite() && *scaled < EXACT_LIMIT);
    let Some(scaled) = scaled else {
        return format!("{:.*}", decimals, value);
    };
    let digits = format!("{:0>width$}", scaled.round() as u64, width = decimals + 1);
    if decimals == 0 {
        return digits;
    }
    let (int_part, frac_part) = digits.split_at(digits.len() - decimals);
    format!("{int_part}.{frac_part}")
}
