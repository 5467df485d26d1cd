use std::fmt::Write as _;

use crate::error::ResolveError;
use crate::locale::Locale;

#[derive(Debug, Clone, PartialEq)]
pub struct ChartPoint {
    pub label: String,
    pub value: f64,
}

impl ChartPoint {
    pub fn new(label: impl Into<String>, value: f64) -> Self {
        Self {
            label: label.into(),
            value,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChartSpec {
    pub title: Option<String>,
    pub width: u32,
    pub height: u32,
    pub decimals: usize,
    pub locale: Option<Locale>,
}

impl Default for ChartSpec {
    fn default() -> Self {
        Self {
            title: None,
            width: 480,
            height: 240,
            decimals: 0,
            locale: None,
        }
    }
}

/// Turns label/value pairs into vector-graphic markup.
pub trait ChartRenderer: Send + Sync {
    fn render(
        &self,
        spec: &ChartSpec,
        points: &[ChartPoint],
        locale: &Locale,
    ) -> Result<String, ResolveError>;
}

/// Minimal SVG bar chart: one bar per point, value captions and axis ticks
/// formatted with the effective locale.
#[derive(Debug, Clone, Copy, Default)]
pub struct SvgBarChart;

const MARGIN_LEFT: f64 = 56.0;
const MARGIN_RIGHT: f64 = 12.0;
const MARGIN_TOP: f64 = 28.0;
const MARGIN_BOTTOM: f64 = 32.0;

impl ChartRenderer for SvgBarChart {
    fn render(
        &self,
        spec: &ChartSpec,
        points: &[ChartPoint],
        locale: &Locale,
    ) -> Result<String, ResolveError> {
        if spec.width == 0 || spec.height == 0 {
            return Err(ResolveError::Chart("chart size must be positive".to_string()));
        }
        if let Some(bad) = points.iter().find(|p| !p.value.is_finite()) {
            return Err(ResolveError::NonFinite(bad.value));
        }

        let width = spec.width as f64;
        let height = spec.height as f64;
        let plot_w = (width - MARGIN_LEFT - MARGIN_RIGHT).max(1.0);
        let plot_h = (height - MARGIN_TOP - MARGIN_BOTTOM).max(1.0);
        let hi = points.iter().map(|p| p.value).fold(0.0_f64, f64::max);
        let lo = points.iter().map(|p| p.value).fold(0.0_f64, f64::min);
        let span = if hi - lo > 0.0 { hi - lo } else { 1.0 };
        let y_of = |v: f64| MARGIN_TOP + (hi - v) / span * plot_h;
        let baseline = y_of(0.0);

        let mut svg = String::new();
        let _ = write!(
            svg,
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}">"#,
            w = spec.width,
            h = spec.height
        );
        if let Some(title) = spec.title.as_deref() {
            let _ = write!(
                svg,
                r#"<text x="{:.1}" y="18" text-anchor="middle" font-size="14">{}</text>"#,
                width / 2.0,
                xml_escape(title)
            );
        }

        for tick in [lo, (lo + hi) / 2.0, hi] {
            let y = y_of(tick);
            let _ = write!(
                svg,
                r##"<line x1="{x1:.1}" y1="{y:.1}" x2="{x2:.1}" y2="{y:.1}" stroke="#dddddd"/><text x="{tx:.1}" y="{ty:.1}" text-anchor="end" font-size="10">{label}</text>"##,
                x1 = MARGIN_LEFT,
                x2 = MARGIN_LEFT + plot_w,
                tx = MARGIN_LEFT - 4.0,
                ty = y + 3.0,
                label = xml_escape(&locale.format_number(tick, spec.decimals)?)
            );
        }

        if !points.is_empty() {
            let slot = plot_w / points.len() as f64;
            let bar_w = slot * 0.7;
            for (idx, point) in points.iter().enumerate() {
                let x = MARGIN_LEFT + slot * idx as f64 + (slot - bar_w) / 2.0;
                let top = y_of(point.value).min(baseline);
                let bar_h = (y_of(point.value) - baseline).abs();
                let _ = write!(
                    svg,
                    r##"<rect x="{x:.1}" y="{top:.1}" width="{bar_w:.1}" height="{bar_h:.1}" fill="#4a78b5"/>"##
                );
                let _ = write!(
                    svg,
                    r#"<text x="{cx:.1}" y="{vy:.1}" text-anchor="middle" font-size="10">{value}</text><text x="{cx:.1}" y="{ly:.1}" text-anchor="middle" font-size="10">{label}</text>"#,
                    cx = x + bar_w / 2.0,
                    vy = top - 3.0,
                    ly = height - MARGIN_BOTTOM + 14.0,
                    value = xml_escape(&locale.format_number(point.value, spec.decimals)?),
                    label = xml_escape(&point.label)
                );
            }
        }

        let _ = write!(
            svg,
            r##"<line x1="{x1:.1}" y1="{y:.1}" x2="{x2:.1}" y2="{y:.1}" stroke="#333333"/></svg>"##,
            x1 = MARGIN_LEFT,
            x2 = MARGIN_LEFT + plot_w,
            y = baseline
        );
        Ok(svg)
    }
}

/// Accepts only well-formed documents whose root element is `<svg>`.
pub fn check_svg_document(markup: &str) -> Result<(), ResolveError> {
    let doc = roxmltree::Document::parse(markup)
        .map_err(|err| ResolveError::Chart(format!("renderer produced invalid markup: {err}")))?;
    let root = doc.root_element();
    if root.tag_name().name() != "svg" {
        return Err(ResolveError::Chart(format!(
            "renderer produced <{}> instead of <svg>",
            root.tag_name().name()
        )));
    }
    Ok(())
}

pub(crate) fn xml_escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + 8);
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sales() -> Vec<ChartPoint> {
        vec![
            ChartPoint::new("Q1", 1250.0),
            ChartPoint::new("Q2 & Q3", 2400.5),
            ChartPoint::new("Q4", 0.0),
        ]
    }

    #[test]
    fn bar_chart_is_well_formed_svg() {
        let spec = ChartSpec {
            title: Some("Sales <2025>".to_string()),
            ..ChartSpec::default()
        };
        let svg = SvgBarChart
            .render(&spec, &sales(), &Locale::en_us())
            .expect("render");
        check_svg_document(&svg).expect("svg root");
        assert!(svg.contains("Sales &lt;2025&gt;"));
        assert!(svg.contains("Q2 &amp; Q3"));
        assert_eq!(svg.matches("<rect").count(), 3);
    }

    #[test]
    fn captions_use_the_given_locale() {
        let spec = ChartSpec {
            decimals: 1,
            ..ChartSpec::default()
        };
        let svg = SvgBarChart
            .render(&spec, &sales(), &Locale::de_de())
            .expect("render");
        assert!(svg.contains(">2.400,5<"));
        assert!(svg.contains(">1.250,0<"));
    }

    #[test]
    fn non_finite_points_fail() {
        let err = SvgBarChart
            .render(
                &ChartSpec::default(),
                &[ChartPoint::new("bad", f64::INFINITY)],
                &Locale::en_us(),
            )
            .unwrap_err();
        assert!(matches!(err, ResolveError::NonFinite(_)));
    }

    #[test]
    fn svg_check_rejects_other_roots() {
        assert!(check_svg_document("<html/>").is_err());
        assert!(check_svg_document("<svg").is_err());
        assert!(check_svg_document(r#"<svg xmlns="http://www.w3.org/2000/svg"/>"#).is_ok());
    }
}
