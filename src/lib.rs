//! Binds one typed data item to a document template (PDF form, markup, or
//! sheet) and produces the output bytes, formatted for a locale and passed
//! through an ordered post-processing chain.
//!
//! ```no_run
//! use docbind::{GenerationConfig, Generator, Locale, Placeholder};
//!
//! struct Invoice {
//!     customer: String,
//!     total: f64,
//! }
//!
//! # fn main() -> Result<(), docbind::DocBindError> {
//! let config = GenerationConfig::builder()
//!     .template_path("forms/invoice.pdf")
//!     .data(Invoice { customer: "Acme".into(), total: 1234.56 })
//!     .locale(Locale::de_de())
//!     .placeholder(Placeholder::text("customer", |i: &Invoice| Some(i.customer.clone())))
//!     .placeholder(Placeholder::currency("total", |i: &Invoice| Some(i.total), "€", 2))
//!     .flatten(true)
//!     .build();
//! let output = Generator::new().fill_form(config)?;
//! std::fs::write("invoice.pdf", &output.bytes)?;
//! # Ok(())
//! # }
//! ```

mod acroform;
mod assets;
mod cancel;
mod chart;
mod config;
mod debug;
mod error;
mod finalize;
mod generator;
mod license;
mod locale;
mod markup;
mod placeholder;
mod policy;
mod postprocess;
mod report;
mod scope;
mod sheet;

pub use acroform::{AcroFormBackend, AcroFormDocument, FormBackend, FormDocument, SlotValue};
pub use assets::{
    Asset, AssetBundle, AssetKind, AssetReference, FilteringRetriever, OfflineFetcher,
    ResourceFetcher, RetrievalIssue, collect_asset_references,
};
pub use cancel::Cancellation;
pub use chart::{ChartPoint, ChartRenderer, ChartSpec, SvgBarChart, check_svg_document};
pub use config::{
    DEFAULT_MAX_LOGGED_MARKUP_LEN, DiagnosticOptions, GenerationConfig, GenerationConfigBuilder,
};
pub use error::{DocBindError, PostProcessError, ResolveError, Result};
pub use finalize::{DigestSeal, InfoStamp};
pub use generator::Generator;
pub use license::{License, LicenseMode};
pub use locale::{DateFormat, DatePreset, Locale};
pub use markup::{ConversionRequest, MarkupConverter, TRUNCATION_MARKER, truncate_for_log};
pub use placeholder::{Placeholder, ResolvedValue, ValueKind};
pub use policy::ResourceAccessPolicy;
pub use postprocess::{FnPostProcessor, PostProcessor, PostProcessorChain, run_post_processors};
pub use report::{
    GenerationOutput, GenerationReport, GenerationWarning, RenderedMarkup, WarningCode,
};
pub use scope::{LocaleScope, current_locale};
pub use sheet::{CellValue, ColumnBinding, RowWriteMode, SheetBinding, SheetWriter};
