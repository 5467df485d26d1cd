use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, Mutex};

use base64::Engine;
use kuchiki::traits::TendrilSink;
use percent_encoding::percent_decode_str;
use url::Url;

use crate::policy::ResourceAccessPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    Css,
    Font,
    Image,
    Svg,
    Other,
}

impl AssetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetKind::Css => "css",
            AssetKind::Font => "font",
            AssetKind::Image => "image",
            AssetKind::Svg => "svg",
            AssetKind::Other => "other",
        }
    }

    fn guess(reference: &str, declared: AssetKind) -> Self {
        let path = reference.split(['?', '#']).next().unwrap_or(reference);
        let ext = path.rsplit_once('.').map(|(_, e)| e.to_ascii_lowercase());
        match ext.as_deref() {
            Some("svg") => AssetKind::Svg,
            Some("css") => AssetKind::Css,
            Some("ttf" | "otf" | "woff" | "woff2") => AssetKind::Font,
            _ if reference.starts_with("data:image/svg") => AssetKind::Svg,
            _ => declared,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Asset {
    pub name: String,
    pub kind: AssetKind,
    pub data: Vec<u8>,
    pub source: Option<String>,
    pub trusted: bool,
}

impl Asset {
    pub fn new(
        name: String,
        kind: AssetKind,
        data: Vec<u8>,
        source: Option<String>,
        trusted: bool,
    ) -> Self {
        Self {
            name,
            kind,
            data,
            source,
            trusted,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AssetBundle {
    pub assets: Vec<Asset>,
}

impl AssetBundle {
    pub fn add(&mut self, asset: Asset) {
        self.assets.push(asset);
    }

    pub fn get(&self, name: &str) -> Option<&Asset> {
        self.assets.iter().find(|asset| asset.name == name)
    }
}

/// An external asset referenced from rendered markup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetReference {
    pub reference: String,
    pub kind: AssetKind,
}

/// Lists `img[src]`, stylesheet `link[href]` and `object[data]` references,
/// grouped by element kind, without duplicates.
pub fn collect_asset_references(html: &str) -> Vec<AssetReference> {
    let document = kuchiki::parse_html().one(html);
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    let selectors = [
        ("img[src]", "src", AssetKind::Image),
        ("link[rel~=stylesheet][href]", "href", AssetKind::Css),
        ("object[data]", "data", AssetKind::Other),
    ];
    for (selector, attr, kind) in selectors {
        let Ok(matches) = document.select(selector) else {
            continue;
        };
        for node in matches {
            let attrs = node.attributes.borrow();
            let Some(value) = attrs.get(attr) else {
                continue;
            };
            let value = value.trim();
            if value.is_empty() || !seen.insert(value.to_string()) {
                continue;
            }
            out.push(AssetReference {
                reference: value.to_string(),
                kind: AssetKind::guess(value, kind),
            });
        }
    }
    out
}

/// Fetches URIs the retriever does not handle itself (anything but `data:`
/// and `file:`).
pub trait ResourceFetcher: Send + Sync {
    fn fetch(&self, uri: &Url) -> Result<Vec<u8>, String>;
}

/// Default fetcher: no network access.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineFetcher;

impl ResourceFetcher for OfflineFetcher {
    fn fetch(&self, uri: &Url) -> Result<Vec<u8>, String> {
        Err(format!("no fetcher configured for scheme {}", uri.scheme()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetrievalIssue {
    Denied { uri: String, kind: AssetKind },
    Failed { uri: String, kind: AssetKind, reason: String },
}

impl RetrievalIssue {
    pub fn uri(&self) -> &str {
        match self {
            RetrievalIssue::Denied { uri, .. } | RetrievalIssue::Failed { uri, .. } => uri,
        }
    }

    pub fn kind(&self) -> AssetKind {
        match self {
            RetrievalIssue::Denied { kind, .. } | RetrievalIssue::Failed { kind, .. } => *kind,
        }
    }
}

/// Resolves and fetches assets for markup conversion, consulting the
/// resource policy first. Every refusal yields `None` ("resource
/// unavailable"); nothing here aborts a generation.
pub struct FilteringRetriever {
    policy: Option<Arc<ResourceAccessPolicy>>,
    base: Option<Url>,
    fetcher: Arc<dyn ResourceFetcher>,
    issues: Mutex<Vec<RetrievalIssue>>,
}

impl FilteringRetriever {
    pub fn new(policy: Option<Arc<ResourceAccessPolicy>>, base_path: Option<&Path>) -> Self {
        Self {
            policy,
            base: base_path.and_then(base_url_for),
            fetcher: Arc::new(OfflineFetcher),
            issues: Mutex::new(Vec::new()),
        }
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn ResourceFetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    pub fn policy(&self) -> Option<&ResourceAccessPolicy> {
        self.policy.as_deref()
    }

    pub fn base(&self) -> Option<&Url> {
        self.base.as_ref()
    }

    pub fn resolve(&self, reference: &str) -> Option<Url> {
        match Url::parse(reference) {
            Ok(url) => Some(url),
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                self.base.as_ref().and_then(|base| base.join(reference).ok())
            }
            Err(_) => None,
        }
    }

    pub fn retrieve(&self, reference: &str, kind: AssetKind) -> Option<Asset> {
        let Some(uri) = self.resolve(reference) else {
            self.record(RetrievalIssue::Failed {
                uri: reference.to_string(),
                kind,
                reason: "cannot resolve reference".to_string(),
            });
            return None;
        };
        if let Some(policy) = self.policy.as_deref() {
            if !policy.should_allow(&uri) {
                tracing::warn!(uri = %uri, kind = kind.as_str(), "resource access denied by policy");
                self.record(RetrievalIssue::Denied {
                    uri: uri.to_string(),
                    kind,
                });
                return None;
            }
        }

        let fetched = match uri.scheme() {
            "data" => decode_data_uri(uri.as_str()),
            "file" => uri
                .to_file_path()
                .map_err(|_| "not a local path".to_string())
                .and_then(|path| std::fs::read(&path).map_err(|err| err.to_string())),
            _ => self.fetcher.fetch(&uri),
        };
        match fetched {
            Ok(data) => {
                tracing::debug!(uri = %uri, bytes = data.len(), "resource retrieved");
                let trusted = matches!(uri.scheme(), "data" | "file");
                Some(Asset::new(
                    reference.to_string(),
                    kind,
                    data,
                    Some(uri.to_string()),
                    trusted,
                ))
            }
            Err(reason) => {
                tracing::warn!(uri = %uri, kind = kind.as_str(), %reason, "resource unavailable");
                self.record(RetrievalIssue::Failed {
                    uri: uri.to_string(),
                    kind,
                    reason,
                });
                None
            }
        }
    }

    /// Retrieves every asset referenced by `html` that the policy allows.
    pub fn prefetch(&self, html: &str) -> AssetBundle {
        let mut bundle = AssetBundle::default();
        for reference in collect_asset_references(html) {
            if let Some(asset) = self.retrieve(&reference.reference, reference.kind) {
                bundle.add(asset);
            }
        }
        bundle
    }

    pub fn issues(&self) -> Vec<RetrievalIssue> {
        self.issues
            .lock()
            .map(|issues| issues.clone())
            .unwrap_or_default()
    }

    fn record(&self, issue: RetrievalIssue) {
        if let Ok(mut issues) = self.issues.lock() {
            issues.push(issue);
        }
    }
}

fn base_url_for(path: &Path) -> Option<Url> {
    let absolute = std::path::absolute(path).ok()?;
    if absolute.is_dir() {
        Url::from_directory_path(&absolute).ok()
    } else {
        Url::from_file_path(&absolute).ok()
    }
}

fn decode_data_uri(raw: &str) -> Result<Vec<u8>, String> {
    let body = raw
        .strip_prefix("data:")
        .ok_or_else(|| "not a data uri".to_string())?;
    let (meta, payload) = body
        .split_once(',')
        .ok_or_else(|| "data uri without payload".to_string())?;
    if meta
        .split(';')
        .any(|part| part.eq_ignore_ascii_case("base64"))
    {
        base64::engine::general_purpose::STANDARD
            .decode(payload.trim())
            .map_err(|err| err.to_string())
    } else {
        Ok(percent_decode_str(payload).collect())
    }
}
