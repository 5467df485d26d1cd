use std::collections::BTreeSet;

use url::Url;

use crate::error::DocBindError;

/// Allow-list consulted before any externally referenced asset is fetched.
///
/// An empty set on either dimension leaves that dimension unrestricted.
/// Immutable after construction, so one policy can be shared (behind an
/// `Arc`) by any number of concurrent generations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceAccessPolicy {
    allowed_schemes: BTreeSet<String>,
    allowed_hosts: BTreeSet<String>,
}

impl ResourceAccessPolicy {
    pub fn new<S, H>(schemes: S, hosts: H) -> Result<Self, DocBindError>
    where
        S: IntoIterator,
        S::Item: AsRef<str>,
        H: IntoIterator,
        H::Item: AsRef<str>,
    {
        Ok(Self {
            allowed_schemes: normalize_entries("scheme", schemes)?,
            allowed_hosts: normalize_entries("host", hosts)?,
        })
    }

    /// Allows every URI.
    pub fn unrestricted() -> Self {
        Self::default()
    }

    pub fn allowed_schemes(&self) -> &BTreeSet<String> {
        &self.allowed_schemes
    }

    pub fn allowed_hosts(&self) -> &BTreeSet<String> {
        &self.allowed_hosts
    }

    pub fn should_allow(&self, uri: &Url) -> bool {
        if !self.allowed_schemes.is_empty()
            && !self.allowed_schemes.contains(&uri.scheme().to_ascii_lowercase())
        {
            return false;
        }
        if !self.allowed_hosts.is_empty() {
            let Some(host) = uri.host_str() else {
                return false;
            };
            if !self.allowed_hosts.contains(&host.to_ascii_lowercase()) {
                return false;
            }
        }
        true
    }

    /// Unparseable URIs are denied.
    pub fn should_allow_str(&self, uri: &str) -> bool {
        match Url::parse(uri) {
            Ok(parsed) => self.should_allow(&parsed),
            Err(_) => false,
        }
    }
}

fn normalize_entries<I>(dimension: &str, entries: I) -> Result<BTreeSet<String>, DocBindError>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    let mut out = BTreeSet::new();
    for entry in entries {
        let trimmed = entry.as_ref().trim();
        if trimmed.is_empty() {
            return Err(DocBindError::config(format!(
                "resource policy {dimension} entries cannot be empty"
            )));
        }
        out.insert(trimmed.to_ascii_lowercase());
    }
    Ok(out)
}
