use std::path::{Path, PathBuf};

use crate::error::DocBindError;
use crate::finalize::hex_digest;

/// Capability level a generation ran under. A missing license never fails
/// a generation; it only downgrades to `Unlicensed`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LicenseMode {
    #[default]
    Unlicensed,
    Licensed {
        licensee: String,
        fingerprint: String,
    },
}

impl LicenseMode {
    pub fn is_licensed(&self) -> bool {
        matches!(self, LicenseMode::Licensed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct License {
    path: PathBuf,
    licensee: String,
    fingerprint: String,
}

impl License {
    /// The first non-empty line names the licensee; the SHA-256 of the
    /// whole file is its fingerprint.
    pub fn load(path: &Path) -> Result<Self, DocBindError> {
        let bytes = std::fs::read(path)?;
        let text = String::from_utf8_lossy(&bytes);
        let licensee = text
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .ok_or_else(|| {
                DocBindError::config(format!("license file {} is empty", path.display()))
            })?
            .to_string();
        Ok(Self {
            path: path.to_path_buf(),
            licensee,
            fingerprint: hex_digest(&bytes),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn licensee(&self) -> &str {
        &self.licensee
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn mode(&self) -> LicenseMode {
        LicenseMode::Licensed {
            licensee: self.licensee.clone(),
            fingerprint: self.fingerprint.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_non_empty_line_is_the_licensee() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("docbind.lic");
        std::fs::write(&path, "\n  Acme Reporting Ltd  \nseat=12\n").expect("write");
        let license = License::load(&path).expect("license");
        assert_eq!(license.licensee(), "Acme Reporting Ltd");
        assert_eq!(license.fingerprint().len(), 64);
        assert!(license.mode().is_licensed());
    }

    #[test]
    fn missing_and_blank_files_fail_to_load() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = License::load(&dir.path().join("absent.lic")).unwrap_err();
        assert!(matches!(err, DocBindError::Io(_)));

        let blank = dir.path().join("blank.lic");
        std::fs::write(&blank, " \n\n").expect("write");
        assert!(License::load(&blank).unwrap_err().to_string().contains("is empty"));
        assert!(!LicenseMode::default().is_licensed());
    }
}
