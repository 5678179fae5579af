//! Package location lookup

use std::collections::HashMap;
use std::path::PathBuf;

/// Marker directory that lists the packages installed under a prefix
const PACKAGE_INDEX: &str = "share/ament_index/resource_index/packages";

/// Resolves the on-disk locations of installed packages
pub trait PackageLocator: Send + Sync {
    /// Installation prefix of a package
    fn lookup_install_prefix(&self, package: &str) -> Result<PathBuf, LookupError>;

    /// Share directory of a package (`<prefix>/share/<package>` by default)
    fn lookup_share_directory(&self, package: &str) -> Result<PathBuf, LookupError> {
        Ok(self
            .lookup_install_prefix(package)?
            .join("share")
            .join(package))
    }
}

/// Locator backed by an ament resource index
///
/// Each prefix is searched in order for
/// `share/ament_index/resource_index/packages/<package>`.
#[derive(Debug, Clone, Default)]
pub struct AmentIndexLocator {
    prefixes: Vec<PathBuf>,
}

impl AmentIndexLocator {
    /// Create a locator over an explicit list of prefixes
    pub fn new(prefixes: Vec<PathBuf>) -> Self {
        Self { prefixes }
    }

    /// Create a locator from the `AMENT_PREFIX_PATH` environment variable
    pub fn from_env() -> Self {
        let prefixes = std::env::var_os("AMENT_PREFIX_PATH")
            .map(|value| std::env::split_paths(&value).collect())
            .unwrap_or_default();
        Self { prefixes }
    }

    /// Prefixes searched by this locator
    pub fn prefixes(&self) -> &[PathBuf] {
        &self.prefixes
    }
}

impl PackageLocator for AmentIndexLocator {
    fn lookup_install_prefix(&self, package: &str) -> Result<PathBuf, LookupError> {
        if package.is_empty() {
            return Err(LookupError::NotFound(package.to_string()));
        }

        self.prefixes
            .iter()
            .find(|prefix| prefix.join(PACKAGE_INDEX).join(package).exists())
            .cloned()
            .ok_or_else(|| LookupError::NotFound(package.to_string()))
    }
}

/// In-memory locator with a fixed package table
#[derive(Debug, Clone, Default)]
pub struct StaticLocator {
    prefixes: HashMap<String, PathBuf>,
    shares: HashMap<String, PathBuf>,
}

impl StaticLocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a package installed under `prefix`
    pub fn with_package(mut self, package: impl Into<String>, prefix: impl Into<PathBuf>) -> Self {
        self.prefixes.insert(package.into(), prefix.into());
        self
    }

    /// Override the share directory of a package
    pub fn with_share_directory(
        mut self,
        package: impl Into<String>,
        share: impl Into<PathBuf>,
    ) -> Self {
        self.shares.insert(package.into(), share.into());
        self
    }
}

impl PackageLocator for StaticLocator {
    fn lookup_install_prefix(&self, package: &str) -> Result<PathBuf, LookupError> {
        self.prefixes
            .get(package)
            .cloned()
            .ok_or_else(|| LookupError::NotFound(package.to_string()))
    }

    fn lookup_share_directory(&self, package: &str) -> Result<PathBuf, LookupError> {
        if let Some(share) = self.shares.get(package) {
            return Ok(share.clone());
        }
        Ok(self
            .lookup_install_prefix(package)?
            .join("share")
            .join(package))
    }
}

/// Errors that can occur when locating a package
#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    #[error("Package not found: '{0}'")]
    NotFound(String),
}
