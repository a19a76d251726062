//! Source URL construction

use serde::{Deserialize, Serialize};

use crate::models::WorkDescriptor;

/// Default archive host for the monthly AIS bundles.
pub const DEFAULT_SOURCE_BASE_URL: &str = "https://coast.noaa.gov/htdata/CMSP/AISDataHandler";

/// Default file stem, producing `aisdk-YYYY-MM.zip`.
pub const DEFAULT_SOURCE_NAME: &str = "aisdk";

/// Maps work descriptors to `{base}/{year}/{source}-{year}-{month:02}.zip`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocator {
    base_url: String,
    source_name: String,
}

impl SourceLocator {
    pub fn new(base_url: impl Into<String>, source_name: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            source_name: source_name.into(),
        }
    }

    pub fn locate(&self, descriptor: &WorkDescriptor) -> String {
        format!(
            "{}/{}/{}-{}-{:02}.zip",
            self.base_url, descriptor.year, self.source_name, descriptor.year, descriptor.month
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl Default for SourceLocator {
    fn default() -> Self {
        Self::new(DEFAULT_SOURCE_BASE_URL, DEFAULT_SOURCE_NAME)
    }
}
