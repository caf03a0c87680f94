use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::ModelError;

/// Pinned module versions, keyed by component name.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Catalog {
    #[serde(default)]
    pub modules: Vec<CatalogModule>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CatalogModule {
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chart: Option<String>,
}

impl Catalog {
    pub fn from_yaml(data: &str) -> Result<Self, ModelError> {
        Ok(serde_yaml::from_str(data)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ModelError> {
        let path = path.as_ref();
        let data =
            std::fs::read_to_string(path).map_err(|source| ModelError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_yaml(&data)
    }

    pub fn version_of(&self, module: &str) -> Option<&str> {
        self.modules
            .iter()
            .find(|m| m.name == module)
            .map(|m| m.version.as_str())
    }
}
