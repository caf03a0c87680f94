use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::ModelError;

/// Token the build leaves in the BOM when no release version was stamped.
pub const BOM_VERSION_PLACEHOLDER: &str = "PLATFORM_VERSION";

/// Bill of materials shipped with the operator image.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Bom {
    #[serde(default)]
    pub registry: String,
    pub version: String,
    #[serde(default)]
    pub components: Vec<BomComponent>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BomComponent {
    pub name: String,
    #[serde(default)]
    pub subcomponents: Vec<BomSubComponent>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BomSubComponent {
    pub name: String,
    #[serde(default)]
    pub repository: Option<String>,
    #[serde(default)]
    pub registry: Option<String>,
    #[serde(default)]
    pub images: Vec<BomImage>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BomImage {
    pub image: String,
    pub tag: String,
    #[serde(default)]
    pub helm_image_key: Option<String>,
    #[serde(default)]
    pub repository: Option<String>,
    #[serde(default)]
    pub registry: Option<String>,
}

impl Bom {
    pub fn from_json(data: &str) -> Result<Self, ModelError> {
        Ok(serde_json::from_str(data)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ModelError> {
        let path = path.as_ref();
        let data =
            std::fs::read_to_string(path).map_err(|source| ModelError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_json(&data)
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn subcomponent(&self, name: &str) -> Option<&BomSubComponent> {
        self.components
            .iter()
            .flat_map(|c| c.subcomponents.iter())
            .find(|s| s.name == name)
    }

    /// Fully qualified reference `registry/repository/image:tag`, with image
    /// settings taking precedence over the subcomponent and BOM defaults.
    pub fn image_ref(&self, subcomponent: &str, image: &str) -> Option<String> {
        let sub = self.subcomponent(subcomponent)?;
        let img = sub.images.iter().find(|i| i.image == image)?;
        let registry = img
            .registry
            .as_deref()
            .or(sub.registry.as_deref())
            .unwrap_or(&self.registry);
        let repository = img.repository.as_deref().or(sub.repository.as_deref());
        let mut out = String::new();
        for part in [Some(registry), repository] {
            if let Some(p) = part.filter(|p| !p.is_empty()) {
                out.push_str(p);
                out.push('/');
            }
        }
        out.push_str(&img.image);
        out.push(':');
        out.push_str(&img.tag);
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOM: &str = r#"{
        "registry": "ghcr.io",
        "version": "1.1.0",
        "components": [{
            "name": "istio",
            "subcomponents": [{
                "name": "istiod",
                "repository": "platform",
                "images": [
                    {"image": "proxyv2", "tag": "1.19.3", "helmImageKey": "global.proxy.image"},
                    {"image": "pilot", "tag": "1.19.3", "registry": "docker.io"}
                ]
            }]
        }]
    }"#;

    #[test]
    fn image_ref_resolves_registry_precedence() {
        let bom = Bom::from_json(BOM).unwrap();
        assert_eq!(bom.version(), "1.1.0");
        assert_eq!(
            bom.image_ref("istiod", "proxyv2").as_deref(),
            Some("ghcr.io/platform/proxyv2:1.19.3")
        );
        assert_eq!(
            bom.image_ref("istiod", "pilot").as_deref(),
            Some("docker.io/platform/pilot:1.19.3")
        );
        assert_eq!(bom.image_ref("istiod", "missing"), None);
        assert_eq!(bom.image_ref("nope", "proxyv2"), None);
    }

    #[test]
    fn from_path_reports_missing_file() {
        let err = Bom::from_path("/definitely/not/here.json").unwrap_err();
        assert!(matches!(err, ModelError::Io { .. }));
    }
}
