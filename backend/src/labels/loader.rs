use serde::{Deserialize, Deserializer};
use shared::RiskTier;
use std::path::Path;
use std::str::FromStr;

use super::registry::{normalize_code, LabelEntry, LabelRegistry, RegistryError};

#[derive(Debug, Deserialize)]
pub struct LabelFile {
    pub labels: Vec<LabelSpec>,
}

#[derive(Debug, Deserialize)]
pub struct LabelSpec {
    pub code: String,
    #[serde(default)]
    pub class_id: Option<i64>,
    pub display: String,
    #[serde(deserialize_with = "deserialize_risk")]
    pub risk: RiskTier,
    pub description: String,
    pub recommendation: String,
}

// Label files are hand-written, so accept `high` as well as `High`.
fn deserialize_risk<'de, D>(deserializer: D) -> Result<RiskTier, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    RiskTier::from_str(raw.trim()).map_err(|_| {
        serde::de::Error::custom(format!("unknown risk tier '{}', expected Low, Medium or High", raw))
    })
}

impl LabelRegistry {
    /// Built-in table, optionally overridden by a YAML label file.
    pub fn load(path: Option<&Path>) -> Result<Self, RegistryError> {
        let registry = Self::builtin()?;
        match path {
            Some(path) => {
                log::info!("Loading label overrides from {}", path.display());
                let contents = std::fs::read_to_string(path)?;
                registry.with_overrides_yaml(&contents)
            }
            None => Ok(registry),
        }
    }

    pub fn with_overrides_yaml(self, yaml: &str) -> Result<Self, RegistryError> {
        let file: LabelFile = serde_yaml::from_str(yaml)?;
        self.with_overrides(file.labels)
    }

    /// Specs with a known code replace that entry in place; new codes are
    /// appended after the highest class id unless they carry their own.
    pub fn with_overrides(self, specs: Vec<LabelSpec>) -> Result<Self, RegistryError> {
        let mut entries = self.into_entries();
        for spec in specs {
            let code = normalize_code(&spec.code);
            match entries.iter_mut().find(|entry| entry.code == code) {
                Some(entry) => {
                    log::debug!("Overriding label '{}'", code);
                    entry.class_id = spec.class_id.unwrap_or(entry.class_id);
                    entry.display_name = spec.display;
                    entry.default_risk = spec.risk;
                    entry.description = spec.description;
                    entry.recommendation = spec.recommendation;
                }
                None => {
                    let class_id = spec.class_id.unwrap_or_else(|| {
                        entries.iter().map(|e| e.class_id).max().unwrap_or(-1) + 1
                    });
                    log::debug!("Adding label '{}' with class id {}", code, class_id);
                    entries.push(LabelEntry {
                        code,
                        class_id,
                        display_name: spec.display,
                        default_risk: spec.risk,
                        description: spec.description,
                        recommendation: spec.recommendation,
                    });
                }
            }
        }
        LabelRegistry::from_entries(entries)
    }
}
