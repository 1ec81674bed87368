use shared::{LabelDescriptor, RiskTier};
use std::collections::{HashMap, HashSet};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Failed to read label file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse label file: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Label code must not be empty")]
    EmptyCode,
    #[error("Label '{code}' has an empty {field}")]
    EmptyText { code: String, field: &'static str },
    #[error("Duplicate label code: {0}")]
    DuplicateCode(String),
    #[error("Duplicate class id {class_id} for label '{code}'")]
    DuplicateClassId { code: String, class_id: i64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct LabelEntry {
    pub code: String,
    pub class_id: i64,
    pub display_name: String,
    pub default_risk: RiskTier,
    pub description: String,
    pub recommendation: String,
}

impl LabelEntry {
    pub fn to_descriptor(&self) -> LabelDescriptor {
        LabelDescriptor {
            code: self.code.clone(),
            class_id: self.class_id,
            display_name: self.display_name.clone(),
            risk: self.default_risk,
            description: self.description.clone(),
            recommendation: self.recommendation.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedLabel {
    pub display_name: String,
    pub risk: RiskTier,
    pub known: bool,
}

/// Class codes are compared trimmed and lower-cased.
pub fn normalize_code(code: &str) -> String {
    code.trim().to_lowercase()
}

// (code, display name, default risk, description, recommendation) in class-id order.
const BUILTIN_LABELS: &[(&str, &str, RiskTier, &str, &str)] = &[
    (
        "akiec",
        "Actinic Keratosis / Intraepithelial Carcinoma",
        RiskTier::High,
        "A pre-cancerous growth or early form of skin cancer.",
        "Consult a dermatologist promptly for evaluation.",
    ),
    (
        "bcc",
        "Basal Cell Carcinoma",
        RiskTier::High,
        "The most common type of skin cancer, usually slow-growing.",
        "Consult a dermatologist for proper treatment options.",
    ),
    (
        "bkl",
        "Benign Keratosis",
        RiskTier::Low,
        "A non-cancerous skin growth that appears as a waxy, scaly patch.",
        "Generally no treatment needed, but monitor for changes.",
    ),
    (
        "df",
        "Dermatofibroma",
        RiskTier::Low,
        "A common benign skin growth or nodule that is usually harmless.",
        "No treatment needed unless causing discomfort.",
    ),
    (
        "mel",
        "Melanoma",
        RiskTier::High,
        "A serious form of skin cancer that can spread if not treated early.",
        "Seek immediate medical attention.",
    ),
    (
        "nv",
        "Melanocytic Nevus (Mole)",
        RiskTier::Low,
        "A benign growth of melanocytes, usually harmless but should be monitored.",
        "Monitor for changes in size, shape, or color.",
    ),
    (
        "vasc",
        "Vascular Lesion",
        RiskTier::Low,
        "Abnormalities of blood vessels that appear on the skin surface.",
        "Typically harmless but consult a doctor if concerned.",
    ),
    (
        "scc",
        "Squamous Cell Carcinoma",
        RiskTier::High,
        "A common skin cancer arising from squamous cells that can grow and spread if untreated.",
        "Consult a dermatologist promptly for evaluation and treatment.",
    ),
];

/// Immutable lookup table from class code to display and risk information.
///
/// Built once at startup and shared behind an `Arc`; it is never mutated
/// afterwards, so concurrent reads need no locking.
#[derive(Debug, Clone)]
pub struct LabelRegistry {
    entries: Vec<LabelEntry>,
    by_code: HashMap<String, usize>,
}

impl LabelRegistry {
    pub fn builtin() -> Result<Self, RegistryError> {
        let entries = BUILTIN_LABELS
            .iter()
            .enumerate()
            .map(
                |(class_id, (code, display, risk, description, recommendation))| LabelEntry {
                    code: code.to_string(),
                    class_id: class_id as i64,
                    display_name: display.to_string(),
                    default_risk: *risk,
                    description: description.to_string(),
                    recommendation: recommendation.to_string(),
                },
            )
            .collect();
        Self::from_entries(entries)
    }

    pub fn from_entries(entries: Vec<LabelEntry>) -> Result<Self, RegistryError> {
        let entries: Vec<LabelEntry> = entries
            .into_iter()
            .map(|mut entry| {
                entry.code = normalize_code(&entry.code);
                entry
            })
            .collect();
        Self::validate(&entries)?;

        let by_code = entries
            .iter()
            .enumerate()
            .map(|(idx, entry)| (entry.code.clone(), idx))
            .collect();
        Ok(Self { entries, by_code })
    }

    fn validate(entries: &[LabelEntry]) -> Result<(), RegistryError> {
        let mut codes = HashSet::new();
        let mut class_ids = HashSet::new();
        for entry in entries {
            if entry.code.is_empty() {
                return Err(RegistryError::EmptyCode);
            }
            for (field, text) in [
                ("display name", &entry.display_name),
                ("description", &entry.description),
                ("recommendation", &entry.recommendation),
            ] {
                if text.trim().is_empty() {
                    return Err(RegistryError::EmptyText {
                        code: entry.code.clone(),
                        field,
                    });
                }
            }
            if !codes.insert(entry.code.as_str()) {
                return Err(RegistryError::DuplicateCode(entry.code.clone()));
            }
            if !class_ids.insert(entry.class_id) {
                return Err(RegistryError::DuplicateClassId {
                    code: entry.code.clone(),
                    class_id: entry.class_id,
                });
            }
        }
        Ok(())
    }

    /// Unknown codes resolve to the caller's original text and the least
    /// severe tier so rendering never fails on labels added by a newer model.
    pub fn resolve(&self, code: &str) -> ResolvedLabel {
        match self.entry(code) {
            Some(entry) => ResolvedLabel {
                display_name: entry.display_name.clone(),
                risk: entry.default_risk,
                known: true,
            },
            None => ResolvedLabel {
                display_name: code.to_string(),
                risk: RiskTier::LEAST_SEVERE,
                known: false,
            },
        }
    }

    pub fn entry(&self, code: &str) -> Option<&LabelEntry> {
        self.by_code
            .get(&normalize_code(code))
            .map(|idx| &self.entries[*idx])
    }

    pub fn by_class_id(&self, class_id: i64) -> Option<&LabelEntry> {
        self.entries.iter().find(|entry| entry.class_id == class_id)
    }

    pub fn class_id(&self, code: &str) -> Option<i64> {
        self.entry(code).map(|entry| entry.class_id)
    }

    pub fn entries(&self) -> &[LabelEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn into_entries(self) -> Vec<LabelEntry> {
        self.entries
    }
}
