use std::collections::HashMap;

/// Extensions the server rewrites during ingest, e.g. tabular formats
/// normalized to `.tab`. Lookups are case-insensitive; a missing rule
/// means the server keeps the original name.
///
/// The authoritative mapping is server-version-dependent, so the table is
/// extensible rather than fixed.
#[derive(Debug, Clone)]
pub struct ConversionTable {
    rules: HashMap<String, String>,
}

/// Source extensions Dataverse ingests into its canonical tabular format.
const TABULAR_EXTENSIONS: &[&str] = &[
    "csv", "xlsx", "xls", "sav", "dta", "por", "sas7bdat", "rdata", "rds",
];

impl Default for ConversionTable {
    fn default() -> Self {
        let rules = TABULAR_EXTENSIONS
            .iter()
            .map(|ext| (ext.to_string(), "tab".to_string()))
            .collect();
        Self { rules }
    }
}

impl ConversionTable {
    /// A table with no rules.
    pub fn empty() -> Self {
        Self {
            rules: HashMap::new(),
        }
    }

    /// Adds or overrides a rule (extensions without leading dots).
    pub fn with_rule(mut self, from: &str, to: &str) -> Self {
        self.rules
            .insert(from.to_ascii_lowercase(), to.to_ascii_lowercase());
        self
    }

    /// The label the server would store `label_path` under, if a rule
    /// applies.
    pub fn converted_label(&self, label_path: &str) -> Option<String> {
        let (stem, ext) = label_path.rsplit_once('.')?;
        if stem.is_empty() {
            return None;
        }
        let target = self.rules.get(&ext.to_ascii_lowercase())?;
        Some(format!("{stem}.{target}"))
    }
}
