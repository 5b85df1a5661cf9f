//! Change-set classification.

use sluice_core::ConfigError;
use sluice_core::change::{Category, CategorySet, ChangeSet};
use sluice_core::config::PipelineConfig;
use sluice_core::glob::GlobPattern;
use std::collections::BTreeMap;
use tracing::debug;

/// Maps changed paths to the path-rule categories they touch.
///
/// Patterns are compiled once here, so analysis itself cannot fail.
#[derive(Debug, Clone)]
pub struct ChangeSetAnalyzer {
    rules: Vec<(String, Vec<GlobPattern>)>,
}

impl ChangeSetAnalyzer {
    pub fn new(path_rules: &BTreeMap<String, Vec<String>>) -> Result<Self, ConfigError> {
        let rules = path_rules
            .iter()
            .map(|(category, patterns)| {
                let compiled = patterns
                    .iter()
                    .map(|p| GlobPattern::new(p))
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|source| ConfigError::InvalidPattern {
                        category: category.clone(),
                        source,
                    })?;
                Ok((category.clone(), compiled))
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;
        Ok(Self { rules })
    }

    pub fn from_config(config: &PipelineConfig) -> Result<Self, ConfigError> {
        Self::new(&config.path_rules)
    }

    /// Categories matched by a single path.
    pub fn categories_for<'a>(&'a self, path: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.rules
            .iter()
            .filter(move |(_, patterns)| patterns.iter().any(|p| p.matches(path)))
            .map(|(category, _)| category.as_str())
    }

    /// Classify a change set. An empty change set yields `force-all`.
    pub fn analyze(&self, changes: &ChangeSet) -> CategorySet {
        if changes.is_empty() {
            debug!("Empty change set, forcing all areas");
            return CategorySet::force_all();
        }

        let mut categories = CategorySet::new();
        for path in changes.paths() {
            for category in self.categories_for(path) {
                categories.insert(Category::named(category));
            }
        }
        debug!(
            paths = changes.len(),
            categories = ?categories.iter().map(|c| c.to_string()).collect::<Vec<_>>(),
            "Analyzed change set"
        );
        categories
    }
}
