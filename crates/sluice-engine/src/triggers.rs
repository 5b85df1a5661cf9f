//! Trigger flag evaluation.

use sluice_core::change::{CategorySet, TriggerFlags};
use sluice_core::config::PipelineConfig;
use sluice_core::ids::AreaName;
use std::collections::BTreeMap;
use tracing::debug;

/// Decides which pipeline areas a run enables.
#[derive(Debug, Clone)]
pub struct TriggerRuleEngine {
    areas: BTreeMap<AreaName, Vec<String>>,
    fallback: Option<AreaName>,
}

impl TriggerRuleEngine {
    pub fn new(areas: BTreeMap<AreaName, Vec<String>>, fallback: Option<AreaName>) -> Self {
        Self { areas, fallback }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.effective_areas(), config.fallback_area.clone())
    }

    /// Evaluate every area against the matched categories.
    ///
    /// An area is on when one of its trigger categories matched or the set
    /// forces all areas. When nothing is on, the fallback area alone is.
    pub fn evaluate(&self, categories: &CategorySet) -> TriggerFlags {
        let force_all = categories.is_force_all();
        let mut flags: BTreeMap<AreaName, bool> = self
            .areas
            .iter()
            .map(|(area, triggers)| {
                let enabled = force_all || triggers.iter().any(|t| categories.contains_named(t));
                (area.clone(), enabled)
            })
            .collect();

        if !flags.values().any(|&on| on)
            && let Some(fallback) = &self.fallback
            && let Some(slot) = flags.get_mut(fallback)
        {
            debug!(area = %fallback, "No area triggered, enabling fallback");
            *slot = true;
        }

        TriggerFlags::new(flags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_core::change::Category;

    fn engine(fallback: Option<&str>) -> TriggerRuleEngine {
        let mut areas = BTreeMap::new();
        areas.insert(AreaName::new("backend"), vec!["python".to_string()]);
        areas.insert(
            AreaName::new("infra"),
            vec!["docker".to_string(), "terraform".to_string()],
        );
        areas.insert(AreaName::new("smoke"), vec!["never".to_string()]);
        TriggerRuleEngine::new(areas, fallback.map(AreaName::new))
    }

    #[test]
    fn test_any_trigger_category_enables_area() {
        let categories: CategorySet = [Category::named("terraform")].into_iter().collect();
        let flags = engine(None).evaluate(&categories);
        assert!(flags.is_enabled("infra"));
        assert!(!flags.is_enabled("backend"));
    }

    #[test]
    fn test_force_all_enables_everything() {
        let flags = engine(None).evaluate(&CategorySet::force_all());
        assert!(flags.is_enabled("backend"));
        assert!(flags.is_enabled("infra"));
        assert!(flags.is_enabled("smoke"));
    }

    #[test]
    fn test_fallback_only_when_nothing_enabled() {
        let flags = engine(Some("smoke")).evaluate(&CategorySet::new());
        let enabled: Vec<_> = flags.enabled().map(|a| a.as_str()).collect();
        assert_eq!(enabled, vec!["smoke"]);

        let categories: CategorySet = [Category::named("python")].into_iter().collect();
        let flags = engine(Some("smoke")).evaluate(&categories);
        assert!(flags.is_enabled("backend"));
        assert!(!flags.is_enabled("smoke"));
    }

    #[test]
    fn test_deterministic() {
        let categories: CategorySet = [Category::named("python"), Category::named("docker")]
            .into_iter()
            .collect();
        let engine = engine(Some("smoke"));
        assert_eq!(engine.evaluate(&categories), engine.evaluate(&categories));
    }
}
