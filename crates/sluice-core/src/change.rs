//! Change sets, trigger events and the values derived from them.

use crate::ids::AreaName;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// The kind of event that started a run.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
    JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum RunType {
    #[default]
    Push,
    PullRequest,
    Scheduled,
}

impl fmt::Display for RunType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunType::Push => "push",
            RunType::PullRequest => "pull_request",
            RunType::Scheduled => "scheduled",
        };
        f.write_str(s)
    }
}

/// Ordered set of changed paths captured for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct ChangeSet(Vec<String>);

impl ChangeSet {
    /// Capture a change set. Duplicate paths keep their first position.
    pub fn new<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen = BTreeSet::new();
        let mut ordered = Vec::new();
        for path in paths {
            let path = path.into();
            if seen.insert(path.clone()) {
                ordered.push(path);
            }
        }
        Self(ordered)
    }

    pub fn paths(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

/// The event record that starts a pipeline run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct TriggerEvent {
    pub run_type: RunType,
    #[serde(default)]
    pub changes: ChangeSet,
    /// Runs sharing a concurrency group supersede each other (typically a branch).
    #[serde(default)]
    pub concurrency_group: Option<String>,
}

impl TriggerEvent {
    pub fn new(run_type: RunType, changes: ChangeSet) -> Self {
        Self {
            run_type,
            changes,
            concurrency_group: None,
        }
    }

    pub fn with_concurrency_group(mut self, group: impl Into<String>) -> Self {
        self.concurrency_group = Some(group.into());
        self
    }
}

/// A semantic category matched by a changed path.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Produced for an empty change set: every area must run.
    ForceAll,
    Named(String),
}

impl Category {
    pub fn named(name: impl Into<String>) -> Self {
        Category::Named(name.into())
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Category::ForceAll => f.write_str("force-all"),
            Category::Named(name) => f.write_str(name),
        }
    }
}

/// Categories matched by one change set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CategorySet(BTreeSet<Category>);

impl CategorySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn force_all() -> Self {
        let mut set = Self::new();
        set.insert(Category::ForceAll);
        set
    }

    pub fn insert(&mut self, category: Category) -> bool {
        self.0.insert(category)
    }

    pub fn contains(&self, category: &Category) -> bool {
        self.0.contains(category)
    }

    pub fn contains_named(&self, name: &str) -> bool {
        self.0.contains(&Category::Named(name.to_string()))
    }

    pub fn is_force_all(&self) -> bool {
        self.0.contains(&Category::ForceAll)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Category> {
        self.0.iter()
    }
}

impl FromIterator<Category> for CategorySet {
    fn from_iter<T: IntoIterator<Item = Category>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Per-area run flags, derived once per run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TriggerFlags(BTreeMap<AreaName, bool>);

impl TriggerFlags {
    pub fn new(flags: BTreeMap<AreaName, bool>) -> Self {
        Self(flags)
    }

    /// Whether an area is enabled. Undeclared areas are disabled.
    pub fn is_enabled(&self, area: &str) -> bool {
        self.0.get(area).copied().unwrap_or(false)
    }

    pub fn enabled(&self) -> impl Iterator<Item = &AreaName> {
        self.0.iter().filter(|(_, on)| **on).map(|(name, _)| name)
    }

    pub fn any_enabled(&self) -> bool {
        self.0.values().any(|on| *on)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&AreaName, bool)> {
        self.0.iter().map(|(name, on)| (name, *on))
    }
}
