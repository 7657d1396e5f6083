//! Skill registry.

use std::collections::HashMap;
use std::sync::Arc;

use crate::skills::Skill;

/// Skills by name.
///
/// Filled with `&mut self` during startup and then shared behind an `Arc`,
/// so lookups take no lock.
#[derive(Default)]
pub struct SkillRegistry {
    skills: HashMap<String, Arc<dyn Skill>>,
}

impl SkillRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a skill, replacing any skill with the same name.
    pub fn register(&mut self, skill: Arc<dyn Skill>) {
        let name = skill.name().to_string();
        if self.skills.insert(name.clone(), skill).is_some() {
            tracing::debug!(skill = %name, "Replaced registered skill");
        } else {
            tracing::debug!(skill = %name, "Registered skill");
        }
    }

    /// Look up a skill. A missing name is `None`.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Skill>> {
        self.skills.get(name).cloned()
    }

    pub fn has(&self, name: &str) -> bool {
        self.skills.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.skills.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn count(&self) -> usize {
        self.skills.len()
    }

    /// Skills that declare `tool` in `allowed_tools`.
    pub fn by_tool(&self, tool: &str) -> Vec<Arc<dyn Skill>> {
        let mut found: Vec<Arc<dyn Skill>> = self
            .skills
            .values()
            .filter(|s| s.allowed_tools().contains(&tool))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.name().cmp(b.name()));
        found
    }

    /// `(name, description)` pairs, sorted by name.
    pub fn catalog(&self) -> Vec<(String, String)> {
        self.list()
            .into_iter()
            .filter_map(|name| {
                let skill = self.skills.get(&name)?;
                Some((name, skill.description().to_string()))
            })
            .collect()
    }
}
