//! Per-model registry of flattened configuration lists.
//!
//! A model's declaration tree is flattened once, on first use, into a
//! [`ConfigurationSet`]: the primary, then every nested configuration in
//! declaration order (depth first). The registry is a type map: each entry
//! is stored type-erased and downcast back to the model's record type.

use std::any::Any;
use std::sync::Arc;

use dashmap::DashMap;

use crate::config::IndexConfiguration;
use crate::error::ConfigError;
use crate::store::Record;

/// Every configuration of one model, primary first.
pub struct ConfigurationSet<R> {
    entries: Vec<Arc<IndexConfiguration<R>>>,
}

impl<R> std::fmt::Debug for ConfigurationSet<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.entries.iter()).finish()
    }
}

impl<R: Record> ConfigurationSet<R> {
    pub fn flatten(primary: &Arc<IndexConfiguration<R>>) -> Self {
        let mut entries = Vec::new();
        collect(primary, &mut entries);
        Self { entries }
    }

    pub fn primary(&self) -> &Arc<IndexConfiguration<R>> {
        &self.entries[0]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<IndexConfiguration<R>>> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Find a configuration by declared or resolved index name.
    pub fn find(&self, name: &str, environment: Option<&str>) -> Option<&Arc<IndexConfiguration<R>>> {
        self.entries
            .iter()
            .find(|c| c.index_name() == name || c.resolved_name(environment) == name)
    }
}

fn collect<R: Record>(config: &Arc<IndexConfiguration<R>>, out: &mut Vec<Arc<IndexConfiguration<R>>>) {
    out.push(Arc::clone(config));
    for nested in config.secondaries() {
        collect(nested, out);
    }
}

/// Model name → flattened configuration set.
#[derive(Default)]
pub struct IndexRegistry {
    sets: DashMap<String, Arc<dyn Any + Send + Sync>>,
}

impl IndexRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The flattened set for `primary`, computing it on first call.
    ///
    /// Registering a different declaration under an existing model name is
    /// an error.
    pub fn configurations_for<R: Record>(
        &self,
        primary: &Arc<IndexConfiguration<R>>,
    ) -> Result<Arc<ConfigurationSet<R>>, ConfigError> {
        let model = primary.model().to_string();
        let erased = {
            let entry = self.sets.entry(model.clone()).or_insert_with(|| {
                Arc::new(ConfigurationSet::flatten(primary)) as Arc<dyn Any + Send + Sync>
            });
            Arc::clone(entry.value())
        };
        let set = erased
            .downcast::<ConfigurationSet<R>>()
            .map_err(|_| ConfigError::ModelTypeMismatch(model.clone()))?;
        if !Arc::ptr_eq(set.primary(), primary) {
            return Err(ConfigError::DuplicateModel(model));
        }
        Ok(set)
    }

    pub fn contains(&self, model: &str) -> bool {
        self.sets.contains_key(model)
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    pub fn clear(&self) {
        self.sets.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndexKind;
    use crate::store::JsonRecord;

    #[test]
    fn flattens_depth_first() {
        let c = IndexConfiguration::<JsonRecord>::builder("Color")
            .add_replica("Color_r1", |r| r)
            .add_index("Color_other", |i| i.add_replica("Color_other_r", |r| r))
            .build()
            .unwrap();
        let set = ConfigurationSet::flatten(&c);
        let names: Vec<&str> = set.iter().map(|c| c.index_name()).collect();
        assert_eq!(names, vec!["Color", "Color_r1", "Color_other", "Color_other_r"]);
        assert_eq!(set.iter().nth(2).unwrap().kind(), IndexKind::Additional);
    }

    #[test]
    fn memoizes_per_model() {
        let registry = IndexRegistry::new();
        let c = IndexConfiguration::<JsonRecord>::builder("Color").build().unwrap();
        let a = registry.configurations_for(&c).unwrap();
        let b = registry.configurations_for(&c).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn rejects_a_second_declaration_of_the_same_model() {
        let registry = IndexRegistry::new();
        let a = IndexConfiguration::<JsonRecord>::builder("Color").build().unwrap();
        let b = IndexConfiguration::<JsonRecord>::builder("Color").build().unwrap();
        registry.configurations_for(&a).unwrap();
        assert_eq!(
            registry.configurations_for(&b).unwrap_err(),
            ConfigError::DuplicateModel("Color".into())
        );
    }

    #[test]
    fn finds_by_declared_or_resolved_name() {
        let c = IndexConfiguration::<JsonRecord>::builder("Color")
            .add_replica("Color_r1", |r| r.per_environment(true))
            .build()
            .unwrap();
        let set = ConfigurationSet::flatten(&c);
        assert!(set.find("Color_r1", Some("test")).is_some());
        assert!(set.find("Color_r1_test", Some("test")).is_some());
        assert!(set.find("Nope", Some("test")).is_none());
    }
}
