//! Model declarations from TOML.
//!
//! Turns each `[[models]]` entry into an [`IndexConfiguration`] over
//! [`JsonRecord`]s, opens its JSON-lines source, and registers the result in
//! a [`ModelCatalog`] the CLI commands operate on.
//!
//! | TOML key | Builder call |
//! |----------|--------------|
//! | `attributes` | `attributes` |
//! | `geoloc = { lat, lng }` | `geoloc` |
//! | `tags` | `tags` |
//! | `index_if` / `index_unless` | field constraints (a list means all of) |
//! | `settings` | `setting` per key |
//! | `indexes` / `replicas` / `slaves` | `add_index` / `add_replica` / `add_slave` |

use std::sync::Arc;

use anyhow::{Context, Result};

use index_sync_core::catalog::ModelCatalog;
use index_sync_core::client::SearchClient;
use index_sync_core::config::{Constraint, IndexConfiguration, IndexConfigurationBuilder};
use index_sync_core::context::SyncContext;
use index_sync_core::jobs::JobQueue;
use index_sync_core::searchable::Searchable;
use index_sync_core::store::JsonRecord;

use crate::config::{Config, FieldCondition, ModelConfig, NestedIndexConfig};
use crate::jsonl_store::JsonlStore;
use crate::spool::SpoolQueue;

type Builder = IndexConfigurationBuilder<JsonRecord>;

/// Everything the CLI needs: shared sync state, every model, the spool.
pub struct Fleet {
    pub context: Arc<SyncContext>,
    pub catalog: ModelCatalog,
    pub spool: Option<Arc<SpoolQueue>>,
}

/// Build the model catalog for `config` on top of `client`.
pub fn load_fleet(config: &Config, client: Arc<dyn SearchClient>) -> Result<Fleet> {
    let context = SyncContext::new(client, Some(config.indexing.environment.clone()));
    let spool = config
        .queue
        .spool
        .as_ref()
        .map(|p| Arc::new(SpoolQueue::new(p.clone())));

    let mut catalog = ModelCatalog::new();
    for model in &config.models {
        let queue = match (&spool, model.enqueue) {
            (Some(s), true) => Some(s.clone() as Arc<dyn JobQueue>),
            _ => None,
        };
        let primary = build_configuration(model, config.indexing.raise_on_failure, queue)
            .with_context(|| format!("invalid model '{}'", model.name))?;
        let store = JsonlStore::open(&model.source, &model.id_field)
            .with_context(|| format!("Failed to load records for model '{}'", model.name))?;
        let searchable = Searchable::register(context.clone(), primary, Arc::new(store))?;
        catalog.register(searchable)?;
    }

    Ok(Fleet {
        context,
        catalog,
        spool,
    })
}

/// Translate one `[[models]]` entry into a validated configuration tree.
pub fn build_configuration(
    model: &ModelConfig,
    default_raise_on_failure: bool,
    queue: Option<Arc<dyn JobQueue>>,
) -> Result<Arc<IndexConfiguration<JsonRecord>>> {
    let mut b = IndexConfiguration::<JsonRecord>::builder(model.name.clone())
        .index_name(model.declared_index_name())
        .per_environment(model.per_environment)
        .id_field(model.id_field.clone())
        .disable_indexing(model.disable_indexing)
        .synchronous(model.synchronous)
        .raise_on_failure(model.raise_on_failure.unwrap_or(default_raise_on_failure))
        .sanitize(model.sanitize)
        .force_utf8_encoding(model.force_utf8_encoding)
        .check_settings(model.check_settings);

    if !model.attributes.is_empty() {
        b = b.attributes(model.attributes.iter().cloned());
    }
    if let Some(geo) = &model.geoloc {
        b = b.geoloc(geo.lat.clone(), geo.lng.clone());
    }
    if !model.tags.is_empty() {
        b = b.tags(model.tags.iter().cloned());
    }
    b = apply_conditions(b, model.index_if.as_ref(), model.index_unless.as_ref());
    for (name, value) in &model.settings {
        b = b.setting(name, value.clone());
    }
    if let Some(queue) = queue {
        b = b.enqueue(queue);
    }

    for nested in &model.indexes {
        let per_env = nested.per_environment.unwrap_or(model.per_environment);
        b = b.add_index(nested.name.clone(), |n| apply_nested(n, nested, per_env));
    }
    for nested in &model.replicas {
        let per_env = nested.per_environment.unwrap_or(model.per_environment);
        b = b.add_replica(nested.name.clone(), |n| apply_nested(n, nested, per_env));
    }
    for nested in &model.slaves {
        let per_env = nested.per_environment.unwrap_or(model.per_environment);
        b = b.add_slave(nested.name.clone(), |n| apply_nested(n, nested, per_env));
    }

    Ok(b.build()?)
}

fn apply_nested(mut b: Builder, nested: &NestedIndexConfig, per_environment: bool) -> Builder {
    b = b
        .per_environment(per_environment)
        .check_settings(nested.check_settings);
    if nested.inherit {
        b = b.inherit(true);
    }
    if !nested.attributes.is_empty() {
        b = b.attributes(nested.attributes.iter().cloned());
    }
    b = apply_conditions(b, nested.index_if.as_ref(), nested.index_unless.as_ref());
    for (name, value) in &nested.settings {
        b = b.setting(name, value.clone());
    }
    for replica in &nested.replicas {
        let per_env = replica.per_environment.unwrap_or(per_environment);
        b = b.add_replica(replica.name.clone(), |r| apply_nested(r, replica, per_env));
    }
    b
}

fn apply_conditions(
    mut b: Builder,
    index_if: Option<&FieldCondition>,
    index_unless: Option<&FieldCondition>,
) -> Builder {
    if let Some(cond) = index_if {
        b = b.index_if(constraint(cond));
    }
    if let Some(cond) = index_unless {
        b = b.index_unless(constraint(cond));
    }
    b
}

fn constraint(cond: &FieldCondition) -> Constraint<JsonRecord> {
    match cond {
        FieldCondition::One(field) => Constraint::field(field.clone()),
        FieldCondition::All(fields) => {
            Constraint::all_of(fields.iter().map(|f| Constraint::field(f.clone())))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use index_sync_core::config::IndexKind;
    use index_sync_core::ConfigError;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn model(name: &str) -> ModelConfig {
        ModelConfig {
            name: name.to_string(),
            source: "unused.jsonl".into(),
            index_name: None,
            per_environment: false,
            id_field: "id".into(),
            attributes: Vec::new(),
            geoloc: None,
            tags: Vec::new(),
            index_if: None,
            index_unless: None,
            disable_indexing: false,
            synchronous: false,
            raise_on_failure: None,
            sanitize: false,
            force_utf8_encoding: false,
            check_settings: true,
            enqueue: false,
            settings: BTreeMap::new(),
            indexes: Vec::new(),
            replicas: Vec::new(),
            slaves: Vec::new(),
        }
    }

    fn nested(name: &str) -> NestedIndexConfig {
        NestedIndexConfig {
            name: name.to_string(),
            per_environment: None,
            attributes: Vec::new(),
            index_if: None,
            index_unless: None,
            inherit: false,
            check_settings: true,
            settings: BTreeMap::new(),
            replicas: Vec::new(),
        }
    }

    #[test]
    fn per_environment_flows_to_replicas() {
        let mut m = model("Contact");
        m.per_environment = true;
        m.settings.insert("hitsPerPage".into(), json!(5));
        let mut r = nested("Contact_by_name");
        r.inherit = true;
        m.replicas.push(r);

        let config = build_configuration(&m, true, None).unwrap();
        assert_eq!(config.resolved_name(Some("prod")), "Contact_prod");
        let replica = &config.secondaries()[0];
        assert_eq!(replica.kind(), IndexKind::Replica { inherit: true });
        assert_eq!(replica.resolved_name(Some("prod")), "Contact_by_name_prod");
        assert_eq!(
            config.to_settings(Some("prod"))["replicas"],
            json!(["Contact_by_name_prod"])
        );
    }

    #[test]
    fn unknown_settings_surface_as_config_errors() {
        let mut m = model("Contact");
        m.settings.insert("notARealSetting".into(), json!(true));
        let err = build_configuration(&m, true, None).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::UnknownSetting(_))
        ));
    }

    #[test]
    fn attributes_on_replicas_are_rejected() {
        let mut m = model("Contact");
        let mut r = nested("Contact_r");
        r.attributes.push("name".into());
        m.replicas.push(r);
        assert!(build_configuration(&m, true, None).is_err());
    }

    #[test]
    fn field_conditions_gate_indexing() {
        let mut m = model("Contact");
        m.index_if = Some(FieldCondition::All(vec!["active".into(), "confirmed".into()]));
        m.index_unless = Some(FieldCondition::One("hidden".into()));
        let config = build_configuration(&m, false, None).unwrap();
        assert!(!config.raise_on_failure());

        let rec = |v| JsonRecord::from_json(v).unwrap();
        assert!(config.is_indexable(&rec(json!({ "active": true, "confirmed": 1 }))));
        assert!(!config.is_indexable(&rec(json!({ "active": true }))));
        assert!(!config.is_indexable(&rec(json!({ "active": true, "confirmed": true, "hidden": true }))));
    }
}
