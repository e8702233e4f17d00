//! Declarative index configuration.
//!
//! A model declares one primary index with [`IndexConfiguration::builder`].
//! The primary may carry additional indexes (with their own attributes and
//! settings) and secondary indexes (replicas, or legacy "slaves") that share
//! its documents but rank them differently.
//!
//! ```text
//! Color (primary, "Color_test")
//! ├── add_replica "Color_by_hex" (inherit)
//! └── add_index "Color_names"
//!     └── add_replica "Color_names_desc"
//! ```
//!
//! Invalid declarations fail at [`IndexConfigurationBuilder::build`] with a
//! [`ConfigError`]; nothing is deferred to indexing time.
//!
//! ```rust
//! use index_sync_core::config::{IndexConfiguration, IndexKind};
//! use index_sync_core::store::JsonRecord;
//! use serde_json::json;
//!
//! let config = IndexConfiguration::<JsonRecord>::builder("Color")
//!     .attributes(["name", "short_name", "hex"])
//!     .setting("customRanking", json!(["asc(hex)"]))
//!     .add_replica("Color_by_name", |r| r.inherit(true))
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(config.secondaries()[0].kind(), IndexKind::Replica { inherit: true });
//! assert_eq!(config.to_settings(None)["replicas"], json!(["Color_by_name"]));
//! ```

use std::fmt;
use std::sync::Arc;

use serde_json::{json, Map, Value};

use crate::error::ConfigError;
use crate::jobs::JobQueue;
use crate::models::object_id_string;
use crate::settings::{merge, take_secondary_listing, IndexSettings, REPLICAS, SLAVES};
use crate::store::Record;

pub type AttributeFn<R> = Arc<dyn Fn(&R) -> anyhow::Result<Value> + Send + Sync>;
pub type SerializeFn<R> = Arc<dyn Fn(&R) -> anyhow::Result<Map<String, Value>> + Send + Sync>;
pub type PredicateFn<R> = Arc<dyn Fn(&R) -> bool + Send + Sync>;

// ═══════════════════════════════════════════════════════════════════════
// Attributes and constraints
// ═══════════════════════════════════════════════════════════════════════

/// Where an attribute value comes from.
pub enum AttributeSource<R> {
    /// Read the record field of the same name.
    Field,
    /// Compute the value from the record.
    Computed(AttributeFn<R>),
}

impl<R> Clone for AttributeSource<R> {
    fn clone(&self) -> Self {
        match self {
            Self::Field => Self::Field,
            Self::Computed(f) => Self::Computed(Arc::clone(f)),
        }
    }
}

/// A named attribute of the remote document.
pub struct Attribute<R> {
    pub name: String,
    pub source: AttributeSource<R>,
}

impl<R> Clone for Attribute<R> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            source: self.source.clone(),
        }
    }
}

impl<R> Attribute<R> {
    fn field(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: AttributeSource::Field,
        }
    }

    fn computed(name: impl Into<String>, f: AttributeFn<R>) -> Self {
        Self {
            name: name.into(),
            source: AttributeSource::Computed(f),
        }
    }
}

/// An indexing condition (`if` / `unless`).
///
/// Field constraints are also used by change detection: a record whose
/// constraint fields did not change cannot have flipped its condition.
pub enum Constraint<R> {
    /// Truthiness of a record field.
    Field(String),
    /// Every inner constraint must pass.
    AllOf(Vec<Constraint<R>>),
    /// Arbitrary predicate. Its inputs are unknown, so it always counts as
    /// potentially changed.
    Callable(PredicateFn<R>),
}

impl<R> Clone for Constraint<R> {
    fn clone(&self) -> Self {
        match self {
            Self::Field(name) => Self::Field(name.clone()),
            Self::AllOf(all) => Self::AllOf(all.clone()),
            Self::Callable(f) => Self::Callable(Arc::clone(f)),
        }
    }
}

impl<R: Record> Constraint<R> {
    pub fn field(name: impl Into<String>) -> Self {
        Self::Field(name.into())
    }

    pub fn all_of(constraints: impl IntoIterator<Item = Constraint<R>>) -> Self {
        Self::AllOf(constraints.into_iter().collect())
    }

    pub fn callable(f: impl Fn(&R) -> bool + Send + Sync + 'static) -> Self {
        Self::Callable(Arc::new(f))
    }

    pub fn passes(&self, record: &R) -> bool {
        match self {
            Self::Field(name) => truthy(record.field(name).as_ref()),
            Self::AllOf(all) => all.iter().all(|c| c.passes(record)),
            Self::Callable(f) => f(record),
        }
    }
}

/// Only `null`, `false` and a missing field are falsy.
fn truthy(value: Option<&Value>) -> bool {
    !matches!(value, None | Some(Value::Null) | Some(Value::Bool(false)))
}

/// Switch that turns every remote operation of a configuration into a no-op.
pub enum DisableIndexing {
    Flag(bool),
    /// Evaluated on every operation.
    Computed(Arc<dyn Fn() -> bool + Send + Sync>),
}

impl Clone for DisableIndexing {
    fn clone(&self) -> Self {
        match self {
            Self::Flag(b) => Self::Flag(*b),
            Self::Computed(f) => Self::Computed(Arc::clone(f)),
        }
    }
}

impl DisableIndexing {
    pub fn is_disabled(&self) -> bool {
        match self {
            Self::Flag(b) => *b,
            Self::Computed(f) => f(),
        }
    }
}

/// Role of an index within a model's configuration tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    Primary,
    /// Extra index with its own attributes, populated alongside the primary.
    Additional,
    /// Secondary index populated by the service from its primary.
    Replica { inherit: bool },
    /// Deprecated name for [`IndexKind::Replica`].
    Slave { inherit: bool },
}

impl IndexKind {
    pub fn is_secondary(&self) -> bool {
        matches!(self, IndexKind::Replica { .. } | IndexKind::Slave { .. })
    }

    pub fn inherits(&self) -> bool {
        matches!(
            self,
            IndexKind::Replica { inherit: true } | IndexKind::Slave { inherit: true }
        )
    }
}

// ═══════════════════════════════════════════════════════════════════════
// IndexConfiguration
// ═══════════════════════════════════════════════════════════════════════

/// One index declaration, with its nested indexes.
pub struct IndexConfiguration<R> {
    model: String,
    index_name: String,
    per_environment: bool,
    kind: IndexKind,
    id_field: String,
    attributes: Vec<Attribute<R>>,
    additional_attributes: Vec<Attribute<R>>,
    serializer: Option<SerializeFn<R>>,
    settings: IndexSettings,
    index_if: Option<Constraint<R>>,
    index_unless: Option<Constraint<R>>,
    disable_indexing: Option<DisableIndexing>,
    synchronous: bool,
    raise_on_failure: bool,
    sanitize: bool,
    force_utf8_encoding: bool,
    check_settings: bool,
    auto_index: bool,
    auto_remove: bool,
    enqueue: Option<Arc<dyn JobQueue>>,
    secondaries: Vec<Arc<IndexConfiguration<R>>>,
    /// Engine settings of the parent, kept for inheriting secondaries.
    inherited: Option<IndexSettings>,
}

impl<R> Clone for IndexConfiguration<R> {
    fn clone(&self) -> Self {
        Self {
            model: self.model.clone(),
            index_name: self.index_name.clone(),
            per_environment: self.per_environment,
            kind: self.kind,
            id_field: self.id_field.clone(),
            attributes: self.attributes.clone(),
            additional_attributes: self.additional_attributes.clone(),
            serializer: self.serializer.clone(),
            settings: self.settings.clone(),
            index_if: self.index_if.clone(),
            index_unless: self.index_unless.clone(),
            disable_indexing: self.disable_indexing.clone(),
            synchronous: self.synchronous,
            raise_on_failure: self.raise_on_failure,
            sanitize: self.sanitize,
            force_utf8_encoding: self.force_utf8_encoding,
            check_settings: self.check_settings,
            auto_index: self.auto_index,
            auto_remove: self.auto_remove,
            enqueue: self.enqueue.clone(),
            secondaries: self.secondaries.clone(),
            inherited: self.inherited.clone(),
        }
    }
}

impl<R> fmt::Debug for IndexConfiguration<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexConfiguration")
            .field("model", &self.model)
            .field("index_name", &self.index_name)
            .field("kind", &self.kind)
            .field("secondaries", &self.secondaries.len())
            .finish_non_exhaustive()
    }
}

/// Default index name for a model: namespace separators become underscores.
pub fn default_index_name(model: &str) -> String {
    model.replace("::", "_")
}

impl<R: Record> IndexConfiguration<R> {
    /// Start declaring the primary index of `model`.
    pub fn builder(model: impl Into<String>) -> IndexConfigurationBuilder<R> {
        let model = model.into();
        let name = default_index_name(&model);
        IndexConfigurationBuilder::new(model, name, IndexKind::Primary)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// The declared name, before environment qualification.
    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    /// The remote index name: `<name>_<environment>` when per-environment.
    pub fn resolved_name(&self, environment: Option<&str>) -> String {
        match environment {
            Some(env) if self.per_environment => format!("{}_{}", self.index_name, env),
            _ => self.index_name.clone(),
        }
    }

    pub fn kind(&self) -> IndexKind {
        self.kind
    }

    pub fn is_secondary(&self) -> bool {
        self.kind.is_secondary()
    }

    pub fn id_field(&self) -> &str {
        &self.id_field
    }

    /// Allow-listed attributes. Empty means "all native fields".
    pub fn attributes(&self) -> &[Attribute<R>] {
        &self.attributes
    }

    pub fn additional_attributes(&self) -> &[Attribute<R>] {
        &self.additional_attributes
    }

    pub fn serializer(&self) -> Option<&SerializeFn<R>> {
        self.serializer.as_ref()
    }

    pub fn settings(&self) -> &IndexSettings {
        &self.settings
    }

    pub fn index_if(&self) -> Option<&Constraint<R>> {
        self.index_if.as_ref()
    }

    pub fn index_unless(&self) -> Option<&Constraint<R>> {
        self.index_unless.as_ref()
    }

    pub fn is_conditional(&self) -> bool {
        self.index_if.is_some() || self.index_unless.is_some()
    }

    /// Whether the record satisfies this configuration's conditions.
    pub fn is_indexable(&self, record: &R) -> bool {
        let if_ok = self.index_if.as_ref().map_or(true, |c| c.passes(record));
        let unless_ok = self.index_unless.as_ref().map_or(true, |c| !c.passes(record));
        if_ok && unless_ok
    }

    /// The record's remote object id, rendered as a string (may be blank).
    pub fn object_id_of(&self, record: &R) -> String {
        object_id_string(record.field(&self.id_field).as_ref())
    }

    pub fn indexing_disabled(&self) -> bool {
        self.disable_indexing
            .as_ref()
            .map_or(false, DisableIndexing::is_disabled)
    }

    pub fn synchronous(&self) -> bool {
        self.synchronous
    }

    pub fn raise_on_failure(&self) -> bool {
        self.raise_on_failure
    }

    pub fn sanitize(&self) -> bool {
        self.sanitize
    }

    pub fn force_utf8_encoding(&self) -> bool {
        self.force_utf8_encoding
    }

    pub fn check_settings(&self) -> bool {
        self.check_settings
    }

    pub fn auto_index(&self) -> bool {
        self.auto_index
    }

    pub fn auto_remove(&self) -> bool {
        self.auto_remove
    }

    pub fn enqueue(&self) -> Option<&Arc<dyn JobQueue>> {
        self.enqueue.as_ref()
    }

    /// Directly nested configurations, additional and secondary.
    pub fn secondaries(&self) -> &[Arc<IndexConfiguration<R>>] {
        &self.secondaries
    }

    /// Engine settings as declared, plus the secondary listing when this
    /// index has replicas.
    pub fn to_settings(&self, environment: Option<&str>) -> Map<String, Value> {
        let mut map = self.settings.to_map();
        let listed: Vec<&Arc<IndexConfiguration<R>>> = self
            .secondaries
            .iter()
            .filter(|c| c.is_secondary())
            .collect();
        if !listed.is_empty() {
            let legacy = listed
                .iter()
                .any(|c| matches!(c.kind, IndexKind::Slave { .. }));
            let names: Vec<String> = listed
                .iter()
                .map(|c| c.resolved_name(environment))
                .collect();
            map.insert(
                if legacy { SLAVES } else { REPLICAS }.to_string(),
                json!(names),
            );
        }
        map
    }

    /// Settings this index should end up with.
    ///
    /// An inheriting secondary starts from its parent's settings, overlays
    /// its own, and never carries a secondary listing.
    pub fn desired_settings(&self, environment: Option<&str>) -> Map<String, Value> {
        match &self.inherited {
            Some(parent) if self.kind.inherits() => {
                let mut merged = merge(parent.as_map(), &self.to_settings(environment));
                take_secondary_listing(&mut merged);
                merged
            }
            _ => self.to_settings(environment),
        }
    }

    /// A standalone copy of this configuration targeting `name`, used for
    /// temporary-index rebuilds.
    pub(crate) fn temporary(&self, name: String, check_settings: bool) -> Self {
        let mut tmp = self.clone();
        tmp.index_name = name;
        tmp.per_environment = false;
        tmp.kind = IndexKind::Primary;
        tmp.secondaries = Vec::new();
        tmp.inherited = None;
        tmp.check_settings = check_settings;
        tmp
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Builder
// ═══════════════════════════════════════════════════════════════════════

/// Options a parent passes down to nested configurations that did not set
/// them explicitly.
struct Inherited {
    raise_on_failure: bool,
    sanitize: bool,
    force_utf8_encoding: bool,
    settings: IndexSettings,
}

/// Fluent builder for [`IndexConfiguration`].
///
/// The first invalid call is remembered and reported by [`build`](Self::build).
pub struct IndexConfigurationBuilder<R> {
    config: IndexConfiguration<R>,
    children: Vec<IndexConfigurationBuilder<R>>,
    raise_on_failure: Option<bool>,
    sanitize: Option<bool>,
    force_utf8_encoding: Option<bool>,
    error: Option<ConfigError>,
}

impl<R: Record> IndexConfigurationBuilder<R> {
    fn new(model: String, index_name: String, kind: IndexKind) -> Self {
        Self {
            config: IndexConfiguration {
                model,
                index_name,
                per_environment: false,
                kind,
                id_field: "id".to_string(),
                attributes: Vec::new(),
                additional_attributes: Vec::new(),
                serializer: None,
                settings: IndexSettings::new(),
                index_if: None,
                index_unless: None,
                disable_indexing: None,
                synchronous: false,
                raise_on_failure: true,
                sanitize: false,
                force_utf8_encoding: false,
                check_settings: true,
                auto_index: true,
                auto_remove: true,
                enqueue: None,
                secondaries: Vec::new(),
                inherited: None,
            },
            children: Vec::new(),
            raise_on_failure: None,
            sanitize: None,
            force_utf8_encoding: None,
            error: None,
        }
    }

    fn fail(mut self, error: ConfigError) -> Self {
        if self.error.is_none() {
            self.error = Some(error);
        }
        self
    }

    fn is_nested(&self) -> bool {
        self.config.kind != IndexKind::Primary
    }

    fn reject_on_replica(self) -> Result<Self, Self> {
        if self.config.kind.is_secondary() {
            let name = self.config.index_name.clone();
            Err(self.fail(ConfigError::AttributesOnReplica(name)))
        } else {
            Ok(self)
        }
    }

    pub fn index_name(mut self, name: impl Into<String>) -> Self {
        self.config.index_name = name.into();
        self
    }

    /// Suffix the remote index name with the environment.
    pub fn per_environment(mut self, enabled: bool) -> Self {
        self.config.per_environment = enabled;
        self
    }

    /// Record field holding the object id. Defaults to `id`.
    pub fn id_field(mut self, field: impl Into<String>) -> Self {
        self.config.id_field = field.into();
        self
    }

    /// Allow-list one record field.
    pub fn attribute(self, name: impl Into<String>) -> Self {
        match self.reject_on_replica() {
            Ok(mut b) => {
                b.config.attributes.push(Attribute::field(name));
                b
            }
            Err(b) => b,
        }
    }

    /// Allow-list several record fields.
    pub fn attributes<I, S>(self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        names.into_iter().fold(self, |b, n| b.attribute(n))
    }

    /// Allow-list an attribute computed from the record.
    pub fn attribute_with(
        self,
        name: impl Into<String>,
        f: impl Fn(&R) -> anyhow::Result<Value> + Send + Sync + 'static,
    ) -> Self {
        match self.reject_on_replica() {
            Ok(mut b) => {
                b.config
                    .attributes
                    .push(Attribute::computed(name, Arc::new(f)));
                b
            }
            Err(b) => b,
        }
    }

    /// Add a field on top of the allow-list (or of all native fields).
    pub fn add_attribute(self, name: impl Into<String>) -> Self {
        match self.reject_on_replica() {
            Ok(mut b) => {
                b.config.additional_attributes.push(Attribute::field(name));
                b
            }
            Err(b) => b,
        }
    }

    /// Add a computed attribute on top of the base attributes.
    pub fn add_attribute_with(
        self,
        name: impl Into<String>,
        f: impl Fn(&R) -> anyhow::Result<Value> + Send + Sync + 'static,
    ) -> Self {
        match self.reject_on_replica() {
            Ok(mut b) => {
                b.config
                    .additional_attributes
                    .push(Attribute::computed(name, Arc::new(f)));
                b
            }
            Err(b) => b,
        }
    }

    /// Replace attribute extraction with a custom serializer.
    pub fn serializer(
        self,
        f: impl Fn(&R) -> anyhow::Result<Map<String, Value>> + Send + Sync + 'static,
    ) -> Self {
        match self.reject_on_replica() {
            Ok(mut b) => {
                b.config.serializer = Some(Arc::new(f));
                b
            }
            Err(b) => b,
        }
    }

    /// Emit `_geoloc` from two numeric fields.
    pub fn geoloc(self, lat_field: impl Into<String>, lng_field: impl Into<String>) -> Self {
        let (lat, lng) = (lat_field.into(), lng_field.into());
        self.add_attribute_with("_geoloc", move |r: &R| {
            Ok(json!({
                "lat": to_f64(r.field(&lat).as_ref()),
                "lng": to_f64(r.field(&lng).as_ref()),
            }))
        })
    }

    /// Emit a fixed `_tags` list.
    pub fn tags<I, S>(self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let tags: Vec<String> = tags.into_iter().map(Into::into).collect();
        self.add_attribute_with("_tags", move |_: &R| Ok(json!(tags)))
    }

    /// Emit `_tags` computed from the record. A scalar is wrapped in a list.
    pub fn tags_with(
        self,
        f: impl Fn(&R) -> anyhow::Result<Value> + Send + Sync + 'static,
    ) -> Self {
        self.add_attribute_with("_tags", move |r: &R| {
            Ok(match f(r)? {
                Value::Array(a) => Value::Array(a),
                other => Value::Array(vec![other]),
            })
        })
    }

    /// Set one remote engine option.
    pub fn setting(mut self, name: &str, value: Value) -> Self {
        match self.config.settings.set(name, value) {
            Ok(()) => self,
            Err(e) => self.fail(e),
        }
    }

    pub fn searchable_attributes<I, S>(self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.setting("searchableAttributes", string_list(names))
    }

    pub fn attributes_for_faceting<I, S>(self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.setting("attributesForFaceting", string_list(names))
    }

    pub fn ranking<I, S>(self, criteria: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.setting("ranking", string_list(criteria))
    }

    pub fn custom_ranking<I, S>(self, criteria: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.setting("customRanking", string_list(criteria))
    }

    pub fn hits_per_page(self, n: u64) -> Self {
        self.setting("hitsPerPage", json!(n))
    }

    pub fn typo_tolerance(self, enabled: bool) -> Self {
        self.setting("typoTolerance", json!(enabled))
    }

    pub fn index_if(mut self, constraint: Constraint<R>) -> Self {
        self.config.index_if = Some(constraint);
        self
    }

    pub fn index_unless(mut self, constraint: Constraint<R>) -> Self {
        self.config.index_unless = Some(constraint);
        self
    }

    pub fn disable_indexing(mut self, disabled: bool) -> Self {
        self.config.disable_indexing = Some(DisableIndexing::Flag(disabled));
        self
    }

    pub fn disable_indexing_with(mut self, f: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        self.config.disable_indexing = Some(DisableIndexing::Computed(Arc::new(f)));
        self
    }

    /// Wait for every remote write to be applied.
    pub fn synchronous(mut self, enabled: bool) -> Self {
        self.config.synchronous = enabled;
        self
    }

    pub fn raise_on_failure(mut self, enabled: bool) -> Self {
        self.raise_on_failure = Some(enabled);
        self
    }

    /// Strip HTML from string attributes.
    pub fn sanitize(mut self, enabled: bool) -> Self {
        self.sanitize = Some(enabled);
        self
    }

    /// Convert binary fields to text lossily instead of failing.
    pub fn force_utf8_encoding(mut self, enabled: bool) -> Self {
        self.force_utf8_encoding = Some(enabled);
        self
    }

    /// Compare and push remote settings on first use.
    pub fn check_settings(mut self, enabled: bool) -> Self {
        self.config.check_settings = enabled;
        self
    }

    pub fn auto_index(mut self, enabled: bool) -> Self {
        if self.is_nested() {
            let name = self.config.index_name.clone();
            return self.fail(ConfigError::AutoOptionsOnNested(name));
        }
        self.config.auto_index = enabled;
        self
    }

    pub fn auto_remove(mut self, enabled: bool) -> Self {
        if self.is_nested() {
            let name = self.config.index_name.clone();
            return self.fail(ConfigError::AutoOptionsOnNested(name));
        }
        self.config.auto_remove = enabled;
        self
    }

    /// Defer automatic index and remove operations to a queue.
    pub fn enqueue(mut self, queue: Arc<dyn JobQueue>) -> Self {
        self.config.enqueue = Some(queue);
        self
    }

    /// Start from the parent's settings. Secondary indexes only.
    pub fn inherit(mut self, enabled: bool) -> Self {
        match self.config.kind {
            IndexKind::Replica { .. } => self.config.kind = IndexKind::Replica { inherit: enabled },
            IndexKind::Slave { .. } => self.config.kind = IndexKind::Slave { inherit: enabled },
            _ => {
                let name = self.config.index_name.clone();
                return self.fail(ConfigError::InheritOnNonReplica(name));
            }
        }
        self
    }

    fn nest<F>(self, name: String, kind: IndexKind, f: F) -> Self
    where
        F: FnOnce(IndexConfigurationBuilder<R>) -> IndexConfigurationBuilder<R>,
    {
        if self.config.kind.is_secondary() {
            let own = self.config.index_name.clone();
            return self.fail(ConfigError::NestedOnReplica(own));
        }
        let mixing = self.children.iter().any(|c| match kind {
            IndexKind::Replica { .. } => matches!(c.config.kind, IndexKind::Slave { .. }),
            IndexKind::Slave { .. } => matches!(c.config.kind, IndexKind::Replica { .. }),
            _ => false,
        });
        if mixing {
            return self.fail(ConfigError::MixedReplicaKinds);
        }
        let mut child = IndexConfigurationBuilder::new(self.config.model.clone(), name, kind);
        child.config.id_field = self.config.id_field.clone();
        let child = f(child);
        let mut this = self;
        this.children.push(child);
        this
    }

    /// Declare an additional index with its own attributes and settings.
    pub fn add_index<F>(self, name: impl Into<String>, f: F) -> Self
    where
        F: FnOnce(IndexConfigurationBuilder<R>) -> IndexConfigurationBuilder<R>,
    {
        self.nest(name.into(), IndexKind::Additional, f)
    }

    /// Declare a replica of this index.
    pub fn add_replica<F>(self, name: impl Into<String>, f: F) -> Self
    where
        F: FnOnce(IndexConfigurationBuilder<R>) -> IndexConfigurationBuilder<R>,
    {
        self.nest(name.into(), IndexKind::Replica { inherit: false }, f)
    }

    /// Declare a replica under the deprecated "slave" listing.
    pub fn add_slave<F>(self, name: impl Into<String>, f: F) -> Self
    where
        F: FnOnce(IndexConfigurationBuilder<R>) -> IndexConfigurationBuilder<R>,
    {
        self.nest(name.into(), IndexKind::Slave { inherit: false }, f)
    }

    /// Validate the declaration tree and freeze it.
    pub fn build(self) -> Result<Arc<IndexConfiguration<R>>, ConfigError> {
        self.build_node(None)
    }

    fn build_node(self, parent: Option<&Inherited>) -> Result<Arc<IndexConfiguration<R>>, ConfigError> {
        if let Some(e) = self.error {
            return Err(e);
        }
        let mut config = self.config;
        if config.enqueue.is_some() && config.synchronous {
            return Err(ConfigError::EnqueueWithSynchronous);
        }

        config.raise_on_failure = self
            .raise_on_failure
            .or(parent.map(|p| p.raise_on_failure))
            .unwrap_or(true);
        config.sanitize = self
            .sanitize
            .or(parent.map(|p| p.sanitize))
            .unwrap_or(false);
        config.force_utf8_encoding = self
            .force_utf8_encoding
            .or(parent.map(|p| p.force_utf8_encoding))
            .unwrap_or(false);
        if config.kind.inherits() {
            config.inherited = parent.map(|p| p.settings.clone());
        }

        let defaults = Inherited {
            raise_on_failure: config.raise_on_failure,
            sanitize: config.sanitize,
            force_utf8_encoding: config.force_utf8_encoding,
            settings: config.settings.clone(),
        };
        for child in self.children {
            config.secondaries.push(child.build_node(Some(&defaults))?);
        }
        Ok(Arc::new(config))
    }
}

fn string_list<I, S>(items: I) -> Value
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    Value::Array(items.into_iter().map(|s| Value::String(s.into())).collect())
}

/// Lenient numeric coercion: numbers and numeric strings, else `0.0`.
fn to_f64(value: Option<&Value>) -> f64 {
    match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    }
}
