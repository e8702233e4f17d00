//! Process-wide synchronization state shared by every model.

use std::sync::Arc;

use crate::client::SearchClient;
use crate::reconcile::SettingsReconciler;
use crate::registry::IndexRegistry;

/// One remote client, one environment, and the caches built on top of them.
pub struct SyncContext {
    reconciler: SettingsReconciler,
    registry: IndexRegistry,
}

impl SyncContext {
    pub fn new(client: Arc<dyn SearchClient>, environment: Option<String>) -> Arc<Self> {
        Arc::new(Self {
            reconciler: SettingsReconciler::new(client, environment),
            registry: IndexRegistry::new(),
        })
    }

    pub fn client(&self) -> &Arc<dyn SearchClient> {
        self.reconciler.client()
    }

    pub fn environment(&self) -> Option<&str> {
        self.reconciler.environment()
    }

    pub fn reconciler(&self) -> &SettingsReconciler {
        &self.reconciler
    }

    pub fn registry(&self) -> &IndexRegistry {
        &self.registry
    }
}
