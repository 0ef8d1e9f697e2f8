//! Hook lookup capability.
//!
//! Workers resolve the endpoints for a job through `HookSource` at the moment
//! they pick the job up. The source is injected rather than read from global
//! state, so the dispatcher can be exercised against a fake registry.

use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::models::{EventType, HookDescriptor, TenantId};

/// Read-only lookup of the hooks registered for a tenant and event type.
#[async_trait::async_trait]
pub trait HookSource: Send + Sync + 'static {
    /// Returns the hooks for `(tenant_id, event_type)` in delivery order.
    ///
    /// Unknown tenants and unknown event types yield an empty list, never an
    /// error.
    async fn lookup_hooks(&self, tenant_id: &TenantId, event_type: EventType)
        -> Vec<HookDescriptor>;
}

type HookTable = HashMap<TenantId, HashMap<EventType, Vec<HookDescriptor>>>;

/// In-memory hook registry keyed by tenant and event type.
///
/// Lookups return a snapshot; a registration or `replace_all` that lands while
/// a worker is delivering does not affect the job already in progress.
#[derive(Debug, Default)]
pub struct HookRegistry {
    hooks: RwLock<HookTable>,
}

impl HookRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry from `(tenant, event type, hook)` triples, keeping
    /// the iteration order for hooks that share a key.
    pub fn from_hooks<I>(hooks: I) -> Self
    where
        I: IntoIterator<Item = (TenantId, EventType, HookDescriptor)>,
    {
        Self { hooks: RwLock::new(build_table(hooks)) }
    }

    /// Appends a hook to the end of the list for `(tenant_id, event_type)`.
    pub async fn register(&self, tenant_id: TenantId, event_type: EventType, hook: HookDescriptor) {
        self.hooks
            .write()
            .await
            .entry(tenant_id)
            .or_default()
            .entry(event_type)
            .or_default()
            .push(hook);
    }

    /// Swaps the whole table, e.g. after reloading hooks from storage.
    pub async fn replace_all<I>(&self, hooks: I)
    where
        I: IntoIterator<Item = (TenantId, EventType, HookDescriptor)>,
    {
        let table = build_table(hooks);
        *self.hooks.write().await = table;
    }

    /// Number of hooks across all tenants and event types.
    pub async fn len(&self) -> usize {
        self.hooks.read().await.values().flat_map(HashMap::values).map(Vec::len).sum()
    }

    /// Returns `true` when no hook is registered.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn build_table<I>(hooks: I) -> HookTable
where
    I: IntoIterator<Item = (TenantId, EventType, HookDescriptor)>,
{
    let mut table = HookTable::new();
    for (tenant_id, event_type, hook) in hooks {
        table.entry(tenant_id).or_default().entry(event_type).or_default().push(hook);
    }
    table
}

#[async_trait::async_trait]
impl HookSource for HookRegistry {
    async fn lookup_hooks(
        &self,
        tenant_id: &TenantId,
        event_type: EventType,
    ) -> Vec<HookDescriptor> {
        self.hooks
            .read()
            .await
            .get(tenant_id)
            .and_then(|by_event| by_event.get(&event_type))
            .cloned()
            .unwrap_or_default()
    }
}
