use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use serde_json::Value as JsonValue;
use uuid::Uuid;

use super::{descriptor::ComponentDescriptor, factory::Component};
use crate::core::AppResult;

/// A live component together with its bookkeeping.
pub struct ComponentInstance {
    id: Uuid,
    descriptor: Arc<ComponentDescriptor>,
    component: Arc<dyn Component>,
    session_key: Option<String>,
    created_at: Instant,
    /// Microseconds since `created_at` of the last resolution
    last_access_us: AtomicU64,
}

impl ComponentInstance {
    pub fn new(
        descriptor: Arc<ComponentDescriptor>,
        component: Arc<dyn Component>,
        session_key: Option<String>,
        now: Instant,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            descriptor,
            component,
            session_key,
            created_at: now,
            last_access_us: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn descriptor(&self) -> &Arc<ComponentDescriptor> {
        &self.descriptor
    }

    pub fn component(&self) -> &Arc<dyn Component> {
        &self.component
    }

    pub fn session_key(&self) -> Option<&str> {
        self.session_key.as_deref()
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn last_access(&self) -> Instant {
        self.created_at + Duration::from_micros(self.last_access_us.load(Ordering::Acquire))
    }

    /// Record an access. Never moves the access time backwards.
    pub fn touch(&self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.created_at).as_micros();
        let elapsed = u64::try_from(elapsed).unwrap_or(u64::MAX);
        self.last_access_us.fetch_max(elapsed, Ordering::AcqRel);
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_access())
    }

    pub fn invoke(&self, method: &str, args: &[JsonValue]) -> AppResult<JsonValue> {
        self.component.invoke(method, args)
    }
}

impl fmt::Debug for ComponentInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentInstance")
            .field("id", &self.id)
            .field("name", &self.descriptor.name)
            .field("scope", &self.descriptor.scope)
            .field("session_key", &self.session_key)
            .finish()
    }
}
