//! Component creation strategy
//!
//! The bean manager never knows concrete component types. It asks a
//! [`ComponentFactory`] to build an instance from a descriptor and the
//! collaborators resolved from the descriptor's references.

use std::{any::Any, collections::HashMap, fmt, sync::Arc};

use serde_json::Value as JsonValue;

use super::descriptor::ComponentDescriptor;
use crate::{
    core::{AppError, AppResult},
    naming::NamingValue,
};

/// A managed component instance.
pub trait Component: Any + Send + Sync {
    /// Invoke a business method by name
    fn invoke(&self, method: &str, args: &[JsonValue]) -> AppResult<JsonValue>;

    /// Runs once after construction, before the instance is handed out
    fn post_construct(&self) -> AppResult<()> {
        Ok(())
    }

    /// Runs once when the instance is destroyed or evicted
    fn pre_destroy(&self) {}
}

/// Collaborators injected into a component at construction time
#[derive(Default, Clone)]
pub struct Collaborators {
    values: HashMap<String, NamingValue>,
}

impl Collaborators {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, field: impl Into<String>, value: NamingValue) {
        self.values.insert(field.into(), value);
    }

    /// Typed collaborator, `None` when absent or of another type
    pub fn get<T: Any + Send + Sync>(&self, field: &str) -> Option<Arc<T>> {
        self.values
            .get(field)
            .and_then(|value| value.clone().downcast::<T>().ok())
    }

    pub fn raw(&self, field: &str) -> Option<&NamingValue> {
        self.values.get(field)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut fields: Vec<_> = self.values.keys().collect();
        fields.sort();
        f.debug_struct("Collaborators").field("fields", &fields).finish()
    }
}

/// Builds component instances. May block; it is always called off the
/// async executor.
pub trait ComponentFactory: Send + Sync {
    fn construct(
        &self,
        descriptor: &ComponentDescriptor,
        collaborators: &Collaborators,
    ) -> AppResult<Arc<dyn Component>>;
}

pub type ComponentBuilder = Arc<
    dyn Fn(&ComponentDescriptor, &Collaborators) -> AppResult<Arc<dyn Component>> + Send + Sync,
>;

/// Factory dispatching on the descriptor's `class` to registered builders
#[derive(Default, Clone)]
pub struct TypeRegistryFactory {
    builders: HashMap<String, ComponentBuilder>,
}

impl TypeRegistryFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(mut self, class: impl Into<String>, builder: F) -> Self
    where
        F: Fn(&ComponentDescriptor, &Collaborators) -> AppResult<Arc<dyn Component>>
            + Send
            + Sync
            + 'static,
    {
        self.builders.insert(class.into(), Arc::new(builder));
        self
    }

    pub fn contains(&self, class: &str) -> bool {
        self.builders.contains_key(class)
    }

    pub fn classes(&self) -> Vec<&str> {
        let mut classes: Vec<_> = self.builders.keys().map(String::as_str).collect();
        classes.sort_unstable();
        classes
    }
}

impl ComponentFactory for TypeRegistryFactory {
    fn construct(
        &self,
        descriptor: &ComponentDescriptor,
        collaborators: &Collaborators,
    ) -> AppResult<Arc<dyn Component>> {
        let builder = self.builders.get(&descriptor.class).ok_or_else(|| {
            AppError::construction(
                &descriptor.name,
                format!("no builder registered for class {}", descriptor.class),
            )
        })?;
        builder(descriptor, collaborators)
    }
}
