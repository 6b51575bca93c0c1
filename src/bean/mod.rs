//! Component lifecycle management
//!
//! Components are registered as descriptors and instantiated on demand
//! according to their scope: stateless instances are pooled, stateful
//! instances are bound to a session key and evicted when idle, singletons
//! are built exactly once per application.

pub mod descriptor;
pub mod factory;
pub mod instance;
pub mod manager;
pub mod settings;
pub mod sweeper;

pub use descriptor::{ComponentDescriptor, Scope};
pub use factory::{Collaborators, Component, ComponentFactory, TypeRegistryFactory};
pub use instance::ComponentInstance;
pub use manager::{BeanLocator, BeanManager, BeanManagerStats};
pub use settings::StatefulSessionSettings;
pub use sweeper::IdleSweeper;
