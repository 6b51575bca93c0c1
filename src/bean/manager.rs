//! Per-application bean manager
//!
//! Registers component descriptors, binds a locator for each into the
//! application's naming subtree and hands out instances according to the
//! descriptor's scope.

use std::{
    collections::HashSet,
    fmt,
    sync::{Arc, Mutex, Weak},
    time::Instant,
};

use dashmap::{mapref::entry::Entry, DashMap};
use futures::future::{BoxFuture, FutureExt};
use log::{debug, info, warn};
use tokio::sync::OnceCell;

use super::{
    descriptor::{ComponentDescriptor, Scope, DEFAULT_POOL_SIZE},
    factory::{Collaborators, ComponentFactory},
    instance::ComponentInstance,
    settings::StatefulSessionSettings,
};
use crate::{
    core::{AppError, AppResult},
    naming::{InitialContext, NamingContext, NamingValue},
};

type InstanceCell = Arc<OnceCell<Arc<ComponentInstance>>>;

/// Key of a stateful instance: component name plus session key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SessionSlot {
    component: String,
    session_key: String,
}

/// Snapshot of a bean manager's contents for monitoring
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeanManagerStats {
    pub application: String,
    pub descriptors: usize,
    pub stateful_instances: usize,
    pub singleton_instances: usize,
    pub pooled_instances: usize,
}

pub struct BeanManager {
    application: String,
    this: Weak<BeanManager>,
    descriptors: DashMap<String, Arc<ComponentDescriptor>>,
    factory: Arc<dyn ComponentFactory>,
    naming: InitialContext,
    settings: StatefulSessionSettings,
    stateful: DashMap<SessionSlot, InstanceCell>,
    singletons: DashMap<String, InstanceCell>,
    pooled: DashMap<String, Vec<Arc<ComponentInstance>>>,
    registration: Mutex<()>,
}

impl BeanManager {
    pub fn new(
        application: impl Into<String>,
        factory: Arc<dyn ComponentFactory>,
        naming: InitialContext,
        settings: StatefulSessionSettings,
    ) -> Arc<Self> {
        let application = application.into();
        Arc::new_cyclic(|this| Self {
            application,
            this: this.clone(),
            descriptors: DashMap::new(),
            factory,
            naming,
            settings,
            stateful: DashMap::new(),
            singletons: DashMap::new(),
            pooled: DashMap::new(),
            registration: Mutex::new(()),
        })
    }

    pub fn application(&self) -> &str {
        &self.application
    }

    pub fn settings(&self) -> &StatefulSessionSettings {
        &self.settings
    }

    pub fn naming(&self) -> &InitialContext {
        &self.naming
    }

    /// Register a descriptor and bind its locator under the component name.
    ///
    /// Registering an identical descriptor again is a no-op; a different
    /// descriptor under a taken name is rejected.
    ///
    /// References between components of this application must not form a
    /// cycle; the closing registration fails with a configuration error.
    pub fn register_descriptor(&self, descriptor: ComponentDescriptor) -> AppResult<()> {
        descriptor.validate()?;

        let _registering = self
            .registration
            .lock()
            .map_err(|_| AppError::Internal("descriptor registration lock poisoned".to_string()))?;
        if self
            .descriptor(&descriptor.name)
            .is_ok_and(|existing| existing.as_ref() != &descriptor)
        {
            return Err(AppError::DuplicateComponent(descriptor.name));
        }
        if let Some(cycle) = self.reference_cycle(&descriptor) {
            return Err(AppError::Configuration(format!(
                "Component {} has a circular reference: {}",
                descriptor.name,
                cycle.join(" -> ")
            )));
        }

        match self.descriptors.entry(descriptor.name.clone()) {
            Entry::Occupied(existing) => {
                if existing.get().as_ref() == &descriptor {
                    debug!(
                        "Component {} already registered in {}",
                        descriptor.name, self.application
                    );
                    Ok(())
                } else {
                    Err(AppError::DuplicateComponent(descriptor.name))
                }
            }
            Entry::Vacant(slot) => {
                let locator = BeanLocator {
                    manager: self.this.clone(),
                    bean: descriptor.name.clone(),
                };
                self.naming
                    .bind(&descriptor.name, Arc::new(locator), Vec::new())?;
                info!(
                    "Registered {} component {} ({}) in application {}",
                    descriptor.scope.as_str(),
                    descriptor.name,
                    descriptor.class,
                    self.application
                );
                slot.insert(Arc::new(descriptor));
                Ok(())
            }
        }
    }

    /// Component name a reference path would name within this application
    fn local_component<'a>(&self, path: &'a str) -> Option<&'a str> {
        let name = if self.naming.root().has_scheme(path) {
            let identifier = self.naming.identifier();
            let rest = path.strip_prefix(identifier)?;
            if identifier.ends_with(':') {
                rest
            } else {
                rest.strip_prefix('/')?
            }
        } else {
            path
        };
        Some(name.trim_matches('/'))
    }

    /// Path from `descriptor` back to itself through references to other
    /// components of this application.
    fn reference_cycle(&self, descriptor: &ComponentDescriptor) -> Option<Vec<String>> {
        let mut path = vec![descriptor.name.clone()];
        let mut visited = HashSet::new();
        self.find_reference_cycle(descriptor, &descriptor.name, &mut path, &mut visited)
            .then_some(path)
    }

    fn find_reference_cycle(
        &self,
        current: &ComponentDescriptor,
        origin: &str,
        path: &mut Vec<String>,
        visited: &mut HashSet<String>,
    ) -> bool {
        for target in current.references.values() {
            let Some(target) = self.local_component(target).map(str::to_string) else {
                continue;
            };
            if target == origin {
                path.push(target);
                return true;
            }
            if !visited.insert(target.clone()) {
                continue;
            }
            let Ok(next) = self.descriptor(&target) else {
                continue;
            };
            path.push(target);
            if self.find_reference_cycle(&next, origin, path, visited) {
                return true;
            }
            path.pop();
        }
        false
    }

    pub fn descriptor(&self, name: &str) -> AppResult<Arc<ComponentDescriptor>> {
        self.descriptors
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| AppError::UnknownComponent(name.to_string()))
    }

    pub fn descriptors(&self) -> Vec<Arc<ComponentDescriptor>> {
        let mut all: Vec<_> = self
            .descriptors
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// Resolve an instance of a registered component.
    ///
    /// Stateful components require a session key; the other scopes ignore it.
    pub async fn resolve(
        &self,
        name: &str,
        session_key: Option<&str>,
    ) -> AppResult<Arc<ComponentInstance>> {
        self.resolve_in_chain(name, session_key, &[]).await
    }

    /// Resolve a component through the naming directory.
    ///
    /// Bare names are looked up in this application's subtree, scheme
    /// prefixed names from the naming root.
    pub async fn lookup(
        &self,
        name: &str,
        session_key: Option<&str>,
    ) -> AppResult<Arc<ComponentInstance>> {
        let locator = self.naming.search_as::<BeanLocator>(name, &[])?;
        locator.resolve(session_key).await
    }

    async fn resolve_in_chain(
        &self,
        name: &str,
        session_key: Option<&str>,
        chain: &[String],
    ) -> AppResult<Arc<ComponentInstance>> {
        let descriptor = self.descriptor(name)?;

        let qualified = format!("{}/{}", self.application, descriptor.name);
        if chain.contains(&qualified) {
            return Err(AppError::construction(
                &descriptor.name,
                format!("circular reference {} -> {qualified}", chain.join(" -> ")),
            ));
        }
        let mut chain = chain.to_vec();
        chain.push(qualified);

        match descriptor.scope {
            Scope::Stateless => self.resolve_stateless(descriptor, &chain).await,
            Scope::Stateful => {
                let session_key = session_key
                    .ok_or_else(|| AppError::SessionKeyRequired(descriptor.name.clone()))?;
                self.resolve_stateful(descriptor, session_key, &chain).await
            }
            Scope::Singleton => self.resolve_singleton(descriptor, &chain).await,
        }
    }

    async fn resolve_stateless(
        &self,
        descriptor: Arc<ComponentDescriptor>,
        chain: &[String],
    ) -> AppResult<Arc<ComponentInstance>> {
        let pooled = self
            .pooled
            .get_mut(&descriptor.name)
            .and_then(|mut pool| pool.pop());
        if let Some(instance) = pooled {
            instance.touch(Instant::now());
            return Ok(instance);
        }
        self.construct(descriptor, None, chain).await
    }

    async fn resolve_stateful(
        &self,
        descriptor: Arc<ComponentDescriptor>,
        session_key: &str,
        chain: &[String],
    ) -> AppResult<Arc<ComponentInstance>> {
        self.maybe_collect_garbage();

        let key = SessionSlot {
            component: descriptor.name.clone(),
            session_key: session_key.to_string(),
        };

        // touch under the map guard so eviction cannot interleave
        if let Some(cell) = self.stateful.get(&key) {
            if let Some(instance) = cell.get() {
                instance.touch(Instant::now());
                return Ok(instance.clone());
            }
        }

        let cell = self.stateful.entry(key.clone()).or_default().value().clone();
        let instance = match cell
            .get_or_try_init(|| self.construct(descriptor, Some(session_key), chain))
            .await
        {
            Ok(instance) => instance.clone(),
            Err(err) => {
                // drop the empty slot unless another caller is waiting on it
                self.stateful.remove_if(&key, |_, current| {
                    Arc::ptr_eq(current, &cell)
                        && !current.initialized()
                        && Arc::strong_count(current) == 2
                });
                return Err(err);
            }
        };

        match self.stateful.get(&key) {
            Some(current) if Arc::ptr_eq(current.value(), &cell) => {
                instance.touch(Instant::now())
            }
            _ => debug!(
                "Stateful {} for session {session_key} was destroyed during construction",
                instance.name()
            ),
        }
        Ok(instance)
    }

    async fn resolve_singleton(
        &self,
        descriptor: Arc<ComponentDescriptor>,
        chain: &[String],
    ) -> AppResult<Arc<ComponentInstance>> {
        let cell = self
            .singletons
            .entry(descriptor.name.clone())
            .or_default()
            .value()
            .clone();
        let instance = cell
            .get_or_try_init(|| self.construct(descriptor, None, chain))
            .await?;
        instance.touch(Instant::now());
        Ok(instance.clone())
    }

    async fn construct(
        &self,
        descriptor: Arc<ComponentDescriptor>,
        session_key: Option<&str>,
        chain: &[String],
    ) -> AppResult<Arc<ComponentInstance>> {
        let collaborators = self
            .resolve_references(&descriptor, session_key, chain)
            .await?;

        let factory = self.factory.clone();
        let desc = descriptor.clone();
        let component = tokio::task::spawn_blocking(move || {
            let component = factory.construct(&desc, &collaborators)?;
            component.post_construct()?;
            Ok::<_, AppError>(component)
        })
        .await
        .map_err(|e| AppError::construction(&descriptor.name, e))??;

        let instance = Arc::new(ComponentInstance::new(
            descriptor,
            component,
            session_key.map(str::to_string),
            Instant::now(),
        ));
        debug!(
            "Constructed {} instance {} of {} in {}",
            instance.descriptor().scope.as_str(),
            instance.id(),
            instance.name(),
            self.application
        );
        Ok(instance)
    }

    /// Resolve each reference through the naming directory. References to
    /// other components are resolved to instances.
    fn resolve_references<'a>(
        &'a self,
        descriptor: &'a ComponentDescriptor,
        session_key: Option<&'a str>,
        chain: &'a [String],
    ) -> BoxFuture<'a, AppResult<Collaborators>> {
        async move {
            let mut collaborators = Collaborators::new();
            for (field, path) in &descriptor.references {
                let value = self.naming.search(path, &[]).map_err(|e| {
                    AppError::construction(
                        &descriptor.name,
                        format!("reference {field} -> {path}: {e}"),
                    )
                })?;
                let value: NamingValue = match value.downcast::<BeanLocator>() {
                    Ok(locator) => locator.resolve_in_chain(session_key, chain).await? as NamingValue,
                    Err(value) => value,
                };
                collaborators.insert(field.clone(), value);
            }
            Ok(collaborators)
        }
        .boxed()
    }

    /// Hand a stateless instance back for reuse. Other scopes are ignored.
    pub fn release(&self, instance: Arc<ComponentInstance>) {
        if instance.descriptor().scope != Scope::Stateless {
            return;
        }
        let limit = instance
            .descriptor()
            .pool_size()
            .unwrap_or(DEFAULT_POOL_SIZE);

        let mut pool = self.pooled.entry(instance.name().to_string()).or_default();
        if pool.len() < limit {
            pool.push(instance);
        } else {
            drop(pool);
            instance.component().pre_destroy();
        }
    }

    fn maybe_collect_garbage(&self) {
        let probability = self.settings.garbage_collection_probability;
        if probability > 0.0 && rand::random::<f64>() < probability {
            self.evict_idle(Instant::now());
        }
    }

    fn idle_timeout(&self, component: &str) -> std::time::Duration {
        self.descriptors
            .get(component)
            .and_then(|desc| desc.lifetime().ok().flatten())
            .unwrap_or(self.settings.lifetime)
    }

    /// Evict stateful instances idle for longer than their lifetime as of
    /// `now`. Returns the number of evicted instances.
    pub fn evict_idle(&self, now: Instant) -> usize {
        let keys: Vec<SessionSlot> = self
            .stateful
            .iter()
            .map(|entry| entry.key().clone())
            .collect();

        let mut evicted = Vec::new();
        for key in keys {
            let timeout = self.idle_timeout(&key.component);
            let removed = self.stateful.remove_if(&key, |_, cell| match cell.get() {
                Some(instance) => instance.idle_for(now) > timeout,
                // left behind by a failed construction nobody waits on
                None => Arc::strong_count(cell) == 1,
            });
            if let Some((_, cell)) = removed {
                if let Some(instance) = cell.get() {
                    evicted.push(instance.clone());
                }
            }
        }

        for instance in &evicted {
            debug!(
                "Evicting idle {} for session {}",
                instance.name(),
                instance.session_key().unwrap_or_default()
            );
            instance.component().pre_destroy();
        }
        if !evicted.is_empty() {
            info!(
                "Evicted {} idle stateful instance(s) from {}",
                evicted.len(),
                self.application
            );
        }
        evicted.len()
    }

    /// Destroy every stateful instance bound to a session key.
    pub fn destroy(&self, session_key: &str) -> usize {
        let keys: Vec<SessionSlot> = self
            .stateful
            .iter()
            .filter(|entry| entry.key().session_key == session_key)
            .map(|entry| entry.key().clone())
            .collect();

        let mut destroyed = 0;
        for key in keys {
            if let Some((_, cell)) = self.stateful.remove(&key) {
                if let Some(instance) = cell.get() {
                    instance.component().pre_destroy();
                    destroyed += 1;
                }
            }
        }
        debug!("Destroyed {destroyed} instance(s) for session {session_key}");
        destroyed
    }

    /// Destroy every instance this manager holds.
    pub fn shutdown(&self) {
        let stateful: Vec<InstanceCell> = self
            .stateful
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        self.stateful.clear();

        let singletons: Vec<InstanceCell> = self
            .singletons
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        self.singletons.clear();

        let pooled: Vec<Arc<ComponentInstance>> = self
            .pooled
            .iter()
            .flat_map(|entry| entry.value().clone())
            .collect();
        self.pooled.clear();

        let instances: Vec<Arc<ComponentInstance>> = stateful
            .iter()
            .chain(singletons.iter())
            .filter_map(|cell| cell.get().cloned())
            .chain(pooled)
            .collect();
        for instance in &instances {
            instance.component().pre_destroy();
        }
        info!(
            "Bean manager of {} shut down, destroyed {} instance(s)",
            self.application,
            instances.len()
        );
    }

    pub fn stats(&self) -> BeanManagerStats {
        BeanManagerStats {
            application: self.application.clone(),
            descriptors: self.descriptors.len(),
            stateful_instances: self
                .stateful
                .iter()
                .filter(|entry| entry.value().initialized())
                .count(),
            singleton_instances: self
                .singletons
                .iter()
                .filter(|entry| entry.value().initialized())
                .count(),
            pooled_instances: self.pooled.iter().map(|entry| entry.value().len()).sum(),
        }
    }
}

impl fmt::Debug for BeanManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BeanManager")
            .field("application", &self.application)
            .field("descriptors", &self.descriptors.len())
            .field("settings", &self.settings)
            .finish()
    }
}

/// Naming binding standing in for a registered component.
pub struct BeanLocator {
    manager: Weak<BeanManager>,
    bean: String,
}

impl BeanLocator {
    pub fn bean(&self) -> &str {
        &self.bean
    }

    pub async fn resolve(&self, session_key: Option<&str>) -> AppResult<Arc<ComponentInstance>> {
        self.resolve_in_chain(session_key, &[]).await
    }

    async fn resolve_in_chain(
        &self,
        session_key: Option<&str>,
        chain: &[String],
    ) -> AppResult<Arc<ComponentInstance>> {
        let manager = self.manager.upgrade().ok_or_else(|| {
            warn!("Bean manager for {} is gone", self.bean);
            AppError::UnknownComponent(self.bean.clone())
        })?;
        manager
            .resolve_in_chain(&self.bean, session_key, chain)
            .await
    }
}

impl fmt::Debug for BeanLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BeanLocator")
            .field("bean", &self.bean)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicBool, AtomicUsize, Ordering},
        time::Duration,
    };

    use serde_json::{json, Value as JsonValue};

    use super::*;
    use crate::{
        bean::{descriptor::LIFETIME_PARAM, Component, TypeRegistryFactory},
        naming::NamingDirectory,
    };

    struct Counter {
        hits: AtomicUsize,
        destroyed: Arc<AtomicUsize>,
    }

    impl Component for Counter {
        fn invoke(&self, method: &str, _args: &[JsonValue]) -> AppResult<JsonValue> {
            match method {
                "increment" => Ok(json!(self.hits.fetch_add(1, Ordering::SeqCst) + 1)),
                "get" => Ok(json!(self.hits.load(Ordering::SeqCst))),
                other => Err(AppError::Validation(format!("unknown method {other}"))),
            }
        }

        fn pre_destroy(&self) {
            self.destroyed.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Counters {
        constructed: Arc<AtomicUsize>,
        destroyed: Arc<AtomicUsize>,
    }

    fn counting_factory(delay: Duration) -> (TypeRegistryFactory, Counters) {
        let constructed = Arc::new(AtomicUsize::new(0));
        let destroyed = Arc::new(AtomicUsize::new(0));
        let (c, d) = (constructed.clone(), destroyed.clone());
        let factory = TypeRegistryFactory::new().register("Counter", move |_, _| {
            std::thread::sleep(delay);
            c.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(Counter {
                hits: AtomicUsize::new(0),
                destroyed: d.clone(),
            }) as Arc<dyn Component>)
        });
        (
            factory,
            Counters {
                constructed,
                destroyed,
            },
        )
    }

    fn manager_with(
        factory: TypeRegistryFactory,
        settings: StatefulSessionSettings,
    ) -> (Arc<NamingDirectory>, Arc<BeanManager>) {
        let root = Arc::new(NamingDirectory::new(""));
        let global = root.create_subdirectory("global").unwrap();
        let app = global.create_subdirectory("shop").unwrap();
        let ctx = InitialContext::with_local(root.clone(), app);
        (
            root,
            BeanManager::new("shop", Arc::new(factory), ctx, settings),
        )
    }

    fn no_gc() -> StatefulSessionSettings {
        StatefulSessionSettings {
            garbage_collection_probability: 0.0,
            ..Default::default()
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn singleton_is_constructed_once_under_concurrency() {
        let (factory, counters) = counting_factory(Duration::from_millis(20));
        let (_, manager) = manager_with(factory, no_gc());
        manager
            .register_descriptor(ComponentDescriptor::new(
                "Registry",
                "Counter",
                Scope::Singleton,
            ))
            .unwrap();

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let manager = manager.clone();
                tokio::spawn(async move { manager.resolve("Registry", None).await.unwrap() })
            })
            .collect();

        let mut instances = Vec::new();
        for task in tasks {
            instances.push(task.await.unwrap());
        }

        assert_eq!(counters.constructed.load(Ordering::SeqCst), 1);
        assert!(instances.iter().all(|i| Arc::ptr_eq(i, &instances[0])));
    }

    #[tokio::test]
    async fn stateful_instances_are_isolated_per_session() {
        let (factory, counters) = counting_factory(Duration::ZERO);
        let (_, manager) = manager_with(factory, no_gc());
        manager
            .register_descriptor(ComponentDescriptor::new("Cart", "Counter", Scope::Stateful))
            .unwrap();

        let a1 = manager.resolve("Cart", Some("a")).await.unwrap();
        let a2 = manager.resolve("Cart", Some("a")).await.unwrap();
        let b = manager.resolve("Cart", Some("b")).await.unwrap();

        assert!(Arc::ptr_eq(&a1, &a2));
        assert!(!Arc::ptr_eq(&a1, &b));
        assert_eq!(a1.session_key(), Some("a"));
        assert_eq!(counters.constructed.load(Ordering::SeqCst), 2);

        a1.invoke("increment", &[]).unwrap();
        a2.invoke("increment", &[]).unwrap();
        assert_eq!(a1.invoke("get", &[]).unwrap(), json!(2));
        assert_eq!(b.invoke("get", &[]).unwrap(), json!(0));
    }

    #[tokio::test]
    async fn stateful_resolution_requires_session_key() {
        let (factory, _) = counting_factory(Duration::ZERO);
        let (_, manager) = manager_with(factory, no_gc());
        manager
            .register_descriptor(ComponentDescriptor::new("Cart", "Counter", Scope::Stateful))
            .unwrap();

        let err = manager.resolve("Cart", None).await.unwrap_err();
        assert!(matches!(err, AppError::SessionKeyRequired(ref name) if name == "Cart"));
    }

    #[tokio::test]
    async fn idle_stateful_instances_are_evicted() {
        let (factory, counters) = counting_factory(Duration::ZERO);
        let settings = StatefulSessionSettings {
            lifetime: Duration::from_millis(50),
            garbage_collection_probability: 0.0,
        };
        let (_, manager) = manager_with(factory, settings);
        manager
            .register_descriptor(ComponentDescriptor::new("Cart", "Counter", Scope::Stateful))
            .unwrap();

        let first = manager.resolve("Cart", Some("a")).await.unwrap();
        assert_eq!(manager.evict_idle(Instant::now()), 0);
        assert_eq!(
            manager.evict_idle(Instant::now() + Duration::from_millis(200)),
            1
        );
        assert_eq!(counters.destroyed.load(Ordering::SeqCst), 1);
        assert_eq!(manager.stats().stateful_instances, 0);

        let second = manager.resolve("Cart", Some("a")).await.unwrap();
        assert_ne!(first.id(), second.id());
        assert_eq!(counters.constructed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn descriptor_lifetime_overrides_application_setting() {
        let (factory, _) = counting_factory(Duration::ZERO);
        let (_, manager) = manager_with(factory, no_gc());
        manager
            .register_descriptor(
                ComponentDescriptor::new("Short", "Counter", Scope::Stateful)
                    .with_param(LIFETIME_PARAM, "0.01"),
            )
            .unwrap();
        manager
            .register_descriptor(ComponentDescriptor::new("Long", "Counter", Scope::Stateful))
            .unwrap();

        manager.resolve("Short", Some("a")).await.unwrap();
        manager.resolve("Long", Some("a")).await.unwrap();

        assert_eq!(manager.evict_idle(Instant::now() + Duration::from_secs(1)), 1);
        assert_eq!(manager.stats().stateful_instances, 1);
    }

    #[tokio::test]
    async fn inline_collection_evicts_idle_sessions() {
        let (factory, counters) = counting_factory(Duration::ZERO);
        let settings = StatefulSessionSettings {
            lifetime: Duration::from_millis(10),
            garbage_collection_probability: 1.0,
        };
        let (_, manager) = manager_with(factory, settings);
        manager
            .register_descriptor(ComponentDescriptor::new("Cart", "Counter", Scope::Stateful))
            .unwrap();

        manager.resolve("Cart", Some("a")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        manager.resolve("Cart", Some("b")).await.unwrap();

        assert_eq!(counters.destroyed.load(Ordering::SeqCst), 1);
        assert_eq!(manager.stats().stateful_instances, 1);
    }

    #[tokio::test]
    async fn destroy_removes_every_instance_of_a_session() {
        let (factory, counters) = counting_factory(Duration::ZERO);
        let (_, manager) = manager_with(factory, no_gc());
        for name in ["Cart", "Wishlist"] {
            manager
                .register_descriptor(ComponentDescriptor::new(name, "Counter", Scope::Stateful))
                .unwrap();
        }

        manager.resolve("Cart", Some("a")).await.unwrap();
        manager.resolve("Wishlist", Some("a")).await.unwrap();
        manager.resolve("Cart", Some("b")).await.unwrap();

        assert_eq!(manager.destroy("a"), 2);
        assert_eq!(counters.destroyed.load(Ordering::SeqCst), 2);
        assert_eq!(manager.stats().stateful_instances, 1);
    }

    #[tokio::test]
    async fn released_stateless_instances_are_reused() {
        let (factory, counters) = counting_factory(Duration::ZERO);
        let (_, manager) = manager_with(factory, no_gc());
        manager
            .register_descriptor(ComponentDescriptor::new(
                "Calculator",
                "Counter",
                Scope::Stateless,
            ))
            .unwrap();

        let first = manager.resolve("Calculator", None).await.unwrap();
        let second = manager.resolve("Calculator", None).await.unwrap();
        assert_ne!(first.id(), second.id());

        let id = first.id();
        manager.release(first);
        assert_eq!(manager.stats().pooled_instances, 1);

        let reused = manager.resolve("Calculator", None).await.unwrap();
        assert_eq!(reused.id(), id);
        assert_eq!(counters.constructed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn registration_is_idempotent_but_rejects_conflicts() {
        let (factory, _) = counting_factory(Duration::ZERO);
        let (_, manager) = manager_with(factory, no_gc());
        let desc = ComponentDescriptor::new("Cart", "Counter", Scope::Stateful);

        manager.register_descriptor(desc.clone()).unwrap();
        manager.register_descriptor(desc).unwrap();

        let err = manager
            .register_descriptor(ComponentDescriptor::new("Cart", "Counter", Scope::Singleton))
            .unwrap_err();
        assert!(matches!(err, AppError::DuplicateComponent(ref name) if name == "Cart"));
        assert_eq!(manager.descriptor("Cart").unwrap().scope, Scope::Stateful);
    }

    #[tokio::test]
    async fn unknown_component_is_reported() {
        let (factory, _) = counting_factory(Duration::ZERO);
        let (_, manager) = manager_with(factory, no_gc());
        let err = manager.resolve("Nope", None).await.unwrap_err();
        assert!(matches!(err, AppError::UnknownComponent(_)));
    }

    #[tokio::test]
    async fn components_are_found_through_naming() {
        let (factory, _) = counting_factory(Duration::ZERO);
        let (_, manager) = manager_with(factory, no_gc());
        manager
            .register_descriptor(ComponentDescriptor::new(
                "Registry",
                "Counter",
                Scope::Singleton,
            ))
            .unwrap();

        let local = manager.lookup("Registry", None).await.unwrap();
        let global = manager
            .lookup("app:global/shop/Registry", None)
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&local, &global));
    }

    struct Greeter {
        greeting: Arc<String>,
        counter: Arc<ComponentInstance>,
    }

    impl Component for Greeter {
        fn invoke(&self, _method: &str, _args: &[JsonValue]) -> AppResult<JsonValue> {
            let count = self.counter.invoke("increment", &[])?;
            Ok(json!(format!("{} #{count}", self.greeting)))
        }
    }

    #[tokio::test]
    async fn references_are_injected_as_collaborators() {
        let (factory, _) = counting_factory(Duration::ZERO);
        let factory = factory.register("Greeter", |_, collaborators| {
            let greeting = collaborators
                .get::<String>("greeting")
                .ok_or_else(|| AppError::construction("Greeter", "missing greeting"))?;
            let counter = collaborators
                .get::<ComponentInstance>("counter")
                .ok_or_else(|| AppError::construction("Greeter", "missing counter"))?;
            Ok(Arc::new(Greeter { greeting, counter }) as Arc<dyn Component>)
        });
        let (root, manager) = manager_with(factory, no_gc());
        let env = root.create_subdirectory("env").unwrap();
        env.bind("greeting", Arc::new("hello".to_string()), vec![])
            .unwrap();

        manager
            .register_descriptor(ComponentDescriptor::new(
                "Registry",
                "Counter",
                Scope::Singleton,
            ))
            .unwrap();
        manager
            .register_descriptor(
                ComponentDescriptor::new("Greeter", "Greeter", Scope::Stateless)
                    .with_reference("greeting", "app:env/greeting")
                    .with_reference("counter", "Registry"),
            )
            .unwrap();

        let greeter = manager.resolve("Greeter", None).await.unwrap();
        assert_eq!(greeter.invoke("greet", &[]).unwrap(), json!("hello #1"));

        let registry = manager.resolve("Registry", None).await.unwrap();
        assert_eq!(registry.invoke("get", &[]).unwrap(), json!(1));
    }

    #[tokio::test]
    async fn circular_references_are_rejected_at_registration() {
        let (factory, _) = counting_factory(Duration::ZERO);
        let (_, manager) = manager_with(factory, no_gc());
        manager
            .register_descriptor(
                ComponentDescriptor::new("A", "Counter", Scope::Singleton).with_reference("b", "B"),
            )
            .unwrap();
        manager
            .register_descriptor(
                ComponentDescriptor::new("B", "Counter", Scope::Singleton)
                    .with_reference("c", "app:global/shop/C"),
            )
            .unwrap();

        let err = manager
            .register_descriptor(
                ComponentDescriptor::new("C", "Counter", Scope::Stateful).with_reference("a", "A"),
            )
            .unwrap_err();
        assert!(
            matches!(err, AppError::Configuration(ref msg) if msg.contains("C -> A -> B -> C")),
            "{err}"
        );
        assert!(manager.descriptor("C").is_err());

        let err = manager
            .register_descriptor(
                ComponentDescriptor::new("Self", "Counter", Scope::Singleton)
                    .with_reference("me", "app:global/shop/Self"),
            )
            .unwrap_err();
        assert!(matches!(err, AppError::Configuration(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_resolution_of_linked_singletons_completes() {
        let (factory, counters) = counting_factory(Duration::from_millis(50));
        let (_, manager) = manager_with(factory, no_gc());
        manager
            .register_descriptor(
                ComponentDescriptor::new("A", "Counter", Scope::Singleton).with_reference("b", "B"),
            )
            .unwrap();
        manager
            .register_descriptor(ComponentDescriptor::new("B", "Counter", Scope::Singleton))
            .unwrap();
        assert!(manager
            .register_descriptor(
                ComponentDescriptor::new("B2", "Counter", Scope::Singleton).with_reference("a", "A"),
            )
            .is_ok());

        let tasks: Vec<_> = ["A", "B", "B2", "A", "B2"]
            .into_iter()
            .map(|name| {
                let manager = manager.clone();
                tokio::spawn(async move { manager.resolve(name, None).await })
            })
            .collect();

        let all = tokio::time::timeout(Duration::from_secs(3), futures::future::join_all(tasks))
            .await
            .expect("linked singletons must not deadlock");
        assert!(all.into_iter().all(|r| r.unwrap().is_ok()));
        assert_eq!(counters.constructed.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn failed_stateful_construction_leaves_no_session_slot() {
        let factory = TypeRegistryFactory::new().register("Cart", |desc, _| {
            Err(AppError::construction(&desc.name, "inventory offline"))
        });
        let (_, manager) = manager_with(factory, no_gc());
        manager
            .register_descriptor(ComponentDescriptor::new("Cart", "Cart", Scope::Stateful))
            .unwrap();

        for i in 0..100 {
            let session = format!("s{i}");
            assert!(manager.resolve("Cart", Some(&session)).await.is_err());
        }
        assert_eq!(manager.stateful.len(), 0);
        assert_eq!(manager.evict_idle(Instant::now()), 0);
    }

    #[test]
    fn sweep_drops_abandoned_empty_slots() {
        let (factory, _) = counting_factory(Duration::ZERO);
        let (_, manager) = manager_with(factory, no_gc());
        manager.stateful.insert(
            SessionSlot {
                component: "Cart".to_string(),
                session_key: "a".to_string(),
            },
            InstanceCell::default(),
        );

        assert_eq!(manager.evict_idle(Instant::now()), 0);
        assert!(manager.stateful.is_empty());
    }

    #[tokio::test]
    async fn refreshed_instance_survives_past_its_creation_lifetime() {
        let lifetime = Duration::from_millis(300);
        let (factory, counters) = counting_factory(Duration::ZERO);
        let settings = StatefulSessionSettings {
            lifetime,
            garbage_collection_probability: 0.0,
        };
        let (_, manager) = manager_with(factory, settings);
        manager
            .register_descriptor(ComponentDescriptor::new("Cart", "Counter", Scope::Stateful))
            .unwrap();

        let t0 = Instant::now();
        let first = manager.resolve("Cart", Some("a")).await.unwrap();
        tokio::time::sleep(lifetime / 2).await;
        let refreshed = manager.resolve("Cart", Some("a")).await.unwrap();
        assert!(Arc::ptr_eq(&first, &refreshed));

        // idle since the refresh is well under the lifetime
        let after_lifetime = t0 + lifetime + Duration::from_millis(20);
        assert!(refreshed.last_access() >= t0 + lifetime / 3);
        assert_eq!(manager.evict_idle(after_lifetime), 0);
        assert_eq!(counters.destroyed.load(Ordering::SeqCst), 0);

        assert_eq!(
            manager.evict_idle(refreshed.last_access() + lifetime + Duration::from_millis(1)),
            1
        );
        assert_eq!(counters.destroyed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn sweeping_never_evicts_sessions_in_active_use() {
        struct Tracked {
            destroyed: Arc<AtomicBool>,
        }

        impl Component for Tracked {
            fn invoke(&self, _method: &str, _args: &[JsonValue]) -> AppResult<JsonValue> {
                Ok(json!(self.destroyed.load(Ordering::SeqCst)))
            }

            fn pre_destroy(&self) {
                self.destroyed.store(true, Ordering::SeqCst);
            }
        }

        let constructed = Arc::new(AtomicUsize::new(0));
        let counter = constructed.clone();
        let factory = TypeRegistryFactory::new().register("Tracked", move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(Tracked {
                destroyed: Arc::new(AtomicBool::new(false)),
            }) as Arc<dyn Component>)
        });
        let lifetime = Duration::from_millis(200);
        let settings = StatefulSessionSettings {
            lifetime,
            garbage_collection_probability: 0.0,
        };
        let (_, manager) = manager_with(factory, settings);
        manager
            .register_descriptor(ComponentDescriptor::new("Cart", "Tracked", Scope::Stateful))
            .unwrap();
        manager.resolve("Cart", Some("idle")).await.unwrap();

        let stop = Arc::new(AtomicBool::new(false));
        let sweeper = {
            let (manager, stop) = (manager.clone(), stop.clone());
            tokio::spawn(async move {
                let mut evicted = 0;
                while !stop.load(Ordering::SeqCst) {
                    evicted += manager.evict_idle(Instant::now());
                    tokio::task::yield_now().await;
                }
                evicted
            })
        };

        let users: Vec<_> = (0..4)
            .map(|i| {
                let manager = manager.clone();
                tokio::spawn(async move {
                    let session = format!("active-{i}");
                    for _ in 0..300 {
                        let instance = manager.resolve("Cart", Some(&session)).await.unwrap();
                        assert_eq!(instance.invoke("destroyed", &[]).unwrap(), json!(false));
                        tokio::time::sleep(Duration::from_millis(2)).await;
                    }
                })
            })
            .collect();
        for user in users {
            user.await.unwrap();
        }
        stop.store(true, Ordering::SeqCst);

        // only the untouched session aged out
        assert_eq!(sweeper.await.unwrap(), 1);
        assert_eq!(constructed.load(Ordering::SeqCst), 5);
        assert_eq!(manager.stats().stateful_instances, 4);
    }

    #[tokio::test]
    async fn failed_singleton_construction_is_retried() {
        let fail_next = Arc::new(AtomicBool::new(true));
        let flag = fail_next.clone();
        let destroyed = Arc::new(AtomicUsize::new(0));
        let factory = TypeRegistryFactory::new().register("Flaky", move |desc, _| {
            if flag.swap(false, Ordering::SeqCst) {
                return Err(AppError::construction(&desc.name, "database offline"));
            }
            Ok(Arc::new(Counter {
                hits: AtomicUsize::new(0),
                destroyed: destroyed.clone(),
            }) as Arc<dyn Component>)
        });
        let (_, manager) = manager_with(factory, no_gc());
        manager
            .register_descriptor(ComponentDescriptor::new("Flaky", "Flaky", Scope::Singleton))
            .unwrap();

        let err = manager.resolve("Flaky", None).await.unwrap_err();
        assert!(err.to_string().contains("database offline"));
        assert!(manager.resolve("Flaky", None).await.is_ok());
        assert!(!fail_next.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn panicking_factory_becomes_construction_error() {
        let factory = TypeRegistryFactory::new().register("Broken", |_, _| -> AppResult<Arc<dyn Component>> {
            panic!("constructor blew up")
        });
        let (_, manager) = manager_with(factory, no_gc());
        manager
            .register_descriptor(ComponentDescriptor::new("Broken", "Broken", Scope::Stateless))
            .unwrap();

        let err = manager.resolve("Broken", None).await.unwrap_err();
        assert!(matches!(err, AppError::Construction { ref component, .. } if component == "Broken"));
    }

    #[tokio::test]
    async fn shutdown_destroys_all_instances() {
        let (factory, counters) = counting_factory(Duration::ZERO);
        let (_, manager) = manager_with(factory, no_gc());
        manager
            .register_descriptor(ComponentDescriptor::new("Registry", "Counter", Scope::Singleton))
            .unwrap();
        manager
            .register_descriptor(ComponentDescriptor::new("Cart", "Counter", Scope::Stateful))
            .unwrap();
        manager
            .register_descriptor(ComponentDescriptor::new("Calc", "Counter", Scope::Stateless))
            .unwrap();

        manager.resolve("Registry", None).await.unwrap();
        manager.resolve("Cart", Some("a")).await.unwrap();
        let calc = manager.resolve("Calc", None).await.unwrap();
        manager.release(calc);

        manager.shutdown();
        assert_eq!(counters.destroyed.load(Ordering::SeqCst), 3);

        let stats = manager.stats();
        assert_eq!(stats.stateful_instances, 0);
        assert_eq!(stats.singleton_instances, 0);
        assert_eq!(stats.pooled_instances, 0);
        assert_eq!(stats.descriptors, 3);
    }
}
