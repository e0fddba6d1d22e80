//! The resource container.

use std::any::Any;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::BoxFuture;
use tracing::debug;

use crate::error::ContainerError;

/// Lifecycle event observed by refresh listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshEvent {
    /// The swap is about to happen; dependents should quiesce.
    Refreshing,
    /// The swap is complete; the new generation is resolvable.
    Refreshed,
}

/// Async callback invoked around a singleton refresh.
pub type RefreshListener = Arc<dyn Fn(RefreshEvent) -> BoxFuture<'static, ()> + Send + Sync>;

type AnyInstance = Arc<dyn Any + Send + Sync>;
type FactoryError = Arc<anyhow::Error>;
type Factory = Arc<dyn Fn() -> Result<AnyInstance, FactoryError> + Send + Sync>;

/// One singleton generation: factory plus once-guarded result.
///
/// The guard shares both the instance and any captured error with every
/// resolver; concurrent first-resolvers block and observe the same pair.
struct SingletonCell {
    factory: Factory,
    cell: OnceLock<Result<AnyInstance, FactoryError>>,
}

impl SingletonCell {
    fn resolve(&self, name: &str) -> Result<AnyInstance, ContainerError> {
        match self.cell.get_or_init(|| (self.factory)()) {
            Ok(instance) => Ok(Arc::clone(instance)),
            Err(err) => Err(ContainerError::Factory {
                name: name.to_string(),
                source: Arc::clone(err),
            }),
        }
    }
}

#[derive(Clone)]
enum Registration {
    Singleton(Arc<SingletonCell>),
    Transient(Factory),
    Scoped { factory: Factory, ttl: Duration },
}

/// The dependency-scoped resource container.
///
/// Constructed once at process start and injected into every service;
/// there is no process-global registry.
pub struct Container {
    entries: DashMap<String, Registration>,
    scoped: Arc<DashMap<(String, u64), AnyInstance>>,
    listeners: DashMap<String, Vec<RefreshListener>>,
}

impl Container {
    /// Create an empty container.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            scoped: Arc::new(DashMap::new()),
            listeners: DashMap::new(),
        }
    }

    /// Register a singleton resource.
    ///
    /// The factory runs at most once, on first resolve; all resolvers
    /// share the result, including a captured error.
    ///
    /// # Errors
    ///
    /// `ContainerError::Duplicate` when the name is taken.
    pub fn register_singleton<T, F>(&self, name: &str, factory: F) -> Result<(), ContainerError>
    where
        T: Send + Sync + 'static,
        F: Fn() -> anyhow::Result<T> + Send + Sync + 'static,
    {
        self.insert(
            name,
            Registration::Singleton(Arc::new(SingletonCell {
                factory: wrap_factory(factory),
                cell: OnceLock::new(),
            })),
        )
    }

    /// Register a transient resource: every resolve runs the factory.
    ///
    /// # Errors
    ///
    /// `ContainerError::Duplicate` when the name is taken.
    pub fn register_transient<T, F>(&self, name: &str, factory: F) -> Result<(), ContainerError>
    where
        T: Send + Sync + 'static,
        F: Fn() -> anyhow::Result<T> + Send + Sync + 'static,
    {
        self.insert(name, Registration::Transient(wrap_factory(factory)))
    }

    /// Register a scoped resource: one instance per scope id, evicted
    /// `ttl` after construction by a background timer.
    ///
    /// Eviction timers run on the tokio runtime; resolving a scoped
    /// resource outside a runtime panics in the timer spawn.
    ///
    /// # Errors
    ///
    /// `ContainerError::Duplicate` when the name is taken.
    pub fn register_scoped<T, F>(
        &self,
        name: &str,
        ttl: Duration,
        factory: F,
    ) -> Result<(), ContainerError>
    where
        T: Send + Sync + 'static,
        F: Fn() -> anyhow::Result<T> + Send + Sync + 'static,
    {
        self.insert(
            name,
            Registration::Scoped {
                factory: wrap_factory(factory),
                ttl,
            },
        )
    }

    /// Resolve a singleton or transient resource.
    ///
    /// # Errors
    ///
    /// `NotFound` for unregistered names, `InvalidCast` when `T` does not
    /// match the stored instance, `MissingScope` for scoped resources,
    /// `Factory` when construction failed.
    pub fn resolve<T: Send + Sync + 'static>(&self, name: &str) -> Result<Arc<T>, ContainerError> {
        match self.registration(name)? {
            Registration::Singleton(cell) => downcast(name, cell.resolve(name)?),
            Registration::Transient(factory) => downcast(name, run_factory(name, &factory)?),
            Registration::Scoped { .. } => Err(ContainerError::MissingScope(name.to_string())),
        }
    }

    /// Resolve a resource within a scope.
    ///
    /// The first resolve for a scope id runs the factory and schedules
    /// the eviction timer; later resolves within the TTL share the
    /// instance. Singleton and transient resources ignore the scope id.
    ///
    /// # Errors
    ///
    /// As for [`resolve`](Self::resolve).
    pub fn resolve_scoped<T: Send + Sync + 'static>(
        &self,
        name: &str,
        scope_id: u64,
    ) -> Result<Arc<T>, ContainerError> {
        let Registration::Scoped { factory, ttl } = self.registration(name)? else {
            return self.resolve(name);
        };

        let key = (name.to_string(), scope_id);
        if let Some(existing) = self.scoped.get(&key) {
            return downcast(name, Arc::clone(existing.value()));
        }

        let instance = run_factory(name, &factory)?;
        // Racing first-resolvers may both construct; the last insert wins
        // and the extra timer only evicts early, which callers tolerate.
        self.scoped.insert(key.clone(), Arc::clone(&instance));
        let scoped = Arc::clone(&self.scoped);
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            scoped.remove(&key);
            debug!(name = %key.0, scope_id = key.1, "Scoped instance evicted");
        });

        downcast(name, instance)
    }

    /// Resolve or panic. Convenience for wiring code where a missing
    /// resource is a programming error.
    ///
    /// # Panics
    ///
    /// On any resolution failure.
    #[must_use]
    pub fn resolve_expect<T: Send + Sync + 'static>(&self, name: &str) -> Arc<T> {
        match self.resolve(name) {
            Ok(instance) => instance,
            Err(err) => panic!("{err}"),
        }
    }

    /// Register a refresh listener for a resource name.
    ///
    /// Listeners fire in registration order, once with `Refreshing`
    /// before the swap and once with `Refreshed` after it.
    pub fn on_refresh(&self, name: &str, listener: RefreshListener) {
        self.listeners
            .entry(name.to_string())
            .or_default()
            .push(listener);
    }

    /// Atomically replace a singleton's factory/instance pair.
    ///
    /// Fires `Refreshing` listeners (awaiting each, so a listener can
    /// hold the swap until its dependents quiesce), installs a fresh
    /// once-guarded generation, then fires `Refreshed`. The old instance
    /// is not torn down here; the factory or a listener owns teardown.
    /// Registers the name if it was never registered.
    pub async fn refresh_singleton<T, F>(&self, name: &str, factory: F)
    where
        T: Send + Sync + 'static,
        F: Fn() -> anyhow::Result<T> + Send + Sync + 'static,
    {
        let listeners: Vec<RefreshListener> = self
            .listeners
            .get(name)
            .map(|entry| entry.value().clone())
            .unwrap_or_default();

        for listener in &listeners {
            listener(RefreshEvent::Refreshing).await;
        }

        self.entries.insert(
            name.to_string(),
            Registration::Singleton(Arc::new(SingletonCell {
                factory: wrap_factory(factory),
                cell: OnceLock::new(),
            })),
        );
        debug!(name = %name, "Singleton refreshed");

        for listener in &listeners {
            listener(RefreshEvent::Refreshed).await;
        }
    }

    /// Whether a resource name is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    fn insert(&self, name: &str, registration: Registration) -> Result<(), ContainerError> {
        match self.entries.entry(name.to_string()) {
            Entry::Occupied(_) => Err(ContainerError::Duplicate(name.to_string())),
            Entry::Vacant(vacant) => {
                vacant.insert(registration);
                Ok(())
            }
        }
    }

    // Clones the registration out so no map lock is held while a
    // factory executes.
    fn registration(&self, name: &str) -> Result<Registration, ContainerError> {
        self.entries
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ContainerError::NotFound(name.to_string()))
    }
}

impl Default for Container {
    fn default() -> Self {
        Self::new()
    }
}

fn wrap_factory<T, F>(factory: F) -> Factory
where
    T: Send + Sync + 'static,
    F: Fn() -> anyhow::Result<T> + Send + Sync + 'static,
{
    Arc::new(move || {
        factory()
            .map(|value| Arc::new(value) as AnyInstance)
            .map_err(Arc::new)
    })
}

fn run_factory(name: &str, factory: &Factory) -> Result<AnyInstance, ContainerError> {
    factory().map_err(|source| ContainerError::Factory {
        name: name.to_string(),
        source,
    })
}

fn downcast<T: Send + Sync + 'static>(
    name: &str,
    instance: AnyInstance,
) -> Result<Arc<T>, ContainerError> {
    instance
        .downcast::<T>()
        .map_err(|_| ContainerError::InvalidCast(name.to_string()))
}
