//! Service registration, resolution and scopes.

use crate::core::{AnyValue, TypeKey};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use tracing::trace;

/// How long a resolved service instance lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServiceLifetime {
    /// A new instance for every resolution.
    Transient,
    /// One instance per [`ServiceScope`].
    Scoped,
    /// One instance for the whole process.
    Singleton,
}

/// Anything that can resolve service instances by type and optional key.
pub trait ServiceResolver: Send + Sync {
    /// Resolves an instance, returning `None` on a miss.
    fn resolve(&self, type_id: TypeId, key: Option<&str>) -> Option<AnyValue>;
}

/// Typed helpers over [`ServiceResolver`].
pub trait ServiceResolverExt: ServiceResolver {
    /// Resolves an unkeyed `T`.
    fn get<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.resolve(TypeId::of::<T>(), None)
            .and_then(|value| value.downcast::<T>().ok())
    }

    /// Resolves a keyed `T`.
    fn get_keyed<T: Send + Sync + 'static>(&self, key: &str) -> Option<Arc<T>> {
        self.resolve(TypeId::of::<T>(), Some(key))
            .and_then(|value| value.downcast::<T>().ok())
    }
}

impl<R: ServiceResolver + ?Sized> ServiceResolverExt for R {}

/// Factory producing a service instance.
pub type ServiceFactory = Arc<dyn Fn(&dyn ServiceResolver) -> AnyValue + Send + Sync>;

struct ServiceDescriptor {
    /// Position in registration order, also the scoped-instance slot.
    id: usize,
    service: TypeKey,
    key: Option<String>,
    lifetime: ServiceLifetime,
    factory: ServiceFactory,
    singleton: OnceLock<AnyValue>,
}

/// Builder collecting service registrations.
#[derive(Default)]
pub struct ServiceCollection {
    descriptors: Vec<ServiceDescriptor>,
}

impl ServiceCollection {
    /// Creates an empty collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a factory for `T` with a lifetime and optional key.
    ///
    /// Later registrations for the same type and key take precedence.
    pub fn add<T, F>(&mut self, lifetime: ServiceLifetime, key: Option<&str>, factory: F) -> &mut Self
    where
        T: Send + Sync + 'static,
        F: Fn(&dyn ServiceResolver) -> T + Send + Sync + 'static,
    {
        let factory: ServiceFactory = Arc::new(move |resolver| Arc::new(factory(resolver)) as AnyValue);
        self.descriptors.push(ServiceDescriptor {
            id: self.descriptors.len(),
            service: TypeKey::of::<T>(),
            key: key.map(String::from),
            lifetime,
            factory,
            singleton: OnceLock::new(),
        });
        self
    }

    /// Registers a transient service.
    pub fn add_transient<T, F>(&mut self, factory: F) -> &mut Self
    where
        T: Send + Sync + 'static,
        F: Fn(&dyn ServiceResolver) -> T + Send + Sync + 'static,
    {
        self.add(ServiceLifetime::Transient, None, factory)
    }

    /// Registers a scoped service.
    pub fn add_scoped<T, F>(&mut self, factory: F) -> &mut Self
    where
        T: Send + Sync + 'static,
        F: Fn(&dyn ServiceResolver) -> T + Send + Sync + 'static,
    {
        self.add(ServiceLifetime::Scoped, None, factory)
    }

    /// Registers a lazily created singleton.
    pub fn add_singleton<T, F>(&mut self, factory: F) -> &mut Self
    where
        T: Send + Sync + 'static,
        F: Fn(&dyn ServiceResolver) -> T + Send + Sync + 'static,
    {
        self.add(ServiceLifetime::Singleton, None, factory)
    }

    /// Registers an existing instance as a singleton.
    pub fn add_instance<T: Send + Sync + 'static>(&mut self, instance: T) -> &mut Self {
        self.add_shared(None, Arc::new(instance))
    }

    /// Registers an already shared instance as a singleton, optionally keyed.
    pub fn add_shared<T: Send + Sync + 'static>(&mut self, key: Option<&str>, instance: Arc<T>) -> &mut Self {
        let value: AnyValue = instance;
        let singleton = OnceLock::new();
        let _ = singleton.set(value.clone());
        self.descriptors.push(ServiceDescriptor {
            id: self.descriptors.len(),
            service: TypeKey::of::<T>(),
            key: key.map(String::from),
            lifetime: ServiceLifetime::Singleton,
            factory: Arc::new(move |_| value.clone()),
            singleton,
        });
        self
    }

    /// Returns the number of registrations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Freezes the registrations into a provider.
    #[must_use]
    pub fn build(self) -> ServiceProvider {
        let count = self.descriptors.len();
        let mut by_type: HashMap<TypeId, Vec<Arc<ServiceDescriptor>>> = HashMap::new();
        for descriptor in self.descriptors {
            by_type
                .entry(descriptor.service.id())
                .or_default()
                .push(Arc::new(descriptor));
        }

        ServiceProvider {
            inner: Arc::new(ProviderInner {
                by_type,
                count,
                root_instances: Mutex::new(HashMap::new()),
            }),
        }
    }
}

impl std::fmt::Debug for ServiceCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceCollection")
            .field("registrations", &self.descriptors.len())
            .finish()
    }
}

struct ProviderInner {
    by_type: HashMap<TypeId, Vec<Arc<ServiceDescriptor>>>,
    count: usize,
    /// Scoped instances resolved directly from the root provider.
    root_instances: Mutex<HashMap<usize, AnyValue>>,
}

/// Frozen service registrations.
///
/// Cheap to clone. Resolving a scoped service directly from the provider
/// treats the provider as its own root scope.
#[derive(Clone)]
pub struct ServiceProvider {
    inner: Arc<ProviderInner>,
}

impl Default for ServiceProvider {
    fn default() -> Self {
        ServiceCollection::new().build()
    }
}

impl ServiceProvider {
    /// Creates a fresh resolution scope.
    #[must_use]
    pub fn create_scope(&self) -> ServiceScope {
        ServiceScope {
            provider: self.clone(),
            instances: Mutex::new(HashMap::new()),
        }
    }

    /// Returns true if a service is registered for the type and key.
    #[must_use]
    pub fn contains(&self, type_id: TypeId, key: Option<&str>) -> bool {
        self.descriptor(type_id, key).is_some()
    }

    /// Returns the number of registrations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.count
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.count == 0
    }

    fn descriptor(&self, type_id: TypeId, key: Option<&str>) -> Option<&Arc<ServiceDescriptor>> {
        self.inner
            .by_type
            .get(&type_id)?
            .iter()
            .rev()
            .find(|descriptor| descriptor.key.as_deref() == key)
    }

    fn resolve_with(
        &self,
        type_id: TypeId,
        key: Option<&str>,
        instances: &Mutex<HashMap<usize, AnyValue>>,
        scope: &dyn ServiceResolver,
    ) -> Option<AnyValue> {
        let descriptor = self.descriptor(type_id, key)?;
        let value = match descriptor.lifetime {
            ServiceLifetime::Transient => (descriptor.factory)(scope),
            ServiceLifetime::Singleton => descriptor
                .singleton
                .get_or_init(|| (descriptor.factory)(self))
                .clone(),
            ServiceLifetime::Scoped => {
                if let Some(existing) = instances.lock().get(&descriptor.id) {
                    return Some(existing.clone());
                }
                // The lock is released while the factory runs so it can
                // resolve its own scoped dependencies.
                let created = (descriptor.factory)(scope);
                instances
                    .lock()
                    .entry(descriptor.id)
                    .or_insert(created)
                    .clone()
            }
        };
        trace!(service = %descriptor.service, lifetime = ?descriptor.lifetime, "Resolved service");
        Some(value)
    }
}

impl ServiceResolver for ServiceProvider {
    fn resolve(&self, type_id: TypeId, key: Option<&str>) -> Option<AnyValue> {
        self.resolve_with(type_id, key, &self.inner.root_instances, self)
    }
}

impl std::fmt::Debug for ServiceProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceProvider")
            .field("registrations", &self.inner.count)
            .finish()
    }
}

/// A resolution scope owning its scoped instances.
///
/// Dropping the scope disposes every scoped instance it created.
pub struct ServiceScope {
    provider: ServiceProvider,
    instances: Mutex<HashMap<usize, AnyValue>>,
}

impl ServiceScope {
    /// Returns the number of scoped instances created so far.
    #[must_use]
    pub fn instance_count(&self) -> usize {
        self.instances.lock().len()
    }

    /// Returns the provider this scope was created from.
    #[must_use]
    pub const fn provider(&self) -> &ServiceProvider {
        &self.provider
    }
}

impl ServiceResolver for ServiceScope {
    fn resolve(&self, type_id: TypeId, key: Option<&str>) -> Option<AnyValue> {
        self.provider.resolve_with(type_id, key, &self.instances, self)
    }
}

impl Drop for ServiceScope {
    fn drop(&mut self) {
        let disposed = self.instances.get_mut().len();
        if disposed > 0 {
            trace!(disposed, "Disposing service scope");
        }
    }
}

impl std::fmt::Debug for ServiceScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceScope")
            .field("instances", &self.instance_count())
            .finish()
    }
}
