use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use crate::errors::AppError;

type Slot = Box<dyn Any + Send + Sync>;

/// Collects services while features initialize.
///
/// Values are stored as `Arc<T>` so trait objects (`Arc<dyn Cache>`) work the
/// same way as concrete types. Once `build()` is called the set is frozen.
#[derive(Default)]
pub struct ContainerBuilder {
    typed: HashMap<TypeId, Slot>,
    named: HashMap<String, Slot>,
}

impl ContainerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a value by type. A second registration of the same type replaces the first.
    pub fn provide<T>(&mut self, value: Arc<T>) -> &mut Self
    where
        T: ?Sized + Send + Sync + 'static,
    {
        if self.typed.insert(TypeId::of::<T>(), Box::new(value)).is_some() {
            tracing::debug!(service = std::any::type_name::<T>(), "container entry replaced");
        }
        self
    }

    /// Register a value under a name, for several instances of the same type.
    pub fn provide_named<T>(&mut self, name: impl Into<String>, value: Arc<T>) -> &mut Self
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.named.insert(name.into(), Box::new(value));
        self
    }

    pub fn contains<T>(&self) -> bool
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.typed.contains_key(&TypeId::of::<T>())
    }

    /// Lookup during init, so later features can use what earlier ones provided.
    pub fn get<T>(&self) -> Option<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        lookup(self.typed.get(&TypeId::of::<T>()))
    }

    pub fn build(self) -> Container {
        Container {
            inner: Arc::new(ContainerInner {
                typed: self.typed,
                named: self.named,
            }),
        }
    }
}

struct ContainerInner {
    typed: HashMap<TypeId, Slot>,
    named: HashMap<String, Slot>,
}

/// Immutable service container passed explicitly to handlers and features.
#[derive(Clone)]
pub struct Container {
    inner: Arc<ContainerInner>,
}

impl Default for Container {
    fn default() -> Self {
        ContainerBuilder::new().build()
    }
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("typed", &self.inner.typed.len())
            .field("named", &self.inner.named.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Container {
    pub fn get<T>(&self) -> Option<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        lookup(self.inner.typed.get(&TypeId::of::<T>()))
    }

    /// Like `get`, but a missing service is an internal error.
    pub fn require<T>(&self) -> anyhow::Result<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.get::<T>().ok_or_else(|| {
            AppError::internal(format!(
                "service not registered: {}",
                std::any::type_name::<T>()
            ))
            .into_anyhow()
        })
    }

    pub fn named<T>(&self, name: &str) -> Option<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        lookup(self.inner.named.get(name))
    }
}

fn lookup<T>(slot: Option<&Slot>) -> Option<Arc<T>>
where
    T: ?Sized + Send + Sync + 'static,
{
    slot.and_then(|any| any.downcast_ref::<Arc<T>>()).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Greeter: Send + Sync {
        fn greet(&self) -> String;
    }

    struct English;

    impl Greeter for English {
        fn greet(&self) -> String {
            "hello".to_string()
        }
    }

    #[test]
    fn trait_objects_round_trip_through_the_container() {
        let mut builder = ContainerBuilder::new();
        builder.provide::<dyn Greeter>(Arc::new(English));
        builder.provide(Arc::new(42u32));
        let container = builder.build();

        assert_eq!(container.get::<dyn Greeter>().unwrap().greet(), "hello");
        assert_eq!(*container.get::<u32>().unwrap(), 42);
        assert!(container.get::<String>().is_none());
        assert!(container.require::<String>().is_err());
    }

    #[test]
    fn named_entries_are_type_checked() {
        let mut builder = ContainerBuilder::new();
        builder.provide_named("primary", Arc::new("db-a".to_string()));
        let container = builder.build();

        assert_eq!(container.named::<String>("primary").unwrap().as_str(), "db-a");
        assert!(container.named::<u32>("primary").is_none());
        assert!(container.named::<String>("replica").is_none());
    }
}
