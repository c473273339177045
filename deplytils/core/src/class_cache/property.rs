//! Plain and cached class properties

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use super::{Access, ClassAttribute, ClassCacheError, ClassHandle, Rebind, Value, WeakClassHandle};

type Producer<T> = Arc<dyn Fn(&ClassHandle) -> T + Send + Sync>;

/// Class property recomputed on every read
///
/// Only readable through the class. Reading through an instance is a
/// contract violation: it would be ambiguous which class state is meant.
pub struct ClassProperty<T> {
    name: String,
    producer: Producer<T>,
}

impl<T: Send + Sync + 'static> ClassProperty<T> {
    /// Wrap `producer` as a class property named `name`
    pub fn new<F>(name: impl Into<String>, producer: F) -> Self
    where
        F: Fn(&ClassHandle) -> T + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            producer: Arc::new(producer),
        }
    }
}

impl<T: Send + Sync + 'static> ClassAttribute for ClassProperty<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&self, access: Access<'_>) -> Result<Value, ClassCacheError> {
        match access {
            Access::Class(class) => Ok(Arc::new((self.producer)(class))),
            Access::Instance(instance) => Err(ClassCacheError::ContractViolation {
                class: instance.class().name().to_string(),
                attribute: self.name.clone(),
                reason: "class property can only be read through the class, not an instance"
                    .to_string(),
            }),
        }
    }

    fn invalidated(&self) -> Option<Rebind> {
        None
    }
}

impl<T> fmt::Debug for ClassProperty<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassProperty")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct CacheSlot {
    value: Option<Value>,
    /// Set on first populate; the class a fresh epoch is rebound on
    owner: Option<WeakClassHandle>,
}

/// Class property computed once per cache epoch
///
/// The first read runs the producer with the owning class and stores the
/// result. Later reads, through the class or any instance, return the same
/// value until [`ClassHandle::invalidate`] is called.
pub struct CachedClassProperty<T> {
    name: String,
    producer: Producer<T>,
    slot: Mutex<CacheSlot>,
}

impl<T: Send + Sync + 'static> CachedClassProperty<T> {
    /// Wrap `producer` as a cached class property named `name`
    pub fn new<F>(name: impl Into<String>, producer: F) -> Self
    where
        F: Fn(&ClassHandle) -> T + Send + Sync + 'static,
    {
        Self::with_producer(name.into(), Arc::new(producer))
    }

    fn with_producer(name: String, producer: Producer<T>) -> Self {
        Self {
            name,
            producer,
            slot: Mutex::new(CacheSlot::default()),
        }
    }

    /// Whether the current epoch holds a value
    #[must_use]
    pub fn is_cached(&self) -> bool {
        self.slot.lock().value.is_some()
    }

    fn fresh(&self) -> Self {
        Self::with_producer(self.name.clone(), Arc::clone(&self.producer))
    }
}

impl<T: Send + Sync + 'static> ClassAttribute for CachedClassProperty<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&self, access: Access<'_>) -> Result<Value, ClassCacheError> {
        if let Some(value) = self.slot.lock().value.clone() {
            return Ok(value);
        }

        // Lock released while producing so the producer can read the class
        let owner = access.owner();
        let produced: Value = Arc::new((self.producer)(owner));

        let mut slot = self.slot.lock();
        if let Some(existing) = &slot.value {
            return Ok(Arc::clone(existing));
        }
        slot.value = Some(Arc::clone(&produced));
        slot.owner = Some(owner.downgrade());
        debug!(class = %owner.name(), attribute = %self.name, "Populated class cache");

        Ok(produced)
    }

    fn invalidated(&self) -> Option<Rebind> {
        let owner = self.slot.lock().owner.clone()?;
        Some(Rebind {
            owner,
            attribute: Arc::new(self.fresh()),
        })
    }
}

impl<T> fmt::Debug for CachedClassProperty<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedClassProperty")
            .field("name", &self.name)
            .field("cached", &self.slot.lock().value.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_class(cached: bool) -> (ClassHandle, Arc<AtomicUsize>) {
        let counter = Arc::new(AtomicUsize::new(0));
        let produced = Arc::clone(&counter);
        let producer = move |_: &ClassHandle| produced.fetch_add(1, Ordering::SeqCst) + 1;

        let builder = ClassHandle::builder("TestClass");
        let class = if cached {
            builder.cached_property("property", producer).build()
        } else {
            builder.property("property", producer).build()
        };
        (class, counter)
    }

    #[test]
    fn test_plain_property_recomputes() {
        let (class, counter) = counting_class(false);
        assert_eq!(class.read::<usize>("property").unwrap(), 1);
        assert_eq!(class.read::<usize>("property").unwrap(), 2);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_plain_property_rejects_instance() {
        let (class, counter) = counting_class(false);
        let err = class.instantiate().read::<usize>("property").unwrap_err();
        assert!(matches!(err, ClassCacheError::ContractViolation { .. }));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_plain_property_invalidate_removes() {
        let (class, _) = counting_class(false);
        class.read::<usize>("property").unwrap();
        class.invalidate("property").unwrap();
        assert!(!class.has_attribute("property"));
    }

    #[test]
    fn test_cached_property_skips_processing() {
        let (class, counter) = counting_class(true);
        assert_eq!(class.read::<usize>("property").unwrap(), 1);
        assert_eq!(class.read::<usize>("property").unwrap(), 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cached_value_is_shared() {
        let (class, _) = counting_class(true);
        let first = class.read_value("property").unwrap();
        let second = class.instantiate().read_value("property").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_is_cached_tracks_epoch() {
        let class = ClassHandle::new("Direct");
        let property = CachedClassProperty::new("value", |_| 7_u8);
        assert!(!property.is_cached());
        assert!(property.read(Access::Class(&class)).is_ok());
        assert!(property.is_cached());
        assert!(!property.fresh().is_cached());
    }

    #[test]
    fn test_unpopulated_invalidation_has_no_rebind() {
        let property = CachedClassProperty::new("value", |_| 7_u8);
        assert!(property.invalidated().is_none());
    }

    #[test]
    fn test_debug_output() {
        let property = CachedClassProperty::new("value", |_| 7_u8);
        let debug = format!("{:?}", property);
        assert!(debug.contains("value"));
        assert!(debug.contains("cached: false"));
    }
}
