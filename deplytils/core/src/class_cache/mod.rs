//! Class-Scoped Computed Attributes
//!
//! Attaches lazily computed values to a *class* rather than to an instance.
//! A [`ClassHandle`] is an explicit owner type: a named table of attributes.
//! Every attribute is produced by a function that receives the owning class.
//!
//! Two flavours are provided:
//!
//! - [`ClassProperty`]: recomputed on every read, readable only through the class
//! - [`CachedClassProperty`]: computed once per cache epoch, readable through the
//!   class or any of its instances, invalidated explicitly
//!
//! # Cache Epochs
//!
//! ```text
//!   bind ──► [empty] ──read──► [populated] ──invalidate──► fresh [empty] on owner
//!               │                                               │
//!               └──────────────invalidate──────────────► removed forever
//! ```
//!
//! Invalidating a cached attribute that was never read removes it from the
//! class for good: nothing remembers the owner, so nothing can rebind it.
//! Callers that want a reset must read at least once before invalidating.
//!
//! # Thread Safety
//!
//! Handles are `Send + Sync`, but populate-then-store is not atomic. Two
//! threads racing on an empty epoch may both run the producer; the first
//! stored value wins. Serialize access externally when the producer's side
//! effects must be observed exactly once.

mod property;

pub use property::{CachedClassProperty, ClassProperty};

use std::any::{type_name, Any};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use thiserror::Error;
use tracing::debug;

/// Type-erased value produced by a class attribute
pub type Value = Arc<dyn Any + Send + Sync>;

/// Errors raised by class attribute access
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClassCacheError {
    /// The attribute was used in an access mode it does not support
    #[error("{class}.{attribute}: {reason}")]
    ContractViolation {
        /// Owning class name
        class: String,
        /// Attribute name
        attribute: String,
        /// What was violated
        reason: String,
    },

    /// No attribute of that name is bound on the class
    #[error("type object '{class}' has no attribute '{attribute}'")]
    MissingAttribute {
        /// Owning class name
        class: String,
        /// Attribute name
        attribute: String,
    },

    /// The attribute holds a value of a different type than requested
    #[error("{class}.{attribute} does not hold a value of type {expected}")]
    TypeMismatch {
        /// Owning class name
        class: String,
        /// Attribute name
        attribute: String,
        /// Requested type
        expected: &'static str,
    },
}

/// The path through which an attribute is read
#[derive(Clone, Copy)]
pub enum Access<'a> {
    /// Read directly through the class
    Class(&'a ClassHandle),
    /// Read through an instance of the class
    Instance(&'a Instance),
}

impl<'a> Access<'a> {
    /// The class that owns the attribute, whichever path was used
    #[must_use]
    pub fn owner(&self) -> &'a ClassHandle {
        match *self {
            Self::Class(class) => class,
            Self::Instance(instance) => instance.class(),
        }
    }

    /// Whether the read came through an instance
    #[must_use]
    pub fn is_instance(&self) -> bool {
        matches!(self, Self::Instance(_))
    }
}

/// Replacement attribute to install after an invalidation
pub struct Rebind {
    /// Class that should receive the fresh attribute
    pub owner: WeakClassHandle,
    /// Fresh attribute starting a new epoch
    pub attribute: Arc<dyn ClassAttribute>,
}

/// Accessor interface for a computed class attribute
pub trait ClassAttribute: Send + Sync {
    /// Name the attribute is bound under
    fn name(&self) -> &str;

    /// Produce (or return the cached) value for this access
    ///
    /// # Errors
    ///
    /// Returns `ClassCacheError::ContractViolation` if the access path is not
    /// supported by this attribute.
    fn read(&self, access: Access<'_>) -> Result<Value, ClassCacheError>;

    /// Called after the attribute has been removed from its class
    ///
    /// Returning `Some` reinstalls a replacement on the remembered owner;
    /// returning `None` leaves the attribute removed.
    fn invalidated(&self) -> Option<Rebind>;
}

struct ClassInner {
    name: String,
    attributes: RwLock<HashMap<String, Arc<dyn ClassAttribute>>>,
}

/// Shared handle to an owner class
///
/// Cloning the handle shares the same attribute table.
#[derive(Clone)]
pub struct ClassHandle {
    inner: Arc<ClassInner>,
}

impl ClassHandle {
    /// Create a class with no attributes
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(ClassInner {
                name: name.into(),
                attributes: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Start defining a class with its attributes
    pub fn builder(name: impl Into<String>) -> ClassBuilder {
        ClassBuilder {
            class: Self::new(name),
        }
    }

    /// Class name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Non-owning reference to this class
    #[must_use]
    pub fn downgrade(&self) -> WeakClassHandle {
        WeakClassHandle(Arc::downgrade(&self.inner))
    }

    /// Whether two handles refer to the same class
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Bind an attribute under its own name
    ///
    /// Any attribute previously bound under that name is replaced and returned.
    pub fn bind<A>(&self, attribute: A) -> Option<Arc<dyn ClassAttribute>>
    where
        A: ClassAttribute + 'static,
    {
        self.bind_shared(Arc::new(attribute))
    }

    fn bind_shared(&self, attribute: Arc<dyn ClassAttribute>) -> Option<Arc<dyn ClassAttribute>> {
        let name = attribute.name().to_string();
        let previous = self.inner.attributes.write().insert(name.clone(), attribute);
        if previous.is_some() {
            debug!(class = %self.name(), attribute = %name, "Replaced bound attribute");
        }
        previous
    }

    /// Whether an attribute is currently bound under `name`
    #[must_use]
    pub fn has_attribute(&self, name: &str) -> bool {
        self.inner.attributes.read().contains_key(name)
    }

    /// Names of all bound attributes, sorted
    #[must_use]
    pub fn attribute_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.attributes.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Read an attribute through the class without downcasting
    ///
    /// # Errors
    ///
    /// Returns `ClassCacheError::MissingAttribute` if nothing is bound under `name`.
    pub fn read_value(&self, name: &str) -> Result<Value, ClassCacheError> {
        self.attribute(name)?.read(Access::Class(self))
    }

    /// Read an attribute through the class
    ///
    /// # Errors
    ///
    /// Returns `ClassCacheError::MissingAttribute` if nothing is bound under `name`,
    /// or `ClassCacheError::TypeMismatch` if the value is not a `T`.
    pub fn read<T: Clone + 'static>(&self, name: &str) -> Result<T, ClassCacheError> {
        let value = self.read_value(name)?;
        self.downcast(name, &value)
    }

    /// Invalidate an attribute
    ///
    /// The attribute is removed from the class. If it had been populated, a
    /// fresh attribute with an empty cache is rebound on the class that
    /// populated it. Otherwise it stays removed.
    ///
    /// # Errors
    ///
    /// Returns `ClassCacheError::MissingAttribute` if nothing is bound under `name`.
    pub fn invalidate(&self, name: &str) -> Result<(), ClassCacheError> {
        let removed = self
            .inner
            .attributes
            .write()
            .remove(name)
            .ok_or_else(|| self.missing(name))?;

        match removed.invalidated() {
            Some(Rebind { owner, attribute }) => match owner.upgrade() {
                Some(owner) => {
                    debug!(class = %owner.name(), attribute = %name, "Cache invalidated, attribute rebound");
                    owner.bind_shared(attribute);
                }
                None => {
                    debug!(attribute = %name, "Owner class dropped, nothing to rebind");
                }
            },
            None => {
                debug!(class = %self.name(), attribute = %name, "Attribute removed");
            }
        }

        Ok(())
    }

    /// Create an instance of this class
    #[must_use]
    pub fn instantiate(&self) -> Instance {
        Instance {
            class: self.clone(),
        }
    }

    fn attribute(&self, name: &str) -> Result<Arc<dyn ClassAttribute>, ClassCacheError> {
        // Clone out of the table so the producer runs with no lock held
        self.inner
            .attributes
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| self.missing(name))
    }

    fn missing(&self, name: &str) -> ClassCacheError {
        ClassCacheError::MissingAttribute {
            class: self.name().to_string(),
            attribute: name.to_string(),
        }
    }

    fn downcast<T: Clone + 'static>(&self, name: &str, value: &Value) -> Result<T, ClassCacheError> {
        (**value)
            .downcast_ref::<T>()
            .cloned()
            .ok_or_else(|| ClassCacheError::TypeMismatch {
                class: self.name().to_string(),
                attribute: name.to_string(),
                expected: type_name::<T>(),
            })
    }
}

impl fmt::Debug for ClassHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassHandle")
            .field("name", &self.name())
            .field("attributes", &self.attribute_names())
            .finish()
    }
}

/// Non-owning reference to a class
#[derive(Clone)]
pub struct WeakClassHandle(Weak<ClassInner>);

impl WeakClassHandle {
    /// Recover the class, if it is still alive
    #[must_use]
    pub fn upgrade(&self) -> Option<ClassHandle> {
        self.0.upgrade().map(|inner| ClassHandle { inner })
    }
}

impl fmt::Debug for WeakClassHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.upgrade() {
            Some(class) => write!(f, "WeakClassHandle({})", class.name()),
            None => write!(f, "WeakClassHandle(<dropped>)"),
        }
    }
}

/// Instance of a class
///
/// Instances hold no attribute state of their own; every read resolves
/// through the class.
#[derive(Debug, Clone)]
pub struct Instance {
    class: ClassHandle,
}

impl Instance {
    /// The class this is an instance of
    #[must_use]
    pub fn class(&self) -> &ClassHandle {
        &self.class
    }

    /// Read an attribute through this instance without downcasting
    ///
    /// # Errors
    ///
    /// Returns `ClassCacheError::MissingAttribute` if nothing is bound under `name`,
    /// or `ClassCacheError::ContractViolation` for class-only attributes.
    pub fn read_value(&self, name: &str) -> Result<Value, ClassCacheError> {
        self.class.attribute(name)?.read(Access::Instance(self))
    }

    /// Read an attribute through this instance
    ///
    /// # Errors
    ///
    /// See [`Instance::read_value`]; additionally `ClassCacheError::TypeMismatch`.
    pub fn read<T: Clone + 'static>(&self, name: &str) -> Result<T, ClassCacheError> {
        let value = self.read_value(name)?;
        self.class.downcast(name, &value)
    }
}

/// Builder binding attributes at class-definition time
#[derive(Debug)]
pub struct ClassBuilder {
    class: ClassHandle,
}

impl ClassBuilder {
    /// Bind any attribute
    #[must_use]
    pub fn attribute<A>(self, attribute: A) -> Self
    where
        A: ClassAttribute + 'static,
    {
        self.class.bind(attribute);
        self
    }

    /// Bind a non-caching class property
    #[must_use]
    pub fn property<T, F>(self, name: impl Into<String>, producer: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&ClassHandle) -> T + Send + Sync + 'static,
    {
        self.attribute(ClassProperty::new(name, producer))
    }

    /// Bind a cached class property
    #[must_use]
    pub fn cached_property<T, F>(self, name: impl Into<String>, producer: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&ClassHandle) -> T + Send + Sync + 'static,
    {
        self.attribute(CachedClassProperty::new(name, producer))
    }

    /// Finish the class definition
    #[must_use]
    pub fn build(self) -> ClassHandle {
        self.class
    }
}
