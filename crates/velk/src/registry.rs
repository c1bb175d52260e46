//! Type registry: a sorted `Uid -> factory` table with owner stamping for
//! plugin sweeps.

use std::fmt;
use std::sync::{Arc, Mutex};

use crate::interface::Interface;
use crate::memory::SharedPtr;
use crate::object::ObjectFactory;
use crate::util::lock;
use crate::{ClassInfo, ObjectFlags, ReturnValue, Uid};

struct Entry {
    uid: Uid,
    factory: Arc<dyn ObjectFactory>,
    /// Plugin that registered this type; nil for built-ins and
    /// application-registered types.
    owner: Uid,
}

struct RegistryState {
    types: Vec<Entry>,
    current_owner: Uid,
}

/// Sorted registry of class factories keyed by class UID.
pub struct TypeRegistry {
    state: Mutex<RegistryState>,
}

impl TypeRegistry {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(RegistryState {
                types: Vec::new(),
                current_owner: Uid::NIL,
            }),
        }
    }

    /// Registers (or replaces) a factory under its class UID, stamping the
    /// current owner.
    pub fn register_type(&self, factory: Arc<dyn ObjectFactory>) -> ReturnValue {
        let info = factory.class_info();
        log::debug!("Register {} (uid: {})", info.name, info.uid);
        let mut state = lock(&self.state);
        let owner = state.current_owner;
        match state.types.binary_search_by(|e| e.uid.cmp(&info.uid)) {
            Ok(index) => {
                state.types[index].factory = factory;
                state.types[index].owner = owner;
            }
            Err(index) => state.types.insert(
                index,
                Entry {
                    uid: info.uid,
                    factory,
                    owner,
                },
            ),
        }
        ReturnValue::Success
    }

    /// Removes the factory registered under `uid`.
    pub fn unregister_type(&self, uid: Uid) -> ReturnValue {
        let mut state = lock(&self.state);
        if let Ok(index) = state.types.binary_search_by(|e| e.uid.cmp(&uid)) {
            let entry = state.types.remove(index);
            log::debug!(
                "Unregister {} (uid: {})",
                entry.factory.class_info().name,
                uid
            );
        }
        ReturnValue::Success
    }

    /// The factory registered under `uid`.
    pub fn find_factory(&self, uid: Uid) -> Option<Arc<dyn ObjectFactory>> {
        let state = lock(&self.state);
        state
            .types
            .binary_search_by(|e| e.uid.cmp(&uid))
            .ok()
            .map(|index| state.types[index].factory.clone())
    }

    /// Static class descriptor for `uid`, if registered.
    pub fn class_info(&self, uid: Uid) -> Option<&'static ClassInfo> {
        self.find_factory(uid).map(|f| f.class_info())
    }

    /// Creates an instance of a registered type, applying `flags` to the
    /// new object. Returns `None` on an unknown UID.
    pub fn create(&self, uid: Uid, flags: ObjectFlags) -> Option<SharedPtr<dyn Interface>> {
        let factory = self.find_factory(uid)?;
        let object = factory.create()?;
        if !flags.is_empty() {
            object.core().add_flags(flags);
        }
        Some(object)
    }

    /// Sets the owner context stamped onto subsequent registrations.
    pub(crate) fn set_owner(&self, uid: Uid) {
        lock(&self.state).current_owner = uid;
    }

    /// Removes every entry owned by `uid`.
    pub(crate) fn sweep_owner(&self, uid: Uid) {
        let mut state = lock(&self.state);
        state.types.retain(|e| e.owner != uid);
    }

    /// Number of registered types.
    pub fn len(&self) -> usize {
        lock(&self.state).types.len()
    }

    /// True when no types are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("types", &self.len())
            .finish()
    }
}
