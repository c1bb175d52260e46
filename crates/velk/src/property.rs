//! Property runtime: a type-erased value container paired with a change
//! event, supporting read-only enforcement, deferred writes, and external
//! value sources.

use std::fmt;
use std::sync::{Mutex, OnceLock};

use crate::any::{AnyPtr, AnyValue, ExternalAny};
use crate::function::{Function, FunctionImpl, FunctionPtr};
use crate::interface::{
    interface_cast, interface_ptr_cast, Interface, InterfaceEntry, InterfaceId,
};
use crate::memory::SharedPtr;
use crate::metadata::MemberCache;
use crate::object::{make_object, ObjectCore};
use crate::runtime::{instance, DeferredPropertySet};
use crate::util::lock;
use crate::{ClassInfo, InvokeMode, ObjectFlags, ReturnValue, Uid};

/// Shared pointer to a property.
pub type PropertyPtr = SharedPtr<dyn Property>;

/// An observable value: a type-erased container plus an `on_changed` event.
pub trait Property: Interface {
    /// The backing value container.
    fn get_value(&self) -> Option<AnyPtr>;

    /// Writes the value from another container.
    ///
    /// `Immediate` writes through and fires `on_changed` when the stored
    /// value changed; `Deferred` clones the backing container, applies the
    /// write to the clone, and queues it for the next update tick (where
    /// writes to the same property coalesce, last write wins).
    ///
    /// Answers [`ReturnValue::ReadOnly`] when the read-only flag is set and
    /// [`ReturnValue::NothingToDo`] when the new value compares equal.
    fn set_value(&self, from: &dyn AnyValue, mode: InvokeMode) -> ReturnValue;

    /// Typed-slot variant of [`Property::set_value`], mirroring the
    /// byte-level write of the original contract.
    fn set_data(&self, from: &dyn std::any::Any, ty: Uid, mode: InvokeMode) -> ReturnValue;

    /// The change event, created on first access. Fired with the backing
    /// container as its single argument.
    fn on_changed(&self) -> FunctionPtr;
}

impl InterfaceId for dyn Property {
    const UID: Uid = Uid::parse("8b5016bb-ed56-4fcd-bcbb-9e1344ff5b22");
    const NAME: &'static str = "IProperty";
}

/// Wiring surface used by the metadata container and the update loop.
pub trait PropertyInternal: Property {
    /// Installs the backing container. Only one install is allowed; an
    /// external container's change event is relayed into `on_changed`.
    fn set_any(&self, any: AnyPtr) -> bool;

    /// The backing container without cloning semantics.
    fn get_any(&self) -> Option<AnyPtr>;

    /// Replaces the property's flags.
    fn set_flags(&self, flags: ObjectFlags);

    /// Writes without firing `on_changed`. Used by the update loop, which
    /// fires the coalesced notification itself.
    fn set_value_silent(&self, from: &dyn AnyValue) -> ReturnValue;

    /// Fires `on_changed` with the current value, if anyone subscribed.
    fn notify_changed(&self);
}

impl InterfaceId for dyn PropertyInternal {
    const UID: Uid = Uid::parse("9fc54f3f-0c14-467b-b20f-bf1cd44bdb8f");
    const NAME: &'static str = "IPropertyInternal";
}

struct PropertySlot {
    any: Option<AnyPtr>,
    /// True when the backing container notifies on its own.
    external: bool,
}

/// Default [`Property`] implementation.
pub struct PropertyImpl {
    core: ObjectCore,
    slot: Mutex<PropertySlot>,
    on_changed: OnceLock<FunctionPtr>,
}

impl PropertyImpl {
    /// Class UID of the default property implementation.
    pub const CLASS_UID: Uid = Uid::parse("a66badbf-c750-4580-b035-b5446806d67e");

    pub(crate) fn new() -> Self {
        Self {
            core: ObjectCore::new(),
            slot: Mutex::new(PropertySlot {
                any: None,
                external: false,
            }),
            on_changed: OnceLock::new(),
        }
    }

    /// Creates a fresh property object with no backing container.
    pub fn create() -> PropertyPtr {
        let obj = make_object(Self::new());
        interface_ptr_cast::<dyn Property, _>(&obj).expect("PropertyImpl implements Property")
    }

    fn class_info_impl() -> &'static ClassInfo {
        static INFO: std::sync::LazyLock<ClassInfo> = std::sync::LazyLock::new(|| {
            ClassInfo::new(
                PropertyImpl::CLASS_UID,
                "PropertyImpl",
                vec![
                    InterfaceEntry::with_caster::<dyn Property>(
                        <dyn Property as InterfaceId>::INFO,
                        |o| {
                            o.as_any()
                                .downcast_ref::<PropertyImpl>()
                                .map(|p| p as &dyn Property)
                        },
                    ),
                    InterfaceEntry::with_caster::<dyn PropertyInternal>(
                        <dyn PropertyInternal as InterfaceId>::INFO,
                        |o| {
                            o.as_any()
                                .downcast_ref::<PropertyImpl>()
                                .map(|p| p as &dyn PropertyInternal)
                        },
                    ),
                ],
                vec![],
            )
        });
        &INFO
    }

    fn backing(&self) -> Option<(AnyPtr, bool)> {
        let guard = lock(&self.slot);
        guard.any.clone().map(|any| (any, guard.external))
    }

    /// Fires `on_changed` only when someone has materialised the event.
    fn fire_changed(&self, any: &AnyPtr) {
        if let Some(event) = self.on_changed.get() {
            event.invoke(&[&**any], InvokeMode::Immediate);
        }
    }

    fn queue_deferred_write(&self, clone: AnyPtr) {
        let Some(obj) = self.core.self_ptr() else {
            return;
        };
        let Some(internal) = interface_ptr_cast::<dyn PropertyInternal, _>(&obj) else {
            return;
        };
        instance().queue_deferred_property(DeferredPropertySet {
            property: SharedPtr::downgrade(&internal),
            value: clone,
        });
    }
}

impl fmt::Debug for PropertyImpl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyImpl")
            .field("flags", &self.core.flags())
            .finish_non_exhaustive()
    }
}

impl Interface for PropertyImpl {
    fn class_info(&self) -> &'static ClassInfo {
        Self::class_info_impl()
    }

    fn core(&self) -> &ObjectCore {
        &self.core
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_interface(&self) -> &dyn Interface {
        self
    }

    fn member_cache(&self) -> Option<&MemberCache> {
        None
    }
}

impl crate::object::ObjectClass for PropertyImpl {
    fn class_info_static() -> &'static ClassInfo {
        Self::class_info_impl()
    }

    fn new_instance() -> Self {
        Self::new()
    }
}

impl Property for PropertyImpl {
    fn get_value(&self) -> Option<AnyPtr> {
        lock(&self.slot).any.clone()
    }

    fn set_value(&self, from: &dyn AnyValue, mode: InvokeMode) -> ReturnValue {
        if self.core.flags().contains(ObjectFlags::READ_ONLY) {
            return ReturnValue::ReadOnly;
        }
        let Some((any, external)) = self.backing() else {
            return ReturnValue::Fail;
        };
        match mode {
            InvokeMode::Deferred => {
                let Some(clone) = any.clone_any() else {
                    return ReturnValue::Fail;
                };
                let result = clone.copy_from(from);
                if result == ReturnValue::Success {
                    self.queue_deferred_write(clone);
                }
                result
            }
            InvokeMode::Immediate => {
                let result = any.copy_from(from);
                if result == ReturnValue::Success && !external {
                    self.fire_changed(&any);
                }
                result
            }
        }
    }

    fn set_data(&self, from: &dyn std::any::Any, ty: Uid, mode: InvokeMode) -> ReturnValue {
        if self.core.flags().contains(ObjectFlags::READ_ONLY) {
            return ReturnValue::ReadOnly;
        }
        let Some((any, external)) = self.backing() else {
            return ReturnValue::Fail;
        };
        match mode {
            InvokeMode::Deferred => {
                let Some(clone) = any.clone_any() else {
                    return ReturnValue::Fail;
                };
                let result = clone.set_data(from, ty);
                if result == ReturnValue::Success {
                    self.queue_deferred_write(clone);
                }
                result
            }
            InvokeMode::Immediate => {
                let result = any.set_data(from, ty);
                if result == ReturnValue::Success && !external {
                    self.fire_changed(&any);
                }
                result
            }
        }
    }

    fn on_changed(&self) -> FunctionPtr {
        self.on_changed.get_or_init(FunctionImpl::create).clone()
    }
}

impl PropertyInternal for PropertyImpl {
    fn set_any(&self, any: AnyPtr) -> bool {
        {
            let mut guard = lock(&self.slot);
            if guard.any.is_some() {
                return false;
            }
            guard.external = interface_cast::<dyn ExternalAny, _>(&*any).is_some();
            if guard.external {
                // The external container fires its own change event;
                // relay it into on_changed and skip our explicit fires.
                if let Some(external) = interface_ptr_cast::<dyn ExternalAny, _>(&any) {
                    external.on_data_changed().add_handler(&self.on_changed(), InvokeMode::Immediate);
                }
            }
            guard.any = Some(any);
        }
        if let Some(current) = self.get_value() {
            self.fire_changed(&current);
        }
        true
    }

    fn get_any(&self) -> Option<AnyPtr> {
        lock(&self.slot).any.clone()
    }

    fn set_flags(&self, flags: ObjectFlags) {
        self.core.set_flags(flags);
    }

    fn set_value_silent(&self, from: &dyn AnyValue) -> ReturnValue {
        if self.core.flags().contains(ObjectFlags::READ_ONLY) {
            return ReturnValue::ReadOnly;
        }
        match self.backing() {
            Some((any, _)) => any.copy_from(from),
            None => ReturnValue::Fail,
        }
    }

    fn notify_changed(&self) {
        if let Some((any, _)) = self.backing() {
            self.fire_changed(&any);
        }
    }
}
