//! Type-erased value containers: the [`AnyValue`] contract, the array and
//! external extensions, and typed access helpers.

use std::any::Any;

use crate::function::FunctionPtr;
use crate::interface::{type_uid, Interface, InterfaceId};
use crate::memory::SharedPtr;
use crate::{ReturnValue, Uid};

/// Shared pointer to a type-erased value.
pub type AnyPtr = SharedPtr<dyn AnyValue>;

/// Borrowed argument pack passed to function invocations and handlers.
pub type FnArgs<'a> = &'a [&'a dyn AnyValue];

/// Value types storable in any containers and property state.
pub trait ValueType: Any + Clone + PartialEq + Default + Send + Sync {}

impl<T: Any + Clone + PartialEq + Default + Send + Sync> ValueType for T {}

/// Type-erased value container.
///
/// A container is compatible with one or more type UIDs; data moves in and
/// out through [`std::any::Any`] slots checked against those UIDs. Writes
/// compare first: [`ReturnValue::Success`] means the stored value changed,
/// [`ReturnValue::NothingToDo`] means the new value compared equal.
pub trait AnyValue: Interface {
    /// Types this container can read and write.
    fn compatible_types(&self) -> &[Uid];

    /// Size in bytes of the value for `ty`, or 0 when incompatible.
    fn data_size(&self, ty: Uid) -> usize;

    /// Copies the stored value into `out`, which must hold the `ty`-typed
    /// value slot.
    fn get_data(&self, out: &mut dyn Any, ty: Uid) -> ReturnValue;

    /// Stores the `ty`-typed value behind `from`.
    fn set_data(&self, from: &dyn Any, ty: Uid) -> ReturnValue;

    /// Copies the content of `other` into this container. Fails unless the
    /// two share a compatible type.
    fn copy_from(&self, other: &dyn AnyValue) -> ReturnValue;

    /// Creates an owned container of the same value. Reference containers
    /// snapshot the referenced data.
    fn clone_any(&self) -> Option<AnyPtr>;
}

impl InterfaceId for dyn AnyValue {
    const UID: Uid = Uid::parse("27b09a53-ff29-41a5-b58a-f4bb6eec4ba6");
    const NAME: &'static str = "IAny";
}

impl dyn AnyValue {
    /// Typed read: the stored value, or `None` on type mismatch.
    pub fn value<T: ValueType>(&self) -> Option<T> {
        let mut out = T::default();
        if self.get_data(&mut out, type_uid::<T>()).succeeded() {
            Some(out)
        } else {
            None
        }
    }

    /// Typed write.
    pub fn set_value<T: ValueType>(&self, value: &T) -> ReturnValue {
        self.set_data(value, type_uid::<T>())
    }

    /// True if this container is compatible with `ty`.
    pub fn is_compatible_with(&self, ty: Uid) -> bool {
        self.compatible_types().contains(&ty)
    }
}

/// Extracts a typed trampoline argument, substituting the default value
/// for missing or mismatched arguments.
pub fn extract_arg<T: ValueType>(arg: Option<&dyn AnyValue>) -> T {
    arg.and_then(|a| a.value::<T>()).unwrap_or_default()
}

/// Returns the first type UID both containers are compatible with.
pub fn compatible_type(a: &dyn AnyValue, b: &dyn AnyValue) -> Option<Uid> {
    a.compatible_types()
        .iter()
        .copied()
        .find(|ty| b.is_compatible_with(*ty))
}

/// True if the two containers share at least one compatible type.
pub fn is_compatible(a: &dyn AnyValue, b: &dyn AnyValue) -> bool {
    compatible_type(a, b).is_some()
}

/// Element-level access for containers holding a dynamic array.
///
/// Indices out of range answer [`ReturnValue::InvalidArgument`].
pub trait ArrayValue: AnyValue {
    /// Number of elements.
    fn array_len(&self) -> usize;

    /// Copies element `index` into `out`.
    fn get_at(&self, index: usize, out: &dyn AnyValue) -> ReturnValue;

    /// Overwrites element `index` from `value`.
    fn set_at(&self, index: usize, value: &dyn AnyValue) -> ReturnValue;

    /// Appends an element from `value`.
    fn push(&self, value: &dyn AnyValue) -> ReturnValue;

    /// Removes element `index`.
    fn erase_at(&self, index: usize) -> ReturnValue;

    /// Removes all elements.
    fn clear(&self);

    /// Replaces the whole array from a `Vec` of the element type behind
    /// `data`.
    fn set_from_buffer(&self, data: &dyn Any, element_ty: Uid) -> ReturnValue;

    /// UID of the element type.
    fn element_type(&self) -> Uid;
}

impl InterfaceId for dyn ArrayValue {
    const UID: Uid = Uid::parse("0a1e9251-4c77-4ec7-9260-1cc26db10f2f");
    const NAME: &'static str = "IArrayAny";
}

impl dyn ArrayValue {
    /// Typed element read.
    pub fn element<T: ValueType>(&self, index: usize) -> Option<T> {
        let slot = crate::value::OwnedAny::<T>::boxed(T::default());
        if self.get_at(index, &*slot).succeeded() {
            slot.value::<T>()
        } else {
            None
        }
    }
}

/// A user-provided value source that emits its own change notification.
///
/// A property backed by an external any relays `on_data_changed` into its
/// own `on_changed` and does not duplicate the notification on direct
/// writes.
pub trait ExternalAny: AnyValue {
    /// Event fired by the container when its data changes.
    fn on_data_changed(&self) -> FunctionPtr;
}

impl InterfaceId for dyn ExternalAny {
    const UID: Uid = Uid::parse("5d1e3b0a-9c46-44f7-8c36-7a22c79a4f11");
    const NAME: &'static str = "IExternalAny";
}
