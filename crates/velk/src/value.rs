//! Built-in value containers: owned values, references into object state,
//! and their array counterparts.

use std::any::Any;
use std::fmt;
use std::sync::Mutex;

use crate::any::{AnyPtr, AnyValue, ArrayValue, ValueType};
use crate::interface::{
    class_info_for, interface_ptr_cast, type_uid, Interface, InterfaceDecl, InterfaceEntry,
    InterfaceId,
};
use crate::memory::WeakPtr;
use crate::object::{make_object, ObjectCore, StateCell};
use crate::util::lock;
use crate::{ClassInfo, ReturnValue, Uid};

/// Compare-then-write into a mutable slot; the shared `Success` /
/// `NothingToDo` rule for every container in this module.
fn write_slot<T: PartialEq + Clone>(slot: &mut T, value: &T) -> ReturnValue {
    if *slot == *value {
        ReturnValue::NothingToDo
    } else {
        *slot = value.clone();
        ReturnValue::Success
    }
}

/// Reads a `T` out of `other` when it is compatible with `ty`.
fn read_other<T: ValueType>(other: &dyn AnyValue, ty: Uid) -> Option<T> {
    if !other.is_compatible_with(ty) {
        return None;
    }
    let mut value = T::default();
    other.get_data(&mut value, ty).succeeded().then_some(value)
}

// --- OwnedAny ---

/// An any that stores its value inline.
///
/// The class UID equals the value's type UID, so the type registry creates
/// owned containers directly from value-type identifiers.
pub struct OwnedAny<T: ValueType> {
    core: ObjectCore,
    types: [Uid; 1],
    value: Mutex<T>,
}

impl<T: ValueType> OwnedAny<T> {
    /// Creates a container holding `value`.
    pub fn new(value: T) -> Self {
        Self {
            core: ObjectCore::new(),
            types: [type_uid::<T>()],
            value: Mutex::new(value),
        }
    }

    /// Creates a shared container holding `value`.
    pub fn boxed(value: T) -> AnyPtr {
        let obj = make_object(Self::new(value));
        interface_ptr_cast::<dyn AnyValue, _>(&obj).expect("OwnedAny implements AnyValue")
    }

    fn build_class_info() -> ClassInfo {
        ClassInfo::new(
            type_uid::<T>(),
            std::any::type_name::<T>(),
            vec![InterfaceEntry::with_caster::<dyn AnyValue>(
                <dyn AnyValue as InterfaceId>::INFO,
                |o| {
                    o.as_any()
                        .downcast_ref::<OwnedAny<T>>()
                        .map(|x| x as &dyn AnyValue)
                },
            )],
            vec![],
        )
    }
}

impl<T: ValueType> fmt::Debug for OwnedAny<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OwnedAny").finish_non_exhaustive()
    }
}

impl<T: ValueType> Interface for OwnedAny<T> {
    fn class_info(&self) -> &'static ClassInfo {
        class_info_for::<OwnedAny<T>>(Self::build_class_info)
    }

    fn core(&self) -> &ObjectCore {
        &self.core
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_interface(&self) -> &dyn Interface {
        self
    }
}

impl<T: ValueType> crate::object::ObjectClass for OwnedAny<T> {
    fn class_info_static() -> &'static ClassInfo {
        class_info_for::<OwnedAny<T>>(Self::build_class_info)
    }

    fn new_instance() -> Self {
        Self::new(T::default())
    }
}

impl<T: ValueType> AnyValue for OwnedAny<T> {
    fn compatible_types(&self) -> &[Uid] {
        &self.types
    }

    fn data_size(&self, ty: Uid) -> usize {
        if ty == self.types[0] {
            std::mem::size_of::<T>()
        } else {
            0
        }
    }

    fn get_data(&self, out: &mut dyn Any, ty: Uid) -> ReturnValue {
        if ty != self.types[0] {
            return ReturnValue::Fail;
        }
        let Some(out) = out.downcast_mut::<T>() else {
            return ReturnValue::Fail;
        };
        *out = lock(&self.value).clone();
        ReturnValue::Success
    }

    fn set_data(&self, from: &dyn Any, ty: Uid) -> ReturnValue {
        if ty != self.types[0] {
            return ReturnValue::Fail;
        }
        let Some(from) = from.downcast_ref::<T>() else {
            return ReturnValue::Fail;
        };
        write_slot(&mut *lock(&self.value), from)
    }

    fn copy_from(&self, other: &dyn AnyValue) -> ReturnValue {
        match read_other::<T>(other, self.types[0]) {
            Some(value) => write_slot(&mut *lock(&self.value), &value),
            None => ReturnValue::Fail,
        }
    }

    fn clone_any(&self) -> Option<AnyPtr> {
        Some(Self::boxed(lock(&self.value).clone()))
    }
}

// --- StateRefAny ---

/// An any that reads and writes a member of an object's inline state.
///
/// Holds a weak owner pointer, the declaring interface's UID, and a
/// projection into the state struct; the target resolves at each access,
/// so a destroyed owner fails the operation instead of dangling. Cloning
/// snapshots into an [`OwnedAny`].
pub struct StateRefAny<I: InterfaceDecl, T: ValueType> {
    core: ObjectCore,
    types: [Uid; 1],
    owner: WeakPtr<dyn Interface>,
    project: fn(&mut I::State) -> &mut T,
}

impl<I: InterfaceDecl, T: ValueType> StateRefAny<I, T> {
    /// Creates a reference container targeting `project` inside `owner`'s
    /// state for interface `I`.
    pub fn new(owner: WeakPtr<dyn Interface>, project: fn(&mut I::State) -> &mut T) -> Self {
        Self {
            core: ObjectCore::new(),
            types: [type_uid::<T>()],
            owner,
            project,
        }
    }

    /// Creates a shared reference container.
    pub fn boxed(owner: WeakPtr<dyn Interface>, project: fn(&mut I::State) -> &mut T) -> AnyPtr {
        let obj = make_object(Self::new(owner, project));
        interface_ptr_cast::<dyn AnyValue, _>(&obj).expect("StateRefAny implements AnyValue")
    }

    fn with_target<R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        // The locked self pointer keeps the owner (and its state cell)
        // alive for the duration of the access.
        let owner = self.owner.lock()?;
        let slot = owner.property_state(I::UID)?;
        let cell = slot.as_any().downcast_ref::<StateCell<I::State>>()?;
        Some(cell.with(|state| f((self.project)(state))))
    }

    fn build_class_info() -> ClassInfo {
        ClassInfo::new(
            Uid::from_name(std::any::type_name::<Self>()),
            std::any::type_name::<Self>(),
            vec![InterfaceEntry::with_caster::<dyn AnyValue>(
                <dyn AnyValue as InterfaceId>::INFO,
                |o| {
                    o.as_any()
                        .downcast_ref::<StateRefAny<I, T>>()
                        .map(|x| x as &dyn AnyValue)
                },
            )],
            vec![],
        )
    }
}

impl<I: InterfaceDecl, T: ValueType> fmt::Debug for StateRefAny<I, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateRefAny").finish_non_exhaustive()
    }
}

impl<I: InterfaceDecl, T: ValueType> Interface for StateRefAny<I, T> {
    fn class_info(&self) -> &'static ClassInfo {
        class_info_for::<StateRefAny<I, T>>(Self::build_class_info)
    }

    fn core(&self) -> &ObjectCore {
        &self.core
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_interface(&self) -> &dyn Interface {
        self
    }
}

impl<I: InterfaceDecl, T: ValueType> AnyValue for StateRefAny<I, T> {
    fn compatible_types(&self) -> &[Uid] {
        &self.types
    }

    fn data_size(&self, ty: Uid) -> usize {
        if ty == self.types[0] {
            std::mem::size_of::<T>()
        } else {
            0
        }
    }

    fn get_data(&self, out: &mut dyn Any, ty: Uid) -> ReturnValue {
        if ty != self.types[0] {
            return ReturnValue::Fail;
        }
        let Some(out) = out.downcast_mut::<T>() else {
            return ReturnValue::Fail;
        };
        match self.with_target(|slot| slot.clone()) {
            Some(value) => {
                *out = value;
                ReturnValue::Success
            }
            None => ReturnValue::Fail,
        }
    }

    fn set_data(&self, from: &dyn Any, ty: Uid) -> ReturnValue {
        if ty != self.types[0] {
            return ReturnValue::Fail;
        }
        let Some(from) = from.downcast_ref::<T>() else {
            return ReturnValue::Fail;
        };
        self.with_target(|slot| write_slot(slot, from))
            .unwrap_or(ReturnValue::Fail)
    }

    fn copy_from(&self, other: &dyn AnyValue) -> ReturnValue {
        match read_other::<T>(other, self.types[0]) {
            Some(value) => self
                .with_target(|slot| write_slot(slot, &value))
                .unwrap_or(ReturnValue::Fail),
            None => ReturnValue::Fail,
        }
    }

    fn clone_any(&self) -> Option<AnyPtr> {
        let value = self.with_target(|slot| slot.clone())?;
        Some(OwnedAny::boxed(value))
    }
}

// --- Array containers ---

/// Shared element-level operations over a locked `Vec<T>`.
fn array_get_at<T: ValueType>(items: &[T], index: usize, out: &dyn AnyValue) -> ReturnValue {
    match items.get(index) {
        Some(item) => out.set_value(item),
        None => ReturnValue::InvalidArgument,
    }
}

fn array_set_at<T: ValueType>(items: &mut [T], index: usize, value: &dyn AnyValue) -> ReturnValue {
    let Some(slot) = items.get_mut(index) else {
        return ReturnValue::InvalidArgument;
    };
    match value.value::<T>() {
        Some(v) => {
            *slot = v;
            ReturnValue::Success
        }
        None => ReturnValue::InvalidArgument,
    }
}

fn array_push<T: ValueType>(items: &mut Vec<T>, value: &dyn AnyValue) -> ReturnValue {
    match value.value::<T>() {
        Some(v) => {
            items.push(v);
            ReturnValue::Success
        }
        None => ReturnValue::InvalidArgument,
    }
}

fn array_erase_at<T>(items: &mut Vec<T>, index: usize) -> ReturnValue {
    if index >= items.len() {
        return ReturnValue::InvalidArgument;
    }
    items.remove(index);
    ReturnValue::Success
}

/// An any that owns a dynamic array of `T` and exposes element-level
/// access through [`ArrayValue`].
pub struct ArrayAnyValue<T: ValueType> {
    core: ObjectCore,
    types: [Uid; 1],
    items: Mutex<Vec<T>>,
}

impl<T: ValueType> ArrayAnyValue<T> {
    /// Creates a container holding `items`.
    pub fn new(items: Vec<T>) -> Self {
        Self {
            core: ObjectCore::new(),
            types: [type_uid::<Vec<T>>()],
            items: Mutex::new(items),
        }
    }

    /// Creates a shared container holding `items`.
    pub fn boxed(items: Vec<T>) -> AnyPtr {
        let obj = make_object(Self::new(items));
        interface_ptr_cast::<dyn AnyValue, _>(&obj).expect("ArrayAnyValue implements AnyValue")
    }

    fn build_class_info() -> ClassInfo {
        ClassInfo::new(
            type_uid::<Vec<T>>(),
            std::any::type_name::<Vec<T>>(),
            vec![
                InterfaceEntry::with_caster::<dyn AnyValue>(
                    <dyn AnyValue as InterfaceId>::INFO,
                    |o| {
                        o.as_any()
                            .downcast_ref::<ArrayAnyValue<T>>()
                            .map(|x| x as &dyn AnyValue)
                    },
                ),
                InterfaceEntry::with_caster::<dyn ArrayValue>(
                    <dyn ArrayValue as InterfaceId>::INFO,
                    |o| {
                        o.as_any()
                            .downcast_ref::<ArrayAnyValue<T>>()
                            .map(|x| x as &dyn ArrayValue)
                    },
                ),
            ],
            vec![],
        )
    }
}

impl<T: ValueType> fmt::Debug for ArrayAnyValue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArrayAnyValue")
            .field("len", &self.array_len())
            .finish_non_exhaustive()
    }
}

impl<T: ValueType> Interface for ArrayAnyValue<T> {
    fn class_info(&self) -> &'static ClassInfo {
        class_info_for::<ArrayAnyValue<T>>(Self::build_class_info)
    }

    fn core(&self) -> &ObjectCore {
        &self.core
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_interface(&self) -> &dyn Interface {
        self
    }
}

impl<T: ValueType> crate::object::ObjectClass for ArrayAnyValue<T> {
    fn class_info_static() -> &'static ClassInfo {
        class_info_for::<ArrayAnyValue<T>>(Self::build_class_info)
    }

    fn new_instance() -> Self {
        Self::new(Vec::new())
    }
}

impl<T: ValueType> AnyValue for ArrayAnyValue<T> {
    fn compatible_types(&self) -> &[Uid] {
        &self.types
    }

    fn data_size(&self, ty: Uid) -> usize {
        if ty == self.types[0] {
            std::mem::size_of::<Vec<T>>()
        } else {
            0
        }
    }

    fn get_data(&self, out: &mut dyn Any, ty: Uid) -> ReturnValue {
        if ty != self.types[0] {
            return ReturnValue::Fail;
        }
        let Some(out) = out.downcast_mut::<Vec<T>>() else {
            return ReturnValue::Fail;
        };
        *out = lock(&self.items).clone();
        ReturnValue::Success
    }

    fn set_data(&self, from: &dyn Any, ty: Uid) -> ReturnValue {
        if ty != self.types[0] {
            return ReturnValue::Fail;
        }
        let Some(from) = from.downcast_ref::<Vec<T>>() else {
            return ReturnValue::Fail;
        };
        write_slot(&mut *lock(&self.items), from)
    }

    fn copy_from(&self, other: &dyn AnyValue) -> ReturnValue {
        match read_other::<Vec<T>>(other, self.types[0]) {
            Some(items) => write_slot(&mut *lock(&self.items), &items),
            None => ReturnValue::Fail,
        }
    }

    fn clone_any(&self) -> Option<AnyPtr> {
        Some(Self::boxed(lock(&self.items).clone()))
    }
}

impl<T: ValueType> ArrayValue for ArrayAnyValue<T> {
    fn array_len(&self) -> usize {
        lock(&self.items).len()
    }

    fn get_at(&self, index: usize, out: &dyn AnyValue) -> ReturnValue {
        array_get_at(&*lock(&self.items), index, out)
    }

    fn set_at(&self, index: usize, value: &dyn AnyValue) -> ReturnValue {
        array_set_at(&mut *lock(&self.items), index, value)
    }

    fn push(&self, value: &dyn AnyValue) -> ReturnValue {
        array_push(&mut *lock(&self.items), value)
    }

    fn erase_at(&self, index: usize) -> ReturnValue {
        array_erase_at(&mut *lock(&self.items), index)
    }

    fn clear(&self) {
        lock(&self.items).clear();
    }

    fn set_from_buffer(&self, data: &dyn Any, element_ty: Uid) -> ReturnValue {
        if element_ty != type_uid::<T>() {
            return ReturnValue::InvalidArgument;
        }
        let Some(items) = data.downcast_ref::<Vec<T>>() else {
            return ReturnValue::InvalidArgument;
        };
        *lock(&self.items) = items.clone();
        ReturnValue::Success
    }

    fn element_type(&self) -> Uid {
        type_uid::<T>()
    }
}

/// An any that reads and writes a `Vec<T>` member of an object's inline
/// state, with element-level access through [`ArrayValue`].
pub struct ArrayStateRefAny<I: InterfaceDecl, T: ValueType> {
    core: ObjectCore,
    types: [Uid; 1],
    owner: WeakPtr<dyn Interface>,
    project: fn(&mut I::State) -> &mut Vec<T>,
}

impl<I: InterfaceDecl, T: ValueType> ArrayStateRefAny<I, T> {
    /// Creates a reference container targeting a `Vec<T>` state member.
    pub fn new(owner: WeakPtr<dyn Interface>, project: fn(&mut I::State) -> &mut Vec<T>) -> Self {
        Self {
            core: ObjectCore::new(),
            types: [type_uid::<Vec<T>>()],
            owner,
            project,
        }
    }

    /// Creates a shared reference container.
    pub fn boxed(
        owner: WeakPtr<dyn Interface>,
        project: fn(&mut I::State) -> &mut Vec<T>,
    ) -> AnyPtr {
        let obj = make_object(Self::new(owner, project));
        interface_ptr_cast::<dyn AnyValue, _>(&obj).expect("ArrayStateRefAny implements AnyValue")
    }

    fn with_target<R>(&self, f: impl FnOnce(&mut Vec<T>) -> R) -> Option<R> {
        let owner = self.owner.lock()?;
        let slot = owner.property_state(I::UID)?;
        let cell = slot.as_any().downcast_ref::<StateCell<I::State>>()?;
        Some(cell.with(|state| f((self.project)(state))))
    }

    fn build_class_info() -> ClassInfo {
        ClassInfo::new(
            Uid::from_name(std::any::type_name::<Self>()),
            std::any::type_name::<Self>(),
            vec![
                InterfaceEntry::with_caster::<dyn AnyValue>(
                    <dyn AnyValue as InterfaceId>::INFO,
                    |o| {
                        o.as_any()
                            .downcast_ref::<ArrayStateRefAny<I, T>>()
                            .map(|x| x as &dyn AnyValue)
                    },
                ),
                InterfaceEntry::with_caster::<dyn ArrayValue>(
                    <dyn ArrayValue as InterfaceId>::INFO,
                    |o| {
                        o.as_any()
                            .downcast_ref::<ArrayStateRefAny<I, T>>()
                            .map(|x| x as &dyn ArrayValue)
                    },
                ),
            ],
            vec![],
        )
    }
}

impl<I: InterfaceDecl, T: ValueType> fmt::Debug for ArrayStateRefAny<I, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArrayStateRefAny").finish_non_exhaustive()
    }
}

impl<I: InterfaceDecl, T: ValueType> Interface for ArrayStateRefAny<I, T> {
    fn class_info(&self) -> &'static ClassInfo {
        class_info_for::<ArrayStateRefAny<I, T>>(Self::build_class_info)
    }

    fn core(&self) -> &ObjectCore {
        &self.core
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_interface(&self) -> &dyn Interface {
        self
    }
}

impl<I: InterfaceDecl, T: ValueType> AnyValue for ArrayStateRefAny<I, T> {
    fn compatible_types(&self) -> &[Uid] {
        &self.types
    }

    fn data_size(&self, ty: Uid) -> usize {
        if ty == self.types[0] {
            std::mem::size_of::<Vec<T>>()
        } else {
            0
        }
    }

    fn get_data(&self, out: &mut dyn Any, ty: Uid) -> ReturnValue {
        if ty != self.types[0] {
            return ReturnValue::Fail;
        }
        let Some(out) = out.downcast_mut::<Vec<T>>() else {
            return ReturnValue::Fail;
        };
        match self.with_target(|items| items.clone()) {
            Some(items) => {
                *out = items;
                ReturnValue::Success
            }
            None => ReturnValue::Fail,
        }
    }

    fn set_data(&self, from: &dyn Any, ty: Uid) -> ReturnValue {
        if ty != self.types[0] {
            return ReturnValue::Fail;
        }
        let Some(from) = from.downcast_ref::<Vec<T>>() else {
            return ReturnValue::Fail;
        };
        self.with_target(|items| write_slot(items, from))
            .unwrap_or(ReturnValue::Fail)
    }

    fn copy_from(&self, other: &dyn AnyValue) -> ReturnValue {
        match read_other::<Vec<T>>(other, self.types[0]) {
            Some(items) => self
                .with_target(|slot| write_slot(slot, &items))
                .unwrap_or(ReturnValue::Fail),
            None => ReturnValue::Fail,
        }
    }

    fn clone_any(&self) -> Option<AnyPtr> {
        let items = self.with_target(|items| items.clone())?;
        Some(ArrayAnyValue::boxed(items))
    }
}

impl<I: InterfaceDecl, T: ValueType> ArrayValue for ArrayStateRefAny<I, T> {
    fn array_len(&self) -> usize {
        self.with_target(|items| items.len()).unwrap_or(0)
    }

    fn get_at(&self, index: usize, out: &dyn AnyValue) -> ReturnValue {
        self.with_target(|items| array_get_at(items, index, out))
            .unwrap_or(ReturnValue::Fail)
    }

    fn set_at(&self, index: usize, value: &dyn AnyValue) -> ReturnValue {
        self.with_target(|items| array_set_at(items, index, value))
            .unwrap_or(ReturnValue::Fail)
    }

    fn push(&self, value: &dyn AnyValue) -> ReturnValue {
        self.with_target(|items| array_push(items, value))
            .unwrap_or(ReturnValue::Fail)
    }

    fn erase_at(&self, index: usize) -> ReturnValue {
        self.with_target(|items| array_erase_at(items, index))
            .unwrap_or(ReturnValue::Fail)
    }

    fn clear(&self) {
        self.with_target(|items| items.clear());
    }

    fn set_from_buffer(&self, data: &dyn Any, element_ty: Uid) -> ReturnValue {
        if element_ty != type_uid::<T>() {
            return ReturnValue::InvalidArgument;
        }
        let Some(items) = data.downcast_ref::<Vec<T>>() else {
            return ReturnValue::InvalidArgument;
        };
        self.with_target(|slot| {
            *slot = items.clone();
            ReturnValue::Success
        })
        .unwrap_or(ReturnValue::Fail)
    }

    fn element_type(&self) -> Uid {
        type_uid::<T>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::any::ArrayValue as _;

    #[test]
    fn owned_any_set_reports_change() {
        let any = OwnedAny::new(1.0_f32);
        assert_eq!(any.set_data(&2.0_f32, type_uid::<f32>()), ReturnValue::Success);
        assert_eq!(
            any.set_data(&2.0_f32, type_uid::<f32>()),
            ReturnValue::NothingToDo
        );
        assert_eq!(any.set_data(&2.0_f64, type_uid::<f64>()), ReturnValue::Fail);
    }

    #[test]
    fn owned_any_round_trips_through_clone() {
        let any = OwnedAny::<String>::boxed("hive".to_owned());
        let clone = any.clone_any().unwrap();
        assert_eq!(clone.value::<String>().unwrap(), "hive");
        // The clone is an independent snapshot.
        clone.set_value(&"other".to_owned());
        assert_eq!(any.value::<String>().unwrap(), "hive");
    }

    #[test]
    fn array_any_element_ops() {
        let array = ArrayAnyValue::new(vec![1_i32, 2, 3]);
        assert_eq!(array.array_len(), 3);
        assert_eq!(array.erase_at(1), ReturnValue::Success);
        assert_eq!(array.erase_at(7), ReturnValue::InvalidArgument);
        let probe = OwnedAny::<i32>::boxed(0);
        assert_eq!(array.get_at(1, &*probe), ReturnValue::Success);
        assert_eq!(probe.value::<i32>().unwrap(), 3);
        assert_eq!(array.get_at(2, &*probe), ReturnValue::InvalidArgument);
        array.clear();
        assert_eq!(array.array_len(), 0);
        assert_eq!(array.erase_at(0), ReturnValue::InvalidArgument);
    }

    #[test]
    fn copy_between_compatible_containers() {
        let a = OwnedAny::<u32>::boxed(5);
        let b = OwnedAny::<u32>::boxed(9);
        assert_eq!(a.copy_from(&*b), ReturnValue::Success);
        assert_eq!(a.value::<u32>().unwrap(), 9);
        let c = OwnedAny::<String>::boxed(String::new());
        assert_eq!(a.copy_from(&*c), ReturnValue::Fail);
    }
}
