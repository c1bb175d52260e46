//! Typed member handles returned by the accessors that
//! [`interface!`](crate::interface!) generates.

use std::fmt;
use std::marker::PhantomData;

use crate::any::{ArrayValue, FnArgs, ValueType};
use crate::function::{Function as _, FunctionPtr};
use crate::interface::{interface_cast, type_uid};
use crate::property::{Property as _, PropertyPtr};
use crate::value::OwnedAny;
use crate::{AnyPtr, InvokeMode, ReturnValue};

/// Read-only typed view of a property member.
pub struct ConstProperty<T: ValueType> {
    property: Option<PropertyPtr>,
    _value: PhantomData<fn() -> T>,
}

impl<T: ValueType> ConstProperty<T> {
    /// Wraps a property instance (or the absence of one).
    pub fn new(property: Option<PropertyPtr>) -> Self {
        Self {
            property,
            _value: PhantomData,
        }
    }

    /// True when the member exists on the object.
    pub fn is_valid(&self) -> bool {
        self.property.is_some()
    }

    /// The underlying property instance.
    pub fn property(&self) -> Option<&PropertyPtr> {
        self.property.as_ref()
    }

    /// The current value, or the type default when unavailable.
    pub fn get_value(&self) -> T {
        self.property
            .as_ref()
            .and_then(|p| p.get_value())
            .and_then(|any| any.value::<T>())
            .unwrap_or_default()
    }

    /// Subscribes `handler` to change notifications.
    pub fn add_on_changed(&self, handler: &FunctionPtr) -> ReturnValue {
        match &self.property {
            Some(p) => p.on_changed().add_handler(handler, InvokeMode::Immediate),
            None => ReturnValue::InvalidArgument,
        }
    }

    /// Unsubscribes `handler` from change notifications.
    pub fn remove_on_changed(&self, handler: &FunctionPtr) -> ReturnValue {
        match &self.property {
            Some(p) => p.on_changed().remove_handler(handler),
            None => ReturnValue::InvalidArgument,
        }
    }
}

impl<T: ValueType> fmt::Debug for ConstProperty<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConstProperty")
            .field("valid", &self.is_valid())
            .finish()
    }
}

/// Mutable typed view of a property member.
pub struct Property<T: ValueType> {
    inner: ConstProperty<T>,
}

impl<T: ValueType> Property<T> {
    /// Wraps a property instance (or the absence of one).
    pub fn new(property: Option<PropertyPtr>) -> Self {
        Self {
            inner: ConstProperty::new(property),
        }
    }

    /// Writes `value` with the given dispatch mode.
    pub fn set_value_with(&self, value: T, mode: InvokeMode) -> ReturnValue {
        match self.inner.property() {
            Some(p) => p.set_data(&value, type_uid::<T>(), mode),
            None => ReturnValue::Fail,
        }
    }

    /// Writes `value` immediately.
    pub fn set_value(&self, value: T) -> ReturnValue {
        self.set_value_with(value, InvokeMode::Immediate)
    }
}

impl<T: ValueType> std::ops::Deref for Property<T> {
    type Target = ConstProperty<T>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl<T: ValueType> fmt::Debug for Property<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Property")
            .field("valid", &self.is_valid())
            .finish()
    }
}

/// Typed view of an array property member.
pub struct ArrayProperty<T: ValueType> {
    property: Option<PropertyPtr>,
    _value: PhantomData<fn() -> T>,
}

impl<T: ValueType> ArrayProperty<T> {
    /// Wraps a property instance (or the absence of one).
    pub fn new(property: Option<PropertyPtr>) -> Self {
        Self {
            property,
            _value: PhantomData,
        }
    }

    /// True when the member exists on the object.
    pub fn is_valid(&self) -> bool {
        self.property.is_some()
    }

    /// The underlying property instance.
    pub fn property(&self) -> Option<&PropertyPtr> {
        self.property.as_ref()
    }

    /// Subscribes `handler` to change notifications.
    pub fn add_on_changed(&self, handler: &FunctionPtr) -> ReturnValue {
        match &self.property {
            Some(p) => p.on_changed().add_handler(handler, InvokeMode::Immediate),
            None => ReturnValue::InvalidArgument,
        }
    }

    fn with_array<R>(&self, f: impl FnOnce(&dyn ArrayValue) -> R) -> Option<R> {
        let any = self.property.as_ref()?.get_value()?;
        let array = interface_cast::<dyn ArrayValue, _>(&*any)?;
        Some(f(array))
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.with_array(|a| a.array_len()).unwrap_or(0)
    }

    /// True when the array is empty or missing.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element `index`, or `None` out of range.
    pub fn get_at(&self, index: usize) -> Option<T> {
        self.with_array(|a| {
            let slot = OwnedAny::<T>::boxed(T::default());
            a.get_at(index, &*slot).succeeded().then(|| slot.value::<T>())
        })
        .flatten()
        .flatten()
    }

    /// Overwrites element `index`.
    pub fn set_at(&self, index: usize, value: T) -> ReturnValue {
        self.with_array(|a| a.set_at(index, &*OwnedAny::<T>::boxed(value)))
            .unwrap_or(ReturnValue::Fail)
    }

    /// Appends `value`.
    pub fn push(&self, value: T) -> ReturnValue {
        self.with_array(|a| a.push(&*OwnedAny::<T>::boxed(value)))
            .unwrap_or(ReturnValue::Fail)
    }

    /// Removes element `index`.
    pub fn erase_at(&self, index: usize) -> ReturnValue {
        self.with_array(|a| a.erase_at(index))
            .unwrap_or(ReturnValue::Fail)
    }

    /// Removes all elements.
    pub fn clear(&self) {
        self.with_array(|a| a.clear());
    }

    /// Snapshot of the whole array.
    pub fn to_vec(&self) -> Vec<T> {
        self.property
            .as_ref()
            .and_then(|p| p.get_value())
            .and_then(|any| any.value::<Vec<T>>())
            .unwrap_or_default()
    }
}

impl<T: ValueType> fmt::Debug for ArrayProperty<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArrayProperty")
            .field("len", &self.len())
            .finish()
    }
}

/// View of an event member.
#[derive(Debug)]
pub struct EventHandle {
    event: Option<FunctionPtr>,
}

impl EventHandle {
    /// Wraps an event instance (or the absence of one).
    pub fn new(event: Option<FunctionPtr>) -> Self {
        Self { event }
    }

    /// True when the member exists on the object.
    pub fn is_valid(&self) -> bool {
        self.event.is_some()
    }

    /// The underlying function instance.
    pub fn function(&self) -> Option<&FunctionPtr> {
        self.event.as_ref()
    }

    /// Registers a handler.
    pub fn add_handler(&self, handler: &FunctionPtr, mode: InvokeMode) -> ReturnValue {
        match &self.event {
            Some(e) => e.add_handler(handler, mode),
            None => ReturnValue::InvalidArgument,
        }
    }

    /// Unregisters a handler.
    pub fn remove_handler(&self, handler: &FunctionPtr) -> ReturnValue {
        match &self.event {
            Some(e) => e.remove_handler(handler),
            None => ReturnValue::InvalidArgument,
        }
    }

    /// Broadcasts to the registered handlers.
    pub fn invoke(&self, args: FnArgs<'_>, mode: InvokeMode) -> ReturnValue {
        match &self.event {
            Some(e) => e.invoke_event(args, mode),
            None => ReturnValue::InvalidArgument,
        }
    }
}

/// View of a function member.
#[derive(Debug)]
pub struct FunctionHandle {
    function: Option<FunctionPtr>,
}

impl FunctionHandle {
    /// Wraps a function instance (or the absence of one).
    pub fn new(function: Option<FunctionPtr>) -> Self {
        Self { function }
    }

    /// True when the member exists on the object.
    pub fn is_valid(&self) -> bool {
        self.function.is_some()
    }

    /// The underlying function instance.
    pub fn function(&self) -> Option<&FunctionPtr> {
        self.function.as_ref()
    }

    /// Invokes the function.
    pub fn invoke(&self, args: FnArgs<'_>, mode: InvokeMode) -> Option<AnyPtr> {
        self.function.as_ref()?.invoke(args, mode)
    }

    /// Invokes the function with no arguments.
    pub fn call(&self) -> Option<AnyPtr> {
        self.invoke(&[], InvokeMode::Immediate)
    }
}
