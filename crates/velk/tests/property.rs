//! Property runtime: change notification, read-only enforcement, deferred
//! writes with coalescing, and external value sources.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use velk::api::Callback;
use velk::{
    instance, interface_cast, type_uid, AnyPtr, AnyValue, Function, FunctionImpl, FunctionPtr,
    Interface, InvokeMode, ObjectFlags, Property, PropertyInternal, ReturnValue,
};

/// Serialises the tests that drive the shared deferred queues.
fn update_lock() -> std::sync::MutexGuard<'static, ()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

fn float_property(initial: f32) -> velk::PropertyPtr {
    instance()
        .create_property(
            type_uid::<f32>(),
            Some(velk::OwnedAny::<f32>::boxed(initial)),
            ObjectFlags::empty(),
        )
        .unwrap()
}

/// Records every value delivered to `on_changed`.
fn tracing_handler() -> (Callback, Arc<Mutex<Vec<f32>>>) {
    let trace = Arc::new(Mutex::new(Vec::new()));
    let callback = Callback::new({
        let trace = trace.clone();
        move |args| {
            if let Some(value) = args.first().and_then(|a| a.value::<f32>()) {
                trace.lock().unwrap().push(value);
            }
            None
        }
    });
    (callback, trace)
}

#[test]
fn set_and_notify_once_per_change() {
    let property = float_property(0.0);
    let (callback, trace) = tracing_handler();
    property
        .on_changed()
        .add_handler(callback.function(), InvokeMode::Immediate);

    let value = velk::OwnedAny::<f32>::boxed(1.0);
    assert_eq!(
        property.set_value(&*value, InvokeMode::Immediate),
        ReturnValue::Success
    );
    // Equal value: no change, no notification.
    assert_eq!(
        property.set_value(&*value, InvokeMode::Immediate),
        ReturnValue::NothingToDo
    );
    assert_eq!(*trace.lock().unwrap(), vec![1.0]);
    assert_eq!(
        property.get_value().unwrap().value::<f32>().unwrap(),
        1.0
    );
}

#[test]
fn type_mismatch_fails() {
    let property = float_property(1.0);
    let wrong = velk::OwnedAny::<String>::boxed("nope".to_owned());
    assert_eq!(
        property.set_value(&*wrong, InvokeMode::Immediate),
        ReturnValue::Fail
    );
    assert_eq!(property.set_data(&3_i32, type_uid::<i32>(), InvokeMode::Immediate), ReturnValue::Fail);
}

#[test]
fn read_only_rejects_writes() {
    let property = instance()
        .create_property(
            type_uid::<f32>(),
            Some(velk::OwnedAny::<f32>::boxed(9.0)),
            ObjectFlags::READ_ONLY,
        )
        .unwrap();
    let value = velk::OwnedAny::<f32>::boxed(1.0);
    assert_eq!(
        property.set_value(&*value, InvokeMode::Immediate),
        ReturnValue::ReadOnly
    );
    assert_eq!(
        property.set_value(&*value, InvokeMode::Deferred),
        ReturnValue::ReadOnly
    );
    assert_eq!(property.get_value().unwrap().value::<f32>().unwrap(), 9.0);
}

#[test]
fn deferred_write_applies_on_update() {
    let _serial = update_lock();
    let property = float_property(0.0);
    let (callback, trace) = tracing_handler();
    property
        .on_changed()
        .add_handler(callback.function(), InvokeMode::Immediate);

    let value = velk::OwnedAny::<f32>::boxed(2.5);
    assert_eq!(
        property.set_value(&*value, InvokeMode::Deferred),
        ReturnValue::Success
    );
    // Not applied yet.
    assert_eq!(property.get_value().unwrap().value::<f32>().unwrap(), 0.0);
    assert!(trace.lock().unwrap().is_empty());

    instance().update(None);
    assert_eq!(property.get_value().unwrap().value::<f32>().unwrap(), 2.5);
    assert_eq!(*trace.lock().unwrap(), vec![2.5]);
}

#[test]
fn deferred_writes_coalesce_last_wins() {
    let _serial = update_lock();
    let property = float_property(0.0);
    let (callback, trace) = tracing_handler();
    property
        .on_changed()
        .add_handler(callback.function(), InvokeMode::Immediate);

    for value in [1.0_f32, 2.0, 3.0] {
        let any = velk::OwnedAny::<f32>::boxed(value);
        property.set_value(&*any, InvokeMode::Deferred);
    }
    instance().update(None);

    // Three queued writes collapse into the last value with one fire.
    assert_eq!(property.get_value().unwrap().value::<f32>().unwrap(), 3.0);
    assert_eq!(*trace.lock().unwrap(), vec![3.0]);
}

#[test]
fn deferred_write_to_dead_property_is_skipped() {
    let _serial = update_lock();
    let property = float_property(0.0);
    let value = velk::OwnedAny::<f32>::boxed(4.0);
    property.set_value(&*value, InvokeMode::Deferred);
    drop(property);
    // The queued write holds only a weak reference; the tick must not
    // crash or resurrect the property.
    instance().update(None);
}

#[test]
fn properties_coalesce_independently() {
    let _serial = update_lock();
    let first = float_property(0.0);
    let second = float_property(0.0);
    let a = velk::OwnedAny::<f32>::boxed(1.0);
    let b = velk::OwnedAny::<f32>::boxed(2.0);
    first.set_value(&*a, InvokeMode::Deferred);
    second.set_value(&*b, InvokeMode::Deferred);
    instance().update(None);
    assert_eq!(first.get_value().unwrap().value::<f32>().unwrap(), 1.0);
    assert_eq!(second.get_value().unwrap().value::<f32>().unwrap(), 2.0);
}

#[test]
fn property_writes_flush_before_deferred_tasks() {
    let _serial = update_lock();
    let property = float_property(0.0);
    let value = velk::OwnedAny::<f32>::boxed(8.0);
    property.set_value(&*value, InvokeMode::Deferred);

    // A deferred task queued after the property write still observes the
    // post-flush value: property writes are applied first within a tick.
    let observed = Arc::new(Mutex::new(None::<f32>));
    let task = Callback::new({
        let observed = observed.clone();
        let property = property.clone();
        move |_| {
            *observed.lock().unwrap() =
                property.get_value().and_then(|any| any.value::<f32>());
            None
        }
    });
    task.function().invoke(&[], InvokeMode::Deferred);

    instance().update(None);
    assert_eq!(observed.lock().unwrap().unwrap(), 8.0);
}

// --- External value sources ---

velk::object_class! {
    /// Any-like object owning a counter value and its own change event.
    pub class ExternalCounter {
        implements: [],
        traits: [velk::AnyValue, velk::ExternalAny],
        fields: {
            value: std::sync::Mutex<i32> = std::sync::Mutex::new(0),
            changed: std::sync::OnceLock<FunctionPtr> = std::sync::OnceLock::new(),
        },
    }
}

impl ExternalCounter {
    fn event(&self) -> FunctionPtr {
        self.changed.get_or_init(FunctionImpl::create).clone()
    }
}

impl AnyValue for ExternalCounter {
    fn compatible_types(&self) -> &[velk::Uid] {
        static TYPES: OnceLock<[velk::Uid; 1]> = OnceLock::new();
        TYPES.get_or_init(|| [type_uid::<i32>()])
    }

    fn data_size(&self, ty: velk::Uid) -> usize {
        if ty == type_uid::<i32>() {
            std::mem::size_of::<i32>()
        } else {
            0
        }
    }

    fn get_data(&self, out: &mut dyn std::any::Any, ty: velk::Uid) -> ReturnValue {
        if ty != type_uid::<i32>() {
            return ReturnValue::Fail;
        }
        let Some(out) = out.downcast_mut::<i32>() else {
            return ReturnValue::Fail;
        };
        *out = *self.value.lock().unwrap();
        ReturnValue::Success
    }

    fn set_data(&self, from: &dyn std::any::Any, ty: velk::Uid) -> ReturnValue {
        if ty != type_uid::<i32>() {
            return ReturnValue::Fail;
        }
        let Some(from) = from.downcast_ref::<i32>() else {
            return ReturnValue::Fail;
        };
        {
            let mut value = self.value.lock().unwrap();
            if *value == *from {
                return ReturnValue::NothingToDo;
            }
            *value = *from;
        }
        // External sources notify on their own.
        self.event().invoke(&[], InvokeMode::Immediate);
        ReturnValue::Success
    }

    fn copy_from(&self, other: &dyn AnyValue) -> ReturnValue {
        match other.value::<i32>() {
            Some(value) => self.set_data(&value, type_uid::<i32>()),
            None => ReturnValue::Fail,
        }
    }

    fn clone_any(&self) -> Option<AnyPtr> {
        Some(velk::OwnedAny::<i32>::boxed(*self.value.lock().unwrap()))
    }
}

impl velk::ExternalAny for ExternalCounter {
    fn on_data_changed(&self) -> FunctionPtr {
        self.event()
    }
}

#[test]
fn external_any_relays_change_notification_once() {
    let obj = ExternalCounter::create();
    let any = velk::interface_ptr_cast::<dyn AnyValue, _>(&obj).unwrap();

    let property = velk::PropertyImpl::create();
    let internal = interface_cast::<dyn PropertyInternal, _>(&*property).unwrap();
    assert!(internal.set_any(any.clone()));

    let hits = Arc::new(AtomicU32::new(0));
    let callback = Callback::new({
        let hits = hits.clone();
        move |_| {
            hits.fetch_add(1, Ordering::SeqCst);
            None
        }
    });
    property
        .on_changed()
        .add_handler(callback.function(), InvokeMode::Immediate);

    // A direct write must produce exactly one notification, relayed from
    // the external source rather than duplicated by the property.
    let value = velk::OwnedAny::<i32>::boxed(5);
    assert_eq!(
        property.set_value(&*value, InvokeMode::Immediate),
        ReturnValue::Success
    );
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(property.get_value().unwrap().value::<i32>().unwrap(), 5);
}

#[test]
fn set_any_allows_only_one_backing() {
    let property = velk::PropertyImpl::create();
    let internal = interface_cast::<dyn PropertyInternal, _>(&*property).unwrap();
    assert!(internal.set_any(velk::OwnedAny::<i32>::boxed(1)));
    assert!(!internal.set_any(velk::OwnedAny::<i32>::boxed(2)));
    assert_eq!(internal.get_any().unwrap().value::<i32>().unwrap(), 1);
}
