//! Function/event dispatch: handler partitioning, duplicate and removal
//! rules, deferred handlers, and deferred whole-call invocation.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use velk::api::Callback;
use velk::{
    instance, interface_cast, Function, FunctionImpl, FunctionInternal, InvokeMode, ReturnValue,
};

fn update_lock() -> std::sync::MutexGuard<'static, ()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

fn counting_callback() -> (Callback, Arc<AtomicU32>) {
    let hits = Arc::new(AtomicU32::new(0));
    let callback = Callback::new({
        let hits = hits.clone();
        move |_| {
            hits.fetch_add(1, Ordering::SeqCst);
            None
        }
    });
    (callback, hits)
}

#[test]
fn raw_callback_target_returns_result() {
    fn double(args: velk::FnArgs<'_>) -> Option<velk::AnyPtr> {
        let value = velk::extract_arg::<i64>(args.first().copied());
        Some(velk::OwnedAny::<i64>::boxed(value * 2))
    }
    let function = instance().create_callback(double);
    let arg = velk::OwnedAny::<i64>::boxed(21);
    let result = function.invoke(&[&*arg], InvokeMode::Immediate).unwrap();
    assert_eq!(result.value::<i64>().unwrap(), 42);
}

#[test]
fn owned_callback_carries_captured_state() {
    let total = Arc::new(AtomicU32::new(0));
    let function = instance().create_owned_callback({
        let total = total.clone();
        move |_| {
            total.fetch_add(5, Ordering::SeqCst);
            None
        }
    });
    function.invoke(&[], InvokeMode::Immediate);
    function.invoke(&[], InvokeMode::Immediate);
    assert_eq!(total.load(Ordering::SeqCst), 10);
}

#[test]
fn duplicate_handlers_rejected() {
    let event = FunctionImpl::create();
    let (callback, _) = counting_callback();
    assert_eq!(
        event.add_handler(callback.function(), InvokeMode::Immediate),
        ReturnValue::Success
    );
    assert_eq!(
        event.add_handler(callback.function(), InvokeMode::Immediate),
        ReturnValue::NothingToDo
    );
    assert_eq!(
        event.add_handler(callback.function(), InvokeMode::Deferred),
        ReturnValue::NothingToDo
    );
    assert!(event.has_handlers());
}

#[test]
fn add_then_remove_restores_prior_state() {
    let event = FunctionImpl::create();
    assert!(!event.has_handlers());
    let (callback, hits) = counting_callback();
    event.add_handler(callback.function(), InvokeMode::Immediate);
    assert_eq!(event.remove_handler(callback.function()), ReturnValue::Success);
    assert_eq!(
        event.remove_handler(callback.function()),
        ReturnValue::NothingToDo
    );
    assert!(!event.has_handlers());
    event.invoke(&[], InvokeMode::Immediate);
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[test]
fn immediate_handlers_run_in_insertion_order() {
    let event = FunctionImpl::create();
    let order = Arc::new(Mutex::new(Vec::new()));
    let make = |tag: u32| {
        Callback::new({
            let order = order.clone();
            move |_| {
                order.lock().unwrap().push(tag);
                None
            }
        })
    };
    let first = make(1);
    let second = make(2);
    let third = make(3);
    event.add_handler(first.function(), InvokeMode::Immediate);
    event.add_handler(second.function(), InvokeMode::Immediate);
    event.add_handler(third.function(), InvokeMode::Immediate);
    event.invoke(&[], InvokeMode::Immediate);
    assert_eq!(*order.lock().unwrap(), vec![1, 2, 3]);
}

#[test]
fn deferred_handlers_wait_for_update() {
    let _serial = update_lock();
    let event = FunctionImpl::create();
    let (immediate, immediate_hits) = counting_callback();
    let (deferred, deferred_hits) = counting_callback();
    event.add_handler(immediate.function(), InvokeMode::Immediate);
    event.add_handler(deferred.function(), InvokeMode::Deferred);

    event.invoke(&[], InvokeMode::Immediate);
    assert_eq!(immediate_hits.load(Ordering::SeqCst), 1);
    assert_eq!(deferred_hits.load(Ordering::SeqCst), 0);

    instance().update(None);
    assert_eq!(deferred_hits.load(Ordering::SeqCst), 1);
    // Draining does not replay the immediate segment.
    assert_eq!(immediate_hits.load(Ordering::SeqCst), 1);
}

#[test]
fn deferred_handlers_share_one_args_clone() {
    let _serial = update_lock();
    let event = FunctionImpl::create();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let make = || {
        Callback::new({
            let seen = seen.clone();
            move |args: velk::FnArgs<'_>| {
                seen.lock()
                    .unwrap()
                    .push(velk::extract_arg::<i32>(args.first().copied()));
                None
            }
        })
    };
    let a = make();
    let b = make();
    event.add_handler(a.function(), InvokeMode::Deferred);
    event.add_handler(b.function(), InvokeMode::Deferred);

    let arg = velk::OwnedAny::<i32>::boxed(9);
    event.invoke(&[&*arg], InvokeMode::Immediate);
    // Mutating the original after the call must not affect the queued
    // tasks: they carry a clone.
    arg.set_value(&1_000_i32);

    instance().update(None);
    assert_eq!(*seen.lock().unwrap(), vec![9, 9]);
}

#[test]
fn deferred_invoke_runs_whole_call_next_tick() {
    let _serial = update_lock();
    let (callback, hits) = counting_callback();
    // Seed scenario: a deferred call leaves the counter untouched until
    // the next update tick.
    callback.function().invoke(&[], InvokeMode::Deferred);
    assert_eq!(hits.load(Ordering::SeqCst), 0);
    instance().update(None);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    // The queue was fully drained; a second tick adds nothing.
    instance().update(None);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[test]
fn tasks_queued_during_drain_run_next_tick() {
    let _serial = update_lock();
    let hits = Arc::new(AtomicU32::new(0));
    let inner = Callback::new({
        let hits = hits.clone();
        move |_| {
            hits.fetch_add(1, Ordering::SeqCst);
            None
        }
    });
    let inner_fn = inner.function().clone();
    let outer = Callback::new(move |_| {
        inner_fn.invoke(&[], InvokeMode::Deferred);
        None
    });
    outer.function().invoke(&[], InvokeMode::Deferred);

    instance().update(None);
    // The outer task ran and queued the inner one for the next tick.
    assert_eq!(hits.load(Ordering::SeqCst), 0);
    instance().update(None);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[test]
fn event_invoke_reports_dispatch_outcome() {
    let event = FunctionImpl::create();
    // No target, no handlers: nothing happened.
    assert_eq!(
        event.invoke_event(&[], InvokeMode::Immediate),
        ReturnValue::NothingToDo
    );
    let (callback, hits) = counting_callback();
    event.add_handler(callback.function(), InvokeMode::Immediate);
    assert_eq!(
        event.invoke_event(&[], InvokeMode::Immediate),
        ReturnValue::Success
    );
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[test]
fn replacing_the_target_drops_the_owned_closure() {
    struct Probe(Arc<AtomicU32>);
    impl Drop for Probe {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }
    let drops = Arc::new(AtomicU32::new(0));
    let probe = Probe(drops.clone());

    let function = FunctionImpl::create();
    let internal = interface_cast::<dyn FunctionInternal, _>(&*function).unwrap();
    internal.set_owned_callback(Arc::new(move |_| {
        let _ = &probe;
        None
    }));
    assert_eq!(drops.load(Ordering::SeqCst), 0);
    internal.set_invoke_callback(None);
    assert_eq!(drops.load(Ordering::SeqCst), 1);
}
