//! Future/promise: one-shot resolution, blocking wait, and continuation
//! chaining in both dispatch modes.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use velk::api::{Callback, Promise};
use velk::{instance, Future, InvokeMode, ReturnValue};

fn update_lock() -> std::sync::MutexGuard<'static, ()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[test]
fn resolves_once() {
    let promise = Promise::new();
    let future = promise.typed_future::<i32>();
    assert!(!future.is_ready());
    assert_eq!(promise.set_value(7), ReturnValue::Success);
    assert!(future.is_ready());
    assert_eq!(future.get(), Some(7));
    // Later resolutions are ignored.
    assert_eq!(promise.set_value(9), ReturnValue::NothingToDo);
    assert_eq!(future.get(), Some(7));
}

#[test]
fn result_is_an_independent_clone() {
    let promise = Promise::new();
    let source = velk::OwnedAny::<i32>::boxed(3);
    velk::set_future_result(&promise.future(), Some(&*source));
    source.set_value(&99_i32);
    assert_eq!(promise.typed_future::<i32>().get(), Some(3));
}

#[test]
fn valueless_resolution() {
    let promise = Promise::new();
    assert_eq!(promise.set_empty(), ReturnValue::Success);
    let future = promise.future();
    assert!(future.is_ready());
    assert!(future.get_result().is_none());
}

#[test]
fn wait_blocks_until_resolution() {
    let promise = Promise::new();
    let future = promise.typed_future::<u32>();
    let worker = std::thread::spawn(move || future.get());
    std::thread::sleep(Duration::from_millis(20));
    promise.set_value(123_u32);
    assert_eq!(worker.join().unwrap(), Some(123));
}

#[test]
fn ready_flag_is_visible_across_threads() {
    let promise = Promise::new();
    let future = promise.future();
    let seen = Arc::new(AtomicU32::new(0));
    let workers: Vec<_> = (0..3)
        .map(|_| {
            let future = future.clone();
            let seen = seen.clone();
            std::thread::spawn(move || {
                future.wait();
                assert!(future.is_ready());
                seen.fetch_add(1, Ordering::SeqCst);
            })
        })
        .collect();
    promise.set_value(1_u8);
    for worker in workers {
        worker.join().unwrap();
    }
    assert_eq!(seen.load(Ordering::SeqCst), 3);
}

#[test]
fn continuation_before_resolution_fires_on_resolve() {
    let promise = Promise::new();
    let got = Arc::new(Mutex::new(None));
    let callback = Callback::new({
        let got = got.clone();
        move |args| {
            *got.lock().unwrap() = args.first().and_then(|a| a.value::<i32>());
            None
        }
    });
    promise
        .future()
        .add_continuation(callback.function(), InvokeMode::Immediate);
    assert!(got.lock().unwrap().is_none());
    promise.set_value(5);
    assert_eq!(*got.lock().unwrap(), Some(5));
}

#[test]
fn continuation_after_resolution_fires_immediately() {
    let promise = Promise::new();
    promise.set_value(8);
    let got = Arc::new(Mutex::new(None));
    let callback = Callback::new({
        let got = got.clone();
        move |args| {
            *got.lock().unwrap() = args.first().and_then(|a| a.value::<i32>());
            None
        }
    });
    promise
        .future()
        .add_continuation(callback.function(), InvokeMode::Immediate);
    assert_eq!(*got.lock().unwrap(), Some(8));
}

#[test]
fn deferred_continuation_runs_on_update() {
    let _serial = update_lock();
    let promise = Promise::new();
    let hits = Arc::new(AtomicU32::new(0));
    let callback = Callback::new({
        let hits = hits.clone();
        move |_| {
            hits.fetch_add(1, Ordering::SeqCst);
            None
        }
    });
    promise
        .future()
        .add_continuation(callback.function(), InvokeMode::Deferred);
    promise.set_value(1);
    assert_eq!(hits.load(Ordering::SeqCst), 0);
    instance().update(None);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[test]
fn typed_then_chain() {
    // Seed scenario: 2 -> +1 -> *10 == 30.
    let promise = Promise::new();
    let end = promise
        .typed_future::<i32>()
        .then(|value| value + 1, InvokeMode::Immediate)
        .then(|value| value * 10, InvokeMode::Immediate);
    promise.set_value(2);
    assert_eq!(end.get(), Some(30));
}

#[test]
fn then_after_resolution_still_chains() {
    let promise = Promise::new();
    promise.set_value(4);
    let chained = promise
        .typed_future::<i32>()
        .then(|value| value * value, InvokeMode::Immediate);
    assert_eq!(chained.get(), Some(16));
}

#[test]
fn on_ready_receives_typed_value() {
    let promise = Promise::new();
    let got = Arc::new(Mutex::new(0.0_f64));
    promise.typed_future::<f64>().on_ready(
        {
            let got = got.clone();
            move |value| {
                *got.lock().unwrap() = value;
            }
        },
        InvokeMode::Immediate,
    );
    promise.set_value(2.5_f64);
    assert_eq!(*got.lock().unwrap(), 2.5);
}
