//! Shared/weak pointer behaviour over runtime objects: reference counts,
//! promotion, aliasing casts, and cross-thread use.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use velk::{
    instance, interface_cast, interface_ptr_cast, Function, Interface, InvokeMode, Property,
    PropertyImpl, SharedPtr, WeakPtr,
};

#[test]
fn plain_type_shared_ownership() {
    let p = SharedPtr::new(vec![1, 2, 3]);
    let q = p.clone();
    assert_eq!(p.strong_count(), 2);
    assert_eq!(*q, vec![1, 2, 3]);
    drop(p);
    assert_eq!(q.strong_count(), 1);
}

#[test]
fn pointer_equality_is_identity() {
    let a = SharedPtr::new(5_u8);
    let b = SharedPtr::new(5_u8);
    assert!(SharedPtr::ptr_eq(&a, &a.clone()));
    assert!(!SharedPtr::ptr_eq(&a, &b));
}

#[test]
fn weak_does_not_keep_value_alive() {
    struct Probe(Arc<AtomicU32>);
    impl Drop for Probe {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    let drops = Arc::new(AtomicU32::new(0));
    let strong = SharedPtr::new(Probe(drops.clone()));
    let weak = SharedPtr::downgrade(&strong);
    assert!(weak.lock().is_some());
    drop(strong);
    assert_eq!(drops.load(Ordering::SeqCst), 1);
    assert!(weak.expired());
    assert!(weak.lock().is_none());
}

#[test]
fn empty_weak_is_expired() {
    let weak: WeakPtr<u32> = WeakPtr::empty();
    assert!(weak.expired());
    assert!(weak.lock().is_none());
}

#[test]
fn interface_object_self_pointer() {
    let property = PropertyImpl::create();
    let obj = (*property).as_interface();
    let this = obj.get_self().expect("alive object resolves self");
    assert!(std::ptr::eq(
        this.as_ptr() as *const u8,
        property.as_ptr() as *const u8
    ));
}

#[test]
fn aliasing_cast_shares_the_block() {
    let property = instance()
        .create_property(velk::type_uid::<f32>(), None, velk::ObjectFlags::empty())
        .unwrap();
    let before = property.strong_count();

    let obj = (*property).as_interface().get_self().unwrap();
    let event = property.on_changed();
    // The cast result points at a different trait object of the same
    // allocation and keeps the object alive through the same block.
    let recast = interface_ptr_cast::<dyn Property, _>(&obj).unwrap();
    assert!(recast.strong_count() > before);
    drop(obj);
    drop(recast);
    assert!(event.invoke(&[], InvokeMode::Immediate).is_none());
    assert_eq!(property.strong_count(), before);
}

#[test]
fn weak_to_interface_object_expires_with_it() {
    let function = velk::FunctionImpl::create();
    let weak = SharedPtr::downgrade(&function);
    assert!(!weak.expired());
    drop(function);
    assert!(weak.expired());
    assert!(weak.lock().is_none());
}

#[test]
fn interface_cast_reaches_internal_surface() {
    let property = PropertyImpl::create();
    let internal = interface_cast::<dyn velk::PropertyInternal, _>(&*property);
    assert!(internal.is_some());
    // A property does not implement function dispatch.
    assert!(interface_cast::<dyn Function, _>(&*property).is_none());
}

#[test]
fn weak_promotion_race_with_destruction() {
    for _ in 0..50 {
        let value = SharedPtr::new(AtomicU32::new(0));
        let weak = SharedPtr::downgrade(&value);
        let workers: Vec<_> = (0..3)
            .map(|_| {
                let weak = weak.clone();
                std::thread::spawn(move || {
                    let mut promoted = 0;
                    for _ in 0..100 {
                        if let Some(v) = weak.lock() {
                            v.fetch_add(1, Ordering::Relaxed);
                            promoted += 1;
                        }
                    }
                    promoted
                })
            })
            .collect();
        drop(value);
        for worker in workers {
            worker.join().unwrap();
        }
        assert!(weak.expired());
    }
}
