//! Object hive: churn, slot reuse, page growth, zombie survival, orphan
//! pages, and state iteration.

use velk::hive::for_each_state;
use velk::{
    instance, HiveStore, Interface, ObjectHive, ObjectHiveImpl, ReturnValue, SharedPtr, Uid,
};

velk::interface! {
    /// Ten-field test payload, mirroring a small game entity.
    pub interface IHiveWidget {
        properties {
            x: f32 = 0.0;
            y: f32 = 0.0;
            z: f32 = 0.0;
            vx: f32 = 0.0;
            vy: f32 = 0.0;
            vz: f32 = 0.0;
            mass: f32 = 1.0;
            generation: u32 = 0;
            id: u64 = 0;
            alive: u8 = 1;
        }
    }
}

velk::object_class! {
    pub class HiveWidget {
        implements: [IHiveWidget],
    }
}

velk::interface! {
    pub interface IHiveGadget {
        properties {
            serial: i32 = 0;
        }
    }
}

velk::object_class! {
    pub class HiveGadget {
        implements: [IHiveGadget],
    }
}

fn fresh_hive<C: velk::ObjectClass>() -> SharedPtr<dyn ObjectHive> {
    instance().register_type::<HiveWidget>();
    instance().register_type::<HiveGadget>();
    let hive = ObjectHiveImpl::create();
    assert_eq!(
        hive.initialize(C::class_info_static().uid),
        ReturnValue::Success
    );
    hive
}

#[test]
fn initialize_requires_registered_class() {
    let hive = ObjectHiveImpl::create();
    assert_eq!(
        hive.initialize(Uid::new(0xbad, 0xbad)),
        ReturnValue::Fail
    );
    assert!(hive.add().is_none());
}

#[test]
fn added_objects_are_members() {
    let hive = fresh_hive::<HiveGadget>();
    let obj = hive.add().unwrap();
    assert_eq!(hive.len(), 1);
    assert!(hive.contains(&*obj));
    assert_eq!(obj.class_uid(), HiveGadget::CLASS_UID);
    assert!(obj
        .core()
        .flags()
        .contains(velk::ObjectFlags::HIVE_MANAGED));

    // An unrelated object is not a member.
    let outsider = instance().create(HiveGadget::CLASS_UID).unwrap();
    assert!(!hive.contains(&*outsider));
}

#[test]
fn remove_transitions_out_of_membership() {
    let hive = fresh_hive::<HiveGadget>();
    let obj = hive.add().unwrap();
    assert_eq!(hive.remove(&*obj), ReturnValue::Success);
    assert!(!hive.contains(&*obj));
    assert_eq!(hive.len(), 0);
    // Removing again fails: the slot is no longer active.
    assert_eq!(hive.remove(&*obj), ReturnValue::Fail);
}

#[test]
fn object_survives_remove_while_referenced() {
    let hive = fresh_hive::<HiveGadget>();
    let obj = hive.add().unwrap();
    let held = obj.clone();
    hive.remove(&*obj).succeeded().then_some(()).unwrap();
    // Zombie: logically removed, still dereferenceable.
    assert_eq!(held.class_uid(), HiveGadget::CLASS_UID);
    IHiveGadget::serial(&*held).set_value(5);
    assert_eq!(IHiveGadget::serial(&*held).get_value(), 5);
}

#[test]
fn slot_reuse_after_release() {
    let hive = fresh_hive::<HiveGadget>();
    let keep_a = hive.add().unwrap();
    let addr_b;
    {
        let b = hive.add().unwrap();
        addr_b = b.as_ptr() as *const u8 as usize;
        hive.remove(&*b);
        // b drops here: last reference, slot returns to the freelist.
    }
    let c = hive.add().unwrap();
    assert_eq!(c.as_ptr() as *const u8 as usize, addr_b);
    assert_eq!(hive.len(), 2);
    drop(keep_a);
}

#[test]
fn weak_pointer_survives_slot_release() {
    let hive = fresh_hive::<HiveGadget>();
    let obj = hive.add().unwrap();
    let weak = SharedPtr::downgrade(&obj);
    hive.remove(&*obj);
    assert!(!weak.expired());
    drop(obj);
    // The object is gone, but the embedded block still answers.
    assert!(weak.expired());
    assert!(weak.lock().is_none());
}

#[test]
fn churn_scenario() {
    let hive = fresh_hive::<HiveWidget>();
    let mut held: Vec<SharedPtr<dyn Interface>> = Vec::new();
    for index in 0..512 {
        let obj = hive.add().unwrap();
        IHiveWidget::id(&*obj).set_value(index as u64);
        held.push(obj);
    }
    assert_eq!(hive.len(), 512);

    // Remove every fourth object.
    for index in (0..512).step_by(4) {
        hive.remove(&*held[index]);
    }
    assert_eq!(hive.len(), 384);

    // Refill; removed slots are reused before new pages appear.
    for _ in 0..128 {
        held.push(hive.add().unwrap());
    }
    assert_eq!(hive.len(), 512);

    let mut visited = 0;
    hive.for_each(&mut |_| {
        visited += 1;
        true
    });
    assert_eq!(visited, 512);
}

#[test]
fn page_growth_crosses_page_boundary() {
    let hive = fresh_hive::<HiveGadget>();
    // First page holds 16 slots; the 17th allocation must land elsewhere.
    let first_page: Vec<_> = (0..16).map(|_| hive.add().unwrap()).collect();
    let overflow = hive.add().unwrap();
    assert_eq!(hive.len(), 17);
    let overflow_addr = overflow.as_ptr() as *const u8 as usize;
    assert!(first_page
        .iter()
        .all(|obj| obj.as_ptr() as *const u8 as usize != overflow_addr));
    assert!(hive.contains(&*overflow));
}

#[test]
fn for_each_stops_on_false() {
    let hive = fresh_hive::<HiveGadget>();
    let _objs: Vec<_> = (0..8).map(|_| hive.add().unwrap()).collect();
    let mut visited = 0;
    hive.for_each(&mut |_| {
        visited += 1;
        false
    });
    assert_eq!(visited, 1);
}

#[test]
fn for_each_skips_zombies() {
    let hive = fresh_hive::<HiveGadget>();
    let objs: Vec<_> = (0..6).map(|_| hive.add().unwrap()).collect();
    hive.remove(&*objs[2]);
    hive.remove(&*objs[4]);
    let mut visited = 0;
    hive.for_each(&mut |obj| {
        assert_ne!(obj as *const dyn Interface as *const u8, objs[2].as_ptr() as *const u8);
        visited += 1;
        true
    });
    assert_eq!(visited, 4);
}

#[test]
fn state_iteration_sums_members() {
    let hive = fresh_hive::<HiveWidget>();
    for index in 0..10 {
        let obj = hive.add().unwrap();
        IHiveWidget::generation(&*obj).set_value(index as u32);
    }
    let mut total = 0_u32;
    for_each_state::<IHiveWidget>(&*hive, |_, state| {
        total += state.generation;
        true
    });
    assert_eq!(total, (0..10).sum());
}

#[test]
fn zombies_survive_hive_destruction() {
    let survivor;
    let weak_observer;
    {
        let hive = fresh_hive::<HiveGadget>();
        let obj = hive.add().unwrap();
        IHiveGadget::serial(&*obj).set_value(77);
        survivor = obj.clone();
        weak_observer = SharedPtr::downgrade(&obj);
        let dying = hive.add().unwrap();
        let _weak_of_dying = SharedPtr::downgrade(&dying);
        // The hive dies here with one strongly-referenced member and one
        // weakly-observed member: its pages are orphaned, not freed.
    }
    assert_eq!(IHiveGadget::serial(&*survivor).get_value(), 77);
    assert!(!weak_observer.expired());
    drop(survivor);
    assert!(weak_observer.expired());
}

#[test]
fn hive_store_creates_and_caches() {
    instance().register_type::<HiveWidget>();
    let store = instance()
        .create_as::<dyn HiveStore>(velk::class_id::HIVE_STORE)
        .unwrap();

    assert!(store.find_hive(HiveWidget::CLASS_UID).is_none());
    let hive = store.get_hive(HiveWidget::CLASS_UID).unwrap();
    let again = store.get_hive(HiveWidget::CLASS_UID).unwrap();
    assert!(SharedPtr::ptr_eq(&hive, &again));
    assert_eq!(store.hive_count(), 1);

    // Unknown element classes produce no hive.
    assert!(store.get_hive(Uid::new(1, 1)).is_none());

    let mut seen = 0;
    store.for_each_hive(&mut |uid, _| {
        assert_eq!(uid, HiveWidget::CLASS_UID);
        seen += 1;
        true
    });
    assert_eq!(seen, 1);
}

#[test]
fn independent_stores_have_independent_hives() {
    instance().register_type::<HiveGadget>();
    let a = velk::HiveStoreImpl::create();
    let b = velk::HiveStoreImpl::create();
    let hive_a = a.get_hive(HiveGadget::CLASS_UID).unwrap();
    let hive_b = b.get_hive(HiveGadget::CLASS_UID).unwrap();
    assert!(!SharedPtr::ptr_eq(&hive_a, &hive_b));
    hive_a.add().unwrap();
    assert_eq!(hive_a.len(), 1);
    assert_eq!(hive_b.len(), 0);
}
