//! Plugin registry: load/unload lifecycle, dependency and version checks,
//! owner-tagged type sweeps, and update notifications.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, OnceLock};

use velk::{
    instance, interface_ptr_cast, pack_version, Interface, Plugin, PluginConfig, PluginDep,
    PluginPtr, ReturnValue, Uid, UpdateInfo, Velk,
};

fn update_lock() -> std::sync::MutexGuard<'static, ()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

velk::interface! {
    pub interface IGear {
        properties {
            teeth: u32 = 12;
        }
    }
}

velk::object_class! {
    /// Type registered by plugin A, swept when A unloads.
    pub class Gear {
        implements: [IGear],
    }
}

const PLUGIN_A: Uid = Uid::parse("aaaaaaaa-0000-4000-8000-000000000001");
const PLUGIN_B: Uid = Uid::parse("bbbbbbbb-0000-4000-8000-000000000002");
const PLUGIN_C: Uid = Uid::parse("cccccccc-0000-4000-8000-000000000003");

velk::object_class! {
    /// v2.1.0; registers the Gear type and opts into updates.
    pub class PluginA {
        uid: "aaaaaaaa-0000-4000-8000-000000000001",
        implements: [],
        traits: [Plugin],
        fields: {
            updates: AtomicU32 = AtomicU32::new(0),
        },
    }
}

impl Plugin for PluginA {
    fn version(&self) -> u32 {
        pack_version(2, 1, 0)
    }

    fn dependencies(&self) -> &[PluginDep] {
        &[]
    }

    fn initialize(&self, velk: &Velk, config: &mut PluginConfig) -> ReturnValue {
        velk.register_type::<Gear>();
        config.enable_update = true;
        ReturnValue::Success
    }

    fn shutdown(&self, _velk: &Velk) -> ReturnValue {
        ReturnValue::Success
    }

    fn update(&self, _info: &UpdateInfo) {
        self.updates.fetch_add(1, Ordering::SeqCst);
    }
}

velk::object_class! {
    /// v1.0.0; depends on A >= 2.1.0.
    pub class PluginB {
        uid: "bbbbbbbb-0000-4000-8000-000000000002",
        implements: [],
        traits: [Plugin],
    }
}

impl Plugin for PluginB {
    fn version(&self) -> u32 {
        pack_version(1, 0, 0)
    }

    fn dependencies(&self) -> &[PluginDep] {
        static DEPS: [PluginDep; 1] = [PluginDep {
            uid: PLUGIN_A,
            min_version: pack_version(2, 1, 0),
        }];
        &DEPS
    }

    fn initialize(&self, _velk: &Velk, _config: &mut PluginConfig) -> ReturnValue {
        ReturnValue::Success
    }

    fn shutdown(&self, _velk: &Velk) -> ReturnValue {
        ReturnValue::Success
    }
}

velk::object_class! {
    /// v1.0.0; depends on A >= 3.0.0, which is never satisfied.
    pub class PluginC {
        uid: "cccccccc-0000-4000-8000-000000000003",
        implements: [],
        traits: [Plugin],
    }
}

impl Plugin for PluginC {
    fn version(&self) -> u32 {
        pack_version(1, 0, 0)
    }

    fn dependencies(&self) -> &[PluginDep] {
        static DEPS: [PluginDep; 1] = [PluginDep {
            uid: PLUGIN_A,
            min_version: pack_version(3, 0, 0),
        }];
        &DEPS
    }

    fn initialize(&self, _velk: &Velk, _config: &mut PluginConfig) -> ReturnValue {
        ReturnValue::Success
    }

    fn shutdown(&self, _velk: &Velk) -> ReturnValue {
        ReturnValue::Success
    }
}

velk::object_class! {
    /// Fails to initialize; must not remain registered.
    pub class BrokenPlugin {
        uid: "dddddddd-0000-4000-8000-000000000004",
        implements: [],
        traits: [Plugin],
    }
}

impl Plugin for BrokenPlugin {
    fn version(&self) -> u32 {
        pack_version(0, 1, 0)
    }

    fn dependencies(&self) -> &[PluginDep] {
        &[]
    }

    fn initialize(&self, _velk: &Velk, _config: &mut PluginConfig) -> ReturnValue {
        ReturnValue::Fail
    }

    fn shutdown(&self, _velk: &Velk) -> ReturnValue {
        ReturnValue::Success
    }
}

fn make_plugin<C: velk::ObjectClass + Plugin>() -> PluginPtr {
    let obj = velk::make_object(C::new_instance());
    interface_ptr_cast::<dyn Plugin, _>(&obj).unwrap()
}

/// Runs the whole lifecycle in one test: the plugin registry is
/// process-wide state, so the dependency chain must execute in order.
#[test]
fn dependency_chain_lifecycle() {
    let _serial = update_lock();
    let velk = instance();

    // Loading B first fails: its dependency is missing.
    assert_eq!(velk.load_plugin(make_plugin::<PluginB>()), ReturnValue::Fail);

    let a = make_plugin::<PluginA>();
    assert_eq!(velk.load_plugin(a.clone()), ReturnValue::Success);
    // Gear was registered under A's ownership.
    assert!(velk.create(Gear::CLASS_UID).is_some());
    // Duplicate load is a no-op.
    assert_eq!(velk.load_plugin(make_plugin::<PluginA>()), ReturnValue::NothingToDo);

    // B's minimum version (2.1.0) is satisfied by A (2.1.0).
    assert_eq!(velk.load_plugin(make_plugin::<PluginB>()), ReturnValue::Success);
    // C requires A >= 3.0.0: rejected.
    assert_eq!(velk.load_plugin(make_plugin::<PluginC>()), ReturnValue::Fail);
    assert!(velk.plugin_registry().find_plugin(PLUGIN_C).is_none());

    // A cannot unload while B depends on it.
    assert_eq!(velk.unload_plugin(PLUGIN_A), ReturnValue::Fail);
    assert!(velk.plugin_registry().find_plugin(PLUGIN_A).is_some());

    // Opted-in plugins receive the tick.
    let a_obj = (*a).as_interface().get_self().unwrap();
    let concrete = a_obj.as_any().downcast_ref::<PluginA>().unwrap();
    let before = concrete.updates.load(Ordering::SeqCst);
    velk.update(None);
    assert_eq!(concrete.updates.load(Ordering::SeqCst), before + 1);

    // Unload B, then A; A's types disappear with it.
    assert_eq!(velk.unload_plugin(PLUGIN_B), ReturnValue::Success);
    assert_eq!(velk.unload_plugin(PLUGIN_A), ReturnValue::Success);
    assert!(velk.plugin_registry().find_plugin(PLUGIN_A).is_none());
    assert!(velk.create(Gear::CLASS_UID).is_none());

    // After unloading, the tick no longer reaches A.
    let after = concrete.updates.load(Ordering::SeqCst);
    velk.update(None);
    assert_eq!(concrete.updates.load(Ordering::SeqCst), after);

    // Unloading something unknown is an argument error.
    assert_eq!(velk.unload_plugin(PLUGIN_C), ReturnValue::InvalidArgument);
}

#[test]
fn failed_initialize_rolls_back() {
    let _serial = update_lock();
    let velk = instance();
    let broken = make_plugin::<BrokenPlugin>();
    let uid = (*broken).as_interface().class_uid();
    assert_eq!(velk.load_plugin(broken), ReturnValue::Fail);
    assert!(velk.plugin_registry().find_plugin(uid).is_none());
}

velk::object_class! {
    /// Keeps its registered types alive after unload.
    pub class RetainingPlugin {
        uid: "eeeeeeee-0000-4000-8000-000000000005",
        implements: [],
        traits: [Plugin],
    }
}

velk::interface! {
    pub interface ISpring {
        properties {
            coils: u32 = 3;
        }
    }
}

velk::object_class! {
    pub class Spring {
        implements: [ISpring],
    }
}

impl Plugin for RetainingPlugin {
    fn version(&self) -> u32 {
        pack_version(1, 0, 0)
    }

    fn dependencies(&self) -> &[PluginDep] {
        &[]
    }

    fn initialize(&self, velk: &Velk, config: &mut PluginConfig) -> ReturnValue {
        velk.register_type::<Spring>();
        config.retain_types_on_unload = true;
        ReturnValue::Success
    }

    fn shutdown(&self, _velk: &Velk) -> ReturnValue {
        ReturnValue::Success
    }
}

#[test]
fn retain_types_on_unload_skips_the_sweep() {
    let _serial = update_lock();
    let velk = instance();
    let plugin = make_plugin::<RetainingPlugin>();
    let uid = (*plugin).as_interface().class_uid();
    assert_eq!(velk.load_plugin(plugin), ReturnValue::Success);
    assert!(velk.create(Spring::CLASS_UID).is_some());
    assert_eq!(velk.unload_plugin(uid), ReturnValue::Success);
    // The sweep was skipped.
    assert!(velk.create(Spring::CLASS_UID).is_some());
    velk.type_registry().unregister_type(Spring::CLASS_UID);
}

#[test]
fn missing_library_path_fails_cleanly() {
    assert_eq!(
        instance().load_plugin_from_path("/nonexistent/libvelk_missing.so"),
        ReturnValue::Fail
    );
    assert_eq!(instance().load_plugin_from_path(""), ReturnValue::InvalidArgument);
}

#[test]
fn update_timing_is_monotonic_with_explicit_clock() {
    let _serial = update_lock();
    let velk = instance();
    let a = make_plugin::<TimingPlugin>();
    assert_eq!(velk.load_plugin(a), ReturnValue::Success);

    velk.update(Some(velk::Duration::from_micros(1_000)));
    velk.update(Some(velk::Duration::from_micros(4_000)));

    let samples = TIMING_SAMPLES.get().unwrap().lock().unwrap().clone();
    let last = samples.last().unwrap();
    assert_eq!(last.time_since_last_update.us, 3_000);
    assert_eq!(last.time_since_first_update.us, 3_000);

    velk.unload_plugin(TimingPlugin::CLASS_UID);
}

static TIMING_SAMPLES: OnceLock<Mutex<Vec<UpdateInfo>>> = OnceLock::new();

velk::object_class! {
    pub class TimingPlugin {
        uid: "ffffffff-0000-4000-8000-000000000006",
        implements: [],
        traits: [Plugin],
    }
}

impl Plugin for TimingPlugin {
    fn version(&self) -> u32 {
        pack_version(1, 0, 0)
    }

    fn dependencies(&self) -> &[PluginDep] {
        &[]
    }

    fn initialize(&self, _velk: &Velk, config: &mut PluginConfig) -> ReturnValue {
        TIMING_SAMPLES.get_or_init(|| Mutex::new(Vec::new()));
        config.enable_update = true;
        ReturnValue::Success
    }

    fn shutdown(&self, _velk: &Velk) -> ReturnValue {
        ReturnValue::Success
    }

    fn update(&self, info: &UpdateInfo) {
        if let Some(samples) = TIMING_SAMPLES.get() {
            samples.lock().unwrap().push(*info);
        }
    }
}
