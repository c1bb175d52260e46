//! The root runtime: registries, deferred queues, the update loop, and
//! factory conveniences for the built-in types.

use std::collections::HashMap;
use std::fmt;
use std::sync::{LazyLock, Mutex};
use std::time::Instant;

use crate::any::{AnyPtr, AnyValue, FnArgs};
use crate::function::{Function, FunctionImpl, FunctionInternal, FunctionPtr, RawCallable};
use crate::future::{FutureImpl, FuturePtr};
use crate::hive::{HiveStoreImpl, ObjectHiveImpl, RawHiveImpl};
use crate::interface::{interface_cast, interface_ptr_cast, Interface};
use crate::memory::{SharedPtr, WeakPtr};
use crate::object::{ClassFactory, ObjectClass};
use crate::plugin::{PluginPtr, PluginRegistry};
use crate::property::{PropertyImpl, PropertyInternal, PropertyPtr};
use crate::registry::TypeRegistry;
use crate::util::lock;
use crate::value::{ArrayAnyValue, OwnedAny};
use crate::{Duration, InvokeMode, ObjectFlags, ReturnValue, Uid};

/// Owns the cloned arguments of a deferred invocation. Tasks created from
/// one invocation share a single holder.
pub struct DeferredArgs {
    owned: Vec<AnyPtr>,
}

impl DeferredArgs {
    /// Deep-clones each argument.
    pub fn capture(args: FnArgs<'_>) -> Self {
        Self {
            owned: args.iter().filter_map(|a| a.clone_any()).collect(),
        }
    }

    /// A holder with no arguments.
    pub fn empty() -> Self {
        Self { owned: Vec::new() }
    }

    /// Runs `f` with a borrowed view of the cloned arguments.
    pub fn with_view<R>(&self, f: impl FnOnce(FnArgs<'_>) -> R) -> R {
        let view: Vec<&dyn AnyValue> = self.owned.iter().map(|a| &**a).collect();
        f(&view)
    }
}

impl fmt::Debug for DeferredArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredArgs")
            .field("count", &self.owned.len())
            .finish()
    }
}

/// A queued invocation executed on the next update tick.
#[derive(Debug)]
pub struct DeferredTask {
    /// The function to invoke.
    pub target: FunctionPtr,
    /// Cloned arguments, shared across tasks from the same invocation.
    pub args: SharedPtr<DeferredArgs>,
}

/// A deferred property write queued for the next update tick.
#[derive(Debug)]
pub struct DeferredPropertySet {
    /// Weak reference to the property; the write is skipped if it expires.
    pub property: WeakPtr<dyn PropertyInternal>,
    /// Cloned value to apply.
    pub value: AnyPtr,
}

/// Timing information passed to plugin update notifications.
#[derive(Clone, Copy, Debug, Default)]
pub struct UpdateInfo {
    /// Time elapsed since the runtime was created.
    pub time_since_init: Duration,
    /// Time elapsed since the first update call.
    pub time_since_first_update: Duration,
    /// Time elapsed since the previous update call.
    pub time_since_last_update: Duration,
}

#[derive(Default)]
struct UpdateTiming {
    init_us: i64,
    first_update_us: i64,
    last_update_us: i64,
    last_was_explicit: bool,
}

static CLOCK_EPOCH: LazyLock<Instant> = LazyLock::new(Instant::now);

fn now_us() -> i64 {
    CLOCK_EPOCH.elapsed().as_micros() as i64
}

/// The process-wide component runtime.
///
/// Composes the type registry, the plugin registry, and the deferred
/// dispatch queues, and self-registers the built-in runtime classes on
/// construction. Reached through [`instance`].
pub struct Velk {
    types: TypeRegistry,
    plugins: PluginRegistry,
    deferred_tasks: Mutex<Vec<DeferredTask>>,
    deferred_properties: Mutex<Vec<DeferredPropertySet>>,
    timing: Mutex<UpdateTiming>,
}

/// Returns the process-wide runtime, creating it on first access.
pub fn instance() -> &'static Velk {
    static INSTANCE: LazyLock<Velk> = LazyLock::new(Velk::new);
    &INSTANCE
}

impl Velk {
    fn new() -> Self {
        crate::log::init();
        let velk = Self {
            types: TypeRegistry::new(),
            plugins: PluginRegistry::new(),
            deferred_tasks: Mutex::new(Vec::new()),
            deferred_properties: Mutex::new(Vec::new()),
            timing: Mutex::new(UpdateTiming {
                init_us: now_us(),
                ..UpdateTiming::default()
            }),
        };
        velk.register_builtins();
        velk
    }

    fn register_builtins(&self) {
        self.register_class::<PropertyImpl>();
        self.register_class::<FunctionImpl>();
        self.register_class::<FutureImpl>();
        self.register_class::<HiveStoreImpl>();
        self.register_class::<ObjectHiveImpl>();
        self.register_class::<RawHiveImpl>();

        self.register_value_type::<f32>();
        self.register_value_type::<f64>();
        self.register_value_type::<u8>();
        self.register_value_type::<u16>();
        self.register_value_type::<u32>();
        self.register_value_type::<u64>();
        self.register_value_type::<i8>();
        self.register_value_type::<i16>();
        self.register_value_type::<i32>();
        self.register_value_type::<i64>();
        self.register_value_type::<String>();
    }

    fn register_class<C: ObjectClass>(&self) {
        self.types
            .register_type(std::sync::Arc::new(ClassFactory::<C>::new()));
    }

    fn register_value_type<T: crate::any::ValueType>(&self) {
        self.register_class::<OwnedAny<T>>();
        self.register_class::<ArrayAnyValue<T>>();
    }

    /// The type registry.
    pub fn type_registry(&self) -> &TypeRegistry {
        &self.types
    }

    /// The plugin registry.
    pub fn plugin_registry(&self) -> &PluginRegistry {
        &self.plugins
    }

    /// Registers an [`ObjectClass`] under its class UID.
    pub fn register_type<C: ObjectClass>(&self) -> ReturnValue {
        self.types
            .register_type(std::sync::Arc::new(ClassFactory::<C>::new()))
    }

    /// Removes the registration of an [`ObjectClass`].
    pub fn unregister_type<C: ObjectClass>(&self) -> ReturnValue {
        self.types.unregister_type(C::class_info_static().uid)
    }

    /// Creates an instance of a registered type by class UID.
    pub fn create(&self, uid: Uid) -> Option<SharedPtr<dyn Interface>> {
        self.types.create(uid, ObjectFlags::empty())
    }

    /// Creates an instance of a registered type and casts it to
    /// interface `I`.
    pub fn create_as<I>(&self, uid: Uid) -> Option<SharedPtr<I>>
    where
        I: ?Sized + crate::interface::InterfaceId + 'static,
    {
        let obj = self.create(uid)?;
        interface_ptr_cast::<I, _>(&obj)
    }

    /// Creates a value container for the given type UID.
    pub fn create_any(&self, ty: Uid) -> Option<AnyPtr> {
        let obj = self.create(ty)?;
        interface_ptr_cast::<dyn AnyValue, _>(&obj)
    }

    /// Creates a property for `ty`, optionally seeded with `initial`, with
    /// `flags` applied.
    pub fn create_property(
        &self,
        ty: Uid,
        initial: Option<AnyPtr>,
        flags: ObjectFlags,
    ) -> Option<PropertyPtr> {
        let property = PropertyImpl::create();
        let internal = interface_cast::<dyn PropertyInternal, _>(&*property)?;
        internal.set_flags(flags);
        if let Some(value) = initial {
            if value.is_compatible_with(ty) && internal.set_any(value) {
                return Some(property);
            }
            log::error!("Initial property value is of incompatible type");
        }
        let any = self.create_any(ty)?;
        internal.set_any(any).then_some(property)
    }

    /// Creates an unresolved future.
    pub fn create_future(&self) -> FuturePtr {
        FutureImpl::create()
    }

    /// Creates a function driven by a bare callback.
    pub fn create_callback(&self, callback: RawCallable) -> FunctionPtr {
        let function = FunctionImpl::create();
        if let Some(internal) = interface_cast::<dyn FunctionInternal, _>(&*function) {
            internal.set_invoke_callback(Some(callback));
        }
        function
    }

    /// Creates a function driven by an owned closure.
    pub fn create_owned_callback(
        &self,
        callback: impl Fn(FnArgs<'_>) -> Option<AnyPtr> + Send + Sync + 'static,
    ) -> FunctionPtr {
        FunctionImpl::create_owned(callback)
    }

    /// Loads an in-process plugin instance.
    pub fn load_plugin(&self, plugin: PluginPtr) -> ReturnValue {
        self.plugins.load_plugin(self, plugin)
    }

    /// Loads a plugin from a shared library.
    pub fn load_plugin_from_path(&self, path: &str) -> ReturnValue {
        self.plugins.load_plugin_from_path(self, path)
    }

    /// Unloads a plugin by UID.
    pub fn unload_plugin(&self, uid: Uid) -> ReturnValue {
        self.plugins.unload_plugin(self, uid)
    }

    /// Unloads every plugin in reverse insertion order.
    pub fn shutdown_plugins(&self) {
        self.plugins.shutdown_all(self);
    }

    /// Enqueues deferred tasks for the next update tick.
    pub fn queue_deferred_tasks(&self, tasks: Vec<DeferredTask>) {
        lock(&self.deferred_tasks).extend(tasks);
    }

    /// Enqueues a deferred property write for the next update tick.
    pub fn queue_deferred_property(&self, task: DeferredPropertySet) {
        lock(&self.deferred_properties).push(task);
    }

    /// Runs one update tick.
    ///
    /// Coalesced deferred property writes are applied first (one write and
    /// one `on_changed` per property, last write wins), then deferred
    /// tasks queued before this tick are drained in FIFO order; work
    /// queued while draining runs on the next tick. Finally, opted-in
    /// plugins are notified with timing info. Passing a time drives the
    /// tick with an explicit clock; `None` uses the wall clock, and
    /// switching between the two resets the first/last markers.
    pub fn update(&self, time: Option<Duration>) {
        self.flush_deferred_properties();

        // Swap the queue under lock, invoke outside it.
        let tasks = std::mem::take(&mut *lock(&self.deferred_tasks));
        for task in &tasks {
            task.args.with_view(|args| {
                task.target.invoke(args, InvokeMode::Immediate);
            });
        }

        let info = self.update_timing(time);
        self.plugins.notify_plugins(&info);
    }

    /// Applies queued property writes, last write per property wins.
    fn flush_deferred_properties(&self) {
        let writes = std::mem::take(&mut *lock(&self.deferred_properties));
        if writes.is_empty() {
            return;
        }
        // Coalesce by property identity, keeping the queue order of the
        // surviving (= last) write per property.
        let mut kept: Vec<DeferredPropertySet> = Vec::with_capacity(writes.len());
        let mut index_of: HashMap<usize, usize> = HashMap::new();
        for write in writes {
            let key = write.property.data_ptr() as usize;
            match index_of.get(&key) {
                Some(&at) => kept[at] = write,
                None => {
                    index_of.insert(key, kept.len());
                    kept.push(write);
                }
            }
        }
        for write in &kept {
            let Some(property) = write.property.lock() else {
                continue;
            };
            if property
                .as_interface()
                .core()
                .flags()
                .contains(ObjectFlags::READ_ONLY)
            {
                continue;
            }
            // Apply silently, then fire the coalesced notification once.
            if property.set_value_silent(&*write.value) == ReturnValue::Success {
                property.notify_changed();
            }
        }
    }

    fn update_timing(&self, time: Option<Duration>) -> UpdateInfo {
        let mut timing = lock(&self.timing);
        let explicit = time.is_some();
        let current_us = time.map_or_else(now_us, |t| t.us);

        // Switching between explicit and wall-clock time domains restarts
        // the first/last markers.
        if explicit != timing.last_was_explicit {
            timing.first_update_us = 0;
            timing.last_update_us = 0;
        }
        timing.last_was_explicit = explicit;

        if timing.first_update_us == 0 {
            timing.first_update_us = current_us;
        }
        let info = UpdateInfo {
            time_since_init: Duration::from_micros(current_us - timing.init_us),
            time_since_first_update: Duration::from_micros(current_us - timing.first_update_us),
            time_since_last_update: Duration::from_micros(if timing.last_update_us != 0 {
                current_us - timing.last_update_us
            } else {
                0
            }),
        };
        timing.last_update_us = current_us;
        info
    }

    /// Number of queued deferred tasks (diagnostic).
    pub fn deferred_task_count(&self) -> usize {
        lock(&self.deferred_tasks).len()
    }
}

impl fmt::Debug for Velk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Velk")
            .field("types", &self.types)
            .field("plugins", &self.plugins)
            .finish_non_exhaustive()
    }
}

/// Creates a standalone property for `T`, seeded with `initial`.
pub fn create_property_of<T: crate::any::ValueType>(
    initial: T,
    flags: ObjectFlags,
) -> Option<PropertyPtr> {
    instance().create_property(
        crate::interface::type_uid::<T>(),
        Some(OwnedAny::boxed(initial)),
        flags,
    )
}
