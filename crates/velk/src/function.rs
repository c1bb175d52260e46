//! Function and event runtime: invocation with immediate and deferred
//! dispatch, and the partitioned handler list.
//!
//! One implementation backs both flavours. A *function* routes to a single
//! primary target (raw callback, bound trampoline, or owned closure) and
//! broadcasts to handlers; an *event* is the same object with no target
//! installed.

use std::fmt;
use std::sync::{Arc, Mutex};

use crate::any::{AnyPtr, FnArgs};
use crate::interface::{
    interface_ptr_cast, Interface, InterfaceEntry, InterfaceId,
};
use crate::member::Trampoline;
use crate::memory::{SharedPtr, WeakPtr};
use crate::metadata::MemberCache;
use crate::object::{make_object, ObjectCore};
use crate::runtime::{instance, DeferredArgs, DeferredTask};
use crate::util::lock;
use crate::{ClassInfo, InvokeMode, ReturnValue, Uid};

/// Shared pointer to a function or event.
pub type FunctionPtr = SharedPtr<dyn Function>;

/// Bare callback signature for [`FunctionInternal::set_invoke_callback`].
pub type RawCallable = fn(FnArgs<'_>) -> Option<AnyPtr>;

/// Owned callback signature for [`FunctionInternal::set_owned_callback`].
pub type OwnedCallable = Arc<dyn Fn(FnArgs<'_>) -> Option<AnyPtr> + Send + Sync>;

/// A callable with an optional primary target and a partitioned handler
/// list (immediate segment first, deferred segment after the split).
pub trait Function: Interface {
    /// Invokes the target and broadcasts to handlers.
    ///
    /// `Immediate` runs the target and immediate handlers synchronously,
    /// queues one deferred task per deferred handler (sharing a single
    /// argument clone), and returns the target's result. `Deferred` queues
    /// the whole call for the next update tick and returns `None`.
    fn invoke(&self, args: FnArgs<'_>, mode: InvokeMode) -> Option<AnyPtr>;

    /// Event-flavoured invocation.
    ///
    /// Returns the dispatch outcome instead of the target's value:
    /// [`ReturnValue::NothingToDo`] when there was no target and no handler
    /// ran, [`ReturnValue::Success`] otherwise.
    fn invoke_event(&self, args: FnArgs<'_>, mode: InvokeMode) -> ReturnValue;

    /// Registers a handler. Duplicate registrations answer
    /// [`ReturnValue::NothingToDo`]; `Immediate` handlers are inserted at
    /// the split index, `Deferred` handlers append at the tail.
    fn add_handler(&self, handler: &FunctionPtr, mode: InvokeMode) -> ReturnValue;

    /// Unregisters a previously added handler.
    fn remove_handler(&self, handler: &FunctionPtr) -> ReturnValue;

    /// True if any handler is registered.
    fn has_handlers(&self) -> bool;
}

impl InterfaceId for dyn Function {
    const UID: Uid = Uid::parse("e35930c3-e5e1-4d34-b27b-fec9b1543e0a");
    const NAME: &'static str = "IFunction";
}

/// Configuration surface for the primary invoke target.
pub trait FunctionInternal: Function {
    /// Installs a bare function pointer as the target.
    fn set_invoke_callback(&self, callback: Option<RawCallable>);

    /// Binds the target to a trampoline on `owner`'s declaring interface.
    /// The call is silently skipped once the owner is destroyed.
    fn bind(&self, owner: WeakPtr<dyn Interface>, trampoline: Trampoline);

    /// Installs an owned closure as the target, replacing (and dropping)
    /// any previous owned target.
    fn set_owned_callback(&self, callback: OwnedCallable);
}

impl InterfaceId for dyn FunctionInternal {
    const UID: Uid = Uid::parse("52a76e59-0c4b-4e19-9f26-4b9273c55c11");
    const NAME: &'static str = "IFunctionInternal";
}

/// Primary invoke target, evaluated before the handler list.
#[derive(Clone, Default)]
enum Target {
    #[default]
    None,
    Raw(RawCallable),
    Bound {
        owner: WeakPtr<dyn Interface>,
        trampoline: Trampoline,
    },
    Owned(OwnedCallable),
}

impl Target {
    fn call(&self, args: FnArgs<'_>) -> Option<AnyPtr> {
        match self {
            Target::None => None,
            Target::Raw(f) => f(args),
            Target::Bound { owner, trampoline } => {
                // Dead owner: deferred tasks against destroyed objects are
                // silently skipped.
                let obj = owner.lock()?;
                trampoline(&*obj, args)
            }
            Target::Owned(f) => f(args),
        }
    }

    fn is_none(&self) -> bool {
        matches!(self, Target::None)
    }
}

/// Partitioned handler list: `[0, split)` immediate, `[split, len)`
/// deferred.
#[derive(Default)]
struct HandlerList {
    handlers: Vec<FunctionPtr>,
    split: usize,
}

/// Default [`Function`] implementation, backing functions and events.
pub struct FunctionImpl {
    core: ObjectCore,
    target: Mutex<Target>,
    handlers: Mutex<HandlerList>,
}

impl FunctionImpl {
    /// Class UID shared by functions and events.
    pub const CLASS_UID: Uid = Uid::parse("d3c150cc-0b2b-4237-93c5-5a16e9619be8");

    pub(crate) fn new() -> Self {
        Self {
            core: ObjectCore::new(),
            target: Mutex::new(Target::None),
            handlers: Mutex::new(HandlerList::default()),
        }
    }

    /// Creates a fresh function object.
    pub fn create() -> FunctionPtr {
        let obj = make_object(Self::new());
        interface_ptr_cast::<dyn Function, _>(&obj).expect("FunctionImpl implements Function")
    }

    /// Creates a function object wrapping an owned closure.
    pub fn create_owned(callback: impl Fn(FnArgs<'_>) -> Option<AnyPtr> + Send + Sync + 'static) -> FunctionPtr {
        let function = Self::create();
        if let Some(internal) = crate::interface::interface_cast::<dyn FunctionInternal, _>(&*function)
        {
            internal.set_owned_callback(Arc::new(callback));
        }
        function
    }

    fn class_info_impl() -> &'static ClassInfo {
        static INFO: std::sync::LazyLock<ClassInfo> = std::sync::LazyLock::new(|| {
            ClassInfo::new(
                FunctionImpl::CLASS_UID,
                "FunctionImpl",
                vec![
                    InterfaceEntry::with_caster::<dyn Function>(
                        <dyn Function as InterfaceId>::INFO,
                        |o| {
                            o.as_any()
                                .downcast_ref::<FunctionImpl>()
                                .map(|f| f as &dyn Function)
                        },
                    ),
                    InterfaceEntry::with_caster::<dyn FunctionInternal>(
                        <dyn FunctionInternal as InterfaceId>::INFO,
                        |o| {
                            o.as_any()
                                .downcast_ref::<FunctionImpl>()
                                .map(|f| f as &dyn FunctionInternal)
                        },
                    ),
                ],
                vec![],
            )
        });
        &INFO
    }

    fn self_function(&self) -> Option<FunctionPtr> {
        let obj = self.core.self_ptr()?;
        interface_ptr_cast::<dyn Function, _>(&obj)
    }

    fn snapshot_handlers(&self) -> (Vec<FunctionPtr>, Vec<FunctionPtr>) {
        let guard = lock(&self.handlers);
        (
            guard.handlers[..guard.split].to_vec(),
            guard.handlers[guard.split..].to_vec(),
        )
    }

    fn invoke_handlers(&self, args: FnArgs<'_>) {
        let (immediate, deferred) = self.snapshot_handlers();
        // Handler return values are ignored; different handlers may
        // legitimately return different results.
        for handler in &immediate {
            handler.invoke(args, InvokeMode::Immediate);
        }
        if deferred.is_empty() {
            return;
        }
        // Clone the args once; every deferred task shares the clone.
        let shared_args = SharedPtr::new(DeferredArgs::capture(args));
        let tasks: Vec<DeferredTask> = deferred
            .into_iter()
            .map(|handler| DeferredTask {
                target: handler,
                args: shared_args.clone(),
            })
            .collect();
        instance().queue_deferred_tasks(tasks);
    }
}

impl fmt::Debug for FunctionImpl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionImpl")
            .field("has_handlers", &self.has_handlers())
            .finish_non_exhaustive()
    }
}

impl Interface for FunctionImpl {
    fn class_info(&self) -> &'static ClassInfo {
        Self::class_info_impl()
    }

    fn core(&self) -> &ObjectCore {
        &self.core
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_interface(&self) -> &dyn Interface {
        self
    }

    fn member_cache(&self) -> Option<&MemberCache> {
        None
    }
}

impl crate::object::ObjectClass for FunctionImpl {
    fn class_info_static() -> &'static ClassInfo {
        Self::class_info_impl()
    }

    fn new_instance() -> Self {
        Self::new()
    }
}

impl Function for FunctionImpl {
    fn invoke(&self, args: FnArgs<'_>, mode: InvokeMode) -> Option<AnyPtr> {
        if mode == InvokeMode::Deferred {
            if let Some(target) = self.self_function() {
                instance().queue_deferred_tasks(vec![DeferredTask {
                    target,
                    args: SharedPtr::new(DeferredArgs::capture(args)),
                }]);
            }
            return None;
        }
        let target = lock(&self.target).clone();
        let result = target.call(args);
        self.invoke_handlers(args);
        result
    }

    fn invoke_event(&self, args: FnArgs<'_>, mode: InvokeMode) -> ReturnValue {
        if mode == InvokeMode::Deferred {
            self.invoke(args, mode);
            return ReturnValue::Success;
        }
        let involved = !lock(&self.target).is_none() || self.has_handlers();
        self.invoke(args, mode);
        if involved {
            ReturnValue::Success
        } else {
            ReturnValue::NothingToDo
        }
    }

    fn add_handler(&self, handler: &FunctionPtr, mode: InvokeMode) -> ReturnValue {
        let mut guard = lock(&self.handlers);
        if guard.handlers.iter().any(|h| SharedPtr::ptr_eq(h, handler)) {
            return ReturnValue::NothingToDo;
        }
        match mode {
            InvokeMode::Immediate => {
                let split = guard.split;
                guard.handlers.insert(split, handler.clone());
                guard.split += 1;
            }
            InvokeMode::Deferred => guard.handlers.push(handler.clone()),
        }
        ReturnValue::Success
    }

    fn remove_handler(&self, handler: &FunctionPtr) -> ReturnValue {
        let mut guard = lock(&self.handlers);
        let Some(index) = guard
            .handlers
            .iter()
            .position(|h| SharedPtr::ptr_eq(h, handler))
        else {
            return ReturnValue::NothingToDo;
        };
        if index < guard.split {
            guard.split -= 1;
        }
        guard.handlers.remove(index);
        ReturnValue::Success
    }

    fn has_handlers(&self) -> bool {
        !lock(&self.handlers).handlers.is_empty()
    }
}

impl FunctionInternal for FunctionImpl {
    fn set_invoke_callback(&self, callback: Option<RawCallable>) {
        *lock(&self.target) = match callback {
            Some(f) => Target::Raw(f),
            None => Target::None,
        };
    }

    fn bind(&self, owner: WeakPtr<dyn Interface>, trampoline: Trampoline) {
        *lock(&self.target) = Target::Bound { owner, trampoline };
    }

    fn set_owned_callback(&self, callback: OwnedCallable) {
        *lock(&self.target) = Target::Owned(callback);
    }
}

