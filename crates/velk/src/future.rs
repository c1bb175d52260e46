//! Future / promise runtime: a thread-safe one-shot result cell with
//! blocking wait and continuation chaining.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};

use crate::any::{AnyPtr, AnyValue};
use crate::function::{Function, FunctionImpl, FunctionPtr};
use crate::interface::{interface_cast, interface_ptr_cast, Interface, InterfaceEntry, InterfaceId};
use crate::memory::SharedPtr;
use crate::object::{make_object, ObjectCore};
use crate::runtime::{instance, DeferredArgs, DeferredTask};
use crate::util::lock;
use crate::{ClassInfo, InvokeMode, ReturnValue, Uid};

/// Shared pointer to a future.
pub type FuturePtr = SharedPtr<dyn Future>;

/// Read side of a one-shot result cell.
pub trait Future: Interface {
    /// True once the result has been set. Lock-free.
    fn is_ready(&self) -> bool;

    /// Blocks until the result is set.
    fn wait(&self);

    /// Blocks until the result is set, then returns it (may be `None` for
    /// valueless resolution).
    fn get_result(&self) -> Option<AnyPtr>;

    /// Registers a continuation. Fired on resolution, or immediately
    /// (respecting `mode`) if the future is already ready.
    fn add_continuation(&self, f: &FunctionPtr, mode: InvokeMode);

    /// Registers a continuation and returns a future resolved with its
    /// result after it runs.
    fn then(&self, f: &FunctionPtr, mode: InvokeMode) -> Option<FuturePtr>;
}

impl InterfaceId for dyn Future {
    const UID: Uid = Uid::parse("93d1cde4-3f2a-4b90-8c5b-2a6e81c5c832");
    const NAME: &'static str = "IFuture";
}

/// Write side of the result cell.
pub trait FutureInternal: Future {
    /// Resolves the future with a clone of `result` (or with no value).
    ///
    /// At most one call succeeds; later calls answer
    /// [`ReturnValue::NothingToDo`]. Blocked waiters wake and pending
    /// continuations fire after the lock is released (immediate ones on
    /// the resolving thread, deferred ones through the update queue).
    fn set_result(&self, result: Option<&dyn AnyValue>) -> ReturnValue;
}

impl InterfaceId for dyn FutureInternal {
    const UID: Uid = Uid::parse("41db9d8b-26a3-4e7d-8e61-3de60bd9b9ab");
    const NAME: &'static str = "IFutureInternal";
}

struct FutureState {
    result: Option<AnyPtr>,
    pending: Vec<(FunctionPtr, InvokeMode)>,
}

/// Default [`Future`] / [`FutureInternal`] implementation.
pub struct FutureImpl {
    core: ObjectCore,
    ready: AtomicBool,
    state: Mutex<FutureState>,
    cv: Condvar,
}

impl FutureImpl {
    /// Class UID of the default future implementation.
    pub const CLASS_UID: Uid = Uid::parse("371dfa91-1cf7-441e-b688-20d7e0114745");

    pub(crate) fn new() -> Self {
        Self {
            core: ObjectCore::new(),
            ready: AtomicBool::new(false),
            state: Mutex::new(FutureState {
                result: None,
                pending: Vec::new(),
            }),
            cv: Condvar::new(),
        }
    }

    /// Creates a fresh, unresolved future.
    pub fn create() -> FuturePtr {
        let obj = make_object(Self::new());
        interface_ptr_cast::<dyn Future, _>(&obj).expect("FutureImpl implements Future")
    }

    fn class_info_impl() -> &'static ClassInfo {
        static INFO: std::sync::LazyLock<ClassInfo> = std::sync::LazyLock::new(|| {
            ClassInfo::new(
                FutureImpl::CLASS_UID,
                "FutureImpl",
                vec![
                    InterfaceEntry::with_caster::<dyn Future>(
                        <dyn Future as InterfaceId>::INFO,
                        |o| {
                            o.as_any()
                                .downcast_ref::<FutureImpl>()
                                .map(|x| x as &dyn Future)
                        },
                    ),
                    InterfaceEntry::with_caster::<dyn FutureInternal>(
                        <dyn FutureInternal as InterfaceId>::INFO,
                        |o| {
                            o.as_any()
                                .downcast_ref::<FutureImpl>()
                                .map(|x| x as &dyn FutureInternal)
                        },
                    ),
                ],
                vec![],
            )
        });
        &INFO
    }

    fn fire_continuation(continuation: &(FunctionPtr, InvokeMode), result: Option<&AnyPtr>) {
        let (function, mode) = continuation;
        match mode {
            InvokeMode::Immediate => {
                match result {
                    Some(any) => function.invoke(&[&**any], InvokeMode::Immediate),
                    None => function.invoke(&[], InvokeMode::Immediate),
                };
            }
            InvokeMode::Deferred => {
                let args = match result {
                    Some(any) => DeferredArgs::capture(&[&**any]),
                    None => DeferredArgs::capture(&[]),
                };
                instance().queue_deferred_tasks(vec![DeferredTask {
                    target: function.clone(),
                    args: SharedPtr::new(args),
                }]);
            }
        }
    }
}

impl fmt::Debug for FutureImpl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FutureImpl")
            .field("ready", &self.is_ready())
            .finish_non_exhaustive()
    }
}

impl Interface for FutureImpl {
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
}

impl crate::object::ObjectClass for FutureImpl {
    fn class_info_static() -> &'static ClassInfo {
        Self::class_info_impl()
    }

    fn new_instance() -> Self {
        Self::new()
    }
}

impl Future for FutureImpl {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    fn wait(&self) {
        if self.is_ready() {
            return;
        }
        let mut guard = lock(&self.state);
        while !self.ready.load(Ordering::Relaxed) {
            guard = self
                .cv
                .wait(guard)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
        }
    }

    fn get_result(&self) -> Option<AnyPtr> {
        self.wait();
        lock(&self.state).result.clone()
    }

    fn add_continuation(&self, f: &FunctionPtr, mode: InvokeMode) {
        {
            let mut guard = lock(&self.state);
            if !self.ready.load(Ordering::Relaxed) {
                guard.pending.push((f.clone(), mode));
                return;
            }
        }
        // Already resolved; fire now.
        let result = lock(&self.state).result.clone();
        Self::fire_continuation(&(f.clone(), mode), result.as_ref());
    }

    fn then(&self, f: &FunctionPtr, mode: InvokeMode) -> Option<FuturePtr> {
        let chained = FutureImpl::create();
        let writer = interface_ptr_cast::<dyn FutureInternal, _>(&chained)?;
        let inner = f.clone();
        let wrapper = FunctionImpl::create_owned(move |args| {
            let result = inner.invoke(args, InvokeMode::Immediate);
            writer.set_result(result.as_deref());
            None
        });
        self.add_continuation(&wrapper, mode);
        Some(chained)
    }
}

impl FutureInternal for FutureImpl {
    fn set_result(&self, result: Option<&dyn AnyValue>) -> ReturnValue {
        let (stored, continuations) = {
            let mut guard = lock(&self.state);
            if self.ready.load(Ordering::Relaxed) {
                return ReturnValue::NothingToDo;
            }
            guard.result = result.and_then(|r| r.clone_any());
            self.ready.store(true, Ordering::Release);
            let pending = std::mem::take(&mut guard.pending);
            (guard.result.clone(), pending)
        };
        self.cv.notify_all();
        for continuation in &continuations {
            Self::fire_continuation(continuation, stored.as_ref());
        }
        ReturnValue::Success
    }
}

/// Null-safe write helper used by the typed promise API.
pub fn set_future_result(
    future: &FuturePtr,
    result: Option<&dyn AnyValue>,
) -> ReturnValue {
    match interface_cast::<dyn FutureInternal, _>(&**future) {
        Some(internal) => internal.set_result(result),
        None => ReturnValue::InvalidArgument,
    }
}
