//! Callback: an owned function object wrapping a closure, usable as a
//! handler, a continuation, or a standalone deferred callable.

use std::fmt;

use crate::any::{AnyPtr, FnArgs, ValueType};
use crate::function::{Function as _, FunctionImpl, FunctionPtr};
use crate::{InvokeMode, ReturnValue};

/// Owns a function object driven by a closure.
///
/// Converts into [`FunctionPtr`] wherever a handler is expected:
///
/// ```ignore
/// let hits = Arc::new(AtomicU32::new(0));
/// let cb = Callback::new({
///     let hits = hits.clone();
///     move |_args| {
///         hits.fetch_add(1, Ordering::Relaxed);
///         None
///     }
/// });
/// event.add_handler(cb.function(), InvokeMode::Immediate);
/// ```
pub struct Callback {
    function: FunctionPtr,
}

impl Callback {
    /// Wraps a closure receiving the raw argument view.
    pub fn new(callback: impl Fn(FnArgs<'_>) -> Option<AnyPtr> + Send + Sync + 'static) -> Self {
        Self {
            function: FunctionImpl::create_owned(callback),
        }
    }

    /// Wraps a closure that ignores arguments and returns nothing.
    pub fn from_fn(callback: impl Fn() + Send + Sync + 'static) -> Self {
        Self::new(move |_| {
            callback();
            None
        })
    }

    /// Wraps a closure taking one typed argument. Missing or mismatched
    /// arguments substitute the type default.
    pub fn typed<A: ValueType>(callback: impl Fn(A) + Send + Sync + 'static) -> Self {
        Self::new(move |args| {
            callback(crate::any::extract_arg::<A>(args.first().copied()));
            None
        })
    }

    /// Wraps a closure mapping one typed argument to a typed result.
    pub fn map<A: ValueType, R: ValueType>(
        callback: impl Fn(A) -> R + Send + Sync + 'static,
    ) -> Self {
        Self::new(move |args| {
            let result = callback(crate::any::extract_arg::<A>(args.first().copied()));
            Some(crate::value::OwnedAny::<R>::boxed(result))
        })
    }

    /// The wrapped function object.
    pub fn function(&self) -> &FunctionPtr {
        &self.function
    }

    /// Invokes the callback.
    pub fn invoke(&self, args: FnArgs<'_>, mode: InvokeMode) -> Option<AnyPtr> {
        self.function.invoke(args, mode)
    }

    /// Invokes the callback with no arguments.
    pub fn call(&self, mode: InvokeMode) -> ReturnValue {
        self.function.invoke_event(&[], mode)
    }
}

impl From<Callback> for FunctionPtr {
    fn from(callback: Callback) -> Self {
        callback.function
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callback").finish_non_exhaustive()
    }
}
