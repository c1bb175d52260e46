//! Promise / typed future: the write side of a result cell and typed
//! continuation chaining.

use std::fmt;
use std::marker::PhantomData;

use crate::any::ValueType;
use crate::future::{set_future_result, Future, FutureImpl, FuturePtr};
use crate::value::OwnedAny;
use crate::{InvokeMode, ReturnValue};

use super::Callback;

/// Write side of a future. Dropping the promise without resolving leaves
/// the future pending forever (holders keep it alive; continuations never
/// fire).
pub struct Promise {
    future: FuturePtr,
}

impl Promise {
    /// Creates a fresh promise/future pair.
    pub fn new() -> Self {
        Self {
            future: FutureImpl::create(),
        }
    }

    /// The read side as an untyped future.
    pub fn future(&self) -> FuturePtr {
        self.future.clone()
    }

    /// The read side as a typed future.
    pub fn typed_future<T: ValueType>(&self) -> TypedFuture<T> {
        TypedFuture::new(self.future.clone())
    }

    /// Resolves with a typed value. Only the first resolution succeeds.
    pub fn set_value<T: ValueType>(&self, value: T) -> ReturnValue {
        set_future_result(&self.future, Some(&*OwnedAny::<T>::boxed(value)))
    }

    /// Resolves with no value.
    pub fn set_empty(&self) -> ReturnValue {
        set_future_result(&self.future, None)
    }
}

impl Default for Promise {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Promise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("ready", &self.future.is_ready())
            .finish()
    }
}

/// Typed view over a future's result and continuation chain.
pub struct TypedFuture<T: ValueType> {
    future: FuturePtr,
    _value: PhantomData<fn() -> T>,
}

impl<T: ValueType> TypedFuture<T> {
    /// Wraps an untyped future.
    pub fn new(future: FuturePtr) -> Self {
        Self {
            future,
            _value: PhantomData,
        }
    }

    /// The underlying untyped future.
    pub fn future(&self) -> &FuturePtr {
        &self.future
    }

    /// True once resolved.
    pub fn is_ready(&self) -> bool {
        self.future.is_ready()
    }

    /// Blocks until resolved.
    pub fn wait(&self) {
        self.future.wait();
    }

    /// Blocks until resolved, then returns the typed result. `None` for a
    /// valueless resolution or a type mismatch.
    pub fn get(&self) -> Option<T> {
        self.future.get_result()?.value::<T>()
    }

    /// Chains a typed continuation; the returned future resolves with its
    /// result after this one resolves.
    pub fn then<R: ValueType>(
        &self,
        f: impl Fn(T) -> R + Send + Sync + 'static,
        mode: InvokeMode,
    ) -> TypedFuture<R> {
        let callback = Callback::map::<T, R>(f);
        match self.future.then(callback.function(), mode) {
            Some(chained) => TypedFuture::new(chained),
            // The chained write side could not be created; surface a
            // future that never resolves rather than panicking.
            None => TypedFuture::new(FutureImpl::create()),
        }
    }

    /// Registers a continuation receiving the typed result.
    pub fn on_ready(&self, f: impl Fn(T) + Send + Sync + 'static, mode: InvokeMode) {
        let callback = Callback::typed::<T>(f);
        self.future.add_continuation(callback.function(), mode);
    }
}

impl<T: ValueType> fmt::Debug for TypedFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedFuture")
            .field("ready", &self.is_ready())
            .finish()
    }
}
