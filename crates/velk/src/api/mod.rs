//! Typed convenience surface over the runtime interfaces: property and
//! member handles, callbacks, and the promise side of futures.

pub use self::callback::Callback;
pub use self::future::{Promise, TypedFuture};
pub use self::property::{ArrayProperty, ConstProperty, EventHandle, FunctionHandle, Property};

mod callback;
mod future;
mod property;
