//! # Velk Component Runtime
//!
//! An in-process runtime for building applications out of polymorphic
//! objects whose properties, events, and functions are introspectable at
//! runtime and uniformly wired to change notification and deferred
//! dispatch.
//!
//! The pieces:
//!
//! - **Identity**: 128-bit [`Uid`]s, parsed from UUID literals or hashed
//!   from names, identify interfaces, classes, and plugins.
//! - **Memory**: [`SharedPtr`]/[`WeakPtr`] over pooled control blocks; the
//!   object [hive](crate::hive) embeds control blocks in its pages so
//!   removed objects survive on outstanding references.
//! - **Introspection**: [`interface!`] declares an interface contract
//!   (inline state, member descriptors, typed accessors);
//!   [`object_class!`] declares a concrete class with a data-driven cast
//!   table queried through [`interface_cast`].
//! - **Members**: [`Property`](crate::property::Property) values with
//!   change events, [`Function`](crate::function::Function)s and events
//!   with immediate/deferred handler dispatch,
//!   [`Future`](crate::future::Future)/promise result cells.
//! - **Composition**: the [type registry](crate::registry::TypeRegistry),
//!   [plugin registry](crate::plugin::PluginRegistry), and the
//!   [update loop](crate::runtime::Velk::update) reached through
//!   [`instance`].
//!
//! ```no_run
//! use velk::instance;
//!
//! velk::interface! {
//!     pub interface ICounter {
//!         properties {
//!             count: i64 = 0;
//!         }
//!         events {
//!             on_reset;
//!         }
//!     }
//! }
//!
//! velk::object_class! {
//!     pub class Counter {
//!         implements: [ICounter],
//!     }
//! }
//!
//! instance().register_type::<Counter>();
//! let counter = instance().create(Counter::CLASS_UID).unwrap();
//! ICounter::count(&*counter).set_value(41);
//! assert_eq!(ICounter::count(&*counter).get_value(), 41);
//! ```

pub use velk_interface as interface_types;
pub use velk_interface::{
    failed, format_version, pack_version, succeeded, version_major, version_minor, version_patch,
    Duration, InvokeMode, LogLevel, LogSink, ObjectFlags, ReturnValue, Uid, UidParseError,
};

pub use self::any::{
    compatible_type, extract_arg, is_compatible, AnyPtr, AnyValue, ArrayValue, ExternalAny,
    FnArgs, ValueType,
};
pub use self::function::{Function, FunctionInternal, FunctionPtr, OwnedCallable, RawCallable};
pub use self::future::{set_future_result, Future, FutureInternal, FuturePtr};
pub use self::hive::{for_each_state, HiveStore, ObjectHive, RawHive};
pub use self::interface::{
    class_info_for, interface_cast, interface_ptr_cast, type_uid, Caster, ClassInfo, Interface,
    InterfaceDecl, InterfaceEntry, InterfaceId, InterfaceInfo, RootInterface,
};
pub use self::member::{
    FnArgDesc, FunctionBind, MemberDesc, MemberKind, PropertyBind, Trampoline,
};
pub use self::memory::{ControlBlock, SharedPtr, WeakPtr};
pub use self::metadata::{
    get_event, get_function, get_property, get_self_as, invoke_event, invoke_function, read_state,
    write_state, MemberCache,
};
pub use self::object::{
    make_object, with_state, ClassFactory, ObjectClass, ObjectCore, ObjectFactory, StateCell,
    StateSlot,
};
pub use self::plugin::{
    Plugin, PluginConfig, PluginDep, PluginInfo, PluginInfoFn, PluginPtr, PluginRegistry,
};
pub use self::property::{Property, PropertyInternal, PropertyPtr};
pub use self::registry::TypeRegistry;
pub use self::runtime::{
    instance, DeferredArgs, DeferredPropertySet, DeferredTask, UpdateInfo, Velk,
};
pub use self::value::{ArrayAnyValue, ArrayStateRefAny, OwnedAny, StateRefAny};

#[doc(hidden)]
pub use paste::paste as __paste;

pub mod api;
pub mod hive;
pub mod log;

mod any;
mod function;
mod future;
mod interface;
mod macros;
mod member;
mod memory;
mod metadata;
mod object;
mod plugin;
mod property;
mod registry;
mod runtime;
mod util;
mod value;

/// Class identifiers of the built-in runtime types, registered by the
/// root runtime at construction.
pub mod class_id {
    use crate::Uid;

    /// Default property implementation.
    pub const PROPERTY: Uid = crate::property::PropertyImpl::CLASS_UID;
    /// Default function implementation.
    pub const FUNCTION: Uid = crate::function::FunctionImpl::CLASS_UID;
    /// Default event implementation (same object as [`FUNCTION`]).
    pub const EVENT: Uid = FUNCTION;
    /// Default future implementation.
    pub const FUTURE: Uid = crate::future::FutureImpl::CLASS_UID;
    /// Hive store.
    pub const HIVE_STORE: Uid = crate::hive::HiveStoreImpl::CLASS_UID;
    /// Object hive.
    pub const OBJECT_HIVE: Uid = crate::hive::ObjectHiveImpl::CLASS_UID;
    /// Raw hive.
    pub const RAW_HIVE: Uid = crate::hive::RawHiveImpl::CLASS_UID;
}

pub use self::function::FunctionImpl;
pub use self::future::FutureImpl;
pub use self::hive::{HiveStoreImpl, ObjectHiveImpl, RawHiveImpl};
pub use self::property::PropertyImpl;
