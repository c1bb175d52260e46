//! Static member descriptors: the compile-time description of an
//! interface's properties, events, and functions, surfaced at runtime
//! through [`ClassInfo::members`](crate::ClassInfo::members).

use crate::any::{AnyPtr, FnArgs};
use crate::interface::{Interface, InterfaceInfo};
use crate::{ObjectFlags, Uid};

/// Discriminator for the kind of member described by a [`MemberDesc`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemberKind {
    /// An observable value.
    Property,
    /// A broadcast with no primary target.
    Event,
    /// A callable with an optional primary target.
    Function,
}

/// Routes an untyped `(owner, args)` call into a typed method on the
/// interface that declared the member.
pub type Trampoline = fn(&dyn Interface, FnArgs<'_>) -> Option<AnyPtr>;

/// Builds an any-ref into the owner's inline state for this member, or
/// `None` when the owner carries no state for the declaring interface.
pub type StateRefFn = fn(&dyn Interface) -> Option<AnyPtr>;

/// Provides a freshly-cloned default value for a property member.
pub type DefaultFn = fn() -> Option<AnyPtr>;

/// Kind-specific data for property members.
#[derive(Debug)]
pub struct PropertyBind {
    /// UID of the property's value type.
    pub type_uid: Uid,
    /// Produces an owned any holding the declared default.
    pub default_value: DefaultFn,
    /// Produces an any-ref targeting the member inside the owner's state.
    pub state_ref: StateRefFn,
    /// Flags applied to the materialised property (e.g. read-only).
    pub flags: ObjectFlags,
}

/// Describes a single argument of a typed function.
#[derive(Clone, Copy, Debug)]
pub struct FnArgDesc {
    /// Parameter name.
    pub name: &'static str,
    /// UID of the parameter type.
    pub type_uid: Uid,
}

/// Kind-specific data for function and event members.
#[derive(Debug)]
pub struct FunctionBind {
    /// Trampoline bound to the owner when the member is materialised;
    /// `None` for events and unbound functions.
    pub trampoline: Option<Trampoline>,
    /// Typed argument descriptors; empty for zero-arg and raw functions.
    pub args: Vec<FnArgDesc>,
}

/// Describes one member (property, event, or function) declared by an
/// interface.
#[derive(Debug)]
pub struct MemberDesc {
    /// Member name used for runtime lookup.
    pub name: &'static str,
    /// Member kind.
    pub kind: MemberKind,
    /// Interface that declared this member.
    pub interface: InterfaceInfo,
    /// Property extension; set when `kind == Property`.
    pub property: Option<PropertyBind>,
    /// Function extension; set when `kind` is `Function` or `Event`.
    pub function: Option<FunctionBind>,
}

impl MemberDesc {
    /// Creates a property descriptor.
    pub fn property(name: &'static str, interface: InterfaceInfo, bind: PropertyBind) -> Self {
        Self {
            name,
            kind: MemberKind::Property,
            interface,
            property: Some(bind),
            function: None,
        }
    }

    /// Creates an event descriptor.
    pub fn event(name: &'static str, interface: InterfaceInfo) -> Self {
        Self {
            name,
            kind: MemberKind::Event,
            interface,
            property: None,
            function: Some(FunctionBind {
                trampoline: None,
                args: Vec::new(),
            }),
        }
    }

    /// Creates a function descriptor.
    pub fn function(name: &'static str, interface: InterfaceInfo, bind: FunctionBind) -> Self {
        Self {
            name,
            kind: MemberKind::Function,
            interface,
            property: None,
            function: Some(bind),
        }
    }
}
