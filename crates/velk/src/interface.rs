//! Interface identity and dispatch: the root [`Interface`] trait, per-class
//! cast tables, and the query helpers built on them.
//!
//! Classes without multiple inheritance model the original interface packs
//! as data: every class carries a flat, deduplicated `Uid -> caster` table
//! built once at first use. A caster recovers a concrete trait object from
//! the type-erased root reference, so `interface_cast` is a short linear
//! scan followed by a checked downcast.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::ptr::NonNull;
use std::sync::{LazyLock, Mutex};

use crate::member::MemberDesc;
use crate::memory::{SharedPtr, WeakPtr};
use crate::metadata::MemberCache;
use crate::object::{ObjectCore, StateSlot};
use crate::Uid;

/// Static descriptor for an interface: its UID and human-readable name.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InterfaceInfo {
    /// Unique identifier of the interface.
    pub uid: Uid,
    /// Interface name.
    pub name: &'static str,
}

/// Compile-time identity for a queryable interface trait object.
///
/// Implemented for `dyn Trait` types (`dyn Property`, `dyn Function`, …)
/// and for the function-hook traits generated by [`crate::interface!`].
pub trait InterfaceId {
    /// Unique identifier of the interface.
    const UID: Uid;
    /// Interface name.
    const NAME: &'static str;
    /// Combined descriptor.
    const INFO: InterfaceInfo = InterfaceInfo {
        uid: Self::UID,
        name: Self::NAME,
    };
}

/// Type-erased cast entry: recovers `&dyn I` from the root reference.
///
/// Stored behind `dyn Any` in the class table and recovered by downcast at
/// query time, which keeps the table layout independent of the interface
/// set.
pub struct Caster<I: ?Sized + 'static> {
    /// Pure pointer adjustment from the root reference to the target trait.
    pub cast: fn(&dyn Interface) -> Option<&I>,
}

impl<I: ?Sized + 'static> fmt::Debug for Caster<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Caster").finish_non_exhaustive()
    }
}

/// One row of a class's interface table.
pub struct InterfaceEntry {
    /// The interface this row answers for.
    pub info: InterfaceInfo,
    /// Caster to the interface's trait object; `None` for data-only
    /// interfaces that support membership queries but carry no methods.
    pub caster: Option<&'static (dyn Any + Send + Sync)>,
}

impl InterfaceEntry {
    /// Builds an entry with a caster to `dyn I`.
    pub fn with_caster<I: ?Sized + 'static>(
        info: InterfaceInfo,
        cast: fn(&dyn Interface) -> Option<&I>,
    ) -> Self {
        Self {
            info,
            caster: Some(Box::leak(Box::new(Caster { cast }))),
        }
    }

    /// Builds a membership-only entry.
    pub fn marker(info: InterfaceInfo) -> Self {
        Self { info, caster: None }
    }
}

impl fmt::Debug for InterfaceEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterfaceEntry")
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

/// Describes a registered class: identity, implemented interfaces
/// (including every ancestor reachable through parent chains), and static
/// member descriptors.
#[derive(Debug)]
pub struct ClassInfo {
    /// Unique identifier of the class.
    pub uid: Uid,
    /// Class name.
    pub name: &'static str,
    /// Deduplicated interface table; first occurrence wins.
    pub interfaces: Vec<InterfaceEntry>,
    /// Member descriptors collected from the class's interfaces,
    /// deduplicated by `(kind, name)`; first occurrence wins.
    pub members: Vec<MemberDesc>,
}

impl ClassInfo {
    /// Builds a class descriptor, deduplicating interfaces by UID and
    /// members by kind/name (first occurrence wins in both).
    pub fn new(
        uid: Uid,
        name: &'static str,
        interfaces: Vec<InterfaceEntry>,
        members: Vec<MemberDesc>,
    ) -> Self {
        let mut deduped_interfaces: Vec<InterfaceEntry> = Vec::with_capacity(interfaces.len());
        for entry in interfaces {
            if !deduped_interfaces.iter().any(|e| e.info.uid == entry.info.uid) {
                deduped_interfaces.push(entry);
            }
        }
        let mut deduped_members: Vec<MemberDesc> = Vec::with_capacity(members.len());
        for member in members {
            if !deduped_members
                .iter()
                .any(|m| m.kind == member.kind && m.name == member.name)
            {
                deduped_members.push(member);
            }
        }
        Self {
            uid,
            name,
            interfaces: deduped_interfaces,
            members: deduped_members,
        }
    }

    /// True if the class lists `uid` directly or through a parent chain.
    /// The all-zero root UID is implemented by every class.
    pub fn implements(&self, uid: Uid) -> bool {
        uid.is_nil() || self.interfaces.iter().any(|e| e.info.uid == uid)
    }
}

/// Root contract for every runtime object.
///
/// Gives access to class identity, the object core (self pointer + flags),
/// and the optional metadata capabilities overridden by
/// [`crate::object_class!`]-generated classes.
pub trait Interface: Any + Send + Sync {
    /// Static descriptor of the object's class.
    fn class_info(&self) -> &'static ClassInfo;

    /// The object's core record (self pointer, flags).
    fn core(&self) -> &ObjectCore;

    /// Upcast for downcasting through [`std::any::Any`].
    fn as_any(&self) -> &dyn Any;

    /// Upcast to the root trait object.
    fn as_interface(&self) -> &dyn Interface;

    /// State cell for the given interface UID, if this object carries
    /// inline property state.
    fn property_state(&self, interface: Uid) -> Option<&dyn StateSlot> {
        let _ = interface;
        None
    }

    /// Lazily-populated runtime member cache, if this object carries
    /// metadata members.
    fn member_cache(&self) -> Option<&MemberCache> {
        None
    }
}

impl dyn Interface {
    /// UID of the object's class.
    pub fn class_uid(&self) -> Uid {
        self.class_info().uid
    }

    /// Name of the object's class.
    pub fn class_name(&self) -> &'static str {
        self.class_info().name
    }

    /// True if the object's class lists `uid` directly or transitively.
    pub fn implements(&self, uid: Uid) -> bool {
        self.class_info().implements(uid)
    }

    /// Returns a shared pointer to this object, or `None` if it is being
    /// destroyed (or was never shared).
    pub fn get_self(&self) -> Option<SharedPtr<dyn Interface>> {
        self.core().self_ptr()
    }

    /// Returns a weak pointer to this object.
    pub fn get_self_weak(&self) -> WeakPtr<dyn Interface> {
        self.core().self_weak()
    }
}

/// Resolves `uid` to the matching caster and applies it.
fn cast_in_table<'a, I>(obj: &'a dyn Interface, uid: Uid) -> Option<&'a I>
where
    I: ?Sized + 'static,
{
    let info = obj.class_info();
    let entry = info.interfaces.iter().find(|e| e.info.uid == uid)?;
    let caster = entry.caster?.downcast_ref::<Caster<I>>()?;
    (caster.cast)(obj)
}

/// Returns the requested interface of `obj`, or `None` if its class does
/// not implement it.
pub fn interface_cast<'a, I, S>(obj: &'a S) -> Option<&'a I>
where
    I: ?Sized + InterfaceId + 'static,
    S: ?Sized + Interface,
{
    cast_in_table::<I>(obj.as_interface(), I::UID)
}

/// Aliasing pointer cast: a shared pointer to the requested interface that
/// shares `obj`'s control block.
pub fn interface_ptr_cast<I, S>(obj: &SharedPtr<S>) -> Option<SharedPtr<I>>
where
    I: ?Sized + InterfaceId + 'static,
    S: ?Sized + Interface,
{
    let target: &I = interface_cast::<I, S>(&**obj)?;
    // The target reference aliases obj's allocation; the cloned shares keep
    // it alive for the new pointer's lifetime.
    let raw = NonNull::from(target);
    Some(unsafe { obj.clone().with_ptr(raw) })
}

/// Derives the UID for a Rust type from its fully-qualified name.
pub fn type_uid<T: ?Sized + 'static>() -> Uid {
    Uid::from_name(std::any::type_name::<T>())
}

/// Declares an interface contract: a marker type with identity, a parent
/// link, an inline state struct, and static member descriptors.
///
/// Implemented by [`crate::interface!`]-generated markers and by
/// [`RootInterface`].
pub trait InterfaceDecl: 'static {
    /// Unique identifier of the interface.
    const UID: Uid;
    /// Interface name.
    const NAME: &'static str;
    /// Combined descriptor.
    const INFO: InterfaceInfo = InterfaceInfo {
        uid: Self::UID,
        name: Self::NAME,
    };
    /// Inline per-object state struct declared by this interface.
    type State: Default + Send + 'static;

    /// Appends this interface's member descriptors (and its ancestors')
    /// to `out`.
    fn append_members(out: &mut Vec<MemberDesc>);
}

/// Terminal parent of every interface chain. Carries no state or members;
/// its UID is the reserved all-zero root identifier.
#[derive(Debug)]
pub struct RootInterface;

impl InterfaceDecl for RootInterface {
    const UID: Uid = Uid::NIL;
    const NAME: &'static str = "IInterface";
    type State = ();

    fn append_members(_out: &mut Vec<MemberDesc>) {}
}

impl RootInterface {
    /// Root terminator for the generated entry-collection chain.
    pub fn append_entries<C: Interface>(_out: &mut Vec<InterfaceEntry>) {}
}

// --- Class info cache for generic classes ---

type InfoMap = HashMap<TypeId, &'static ClassInfo>;

static GENERIC_CLASS_INFOS: LazyLock<Mutex<InfoMap>> = LazyLock::new(|| Mutex::new(HashMap::new()));

/// Returns the interned `ClassInfo` for generic class `T`, building it on
/// first request.
///
/// Rust has no per-monomorphization statics, so generic classes
/// (`OwnedAny<T>` and friends) lease their descriptor from this
/// `TypeId`-keyed cache; entries live for the process lifetime.
pub fn class_info_for<T: 'static>(build: fn() -> ClassInfo) -> &'static ClassInfo {
    let mut map = crate::util::lock(&GENERIC_CLASS_INFOS);
    map.entry(TypeId::of::<T>())
        .or_insert_with(|| Box::leak(Box::new(build())))
}
