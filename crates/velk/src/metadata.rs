//! Runtime metadata: lazy materialisation of property/event/function
//! instances from the static member descriptors in a class's
//! [`ClassInfo`](crate::ClassInfo).

use std::fmt;
use std::sync::Mutex;

use crate::function::{Function, FunctionImpl, FunctionPtr};
use crate::interface::{interface_cast, interface_ptr_cast, Interface, InterfaceDecl};
use crate::member::{MemberDesc, MemberKind};
use crate::memory::SharedPtr;
use crate::property::{PropertyImpl, PropertyInternal, PropertyPtr};
use crate::util::lock;
use crate::{InvokeMode, ReturnValue, Uid};

/// A materialised runtime member.
#[derive(Clone)]
enum CachedMember {
    Property(PropertyPtr),
    Function(FunctionPtr),
}

/// Lazily-populated cache of runtime member instances, held inline by
/// every metadata-bearing object. Entries are keyed by member index into
/// the class's descriptor list and created on first lookup.
pub struct MemberCache {
    entries: Mutex<Vec<(usize, CachedMember)>>,
}

impl MemberCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }
}

impl Default for MemberCache {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MemberCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemberCache")
            .field("materialized", &lock(&self.entries).len())
            .finish()
    }
}

/// Builds the runtime instance for one descriptor.
fn materialize(owner: &dyn Interface, desc: &MemberDesc) -> Option<CachedMember> {
    match desc.kind {
        MemberKind::Property => {
            let property = PropertyImpl::create();
            let internal = interface_cast::<dyn PropertyInternal, _>(&*property)?;
            let bind = desc.property.as_ref()?;
            // Prefer an any-ref into the owner's inline state; fall back to
            // a clone of the declared default.
            let backing = (bind.state_ref)(owner).or_else(|| (bind.default_value)());
            internal.set_any(backing?);
            if !bind.flags.is_empty() {
                internal.set_flags(bind.flags);
            }
            Some(CachedMember::Property(property))
        }
        MemberKind::Event | MemberKind::Function => {
            let function = FunctionImpl::create();
            if let Some(bind) = desc.function.as_ref() {
                if let Some(trampoline) = bind.trampoline {
                    let internal =
                        interface_cast::<dyn crate::function::FunctionInternal, _>(&*function)?;
                    internal.bind(owner.get_self_weak(), trampoline);
                }
            }
            Some(CachedMember::Function(function))
        }
    }
}

fn find_or_create(owner: &dyn Interface, name: &str, kind: MemberKind) -> Option<CachedMember> {
    let cache = owner.member_cache()?;
    let members = &owner.class_info().members;
    let mut entries = lock(&cache.entries);
    if let Some((_, cached)) = entries
        .iter()
        .find(|(index, _)| members[*index].kind == kind && members[*index].name == name)
    {
        return Some(cached.clone());
    }
    let (index, desc) = members
        .iter()
        .enumerate()
        .find(|(_, m)| m.kind == kind && m.name == name)?;
    let created = materialize(owner, desc)?;
    entries.push((index, created.clone()));
    Some(created)
}

impl dyn Interface {
    /// Static member descriptors of the object's class.
    pub fn static_metadata(&self) -> &'static [MemberDesc] {
        &self.class_info().members
    }

    /// The runtime property instance for the named member, created on
    /// first access.
    pub fn get_property(&self, name: &str) -> Option<PropertyPtr> {
        match find_or_create(self, name, MemberKind::Property)? {
            CachedMember::Property(p) => Some(p),
            CachedMember::Function(_) => None,
        }
    }

    /// The runtime event instance for the named member.
    pub fn get_event(&self, name: &str) -> Option<FunctionPtr> {
        match find_or_create(self, name, MemberKind::Event)? {
            CachedMember::Function(f) => Some(f),
            CachedMember::Property(_) => None,
        }
    }

    /// The runtime function instance for the named member.
    pub fn get_function(&self, name: &str) -> Option<FunctionPtr> {
        match find_or_create(self, name, MemberKind::Function)? {
            CachedMember::Function(f) => Some(f),
            CachedMember::Property(_) => None,
        }
    }

    /// Re-fires `on_changed` on every materialised property declared by
    /// the given interface. Used after direct state writes.
    pub fn notify_changed(&self, interface: Uid) {
        let Some(cache) = self.member_cache() else {
            return;
        };
        let members = &self.class_info().members;
        let materialized: Vec<CachedMember> = {
            let entries = lock(&cache.entries);
            entries
                .iter()
                .filter(|(index, _)| members[*index].interface.uid == interface)
                .map(|(_, cached)| cached.clone())
                .collect()
        };
        for cached in materialized {
            if let CachedMember::Property(property) = cached {
                if let Some(internal) = interface_cast::<dyn PropertyInternal, _>(&*property) {
                    internal.notify_changed();
                }
            }
        }
    }
}

/// Null-safe property lookup.
pub fn get_property(obj: Option<&dyn Interface>, name: &str) -> Option<PropertyPtr> {
    obj?.get_property(name)
}

/// Null-safe event lookup.
pub fn get_event(obj: Option<&dyn Interface>, name: &str) -> Option<FunctionPtr> {
    obj?.get_event(name)
}

/// Null-safe function lookup.
pub fn get_function(obj: Option<&dyn Interface>, name: &str) -> Option<FunctionPtr> {
    obj?.get_function(name)
}

/// Invokes a named function member on `obj`.
pub fn invoke_function(
    obj: &dyn Interface,
    name: &str,
    args: crate::FnArgs<'_>,
) -> Option<crate::AnyPtr> {
    obj.get_function(name)?.invoke(args, InvokeMode::Immediate)
}

/// Invokes a named event member on `obj`.
pub fn invoke_event(obj: &dyn Interface, name: &str, args: crate::FnArgs<'_>) -> ReturnValue {
    match obj.get_event(name) {
        Some(event) => event.invoke_event(args, InvokeMode::Immediate),
        None => ReturnValue::InvalidArgument,
    }
}

/// Reads interface `I`'s state on `obj` through a closure.
pub fn read_state<I, R>(obj: &dyn Interface, f: impl FnOnce(&I::State) -> R) -> Option<R>
where
    I: InterfaceDecl,
{
    crate::object::with_state::<I, R>(obj, |state| f(state))
}

/// Writes interface `I`'s state on `obj` through a closure and fires the
/// interface's change notifications.
///
/// `Immediate` runs synchronously; `Deferred` queues the closure as a
/// deferred task, silently skipped if the object is destroyed before the
/// next update tick.
pub fn write_state<I>(
    obj: &dyn Interface,
    f: impl FnOnce(&mut I::State) + Send + Sync + 'static,
    mode: InvokeMode,
) -> ReturnValue
where
    I: InterfaceDecl,
{
    match mode {
        InvokeMode::Immediate => {
            if crate::object::with_state::<I, ()>(obj, f).is_none() {
                return ReturnValue::Fail;
            }
            obj.notify_changed(I::UID);
            ReturnValue::Success
        }
        InvokeMode::Deferred => {
            let weak = obj.get_self_weak();
            if weak.expired() {
                return ReturnValue::Fail;
            }
            let closure = std::sync::Mutex::new(Some(f));
            let callback = FunctionImpl::create_owned(move |_args| {
                let target = weak.lock()?;
                let f = lock(&closure).take()?;
                crate::object::with_state::<I, ()>(&*target, f)?;
                target.notify_changed(I::UID);
                None
            });
            crate::runtime::instance().queue_deferred_tasks(vec![crate::runtime::DeferredTask {
                target: callback,
                args: SharedPtr::new(crate::runtime::DeferredArgs::empty()),
            }]);
            ReturnValue::Success
        }
    }
}

/// Returns `obj`'s shared self pointer cast to interface pointer `I`.
pub fn get_self_as<I>(obj: &dyn Interface) -> Option<SharedPtr<I>>
where
    I: ?Sized + crate::interface::InterfaceId + 'static,
{
    let this = obj.get_self()?;
    interface_ptr_cast::<I, _>(&this)
}
