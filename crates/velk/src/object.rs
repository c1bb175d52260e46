//! Object plumbing: the per-object core record, inline state cells, object
//! factories, and heap construction of shared objects.

use std::alloc::Layout;
use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, OnceLock};

use crate::interface::{Interface, InterfaceDecl};
use crate::memory::{ControlBlock, SharedPtr, WeakPtr};
use crate::{ClassInfo, ObjectFlags};

/// Per-object core record: the weak self pointer wired at construction and
/// the object's flag word.
pub struct ObjectCore {
    self_weak: OnceLock<WeakPtr<dyn Interface>>,
    flags: AtomicU32,
}

impl ObjectCore {
    /// Creates an unwired core. [`make_object`] (or a hive factory) wires
    /// the self pointer before the object is handed out.
    pub fn new() -> Self {
        Self {
            self_weak: OnceLock::new(),
            flags: AtomicU32::new(0),
        }
    }

    /// The object's flags.
    pub fn flags(&self) -> ObjectFlags {
        ObjectFlags::from_bits_truncate(self.flags.load(Ordering::Acquire))
    }

    /// Replaces the object's flags.
    pub fn set_flags(&self, flags: ObjectFlags) {
        self.flags.store(flags.bits(), Ordering::Release);
    }

    /// Sets the given flag bits, keeping the others.
    pub fn add_flags(&self, flags: ObjectFlags) {
        self.flags.fetch_or(flags.bits(), Ordering::AcqRel);
    }

    /// A shared pointer to the owning object, or `None` while it is being
    /// destroyed.
    pub fn self_ptr(&self) -> Option<SharedPtr<dyn Interface>> {
        self.self_weak.get()?.lock()
    }

    /// A weak pointer to the owning object (empty if never wired).
    pub fn self_weak(&self) -> WeakPtr<dyn Interface> {
        self.self_weak.get().cloned().unwrap_or_default()
    }

    /// Wires the self pointer. Only the first call takes effect.
    pub(crate) fn attach_self(&self, weak: WeakPtr<dyn Interface>) {
        let _ = self.self_weak.set(weak);
    }
}

impl Default for ObjectCore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ObjectCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectCore")
            .field("flags", &self.flags())
            .finish_non_exhaustive()
    }
}

/// Type-erased handle to an interface's inline state cell.
pub trait StateSlot: Send + Sync {
    /// Downcast access to the concrete [`StateCell`].
    fn as_any(&self) -> &dyn Any;
}

/// Mutex-guarded inline storage for one interface's state struct.
///
/// Property any-refs and the state read/write API resolve to the cell at
/// access time; the cell never moves after the owning object is
/// constructed.
pub struct StateCell<S> {
    inner: Mutex<S>,
}

impl<S: Default> StateCell<S> {
    /// Creates a cell holding the state's default values.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(S::default()),
        }
    }
}

impl<S: Default> Default for StateCell<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> StateCell<S> {
    /// Runs `f` with exclusive access to the state.
    pub fn with<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        f(&mut crate::util::lock(&self.inner))
    }
}

impl<S: Send + 'static> StateSlot for StateCell<S> {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl<S> fmt::Debug for StateCell<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateCell").finish_non_exhaustive()
    }
}

/// Runs `f` with the state struct of interface `I` on `obj`, if present.
pub fn with_state<I, R>(obj: &dyn Interface, f: impl FnOnce(&mut I::State) -> R) -> Option<R>
where
    I: InterfaceDecl,
{
    let slot = obj.property_state(I::UID)?;
    let cell = slot.as_any().downcast_ref::<StateCell<I::State>>()?;
    Some(cell.with(f))
}

/// Creates instances of one class, on the heap or in place inside a hive
/// page.
pub trait ObjectFactory: Send + Sync {
    /// Descriptor of the produced class.
    fn class_info(&self) -> &'static ClassInfo;

    /// Heap-allocates a new instance with its self pointer wired.
    fn create(&self) -> Option<SharedPtr<dyn Interface>>;

    /// Size and alignment of one instance, for slab allocation.
    fn instance_layout(&self) -> Layout;

    /// Constructs an instance at `slot`, wiring its self pointer against
    /// `block`, and returns the object pointer.
    ///
    /// # Safety
    /// `slot` must be valid, writable storage satisfying
    /// [`Self::instance_layout`]; `block` must be an initialised control
    /// block with one spare weak share the object's self pointer can adopt.
    unsafe fn construct_in_place(
        &self,
        slot: *mut u8,
        block: *mut ControlBlock,
    ) -> NonNull<dyn Interface>;

    /// Runs the destructor of the instance at `slot` without freeing the
    /// storage.
    ///
    /// # Safety
    /// `slot` must hold a live instance previously produced by
    /// [`Self::construct_in_place`].
    unsafe fn destroy_in_place(&self, slot: *mut u8);

    /// Reinterprets an occupied slot as an object reference.
    ///
    /// # Safety
    /// `slot` must hold a live instance of this factory's class, and the
    /// caller must guarantee the instance outlives the returned reference.
    unsafe fn object_at<'a>(&self, slot: *mut u8) -> &'a dyn Interface;
}

impl fmt::Debug for dyn ObjectFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectFactory")
            .field("class", &self.class_info().name)
            .finish()
    }
}

/// Implemented by concrete classes usable with the generic [`ClassFactory`]
/// (all classes produced by [`crate::object_class!`], plus the built-in
/// runtime types).
pub trait ObjectClass: Interface + Sized {
    /// Static descriptor shared by every instance.
    fn class_info_static() -> &'static ClassInfo;

    /// Creates a fresh, default-initialised instance.
    fn new_instance() -> Self;
}

/// Heap-allocates an object and wires its self pointer.
pub fn make_object<T: Interface>(value: T) -> SharedPtr<dyn Interface> {
    let shared = SharedPtr::new(value);
    let raw: *mut dyn Interface = shared.as_ptr();
    // Unsize to the root trait object; the block is unchanged.
    let obj: SharedPtr<dyn Interface> =
        unsafe { shared.with_ptr(NonNull::new_unchecked(raw)) };
    obj.core().attach_self(WeakPtr::from(&obj));
    obj
}

/// Generic factory for [`ObjectClass`] types.
pub struct ClassFactory<C> {
    _class: PhantomData<fn() -> C>,
}

impl<C> ClassFactory<C> {
    /// Creates the factory.
    pub fn new() -> Self {
        Self {
            _class: PhantomData,
        }
    }
}

impl<C> Default for ClassFactory<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> fmt::Debug for ClassFactory<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassFactory").finish_non_exhaustive()
    }
}

impl<C: ObjectClass> ObjectFactory for ClassFactory<C> {
    fn class_info(&self) -> &'static ClassInfo {
        C::class_info_static()
    }

    fn create(&self) -> Option<SharedPtr<dyn Interface>> {
        Some(make_object(C::new_instance()))
    }

    fn instance_layout(&self) -> Layout {
        Layout::new::<C>()
    }

    unsafe fn construct_in_place(
        &self,
        slot: *mut u8,
        block: *mut ControlBlock,
    ) -> NonNull<dyn Interface> {
        let typed = slot.cast::<C>();
        typed.write(C::new_instance());
        let fat: *mut dyn Interface = typed;
        let object = NonNull::new_unchecked(fat);
        // The self pointer adopts one extra weak share on the embedded
        // block; it is released when the object is destroyed.
        (*block).add_weak();
        let weak =
            WeakPtr::from_parts_adopt(object, NonNull::new_unchecked(block));
        (*typed).core().attach_self(weak);
        object
    }

    unsafe fn destroy_in_place(&self, slot: *mut u8) {
        std::ptr::drop_in_place(slot.cast::<C>());
    }

    unsafe fn object_at<'a>(&self, slot: *mut u8) -> &'a dyn Interface {
        &*slot.cast::<C>()
    }
}
