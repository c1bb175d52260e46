//! The object hive: a page-allocated pool of reference-counted objects of
//! a single class, with dense iteration and zombie survival.

use std::cell::UnsafeCell;
use std::fmt;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use crate::interface::{
    interface_ptr_cast, Interface, InterfaceDecl, InterfaceEntry, InterfaceId,
};
use crate::memory::SharedPtr;
use crate::object::{make_object, ObjectClass, ObjectCore, ObjectFactory, StateCell};
use crate::util::{read, write};
use crate::{ClassInfo, ObjectFlags, ReturnValue, Uid};

use super::page::HivePage;
use super::{page_capacity, prefetch_line, SlotState};

/// A pool of objects of one class, packed into pages for iteration.
///
/// Removed objects survive as zombies while external strong references
/// remain; their slots are reclaimed when the last reference drops. A hive
/// destroyed while zombies (or weakly-observed dead slots) remain orphans
/// the affected pages, and the last survivor frees the page memory.
pub trait ObjectHive: Interface {
    /// Configures the hive for a registered element class. Answers
    /// [`ReturnValue::Fail`] for an unknown class UID.
    fn initialize(&self, element: Uid) -> ReturnValue;

    /// UID of the element class.
    fn element_uid(&self) -> Uid;

    /// Number of active (hive-visible) objects.
    fn len(&self) -> usize;

    /// True when no active objects remain.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Creates an object in a free slot and returns it. The hive keeps its
    /// own reference while the object stays inside.
    fn add(&self) -> Option<SharedPtr<dyn Interface>>;

    /// Removes an object from the hive. The object stays alive while
    /// external references remain (zombie); its slot is reclaimed when the
    /// last reference drops.
    fn remove(&self, object: &dyn Interface) -> ReturnValue;

    /// True if `object` is an active member of this hive.
    fn contains(&self, object: &dyn Interface) -> bool;

    /// Visits every active object. The visitor returns `false` to stop.
    ///
    /// Runs under the hive's shared lock: visitors must not remove hive
    /// members or drop their last references while iterating (queue the
    /// work as deferred tasks instead).
    fn for_each(&self, visitor: &mut dyn FnMut(&dyn Interface) -> bool);
}

impl InterfaceId for dyn ObjectHive {
    const UID: Uid = Uid::parse("7d09f34e-3bd1-44f9-8f13-6dd0a25be061");
    const NAME: &'static str = "IObjectHive";
}

/// Visits every active object's state struct for interface `I`.
///
/// The per-slot state cell is locked around each visit; the visitor
/// returns `false` to stop.
pub fn for_each_state<I: InterfaceDecl>(
    hive: &dyn ObjectHive,
    mut visitor: impl FnMut(&dyn Interface, &mut I::State) -> bool,
) {
    hive.for_each(&mut |object| {
        let Some(slot) = object.property_state(I::UID) else {
            return true;
        };
        let Some(cell) = slot.as_any().downcast_ref::<StateCell<I::State>>() else {
            return true;
        };
        cell.with(|state| visitor(object, state))
    });
}

struct HiveInner {
    element_uid: Uid,
    factory: Option<Arc<dyn ObjectFactory>>,
    slot_size: usize,
    slot_align: usize,
    pages: Vec<*mut HivePage>,
    /// Index of the last page that had free slots.
    current: usize,
}

/// Default [`ObjectHive`] implementation.
pub struct ObjectHiveImpl {
    core: ObjectCore,
    lock: Arc<RwLock<()>>,
    inner: UnsafeCell<HiveInner>,
    /// Active objects across all pages.
    live: AtomicUsize,
}

// Pages and the inner record are only touched under `lock`; the embedded
// control blocks and counters are atomics.
unsafe impl Send for ObjectHiveImpl {}
unsafe impl Sync for ObjectHiveImpl {}

impl ObjectHiveImpl {
    /// Class UID of the object hive.
    pub const CLASS_UID: Uid = Uid::parse("c5fbd1a4-3a07-4ed3-9f6a-7df5cb0e0f24");

    pub(crate) fn new() -> Self {
        Self {
            core: ObjectCore::new(),
            lock: Arc::new(RwLock::new(())),
            inner: UnsafeCell::new(HiveInner {
                element_uid: Uid::NIL,
                factory: None,
                slot_size: 0,
                slot_align: 0,
                pages: Vec::new(),
                current: usize::MAX,
            }),
            live: AtomicUsize::new(0),
        }
    }

    /// Creates an uninitialised hive object.
    pub fn create() -> SharedPtr<dyn ObjectHive> {
        let obj = make_object(Self::new());
        interface_ptr_cast::<dyn ObjectHive, _>(&obj).expect("ObjectHiveImpl implements ObjectHive")
    }

    fn class_info_impl() -> &'static ClassInfo {
        static INFO: std::sync::LazyLock<ClassInfo> = std::sync::LazyLock::new(|| {
            ClassInfo::new(
                ObjectHiveImpl::CLASS_UID,
                "ObjectHive",
                vec![InterfaceEntry::with_caster::<dyn ObjectHive>(
                    <dyn ObjectHive as InterfaceId>::INFO,
                    |o| {
                        o.as_any()
                            .downcast_ref::<ObjectHiveImpl>()
                            .map(|x| x as &dyn ObjectHive)
                    },
                )],
                vec![],
            )
        });
        &INFO
    }

    /// Shared-lock view of the inner record.
    ///
    /// # Safety
    /// The caller must hold `self.lock` (shared or exclusive).
    unsafe fn inner(&self) -> &HiveInner {
        &*self.inner.get()
    }

    /// Exclusive view of the inner record.
    ///
    /// # Safety
    /// The caller must hold `self.lock` exclusively.
    #[allow(clippy::mut_from_ref)]
    unsafe fn inner_mut(&self) -> &mut HiveInner {
        &mut *self.inner.get()
    }

    /// Finds a page with a free slot, growing the pool if needed. Caller
    /// holds the write lock.
    unsafe fn target_page(&self) -> Option<*mut HivePage> {
        let inner = self.inner_mut();
        let factory = inner.factory.clone()?;
        if inner.current != usize::MAX {
            let page = inner.pages[inner.current];
            if (*page).has_free_slot() {
                return Some(page);
            }
        }
        for (index, &page) in inner.pages.iter().enumerate() {
            if (*page).has_free_slot() {
                inner.current = index;
                return Some(page);
            }
        }
        let capacity = page_capacity(inner.pages.len());
        let page = HivePage::alloc(
            capacity,
            inner.slot_size,
            inner.slot_align,
            factory,
            self.lock.clone(),
        );
        inner.current = inner.pages.len();
        inner.pages.push(page);
        Some(page)
    }

    /// Maps an object address to `(page, slot)` for an Active slot. Caller
    /// holds the lock.
    unsafe fn find_slot(&self, addr: *const u8) -> Option<(*mut HivePage, usize)> {
        for &page in &self.inner().pages {
            if let Some(index) = (*page).slot_of(addr) {
                if (*page).slot_state(index) == SlotState::Active {
                    return Some((page, index));
                }
                return None;
            }
        }
        None
    }
}

impl fmt::Debug for ObjectHiveImpl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectHive")
            .field("len", &self.live.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl Interface for ObjectHiveImpl {
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

impl ObjectClass for ObjectHiveImpl {
    fn class_info_static() -> &'static ClassInfo {
        Self::class_info_impl()
    }

    fn new_instance() -> Self {
        Self::new()
    }
}

impl ObjectHive for ObjectHiveImpl {
    fn initialize(&self, element: Uid) -> ReturnValue {
        let Some(factory) = crate::runtime::instance().type_registry().find_factory(element)
        else {
            log::error!("ObjectHive: unknown element class {element}");
            return ReturnValue::Fail;
        };
        let layout = factory.instance_layout();
        let _guard = write(&self.lock);
        let inner = unsafe { self.inner_mut() };
        if inner.factory.is_some() {
            return ReturnValue::NothingToDo;
        }
        inner.element_uid = element;
        // Slots double as freelist links while unoccupied.
        inner.slot_size = layout.size().max(std::mem::size_of::<usize>());
        inner.slot_align = layout.align();
        inner.factory = Some(factory);
        ReturnValue::Success
    }

    fn element_uid(&self) -> Uid {
        let _guard = read(&self.lock);
        unsafe { self.inner() }.element_uid
    }

    fn len(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    fn add(&self) -> Option<SharedPtr<dyn Interface>> {
        let result;
        {
            let _guard = write(&self.lock);
            let page = unsafe { self.target_page()? };
            let page_ref = unsafe { &*page };
            let index = page_ref.pop_free_slot()?;
            page_ref.set_slot_state(index, SlotState::Active);
            page_ref.set_active_bit(index);
            page_ref.live_count.fetch_add(1, Ordering::AcqRel);

            // Arm the embedded block: strong/weak return to 1 (the hive's
            // owner shares) and the hive callbacks are installed.
            let block = page_ref.arm_block(index);
            let slot = page_ref.slot_ptr(index);
            let object = unsafe { page_ref.factory.construct_in_place(slot, block) };
            unsafe {
                (*block).set_object_ptr(slot);
                let obj_ref: &dyn Interface = object.as_ref();
                obj_ref.core().add_flags(ObjectFlags::HIVE_MANAGED);
                // The returned pointer acquires its own shares on top of
                // the hive's.
                result = SharedPtr::from_parts_acquire(object, NonNull::new_unchecked(block));
            }
            self.live.fetch_add(1, Ordering::AcqRel);
        }
        Some(result)
    }

    fn remove(&self, object: &dyn Interface) -> ReturnValue {
        let block;
        {
            let _guard = write(&self.lock);
            let addr = (object as *const dyn Interface).cast::<u8>();
            let Some((page, index)) = (unsafe { self.find_slot(addr) }) else {
                return ReturnValue::Fail;
            };
            let page_ref = unsafe { &*page };
            page_ref.clear_active_bit(index);
            page_ref.set_slot_state(index, SlotState::Zombie);
            self.live.fetch_sub(1, Ordering::AcqRel);
            block = page_ref.hcb(index) as *const _ as *mut crate::memory::ControlBlock;
        }
        // Release the hive's owner shares outside the lock: if this was
        // the last strong reference, the destroy callback re-acquires the
        // lock to reclaim the slot.
        unsafe { crate::memory::release_strong_and_weak(block.cast()) };
        ReturnValue::Success
    }

    fn contains(&self, object: &dyn Interface) -> bool {
        let _guard = read(&self.lock);
        let addr = (object as *const dyn Interface).cast::<u8>();
        unsafe { self.find_slot(addr) }.is_some()
    }

    fn for_each(&self, visitor: &mut dyn FnMut(&dyn Interface) -> bool) {
        let _guard = read(&self.lock);
        let inner = unsafe { self.inner() };
        for &page in &inner.pages {
            let page = unsafe { &*page };
            for word_index in 0..page.word_count() {
                let mut bits = page.active_word(word_index);
                while bits != 0 {
                    let bit = bits.trailing_zeros() as usize;
                    bits &= bits - 1;
                    let index = word_index * 64 + bit;
                    // Re-check: an earlier visit may have cleared this bit.
                    if !page.active_bit(index) {
                        continue;
                    }
                    // Prefetch the next active slot in this word.
                    if bits != 0 {
                        let next = word_index * 64 + bits.trailing_zeros() as usize;
                        prefetch_line(page.slot_ptr(next));
                    }
                    let object = unsafe { page.factory.object_at(page.slot_ptr(index)) };
                    if !visitor(object) {
                        return;
                    }
                }
            }
        }
    }
}

impl Drop for ObjectHiveImpl {
    fn drop(&mut self) {
        let pages: Vec<*mut HivePage> = {
            let _guard = write(&self.lock);
            unsafe { self.inner_mut() }.pages.drain(..).collect()
        };
        for page_ptr in pages {
            // Pass 1: release the hive's shares on every active slot.
            let blocks: Vec<*mut crate::memory::ControlBlock> = {
                let _guard = write(&self.lock);
                let page = unsafe { &*page_ptr };
                let mut blocks = Vec::new();
                for index in 0..page.capacity {
                    if page.slot_state(index) == SlotState::Active {
                        page.clear_active_bit(index);
                        page.set_slot_state(index, SlotState::Zombie);
                        blocks.push(page.hcb(index) as *const _ as *mut _);
                    }
                }
                blocks
            };
            // Pass 2 (no lock): releasing may run destroy callbacks which
            // re-acquire the lock to reclaim slots.
            for block in blocks {
                unsafe { crate::memory::release_strong_and_weak(block) };
            }
            // Pass 3: free the page, or orphan it while zombies or weakly
            // observed dead slots remain.
            let free_now = {
                let _guard = write(&self.lock);
                let page = unsafe { &*page_ptr };
                let zombies = (0..page.capacity)
                    .any(|index| page.slot_state(index) == SlotState::Zombie);
                let weak_pending = page.weak_hcbs.load(Ordering::Acquire) > 0;
                if zombies || weak_pending {
                    page.orphaned.store(true, Ordering::Release);
                    false
                } else {
                    true
                }
            };
            if free_now {
                drop(unsafe { Box::from_raw(page_ptr) });
            }
        }
        self.live.store(0, Ordering::Release);
    }
}
