//! Hive page layout and the embedded control-block callbacks that drive
//! the zombie / orphan slot lifecycle.

use std::alloc::Layout;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use crate::memory::ControlBlock;
use crate::object::ObjectFactory;
use crate::util::write;

use super::{bitmask_words, SlotState, PAGE_SENTINEL};

/// Control block embedded in the page, one per slot, plus the back-pointer
/// the destroy callback uses to find its page. `block` must stay the first
/// field so a `*mut ControlBlock` is also a `*mut HiveControlBlock`.
#[repr(C)]
pub(crate) struct HiveControlBlock {
    pub(crate) block: ControlBlock,
    pub(crate) page: *mut HivePage,
}

unsafe impl Send for HiveControlBlock {}
unsafe impl Sync for HiveControlBlock {}

/// One page of slot storage with its parallel bookkeeping arrays.
///
/// Slot state, the active bitmask, and the freelist are guarded by `lock`
/// (shared with the owning hive). The counters are atomics because the
/// dispose callback reads them without the lock held.
pub(crate) struct HivePage {
    state: Box<[AtomicU8]>,
    active_bits: Box<[AtomicU64]>,
    hcbs: Box<[HiveControlBlock]>,
    slots: NonNull<u8>,
    slots_layout: Layout,
    pub(crate) capacity: usize,
    free_head: AtomicUsize,
    /// Active + Zombie slots on this page.
    pub(crate) live_count: AtomicUsize,
    pub(crate) slot_size: usize,
    pub(crate) factory: Arc<dyn ObjectFactory>,
    /// Destroyed slots whose embedded block still has weak observers.
    pub(crate) weak_hcbs: AtomicUsize,
    /// The owning hive's lock; orphan pages keep locking through the Arc.
    pub(crate) lock: Arc<RwLock<()>>,
    pub(crate) orphaned: AtomicBool,
}

unsafe impl Send for HivePage {}
unsafe impl Sync for HivePage {}

impl HivePage {
    /// Allocates a page with every slot free and the freelist threaded
    /// through the slot bytes.
    ///
    /// Returns a raw pointer; ownership transfers to the hive (and, for
    /// orphaned pages, ultimately to the last dispose callback).
    pub(crate) fn alloc(
        capacity: usize,
        slot_size: usize,
        slot_align: usize,
        factory: Arc<dyn ObjectFactory>,
        lock: Arc<RwLock<()>>,
    ) -> *mut HivePage {
        let slots_layout = Layout::from_size_align(capacity * slot_size, slot_align)
            .expect("factory layout produces a valid slot layout");
        let slots = unsafe { std::alloc::alloc(slots_layout) };
        let Some(slots) = NonNull::new(slots) else {
            std::alloc::handle_alloc_error(slots_layout)
        };

        let page = Box::new(HivePage {
            state: (0..capacity)
                .map(|_| AtomicU8::new(SlotState::Free as u8))
                .collect(),
            active_bits: (0..bitmask_words(capacity))
                .map(|_| AtomicU64::new(0))
                .collect(),
            hcbs: (0..capacity)
                .map(|_| HiveControlBlock {
                    block: ControlBlock::new(),
                    page: ptr::null_mut(),
                })
                .collect(),
            slots,
            slots_layout,
            capacity,
            free_head: AtomicUsize::new(PAGE_SENTINEL),
            live_count: AtomicUsize::new(0),
            slot_size,
            factory,
            weak_hcbs: AtomicUsize::new(0),
            lock,
            orphaned: AtomicBool::new(false),
        });
        let raw = Box::into_raw(page);
        unsafe {
            // Back-pointers can only be written once the page has its
            // final address.
            for hcb in &mut (*raw).hcbs {
                hcb.page = raw;
            }
            (*raw).build_freelist();
        }
        raw
    }

    pub(crate) fn slot_ptr(&self, index: usize) -> *mut u8 {
        unsafe { self.slots.as_ptr().add(index * self.slot_size) }
    }

    pub(crate) fn hcb(&self, index: usize) -> &HiveControlBlock {
        &self.hcbs[index]
    }

    /// Maps an object address back to its slot index, or `None` when the
    /// address is not a slot start on this page.
    pub(crate) fn slot_of(&self, addr: *const u8) -> Option<usize> {
        let base = self.slots.as_ptr() as usize;
        let addr = addr as usize;
        if addr < base || addr >= base + self.capacity * self.slot_size {
            return None;
        }
        let offset = addr - base;
        (offset % self.slot_size == 0).then_some(offset / self.slot_size)
    }

    pub(crate) fn slot_state(&self, index: usize) -> SlotState {
        SlotState::from_u8(self.state[index].load(Ordering::Acquire))
    }

    pub(crate) fn set_slot_state(&self, index: usize, state: SlotState) {
        self.state[index].store(state as u8, Ordering::Release);
    }

    pub(crate) fn set_active_bit(&self, index: usize) {
        self.active_bits[index / 64].fetch_or(1 << (index % 64), Ordering::AcqRel);
    }

    pub(crate) fn clear_active_bit(&self, index: usize) {
        self.active_bits[index / 64].fetch_and(!(1 << (index % 64)), Ordering::AcqRel);
    }

    pub(crate) fn active_bit(&self, index: usize) -> bool {
        self.active_bits[index / 64].load(Ordering::Acquire) & (1 << (index % 64)) != 0
    }

    pub(crate) fn active_word(&self, word: usize) -> u64 {
        self.active_bits[word].load(Ordering::Acquire)
    }

    pub(crate) fn word_count(&self) -> usize {
        self.active_bits.len()
    }

    /// True when the freelist has a slot available.
    pub(crate) fn has_free_slot(&self) -> bool {
        self.free_head.load(Ordering::Acquire) != PAGE_SENTINEL
    }

    fn build_freelist(&self) {
        for index in 0..self.capacity - 1 {
            unsafe {
                self.slot_ptr(index)
                    .cast::<usize>()
                    .write_unaligned(index + 1);
            }
        }
        unsafe {
            self.slot_ptr(self.capacity - 1)
                .cast::<usize>()
                .write_unaligned(PAGE_SENTINEL);
        }
        self.free_head.store(0, Ordering::Release);
    }

    /// Pops the freelist head. Caller holds the hive write lock.
    pub(crate) fn pop_free_slot(&self) -> Option<usize> {
        let head = self.free_head.load(Ordering::Acquire);
        if head == PAGE_SENTINEL {
            return None;
        }
        let next = unsafe { self.slot_ptr(head).cast::<usize>().read_unaligned() };
        self.free_head.store(next, Ordering::Release);
        Some(head)
    }

    /// Pushes a slot onto the freelist. Caller holds the hive write lock.
    pub(crate) fn push_free_slot(&self, index: usize) {
        let head = self.free_head.load(Ordering::Acquire);
        unsafe {
            self.slot_ptr(index).cast::<usize>().write_unaligned(head);
        }
        self.free_head.store(index, Ordering::Release);
    }

    /// Installs the hive destroy/dispose callbacks on a slot's embedded
    /// block and resets its counts for a fresh object.
    pub(crate) fn arm_block(&self, index: usize) -> *mut ControlBlock {
        let hcb = &self.hcbs[index];
        let block = &hcb.block as *const ControlBlock as *mut ControlBlock;
        unsafe {
            (*block).reset_for_hive();
            (*block).set_destroy(Some(hive_destroy));
            (*block).set_dispose(Some(hive_dispose));
        }
        block
    }
}

impl Drop for HivePage {
    fn drop(&mut self) {
        unsafe { std::alloc::dealloc(self.slots.as_ptr(), self.slots_layout) };
    }
}

impl ControlBlock {
    /// Re-arms an embedded block for a fresh slot occupant.
    pub(crate) fn reset_for_hive(&self) {
        // Strong/weak return to the hive's owner shares; the object
        // pointer is wired after in-place construction.
        self.reset_counts();
    }
}

/// Destroy callback for hive-managed objects, run when the last strong
/// reference drops.
///
/// Runs the object's destructor in place, then transitions the slot
/// Zombie -> Free. Normal pages take the hive lock and return the slot to
/// the freelist; orphaned pages skip the freelist (nothing allocates from
/// them again). The block itself stays embedded; the page tracks it in
/// `weak_hcbs` until the dispose callback runs.
unsafe fn hive_destroy(block: *mut ControlBlock) {
    let hcb = block.cast::<HiveControlBlock>();
    let page = &*(*hcb).page;
    let slot = (*block).object_ptr();
    let Some(index) = page.slot_of(slot) else {
        return;
    };

    // The caller's weak share keeps the block alive through the
    // destructor chain.
    page.factory.destroy_in_place(slot);

    let lock = page.lock.clone();
    let guard = write(&lock);
    page.weak_hcbs.fetch_add(1, Ordering::AcqRel);
    page.clear_active_bit(index);
    page.set_slot_state(index, SlotState::Free);
    if !page.orphaned.load(Ordering::Acquire) {
        page.push_free_slot(index);
    }
    page.live_count.fetch_sub(1, Ordering::AcqRel);
    drop(guard);
}

/// Dispose callback for embedded blocks, run when the last weak reference
/// drops. Frees an orphaned page once its last tracked block dies.
unsafe fn hive_dispose(block: *mut ControlBlock) {
    let hcb = block.cast::<HiveControlBlock>();
    let page_ptr = (*hcb).page;
    // Keep the lock alive independently of the page so the guard can be
    // released before the page is freed.
    let lock = (*page_ptr).lock.clone();
    let free_page = {
        let _guard = write(&lock);
        let page = &*page_ptr;
        let remaining = page.weak_hcbs.fetch_sub(1, Ordering::AcqRel) - 1;
        page.orphaned.load(Ordering::Acquire)
            && remaining == 0
            && page.live_count.load(Ordering::Acquire) == 0
    };
    if free_page {
        drop(Box::from_raw(page_ptr));
    }
}
