//! Reference-counted memory model: control blocks, the thread-local block
//! pool, and the [`SharedPtr`]/[`WeakPtr`] pair used for every runtime
//! object.
//!
//! Every shared pointer owns one strong and one weak share of its control
//! block; every weak pointer owns one weak share. A freshly allocated block
//! starts at `strong == 1, weak == 1`, representing the first owner. The
//! object is destroyed when the strong count reaches zero and the block is
//! disposed of when the weak count reaches zero, so the block always
//! outlives the object while weak observers remain.

use std::cell::Cell;
use std::fmt;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicI32, AtomicPtr, Ordering};

/// Invoked with the owning block when the last strong reference drops.
pub type DestroyFn = unsafe fn(*mut ControlBlock);
/// Invoked with the owning block when the last weak reference drops.
pub type DisposeFn = unsafe fn(*mut ControlBlock);

/// Shared bookkeeping record behind [`SharedPtr`] and [`WeakPtr`].
///
/// `ptr` stores the managed allocation's address (thin). `destroy` runs the
/// object's drop logic at `strong == 0`; `dispose` releases the block itself
/// at `weak == 0`: back into the thread-local pool for heap blocks, or into
/// the owning hive page's bookkeeping for embedded blocks.
pub struct ControlBlock {
    strong: AtomicI32,
    weak: AtomicI32,
    ptr: AtomicPtr<u8>,
    destroy: AtomicPtr<()>,
    dispose: AtomicPtr<()>,
}

impl ControlBlock {
    pub(crate) fn new() -> Self {
        Self {
            strong: AtomicI32::new(1),
            weak: AtomicI32::new(1),
            ptr: AtomicPtr::new(ptr::null_mut()),
            destroy: AtomicPtr::new(ptr::null_mut()),
            dispose: AtomicPtr::new(ptr::null_mut()),
        }
    }

    /// Resets a recycled block to the freshly-allocated state.
    fn reinit(&self) {
        self.strong.store(1, Ordering::Relaxed);
        self.weak.store(1, Ordering::Relaxed);
        self.ptr.store(ptr::null_mut(), Ordering::Relaxed);
        self.destroy.store(ptr::null_mut(), Ordering::Relaxed);
    }

    /// Resets the counts to the single-owner state. Used when a hive slot
    /// is re-armed for a fresh occupant.
    pub(crate) fn reset_counts(&self) {
        self.strong.store(1, Ordering::Relaxed);
        self.weak.store(1, Ordering::Relaxed);
    }

    /// Increments the strong count.
    pub fn add_ref(&self) {
        self.strong.fetch_add(1, Ordering::Relaxed);
    }

    /// Decrements the strong count. Returns true if this was the last
    /// strong reference.
    pub fn release_ref(&self) -> bool {
        self.strong.fetch_sub(1, Ordering::AcqRel) == 1
    }

    /// Attempts to increment the strong count only while it is positive.
    ///
    /// Used by [`WeakPtr::lock`] to promote a weak reference. Bounded CAS
    /// loop; never blocks.
    pub fn try_add_ref(&self) -> bool {
        let mut current = self.strong.load(Ordering::Relaxed);
        while current > 0 {
            match self.strong.compare_exchange_weak(
                current,
                current + 1,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
        false
    }

    /// Increments the weak count.
    pub fn add_weak(&self) {
        self.weak.fetch_add(1, Ordering::Relaxed);
    }

    /// Decrements the weak count. Returns true if this was the last weak
    /// reference (the caller must dispose of the block).
    pub fn release_weak(&self) -> bool {
        self.weak.fetch_sub(1, Ordering::AcqRel) == 1
    }

    /// Current strong count (acquire load).
    pub fn strong_count(&self) -> i32 {
        self.strong.load(Ordering::Acquire)
    }

    /// Current weak count (acquire load).
    pub fn weak_count(&self) -> i32 {
        self.weak.load(Ordering::Acquire)
    }

    /// Address of the managed allocation.
    pub fn object_ptr(&self) -> *mut u8 {
        self.ptr.load(Ordering::Acquire)
    }

    pub(crate) fn set_object_ptr(&self, p: *mut u8) {
        self.ptr.store(p, Ordering::Release);
    }

    pub(crate) fn set_destroy(&self, f: Option<DestroyFn>) {
        self.destroy
            .store(f.map_or(ptr::null_mut(), |f| f as *mut ()), Ordering::Release);
    }

    pub(crate) fn set_dispose(&self, f: Option<DisposeFn>) {
        self.dispose
            .store(f.map_or(ptr::null_mut(), |f| f as *mut ()), Ordering::Release);
    }

    fn destroy_fn(&self) -> Option<DestroyFn> {
        let p = self.destroy.load(Ordering::Acquire);
        // Function pointers round-trip through data pointers on every
        // supported platform.
        (!p.is_null()).then(|| unsafe { std::mem::transmute::<*mut (), DestroyFn>(p) })
    }

    fn dispose_fn(&self) -> Option<DisposeFn> {
        let p = self.dispose.load(Ordering::Acquire);
        (!p.is_null()).then(|| unsafe { std::mem::transmute::<*mut (), DisposeFn>(p) })
    }
}

impl fmt::Debug for ControlBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlBlock")
            .field("strong", &self.strong_count())
            .field("weak", &self.weak_count())
            .finish_non_exhaustive()
    }
}

/// Runs the destroy thunk if `block` just lost its last strong reference,
/// then releases the caller's weak share.
///
/// # Safety
/// The caller must own one strong and one weak share of `block`.
pub(crate) unsafe fn release_strong_and_weak(block: *mut ControlBlock) {
    if (*block).release_ref() {
        if let Some(destroy) = (*block).destroy_fn() {
            // The caller's weak share keeps the block alive through the
            // whole destructor chain.
            destroy(block);
        }
    }
    release_weak_only(block);
}

/// Releases one weak share, disposing of the block if it was the last.
///
/// # Safety
/// The caller must own one weak share of `block`.
pub(crate) unsafe fn release_weak_only(block: *mut ControlBlock) {
    if (*block).release_weak() {
        if let Some(dispose) = (*block).dispose_fn() {
            dispose(block);
        }
    }
}

// --- Thread-local block pool ---

/// Pool capacity per thread. 256 blocks keeps the recycle hit rate high
/// without pinning meaningful memory per thread.
const BLOCK_POOL_MAX: usize = 256;

/// Per-thread free list of recycled control blocks. Links reuse the block's
/// `ptr` field, which is dead while the block is pooled.
struct BlockPool {
    head: Cell<*mut ControlBlock>,
    len: Cell<usize>,
}

impl BlockPool {
    const fn new() -> Self {
        Self {
            head: Cell::new(ptr::null_mut()),
            len: Cell::new(0),
        }
    }

    fn pop(&self) -> Option<NonNull<ControlBlock>> {
        let head = NonNull::new(self.head.get())?;
        let next = unsafe { head.as_ref().object_ptr().cast::<ControlBlock>() };
        self.head.set(next);
        self.len.set(self.len.get() - 1);
        Some(head)
    }

    /// Returns false when the pool is full and the caller must free.
    fn push(&self, block: NonNull<ControlBlock>) -> bool {
        if self.len.get() >= BLOCK_POOL_MAX {
            return false;
        }
        unsafe {
            block.as_ref().set_object_ptr(self.head.get().cast());
        }
        self.head.set(block.as_ptr());
        self.len.set(self.len.get() + 1);
        true
    }
}

impl Drop for BlockPool {
    fn drop(&mut self) {
        let mut head = self.head.get();
        while let Some(block) = NonNull::new(head) {
            head = unsafe { block.as_ref().object_ptr().cast::<ControlBlock>() };
            drop(unsafe { Box::from_raw(block.as_ptr()) });
        }
        self.head.set(ptr::null_mut());
        self.len.set(0);
    }
}

thread_local! {
    static BLOCK_POOL: BlockPool = const { BlockPool::new() };
}

/// Allocates a control block, recycling a pooled one when available.
///
/// Initialized to `strong == 1, weak == 1` with the heap dispose thunk
/// installed. During thread teardown the pool may already be gone;
/// allocation then falls through to the plain heap.
pub(crate) fn alloc_block() -> NonNull<ControlBlock> {
    let recycled = BLOCK_POOL.try_with(|pool| pool.pop()).ok().flatten();
    let block = recycled.unwrap_or_else(|| {
        NonNull::new(Box::into_raw(Box::new(ControlBlock::new()))).expect("Box never null")
    });
    unsafe {
        block.as_ref().reinit();
        block.as_ref().set_dispose(Some(heap_dispose));
    }
    block
}

/// Dispose thunk for heap blocks: recycle into the thread pool or free.
///
/// # Safety
/// `block` must be a heap block with zero strong and weak counts.
unsafe fn heap_dispose(block: *mut ControlBlock) {
    let block = NonNull::new_unchecked(block);
    let pooled = BLOCK_POOL
        .try_with(|pool| pool.push(block))
        .unwrap_or(false);
    if !pooled {
        drop(Box::from_raw(block.as_ptr()));
    }
}

// --- Shared / weak pointers ---

/// Shared ownership pointer over `{T*, block*}`.
///
/// Unlike `std::sync::Arc`, the control block is a separate allocation that
/// can be embedded elsewhere (hive pages), swapped wholesale, and aliased:
/// a pointer produced by an interface cast shares the original block while
/// pointing at a different trait object of the same allocation.
pub struct SharedPtr<T: ?Sized> {
    ptr: NonNull<T>,
    block: NonNull<ControlBlock>,
}

unsafe impl<T: ?Sized + Send + Sync> Send for SharedPtr<T> {}
unsafe impl<T: ?Sized + Send + Sync> Sync for SharedPtr<T> {}

impl<T> SharedPtr<T> {
    /// Heap-allocates `value` under a fresh control block.
    pub fn new(value: T) -> Self {
        let raw = Box::into_raw(Box::new(value));
        let block = alloc_block();
        unsafe {
            block.as_ref().set_object_ptr(raw.cast());
            block.as_ref().set_destroy(Some(destroy_boxed::<T>));
            Self {
                ptr: NonNull::new_unchecked(raw),
                block,
            }
        }
    }
}

impl<T: ?Sized> SharedPtr<T> {
    /// Wraps `(ptr, block)`, taking over one existing strong and weak share.
    ///
    /// # Safety
    /// `block` must manage the allocation behind `ptr` and the caller must
    /// own one strong and one weak share of it.
    pub(crate) unsafe fn from_parts_adopt(ptr: NonNull<T>, block: NonNull<ControlBlock>) -> Self {
        Self { ptr, block }
    }

    /// Wraps `(ptr, block)`, acquiring fresh strong and weak shares.
    ///
    /// # Safety
    /// `block` must manage the allocation behind `ptr`, and the allocation
    /// must currently be alive (strong count positive).
    pub(crate) unsafe fn from_parts_acquire(ptr: NonNull<T>, block: NonNull<ControlBlock>) -> Self {
        block.as_ref().add_ref();
        block.as_ref().add_weak();
        Self { ptr, block }
    }

    /// Re-points this pointer at a different view of the same allocation,
    /// transferring the owned shares (aliasing cast).
    ///
    /// # Safety
    /// `ptr` must reference data kept alive by this pointer's block.
    pub(crate) unsafe fn with_ptr<U: ?Sized>(self, ptr: NonNull<U>) -> SharedPtr<U> {
        let block = self.block;
        std::mem::forget(self);
        SharedPtr { ptr, block }
    }

    /// Raw pointer to the pointee.
    pub fn as_ptr(&self) -> *mut T {
        self.ptr.as_ptr()
    }

    pub(crate) fn block(&self) -> NonNull<ControlBlock> {
        self.block
    }

    /// Address-identity comparison: two pointers are equal when they
    /// reference the same allocation.
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        std::ptr::eq(a.ptr.as_ptr() as *const (), b.ptr.as_ptr() as *const ())
    }

    /// Creates a weak observer of this pointer.
    pub fn downgrade(this: &Self) -> WeakPtr<T> {
        unsafe { this.block.as_ref().add_weak() };
        WeakPtr {
            inner: Some((this.ptr, this.block)),
        }
    }

    /// Number of strong references currently held.
    pub fn strong_count(&self) -> i32 {
        unsafe { self.block.as_ref().strong_count() }
    }
}

impl<T: ?Sized> std::ops::Deref for SharedPtr<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // A strong share is held for the lifetime of self.
        unsafe { self.ptr.as_ref() }
    }
}

impl<T: ?Sized> Clone for SharedPtr<T> {
    fn clone(&self) -> Self {
        unsafe {
            self.block.as_ref().add_ref();
            self.block.as_ref().add_weak();
        }
        Self {
            ptr: self.ptr,
            block: self.block,
        }
    }
}

impl<T: ?Sized> Drop for SharedPtr<T> {
    fn drop(&mut self) {
        unsafe { release_strong_and_weak(self.block.as_ptr()) };
    }
}

impl<T: ?Sized> fmt::Debug for SharedPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedPtr")
            .field("ptr", &(self.ptr.as_ptr() as *const ()))
            .field("strong", &self.strong_count())
            .finish()
    }
}

impl<T: ?Sized> PartialEq for SharedPtr<T> {
    fn eq(&self, other: &Self) -> bool {
        Self::ptr_eq(self, other)
    }
}

impl<T: ?Sized> Eq for SharedPtr<T> {}

/// Destroy thunk for [`SharedPtr::new`] allocations.
unsafe fn destroy_boxed<T>(block: *mut ControlBlock) {
    let raw = (*block).object_ptr().cast::<T>();
    drop(Box::from_raw(raw));
}

/// Weak observer over `{T*, block*}`; promote with [`WeakPtr::lock`].
pub struct WeakPtr<T: ?Sized> {
    inner: Option<(NonNull<T>, NonNull<ControlBlock>)>,
}

unsafe impl<T: ?Sized + Send + Sync> Send for WeakPtr<T> {}
unsafe impl<T: ?Sized + Send + Sync> Sync for WeakPtr<T> {}

impl<T: ?Sized> WeakPtr<T> {
    /// An empty weak pointer that never locks.
    pub fn empty() -> Self {
        Self { inner: None }
    }

    /// Wraps `(ptr, block)`, taking over one existing weak share.
    ///
    /// # Safety
    /// `block` must manage the allocation behind `ptr` and the caller must
    /// own one weak share of it.
    pub(crate) unsafe fn from_parts_adopt(ptr: NonNull<T>, block: NonNull<ControlBlock>) -> Self {
        Self {
            inner: Some((ptr, block)),
        }
    }

    /// Attempts to promote to a shared pointer. Returns `None` once the
    /// object has been destroyed.
    pub fn lock(&self) -> Option<SharedPtr<T>> {
        let (ptr, block) = self.inner?;
        unsafe {
            if !block.as_ref().try_add_ref() {
                return None;
            }
            block.as_ref().add_weak();
        }
        Some(SharedPtr { ptr, block })
    }

    /// True once the object has been destroyed (or for the empty pointer).
    pub fn expired(&self) -> bool {
        match self.inner {
            Some((_, block)) => unsafe { block.as_ref().strong_count() == 0 },
            None => true,
        }
    }

    /// Identity key for coalescing: the pointee address, or null when empty.
    pub fn data_ptr(&self) -> *const () {
        self.inner
            .map_or(ptr::null(), |(p, _)| p.as_ptr() as *const ())
    }
}

impl<T: ?Sized> From<&SharedPtr<T>> for WeakPtr<T> {
    fn from(shared: &SharedPtr<T>) -> Self {
        SharedPtr::downgrade(shared)
    }
}

impl<T: ?Sized> Clone for WeakPtr<T> {
    fn clone(&self) -> Self {
        if let Some((_, block)) = self.inner {
            unsafe { block.as_ref().add_weak() };
        }
        Self { inner: self.inner }
    }
}

impl<T: ?Sized> Drop for WeakPtr<T> {
    fn drop(&mut self) {
        if let Some((_, block)) = self.inner.take() {
            unsafe { release_weak_only(block.as_ptr()) };
        }
    }
}

impl<T: ?Sized> Default for WeakPtr<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T: ?Sized> fmt::Debug for WeakPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakPtr")
            .field("expired", &self.expired())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_pointer_has_one_strong_ref() {
        let p = SharedPtr::new(7_u32);
        assert_eq!(*p, 7);
        assert_eq!(p.strong_count(), 1);
    }

    #[test]
    fn clone_bumps_and_drop_releases() {
        let p = SharedPtr::new(String::from("x"));
        let q = p.clone();
        assert_eq!(p.strong_count(), 2);
        assert!(SharedPtr::ptr_eq(&p, &q));
        drop(q);
        assert_eq!(p.strong_count(), 1);
    }

    #[test]
    fn weak_lock_and_expiry() {
        let p = SharedPtr::new(3_i64);
        let w = SharedPtr::downgrade(&p);
        assert!(!w.expired());
        assert_eq!(*w.lock().unwrap(), 3);
        drop(p);
        assert!(w.expired());
        assert!(w.lock().is_none());
    }

    #[test]
    fn value_dropped_exactly_once() {
        struct Probe(std::sync::Arc<std::sync::atomic::AtomicU32>);
        impl Drop for Probe {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
        let drops = std::sync::Arc::new(std::sync::atomic::AtomicU32::new(0));
        let p = SharedPtr::new(Probe(drops.clone()));
        let w = SharedPtr::downgrade(&p);
        let q = p.clone();
        drop(p);
        assert_eq!(drops.load(Ordering::SeqCst), 0);
        drop(q);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
        // The block must still answer weak queries after the value is gone.
        assert!(w.expired());
    }

    #[test]
    fn pool_recycles_blocks() {
        // Churn enough pointers that the pool path is exercised in both
        // directions; correctness is observed through counts staying sane.
        for i in 0..1_000 {
            let p = SharedPtr::new(i);
            let w = SharedPtr::downgrade(&p);
            assert_eq!(*w.lock().unwrap(), i);
        }
    }

    #[test]
    fn concurrent_lock_race_is_safe() {
        use std::sync::atomic::AtomicUsize;
        let p = SharedPtr::new(AtomicUsize::new(0));
        let w = SharedPtr::downgrade(&p);
        let threads: Vec<_> = (0..4)
            .map(|_| {
                let w = w.clone();
                std::thread::spawn(move || {
                    for _ in 0..10_000 {
                        if let Some(s) = w.lock() {
                            s.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                })
            })
            .collect();
        drop(p);
        for t in threads {
            t.join().unwrap();
        }
        assert!(w.expired());
    }
}
