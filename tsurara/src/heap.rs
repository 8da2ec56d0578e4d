//! Heap storage and block allocation.

use {
    crate::{
        Block, Boxed, Context, FatalError, Header, SCAN_FSIZE_MAX, Tag,
        block::fields_offset,
        fatal,
    },
    std::{mem::size_of, ptr::{self, NonNull}},
};

/// Counters of allocator traffic.
///
/// Storage recycled through [`Reuse`][`crate::Reuse`]
/// counts neither as an allocation nor as a free.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct HeapStats
{
    /// Number of calls to the allocator that produced fresh storage.
    pub allocations: u64,

    /// Number of reallocations.
    pub reallocations: u64,

    /// Number of times storage was returned to the allocator.
    pub frees: u64,
}

impl HeapStats
{
    /// Number of blocks that were allocated and not yet freed.
    ///
    /// Thread-shared blocks are counted as freed by the context
    /// that dropped the last reference, so this saturates at zero.
    pub fn live(&self) -> u64
    {
        self.allocations.saturating_sub(self.frees)
    }
}

/// Per-thread handle to the system allocator.
///
/// All storage goes through malloc and free,
/// so that it can be handed between threads once promoted.
#[derive(Debug, Default)]
pub struct Heap
{
    stats: HeapStats,
}

impl Heap
{
    /// Allocator traffic so far.
    pub fn stats(&self) -> HeapStats
    {
        self.stats
    }

    /// Allocate uninitialized storage.
    ///
    /// Failure is fatal.
    pub (crate) fn malloc(&mut self, size: usize) -> NonNull<u8>
    {
        // SAFETY: malloc has no preconditions.
        let ptr = unsafe { libc::malloc(size.max(1)) };
        self.check(ptr, size)
    }

    /// Allocate zeroed storage.
    ///
    /// Failure is fatal.
    pub (crate) fn zalloc(&mut self, size: usize) -> NonNull<u8>
    {
        // SAFETY: calloc has no preconditions.
        let ptr = unsafe { libc::calloc(1, size.max(1)) };
        self.check(ptr, size)
    }

    fn check(&mut self, ptr: *mut libc::c_void, size: usize) -> NonNull<u8>
    {
        let Some(ptr) = NonNull::new(ptr.cast())
            else { fatal(FatalError::OutOfMemory{size}) };
        self.stats.allocations += 1;
        ptr
    }

    /// Resize storage, moving it if necessary.
    ///
    /// # Safety
    ///
    /// `ptr` must have been allocated by this module and not yet freed.
    /// On return, `ptr` must no longer be used.
    pub (crate) unsafe fn realloc(&mut self, ptr: NonNull<u8>, size: usize)
        -> NonNull<u8>
    {
        let new = libc::realloc(ptr.as_ptr().cast(), size.max(1));
        let Some(new) = NonNull::new(new.cast())
            else { fatal(FatalError::OutOfMemory{size}) };
        self.stats.reallocations += 1;
        new
    }

    /// Return storage to the allocator.
    ///
    /// # Safety
    ///
    /// `ptr` must have been allocated by this module and not yet freed.
    pub (crate) unsafe fn free(&mut self, ptr: NonNull<u8>)
    {
        libc::free(ptr.as_ptr().cast());
        self.stats.frees += 1;
    }

    /// Usable size of allocated storage, if the platform can tell.
    ///
    /// # Safety
    ///
    /// `ptr` must have been allocated by this module and not yet freed.
    #[allow(unused_variables)]
    pub (crate) unsafe fn usable_size(&self, ptr: NonNull<u8>) -> Option<usize>
    {
        #[cfg(any(target_os = "linux", target_os = "android"))]
        return Some(libc::malloc_usable_size(ptr.as_ptr().cast()));

        #[cfg(not(any(target_os = "linux", target_os = "android")))]
        return None;
    }
}

/* -------------------------------------------------------------------------- */
/*                              Block allocation                              */
/* -------------------------------------------------------------------------- */

impl Block
{
    /// Allocate a block with `scan_field_count` scan fields.
    ///
    /// `size` is the total size in bytes, including the header,
    /// the scan fields, and any raw bytes after them.
    /// The block is uniquely owned and its scan fields are unit,
    /// so it can be released before the caller fills it in.
    /// The raw bytes are uninitialized.
    pub fn allocate(size: usize, scan_field_count: usize, tag: Tag, ctx: &mut Context)
        -> Self
    {
        debug_assert!(scan_field_count < SCAN_FSIZE_MAX, "Use allocate_large");
        debug_assert!(size >= min_size(scan_field_count, false));
        let ptr = ctx.heap.malloc(size);
        // SAFETY: The storage is large enough.
        unsafe { Self::initialize(ptr.cast(), scan_field_count, tag, false) }
    }

    /// Like [`allocate`][`Self::allocate`], but the raw bytes are zeroed.
    pub fn allocate_zeroed(
        size: usize,
        scan_field_count: usize,
        tag: Tag,
        ctx: &mut Context,
    ) -> Self
    {
        debug_assert!(scan_field_count < SCAN_FSIZE_MAX, "Use allocate_large");
        debug_assert!(size >= min_size(scan_field_count, false));
        let ptr = ctx.heap.zalloc(size);
        // SAFETY: The storage is large enough.
        unsafe { Self::initialize(ptr.cast(), scan_field_count, tag, false) }
    }

    /// Allocate a block using the large layout.
    ///
    /// This works for any number of scan fields.
    /// `size` is as for [`allocate`][`Self::allocate`];
    /// one additional word is reserved for the scan field count.
    pub fn allocate_large(
        size: usize,
        scan_field_count: usize,
        tag: Tag,
        ctx: &mut Context,
    ) -> Self
    {
        debug_assert!(size >= min_size(scan_field_count, false));
        let ptr = ctx.heap.malloc(size + size_of::<Boxed>());
        // SAFETY: The storage is large enough.
        unsafe { Self::initialize(ptr.cast(), scan_field_count, tag, true) }
    }

    /// Resize a uniquely owned block.
    ///
    /// The header and scan fields are preserved.
    /// Reallocating a shared block is fatal.
    pub fn reallocate(self, new_size: usize, ctx: &mut Context) -> Self
    {
        if !self.is_unique() {
            fatal(FatalError::ReallocShared{tag: self.tag()});
        }
        debug_assert!(new_size >= min_size(self.scan_field_count(), false));
        let large = self.header().is_large();
        let extra = if large { size_of::<Boxed>() } else { 0 };
        let ptr = self.into_raw().cast();
        // SAFETY: We were the only holder, so nobody else sees the move.
        unsafe {
            let ptr = ctx.heap.realloc(ptr, new_size + extra);
            Self::from_raw(ptr.cast())
        }
    }

    /// Write the header and set every scan field to unit.
    ///
    /// # Safety
    ///
    /// The storage must be large enough for the header,
    /// the large count if requested, and the scan fields.
    pub (crate) unsafe fn initialize(
        ptr: NonNull<Header>,
        scan_field_count: usize,
        tag: Tag,
        large: bool,
    ) -> Self
    {
        let scan_fsize = if large { SCAN_FSIZE_MAX } else { scan_field_count };
        ptr::write(ptr.as_ptr(), Header::new(tag, scan_fsize as u8));
        if large {
            let count = ptr.as_ptr().add(1).cast::<Boxed>();
            ptr::write(count, Boxed::from_enum(scan_field_count));
        }
        let fields = ptr.as_ptr().cast::<u8>().add(fields_offset(large));
        let fields = fields.cast::<Boxed>();
        for i in 0 .. scan_field_count {
            ptr::write(fields.add(i), Boxed::unit());
        }
        Self::from_raw(ptr)
    }
}

/// Smallest storage size for a block with the given scan fields.
pub (crate) fn min_size(scan_field_count: usize, large: bool) -> usize
{
    fields_offset(large) + scan_field_count * size_of::<Boxed>()
}
