//! In-place reuse of uniquely owned blocks.
//!
//! When a pattern match deconstructs a uniquely owned block and
//! then constructs a new block of similar size, the storage of the
//! old block can be recycled instead of going through the allocator.
//! The old block is first turned into an orphan: its header is reset
//! to the neutral header and its fields are moved out.
//! The orphan storage travels as a [`Reuse`] token until it is either
//! reinitialized by [`Block::allocate_with_reuse`] or discarded.

use {
    crate::{
        Block, Boxed, Context, Header, SCAN_FSIZE_MAX, Tag,
        block::{fields_at, scan_fsize_at},
        heap::min_size,
    },
    smallvec::SmallVec,
    std::{fmt, ptr::{self, NonNull}},
};

/// Orphaned block storage, or nothing.
///
/// A token holding storage must be passed to
/// [`allocate_with_reuse`][`Block::allocate_with_reuse`]
/// or [`discard`][`Self::discard`]; forgetting it leaks the storage.
#[must_use]
pub struct Reuse
{
    ptr: Option<NonNull<Header>>,
}

impl Reuse
{
    /// No storage available for reuse.
    pub const NONE: Self = Self{ptr: None};

    /// Whether the token holds storage.
    pub fn is_some(&self) -> bool
    {
        self.ptr.is_some()
    }

    /// Whether the token is [`NONE`][`Self::NONE`].
    pub fn is_none(&self) -> bool
    {
        self.ptr.is_none()
    }

    /// Return unused orphan storage to the heap.
    pub fn discard(self, ctx: &mut Context)
    {
        if let Some(ptr) = self.ptr {
            // SAFETY: Orphans are owned storage without fields.
            unsafe { ctx.heap.free(ptr.cast()); }
        }
    }
}

impl fmt::Debug for Reuse
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result
    {
        match self.ptr {
            Some(ptr) => write!(f, "Reuse({ptr:p})"),
            None => f.write_str("Reuse::NONE"),
        }
    }
}

impl Block
{
    /// Release the block, keeping its storage if it was unique.
    ///
    /// If the block is unique, its header is reset and its storage is
    /// returned for reuse. Its fields are not released: the caller must
    /// already have moved them out, for example with [`Boxed::alias`].
    /// If the block is shared, it is released as usual and
    /// [`Reuse::NONE`] is returned; the fields then remain owned
    /// by the other holders.
    pub fn release_for_reuse(self, ctx: &mut Context) -> Reuse
    {
        self.release_for_reuse_n(&[], ctx)
    }

    /// Like [`release_for_reuse`][`Self::release_for_reuse`],
    /// but on the unique path the fields at the given indices are released.
    ///
    /// These are the fields the pattern match does not bind.
    pub fn release_for_reuse_n(self, unused: &[usize], ctx: &mut Context)
        -> Reuse
    {
        // The destructor of a raw block must run, so it is never orphaned.
        if !self.is_unique() || self.tag().is_raw() {
            self.release(ctx);
            return Reuse::NONE;
        }

        let ptr = self.into_raw();
        // SAFETY: We are the only holder.
        unsafe {
            let fields = fields_at(ptr);
            for &i in unused {
                debug_assert!(i < scan_fsize_at(ptr));
                let field = ptr::replace(fields.add(i), Boxed::unit());
                field.release(ctx);
            }
            ptr::write(ptr.as_ptr(), Header::orphan());
        }
        Reuse{ptr: Some(ptr)}
    }

    /// Take all fields out of the block and release it for reuse.
    ///
    /// A unique block gives up its fields and its storage.
    /// A shared block has its fields duplicated and is then released,
    /// so the caller owns the returned fields either way.
    pub fn unpack_for_reuse(self, ctx: &mut Context)
        -> (SmallVec<[Boxed; 4]>, Reuse)
    {
        if !self.is_unique() {
            // SAFETY: The duplicates are taken before anything can run.
            let fields = unsafe { self.scan_fields() }.iter().map(Boxed::dup).collect();
            self.release(ctx);
            return (fields, Reuse::NONE);
        }

        // SAFETY: We are the only holder, and the aliases are
        //         forgotten by the orphaned header below.
        let fields = unsafe { self.scan_fields() }.iter()
            .map(|field| unsafe { field.alias() })
            .collect();
        (fields, self.release_for_reuse(ctx))
    }

    /// Allocate a block, recycling orphan storage if there is any.
    ///
    /// With storage, the header is reinitialized in place
    /// and the allocator is not called.
    /// If the heap can tell that the storage is too small,
    /// it is discarded and a fresh block is allocated.
    pub fn allocate_with_reuse(
        reuse: Reuse,
        size: usize,
        scan_field_count: usize,
        tag: Tag,
        ctx: &mut Context,
    ) -> Self
    {
        debug_assert!(scan_field_count < SCAN_FSIZE_MAX, "Use allocate_large");
        debug_assert!(size >= min_size(scan_field_count, false));

        let Some(ptr) = reuse.ptr
            else { return Self::allocate(size, scan_field_count, tag, ctx) };

        // SAFETY: Orphan storage comes from the heap.
        let usable = unsafe { ctx.heap.usable_size(ptr.cast()) };
        if usable.map_or(false, |usable| usable < size) {
            reuse.discard(ctx);
            return Self::allocate(size, scan_field_count, tag, ctx);
        }

        // SAFETY: The storage is large enough.
        unsafe { Self::initialize(ptr, scan_field_count, tag, false) }
    }
}
