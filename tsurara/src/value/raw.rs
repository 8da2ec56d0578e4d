use {
    crate::{
        Block, Boxed, Context, Header, Tag,
        block::{fields_at, scan_fsize_at},
        heap::min_size,
    },
    scope_exit::OnUnwind,
    std::{mem::size_of, ptr::{self, NonNull}},
};

/// Destructor of a raw block's resource.
///
/// It is called exactly once, when the block is freed.
pub type RawFree = unsafe fn(*mut ());

/// Raw bytes of a [`Raw`] block.
#[repr(C)]
struct RawPayload
{
    free: RawFree,
    data: *mut (),
}

/// Block that owns a foreign resource.
///
/// The block has no scan fields.
/// Its raw bytes hold a pointer to the resource and its destructor.
#[repr(transparent)]
pub struct Raw
{
    block: Block,
}

impl Raw
{
    /// Wrap a foreign pointer and its destructor.
    ///
    /// # Safety
    ///
    /// `free(data)` must be safe to call once, from whichever thread
    /// releases the last reference to the block.
    pub unsafe fn from_raw_parts(data: *mut (), free: RawFree, ctx: &mut Context)
        -> Self
    {
        let size = min_size(0, false) + size_of::<RawPayload>();
        let block = Block::allocate(size, 0, Tag::CPTR_RAW, ctx);
        let payload = RawPayload{free, data};
        ptr::write(block.trailing_ptr().cast::<RawPayload>(), payload);
        Self{block}
    }

    /// Move a Rust value into a raw block.
    ///
    /// The value is dropped when the block is freed.
    pub fn new<T>(value: T, ctx: &mut Context) -> Self
        where T: Send + Sync + 'static
    {
        unsafe fn drop_box<T>(data: *mut ())
        {
            drop(Box::from_raw(data.cast::<T>()));
        }

        let data = Box::into_raw(Box::new(value)).cast::<()>();
        // SAFETY: The box is still owned by us.
        let guard = OnUnwind::new(|| unsafe { drop_box::<T>(data) });
        // SAFETY: T is Send, and the box is dropped exactly once.
        let this = unsafe { Self::from_raw_parts(data, drop_box::<T>, ctx) };
        guard.dismiss();
        this
    }

    /// The foreign pointer.
    pub fn data(&self) -> *mut ()
    {
        // SAFETY: Raw blocks store their payload after the fields.
        unsafe { (*self.block.trailing_ptr().cast::<RawPayload>()).data }
    }

    /// Borrow the value stored by [`new`][`Self::new`].
    ///
    /// # Safety
    ///
    /// The block must have been created by `Raw::new::<T>`.
    pub unsafe fn get<T>(&self) -> &T
    {
        &*self.data().cast::<T>()
    }

    /// Create an additional reference to the block.
    pub fn dup(&self) -> Self
    {
        Self{block: self.block.dup()}
    }

    /// Release the block.
    pub fn release(self, ctx: &mut Context)
    {
        self.block.release(ctx);
    }

    /// The underlying block.
    pub fn as_block(&self) -> &Block
    {
        &self.block
    }

    /// Give up the typed view.
    pub fn into_block(self) -> Block
    {
        self.block
    }

    /// Box the block.
    pub fn into_boxed(self) -> Boxed
    {
        Boxed::from_block(self.block)
    }
}

/// Run the destructor of a raw block that is being freed.
///
/// # Safety
///
/// `ptr` must point to a raw block with no remaining holders.
pub (crate) unsafe fn destroy(ptr: NonNull<Header>)
{
    debug_assert!(ptr.as_ref().tag().is_raw());
    let payload = fields_at(ptr).add(scan_fsize_at(ptr)).cast::<RawPayload>();
    let RawPayload{free, data} = ptr::read(payload);
    free(data);
}
