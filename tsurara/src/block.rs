use {
    crate::{Boxed, Header, SCAN_FSIZE_MAX, Tag},
    std::{fmt, marker::PhantomData, mem::size_of, ptr::NonNull, slice},
};

/// Owned reference to a heap block.
///
/// A block consists of a [`Header`], followed by its scan fields,
/// followed by arbitrary raw bytes.
/// The scan fields are boxed values owned by the block;
/// they are released when the block is freed.
///
/// Holding a [`Block`] means holding one reference to the block.
/// There is no destructor: references are given back explicitly
/// with [`release`][`Self::release`], which needs the execution context.
/// Forgetting to release a block leaks it.
#[repr(transparent)]
pub struct Block
{
    ptr: NonNull<Header>,

    /// Blocks are owned by one thread unless promoted.
    _phantom_data: PhantomData<*const ()>,
}

impl Block
{
    /// Create a block handle from a pointer to its header.
    ///
    /// # Safety
    ///
    /// The pointer must point to a live, initialized block,
    /// and the caller transfers one reference to the new handle.
    pub unsafe fn from_raw(ptr: NonNull<Header>) -> Self
    {
        debug_assert!(ptr.as_ptr() as usize & 0b1 == 0, "Misaligned block");
        Self{ptr, _phantom_data: PhantomData}
    }

    /// Like [`from_raw`][`Self::from_raw`], but from a pointer
    /// known to be non-null.
    pub (crate) unsafe fn from_raw_unchecked(ptr: *mut Header) -> Self
    {
        Self::from_raw(NonNull::new_unchecked(ptr))
    }

    /// Give up the reference and return the pointer to the header.
    pub fn into_raw(self) -> NonNull<Header>
    {
        self.ptr
    }

    /// Pointer to the header, without giving up the reference.
    pub fn as_ptr(&self) -> NonNull<Header>
    {
        self.ptr
    }

    /// The header of the block.
    pub fn header(&self) -> &Header
    {
        // SAFETY: The block is live as long as we hold a reference.
        unsafe { self.ptr.as_ref() }
    }

    /// The tag of the block.
    pub fn tag(&self) -> Tag
    {
        self.header().tag()
    }

    /// The number of scan fields.
    ///
    /// For large blocks this reads the count stored after the header.
    pub fn scan_field_count(&self) -> usize
    {
        // SAFETY: The block is live.
        unsafe { scan_fsize_at(self.ptr) }
    }

    /// The reference count, which counts holders beyond the first.
    pub fn refcount(&self) -> u32
    {
        self.header().refcount()
    }

    /// Whether this is the only reference to the block.
    pub fn is_unique(&self) -> bool
    {
        self.header().is_unique()
    }

    /// Whether the block has been promoted to thread-shared.
    pub fn is_thread_shared(&self) -> bool
    {
        self.header().is_thread_shared()
    }

    /// Whether two handles refer to the same block.
    pub fn ptr_eq(&self, other: &Self) -> bool
    {
        self.ptr == other.ptr
    }

    /// The scan fields of the block.
    ///
    /// The contents of a [`Ref`][`crate::Ref`] cell can change
    /// through any of its holders, so they are never borrowed:
    /// for ref blocks this is empty. Use [`Ref::get`][`crate::Ref::get`].
    pub fn fields(&self) -> &[Boxed]
    {
        if self.tag() == Tag::REF {
            return &[];
        }
        // SAFETY: The fields are immutable while shared.
        unsafe { self.scan_fields() }
    }

    /// All scan fields, including the contents of ref cells.
    ///
    /// # Safety
    ///
    /// For ref blocks, the cell must not be written
    /// while the slice is alive.
    pub (crate) unsafe fn scan_fields(&self) -> &[Boxed]
    {
        let len = scan_fsize_at(self.ptr);
        slice::from_raw_parts(fields_at(self.ptr), len)
    }

    /// The scan fields of the block, if it is uniquely owned.
    ///
    /// Mutating the fields of a shared block would be
    /// observable through the other references.
    pub fn fields_mut(&mut self) -> Option<&mut [Boxed]>
    {
        if !self.is_unique() {
            return None;
        }
        // SAFETY: We are the only holder.
        Some(unsafe { self.fields_mut_unchecked() })
    }

    /// The scan fields of the block, regardless of ownership.
    ///
    /// # Safety
    ///
    /// No other reference may observe the fields while they are borrowed.
    /// Mutable cells such as [`Ref`][`crate::Ref`] rely on this.
    pub unsafe fn fields_mut_unchecked(&mut self) -> &mut [Boxed]
    {
        let len = scan_fsize_at(self.ptr);
        slice::from_raw_parts_mut(fields_at(self.ptr), len)
    }

    /// Pointer to the raw bytes that follow the scan fields.
    ///
    /// The caller decides how many raw bytes there are;
    /// this is fixed at allocation time.
    pub fn trailing_ptr(&self) -> *mut u8
    {
        // SAFETY: Stays within the allocation, possibly one past the end.
        unsafe {
            let len = scan_fsize_at(self.ptr);
            fields_at(self.ptr).add(len).cast()
        }
    }
}

impl fmt::Debug for Block
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result
    {
        write!(
            f,
            "Block({:p} {:?} rc={:#x} fields={})",
            self.ptr,
            self.tag(),
            self.refcount(),
            self.scan_field_count(),
        )
    }
}

/// Offset from the header to the first scan field.
pub (crate) fn fields_offset(large: bool) -> usize
{
    size_of::<Header>() + if large { size_of::<Boxed>() } else { 0 }
}

/// Read the scan field count of a block.
///
/// # Safety
///
/// `ptr` must point to a live block.
pub (crate) unsafe fn scan_fsize_at(ptr: NonNull<Header>) -> usize
{
    let scan_fsize = (*ptr.as_ptr()).scan_fsize as usize;
    if scan_fsize != SCAN_FSIZE_MAX {
        return scan_fsize;
    }
    let large = ptr.as_ptr().add(1).cast::<Boxed>();
    let count = (*large).as_enum();
    debug_assert!(count.is_some(), "Corrupt large scan field count");
    count.unwrap_or(0)
}

/// Pointer to the first scan field of a block.
///
/// # Safety
///
/// `ptr` must point to a live block.
pub (crate) unsafe fn fields_at(ptr: NonNull<Header>) -> *mut Boxed
{
    let large = (*ptr.as_ptr()).is_large();
    ptr.as_ptr().cast::<u8>().add(fields_offset(large)).cast()
}
