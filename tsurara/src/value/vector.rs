use {
    crate::{
        Block, Boxed, Context, SCAN_FSIZE_MAX, Tag,
        block::fields_at,
        heap::min_size,
        refcount::release_raw,
    },
    scope_exit::OnUnwind,
};

/// Fixed-length array of boxed values.
///
/// The first scan field holds the length as an enum immediate,
/// and the elements follow. Vectors with fewer than
/// `SCAN_FSIZE_MAX - 1` elements use the small layout
/// with tag [`VECTOR_SMALL`][`Tag::VECTOR_SMALL`];
/// longer vectors use the large layout with tag [`VECTOR`][`Tag::VECTOR`].
#[repr(transparent)]
pub struct Vector
{
    block: Block,
}

impl Vector
{
    /// Allocate a vector with every element a duplicate of `default`.
    pub fn new(len: usize, default: Boxed, ctx: &mut Context) -> Self
    {
        let this = Self::from_fn(len, |_| default.dup(), ctx);
        default.release(ctx);
        this
    }

    /// Allocate a vector with elements produced by `f`.
    pub fn from_fn<F>(len: usize, mut f: F, ctx: &mut Context) -> Self
        where F: FnMut(usize) -> Boxed
    {
        let scan_field_count = len + 1;
        let size = min_size(scan_field_count, false);
        let mut block = if scan_field_count < SCAN_FSIZE_MAX {
            Block::allocate(size, scan_field_count, Tag::VECTOR_SMALL, ctx)
        } else {
            Block::allocate_large(size, scan_field_count, Tag::VECTOR, ctx)
        };
        // SAFETY: The block is fresh, so we are the only holder.
        unsafe { block.fields_mut_unchecked()[0] = Boxed::from_enum(len); }

        // If `f` panics, free the block and the elements made so far.
        let ptr = block.into_raw();
        let guard = OnUnwind::new(|| unsafe { release_raw(ptr, ctx) });
        // SAFETY: The block is unique and has `len + 1` fields.
        let elements = unsafe { fields_at(ptr).add(1) };
        for i in 0 .. len {
            unsafe { *elements.add(i) = f(i); }
        }
        guard.dismiss();

        // SAFETY: We own the only reference.
        Self{block: unsafe { Block::from_raw(ptr) }}
    }

    /// Allocate a vector holding the given elements.
    pub fn from_elements<I>(elements: I, ctx: &mut Context) -> Self
        where I: IntoIterator<Item = Boxed>, I::IntoIter: ExactSizeIterator
    {
        let mut elements = elements.into_iter();
        let len = elements.len();
        Self::from_fn(len, |_| elements.next().unwrap_or_else(Boxed::unit), ctx)
    }

    /// The number of elements.
    pub fn len(&self) -> usize
    {
        let len = self.block.fields()[0].as_enum();
        debug_assert!(len.is_some(), "Corrupt vector length");
        len.unwrap_or(0)
    }

    /// Whether the vector has no elements.
    pub fn is_empty(&self) -> bool
    {
        self.len() == 0
    }

    /// The elements.
    pub fn elements(&self) -> &[Boxed]
    {
        &self.block.fields()[1 ..]
    }

    /// Duplicate the element at the given index.
    pub fn at(&self, index: usize) -> Option<Boxed>
    {
        self.elements().get(index).map(Boxed::dup)
    }

    /// Create an additional reference to the vector.
    pub fn dup(&self) -> Self
    {
        Self{block: self.block.dup()}
    }

    /// Release the vector.
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

    /// Wrap the block if it has a vector tag.
    pub fn from_block(block: Block) -> Result<Self, Block>
    {
        match block.tag() {
            Tag::VECTOR_SMALL | Tag::VECTOR => Ok(Self{block}),
            _ => Err(block),
        }
    }

    /// Box the vector.
    pub fn into_boxed(self) -> Boxed
    {
        Boxed::from_block(self.block)
    }

    /// Unbox a vector.
    pub fn from_boxed(boxed: Boxed) -> Result<Self, Boxed>
    {
        let block = boxed.into_block()?;
        Self::from_block(block).map_err(Boxed::from_block)
    }
}
