use {
    crate::{
        Block, Boxed, Context, FatalError, Tag,
        block::fields_at,
        fatal,
        heap::min_size,
    },
    std::ptr,
};

/// Mutable cell holding one boxed value.
///
/// All holders of a ref observe the same cell.
/// The contents are never borrowed, not even through
/// [`Block::fields`], which is empty for ref blocks;
/// they are read by duplication with [`get`][`Self::get`].
/// Refs are mutated only from the owning thread:
/// mutating a ref that was promoted to thread-shared is fatal.
#[repr(transparent)]
pub struct Ref
{
    block: Block,
}

impl Ref
{
    /// Allocate a ref holding the given value.
    pub fn new(value: Boxed, ctx: &mut Context) -> Self
    {
        let mut block = Block::allocate(min_size(1, false), 1, Tag::REF, ctx);
        // SAFETY: The block is fresh, so we are the only holder.
        unsafe { block.fields_mut_unchecked()[0] = value; }
        Self{block}
    }

    /// Duplicate the current value.
    pub fn get(&self) -> Boxed
    {
        // SAFETY: The borrow ends before anything can write the cell.
        unsafe { self.block.scan_fields()[0].dup() }
    }

    /// Replace the value and return the old one.
    pub fn swap(&mut self, value: Boxed) -> Boxed
    {
        if self.block.is_thread_shared() {
            fatal(FatalError::MutateShared{tag: self.block.tag()});
        }
        // SAFETY: Nobody borrows the cell, and only this thread can reach it.
        unsafe { ptr::replace(fields_at(self.block.as_ptr()), value) }
    }

    /// Replace the value and release the old one.
    pub fn set(&mut self, value: Boxed, ctx: &mut Context)
    {
        self.swap(value).release(ctx);
    }

    /// Create an additional reference to the cell.
    pub fn dup(&self) -> Self
    {
        Self{block: self.block.dup()}
    }

    /// Release the ref.
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

    /// Wrap the block if it has the ref tag.
    pub fn from_block(block: Block) -> Result<Self, Block>
    {
        if block.tag() == Tag::REF { Ok(Self{block}) } else { Err(block) }
    }

    /// Box the ref.
    pub fn into_boxed(self) -> Boxed
    {
        Boxed::from_block(self.block)
    }

    /// Unbox a ref.
    pub fn from_boxed(boxed: Boxed) -> Result<Self, Boxed>
    {
        let block = boxed.into_block()?;
        Self::from_block(block).map_err(Boxed::from_block)
    }
}

#[cfg(test)]
mod tests
{
    use {super::*, crate::RuntimeConfig};

    fn cell(ctx: &mut Context) -> Block
    {
        Block::allocate(min_size(0, false), 0, Tag::MIN, ctx)
    }

    #[test]
    fn get_set_swap()
    {
        let mut ctx = Context::new(RuntimeConfig::default());
        let mut r = Ref::new(Boxed::from_small_int(1).unwrap(), &mut ctx);
        let mut alias = r.dup();
        assert_eq!(r.get().as_small_int(), Some(1));

        r.set(Boxed::from_small_int(2).unwrap(), &mut ctx);
        assert_eq!(alias.get().as_small_int(), Some(2));

        let old = alias.swap(Boxed::unit());
        assert_eq!(old.as_small_int(), Some(2));
        assert!(r.get().is_unit());

        alias.release(&mut ctx);
        r.release(&mut ctx);
        assert_eq!(ctx.heap_stats().live(), 0);
    }

    #[test]
    fn set_releases_old_block()
    {
        let mut ctx = Context::new(RuntimeConfig::default());
        let first = Boxed::from_block(cell(&mut ctx));
        let mut r = Ref::new(first, &mut ctx);

        let got = r.get();
        assert_eq!(got.as_block().unwrap().refcount(), 1);
        got.release(&mut ctx);

        let second = Boxed::from_block(cell(&mut ctx));
        r.set(second, &mut ctx);
        assert_eq!(ctx.heap_stats().frees, 1);

        r.release(&mut ctx);
        assert_eq!(ctx.heap_stats().live(), 0);
    }

    #[test]
    fn contents_are_not_borrowed()
    {
        let mut ctx = Context::new(RuntimeConfig::default());
        let mut r = Ref::new(Boxed::from_block(cell(&mut ctx)), &mut ctx);
        let alias = r.dup();
        assert_eq!(alias.as_block().scan_field_count(), 1);
        assert!(alias.as_block().fields().is_empty());

        // Readers hold their own reference to the contents,
        // so replacing them through another holder does not free them.
        let old = alias.get();
        r.set(Boxed::unit(), &mut ctx);
        assert_eq!(ctx.heap_stats().frees, 0);
        assert!(old.as_block().unwrap().is_unique());
        old.release(&mut ctx);
        assert_eq!(ctx.heap_stats().frees, 1);

        alias.release(&mut ctx);
        r.release(&mut ctx);
        assert_eq!(ctx.heap_stats().live(), 0);
    }
}
