use {
    crate::{
        Block, Boxed, Context, SCAN_FSIZE_MAX, Tag,
        block::fields_at,
        heap::min_size,
        refcount::release_raw,
    },
    scope_exit::OnUnwind,
    std::{fmt, mem::size_of, ptr},
};

/// Code of a function block.
///
/// The code receives the function itself, which gives it
/// access to its free variables, and the argument.
/// It owns both and must release or return them.
pub type FunctionCode = fn(Function, Boxed, &mut Context) -> Boxed;

/// Closure: a block with code and free variables.
///
/// The free variables are the scan fields of the block.
/// The code pointer is stored in the raw bytes after them.
#[repr(transparent)]
pub struct Function
{
    block: Block,
}

impl Function
{
    /// Allocate a function with the given code and free variables.
    pub fn new<I>(code: FunctionCode, free_vars: I, ctx: &mut Context) -> Self
        where I: IntoIterator<Item = Boxed>, I::IntoIter: ExactSizeIterator
    {
        let free_vars = free_vars.into_iter();
        let len = free_vars.len();
        let size = min_size(len, false) + size_of::<FunctionCode>();
        let block = if len < SCAN_FSIZE_MAX {
            Block::allocate(size, len, Tag::FUNCTION, ctx)
        } else {
            Block::allocate_large(size, len, Tag::FUNCTION, ctx)
        };

        // SAFETY: The raw bytes have room for the code pointer.
        unsafe { ptr::write(block.trailing_ptr().cast::<FunctionCode>(), code); }

        // If the iterator panics, free the block and what was stored so far.
        let ptr = block.into_raw();
        let guard = OnUnwind::new(|| unsafe { release_raw(ptr, ctx) });
        // SAFETY: The block is unique and has `len` fields.
        let fields = unsafe { fields_at(ptr) };
        for (i, var) in free_vars.take(len).enumerate() {
            unsafe { *fields.add(i) = var; }
        }
        guard.dismiss();

        // SAFETY: We own the only reference.
        Self{block: unsafe { Block::from_raw(ptr) }}
    }

    /// The identity function.
    pub fn identity(ctx: &mut Context) -> Self
    {
        fn code(this: Function, arg: Boxed, ctx: &mut Context) -> Boxed
        {
            this.release(ctx);
            arg
        }
        Self::new(code, [], ctx)
    }

    /// Call the function, consuming it and the argument.
    pub fn call(self, arg: Boxed, ctx: &mut Context) -> Boxed
    {
        let code = self.code();
        code(self, arg, ctx)
    }

    /// The code of the function.
    pub fn code(&self) -> FunctionCode
    {
        // SAFETY: Function blocks store their code after the fields.
        unsafe { ptr::read(self.block.trailing_ptr().cast::<FunctionCode>()) }
    }

    /// The free variables of the function.
    pub fn free_vars(&self) -> &[Boxed]
    {
        self.block.fields()
    }

    /// Duplicate the free variable at the given index.
    ///
    /// # Panics
    ///
    /// Panics if the index is out of bounds.
    pub fn free_var(&self, index: usize) -> Boxed
    {
        self.free_vars()[index].dup()
    }

    /// Create an additional reference to the function.
    pub fn dup(&self) -> Self
    {
        Self{block: self.block.dup()}
    }

    /// Release the function.
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

    /// Wrap the block if it has the function tag.
    pub fn from_block(block: Block) -> Result<Self, Block>
    {
        if block.tag() == Tag::FUNCTION {
            Ok(Self{block})
        } else {
            Err(block)
        }
    }

    /// Box the function.
    pub fn into_boxed(self) -> Boxed
    {
        Boxed::from_block(self.block)
    }

    /// Unbox a function.
    pub fn from_boxed(boxed: Boxed) -> Result<Self, Boxed>
    {
        let block = boxed.into_block()?;
        Self::from_block(block).map_err(Boxed::from_block)
    }
}

impl fmt::Debug for Function
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result
    {
        write!(f, "Function({:p}, {:?})", self.code() as *const (), self.block)
    }
}
