use {
    crate::{Block, Context},
    std::{fmt, marker::PhantomData, mem::forget, num::NonZeroUsize},
};

/// Smallest integer that can be stored as an immediate.
pub const SMALL_INT_MIN: isize = isize::MIN >> 1;

/// Largest integer that can be stored as an immediate.
pub const SMALL_INT_MAX: isize = isize::MAX >> 1;

/// Uniform word for polymorphic fields.
///
/// A boxed value is either an immediate or an owned reference to a block.
/// Iff the least significant bit is set, the value is an immediate;
/// the remaining bits are the payload (signed for integers,
/// unsigned for enum tags and unit).
/// Otherwise the word is the address of a block,
/// whose low bit is clear because headers are 8-aligned.
///
/// Like [`Block`], a boxed value has no destructor.
/// Owned references inside it must be given back with
/// [`release`][`Self::release`]; forgetting to do so leaks the block.
#[repr(transparent)]
pub struct Boxed
{
    /// Immediates are tagged and block addresses are never null,
    /// so the word is never zero.
    bits: NonZeroUsize,

    /// Boxed values may own thread-local blocks.
    _phantom_data: PhantomData<*const ()>,
}

impl Boxed
{
    /// The unit value.
    pub const fn unit() -> Self
    {
        Self::from_enum(0)
    }

    /// Box an enum tag.
    ///
    /// Enum tags use one bit less than a word.
    pub const fn from_enum(tag: usize) -> Self
    {
        debug_assert!(tag <= usize::MAX >> 1, "Enum tag does not fit");
        // SAFETY: The low bit is set, so this is not zero.
        let bits = unsafe { NonZeroUsize::new_unchecked(tag << 1 | 1) };
        Self{bits, _phantom_data: PhantomData}
    }

    /// Box a small integer.
    ///
    /// Returns [`None`] if the integer is outside
    /// [`SMALL_INT_MIN`] ..= [`SMALL_INT_MAX`].
    pub fn from_small_int(value: isize) -> Option<Self>
    {
        if !(SMALL_INT_MIN ..= SMALL_INT_MAX).contains(&value) {
            return None;
        }
        let bits = (value << 1 | 1) as usize;
        // SAFETY: The low bit is set, so this is not zero.
        Some(unsafe { Self::from_raw(bits) })
    }

    /// Box a block, taking over its reference.
    pub fn from_block(block: Block) -> Self
    {
        let ptr = block.into_raw();
        // SAFETY: Block addresses are non-null and even.
        unsafe { Self::from_raw(ptr.as_ptr() as usize) }
    }

    /// Create a boxed value from its bit pattern.
    ///
    /// # Safety
    ///
    /// The bits must be a tagged immediate or the address of a live block,
    /// and the caller transfers one reference to the block, if any.
    pub unsafe fn from_raw(bits: usize) -> Self
    {
        debug_assert!(bits != 0, "Boxed values are never zero");
        Self{bits: NonZeroUsize::new_unchecked(bits), _phantom_data: PhantomData}
    }

    /// Give up ownership and return the bit pattern.
    pub fn into_raw(self) -> usize
    {
        let bits = self.bits.get();
        forget(self);
        bits
    }

    /// The bit pattern, without giving up ownership.
    pub fn as_raw(&self) -> usize
    {
        self.bits.get()
    }

    /// Copy the word without touching any reference count.
    ///
    /// This is how deconstruction of a uniquely owned block
    /// moves its fields out without duplicating them.
    ///
    /// # Safety
    ///
    /// At most one of the two copies may be released or otherwise consumed.
    pub unsafe fn alias(&self) -> Self
    {
        Self::from_raw(self.as_raw())
    }

    /// Whether this is an immediate.
    pub fn is_immediate(&self) -> bool
    {
        self.as_raw() & 1 == 1
    }

    /// Whether this is the unit value.
    pub fn is_unit(&self) -> bool
    {
        self.as_enum() == Some(0)
    }

    /// The enum tag, if this is an immediate.
    pub fn as_enum(&self) -> Option<usize>
    {
        self.is_immediate().then(|| self.as_raw() >> 1)
    }

    /// The small integer, if this is an immediate.
    pub fn as_small_int(&self) -> Option<isize>
    {
        // NOTE: Cast to isize must happen before the shift,
        //       as negative numbers require sign extension.
        self.is_immediate().then(|| self.as_raw() as isize >> 1)
    }

    /// Borrow the block, if this is a reference.
    pub fn as_block(&self) -> Option<&Block>
    {
        if self.is_immediate() {
            return None;
        }
        // SAFETY: Both types are transparent wrappers around
        //         a non-null word and the word is a block address.
        Some(unsafe { &*(self as *const Self).cast::<Block>() })
    }

    /// Take the block out, if this is a reference.
    pub fn into_block(self) -> Result<Block, Self>
    {
        if self.is_immediate() {
            return Err(self);
        }
        let bits = self.into_raw();
        // SAFETY: The word is the address of a live block we own.
        Ok(unsafe { Block::from_raw_unchecked(bits as *mut _) })
    }

    /// Duplicate the value.
    ///
    /// Immediates are copied; blocks are [duplicated][`Block::dup`].
    #[inline]
    pub fn dup(&self) -> Self
    {
        if let Some(block) = self.as_block() {
            Self::from_block(block.dup())
        } else {
            // SAFETY: Immediates carry no ownership.
            unsafe { self.alias() }
        }
    }

    /// Release the value.
    ///
    /// Immediates are ignored; blocks are [released][`Block::release`].
    #[inline]
    pub fn release(self, ctx: &mut Context)
    {
        if let Ok(block) = self.into_block() {
            block.release(ctx);
        }
    }
}

impl fmt::Debug for Boxed
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result
    {
        if self.is_immediate() {
            write!(f, "Boxed({:#x})", self.as_raw() >> 1)
        } else {
            write!(f, "Boxed({:#x} {:?})", self.as_raw(), self.as_block())
        }
    }
}

#[cfg(test)]
mod tests
{
    use {super::*, proptest::proptest};

    #[test]
    fn unit_is_enum_zero()
    {
        let unit = Boxed::unit();
        assert!(unit.is_immediate());
        assert!(unit.is_unit());
        assert_eq!(unit.as_enum(), Some(0));
        assert!(unit.as_block().is_none());
    }

    #[test]
    fn small_int_bounds()
    {
        assert!(Boxed::from_small_int(SMALL_INT_MAX).is_some());
        assert!(Boxed::from_small_int(SMALL_INT_MIN).is_some());
        assert!(Boxed::from_small_int(SMALL_INT_MAX + 1).is_none());
        assert!(Boxed::from_small_int(SMALL_INT_MIN - 1).is_none());
    }

    #[test]
    fn option_of_boxed_is_one_word()
    {
        use std::mem::size_of;
        assert_eq!(size_of::<Option<Boxed>>(), size_of::<usize>());
    }

    proptest!
    {
        #[test]
        fn small_int_roundtrip(value in SMALL_INT_MIN ..= SMALL_INT_MAX)
        {
            let boxed = Boxed::from_small_int(value).unwrap();
            assert!(boxed.is_immediate());
            assert_eq!(boxed.as_small_int(), Some(value));
        }

        #[test]
        fn enum_roundtrip(tag in 0usize ..= usize::MAX >> 1)
        {
            let boxed = Boxed::from_enum(tag);
            assert!(boxed.as_block().is_none());
            assert_eq!(boxed.as_enum(), Some(tag));
        }
    }
}
