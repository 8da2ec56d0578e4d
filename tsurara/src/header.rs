//! Block headers and the tag space.

use {
    bitflags::bitflags,
    std::{fmt, sync::atomic::{AtomicU32, Ordering::Relaxed}},
};

/// Scan field count that marks the large layout.
///
/// A block whose header stores this count keeps its true
/// scan field count in a boxed word right after the header.
pub const SCAN_FSIZE_MAX: usize = 255;

/* -------------------------------------------------------------------------- */
/*                                     Tag                                    */
/* -------------------------------------------------------------------------- */

/// Identifies the shape of a block.
///
/// Tags in `MIN ..= MAX` are constructor tags chosen by the compiler.
/// The tags above `MAX` are the built-in kinds.
/// The raw kinds come last, so that [`is_raw`][`Self::is_raw`]
/// is a single comparison.
#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[repr(transparent)]
pub struct Tag(pub u16);

#[allow(missing_docs)]
impl Tag
{
    /// Neutral tag, carried by orphaned blocks.
    pub const INVALID: Self = Self(0);

    pub const MIN: Self = Self(1);
    pub const MAX: Self = Self(65000);

    pub const OPEN:         Self = Self(65001);
    pub const BOX:          Self = Self(65002);
    pub const REF:          Self = Self(65003);
    pub const FUNCTION:     Self = Self(65004);
    pub const BIGINT:       Self = Self(65005);
    pub const STRING_SMALL: Self = Self(65006);
    pub const STRING:       Self = Self(65007);
    pub const BYTES:        Self = Self(65008);
    pub const VECTOR_SMALL: Self = Self(65009);
    pub const VECTOR:       Self = Self(65010);
    pub const INT64:        Self = Self(65011);
    pub const INT32:        Self = Self(65012);
    pub const DOUBLE:       Self = Self(65013);
    pub const FLOAT:        Self = Self(65014);

    // NOTE: CPTR_RAW must be the first raw tag.
    pub const CPTR_RAW:     Self = Self(65015);
    pub const STRING_RAW:   Self = Self(65016);
    pub const BYTES_RAW:    Self = Self(65017);
}

impl Tag
{
    /// Tag for the constructor with the given index.
    ///
    /// # Panics
    ///
    /// Panics if the resulting tag would exceed [`Tag::MAX`].
    pub fn constructor(index: u16) -> Self
    {
        let tag = index.checked_add(Self::MIN.0)
            .filter(|&tag| tag <= Self::MAX.0)
            .expect("Constructor index out of range");
        Self(tag)
    }

    /// Whether this is a constructor tag.
    pub fn is_constructor(self) -> bool
    {
        (Self::MIN ..= Self::MAX).contains(&self)
    }

    /// Whether blocks with this tag carry a custom free function.
    pub fn is_raw(self) -> bool
    {
        self >= Self::CPTR_RAW
    }
}

impl fmt::Debug for Tag
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result
    {
        let name = match *self {
            Self::INVALID      => "INVALID",
            Self::OPEN         => "OPEN",
            Self::BOX          => "BOX",
            Self::REF          => "REF",
            Self::FUNCTION     => "FUNCTION",
            Self::BIGINT       => "BIGINT",
            Self::STRING_SMALL => "STRING_SMALL",
            Self::STRING       => "STRING",
            Self::BYTES        => "BYTES",
            Self::VECTOR_SMALL => "VECTOR_SMALL",
            Self::VECTOR       => "VECTOR",
            Self::INT64        => "INT64",
            Self::INT32        => "INT32",
            Self::DOUBLE       => "DOUBLE",
            Self::FLOAT        => "FLOAT",
            Self::CPTR_RAW     => "CPTR_RAW",
            Self::STRING_RAW   => "STRING_RAW",
            Self::BYTES_RAW    => "BYTES_RAW",
            Self(tag) => return write!(f, "Tag({tag})"),
        };
        f.write_str(name)
    }
}

/* -------------------------------------------------------------------------- */
/*                                   Header                                   */
/* -------------------------------------------------------------------------- */

bitflags!
{
    /// Flags in the last byte of a header.
    pub struct HeaderFlags: u8
    {
        /// The block may be referenced from multiple threads.
        ///
        /// Once set, this flag is never cleared,
        /// and all reference count traffic on the block is atomic.
        const THREAD_SHARED = 1 << 0;
    }
}

/// Header at the start of every block.
///
/// The header is followed by the scan fields and then by raw bytes.
/// The alignment guarantees that block addresses have a clear low bit,
/// which is what distinguishes them from immediates in boxed values.
#[repr(C, align(8))]
pub struct Header
{
    /// Number of holders beyond the first.
    ///
    /// Zero means the block is uniquely owned.
    /// Non-atomic traffic uses relaxed loads and stores,
    /// which compile to plain moves.
    pub (crate) refcount: AtomicU32,

    pub (crate) tag: u16,

    /// Exact count, or [`SCAN_FSIZE_MAX`] for the large layout.
    pub (crate) scan_fsize: u8,

    pub (crate) flags: HeaderFlags,
}

impl Header
{
    /// Fresh header for a uniquely owned block.
    pub (crate) fn new(tag: Tag, scan_fsize: u8) -> Self
    {
        Self{
            refcount: AtomicU32::new(0),
            tag: tag.0,
            scan_fsize,
            flags: HeaderFlags::empty(),
        }
    }

    /// The all-zero header of an orphaned block.
    ///
    /// It has a unique count, no scan fields, and the neutral tag,
    /// so releasing an orphan only frees its storage.
    pub (crate) fn orphan() -> Self
    {
        Self::new(Tag::INVALID, 0)
    }

    /// The tag of the block.
    pub fn tag(&self) -> Tag
    {
        Tag(self.tag)
    }

    /// The reference count of the block.
    pub fn refcount(&self) -> u32
    {
        self.refcount.load(Relaxed)
    }

    /// Whether the block is uniquely owned.
    pub fn is_unique(&self) -> bool
    {
        self.refcount() == 0
    }

    /// Whether the block has been promoted to thread-shared.
    pub fn is_thread_shared(&self) -> bool
    {
        self.flags.contains(HeaderFlags::THREAD_SHARED)
    }

    /// Whether the block uses the large layout.
    pub fn is_large(&self) -> bool
    {
        self.scan_fsize as usize == SCAN_FSIZE_MAX
    }
}

#[cfg(test)]
mod tests
{
    use {super::*, std::mem::{align_of, size_of}};

    #[test]
    fn header_is_one_word()
    {
        assert_eq!(size_of::<Header>(), 8);
        assert!(align_of::<Header>() >= 2, "Block addresses must be even");
    }

    #[test]
    fn raw_tags_come_last()
    {
        assert!(Tag::CPTR_RAW.is_raw());
        assert!(Tag::STRING_RAW.is_raw());
        assert!(Tag::BYTES_RAW.is_raw());
        assert!(!Tag::FLOAT.is_raw());
        assert!(!Tag::FUNCTION.is_raw());
        assert!(!Tag::MAX.is_raw());
        assert!(!Tag::INVALID.is_raw());
    }

    #[test]
    fn constructor_tags()
    {
        assert_eq!(Tag::constructor(0), Tag::MIN);
        assert!(Tag::constructor(41).is_constructor());
        assert!(!Tag::VECTOR.is_constructor());
        assert!(!Tag::INVALID.is_constructor());
        assert_eq!(format!("{:?}", Tag::constructor(2)), "Tag(3)");
        assert_eq!(format!("{:?}", Tag::REF), "REF");
    }

    #[test]
    #[should_panic(expected = "Constructor index out of range")]
    fn constructor_tag_out_of_range()
    {
        Tag::constructor(Tag::MAX.0);
    }

    #[test]
    fn orphan_header_is_neutral()
    {
        let header = Header::orphan();
        assert!(header.is_unique());
        assert_eq!(header.tag(), Tag::INVALID);
        assert_eq!(header.scan_fsize, 0);
        assert!(!header.is_thread_shared());
    }
}
