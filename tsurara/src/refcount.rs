//! Reference counting protocol.
//!
//! The reference count of a block counts holders beyond the first,
//! so a freshly allocated block has count zero and is uniquely owned.
//! The 32-bit counter is partitioned as follows:
//!
//! | Count                          | Meaning                                 |
//! |--------------------------------|-----------------------------------------|
//! | `0`                            | Unique.                                 |
//! | `1 .. RC_SHARED`               | Shared within one thread.               |
//! | `RC_SHARED .. RC_STICKY`       | Thread-shared (`RC_SHARED + extra`),    |
//! |                                | or a locally overflowed count.          |
//! | `RC_STICKY ..`                 | Sticky: pinned forever, never freed.    |
//!
//! Both [`dup`][`Block::dup`] and [`release`][`Block::release`]
//! test the sign of the count interpreted as `i32`.
//! For the overwhelmingly common thread-local blocks this test
//! is the only branch, and the count is updated with a plain store.
//! The thread-shared flag in the header decides whether the slow path
//! uses atomic read-modify-write operations.
//!
//! A sticky block is never freed,
//! so a count never wraps around while the block is referenced.

use {
    crate::{
        Block, Context, Header, HeaderFlags, Tag,
        block::{fields_at, scan_fsize_at},
        value::raw,
    },
    smallvec::{SmallVec, smallvec},
    std::{
        ptr::{self, NonNull},
        sync::atomic::{Ordering::{Acquire, Relaxed, Release}, fence},
    },
};

/// Base count of a thread-shared block with no extra holders.
pub const RC_SHARED: u32 = 0x8000_0000;

/// Counts at or above this are sticky.
pub const RC_STICKY: u32 = 0xC000_0000;

/// Ownership state of a block, as derived from its count and flags.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Ownership
{
    /// There is exactly one holder.
    Unique,

    /// There are `extra + 1` holders, all on the owning thread.
    Shared
    {
        /// Holders beyond the first.
        extra: u32,
    },

    /// The block may be held from any thread.
    ThreadShared
    {
        /// Holders beyond the first.
        extra: u32,
    },

    /// The count saturated; the block is never freed.
    Sticky,
}

/* -------------------------------------------------------------------------- */
/*                              Dup and release                               */
/* -------------------------------------------------------------------------- */

impl Block
{
    /// Create an additional reference to the block.
    #[inline]
    pub fn dup(&self) -> Self
    {
        increment(self.header());
        // SAFETY: We just accounted for the new reference.
        unsafe { Self::from_raw(self.as_ptr()) }
    }

    /// Give up this reference to the block.
    ///
    /// When the last reference is released, the block is freed:
    /// its scan fields are released, the destructor of a raw block runs,
    /// and the storage is returned to the heap.
    #[inline]
    pub fn release(self, ctx: &mut Context)
    {
        let ptr = self.into_raw();
        // SAFETY: We owned one reference.
        unsafe { release_raw(ptr, ctx) }
    }

    /// The ownership state of the block.
    pub fn ownership(&self) -> Ownership
    {
        let rc = self.refcount();
        if rc >= RC_STICKY {
            Ownership::Sticky
        } else if self.is_thread_shared() {
            Ownership::ThreadShared{extra: rc.saturating_sub(RC_SHARED)}
        } else if rc == 0 {
            Ownership::Unique
        } else {
            Ownership::Shared{extra: rc}
        }
    }
}

#[inline]
fn increment(header: &Header)
{
    let rc = header.refcount.load(Relaxed);
    if (rc as i32) < 0 {
        increment_slow(header, rc);
    } else {
        header.refcount.store(rc + 1, Relaxed);
    }
}

#[cold]
#[inline(never)]
fn increment_slow(header: &Header, rc: u32)
{
    if rc >= RC_STICKY {
        return;
    }
    let new = if header.is_thread_shared() {
        header.refcount.fetch_add(1, Relaxed).wrapping_add(1)
    } else {
        header.refcount.store(rc + 1, Relaxed);
        rc + 1
    };
    if new == RC_STICKY {
        pinned(header);
    }
}

#[cold]
fn pinned(header: &Header)
{
    tracing::warn!(
        tag = ?header.tag(),
        "Reference count saturated, block is now sticky and will not be freed",
    );
}

/// Release one reference and free the block if it was the last.
///
/// # Safety
///
/// The caller gives up one reference to the live block at `ptr`.
#[inline]
pub (crate) unsafe fn release_raw(ptr: NonNull<Header>, ctx: &mut Context)
{
    if decrement(ptr.as_ref()) {
        free_block(ptr, ctx);
    }
}

/// Decrement the count and return whether the block must now be freed.
#[inline]
fn decrement(header: &Header) -> bool
{
    let rc = header.refcount.load(Relaxed);
    if rc as i32 > 0 {
        header.refcount.store(rc - 1, Relaxed);
        false
    } else {
        decrement_slow(header, rc)
    }
}

#[cold]
#[inline(never)]
fn decrement_slow(header: &Header, rc: u32) -> bool
{
    if rc == 0 {
        return true;
    }
    if rc >= RC_STICKY {
        return false;
    }
    if header.is_thread_shared() {
        // Implementation taken from Arc::drop.
        if header.refcount.fetch_sub(1, Release) != RC_SHARED {
            return false;
        }
        fence(Acquire);
        header.refcount.store(0, Relaxed);
        true
    } else {
        header.refcount.store(rc - 1, Relaxed);
        false
    }
}

/* -------------------------------------------------------------------------- */
/*                                  Freeing                                   */
/* -------------------------------------------------------------------------- */

/// Free a block whose last reference was released.
///
/// Children are freed recursively up to the configured depth.
/// Deeper children are pushed on the deferred-free list,
/// which is drained before this function returns.
///
/// # Safety
///
/// Nobody may hold a reference to the block.
#[inline(never)]
pub (crate) unsafe fn free_block(ptr: NonNull<Header>, ctx: &mut Context)
{
    free_rec(ptr, 0, ctx);
    drain_deferred(ctx);
}

/// Free all blocks on the deferred-free list, most recent first.
pub (crate) fn drain_deferred(ctx: &mut Context)
{
    let mut drained = 0usize;
    while let Some(ptr) = ctx.deferred.pop() {
        // SAFETY: Deferred blocks have no holders left.
        unsafe { free_rec(ptr, 0, ctx); }
        drained += 1;
    }
    if drained != 0 {
        tracing::trace!(drained, "Drained deferred frees");
    }
}

unsafe fn free_rec(ptr: NonNull<Header>, depth: usize, ctx: &mut Context)
{
    let len = scan_fsize_at(ptr);
    let fields = fields_at(ptr);
    for i in 0 .. len {
        let field = ptr::read(fields.add(i));
        let Ok(child) = field.into_block() else { continue };
        let child = child.into_raw();
        if !decrement(child.as_ref()) {
            continue;
        }
        if depth < ctx.config.release_depth {
            free_rec(child, depth + 1, ctx);
        } else {
            ctx.deferred.push(child);
        }
    }

    if ptr.as_ref().tag().is_raw() {
        raw::destroy(ptr);
    }

    ctx.heap.free(ptr.cast());
}

/* -------------------------------------------------------------------------- */
/*                           Thread-shared promotion                          */
/* -------------------------------------------------------------------------- */

impl Block
{
    /// Promote the block and everything reachable from it to thread-shared.
    ///
    /// The transition is one-way: the flag is never cleared,
    /// and from now on all count traffic on these blocks is atomic.
    /// Counts are rebased onto [`RC_SHARED`].
    /// A block with a locally overflowed count cannot be rebased
    /// and becomes sticky instead.
    pub fn into_thread_shared(self) -> ThreadShared
    {
        let mut stack: SmallVec<[NonNull<Header>; 16]> = smallvec![self.as_ptr()];
        while let Some(ptr) = stack.pop() {
            // SAFETY: Blocks that are not yet thread-shared
            //         are only reachable from this thread.
            unsafe {
                let header = ptr.as_ptr();
                if (*header).is_thread_shared() {
                    continue;
                }
                let rc = (*header).refcount.load(Relaxed);
                let rc = if rc >= RC_SHARED { RC_STICKY } else { rc + RC_SHARED };
                if rc == RC_STICKY {
                    pinned(&*header);
                }
                (*header).refcount.store(rc, Relaxed);
                (*header).flags.insert(HeaderFlags::THREAD_SHARED);

                let fields = fields_at(ptr);
                for i in 0 .. scan_fsize_at(ptr) {
                    if let Some(child) = (*fields.add(i)).as_block() {
                        stack.push(child.as_ptr());
                    }
                }
            }
        }
        ThreadShared{ptr: self.into_raw()}
    }
}

/// Reference to a thread-shared block that can cross threads.
///
/// Use [`into_block`][`Self::into_block`] on the receiving thread
/// to work with the block through that thread's context.
pub struct ThreadShared
{
    ptr: NonNull<Header>,
}

// SAFETY: All count traffic on thread-shared blocks is atomic,
//         and their scan fields are themselves thread-shared.
unsafe impl Send for ThreadShared { }
unsafe impl Sync for ThreadShared { }

impl ThreadShared
{
    /// Create an additional reference to the block.
    pub fn dup(&self) -> Self
    {
        // SAFETY: We hold a reference, so the block is live.
        increment(unsafe { self.ptr.as_ref() });
        Self{ptr: self.ptr}
    }

    /// The tag of the block.
    pub fn tag(&self) -> Tag
    {
        // SAFETY: We hold a reference, so the block is live.
        unsafe { self.ptr.as_ref() }.tag()
    }

    /// Turn the reference into a block on the current thread.
    pub fn into_block(self) -> Block
    {
        // SAFETY: We transfer our reference.
        unsafe { Block::from_raw(self.ptr) }
    }
}

#[cfg(test)]
mod tests
{
    use {
        super::*,
        crate::{Boxed, RuntimeConfig, heap::min_size},
        proptest::proptest,
    };

    fn leaf(ctx: &mut Context) -> Block
    {
        Block::allocate(min_size(0, false), 0, Tag::MIN, ctx)
    }

    fn node(children: Vec<Boxed>, ctx: &mut Context) -> Block
    {
        let len = children.len();
        let mut block = Block::allocate(min_size(len, false), len, Tag::MIN, ctx);
        let fields = block.fields_mut().unwrap();
        for (field, child) in fields.iter_mut().zip(children) {
            *field = child;
        }
        block
    }

    #[test]
    fn dup_release()
    {
        let mut ctx = Context::new(RuntimeConfig::default());
        let a = leaf(&mut ctx);
        let b = a.dup();
        assert!(a.ptr_eq(&b));
        assert_eq!(a.ownership(), Ownership::Shared{extra: 1});
        b.release(&mut ctx);
        assert_eq!(a.ownership(), Ownership::Unique);
        assert_eq!(ctx.heap_stats().frees, 0);
        a.release(&mut ctx);
        assert_eq!(ctx.heap_stats().frees, 1);
    }

    #[test]
    fn sticky_saturation()
    {
        let mut ctx = Context::new(RuntimeConfig::default());
        let block = leaf(&mut ctx);
        block.header().refcount.store(RC_STICKY - 1, Relaxed);

        // This dup reaches the threshold.
        let d = block.dup();
        assert_eq!(block.refcount(), RC_STICKY);
        assert_eq!(block.ownership(), Ownership::Sticky);

        // Further traffic is idempotent.
        for _ in 0 .. 10 {
            block.dup().release(&mut ctx);
        }
        d.release(&mut ctx);
        assert_eq!(block.refcount(), RC_STICKY);

        // Never freed.
        block.release(&mut ctx);
        assert_eq!(ctx.heap_stats().frees, 0);
    }

    #[test]
    fn thread_shared_sticky_saturation()
    {
        let mut ctx = Context::new(RuntimeConfig::default());
        let block = leaf(&mut ctx).into_thread_shared().into_block();
        block.header().refcount.store(RC_STICKY - 1, Relaxed);

        // The atomic increment reaches the threshold.
        let d = block.dup();
        assert_eq!(block.refcount(), RC_STICKY);
        assert_eq!(block.ownership(), Ownership::Sticky);

        for _ in 0 .. 10 {
            block.dup().release(&mut ctx);
        }
        d.release(&mut ctx);
        block.release(&mut ctx);
        assert_eq!(ctx.heap_stats().frees, 0);
    }

    #[test]
    fn local_count_overflow()
    {
        let mut ctx = Context::new(RuntimeConfig::default());
        let block = leaf(&mut ctx);
        block.header().refcount.store(i32::MAX as u32, Relaxed);

        let d = block.dup();
        assert_eq!(block.refcount(), RC_SHARED);
        assert_eq!(block.ownership(), Ownership::Shared{extra: RC_SHARED});
        let e = block.dup();
        assert_eq!(block.refcount(), RC_SHARED + 1);

        e.release(&mut ctx);
        d.release(&mut ctx);
        assert_eq!(block.refcount(), i32::MAX as u32);
        assert_eq!(ctx.heap_stats().frees, 0);

        block.header().refcount.store(0, Relaxed);
        block.release(&mut ctx);
        assert_eq!(ctx.heap_stats().frees, 1);
    }

    #[test]
    fn thread_shared_release()
    {
        let mut ctx = Context::new(RuntimeConfig::default());
        let child = leaf(&mut ctx);
        let parent = node(vec![Boxed::from_block(child)], &mut ctx);
        let extra = parent.dup();

        let shared = parent.into_thread_shared();
        let block = shared.into_block();
        assert!(block.is_thread_shared());
        assert_eq!(block.ownership(), Ownership::ThreadShared{extra: 1});
        let child = block.fields()[0].as_block().unwrap();
        assert!(child.is_thread_shared());
        assert_eq!(child.ownership(), Ownership::ThreadShared{extra: 0});

        extra.release(&mut ctx);
        assert_eq!(ctx.heap_stats().frees, 0);
        block.release(&mut ctx);
        assert_eq!(ctx.heap_stats().frees, 2);
    }

    #[test]
    fn free_releases_scan_fields_only()
    {
        let mut ctx = Context::new(RuntimeConfig::default());
        let kept = leaf(&mut ctx);
        let children = vec![
            Boxed::from_block(leaf(&mut ctx)),
            Boxed::from_small_int(7).unwrap(),
            Boxed::from_block(kept.dup()),
            Boxed::from_block(leaf(&mut ctx)),
        ];
        let parent = node(children, &mut ctx);
        parent.release(&mut ctx);
        assert_eq!(ctx.heap_stats().frees, 3);
        assert!(kept.is_unique());
        kept.release(&mut ctx);
        assert_eq!(ctx.heap_stats().live(), 0);
    }

    #[test]
    fn deep_chain_is_deferred()
    {
        let config = RuntimeConfig::builder().release_depth(2).build();
        let mut ctx = Context::new(config);
        let mut chain = leaf(&mut ctx);
        for _ in 0 .. 10_000 {
            chain = node(vec![Boxed::from_block(chain)], &mut ctx);
        }
        chain.release(&mut ctx);
        assert_eq!(ctx.heap_stats().frees, 10_001);
        assert!(ctx.deferred.is_empty());
    }

    proptest!
    {
        #[test]
        fn balanced_dup_release(
            dups in 0usize .. 64,
            order in proptest::collection::vec(proptest::bool::ANY, 0 .. 64),
        )
        {
            let mut ctx = Context::new(RuntimeConfig::default());
            let block = leaf(&mut ctx);
            let mut held = Vec::new();
            for _ in 0 .. dups {
                held.push(block.dup());
            }
            // Interleave further dups and releases.
            for dup in order {
                if dup || held.is_empty() {
                    held.push(block.dup());
                } else if let Some(d) = held.pop() {
                    d.release(&mut ctx);
                }
                assert_eq!(ctx.heap_stats().frees, 0);
            }
            for d in held {
                assert_eq!(ctx.heap_stats().frees, 0);
                d.release(&mut ctx);
            }
            assert!(block.is_unique());
            block.release(&mut ctx);
            assert_eq!(ctx.heap_stats().frees, 1);
        }
    }
}
