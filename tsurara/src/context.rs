//! Per-thread execution context.

use {
    crate::{
        Header, Heap, HeapStats, Integer, Marker, RuntimeConfig,
        effect::YieldRecord,
        refcount::drain_deferred,
    },
    smallvec::SmallVec,
    std::{
        cell::RefCell,
        fmt,
        mem::take,
        ptr::NonNull,
        sync::atomic::{AtomicU64, Ordering::SeqCst},
    },
};

/// Identifies the thread that owns a context.
///
/// Thread ids are unique for the lifetime of the process.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct ThreadId(u64);

impl ThreadId
{
    fn fresh() -> Self
    {
        static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(0);
        Self(NEXT_THREAD_ID.fetch_add(1, SeqCst))
    }
}

impl fmt::Display for ThreadId
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result
    {
        write!(f, "#{}", self.0)
    }
}

/// State owned by one thread of generated code.
///
/// Every operation that can allocate, free, or suspend
/// takes the context of the current thread.
/// Contexts are never shared between threads.
pub struct Context
{
    pub (crate) heap: Heap,

    /// Blocks whose count reached zero but which were not freed yet,
    /// because freeing them would have recursed too deeply.
    pub (crate) deferred: SmallVec<[NonNull<Header>; 16]>,

    pub (crate) yield_record: YieldRecord,

    pub (crate) config: RuntimeConfig,

    unique: Integer,
    next_marker: usize,
    thread_id: ThreadId,
}

impl Context
{
    /// Create a context for the current thread.
    pub fn new(config: RuntimeConfig) -> Self
    {
        let thread_id = ThreadId::fresh();
        tracing::debug!(%thread_id, ?config, "Creating execution context");
        Self{
            heap: Heap::default(),
            deferred: SmallVec::with_capacity(config.deferred_capacity),
            yield_record: YieldRecord::default(),
            unique: Integer::from(config.unique_start),
            next_marker: 1,
            thread_id,
            config,
        }
    }

    /// The id of the thread that owns this context.
    pub fn thread_id(&self) -> ThreadId
    {
        self.thread_id
    }

    /// The configuration this context was created with.
    pub fn config(&self) -> &RuntimeConfig
    {
        &self.config
    }

    /// The heap of this context.
    pub fn heap(&self) -> &Heap
    {
        &self.heap
    }

    /// Allocator traffic of this context so far.
    pub fn heap_stats(&self) -> HeapStats
    {
        self.heap.stats()
    }

    /// Return a fresh unique id and advance the generator.
    pub fn unique_id(&mut self) -> Integer
    {
        let next = self.unique.succ();
        std::mem::replace(&mut self.unique, next)
    }

    /// Return a fresh handler marker and advance the generator.
    ///
    /// Markers are never zero, and wrap around to one after [`Marker::MAX`].
    pub fn fresh_marker(&mut self) -> Marker
    {
        let marker = Marker(self.next_marker);
        self.next_marker = if marker == Marker::MAX { 1 } else { marker.0 + 1 };
        marker
    }
}

impl Drop for Context
{
    fn drop(&mut self)
    {
        let record = take(&mut self.yield_record);
        if record.is_yielding() {
            tracing::debug!(
                thread_id = %self.thread_id,
                marker = %record.marker(),
                "Discarding pending yield",
            );
        }
        record.release(self);
        drain_deferred(self);

        let stats = self.heap.stats();
        tracing::debug!(
            thread_id = %self.thread_id,
            allocations = stats.allocations,
            reallocations = stats.reallocations,
            frees = stats.frees,
            "Tearing down execution context",
        );
    }
}

impl fmt::Debug for Context
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result
    {
        f.debug_struct("Context")
            .field("thread_id", &self.thread_id)
            .field("heap", &self.heap)
            .field("yield_kind", &self.yield_record.kind())
            .finish_non_exhaustive()
    }
}

thread_local!
{
    static CONTEXT: RefCell<Option<Context>> = RefCell::new(None);
}

/// Call a function with the context of the current thread.
///
/// The context is created at first use on each thread,
/// configured from the environment with [`RuntimeConfig::from_env`],
/// and torn down when the thread exits.
///
/// # Panics
///
/// Panics if called from within `f`.
pub fn with_context<F, R>(f: F) -> R
    where F: FnOnce(&mut Context) -> R
{
    CONTEXT.with(|cell| {
        let mut slot = cell.borrow_mut();
        let ctx = slot.get_or_insert_with(|| Context::new(RuntimeConfig::from_env()));
        f(ctx)
    })
}
