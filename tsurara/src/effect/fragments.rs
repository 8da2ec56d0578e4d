use {
    crate::{Boxed, Context, Function},
    smallvec::{SmallVec, smallvec},
};

/// Number of fragments a yield record stores before composing them.
pub const YIELD_CONT_MAX: usize = 8;

/// Continuation fragments collected while unwinding.
///
/// Read first to last, the fragments compose into the resumption:
/// the first fragment receives the resume value,
/// and each later fragment receives the result of the one before.
pub enum Fragments
{
    /// Fragments in inline storage.
    Inline(SmallVec<[Function; YIELD_CONT_MAX]>),

    /// An earlier buffer was full and was composed into one function.
    Chained
    {
        /// Composition of all evicted fragments; runs first.
        composed: Function,

        /// Fragments added after the composition.
        rest: SmallVec<[Function; YIELD_CONT_MAX - 1]>,
    },
}

impl Default for Fragments
{
    fn default() -> Self
    {
        Self::Inline(SmallVec::new())
    }
}

impl Fragments
{
    /// Number of occupied slots.
    pub fn len(&self) -> usize
    {
        match self {
            Self::Inline(fragments) => fragments.len(),
            Self::Chained{rest, ..} => 1 + rest.len(),
        }
    }

    /// Whether there are no fragments.
    pub fn is_empty(&self) -> bool
    {
        self.len() == 0
    }

    /// Append a fragment, or give it back if the storage is full.
    pub fn try_push(&mut self, fragment: Function) -> Result<(), Function>
    {
        match self {
            Self::Inline(fragments) if fragments.len() < YIELD_CONT_MAX =>
                fragments.push(fragment),
            Self::Chained{rest, ..} if rest.len() < YIELD_CONT_MAX - 1 =>
                rest.push(fragment),
            _ => return Err(fragment),
        }
        Ok(())
    }

    /// Compose all fragments into the first slot of fresh storage,
    /// then append `next`.
    pub fn overflow(self, next: Function, ctx: &mut Context) -> Self
    {
        tracing::trace!(fragments = self.len(), "Composing full yield fragment buffer");
        let composed = self.compose(ctx);
        Self::Chained{composed, rest: smallvec![next]}
    }

    /// Compose all fragments into a single function.
    ///
    /// No fragments compose into the identity function.
    pub fn compose(self, ctx: &mut Context) -> Function
    {
        let mut fragments = self.into_vec();
        match fragments.len() {
            0 => Function::identity(ctx),
            1 => fragments.remove(0),
            _ => {
                let free_vars = fragments.into_iter().map(Function::into_boxed);
                Function::new(compose_code, free_vars, ctx)
            },
        }
    }

    /// Release all fragments.
    pub fn release(self, ctx: &mut Context)
    {
        for fragment in self.into_vec() {
            fragment.release(ctx);
        }
    }

    fn into_vec(self) -> SmallVec<[Function; YIELD_CONT_MAX]>
    {
        match self {
            Self::Inline(fragments) => fragments,
            Self::Chained{composed, rest} => {
                let mut fragments = SmallVec::new();
                fragments.push(composed);
                fragments.extend(rest);
                fragments
            },
        }
    }
}

/// Code of a composed resumption.
///
/// The free variables are the fragments, in order.
/// If a fragment starts a new suspension,
/// the fragments not yet applied are handed to it,
/// so that they run when that suspension is resumed.
fn compose_code(this: Function, arg: Boxed, ctx: &mut Context) -> Boxed
{
    let count = this.free_vars().len();
    let mut x = arg;
    for i in 0 .. count {
        let fragment = fragment_at(&this, i);
        x = fragment.call(x, ctx);
        if ctx.yielding() {
            for j in i + 1 .. count {
                let fragment = fragment_at(&this, j);
                ctx.yield_extend(fragment);
            }
            break;
        }
    }
    this.release(ctx);
    x
}

fn fragment_at(this: &Function, index: usize) -> Function
{
    let fragment = Function::from_boxed(this.free_var(index));
    debug_assert!(fragment.is_ok(), "Composed fragment is not a function");
    // SAFETY: Composed functions only hold functions.
    unsafe { fragment.unwrap_unchecked() }
}

#[cfg(test)]
mod tests
{
    use {super::*, proptest::proptest, std::mem::take};

    /// Fragment that computes `x * 10 + digit`.
    fn digit(digit: isize, ctx: &mut Context) -> Function
    {
        fn code(this: Function, arg: Boxed, ctx: &mut Context) -> Boxed
        {
            let digit = this.free_vars()[0].as_small_int().unwrap();
            let x = arg.as_small_int().unwrap();
            this.release(ctx);
            Boxed::from_small_int(x * 10 + digit).unwrap()
        }
        Function::new(code, [Boxed::from_small_int(digit).unwrap()], ctx)
    }

    /// Fragment that computes `(x * 31 + i) % 1_000_003`.
    fn mix(i: isize, ctx: &mut Context) -> Function
    {
        fn code(this: Function, arg: Boxed, ctx: &mut Context) -> Boxed
        {
            let i = this.free_vars()[0].as_small_int().unwrap();
            let x = arg.as_small_int().unwrap();
            this.release(ctx);
            Boxed::from_small_int((x * 31 + i) % 1_000_003).unwrap()
        }
        Function::new(code, [Boxed::from_small_int(i).unwrap()], ctx)
    }

    fn push(fragments: &mut Fragments, fragment: Function, ctx: &mut Context)
    {
        if let Err(fragment) = fragments.try_push(fragment) {
            *fragments = take(fragments).overflow(fragment, ctx);
        }
    }

    #[test]
    fn nine_fragments()
    {
        let mut ctx = Context::new(Default::default());
        let mut fragments = Fragments::default();
        for d in 1 ..= 9 {
            push(&mut fragments, digit(d, &mut ctx), &mut ctx);
        }
        assert!(matches!(fragments, Fragments::Chained{..}));
        assert_eq!(fragments.len(), 2);

        let resume = fragments.compose(&mut ctx);
        let x = resume.call(Boxed::from_small_int(0).unwrap(), &mut ctx);
        assert_eq!(x.as_small_int(), Some(123456789));
        assert_eq!(ctx.heap_stats().live(), 0);
    }

    #[test]
    fn no_fragments_is_identity()
    {
        let mut ctx = Context::new(Default::default());
        let resume = Fragments::default().compose(&mut ctx);
        let x = resume.call(Boxed::from_enum(9), &mut ctx);
        assert_eq!(x.as_enum(), Some(9));
        assert_eq!(ctx.heap_stats().live(), 0);
    }

    #[test]
    fn release_all()
    {
        let mut ctx = Context::new(Default::default());
        let mut fragments = Fragments::default();
        for d in 0 .. 20 {
            push(&mut fragments, digit(d, &mut ctx), &mut ctx);
        }
        fragments.release(&mut ctx);
        assert_eq!(ctx.heap_stats().live(), 0);
    }

    proptest!
    {
        #[test]
        fn composition_order(count in 0isize .. 40, start in 0isize .. 1000)
        {
            let mut ctx = Context::new(Default::default());
            let mut fragments = Fragments::default();
            for i in 0 .. count {
                push(&mut fragments, mix(i, &mut ctx), &mut ctx);
                assert!(fragments.len() <= YIELD_CONT_MAX);
            }
            let expected = (0 .. count).fold(start, |x, i| (x * 31 + i) % 1_000_003);
            let resume = fragments.compose(&mut ctx);
            let x = resume.call(Boxed::from_small_int(start).unwrap(), &mut ctx);
            assert_eq!(x.as_small_int(), Some(expected));
            assert_eq!(ctx.heap_stats().live(), 0);
        }
    }
}
