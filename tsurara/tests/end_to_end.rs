use tsurara::{
    Block, Boxed, Context, Ownership, Reuse, RuntimeConfig, Tag, Vector,
};

const CONS: Tag = Tag(2);
const CONS_SIZE: usize = 8 + 2 * 8;

fn cell(ctx: &mut Context) -> Block
{
    Block::allocate(8, 0, Tag::MIN, ctx)
}

fn cons(head: Boxed, tail: Boxed, reuse: Reuse, ctx: &mut Context) -> Boxed
{
    let mut block = Block::allocate_with_reuse(reuse, CONS_SIZE, 2, CONS, ctx);
    let fields = block.fields_mut().unwrap();
    fields[0] = head;
    fields[1] = tail;
    Boxed::from_block(block)
}

fn list(len: isize, ctx: &mut Context) -> Boxed
{
    let mut list = Boxed::unit();
    for i in (0 .. len).rev() {
        list = cons(Boxed::from_small_int(i).unwrap(), list, Reuse::NONE, ctx);
    }
    list
}

fn increment_all(list: Boxed, ctx: &mut Context) -> Boxed
{
    let cell = match list.into_block() {
        Ok(cell) => cell,
        Err(nil) => return nil,
    };
    let (fields, reuse) = cell.unpack_for_reuse(ctx);
    let mut fields = fields.into_iter();
    let head = fields.next().unwrap();
    let tail = fields.next().unwrap();
    let head = Boxed::from_small_int(head.as_small_int().unwrap() + 1).unwrap();
    let tail = increment_all(tail, ctx);
    cons(head, tail, reuse, ctx)
}

fn sum(list: &Boxed) -> isize
{
    let mut sum = 0;
    let mut list = list;
    while let Some(cell) = list.as_block() {
        sum += cell.fields()[0].as_small_int().unwrap();
        list = &cell.fields()[1];
    }
    sum
}

#[test]
fn vector_of_two_blocks_frees_three()
{
    let mut ctx = Context::new(RuntimeConfig::default());
    let a = Boxed::from_block(cell(&mut ctx));
    let b = Boxed::from_block(cell(&mut ctx));
    let vector = Vector::from_elements([a, b], &mut ctx);
    assert_eq!(ctx.heap_stats().allocations, 3);

    let other = vector.dup();
    vector.release(&mut ctx);
    assert_eq!(ctx.heap_stats().frees, 0);
    other.release(&mut ctx);
    assert_eq!(ctx.heap_stats().frees, 3);
}

#[test]
fn dup_release_frees_once()
{
    let mut ctx = Context::new(RuntimeConfig::default());
    let block = cell(&mut ctx);
    assert_eq!(block.ownership(), Ownership::Unique);

    let b = block.dup();
    let c = b.dup();
    assert_eq!(block.ownership(), Ownership::Shared{extra: 2});

    c.release(&mut ctx);
    block.release(&mut ctx);
    assert_eq!(ctx.heap_stats().frees, 0);
    assert!(b.is_unique());
    b.release(&mut ctx);
    assert_eq!(ctx.heap_stats().frees, 1);
}

#[test]
fn map_unique_list_in_place()
{
    let mut ctx = Context::new(RuntimeConfig::default());
    let xs = list(100, &mut ctx);
    assert_eq!(sum(&xs), 4950);
    let before = ctx.heap_stats();

    let ys = increment_all(xs, &mut ctx);
    assert_eq!(sum(&ys), 5050);
    assert_eq!(ctx.heap_stats(), before);

    ys.release(&mut ctx);
    assert_eq!(ctx.heap_stats().live(), 0);
}

#[test]
fn map_shared_list_copies()
{
    let mut ctx = Context::new(RuntimeConfig::default());
    let xs = list(100, &mut ctx);
    let ys = increment_all(xs.dup(), &mut ctx);
    assert_eq!(sum(&xs), 4950);
    assert_eq!(sum(&ys), 5050);
    assert_eq!(ctx.heap_stats().allocations, 200);

    xs.release(&mut ctx);
    ys.release(&mut ctx);
    assert_eq!(ctx.heap_stats().live(), 0);
}

#[test]
fn deep_list_release_is_bounded()
{
    let config = RuntimeConfig::builder().release_depth(8).build();
    let mut ctx = Context::new(config);
    let xs = list(100_000, &mut ctx);
    xs.release(&mut ctx);
    assert_eq!(ctx.heap_stats().frees, 100_000);
}
