use {
    super::*,
    crate::MemorySwap,
    proptest::{prelude::*, proptest},
};

/// Two chunks of 8 KiB, with the first one half taken by descriptor page 0.
pub (crate) fn small_config() -> Config
{
    Config{
        chunk_size: 8192,
        max_bytes: 2 * 8192,
        max_pages: 4,
        client_pages: 4,
        ..Config::default()
    }
}

/// Context that swaps to memory.
pub (crate) fn context(config: Config) -> GlobalContext
{
    let swap = SwapManager::new(Box::new(MemorySwap::new()), config.swap_budget);
    GlobalContext::new(config, swap).unwrap()
}

pub (crate) fn fill(cache: &mut GlobalContext, objnum: ObjNum, byte: u8)
{
    cache.bytes_mut(objnum).unwrap().fill(byte);
}

#[test]
fn bootstrap_layout()
{
    let cache = context(small_config());
    let page = cache.desc(0);
    assert!(page.flags.contains(ObjFlags::PAGE | ObjFlags::NOSWAP | ObjFlags::LOCKED));
    assert_eq!(page.size, crate::chunk::PAGE_BYTES);

    assert_eq!(cache.free_blocks().len(), 1);
    assert_eq!(cache.free_blocks()[0].0, 1);
    assert!(cache.lru_order().is_empty());

    let stats = cache.stats();
    assert_eq!(stats.chunks, 1);
    assert_eq!(stats.locked_objects, 1);
    assert_eq!(stats.budget_left, 8192);
    cache.check_consistency();
}

#[test]
fn budget_is_at_least_one_chunk()
{
    let config = Config{max_bytes: 0, ..small_config()};
    let cache = context(config);
    assert_eq!(cache.stats().budget_left, 0);
}

#[test]
fn invalid_config_is_rejected()
{
    let config = Config{chunk_size: 1000, ..small_config()};
    let result = GlobalContext::new(config, SwapManager::disabled());
    assert!(matches!(result, Err(Error::Config(_))));
}

#[test]
fn descriptor_pages_are_added_on_demand()
{
    let mut cache = context(Config{max_bytes: 4 * 8192, ..small_config()});
    let mut objects = Vec::new();
    for _ in 0 .. PAGE_SIZE + 10 {
        let objnum = cache.reserve(10, LoadHandle(0)).unwrap();
        objects.push(objnum);
    }
    assert_eq!(cache.pages.len(), 2);
    for objnum in objects {
        cache.free(objnum).unwrap();
    }
    cache.check_consistency();
}

#[test]
fn running_out_of_descriptors()
{
    let mut cache = context(Config{max_pages: 1, ..small_config()});
    let result = (0 .. PAGE_SIZE).try_for_each(|_| {
        cache.reserve(10, LoadHandle(0)).map(drop)
    });
    assert!(matches!(result, Err(Error::NoMoreHeaders)));
}

#[test]
fn out_of_memory_is_terminal()
{
    let config = Config{max_bytes: 8192, ..small_config()};
    let mut cache = context(config);

    for size in [100, 2] {
        loop {
            match cache.alloc(size) {
                Ok(objnum) => cache.set_no_swap(objnum, true).unwrap(),
                Err(Error::OutOfMemory) => break,
                Err(err) => panic!("{}", err),
            }
        }
    }

    assert!(matches!(cache.alloc(2), Err(Error::OutOfMemory)));
    assert!(cache.free_blocks().is_empty());
    assert_eq!(cache.stats().chunks, 1);
    cache.check_consistency();
}

#[test]
fn grows_then_reuses_evicted_space()
{
    let mut cache = context(small_config());

    let a = cache.alloc(100).unwrap();
    let b = cache.alloc(200).unwrap();
    assert_eq!(cache.stats().chunks, 1);

    let c = cache.alloc(4000).unwrap();
    assert_eq!(cache.stats().chunks, 2);
    assert_eq!(cache.block_ptr(c).map(|ptr| ptr.chunk), Some(1));

    cache.unlock(a).unwrap();
    cache.unlock(b).unwrap();
    assert!(cache.make_room(300).unwrap());
    assert!(!cache.is_present(a).unwrap());
    assert!(!cache.is_present(b).unwrap());

    let d = cache.alloc(250).unwrap();
    assert_eq!(cache.stats().chunks, 2);
    assert_eq!(cache.block_ptr(d).map(|ptr| ptr.chunk), Some(0));
    assert!(cache.is_present(c).unwrap());
    cache.check_consistency();
}

#[test]
fn teardown_returns_all_memory()
{
    let mut cache = context(small_config());
    cache.alloc(5000).unwrap();
    cache.alloc(100).unwrap();
    drop(cache);
}

proptest!
{
    #[test]
    fn contents_persist_across_relock(size in 1usize ..= 8188, seed: u8)
    {
        let mut cache = context(small_config());
        let objnum = cache.alloc(size).unwrap();
        assert!(cache.object_size(objnum).unwrap() >= size);

        for (i, byte) in cache.bytes_mut(objnum).unwrap()[.. size].iter_mut().enumerate() {
            *byte = seed.wrapping_add(i as u8);
        }
        let expected = cache.bytes(objnum).unwrap()[.. size].to_vec();

        cache.unlock(objnum).unwrap();
        cache.lock(objnum).unwrap();
        assert_eq!(&cache.bytes(objnum).unwrap()[.. size], &expected[..]);
    }
}

#[derive(Clone, Debug)]
enum Op
{
    Alloc(usize),
    Lock(usize),
    Unlock(usize),
    Write(usize, u8),
    Free(usize),
    Resize(usize, usize),
    MakeRoom(usize),
    Compact,
}

fn op() -> impl Strategy<Value=Op>
{
    prop_oneof![
        (1usize .. 3000).prop_map(Op::Alloc),
        any::<usize>().prop_map(Op::Lock),
        any::<usize>().prop_map(Op::Unlock),
        (any::<usize>(), any::<u8>()).prop_map(|(i, b)| Op::Write(i, b)),
        any::<usize>().prop_map(Op::Free),
        (any::<usize>(), 1usize .. 3000).prop_map(|(i, s)| Op::Resize(i, s)),
        (1usize .. 5000).prop_map(Op::MakeRoom),
        Just(Op::Compact),
    ]
}

struct Live
{
    objnum: ObjNum,
    data: Vec<u8>,
    locks: usize,
}

fn pick(len: usize, i: usize) -> Option<usize>
{
    (len > 0).then(|| i % len)
}

fn verify(cache: &GlobalContext, live: &Live)
{
    let bytes = cache.bytes(live.objnum).unwrap();
    assert_eq!(&bytes[.. live.data.len()], &live.data[..],
               "contents of object {} changed", live.objnum);
}

proptest!
{
    #[test]
    fn random_operations_keep_heap_walkable(ops in prop::collection::vec(op(), 1 .. 80))
    {
        let mut cache = context(small_config());
        let mut objects: Vec<Live> = Vec::new();

        for op in ops {
            let len = objects.len();
            let pick = |i: usize| pick(len, i);
            match op {
                Op::Alloc(size) => match cache.alloc(size) {
                    Ok(objnum) => {
                        let byte = objnum as u8;
                        cache.bytes_mut(objnum).unwrap()[.. size].fill(byte);
                        objects.push(Live{objnum, data: vec![byte; size], locks: 1});
                    },
                    Err(Error::OutOfMemory) => (),
                    Err(err) => panic!("{}", err),
                },
                Op::Lock(i) => if let Some(i) = pick(i) {
                    let live = &mut objects[i];
                    match cache.lock(live.objnum) {
                        Ok(()) => { live.locks += 1; verify(&cache, live); },
                        Err(Error::OutOfMemory) => (),
                        Err(err) => panic!("{}", err),
                    }
                },
                Op::Unlock(i) => if let Some(i) = pick(i) {
                    let live = &mut objects[i];
                    if live.locks > 0 {
                        cache.unlock(live.objnum).unwrap();
                        live.locks -= 1;
                    }
                },
                Op::Write(i, byte) => if let Some(i) = pick(i) {
                    let live = &mut objects[i];
                    if live.locks > 0 {
                        let len = live.data.len();
                        cache.bytes_mut(live.objnum).unwrap()[.. len].fill(byte);
                        live.data.fill(byte);
                    }
                },
                Op::Free(i) => if let Some(i) = pick(i) {
                    if objects[i].locks == 0 {
                        cache.free(objects[i].objnum).unwrap();
                        objects.swap_remove(i);
                    } else {
                        let result = cache.free(objects[i].objnum);
                        assert!(matches!(result, Err(Error::LockedObjectFreed(_))));
                    }
                },
                Op::Resize(i, size) => if let Some(i) = pick(i) {
                    let live = &mut objects[i];
                    if live.locks == 1 {
                        match cache.realloc(live.objnum, size) {
                            Ok(()) => {
                                let kept = live.data.len().min(size);
                                live.data.truncate(kept);
                                verify(&cache, live);
                                cache.bytes_mut(live.objnum).unwrap()[kept .. size].fill(0xEE);
                                live.data.resize(size, 0xEE);
                            },
                            Err(Error::OutOfMemory) => (),
                            Err(err) => panic!("{}", err),
                        }
                    }
                },
                Op::MakeRoom(target) => { cache.make_room(target).unwrap(); },
                Op::Compact => cache.compact(),
            }
            cache.check_consistency();
        }

        for live in &objects {
            match cache.lock(live.objnum) {
                Ok(()) => verify(&cache, live),
                Err(Error::OutOfMemory) => (),
                Err(err) => panic!("{}", err),
            }
        }
        cache.check_consistency();
    }
}
