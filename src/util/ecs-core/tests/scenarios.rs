//! End-to-end scenarios from the testable-properties section, exercised
//! against the crate's public surface the way a consumer would use it:
//! build a world, queue mutations, resolve, inspect.

use std::sync::Arc;

use ecs_core::{define_components, BlockPool, KeyGenerator, Query, Template, World};

define_components! {
    pub enum Demo {
        X: u32,
        Y: f64,
    }
}

fn world() -> World<Demo> {
    let pool = Arc::new(BlockPool::new(4096, true));
    let keygen = Arc::new(KeyGenerator::new());
    World::create(pool, keygen)
}

/// Scenario 1 — create/read/destroy.
#[test]
fn scenario_1_create_read_destroy() {
    let mut w = world();

    let e0 = w.queue_create(Template::new()).unwrap();
    let e1 = w.queue_create(Template::new().with::<X>(1)).unwrap();
    let e2 = w.queue_create(Template::new().with::<Y>(2.5)).unwrap();
    let e3 = w
        .queue_create(Template::new().with::<X>(3).with::<Y>(3.5))
        .unwrap();
    w.resolve().unwrap();

    let e0v = w.entity(e0).unwrap();
    assert!(e0v.get_optional::<X>().is_none());
    assert!(e0v.get_optional::<Y>().is_none());

    let e1v = w.entity(e1).unwrap();
    assert_eq!(*e1v.get_optional::<X>().unwrap(), 1);
    assert!(e1v.get_optional::<Y>().is_none());

    let e2v = w.entity(e2).unwrap();
    assert!(e2v.get_optional::<X>().is_none());
    assert_eq!(*e2v.get_optional::<Y>().unwrap(), 2.5);

    let e3v = w.entity(e3).unwrap();
    assert_eq!(*e3v.get_optional::<X>().unwrap(), 3);
    assert_eq!(*e3v.get_optional::<Y>().unwrap(), 3.5);

    for key in [e0, e1, e2, e3] {
        w.queue_destroy(key).unwrap();
    }
    w.resolve().unwrap();

    for key in [e0, e1, e2, e3] {
        assert!(w.entity(key).is_none());
    }
}

/// Scenario 2 — insert/remove migration, continuing from scenario 1's
/// post-create state.
#[test]
fn scenario_2_insert_remove_migration() {
    let mut w = world();

    let e0 = w.queue_create(Template::new()).unwrap();
    let e1 = w.queue_create(Template::new().with::<X>(1)).unwrap();
    let e2 = w.queue_create(Template::new().with::<Y>(2.5)).unwrap();
    let e3 = w
        .queue_create(Template::new().with::<X>(3).with::<Y>(3.5))
        .unwrap();
    w.resolve().unwrap();

    w.queue_insert::<X>(e0, 99).unwrap();
    w.queue_insert::<Y>(e0, 99.5).unwrap();
    w.queue_remove::<X>(e1).unwrap();
    w.queue_insert::<Y>(e1, 99.5).unwrap();
    w.queue_remove::<Y>(e2).unwrap();
    w.queue_insert::<X>(e2, 99).unwrap();
    w.queue_remove::<X>(e3).unwrap();
    w.queue_remove::<Y>(e3).unwrap();
    w.resolve().unwrap();

    let e0v = w.entity(e0).unwrap();
    assert_eq!(*e0v.get_optional::<X>().unwrap(), 99);
    assert_eq!(*e0v.get_optional::<Y>().unwrap(), 99.5);

    let e1v = w.entity(e1).unwrap();
    assert!(e1v.get_optional::<X>().is_none());
    assert_eq!(*e1v.get_optional::<Y>().unwrap(), 99.5);

    let e2v = w.entity(e2).unwrap();
    assert_eq!(*e2v.get_optional::<X>().unwrap(), 99);
    assert!(e2v.get_optional::<Y>().is_none());

    let e3v = w.entity(e3).unwrap();
    assert!(e3v.get_optional::<X>().is_none());
    assert!(e3v.get_optional::<Y>().is_none());
}

/// Scenario 3 — bucket fuzz. A Weyl sequence would assign arbitrary key
/// *values*; this crate mints its own opaque keys, so the fuzz instead
/// leans on its own generator to produce 10,000 distinct, well-distributed
/// keys (exercising the same directory split/compact code paths a Weyl
/// sequence would) and tags each entity's `X` with its own key value so
/// identity can still be checked back out after the round trip.
#[test]
fn scenario_3_bucket_fuzz() {
    let mut w = world();

    let mut keys = Vec::with_capacity(10_000);
    for _ in 0..10_000 {
        let key = w.queue_create(Template::new()).unwrap();
        keys.push(key);
    }
    w.resolve().unwrap();

    for &key in &keys {
        w.queue_insert::<X>(key, (key.get() & 0xFFFF_FFFF) as u32)
            .unwrap();
    }
    w.resolve().unwrap();

    for &key in &keys {
        let view = w.entity(key).unwrap();
        assert_eq!(*view.get_optional::<X>().unwrap(), (key.get() & 0xFFFF_FFFF) as u32);
    }

    let (h1, h2): (Vec<_>, Vec<_>) = keys.iter().enumerate().partition(|(i, _)| i % 2 == 0);
    let h1: Vec<_> = h1.into_iter().map(|(_, k)| *k).collect();
    let h2: Vec<_> = h2.into_iter().map(|(_, k)| *k).collect();

    for &key in &h1 {
        w.queue_destroy(key).unwrap();
    }
    w.resolve().unwrap();

    for &key in &h1 {
        assert!(w.entity(key).is_none());
    }
    for &key in &h2 {
        assert!(w.entity(key).is_some());
    }
}

/// Scenario 4 — iterator correctness: a query over one included component
/// must yield exactly the set of keys whose archetype contains it,
/// regardless of which other components (of a larger declared set) are
/// also present.
#[test]
fn scenario_4_iterator_correctness() {
    define_components! {
        pub enum Wide {
            A: u8,
            B: u8,
            C: u8,
            D: u8,
            E: u8,
        }
    }

    let pool = Arc::new(BlockPool::new(4096, true));
    let keygen = Arc::new(KeyGenerator::new());
    let mut w: World<Wide> = World::create(pool, keygen);

    // Deterministic pseudo-random subset selection (no external rng crate
    // needed): bit `i` of a per-entity xorshift draw decides whether
    // component `i` is present.
    let mut state = 0x9E3779B97F4A7C15u64;
    let mut next = || {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        state
    };

    let mut expect_has_a = std::collections::HashSet::new();
    let mut all_keys = Vec::new();

    for _ in 0..1_000u32 {
        let mask = next();
        let mut template = Template::<Wide>::new();
        if mask & 0b00001 != 0 {
            template = template.with::<A>(1);
        }
        if mask & 0b00010 != 0 {
            template = template.with::<B>(1);
        }
        if mask & 0b00100 != 0 {
            template = template.with::<C>(1);
        }
        if mask & 0b01000 != 0 {
            template = template.with::<D>(1);
        }
        if mask & 0b10000 != 0 {
            template = template.with::<E>(1);
        }

        let has_a = template.contains::<A>();
        let key = w.queue_create(template).unwrap();
        if has_a {
            expect_has_a.insert(key);
        }
        all_keys.push(key);
    }
    w.resolve().unwrap();

    let query = Query::<Wide>::new().include::<A>();
    let mut found = std::collections::HashSet::new();
    for page in w.page_iterator(&query) {
        for entity in page.entities() {
            found.insert(entity.key());
        }
    }

    assert_eq!(found, expect_has_a);
}

/// Scenario 5 — queue edge case: push 4,085 values into a typed queue
/// without pre-reservation, then pop all in insertion order; the final pop
/// returns `None`.
#[test]
fn scenario_5_queue_edge_case() {
    use ecs_core::BlockQueue;

    let pool = Arc::new(BlockPool::new(1024, true));
    let mut queue: BlockQueue<u32> = BlockQueue::new(pool);

    for i in 0..4085u32 {
        queue.push(i).unwrap();
    }
    for i in 0..4085u32 {
        assert_eq!(queue.pop(), Some(i));
    }
    assert_eq!(queue.pop(), None);
}

/// Scenario 6 — OOM safety: a non-expanding pool sized for fewer entities
/// than requested reports `OutOfMemory` from the first resolve that can't
/// fit everything queued; after freeing blocks, a later resolve completes
/// and the total live population matches what was actually ever queued.
#[test]
fn scenario_6_oom_safety() {
    use ecs_core::Error;

    define_components! {
        pub enum Bulky {
            Blob: [u8; 64],
        }
    }

    // A wide row keeps the entity page's capacity below the command queue's,
    // so a two-block pool backs the whole create backlog in its one queue
    // page while still running out of room for a second entity page.
    let pool = Arc::new(BlockPool::with_fixed_capacity(256, 2));
    let keygen = Arc::new(KeyGenerator::new());
    let mut w: World<Bulky> = World::create(pool, keygen);

    let make_template = || Template::<Bulky>::new().with::<Blob>([0u8; 64]);

    let capacity = {
        let layout = ecs_core::PageLayout::compute::<Bulky>(&make_template().archetype(), 256);
        layout.capacity
    };
    assert!(capacity > 2, "test assumes the block fits more than two rows");

    let mut keys = Vec::new();
    for _ in 0..capacity + 3 {
        keys.push(w.queue_create(make_template()).unwrap());
    }

    assert!(matches!(w.resolve(), Err(Error::OutOfMemory)));
    for key in &keys[..capacity] {
        assert!(w.entity(*key).is_some());
    }
    for key in &keys[capacity..] {
        assert!(w.entity(*key).is_none());
    }

    for key in &keys[..capacity] {
        w.queue_destroy(*key).unwrap();
    }
    // Destroy/reclaim always run to completion within a single resolve even
    // when the create backlog at the front of its own queue still can't
    // fit, freeing this page's block back to the pool in the same call.
    let _ = w.resolve();

    w.resolve().unwrap();
    for key in &keys[capacity..] {
        assert!(w.entity(*key).is_some());
    }
}
