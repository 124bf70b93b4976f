//! Property tests for the plain and timed index allocators.

use std::collections::{HashMap, HashSet};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use slotarena_core::{ArenaError, IndexAllocator, SlotIndex, TimedIndexAllocator, Timestamp};

fn allocator(capacity: u32) -> IndexAllocator {
    let size = IndexAllocator::size_for(capacity).unwrap();
    IndexAllocator::init(vec![0u8; size as usize], capacity).unwrap()
}

fn timed(capacity: u32) -> TimedIndexAllocator {
    let size = TimedIndexAllocator::size_for(capacity).unwrap();
    TimedIndexAllocator::init(vec![0u8; size as usize], capacity).unwrap()
}

#[test]
fn test_round_trip_in_any_free_order() {
    let mut rng = ChaCha8Rng::seed_from_u64(0x51A7_0001);

    for capacity in [1u32, 2, 7, 64, 257] {
        let mut pool = allocator(capacity);
        for _ in 0..3 {
            let mut held = Vec::new();
            let mut seen = HashSet::new();
            for _ in 0..capacity {
                let slot = pool.alloc().unwrap();
                assert!(slot.get() < capacity);
                assert!(seen.insert(slot), "duplicate slot {slot}");
                held.push(slot);
                let info = pool.info().unwrap();
                assert_eq!(info.allocated + info.available, capacity);
            }
            assert_eq!(pool.alloc(), Err(ArenaError::OutOfCapacity));

            while !held.is_empty() {
                let slot = held.swap_remove(rng.gen_range(0..held.len()));
                pool.dealloc(slot).unwrap();
                let info = pool.info().unwrap();
                assert_eq!(info.allocated + info.available, capacity);
            }
            assert_eq!(pool.info().unwrap().available, capacity);
        }
    }
}

#[test]
fn test_random_interleaving_matches_model() {
    let mut rng = ChaCha8Rng::seed_from_u64(0x51A7_0002);
    let capacity = 32;
    let mut pool = allocator(capacity);
    let mut held: Vec<SlotIndex> = Vec::new();

    for _ in 0..5_000 {
        match rng.gen_range(0..10) {
            0..=4 => match pool.alloc() {
                Ok(slot) => {
                    assert!(!held.contains(&slot));
                    held.push(slot);
                }
                Err(e) => {
                    assert_eq!(e, ArenaError::OutOfCapacity);
                    assert_eq!(held.len(), capacity as usize);
                }
            },
            5..=8 if !held.is_empty() => {
                let slot = held.swap_remove(rng.gen_range(0..held.len()));
                pool.dealloc(slot).unwrap();
                assert_eq!(pool.dealloc(slot), Err(ArenaError::InvalidHandle(slot.get())));
            }
            _ => {
                let slot = SlotIndex::new(rng.gen_range(0..capacity));
                assert_eq!(pool.is_allocated(slot).unwrap(), held.contains(&slot));
            }
        }
        assert_eq!(pool.info().unwrap().allocated as usize, held.len());
    }
}

#[test]
fn test_exhaustion_then_recovery() {
    let mut pool = allocator(4);
    let slots: Vec<_> = (0..4).map(|_| pool.alloc().unwrap()).collect();
    assert_eq!(pool.alloc(), Err(ArenaError::OutOfCapacity));
    assert_eq!(pool.alloc(), Err(ArenaError::OutOfCapacity));

    pool.dealloc(slots[2]).unwrap();
    assert_eq!(pool.alloc().unwrap(), slots[2]);
    assert_eq!(pool.alloc(), Err(ArenaError::OutOfCapacity));
}

#[test]
fn test_timeouts_reclaim_in_expiry_order() {
    let capacity = 16;
    let mut pool = timed(capacity);
    let slots: Vec<_> = (0..capacity).map(|_| pool.alloc(Timestamp::ZERO).unwrap()).collect();

    for (i, slot) in slots.iter().enumerate() {
        let ttl = Timestamp::from_low((i as u32 + 1) * 10);
        pool.dealloc_deferred(*slot, ttl, Timestamp::ZERO).unwrap();
    }
    assert_eq!(pool.info().unwrap().pending, capacity);

    let mut reclaimed_total = 0;
    for now in (0..=170).step_by(5) {
        let now = Timestamp::from_low(now);
        reclaimed_total += pool.sweep(now).unwrap();

        let expected = slots
            .iter()
            .enumerate()
            .filter(|(i, _)| Timestamp::from_low((*i as u32 + 1) * 10) <= now)
            .count() as u32;
        assert_eq!(reclaimed_total, expected, "at {now}");

        for (i, slot) in slots.iter().enumerate() {
            let expiry = Timestamp::from_low((i as u32 + 1) * 10);
            let pending = pool.expiry_of(*slot).unwrap();
            if expiry > now {
                assert_eq!(pending, Some(expiry), "slot {slot} reclaimed early");
            } else {
                assert_eq!(pending, None);
            }
        }
    }
    assert_eq!(pool.info().unwrap().available, capacity);
}

#[test]
fn test_random_ttls_across_the_low_word_boundary() {
    let mut rng = ChaCha8Rng::seed_from_u64(0x51A7_0003);
    let capacity = 32;
    let mut pool = timed(capacity);

    // Start just below 2^32 so expiries straddle the carry.
    let mut now = u64::from(u32::MAX) - 500;
    let mut expiries: HashMap<SlotIndex, u64> = HashMap::new();
    for _ in 0..capacity {
        let slot = pool.alloc(Timestamp::from_u64(now)).unwrap();
        let ttl = rng.gen_range(0..1_000u64);
        pool.dealloc_deferred(slot, Timestamp::from_u64(ttl), Timestamp::from_u64(now))
            .unwrap();
        expiries.insert(slot, now + ttl);
    }

    while !expiries.is_empty() {
        now += rng.gen_range(1..40u64);
        let before = expiries.len();
        let reclaimed = pool.sweep(Timestamp::from_u64(now)).unwrap();
        expiries.retain(|_, expiry| *expiry > now);
        assert_eq!(reclaimed as usize, before - expiries.len());

        for (slot, expiry) in &expiries {
            assert_eq!(pool.expiry_of(*slot).unwrap(), Some(Timestamp::from_u64(*expiry)));
        }
        assert_eq!(pool.info().unwrap().pending as usize, expiries.len());
    }
    assert!(now > u64::from(u32::MAX));
}

#[test]
fn test_alloc_sweeps_only_when_free_list_is_empty() {
    let mut pool = timed(2);
    let a = pool.alloc(Timestamp::ZERO).unwrap();
    let b = pool.alloc(Timestamp::ZERO).unwrap();
    pool.dealloc_deferred(a, Timestamp::from_low(10), Timestamp::ZERO).unwrap();
    pool.dealloc(b).unwrap();

    let now = Timestamp::from_low(100);
    assert_eq!(pool.alloc(now).unwrap(), b);
    assert!(pool.expiry_of(a).unwrap().is_some());
    assert_eq!(pool.alloc(now).unwrap(), a);
    assert_eq!(pool.alloc(now), Err(ArenaError::OutOfCapacity));
}

#[test]
fn test_timed_arena_survives_relocation() {
    let mut pool = timed(4);
    let a = pool.alloc(Timestamp::ZERO).unwrap();
    let b = pool.alloc(Timestamp::ZERO).unwrap();
    pool.dealloc_deferred(b, Timestamp::from_low(50), Timestamp::ZERO).unwrap();
    pool.dealloc_deferred(a, Timestamp::from_low(20), Timestamp::ZERO).unwrap();

    let mut moved = vec![0xAAu8; 3];
    moved.extend_from_slice(&pool.into_inner());
    let mut pool = TimedIndexAllocator::attach(&mut moved[3..]).unwrap();

    assert_eq!(pool.sweep(Timestamp::from_low(20)).unwrap(), 1);
    assert_eq!(pool.expiry_of(b).unwrap(), Some(Timestamp::from_low(50)));
    assert_eq!(pool.sweep(Timestamp::from_low(50)).unwrap(), 1);
    assert_eq!(pool.info().unwrap().available, 4);
}
