/*
 * Copyright (C) 2020-2023 Fanout, Inc.
 * Copyright (C) 2026 Fastly, Inc.
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

use crate::core::freeslot::FreeSlotIndex;
use crate::core::message::Message;
use serde::Deserialize;
use std::cmp;
use std::fmt;
use std::ops::Range;
use std::sync::atomic::{AtomicU32, Ordering};

pub const KB: usize = 1024;
pub const MB: usize = 1024 * KB;

const TIERS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Small,
    Medium,
    Large,
}

impl Tier {
    pub const ALL: [Tier; TIERS] = [Tier::Small, Tier::Medium, Tier::Large];

    fn index(self) -> usize {
        match self {
            Self::Small => 0,
            Self::Medium => 1,
            Self::Large => 2,
        }
    }

    pub fn next(self) -> Option<Tier> {
        match self {
            Self::Small => Some(Self::Medium),
            Self::Medium => Some(Self::Large),
            Self::Large => None,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Small => "small",
            Self::Medium => "medium",
            Self::Large => "large",
        };

        write!(f, "{}", s)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ArenaError {
    #[error("no free slot available")]
    Exhausted,

    #[error("message exceeds the largest slot size")]
    TooLarge,
}

// Slot sizes and counts for each tier. Flat so it maps directly onto a config
// file section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ArenaSizing {
    pub small_slot_size: usize,
    pub small_slots: usize,
    pub medium_slot_size: usize,
    pub medium_slots: usize,
    pub large_slot_size: usize,
    pub large_slots: usize,
}

impl ArenaSizing {
    // (slot size, slot count) for each tier, smallest first
    pub fn tiers(&self) -> [(usize, usize); TIERS] {
        [
            (self.small_slot_size, self.small_slots),
            (self.medium_slot_size, self.medium_slots),
            (self.large_slot_size, self.large_slots),
        ]
    }

    pub fn validate(&self) -> Result<(), String> {
        let mut prev = 0;

        for (tier, (slot_size, slots)) in Tier::ALL.iter().zip(self.tiers()) {
            if slot_size.checked_mul(slots).is_none() {
                return Err(format!("{} region size overflows", tier));
            }

            if slot_size <= prev {
                return Err(format!(
                    "{} slot size must be larger than {}",
                    tier,
                    if prev == 0 {
                        "zero".to_string()
                    } else {
                        format!("{}", prev)
                    }
                ));
            }

            prev = slot_size;
        }

        Ok(())
    }
}

impl Default for ArenaSizing {
    fn default() -> Self {
        Self {
            small_slot_size: 4 * KB,
            small_slots: 1024,
            medium_slot_size: 128 * KB,
            medium_slots: 128,
            large_slot_size: MB,
            large_slots: 16,
        }
    }
}

struct Region {
    storage: Box<[u8]>,
    slot_size: usize,
    free: FreeSlotIndex,
}

impl Region {
    fn new(slot_size: usize, slots: usize) -> Result<Self, String> {
        let size = match slot_size.checked_mul(slots) {
            Some(size) => size,
            None => return Err("region size overflows".into()),
        };

        let mut free = FreeSlotIndex::new(slots);

        let offsets: Vec<usize> = (0..slots).map(|i| i * slot_size).collect();
        let count = free.put_slice(&offsets);
        debug_assert_eq!(count, slots);

        Ok(Self {
            storage: vec![0; size].into_boxed_slice(),
            slot_size,
            free,
        })
    }

    fn release(&mut self, offset: usize) {
        debug_assert_eq!(offset % self.slot_size, 0);

        // the index has room for every slot of the region, so returning a
        // slot that was taken from it can't fail
        let accepted = self.free.put(offset);
        debug_assert!(accepted, "slot released twice");
    }
}

fn pair_mut<T>(s: &mut [T], a: usize, b: usize) -> (&mut T, &mut T) {
    assert_ne!(a, b);

    if a < b {
        let (left, right) = s.split_at_mut(b);

        (&mut left[a], &mut right[0])
    } else {
        let (left, right) = s.split_at_mut(a);

        (&mut right[0], &mut left[b])
    }
}

static NEXT_ARENA_ID: AtomicU32 = AtomicU32::new(1);

// Pre-allocated byte regions in three size classes. Messages start out in a
// small slot and are promoted to the next size class when they outgrow it.
// Owned by a single thread; nothing here locks.
pub struct TieredArena {
    id: u32,
    regions: [Region; TIERS],
}

impl TieredArena {
    // fails if the sizing is invalid. see ArenaSizing::validate
    pub fn new(sizing: &ArenaSizing) -> Result<Self, String> {
        sizing.validate()?;

        let [small, medium, large] = sizing.tiers();

        Ok(Self {
            id: NEXT_ARENA_ID.fetch_add(1, Ordering::Relaxed),
            regions: [
                Region::new(small.0, small.1)?,
                Region::new(medium.0, medium.1)?,
                Region::new(large.0, large.1)?,
            ],
        })
    }

    pub fn slot_size(&self, tier: Tier) -> usize {
        self.regions[tier.index()].slot_size
    }

    pub fn slot_count(&self, tier: Tier) -> usize {
        self.regions[tier.index()].free.capacity()
    }

    // number of free slots in the tier
    pub fn available(&self, tier: Tier) -> usize {
        self.regions[tier.index()].free.available()
    }

    pub fn acquire(&mut self) -> Option<Message> {
        let region = &mut self.regions[Tier::Small.index()];

        let offset = region.free.take()?;

        Some(Message::new(self.id, Tier::Small, offset, region.slot_size))
    }

    pub fn release(&mut self, msg: Message) {
        debug_assert_eq!(msg.arena_id, self.id, "message released to wrong arena");

        self.regions[msg.tier.index()].release(msg.offset);
    }

    // Moves the message into a slot of the next tier, keeping its bytes.
    // Returns false if the message is already in the largest tier or the
    // next tier has no free slot.
    pub fn expand(&mut self, msg: &mut Message) -> bool {
        debug_assert_eq!(msg.arena_id, self.id);

        let next = match msg.tier.next() {
            Some(tier) => tier,
            None => return false,
        };

        let offset = match self.regions[next.index()].free.take() {
            Some(offset) => offset,
            None => return false,
        };

        self.copy(msg.tier, msg.offset..(msg.offset + msg.len), next, offset);

        // free the smaller slot after copying
        self.regions[msg.tier.index()].release(msg.offset);

        msg.tier = next;
        msg.offset = offset;
        msg.capacity = self.regions[next.index()].slot_size;

        true
    }

    // Appends src to the message, expanding it as needed. If the message
    // can't be expanded enough, as much as fits is written and the returned
    // size will be less than src.len(). An error means nothing could be
    // written.
    pub fn append(&mut self, msg: &mut Message, src: &[u8]) -> Result<usize, ArenaError> {
        debug_assert_eq!(msg.arena_id, self.id);

        while msg.len + src.len() > msg.capacity {
            if !self.expand(msg) {
                break;
            }
        }

        let size = cmp::min(msg.remaining(), src.len());

        if size == 0 && !src.is_empty() {
            return if msg.tier.next().is_none() {
                Err(ArenaError::TooLarge)
            } else {
                Err(ArenaError::Exhausted)
            };
        }

        let start = msg.offset + msg.len;
        let storage = &mut self.regions[msg.tier.index()].storage;

        storage[start..(start + size)].copy_from_slice(&src[..size]);
        msg.len += size;

        Ok(size)
    }

    // Copies a range of the message's bytes into a new message, in the
    // smallest tier that holds them. The new message is bound to the same
    // connection.
    pub fn copy_out(
        &mut self,
        msg: &Message,
        range: Range<usize>,
    ) -> Result<Message, ArenaError> {
        debug_assert_eq!(msg.arena_id, self.id);
        assert!(range.start <= range.end && range.end <= msg.len);

        let size = range.len();

        let mut out = self.acquire().ok_or(ArenaError::Exhausted)?;

        while out.capacity < size {
            if !self.expand(&mut out) {
                let e = if out.tier.next().is_none() {
                    ArenaError::TooLarge
                } else {
                    ArenaError::Exhausted
                };

                self.release(out);

                return Err(e);
            }
        }

        let src_start = msg.offset + range.start;
        self.copy(msg.tier, src_start..(src_start + size), out.tier, out.offset);

        out.len = size;
        out.set_connection_id(msg.connection_id());

        Ok(out)
    }

    // Drops the first `count` bytes of the message, moving the rest to the
    // front of its slot.
    pub fn consume(&mut self, msg: &mut Message, count: usize) {
        debug_assert_eq!(msg.arena_id, self.id);
        assert!(count <= msg.len);

        let start = msg.offset + count;
        let end = msg.offset + msg.len;

        self.copy(msg.tier, start..end, msg.tier, msg.offset);

        msg.len -= count;
    }

    // the message's bytes. the returned slice borrows the arena, not the
    // message
    pub fn data(&self, msg: &Message) -> &[u8] {
        debug_assert_eq!(msg.arena_id, self.id);

        let start = msg.offset;

        &self.regions[msg.tier.index()].storage[start..(start + msg.len)]
    }

    fn copy(&mut self, from: Tier, src: Range<usize>, to: Tier, dest: usize) {
        if from == to {
            self.regions[from.index()].storage.copy_within(src, dest);

            return;
        }

        let (src_region, dest_region) = pair_mut(&mut self.regions, from.index(), to.index());

        dest_region.storage[dest..(dest + src.len())].copy_from_slice(&src_region.storage[src]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_sizing() -> ArenaSizing {
        ArenaSizing {
            small_slot_size: 8,
            small_slots: 4,
            medium_slot_size: 32,
            medium_slots: 2,
            large_slot_size: 128,
            large_slots: 1,
        }
    }

    #[test]
    fn test_default_sizing() {
        let sizing = ArenaSizing::default();

        assert_eq!(
            sizing.tiers(),
            [(4 * KB, 1024), (128 * KB, 128), (1024 * KB, 16)]
        );
        assert!(sizing.validate().is_ok());
    }

    #[test]
    fn test_validate() {
        let mut sizing = small_sizing();
        sizing.small_slot_size = 0;
        assert!(sizing.validate().is_err());

        let mut sizing = small_sizing();
        sizing.large_slot_size = 32;
        assert_eq!(
            sizing.validate(),
            Err("large slot size must be larger than 32".to_string())
        );
    }

    #[test]
    fn test_acquire_release() {
        let mut arena = TieredArena::new(&small_sizing()).unwrap();

        assert_eq!(arena.slot_size(Tier::Small), 8);
        assert_eq!(arena.slot_count(Tier::Small), 4);
        assert_eq!(arena.available(Tier::Small), 4);

        let mut msgs = Vec::new();
        for _ in 0..4 {
            msgs.push(arena.acquire().unwrap());
        }

        assert_eq!(arena.available(Tier::Small), 0);

        // exhausted
        assert!(arena.acquire().is_none());

        let mut offsets: Vec<usize> = msgs.iter().map(|m| m.offset()).collect();
        offsets.sort();
        assert_eq!(offsets, vec![0, 8, 16, 24]);

        for m in &msgs {
            assert_eq!(m.tier(), Tier::Small);
            assert_eq!(m.capacity(), 8);
            assert_eq!(m.len(), 0);
            assert_eq!(m.connection_id(), 0);
        }

        let m = msgs.pop().unwrap();
        let offset = m.offset();
        arena.release(m);
        assert_eq!(arena.available(Tier::Small), 1);

        let m = arena.acquire().unwrap();
        assert_eq!(m.offset(), offset);
        msgs.push(m);

        for m in msgs {
            arena.release(m);
        }

        assert_eq!(arena.available(Tier::Small), 4);
    }

    #[test]
    fn test_expand() {
        let mut arena = TieredArena::new(&small_sizing()).unwrap();

        let mut m = arena.acquire().unwrap();
        let small_offset = m.offset();
        assert_eq!(arena.append(&mut m, b"hello"), Ok(5));

        assert!(arena.expand(&mut m));
        assert_eq!(m.tier(), Tier::Medium);
        assert_eq!(m.capacity(), 32);
        assert_eq!(arena.data(&m), b"hello");
        assert_eq!(arena.available(Tier::Small), 4);
        assert_eq!(arena.available(Tier::Medium), 1);

        // the freed small slot can be reacquired
        let mut others = Vec::new();
        for _ in 0..4 {
            others.push(arena.acquire().unwrap());
        }
        assert!(others.iter().any(|o| o.offset() == small_offset));

        assert!(arena.expand(&mut m));
        assert_eq!(m.tier(), Tier::Large);
        assert_eq!(arena.data(&m), b"hello");

        // largest tier
        assert!(!arena.expand(&mut m));
        assert_eq!(m.tier(), Tier::Large);

        arena.release(m);
        for o in others {
            arena.release(o);
        }

        for tier in Tier::ALL {
            assert_eq!(arena.available(tier), arena.slot_count(tier));
        }
    }

    #[test]
    fn test_expand_next_tier_exhausted() {
        let mut arena = TieredArena::new(&small_sizing()).unwrap();

        let mut a = arena.acquire().unwrap();
        let mut b = arena.acquire().unwrap();
        let mut c = arena.acquire().unwrap();

        assert!(arena.expand(&mut a));
        assert!(arena.expand(&mut b));

        arena.append(&mut c, b"abc").unwrap();
        assert!(!arena.expand(&mut c));
        assert_eq!(c.tier(), Tier::Small);
        assert_eq!(arena.data(&c), b"abc");

        arena.release(a);
        assert!(arena.expand(&mut c));
        assert_eq!(arena.data(&c), b"abc");

        arena.release(b);
        arena.release(c);
    }

    #[test]
    fn test_append_across_tiers() {
        let mut arena = TieredArena::new(&small_sizing()).unwrap();

        let mut m = arena.acquire().unwrap();
        let mut expected = Vec::new();

        for i in 0..20u8 {
            let chunk = [b'a' + i; 5];
            assert_eq!(arena.append(&mut m, &chunk), Ok(5));
            expected.extend_from_slice(&chunk);
        }

        assert_eq!(m.len(), 100);
        assert_eq!(m.tier(), Tier::Large);
        assert_eq!(arena.data(&m), &expected[..]);
        assert_eq!(arena.available(Tier::Small), 4);
        assert_eq!(arena.available(Tier::Medium), 2);

        arena.release(m);
    }

    #[test]
    fn test_append_partial() {
        let mut arena = TieredArena::new(&small_sizing()).unwrap();

        let mut m = arena.acquire().unwrap();

        assert_eq!(arena.append(&mut m, &[1; 120]), Ok(120));
        assert_eq!(m.tier(), Tier::Large);

        // only 8 bytes of room left in the largest slot
        assert_eq!(arena.append(&mut m, &[2; 20]), Ok(8));
        assert_eq!(m.len(), 128);

        assert_eq!(arena.append(&mut m, &[3; 1]), Err(ArenaError::TooLarge));
        assert_eq!(arena.append(&mut m, &[]), Ok(0));

        arena.release(m);

        // medium tier exhausted by other messages
        let mut a = arena.acquire().unwrap();
        let mut b = arena.acquire().unwrap();
        assert!(arena.expand(&mut a));
        assert!(arena.expand(&mut b));

        let mut c = arena.acquire().unwrap();
        assert_eq!(arena.append(&mut c, &[4; 6]), Ok(6));
        assert_eq!(arena.append(&mut c, &[5; 6]), Ok(2));
        assert_eq!(arena.append(&mut c, &[6; 1]), Err(ArenaError::Exhausted));
        assert_eq!(arena.data(&c), &[4, 4, 4, 4, 4, 4, 5, 5]);

        arena.release(a);
        arena.release(b);
        arena.release(c);
    }

    #[test]
    fn test_copy_out() {
        let mut arena = TieredArena::new(&small_sizing()).unwrap();

        let mut m = arena.acquire().unwrap();
        m.set_connection_id(42);
        arena.append(&mut m, b"0123456789abcdef").unwrap();
        assert_eq!(m.tier(), Tier::Medium);

        let head = arena.copy_out(&m, 0..4).unwrap();
        assert_eq!(arena.data(&head), b"0123");
        assert_eq!(head.tier(), Tier::Small);
        assert_eq!(head.connection_id(), 42);

        // larger than a small slot
        let most = arena.copy_out(&m, 2..16).unwrap();
        assert_eq!(most.tier(), Tier::Medium);
        assert_eq!(arena.data(&most), b"23456789abcdef");

        // source untouched
        assert_eq!(arena.data(&m), b"0123456789abcdef");

        let empty = arena.copy_out(&m, 16..16).unwrap();
        assert!(empty.is_empty());

        arena.release(m);
        arena.release(head);
        arena.release(most);
        arena.release(empty);

        for tier in Tier::ALL {
            assert_eq!(arena.available(tier), arena.slot_count(tier));
        }
    }

    #[test]
    fn test_copy_out_exhausted() {
        let mut arena = TieredArena::new(&small_sizing()).unwrap();

        let mut m = arena.acquire().unwrap();
        arena.append(&mut m, b"abcdef").unwrap();

        let mut held = Vec::new();
        while let Some(h) = arena.acquire() {
            held.push(h);
        }

        assert_eq!(arena.copy_out(&m, 0..2).unwrap_err(), ArenaError::Exhausted);
        assert_eq!(arena.data(&m), b"abcdef");

        arena.release(m);
        for h in held {
            arena.release(h);
        }
    }

    #[test]
    fn test_consume() {
        let mut arena = TieredArena::new(&small_sizing()).unwrap();

        let mut m = arena.acquire().unwrap();
        arena.append(&mut m, b"0123456789abcdef").unwrap();

        arena.consume(&mut m, 10);
        assert_eq!(arena.data(&m), b"abcdef");
        assert_eq!(m.tier(), Tier::Medium);

        // room again for what was dropped
        arena.append(&mut m, b"ghijklmnop").unwrap();
        assert_eq!(arena.data(&m), b"abcdefghijklmnop");

        arena.consume(&mut m, 16);
        assert!(m.is_empty());

        arena.release(m);

        for tier in Tier::ALL {
            assert_eq!(arena.available(tier), arena.slot_count(tier));
        }
    }

    #[test]
    fn test_invalid_sizing() {
        let mut sizing = small_sizing();
        sizing.medium_slot_size = 8;

        match TieredArena::new(&sizing) {
            Ok(_) => panic!("arena should not be created"),
            Err(e) => assert_eq!(e, "medium slot size must be larger than 8"),
        }

        let mut sizing = small_sizing();
        sizing.large_slots = usize::MAX;

        match TieredArena::new(&sizing) {
            Ok(_) => panic!("arena should not be created"),
            Err(e) => assert_eq!(e, "large region size overflows"),
        }
    }
}
