//! Open-addressing string table.
//!
//! Keys are hashed with FNV-1a and collisions resolved by linear probing.
//! The slot array is always a power of two so indexing is a mask, and it
//! doubles once the table is half full. Key and value bytes live in the
//! table's own persistent arena.

use crate::arena::{Arena, ArenaError, Str};

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// 64-bit FNV-1a.
pub fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET_BASIS;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    hash: u64,
    key: Str,
    value: Str,
    /// Bytes reserved for the value, at least `value.len()`.
    room: usize,
}

#[derive(Debug)]
pub struct Vars {
    slots: Vec<Option<Slot>>,
    len: usize,
    arena: Arena,
}

impl Default for Vars {
    fn default() -> Self {
        Self::new()
    }
}

impl Vars {
    pub const DEFAULT_CAPACITY: usize = 16;
    pub const DEFAULT_ARENA_CAPACITY: usize = 1 << 20;

    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY, Self::DEFAULT_ARENA_CAPACITY)
    }

    /// `capacity` is rounded up to a power of two.
    pub fn with_capacity(capacity: usize, arena_capacity: usize) -> Self {
        let capacity = capacity.max(2).next_power_of_two();
        Vars {
            slots: vec![None; capacity],
            len: 0,
            arena: Arena::new(arena_capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn mask(&self) -> usize {
        self.slots.len() - 1
    }

    /// Index of `key` if present, else of the empty slot where it would go.
    fn probe(&self, key: &str, hash: u64) -> Result<usize, usize> {
        let mut index = hash as usize & self.mask();
        loop {
            match &self.slots[index] {
                None => return Err(index),
                Some(slot) if slot.hash == hash && self.arena.get(slot.key) == key => return Ok(index),
                Some(_) => index = (index + 1) & self.mask(),
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        let index = self.probe(key, fnv1a(key.as_bytes())).ok()?;
        self.slots[index].map(|slot| self.arena.get(slot.value))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.probe(key, fnv1a(key.as_bytes())).is_ok()
    }

    /// Bind `key` to `value`, replacing any previous binding. A new value
    /// that fits in the old one's space is written over it.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ArenaError> {
        let hash = fnv1a(key.as_bytes());
        match self.probe(key, hash) {
            Ok(index) => {
                if let Some(slot) = self.slots[index].as_mut() {
                    match self.arena.overwrite(slot.value, slot.room, value) {
                        Some(reused) => slot.value = reused,
                        None => {
                            slot.value = self.arena.alloc_str(value)?;
                            slot.room = value.len();
                        }
                    }
                }
            }
            Err(_) => {
                if self.len * 2 >= self.slots.len() {
                    self.grow();
                }
                let index = match self.probe(key, hash) {
                    Ok(index) | Err(index) => index,
                };
                let key = self.arena.alloc_str(key)?;
                let value = self.arena.alloc_str(value)?;
                let room = value.len();
                self.slots[index] = Some(Slot {
                    hash,
                    key,
                    value,
                    room,
                });
                self.len += 1;
            }
        }
        Ok(())
    }

    /// Return the value bound to `key`, binding `default` first if it is missing.
    pub fn add_or_get(&mut self, key: &str, default: &str) -> Result<&str, ArenaError> {
        if !self.contains(key) {
            self.set(key, default)?;
        }
        Ok(self.get(key).unwrap_or(""))
    }

    /// Remove `key`, shifting later members of its probe run back into place.
    pub fn remove(&mut self, key: &str) -> bool {
        let Ok(mut hole) = self.probe(key, fnv1a(key.as_bytes())) else {
            return false;
        };
        self.slots[hole] = None;
        self.len -= 1;

        let mask = self.mask();
        let mut next = (hole + 1) & mask;
        while let Some(slot) = self.slots[next] {
            let home = slot.hash as usize & mask;
            let displaced = if hole <= next {
                home <= hole || home > next
            } else {
                home <= hole && home > next
            };
            if displaced {
                self.slots[hole] = Some(slot);
                self.slots[next] = None;
                hole = next;
            }
            next = (next + 1) & mask;
        }
        true
    }

    /// Drop every binding and rewind the backing arena.
    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
        self.len = 0;
        self.arena.reset();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.slots
            .iter()
            .flatten()
            .map(|slot| (self.arena.get(slot.key), self.arena.get(slot.value)))
    }

    fn grow(&mut self) {
        let capacity = self.slots.len() * 2;
        tracing::trace!(from = self.slots.len(), to = capacity, "growing table");
        let old = std::mem::replace(&mut self.slots, vec![None; capacity]);
        let mask = capacity - 1;
        for slot in old.into_iter().flatten() {
            let mut index = slot.hash as usize & mask;
            while self.slots[index].is_some() {
                index = (index + 1) & mask;
            }
            self.slots[index] = Some(slot);
        }
    }
}
