// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! Open-addressing hash table over 64-bit keys.
//!
//! The table lives in whatever memory its [`KeyTable`] exposes and never owns or copies
//! it. Capacity is a power of two and probing uses an odd stride derived from the key's
//! upper bits, so every probe sequence visits every slot. Occupancy thresholds keep the
//! table from filling up; a probe that finds no free slot means the memory was corrupted.

use crate::error::Error;

/// Smallest table: 32 slots.
pub(crate) const MIN_LG_CAPACITY: u8 = 5;
/// Largest lg of nominal entries; nominal entries must stay below 65536.
pub(crate) const MAX_LG_NOM: u8 = 15;

const STRIDE_HASH_BITS: u8 = 7;
const STRIDE_MASK: u64 = (1 << STRIDE_HASH_BITS) - 1;

/// Fill ratio that triggers growth while the table is not yet at full size.
pub(crate) const RESIZE_THRESHOLD: f64 = 0.5;
/// Fill ratio that triggers a theta rebuild once the table is at full size.
pub(crate) const REBUILD_THRESHOLD: f64 = 15.0 / 16.0;

/// Slot-level access to a table of keys. Zero marks an empty slot.
pub trait KeyTable {
    /// Log2 of the number of slots.
    fn lg_capacity(&self) -> u8;

    /// Returns the key stored in the slot.
    fn key(&self, index: usize) -> u64;

    /// Overwrites the key stored in the slot.
    fn set_key(&mut self, index: usize, key: u64);
}

/// Outcome of [`find_or_insert_key`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Probe {
    /// The key was already present at this slot.
    Found(usize),
    /// The key was written to this previously empty slot.
    Inserted(usize),
}

#[inline]
fn stride(key: u64, lg_capacity: u8) -> usize {
    (2 * ((key >> lg_capacity) & STRIDE_MASK) + 1) as usize
}

/// Inserts a key into a table known not to contain it. Returns the slot index.
pub(crate) fn insert_key<T: KeyTable + ?Sized>(table: &mut T, key: u64) -> Result<usize, Error> {
    debug_assert_ne!(key, 0, "zero is the empty slot marker");
    let lg_capacity = table.lg_capacity();
    let mask = (1usize << lg_capacity) - 1;
    let stride = stride(key, lg_capacity);
    let mut index = key as usize & mask;
    for _ in 0..=mask {
        if table.key(index) == 0 {
            table.set_key(index, key);
            return Ok(index);
        }
        index = (index + stride) & mask;
    }
    Err(table_full(lg_capacity))
}

/// Finds the slot holding `key`, inserting it into the first empty slot if absent.
pub(crate) fn find_or_insert_key<T: KeyTable + ?Sized>(
    table: &mut T,
    key: u64,
) -> Result<Probe, Error> {
    debug_assert_ne!(key, 0, "zero is the empty slot marker");
    let lg_capacity = table.lg_capacity();
    let mask = (1usize << lg_capacity) - 1;
    let stride = stride(key, lg_capacity);
    let mut index = key as usize & mask;
    for _ in 0..=mask {
        let slot = table.key(index);
        if slot == 0 {
            table.set_key(index, key);
            return Ok(Probe::Inserted(index));
        }
        if slot == key {
            return Ok(Probe::Found(index));
        }
        index = (index + stride) & mask;
    }
    Err(table_full(lg_capacity))
}

/// Returns the slot holding `key`, if present.
pub(crate) fn find<T: KeyTable + ?Sized>(table: &T, key: u64) -> Option<usize> {
    if key == 0 {
        return None;
    }
    let lg_capacity = table.lg_capacity();
    let mask = (1usize << lg_capacity) - 1;
    let stride = stride(key, lg_capacity);
    let mut index = key as usize & mask;
    for _ in 0..=mask {
        match table.key(index) {
            0 => return None,
            slot if slot == key => return Some(index),
            _ => index = (index + stride) & mask,
        }
    }
    None
}

fn table_full(lg_capacity: u8) -> Error {
    Error::invalid_state("hash table has no free slot").with_context("lg_capacity", lg_capacity)
}

/// Log2 of the largest table a sketch with these parameters ever uses.
///
/// This is twice the nominal entries with a floor of 32 slots, except that a tiny sketch
/// may start above that when its resize factor does not divide the distance to the floor.
pub(crate) fn max_lg_capacity(lg_nom: u8, lg_rf: u8) -> u8 {
    (lg_nom + 1)
        .max(MIN_LG_CAPACITY)
        .max(starting_lg_capacity(lg_nom, lg_rf))
}

/// Log2 of the table a fresh sketch starts with.
///
/// Growing by the resize factor from the starting size lands exactly on the target size.
pub(crate) fn starting_lg_capacity(lg_nom: u8, lg_rf: u8) -> u8 {
    let lg_target = lg_nom + 1;
    if lg_rf == 0 {
        lg_target.max(MIN_LG_CAPACITY)
    } else {
        (lg_target.abs_diff(MIN_LG_CAPACITY) % lg_rf) + MIN_LG_CAPACITY
    }
}

/// Number of retained entries at which the table must grow or rebuild.
pub(crate) fn threshold(lg_capacity: u8, lg_nom: u8) -> u32 {
    let ratio = if lg_capacity <= lg_nom {
        RESIZE_THRESHOLD
    } else {
        REBUILD_THRESHOLD
    };
    ((1u64 << lg_capacity) as f64 * ratio) as u32
}
