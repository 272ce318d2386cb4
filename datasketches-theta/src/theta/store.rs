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

//! Storage strategies for [`QuickSelectSketch`](crate::theta::QuickSelectSketch).
//!
//! [`HeapStore`] keeps keys and values in owned vectors. [`DirectStore`] operates on a
//! caller-owned byte region laid out exactly like a serialized update sketch, so the
//! region is always a valid image and can be handed to another process as is.

use std::fmt;

use crate::codec::get_f64;
use crate::codec::get_u32;
use crate::codec::get_u64;
use crate::codec::put_f64;
use crate::codec::put_u32;
use crate::codec::put_u64;
use crate::error::Error;
use crate::theta::hash_table::KeyTable;
use crate::theta::serialization::FLAG_EMPTY;
use crate::theta::serialization::FLAG_HAS_ENTRIES;
use crate::theta::serialization::FLAGS_BYTE;
use crate::theta::serialization::LG_CUR_CAPACITY_BYTE;
use crate::theta::serialization::NUM_VALUES_BYTE;
use crate::theta::serialization::THETA_LONG;
use crate::theta::serialization::UPDATE_ENTRIES_START;
use crate::theta::serialization::UPDATE_RETAINED_INT;
use crate::theta::serialization::update_image_bytes;
use crate::theta::serialization::update_slots;
use crate::theta::view::Slots;
use crate::theta::view::ValuesRef;

/// Backing storage of an update sketch: the hash table slots plus the mutable header
/// fields (theta, retained count, empty flag).
///
/// This trait is sealed; use [`HeapStore`] or [`DirectStore`].
pub trait Store: KeyTable {
    /// Number of doubles attached to each key.
    fn num_values(&self) -> u8;

    /// Returns the values stored in the slot.
    fn values(&self, index: usize) -> ValuesRef<'_>;

    /// Overwrites the values stored in the slot.
    fn set_values(&mut self, index: usize, values: ValuesRef<'_>);

    /// Adds `values` elementwise to the values stored in the slot.
    fn add_values(&mut self, index: usize, values: ValuesRef<'_>);

    fn theta(&self) -> u64;

    fn set_theta(&mut self, theta: u64);

    fn num_retained(&self) -> u32;

    fn set_num_retained(&mut self, num_retained: u32);

    fn is_empty(&self) -> bool;

    fn set_empty(&mut self, empty: bool);

    /// Installs a zeroed table with `1 << lg_capacity` slots and returns the previous key
    /// and value arrays.
    ///
    /// Any memory needed for the new table is acquired before the old table is touched,
    /// so on error the store is unchanged.
    fn resize(&mut self, lg_capacity: u8) -> Result<(Vec<u64>, Vec<f64>), Error>;

    /// Zeroes the table and shrinks it to `1 << lg_capacity` slots, which must fit in
    /// the memory the store already holds.
    fn clear(&mut self, lg_capacity: u8);

    /// Raw slot access for iteration.
    fn slots(&self) -> Slots<'_>;
}

/// Update sketch storage on the heap.
#[derive(Debug, Clone)]
pub struct HeapStore {
    keys: Vec<u64>,
    values: Vec<f64>,
    lg_capacity: u8,
    num_values: u8,
    theta: u64,
    num_retained: u32,
    empty: bool,
}

impl HeapStore {
    pub(crate) fn new(lg_capacity: u8, num_values: u8, theta: u64) -> Self {
        let capacity = 1usize << lg_capacity;
        Self {
            keys: vec![0; capacity],
            values: vec![0.0; capacity * num_values as usize],
            lg_capacity,
            num_values,
            theta,
            num_retained: 0,
            empty: true,
        }
    }

    /// Copies an already validated table.
    pub(crate) fn from_slots(
        slots: Slots<'_>,
        lg_capacity: u8,
        num_values: u8,
        theta: u64,
        num_retained: u32,
        empty: bool,
    ) -> Self {
        let mut store = Self::new(lg_capacity, num_values, theta);
        for index in 0..slots.len() {
            let key = slots.key(index);
            if key != 0 {
                store.keys[index] = key;
                store.set_values(index, slots.values(index));
            }
        }
        store.num_retained = num_retained;
        store.empty = empty;
        store
    }

    fn value_range(&self, index: usize) -> std::ops::Range<usize> {
        let nv = self.num_values as usize;
        index * nv..(index + 1) * nv
    }
}

impl KeyTable for HeapStore {
    fn lg_capacity(&self) -> u8 {
        self.lg_capacity
    }

    fn key(&self, index: usize) -> u64 {
        self.keys[index]
    }

    fn set_key(&mut self, index: usize, key: u64) {
        self.keys[index] = key;
    }
}

impl Store for HeapStore {
    fn num_values(&self) -> u8 {
        self.num_values
    }

    fn values(&self, index: usize) -> ValuesRef<'_> {
        ValuesRef::from(&self.values[self.value_range(index)])
    }

    fn set_values(&mut self, index: usize, values: ValuesRef<'_>) {
        let range = self.value_range(index);
        for (slot, value) in self.values[range].iter_mut().zip(values.iter()) {
            *slot = value;
        }
    }

    fn add_values(&mut self, index: usize, values: ValuesRef<'_>) {
        let range = self.value_range(index);
        for (slot, value) in self.values[range].iter_mut().zip(values.iter()) {
            *slot += value;
        }
    }

    fn theta(&self) -> u64 {
        self.theta
    }

    fn set_theta(&mut self, theta: u64) {
        self.theta = theta;
    }

    fn num_retained(&self) -> u32 {
        self.num_retained
    }

    fn set_num_retained(&mut self, num_retained: u32) {
        self.num_retained = num_retained;
    }

    fn is_empty(&self) -> bool {
        self.empty
    }

    fn set_empty(&mut self, empty: bool) {
        self.empty = empty;
    }

    fn resize(&mut self, lg_capacity: u8) -> Result<(Vec<u64>, Vec<f64>), Error> {
        let keys = std::mem::take(&mut self.keys);
        let values = std::mem::take(&mut self.values);
        self.clear(lg_capacity);
        Ok((keys, values))
    }

    fn clear(&mut self, lg_capacity: u8) {
        let capacity = 1usize << lg_capacity;
        self.keys.clear();
        self.keys.resize(capacity, 0);
        self.values.clear();
        self.values.resize(capacity * self.num_values as usize, 0.0);
        self.lg_capacity = lg_capacity;
    }

    fn slots(&self) -> Slots<'_> {
        Slots::Heap {
            keys: &self.keys,
            values: &self.values,
            num_values: self.num_values as usize,
        }
    }
}

/// Supplies replacement regions to direct sketches that outgrow their memory.
///
/// Any `FnMut(usize) -> Option<M>` closure is a memory request.
pub trait MemoryRequest<M: AsMut<[u8]>> {
    /// Returns a region of at least `capacity_bytes` bytes, or `None` if none can be had.
    fn request(&mut self, capacity_bytes: usize) -> Option<M>;

    /// Returns a region of at least `capacity_bytes` bytes that starts with `prefix`.
    fn request_with_prefix(&mut self, prefix: &[u8], capacity_bytes: usize) -> Option<M> {
        let mut region = self.request(capacity_bytes)?;
        let dst = region.as_mut();
        let n = prefix.len().min(dst.len());
        dst[..n].copy_from_slice(&prefix[..n]);
        Some(region)
    }

    /// Takes back a region the sketch no longer uses.
    fn release(&mut self, region: M) {
        let _ = region;
    }
}

impl<M, F> MemoryRequest<M> for F
where
    M: AsMut<[u8]>,
    F: FnMut(usize) -> Option<M>,
{
    fn request(&mut self, capacity_bytes: usize) -> Option<M> {
        self(capacity_bytes)
    }
}

/// Update sketch storage inside a caller-owned region.
///
/// The region holds the full update image: a 32-byte preamble followed by the key and
/// value arrays. When the table must grow past the end of the region, the optional
/// [`MemoryRequest`] is asked for a bigger one.
pub struct DirectStore<'a, M: AsRef<[u8]> + AsMut<[u8]>> {
    region: M,
    request: Option<Box<dyn MemoryRequest<M> + 'a>>,
}

impl<'a, M: AsRef<[u8]> + AsMut<[u8]>> DirectStore<'a, M> {
    pub(crate) fn new(region: M, request: Option<Box<dyn MemoryRequest<M> + 'a>>) -> Self {
        Self { region, request }
    }

    pub(crate) fn region(&self) -> &[u8] {
        self.region.as_ref()
    }

    pub(crate) fn into_region(self) -> M {
        self.region
    }

    fn bytes(&self) -> &[u8] {
        self.region.as_ref()
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        self.region.as_mut()
    }

    fn values_start(&self) -> usize {
        UPDATE_ENTRIES_START + (8 << self.lg_capacity())
    }

    fn value_offset(&self, index: usize) -> usize {
        self.values_start() + index * self.num_values() as usize * 8
    }

    fn copy_entries(&self) -> (Vec<u64>, Vec<f64>) {
        let slots = self.slots();
        let keys = (0..slots.len()).map(|i| slots.key(i)).collect();
        let values = match slots {
            Slots::Bytes { values, .. } => values
                .chunks_exact(8)
                .map(|chunk| get_f64(chunk, 0))
                .collect(),
            Slots::Heap { values, .. } => values.to_vec(),
        };
        (keys, values)
    }

    fn ensure_region_holds(&mut self, required: usize) -> Result<(), Error> {
        if self.region.as_ref().len() >= required {
            return Ok(());
        }
        let Some(request) = self.request.as_mut() else {
            return Err(Error::invalid_state(
                "direct sketch must grow but has no memory request",
            )
            .with_context("required_bytes", required));
        };
        let prefix = &self.region.as_ref()[..UPDATE_ENTRIES_START];
        let Some(new_region) = request.request_with_prefix(prefix, required) else {
            tracing::warn!(required, "memory request returned no region");
            return Err(Error::invalid_state("memory request returned no region")
                .with_context("required_bytes", required));
        };
        let actual = new_region.as_ref().len();
        if actual < required {
            tracing::warn!(required, actual, "memory request returned a region too small");
            request.release(new_region);
            return Err(Error::invalid_state("memory request returned a region too small")
                .with_context("required_bytes", required)
                .with_context("actual_bytes", actual));
        }
        let old_region = std::mem::replace(&mut self.region, new_region);
        tracing::debug!(
            old_bytes = old_region.as_ref().len(),
            new_bytes = actual,
            "replaced direct sketch region"
        );
        request.release(old_region);
        Ok(())
    }
}

impl<M: AsRef<[u8]> + AsMut<[u8]>> fmt::Debug for DirectStore<'_, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectStore")
            .field("region_bytes", &self.bytes().len())
            .field("lg_capacity", &self.lg_capacity())
            .field("has_memory_request", &self.request.is_some())
            .finish()
    }
}

impl<M: AsRef<[u8]> + AsMut<[u8]>> KeyTable for DirectStore<'_, M> {
    fn lg_capacity(&self) -> u8 {
        self.bytes()[LG_CUR_CAPACITY_BYTE]
    }

    fn key(&self, index: usize) -> u64 {
        get_u64(self.bytes(), UPDATE_ENTRIES_START + index * 8)
    }

    fn set_key(&mut self, index: usize, key: u64) {
        put_u64(self.bytes_mut(), UPDATE_ENTRIES_START + index * 8, key);
    }
}

impl<M: AsRef<[u8]> + AsMut<[u8]>> Store for DirectStore<'_, M> {
    fn num_values(&self) -> u8 {
        self.bytes()[NUM_VALUES_BYTE]
    }

    fn values(&self, index: usize) -> ValuesRef<'_> {
        let start = self.value_offset(index);
        let end = start + self.num_values() as usize * 8;
        ValuesRef::from_bytes(&self.bytes()[start..end])
    }

    fn set_values(&mut self, index: usize, values: ValuesRef<'_>) {
        let start = self.value_offset(index);
        let bytes = self.bytes_mut();
        for (j, value) in values.iter().enumerate() {
            put_f64(bytes, start + j * 8, value);
        }
    }

    fn add_values(&mut self, index: usize, values: ValuesRef<'_>) {
        let start = self.value_offset(index);
        let bytes = self.bytes_mut();
        for (j, value) in values.iter().enumerate() {
            let offset = start + j * 8;
            let sum = get_f64(bytes, offset) + value;
            put_f64(bytes, offset, sum);
        }
    }

    fn theta(&self) -> u64 {
        get_u64(self.bytes(), THETA_LONG)
    }

    fn set_theta(&mut self, theta: u64) {
        put_u64(self.bytes_mut(), THETA_LONG, theta);
    }

    fn num_retained(&self) -> u32 {
        get_u32(self.bytes(), UPDATE_RETAINED_INT)
    }

    fn set_num_retained(&mut self, num_retained: u32) {
        let bytes = self.bytes_mut();
        put_u32(bytes, UPDATE_RETAINED_INT, num_retained);
        if num_retained > 0 {
            bytes[FLAGS_BYTE] |= FLAG_HAS_ENTRIES;
        } else {
            bytes[FLAGS_BYTE] &= !FLAG_HAS_ENTRIES;
        }
    }

    fn is_empty(&self) -> bool {
        self.bytes()[FLAGS_BYTE] & FLAG_EMPTY != 0
    }

    fn set_empty(&mut self, empty: bool) {
        let bytes = self.bytes_mut();
        if empty {
            bytes[FLAGS_BYTE] |= FLAG_EMPTY;
        } else {
            bytes[FLAGS_BYTE] &= !FLAG_EMPTY;
        }
    }

    fn resize(&mut self, lg_capacity: u8) -> Result<(Vec<u64>, Vec<f64>), Error> {
        let required = update_image_bytes(lg_capacity, self.num_values());
        let entries = self.copy_entries();
        self.ensure_region_holds(required)?;
        self.clear(lg_capacity);
        Ok(entries)
    }

    fn clear(&mut self, lg_capacity: u8) {
        let required = update_image_bytes(lg_capacity, self.num_values());
        let bytes = self.bytes_mut();
        assert!(
            bytes.len() >= required,
            "region of {} bytes cannot hold a table of 2^{lg_capacity} slots",
            bytes.len()
        );
        bytes[UPDATE_ENTRIES_START..required].fill(0);
        bytes[LG_CUR_CAPACITY_BYTE] = lg_capacity;
    }

    fn slots(&self) -> Slots<'_> {
        update_slots(self.bytes(), self.lg_capacity(), self.num_values())
    }
}
