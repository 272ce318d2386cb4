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

//! Immutable compact sketches.

use crate::codec::family::Family;
use crate::codec::put_f64;
use crate::codec::put_u16;
use crate::codec::put_u32;
use crate::codec::put_u64;
use crate::error::Error;
use crate::hash::compute_seed_hash;
use crate::theta::MAX_THETA;
use crate::theta::dispatch::SketchKind;
use crate::theta::serialization::COMPACT_ENTRIES_START;
use crate::theta::serialization::COMPACT_RETAINED_INT;
use crate::theta::serialization::FAMILY_BYTE;
use crate::theta::serialization::FLAGS_BYTE;
use crate::theta::serialization::Layout;
use crate::theta::serialization::NUM_VALUES_BYTE;
use crate::theta::serialization::PREAMBLE_LONGS_BYTE;
use crate::theta::serialization::PREAMBLE_LONGS_COMPACT;
use crate::theta::serialization::PREAMBLE_LONGS_MINIMAL;
use crate::theta::serialization::Preamble;
use crate::theta::serialization::SEED_HASH_SHORT;
use crate::theta::serialization::SER_VER_BYTE;
use crate::theta::serialization::SERIAL_VERSION;
use crate::theta::serialization::SKETCH_KIND_BYTE;
use crate::theta::serialization::THETA_LONG;
use crate::theta::serialization::compact_image_bytes;
use crate::theta::serialization::compact_slots;
use crate::theta::serialization::flags_for;
use crate::theta::serialization::read_preamble;
use crate::theta::sketch::Sketch;
use crate::theta::view::Entries;
use crate::theta::view::Slots;
use crate::theta::view::ValuesRef;

fn collect_entries<Sk: Sketch + ?Sized>(sketch: &Sk, ordered: bool) -> Vec<(u64, ValuesRef<'_>)> {
    let mut entries: Vec<_> = sketch.iter().collect();
    if ordered {
        entries.sort_unstable_by_key(|(key, _)| *key);
    }
    entries
}

/// Theta of the compact form; empty sketches always report a theta of one.
fn compact_theta<Sk: Sketch + ?Sized>(sketch: &Sk) -> u64 {
    if sketch.is_empty() {
        MAX_THETA
    } else {
        sketch.theta64()
    }
}

/// Writes the compact image of `sketch` into `dst` and returns its length.
pub(crate) fn write_compact<Sk: Sketch + ?Sized>(
    sketch: &Sk,
    ordered: bool,
    dst: &mut [u8],
) -> Result<usize, Error> {
    let empty = sketch.is_empty();
    let num_values = sketch.num_values();
    let entries = collect_entries(sketch, ordered);
    let size = compact_image_bytes(empty, entries.len(), num_values);
    if dst.len() < size {
        return Err(Error::invalid_argument("destination is too small")
            .with_context("required_bytes", size)
            .with_context("actual_bytes", dst.len()));
    }

    let kind = SketchKind::for_layout(true, num_values);
    dst[PREAMBLE_LONGS_BYTE] = if empty {
        PREAMBLE_LONGS_MINIMAL
    } else {
        PREAMBLE_LONGS_COMPACT
    };
    dst[SER_VER_BYTE] = SERIAL_VERSION;
    dst[FAMILY_BYTE] = Family::TUPLE.id;
    dst[SKETCH_KIND_BYTE] = kind.tag();
    dst[FLAGS_BYTE] = flags_for(empty, false, !entries.is_empty());
    dst[NUM_VALUES_BYTE] = num_values;
    put_u16(dst, SEED_HASH_SHORT, sketch.seed_hash());
    if empty {
        return Ok(size);
    }

    put_u64(dst, THETA_LONG, compact_theta(sketch));
    put_u32(dst, COMPACT_RETAINED_INT, entries.len() as u32);
    put_u32(dst, COMPACT_RETAINED_INT + 4, 0);
    let mut key_offset = COMPACT_ENTRIES_START;
    let mut value_offset = COMPACT_ENTRIES_START + entries.len() * 8;
    for (key, values) in &entries {
        put_u64(dst, key_offset, *key);
        key_offset += 8;
        for value in values.iter() {
            put_f64(dst, value_offset, value);
            value_offset += 8;
        }
    }
    Ok(size)
}

/// An immutable sketch holding only the entries below theta.
#[derive(Debug, Clone, PartialEq)]
pub struct CompactSketch {
    keys: Vec<u64>,
    values: Vec<f64>,
    theta: u64,
    num_values: u8,
    seed_hash: u16,
    empty: bool,
    ordered: bool,
}

impl CompactSketch {
    pub(crate) fn from_sketch<Sk: Sketch + ?Sized>(sketch: &Sk, ordered: bool) -> Self {
        let entries = collect_entries(sketch, ordered);
        let mut keys = Vec::with_capacity(entries.len());
        let mut values = Vec::with_capacity(entries.len() * sketch.num_values() as usize);
        for (key, entry_values) in &entries {
            keys.push(*key);
            values.extend(entry_values.iter());
        }
        Self {
            keys,
            values,
            theta: compact_theta(sketch),
            num_values: sketch.num_values(),
            seed_hash: sketch.seed_hash(),
            empty: sketch.is_empty(),
            ordered: ordered || entries.len() <= 1,
        }
    }

    /// Deserializes a compact image into an owned sketch.
    pub fn heapify(bytes: &[u8], seed: u64) -> Result<Self, Error> {
        let view = DirectCompactSketch::wrap(bytes, seed)?;
        Ok(Self::from_sketch(&view, view.is_ordered()))
    }

    /// Returns true if the entries are sorted by key.
    pub fn is_ordered(&self) -> bool {
        self.ordered
    }

    /// Returns the size of the image [`CompactSketch::to_bytes`] produces.
    pub fn serialized_size(&self) -> usize {
        compact_image_bytes(self.empty, self.keys.len(), self.num_values)
    }

    /// Serializes the sketch. Empty sketches take eight bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![0u8; self.serialized_size()];
        let written = write_compact(self, false, &mut bytes);
        debug_assert_eq!(written.ok(), Some(bytes.len()));
        bytes
    }
}

impl Sketch for CompactSketch {
    fn is_empty(&self) -> bool {
        self.empty
    }

    fn theta64(&self) -> u64 {
        self.theta
    }

    fn num_retained(&self) -> usize {
        self.keys.len()
    }

    fn num_values(&self) -> u8 {
        self.num_values
    }

    fn seed_hash(&self) -> u16 {
        self.seed_hash
    }

    fn iter(&self) -> Entries<'_> {
        let slots = Slots::Heap {
            keys: &self.keys,
            values: &self.values,
            num_values: self.num_values as usize,
        };
        Entries::new(slots, self.theta)
    }
}

/// A compact sketch read in place from a serialized image.
#[derive(Debug, Clone, Copy)]
pub struct DirectCompactSketch<'a> {
    bytes: &'a [u8],
    preamble: Preamble,
    num_retained: usize,
    ordered: bool,
}

impl<'a> DirectCompactSketch<'a> {
    /// Validates a compact image and reads it in place.
    pub fn wrap(bytes: &'a [u8], seed: u64) -> Result<Self, Error> {
        Self::wrap_with_seed_hash(bytes, compute_seed_hash(seed)?)
    }

    pub(crate) fn wrap_with_seed_hash(bytes: &'a [u8], seed_hash: u16) -> Result<Self, Error> {
        let preamble = read_preamble(bytes, seed_hash)?;
        let Layout::Compact { num_retained } = preamble.layout else {
            return Err(Error::deserial(format!(
                "expected a compact sketch, got {}",
                preamble.kind.name()
            )));
        };
        let num_retained = num_retained as usize;
        let slots = compact_slots(bytes, num_retained, preamble.num_values);
        let mut ordered = true;
        let mut previous = 0;
        for index in 0..num_retained {
            let key = slots.key(index);
            if key == 0 || key >= preamble.theta {
                return Err(Error::deserial("compact sketch holds a key outside (0, theta)")
                    .with_context("index", index));
            }
            ordered &= key > previous;
            previous = key;
        }
        Ok(Self {
            bytes,
            preamble,
            num_retained,
            ordered,
        })
    }

    /// Returns true if the entries are sorted by key.
    pub fn is_ordered(&self) -> bool {
        self.ordered
    }

    /// Returns the image this sketch reads from.
    pub fn as_bytes(&self) -> &'a [u8] {
        &self.bytes[..self.preamble.image_bytes]
    }

    /// Copies the image.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }
}

impl Sketch for DirectCompactSketch<'_> {
    fn is_empty(&self) -> bool {
        self.preamble.empty
    }

    fn theta64(&self) -> u64 {
        self.preamble.theta
    }

    fn num_retained(&self) -> usize {
        self.num_retained
    }

    fn num_values(&self) -> u8 {
        self.preamble.num_values
    }

    fn seed_hash(&self) -> u16 {
        self.preamble.seed_hash
    }

    fn iter(&self) -> Entries<'_> {
        let slots = compact_slots(self.bytes, self.num_retained, self.preamble.num_values);
        Entries::new(slots, self.preamble.theta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::theta::HeapQuickSelectSketch;

    #[test]
    fn test_compact_keeps_only_valid_entries() {
        let mut sketch = HeapQuickSelectSketch::builder()
            .nominal_entries(32)
            .num_values(1)
            .build()
            .unwrap();
        for i in 0..500u64 {
            sketch.update(i, &[1.0]).unwrap();
        }
        let compact = sketch.compact(true);
        assert!(compact.is_ordered());
        assert_eq!(compact.num_retained(), sketch.num_retained());
        assert_eq!(compact.theta64(), sketch.theta64());
        let keys: Vec<u64> = compact.iter().map(|(key, _)| key).collect();
        assert!(keys.windows(2).all(|w| w[0] < w[1]));
        assert!(keys.iter().all(|key| *key < compact.theta64()));
    }

    #[test]
    fn test_empty_compact_reports_full_theta() {
        let sketch = HeapQuickSelectSketch::builder()
            .sampling_probability(0.5)
            .build()
            .unwrap();
        assert!(sketch.theta64() < MAX_THETA);
        let compact = sketch.compact(false);
        assert!(compact.is_empty());
        assert_eq!(compact.theta64(), MAX_THETA);
        assert_eq!(compact.to_bytes().len(), 8);
    }

    #[test]
    fn test_destination_too_small() {
        let mut sketch = HeapQuickSelectSketch::builder().build().unwrap();
        sketch.update(1u64, &[]).unwrap();
        let mut dst = [0u8; 31];
        let err = sketch.compact_into(false, &mut dst).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidArgument);
    }
}
