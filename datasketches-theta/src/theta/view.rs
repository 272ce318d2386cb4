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

use std::fmt;

use crate::codec::get_f64;
use crate::codec::get_u64;

/// The value vector attached to one key.
///
/// Heap sketches hand out slices of their value arrays while direct and wrapped sketches
/// read values straight from the serialized region, so this type abstracts over both.
#[derive(Clone, Copy)]
pub struct ValuesRef<'a>(Repr<'a>);

#[derive(Clone, Copy)]
enum Repr<'a> {
    Slice(&'a [f64]),
    Bytes(&'a [u8]),
}

impl<'a> ValuesRef<'a> {
    pub(crate) fn from_bytes(bytes: &'a [u8]) -> Self {
        debug_assert_eq!(bytes.len() % 8, 0);
        ValuesRef(Repr::Bytes(bytes))
    }

    /// Number of values.
    pub fn len(&self) -> usize {
        match self.0 {
            Repr::Slice(values) => values.len(),
            Repr::Bytes(bytes) => bytes.len() / 8,
        }
    }

    /// Returns true for keys-only sketches.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the value at `index`, if any.
    pub fn get(&self, index: usize) -> Option<f64> {
        if index >= self.len() {
            return None;
        }
        Some(self.value(index))
    }

    fn value(&self, index: usize) -> f64 {
        match self.0 {
            Repr::Slice(values) => values[index],
            Repr::Bytes(bytes) => get_f64(bytes, index * 8),
        }
    }

    /// Iterates over the values in order.
    pub fn iter(&self) -> impl Iterator<Item = f64> + use<'a> {
        let this = *self;
        (0..this.len()).map(move |i| this.value(i))
    }

    /// Copies the values into a new vector.
    pub fn to_vec(&self) -> Vec<f64> {
        match self.0 {
            Repr::Slice(values) => values.to_vec(),
            Repr::Bytes(_) => self.iter().collect(),
        }
    }
}

impl<'a> From<&'a [f64]> for ValuesRef<'a> {
    fn from(values: &'a [f64]) -> Self {
        ValuesRef(Repr::Slice(values))
    }
}

impl fmt::Debug for ValuesRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl PartialEq for ValuesRef<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().zip(other.iter()).all(|(a, b)| a == b)
    }
}

/// Raw access to the key and value arrays of a sketch, including empty slots.
#[derive(Clone, Copy)]
pub enum Slots<'a> {
    Heap {
        keys: &'a [u64],
        values: &'a [f64],
        num_values: usize,
    },
    Bytes {
        keys: &'a [u8],
        values: &'a [u8],
        num_values: usize,
    },
}

impl<'a> Slots<'a> {
    pub fn len(&self) -> usize {
        match self {
            Slots::Heap { keys, .. } => keys.len(),
            Slots::Bytes { keys, .. } => keys.len() / 8,
        }
    }

    pub fn key(&self, index: usize) -> u64 {
        match self {
            Slots::Heap { keys, .. } => keys[index],
            Slots::Bytes { keys, .. } => get_u64(keys, index * 8),
        }
    }

    pub fn values(&self, index: usize) -> ValuesRef<'a> {
        match *self {
            Slots::Heap {
                values, num_values, ..
            } => ValuesRef::from(&values[index * num_values..(index + 1) * num_values]),
            Slots::Bytes {
                values, num_values, ..
            } => {
                let width = num_values * 8;
                ValuesRef::from_bytes(&values[index * width..(index + 1) * width])
            }
        }
    }
}

/// Iterator over the valid `(key, values)` entries of a sketch.
///
/// Empty slots and keys at or above theta are skipped. Every call to
/// [`Sketch::iter`](crate::theta::Sketch::iter) starts a fresh pass.
#[derive(Clone)]
pub struct Entries<'a> {
    slots: Slots<'a>,
    theta: u64,
    index: usize,
}

impl<'a> Entries<'a> {
    pub(crate) fn new(slots: Slots<'a>, theta: u64) -> Self {
        Self {
            slots,
            theta,
            index: 0,
        }
    }
}

impl<'a> Iterator for Entries<'a> {
    type Item = (u64, ValuesRef<'a>);

    fn next(&mut self) -> Option<Self::Item> {
        while self.index < self.slots.len() {
            let index = self.index;
            self.index += 1;
            let key = self.slots.key(index);
            if key != 0 && key < self.theta {
                return Some((key, self.slots.values(index)));
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.slots.len() - self.index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_values_from_bytes_match_slice() {
        let values = [1.5f64, -2.0, 3.25];
        let mut bytes = vec![];
        for v in values {
            bytes.extend_from_slice(&v.to_ne_bytes());
        }
        let from_bytes = ValuesRef::from_bytes(&bytes);
        assert_eq!(from_bytes, ValuesRef::from(&values[..]));
        assert_eq!(from_bytes.get(2), Some(3.25));
        assert_eq!(from_bytes.get(3), None);
        assert_eq!(from_bytes.to_vec(), values.to_vec());
    }

    #[test]
    fn test_entries_skip_empty_and_screened_slots() {
        let keys = [0, 5, 100, 7];
        let values = [0.0, 1.0, 2.0, 3.0];
        let slots = Slots::Heap {
            keys: &keys,
            values: &values,
            num_values: 1,
        };
        let entries: Vec<_> = Entries::new(slots, 50)
            .map(|(key, values)| (key, values.to_vec()))
            .collect();
        assert_eq!(entries, vec![(5, vec![1.0]), (7, vec![3.0])]);
    }
}
