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

//! Union of QuickSelect sketches.

use std::hash::Hash;

use crate::error::Error;
use crate::hash::ensure_seed_hashes_match;
use crate::theta::compact::CompactSketch;
use crate::theta::compact::DirectCompactSketch;
use crate::theta::dispatch::heapify_sketch;
use crate::theta::sketch::QuickSelectSketch;
use crate::theta::sketch::Sketch;
use crate::theta::store::DirectStore;
use crate::theta::store::HeapStore;
use crate::theta::store::MemoryRequest;
use crate::theta::store::Store;

/// Folds sketches into one running sketch.
///
/// Entries with equal keys have their values summed. The union tracks the smallest theta
/// of everything merged so far and applies it to the internal sketch only when a result
/// is requested; requesting a result leaves the union usable for further updates.
///
/// # Examples
///
/// ```
/// use datasketches_theta::theta::HeapQuickSelectSketch;
/// use datasketches_theta::theta::Sketch;
///
/// let mut a = HeapQuickSelectSketch::builder().build().unwrap();
/// let mut b = HeapQuickSelectSketch::builder().build().unwrap();
/// a.update_str("x", &[]).unwrap();
/// b.update_str("x", &[]).unwrap();
/// b.update_str("y", &[]).unwrap();
///
/// let mut union = HeapQuickSelectSketch::builder().build_union().unwrap();
/// union.update(&a).unwrap();
/// union.update(&b).unwrap();
/// assert_eq!(union.result(true).unwrap().estimate(), 2.0);
/// ```
#[derive(Debug)]
pub struct Union<S: Store = HeapStore> {
    sketch: QuickSelectSketch<S>,
    theta: u64,
}

/// Union whose internal sketch lives in a caller-owned region.
pub type DirectUnion<'a, M = &'a mut [u8]> = Union<DirectStore<'a, M>>;

impl<S: Store> Union<S> {
    /// Creates a union around `sketch`, which is usually fresh from a builder.
    pub fn new(sketch: QuickSelectSketch<S>) -> Self {
        let theta = sketch.theta64();
        Self { sketch, theta }
    }

    /// Merges `sketch` into the union.
    ///
    /// Empty sketches are ignored. Otherwise the seed hash and the number of values must
    /// match the union's.
    pub fn update<Sk: Sketch + ?Sized>(&mut self, sketch: &Sk) -> Result<(), Error> {
        if sketch.is_empty() {
            return Ok(());
        }
        ensure_seed_hashes_match(self.sketch.seed_hash(), sketch.seed_hash())?;
        if sketch.num_values() != self.sketch.num_values() {
            return Err(Error::invalid_argument("sketch has a different number of values")
                .with_context("expected", self.sketch.num_values())
                .with_context("actual", sketch.num_values()));
        }
        self.sketch.set_not_empty();
        self.theta = self.theta.min(sketch.theta64());
        for (key, values) in sketch.iter() {
            if key < self.theta.min(self.sketch.theta64()) {
                self.sketch.merge(key, values)?;
            }
        }
        self.theta = self.theta.min(self.sketch.theta64());
        Ok(())
    }

    /// Merges a serialized sketch of any kind.
    pub fn update_serialized(&mut self, bytes: &[u8]) -> Result<(), Error> {
        let sketch = heapify_sketch(bytes, self.sketch.seed())?;
        self.update(&sketch)
    }

    /// Updates the union with a single item, as [`QuickSelectSketch::update`] does.
    pub fn update_item<T: Hash>(&mut self, item: T, values: &[f64]) -> Result<(), Error> {
        let result = self.sketch.update(item, values);
        self.track_sketch_theta(result)
    }

    /// Updates the union with the UTF-8 bytes of a string. Empty strings are ignored.
    pub fn update_str(&mut self, item: &str, values: &[f64]) -> Result<(), Error> {
        let result = self.sketch.update_str(item, values);
        self.track_sketch_theta(result)
    }

    /// Updates the union with a byte string. Empty input is ignored.
    pub fn update_bytes(&mut self, item: &[u8], values: &[f64]) -> Result<(), Error> {
        let result = self.sketch.update_bytes(item, values);
        self.track_sketch_theta(result)
    }

    /// Updates the union with an array of longs. Empty input is ignored.
    pub fn update_i64s(&mut self, item: &[i64], values: &[f64]) -> Result<(), Error> {
        let result = self.sketch.update_i64s(item, values);
        self.track_sketch_theta(result)
    }

    /// Updates the union with an array of ints. Empty input is ignored.
    pub fn update_i32s(&mut self, item: &[i32], values: &[f64]) -> Result<(), Error> {
        let result = self.sketch.update_i32s(item, values);
        self.track_sketch_theta(result)
    }

    /// Updates the union with a double, canonicalized like the sketch does.
    pub fn update_f64(&mut self, item: f64, values: &[f64]) -> Result<(), Error> {
        let result = self.sketch.update_f64(item, values);
        self.track_sketch_theta(result)
    }

    /// Updates the union with an already hashed key.
    pub fn update_hash(&mut self, key: u64, values: &[f64]) -> Result<(), Error> {
        let result = self.sketch.update_hash(key, values);
        self.track_sketch_theta(result)
    }

    fn track_sketch_theta(&mut self, result: Result<(), Error>) -> Result<(), Error> {
        self.theta = self.theta.min(self.sketch.theta64());
        result
    }

    /// Applies the running theta to the internal sketch and trims it to k entries.
    fn reconcile(&mut self) -> Result<(), Error> {
        self.sketch.trim()?;
        if self.theta < self.sketch.theta64() {
            self.sketch.set_theta(self.theta);
            self.sketch.rebuild()?;
        }
        Ok(())
    }

    /// Returns the union of everything merged so far.
    pub fn result(&mut self, ordered: bool) -> Result<CompactSketch, Error> {
        self.reconcile()?;
        Ok(self.sketch.compact(ordered))
    }

    /// Writes the union of everything merged so far into `dst`.
    pub fn result_into<'b>(
        &mut self,
        ordered: bool,
        dst: &'b mut [u8],
    ) -> Result<DirectCompactSketch<'b>, Error> {
        self.reconcile()?;
        self.sketch.compact_into(ordered, dst)
    }

    /// Serializes the union as the image of its internal sketch.
    pub fn to_bytes(&mut self) -> Result<Vec<u8>, Error> {
        self.reconcile()?;
        Ok(self.sketch.to_bytes())
    }

    /// Forgets everything merged so far.
    pub fn reset(&mut self) {
        self.sketch.reset();
        self.theta = self.sketch.theta64();
    }

    /// Returns the running theta.
    pub fn theta64(&self) -> u64 {
        self.theta
    }

    /// Returns the internal sketch, which may hold more than k entries and entries at or
    /// above the running theta until a result is requested.
    pub fn sketch(&self) -> &QuickSelectSketch<S> {
        &self.sketch
    }
}

impl Union<HeapStore> {
    /// Restores a union from [`Union::to_bytes`] output.
    pub fn heapify(bytes: &[u8], seed: u64) -> Result<Self, Error> {
        QuickSelectSketch::heapify(bytes, seed).map(Self::new)
    }
}

impl<'a, M: AsRef<[u8]> + AsMut<[u8]>> Union<DirectStore<'a, M>> {
    /// Operates on a serialized union in place. The region cannot grow.
    pub fn wrap(region: M, seed: u64) -> Result<Self, Error> {
        QuickSelectSketch::wrap(region, seed).map(Self::new)
    }

    /// Operates on a serialized union in place, growing through `request`.
    pub fn wrap_with_request<R>(region: M, seed: u64, request: R) -> Result<Self, Error>
    where
        R: MemoryRequest<M> + 'a,
    {
        QuickSelectSketch::wrap_with_request(region, seed, request).map(Self::new)
    }

    /// Gives the backing region back to the caller.
    pub fn into_region(self) -> M {
        self.sketch.into_region()
    }
}
