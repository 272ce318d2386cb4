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

//! QuickSelect update sketch.
//!
//! The sketch keeps every hashed key below theta in an open-addressing table. While the
//! table is smaller than its target size it grows by the resize factor; once at full
//! size, reaching 15/16 occupancy selects the k-th smallest key as the new theta and
//! rebuilds the table with exactly k survivors.

use std::hash::Hash;
use std::hash::Hasher;

use crate::codec::put_f64;
use crate::codec::put_u64;
use crate::common::NumStdDev;
use crate::common::ResizeFactor;
use crate::common::binomial_bounds;
use crate::error::Error;
use crate::hash::DEFAULT_UPDATE_SEED;
use crate::hash::MurmurHash3X64128;
use crate::hash::compute_seed_hash;
use crate::theta::MAX_THETA;
use crate::theta::compact::CompactSketch;
use crate::theta::compact::DirectCompactSketch;
use crate::theta::compact::write_compact;
use crate::theta::hash_table::MAX_LG_NOM;
use crate::theta::hash_table::Probe;
use crate::theta::hash_table::find;
use crate::theta::hash_table::find_or_insert_key;
use crate::theta::hash_table::insert_key;
use crate::theta::hash_table::max_lg_capacity;
use crate::theta::hash_table::starting_lg_capacity;
use crate::theta::hash_table::threshold;
use crate::theta::serialization::Layout;
use crate::theta::serialization::UPDATE_ENTRIES_START;
use crate::theta::serialization::UpdateHeader;
use crate::theta::serialization::read_preamble;
use crate::theta::serialization::update_image_bytes;
use crate::theta::serialization::update_slots;
use crate::theta::serialization::write_update_preamble;
use crate::theta::store::DirectStore;
use crate::theta::store::HeapStore;
use crate::theta::store::MemoryRequest;
use crate::theta::store::Store;
use crate::theta::union::Union;
use crate::theta::view::Entries;
use crate::theta::view::Slots;
use crate::theta::view::ValuesRef;

/// Read access shared by update, compact and wrapped sketches.
pub trait Sketch {
    /// Returns true if no datum was ever presented to the sketch.
    fn is_empty(&self) -> bool;

    /// Returns theta as a 64-bit threshold.
    fn theta64(&self) -> u64;

    /// Returns the number of entries below theta.
    fn num_retained(&self) -> usize;

    /// Returns the number of doubles attached to each key.
    fn num_values(&self) -> u8;

    /// Returns the 16-bit hash of the seed the sketch was built with.
    fn seed_hash(&self) -> u16;

    /// Iterates over the `(key, values)` entries below theta.
    fn iter(&self) -> Entries<'_>;

    /// Returns theta as a fraction in (0, 1].
    fn theta(&self) -> f64 {
        self.theta64() as f64 / MAX_THETA as f64
    }

    /// Returns true if the sketch sampled its input.
    fn is_estimation_mode(&self) -> bool {
        self.theta64() < MAX_THETA && !self.is_empty()
    }

    /// Returns the estimated number of distinct keys presented.
    fn estimate(&self) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        self.num_retained() as f64 / self.theta()
    }

    /// Returns the approximate lower bound of the estimate.
    fn lower_bound(&self, num_std_dev: NumStdDev) -> f64 {
        if !self.is_estimation_mode() {
            return self.num_retained() as f64;
        }
        binomial_bounds::lower_bound(
            self.num_retained() as u64,
            self.theta(),
            num_std_dev,
            self.is_empty(),
        )
    }

    /// Returns the approximate upper bound of the estimate.
    fn upper_bound(&self, num_std_dev: NumStdDev) -> f64 {
        if !self.is_estimation_mode() {
            return self.num_retained() as f64;
        }
        binomial_bounds::upper_bound(
            self.num_retained() as u64,
            self.theta(),
            num_std_dev,
            self.is_empty(),
        )
    }

    /// Returns the value vectors of all entries, in iteration order.
    fn values(&self) -> Vec<Vec<f64>> {
        self.iter().map(|(_, values)| values.to_vec()).collect()
    }

    /// Copies the entries below theta into an immutable sketch, sorted by key if
    /// `ordered`. The source is not modified.
    fn compact(&self, ordered: bool) -> CompactSketch {
        CompactSketch::from_sketch(self, ordered)
    }

    /// Writes the compact image into `dst` and returns a view over it.
    fn compact_into<'b>(
        &self,
        ordered: bool,
        dst: &'b mut [u8],
    ) -> Result<DirectCompactSketch<'b>, Error> {
        let size = write_compact(self, ordered, dst)?;
        let dst: &'b [u8] = dst;
        DirectCompactSketch::wrap_with_seed_hash(&dst[..size], self.seed_hash())
    }
}

/// Mutable QuickSelect sketch, optionally aggregating a vector of doubles per key.
///
/// The storage strategy `S` is either [`HeapStore`] (owned vectors) or [`DirectStore`]
/// (a caller-owned region holding the serialized image).
///
/// # Examples
///
/// ```
/// use datasketches_theta::theta::HeapQuickSelectSketch;
/// use datasketches_theta::theta::Sketch;
///
/// let mut sketch = HeapQuickSelectSketch::builder()
///     .nominal_entries(512)
///     .num_values(1)
///     .build()
///     .unwrap();
/// sketch.update_str("apple", &[1.0]).unwrap();
/// sketch.update_str("apple", &[2.0]).unwrap();
/// assert_eq!(sketch.estimate(), 1.0);
/// assert_eq!(sketch.values(), vec![vec![3.0]]);
/// ```
#[derive(Debug, Clone)]
pub struct QuickSelectSketch<S: Store = HeapStore> {
    store: S,
    lg_nom: u8,
    lg_rf: u8,
    sampling_probability: f32,
    seed: u64,
    seed_hash: u16,
    rebuild_threshold: u32,
}

/// QuickSelect sketch whose table lives on the heap.
pub type HeapQuickSelectSketch = QuickSelectSketch<HeapStore>;

/// QuickSelect sketch operating on a caller-owned region.
pub type DirectQuickSelectSketch<'a, M = &'a mut [u8]> = QuickSelectSketch<DirectStore<'a, M>>;

impl<S: Store> QuickSelectSketch<S> {
    fn from_store(store: S, config: &Config) -> Self {
        let rebuild_threshold = threshold(store.lg_capacity(), config.lg_nom);
        Self {
            store,
            lg_nom: config.lg_nom,
            lg_rf: config.lg_rf,
            sampling_probability: config.sampling_probability,
            seed: config.seed,
            seed_hash: config.seed_hash,
            rebuild_threshold,
        }
    }

    /// Hashes an item with the standard [`Hash`] encoding and updates the sketch.
    ///
    /// The [`Hash`] encoding of `str` and `String` appends a `0xff` terminator, so
    /// `update("a", ..)` and [`update_str`](Self::update_str) produce different keys.
    /// Use `update_str` for strings that must match sketches built elsewhere.
    ///
    /// `values` must hold exactly [`Sketch::num_values`] doubles; they are summed into
    /// the values already stored for the key.
    pub fn update<T: Hash>(&mut self, item: T, values: &[f64]) -> Result<(), Error> {
        let mut hasher = MurmurHash3X64128::with_seed(self.seed);
        item.hash(&mut hasher);
        self.update_hash(hasher.finish128().0 >> 1, values)
    }

    /// Updates the sketch with the UTF-8 bytes of a string. Empty strings are ignored.
    pub fn update_str(&mut self, item: &str, values: &[f64]) -> Result<(), Error> {
        self.update_bytes(item.as_bytes(), values)
    }

    /// Updates the sketch with a byte string. Empty input is ignored.
    pub fn update_bytes(&mut self, item: &[u8], values: &[f64]) -> Result<(), Error> {
        if item.is_empty() {
            return Ok(());
        }
        self.update_hash(self.hash_bytes(item), values)
    }

    /// Updates the sketch with an array of longs hashed as little-endian bytes. Empty
    /// input is ignored.
    pub fn update_i64s(&mut self, item: &[i64], values: &[f64]) -> Result<(), Error> {
        if item.is_empty() {
            return Ok(());
        }
        let mut hasher = MurmurHash3X64128::with_seed(self.seed);
        for v in item {
            hasher.write(&v.to_le_bytes());
        }
        self.update_hash(hasher.finish128().0 >> 1, values)
    }

    /// Updates the sketch with an array of ints hashed as little-endian bytes. Empty
    /// input is ignored.
    pub fn update_i32s(&mut self, item: &[i32], values: &[f64]) -> Result<(), Error> {
        if item.is_empty() {
            return Ok(());
        }
        let mut hasher = MurmurHash3X64128::with_seed(self.seed);
        for v in item {
            hasher.write(&v.to_le_bytes());
        }
        self.update_hash(hasher.finish128().0 >> 1, values)
    }

    /// Updates the sketch with a double. All NaNs hash alike, as do `0.0` and `-0.0`.
    pub fn update_f64(&mut self, item: f64, values: &[f64]) -> Result<(), Error> {
        let canonical = canonical_double(item);
        self.update_hash(self.hash_bytes(&canonical.to_le_bytes()), values)
    }

    /// Updates the sketch with an already hashed key.
    ///
    /// The empty flag is cleared even if the key is screened out by theta.
    pub fn update_hash(&mut self, key: u64, values: &[f64]) -> Result<(), Error> {
        self.ensure_values_len(values.len())?;
        self.store.set_empty(false);
        if key == 0 || key >= self.store.theta() {
            return Ok(());
        }
        self.merge(key, ValuesRef::from(values))
    }

    /// Returns the key an item hashes to with this sketch's seed.
    pub fn key_of<T: Hash>(&self, item: T) -> u64 {
        let mut hasher = MurmurHash3X64128::with_seed(self.seed);
        item.hash(&mut hasher);
        hasher.finish128().0 >> 1
    }

    /// Returns the aggregated values of a key, if it is retained.
    pub fn find(&self, key: u64) -> Option<ValuesRef<'_>> {
        if key >= self.store.theta() {
            return None;
        }
        find(&self.store, key).map(|index| self.store.values(index))
    }

    fn hash_bytes(&self, bytes: &[u8]) -> u64 {
        let mut hasher = MurmurHash3X64128::with_seed(self.seed);
        hasher.write(bytes);
        hasher.finish128().0 >> 1
    }

    fn ensure_values_len(&self, len: usize) -> Result<(), Error> {
        let expected = self.store.num_values() as usize;
        if len != expected {
            return Err(Error::invalid_argument("wrong number of values for update")
                .with_context("expected", expected)
                .with_context("actual", len));
        }
        Ok(())
    }

    /// Inserts a key below theta, or adds `values` to its stored values if present.
    pub(crate) fn merge(&mut self, key: u64, values: ValuesRef<'_>) -> Result<(), Error> {
        match find_or_insert_key(&mut self.store, key)? {
            Probe::Found(index) => self.store.add_values(index, values),
            Probe::Inserted(index) => {
                self.store.set_values(index, values);
                let num_retained = self.store.num_retained() + 1;
                self.store.set_num_retained(num_retained);
                if num_retained >= self.rebuild_threshold {
                    self.rebuild_if_needed()?;
                }
            }
        }
        Ok(())
    }

    fn rebuild_if_needed(&mut self) -> Result<(), Error> {
        let lg_cur = self.store.lg_capacity();
        if lg_cur > self.lg_nom {
            self.update_theta();
            self.rebuild_table(lg_cur)
        } else {
            let lg_new = (lg_cur + self.lg_rf.max(1)).min(self.lg_nom + 1);
            tracing::debug!(lg_cur, lg_new, "growing hash table");
            self.rebuild_table(lg_new)
        }
    }

    /// Sets theta to the k-th smallest retained key.
    fn update_theta(&mut self) {
        let k = 1usize << self.lg_nom;
        let mut keys: Vec<u64> = self.iter().map(|(key, _)| key).collect();
        debug_assert!(keys.len() > k, "theta update needs more than k entries");
        let (_, kth, _) = keys.select_nth_unstable(k);
        self.store.set_theta(*kth);
    }

    /// Re-inserts every entry below theta into a zeroed table of `1 << lg_capacity` slots.
    fn rebuild_table(&mut self, lg_capacity: u8) -> Result<(), Error> {
        let theta = self.store.theta();
        let num_values = self.store.num_values() as usize;
        let (keys, values) = self.store.resize(lg_capacity)?;
        let mut num_retained = 0;
        for (i, &key) in keys.iter().enumerate() {
            if key != 0 && key < theta {
                let index = insert_key(&mut self.store, key)?;
                let slot_values = &values[i * num_values..(i + 1) * num_values];
                self.store.set_values(index, ValuesRef::from(slot_values));
                num_retained += 1;
            }
        }
        self.store.set_num_retained(num_retained);
        self.rebuild_threshold = threshold(lg_capacity, self.lg_nom);
        tracing::debug!(lg_capacity, num_retained, theta, "rebuilt hash table");
        Ok(())
    }

    /// Drops entries at or above theta and rehashes the rest at the current capacity.
    pub fn rebuild(&mut self) -> Result<(), Error> {
        self.rebuild_table(self.store.lg_capacity())
    }

    /// Reduces the retained entries to the nominal entries if there are more.
    pub fn trim(&mut self) -> Result<(), Error> {
        if self.store.num_retained() as usize > self.nominal_entries() {
            self.update_theta();
            self.rebuild()?;
        }
        Ok(())
    }

    /// Returns the sketch to its freshly built state, including the starting capacity.
    pub fn reset(&mut self) {
        let lg_start =
            starting_lg_capacity(self.lg_nom, self.lg_rf).min(self.store.lg_capacity());
        self.store.clear(lg_start);
        self.store.set_theta(initial_theta(self.sampling_probability));
        self.store.set_num_retained(0);
        self.store.set_empty(true);
        self.rebuild_threshold = threshold(lg_start, self.lg_nom);
    }

    pub(crate) fn set_theta(&mut self, theta: u64) {
        self.store.set_theta(theta);
    }

    pub(crate) fn set_not_empty(&mut self) {
        self.store.set_empty(false);
    }

    /// Returns log2 of the nominal entries.
    pub fn lg_nom(&self) -> u8 {
        self.lg_nom
    }

    /// Returns the nominal entries k.
    pub fn nominal_entries(&self) -> usize {
        1 << self.lg_nom
    }

    /// Returns log2 of the current number of table slots.
    pub fn lg_capacity(&self) -> u8 {
        self.store.lg_capacity()
    }

    pub fn resize_factor(&self) -> ResizeFactor {
        ResizeFactor::from_lg(self.lg_rf).unwrap_or_default()
    }

    pub fn sampling_probability(&self) -> f32 {
        self.sampling_probability
    }

    /// Returns the seed items are hashed with.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Returns the size of the image [`QuickSelectSketch::to_bytes`] produces.
    pub fn serialized_size(&self) -> usize {
        update_image_bytes(self.store.lg_capacity(), self.store.num_values())
    }

    fn header(&self) -> UpdateHeader {
        UpdateHeader {
            num_values: self.store.num_values(),
            seed_hash: self.seed_hash,
            theta: self.store.theta(),
            lg_nom: self.lg_nom,
            lg_cur: self.store.lg_capacity(),
            lg_rf: self.lg_rf,
            p: self.sampling_probability,
            num_retained: self.store.num_retained(),
            empty: self.store.is_empty(),
        }
    }

    /// Serializes the sketch including its whole hash table.
    pub fn to_bytes(&self) -> Vec<u8> {
        let lg_cur = self.store.lg_capacity();
        let num_values = self.store.num_values() as usize;
        let mut bytes = vec![0u8; self.serialized_size()];
        write_update_preamble(&mut bytes, &self.header());
        let values_start = UPDATE_ENTRIES_START + (8 << lg_cur);
        let slots = self.store.slots();
        for index in 0..slots.len() {
            let key = slots.key(index);
            if key == 0 {
                continue;
            }
            put_u64(&mut bytes, UPDATE_ENTRIES_START + index * 8, key);
            for (j, value) in slots.values(index).iter().enumerate() {
                put_f64(&mut bytes, values_start + (index * num_values + j) * 8, value);
            }
        }
        bytes
    }
}

impl<S: Store> Sketch for QuickSelectSketch<S> {
    fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    fn theta64(&self) -> u64 {
        self.store.theta()
    }

    fn num_retained(&self) -> usize {
        self.store.num_retained() as usize
    }

    fn num_values(&self) -> u8 {
        self.store.num_values()
    }

    fn seed_hash(&self) -> u16 {
        self.seed_hash
    }

    fn iter(&self) -> Entries<'_> {
        Entries::new(self.store.slots(), self.store.theta())
    }
}

impl QuickSelectSketch<HeapStore> {
    /// Creates a new builder.
    pub fn builder() -> QuickSelectSketchBuilder {
        QuickSelectSketchBuilder::default()
    }

    /// Deserializes an update sketch image into an owned sketch.
    pub fn heapify(bytes: &[u8], seed: u64) -> Result<Self, Error> {
        let image = UpdateImage::read(bytes, seed)?;
        let store = HeapStore::from_slots(
            image.slots(bytes),
            image.lg_cur,
            image.config.num_values,
            image.theta,
            image.num_retained,
            image.empty,
        );
        Ok(Self::from_store(store, &image.config))
    }
}

impl<'a, M: AsRef<[u8]> + AsMut<[u8]>> QuickSelectSketch<DirectStore<'a, M>> {
    /// Operates on an update sketch image in place. The region cannot grow.
    pub fn wrap(region: M, seed: u64) -> Result<Self, Error> {
        Self::wrap_inner(region, seed, None)
    }

    /// Operates on an update sketch image in place, asking `request` for a bigger region
    /// when the table outgrows the current one.
    pub fn wrap_with_request<R>(region: M, seed: u64, request: R) -> Result<Self, Error>
    where
        R: MemoryRequest<M> + 'a,
    {
        Self::wrap_inner(region, seed, Some(Box::new(request)))
    }

    fn wrap_inner(
        region: M,
        seed: u64,
        request: Option<Box<dyn MemoryRequest<M> + 'a>>,
    ) -> Result<Self, Error> {
        let image = UpdateImage::read(region.as_ref(), seed)?;
        Ok(Self::from_store(DirectStore::new(region, request), &image.config))
    }

    /// Returns the backing region.
    pub fn region(&self) -> &[u8] {
        self.store.region()
    }

    /// Gives the backing region back to the caller.
    pub fn into_region(self) -> M {
        self.store.into_region()
    }
}

/// A validated update image.
struct UpdateImage {
    config: Config,
    lg_cur: u8,
    theta: u64,
    num_retained: u32,
    empty: bool,
}

impl UpdateImage {
    fn read(bytes: &[u8], seed: u64) -> Result<Self, Error> {
        let seed_hash = compute_seed_hash(seed)?;
        let preamble = read_preamble(bytes, seed_hash)?;
        let Layout::Update {
            lg_nom,
            lg_cur,
            lg_rf,
            p,
            num_retained,
        } = preamble.layout
        else {
            return Err(Error::deserial(format!(
                "expected an update sketch, got {}",
                preamble.kind.name()
            )));
        };
        let image = Self {
            config: Config {
                lg_nom,
                lg_rf,
                sampling_probability: p,
                num_values: preamble.num_values,
                seed,
                seed_hash,
            },
            lg_cur,
            theta: preamble.theta,
            num_retained,
            empty: preamble.empty,
        };
        let counted = Entries::new(image.slots(bytes), image.theta).count();
        if counted != num_retained as usize {
            return Err(
                Error::deserial("retained count does not match the hash table")
                    .with_context("declared", num_retained)
                    .with_context("counted", counted),
            );
        }
        Ok(image)
    }

    fn slots<'b>(&self, bytes: &'b [u8]) -> Slots<'b> {
        update_slots(bytes, self.lg_cur, self.config.num_values)
    }
}

/// Returns the bytes a direct sketch needs to reach full size without a memory request.
pub fn max_bytes(nominal_entries: u32, num_values: u8) -> Result<usize, Error> {
    let lg_nom = lg_nominal_entries(nominal_entries)?;
    let lg_max = [0, 1, 2, 3]
        .into_iter()
        .map(|lg_rf| max_lg_capacity(lg_nom, lg_rf))
        .max()
        .unwrap_or(lg_nom + 1);
    Ok(update_image_bytes(lg_max, num_values))
}

fn lg_nominal_entries(nominal_entries: u32) -> Result<u8, Error> {
    if !nominal_entries.is_power_of_two() || nominal_entries >= 1 << (MAX_LG_NOM + 1) {
        return Err(Error::invalid_argument(format!(
            "nominal entries must be a power of two in [1, {}]",
            1u32 << MAX_LG_NOM
        ))
        .with_context("nominal_entries", nominal_entries));
    }
    Ok(nominal_entries.trailing_zeros() as u8)
}

fn initial_theta(p: f32) -> u64 {
    if p >= 1.0 {
        MAX_THETA
    } else {
        (MAX_THETA as f64 * p as f64) as u64
    }
}

/// Validated construction parameters.
#[derive(Debug, Clone, Copy)]
struct Config {
    lg_nom: u8,
    lg_rf: u8,
    sampling_probability: f32,
    num_values: u8,
    seed: u64,
    seed_hash: u16,
}

impl Config {
    fn header(&self, lg_cur: u8) -> UpdateHeader {
        UpdateHeader {
            num_values: self.num_values,
            seed_hash: self.seed_hash,
            theta: initial_theta(self.sampling_probability),
            lg_nom: self.lg_nom,
            lg_cur,
            lg_rf: self.lg_rf,
            p: self.sampling_probability,
            num_retained: 0,
            empty: true,
        }
    }
}

/// Builder for [`QuickSelectSketch`] and [`Union`].
#[derive(Debug, Clone)]
pub struct QuickSelectSketchBuilder {
    nominal_entries: u32,
    resize_factor: ResizeFactor,
    sampling_probability: f32,
    num_values: u8,
    seed: u64,
}

impl Default for QuickSelectSketchBuilder {
    fn default() -> Self {
        Self {
            nominal_entries: DEFAULT_NOMINAL_ENTRIES,
            resize_factor: ResizeFactor::X8,
            sampling_probability: 1.0,
            num_values: 0,
            seed: DEFAULT_UPDATE_SEED,
        }
    }
}

/// Default nominal entries k.
pub const DEFAULT_NOMINAL_ENTRIES: u32 = 4096;

impl QuickSelectSketchBuilder {
    /// Set the nominal entries k, a power of two below 65536.
    pub fn nominal_entries(mut self, nominal_entries: u32) -> Self {
        self.nominal_entries = nominal_entries;
        self
    }

    /// Set resize factor.
    pub fn resize_factor(mut self, factor: ResizeFactor) -> Self {
        self.resize_factor = factor;
        self
    }

    /// Set the sampling probability p in (0, 1]. Theta starts at p.
    pub fn sampling_probability(mut self, probability: f32) -> Self {
        self.sampling_probability = probability;
        self
    }

    /// Set the number of doubles attached to each key; zero builds a keys-only sketch.
    pub fn num_values(mut self, num_values: u8) -> Self {
        self.num_values = num_values;
        self
    }

    /// Set hash seed.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    fn validate(&self) -> Result<Config, Error> {
        let lg_nom = lg_nominal_entries(self.nominal_entries)?;
        let p = self.sampling_probability;
        if !(p > 0.0 && p <= 1.0) {
            return Err(Error::invalid_argument(format!(
                "sampling probability must be in (0, 1], got {p}"
            )));
        }
        if initial_theta(p) == 0 {
            return Err(Error::invalid_argument(format!(
                "sampling probability {p} is too small"
            )));
        }
        let seed_hash = compute_seed_hash(self.seed)?;
        Ok(Config {
            lg_nom,
            lg_rf: self.resize_factor.lg_value(),
            sampling_probability: p,
            num_values: self.num_values,
            seed: self.seed,
            seed_hash,
        })
    }

    /// Build a sketch on the heap.
    pub fn build(self) -> Result<HeapQuickSelectSketch, Error> {
        let config = self.validate()?;
        let lg_start = starting_lg_capacity(config.lg_nom, config.lg_rf);
        let theta = initial_theta(config.sampling_probability);
        let store = HeapStore::new(lg_start, config.num_values, theta);
        Ok(QuickSelectSketch::from_store(store, &config))
    }

    /// Build a sketch inside `region`, which must hold at least the starting table.
    /// The sketch fails with [`ErrorKind::InvalidState`](crate::error::ErrorKind) once it
    /// needs more room than the region has.
    pub fn build_direct<'a, M>(self, region: M) -> Result<DirectQuickSelectSketch<'a, M>, Error>
    where
        M: AsRef<[u8]> + AsMut<[u8]>,
    {
        self.build_direct_inner(region, None)
    }

    /// Build a sketch inside `region`, asking `request` for a bigger region when needed.
    pub fn build_direct_with_request<'a, M, R>(
        self,
        region: M,
        request: R,
    ) -> Result<DirectQuickSelectSketch<'a, M>, Error>
    where
        M: AsRef<[u8]> + AsMut<[u8]>,
        R: MemoryRequest<M> + 'a,
    {
        self.build_direct_inner(region, Some(Box::new(request)))
    }

    fn build_direct_inner<'a, M>(
        self,
        mut region: M,
        request: Option<Box<dyn MemoryRequest<M> + 'a>>,
    ) -> Result<DirectQuickSelectSketch<'a, M>, Error>
    where
        M: AsRef<[u8]> + AsMut<[u8]>,
    {
        let config = self.validate()?;
        let lg_start = starting_lg_capacity(config.lg_nom, config.lg_rf);
        let required = update_image_bytes(lg_start, config.num_values);
        let bytes = region.as_mut();
        if bytes.len() < required {
            return Err(Error::invalid_argument("destination region is too small")
                .with_context("required_bytes", required)
                .with_context("actual_bytes", bytes.len()));
        }
        write_update_preamble(bytes, &config.header(lg_start));
        bytes[UPDATE_ENTRIES_START..required].fill(0);
        Ok(QuickSelectSketch::from_store(
            DirectStore::new(region, request),
            &config,
        ))
    }

    /// Build a union whose internal sketch has these parameters.
    pub fn build_union(self) -> Result<Union, Error> {
        self.build().map(Union::new)
    }
}

/// Canonicalize double value for compatibility with Java
fn canonical_double(value: f64) -> i64 {
    if value.is_nan() {
        // Java's Double.doubleToLongBits() NaN value
        0x7ff8000000000000i64
    } else {
        // -0.0 + 0.0 == +0.0 under IEEE754 roundTiesToEven rounding mode
        (value + 0.0).to_bits() as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_builder_validation() {
        for k in [0, 3, 100, 65536, 1 << 20] {
            let err = HeapQuickSelectSketch::builder()
                .nominal_entries(k)
                .build()
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidArgument, "k = {k}");
        }
        for p in [0.0, -0.5, 1.5, f32::NAN] {
            let err = HeapQuickSelectSketch::builder()
                .sampling_probability(p)
                .build()
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidArgument, "p = {p}");
        }
        assert!(
            HeapQuickSelectSketch::builder()
                .nominal_entries(32768)
                .build()
                .is_ok()
        );
        assert!(
            HeapQuickSelectSketch::builder()
                .nominal_entries(1)
                .build()
                .is_ok()
        );
    }

    #[test]
    fn test_canonical_double() {
        assert_eq!(canonical_double(0.0), canonical_double(-0.0));
        assert_eq!(canonical_double(f64::NAN), canonical_double(-f64::NAN));
        assert_ne!(canonical_double(1.0), canonical_double(-1.0));
    }

    #[test]
    fn test_grows_to_target_then_rebuilds() {
        let mut sketch = HeapQuickSelectSketch::builder()
            .nominal_entries(64)
            .resize_factor(ResizeFactor::X2)
            .build()
            .unwrap();
        assert_eq!(sketch.lg_capacity(), 5);
        for i in 0..64u64 {
            sketch.update(i, &[]).unwrap();
        }
        assert_eq!(sketch.lg_capacity(), 7);
        assert_eq!(sketch.theta64(), MAX_THETA);
        for i in 64..1000u64 {
            sketch.update(i, &[]).unwrap();
        }
        assert_eq!(sketch.lg_capacity(), 7);
        assert!(sketch.theta64() < MAX_THETA);
        assert!(sketch.num_retained() < 120);
        assert!(sketch.lg_capacity() <= 7);
    }

    #[test]
    fn test_update_theta_keeps_exactly_k() {
        let mut sketch = HeapQuickSelectSketch::builder()
            .nominal_entries(32)
            .build()
            .unwrap();
        for i in 0..200u64 {
            sketch.update(i, &[]).unwrap();
        }
        sketch.trim().unwrap();
        assert_eq!(sketch.num_retained(), 32);
        assert!(sketch.iter().all(|(key, _)| key < sketch.theta64()));
    }

    #[test]
    fn test_max_bytes_covers_every_resize_factor() {
        for k in [1u32, 4, 16, 512] {
            let max = max_bytes(k, 1).unwrap();
            for rf in [
                ResizeFactor::X1,
                ResizeFactor::X2,
                ResizeFactor::X4,
                ResizeFactor::X8,
            ] {
                let lg_nom = k.trailing_zeros() as u8;
                let needed = update_image_bytes(max_lg_capacity(lg_nom, rf.lg_value()), 1);
                assert!(needed <= max, "k = {k}, rf = {rf:?}");
            }
        }
        assert!(max_bytes(3, 0).is_err());
    }
}
