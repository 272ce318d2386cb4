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

//! QuickSelect theta sketches and their tuple generalization.
//!
//! A theta sketch retains the hashed keys below a threshold theta in an open-addressing
//! hash table. When the table holds too many entries, theta is lowered to the k-th
//! smallest retained key and everything at or above it is discarded, so the number of
//! retained entries stays close to the nominal size k.
//!
//! # Overview
//!
//! - [`QuickSelectSketch`]: mutable sketch, either on the heap ([`HeapQuickSelectSketch`])
//!   or inside a caller-owned region ([`DirectQuickSelectSketch`]). Each key can carry a
//!   fixed number of doubles that are summed when the key is seen again.
//! - [`CompactSketch`] and [`DirectCompactSketch`]: immutable results holding only the
//!   entries below theta.
//! - [`Union`]: merges any number of sketches sharing a seed.
//! - [`heapify_sketch`], [`wrap_sketch`] and [`DeserializerRegistry`]: reconstruction
//!   of images whose kind is only known at runtime.
//!
//! Images use the machine's native byte order, recorded in the flags byte. The byte
//! layout is described in [`serialization`].

mod compact;
mod dispatch;
mod hash_table;
pub mod serialization;
mod sketch;
mod store;
mod union;
mod view;

/// Theta value meaning "no sampling": every key is retained.
pub const MAX_THETA: u64 = i64::MAX as u64;

pub use self::compact::CompactSketch;
pub use self::compact::DirectCompactSketch;
pub use self::dispatch::DeserializerRegistry;
pub use self::dispatch::HeapSketch;
pub use self::dispatch::SketchKind;
pub use self::dispatch::WrappedSketch;
pub use self::dispatch::heapify_sketch;
pub use self::dispatch::serialize_named;
pub use self::dispatch::sketch_kind;
pub use self::dispatch::wrap_sketch;
pub use self::sketch::DEFAULT_NOMINAL_ENTRIES;
pub use self::sketch::DirectQuickSelectSketch;
pub use self::sketch::HeapQuickSelectSketch;
pub use self::sketch::QuickSelectSketch;
pub use self::sketch::QuickSelectSketchBuilder;
pub use self::sketch::Sketch;
pub use self::sketch::max_bytes;
pub use self::store::DirectStore;
pub use self::store::HeapStore;
pub use self::store::MemoryRequest;
pub use self::store::Store;
pub use self::union::DirectUnion;
pub use self::union::Union;
pub use self::view::Entries;
pub use self::view::ValuesRef;
