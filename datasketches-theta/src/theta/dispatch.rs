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

//! Reconstruction of sketches from images whose kind is only known at runtime.
//!
//! Plain images carry a [`SketchKind`] tag in their preamble. Composite payloads that
//! mix sketches with other data are prefixed with a type name instead, and resolved by a
//! [`DeserializerRegistry`] the caller fills explicitly.

use std::collections::HashMap;
use std::fmt;

use crate::codec::SketchSlice;
use crate::codec::assert::insufficient_data;
use crate::codec::family::Family;
use crate::error::Error;
use crate::hash::compute_seed_hash;
use crate::theta::compact::CompactSketch;
use crate::theta::compact::DirectCompactSketch;
use crate::theta::serialization::read_preamble;
use crate::theta::sketch::DirectQuickSelectSketch;
use crate::theta::sketch::HeapQuickSelectSketch;
use crate::theta::sketch::Sketch;
use crate::theta::view::Entries;

/// The kind tag stored in byte 3 of every image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SketchKind {
    /// Keys-only update sketch.
    QuickSelect,
    /// Keys-only compact sketch.
    Compact,
    /// Update sketch with values.
    ArrayOfDoublesQuickSelect,
    /// Compact sketch with values.
    ArrayOfDoublesCompact,
}

impl SketchKind {
    /// Every kind, in tag order.
    pub const ALL: [SketchKind; 4] = [
        SketchKind::QuickSelect,
        SketchKind::Compact,
        SketchKind::ArrayOfDoublesQuickSelect,
        SketchKind::ArrayOfDoublesCompact,
    ];

    pub fn from_tag(tag: u8) -> Option<Self> {
        Self::ALL.get(tag as usize).copied()
    }

    pub fn tag(self) -> u8 {
        match self {
            SketchKind::QuickSelect => 0,
            SketchKind::Compact => 1,
            SketchKind::ArrayOfDoublesQuickSelect => 2,
            SketchKind::ArrayOfDoublesCompact => 3,
        }
    }

    /// The name used for this kind in named payloads.
    pub fn name(self) -> &'static str {
        match self {
            SketchKind::QuickSelect => "QuickSelectSketch",
            SketchKind::Compact => "CompactSketch",
            SketchKind::ArrayOfDoublesQuickSelect => "ArrayOfDoublesQuickSelectSketch",
            SketchKind::ArrayOfDoublesCompact => "ArrayOfDoublesCompactSketch",
        }
    }

    pub fn is_compact(self) -> bool {
        matches!(
            self,
            SketchKind::Compact | SketchKind::ArrayOfDoublesCompact
        )
    }

    /// Returns true for kinds that carry values next to each key.
    pub fn has_values(self) -> bool {
        matches!(
            self,
            SketchKind::ArrayOfDoublesQuickSelect | SketchKind::ArrayOfDoublesCompact
        )
    }

    pub(crate) fn for_layout(compact: bool, num_values: u8) -> Self {
        match (compact, num_values > 0) {
            (false, false) => SketchKind::QuickSelect,
            (true, false) => SketchKind::Compact,
            (false, true) => SketchKind::ArrayOfDoublesQuickSelect,
            (true, true) => SketchKind::ArrayOfDoublesCompact,
        }
    }
}

impl fmt::Display for SketchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Reads the kind tag of an image after checking its family.
pub fn sketch_kind(bytes: &[u8]) -> Result<SketchKind, Error> {
    let mut cursor = SketchSlice::new(bytes);
    cursor
        .skip(2)
        .map_err(insufficient_data("preamble_longs"))?;
    let family_id = cursor.read_u8().map_err(insufficient_data("family_id"))?;
    let tag = cursor.read_u8().map_err(insufficient_data("sketch_kind"))?;
    Family::TUPLE.validate_id(family_id)?;
    SketchKind::from_tag(tag)
        .ok_or_else(|| Error::deserial(format!("unknown sketch kind tag: {tag}")))
}

/// An owned sketch of any kind.
#[derive(Debug, Clone)]
pub enum HeapSketch {
    Update(HeapQuickSelectSketch),
    Compact(CompactSketch),
}

impl HeapSketch {
    pub fn kind(&self) -> SketchKind {
        SketchKind::for_layout(
            matches!(self, HeapSketch::Compact(_)),
            self.num_values(),
        )
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            HeapSketch::Update(sketch) => sketch.to_bytes(),
            HeapSketch::Compact(sketch) => sketch.to_bytes(),
        }
    }
}

impl Sketch for HeapSketch {
    fn is_empty(&self) -> bool {
        match self {
            HeapSketch::Update(sketch) => sketch.is_empty(),
            HeapSketch::Compact(sketch) => sketch.is_empty(),
        }
    }

    fn theta64(&self) -> u64 {
        match self {
            HeapSketch::Update(sketch) => sketch.theta64(),
            HeapSketch::Compact(sketch) => sketch.theta64(),
        }
    }

    fn num_retained(&self) -> usize {
        match self {
            HeapSketch::Update(sketch) => sketch.num_retained(),
            HeapSketch::Compact(sketch) => sketch.num_retained(),
        }
    }

    fn num_values(&self) -> u8 {
        match self {
            HeapSketch::Update(sketch) => sketch.num_values(),
            HeapSketch::Compact(sketch) => sketch.num_values(),
        }
    }

    fn seed_hash(&self) -> u16 {
        match self {
            HeapSketch::Update(sketch) => sketch.seed_hash(),
            HeapSketch::Compact(sketch) => sketch.seed_hash(),
        }
    }

    fn iter(&self) -> Entries<'_> {
        match self {
            HeapSketch::Update(sketch) => sketch.iter(),
            HeapSketch::Compact(sketch) => sketch.iter(),
        }
    }
}

/// Deserializes an image of any kind into an owned sketch.
pub fn heapify_sketch(bytes: &[u8], seed: u64) -> Result<HeapSketch, Error> {
    if sketch_kind(bytes)?.is_compact() {
        CompactSketch::heapify(bytes, seed).map(HeapSketch::Compact)
    } else {
        HeapQuickSelectSketch::heapify(bytes, seed).map(HeapSketch::Update)
    }
}

/// A sketch of any kind operating on a caller-owned region.
#[derive(Debug)]
pub enum WrappedSketch<'a> {
    Update(DirectQuickSelectSketch<'a>),
    Compact(DirectCompactSketch<'a>),
}

impl Sketch for WrappedSketch<'_> {
    fn is_empty(&self) -> bool {
        match self {
            WrappedSketch::Update(sketch) => sketch.is_empty(),
            WrappedSketch::Compact(sketch) => sketch.is_empty(),
        }
    }

    fn theta64(&self) -> u64 {
        match self {
            WrappedSketch::Update(sketch) => sketch.theta64(),
            WrappedSketch::Compact(sketch) => sketch.theta64(),
        }
    }

    fn num_retained(&self) -> usize {
        match self {
            WrappedSketch::Update(sketch) => sketch.num_retained(),
            WrappedSketch::Compact(sketch) => sketch.num_retained(),
        }
    }

    fn num_values(&self) -> u8 {
        match self {
            WrappedSketch::Update(sketch) => sketch.num_values(),
            WrappedSketch::Compact(sketch) => sketch.num_values(),
        }
    }

    fn seed_hash(&self) -> u16 {
        match self {
            WrappedSketch::Update(sketch) => sketch.seed_hash(),
            WrappedSketch::Compact(sketch) => sketch.seed_hash(),
        }
    }

    fn iter(&self) -> Entries<'_> {
        match self {
            WrappedSketch::Update(sketch) => sketch.iter(),
            WrappedSketch::Compact(sketch) => sketch.iter(),
        }
    }
}

/// Operates on an image of any kind in place. Update images stay mutable.
pub fn wrap_sketch(bytes: &mut [u8], seed: u64) -> Result<WrappedSketch<'_>, Error> {
    if sketch_kind(bytes)?.is_compact() {
        let bytes: &[u8] = bytes;
        DirectCompactSketch::wrap(bytes, seed).map(WrappedSketch::Compact)
    } else {
        DirectQuickSelectSketch::wrap(bytes, seed).map(WrappedSketch::Update)
    }
}

type Deserializer<T> = Box<dyn Fn(&[u8]) -> Result<(T, usize), Error> + Send + Sync>;

/// Resolves named payloads produced by [`serialize_named`].
///
/// A named payload is a one-byte name length, the UTF-8 name, then the payload. Each
/// deserializer returns the decoded value and the number of payload bytes it consumed.
pub struct DeserializerRegistry<T> {
    deserializers: HashMap<String, Deserializer<T>>,
}

impl<T> Default for DeserializerRegistry<T> {
    fn default() -> Self {
        Self {
            deserializers: HashMap::new(),
        }
    }
}

impl<T> fmt::Debug for DeserializerRegistry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.deserializers.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("DeserializerRegistry")
            .field("names", &names)
            .finish()
    }
}

impl<T> DeserializerRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the deserializer for `name`. Names must be unique, non-empty and at
    /// most 255 bytes long.
    pub fn register<F>(&mut self, name: &str, deserializer: F) -> Result<(), Error>
    where
        F: Fn(&[u8]) -> Result<(T, usize), Error> + Send + Sync + 'static,
    {
        ensure_valid_name(name)?;
        if self.deserializers.contains_key(name) {
            return Err(Error::invalid_argument("type name is already registered")
                .with_context("name", name));
        }
        self.deserializers
            .insert(name.to_string(), Box::new(deserializer));
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.deserializers.contains_key(name)
    }

    /// Decodes a named payload and returns the value and the total bytes consumed,
    /// including the name prefix.
    pub fn deserialize(&self, bytes: &[u8]) -> Result<(T, usize), Error> {
        let mut cursor = SketchSlice::new(bytes);
        let name_len = cursor.read_u8().map_err(insufficient_data("name_length"))?;
        let name = cursor
            .read_slice(name_len as usize)
            .map_err(insufficient_data("name"))?;
        let name = std::str::from_utf8(name)
            .map_err(|err| Error::deserial(format!("type name is not valid UTF-8: {err}")))?;
        let deserializer = self
            .deserializers
            .get(name)
            .ok_or_else(|| Error::deserial("unknown type name").with_context("name", name))?;
        let prefix = cursor.position();
        let (value, consumed) = deserializer(cursor.remaining())?;
        Ok((value, prefix + consumed))
    }
}

impl DeserializerRegistry<HeapSketch> {
    /// A registry resolving the name of every [`SketchKind`] to [`heapify_sketch`].
    ///
    /// The kind tag inside the payload must agree with the name.
    pub fn with_sketch_kinds(seed: u64) -> Result<Self, Error> {
        let seed_hash = compute_seed_hash(seed)?;
        let mut registry = Self::new();
        for kind in SketchKind::ALL {
            registry.register(kind.name(), move |bytes| {
                let consumed = read_preamble(bytes, seed_hash)?.image_bytes;
                let sketch = heapify_sketch(bytes, seed)?;
                if sketch.kind() != kind {
                    return Err(Error::deserial(format!(
                        "payload is a {}, not a {kind}",
                        sketch.kind()
                    )));
                }
                Ok((sketch, consumed))
            })?;
        }
        Ok(registry)
    }
}

fn ensure_valid_name(name: &str) -> Result<(), Error> {
    if name.is_empty() || name.len() > u8::MAX as usize {
        return Err(
            Error::invalid_argument("type name must be 1 to 255 bytes long")
                .with_context("name_length", name.len()),
        );
    }
    Ok(())
}

/// Prefixes `payload` with a one-byte length and the UTF-8 bytes of `name`.
pub fn serialize_named(name: &str, payload: &[u8]) -> Result<Vec<u8>, Error> {
    ensure_valid_name(name)?;
    let mut out = Vec::with_capacity(1 + name.len() + payload.len());
    out.push(name.len() as u8);
    out.extend_from_slice(name.as_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}
