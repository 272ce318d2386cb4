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

//! Serialization constants and preamble validation for QuickSelect sketch images.
//!
//! ```text
//! byte  0      1       2       3     4      5        6-7        8-15
//!      pre   ser_ver family  kind  flags num_vals seed_hash    theta
//!
//! update image (4 pre-longs):
//! byte 16      17      18     19    20-23   24-27        28-31
//!     lg_nom lg_cur  lg_rf   --     p      retained      --
//! byte 32..: keys for every slot, then num_vals doubles for every slot
//!
//! compact image (3 pre-longs, or 1 when empty):
//! byte 16-19   20-23
//!     retained  --
//! byte 24..: retained keys, then num_vals doubles per retained key
//! ```

use crate::codec::NATIVE_BIG_ENDIAN;
use crate::codec::SketchSlice;
use crate::codec::assert::ensure_preamble_longs_in;
use crate::codec::assert::ensure_serial_version_is;
use crate::codec::assert::insufficient_data;
use crate::codec::family::Family;
use crate::codec::put_f32;
use crate::codec::put_u16;
use crate::codec::put_u32;
use crate::codec::put_u64;
use crate::common::ResizeFactor;
use crate::error::Error;
use crate::hash::ensure_seed_hashes_match;
use crate::theta::MAX_THETA;
use crate::theta::dispatch::SketchKind;
use crate::theta::hash_table::MAX_LG_NOM;
use crate::theta::hash_table::MIN_LG_CAPACITY;
use crate::theta::hash_table::max_lg_capacity;
use crate::theta::view::Slots;

/// Serialization version.
pub const SERIAL_VERSION: u8 = 1;

/// Preamble longs of an empty compact sketch.
pub const PREAMBLE_LONGS_MINIMAL: u8 = 1;
/// Preamble longs of a non-empty compact sketch.
pub const PREAMBLE_LONGS_COMPACT: u8 = 3;
/// Preamble longs of an update sketch.
pub const PREAMBLE_LONGS_UPDATE: u8 = 4;

/// Set when multi-byte fields are big-endian.
pub const FLAG_BIG_ENDIAN: u8 = 1 << 0;
/// Set when the update sketch was created with a sampling probability below one.
pub const FLAG_SAMPLING: u8 = 1 << 1;
/// Set when no datum was ever presented.
pub const FLAG_EMPTY: u8 = 1 << 2;
/// Set when at least one entry is retained.
pub const FLAG_HAS_ENTRIES: u8 = 1 << 3;

pub const PREAMBLE_LONGS_BYTE: usize = 0;
pub const SER_VER_BYTE: usize = 1;
pub const FAMILY_BYTE: usize = 2;
pub const SKETCH_KIND_BYTE: usize = 3;
pub const FLAGS_BYTE: usize = 4;
pub const NUM_VALUES_BYTE: usize = 5;
pub const SEED_HASH_SHORT: usize = 6;
pub const THETA_LONG: usize = 8;

pub const LG_NOM_BYTE: usize = 16;
pub const LG_CUR_CAPACITY_BYTE: usize = 17;
pub const LG_RESIZE_FACTOR_BYTE: usize = 18;
pub const SAMPLING_P_FLOAT: usize = 20;
pub const UPDATE_RETAINED_INT: usize = 24;
pub const UPDATE_ENTRIES_START: usize = 32;

pub const COMPACT_RETAINED_INT: usize = 16;
pub const COMPACT_ENTRIES_START: usize = 24;

/// Size of the minimal preamble written for empty compact sketches.
pub const MINIMAL_SIZE_BYTES: usize = 8;

/// Bytes taken by one entry with `num_values` doubles.
#[inline]
pub(crate) fn entry_bytes(num_values: u8) -> usize {
    8 + 8 * num_values as usize
}

/// Size of an update image whose table has `1 << lg_capacity` slots.
pub(crate) fn update_image_bytes(lg_capacity: u8, num_values: u8) -> usize {
    UPDATE_ENTRIES_START + (entry_bytes(num_values) << lg_capacity)
}

/// Size of a compact image holding `num_retained` entries.
pub(crate) fn compact_image_bytes(empty: bool, num_retained: usize, num_values: u8) -> usize {
    if empty {
        MINIMAL_SIZE_BYTES
    } else {
        COMPACT_ENTRIES_START + num_retained * entry_bytes(num_values)
    }
}

pub(crate) fn flags_for(empty: bool, sampling: bool, has_entries: bool) -> u8 {
    let mut flags = 0;
    if NATIVE_BIG_ENDIAN {
        flags |= FLAG_BIG_ENDIAN;
    }
    if sampling {
        flags |= FLAG_SAMPLING;
    }
    if empty {
        flags |= FLAG_EMPTY;
    }
    if has_entries {
        flags |= FLAG_HAS_ENTRIES;
    }
    flags
}

/// Slots of an update image with `1 << lg_capacity` slots.
pub(crate) fn update_slots(bytes: &[u8], lg_capacity: u8, num_values: u8) -> Slots<'_> {
    let capacity = 1usize << lg_capacity;
    let num_values = num_values as usize;
    let values_start = UPDATE_ENTRIES_START + capacity * 8;
    Slots::Bytes {
        keys: &bytes[UPDATE_ENTRIES_START..values_start],
        values: &bytes[values_start..values_start + capacity * num_values * 8],
        num_values,
    }
}

/// Slots of a compact image holding `num_retained` entries.
pub(crate) fn compact_slots(bytes: &[u8], num_retained: usize, num_values: u8) -> Slots<'_> {
    let num_values = num_values as usize;
    if num_retained == 0 {
        return Slots::Heap {
            keys: &[],
            values: &[],
            num_values,
        };
    }
    let values_start = COMPACT_ENTRIES_START + num_retained * 8;
    Slots::Bytes {
        keys: &bytes[COMPACT_ENTRIES_START..values_start],
        values: &bytes[values_start..values_start + num_retained * num_values * 8],
        num_values,
    }
}

/// Fields of an update sketch preamble.
#[derive(Debug, Clone, Copy)]
pub(crate) struct UpdateHeader {
    pub num_values: u8,
    pub seed_hash: u16,
    pub theta: u64,
    pub lg_nom: u8,
    pub lg_cur: u8,
    pub lg_rf: u8,
    pub p: f32,
    pub num_retained: u32,
    pub empty: bool,
}

/// Writes the 32-byte update preamble at the start of `dst`.
pub(crate) fn write_update_preamble(dst: &mut [u8], header: &UpdateHeader) {
    let kind = SketchKind::for_layout(false, header.num_values);
    dst[PREAMBLE_LONGS_BYTE] = PREAMBLE_LONGS_UPDATE;
    dst[SER_VER_BYTE] = SERIAL_VERSION;
    dst[FAMILY_BYTE] = Family::TUPLE.id;
    dst[SKETCH_KIND_BYTE] = kind.tag();
    dst[FLAGS_BYTE] = flags_for(header.empty, header.p < 1.0, header.num_retained > 0);
    dst[NUM_VALUES_BYTE] = header.num_values;
    put_u16(dst, SEED_HASH_SHORT, header.seed_hash);
    put_u64(dst, THETA_LONG, header.theta);
    dst[LG_NOM_BYTE] = header.lg_nom;
    dst[LG_CUR_CAPACITY_BYTE] = header.lg_cur;
    dst[LG_RESIZE_FACTOR_BYTE] = header.lg_rf;
    dst[LG_RESIZE_FACTOR_BYTE + 1] = 0;
    put_f32(dst, SAMPLING_P_FLOAT, header.p);
    put_u32(dst, UPDATE_RETAINED_INT, header.num_retained);
    put_u32(dst, UPDATE_RETAINED_INT + 4, 0);
}

/// Kind-specific part of a validated preamble.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Layout {
    Update {
        lg_nom: u8,
        lg_cur: u8,
        lg_rf: u8,
        p: f32,
        num_retained: u32,
    },
    Compact {
        num_retained: u32,
    },
}

/// A preamble that passed every check, including the region length.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Preamble {
    pub kind: SketchKind,
    pub num_values: u8,
    pub seed_hash: u16,
    pub theta: u64,
    pub empty: bool,
    pub layout: Layout,
    /// Total bytes the image occupies.
    pub image_bytes: usize,
}

/// Validates a serialized image before any entry is touched.
///
/// Checks run in a fixed order: family, serial version, sketch kind, byte order, seed
/// hash, preamble length against kind, declared capacity, and finally region length.
pub(crate) fn read_preamble(bytes: &[u8], expected_seed_hash: u16) -> Result<Preamble, Error> {
    let mut cursor = SketchSlice::new(bytes);
    let pre_longs = cursor
        .read_u8()
        .map_err(insufficient_data("preamble_longs"))?;
    let serial_version = cursor
        .read_u8()
        .map_err(insufficient_data("serial_version"))?;
    let family_id = cursor.read_u8().map_err(insufficient_data("family_id"))?;
    let kind_tag = cursor.read_u8().map_err(insufficient_data("sketch_kind"))?;
    let flags = cursor.read_u8().map_err(insufficient_data("flags"))?;
    let num_values = cursor.read_u8().map_err(insufficient_data("num_values"))?;
    let seed_hash = cursor
        .read_u16_ne()
        .map_err(insufficient_data("seed_hash"))?;

    Family::TUPLE.validate_id(family_id)?;
    ensure_serial_version_is(SERIAL_VERSION, serial_version)?;
    let kind = SketchKind::from_tag(kind_tag)
        .ok_or_else(|| Error::deserial(format!("unknown sketch kind tag: {kind_tag}")))?;
    let big_endian = flags & FLAG_BIG_ENDIAN != 0;
    if big_endian != NATIVE_BIG_ENDIAN {
        return Err(
            Error::deserial("image byte order does not match this machine")
                .with_context("image_big_endian", big_endian),
        );
    }
    ensure_seed_hashes_match(expected_seed_hash, seed_hash)?;
    if kind.has_values() == (num_values == 0) {
        return Err(Error::deserial(format!(
            "sketch kind {} does not allow {num_values} values per key",
            kind.name()
        )));
    }
    let empty = flags & FLAG_EMPTY != 0;

    if kind.is_compact() {
        ensure_preamble_longs_in(&[PREAMBLE_LONGS_MINIMAL, PREAMBLE_LONGS_COMPACT], pre_longs)?;
        if pre_longs == PREAMBLE_LONGS_MINIMAL {
            if !empty {
                return Err(Error::deserial(
                    "minimal preamble is only valid for empty sketches",
                ));
            }
            return Ok(Preamble {
                kind,
                num_values,
                seed_hash,
                theta: MAX_THETA,
                empty,
                layout: Layout::Compact { num_retained: 0 },
                image_bytes: MINIMAL_SIZE_BYTES,
            });
        }
        let theta = cursor.read_u64_ne().map_err(insufficient_data("theta"))?;
        let num_retained = cursor
            .read_u32_ne()
            .map_err(insufficient_data("num_retained"))?;
        ensure_theta_in_range(theta)?;
        if empty && num_retained > 0 {
            return Err(Error::deserial("empty sketch declares retained entries")
                .with_context("num_retained", num_retained));
        }
        let required = (num_retained as usize)
            .checked_mul(entry_bytes(num_values))
            .and_then(|n| n.checked_add(COMPACT_ENTRIES_START))
            .ok_or_else(|| Error::deserial("compact image size overflow"))?;
        ensure_region_holds(bytes, required)?;
        return Ok(Preamble {
            kind,
            num_values,
            seed_hash,
            theta,
            empty,
            layout: Layout::Compact { num_retained },
            image_bytes: required,
        });
    }

    ensure_preamble_longs_in(&[PREAMBLE_LONGS_UPDATE], pre_longs)?;
    let theta = cursor.read_u64_ne().map_err(insufficient_data("theta"))?;
    let lg_nom = cursor.read_u8().map_err(insufficient_data("lg_nom"))?;
    let lg_cur = cursor.read_u8().map_err(insufficient_data("lg_cur"))?;
    let lg_rf = cursor.read_u8().map_err(insufficient_data("lg_rf"))?;
    cursor.skip(1).map_err(insufficient_data("padding"))?;
    let p = cursor
        .read_f32_ne()
        .map_err(insufficient_data("sampling_probability"))?;
    let num_retained = cursor
        .read_u32_ne()
        .map_err(insufficient_data("num_retained"))?;

    if lg_nom > MAX_LG_NOM {
        return Err(Error::deserial(format!(
            "lg_nom must be at most {MAX_LG_NOM}, got {lg_nom}"
        )));
    }
    if ResizeFactor::from_lg(lg_rf).is_none() {
        return Err(Error::deserial(format!(
            "invalid lg resize factor: {lg_rf}"
        )));
    }
    let max_lg_cur = max_lg_capacity(lg_nom, lg_rf);
    if !(MIN_LG_CAPACITY..=max_lg_cur).contains(&lg_cur) {
        return Err(Error::deserial(format!(
            "lg_cur must be in [{MIN_LG_CAPACITY}, {max_lg_cur}], got {lg_cur}"
        )));
    }
    if num_retained as u64 >= 1u64 << lg_cur {
        return Err(
            Error::deserial("declared capacity cannot hold the retained entries")
                .with_context("lg_cur", lg_cur)
                .with_context("num_retained", num_retained),
        );
    }
    if !(p > 0.0 && p <= 1.0) {
        return Err(Error::deserial(format!(
            "sampling probability must be in (0, 1], got {p}"
        )));
    }
    ensure_theta_in_range(theta)?;
    if empty && num_retained > 0 {
        return Err(Error::deserial("empty sketch declares retained entries")
            .with_context("num_retained", num_retained));
    }
    let required = update_image_bytes(lg_cur, num_values);
    ensure_region_holds(bytes, required)?;

    Ok(Preamble {
        kind,
        num_values,
        seed_hash,
        theta,
        empty,
        layout: Layout::Update {
            lg_nom,
            lg_cur,
            lg_rf,
            p,
            num_retained,
        },
        image_bytes: required,
    })
}

fn ensure_theta_in_range(theta: u64) -> Result<(), Error> {
    if theta == 0 || theta > MAX_THETA {
        return Err(Error::deserial(format!(
            "theta must be in [1, {MAX_THETA}], got {theta}"
        )));
    }
    Ok(())
}

fn ensure_region_holds(bytes: &[u8], required: usize) -> Result<(), Error> {
    if bytes.len() < required {
        return Err(Error::insufficient_data("entries")
            .with_context("required_bytes", required)
            .with_context("actual_bytes", bytes.len()));
    }
    Ok(())
}
