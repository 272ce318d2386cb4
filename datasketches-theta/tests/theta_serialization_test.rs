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

use datasketches_theta::NumStdDev;
use datasketches_theta::error::ErrorKind;
use datasketches_theta::hash::DEFAULT_UPDATE_SEED;
use datasketches_theta::theta::CompactSketch;
use datasketches_theta::theta::DirectCompactSketch;
use datasketches_theta::theta::DirectQuickSelectSketch;
use datasketches_theta::theta::HeapQuickSelectSketch;
use datasketches_theta::theta::MAX_THETA;
use datasketches_theta::theta::Sketch;
use datasketches_theta::theta::heapify_sketch;
use datasketches_theta::theta::serialization::COMPACT_RETAINED_INT;
use datasketches_theta::theta::serialization::FAMILY_BYTE;
use datasketches_theta::theta::serialization::FLAG_BIG_ENDIAN;
use datasketches_theta::theta::serialization::FLAG_EMPTY;
use datasketches_theta::theta::serialization::FLAGS_BYTE;
use datasketches_theta::theta::serialization::LG_CUR_CAPACITY_BYTE;
use datasketches_theta::theta::serialization::LG_NOM_BYTE;
use datasketches_theta::theta::serialization::LG_RESIZE_FACTOR_BYTE;
use datasketches_theta::theta::serialization::NUM_VALUES_BYTE;
use datasketches_theta::theta::serialization::PREAMBLE_LONGS_BYTE;
use datasketches_theta::theta::serialization::SER_VER_BYTE;
use datasketches_theta::theta::serialization::SKETCH_KIND_BYTE;
use datasketches_theta::theta::serialization::THETA_LONG;
use datasketches_theta::theta::serialization::UPDATE_RETAINED_INT;

const OTHER_SEED: u64 = 123;

fn estimation_sketch(num_values: u8) -> HeapQuickSelectSketch {
    let mut sketch = HeapQuickSelectSketch::builder()
        .nominal_entries(512)
        .num_values(num_values)
        .build()
        .unwrap();
    let values = vec![1.0; num_values as usize];
    for i in 0..2048u64 {
        sketch.update(i, &values).unwrap();
    }
    sketch
}

fn sorted_keys<Sk: Sketch>(sketch: &Sk) -> Vec<u64> {
    let mut keys: Vec<u64> = sketch.iter().map(|(key, _)| key).collect();
    keys.sort_unstable();
    keys
}

fn assert_same_sketch<A: Sketch, B: Sketch>(actual: &A, expected: &B) {
    assert_eq!(actual.is_empty(), expected.is_empty());
    assert_eq!(actual.theta64(), expected.theta64());
    assert_eq!(actual.num_retained(), expected.num_retained());
    assert_eq!(actual.estimate(), expected.estimate());
    for s in [NumStdDev::One, NumStdDev::Two, NumStdDev::Three] {
        assert_eq!(actual.lower_bound(s), expected.lower_bound(s));
        assert_eq!(actual.upper_bound(s), expected.upper_bound(s));
    }
    assert_eq!(sorted_keys(actual), sorted_keys(expected));
}

fn write_u32(bytes: &mut [u8], offset: usize, value: u32) {
    bytes[offset..offset + 4].copy_from_slice(&value.to_ne_bytes());
}

fn write_u64(bytes: &mut [u8], offset: usize, value: u64) {
    bytes[offset..offset + 8].copy_from_slice(&value.to_ne_bytes());
}

fn assert_invalid_data<T: std::fmt::Debug>(result: Result<T, datasketches_theta::error::Error>) {
    match result {
        Ok(value) => panic!("corrupted image was accepted: {value:?}"),
        Err(err) => assert_eq!(err.kind(), ErrorKind::InvalidData, "{err}"),
    }
}

#[cfg(target_endian = "little")]
#[test]
fn test_empty_compact_layout() {
    let sketch = HeapQuickSelectSketch::builder().build().unwrap();
    let bytes = sketch.compact(true).to_bytes();
    let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
    insta::assert_snapshot!(hex, @"010109010400cc93");
}

#[test]
fn test_update_image_header() {
    let sketch = estimation_sketch(0);
    let bytes = sketch.to_bytes();
    assert_eq!(bytes.len(), sketch.serialized_size());
    assert_eq!(bytes.len(), 32 + 1024 * 8);
    assert_eq!(bytes[PREAMBLE_LONGS_BYTE], 4);
    assert_eq!(bytes[SER_VER_BYTE], 1);
    assert_eq!(bytes[FAMILY_BYTE], 9);
    assert_eq!(bytes[SKETCH_KIND_BYTE], 0);
    assert_eq!(bytes[NUM_VALUES_BYTE], 0);
    assert_eq!(bytes[LG_NOM_BYTE], 9);
    assert_eq!(bytes[LG_CUR_CAPACITY_BYTE], 10);
    assert_eq!(bytes[LG_RESIZE_FACTOR_BYTE], 3);
    assert_eq!(bytes[FLAGS_BYTE] & FLAG_EMPTY, 0);
}

#[test]
fn test_update_round_trip() {
    for num_values in [0, 3] {
        let sketch = estimation_sketch(num_values);
        let bytes = sketch.to_bytes();

        let heap = HeapQuickSelectSketch::heapify(&bytes, DEFAULT_UPDATE_SEED).unwrap();
        assert_same_sketch(&heap, &sketch);
        assert_eq!(heap.lg_nom(), sketch.lg_nom());
        assert_eq!(heap.lg_capacity(), sketch.lg_capacity());
        assert_eq!(heap.values(), sketch.values());

        let mut copy = bytes.clone();
        let direct = DirectQuickSelectSketch::wrap(copy.as_mut_slice(), DEFAULT_UPDATE_SEED)
            .unwrap();
        assert_same_sketch(&direct, &sketch);
    }
}

#[test]
fn test_compact_round_trip() {
    let sketch = estimation_sketch(2);
    for ordered in [true, false] {
        let compact = sketch.compact(ordered);
        let bytes = compact.to_bytes();
        assert_eq!(bytes.len(), 24 + compact.num_retained() * 24);
        assert_eq!(bytes[PREAMBLE_LONGS_BYTE], 3);
        assert_eq!(bytes[SKETCH_KIND_BYTE], 3);

        let heap = CompactSketch::heapify(&bytes, DEFAULT_UPDATE_SEED).unwrap();
        assert_same_sketch(&heap, &sketch);
        assert_eq!(heap.is_ordered(), ordered);
        if ordered {
            assert_eq!(heap, compact);
        }

        let direct = DirectCompactSketch::wrap(&bytes, DEFAULT_UPDATE_SEED).unwrap();
        assert_same_sketch(&direct, &sketch);
        assert_eq!(direct.is_ordered(), ordered);
        assert_eq!(direct.to_bytes(), bytes);
        assert!(direct.values().iter().all(|v| v == &[1.0, 1.0]));
    }
}

#[test]
fn test_empty_round_trip() {
    let sampled = HeapQuickSelectSketch::builder()
        .sampling_probability(0.25)
        .build()
        .unwrap();
    let heap = HeapQuickSelectSketch::heapify(&sampled.to_bytes(), DEFAULT_UPDATE_SEED).unwrap();
    assert!(heap.is_empty());
    assert_eq!(heap.theta64(), sampled.theta64());
    assert_eq!(heap.sampling_probability(), 0.25);

    let bytes = sampled.compact(false).to_bytes();
    assert_eq!(bytes.len(), 8);
    let compact = CompactSketch::heapify(&bytes, DEFAULT_UPDATE_SEED).unwrap();
    assert!(compact.is_empty());
    assert_eq!(compact.theta64(), MAX_THETA);
    assert_eq!(compact.estimate(), 0.0);
}

#[test]
fn test_flipped_header_bytes_are_rejected() {
    let update = estimation_sketch(0).to_bytes();
    let compact = estimation_sketch(0).compact(true).to_bytes();
    let empty = HeapQuickSelectSketch::builder()
        .build()
        .unwrap()
        .compact(true)
        .to_bytes();

    let corruptions: [fn(&mut Vec<u8>); 3] = [
        |b| b[FAMILY_BYTE] = 3,
        |b| b[SER_VER_BYTE] = 2,
        |b| b[FLAGS_BYTE] ^= FLAG_BIG_ENDIAN,
    ];
    for corrupt in corruptions {
        let mut bad_update = update.clone();
        corrupt(&mut bad_update);
        assert_invalid_data(HeapQuickSelectSketch::heapify(&bad_update, DEFAULT_UPDATE_SEED));
        assert_invalid_data(DirectQuickSelectSketch::wrap(
            bad_update.as_mut_slice(),
            DEFAULT_UPDATE_SEED,
        ));
        assert_invalid_data(heapify_sketch(&bad_update, DEFAULT_UPDATE_SEED));

        for image in [&compact, &empty] {
            let mut bad = image.clone();
            corrupt(&mut bad);
            assert_invalid_data(CompactSketch::heapify(&bad, DEFAULT_UPDATE_SEED));
            assert_invalid_data(DirectCompactSketch::wrap(&bad, DEFAULT_UPDATE_SEED));
        }
    }
}

#[test]
fn test_seed_mismatch_is_rejected() {
    let update = estimation_sketch(0).to_bytes();
    let err = HeapQuickSelectSketch::heapify(&update, OTHER_SEED).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidData);
    assert!(err.to_string().contains("seed"), "{err}");

    let compact = estimation_sketch(0).compact(false).to_bytes();
    assert_invalid_data(DirectCompactSketch::wrap(&compact, OTHER_SEED));
}

#[test]
fn test_truncated_images_are_rejected() {
    let update = estimation_sketch(1).to_bytes();
    for len in [0, 7, 16, 31, update.len() - 8] {
        assert_invalid_data(HeapQuickSelectSketch::heapify(
            &update[..len],
            DEFAULT_UPDATE_SEED,
        ));
    }
    let compact = estimation_sketch(1).compact(true).to_bytes();
    for len in [0, 8, 23, compact.len() - 1] {
        assert_invalid_data(CompactSketch::heapify(&compact[..len], DEFAULT_UPDATE_SEED));
    }
}

#[test]
fn test_inconsistent_fields_are_rejected() {
    let update = estimation_sketch(0).to_bytes();

    let mut bad = update.clone();
    let retained = u32::from_ne_bytes(
        bad[UPDATE_RETAINED_INT..UPDATE_RETAINED_INT + 4]
            .try_into()
            .unwrap(),
    );
    write_u32(&mut bad, UPDATE_RETAINED_INT, retained + 1);
    assert_invalid_data(HeapQuickSelectSketch::heapify(&bad, DEFAULT_UPDATE_SEED));

    let mut bad = update.clone();
    write_u64(&mut bad, THETA_LONG, 0);
    assert_invalid_data(HeapQuickSelectSketch::heapify(&bad, DEFAULT_UPDATE_SEED));

    let mut bad = update.clone();
    bad[LG_CUR_CAPACITY_BYTE] = 20;
    assert_invalid_data(HeapQuickSelectSketch::heapify(&bad, DEFAULT_UPDATE_SEED));

    let mut bad = update.clone();
    bad[NUM_VALUES_BYTE] = 1;
    assert_invalid_data(HeapQuickSelectSketch::heapify(&bad, DEFAULT_UPDATE_SEED));

    let mut bad = update.clone();
    bad[SKETCH_KIND_BYTE] = 9;
    assert_invalid_data(HeapQuickSelectSketch::heapify(&bad, DEFAULT_UPDATE_SEED));

    let compact = estimation_sketch(0).compact(true).to_bytes();

    let mut bad = compact.clone();
    bad[FLAGS_BYTE] |= FLAG_EMPTY;
    assert_invalid_data(CompactSketch::heapify(&bad, DEFAULT_UPDATE_SEED));

    let mut bad = compact.clone();
    write_u64(&mut bad, THETA_LONG, 1);
    assert_invalid_data(CompactSketch::heapify(&bad, DEFAULT_UPDATE_SEED));

    let mut bad = compact.clone();
    write_u32(&mut bad, COMPACT_RETAINED_INT, u32::MAX);
    assert_invalid_data(CompactSketch::heapify(&bad, DEFAULT_UPDATE_SEED));
}

#[test]
fn test_wrong_kind_is_rejected() {
    let sketch = estimation_sketch(0);
    assert_invalid_data(CompactSketch::heapify(&sketch.to_bytes(), DEFAULT_UPDATE_SEED));
    assert_invalid_data(HeapQuickSelectSketch::heapify(
        &sketch.compact(true).to_bytes(),
        DEFAULT_UPDATE_SEED,
    ));
}
