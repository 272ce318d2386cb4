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

use std::cell::RefCell;
use std::rc::Rc;

use datasketches_theta::error::ErrorKind;
use datasketches_theta::hash::DEFAULT_UPDATE_SEED;
use datasketches_theta::theta::DirectCompactSketch;
use datasketches_theta::theta::DirectQuickSelectSketch;
use datasketches_theta::theta::HeapQuickSelectSketch;
use datasketches_theta::theta::MemoryRequest;
use datasketches_theta::theta::QuickSelectSketchBuilder;
use datasketches_theta::theta::Sketch;
use datasketches_theta::theta::max_bytes;

fn builder_k512() -> QuickSelectSketchBuilder {
    HeapQuickSelectSketch::builder().nominal_entries(512)
}

fn sorted_keys<Sk: Sketch>(sketch: &Sk) -> Vec<u64> {
    let mut keys: Vec<u64> = sketch.iter().map(|(key, _)| key).collect();
    keys.sort_unstable();
    keys
}

/// Hands out fresh vectors and records what happens to them.
#[derive(Default, Clone)]
struct RecordingRequest {
    requested: Rc<RefCell<Vec<usize>>>,
    released: Rc<RefCell<Vec<usize>>>,
}

impl MemoryRequest<Vec<u8>> for RecordingRequest {
    fn request(&mut self, capacity_bytes: usize) -> Option<Vec<u8>> {
        self.requested.borrow_mut().push(capacity_bytes);
        Some(vec![0u8; capacity_bytes])
    }

    fn release(&mut self, region: Vec<u8>) {
        self.released.borrow_mut().push(region.len());
    }
}

#[test]
fn test_direct_matches_heap() {
    let mut heap = builder_k512().build().unwrap();
    let mut region = vec![0u8; max_bytes(512, 0).unwrap()];
    let mut direct = builder_k512().build_direct(region.as_mut_slice()).unwrap();
    for i in 0..2048u64 {
        heap.update(i, &[]).unwrap();
        direct.update(i, &[]).unwrap();
    }
    assert_eq!(direct.theta64(), heap.theta64());
    assert_eq!(direct.num_retained(), heap.num_retained());
    assert_eq!(direct.estimate(), heap.estimate());
    assert_eq!(direct.lg_capacity(), heap.lg_capacity());
    assert_eq!(sorted_keys(&direct), sorted_keys(&heap));

    direct.trim().unwrap();
    heap.trim().unwrap();
    assert_eq!(direct.num_retained(), 512);
    assert_eq!(sorted_keys(&direct), sorted_keys(&heap));
}

#[test]
fn test_region_is_a_valid_image() {
    let mut region = vec![0u8; max_bytes(512, 1).unwrap()];
    let mut direct = builder_k512()
        .num_values(1)
        .build_direct(region.as_mut_slice())
        .unwrap();
    for i in 0..300u64 {
        direct.update(i, &[1.0]).unwrap();
        direct.update(i, &[0.5]).unwrap();
    }
    let heap = HeapQuickSelectSketch::heapify(direct.region(), DEFAULT_UPDATE_SEED).unwrap();
    assert_eq!(heap.num_retained(), 300);
    assert_eq!(heap.estimate(), 300.0);
    assert!(heap.values().iter().all(|v| v == &[1.5]));
}

#[test]
fn test_wrap_continues_a_serialized_sketch() {
    let mut heap = builder_k512().build().unwrap();
    for i in 0..2048u64 {
        heap.update(i, &[]).unwrap();
    }
    let mut bytes = heap.to_bytes();
    {
        let mut direct = DirectQuickSelectSketch::wrap(bytes.as_mut_slice(), DEFAULT_UPDATE_SEED)
            .unwrap();
        assert_eq!(direct.estimate(), heap.estimate());
        for i in 2048..4096u64 {
            direct.update(i, &[]).unwrap();
        }
    }
    for i in 2048..4096u64 {
        heap.update(i, &[]).unwrap();
    }
    let restored = HeapQuickSelectSketch::heapify(&bytes, DEFAULT_UPDATE_SEED).unwrap();
    assert_eq!(restored.theta64(), heap.theta64());
    assert_eq!(sorted_keys(&restored), sorted_keys(&heap));
}

#[test]
fn test_region_smaller_than_starting_table() {
    let mut region = vec![0u8; 64];
    let err = builder_k512().build_direct(region.as_mut_slice()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

#[test]
fn test_growth_without_memory_request_fails() {
    // k = 512 with X8 starts at 128 slots and must grow after 64 entries
    let mut region = vec![0u8; 32 + 128 * 8];
    let mut direct = builder_k512().build_direct(region.as_mut_slice()).unwrap();
    let mut failure = None;
    for i in 0..100u64 {
        if let Err(err) = direct.update(i, &[]) {
            failure = Some((i, err));
            break;
        }
    }
    let (at, err) = failure.unwrap();
    assert_eq!(at, 63);
    assert_eq!(err.kind(), ErrorKind::InvalidState);
}

#[test]
fn test_growth_through_memory_request() {
    let request = RecordingRequest::default();
    let start = vec![0u8; 32 + 128 * 8];
    let mut direct = builder_k512()
        .build_direct_with_request(start, request.clone())
        .unwrap();
    let mut heap = builder_k512().build().unwrap();
    for i in 0..2048u64 {
        direct.update(i, &[]).unwrap();
        heap.update(i, &[]).unwrap();
    }
    assert_eq!(direct.estimate(), heap.estimate());
    assert_eq!(sorted_keys(&direct), sorted_keys(&heap));

    assert_eq!(request.requested.borrow().as_slice(), &[32 + 1024 * 8]);
    assert_eq!(request.released.borrow().as_slice(), &[32 + 128 * 8]);
    let region = direct.into_region();
    assert_eq!(region.len(), 32 + 1024 * 8);
    let restored = HeapQuickSelectSketch::heapify(&region, DEFAULT_UPDATE_SEED).unwrap();
    assert_eq!(restored.estimate(), heap.estimate());
}

#[test]
fn test_closure_memory_request() {
    let mut direct = builder_k512()
        .build_direct_with_request(vec![0u8; 32 + 128 * 8], |capacity: usize| {
            Some(vec![0u8; capacity])
        })
        .unwrap();
    // 900 stays below the 960 entry rebuild threshold of the full 1024 slot table
    for i in 0..900u64 {
        direct.update(i, &[]).unwrap();
    }
    assert!(!direct.is_estimation_mode());
    assert_eq!(direct.estimate(), 900.0);
    assert_eq!(direct.lg_capacity(), 10);
}

#[test]
fn test_failing_memory_request() {
    let mut direct = builder_k512()
        .build_direct_with_request(vec![0u8; 32 + 128 * 8], |_: usize| None::<Vec<u8>>)
        .unwrap();
    let err = (0..100u64)
        .find_map(|i| direct.update(i, &[]).err())
        .unwrap();
    assert_eq!(err.kind(), ErrorKind::InvalidState);

    let mut short = builder_k512()
        .build_direct_with_request(vec![0u8; 32 + 128 * 8], |_: usize| Some(vec![0u8; 100]))
        .unwrap();
    let err = (0..100u64)
        .find_map(|i| short.update(i, &[]).err())
        .unwrap();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
}

#[test]
fn test_compact_into_region() {
    let mut direct_region = vec![0u8; max_bytes(512, 0).unwrap()];
    let mut direct = builder_k512()
        .build_direct(direct_region.as_mut_slice())
        .unwrap();
    for i in 0..2048u64 {
        direct.update(i, &[]).unwrap();
    }
    let image_len = 24 + 8 * direct.num_retained();
    let mut dst = vec![0u8; image_len];
    let compact = direct.compact_into(true, &mut dst).unwrap();
    assert!(compact.is_ordered());
    assert_eq!(compact.estimate(), direct.estimate());
    assert_eq!(compact.as_bytes().len(), image_len);

    let rewrapped = DirectCompactSketch::wrap(&dst, DEFAULT_UPDATE_SEED).unwrap();
    assert_eq!(rewrapped.num_retained(), direct.num_retained());
}

#[test]
fn test_reset_direct() {
    let mut region = vec![0u8; max_bytes(512, 0).unwrap()];
    let mut direct = builder_k512().build_direct(region.as_mut_slice()).unwrap();
    for i in 0..2048u64 {
        direct.update(i, &[]).unwrap();
    }
    direct.reset();
    assert!(direct.is_empty());
    assert_eq!(direct.num_retained(), 0);
    assert_eq!(direct.lg_capacity(), 7);
    let heap = HeapQuickSelectSketch::heapify(direct.region(), DEFAULT_UPDATE_SEED).unwrap();
    assert!(heap.is_empty());
}

#[test]
fn test_max_bytes() {
    assert_eq!(max_bytes(512, 0).unwrap(), 32 + 1024 * 8);
    assert_eq!(max_bytes(512, 2).unwrap(), 32 + 1024 * 24);
    assert_eq!(max_bytes(1, 0).unwrap(), 32 + 64 * 8);
    assert_eq!(
        max_bytes(100, 0).unwrap_err().kind(),
        ErrorKind::InvalidArgument
    );
}
