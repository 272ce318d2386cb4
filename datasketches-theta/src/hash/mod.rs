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

//! Hash functions and seed handling.

mod murmurhash;

use std::hash::Hasher;

pub use self::murmurhash::MurmurHash3X64128;
use crate::error::Error;

/// The default seed used to hash input items.
pub const DEFAULT_UPDATE_SEED: u64 = 9001;

/// Computes the 16-bit seed hash stored in serialized sketches.
///
/// Two sketches can only be merged or compared if they were built with the same seed;
/// the seed hash detects violations without storing the seed itself. A seed whose hash
/// is zero is rejected because zero marks legacy images without a seed hash.
pub fn compute_seed_hash(seed: u64) -> Result<u16, Error> {
    let mut hasher = MurmurHash3X64128::with_seed(0);
    hasher.write(&seed.to_le_bytes());
    let seed_hash = (hasher.finish128().0 & 0xffff) as u16;
    if seed_hash == 0 {
        return Err(Error::invalid_argument(format!(
            "seed {seed} produced a seed hash of zero; choose a different seed"
        )));
    }
    Ok(seed_hash)
}

pub(crate) fn ensure_seed_hashes_match(expected: u16, actual: u16) -> Result<(), Error> {
    if expected == actual {
        Ok(())
    } else {
        Err(Error::seed_hash_mismatch(expected, actual))
    }
}
