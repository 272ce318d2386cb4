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

//! Types shared by all sketch families.

pub(crate) mod binomial_bounds;

/// Growth factor of the internal hash table.
///
/// The table starts at a sub-multiple of its maximum size and grows by this factor
/// each time it fills up. [`ResizeFactor::X1`] disables growth: the table is allocated
/// at its maximum size upfront.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResizeFactor {
    /// Never grow, allocate the maximum size upfront.
    X1,
    /// Double the table.
    X2,
    /// Grow the table four times.
    X4,
    /// Grow the table eight times.
    #[default]
    X8,
}

impl ResizeFactor {
    /// Returns log2 of the growth factor.
    pub fn lg_value(self) -> u8 {
        match self {
            ResizeFactor::X1 => 0,
            ResizeFactor::X2 => 1,
            ResizeFactor::X4 => 2,
            ResizeFactor::X8 => 3,
        }
    }

    /// Returns the growth factor.
    pub fn value(self) -> usize {
        1 << self.lg_value()
    }

    /// Returns the factor for a serialized log2 value.
    pub fn from_lg(lg: u8) -> Option<Self> {
        match lg {
            0 => Some(ResizeFactor::X1),
            1 => Some(ResizeFactor::X2),
            2 => Some(ResizeFactor::X4),
            3 => Some(ResizeFactor::X8),
            _ => None,
        }
    }
}

/// Number of standard deviations used for confidence bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumStdDev {
    /// About 68.3% confidence.
    One,
    /// About 95.4% confidence.
    Two,
    /// About 99.7% confidence.
    Three,
}

impl NumStdDev {
    /// Returns the number of standard deviations as a float.
    pub fn value(self) -> f64 {
        match self {
            NumStdDev::One => 1.0,
            NumStdDev::Two => 2.0,
            NumStdDev::Three => 3.0,
        }
    }

    /// One-sided tail probability of the normal distribution at this many deviations.
    pub(crate) fn tail_probability(self) -> f64 {
        match self {
            NumStdDev::One => 0.158_655_319_158_602_65,
            NumStdDev::Two => 0.022_750_261_890_413_57,
            NumStdDev::Three => 0.001_349_812_686_173_179_6,
        }
    }
}
