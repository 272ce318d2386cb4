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

//! QuickSelect theta and tuple sketches.
//!
//! This crate estimates the number of distinct items in a stream with bounded memory,
//! optionally aggregating a fixed-length vector of doubles per distinct item. Sketches
//! can be merged with a union, serialized, and operated on in place inside a
//! caller-owned byte region.
//!
//! See the [`theta`] module for the sketch types.

#![cfg_attr(docsrs, feature(doc_auto_cfg))]

pub(crate) mod codec;
pub mod common;
pub mod error;
pub mod hash;
pub mod theta;

pub use self::common::NumStdDev;
pub use self::common::ResizeFactor;
