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

//! Byte-level access to serialized sketch images.
//!
//! Sketch images are written in the byte order of the machine that produced them and a
//! flag records which one it was. Readers refuse images of the other order instead of
//! swapping, so every accessor here works in native byte order.

pub(crate) mod assert;
pub(crate) mod family;

use std::io;

/// True if this machine stores multi-byte values big-endian first.
pub(crate) const NATIVE_BIG_ENDIAN: bool = cfg!(target_endian = "big");

/// A forward-only reader over a serialized sketch image.
pub(crate) struct SketchSlice<'a> {
    slice: &'a [u8],
    pos: usize,
}

impl<'a> SketchSlice<'a> {
    pub fn new(slice: &'a [u8]) -> Self {
        Self { slice, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn skip(&mut self, n: usize) -> io::Result<()> {
        if self.slice.len() - self.pos < n {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        self.pos += n;
        Ok(())
    }

    fn read_array<const N: usize>(&mut self) -> io::Result<[u8; N]> {
        if self.slice.len() - self.pos < N {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        let mut buf = [0u8; N];
        buf.copy_from_slice(&self.slice[self.pos..self.pos + N]);
        self.pos += N;
        Ok(buf)
    }

    pub fn read_slice(&mut self, n: usize) -> io::Result<&'a [u8]> {
        if self.slice.len() - self.pos < n {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        let out = &self.slice[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn remaining(&self) -> &'a [u8] {
        &self.slice[self.pos..]
    }

    pub fn read_u8(&mut self) -> io::Result<u8> {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn read_u16_ne(&mut self) -> io::Result<u16> {
        self.read_array().map(u16::from_ne_bytes)
    }

    pub fn read_u32_ne(&mut self) -> io::Result<u32> {
        self.read_array().map(u32::from_ne_bytes)
    }

    pub fn read_u64_ne(&mut self) -> io::Result<u64> {
        self.read_array().map(u64::from_ne_bytes)
    }

    pub fn read_f32_ne(&mut self) -> io::Result<f32> {
        self.read_array().map(f32::from_ne_bytes)
    }
}

#[inline]
fn array_at<const N: usize>(bytes: &[u8], offset: usize) -> [u8; N] {
    let mut buf = [0u8; N];
    buf.copy_from_slice(&bytes[offset..offset + N]);
    buf
}

/// Reads a u32 at the given offset.
#[inline]
pub(crate) fn get_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_ne_bytes(array_at(bytes, offset))
}

/// Reads a u64 at the given offset.
#[inline]
pub(crate) fn get_u64(bytes: &[u8], offset: usize) -> u64 {
    u64::from_ne_bytes(array_at(bytes, offset))
}

/// Reads an f64 at the given offset.
#[inline]
pub(crate) fn get_f64(bytes: &[u8], offset: usize) -> f64 {
    f64::from_ne_bytes(array_at(bytes, offset))
}

/// Writes a u16 at the given offset.
#[inline]
pub(crate) fn put_u16(bytes: &mut [u8], offset: usize, value: u16) {
    bytes[offset..offset + 2].copy_from_slice(&value.to_ne_bytes());
}

/// Writes a u32 at the given offset.
#[inline]
pub(crate) fn put_u32(bytes: &mut [u8], offset: usize, value: u32) {
    bytes[offset..offset + 4].copy_from_slice(&value.to_ne_bytes());
}

/// Writes a u64 at the given offset.
#[inline]
pub(crate) fn put_u64(bytes: &mut [u8], offset: usize, value: u64) {
    bytes[offset..offset + 8].copy_from_slice(&value.to_ne_bytes());
}

/// Writes an f32 at the given offset.
#[inline]
pub(crate) fn put_f32(bytes: &mut [u8], offset: usize, value: f32) {
    bytes[offset..offset + 4].copy_from_slice(&value.to_ne_bytes());
}

/// Writes an f64 at the given offset.
#[inline]
pub(crate) fn put_f64(bytes: &mut [u8], offset: usize, value: f64) {
    bytes[offset..offset + 8].copy_from_slice(&value.to_ne_bytes());
}
