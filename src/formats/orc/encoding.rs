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
//! Plain value codecs for PRESENT, DATA and LENGTH streams.
//!
//! PRESENT is an LSB-first validity bitmap. DATA holds only non-null values:
//! little-endian fixed-width numbers, bit-packed booleans, or concatenated
//! UTF-8 bytes. LENGTH holds one little-endian u32 per non-null string or list.

use arrow::array::{Array, BooleanArray, BooleanBufferBuilder, PrimitiveArray, StringArray};
use arrow::buffer::{BooleanBuffer, Buffer, NullBuffer, OffsetBuffer, ScalarBuffer};
use arrow::datatypes::ArrowPrimitiveType;

use crate::common::status::{ColumnarError, Result};

/// Fixed-width native value with a plain little-endian encoding.
pub trait PlainValue: Copy + Default {
    const WIDTH: usize;
    fn write_le(self, out: &mut Vec<u8>);
    fn read_le(bytes: &[u8]) -> Self;
}

macro_rules! impl_plain_value {
    ($($t:ty),*) => {
        $(
            impl PlainValue for $t {
                const WIDTH: usize = std::mem::size_of::<$t>();

                fn write_le(self, out: &mut Vec<u8>) {
                    out.extend_from_slice(&self.to_le_bytes());
                }

                fn read_le(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$t>()];
                    raw.copy_from_slice(&bytes[..Self::WIDTH]);
                    <$t>::from_le_bytes(raw)
                }
            }
        )*
    };
}

impl_plain_value!(i32, i64, f32, f64);

fn non_null_count(len: usize, nulls: Option<&NullBuffer>) -> usize {
    nulls.map(|n| len - n.null_count()).unwrap_or(len)
}

pub fn encode_present(nulls: &NullBuffer) -> Vec<u8> {
    let mut builder = BooleanBufferBuilder::new(nulls.len());
    for valid in nulls.inner().iter() {
        builder.append(valid);
    }
    builder.finish().values().to_vec()
}

pub fn decode_present(data: &[u8], len: usize) -> Result<NullBuffer> {
    let needed = len.div_ceil(8);
    if data.len() < needed {
        return Err(ColumnarError::corruption(format!(
            "present stream too short: rows={}, needed_bytes={}, actual_bytes={}",
            len,
            needed,
            data.len()
        )));
    }
    let bits = BooleanBuffer::new(Buffer::from(data[..needed].to_vec()), 0, len);
    Ok(NullBuffer::new(bits))
}

pub fn encode_primitive<T>(array: &PrimitiveArray<T>) -> Vec<u8>
where
    T: ArrowPrimitiveType,
    T::Native: PlainValue,
{
    let mut out = Vec::with_capacity((array.len() - array.null_count()) * T::Native::WIDTH);
    for value in array.iter().flatten() {
        value.write_le(&mut out);
    }
    out
}

pub fn decode_primitive<T>(
    data: &[u8],
    len: usize,
    nulls: Option<NullBuffer>,
) -> Result<PrimitiveArray<T>>
where
    T: ArrowPrimitiveType,
    T::Native: PlainValue,
{
    let present = non_null_count(len, nulls.as_ref());
    let width = T::Native::WIDTH;
    if data.len() != present * width {
        return Err(ColumnarError::corruption(format!(
            "data stream size mismatch: values={}, width={}, actual_bytes={}",
            present,
            width,
            data.len()
        )));
    }
    let mut values = Vec::with_capacity(len);
    let mut chunks = data.chunks_exact(width);
    for row in 0..len {
        if nulls.as_ref().is_none_or(|n| n.is_valid(row)) {
            let raw = chunks.next().unwrap_or_default();
            values.push(T::Native::read_le(raw));
        } else {
            values.push(T::Native::default());
        }
    }
    Ok(PrimitiveArray::<T>::try_new(ScalarBuffer::from(values), nulls)?)
}

pub fn encode_boolean(array: &BooleanArray) -> Vec<u8> {
    let mut builder = BooleanBufferBuilder::new(array.len());
    for value in array.iter().flatten() {
        builder.append(value);
    }
    builder.finish().values().to_vec()
}

pub fn decode_boolean(data: &[u8], len: usize, nulls: Option<NullBuffer>) -> Result<BooleanArray> {
    let present = non_null_count(len, nulls.as_ref());
    if data.len() < present.div_ceil(8) {
        return Err(ColumnarError::corruption(format!(
            "boolean data stream too short: values={}, actual_bytes={}",
            present,
            data.len()
        )));
    }
    let packed = BooleanBuffer::new(Buffer::from(data.to_vec()), 0, present);
    let mut builder = BooleanBufferBuilder::new(len);
    let mut next = 0usize;
    for row in 0..len {
        if nulls.as_ref().is_none_or(|n| n.is_valid(row)) {
            builder.append(packed.value(next));
            next += 1;
        } else {
            builder.append(false);
        }
    }
    Ok(BooleanArray::new(builder.finish(), nulls))
}

pub fn encode_lengths(lengths: impl Iterator<Item = usize>) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for len in lengths {
        let len = u32::try_from(len).map_err(|_| {
            ColumnarError::invalid_argument(format!("value length exceeds u32: length={}", len))
        })?;
        out.extend_from_slice(&len.to_le_bytes());
    }
    Ok(out)
}

pub fn decode_lengths(data: &[u8], count: usize) -> Result<Vec<u32>> {
    if data.len() != count * 4 {
        return Err(ColumnarError::corruption(format!(
            "length stream size mismatch: values={}, actual_bytes={}",
            count,
            data.len()
        )));
    }
    Ok(data
        .chunks_exact(4)
        .map(|raw| u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
        .collect())
}

/// Expand per-value lengths into `len + 1` offsets; null rows get zero length.
pub fn offsets_from_lengths(
    lengths: &[u32],
    len: usize,
    nulls: Option<&NullBuffer>,
) -> Result<OffsetBuffer<i32>> {
    if lengths.len() != non_null_count(len, nulls) {
        return Err(ColumnarError::corruption(format!(
            "length count mismatch: rows={}, lengths={}",
            len,
            lengths.len()
        )));
    }
    let mut offsets = Vec::with_capacity(len + 1);
    offsets.push(0i32);
    let mut total = 0i64;
    let mut next = lengths.iter();
    for row in 0..len {
        if nulls.is_none_or(|n| n.is_valid(row)) {
            total += i64::from(*next.next().unwrap_or(&0));
        }
        let offset = i32::try_from(total).map_err(|_| {
            ColumnarError::not_supported(format!(
                "decoded column exceeds i32 offsets: rows={}, total_length={}",
                len, total
            ))
        })?;
        offsets.push(offset);
    }
    Ok(OffsetBuffer::new(ScalarBuffer::from(offsets)))
}

pub fn encode_string(array: &StringArray) -> Result<(Vec<u8>, Vec<u8>)> {
    let mut data = Vec::new();
    for value in array.iter().flatten() {
        data.extend_from_slice(value.as_bytes());
    }
    let lengths = encode_lengths(array.iter().flatten().map(str::len))?;
    Ok((data, lengths))
}

pub fn decode_string(
    data: &[u8],
    lengths: &[u8],
    len: usize,
    nulls: Option<NullBuffer>,
) -> Result<StringArray> {
    let lengths = decode_lengths(lengths, non_null_count(len, nulls.as_ref()))?;
    let offsets = offsets_from_lengths(&lengths, len, nulls.as_ref())?;
    let total = *offsets.last().unwrap_or(&0) as usize;
    if total != data.len() {
        return Err(ColumnarError::corruption(format!(
            "string data size mismatch: expected_bytes={}, actual_bytes={}",
            total,
            data.len()
        )));
    }
    Ok(StringArray::try_new(offsets, Buffer::from(data.to_vec()), nulls)?)
}
