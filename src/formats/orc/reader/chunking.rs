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
//! Greedy splitting of ordered units under a byte budget.
//!
//! The same splitter plans load chunks (units are stripes, one count each),
//! decode chunks (stripes again) and output chunks (units are row segments,
//! counted in rows). Inputs are inclusive prefix sums.

use std::ops::Add;

/// Contiguous range `[start_idx, start_idx + count)` over some unit sequence.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChunkRange {
    pub start_idx: usize,
    pub count: usize,
}

impl ChunkRange {
    pub fn new(start_idx: usize, count: usize) -> Self {
        Self { start_idx, count }
    }

    pub fn end(&self) -> usize {
        self.start_idx + self.count
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CumulativeSize {
    pub count: usize,
    pub size_bytes: usize,
}

impl CumulativeSize {
    pub fn new(count: usize, size_bytes: usize) -> Self {
        Self { count, size_bytes }
    }
}

impl Add for CumulativeSize {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            count: self.count + rhs.count,
            size_bytes: self.size_bytes.saturating_add(rhs.size_bytes),
        }
    }
}

/// Turn per-unit sizes into inclusive prefix sums.
pub fn inclusive_prefix_sums(units: impl IntoIterator<Item = CumulativeSize>) -> Vec<CumulativeSize> {
    let mut acc = CumulativeSize::default();
    units
        .into_iter()
        .map(|unit| {
            acc = acc + unit;
            acc
        })
        .collect()
}

/// Split prefix-summed units into chunks whose size stays within
/// `size_limit`. A single unit larger than the limit forms its own chunk.
/// `size_limit == 0` yields one chunk over everything. Chunk ranges are in
/// count units, not unit indices.
pub fn find_splits(sizes: &[CumulativeSize], total_count: usize, size_limit: usize) -> Vec<ChunkRange> {
    if size_limit == 0 || sizes.is_empty() {
        return vec![ChunkRange::new(0, total_count)];
    }
    let mut splits = Vec::new();
    let mut cur_unit = 0usize;
    let mut cur_count = 0usize;
    let mut cur_size = 0usize;
    while cur_unit < sizes.len() && cur_count < total_count {
        let target = cur_size.saturating_add(size_limit);
        let fitting = sizes.partition_point(|s| s.size_bytes <= target);
        let end_unit = fitting.max(cur_unit + 1);
        let last = sizes[end_unit - 1];
        splits.push(ChunkRange::new(cur_count, last.count - cur_count));
        cur_unit = end_unit;
        cur_count = last.count;
        cur_size = last.size_bytes;
    }
    splits
}

/// Split chunks further so none exceeds `max_count` cumulative `weights`
/// (inclusive prefix sums indexed like the chunked units).
pub fn cap_chunks(chunks: &[ChunkRange], weights: &[usize], max_count: usize) -> Vec<ChunkRange> {
    let weight = |idx: usize| weights[idx] - if idx == 0 { 0 } else { weights[idx - 1] };
    let mut out = Vec::with_capacity(chunks.len());
    for chunk in chunks {
        let mut start = chunk.start_idx;
        let mut acc = 0usize;
        for idx in chunk.start_idx..chunk.end() {
            let w = weight(idx);
            if idx > start && acc + w > max_count {
                out.push(ChunkRange::new(start, idx - start));
                start = idx;
                acc = 0;
            }
            acc += w;
        }
        if chunk.end() > start || chunk.count == 0 {
            out.push(ChunkRange::new(start, chunk.end() - start));
        }
    }
    out
}
