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
//! Per-stripe, per-level stream enumeration and read coalescing.

use crate::common::status::{ColumnarError, Result};
use crate::formats::orc::metadata::{SelectedStripe, stripe_offset};
use crate::formats::orc::proto::{StreamKind, StripeFooter};

/// Identity of one stream within the current selection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StreamId {
    /// Index into the selected stripes.
    pub stripe_idx: usize,
    pub level: usize,
    pub column: u32,
    pub kind: StreamKind,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrcStreamInfo {
    pub id: StreamId,
    /// Absolute offset in the source.
    pub offset: u64,
    pub length: usize,
    /// Offset inside the stripe's buffer for this level.
    pub dst_pos: usize,
}

/// One positioned read filling part of a stripe-level buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReadRange {
    pub source_idx: usize,
    pub stripe_idx: usize,
    pub level: usize,
    pub offset: u64,
    pub length: usize,
    pub dst_pos: usize,
}

/// Streams of one stripe grouped by nesting level, plus the byte size each
/// level occupies once loaded.
#[derive(Clone, Debug, Default)]
pub struct StripeStreams {
    pub levels: Vec<Vec<OrcStreamInfo>>,
    pub level_sizes: Vec<usize>,
}

impl StripeStreams {
    pub fn total_size(&self) -> usize {
        self.level_sizes.iter().sum()
    }
}

/// Walk the stripe footer in on-disk order and keep the streams of selected
/// columns. `column_levels[id]` is the nesting level of a selected column,
/// `None` when the column is not read.
pub fn gather_stripe_streams(
    stripe_idx: usize,
    stripe: &SelectedStripe,
    footer: &StripeFooter,
    column_levels: &[Option<usize>],
    num_levels: usize,
) -> Result<StripeStreams> {
    let mut out = StripeStreams {
        levels: vec![Vec::new(); num_levels],
        level_sizes: vec![0; num_levels],
    };
    let mut offset = stripe_offset(&stripe.info) + stripe.info.index_length.unwrap_or_default();
    for stream in &footer.streams {
        let length = stream.length.unwrap_or_default();
        let column = stream.column.unwrap_or_default();
        let stream_offset = offset;
        offset += length;

        let level = match column_levels.get(column as usize) {
            Some(Some(level)) => *level,
            Some(None) => continue,
            None => {
                return Err(ColumnarError::corruption(format!(
                    "stream references unknown column: stripe={}, column={}, num_columns={}",
                    stripe.stripe_idx,
                    column,
                    column_levels.len()
                )));
            }
        };
        let raw_kind = stream.kind.unwrap_or_default();
        let kind = StreamKind::try_from(raw_kind).map_err(|_| {
            ColumnarError::corruption(format!(
                "unknown stream kind: stripe={}, column={}, kind={}",
                stripe.stripe_idx, column, raw_kind
            ))
        })?;
        if !matches!(
            kind,
            StreamKind::Present | StreamKind::Data | StreamKind::Length
        ) {
            continue;
        }
        let length = usize::try_from(length).map_err(|_| {
            ColumnarError::corruption(format!(
                "stream length overflow: stripe={}, column={}, length={}",
                stripe.stripe_idx, column, length
            ))
        })?;
        out.levels[level].push(OrcStreamInfo {
            id: StreamId {
                stripe_idx,
                level,
                column,
                kind,
            },
            offset: stream_offset,
            length,
            dst_pos: out.level_sizes[level],
        });
        out.level_sizes[level] += length;
    }
    Ok(out)
}

/// Merge streams that are adjacent on disk into single reads.
pub fn coalesce_reads(source_idx: usize, streams: &[OrcStreamInfo]) -> Vec<ReadRange> {
    let mut reads: Vec<ReadRange> = Vec::new();
    for stream in streams.iter().filter(|s| s.length > 0) {
        if let Some(last) = reads.last_mut()
            && last.offset + last.length as u64 == stream.offset
            && last.dst_pos + last.length == stream.dst_pos
        {
            last.length += stream.length;
            continue;
        }
        reads.push(ReadRange {
            source_idx,
            stripe_idx: stream.id.stripe_idx,
            level: stream.id.level,
            offset: stream.offset,
            length: stream.length,
            dst_pos: stream.dst_pos,
        });
    }
    reads
}
