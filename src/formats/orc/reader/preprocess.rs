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
//! Global preprocessing and stripe loading.

use bytes::{Bytes, BytesMut};
use rayon::prelude::*;

use crate::common::status::{ColumnarError, Result};
use crate::formats::orc::compression::{StreamCompInfo, scan_stream};
use crate::formats::orc::proto::StripeFooter;
use crate::novarocks_logging::debug;

use super::chunking::{CumulativeSize, cap_chunks, find_splits, inclusive_prefix_sums};
use super::stream_info::{StreamId, coalesce_reads, gather_stripe_streams};
use super::{ChunkRange, ChunkedOrcReader};

/// Decoded tables are indexed with i32 offsets.
const MAX_ROWS_PER_DECODE_CHUNK: usize = i32::MAX as usize;

impl ChunkedOrcReader {
    /// Resolve the selection, read stripe footers, lay out streams per level
    /// and plan load chunks. Runs once per reader.
    pub(super) fn global_preprocess(&mut self) -> Result<()> {
        if self.file_itm_data.global_preprocessed {
            return Ok(());
        }
        let selection = self.metadata.select_stripes(&self.options)?;
        if selection.stripes.is_empty() {
            debug!(
                "no stripes selected: skip_rows={}, num_rows={:?}",
                self.options.skip_rows, self.options.num_rows
            );
            self.file_itm_data.selection = selection;
            self.file_itm_data.global_preprocessed = true;
            return Ok(());
        }

        let metadata = &self.metadata;
        let footers = selection
            .stripes
            .par_iter()
            .map(|stripe| metadata.files[stripe.source_idx].read_stripe_footer(&stripe.info))
            .collect::<Result<Vec<StripeFooter>>>()?;

        let num_types = self.column_levels.len();
        let num_stripes = selection.stripes.len();
        let mut stripe_streams = Vec::with_capacity(num_stripes);
        let mut lvl_stripe_sizes = vec![vec![0usize; num_stripes]; self.num_levels];
        let mut data_read_info = Vec::new();
        let mut stripe_data_read_chunks = Vec::with_capacity(num_stripes);
        for (idx, (stripe, footer)) in selection.stripes.iter().zip(&footers).enumerate() {
            if !footer.columns.is_empty() && footer.columns.len() != num_types {
                return Err(ColumnarError::corruption(format!(
                    "stripe footer column count mismatch: source={}, stripe={}, columns={}, types={}",
                    stripe.source_idx,
                    stripe.stripe_idx,
                    footer.columns.len(),
                    num_types
                )));
            }
            let streams =
                gather_stripe_streams(idx, stripe, footer, &self.column_levels, self.num_levels)?;
            let first_read = data_read_info.len();
            for (level, level_streams) in streams.levels.iter().enumerate() {
                lvl_stripe_sizes[level][idx] = streams.level_sizes[level];
                data_read_info.extend(coalesce_reads(stripe.source_idx, level_streams));
            }
            stripe_data_read_chunks.push(first_read..data_read_info.len());
            stripe_streams.push(streams);
        }

        let load_sizes = inclusive_prefix_sums(
            stripe_streams
                .iter()
                .map(|s| CumulativeSize::new(1, s.total_size())),
        );
        let load_limit = self.chunk_read_data.load_limit();
        let load_chunks = find_splits(&load_sizes, num_stripes, load_limit);
        debug!(
            "planned load chunks: stripes={}, rows={}, load_limit={}, chunks={}, reads={}",
            num_stripes,
            selection.rows_to_read,
            load_limit,
            load_chunks.len(),
            data_read_info.len()
        );

        let itm = &mut self.file_itm_data;
        itm.selection = selection;
        itm.stripe_streams = stripe_streams;
        itm.lvl_stripe_sizes = lvl_stripe_sizes;
        itm.data_read_info = data_read_info;
        itm.stripe_data_read_chunks = stripe_data_read_chunks;
        itm.lvl_stripe_data = vec![vec![None; num_stripes]; self.num_levels];
        itm.stripe_decomp_sizes = vec![0; num_stripes];
        itm.global_preprocessed = true;
        self.chunk_read_data.load_stripe_chunks = load_chunks;
        self.chunk_read_data.curr_load_stripe_chunk = 0;
        Ok(())
    }

    /// Read the raw bytes of the next load chunk, scan decompressed sizes
    /// and plan its decode chunks.
    pub(super) fn load_next_stripe_chunk(&mut self) -> Result<()> {
        let load_chunk =
            self.chunk_read_data.load_stripe_chunks[self.chunk_read_data.curr_load_stripe_chunk];
        self.file_itm_data.release_all();
        self.file_itm_data.compinfo_map.clear();

        let itm = &self.file_itm_data;
        let metadata = &self.metadata;
        let read_ids: Vec<usize> = (load_chunk.start_idx..load_chunk.end())
            .flat_map(|stripe| itm.stripe_data_read_chunks[stripe].clone())
            .collect();
        let fetched = read_ids
            .par_iter()
            .map(|&id| {
                let read = &itm.data_read_info[id];
                let source = &metadata.files[read.source_idx].source;
                source.read_at(read.offset, read.length).map(|bytes| (id, bytes))
            })
            .collect::<Result<Vec<(usize, Bytes)>>>()?;

        // Assemble one buffer per stripe and level. A single covering read is
        // kept as is.
        let mut buffers: Vec<Vec<Option<BytesMut>>> =
            vec![vec![None; load_chunk.count]; self.num_levels];
        let mut whole: Vec<Vec<Option<Bytes>>> = vec![vec![None; load_chunk.count]; self.num_levels];
        for (id, bytes) in fetched {
            let read = &itm.data_read_info[id];
            let local = read.stripe_idx - load_chunk.start_idx;
            let level_size = itm.lvl_stripe_sizes[read.level][read.stripe_idx];
            if read.dst_pos == 0 && read.length == level_size {
                whole[read.level][local] = Some(bytes);
                continue;
            }
            let buffer = buffers[read.level][local].get_or_insert_with(|| BytesMut::zeroed(level_size));
            buffer[read.dst_pos..read.dst_pos + read.length].copy_from_slice(&bytes);
        }

        let block_sizes: Vec<_> = metadata
            .files
            .iter()
            .map(|f| (f.compression, f.compression_block_size))
            .collect();
        let itm = &mut self.file_itm_data;
        for level in 0..self.num_levels {
            for local in 0..load_chunk.count {
                let stripe = load_chunk.start_idx + local;
                let data = whole[level][local]
                    .take()
                    .or_else(|| buffers[level][local].take().map(BytesMut::freeze))
                    .unwrap_or_default();
                itm.lvl_stripe_data[level][stripe] = Some(data);
            }
        }

        let itm = &self.file_itm_data;
        let scanned = (load_chunk.start_idx..load_chunk.end())
            .into_par_iter()
            .map(|stripe| -> Result<Vec<(StreamId, StreamCompInfo)>> {
                let (kind, block_size) = block_sizes[itm.selection.stripes[stripe].source_idx];
                let mut infos = Vec::new();
                for (level, streams) in itm.stripe_streams[stripe].levels.iter().enumerate() {
                    let buffer = itm.lvl_stripe_data[level][stripe]
                        .as_ref()
                        .ok_or_else(|| stripe_not_loaded(stripe, level))?;
                    for info in streams {
                        let raw = &buffer[info.dst_pos..info.dst_pos + info.length];
                        infos.push((info.id, scan_stream(kind, block_size, raw)?));
                    }
                }
                Ok(infos)
            })
            .collect::<Result<Vec<_>>>()?;

        let itm = &mut self.file_itm_data;
        let mut decode_units = Vec::with_capacity(load_chunk.count);
        let mut stripe_rows = Vec::with_capacity(load_chunk.count);
        let mut rows_acc = 0usize;
        for (local, infos) in scanned.into_iter().enumerate() {
            let stripe = load_chunk.start_idx + local;
            let decomp: usize = infos.iter().map(|(_, info)| info.total_decomp_size).sum();
            itm.stripe_decomp_sizes[stripe] = decomp;
            itm.compinfo_map.extend(infos);
            decode_units.push(CumulativeSize::new(1, decomp));
            rows_acc += itm.selection.stripes[stripe].num_rows as usize;
            stripe_rows.push(rows_acc);
        }

        let decode_limit = self.chunk_read_data.decode_limit();
        let decode_sizes = inclusive_prefix_sums(decode_units);
        let local_chunks = find_splits(&decode_sizes, load_chunk.count, decode_limit);
        let decode_chunks: Vec<ChunkRange> =
            cap_chunks(&local_chunks, &stripe_rows, MAX_ROWS_PER_DECODE_CHUNK)
                .into_iter()
                .map(|c| ChunkRange::new(c.start_idx + load_chunk.start_idx, c.count))
                .collect();
        debug!(
            "loaded stripe chunk: chunk={}, stripes=[{}, {}), decode_limit={}, decode_chunks={}",
            self.chunk_read_data.curr_load_stripe_chunk,
            load_chunk.start_idx,
            load_chunk.end(),
            decode_limit,
            decode_chunks.len()
        );

        let data = &mut self.chunk_read_data;
        data.decode_stripe_chunks = decode_chunks;
        data.curr_decode_stripe_chunk = 0;
        data.curr_load_stripe_chunk += 1;
        Ok(())
    }
}

pub(super) fn stripe_not_loaded(stripe: usize, level: usize) -> ColumnarError {
    ColumnarError::corruption(format!(
        "stripe data not loaded: stripe={}, level={}",
        stripe, level
    ))
}
