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
//! Decompression and decoding of one decode chunk into an arrow table.

use std::sync::Arc;

use arrow::array::{ArrayRef, ListArray, RecordBatch, RecordBatchOptions, StructArray};
use arrow::compute::concat_batches;
use arrow::datatypes::{DataType, Float32Type, Float64Type, Int32Type, Int64Type};
use bytes::Bytes;
use hashbrown::HashMap;
use rayon::prelude::*;

use crate::common::status::{ColumnarError, Result};
use crate::formats::orc::compression::decompress_stream;
use crate::formats::orc::encoding;
use crate::formats::orc::proto::StreamKind;
use crate::formats::orc::schema::OrcColumn;
use crate::novarocks_logging::debug;

use super::output::compute_output_chunks;
use super::preprocess::stripe_not_loaded;
use super::{ChunkRange, ChunkedOrcReader};

/// Decompressed streams of one stripe keyed by column id and kind.
type StripeStreamData = HashMap<(u32, StreamKind), Bytes>;

impl ChunkedOrcReader {
    /// Decode the next decode chunk, trim it to the requested row range,
    /// release its raw buffers and plan output chunks over the result.
    pub(super) fn decompress_and_decode_next(&mut self) -> Result<()> {
        let chunk =
            self.chunk_read_data.decode_stripe_chunks[self.chunk_read_data.curr_decode_stripe_chunk];
        let batches = (chunk.start_idx..chunk.end())
            .into_par_iter()
            .map(|stripe| self.decode_stripe(stripe))
            .collect::<Result<Vec<_>>>()?;
        let table = concat_batches(&self.output_schema, &batches)?;
        let table = self.trim_to_row_range(chunk, table);

        self.file_itm_data.release_stripes(chunk);
        let data = &mut self.chunk_read_data;
        data.curr_decode_stripe_chunk += 1;
        data.output_table_chunks =
            compute_output_chunks(&table, data.output_size_limit, data.output_row_granularity);
        data.curr_output_table_chunk = 0;
        debug!(
            "decoded stripe chunk: stripes=[{}, {}), rows={}, output_chunks={}",
            chunk.start_idx,
            chunk.end(),
            table.num_rows(),
            data.output_table_chunks.len()
        );
        data.decoded_table = Some(table);
        Ok(())
    }

    /// Drop rows outside `[rows_to_skip, rows_to_skip + rows_to_read)`.
    fn trim_to_row_range(&self, chunk: ChunkRange, table: RecordBatch) -> RecordBatch {
        let selection = &self.file_itm_data.selection;
        let first_row = selection.stripes[chunk.start_idx].first_row;
        let rows = table.num_rows() as u64;
        let keep_start = selection.rows_to_skip.saturating_sub(first_row).min(rows);
        let keep_end = (selection.rows_to_skip + selection.rows_to_read)
            .saturating_sub(first_row)
            .min(rows)
            .max(keep_start);
        if keep_start == 0 && keep_end == rows {
            return table;
        }
        table.slice(keep_start as usize, (keep_end - keep_start) as usize)
    }

    fn decode_stripe(&self, stripe: usize) -> Result<RecordBatch> {
        let itm = &self.file_itm_data;
        let selected = &itm.selection.stripes[stripe];
        let file = &self.metadata.files[selected.source_idx];
        let mut streams = StripeStreamData::new();
        for (level, infos) in itm.stripe_streams[stripe].levels.iter().enumerate() {
            let buffer = itm.lvl_stripe_data[level][stripe]
                .as_ref()
                .ok_or_else(|| stripe_not_loaded(stripe, level))?;
            for info in infos {
                let comp = itm.compinfo_map.get(&info.id).copied().unwrap_or_default();
                let raw = buffer.slice(info.dst_pos..info.dst_pos + info.length);
                let data = decompress_stream(
                    file.compression,
                    file.compression_block_size,
                    &raw,
                    comp.total_decomp_size,
                )?;
                streams.insert((info.id.column, info.id.kind), data);
            }
        }

        let num_rows = usize::try_from(selected.num_rows).map_err(|_| {
            ColumnarError::not_supported(format!(
                "stripe row count exceeds address space: stripe={}, rows={}",
                selected.stripe_idx, selected.num_rows
            ))
        })?;
        let columns = self
            .selected_columns
            .iter()
            .map(|column| decode_column(column, num_rows, &streams))
            .collect::<Result<Vec<ArrayRef>>>()?;
        let options = RecordBatchOptions::new().with_row_count(Some(num_rows));
        Ok(RecordBatch::try_new_with_options(
            Arc::clone(&self.output_schema),
            columns,
            &options,
        )?)
    }
}

fn decode_column(column: &OrcColumn, len: usize, streams: &StripeStreamData) -> Result<ArrayRef> {
    let stream = |kind| streams.get(&(column.id, kind));
    let nulls = match stream(StreamKind::Present) {
        Some(present) => {
            if !column.nullable() {
                return Err(ColumnarError::corruption(format!(
                    "present stream for non-nullable column: column={}",
                    column.id
                )));
            }
            let nulls = encoding::decode_present(present, len)?;
            (nulls.null_count() > 0).then_some(nulls)
        }
        None => None,
    };
    let empty = Bytes::new();
    let data = stream(StreamKind::Data).unwrap_or(&empty);
    let lengths = stream(StreamKind::Length).unwrap_or(&empty);

    let array: ArrayRef = match column.field.data_type() {
        DataType::Boolean => Arc::new(encoding::decode_boolean(data, len, nulls)?),
        DataType::Int32 => Arc::new(encoding::decode_primitive::<Int32Type>(data, len, nulls)?),
        DataType::Int64 => Arc::new(encoding::decode_primitive::<Int64Type>(data, len, nulls)?),
        DataType::Float32 => Arc::new(encoding::decode_primitive::<Float32Type>(data, len, nulls)?),
        DataType::Float64 => Arc::new(encoding::decode_primitive::<Float64Type>(data, len, nulls)?),
        DataType::Utf8 => Arc::new(encoding::decode_string(data, lengths, len, nulls)?),
        DataType::Struct(fields) => {
            let children = column
                .children
                .iter()
                .map(|child| decode_column(child, len, streams))
                .collect::<Result<Vec<_>>>()?;
            Arc::new(StructArray::try_new(fields.clone(), children, nulls)?)
        }
        DataType::List(element) => {
            let present = len - nulls.as_ref().map_or(0, |n| n.null_count());
            let lengths = encoding::decode_lengths(lengths, present)?;
            let offsets = encoding::offsets_from_lengths(&lengths, len, nulls.as_ref())?;
            let child_len = *offsets.last().unwrap_or(&0) as usize;
            let [child] = column.children.as_slice() else {
                return Err(ColumnarError::corruption(format!(
                    "list column must have one child: column={}",
                    column.id
                )));
            };
            let values = decode_column(child, child_len, streams)?;
            Arc::new(ListArray::try_new(Arc::clone(element), offsets, values, nulls)?)
        }
        other => {
            return Err(ColumnarError::not_supported(format!(
                "unsupported column type for decode: column={}, data_type={}",
                column.id, other
            )));
        }
    };
    Ok(array)
}
