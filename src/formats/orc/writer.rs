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
//! Stripe file writer.
//!
//! Batches are buffered until a stripe reaches `stripe_size_rows` rows or
//! `stripe_size_bytes` of in-memory arrow data, then every column is encoded
//! into PRESENT/DATA/LENGTH streams, compressed, and written together with a
//! stripe footer. `close` appends the file footer and postscript.

use std::io::Write;

use arrow::array::{
    Array, ArrayRef, AsArray, BooleanArray, ListArray, RecordBatch, StringArray, UInt32Array,
};
use arrow::compute::{concat_batches, take};
use arrow::datatypes::{DataType, Float32Type, Float64Type, Int32Type, Int64Type, SchemaRef};
use prost::Message;

use crate::common::app_config::WriterConfig;
use crate::common::status::{ColumnarError, Result};
use crate::novarocks_logging::debug;

use super::compression::{CompressionKind, compress_stream, compression_from_name};
use super::encoding;
use super::proto::{
    ColumnEncoding, Footer, PostScript, StripeFooter, StripeInformation, Stream, StreamKind, Type,
};
use super::schema::types_from_schema;
use super::{DEFAULT_COMPRESSION_BLOCK_SIZE, ORC_MAGIC};

#[derive(Clone, Debug)]
pub struct OrcWriterOptions {
    pub stripe_size_rows: usize,
    pub stripe_size_bytes: usize,
    pub compression: CompressionKind,
    pub compression_block_size: usize,
}

impl Default for OrcWriterOptions {
    fn default() -> Self {
        Self {
            stripe_size_rows: 1_000_000,
            stripe_size_bytes: 64 * 1024 * 1024,
            compression: CompressionKind::None,
            compression_block_size: DEFAULT_COMPRESSION_BLOCK_SIZE,
        }
    }
}

impl OrcWriterOptions {
    pub fn from_config(cfg: &WriterConfig) -> Result<Self> {
        Ok(Self {
            stripe_size_rows: cfg.stripe_size_rows,
            stripe_size_bytes: cfg.stripe_size_bytes,
            compression: compression_from_name(&cfg.compression)?,
            compression_block_size: cfg.compression_block_size,
        })
    }

    pub fn with_stripe_size_rows(mut self, rows: usize) -> Self {
        self.stripe_size_rows = rows;
        self
    }

    pub fn with_stripe_size_bytes(mut self, bytes: usize) -> Self {
        self.stripe_size_bytes = bytes;
        self
    }

    pub fn with_compression(mut self, compression: CompressionKind) -> Self {
        self.compression = compression;
        self
    }

    pub fn with_compression_block_size(mut self, block_size: usize) -> Self {
        self.compression_block_size = block_size;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.stripe_size_rows == 0 {
            return Err(ColumnarError::invalid_argument(
                "stripe_size_rows must be positive",
            ));
        }
        if self.compression != CompressionKind::None
            && (self.compression_block_size == 0
                || self.compression_block_size > super::compression::MAX_BLOCK_LENGTH)
        {
            return Err(ColumnarError::invalid_argument(format!(
                "compression block size out of range: block_size={}",
                self.compression_block_size
            )));
        }
        match self.compression {
            CompressionKind::None | CompressionKind::Lz4 | CompressionKind::Zstd => Ok(()),
            other => Err(ColumnarError::not_supported(format!(
                "unsupported writer compression: compression={:?}",
                other
            ))),
        }
    }
}

/// One encoded stream waiting to be written.
struct PendingStream {
    kind: StreamKind,
    column: u32,
    bytes: Vec<u8>,
}

pub struct OrcWriter<W: Write> {
    sink: W,
    schema: SchemaRef,
    types: Vec<Type>,
    options: OrcWriterOptions,
    pending: Vec<RecordBatch>,
    pending_rows: usize,
    pending_bytes: usize,
    stripes: Vec<StripeInformation>,
    offset: u64,
    num_rows: u64,
}

impl<W: Write> OrcWriter<W> {
    pub fn try_new(mut sink: W, schema: SchemaRef, options: OrcWriterOptions) -> Result<Self> {
        options.validate()?;
        let types = types_from_schema(&schema)?;
        sink.write_all(ORC_MAGIC)?;
        Ok(Self {
            sink,
            schema,
            types,
            options,
            pending: Vec::new(),
            pending_rows: 0,
            pending_bytes: 0,
            stripes: Vec::new(),
            offset: ORC_MAGIC.len() as u64,
            num_rows: 0,
        })
    }

    pub fn write(&mut self, batch: &RecordBatch) -> Result<()> {
        if batch.schema().fields() != self.schema.fields() {
            return Err(ColumnarError::invalid_argument(format!(
                "batch schema does not match writer schema: batch={:?}, writer={:?}",
                batch.schema(),
                self.schema
            )));
        }
        if batch.num_rows() == 0 {
            return Ok(());
        }
        let bytes_per_row = slice_memory_size(batch)?
            .div_ceil(batch.num_rows())
            .max(1);
        let mut start = 0usize;
        while start < batch.num_rows() {
            let row_room = self.options.stripe_size_rows - self.pending_rows;
            let byte_room = self
                .options
                .stripe_size_bytes
                .saturating_sub(self.pending_bytes);
            let take_rows = row_room
                .min((byte_room / bytes_per_row).max(1))
                .min(batch.num_rows() - start);
            let piece = batch.slice(start, take_rows);
            self.pending_bytes += slice_memory_size(&piece)?;
            self.pending_rows += take_rows;
            self.pending.push(piece);
            start += take_rows;
            if self.pending_rows >= self.options.stripe_size_rows
                || self.pending_bytes >= self.options.stripe_size_bytes
            {
                self.flush_stripe()?;
            }
        }
        Ok(())
    }

    /// Write any buffered rows as a stripe.
    pub fn flush_stripe(&mut self) -> Result<()> {
        if self.pending_rows == 0 {
            return Ok(());
        }
        let batch = concat_batches(&self.schema, &self.pending)?;
        self.pending.clear();
        self.pending_rows = 0;
        self.pending_bytes = 0;

        let mut streams = Vec::new();
        let mut next_id = 1u32;
        for (field, column) in self.schema.fields().iter().zip(batch.columns()) {
            encode_column(column, field.is_nullable(), &mut next_id, &mut streams)?;
        }

        let stripe_offset = self.offset;
        let mut footer = StripeFooter {
            streams: Vec::with_capacity(streams.len()),
            columns: vec![ColumnEncoding { kind: Some(0) }; self.types.len()],
        };
        let mut data_length = 0u64;
        for stream in streams {
            let bytes = compress_stream(
                self.options.compression,
                self.options.compression_block_size,
                &stream.bytes,
            )?;
            self.sink.write_all(&bytes)?;
            data_length += bytes.len() as u64;
            footer.streams.push(Stream {
                kind: Some(stream.kind as i32),
                column: Some(stream.column),
                length: Some(bytes.len() as u64),
            });
        }
        let footer_bytes = compress_stream(
            self.options.compression,
            self.options.compression_block_size,
            &footer.encode_to_vec(),
        )?;
        self.sink.write_all(&footer_bytes)?;

        self.offset += data_length + footer_bytes.len() as u64;
        self.num_rows += batch.num_rows() as u64;
        debug!(
            "wrote stripe: index={}, rows={}, data_length={}, footer_length={}",
            self.stripes.len(),
            batch.num_rows(),
            data_length,
            footer_bytes.len()
        );
        self.stripes.push(StripeInformation {
            offset: Some(stripe_offset),
            index_length: Some(0),
            data_length: Some(data_length),
            footer_length: Some(footer_bytes.len() as u64),
            number_of_rows: Some(batch.num_rows() as u64),
        });
        Ok(())
    }

    /// Flush the last stripe, write footer and postscript, and hand back the sink.
    pub fn close(mut self) -> Result<W> {
        self.flush_stripe()?;
        let footer = Footer {
            header_length: Some(ORC_MAGIC.len() as u64),
            content_length: Some(self.offset - ORC_MAGIC.len() as u64),
            stripes: std::mem::take(&mut self.stripes),
            types: self.types.clone(),
            number_of_rows: Some(self.num_rows),
            row_index_stride: Some(0),
        };
        let footer_bytes = compress_stream(
            self.options.compression,
            self.options.compression_block_size,
            &footer.encode_to_vec(),
        )?;
        let postscript = PostScript {
            footer_length: Some(footer_bytes.len() as u64),
            compression: Some(self.options.compression as i32),
            compression_block_size: Some(self.options.compression_block_size as u64),
            footer_crc: Some(crc32c::crc32c(&footer_bytes)),
            magic: Some(String::from_utf8_lossy(ORC_MAGIC).into_owned()),
        };
        let ps_bytes = postscript.encode_to_vec();
        let ps_len = u8::try_from(ps_bytes.len()).map_err(|_| {
            ColumnarError::invalid_argument(format!(
                "postscript exceeds 255 bytes: length={}",
                ps_bytes.len()
            ))
        })?;
        self.sink.write_all(&footer_bytes)?;
        self.sink.write_all(&ps_bytes)?;
        self.sink.write_all(&[ps_len])?;
        self.sink.flush()?;
        Ok(self.sink)
    }
}

/// Bytes of arrow buffers visible through `batch`, excluding parent buffers
/// of sliced columns.
fn slice_memory_size(batch: &RecordBatch) -> Result<usize> {
    let mut total = 0usize;
    for column in batch.columns() {
        total += column.to_data().get_slice_memory_size()?;
    }
    Ok(total)
}

/// Encode one column subtree in preorder, assigning ids from `next_id`.
fn encode_column(
    array: &ArrayRef,
    nullable: bool,
    next_id: &mut u32,
    out: &mut Vec<PendingStream>,
) -> Result<()> {
    let column = *next_id;
    *next_id += 1;
    if array.null_count() > 0 {
        if !nullable {
            return Err(ColumnarError::invalid_argument(format!(
                "null values in non-nullable column: column={}, null_count={}",
                column,
                array.null_count()
            )));
        }
        if let Some(nulls) = array.logical_nulls() {
            out.push(PendingStream {
                kind: StreamKind::Present,
                column,
                bytes: encoding::encode_present(&nulls),
            });
        }
    }
    let data = |bytes| PendingStream {
        kind: StreamKind::Data,
        column,
        bytes,
    };
    match array.data_type() {
        DataType::Boolean => {
            let values: &BooleanArray = array.as_boolean();
            out.push(data(encoding::encode_boolean(values)));
        }
        DataType::Int32 => out.push(data(encoding::encode_primitive(
            array.as_primitive::<Int32Type>(),
        ))),
        DataType::Int64 => out.push(data(encoding::encode_primitive(
            array.as_primitive::<Int64Type>(),
        ))),
        DataType::Float32 => out.push(data(encoding::encode_primitive(
            array.as_primitive::<Float32Type>(),
        ))),
        DataType::Float64 => out.push(data(encoding::encode_primitive(
            array.as_primitive::<Float64Type>(),
        ))),
        DataType::Utf8 => {
            let values: &StringArray = array.as_string::<i32>();
            let (bytes, lengths) = encoding::encode_string(values)?;
            out.push(data(bytes));
            out.push(PendingStream {
                kind: StreamKind::Length,
                column,
                bytes: lengths,
            });
        }
        DataType::Struct(fields) => {
            let values = array.as_struct();
            for (field, child) in fields.iter().zip(values.columns()) {
                encode_column(child, field.is_nullable(), next_id, out)?;
            }
        }
        DataType::List(element) => {
            let values: &ListArray = array.as_list::<i32>();
            let (lengths, child) = visible_list_elements(values)?;
            out.push(PendingStream {
                kind: StreamKind::Length,
                column,
                bytes: encoding::encode_lengths(lengths.into_iter())?,
            });
            encode_column(&child, element.is_nullable(), next_id, out)?;
        }
        other => {
            return Err(ColumnarError::not_supported(format!(
                "unsupported column type for stripe file: data_type={}",
                other
            )));
        }
    }
    Ok(())
}

/// Lengths of non-null lists and the elements they reference, in row order.
fn visible_list_elements(list: &ListArray) -> Result<(Vec<usize>, ArrayRef)> {
    let offsets = list.value_offsets();
    let mut lengths = Vec::with_capacity(list.len() - list.null_count());
    let mut indices = Vec::new();
    for row in 0..list.len() {
        if list.is_null(row) {
            continue;
        }
        let (start, end) = (offsets[row] as u32, offsets[row + 1] as u32);
        lengths.push((end - start) as usize);
        indices.extend(start..end);
    }
    let child = take(list.values().as_ref(), &UInt32Array::from(indices), None)?;
    Ok((lengths, child))
}
