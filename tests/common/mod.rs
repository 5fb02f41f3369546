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
//! Shared helpers for integration tests: in-memory stripe files and chunk draining.
#![allow(dead_code)]

use std::sync::Arc;

use arrow::array::{ArrayRef, Int32Array, Int64Array, RecordBatch};
use arrow::compute::concat_batches;
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};

use novarocks_columnar::fs::{BytesDataSource, SharedDataSource};
use novarocks_columnar::novarocks_format_orc::CompressionKind;
use novarocks_columnar::{ChunkedOrcReader, OrcWriter, OrcWriterOptions};

/// Encode `batches` into one in-memory file with stripes of `stripe_rows` rows.
pub fn write_file(
    schema: &SchemaRef,
    batches: &[RecordBatch],
    stripe_rows: usize,
    compression: CompressionKind,
) -> Vec<u8> {
    let options = OrcWriterOptions::default()
        .with_stripe_size_rows(stripe_rows)
        .with_compression(compression)
        .with_compression_block_size(64 * 1024);
    let mut writer =
        OrcWriter::try_new(Vec::new(), Arc::clone(schema), options).expect("create writer");
    for batch in batches {
        writer.write(batch).expect("write batch");
    }
    writer.close().expect("close writer")
}

pub fn source(bytes: Vec<u8>) -> SharedDataSource {
    Arc::new(BytesDataSource::new(bytes).with_name("memory.orc"))
}

/// Call `read_chunk` until `has_next` is false.
pub fn drain(reader: &mut ChunkedOrcReader) -> Vec<RecordBatch> {
    let mut chunks = Vec::new();
    while reader.has_next().expect("has_next") {
        chunks.push(reader.read_chunk().expect("read_chunk").table);
    }
    chunks
}

pub fn concat(schema: &SchemaRef, chunks: &[RecordBatch]) -> RecordBatch {
    concat_batches(schema, chunks).expect("concat chunks")
}

/// `num_columns` int32 columns `c0..`, column `i` holding `row * (i + 1)`.
/// With `nullable`, every 4th row is null.
pub fn int_table(num_rows: usize, num_columns: usize, nullable: bool) -> RecordBatch {
    let fields: Vec<Field> = (0..num_columns)
        .map(|i| Field::new(format!("c{i}"), DataType::Int32, nullable))
        .collect();
    let schema = Arc::new(Schema::new(fields));
    let columns: Vec<ArrayRef> = (0..num_columns)
        .map(|i| {
            let values = (0..num_rows as i32).map(|row| {
                let v = row.wrapping_mul(i as i32 + 1);
                (!nullable || row % 4 != 0).then_some(v)
            });
            Arc::new(values.collect::<Int32Array>()) as ArrayRef
        })
        .collect();
    RecordBatch::try_new(schema, columns).expect("int table")
}

pub fn int64_table(values: Vec<Option<i64>>) -> RecordBatch {
    let schema = Arc::new(Schema::new(vec![Field::new("v", DataType::Int64, true)]));
    RecordBatch::try_new(schema, vec![Arc::new(Int64Array::from(values))]).expect("int64 table")
}
