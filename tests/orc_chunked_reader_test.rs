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
mod common;

use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, Int32Array, Int64Array, ListArray, RecordBatch, StringArray, StructArray,
};
use arrow::buffer::OffsetBuffer;
use arrow::datatypes::{DataType, Field, Fields, Schema, SchemaRef};

use novarocks_columnar::novarocks_format_orc::CompressionKind;
use novarocks_columnar::{ChunkedOrcReader, OrcReader, OrcReaderOptions};

use common::{concat, drain, int_table, source, write_file};

fn chunked(
    bytes: &[u8],
    output_limit: usize,
    data_read_limit: usize,
    options: OrcReaderOptions,
) -> ChunkedOrcReader {
    ChunkedOrcReader::new(
        output_limit,
        data_read_limit,
        vec![source(bytes.to_vec())],
        options,
    )
    .expect("open reader")
}

fn chunk_rows(chunks: &[RecordBatch]) -> Vec<usize> {
    chunks.iter().map(RecordBatch::num_rows).collect()
}

fn int_file(
    num_rows: usize,
    num_columns: usize,
    nullable: bool,
    stripe_rows: usize,
) -> (RecordBatch, Vec<u8>) {
    let table = int_table(num_rows, num_columns, nullable);
    let bytes = write_file(&table.schema(), &[table.clone()], stripe_rows, CompressionKind::None);
    (table, bytes)
}

#[test]
fn empty_file_yields_one_empty_chunk() {
    let schema: SchemaRef = Arc::new(Schema::new(vec![Field::new("c0", DataType::Int32, true)]));
    let bytes = write_file(&schema, &[], 1000, CompressionKind::None);
    let mut reader = chunked(&bytes, 0, 0, OrcReaderOptions::new());
    assert!(reader.has_no_data().expect("has_no_data"));
    assert!(reader.has_next().expect("has_next"));
    let chunk = reader.read_chunk().expect("read");
    assert_eq!(chunk.table.num_rows(), 0);
    assert_eq!(chunk.table.schema(), schema);
    assert_eq!(chunk.metadata.schema_info[0].name, "c0");
    assert!(!reader.has_next().expect("has_next"));
}

#[test]
fn unlimited_read_returns_one_chunk() {
    for nullable in [false, true] {
        for stripe_rows in [1000, 40_000] {
            let (table, bytes) = int_file(40_000, 2, nullable, stripe_rows);
            let mut reader = chunked(&bytes, 0, 0, OrcReaderOptions::new());
            let chunks = drain(&mut reader);
            assert_eq!(chunk_rows(&chunks), vec![40_000]);
            assert_eq!(chunks[0], table);
        }
    }
}

/// An int32 and an int64 column; with `nullable`, every 4th row is null in both.
fn int32_int64_table(num_rows: usize, nullable: bool) -> RecordBatch {
    let schema = Arc::new(Schema::new(vec![
        Field::new("a", DataType::Int32, nullable),
        Field::new("b", DataType::Int64, nullable),
    ]));
    let valid = |row: usize| !nullable || row % 4 != 0;
    let a: Int32Array = (0..num_rows).map(|row| valid(row).then_some(row as i32)).collect();
    let b: Int64Array = (0..num_rows)
        .map(|row| valid(row).then_some(row as i64 * 7))
        .collect();
    RecordBatch::try_new(schema, vec![Arc::new(a), Arc::new(b)]).expect("table")
}

/// Read `table` back through a chunked reader with one load pass and return
/// chunk row counts, checking the chunks reassemble the table.
fn rows_per_chunk(table: &RecordBatch, output_limit: usize, granularity: usize) -> Vec<usize> {
    let schema = table.schema();
    let bytes = write_file(&schema, &[table.clone()], 20_000, CompressionKind::None);
    let mut reader = ChunkedOrcReader::with_granularity(
        output_limit,
        0,
        granularity,
        vec![source(bytes)],
        OrcReaderOptions::new(),
    )
    .expect("open reader");
    let chunks = drain(&mut reader);
    assert_eq!(concat(&schema, &chunks), *table, "limit={output_limit}");
    chunk_rows(&chunks)
}

fn assert_chunk_counts(table: &RecordBatch, granularity: usize, cases: &[(usize, usize)]) {
    for &(limit, expected) in cases {
        let rows = rows_per_chunk(table, limit, granularity);
        assert_eq!(rows.len(), expected, "limit={limit} rows={rows:?}");
    }
}

#[test]
fn output_limit_splits_two_column_table() {
    // 96 bits per row, 98 with validity: 120,000 or exactly 122,500 bytes
    // per 10,000-row segment.
    for nullable in [false, true] {
        let table = int32_int64_table(40_000, nullable);
        let bytes = write_file(&table.schema(), &[table.clone()], 1000, CompressionKind::None);
        let mut reader = chunked(&bytes, 245_000, 0, OrcReaderOptions::new());
        let chunks = drain(&mut reader);
        assert_eq!(chunk_rows(&chunks), vec![20_000, 20_000], "nullable={nullable}");
        assert_eq!(concat(&table.schema(), &chunks), table);
    }
}

#[test]
fn output_limit_boundaries_on_single_column() {
    let (table, bytes) = int_file(40_000, 1, false, 40_000);
    // 10,000 non-null int32 rows cost 40,000 bytes.
    let cases = [
        (1usize, 4usize),
        (39_999, 4),
        (40_000, 4),
        (79_999, 4),
        (80_000, 2),
        (120_000, 2),
        (159_999, 2),
        (160_000, 1),
        (1_000_000, 1),
    ];
    for (limit, expected) in cases {
        let mut reader = chunked(&bytes, limit, 0, OrcReaderOptions::new());
        let chunks = drain(&mut reader);
        assert_eq!(chunks.len(), expected, "limit={limit}");
        for chunk in &chunks[..chunks.len() - 1] {
            assert_eq!(chunk.num_rows() % 10_000, 0, "limit={limit}");
        }
        assert_eq!(concat(&table.schema(), &chunks), table);
    }
}

#[test]
fn output_row_granularity_is_respected() {
    let (table, bytes) = int_file(40_000, 1, false, 5000);
    let mut reader = ChunkedOrcReader::with_granularity(
        1,
        0,
        3000,
        vec![source(bytes)],
        OrcReaderOptions::new(),
    )
    .expect("open reader");
    let chunks = drain(&mut reader);
    assert_eq!(chunks.len(), 14);
    assert!(chunks[..13].iter().all(|c| c.num_rows() == 3000));
    assert_eq!(chunks[13].num_rows(), 1000);
    assert_eq!(concat(&table.schema(), &chunks), table);
}

#[test]
fn null_counts_per_stripe_sized_chunk() {
    let (table, bytes) = int_file(100_000, 1, true, 20_000);
    // One 20,000-row stripe per load pass.
    let mut reader = chunked(&bytes, 0, 1, OrcReaderOptions::new());
    let chunks = drain(&mut reader);
    assert_eq!(chunks.len(), 5);
    for chunk in &chunks {
        assert_eq!(chunk.num_rows(), 20_000);
        assert_eq!(chunk.column(0).null_count(), 5000);
    }
    // Two 41,250-byte segments per output chunk.
    let mut reader = chunked(&bytes, 82_500, 0, OrcReaderOptions::new());
    let chunks = drain(&mut reader);
    assert_eq!(chunks.len(), 5);
    assert!(chunks.iter().all(|c| c.column(0).null_count() == 5000));
    assert_eq!(concat(&table.schema(), &chunks), table);
}

#[test]
fn output_limit_of_four_bytes_per_stripe_row() {
    let stripe_rows = 20_000;
    let schema = Arc::new(Schema::new(vec![Field::new("v", DataType::Int32, true)]));
    let values: Int32Array = (0..100_000)
        .map(|i| (i % 4 != 3).then_some(i))
        .collect();
    let table = RecordBatch::try_new(schema, vec![Arc::new(values)]).expect("table");
    let bytes = write_file(&table.schema(), &[table.clone()], stripe_rows, CompressionKind::None);
    // A 20,000-row segment costs 82,500 bytes, over the limit on its own.
    let mut reader = ChunkedOrcReader::with_granularity(
        stripe_rows * 4,
        0,
        20_000,
        vec![source(bytes)],
        OrcReaderOptions::new(),
    )
    .expect("open reader");
    let chunks = drain(&mut reader);
    assert_eq!(chunk_rows(&chunks), vec![20_000; 5]);
    assert!(chunks.iter().all(|c| c.column(0).null_count() == 5000));
    assert_eq!(concat(&table.schema(), &chunks), table);
}

#[test]
fn tiny_data_read_limit_reads_one_stripe_per_pass() {
    let (table, bytes) = int_file(10_000, 2, true, 1000);
    let mut reader = chunked(&bytes, 0, 1, OrcReaderOptions::new());
    let chunks = drain(&mut reader);
    assert_eq!(chunk_rows(&chunks), vec![1000; 10]);
    assert_eq!(concat(&table.schema(), &chunks), table);
}

#[test]
fn strings_split_by_content_size() {
    let values: Vec<Option<String>> = (0..25_000)
        .map(|i| (i % 7 != 3).then(|| "x".repeat(i % 40)))
        .collect();
    let schema: SchemaRef = Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int64, false),
        Field::new("s", DataType::Utf8, true),
    ]));
    let table = RecordBatch::try_new(
        Arc::clone(&schema),
        vec![
            Arc::new(Int64Array::from_iter_values(0..25_000i64)),
            Arc::new(StringArray::from(values)),
        ],
    )
    .expect("table");
    let bytes = write_file(&schema, &[table.clone()], 4000, CompressionKind::None);
    let full = drain(&mut chunked(&bytes, 0, 0, OrcReaderOptions::new()));
    assert_eq!(full.len(), 1);
    let chunks = drain(&mut chunked(&bytes, 100_000, 20_000, OrcReaderOptions::new()));
    assert!(chunks.len() > 1);
    assert_eq!(concat(&schema, &chunks), table);
}

#[test]
fn string_chunk_boundaries() {
    // Strings of 1..=5 bytes average 3, so a row is 32 + 32 + 24 bits and a
    // 20,000-row segment costs 220,000 bytes.
    let schema = Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int32, false),
        Field::new("s", DataType::Utf8, false),
    ]));
    let strings: StringArray = (0..60_000)
        .map(|i| Some("abcde"[..i % 5 + 1].to_string()))
        .collect();
    let table = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(Int32Array::from_iter_values(0..60_000)),
            Arc::new(strings),
        ],
    )
    .expect("table");
    assert_chunk_counts(
        &table,
        20_000,
        &[
            (1, 3),
            (439_999, 3),
            (440_000, 2),
            (500_000, 2),
            (659_999, 2),
            (660_000, 1),
            (1_000_000, 1),
        ],
    );
}

#[test]
fn list_chunk_boundaries_without_nulls() {
    // One or two elements per row: 32 + 1.5 * 32 bits, 200,000 bytes per segment.
    let item = Arc::new(Field::new("item", DataType::Int32, false));
    let mut offsets = vec![0i32];
    let mut items = Vec::new();
    for row in 0..100_000i32 {
        items.push(row);
        if row % 2 == 1 {
            items.push(-row);
        }
        offsets.push(items.len() as i32);
    }
    let list = ListArray::new(
        Arc::clone(&item),
        OffsetBuffer::new(offsets.into()),
        Arc::new(Int32Array::from(items)),
        None,
    );
    let schema = Arc::new(Schema::new(vec![Field::new("l", DataType::List(item), false)]));
    let table = RecordBatch::try_new(schema, vec![Arc::new(list)]).expect("table");
    assert_chunk_counts(
        &table,
        20_000,
        &[(199_999, 5), (200_000, 5), (399_999, 5), (400_000, 3)],
    );
}

#[test]
fn list_chunk_boundaries_with_nulls() {
    // Per 4 rows: two elements, an empty list, one element, a null list.
    // 1 + 32 + 0.75 * 32 bits per row, 142,500 bytes per segment.
    let item = Arc::new(Field::new("item", DataType::Int32, false));
    let mut offsets = vec![0i32];
    let mut items = Vec::new();
    for row in 0..100_000i32 {
        let len = [2, 0, 1, 0][row as usize % 4];
        items.extend((0..len).map(|j| row * 2 + j));
        offsets.push(items.len() as i32);
    }
    let validity: Vec<bool> = (0..100_000).map(|row| row % 4 != 3).collect();
    let list = ListArray::new(
        Arc::clone(&item),
        OffsetBuffer::new(offsets.into()),
        Arc::new(Int32Array::from(items)),
        Some(validity.into()),
    );
    let schema = Arc::new(Schema::new(vec![Field::new("l", DataType::List(item), true)]));
    let table = RecordBatch::try_new(schema, vec![Arc::new(list)]).expect("table");
    assert_eq!(table.column(0).null_count(), 25_000);
    assert_chunk_counts(
        &table,
        20_000,
        &[(142_499, 5), (142_500, 5), (284_999, 5), (285_000, 3)],
    );
}

#[test]
fn struct_chunk_boundaries() {
    // int32 plus a nullable int64: 32 + 64 + 1 bits, 242,500 bytes per segment.
    let fields = Fields::from(vec![
        Field::new("a", DataType::Int32, false),
        Field::new("b", DataType::Int64, true),
    ]);
    let a: ArrayRef = Arc::new(Int32Array::from_iter_values(0..100_000));
    let b: ArrayRef = Arc::new(
        (0..100_000i64)
            .map(|i| (i % 4 != 3).then_some(i * 3))
            .collect::<Int64Array>(),
    );
    let point = StructArray::new(fields.clone(), vec![a, b], None);
    let schema = Arc::new(Schema::new(vec![Field::new("p", DataType::Struct(fields), false)]));
    let table = RecordBatch::try_new(schema, vec![Arc::new(point)]).expect("table");
    assert_chunk_counts(
        &table,
        20_000,
        &[(242_499, 5), (242_500, 5), (484_999, 5), (485_000, 3)],
    );
}

fn nested_table(num_rows: usize) -> RecordBatch {
    let point_fields = Fields::from(vec![
        Field::new("x", DataType::Int32, false),
        Field::new("label", DataType::Utf8, true),
    ]);
    let xs = Int32Array::from_iter_values(0..num_rows as i32);
    let labels: StringArray = (0..num_rows)
        .map(|i| (i % 5 != 0).then(|| format!("p{i}")))
        .collect();
    let point = StructArray::new(
        point_fields.clone(),
        vec![Arc::new(xs) as ArrayRef, Arc::new(labels) as ArrayRef],
        None,
    );

    let mut offsets = vec![0i32];
    let mut items = Vec::new();
    // Null lists own no elements.
    for row in 0..num_rows {
        let len = if row % 9 == 0 { 0 } else { row % 4 };
        for j in 0..len {
            items.push(Some((row * 10 + j) as i32));
        }
        offsets.push(items.len() as i32);
    }
    let item_field = Arc::new(Field::new("item", DataType::Int32, true));
    let list_nulls = (0..num_rows).map(|row| row % 9 != 0).collect::<Vec<bool>>();
    let list = ListArray::new(
        Arc::clone(&item_field),
        OffsetBuffer::new(offsets.into()),
        Arc::new(Int32Array::from(items)),
        Some(list_nulls.into()),
    );
    let schema = Arc::new(Schema::new(vec![
        Field::new("point", DataType::Struct(point_fields), false),
        Field::new("tags", DataType::List(item_field), true),
    ]));
    RecordBatch::try_new(schema, vec![Arc::new(point), Arc::new(list)]).expect("nested table")
}

#[test]
fn nested_columns_survive_chunking() {
    let table = nested_table(12_000);
    let schema = table.schema();
    let bytes = write_file(&schema, &[table.clone()], 2500, CompressionKind::None);

    let single = OrcReader::new(vec![source(bytes.clone())], OrcReaderOptions::new())
        .expect("open")
        .read()
        .expect("read");
    assert_eq!(single.table, table);
    let names: Vec<_> = single.metadata.schema_info[0]
        .children
        .iter()
        .map(|c| c.name.as_str())
        .collect();
    assert_eq!(names, vec!["x", "label"]);

    let chunks = drain(&mut chunked(&bytes, 50_000, 30_000, OrcReaderOptions::new()));
    assert!(chunks.len() > 1);
    assert_eq!(concat(&schema, &chunks), table);
}

#[test]
fn skip_and_num_rows_trim_across_passes() {
    let (table, bytes) = int_file(10_000, 1, true, 1000);
    let options = OrcReaderOptions::new().with_skip_rows(1500).with_num_rows(2000);
    let chunks = drain(&mut chunked(&bytes, 0, 1, options.clone()));
    assert_eq!(concat(&table.schema(), &chunks), table.slice(1500, 2000));

    let single = OrcReader::new(vec![source(bytes.clone())], options)
        .expect("open")
        .read()
        .expect("read");
    assert_eq!(single.table, table.slice(1500, 2000));

    let past_end = OrcReaderOptions::new().with_skip_rows(20_000);
    let mut reader = chunked(&bytes, 0, 0, past_end);
    let chunks = drain(&mut reader);
    assert_eq!(chunk_rows(&chunks), vec![0]);
}

#[test]
fn explicit_stripe_selection() {
    let (table, bytes) = int_file(5000, 1, false, 1000);
    let options = OrcReaderOptions::new().with_stripes(vec![vec![1, 3]]);
    let chunks = drain(&mut chunked(&bytes, 0, 0, options));
    let out = concat(&table.schema(), &chunks);
    let expected = concat(&table.schema(), &[table.slice(1000, 1000), table.slice(3000, 1000)]);
    assert_eq!(out, expected);
}

#[test]
fn stripes_with_row_range_are_rejected() {
    let (_, bytes) = int_file(100, 1, false, 10);
    let options = OrcReaderOptions::new()
        .with_stripes(vec![vec![0]])
        .with_skip_rows(5);
    let err = ChunkedOrcReader::new(0, 0, vec![source(bytes.clone())], options)
        .err()
        .expect("conflicting selection");
    assert!(err.is_invalid_argument());

    let out_of_range = OrcReaderOptions::new().with_stripes(vec![vec![99]]);
    let mut reader = chunked(&bytes, 0, 0, out_of_range);
    assert!(reader.read_chunk().is_err());
}

#[test]
fn column_selection() {
    let (table, bytes) = int_file(3000, 3, true, 1000);
    let options = OrcReaderOptions::new().with_columns(["c2", "c0"]);
    let chunks = drain(&mut chunked(&bytes, 0, 0, options));
    let out = &chunks[0];
    assert_eq!(out.num_columns(), 2);
    assert_eq!(out.schema().field(0).name(), "c2");
    assert_eq!(out.column(0), table.column(2));
    assert_eq!(out.column(1), table.column(0));

    let missing = OrcReaderOptions::new().with_columns(["nope"]);
    let err = ChunkedOrcReader::new(0, 0, vec![source(bytes)], missing)
        .err()
        .expect("unknown column");
    assert!(err.is_invalid_argument());
}

#[test]
fn multiple_sources_concatenate() {
    let (first, first_bytes) = int_file(3000, 2, true, 1000);
    let second = int_table(2500, 2, true);
    let second_bytes = write_file(&second.schema(), &[second.clone()], 700, CompressionKind::None);
    let mut reader = ChunkedOrcReader::new(
        0,
        1,
        vec![source(first_bytes), source(second_bytes)],
        OrcReaderOptions::new(),
    )
    .expect("open reader");
    let chunks = drain(&mut reader);
    assert_eq!(chunks.len(), 3 + 4);
    let expected = concat(&first.schema(), &[first, second]);
    assert_eq!(concat(&expected.schema(), &chunks), expected);
}

#[test]
fn compressed_files_read_back() {
    for compression in [CompressionKind::Lz4, CompressionKind::Zstd] {
        let table = int_table(30_000, 2, true);
        let bytes = write_file(&table.schema(), &[table.clone()], 4000, compression);
        let chunks = drain(&mut chunked(&bytes, 60_000, 40_000, OrcReaderOptions::new()));
        assert!(chunks.len() > 1, "compression={compression:?}");
        assert_eq!(concat(&table.schema(), &chunks), table);
    }
}

#[test]
fn chunk_count_is_monotonic_and_deterministic() {
    let (table, bytes) = int_file(40_000, 2, true, 1000);
    let mut previous = 0;
    for limit in [0usize, 1_000_000, 330_000, 245_000, 165_000, 82_500, 50_000, 1] {
        let chunks = drain(&mut chunked(&bytes, limit, 0, OrcReaderOptions::new()));
        let again = drain(&mut chunked(&bytes, limit, 0, OrcReaderOptions::new()));
        assert_eq!(chunk_rows(&chunks), chunk_rows(&again), "limit={limit}");
        assert!(chunks.len() >= previous, "limit={limit}");
        previous = chunks.len();
        assert_eq!(concat(&table.schema(), &chunks), table);
    }
}

#[test]
fn reading_past_the_end_returns_empty_tables() {
    let (_, bytes) = int_file(100, 1, false, 100);
    let mut reader = chunked(&bytes, 0, 0, OrcReaderOptions::new());
    assert_eq!(reader.read_chunk().expect("read").table.num_rows(), 100);
    assert!(!reader.has_next().expect("has_next"));
    let extra = reader.read_chunk().expect("read past end");
    assert_eq!(extra.table.num_rows(), 0);
    assert_eq!(
        extra.table.column(0).as_any().downcast_ref::<Int32Array>().map(|a| a.len()),
        Some(0)
    );
}
