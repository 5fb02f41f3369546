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
//! Output chunk planning from per-segment row bit counts.

use arrow::array::{Array, AsArray, RecordBatch};
use arrow::datatypes::DataType;

use super::chunking::{ChunkRange, CumulativeSize, find_splits, inclusive_prefix_sums};

/// Bits per row for a string or list offset.
const OFFSET_BITS: u64 = 32;

/// Bits occupied by rows `[start, end)` of `array`, counting one validity bit
/// per row when the field is nullable.
pub fn segment_row_bits(array: &dyn Array, nullable: bool, start: usize, end: usize) -> u64 {
    let rows = (end - start) as u64;
    let validity = if nullable { rows } else { 0 };
    let values = match array.data_type() {
        DataType::Boolean => rows,
        DataType::Utf8 => {
            let offsets = array.as_string::<i32>().value_offsets();
            OFFSET_BITS * rows + 8 * (offsets[end] - offsets[start]) as u64
        }
        DataType::List(element) => {
            let list = array.as_list::<i32>();
            let offsets = list.value_offsets();
            OFFSET_BITS * rows
                + segment_row_bits(
                    list.values().as_ref(),
                    element.is_nullable(),
                    offsets[start] as usize,
                    offsets[end] as usize,
                )
        }
        DataType::Struct(fields) => array
            .as_struct()
            .columns()
            .iter()
            .zip(fields.iter())
            .map(|(child, field)| segment_row_bits(child.as_ref(), field.is_nullable(), start, end))
            .sum(),
        other => other.primitive_width().map_or(0, |w| w as u64 * 8) * rows,
    };
    validity + values
}

/// Split `table` into row ranges whose byte cost stays within
/// `output_size_limit`. Rows are costed in segments of `granularity` rows;
/// a chunk never splits a segment.
pub fn compute_output_chunks(
    table: &RecordBatch,
    output_size_limit: usize,
    granularity: usize,
) -> Vec<ChunkRange> {
    let num_rows = table.num_rows();
    if output_size_limit == 0 || num_rows == 0 {
        return vec![ChunkRange::new(0, num_rows)];
    }
    let schema = table.schema();
    let granularity = granularity.max(1);
    let segments = (0..num_rows).step_by(granularity).map(|start| {
        let end = (start + granularity).min(num_rows);
        let bits: u64 = table
            .columns()
            .iter()
            .zip(schema.fields())
            .map(|(column, field)| segment_row_bits(column.as_ref(), field.is_nullable(), start, end))
            .sum();
        CumulativeSize::new(end - start, bits.div_ceil(8) as usize)
    });
    find_splits(&inclusive_prefix_sums(segments), num_rows, output_size_limit)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow::array::{ArrayRef, Int32Array, Int64Array, ListArray, StringArray};
    use arrow::datatypes::{Field, Int32Type, Schema};

    use super::*;

    fn two_int_columns(rows: i32, nullable: bool) -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("a", DataType::Int32, nullable),
            Field::new("b", DataType::Int64, nullable),
        ]));
        let a: ArrayRef = Arc::new(Int32Array::from_iter_values(0..rows));
        let b: ArrayRef = Arc::new(Int64Array::from_iter_values((0..rows).map(i64::from)));
        RecordBatch::try_new(schema, vec![a, b]).expect("batch")
    }

    #[test]
    fn fixed_width_segments() {
        let table = two_int_columns(40_000, false);
        assert_eq!(compute_output_chunks(&table, 245_000, 10_000).len(), 2);
        assert_eq!(compute_output_chunks(&table, 0, 10_000).len(), 1);
        assert_eq!(compute_output_chunks(&table, 1, 10_000).len(), 4);

        // 98 bits per row with validity: 122,500 bytes per segment, an exact fit.
        let nullable = two_int_columns(40_000, true);
        assert_eq!(compute_output_chunks(&nullable, 245_000, 10_000).len(), 2);
    }

    #[test]
    fn string_and_list_bits() {
        let strings = StringArray::from(vec!["ab", "", "xyz"]);
        assert_eq!(segment_row_bits(&strings, false, 0, 3), 3 * 32 + 5 * 8);
        assert_eq!(segment_row_bits(&strings, true, 1, 3), 2 * 32 + 3 * 8 + 2);

        let list = ListArray::from_iter_primitive::<Int32Type, _, _>(vec![
            Some(vec![Some(1), Some(2)]),
            None,
            Some(vec![Some(3)]),
        ]);
        // 3 offsets + 3 nullable int32 elements + one validity bit per list row
        assert_eq!(segment_row_bits(&list, true, 0, 3), 3 * 32 + 3 * 33 + 3);
        assert_eq!(segment_row_bits(&list, false, 2, 3), 32 + 33);
    }

    #[test]
    fn sliced_tables_cost_visible_rows() {
        let table = two_int_columns(40_000, false).slice(5_000, 20_000);
        let chunks = compute_output_chunks(&table, 120_000, 10_000);
        assert_eq!(chunks, vec![ChunkRange::new(0, 10_000), ChunkRange::new(10_000, 10_000)]);
    }

    #[test]
    fn empty_table_is_one_empty_chunk() {
        let table = two_int_columns(0, false);
        assert_eq!(compute_output_chunks(&table, 1, 10_000), vec![ChunkRange::new(0, 0)]);
    }
}
