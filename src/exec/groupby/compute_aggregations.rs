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
//! Block-parallel aggregation over precomputed mapping indices.
//!
//! Each block is one rayon task. Blocks below the cardinality threshold
//! accumulate into block-local targets when `shared_mem_size` is non-zero and
//! merge every local slot into the global targets once. All other blocks
//! update the global targets row by row.

use arrow::array::ArrayRef;
use arrow::buffer::BooleanBuffer;
use rayon::prelude::*;

use crate::common::status::{ColumnarError, Result};

use super::kinds::AggregationKind;
use super::mapping::{GROUPBY_CARDINALITY_THRESHOLD, UNMAPPED, block_row_range};
use super::target::{AggregationTarget, ValueView};

#[allow(clippy::too_many_arguments)]
pub fn compute_aggregations(
    grid_size: usize,
    num_input_rows: usize,
    row_bitmask: Option<&BooleanBuffer>,
    skip_rows_with_nulls: bool,
    local_mapping_index: &[i32],
    global_mapping_index: &[i32],
    block_cardinality: &[usize],
    input_values: &[ArrayRef],
    output_values: &[AggregationTarget],
    aggregation_kinds: &[AggregationKind],
    shared_mem_size: usize,
) -> Result<()> {
    if local_mapping_index.len() != num_input_rows
        || block_cardinality.len() != grid_size
        || global_mapping_index.len() != grid_size * GROUPBY_CARDINALITY_THRESHOLD
    {
        return Err(ColumnarError::invalid_argument(format!(
            "mapping index size mismatch: rows={}, grid_size={}, local_len={}, global_len={}, cardinality_len={}",
            num_input_rows,
            grid_size,
            local_mapping_index.len(),
            global_mapping_index.len(),
            block_cardinality.len()
        )));
    }
    if input_values.len() != output_values.len() || aggregation_kinds.len() != output_values.len()
    {
        return Err(ColumnarError::invalid_argument(format!(
            "aggregation column count mismatch: inputs={}, outputs={}, kinds={}",
            input_values.len(),
            output_values.len(),
            aggregation_kinds.len()
        )));
    }
    for (idx, ((values, target), kind)) in input_values
        .iter()
        .zip(output_values)
        .zip(aggregation_kinds)
        .enumerate()
    {
        if values.len() != num_input_rows
            || target.kind() != *kind
            || values.data_type() != target.input_type()
        {
            return Err(ColumnarError::invalid_argument(format!(
                "aggregation column mismatch: idx={}, kind={}, target_kind={}, rows={}, data_type={}",
                idx,
                kind.name(),
                target.kind().name(),
                values.len(),
                values.data_type()
            )));
        }
    }

    let views: Vec<ValueView<'_>> = input_values.iter().map(ValueView::new).collect();
    let skip_row = |row: usize| {
        skip_rows_with_nulls && row_bitmask.is_some_and(|mask| !mask.value(row))
    };

    (0..grid_size).into_par_iter().try_for_each(|block| {
        let rows = block_row_range(block, grid_size, num_input_rows);
        let cardinality = block_cardinality[block];
        let fell_back = cardinality >= GROUPBY_CARDINALITY_THRESHOLD;
        let slot_base = block * GROUPBY_CARDINALITY_THRESHOLD;

        if shared_mem_size > 0 && !fell_back {
            let locals = output_values
                .iter()
                .map(|t| AggregationTarget::new(t.kind(), t.input_type(), cardinality))
                .collect::<Result<Vec<_>>>()?;
            for row in rows {
                let slot = local_mapping_index[row];
                if slot == UNMAPPED || skip_row(row) {
                    continue;
                }
                for (local, view) in locals.iter().zip(&views) {
                    local.update(slot as usize, view, row);
                }
            }
            for slot in 0..cardinality {
                let group = global_mapping_index[slot_base + slot];
                if group == UNMAPPED {
                    continue;
                }
                for ((global, local), view) in output_values.iter().zip(&locals).zip(&views) {
                    global.merge(group as usize, local, slot, view);
                }
            }
            return Ok(());
        }

        for row in rows {
            let slot = local_mapping_index[row];
            if slot == UNMAPPED || skip_row(row) {
                continue;
            }
            let group = if fell_back {
                slot
            } else {
                global_mapping_index[slot_base + slot as usize]
            };
            if group == UNMAPPED {
                continue;
            }
            for (global, view) in output_values.iter().zip(&views) {
                global.update(group as usize, view, row);
            }
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow::array::{AsArray, Int32Array, Int64Array};
    use arrow::datatypes::{DataType, Int64Type};

    use super::*;
    use crate::exec::groupby::mapping::compute_mapping_indices;
    use crate::exec::hash_table::{NullEquality, RowKeys};

    fn run(shared_mem_size: usize, grid_size: usize) -> Vec<i64> {
        let keys: Vec<ArrayRef> = vec![Arc::new(Int32Array::from(
            (0..1000).map(|i| i % 7).collect::<Vec<i32>>(),
        ))];
        let values: ArrayRef = Arc::new(Int64Array::from((0..1000i64).collect::<Vec<_>>()));
        let row_keys = RowKeys::try_new(&keys, NullEquality::Equal).expect("keys");
        let mapping = compute_mapping_indices(&row_keys, grid_size, None).expect("mapping");
        let target =
            AggregationTarget::new(AggregationKind::Sum, &DataType::Int64, mapping.num_groups())
                .expect("target");
        compute_aggregations(
            grid_size,
            1000,
            None,
            false,
            &mapping.local_mapping_index,
            &mapping.global_mapping_index,
            &mapping.block_cardinality,
            &[values],
            std::slice::from_ref(&target),
            &[AggregationKind::Sum],
            shared_mem_size,
        )
        .expect("aggregate");
        let out = target.finish();
        out.as_primitive::<Int64Type>().values().to_vec()
    }

    #[test]
    fn shared_and_global_paths_agree() {
        let expected: Vec<i64> = (0..7i64)
            .map(|k| (0..1000i64).filter(|v| v % 7 == k).sum())
            .collect();
        assert_eq!(run(0, 1), expected);
        assert_eq!(run(0, 8), expected);
        assert_eq!(run(48 * 1024, 8), expected);
    }

    #[test]
    fn mismatched_kinds_are_rejected() {
        let values: ArrayRef = Arc::new(Int64Array::from(vec![1i64]));
        let target = AggregationTarget::new(AggregationKind::Max, &DataType::Int64, 1)
            .expect("target");
        let err = compute_aggregations(
            1,
            1,
            None,
            false,
            &[0],
            &vec![UNMAPPED; GROUPBY_CARDINALITY_THRESHOLD],
            &[1],
            &[values],
            std::slice::from_ref(&target),
            &[AggregationKind::Min],
            0,
        )
        .expect_err("kind mismatch");
        assert!(err.is_invalid_argument());
    }
}
