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
//! Hash group-by aggregation.
//!
//! Responsibilities:
//! - Normalize key columns, assign groups and per-block mapping indices.
//! - Pick block-local or global accumulation per `can_use_shmem_aggs`.
//! - Produce one output row per distinct key, ordered by first occurrence.
//!
//! Current limitations:
//! - Aggregated values must be Int32, Int64, Float32 or Float64; the count
//!   kinds accept any type.

pub mod compute_aggregations;
mod finalize;
pub mod kinds;
pub mod mapping;
pub mod target;

use std::sync::Arc;

use arrow::array::{Array, ArrayRef};
use arrow::buffer::BooleanBuffer;
use arrow::datatypes::{Field, Schema};
use arrow::record_batch::RecordBatch;

use crate::common::app_config::GroupByConfig;
use crate::common::logging::debug;
use crate::common::status::{ColumnarError, Result};
use crate::exec::hash_table::RowKeys;

pub use crate::exec::hash_table::NullEquality;
pub use compute_aggregations::compute_aggregations;
pub use kinds::AggregationKind;
pub use mapping::{
    GROUPBY_CARDINALITY_THRESHOLD, GROUPBY_SHM_MAX_ELEMENTS, MappingIndices, can_use_shmem_aggs,
    compute_grid_size, compute_mapping_indices,
};
pub use target::AggregationTarget;

/// Whether rows with a null key component take part in grouping.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum NullPolicy {
    #[default]
    Include,
    Exclude,
}

#[derive(Clone, Debug)]
pub struct AggregationRequest {
    pub values: ArrayRef,
    pub aggregations: Vec<AggregationKind>,
}

impl AggregationRequest {
    pub fn new(values: ArrayRef, aggregations: Vec<AggregationKind>) -> Self {
        Self {
            values,
            aggregations,
        }
    }
}

#[derive(Clone, Debug)]
pub struct GroupByResult {
    /// One row per distinct key.
    pub keys: Vec<ArrayRef>,
    /// `results[i][j]` is aggregation `j` of request `i`.
    pub results: Vec<Vec<ArrayRef>>,
}

impl GroupByResult {
    pub fn num_groups(&self) -> usize {
        self.keys.first().map_or(0, |k| k.len())
    }

    /// Keys followed by every result column, named in that order.
    pub fn into_record_batch(self, names: &[&str]) -> Result<RecordBatch> {
        let columns: Vec<ArrayRef> = self
            .keys
            .into_iter()
            .chain(self.results.into_iter().flatten())
            .collect();
        if names.len() != columns.len() {
            return Err(ColumnarError::invalid_argument(format!(
                "group by result name count mismatch: names={}, columns={}",
                names.len(),
                columns.len()
            )));
        }
        let fields: Vec<Field> = names
            .iter()
            .zip(&columns)
            .map(|(name, col)| Field::new(*name, col.data_type().clone(), true))
            .collect();
        Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?)
    }
}

pub struct HashGroupBy {
    keys: Vec<ArrayRef>,
    null_policy: NullPolicy,
    null_equality: NullEquality,
    config: GroupByConfig,
}

impl HashGroupBy {
    pub fn new(
        keys: Vec<ArrayRef>,
        null_policy: NullPolicy,
        null_equality: NullEquality,
    ) -> Result<Self> {
        let Some(first) = keys.first() else {
            return Err(ColumnarError::invalid_argument(
                "group by requires at least one key",
            ));
        };
        let num_rows = first.len();
        if let Some((idx, key)) = keys.iter().enumerate().find(|(_, k)| k.len() != num_rows) {
            return Err(ColumnarError::invalid_argument(format!(
                "group key column row count mismatch: idx={}, expected_rows={}, actual_rows={}",
                idx,
                num_rows,
                key.len()
            )));
        }
        Ok(Self {
            keys,
            null_policy,
            null_equality,
            config: GroupByConfig::default(),
        })
    }

    pub fn with_config(mut self, config: &GroupByConfig) -> Self {
        self.config = config.clone();
        self
    }

    pub fn num_rows(&self) -> usize {
        self.keys.first().map_or(0, |k| k.len())
    }

    pub fn aggregate(&self, requests: &[AggregationRequest]) -> Result<GroupByResult> {
        let num_rows = self.num_rows();
        let mut kinds = Vec::new();
        let mut inputs = Vec::new();
        for (idx, request) in requests.iter().enumerate() {
            if request.values.len() != num_rows {
                return Err(ColumnarError::invalid_argument(format!(
                    "aggregation values row count mismatch: request={}, expected_rows={}, actual_rows={}",
                    idx,
                    num_rows,
                    request.values.len()
                )));
            }
            for kind in &request.aggregations {
                kind.output_type(request.values.data_type())?;
                for accumulated in kind.accumulated_kinds() {
                    kinds.push(*accumulated);
                    inputs.push(Arc::clone(&request.values));
                }
            }
        }

        let row_keys = RowKeys::try_new(&self.keys, self.null_equality)?;
        let skip_rows_with_nulls = self.null_policy == NullPolicy::Exclude;
        let row_bitmask = skip_rows_with_nulls
            .then(|| BooleanBuffer::collect_bool(num_rows, |row| !row_keys.row_has_null(row)));

        let grid_size = compute_grid_size(num_rows, &self.config);
        let mapping = compute_mapping_indices(&row_keys, grid_size, row_bitmask.as_ref())?;
        let num_groups = mapping.num_groups();

        let targets = kinds
            .iter()
            .zip(&inputs)
            .map(|(kind, values)| AggregationTarget::new(*kind, values.data_type(), num_groups))
            .collect::<Result<Vec<_>>>()?;
        let output_types: Vec<_> = targets.iter().map(|t| t.output_type().clone()).collect();
        let (use_shmem, available) =
            can_use_shmem_aggs(grid_size, self.config.shared_memory_per_block, &output_types);
        let shared_mem_size = if use_shmem { available } else { 0 };
        debug!(
            "hash group by: rows={}, groups={}, grid_size={}, targets={}, block_local={}, fallback_blocks={}",
            num_rows,
            num_groups,
            grid_size,
            targets.len(),
            use_shmem,
            (0..grid_size).filter(|b| mapping.block_fell_back(*b)).count()
        );

        compute_aggregations(
            grid_size,
            num_rows,
            row_bitmask.as_ref(),
            skip_rows_with_nulls,
            &mapping.local_mapping_index,
            &mapping.global_mapping_index,
            &mapping.block_cardinality,
            &inputs,
            &targets,
            &kinds,
            shared_mem_size,
        )?;

        let keys = finalize::gather_keys(&self.keys, &mapping.group_first_rows)?;
        let mut results = Vec::with_capacity(requests.len());
        let mut offset = 0;
        for request in requests {
            let width: usize = request
                .aggregations
                .iter()
                .map(|k| k.accumulated_kinds().len())
                .sum();
            results.push(finalize::finish_request(
                &request.aggregations,
                &targets[offset..offset + width],
            )?);
            offset += width;
        }
        Ok(GroupByResult { keys, results })
    }
}
