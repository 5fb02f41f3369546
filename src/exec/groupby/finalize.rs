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
//! Turn accumulated targets into result columns.

use std::sync::Arc;

use arrow::array::{Array, ArrayRef, AsArray, Float64Array, UInt32Array};
use arrow::compute::{cast, take};
use arrow::datatypes::{DataType, Float64Type, Int64Type};

use crate::common::status::{ColumnarError, Result};

use super::kinds::AggregationKind;
use super::target::AggregationTarget;

/// Gather one key row per group.
pub(crate) fn gather_keys(keys: &[ArrayRef], group_first_rows: &[u32]) -> Result<Vec<ArrayRef>> {
    let indices = UInt32Array::from(group_first_rows.to_vec());
    keys.iter()
        .map(|key| take(key.as_ref(), &indices, None).map_err(ColumnarError::from))
        .collect()
}

/// `sum / count_valid`; empty groups are null.
fn finish_mean(sum: &AggregationTarget, count: &AggregationTarget) -> Result<ArrayRef> {
    let sums = cast(sum.finish().as_ref(), &DataType::Float64)?;
    let sums = sums.as_primitive::<Float64Type>();
    let counts = count.finish();
    let counts = counts.as_primitive::<Int64Type>();
    let means: Float64Array = (0..sums.len())
        .map(|i| {
            let n = counts.value(i);
            (n > 0 && sums.is_valid(i)).then(|| sums.value(i) / n as f64)
        })
        .collect();
    Ok(Arc::new(means))
}

/// Build the result columns of one request from its slice of targets, which
/// hold `accumulated_kinds()` of each requested kind in order.
pub(crate) fn finish_request(
    kinds: &[AggregationKind],
    targets: &[AggregationTarget],
) -> Result<Vec<ArrayRef>> {
    let mut out = Vec::with_capacity(kinds.len());
    let mut next = 0;
    for kind in kinds {
        let width = kind.accumulated_kinds().len();
        let Some(parts) = targets.get(next..next + width) else {
            return Err(ColumnarError::invalid_argument(format!(
                "missing aggregation targets: kind={}, offset={}, targets={}",
                kind.name(),
                next,
                targets.len()
            )));
        };
        next += width;
        let column = match kind {
            AggregationKind::Mean => finish_mean(&parts[0], &parts[1])?,
            _ => parts[0].finish(),
        };
        out.push(column);
    }
    Ok(out)
}
