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
use arrow::datatypes::DataType;

use crate::common::status::{ColumnarError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AggregationKind {
    Sum,
    Product,
    SumOfSquares,
    Min,
    Max,
    /// Non-null values per group.
    CountValid,
    /// Rows per group, nulls included.
    CountAll,
    /// Row index of the smallest value; ties resolve to the smaller row.
    ArgMin,
    /// Row index of the largest value; ties resolve to the smaller row.
    ArgMax,
    Mean,
}

fn is_integer(data_type: &DataType) -> bool {
    matches!(data_type, DataType::Int32 | DataType::Int64)
}

fn is_float(data_type: &DataType) -> bool {
    matches!(data_type, DataType::Float32 | DataType::Float64)
}

impl AggregationKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Sum => "sum",
            Self::Product => "product",
            Self::SumOfSquares => "sum_of_squares",
            Self::Min => "min",
            Self::Max => "max",
            Self::CountValid => "count_valid",
            Self::CountAll => "count_all",
            Self::ArgMin => "argmin",
            Self::ArgMax => "argmax",
            Self::Mean => "mean",
        }
    }

    /// Result column type for values of `input`.
    pub fn output_type(&self, input: &DataType) -> Result<DataType> {
        let numeric = is_integer(input) || is_float(input);
        let out = match self {
            Self::CountValid | Self::CountAll => Some(DataType::Int64),
            Self::Sum | Self::Product | Self::SumOfSquares if is_integer(input) => {
                Some(DataType::Int64)
            }
            Self::Sum | Self::Product | Self::SumOfSquares if is_float(input) => {
                Some(DataType::Float64)
            }
            Self::Min | Self::Max if numeric => Some(input.clone()),
            Self::ArgMin | Self::ArgMax if numeric => Some(DataType::Int32),
            Self::Mean if numeric => Some(DataType::Float64),
            _ => None,
        };
        out.ok_or_else(|| {
            ColumnarError::invalid_argument(format!(
                "unsupported aggregation for value type: aggregation={}, data_type={}",
                self.name(),
                input
            ))
        })
    }

    /// Accumulated kinds backing this aggregation. Mean is kept as a sum and
    /// a count and divided when results are built.
    pub(crate) fn accumulated_kinds(&self) -> &'static [AggregationKind] {
        match self {
            Self::Sum => &[Self::Sum],
            Self::Product => &[Self::Product],
            Self::SumOfSquares => &[Self::SumOfSquares],
            Self::Min => &[Self::Min],
            Self::Max => &[Self::Max],
            Self::CountValid => &[Self::CountValid],
            Self::CountAll => &[Self::CountAll],
            Self::ArgMin => &[Self::ArgMin],
            Self::ArgMax => &[Self::ArgMax],
            Self::Mean => &[Self::Sum, Self::CountValid],
        }
    }
}
