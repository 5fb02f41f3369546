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
//! Normalized group keys.
//!
//! Key columns are converted into arrow row format so multi-column keys of any
//! supported type compare and hash as byte strings.

use arrow::array::{Array, ArrayRef};
use arrow::row::{RowConverter, Rows, SortField};

use crate::common::status::{ColumnarError, Result};

use super::hash::{KEY_HASH_SEED, combine_hash, hash_bytes_with_seed, hash_u64_with_seed};

/// Whether two null key components compare equal.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum NullEquality {
    #[default]
    Equal,
    /// Every row with a null key component forms its own group.
    Unequal,
}

pub struct RowKeys {
    rows: Rows,
    hashes: Vec<u64>,
    /// Per row, whether any key component is null.
    has_null: Vec<bool>,
    null_equality: NullEquality,
}

impl RowKeys {
    pub fn try_new(keys: &[ArrayRef], null_equality: NullEquality) -> Result<Self> {
        let Some(first) = keys.first() else {
            return Err(ColumnarError::invalid_argument("group by requires at least one key"));
        };
        let num_rows = first.len();
        for (idx, key) in keys.iter().enumerate() {
            if key.len() != num_rows {
                return Err(ColumnarError::invalid_argument(format!(
                    "group key column row count mismatch: idx={}, expected_rows={}, actual_rows={}",
                    idx,
                    num_rows,
                    key.len()
                )));
            }
        }
        let fields = keys
            .iter()
            .map(|k| SortField::new(k.data_type().clone()))
            .collect::<Vec<_>>();
        let converter = RowConverter::new(fields)?;
        let rows = converter.convert_columns(keys)?;

        let mut has_null = vec![false; num_rows];
        for key in keys {
            if let Some(nulls) = key.logical_nulls() {
                for (row, flag) in has_null.iter_mut().enumerate() {
                    *flag |= nulls.is_null(row);
                }
            }
        }

        let hashes = (0..num_rows)
            .map(|row| {
                let hash = hash_bytes_with_seed(KEY_HASH_SEED, rows.row(row).as_ref());
                if null_equality == NullEquality::Unequal && has_null[row] {
                    combine_hash(hash, hash_u64_with_seed(KEY_HASH_SEED, row as u64))
                } else {
                    hash
                }
            })
            .collect();

        Ok(Self {
            rows,
            hashes,
            has_null,
            null_equality,
        })
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    pub fn hash(&self, row: usize) -> u64 {
        self.hashes[row]
    }

    pub fn row_has_null(&self, row: usize) -> bool {
        self.has_null[row]
    }

    pub fn keys_equal(&self, a: usize, b: usize) -> bool {
        if a == b {
            return true;
        }
        if self.null_equality == NullEquality::Unequal && (self.has_null[a] || self.has_null[b]) {
            return false;
        }
        self.rows.row(a) == self.rows.row(b)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow::array::{Int32Array, StringArray};

    use super::*;

    fn keys() -> Vec<ArrayRef> {
        vec![
            Arc::new(Int32Array::from(vec![Some(1), Some(1), None, None, Some(1)])),
            Arc::new(StringArray::from(vec!["a", "a", "b", "b", "c"])),
        ]
    }

    #[test]
    fn multi_column_equality() {
        let rows = RowKeys::try_new(&keys(), NullEquality::Equal).expect("rows");
        assert!(rows.keys_equal(0, 1));
        assert_eq!(rows.hash(0), rows.hash(1));
        assert!(!rows.keys_equal(0, 4));
        assert!(rows.keys_equal(2, 3));
        assert!(rows.row_has_null(2));
    }

    #[test]
    fn unequal_nulls_split_groups() {
        let rows = RowKeys::try_new(&keys(), NullEquality::Unequal).expect("rows");
        assert!(!rows.keys_equal(2, 3));
        assert!(rows.keys_equal(2, 2));
        assert!(rows.keys_equal(0, 1));
    }

    #[test]
    fn length_mismatch_rejected() {
        let keys: Vec<ArrayRef> = vec![
            Arc::new(Int32Array::from(vec![1, 2])),
            Arc::new(Int32Array::from(vec![1])),
        ];
        assert!(
            RowKeys::try_new(&keys, NullEquality::Equal)
                .err()
                .is_some_and(|e| e.is_invalid_argument())
        );
    }
}
