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
//! Row-to-group mapping for block-parallel aggregation.
//!
//! Responsibilities:
//! - Assign every input row a dense global group index through the shared
//!   `ConcurrentKeySet`, ordered by first occurrence of each key.
//! - Split rows into `grid_size` contiguous blocks and build a small local key
//!   table per block, translating local slots to global group indices.
//! - Report per-block cardinality; a block whose distinct keys reach
//!   `GROUPBY_CARDINALITY_THRESHOLD` falls back and its rows carry global
//!   indices directly.

use std::sync::atomic::{AtomicU32, Ordering};

use arrow::buffer::BooleanBuffer;
use arrow::datatypes::DataType;
use rayon::prelude::*;

use crate::common::app_config::GroupByConfig;
use crate::common::status::{ColumnarError, Result};
use crate::exec::hash_table::{ConcurrentKeySet, RowKeys};

/// Dense local slots a block may use before it falls back to global targets.
pub const GROUPBY_CARDINALITY_THRESHOLD: usize = 128;
/// Hash slots in one block-local key table.
pub const GROUPBY_SHM_MAX_ELEMENTS: usize = 256;
/// Mapping entry of a skipped row or an unused local slot.
pub const UNMAPPED: i32 = -1;

const LOCAL_EMPTY: u32 = u32::MAX;

/// Number of blocks used for `num_rows` input rows.
pub fn compute_grid_size(num_rows: usize, config: &GroupByConfig) -> usize {
    num_rows
        .div_ceil(config.block_rows.max(1))
        .clamp(1, config.max_grid_size.max(1))
}

/// Input rows owned by `block`.
pub fn block_row_range(block: usize, grid_size: usize, num_rows: usize) -> std::ops::Range<usize> {
    let per_block = num_rows.div_ceil(grid_size.max(1)).max(1);
    let start = (block * per_block).min(num_rows);
    let end = (start + per_block).min(num_rows);
    start..end
}

/// Whether block-local partial aggregation fits in `shared_memory_per_block`.
/// Returns the decision and the bytes available to one block.
pub fn can_use_shmem_aggs(
    grid_size: usize,
    shared_memory_per_block: usize,
    output_types: &[DataType],
) -> (bool, usize) {
    if grid_size == 0 {
        return (false, 0);
    }
    // Slots are laid out 8-byte aligned.
    let available = shared_memory_per_block & !7;
    let per_slot: usize = output_types
        .iter()
        .map(|t| t.primitive_width().unwrap_or(8) + 1)
        .sum();
    let required = per_slot * GROUPBY_CARDINALITY_THRESHOLD;
    (required <= available, available)
}

#[derive(Debug)]
pub struct MappingIndices {
    pub grid_size: usize,
    /// Per input row: the block-local slot, the global group index when the
    /// block fell back, or `UNMAPPED`.
    pub local_mapping_index: Vec<i32>,
    /// `grid_size * GROUPBY_CARDINALITY_THRESHOLD` entries translating
    /// block-local slots to global group indices.
    pub global_mapping_index: Vec<i32>,
    pub block_cardinality: Vec<usize>,
    /// First row of every group, in group index order.
    pub group_first_rows: Vec<u32>,
}

impl MappingIndices {
    pub fn num_groups(&self) -> usize {
        self.group_first_rows.len()
    }

    pub fn block_fell_back(&self, block: usize) -> bool {
        self.block_cardinality[block] >= GROUPBY_CARDINALITY_THRESHOLD
    }
}

/// Block-local open addressing table over representative rows.
struct LocalKeyTable {
    rows: [u32; GROUPBY_SHM_MAX_ELEMENTS],
    slots: [u16; GROUPBY_SHM_MAX_ELEMENTS],
    cardinality: usize,
}

impl LocalKeyTable {
    fn new() -> Self {
        Self {
            rows: [LOCAL_EMPTY; GROUPBY_SHM_MAX_ELEMENTS],
            slots: [0; GROUPBY_SHM_MAX_ELEMENTS],
            cardinality: 0,
        }
    }

    /// Local slot of `row`'s key, claiming a new slot for unseen keys.
    /// `None` once the table holds the threshold number of keys.
    fn insert_or_find(
        &mut self,
        row: u32,
        hash: u64,
        eq: impl Fn(u32, u32) -> bool,
    ) -> Option<usize> {
        let mask = GROUPBY_SHM_MAX_ELEMENTS - 1;
        // Upper bits, so local probing is independent of global placement.
        let mut pos = (hash >> 32) as usize & mask;
        for _ in 0..GROUPBY_SHM_MAX_ELEMENTS {
            let current = self.rows[pos];
            if current == LOCAL_EMPTY {
                if self.cardinality + 1 >= GROUPBY_CARDINALITY_THRESHOLD {
                    return None;
                }
                self.rows[pos] = row;
                self.slots[pos] = self.cardinality as u16;
                self.cardinality += 1;
                return Some(self.cardinality - 1);
            }
            if eq(current, row) {
                return Some(self.slots[pos] as usize);
            }
            pos = (pos + 1) & mask;
        }
        None
    }
}

/// Rows excluded from grouping: null rows of `row_bitmask` when skipping.
fn row_skipped(row_bitmask: Option<&BooleanBuffer>, row: usize) -> bool {
    row_bitmask.is_some_and(|mask| !mask.value(row))
}

/// Assign dense global group indices ordered by first occurrence.
fn assign_global_groups(
    keys: &RowKeys,
    row_bitmask: Option<&BooleanBuffer>,
) -> Result<(Vec<i32>, Vec<u32>)> {
    let num_rows = keys.len();
    let set = ConcurrentKeySet::with_capacity_for(num_rows);
    let eq = |a: u32, b: u32| keys.keys_equal(a as usize, b as usize);

    let representatives = (0..num_rows)
        .into_par_iter()
        .map(|row| {
            if row_skipped(row_bitmask, row) {
                return Ok(None);
            }
            set.insert_or_find(row as u32, keys.hash(row), eq)
                .map(Some)
                .ok_or_else(|| {
                    ColumnarError::corruption(format!(
                        "group key set exhausted: rows={}, capacity={}",
                        num_rows,
                        set.capacity()
                    ))
                })
        })
        .collect::<Result<Vec<Option<u32>>>>()?;

    // The representative is whichever row won the slot; the group is
    // ordered by its smallest row instead.
    let first_row: Vec<AtomicU32> = (0..num_rows).map(|_| AtomicU32::new(u32::MAX)).collect();
    representatives
        .par_iter()
        .enumerate()
        .for_each(|(row, rep)| {
            if let Some(rep) = rep {
                first_row[*rep as usize].fetch_min(row as u32, Ordering::AcqRel);
            }
        });

    let mut reps = set.representatives();
    reps.sort_unstable_by_key(|rep| first_row[*rep as usize].load(Ordering::Acquire));
    let mut group_of_rep = vec![UNMAPPED; num_rows];
    let mut group_first_rows = Vec::with_capacity(reps.len());
    for (group, rep) in reps.iter().enumerate() {
        group_of_rep[*rep as usize] = group as i32;
        group_first_rows.push(first_row[*rep as usize].load(Ordering::Acquire));
    }

    let row_groups = representatives
        .iter()
        .map(|rep| rep.map_or(UNMAPPED, |r| group_of_rep[r as usize]))
        .collect();
    Ok((row_groups, group_first_rows))
}

/// Build per-row local indices, per-block local to global translation and
/// per-block cardinality for `grid_size` blocks.
pub fn compute_mapping_indices(
    keys: &RowKeys,
    grid_size: usize,
    row_bitmask: Option<&BooleanBuffer>,
) -> Result<MappingIndices> {
    if grid_size == 0 {
        return Err(ColumnarError::invalid_argument("grid_size must be positive"));
    }
    if let Some(mask) = row_bitmask
        && mask.len() != keys.len()
    {
        return Err(ColumnarError::invalid_argument(format!(
            "row bitmask length mismatch: rows={}, bitmask_len={}",
            keys.len(),
            mask.len()
        )));
    }
    let num_rows = keys.len();
    let (row_groups, group_first_rows) = assign_global_groups(keys, row_bitmask)?;

    let eq = |a: u32, b: u32| keys.keys_equal(a as usize, b as usize);
    let per_block: Vec<(Vec<i32>, Vec<i32>, usize)> = (0..grid_size)
        .into_par_iter()
        .map(|block| {
            let range = block_row_range(block, grid_size, num_rows);
            let mut local = Vec::with_capacity(range.len());
            let mut slot_groups = vec![UNMAPPED; GROUPBY_CARDINALITY_THRESHOLD];
            let mut table = LocalKeyTable::new();
            let mut fell_back = false;
            for row in range.clone() {
                if row_groups[row] == UNMAPPED {
                    local.push(UNMAPPED);
                    continue;
                }
                match table.insert_or_find(row as u32, keys.hash(row), eq) {
                    Some(slot) => {
                        slot_groups[slot] = row_groups[row];
                        local.push(slot as i32);
                    }
                    None => {
                        fell_back = true;
                        break;
                    }
                }
            }
            if fell_back {
                let local = row_groups[range].to_vec();
                return (
                    local,
                    vec![UNMAPPED; GROUPBY_CARDINALITY_THRESHOLD],
                    GROUPBY_CARDINALITY_THRESHOLD,
                );
            }
            (local, slot_groups, table.cardinality)
        })
        .collect();

    let mut local_mapping_index = Vec::with_capacity(num_rows);
    let mut global_mapping_index = Vec::with_capacity(grid_size * GROUPBY_CARDINALITY_THRESHOLD);
    let mut block_cardinality = Vec::with_capacity(grid_size);
    for (local, global, cardinality) in per_block {
        local_mapping_index.extend(local);
        global_mapping_index.extend(global);
        block_cardinality.push(cardinality);
    }

    Ok(MappingIndices {
        grid_size,
        local_mapping_index,
        global_mapping_index,
        block_cardinality,
        group_first_rows,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow::array::{ArrayRef, Int64Array};

    use super::*;
    use crate::exec::hash_table::NullEquality;

    fn row_keys(values: Vec<Option<i64>>) -> RowKeys {
        let keys: Vec<ArrayRef> = vec![Arc::new(Int64Array::from(values))];
        RowKeys::try_new(&keys, NullEquality::Equal).expect("keys")
    }

    #[test]
    fn grid_size_is_clamped() {
        let cfg = GroupByConfig {
            shared_memory_per_block: 1024,
            block_rows: 100,
            max_grid_size: 4,
        };
        assert_eq!(compute_grid_size(0, &cfg), 1);
        assert_eq!(compute_grid_size(250, &cfg), 3);
        assert_eq!(compute_grid_size(10_000, &cfg), 4);
    }

    #[test]
    fn block_ranges_cover_rows() {
        let ranges: Vec<_> = (0..3).map(|b| block_row_range(b, 3, 7)).collect();
        assert_eq!(ranges, vec![0..3, 3..6, 6..7]);
        assert_eq!(block_row_range(3, 4, 3), 3..3);
    }

    #[test]
    fn groups_follow_first_occurrence() {
        let keys = row_keys(vec![Some(9), Some(4), Some(9), Some(7), Some(4)]);
        let mapping = compute_mapping_indices(&keys, 2, None).expect("mapping");
        assert_eq!(mapping.group_first_rows, vec![0, 1, 3]);
        assert_eq!(mapping.block_cardinality, vec![2, 2]);
        // block 0 holds rows 0..3, block 1 rows 3..5
        assert_eq!(mapping.local_mapping_index, vec![0, 1, 0, 0, 1]);
        let t = GROUPBY_CARDINALITY_THRESHOLD;
        assert_eq!(&mapping.global_mapping_index[..2], &[0, 1]);
        assert_eq!(&mapping.global_mapping_index[t..t + 2], &[2, 1]);
    }

    #[test]
    fn skipped_rows_are_unmapped() {
        let keys = row_keys(vec![Some(1), None, Some(1)]);
        let mask = BooleanBuffer::from(vec![true, false, true]);
        let mapping = compute_mapping_indices(&keys, 1, Some(&mask)).expect("mapping");
        assert_eq!(mapping.local_mapping_index, vec![0, UNMAPPED, 0]);
        assert_eq!(mapping.num_groups(), 1);
    }

    #[test]
    fn high_cardinality_block_falls_back() {
        let n = GROUPBY_CARDINALITY_THRESHOLD * 2;
        let keys = row_keys((0..n as i64).map(Some).collect());
        let mapping = compute_mapping_indices(&keys, 1, None).expect("mapping");
        assert!(mapping.block_fell_back(0));
        assert_eq!(mapping.num_groups(), n);
        let expected: Vec<i32> = (0..n as i32).collect();
        assert_eq!(mapping.local_mapping_index, expected);
        assert!(mapping.global_mapping_index.iter().all(|g| *g == UNMAPPED));
    }

    #[test]
    fn shmem_decision_depends_on_types() {
        let types = vec![DataType::Int64, DataType::Float64];
        let (ok, available) = can_use_shmem_aggs(4, 48 * 1024, &types);
        assert!(ok);
        assert_eq!(available, 48 * 1024);
        let (ok, _) = can_use_shmem_aggs(4, 1000, &types);
        assert!(!ok);
        assert!(!can_use_shmem_aggs(0, 48 * 1024, &types).0);
    }
}
