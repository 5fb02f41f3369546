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
//! Lock-free open-addressing set of representative row indices.
//!
//! Slots hold row indices; a key is represented by the first row whose
//! compare-and-swap claimed an empty slot. Probing is linear and bounded by
//! the table capacity. Equality is supplied by the caller, so the set never
//! owns key bytes.

use std::sync::atomic::{AtomicU32, Ordering};

pub const EMPTY_SLOT: u32 = u32::MAX;
const MIN_CAPACITY: usize = 16;

pub struct ConcurrentKeySet {
    slots: Box<[AtomicU32]>,
    mask: usize,
}

impl ConcurrentKeySet {
    /// Size the table for at most `max_keys` distinct keys at a load factor
    /// of one half.
    pub fn with_capacity_for(max_keys: usize) -> Self {
        let capacity = max_keys
            .saturating_mul(2)
            .max(MIN_CAPACITY)
            .next_power_of_two();
        let slots = (0..capacity)
            .map(|_| AtomicU32::new(EMPTY_SLOT))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            slots,
            mask: capacity - 1,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Return the representative row for `row`'s key, claiming a slot for
    /// `row` if the key is new. `None` means every slot was visited.
    pub fn insert_or_find(&self, row: u32, hash: u64, eq: impl Fn(u32, u32) -> bool) -> Option<u32> {
        let mut slot = hash as usize & self.mask;
        for _ in 0..self.slots.len() {
            let mut current = self.slots[slot].load(Ordering::Acquire);
            if current == EMPTY_SLOT {
                match self.slots[slot].compare_exchange(
                    EMPTY_SLOT,
                    row,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => return Some(row),
                    Err(winner) => current = winner,
                }
            }
            if eq(current, row) {
                return Some(current);
            }
            slot = (slot + 1) & self.mask;
        }
        None
    }

    pub fn find(&self, row: u32, hash: u64, eq: impl Fn(u32, u32) -> bool) -> Option<u32> {
        let mut slot = hash as usize & self.mask;
        for _ in 0..self.slots.len() {
            let current = self.slots[slot].load(Ordering::Acquire);
            if current == EMPTY_SLOT {
                return None;
            }
            if eq(current, row) {
                return Some(current);
            }
            slot = (slot + 1) & self.mask;
        }
        None
    }

    /// Claimed rows in ascending order.
    pub fn representatives(&self) -> Vec<u32> {
        let mut rows: Vec<u32> = self
            .slots
            .iter()
            .map(|s| s.load(Ordering::Acquire))
            .filter(|r| *r != EMPTY_SLOT)
            .collect();
        rows.sort_unstable();
        rows
    }
}
