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
//! Atomic per-group accumulators.
//!
//! One `AggregationTarget` holds one accumulated kind for every group slot.
//! Updates from concurrently running blocks go through atomic
//! read-modify-write operations, so block order never changes a result.
//! Floating point values are stored as raw bits in unsigned atomics.

use std::cmp::Ordering as CmpOrdering;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicI64, AtomicU32, AtomicU64, Ordering};

use arrow::array::{
    Array, ArrayRef, AsArray, Float32Array, Float64Array, Int32Array, Int64Array,
};
use arrow::buffer::NullBuffer;
use arrow::datatypes::{DataType, Float32Type, Float64Type, Int32Type, Int64Type};

use crate::common::status::{ColumnarError, Result};

use super::kinds::AggregationKind;

/// Typed view over an aggregation input column.
#[derive(Clone, Copy)]
pub(crate) enum ValueView<'a> {
    Int32(&'a Int32Array),
    Int64(&'a Int64Array),
    Float32(&'a Float32Array),
    Float64(&'a Float64Array),
    /// Only validity is read; used by the count kinds.
    Other(&'a dyn Array),
}

impl<'a> ValueView<'a> {
    pub(crate) fn new(array: &'a ArrayRef) -> Self {
        match array.data_type() {
            DataType::Int32 => Self::Int32(array.as_primitive::<Int32Type>()),
            DataType::Int64 => Self::Int64(array.as_primitive::<Int64Type>()),
            DataType::Float32 => Self::Float32(array.as_primitive::<Float32Type>()),
            DataType::Float64 => Self::Float64(array.as_primitive::<Float64Type>()),
            _ => Self::Other(array.as_ref()),
        }
    }

    fn is_valid(&self, row: usize) -> bool {
        match self {
            Self::Int32(a) => a.is_valid(row),
            Self::Int64(a) => a.is_valid(row),
            Self::Float32(a) => a.is_valid(row),
            Self::Float64(a) => a.is_valid(row),
            Self::Other(a) => a.is_valid(row),
        }
    }

    fn int_value(&self, row: usize) -> i64 {
        match self {
            Self::Int32(a) => a.value(row) as i64,
            Self::Int64(a) => a.value(row),
            _ => 0,
        }
    }

    fn float_value(&self, row: usize) -> f64 {
        match self {
            Self::Float32(a) => a.value(row) as f64,
            Self::Float64(a) => a.value(row),
            Self::Int32(a) => a.value(row) as f64,
            Self::Int64(a) => a.value(row) as f64,
            Self::Other(_) => 0.0,
        }
    }

    /// Total order over two valid rows; floats use IEEE total ordering.
    fn compare(&self, a: usize, b: usize) -> CmpOrdering {
        match self {
            Self::Int32(arr) => arr.value(a).cmp(&arr.value(b)),
            Self::Int64(arr) => arr.value(a).cmp(&arr.value(b)),
            Self::Float32(arr) => arr.value(a).total_cmp(&arr.value(b)),
            Self::Float64(arr) => arr.value(a).total_cmp(&arr.value(b)),
            Self::Other(_) => CmpOrdering::Equal,
        }
    }
}

// Extremes of IEEE total ordering: NaNs with the largest payload.
const F32_TOTAL_MAX: u32 = 0x7fff_ffff;
const F32_TOTAL_MIN: u32 = 0xffff_ffff;
const F64_TOTAL_MAX: u64 = 0x7fff_ffff_ffff_ffff;
const F64_TOTAL_MIN: u64 = 0xffff_ffff_ffff_ffff;

enum Slots {
    I32(Box<[AtomicI32]>),
    I64(Box<[AtomicI64]>),
    F32(Box<[AtomicU32]>),
    F64(Box<[AtomicU64]>),
}

fn i32_slots(len: usize, init: i32) -> Slots {
    Slots::I32((0..len).map(|_| AtomicI32::new(init)).collect())
}
fn i64_slots(len: usize, init: i64) -> Slots {
    Slots::I64((0..len).map(|_| AtomicI64::new(init)).collect())
}
fn f32_slots(len: usize, init: f32) -> Slots {
    Slots::F32((0..len).map(|_| AtomicU32::new(init.to_bits())).collect())
}
fn f64_slots(len: usize, init: f64) -> Slots {
    Slots::F64((0..len).map(|_| AtomicU64::new(init.to_bits())).collect())
}

pub struct AggregationTarget {
    kind: AggregationKind,
    input_type: DataType,
    output_type: DataType,
    slots: Slots,
    /// Whether a slot has seen at least one non-null value.
    valid: Box<[AtomicBool]>,
}

impl AggregationTarget {
    /// Allocate `len` slots initialized to the identity of `kind`.
    /// `kind` must be an accumulated kind, never `Mean`.
    pub fn new(kind: AggregationKind, input_type: &DataType, len: usize) -> Result<Self> {
        use AggregationKind as K;
        let output_type = kind.output_type(input_type)?;
        let float_input = matches!(input_type, DataType::Float32 | DataType::Float64);
        let slots = match kind {
            K::CountValid | K::CountAll => i64_slots(len, 0),
            K::ArgMin | K::ArgMax => i32_slots(len, -1),
            K::Sum | K::SumOfSquares if float_input => f64_slots(len, 0.0),
            K::Sum | K::SumOfSquares => i64_slots(len, 0),
            K::Product if float_input => f64_slots(len, 1.0),
            K::Product => i64_slots(len, 1),
            K::Min | K::Max => {
                let is_min = kind == K::Min;
                match input_type {
                    DataType::Int32 => i32_slots(len, if is_min { i32::MAX } else { i32::MIN }),
                    DataType::Int64 => i64_slots(len, if is_min { i64::MAX } else { i64::MIN }),
                    DataType::Float32 => f32_slots(
                        len,
                        f32::from_bits(if is_min { F32_TOTAL_MAX } else { F32_TOTAL_MIN }),
                    ),
                    _ => f64_slots(
                        len,
                        f64::from_bits(if is_min { F64_TOTAL_MAX } else { F64_TOTAL_MIN }),
                    ),
                }
            }
            K::Mean => {
                return Err(ColumnarError::invalid_argument(
                    "mean is accumulated as sum and count_valid",
                ));
            }
        };
        Ok(Self {
            kind,
            input_type: input_type.clone(),
            output_type,
            slots,
            valid: (0..len).map(|_| AtomicBool::new(false)).collect(),
        })
    }

    pub fn kind(&self) -> AggregationKind {
        self.kind
    }

    pub fn input_type(&self) -> &DataType {
        &self.input_type
    }

    pub fn output_type(&self) -> &DataType {
        &self.output_type
    }

    pub fn len(&self) -> usize {
        self.valid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.valid.is_empty()
    }

    /// Fold input row `row` into `slot`.
    pub(crate) fn update(&self, slot: usize, values: &ValueView<'_>, row: usize) {
        use AggregationKind as K;
        if self.kind == K::CountAll {
            self.add_i64(slot, 1);
            return;
        }
        if !values.is_valid(row) {
            return;
        }
        match self.kind {
            K::CountValid => self.add_i64(slot, 1),
            K::ArgMin | K::ArgMax => self.apply_arg(slot, row as i32, values),
            _ => match &self.slots {
                Slots::I32(_) | Slots::I64(_) => {
                    self.apply_int(self.kind, slot, values.int_value(row))
                }
                Slots::F32(_) | Slots::F64(_) => {
                    self.apply_float(self.kind, slot, values.float_value(row))
                }
            },
        }
        self.valid[slot].store(true, Ordering::Release);
    }

    /// Fold the partial result held in `src[src_slot]` into `slot`.
    /// `values` is the input column both targets were fed from.
    pub(crate) fn merge(
        &self,
        slot: usize,
        src: &AggregationTarget,
        src_slot: usize,
        values: &ValueView<'_>,
    ) {
        use AggregationKind as K;
        match self.kind {
            K::CountAll | K::CountValid => {
                self.add_i64(slot, src.load_i64(src_slot));
                return;
            }
            _ => {}
        }
        if !src.valid[src_slot].load(Ordering::Acquire) {
            return;
        }
        // Partial sums of squares are already squared.
        let kind = match self.kind {
            K::SumOfSquares => K::Sum,
            other => other,
        };
        match (&src.slots, kind) {
            (Slots::I32(s), K::ArgMin | K::ArgMax) => {
                self.apply_arg(slot, s[src_slot].load(Ordering::Acquire), values)
            }
            (Slots::I32(s), _) => {
                self.apply_int(kind, slot, s[src_slot].load(Ordering::Acquire) as i64)
            }
            (Slots::I64(s), _) => self.apply_int(kind, slot, s[src_slot].load(Ordering::Acquire)),
            (Slots::F32(s), _) => self.apply_float(
                kind,
                slot,
                f32::from_bits(s[src_slot].load(Ordering::Acquire)) as f64,
            ),
            (Slots::F64(s), _) => self.apply_float(
                kind,
                slot,
                f64::from_bits(s[src_slot].load(Ordering::Acquire)),
            ),
        }
        self.valid[slot].store(true, Ordering::Release);
    }

    fn load_i64(&self, slot: usize) -> i64 {
        match &self.slots {
            Slots::I64(s) => s[slot].load(Ordering::Acquire),
            _ => 0,
        }
    }

    fn add_i64(&self, slot: usize, v: i64) {
        if let Slots::I64(s) = &self.slots {
            s[slot].fetch_add(v, Ordering::AcqRel);
        }
    }

    fn apply_int(&self, kind: AggregationKind, slot: usize, v: i64) {
        use AggregationKind as K;
        match (&self.slots, kind) {
            (Slots::I64(s), K::Sum) => {
                s[slot].fetch_add(v, Ordering::AcqRel);
            }
            (Slots::I64(s), K::SumOfSquares) => {
                s[slot].fetch_add(v.wrapping_mul(v), Ordering::AcqRel);
            }
            (Slots::I64(s), K::Product) => {
                let _ = s[slot].fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| {
                    Some(cur.wrapping_mul(v))
                });
            }
            (Slots::I64(s), K::Min) => {
                s[slot].fetch_min(v, Ordering::AcqRel);
            }
            (Slots::I64(s), K::Max) => {
                s[slot].fetch_max(v, Ordering::AcqRel);
            }
            (Slots::I32(s), K::Min) => {
                s[slot].fetch_min(v as i32, Ordering::AcqRel);
            }
            (Slots::I32(s), K::Max) => {
                s[slot].fetch_max(v as i32, Ordering::AcqRel);
            }
            _ => {}
        }
    }

    /// Min and max follow IEEE total ordering, so NaN sorts above +inf.
    fn apply_float(&self, kind: AggregationKind, slot: usize, v: f64) {
        use AggregationKind as K;
        match &self.slots {
            Slots::F64(s) => {
                let op: fn(f64, f64) -> Option<f64> = match kind {
                    K::Sum => |cur: f64, v: f64| Some(cur + v),
                    K::SumOfSquares => |cur: f64, v: f64| Some(cur + v * v),
                    K::Product => |cur: f64, v: f64| Some(cur * v),
                    K::Min => |cur: f64, v: f64| v.total_cmp(&cur).is_lt().then_some(v),
                    K::Max => |cur: f64, v: f64| v.total_cmp(&cur).is_gt().then_some(v),
                    _ => |_: f64, _: f64| None,
                };
                let _ = s[slot].fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
                    op(f64::from_bits(bits), v).map(f64::to_bits)
                });
            }
            Slots::F32(s) => {
                let v = v as f32;
                let op: fn(f32, f32) -> Option<f32> = match kind {
                    K::Min => |cur: f32, v: f32| v.total_cmp(&cur).is_lt().then_some(v),
                    K::Max => |cur: f32, v: f32| v.total_cmp(&cur).is_gt().then_some(v),
                    _ => |_: f32, _: f32| None,
                };
                let _ = s[slot].fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
                    op(f32::from_bits(bits), v).map(f32::to_bits)
                });
            }
            _ => {}
        }
    }

    /// Replace the stored row when `row` holds a better value, preferring the
    /// smaller row index on ties.
    fn apply_arg(&self, slot: usize, row: i32, values: &ValueView<'_>) {
        let Slots::I32(s) = &self.slots else {
            return;
        };
        let want = if self.kind == AggregationKind::ArgMin {
            CmpOrdering::Less
        } else {
            CmpOrdering::Greater
        };
        let _ = s[slot].fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| {
            if cur < 0 {
                return Some(row);
            }
            let ord = values.compare(row as usize, cur as usize);
            (ord == want || (ord == CmpOrdering::Equal && row < cur)).then_some(row)
        });
    }

    fn validity(&self) -> Option<NullBuffer> {
        if matches!(self.kind, AggregationKind::CountAll | AggregationKind::CountValid) {
            return None;
        }
        let nulls = NullBuffer::from(
            self.valid
                .iter()
                .map(|v| v.load(Ordering::Acquire))
                .collect::<Vec<bool>>(),
        );
        (nulls.null_count() > 0).then_some(nulls)
    }

    /// Materialize slot values as an arrow array of `output_type`.
    pub fn finish(&self) -> ArrayRef {
        let nulls = self.validity();
        match &self.slots {
            Slots::I32(s) => Arc::new(Int32Array::new(
                s.iter().map(|v| v.load(Ordering::Acquire)).collect(),
                nulls,
            )),
            Slots::I64(s) => Arc::new(Int64Array::new(
                s.iter().map(|v| v.load(Ordering::Acquire)).collect(),
                nulls,
            )),
            Slots::F32(s) => Arc::new(Float32Array::new(
                s.iter()
                    .map(|v| f32::from_bits(v.load(Ordering::Acquire)))
                    .collect(),
                nulls,
            )),
            Slots::F64(s) => Arc::new(Float64Array::new(
                s.iter()
                    .map(|v| f64::from_bits(v.load(Ordering::Acquire)))
                    .collect(),
                nulls,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(values: Vec<Option<i32>>) -> ArrayRef {
        Arc::new(Int32Array::from(values))
    }

    #[test]
    fn integer_sum_skips_nulls() {
        let values = column(vec![Some(3), None, Some(4)]);
        let view = ValueView::new(&values);
        let target = AggregationTarget::new(AggregationKind::Sum, &DataType::Int32, 2)
            .expect("target");
        for row in 0..3 {
            target.update(0, &view, row);
        }
        let out = target.finish();
        let out = out.as_primitive::<Int64Type>();
        assert_eq!(out.value(0), 7);
        assert!(out.is_null(1));
    }

    #[test]
    fn counts_are_never_null() {
        let values = column(vec![None, None]);
        let view = ValueView::new(&values);
        let all = AggregationTarget::new(AggregationKind::CountAll, &DataType::Int32, 1)
            .expect("target");
        let valid = AggregationTarget::new(AggregationKind::CountValid, &DataType::Int32, 1)
            .expect("target");
        for row in 0..2 {
            all.update(0, &view, row);
            valid.update(0, &view, row);
        }
        assert_eq!(all.finish().as_primitive::<Int64Type>().value(0), 2);
        let valid = valid.finish();
        assert_eq!(valid.null_count(), 0);
        assert_eq!(valid.as_primitive::<Int64Type>().value(0), 0);
    }

    #[test]
    fn float_min_max_keep_input_type() {
        let values: ArrayRef = Arc::new(Float32Array::from(vec![2.5f32, -1.0, 7.25]));
        let view = ValueView::new(&values);
        let min = AggregationTarget::new(AggregationKind::Min, &DataType::Float32, 1)
            .expect("target");
        let max = AggregationTarget::new(AggregationKind::Max, &DataType::Float32, 1)
            .expect("target");
        for row in 0..3 {
            min.update(0, &view, row);
            max.update(0, &view, row);
        }
        assert_eq!(min.finish().as_primitive::<Float32Type>().value(0), -1.0);
        assert_eq!(max.finish().as_primitive::<Float32Type>().value(0), 7.25);
    }

    #[test]
    fn argmax_prefers_smaller_row_on_ties() {
        let values = column(vec![Some(5), Some(9), Some(1), Some(9)]);
        let view = ValueView::new(&values);
        let target = AggregationTarget::new(AggregationKind::ArgMax, &DataType::Int32, 1)
            .expect("target");
        for row in [3, 2, 1, 0] {
            target.update(0, &view, row);
        }
        assert_eq!(target.finish().as_primitive::<Int32Type>().value(0), 1);
    }

    #[test]
    fn merge_combines_partials() {
        let values = column(vec![Some(2), Some(3), Some(4), None]);
        let view = ValueView::new(&values);
        let global = AggregationTarget::new(AggregationKind::Product, &DataType::Int32, 1)
            .expect("target");
        let left = AggregationTarget::new(AggregationKind::Product, &DataType::Int32, 1)
            .expect("target");
        let right = AggregationTarget::new(AggregationKind::Product, &DataType::Int32, 1)
            .expect("target");
        left.update(0, &view, 0);
        left.update(0, &view, 1);
        right.update(0, &view, 2);
        right.update(0, &view, 3);
        global.merge(0, &left, 0, &view);
        global.merge(0, &right, 0, &view);
        assert_eq!(global.finish().as_primitive::<Int64Type>().value(0), 24);
    }

    #[test]
    fn sum_of_squares_partials_add_on_merge() {
        let values = column(vec![Some(3), Some(4), Some(2), Some(5)]);
        let view = ValueView::new(&values);
        let new_target = || {
            AggregationTarget::new(AggregationKind::SumOfSquares, &DataType::Int32, 1)
                .expect("target")
        };
        let (global, left, right) = (new_target(), new_target(), new_target());
        left.update(0, &view, 0);
        left.update(0, &view, 1);
        right.update(0, &view, 2);
        right.update(0, &view, 3);
        global.merge(0, &left, 0, &view);
        global.merge(0, &right, 0, &view);
        assert_eq!(global.finish().as_primitive::<Int64Type>().value(0), 54);

        let floats: ArrayRef = Arc::new(Float64Array::from(vec![1.5, 2.0]));
        let view = ValueView::new(&floats);
        let global = AggregationTarget::new(AggregationKind::SumOfSquares, &DataType::Float64, 1)
            .expect("target");
        let local = AggregationTarget::new(AggregationKind::SumOfSquares, &DataType::Float64, 1)
            .expect("target");
        local.update(0, &view, 0);
        local.update(0, &view, 1);
        global.merge(0, &local, 0, &view);
        assert_eq!(global.finish().as_primitive::<Float64Type>().value(0), 6.25);
    }

    #[test]
    fn nan_sorts_above_infinity_for_min_max() {
        let values: ArrayRef = Arc::new(Float64Array::from(vec![f64::NAN, f64::NAN, 3.0]));
        let view = ValueView::new(&values);
        let new_target = |kind| {
            AggregationTarget::new(kind, &DataType::Float64, 2).expect("target")
        };
        let (min, max, argmax) = (
            new_target(AggregationKind::Min),
            new_target(AggregationKind::Max),
            new_target(AggregationKind::ArgMax),
        );
        for (slot, row) in [(0, 0), (1, 1), (1, 2)] {
            min.update(slot, &view, row);
            max.update(slot, &view, row);
            argmax.update(slot, &view, row);
        }
        let min = min.finish();
        let min = min.as_primitive::<Float64Type>();
        let max = max.finish();
        let max = max.as_primitive::<Float64Type>();
        assert_eq!(min.null_count(), 0);
        assert!(min.value(0).is_nan());
        assert_eq!(min.value(1), 3.0);
        assert!(max.value(0).is_nan());
        assert!(max.value(1).is_nan());
        assert_eq!(argmax.finish().as_primitive::<Int32Type>().value(1), 1);

        let merged = new_target(AggregationKind::Max);
        let local = new_target(AggregationKind::Max);
        local.update(0, &view, 2);
        local.update(1, &view, 0);
        merged.merge(0, &local, 0, &view);
        merged.merge(0, &local, 1, &view);
        assert!(merged.finish().as_primitive::<Float64Type>().value(0).is_nan());
    }

    #[test]
    fn mean_is_not_a_target() {
        assert!(AggregationTarget::new(AggregationKind::Mean, &DataType::Int32, 1).is_err());
    }
}
