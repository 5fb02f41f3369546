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
//! File tail parsing and stripe selection across sources.
//!
//! Responsibilities:
//! - Validate magic, postscript, footer checksum and stripe bounds.
//! - Decode stripe footers on demand.
//! - Resolve a row range or explicit stripe lists into selected stripes.

use arrow::datatypes::SchemaRef;
use bytes::Bytes;
use prost::Message;

use crate::common::status::{ColumnarError, Result};
use crate::fs::SharedDataSource;

use super::ORC_MAGIC;
use super::compression::{CompressionKind, compression_from_i32, decompress_stream, scan_stream};
use super::options::OrcReaderOptions;
use super::proto::{Footer, PostScript, StripeFooter, StripeInformation};
use super::schema::{OrcColumn, columns_from_types};

/// Postscript length byte plus the smallest possible postscript.
const MIN_TAIL_SIZE: u64 = 2;

pub struct OrcFileMetadata {
    pub source: SharedDataSource,
    pub compression: CompressionKind,
    pub compression_block_size: usize,
    pub footer: Footer,
    pub schema: SchemaRef,
    pub columns: Vec<OrcColumn>,
}

fn decompress_metadata(
    kind: CompressionKind,
    block_size: usize,
    raw: &Bytes,
) -> Result<Bytes> {
    let info = scan_stream(kind, block_size, raw)?;
    decompress_stream(kind, block_size, raw, info.total_decomp_size)
}

impl OrcFileMetadata {
    pub fn open(source: SharedDataSource) -> Result<Self> {
        let file_len = source.len();
        let name = source.name().to_string();
        if file_len < ORC_MAGIC.len() as u64 + MIN_TAIL_SIZE {
            return Err(ColumnarError::corruption(format!(
                "file too small for stripe file: source={}, size={}",
                name, file_len
            )));
        }
        let header = source.read_at(0, ORC_MAGIC.len())?;
        if header.as_ref() != ORC_MAGIC {
            return Err(ColumnarError::corruption(format!(
                "bad file magic: source={}, magic={:?}",
                name,
                header.as_ref()
            )));
        }

        let ps_len = u64::from(source.read_at(file_len - 1, 1)?[0]);
        let ps_start = (file_len - 1)
            .checked_sub(ps_len)
            .filter(|start| *start >= ORC_MAGIC.len() as u64)
            .ok_or_else(|| {
                ColumnarError::corruption(format!(
                    "postscript length out of bounds: source={}, ps_len={}, size={}",
                    name, ps_len, file_len
                ))
            })?;
        let postscript = PostScript::decode(source.read_at(ps_start, ps_len as usize)?)?;
        if postscript.magic.as_deref().map(str::as_bytes) != Some(ORC_MAGIC) {
            return Err(ColumnarError::corruption(format!(
                "bad postscript magic: source={}, magic={:?}",
                name, postscript.magic
            )));
        }
        let compression = compression_from_i32(postscript.compression.unwrap_or_default())?;
        let compression_block_size = postscript
            .compression_block_size
            .map(|v| v as usize)
            .unwrap_or(super::DEFAULT_COMPRESSION_BLOCK_SIZE);

        let footer_len = postscript.footer_length.unwrap_or_default();
        let footer_start = ps_start
            .checked_sub(footer_len)
            .filter(|start| *start >= ORC_MAGIC.len() as u64)
            .ok_or_else(|| {
                ColumnarError::corruption(format!(
                    "footer length out of bounds: source={}, footer_len={}, ps_start={}",
                    name, footer_len, ps_start
                ))
            })?;
        let raw_footer = source.read_at(footer_start, footer_len as usize)?;
        if let Some(expected) = postscript.footer_crc {
            let actual = crc32c::crc32c(&raw_footer);
            if actual != expected {
                return Err(ColumnarError::corruption(format!(
                    "footer checksum mismatch: source={}, actual={}, expected={}",
                    name, actual, expected
                )));
            }
        }
        let footer = Footer::decode(decompress_metadata(
            compression,
            compression_block_size,
            &raw_footer,
        )?)?;

        let mut rows = 0u64;
        for (idx, stripe) in footer.stripes.iter().enumerate() {
            let end = stripe_offset(stripe)
                .checked_add(stripe_total_length(stripe))
                .unwrap_or(u64::MAX);
            if stripe_offset(stripe) < ORC_MAGIC.len() as u64 || end > footer_start {
                return Err(ColumnarError::corruption(format!(
                    "stripe out of file bounds: source={}, stripe={}, offset={}, end={}, footer_start={}",
                    name,
                    idx,
                    stripe_offset(stripe),
                    end,
                    footer_start
                )));
            }
            rows += stripe.number_of_rows.unwrap_or_default();
        }
        if let Some(declared) = footer.number_of_rows
            && declared != rows
        {
            return Err(ColumnarError::corruption(format!(
                "footer row count mismatch: source={}, declared={}, stripe_sum={}",
                name, declared, rows
            )));
        }

        let (schema, columns) = columns_from_types(&footer.types)?;
        Ok(Self {
            source,
            compression,
            compression_block_size,
            footer,
            schema,
            columns,
        })
    }

    pub fn num_rows(&self) -> u64 {
        self.footer.number_of_rows.unwrap_or_default()
    }

    pub fn num_stripes(&self) -> usize {
        self.footer.stripes.len()
    }

    pub fn num_types(&self) -> usize {
        self.footer.types.len()
    }

    pub fn read_stripe_footer(&self, stripe: &StripeInformation) -> Result<StripeFooter> {
        let start = stripe_offset(stripe)
            + stripe.index_length.unwrap_or_default()
            + stripe.data_length.unwrap_or_default();
        let len = stripe.footer_length.unwrap_or_default() as usize;
        let raw = self.source.read_at(start, len)?;
        let footer = StripeFooter::decode(decompress_metadata(
            self.compression,
            self.compression_block_size,
            &raw,
        )?)?;
        let declared: u64 = footer.streams.iter().map(|s| s.length.unwrap_or_default()).sum();
        if declared != stripe.data_length.unwrap_or_default() {
            return Err(ColumnarError::corruption(format!(
                "stripe stream lengths do not cover data section: source={}, offset={}, streams={}, data_length={}",
                self.source.name(),
                stripe_offset(stripe),
                declared,
                stripe.data_length.unwrap_or_default()
            )));
        }
        Ok(footer)
    }
}

pub fn stripe_offset(stripe: &StripeInformation) -> u64 {
    stripe.offset.unwrap_or_default()
}

fn stripe_total_length(stripe: &StripeInformation) -> u64 {
    stripe.index_length.unwrap_or_default()
        + stripe.data_length.unwrap_or_default()
        + stripe.footer_length.unwrap_or_default()
}

/// One stripe chosen for reading.
#[derive(Clone, Debug)]
pub struct SelectedStripe {
    pub source_idx: usize,
    pub stripe_idx: usize,
    pub info: StripeInformation,
    pub num_rows: u64,
    /// Row offset of this stripe within the selection.
    pub first_row: u64,
}

#[derive(Clone, Debug, Default)]
pub struct StripeSelection {
    pub stripes: Vec<SelectedStripe>,
    /// Rows to drop from the start of the first selected stripe.
    pub rows_to_skip: u64,
    pub rows_to_read: u64,
}

/// Metadata of every source of one read.
pub struct AggregateOrcMetadata {
    pub files: Vec<OrcFileMetadata>,
}

impl AggregateOrcMetadata {
    pub fn open(sources: Vec<SharedDataSource>) -> Result<Self> {
        if sources.is_empty() {
            return Err(ColumnarError::invalid_argument("no sources to read"));
        }
        let files = sources
            .into_iter()
            .map(OrcFileMetadata::open)
            .collect::<Result<Vec<_>>>()?;
        let first = &files[0];
        for (idx, file) in files.iter().enumerate().skip(1) {
            if file.schema != first.schema {
                return Err(ColumnarError::invalid_argument(format!(
                    "sources have different schemas: source_index={}, source={}, expected={:?}, actual={:?}",
                    idx,
                    file.source.name(),
                    first.schema,
                    file.schema
                )));
            }
        }
        Ok(Self { files })
    }

    pub fn schema(&self) -> &SchemaRef {
        &self.files[0].schema
    }

    pub fn columns(&self) -> &[OrcColumn] {
        &self.files[0].columns
    }

    pub fn num_rows(&self) -> u64 {
        self.files.iter().map(OrcFileMetadata::num_rows).sum()
    }

    pub fn num_stripes(&self) -> usize {
        self.files.iter().map(OrcFileMetadata::num_stripes).sum()
    }

    pub fn select_stripes(&self, options: &OrcReaderOptions) -> Result<StripeSelection> {
        if !options.stripes.is_empty() {
            return self.select_explicit_stripes(&options.stripes);
        }
        let total = self.num_rows();
        let skip = options.skip_rows.min(total);
        let available = total - skip;
        let rows_to_read = options.num_rows.map_or(available, |n| n.min(available));
        let mut selection = StripeSelection {
            rows_to_read,
            ..Default::default()
        };
        if rows_to_read == 0 {
            return Ok(selection);
        }
        let end = skip + rows_to_read;
        let mut row = 0u64;
        for (source_idx, file) in self.files.iter().enumerate() {
            for (stripe_idx, info) in file.footer.stripes.iter().enumerate() {
                let num_rows = info.number_of_rows.unwrap_or_default();
                let stripe_end = row + num_rows;
                if num_rows > 0 && stripe_end > skip && row < end {
                    if selection.stripes.is_empty() {
                        selection.rows_to_skip = skip - row;
                    }
                    let first_row = selection
                        .stripes
                        .last()
                        .map_or(0, |s: &SelectedStripe| s.first_row + s.num_rows);
                    selection.stripes.push(SelectedStripe {
                        source_idx,
                        stripe_idx,
                        info: info.clone(),
                        num_rows,
                        first_row,
                    });
                }
                row = stripe_end;
            }
        }
        Ok(selection)
    }

    fn select_explicit_stripes(&self, stripes: &[Vec<usize>]) -> Result<StripeSelection> {
        if stripes.len() != self.files.len() {
            return Err(ColumnarError::invalid_argument(format!(
                "stripe selection must list one entry per source: sources={}, entries={}",
                self.files.len(),
                stripes.len()
            )));
        }
        let mut selection = StripeSelection::default();
        for (source_idx, (file, indices)) in self.files.iter().zip(stripes).enumerate() {
            for &stripe_idx in indices {
                let info = file.footer.stripes.get(stripe_idx).ok_or_else(|| {
                    ColumnarError::invalid_argument(format!(
                        "stripe index out of range: source_index={}, stripe={}, num_stripes={}",
                        source_idx,
                        stripe_idx,
                        file.num_stripes()
                    ))
                })?;
                let num_rows = info.number_of_rows.unwrap_or_default();
                selection.stripes.push(SelectedStripe {
                    source_idx,
                    stripe_idx,
                    info: info.clone(),
                    num_rows,
                    first_row: selection.rows_to_read,
                });
                selection.rows_to_read += num_rows;
            }
        }
        Ok(selection)
    }
}
