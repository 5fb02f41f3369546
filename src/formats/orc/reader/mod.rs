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
//! Chunked stripe-file reader with bounded-memory multi-pass decoding.
//!
//! Responsibilities:
//! - Plan load chunks over selected stripes under the load budget.
//! - Plan decode chunks inside each load chunk under the decode budget.
//! - Slice each decoded table into output chunks under the output budget.
//!
//! Phases run lazily from `has_next`/`read_chunk`:
//! global preprocess -> load -> decompress/decode -> output, where load and
//! decode repeat until every selected stripe has been returned.
//!
//! Current limitations:
//! - Budgets are soft: a single stripe or row segment larger than its budget
//!   is still processed on its own.

mod chunking;
mod decode;
mod output;
mod preprocess;
mod stream_info;

use std::sync::Arc;

use arrow::array::RecordBatch;
use arrow::compute::concat_batches;
use arrow::datatypes::{Schema, SchemaRef};
use bytes::Bytes;
use hashbrown::HashMap;

use crate::common::app_config::ReaderConfig;
use crate::common::status::{ColumnarError, Result};
use crate::fs::SharedDataSource;
use crate::novarocks_logging::debug;

use super::compression::StreamCompInfo;
use super::metadata::{AggregateOrcMetadata, StripeSelection};
use super::options::OrcReaderOptions;
use super::schema::{ColumnNameInfo, OrcColumn};
use super::{DEFAULT_LOAD_LIMIT_RATIO, DEFAULT_OUTPUT_ROW_GRANULARITY};

pub use chunking::{ChunkRange, CumulativeSize, find_splits};
pub use output::{compute_output_chunks, segment_row_bits};
pub use stream_info::{OrcStreamInfo, ReadRange, StreamId};

use stream_info::StripeStreams;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TableMetadata {
    pub schema_info: Vec<ColumnNameInfo>,
}

#[derive(Clone, Debug)]
pub struct TableWithMetadata {
    pub table: RecordBatch,
    pub metadata: TableMetadata,
}

/// State created once per reader: selection, stream layout and raw buffers.
#[derive(Default)]
pub(crate) struct FileIntermediateData {
    pub(crate) global_preprocessed: bool,
    pub(crate) selection: StripeSelection,
    pub(crate) stripe_streams: Vec<StripeStreams>,
    /// `[level][stripe]` loaded byte size.
    pub(crate) lvl_stripe_sizes: Vec<Vec<usize>>,
    pub(crate) data_read_info: Vec<ReadRange>,
    /// Per stripe, the range of `data_read_info` entries that load it.
    pub(crate) stripe_data_read_chunks: Vec<std::ops::Range<usize>>,
    /// `[level][stripe]` raw stream bytes; `None` until loaded and after decode.
    pub(crate) lvl_stripe_data: Vec<Vec<Option<Bytes>>>,
    pub(crate) compinfo_map: HashMap<StreamId, StreamCompInfo>,
    pub(crate) stripe_decomp_sizes: Vec<usize>,
}

impl FileIntermediateData {
    pub(crate) fn has_no_data(&self) -> bool {
        self.selection.stripes.is_empty()
    }

    fn release_stripes(&mut self, range: ChunkRange) {
        for level in &mut self.lvl_stripe_data {
            for slot in &mut level[range.start_idx..range.end()] {
                *slot = None;
            }
        }
    }

    fn release_all(&mut self) {
        for level in &mut self.lvl_stripe_data {
            level.iter_mut().for_each(|slot| *slot = None);
        }
    }
}

/// Chunk lists and cursors for the three planning stages.
pub(crate) struct ChunkReadData {
    pub(crate) output_size_limit: usize,
    pub(crate) data_read_limit: usize,
    pub(crate) load_limit_ratio: f64,
    pub(crate) output_row_granularity: usize,
    pub(crate) load_stripe_chunks: Vec<ChunkRange>,
    pub(crate) curr_load_stripe_chunk: usize,
    pub(crate) decode_stripe_chunks: Vec<ChunkRange>,
    pub(crate) curr_decode_stripe_chunk: usize,
    pub(crate) output_table_chunks: Vec<ChunkRange>,
    pub(crate) curr_output_table_chunk: usize,
    pub(crate) decoded_table: Option<RecordBatch>,
    pub(crate) emitted_chunks: usize,
}

impl ChunkReadData {
    fn new(
        output_size_limit: usize,
        data_read_limit: usize,
        load_limit_ratio: f64,
        output_row_granularity: usize,
    ) -> Self {
        Self {
            output_size_limit,
            data_read_limit,
            load_limit_ratio,
            output_row_granularity,
            load_stripe_chunks: Vec::new(),
            curr_load_stripe_chunk: 0,
            decode_stripe_chunks: Vec::new(),
            curr_decode_stripe_chunk: 0,
            output_table_chunks: Vec::new(),
            curr_output_table_chunk: 0,
            decoded_table: None,
            emitted_chunks: 0,
        }
    }

    pub(crate) fn more_stripes_to_load(&self) -> bool {
        self.curr_load_stripe_chunk < self.load_stripe_chunks.len()
    }

    pub(crate) fn more_stripes_to_decode(&self) -> bool {
        self.curr_decode_stripe_chunk < self.decode_stripe_chunks.len()
    }

    pub(crate) fn more_table_chunks_to_output(&self) -> bool {
        self.curr_output_table_chunk < self.output_table_chunks.len()
    }

    /// Budget for raw stripe bytes held by one load chunk.
    pub(crate) fn load_limit(&self) -> usize {
        scaled_limit(self.data_read_limit, self.load_limit_ratio)
    }

    /// Budget for decompressed bytes of one decode chunk.
    pub(crate) fn decode_limit(&self) -> usize {
        scaled_limit(self.data_read_limit, 1.0 - self.load_limit_ratio)
    }
}

fn scaled_limit(limit: usize, ratio: f64) -> usize {
    if limit == 0 {
        return 0;
    }
    ((limit as f64 * ratio) as usize).max(1)
}

/// Reader that returns a file's rows as a sequence of size-bounded tables.
pub struct ChunkedOrcReader {
    metadata: AggregateOrcMetadata,
    options: OrcReaderOptions,
    selected_columns: Vec<OrcColumn>,
    output_schema: SchemaRef,
    /// Nesting level per file column id, `None` for unread columns.
    column_levels: Vec<Option<usize>>,
    num_levels: usize,
    file_itm_data: FileIntermediateData,
    chunk_read_data: ChunkReadData,
}

impl ChunkedOrcReader {
    /// `output_size_limit` bounds the bytes of each returned table and
    /// `data_read_limit` bounds raw plus decompressed stripe bytes held at
    /// once. Zero means unlimited.
    pub fn new(
        output_size_limit: usize,
        data_read_limit: usize,
        sources: Vec<SharedDataSource>,
        options: OrcReaderOptions,
    ) -> Result<Self> {
        Self::with_granularity(
            output_size_limit,
            data_read_limit,
            DEFAULT_OUTPUT_ROW_GRANULARITY,
            sources,
            options,
        )
    }

    pub fn with_granularity(
        output_size_limit: usize,
        data_read_limit: usize,
        output_row_granularity: usize,
        sources: Vec<SharedDataSource>,
        options: OrcReaderOptions,
    ) -> Result<Self> {
        Self::build(
            ChunkReadData::new(
                output_size_limit,
                data_read_limit,
                DEFAULT_LOAD_LIMIT_RATIO,
                output_row_granularity,
            ),
            sources,
            options,
        )
    }

    pub fn from_config(
        cfg: &ReaderConfig,
        sources: Vec<SharedDataSource>,
        options: OrcReaderOptions,
    ) -> Result<Self> {
        if !(0.0..=1.0).contains(&cfg.load_limit_ratio) {
            return Err(ColumnarError::invalid_argument(format!(
                "load_limit_ratio must be within [0, 1]: load_limit_ratio={}",
                cfg.load_limit_ratio
            )));
        }
        Self::build(
            ChunkReadData::new(
                cfg.chunk_read_limit,
                cfg.pass_read_limit,
                cfg.load_limit_ratio,
                cfg.output_row_granularity,
            ),
            sources,
            options,
        )
    }

    fn build(
        chunk_read_data: ChunkReadData,
        sources: Vec<SharedDataSource>,
        options: OrcReaderOptions,
    ) -> Result<Self> {
        if chunk_read_data.output_row_granularity == 0 {
            return Err(ColumnarError::invalid_argument(
                "output_row_granularity must be positive",
            ));
        }
        options.validate()?;
        let metadata = AggregateOrcMetadata::open(sources)?;
        let selected_columns = select_columns(metadata.columns(), options.columns.as_deref())?;
        let output_schema = Arc::new(Schema::new(
            selected_columns
                .iter()
                .map(|c| Arc::clone(&c.field))
                .collect::<Vec<_>>(),
        ));
        let mut column_levels = vec![None; metadata.files[0].num_types()];
        for column in &selected_columns {
            mark_levels(column, &mut column_levels);
        }
        let num_levels = selected_columns
            .iter()
            .map(OrcColumn::max_level)
            .max()
            .unwrap_or(0)
            + 1;
        debug!(
            "open chunked orc reader: sources={}, rows={}, stripes={}, columns={}, levels={}, output_size_limit={}, data_read_limit={}",
            metadata.files.len(),
            metadata.num_rows(),
            metadata.num_stripes(),
            selected_columns.len(),
            num_levels,
            chunk_read_data.output_size_limit,
            chunk_read_data.data_read_limit
        );
        Ok(Self {
            metadata,
            options,
            selected_columns,
            output_schema,
            column_levels,
            num_levels,
            file_itm_data: FileIntermediateData::default(),
            chunk_read_data,
        })
    }

    pub fn schema(&self) -> &SchemaRef {
        &self.output_schema
    }

    /// True when the resolved selection holds no stripes.
    pub fn has_no_data(&mut self) -> Result<bool> {
        self.global_preprocess()?;
        Ok(self.file_itm_data.has_no_data())
    }

    /// Whether `read_chunk` has more rows to return. Always true before the
    /// first chunk, so an empty selection still yields one empty table.
    pub fn has_next(&mut self) -> Result<bool> {
        self.global_preprocess()?;
        if self.chunk_read_data.emitted_chunks == 0 {
            return Ok(true);
        }
        if self.file_itm_data.has_no_data() {
            return Ok(false);
        }
        let data = &self.chunk_read_data;
        Ok(data.more_stripes_to_load()
            || data.more_stripes_to_decode()
            || data.more_table_chunks_to_output())
    }

    /// Return the next chunk. After exhaustion this returns an empty table.
    pub fn read_chunk(&mut self) -> Result<TableWithMetadata> {
        self.global_preprocess()?;
        if self.file_itm_data.has_no_data() {
            self.chunk_read_data.emitted_chunks += 1;
            return Ok(self.with_metadata(RecordBatch::new_empty(Arc::clone(&self.output_schema))));
        }
        if !self.chunk_read_data.more_table_chunks_to_output() {
            if !self.chunk_read_data.more_stripes_to_decode() {
                if !self.chunk_read_data.more_stripes_to_load() {
                    return Ok(
                        self.with_metadata(RecordBatch::new_empty(Arc::clone(&self.output_schema)))
                    );
                }
                self.load_next_stripe_chunk()?;
            }
            self.decompress_and_decode_next()?;
        }
        let table = self.make_output_chunk();
        self.chunk_read_data.emitted_chunks += 1;
        Ok(self.with_metadata(table))
    }

    fn with_metadata(&self, table: RecordBatch) -> TableWithMetadata {
        TableWithMetadata {
            table,
            metadata: TableMetadata {
                schema_info: self
                    .selected_columns
                    .iter()
                    .map(ColumnNameInfo::from_column)
                    .collect(),
            },
        }
    }

    fn make_output_chunk(&mut self) -> RecordBatch {
        let data = &mut self.chunk_read_data;
        let chunk = data.output_table_chunks[data.curr_output_table_chunk];
        data.curr_output_table_chunk += 1;
        match &data.decoded_table {
            Some(table) if chunk.start_idx == 0 && chunk.count == table.num_rows() => table.clone(),
            Some(table) => table.slice(chunk.start_idx, chunk.count),
            None => RecordBatch::new_empty(Arc::clone(&self.output_schema)),
        }
    }
}

fn select_columns(columns: &[OrcColumn], names: Option<&[String]>) -> Result<Vec<OrcColumn>> {
    let Some(names) = names else {
        return Ok(columns.to_vec());
    };
    names
        .iter()
        .map(|name| {
            columns
                .iter()
                .find(|c| c.name() == name)
                .cloned()
                .ok_or_else(|| {
                    ColumnarError::invalid_argument(format!(
                        "selected column not found in file: column={}",
                        name
                    ))
                })
        })
        .collect()
}

fn mark_levels(column: &OrcColumn, levels: &mut [Option<usize>]) {
    if let Some(slot) = levels.get_mut(column.id as usize) {
        *slot = Some(column.level);
    }
    for child in &column.children {
        mark_levels(child, levels);
    }
}

/// Single-pass reader: every selected row in one table.
pub struct OrcReader {
    inner: ChunkedOrcReader,
}

impl OrcReader {
    pub fn new(sources: Vec<SharedDataSource>, options: OrcReaderOptions) -> Result<Self> {
        Ok(Self {
            inner: ChunkedOrcReader::new(0, 0, sources, options)?,
        })
    }

    pub fn schema(&self) -> &SchemaRef {
        self.inner.schema()
    }

    pub fn read(mut self) -> Result<TableWithMetadata> {
        let first = self.inner.read_chunk()?;
        if !self.inner.has_next()? {
            return Ok(first);
        }
        // Only reached when a decode pass was capped by row count.
        let mut tables = vec![first.table];
        while self.inner.has_next()? {
            tables.push(self.inner.read_chunk()?.table);
        }
        let table = concat_batches(self.inner.schema(), &tables)?;
        Ok(TableWithMetadata {
            table,
            metadata: first.metadata,
        })
    }
}
