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
//! Stripe file (ORC layout) container: metadata, codecs, writer and the
//! chunked reader.
//!
//! Responsibilities:
//! - Parse the file tail (postscript, footer, type tree) and stripe footers.
//! - Write stripe files from arrow batches.
//! - Read stripe files in memory-bounded passes through `ChunkedOrcReader`.
//!
//! Current limitations:
//! - Values use plain encodings; RLE and dictionary encodings are not read.
//! - Row indexes and column statistics are neither written nor used.

pub mod compression;
pub mod encoding;
pub mod metadata;
pub mod options;
pub mod proto;
pub mod reader;
pub mod schema;
pub mod writer;

pub const ORC_MAGIC: &[u8] = b"ORC";
pub const DEFAULT_COMPRESSION_BLOCK_SIZE: usize = 256 * 1024;
/// Rows per output segment when sizing returned chunks.
pub const DEFAULT_OUTPUT_ROW_GRANULARITY: usize = 10_000;
/// Share of the data-read budget spent on raw stripe loading.
pub const DEFAULT_LOAD_LIMIT_RATIO: f64 = 0.4;

pub use compression::CompressionKind;
pub use options::OrcReaderOptions;
pub use reader::{ChunkedOrcReader, OrcReader, TableMetadata, TableWithMetadata};
pub use writer::{OrcWriter, OrcWriterOptions};
