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
//! TOML-backed configuration for readers, writers and the group-by engine.
//!
//! The loaded value is owned by the caller and handed to constructors
//! explicitly (`ChunkedOrcReader::from_config`, `OrcWriterOptions::from_config`,
//! `HashGroupBy::with_config`). There is no process-wide instance.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const CONFIG_ENV_VAR: &str = "NOVAROCKS_COLUMNAR_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "novarocks_columnar.toml";

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ColumnarConfig {
    #[serde(flatten)]
    pub log: LogConfig,

    #[serde(default)]
    pub reader: ReaderConfig,

    #[serde(default)]
    pub writer: WriterConfig,

    #[serde(default)]
    pub groupby: GroupByConfig,
}

impl ColumnarConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("read config file: {}", path.display()))?;
        Self::from_toml_str(&s).with_context(|| format!("parse toml: {}", path.display()))
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let cfg: ColumnarConfig = toml::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from `$NOVAROCKS_COLUMNAR_CONFIG`, then `./novarocks_columnar.toml`,
    /// and fall back to defaults when neither exists.
    pub fn from_env_or_default() -> Result<Self> {
        match config_path_from_env() {
            Some(path) => Self::load_from_file(&path),
            None => Ok(Self::default()),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.reader.output_row_granularity == 0 {
            anyhow::bail!("reader.output_row_granularity must be positive");
        }
        if !(0.0..=1.0).contains(&self.reader.load_limit_ratio) {
            anyhow::bail!(
                "reader.load_limit_ratio must be within [0, 1], got {}",
                self.reader.load_limit_ratio
            );
        }
        if self.writer.stripe_size_rows == 0 {
            anyhow::bail!("writer.stripe_size_rows must be positive");
        }
        if self.writer.compression_block_size == 0 {
            anyhow::bail!("writer.compression_block_size must be positive");
        }
        if self.groupby.block_rows == 0 || self.groupby.max_grid_size == 0 {
            anyhow::bail!("groupby.block_rows and groupby.max_grid_size must be positive");
        }
        Ok(())
    }
}

fn config_path_from_env() -> Option<PathBuf> {
    if let Ok(p) = std::env::var(CONFIG_ENV_VAR)
        && !p.trim().is_empty()
    {
        return Some(PathBuf::from(p.trim()));
    }
    let candidate = PathBuf::from(DEFAULT_CONFIG_FILE);
    candidate.exists().then_some(candidate)
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Clone, Debug, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Optional full tracing EnvFilter expression.
    /// If set, this takes precedence over `log_level`.
    /// Example: "novarocks_columnar=debug,info"
    #[serde(default)]
    pub log_filter: Option<String>,

    /// Append log lines to this file instead of stderr.
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_filter: None,
            log_file: None,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct ReaderConfig {
    #[serde(default = "default_output_row_granularity")]
    pub output_row_granularity: usize,
    /// Byte budget per returned chunk, 0 for unlimited.
    #[serde(default)]
    pub chunk_read_limit: usize,
    /// Byte budget for raw plus decompressed stripe data held at once, 0 for unlimited.
    #[serde(default)]
    pub pass_read_limit: usize,
    /// Share of `pass_read_limit` spent on loading raw stripes; decoding gets the rest.
    #[serde(default = "default_load_limit_ratio")]
    pub load_limit_ratio: f64,
}

fn default_output_row_granularity() -> usize {
    10_000
}
fn default_load_limit_ratio() -> f64 {
    0.4
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            output_row_granularity: default_output_row_granularity(),
            chunk_read_limit: 0,
            pass_read_limit: 0,
            load_limit_ratio: default_load_limit_ratio(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct WriterConfig {
    #[serde(default = "default_stripe_size_rows")]
    pub stripe_size_rows: usize,
    #[serde(default = "default_stripe_size_bytes")]
    pub stripe_size_bytes: usize,
    /// One of `none`, `lz4`, `zstd`.
    #[serde(default = "default_compression")]
    pub compression: String,
    #[serde(default = "default_compression_block_size")]
    pub compression_block_size: usize,
}

fn default_stripe_size_rows() -> usize {
    1_000_000
}
fn default_stripe_size_bytes() -> usize {
    64 * 1024 * 1024
}
fn default_compression() -> String {
    "none".to_string()
}
fn default_compression_block_size() -> usize {
    256 * 1024
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            stripe_size_rows: default_stripe_size_rows(),
            stripe_size_bytes: default_stripe_size_bytes(),
            compression: default_compression(),
            compression_block_size: default_compression_block_size(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct GroupByConfig {
    /// Bytes of block-local scratch available to one block for partial aggregates.
    #[serde(default = "default_shared_memory_per_block")]
    pub shared_memory_per_block: usize,
    /// Target number of input rows handled by one block.
    #[serde(default = "default_block_rows")]
    pub block_rows: usize,
    #[serde(default = "default_max_grid_size")]
    pub max_grid_size: usize,
}

fn default_shared_memory_per_block() -> usize {
    48 * 1024
}
fn default_block_rows() -> usize {
    4096
}
fn default_max_grid_size() -> usize {
    1024
}

impl Default for GroupByConfig {
    fn default() -> Self {
        Self {
            shared_memory_per_block: default_shared_memory_per_block(),
            block_rows: default_block_rows(),
            max_grid_size: default_max_grid_size(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let cfg = ColumnarConfig::from_toml_str("").expect("parse");
        assert_eq!(cfg.log.log_level, "info");
        assert_eq!(cfg.reader.output_row_granularity, 10_000);
        assert_eq!(cfg.reader.chunk_read_limit, 0);
        assert_eq!(cfg.writer.compression, "none");
        assert_eq!(cfg.groupby.shared_memory_per_block, 48 * 1024);
    }

    #[test]
    fn sections_override_defaults() {
        let cfg = ColumnarConfig::from_toml_str(
            r#"
log_level = "debug"
log_filter = "novarocks_columnar=trace"

[reader]
output_row_granularity = 20000
chunk_read_limit = 245000

[writer]
stripe_size_rows = 1000
compression = "zstd"

[groupby]
shared_memory_per_block = 1024
"#,
        )
        .expect("parse");
        assert_eq!(cfg.log.log_level, "debug");
        assert_eq!(
            cfg.log.log_filter.as_deref(),
            Some("novarocks_columnar=trace")
        );
        assert_eq!(cfg.reader.output_row_granularity, 20_000);
        assert_eq!(cfg.reader.chunk_read_limit, 245_000);
        assert_eq!(cfg.reader.pass_read_limit, 0);
        assert_eq!(cfg.writer.stripe_size_rows, 1000);
        assert_eq!(cfg.writer.compression, "zstd");
        assert_eq!(cfg.groupby.shared_memory_per_block, 1024);
        assert_eq!(cfg.groupby.block_rows, 4096);
    }

    #[test]
    fn zero_granularity_is_rejected() {
        let err = ColumnarConfig::from_toml_str("[reader]\noutput_row_granularity = 0\n")
            .expect_err("expected validation error");
        assert!(err.to_string().contains("output_row_granularity"), "err={err}");
    }
}
