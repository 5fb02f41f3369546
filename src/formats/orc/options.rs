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
use crate::common::status::{ColumnarError, Result};

/// Row and column selection for one read.
///
/// `stripes` holds one list of stripe indices per source. It cannot be
/// combined with `skip_rows`/`num_rows`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OrcReaderOptions {
    /// Top-level column names to read; `None` reads every column.
    pub columns: Option<Vec<String>>,
    pub skip_rows: u64,
    pub num_rows: Option<u64>,
    pub stripes: Vec<Vec<usize>>,
}

impl OrcReaderOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_skip_rows(mut self, skip_rows: u64) -> Self {
        self.skip_rows = skip_rows;
        self
    }

    pub fn with_num_rows(mut self, num_rows: u64) -> Self {
        self.num_rows = Some(num_rows);
        self
    }

    pub fn with_stripes(mut self, stripes: Vec<Vec<usize>>) -> Self {
        self.stripes = stripes;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !self.stripes.is_empty() && (self.skip_rows != 0 || self.num_rows.is_some()) {
            return Err(ColumnarError::invalid_argument(format!(
                "stripe selection cannot be combined with a row range: skip_rows={}, num_rows={:?}",
                self.skip_rows, self.num_rows
            )));
        }
        if let Some(columns) = &self.columns {
            for (i, name) in columns.iter().enumerate() {
                if columns[..i].contains(name) {
                    return Err(ColumnarError::invalid_argument(format!(
                        "duplicate column in selection: column={}",
                        name
                    )));
                }
            }
        }
        Ok(())
    }
}
