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
//! Random-access byte sources for stripe files.
//!
//! Readers only need the total length and positioned reads, so both the
//! local-file and in-memory variants stay small. Sources are shared across
//! rayon workers during stripe loading and must be `Send + Sync`.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use bytes::Bytes;

use crate::common::status::{ColumnarError, Result};

pub trait DataSource: Send + Sync {
    /// Short label used in error messages.
    fn name(&self) -> &str;

    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read exactly `len` bytes starting at `offset`.
    fn read_at(&self, offset: u64, len: usize) -> Result<Bytes>;
}

pub type SharedDataSource = Arc<dyn DataSource>;

fn check_range(name: &str, offset: u64, len: usize, total: u64) -> Result<()> {
    let end = offset.checked_add(len as u64).ok_or_else(|| {
        ColumnarError::invalid_argument(format!(
            "read range overflow: source={}, offset={}, len={}",
            name, offset, len
        ))
    })?;
    if end > total {
        return Err(ColumnarError::corruption(format!(
            "read out of source bounds: source={}, offset={}, len={}, source_size={}",
            name, offset, len, total
        )));
    }
    Ok(())
}

pub struct FileDataSource {
    path: PathBuf,
    label: String,
    file: Mutex<File>,
    len: u64,
}

impl FileDataSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let len = file.metadata()?.len();
        Ok(Self {
            label: path.display().to_string(),
            path,
            file: Mutex::new(file),
            len,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DataSource for FileDataSource {
    fn name(&self) -> &str {
        &self.label
    }

    fn len(&self) -> u64 {
        self.len
    }

    fn read_at(&self, offset: u64, len: usize) -> Result<Bytes> {
        check_range(&self.label, offset, len, self.len)?;
        let mut buf = vec![0u8; len];
        let mut file = self.file.lock().map_err(|_| {
            ColumnarError::Io(std::io::Error::other(format!(
                "file handle lock poisoned: source={}",
                self.label
            )))
        })?;
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut buf)?;
        Ok(Bytes::from(buf))
    }
}

/// Whole file held in memory; reads are zero-copy slices.
#[derive(Clone)]
pub struct BytesDataSource {
    label: String,
    data: Bytes,
}

impl BytesDataSource {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            label: "<memory>".to_string(),
            data: data.into(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.label = name.into();
        self
    }
}

impl DataSource for BytesDataSource {
    fn name(&self) -> &str {
        &self.label
    }

    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    fn read_at(&self, offset: u64, len: usize) -> Result<Bytes> {
        check_range(&self.label, offset, len, self.len())?;
        let start = offset as usize;
        Ok(self.data.slice(start..start + len))
    }
}
