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
use std::fmt;

use arrow::error::ArrowError;

#[derive(Debug)]
pub enum ColumnarError {
    /// Caller supplied options or arguments that can never succeed.
    InvalidArgument(String),
    /// File bytes or metadata do not match what the container promises.
    Corruption(String),
    /// Well-formed input that uses a feature this crate does not read.
    NotSupported(String),
    Io(std::io::Error),
    Arrow(ArrowError),
}

pub type Result<T> = std::result::Result<T, ColumnarError>;

impl ColumnarError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn corruption(msg: impl Into<String>) -> Self {
        Self::Corruption(msg.into())
    }

    pub fn not_supported(msg: impl Into<String>) -> Self {
        Self::NotSupported(msg.into())
    }

    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Self::InvalidArgument(_))
    }

    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::Corruption(_))
    }
}

impl fmt::Display for ColumnarError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            Self::Corruption(msg) => write!(f, "corruption: {msg}"),
            Self::NotSupported(msg) => write!(f, "not supported: {msg}"),
            Self::Io(e) => write!(f, "io error: {e}"),
            Self::Arrow(e) => write!(f, "arrow error: {e}"),
        }
    }
}

impl std::error::Error for ColumnarError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Arrow(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ColumnarError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<ArrowError> for ColumnarError {
    fn from(e: ArrowError) -> Self {
        Self::Arrow(e)
    }
}

impl From<prost::DecodeError> for ColumnarError {
    fn from(e: prost::DecodeError) -> Self {
        Self::Corruption(format!("decode protobuf metadata failed: {e}"))
    }
}
