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
//! Block-framed stream compression.
//!
//! A compressed stream is a sequence of blocks. Every block starts with a
//! 3-byte little-endian header `(length << 1) | is_original`; original blocks
//! hold raw bytes, the others hold one codec payload decoding to at most
//! `compression_block_size` bytes.
//!
//! Decompressed sizes are read from payload headers without inflating:
//! LZ4 payloads carry a 4-byte uncompressed-size prefix, ZSTD frames carry an
//! optional frame content size (the block size bounds it when absent).
//!
//! Current limitations:
//! - Only NONE, LZ4 and ZSTD are readable or writable.

use bytes::{Bytes, BytesMut};

use crate::common::status::{ColumnarError, Result};

pub use super::proto::CompressionKind;

pub const BLOCK_HEADER_SIZE: usize = 3;
/// Largest block length encodable in a 23-bit header field.
pub const MAX_BLOCK_LENGTH: usize = (1 << 23) - 1;

const ZSTD_MAGIC: u32 = 0xFD2F_B528;
const ZSTD_LEVEL: i32 = 3;

pub fn compression_from_name(name: &str) -> Result<CompressionKind> {
    match name.trim().to_ascii_lowercase().as_str() {
        "" | "none" | "uncompressed" => Ok(CompressionKind::None),
        "lz4" => Ok(CompressionKind::Lz4),
        "zstd" => Ok(CompressionKind::Zstd),
        other => Err(ColumnarError::not_supported(format!(
            "unsupported compression name: compression={}, supported=[none,lz4,zstd]",
            other
        ))),
    }
}

pub fn compression_from_i32(value: i32) -> Result<CompressionKind> {
    let kind = CompressionKind::try_from(value).map_err(|_| {
        ColumnarError::corruption(format!("unknown compression kind in postscript: {}", value))
    })?;
    ensure_supported(kind)?;
    Ok(kind)
}

fn ensure_supported(kind: CompressionKind) -> Result<()> {
    match kind {
        CompressionKind::None | CompressionKind::Lz4 | CompressionKind::Zstd => Ok(()),
        other => Err(ColumnarError::not_supported(format!(
            "unsupported stream compression: compression={:?}",
            other
        ))),
    }
}

/// Decompression summary of one stream, computed from block headers only.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StreamCompInfo {
    pub num_compressed_blocks: usize,
    pub num_uncompressed_blocks: usize,
    pub total_decomp_size: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockHeader {
    pub length: usize,
    pub is_original: bool,
}

pub fn parse_block_header(bytes: &[u8]) -> Result<BlockHeader> {
    if bytes.len() < BLOCK_HEADER_SIZE {
        return Err(ColumnarError::corruption(format!(
            "truncated compression block header: available={}",
            bytes.len()
        )));
    }
    let raw = u32::from(bytes[0]) | (u32::from(bytes[1]) << 8) | (u32::from(bytes[2]) << 16);
    Ok(BlockHeader {
        length: (raw >> 1) as usize,
        is_original: raw & 1 == 1,
    })
}

fn write_block_header(out: &mut Vec<u8>, length: usize, is_original: bool) {
    let raw = ((length as u32) << 1) | u32::from(is_original);
    out.extend_from_slice(&raw.to_le_bytes()[..BLOCK_HEADER_SIZE]);
}

/// Split `data` into blocks of at most `block_size` bytes and compress each.
/// Blocks that do not shrink are stored original.
pub fn compress_stream(kind: CompressionKind, block_size: usize, data: &[u8]) -> Result<Vec<u8>> {
    ensure_supported(kind)?;
    if kind == CompressionKind::None {
        return Ok(data.to_vec());
    }
    if block_size == 0 || block_size > MAX_BLOCK_LENGTH {
        return Err(ColumnarError::invalid_argument(format!(
            "compression block size out of range: block_size={}, max={}",
            block_size, MAX_BLOCK_LENGTH
        )));
    }
    let mut out = Vec::with_capacity(data.len() / 2 + BLOCK_HEADER_SIZE);
    for piece in data.chunks(block_size) {
        let compressed = match kind {
            CompressionKind::Lz4 => lz4_flex::block::compress_prepend_size(piece),
            CompressionKind::Zstd => zstd::bulk::compress(piece, ZSTD_LEVEL)?,
            _ => unreachable!("checked by ensure_supported"),
        };
        if compressed.len() < piece.len() {
            write_block_header(&mut out, compressed.len(), false);
            out.extend_from_slice(&compressed);
        } else {
            write_block_header(&mut out, piece.len(), true);
            out.extend_from_slice(piece);
        }
    }
    Ok(out)
}

/// Walk block headers of a compressed stream and total the decompressed size.
pub fn scan_stream(kind: CompressionKind, block_size: usize, data: &[u8]) -> Result<StreamCompInfo> {
    if kind == CompressionKind::None {
        return Ok(StreamCompInfo {
            num_compressed_blocks: 0,
            num_uncompressed_blocks: usize::from(!data.is_empty()),
            total_decomp_size: data.len(),
        });
    }
    let mut info = StreamCompInfo::default();
    let mut pos = 0usize;
    while pos < data.len() {
        let header = parse_block_header(&data[pos..])?;
        let payload_start = pos + BLOCK_HEADER_SIZE;
        let payload_end = payload_start
            .checked_add(header.length)
            .filter(|end| *end <= data.len())
            .ok_or_else(|| {
                ColumnarError::corruption(format!(
                    "compression block exceeds stream: offset={}, block_len={}, stream_len={}",
                    pos,
                    header.length,
                    data.len()
                ))
            })?;
        let payload = &data[payload_start..payload_end];
        let block_decomp_size = if header.is_original {
            info.num_uncompressed_blocks += 1;
            payload.len()
        } else {
            info.num_compressed_blocks += 1;
            inflated_block_size(kind, block_size, payload)?
        };
        info.total_decomp_size = info
            .total_decomp_size
            .checked_add(block_decomp_size)
            .ok_or_else(|| {
                ColumnarError::corruption(format!(
                    "decompressed stream size overflows: offset={}, block_size={}",
                    pos, block_decomp_size
                ))
            })?;
        pos = payload_end;
    }
    Ok(info)
}

/// Decompressed size of one compressed block. A block never inflates past
/// the file's compression block size.
fn inflated_block_size(kind: CompressionKind, block_size: usize, payload: &[u8]) -> Result<usize> {
    let size = match kind {
        CompressionKind::Lz4 => {
            let prefix: [u8; 4] = payload
                .get(..4)
                .and_then(|b| b.try_into().ok())
                .ok_or_else(|| ColumnarError::corruption("truncated lz4 size prefix"))?;
            u32::from_le_bytes(prefix) as u64
        }
        CompressionKind::Zstd => {
            zstd_frame_content_size(payload)?.unwrap_or(block_size as u64)
        }
        other => {
            return Err(ColumnarError::not_supported(format!(
                "unsupported stream compression: compression={:?}",
                other
            )));
        }
    };
    if size > block_size as u64 {
        return Err(ColumnarError::corruption(format!(
            "compressed block inflates past block size: compression={:?}, decomp_size={}, block_size={}",
            kind, size, block_size
        )));
    }
    Ok(size as usize)
}

/// Frame content size from a ZSTD frame header, if the writer recorded it.
fn zstd_frame_content_size(frame: &[u8]) -> Result<Option<u64>> {
    let truncated = || ColumnarError::corruption("truncated zstd frame header");
    let magic = u32::from_le_bytes(frame.get(..4).and_then(|b| b.try_into().ok()).ok_or_else(truncated)?);
    if magic != ZSTD_MAGIC {
        return Err(ColumnarError::corruption(format!(
            "bad zstd frame magic: magic={:#x}",
            magic
        )));
    }
    let descriptor = *frame.get(4).ok_or_else(truncated)?;
    let fcs_flag = descriptor >> 6;
    let single_segment = descriptor & 0x20 != 0;
    let did_size = [0usize, 1, 2, 4][(descriptor & 0x03) as usize];
    let fcs_size = match fcs_flag {
        0 if single_segment => 1,
        0 => 0,
        1 => 2,
        2 => 4,
        _ => 8,
    };
    if fcs_size == 0 {
        return Ok(None);
    }
    let start = 5 + usize::from(!single_segment) + did_size;
    let field = frame.get(start..start + fcs_size).ok_or_else(truncated)?;
    let mut raw = [0u8; 8];
    raw[..fcs_size].copy_from_slice(field);
    let mut size = u64::from_le_bytes(raw);
    if fcs_size == 2 {
        size += 256;
    }
    Ok(Some(size))
}

/// Inflate a whole stream. Uncompressed files return the input slice as is.
/// `expected_size` is the scanned decompressed size.
pub fn decompress_stream(
    kind: CompressionKind,
    block_size: usize,
    data: &Bytes,
    expected_size: usize,
) -> Result<Bytes> {
    if kind == CompressionKind::None {
        return Ok(data.clone());
    }
    // Every block carries a header and inflates to at most `block_size`.
    let max_size = block_size.saturating_mul(data.len() / BLOCK_HEADER_SIZE + 1);
    let mut out = BytesMut::with_capacity(expected_size.min(max_size));
    let mut pos = 0usize;
    while pos < data.len() {
        let header = parse_block_header(&data[pos..])?;
        let payload_start = pos + BLOCK_HEADER_SIZE;
        let payload_end = payload_start.saturating_add(header.length);
        if payload_end > data.len() {
            return Err(ColumnarError::corruption(format!(
                "compression block exceeds stream: offset={}, block_len={}, stream_len={}",
                pos,
                header.length,
                data.len()
            )));
        }
        let payload = &data[payload_start..payload_end];
        if header.is_original {
            out.extend_from_slice(payload);
        } else {
            let capacity = inflated_block_size(kind, block_size, payload)?;
            match kind {
                CompressionKind::Lz4 => {
                    let block = lz4_flex::block::decompress_size_prepended(payload).map_err(|e| {
                        ColumnarError::corruption(format!(
                            "decompress lz4 block failed: offset={}, error={}",
                            pos, e
                        ))
                    })?;
                    out.extend_from_slice(&block);
                }
                CompressionKind::Zstd => {
                    let block = zstd::bulk::decompress(payload, capacity).map_err(|e| {
                        ColumnarError::corruption(format!(
                            "decompress zstd block failed: offset={}, error={}",
                            pos, e
                        ))
                    })?;
                    out.extend_from_slice(&block);
                }
                other => {
                    return Err(ColumnarError::not_supported(format!(
                        "unsupported stream compression: compression={:?}",
                        other
                    )));
                }
            }
        }
        pos = payload_end;
    }
    // Scanned sizes are exact except for ZSTD frames without a content size,
    // where the block size is an upper bound.
    if out.len() > expected_size {
        return Err(ColumnarError::corruption(format!(
            "decompressed stream exceeds scanned size: expected={}, actual={}",
            expected_size,
            out.len()
        )));
    }
    Ok(out.freeze())
}
