// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

//! The metadata root (ECMA-335 II.24.2.1).
//!
//! Both a module's metadata and a portable PDB start with this header: a signature, a
//! runtime version string and a directory of named streams.
//!
//! ```text
//! u32 'BSJB'   u16 major   u16 minor   u32 reserved
//! u32 length   version string, NUL padded to `length` (a multiple of 4)
//! u16 flags    u16 stream_count
//! stream_count x { u32 offset, u32 size, name NUL padded to 4 }
//! ```

use crate::{
    file::{io::WriteLe, parser::Parser},
    Error::NotSupported,
    Result,
};

/// `BSJB` in little-endian byte order.
pub const CIL_HEADER_MAGIC: u32 = 0x424A_5342;

/// Name of the string heap.
pub const STREAM_STRINGS: &str = "#Strings";
/// Name of the user string heap.
pub const STREAM_USER_STRINGS: &str = "#US";
/// Name of the blob heap.
pub const STREAM_BLOB: &str = "#Blob";
/// Name of the GUID heap.
pub const STREAM_GUID: &str = "#GUID";
/// Name of the optimized tables stream.
pub const STREAM_TABLES: &str = "#~";
/// Name of the unoptimized tables stream.
pub const STREAM_TABLES_UNOPTIMIZED: &str = "#-";
/// Name of the portable PDB header stream.
pub const STREAM_PDB: &str = "#Pdb";

/// A named stream payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataStream {
    /// Stream name, at most 31 bytes
    pub name: String,
    /// Raw payload
    pub data: Vec<u8>,
}

/// Header and streams of a metadata root, in directory order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataRoot {
    /// Major version, 1
    pub major_version: u16,
    /// Minor version, 1
    pub minor_version: u16,
    /// Runtime version string, e.g. `v4.0.30319`
    pub version: String,
    /// Reserved flags, preserved as read
    pub flags: u16,
    /// Streams in directory order
    pub streams: Vec<MetadataStream>,
}

impl Default for MetadataRoot {
    fn default() -> Self {
        MetadataRoot {
            major_version: 1,
            minor_version: 1,
            version: "v4.0.30319".to_string(),
            flags: 0,
            streams: Vec::new(),
        }
    }
}

fn align4(value: usize) -> usize {
    (value + 3) & !3
}

impl MetadataRoot {
    /// Split metadata bytes into header and streams.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for a wrong signature or an invalid directory,
    /// [`crate::Error::NotSupported`] for unoptimized (`#-`) metadata and
    /// [`crate::Error::OutOfBounds`] for truncated input.
    pub fn read(data: &[u8]) -> Result<MetadataRoot> {
        let mut parser = Parser::new(data);
        let signature = parser.read_le::<u32>()?;
        if signature != CIL_HEADER_MAGIC {
            return Err(malformed_error!(
                "CIL_HEADER_MAGIC does not match - 0x{:08X}",
                signature
            ));
        }

        let major_version = parser.read_le::<u16>()?;
        let minor_version = parser.read_le::<u16>()?;
        let _reserved = parser.read_le::<u32>()?;
        let length = parser.read_le::<u32>()? as usize;
        if length > 255 {
            return Err(malformed_error!("Version string too long - {}", length));
        }

        let raw_version = parser.read_bytes(length)?;
        let version_len = raw_version
            .iter()
            .position(|byte| *byte == 0)
            .unwrap_or(raw_version.len());
        let version = String::from_utf8_lossy(&raw_version[..version_len]).into_owned();

        let flags = parser.read_le::<u16>()?;
        let stream_count = parser.read_le::<u16>()?;

        let mut streams: Vec<MetadataStream> = Vec::with_capacity(usize::from(stream_count));
        for _ in 0..stream_count {
            let offset = parser.read_le::<u32>()? as usize;
            let size = parser.read_le::<u32>()? as usize;

            let start = parser.pos();
            let name = parser.read_string_utf8()?;
            if name.len() > 31 {
                return Err(malformed_error!("Stream name too long - {}", name));
            }
            parser.seek(start + align4(name.len() + 1))?;

            let Some(payload) = offset.checked_add(size).and_then(|end| data.get(offset..end))
            else {
                return Err(malformed_error!(
                    "Stream {} exceeds metadata - offset {}, size {}",
                    name,
                    offset,
                    size
                ));
            };

            if name == STREAM_TABLES_UNOPTIMIZED {
                log::warn!("Unoptimized metadata (#-) is not supported");
                return Err(NotSupported);
            }
            if streams.iter().any(|stream| stream.name == name) {
                return Err(malformed_error!("Duplicate stream {}", name));
            }

            streams.push(MetadataStream {
                name,
                data: payload.to_vec(),
            });
        }

        Ok(MetadataRoot {
            major_version,
            minor_version,
            version,
            flags,
            streams,
        })
    }

    /// Payload of the stream called `name`.
    #[must_use]
    pub fn stream(&self, name: &str) -> Option<&[u8]> {
        self.streams
            .iter()
            .find(|stream| stream.name == name)
            .map(|stream| stream.data.as_slice())
    }

    /// Replace the payload of `name`, appending the stream if it does not exist yet.
    pub fn set_stream(&mut self, name: &str, data: Vec<u8>) {
        match self.streams.iter_mut().find(|stream| stream.name == name) {
            Some(stream) => stream.data = data,
            None => self.streams.push(MetadataStream {
                name: name.to_string(),
                data,
            }),
        }
    }

    /// Serialize header, directory and streams. Every payload is padded to 4 bytes.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for too many streams or metadata exceeding the
    /// 32-bit offsets of the directory.
    pub fn write(&self) -> Result<Vec<u8>> {
        let stream_count = u16::try_from(self.streams.len())
            .map_err(|_| malformed_error!("Too many streams - {}", self.streams.len()))?;
        let to_u32 =
            |value: usize| u32::try_from(value).map_err(|_| malformed_error!("Metadata exceeds 4 GiB"));

        let version_len = align4(self.version.len() + 1);
        let directory_len: usize = self
            .streams
            .iter()
            .map(|stream| 8 + align4(stream.name.len() + 1))
            .sum();

        let mut out = Vec::new();
        out.write_le(CIL_HEADER_MAGIC);
        out.write_le(self.major_version);
        out.write_le(self.minor_version);
        out.write_le(0_u32);
        out.write_le(to_u32(version_len)?);
        out.extend_from_slice(self.version.as_bytes());
        out.resize(16 + version_len, 0);
        out.write_le(self.flags);
        out.write_le(stream_count);

        let mut offset = out.len() + directory_len;
        for stream in &self.streams {
            let padded = align4(stream.data.len());
            out.write_le(to_u32(offset)?);
            out.write_le(to_u32(padded)?);

            let name_start = out.len();
            out.extend_from_slice(stream.name.as_bytes());
            out.resize(name_start + align4(stream.name.len() + 1), 0);
            offset += padded;
        }

        for stream in &self.streams {
            out.extend_from_slice(&stream.data);
            out.resize(align4(out.len()), 0);
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    fn sample() -> MetadataRoot {
        MetadataRoot {
            streams: vec![
                MetadataStream {
                    name: STREAM_STRINGS.to_string(),
                    data: b"\0Foo\0\0\0\0".to_vec(),
                },
                MetadataStream {
                    name: "#Custom".to_string(),
                    data: vec![1, 2, 3, 4],
                },
            ],
            ..MetadataRoot::default()
        }
    }

    #[test]
    fn write_then_read() {
        let bytes = sample().write().unwrap();
        // 16 + "v4.0.30319\0" padded to 12 + flags/count 4
        // + directory (8 + 12) + (8 + 8) + payloads 8 + 4
        assert_eq!(bytes.len(), 16 + 12 + 4 + 20 + 16 + 8 + 4);
        assert_eq!(&bytes[..4], b"BSJB");

        let root = MetadataRoot::read(&bytes).unwrap();
        assert_eq!(root, sample());
        assert_eq!(root.stream("#Custom"), Some(&[1, 2, 3, 4][..]));
        assert_eq!(root.stream(STREAM_BLOB), None);
    }

    #[test]
    fn rejects_foreign_data() {
        assert!(matches!(
            MetadataRoot::read(b"MZ\x90\0\x03\0\0\0"),
            Err(Error::Malformed { .. })
        ));
    }

    #[test]
    fn rejects_unoptimized_tables() {
        let mut root = sample();
        root.set_stream(STREAM_TABLES_UNOPTIMIZED, vec![0; 4]);
        let bytes = root.write().unwrap();
        assert!(matches!(MetadataRoot::read(&bytes), Err(Error::NotSupported)));
    }

    #[test]
    fn rejects_stream_past_end() {
        let mut bytes = sample().write().unwrap();
        bytes.truncate(bytes.len() - 4);
        assert!(matches!(
            MetadataRoot::read(&bytes),
            Err(Error::Malformed { .. })
        ));
    }
}
