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

//! Sequence points: mappings from IL offsets to source spans.
//!
//! In a portable PDB the points of a method are stored as one blob referenced from its
//! `MethodDebugInformation` row. The blob starts with the `StandAloneSig` row of the local
//! signature, and with the initial document when the row does not name one, followed by
//! delta encoded records:
//!
//! ```text
//! sequence point   δIL  ΔLines  ΔColumns  [δStartLine  δStartColumn]
//! hidden point     δIL  0       0
//! document switch  0    Document
//! ```
//!
//! `δIL` is absolute for the first record. Start lines and columns are absolute for the
//! first visible point and signed deltas to the previous visible point afterwards.

use crate::{
    file::{io::WriteLe, parser::Parser},
    Result,
};

/// Start and end line of a hidden sequence point.
pub const HIDDEN_LINE: u32 = 0x00FE_EFEE;

/// A single mapping from IL offset to a source location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequencePoint {
    /// Offset in the method's IL code
    pub il_offset: u32,
    /// `Document` row of the source file
    pub document: u32,
    /// Starting line in the source file
    pub start_line: u32,
    /// Starting column in the source file
    pub start_col: u16,
    /// Ending line in the source file
    pub end_line: u32,
    /// Ending column in the source file
    pub end_col: u16,
}

impl SequencePoint {
    /// A hidden point at `il_offset`.
    #[must_use]
    pub fn hidden(il_offset: u32, document: u32) -> SequencePoint {
        SequencePoint {
            il_offset,
            document,
            start_line: HIDDEN_LINE,
            start_col: 0,
            end_line: HIDDEN_LINE,
            end_col: 0,
        }
    }

    /// Returns `true` for hidden sequence points.
    #[must_use]
    pub fn is_hidden(&self) -> bool {
        self.start_line == HIDDEN_LINE
    }
}

/// Sequence points of a method, in IL offset order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SequencePoints(pub Vec<SequencePoint>);

fn to_i32(value: i64) -> Result<i32> {
    i32::try_from(value).map_err(|_| malformed_error!("Sequence point delta out of range - {}", value))
}

impl SequencePoints {
    /// Returns the sequence point for a given IL offset, if any.
    #[must_use]
    pub fn find_by_il_offset(&self, il_offset: u32) -> Option<&SequencePoint> {
        self.0.iter().find(|sp| sp.il_offset == il_offset)
    }

    /// Move every point to a new offset.
    ///
    /// `map` returns the new offset for an old one; points it maps to `None` are dropped.
    /// When several points land on the same offset the first one is kept.
    pub fn remap(&mut self, map: impl Fn(u32) -> Option<u32>) {
        let mut remapped: Vec<SequencePoint> = Vec::with_capacity(self.0.len());
        for point in self.0.drain(..) {
            let Some(il_offset) = map(point.il_offset) else {
                continue;
            };
            if remapped.iter().any(|kept| kept.il_offset == il_offset) {
                continue;
            }
            remapped.push(SequencePoint { il_offset, ..point });
        }

        remapped.sort_by_key(|sp| sp.il_offset);
        self.0 = remapped;
    }

    /// Decode a sequence points blob. `document` is the `Document` column of the owning
    /// `MethodDebugInformation` row.
    ///
    /// Returns the `StandAloneSig` row of the local signature and the points.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for invalid deltas and
    /// [`crate::Error::OutOfBounds`] for a truncated blob.
    pub fn decode(data: &[u8], document: u32) -> Result<(u32, SequencePoints)> {
        let mut parser = Parser::new(data);
        let local_signature = parser.read_compressed_uint()?;
        let mut document = if document == 0 {
            parser.read_compressed_uint()?
        } else {
            document
        };

        let mut points = Vec::new();
        let mut il_offset = 0_u32;
        let mut previous: Option<(u32, u16)> = None;
        while parser.has_more_data() {
            let delta_il = parser.read_compressed_uint()?;
            if delta_il == 0 && !points.is_empty() {
                document = parser.read_compressed_uint()?;
                continue;
            }
            il_offset = if points.is_empty() {
                delta_il
            } else {
                il_offset
                    .checked_add(delta_il)
                    .ok_or_else(|| malformed_error!("IL offset overflow in sequence points"))?
            };

            let delta_lines = parser.read_compressed_uint()?;
            let delta_cols = if delta_lines == 0 {
                i64::from(parser.read_compressed_uint()?)
            } else {
                i64::from(parser.read_compressed_int()?)
            };

            if delta_lines == 0 && delta_cols == 0 {
                points.push(SequencePoint::hidden(il_offset, document));
                continue;
            }

            let (start_line, start_col) = match previous {
                None => (
                    i64::from(parser.read_compressed_uint()?),
                    i64::from(parser.read_compressed_uint()?),
                ),
                Some((line, col)) => (
                    i64::from(line) + i64::from(parser.read_compressed_int()?),
                    i64::from(col) + i64::from(parser.read_compressed_int()?),
                ),
            };

            let narrow_line = |line: i64| {
                u32::try_from(line).map_err(|_| malformed_error!("Invalid sequence point line {}", line))
            };
            let narrow_col = |col: i64| {
                u16::try_from(col).map_err(|_| malformed_error!("Invalid sequence point column {}", col))
            };
            let point = SequencePoint {
                il_offset,
                document,
                start_line: narrow_line(start_line)?,
                start_col: narrow_col(start_col)?,
                end_line: narrow_line(start_line + i64::from(delta_lines))?,
                end_col: narrow_col(start_col + delta_cols)?,
            };
            previous = Some((point.start_line, point.start_col));
            points.push(point);
        }

        Ok((local_signature, SequencePoints(points)))
    }

    /// Encode the points as a blob with `local_signature` in the header.
    ///
    /// Returns the value for the `Document` column of the owning row, which names the
    /// document when all points share one and is 0 otherwise, together with the blob.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for points out of IL offset order or spans that
    /// end before they start.
    pub fn encode(&self, local_signature: u32) -> Result<(u32, Vec<u8>)> {
        let initial = self.0.first().map_or(0, |point| point.document);
        let single = self.0.iter().all(|point| point.document == initial);

        let mut out = Vec::new();
        out.write_compressed_uint(local_signature)?;
        if !single {
            out.write_compressed_uint(initial)?;
        }

        let mut document = initial;
        let mut previous_offset: Option<u32> = None;
        let mut previous: Option<(u32, u16)> = None;
        for point in &self.0 {
            if point.document != document {
                out.write_compressed_uint(0)?;
                out.write_compressed_uint(point.document)?;
                document = point.document;
            }

            let delta_il = match previous_offset {
                None => point.il_offset,
                Some(offset) if point.il_offset > offset => point.il_offset - offset,
                Some(offset) => {
                    return Err(malformed_error!(
                        "Sequence point at IL_{:04X} does not follow IL_{:04X}",
                        point.il_offset,
                        offset
                    ))
                }
            };
            out.write_compressed_uint(delta_il)?;
            previous_offset = Some(point.il_offset);

            if point.is_hidden() {
                out.write_compressed_uint(0)?;
                out.write_compressed_uint(0)?;
                continue;
            }

            let delta_lines = point
                .end_line
                .checked_sub(point.start_line)
                .ok_or_else(|| malformed_error!("Sequence point ends before line {}", point.start_line))?;
            let delta_cols = i64::from(point.end_col) - i64::from(point.start_col);
            out.write_compressed_uint(delta_lines)?;
            if delta_lines == 0 {
                let delta_cols = u32::try_from(delta_cols)
                    .ok()
                    .filter(|delta| *delta > 0)
                    .ok_or_else(|| {
                        malformed_error!("Empty sequence point span at IL_{:04X}", point.il_offset)
                    })?;
                out.write_compressed_uint(delta_cols)?;
            } else {
                out.write_compressed_int(to_i32(delta_cols)?)?;
            }

            match previous {
                None => {
                    out.write_compressed_uint(point.start_line)?;
                    out.write_compressed_uint(u32::from(point.start_col))?;
                }
                Some((line, col)) => {
                    out.write_compressed_int(to_i32(i64::from(point.start_line) - i64::from(line))?)?;
                    out.write_compressed_int(to_i32(i64::from(point.start_col) - i64::from(col))?)?;
                }
            }
            previous = Some((point.start_line, point.start_col));
        }

        Ok((if single { initial } else { 0 }, out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(il_offset: u32, start_line: u32) -> SequencePoint {
        SequencePoint {
            il_offset,
            document: 1,
            start_line,
            start_col: 9,
            end_line: start_line,
            end_col: 30,
        }
    }

    #[test]
    fn hidden() {
        assert!(SequencePoint::hidden(0, 1).is_hidden());
        assert!(!point(0, 12).is_hidden());
    }

    #[test]
    fn remap_drops_and_dedupes() {
        let mut points = SequencePoints(vec![point(0, 10), point(4, 11), point(9, 12)]);
        points.remap(|offset| match offset {
            0 => Some(2),
            4 => Some(2),
            9 => Some(20),
            _ => None,
        });

        assert_eq!(points.0.len(), 2);
        assert_eq!(points.0[0].start_line, 10);
        assert_eq!(points.find_by_il_offset(20).unwrap().start_line, 12);

        points.remap(|_| None);
        assert!(points.0.is_empty());
    }

    #[test]
    fn encoded_bytes() {
        let points = SequencePoints(vec![
            SequencePoint {
                il_offset: 0,
                document: 1,
                start_line: 17,
                start_col: 9,
                end_line: 17,
                end_col: 42,
            },
            SequencePoint::hidden(14, 1),
            SequencePoint {
                il_offset: 20,
                document: 1,
                start_line: 18,
                start_col: 5,
                end_line: 18,
                end_col: 6,
            },
        ]);

        let (document, blob) = points.encode(0).unwrap();
        assert_eq!(document, 1);
        assert_eq!(
            blob,
            [
                0x00, // local signature
                0x00, 0x00, 0x21, 0x11, 0x09, // IL_0000 17:9-17:42
                0x0E, 0x00, 0x00, // IL_000E hidden
                0x06, 0x00, 0x01, 0x02, 0x79, // IL_0014 18:5-18:6, deltas +1 and -4
            ]
        );

        let (local_signature, decoded) = SequencePoints::decode(&blob, document).unwrap();
        assert_eq!(local_signature, 0);
        assert_eq!(decoded, points);
    }

    #[test]
    fn document_switches() {
        let mut second = point(6, 3);
        second.document = 2;
        second.end_line = 5;
        second.end_col = 1;
        let points = SequencePoints(vec![point(0, 10), second, point(8, 11)]);

        let (document, blob) = points.encode(4).unwrap();
        assert_eq!(document, 0);
        // Local signature row, then the initial document
        assert_eq!(&blob[..2], &[0x04, 0x01]);

        let (local_signature, decoded) = SequencePoints::decode(&blob, document).unwrap();
        assert_eq!(local_signature, 4);
        assert_eq!(decoded, points);
    }

    #[test]
    fn rejects_unordered_points() {
        let points = SequencePoints(vec![point(4, 10), point(4, 11)]);
        assert!(points.encode(0).is_err());

        let mut empty_span = point(0, 10);
        empty_span.end_col = empty_span.start_col;
        assert!(SequencePoints(vec![empty_span]).encode(0).is_err());
    }

    #[test]
    fn truncated_blob() {
        assert!(SequencePoints::decode(&[0x00, 0x00, 0x00], 1).is_err());
    }
}
