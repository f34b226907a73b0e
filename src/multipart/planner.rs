//! Part planning for large-file uploads

use crate::error::{B2Error, Result};

/// The byte range of the source assigned to one part.
///
/// Ranges are contiguous, non-overlapping, and together cover exactly
/// `[0, content_length)` in index order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PartRange {
    /// 0-based part index
    pub index: u32,
    /// Byte offset into the source
    pub offset: u64,
    /// Length in bytes, always at least 1
    pub length: u64,
}

impl PartRange {
    /// 1-based number transmitted on the wire (`X-Bz-Part-Number`).
    pub fn part_number(&self) -> u32 {
        self.index + 1
    }

    /// First byte past the range
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }
}

/// Split `content_length` bytes into consecutive ranges of `part_size`,
/// the last part taking the remainder.
///
/// A zero `content_length` yields an empty plan; large-file uploads need at
/// least one part, so callers reject empty sources before planning.
pub fn plan_parts(content_length: u64, part_size: u64) -> Result<Vec<PartRange>> {
    if part_size == 0 {
        return Err(B2Error::InvalidPartSize(part_size));
    }

    let mut ranges = Vec::with_capacity(content_length.div_ceil(part_size) as usize);
    let mut offset = 0;
    while offset < content_length {
        let length = part_size.min(content_length - offset);
        ranges.push(PartRange {
            index: ranges.len() as u32,
            offset,
            length,
        });
        offset += length;
    }
    Ok(ranges)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uneven_final_part() {
        let ranges = plan_parts(250, 100).unwrap();
        assert_eq!(
            ranges,
            vec![
                PartRange { index: 0, offset: 0, length: 100 },
                PartRange { index: 1, offset: 100, length: 100 },
                PartRange { index: 2, offset: 200, length: 50 },
            ]
        );
    }

    #[test]
    fn test_exact_multiple() {
        let ranges = plan_parts(300, 100).unwrap();
        assert_eq!(ranges.len(), 3);
        assert!(ranges.iter().all(|r| r.length == 100));
    }

    #[test]
    fn test_single_part_when_content_is_smaller() {
        let ranges = plan_parts(42, 100).unwrap();
        assert_eq!(ranges, vec![PartRange { index: 0, offset: 0, length: 42 }]);
    }

    #[test]
    fn test_zero_length_yields_empty_plan() {
        assert!(plan_parts(0, 100).unwrap().is_empty());
    }

    #[test]
    fn test_zero_part_size_is_rejected() {
        match plan_parts(250, 0) {
            Err(B2Error::InvalidPartSize(0)) => {}
            other => panic!("expected InvalidPartSize, got {other:?}"),
        }
    }

    #[test]
    fn test_ranges_partition_the_content() {
        for content_length in [1u64, 7, 99, 100, 101, 1024, 10_000] {
            for part_size in [1u64, 3, 100, 333, 10_000] {
                let ranges = plan_parts(content_length, part_size).unwrap();

                let mut expected_offset = 0;
                for (i, range) in ranges.iter().enumerate() {
                    assert_eq!(range.index as usize, i);
                    assert_eq!(range.offset, expected_offset);
                    assert!(range.length > 0);
                    if i + 1 < ranges.len() {
                        assert_eq!(range.length, part_size);
                    }
                    expected_offset = range.end();
                }
                assert_eq!(expected_offset, content_length);
            }
        }
    }
}
