use crate::error::DownloadError;
use crate::state::ByteRange;

/// Splits `[0, total_length)` into contiguous inclusive ranges.
///
/// Every range gets `total_length / part_count` bytes; the remainder left by
/// the integer division is handed out one byte at a time to the leading
/// ranges, so lengths differ by at most one. When there are fewer bytes than
/// parts the part count is clamped so each part holds at least one byte.
pub fn plan_ranges(total_length: u64, part_count: u32) -> Result<Vec<ByteRange>, DownloadError> {
    if total_length == 0 {
        return Err(DownloadError::InvalidPlan(
            "resource is empty (0 bytes)".to_string(),
        ));
    }
    if part_count == 0 {
        return Err(DownloadError::InvalidPlan(
            "part count must be at least 1".to_string(),
        ));
    }

    let parts = u64::from(part_count).min(total_length);
    let base = total_length / parts;
    let remainder = total_length % parts;

    let mut ranges = Vec::with_capacity(parts as usize);
    let mut start = 0;
    for i in 0..parts {
        let len = if i < remainder { base + 1 } else { base };
        let end = start + len - 1;
        ranges.push(ByteRange { start, end });
        start = end + 1;
    }
    debug_assert_eq!(start, total_length);

    Ok(ranges)
}
