//! Rounding and human-readable formatting of byte counts.

use crate::util::constants::*;

pub const fn raw_align_up(val: usize, align: usize) -> usize {
    // `align` must be a power of two.
    val.wrapping_add(align).wrapping_sub(1) & !align.wrapping_sub(1)
}

pub const fn raw_align_down(val: usize, align: usize) -> usize {
    val & !align.wrapping_sub(1)
}

pub const fn raw_is_aligned(val: usize, align: usize) -> bool {
    val & align.wrapping_sub(1) == 0
}

/// Format a byte count with the largest unit that keeps it a whole number, e.g. `16M`, `2048K`, `17B`.
pub fn bytes_to_formatted_string(bytes: usize) -> String {
    const UNITS: [(u8, &str); 3] = [
        (LOG_BYTES_IN_GBYTE, "G"),
        (LOG_BYTES_IN_MBYTE, "M"),
        (LOG_BYTES_IN_KBYTE, "K"),
    ];
    for (log, unit) in UNITS {
        if bytes != 0 && raw_is_aligned(bytes, 1 << log) {
            return format!("{}{}", bytes >> log, unit);
        }
    }
    format!("{}B", bytes)
}

/// Format a byte count in the most readable unit, rounding down. Used for occupancy log lines.
pub fn bytes_to_proper_unit(bytes: usize) -> String {
    if bytes >= 10 * BYTES_IN_GBYTE {
        format!("{}G", bytes >> LOG_BYTES_IN_GBYTE)
    } else if bytes >= 10 * BYTES_IN_MBYTE {
        format!("{}M", bytes >> LOG_BYTES_IN_MBYTE)
    } else if bytes >= 10 * BYTES_IN_KBYTE {
        format!("{}K", bytes >> LOG_BYTES_IN_KBYTE)
    } else {
        format!("{}B", bytes)
    }
}

/// The percentage of `part` in `whole`. Returns 0 for an empty `whole`.
pub fn percent_of(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 * 100.0 / whole as f64
    }
}
