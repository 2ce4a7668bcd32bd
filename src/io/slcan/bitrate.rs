// src/io/slcan/bitrate.rs
//
// CAN bitrate -> slcan `Sx` command mapping, and the timings an slcan
// interface advertises.

use serde::{Deserialize, Serialize};

/// One row of the bitrate table
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BitrateEntry {
    /// Bitrate in bits/second
    pub bitrate: u32,
    /// Digit sent after `S`
    pub command: char,
}

/// slcan bitrate commands (S0-S9)
pub const SLCAN_BITRATES: [BitrateEntry; 10] = [
    BitrateEntry { bitrate: 10_000, command: '0' },    // 10 Kbit/s
    BitrateEntry { bitrate: 20_000, command: '1' },    // 20 Kbit/s
    BitrateEntry { bitrate: 50_000, command: '2' },    // 50 Kbit/s
    BitrateEntry { bitrate: 100_000, command: '3' },   // 100 Kbit/s
    BitrateEntry { bitrate: 125_000, command: '4' },   // 125 Kbit/s
    BitrateEntry { bitrate: 250_000, command: '5' },   // 250 Kbit/s
    BitrateEntry { bitrate: 500_000, command: '6' },   // 500 Kbit/s
    BitrateEntry { bitrate: 750_000, command: '7' },   // 750 Kbit/s
    BitrateEntry { bitrate: 1_000_000, command: '8' }, // 1 Mbit/s
    BitrateEntry { bitrate: 83_333, command: '9' },    // 83.3 Kbit/s
];

/// Entry used when the requested bitrate is not in the table
pub const DEFAULT_BITRATE_ENTRY: BitrateEntry = SLCAN_BITRATES[0];

/// Sample point advertised for every timing, in per mille
pub const DEFAULT_SAMPLE_POINT: u16 = 875;

/// Find the slcan bitrate entry for a given bitrate (exact match only)
pub fn find_bitrate_command(bitrate: u32) -> Option<BitrateEntry> {
    SLCAN_BITRATES.iter().copied().find(|e| e.bitrate == bitrate)
}

/// Build the `Sx\r` command for `bitrate`, falling back to 10 Kbit/s.
///
/// The second value tells whether the bitrate was found in the table.
pub fn bitrate_command(bitrate: u32) -> ([u8; 3], bool) {
    let (entry, matched) = match find_bitrate_command(bitrate) {
        Some(entry) => (entry, true),
        None => (DEFAULT_BITRATE_ENTRY, false),
    };
    ([b'S', entry.command as u8, b'\r'], matched)
}

/// Comma separated list of supported bitrates, for error messages
pub fn supported_bitrates() -> String {
    let mut rates: Vec<u32> = SLCAN_BITRATES.iter().map(|e| e.bitrate).collect();
    rates.sort_unstable();
    rates
        .iter()
        .map(|r| r.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Bit timing an interface can be configured with
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanTiming {
    pub index: u32,
    pub bitrate: u32,
    /// Always 0: slcan adapters pick their own segments
    pub bit_time_segment: u32,
    /// Sample point in per mille
    pub sample_point: u16,
}

/// Timings advertised by an slcan interface, slowest first.
/// Every entry maps to an exact `Sx` command.
pub fn available_timings() -> Vec<CanTiming> {
    let mut rates: Vec<u32> = SLCAN_BITRATES.iter().map(|e| e.bitrate).collect();
    rates.sort_unstable();
    rates
        .into_iter()
        .enumerate()
        .map(|(i, bitrate)| CanTiming {
            index: i as u32,
            bitrate,
            bit_time_segment: 0,
            sample_point: DEFAULT_SAMPLE_POINT,
        })
        .collect()
}
