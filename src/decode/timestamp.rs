// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! Timestamp reconstruction.
//!
//! Each FMT word carries the low bits of a monotonic counter, normalized so
//! they occupy the top of a `u32`. The reconstructor maintains the high 32
//! bits across wrap-arounds and data-loss events, and hunts for
//! long-timestamp sync messages when the difference to the previous message
//! falls outside the allowed window.

use crate::format::table::FID_LONG_TIMESTAMP;
use crate::format::{FormatTable, MsgKind};
use crate::io::loader::{TraceReader, ERASED_WORD};

/// One full period of the normalized low counter.
const PERIOD: i64 = 1i64 << 32;

/// Default allowed forward step: +0.33 of the period.
const DEFAULT_MAX_POS: i64 = (0.33 * PERIOD as f64) as i64;

/// Default allowed backward step: -0.10 of the period.
const DEFAULT_MAX_NEG: i64 = (-0.10 * PERIOD as f64) as i64;

/// Bounds for the `-ts` override, as fractions of the period.
const MAX_DIFF_FRACTION: f64 = 0.33;
const MIN_DIFF_FRACTION: f64 = 0.01;

#[derive(Debug)]
pub struct TimestampState {
    /// Timestamp of the current message in seconds.
    pub seconds: f64,
    /// Conversion from the 64-bit counter to seconds.
    pub multiplier: f64,
    pub frequency: u32,
    /// High 32 bits of the reconstructed counter.
    pub high: u32,
    /// Normalized low word of the current message.
    pub low: u32,
    /// Low word of the previous message (not updated for late arrivals).
    pub old: u32,
    /// High-water mark of the long-timestamp scan.
    pub searched_to: usize,
    /// Message number of the last wrap-around increment.
    wrap_msg_no: u32,
    /// Messages flagged with a suspicious timestamp.
    pub suspicious: u32,
    /// Flag the next printed message with a marker.
    pub mark_problem: bool,
    /// The `old` value is not valid (start, restart, decode error).
    pub no_previous: bool,
    /// At least one long timestamp was seen.
    pub long_found: bool,
    pub max_pos_diff: i64,
    pub max_neg_diff: i64,
}

impl TimestampState {
    pub fn new() -> Self {
        TimestampState {
            seconds: 0.0,
            multiplier: 0.0,
            frequency: 1,
            high: 0,
            low: 0,
            old: 0,
            searched_to: 0,
            wrap_msg_no: 0,
            suspicious: 0,
            mark_problem: false,
            no_previous: true,
            long_found: false,
            max_pos_diff: DEFAULT_MAX_POS,
            max_neg_diff: DEFAULT_MAX_NEG,
        }
    }

    /// Update the tick-to-seconds multiplier for a new counter frequency.
    pub fn set_frequency(&mut self, frequency: u32, timestamp_shift: u8, fmt_id_bits: u8) {
        self.frequency = frequency;
        self.multiplier = (1u64 << timestamp_shift) as f64
            / f64::from(frequency)
            / (1u64 << (1 + fmt_id_bits)) as f64;
    }

    /// Apply the `-ts=neg;pos` override (values in milliseconds). The
    /// magnitudes must lie between 1% and 33% of the timestamp period.
    pub fn apply_diff_override(
        &mut self,
        neg_ms: f64,
        pos_ms: f64,
        timestamp_shift: u8,
        fmt_id_bits: u8,
    ) -> Result<(), String> {
        let frequency = f64::from(self.frequency) / (1u64 << timestamp_shift) as f64;
        let period_ms = 1000.0 / frequency * (1u64 << (32 - 1 - fmt_id_bits)) as f64;

        let neg = neg_ms / period_ms;
        let pos = pos_ms / period_ms;

        if !(-MAX_DIFF_FRACTION..=-MIN_DIFF_FRACTION).contains(&neg)
            || !(MIN_DIFF_FRACTION..=MAX_DIFF_FRACTION).contains(&pos)
        {
            return Err(format!(
                "-ts values out of range for a timestamp period of {period_ms:.3} ms"
            ));
        }

        self.max_neg_diff = (neg * PERIOD as f64) as i64;
        self.max_pos_diff = (pos * PERIOD as f64) as i64;
        Ok(())
    }

    /// Reset after a logging restart: the high part and the search state
    /// start over.
    pub fn restart(&mut self) {
        self.searched_to = 0;
        self.no_previous = true;
        self.mark_problem = false;
        self.old = 0;
    }

    /// Zero the timestamp completely (restart-timing marker).
    pub fn zero(&mut self) {
        self.high = 0;
        self.low = 0;
        self.seconds = 0.0;
    }

    /// Prepare the timestamp of the current message. `self.low` must
    /// already hold the normalized low word from the FMT word.
    pub fn prepare(
        &mut self,
        fid: u32,
        msg_cnt: u32,
        rd: &TraceReader,
        formats: &FormatTable,
    ) {
        let mut counter = (u64::from(self.high) << 32) | u64::from(self.low);

        if fid == FID_LONG_TIMESTAMP {
            self.old = self.low;
            self.long_found = true;
        } else if fid != rd.info.topmost_fid {
            self.reconstruct(&mut counter, msg_cnt, rd, formats);
        }

        self.no_previous = false;
        self.seconds = self.multiplier * counter as f64;
    }

    fn reconstruct(
        &mut self,
        counter: &mut u64,
        msg_cnt: u32,
        rd: &TraceReader,
        formats: &FormatTable,
    ) {
        let diff = i64::from(self.low) - i64::from(self.old);
        let mut hunt_long_timestamp = false;
        let mut update_old = true;

        if diff >= 0 && diff <= self.max_pos_diff {
            // Small forward step, no overflow
        } else if diff < 0 && diff >= self.max_neg_diff {
            // Out-of-order delivery; keep the reference value
            update_old = false;
        } else if u64::from(self.old) >= (PERIOD as u64 / 2)
            && diff <= -(PERIOD - self.max_pos_diff)
            && !self.no_previous
        {
            // The low word wrapped. Data loss can fake a wrap, so allow at
            // most one increment per four messages.
            if msg_cnt.wrapping_sub(self.wrap_msg_no) >= 4 {
                self.wrap_msg_no = msg_cnt;
                self.high = self.high.wrapping_add(1);
            }
            *counter = (u64::from(self.high) << 32) | u64::from(self.low);
        } else if u64::from(self.old) < (PERIOD as u64 / 2)
            && diff >= PERIOD + self.max_neg_diff
            && !self.no_previous
        {
            // A late word from the previous counter period
            let high = self.high.saturating_sub(1);
            *counter = (u64::from(high) << 32) | u64::from(self.low);
            update_old = false;
        } else {
            // Gap or loss suspected: hunt for the next long timestamp
            hunt_long_timestamp = true;
            self.mark_problem = !self.no_previous;
        }

        if update_old || self.no_previous {
            self.old = self.low;
        }

        if (hunt_long_timestamp && self.searched_to < rd.index) || self.no_previous {
            if self.scan_for_long_timestamp(rd, formats) {
                *counter = (u64::from(self.high) << 32) | u64::from(self.low);
                self.old = self.low;
            }
        }
    }

    /// Walk the buffer ahead of the decode cursor for the next long
    /// timestamp, honoring the sub-packet rules. The scan stops at streaming
    /// marks, gaps, erased words, or a hit; the high-water mark prevents
    /// re-walking the same region.
    fn scan_for_long_timestamp(&mut self, rd: &TraceReader, formats: &FormatTable) -> bool {
        if !rd.info.long_timestamp_used {
            return false;
        }
        if rd.index >= rd.in_size {
            return false;
        }

        let mut previous = ERASED_WORD;
        let mut old_low = self.low;
        let mut high_counter: u32 = 0;
        let mut data_words: u32 = 0;

        for index in rd.index..rd.in_size {
            let data = rd.buffer[index];
            self.searched_to = index + 1;

            if data & 1 == 0 {
                data_words += 1;
                if data_words > 4 {
                    return false; // invalid stream, stop hunting
                }
                previous = data;
                continue;
            }

            let Some(fid) = checked_fid(data, data_words, rd, formats) else {
                previous = data;
                data_words = 0;
                continue;
            };

            let new_low = (data & !1) << rd.info.fmt_id_bits;

            // The streaming mark closes one block of data
            if fid == rd.info.topmost_fid && data_words == 1 {
                return false;
            }

            if fid == FID_LONG_TIMESTAMP && data_words == 1 {
                let high = (previous >> 1)
                    | ((data << (rd.info.fmt_id_bits - 1)) & 0x8000_0000);

                if high == 0xFFFF_FFFF {
                    return false; // restart-timing marker
                }
                if high < high_counter {
                    return false;
                }
                if !self.small_difference(&mut high_counter, &mut old_low, new_low) {
                    return false;
                }

                self.high = high - high_counter;
                return true;
            }

            if !self.small_difference(&mut high_counter, &mut old_low, new_low) {
                return false;
            }

            previous = data;
            data_words = 0;
        }

        false
    }

    /// Step the scan state by one message; false when the difference is too
    /// large to trust the reconstruction.
    fn small_difference(&self, high_counter: &mut u32, old_low: &mut u32, new_low: u32) -> bool {
        let diff = i64::from(new_low) - i64::from(*old_low);

        if diff >= 0 && diff <= self.max_pos_diff {
            *old_low = new_low;
            return true;
        }

        if diff < 0 && diff >= self.max_neg_diff {
            return true;
        }

        if u64::from(self.old) >= (PERIOD as u64 / 2) && diff <= -(PERIOD - self.max_pos_diff) {
            *high_counter = high_counter.wrapping_add(1);
            *old_low = new_low;
            return true;
        }

        if u64::from(self.old) < (PERIOD as u64 / 2) && diff >= PERIOD + self.max_neg_diff {
            return true;
        }

        false
    }
}

impl Default for TimestampState {
    fn default() -> Self {
        Self::new()
    }
}

/// Validate a FMT word found during the long-timestamp scan and return its
/// format ID when the sub-packet length matches the registered plan.
fn checked_fid(
    word: u32,
    data_words: u32,
    rd: &TraceReader,
    formats: &FormatTable,
) -> Option<u32> {
    if word == ERASED_WORD {
        return None;
    }

    let fid = word >> rd.info.fmt_id_shift;
    let plan = formats.plan_for_fid(fid)?;
    let length = plan.msg_len / 4;

    let valid = match plan.kind {
        MsgKind::SelfSized => true,
        MsgKind::NWords => {
            length == 0 || data_words == 4 || (data_words & 3) == (length & 3)
        }
        MsgKind::Extended => length.wrapping_sub(1) == data_words,
        MsgKind::Fixed => length == data_words,
    };

    valid.then_some(fid)
}
