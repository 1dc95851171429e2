// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! Message reassembly from the 32-bit word stream.
//!
//! The embedded encoding multiplexes messages into words where bit 0
//! distinguishes DATA (0) from FMT (1). A sub-packet is up to four DATA
//! words closed by one FMT word; messages longer than that are split into
//! sub-packets sharing the same timestamp + format-ID tag. Bit 31 of every
//! DATA word travels in the low bits of the FMT word and is redistributed
//! here.

use crate::core::MAX_RAW_DATA_SIZE;
use crate::format::{FormatTable, MsgKind};
use crate::io::loader::{TraceReader, ERASED_WORD};

/// Outcome of one reassembly attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AssembleResult {
    /// A complete message is in `Assembler::assembled`.
    Message,
    /// DATA words without a closing FMT word.
    BadBlock,
    /// A run of erased words.
    UnfinishedBlock,
    /// More sub-packets than the configured maximum.
    TooLong,
    EndOfBuffer,
}

/// Working state of the reassembler.
#[derive(Debug)]
pub(crate) struct Assembler {
    /// DATA words of the current sub-packet.
    raw: Vec<u32>,
    /// DATA words of the assembled message.
    pub assembled: Vec<u32>,
    /// Format ID from the FMT word, extended-data bits removed.
    pub fid: u32,
    /// Low FMT-word bits left over after the bit-31 redistribution.
    pub additional_data: u32,
    /// Normalized timestamp low word from the FMT word.
    pub tstamp_l: u32,
    /// DATA words of a block that had no valid FMT word.
    pub bad_packet_words: u32,
    /// Erased words skipped before this message.
    pub unfinished_words: u32,
    /// End-of-buffer was reached while scanning.
    pub finished: bool,
}

impl Assembler {
    pub fn new() -> Self {
        Assembler {
            raw: Vec::with_capacity(MAX_RAW_DATA_SIZE),
            assembled: Vec::new(),
            fid: 0,
            additional_data: 0,
            tstamp_l: 0,
            bad_packet_words: 0,
            unfinished_words: 0,
            finished: false,
        }
    }

    /// First DATA words of the rejected block, for the bad-block dump.
    pub fn bad_words(&self) -> &[u32] {
        let count = (self.bad_packet_words as usize).min(self.raw.len());
        &self.raw[..count]
    }

    /// Assemble the next message starting at the reader's cursor.
    pub fn assemble(&mut self, rd: &mut TraceReader, formats: &FormatTable) -> AssembleResult {
        self.assembled.clear();
        self.bad_packet_words = 0;
        self.unfinished_words = 0;
        let mut packet_words = 0usize;

        while rd.index < rd.in_size {
            packet_words = 0;
            self.raw.clear();

            let fmt_word = match self.find_fmt_word(rd, &mut packet_words) {
                Ok(word) => word,
                Err(result) => return result,
            };

            let tag = fmt_word & rd.info.tag_mask;

            match self.split_packet(rd, formats, packet_words, fmt_word) {
                Some(result) => return result,
                None => {}
            }

            if !self.continuation_follows(rd, tag) {
                return AssembleResult::Message;
            }

            // Sub-packet limit: 4 DATA words per block
            if self.assembled.len() >= 4 * rd.info.max_msg_blocks as usize {
                return AssembleResult::TooLong;
            }
        }

        self.finish_at_end_of_buffer(packet_words)
    }

    /// Collect DATA words until a FMT word turns up.
    fn find_fmt_word(
        &mut self,
        rd: &mut TraceReader,
        packet_words: &mut usize,
    ) -> Result<u32, AssembleResult> {
        loop {
            if *packet_words >= MAX_RAW_DATA_SIZE || rd.index >= rd.in_size {
                self.bad_packet_words = *packet_words as u32;
                return Err(AssembleResult::BadBlock);
            }

            let data = rd.buffer[rd.index];

            if data == ERASED_WORD {
                if !self.assembled.is_empty() {
                    // Keep the sub-packets gathered so far; short messages
                    // are caught during decoding. Rewind past this packet
                    // so the erased run is reported with the next message.
                    rd.index -= *packet_words;
                    *packet_words = 0;
                    return Err(AssembleResult::Message);
                }
                if *packet_words > 0 {
                    self.bad_packet_words = *packet_words as u32;
                    return Err(AssembleResult::BadBlock);
                }

                let (_, skipped) = rd.data_available();
                self.unfinished_words = skipped as u32;
                return Err(AssembleResult::UnfinishedBlock);
            }

            rd.index += 1;
            self.raw.push(data);
            *packet_words += 1;

            if data & 1 != 0 {
                return Ok(data);
            }
        }
    }

    /// Interpret the FMT word, validate the packet length, redistribute the
    /// harvested bit-31 values and append the DATA words to the message.
    ///
    /// Returns `Some` when reassembly ends with this packet (message done or
    /// bad block), `None` when a continuation may follow.
    fn split_packet(
        &mut self,
        rd: &mut TraceReader,
        formats: &FormatTable,
        packet_words: usize,
        fmt_word: u32,
    ) -> Option<AssembleResult> {
        self.fid = fmt_word >> rd.info.fmt_id_shift;
        self.tstamp_l = (fmt_word & !1) << rd.info.fmt_id_bits;

        let mut additional = self.fid;
        let expected = packet_length(formats, self.fid);

        let Some(expected) = expected else {
            if packet_words > 5 {
                // Unknown FMT word in an oversized packet: reject the DATA
                // words and retry the FMT word as its own message
                self.bad_packet_words = packet_words as u32 - 1;
                rd.index -= 1;
                return Some(AssembleResult::BadBlock);
            }
            self.redistribute_bit31(packet_words, &mut additional, formats);
            return Some(AssembleResult::Message);
        };

        if packet_words > expected {
            // Skip the leading surplus words and reinterpret the tail
            self.bad_packet_words = (packet_words - expected) as u32;
            rd.index -= expected;
            return Some(AssembleResult::BadBlock);
        }

        self.redistribute_bit31(packet_words, &mut additional, formats);

        if packet_words < 5 {
            // Only full five-word packets can have a continuation
            return Some(AssembleResult::Message);
        }

        if self.message_complete(formats) {
            return Some(AssembleResult::Message);
        }

        None
    }

    /// Move the low FMT-word bits back into bit 31 of each DATA word.
    /// Plans without extended data only carry harvested bits in the low
    /// nibble; the base format-ID bits are cut off before redistribution.
    fn redistribute_bit31(&mut self, packet_words: usize, additional: &mut u32, formats: &FormatTable) {
        let is_ext = formats
            .plan_for_fid(self.fid)
            .is_some_and(|plan| plan.kind == MsgKind::Extended);
        if !is_ext {
            *additional &= 0x0F;
        }

        let data_words = packet_words - 1;
        let mut mask = u32::MAX;

        for i in (0..data_words).rev() {
            self.raw[i] = (self.raw[i] >> 1) | ((*additional & 1) << 31);
            *additional >>= 1;
            mask <<= 1;
        }

        self.additional_data = *additional;
        self.fid &= mask;

        self.assembled.extend_from_slice(&self.raw[..data_words]);
    }

    /// A message shorter than a full packet, or whose plan length is already
    /// reached, has no continuation.
    fn message_complete(&self, formats: &FormatTable) -> bool {
        let Some(plan) = formats.plan_for_fid(self.fid) else {
            return false;
        };

        let mut length = plan.msg_len;
        if length == 0 {
            return false; // MSG0 or unknown length
        }

        if plan.kind == MsgKind::Extended && length >= 4 {
            // The extended bits have not been appended yet
            length -= 4;
        }

        length <= self.assembled.len() as u32 * 4
    }

    /// Peek up to five words ahead for a FMT word carrying the same tag.
    fn continuation_follows(&self, rd: &TraceReader, tag: u32) -> bool {
        for (offset, &data) in rd.buffer[rd.index..rd.in_size].iter().enumerate() {
            if offset >= 5 {
                return false;
            }
            if data == ERASED_WORD {
                return false;
            }
            if data & 1 != 0 {
                return data & rd.info.tag_mask == tag;
            }
        }
        false
    }

    fn finish_at_end_of_buffer(&mut self, packet_words: usize) -> AssembleResult {
        self.finished = true;

        if !self.assembled.is_empty() && packet_words == 0 {
            return AssembleResult::Message;
        }
        if packet_words > 0 {
            self.bad_packet_words = packet_words as u32;
            return AssembleResult::BadBlock;
        }

        AssembleResult::EndOfBuffer
    }
}

/// Expected sub-packet length for a format ID: 1..=5 words including the
/// FMT word, or `None` when no plan length applies. For plans allocated in
/// 16-ID ranges the low ID bits may carry payload, so the lookup walks down
/// to the range base.
fn packet_length(formats: &FormatTable, fid: u32) -> Option<usize> {
    if fid >= formats.max_ids() {
        return None;
    }

    let mut base = fid;
    let mut plan = formats.plan_for_fid(base);
    while base & 0xF != 0 && plan.is_none() {
        base -= 1;
        plan = formats.plan_for_fid(base);
    }
    let plan = plan?;

    let mut len = (plan.msg_len / 4) as usize;
    match plan.kind {
        MsgKind::Fixed => {}
        MsgKind::Extended => {
            if len > 0 {
                len -= 1; // one data element travels in the FMT word
            }
        }
        MsgKind::NWords => {
            if len == 0 || len > 4 {
                len = 4;
            }
        }
        MsgKind::SelfSized => len = 4,
    }

    Some(len + 1)
}
