// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! Trace-file loading.
//!
//! The trace file starts with a fixed six-word header followed by raw
//! little-endian 32-bit words. Depending on the logging mode the payload is
//! a linear single-shot capture, a circular post-mortem buffer that must be
//! reordered into decode order, or a streaming capture read in fixed chunks
//! with a rolling move-to-front refill.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt};
use tracing::warn;

use crate::core::error::{DecodeErrorCode, FatalError, Result};
use crate::core::MAX_FMT_ID_BITS;

/// Words loaded at once in the streaming modes. Larger captures are
/// processed in chunks of this size.
pub const BUFFER_SIZE_WORDS: usize = 0x20000;

/// Upper bound on the in-memory buffer (number of 32-bit words).
pub const MAX_BUFFER_WORDS: u32 = 0x800_0005;

/// Erased-flash word; marks data that was never written.
pub const ERASED_WORD: u32 = 0xFFFF_FFFF;

/// Fixed trace-file header, as written by the embedded logging structure.
#[derive(Debug, Clone, Copy, Default)]
pub struct TraceHeader {
    pub last_index: u32,
    pub filter: u32,
    pub cfg: u32,
    pub timestamp_frequency: u32,
    pub filter_copy: u32,
    pub buffer_size: u32,
}

impl TraceHeader {
    /// Header size in bytes.
    pub const SIZE: u64 = 24;

    pub fn read_from(reader: &mut impl Read) -> std::io::Result<Self> {
        Ok(TraceHeader {
            last_index: reader.read_u32::<LittleEndian>()?,
            filter: reader.read_u32::<LittleEndian>()?,
            cfg: reader.read_u32::<LittleEndian>()?,
            timestamp_frequency: reader.read_u32::<LittleEndian>()?,
            filter_copy: reader.read_u32::<LittleEndian>()?,
            buffer_size: reader.read_u32::<LittleEndian>()?,
        })
    }

    pub fn single_shot_active(&self) -> bool {
        self.cfg & 1 != 0
    }

    pub fn filtering_enabled(&self) -> bool {
        self.cfg >> 1 & 1 != 0
    }

    pub fn single_shot_enabled(&self) -> bool {
        self.cfg >> 3 & 1 != 0
    }

    pub fn long_timestamp_used(&self) -> bool {
        self.cfg >> 4 & 1 != 0
    }

    pub fn reserved_bits(&self) -> u32 {
        (self.cfg >> 5 & 0x07) | (self.cfg >> 15 & 1)
    }

    pub fn timestamp_shift(&self) -> u8 {
        ((self.cfg >> 8 & 0x0F) + 1) as u8
    }

    pub fn fmt_id_bits(&self) -> u8 {
        ((self.cfg >> 12 & 0x07) + 9) as u8
    }

    pub fn max_msg_blocks(&self) -> u16 {
        match self.cfg >> 16 & 0xFF {
            0 => 256,
            n => n as u16,
        }
    }

    pub fn header_size_bytes(&self) -> u32 {
        (self.cfg >> 24 & 0x7F) * 4
    }

    pub fn buffer_size_is_power_of_2(&self) -> bool {
        self.cfg >> 31 != 0
    }
}

/// Data logging mode derived from the configuration word and buffer size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoggingMode {
    PostMortem,
    SingleShot,
    Streaming,
    MultiCapture,
    Unknown(u32),
}

impl LoggingMode {
    pub fn describe(self) -> &'static str {
        match self {
            LoggingMode::PostMortem => "post-mortem",
            LoggingMode::SingleShot => "single shot",
            LoggingMode::Streaming => "streaming",
            LoggingMode::MultiCapture => "multiple data capture",
            LoggingMode::Unknown(_) => "unknown",
        }
    }
}

const STREAMING_SENTINEL: u32 = 0xFFFF_FFF0;
const MULTI_CAPTURE_SENTINEL: u32 = 0xFFFF_FFF4;

/// Pre-computed values from the trace header used on every message.
#[derive(Debug, Clone, Copy)]
pub struct HeaderInfo {
    pub fmt_id_bits: u8,
    /// Shift the FMT word right by this to isolate the format ID.
    pub fmt_id_shift: u8,
    /// Mask isolating timestamp + format-ID base for continuation matching.
    pub tag_mask: u32,
    pub timestamp_shift: u8,
    pub max_msg_blocks: u16,
    pub long_timestamp_used: bool,
    pub buffer_pow2: bool,
    pub logging_mode: LoggingMode,
    pub topmost_fid: u32,
}

/// One diagnostic produced while loading; the decoder turns these into
/// regular decode error reports.
#[derive(Debug, Clone, Copy)]
pub struct LoadNote {
    pub code: DecodeErrorCode,
    pub data: u64,
}

/// The trace reader: loaded words plus the decode cursor.
#[derive(Debug)]
pub struct TraceReader {
    file: Option<File>,
    pub header: TraceHeader,
    pub info: HeaderInfo,
    pub buffer: Vec<u32>,
    /// Decode cursor into `buffer`.
    pub index: usize,
    /// Number of valid words in `buffer`.
    pub in_size: usize,
    /// Words consumed by previous refills, for absolute index reports.
    pub already_processed: u64,
    pub complete: bool,
    notes: Vec<LoadNote>,
}

impl TraceReader {
    /// Open the trace file, read and validate the header.
    pub fn open(path: &Path, configured_fid_bits: u8) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|_| FatalError::OpenBinFile(path.display().to_string()))?;

        let file_size = file
            .metadata()
            .map_err(|_| FatalError::ReadBinFile(path.display().to_string()))?
            .len();
        if file_size <= TraceHeader::SIZE {
            return Err(FatalError::FileTooSmall {
                path: path.display().to_string(),
                size: file_size,
            });
        }

        let mut header = TraceHeader::read_from(&mut file)
            .map_err(|_| FatalError::ReadBinFile(path.display().to_string()))?;

        if header.header_size_bytes() != TraceHeader::SIZE as u32 {
            return Err(FatalError::BadHeaderSize {
                words: header.header_size_bytes() / 4,
            });
        }
        if header.reserved_bits() != 0 {
            return Err(FatalError::ReservedBitsNonZero);
        }

        let fmt_id_bits = header.fmt_id_bits();
        if fmt_id_bits > MAX_FMT_ID_BITS {
            return Err(FatalError::FmtIdBitsTooLarge(fmt_id_bits));
        }
        if fmt_id_bits != configured_fid_bits {
            return Err(FatalError::FmtIdBitsMismatch {
                header: fmt_id_bits,
                configured: configured_fid_bits,
            });
        }

        let mut notes = Vec::new();
        if header.timestamp_frequency == 0 {
            warn!("timestamp frequency in the trace header is zero, using 1 Hz");
            notes.push(LoadNote {
                code: DecodeErrorCode::InitialFrequencyZero,
                data: 0,
            });
            header.timestamp_frequency = 1;
        }

        let logging_mode = detect_logging_mode(&header);
        if let LoggingMode::Unknown(mode) = logging_mode {
            return Err(FatalError::UnknownLoggingMode(mode));
        }

        let info = HeaderInfo {
            fmt_id_bits,
            fmt_id_shift: 32 - fmt_id_bits,
            tag_mask: 0xFFFF_FFFE & !(0xFu32 << (32 - fmt_id_bits)),
            timestamp_shift: header.timestamp_shift(),
            max_msg_blocks: header.max_msg_blocks(),
            long_timestamp_used: header.long_timestamp_used(),
            buffer_pow2: header.buffer_size_is_power_of_2(),
            logging_mode,
            topmost_fid: (1u32 << fmt_id_bits) - 2,
        };

        if header.single_shot_active() && !header.single_shot_enabled() {
            notes.push(LoadNote {
                code: DecodeErrorCode::SingleShotNotEnabled,
                data: 0,
            });
        }

        Ok(TraceReader {
            file: Some(file),
            header,
            info,
            buffer: Vec::new(),
            index: 0,
            in_size: 0,
            already_processed: 0,
            complete: false,
            notes,
        })
    }

    /// Diagnostics accumulated since the last call.
    pub fn take_notes(&mut self) -> Vec<LoadNote> {
        std::mem::take(&mut self.notes)
    }

    /// Reader over an in-memory word buffer, for the decoder's unit tests.
    #[cfg(test)]
    pub(crate) fn from_words(info: HeaderInfo, words: Vec<u32>) -> Self {
        let in_size = words.len();
        TraceReader {
            file: None,
            header: TraceHeader::default(),
            info,
            buffer: words,
            index: 0,
            in_size,
            already_processed: 0,
            complete: true,
            notes: Vec::new(),
        }
    }

    /// Load the trace payload according to the logging mode.
    pub fn load(&mut self) -> Result<()> {
        let file_size = match &self.file {
            Some(file) => file.metadata().map(|m| m.len()).unwrap_or(0),
            None => return Err(FatalError::Internal("trace file closed".to_string())),
        };

        let mut data_size = file_size - TraceHeader::SIZE;
        if data_size % 4 != 0 {
            self.note(DecodeErrorCode::SizeNotMultipleOf4, 0);
            data_size &= !3;
        }
        let data_words = (data_size / 4) as u32;

        match self.info.logging_mode {
            LoggingMode::PostMortem => {
                if self.header.last_index > self.header.buffer_size {
                    // Corrupt index, try the linear interpretation
                    self.note(
                        DecodeErrorCode::IndexOutOfRange,
                        u64::from(self.header.last_index),
                    );
                    self.load_single_shot(data_words)?;
                } else if data_words < self.header.buffer_size {
                    // File shortened on purpose, decode what is present
                    self.load_single_shot(data_words)?;
                } else {
                    self.load_post_mortem(data_words)?;
                }
                self.complete = true;
                self.file = None;
            }
            LoggingMode::SingleShot => {
                self.load_single_shot(data_words)?;
                self.in_size = self.in_size.min(self.header.last_index as usize);
                self.complete = true;
                self.file = None;
            }
            LoggingMode::Streaming | LoggingMode::MultiCapture => {
                if self.header.last_index != 0 {
                    self.note(
                        DecodeErrorCode::IndexShouldBeZero,
                        u64::from(self.header.last_index),
                    );
                }
                self.buffer = Vec::new();
                self.in_size = 0;
                self.index = 0;
                self.complete = false;
                self.refill()?;
            }
            LoggingMode::Unknown(mode) => return Err(FatalError::UnknownLoggingMode(mode)),
        }

        Ok(())
    }

    /// Words left between the decode cursor and the end of valid data.
    pub fn remaining(&self) -> usize {
        self.in_size.saturating_sub(self.index)
    }

    /// Refill the streaming buffer when the undecoded remainder gets low.
    pub fn maybe_refill(&mut self) -> Result<()> {
        if self.complete {
            return Ok(());
        }

        let threshold = 2 * self.info.max_msg_blocks as usize * 5 * 4;
        if self.remaining() <= threshold {
            self.refill()?;
        }
        Ok(())
    }

    /// Move the undecoded tail to the front and read the next chunk.
    fn refill(&mut self) -> Result<()> {
        if self.complete {
            return Ok(());
        }

        let remaining = self.remaining();
        if remaining >= BUFFER_SIZE_WORDS {
            return Err(FatalError::Internal(format!(
                "refill with {remaining} undecoded words"
            )));
        }

        self.buffer.copy_within(self.index..self.in_size, 0);
        self.already_processed += self.index as u64;
        self.index = 0;
        self.in_size = remaining;
        self.buffer.resize(BUFFER_SIZE_WORDS, ERASED_WORD);

        let space = BUFFER_SIZE_WORDS - remaining;
        let (words, read) = self.read_words_at_cursor(space)?;
        self.buffer[remaining..remaining + read].copy_from_slice(&words[..read]);
        if read < space {
            self.complete = true;
            self.file = None;
        }
        self.in_size += read;
        self.buffer.truncate(self.in_size.max(remaining));

        Ok(())
    }

    /// Check whether any non-erased word remains; skipped erased words are
    /// counted in the returned value.
    pub fn data_available(&mut self) -> (bool, usize) {
        let mut skipped = 0;
        while self.index < self.in_size {
            if self.buffer[self.index] != ERASED_WORD {
                return (true, skipped);
            }
            skipped += 1;
            self.index += 1;
        }
        (false, skipped)
    }

    fn load_single_shot(&mut self, data_words: u32) -> Result<()> {
        if self.header.last_index == 0 && self.header.single_shot_active() {
            return Err(FatalError::SingleShotIndexZero);
        }

        let buffer_words = self.effective_buffer_words(data_words);
        self.seek_payload(0)?;
        let (words, read) = self.read_payload(buffer_words as usize)?;

        self.buffer = words;
        self.in_size = read;

        // Skip the leading erased run
        let start = self
            .buffer[..read]
            .iter()
            .position(|&w| w != ERASED_WORD)
            .unwrap_or(read);
        self.index = start;
        Ok(())
    }

    fn load_post_mortem(&mut self, data_words: u32) -> Result<()> {
        let effective = self.effective_buffer_words(data_words);
        let size_adjusted = effective != self.header.buffer_size;
        let mut buffer_size = effective as usize;
        let last_index = self.header.last_index.min(buffer_size as u32) as usize;

        self.seek_payload(0)?;
        let (raw, read) = self.read_payload(buffer_size)?;
        let mut size_changed = size_adjusted;
        if read != buffer_size {
            buffer_size = read;
            size_changed = true;
            if last_index > read {
                self.buffer = raw;
                self.in_size = read;
                self.index = 0;
                return Ok(());
            }
        }

        let erased_at_start = raw[..last_index]
            .iter()
            .take_while(|&&w| w == ERASED_WORD)
            .count();

        // The buffer never wrapped: only the region before last_index holds data
        if raw[last_index..read].iter().all(|&w| w == ERASED_WORD) {
            self.buffer = raw;
            self.in_size = last_index;
            self.index = erased_at_start;
            return Ok(());
        }

        let mut skip_at_end = trailer_words_to_skip(&raw, buffer_size);
        let mut skip_at_start = 0;
        if size_changed {
            skip_at_end = 0;
        } else if self.info.buffer_pow2 && buffer_size > 8 {
            // Power-of-two buffers drop four words per lap; whatever the
            // trailer did not consume is dropped at the head instead.
            skip_at_start = 4 - skip_at_end;
        }

        // Decode order: oldest data first (after last_index), then the
        // region before last_index
        let part1 = &raw[last_index..buffer_size - skip_at_end];
        let part2 = &raw[skip_at_start.min(last_index)..last_index];

        let mut buffer = Vec::with_capacity(part1.len() + part2.len());
        buffer.extend_from_slice(part1);
        buffer.extend_from_slice(part2);

        let start = buffer
            .iter()
            .position(|&w| w != ERASED_WORD)
            .unwrap_or(buffer.len());

        self.in_size = buffer.len();
        self.buffer = buffer;
        self.index = start;
        Ok(())
    }

    /// Buffer size from the header, adjusted to the actual file contents.
    fn effective_buffer_words(&mut self, data_words: u32) -> u32 {
        let mut buffer_size = self.header.buffer_size;

        if data_words > buffer_size {
            self.note(DecodeErrorCode::TooMuchData, u64::from(buffer_size));
            buffer_size = data_words;
        } else if data_words < buffer_size {
            self.note(DecodeErrorCode::NotEnoughData, u64::from(buffer_size));
            buffer_size = data_words;
        }

        if buffer_size > MAX_BUFFER_WORDS {
            self.note(
                DecodeErrorCode::SizeTruncated,
                u64::from(MAX_BUFFER_WORDS) * 4,
            );
            buffer_size = MAX_BUFFER_WORDS;
        }

        buffer_size
    }

    fn seek_payload(&mut self, word_offset: u64) -> Result<()> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| FatalError::Internal("trace file closed".to_string()))?;
        file.seek(SeekFrom::Start(TraceHeader::SIZE + word_offset * 4))
            .map_err(|err| FatalError::Io(err.to_string()))?;
        Ok(())
    }

    /// Read up to `count` words; short reads report a diagnostic and pad
    /// with erased words.
    fn read_payload(&mut self, count: usize) -> Result<(Vec<u32>, usize)> {
        let (words, read) = self.read_words_at_cursor(count)?;
        if read < count {
            self.note(DecodeErrorCode::ReadBinFile, read as u64);
        }
        Ok((words, read))
    }

    fn read_words_at_cursor(&mut self, count: usize) -> Result<(Vec<u32>, usize)> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| FatalError::Internal("trace file closed".to_string()))?;

        let mut bytes = vec![0u8; count * 4];
        let mut filled = 0;
        while filled < bytes.len() {
            match file.read(&mut bytes[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(FatalError::Io(err.to_string())),
            }
        }

        let full_words = filled / 4;
        let mut words = vec![ERASED_WORD; count];
        for (i, chunk) in bytes[..full_words * 4].chunks_exact(4).enumerate() {
            words[i] = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }

        Ok((words, full_words))
    }

    fn note(&mut self, code: DecodeErrorCode, data: u64) {
        self.notes.push(LoadNote { code, data });
    }
}

fn detect_logging_mode(header: &TraceHeader) -> LoggingMode {
    if header.single_shot_enabled() && header.single_shot_active() {
        return LoggingMode::SingleShot;
    }

    if header.buffer_size < 0xFFFF_0000 {
        return LoggingMode::PostMortem;
    }

    match header.buffer_size {
        STREAMING_SENTINEL => LoggingMode::Streaming,
        MULTI_CAPTURE_SENTINEL => LoggingMode::MultiCapture,
        other => LoggingMode::Unknown(other),
    }
}

/// Words of the 4-word circular-buffer trailer that hold no message data.
/// The FMT word (bit 0 set) closes the last message; anything after it in
/// the trailer is skipped.
fn trailer_words_to_skip(buffer: &[u32], buffer_size: usize) -> usize {
    if buffer_size < 5 {
        return 0;
    }

    if buffer[buffer_size - 5] == ERASED_WORD {
        return 4;
    }

    let mut i = buffer_size - 5;
    while i < buffer_size {
        if buffer[i] & 1 != 0 {
            break;
        }
        i += 1;
    }

    buffer_size - i - 1
}
