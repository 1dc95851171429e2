// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! Binary-stream decoding.
//!
//! The [`Decoder`] owns all run state: the compiled format table, the enum
//! table, output files, timestamp reconstruction, statistics and error
//! tallies. A run is strictly sequential: compile the format files, then
//! walk the trace buffer message by message.

mod assemble;
pub mod printf;
mod printer;
pub mod stats;
pub mod timestamp;

use std::io::Write;

use chrono::{DateTime, Local};
use tracing::debug;

use crate::cli::Params;
use crate::core::enums::{EnumPayload, EnumTable};
use crate::core::error::{DecodeErrorCode, ErrorTally, FatalError, Result};
use crate::core::MAX_ERRORS_IN_SINGLE_MESSAGE;
use crate::format::table::{FID_LONG_TIMESTAMP, FID_TSTAMP_FREQUENCY};
use crate::format::{FormatTable, MsgKind, PlanId};
use crate::io::loader::{TraceReader, ERASED_WORD};
use crate::io::output::{
    OutputSet, FILTER_NAMES_FILE, FORMAT_DEBUG_FILE, STAT_MAIN_FILE, STAT_MSGS_FOUND_FILE,
    STAT_MSGS_MISSING_FILE, STAT_VALUES_FILE,
};
use crate::parser::{Compiler, ParseReporter, MAIN_FMT_FILE};

use assemble::{AssembleResult, Assembler};
use printer::{format_msg_number, format_timestamp, MsgErrorRing, PrintCtx};
use stats::StatRegistry;
use timestamp::TimestampState;

/// Streaming system-message sub-codes, carried in timestamp bits 11..14.
const SYS_HOST_DATE_TIME: u32 = 0;
const SYS_DATA_OVERRUN: u32 = 1;
const SYS_MULTIPLE_LOGGING: u32 = 2;

/// The decoder aggregate. Created once per run; the compile and decode
/// phases mutate it strictly in sequence.
pub struct Decoder {
    params: Params,
    formats: FormatTable,
    enums: EnumTable,
    stats: StatRegistry,
    out: OutputSet,
    reporter: ParseReporter,
    decode_tally: ErrorTally,
    ts: TimestampState,
    asm: Assembler,
    reader: Option<TraceReader>,

    /// Message bytes of the message being printed.
    msg_bytes: Vec<u8>,
    msg_cnt: u32,
    msgs_since_restart: u32,
    /// Snapshot counter for multi-capture files.
    multiple_logging: u32,
    /// Message number that gets the mid-message capture warning.
    error_warning_msg: u32,
    date_string: String,
    ring: MsgErrorRing,
    prev_csv_time: f64,
    total_bad_words: u64,
    total_unfinished: u64,
    decoding_finished: bool,
}

impl Decoder {
    /// Create the decoder: output folder, error log, empty tables.
    pub fn new(params: Params) -> Result<Self> {
        let out = OutputSet::create(&params.out_dir)?;
        let reporter = ParseReporter::new(params.error_report.as_deref(), params.fmt_dir.clone());
        let mut formats = FormatTable::new(params.fmt_id_bits);
        formats.install_streaming_plan();

        Ok(Decoder {
            formats,
            enums: EnumTable::new(),
            stats: StatRegistry::new(),
            out,
            reporter,
            decode_tally: ErrorTally::new(),
            ts: TimestampState::new(),
            asm: Assembler::new(),
            reader: None,
            msg_bytes: Vec::new(),
            msg_cnt: 0,
            msgs_since_restart: 0,
            multiple_logging: 0,
            error_warning_msg: 1,
            date_string: String::new(),
            ring: MsgErrorRing::default(),
            prev_csv_time: 0.0,
            total_bad_words: 0,
            total_unfinished: 0,
            decoding_finished: false,
            params,
        })
    }

    /// Parse the format definition tree rooted at the main format file.
    pub fn compile_format_files(&mut self) -> Result<()> {
        let mut compiler = Compiler {
            formats: &mut self.formats,
            enums: &mut self.enums,
            stats: &mut self.stats,
            out: &mut self.out,
            params: &self.params,
            reporter: &mut self.reporter,
        };
        compiler.parse_file(MAIN_FMT_FILE, 0)?;

        if self.parse_errors() == 0 {
            if self.params.debug {
                self.dump_format_table()?;
            }
            if self.params.check_only {
                self.dump_filter_names()?;
            }
        }
        Ok(())
    }

    /// The run parameters.
    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Number of errors found while compiling the format files.
    pub fn parse_errors(&self) -> u64 {
        self.reporter.total()
    }

    /// Number of errors found while decoding the binary stream.
    pub fn decode_errors(&self) -> u64 {
        self.decode_tally.total()
    }

    /// True when the whole buffer was decoded (errors may have occurred).
    pub fn decoding_finished(&self) -> bool {
        self.decoding_finished
    }

    /// Remove stale outputs after a failed format parse.
    pub fn discard_outputs(&mut self) {
        self.out.remove_stale_outputs();
    }

    /// Decode the binary trace file (skipped in check-only mode).
    pub fn decode_binary_file(&mut self) -> Result<()> {
        if self.params.check_only {
            return Ok(());
        }

        let Some(bin_file) = self.params.bin_file.clone() else {
            return Err(FatalError::NoBinFile);
        };

        self.out.create_main_log()?;
        if self.params.timestamps_file {
            self.out.create_timestamps_log()?;
            let _ = writeln!(
                self.out.timestamps,
                "message;timestamp{unit};difference{unit}",
                unit = self.params.time_unit.label().trim()
            );
        }

        let mut reader = TraceReader::open(&bin_file, self.params.fmt_id_bits)?;
        self.ts.set_frequency(
            reader.header.timestamp_frequency,
            reader.info.timestamp_shift,
            reader.info.fmt_id_bits,
        );
        if let Some((neg_ms, pos_ms)) = self.params.ts_diff_ms {
            self.ts
                .apply_diff_override(
                    neg_ms,
                    pos_ms,
                    reader.info.timestamp_shift,
                    reader.info.fmt_id_bits,
                )
                .map_err(FatalError::BadParameters)?;
        }

        self.print_banner(&bin_file, &reader)?;
        reader.load()?;
        self.report_load_notes(&mut reader)?;

        self.reset_statistics();

        let (found, skipped) = reader.data_available();
        self.total_unfinished += skipped as u64;
        if !found {
            return Err(FatalError::NoDataInFile(bin_file.display().to_string()));
        }

        if self.decode_tally.total() > 0 {
            let _ = writeln!(self.out.main_log);
        }

        self.print_intro()?;
        self.reader = Some(reader);
        self.run_decode_loop()?;

        Ok(())
    }

    /// Write statistics, the error summary and the final notes; flush all
    /// files and compute the process exit code.
    pub fn finish(&mut self) -> Result<i32> {
        if !self.params.check_only && self.params.bin_file.is_some() && self.parse_errors() == 0 {
            self.write_statistics()?;
            self.report_error_summary()?;
            self.print_notes()?;
        }

        self.out.flush_all();
        for writer in self.enums.out_writers_mut() {
            let _ = writer.flush();
        }

        if self.parse_errors() > 0 {
            if !self.params.check_only {
                self.out.remove_stale_outputs();
            }
            return Ok(1);
        }

        if !self.params.check_only && self.decode_errors() > 0 {
            return Ok(if self.decoding_finished { 3 } else { 2 });
        }

        Ok(0)
    }

    // ----- decode loop ---------------------------------------------------

    fn run_decode_loop(&mut self) -> Result<()> {
        loop {
            let Some(reader) = self.reader.as_mut() else {
                return Err(FatalError::Internal("no trace reader".to_string()));
            };
            let last_index = reader.already_processed + reader.index as u64;
            let code = self.asm.assemble(reader, &self.formats);
            let errors_before = self.decode_tally.total();

            match code {
                AssembleResult::EndOfBuffer => break,
                AssembleResult::Message => self.process_message(last_index)?,
                AssembleResult::BadBlock => self.report_bad_block(last_index)?,
                AssembleResult::UnfinishedBlock => self.report_unfinished_block(last_index)?,
                AssembleResult::TooLong => self.report_too_long(last_index)?,
            }

            self.total_bad_words += u64::from(self.asm.bad_packet_words);
            self.total_unfinished += u64::from(self.asm.unfinished_words);

            // A mid-message capture start shows up as errors in the first
            // message of a snapshot
            if self.msg_cnt == self.error_warning_msg
                && self.decode_tally.total() != errors_before
            {
                let _ = write!(
                    self.out.main_log,
                    "\nNote: errors in the first message of a capture; \
                     logging may have started in the middle of a message."
                );
            }

            if self.params.debug || self.params.extra_newline {
                let _ = writeln!(self.out.main_log);
            }

            if let Some(reader) = self.reader.as_mut() {
                reader.maybe_refill()?;
                let notes = reader.take_notes();
                for note in notes {
                    self.report_problem(note.code, note.data)?;
                }
            }
        }

        self.decoding_finished = self.asm.finished;
        Ok(())
    }

    /// Decode and print one assembled message.
    fn process_message(&mut self, last_index: u64) -> Result<()> {
        self.msg_cnt += 1;

        let fid = self.asm.fid;
        let Some(plan_id) = self.formats.plan_id(fid) else {
            self.report_problem(DecodeErrorCode::NoFormatDefinition, u64::from(fid))?;
            self.hex_dump_assembled(true)?;
            return Ok(());
        };

        if self.params.debug {
            self.debug_print_message(last_index)?;
        }

        let message_ok = self.prepare_msg_bytes(plan_id)?;
        let fid = self.asm.fid; // extended-data bits are cleared by now

        // Size check against the compiled plan
        let plan = self.formats.plan(plan_id);
        if plan.msg_len != 0 && self.msg_bytes.len() as u32 != plan.msg_len {
            let actual = self.msg_bytes.len() as u64;
            let expected = u64::from(plan.msg_len);
            self.report_problem2(DecodeErrorCode::SizeMismatch, actual, expected)?;
            self.hex_dump_assembled(true)?;
            return Ok(());
        }

        if fid < 4 {
            self.process_system_message()?;
        }

        let topmost = self.formats.topmost();
        if fid == topmost {
            self.process_streaming_message()?;
        } else {
            self.ts.low = self.asm.tstamp_l;
            if let Some(reader) = self.reader.as_ref() {
                self.ts.prepare(fid, self.msg_cnt, reader, &self.formats);
            }

            if message_ok {
                self.print_message(plan_id)?;
            }
        }

        Ok(())
    }

    /// Build the printable message bytes: append the extended-data word for
    /// EXT_MSG plans, validate and trim MSGX sizes.
    fn prepare_msg_bytes(&mut self, plan_id: PlanId) -> Result<bool> {
        self.msg_bytes.clear();
        for word in &self.asm.assembled {
            self.msg_bytes.extend_from_slice(&word.to_le_bytes());
        }

        let kind = self.formats.plan(plan_id).kind;
        let mask = self.formats.plan(plan_id).ext_data_mask;

        match kind {
            MsgKind::Extended => {
                let ext = u32::from(self.asm.additional_data as u16 & mask);
                self.msg_bytes.extend_from_slice(&ext.to_le_bytes());
                self.asm.fid &= !u32::from(mask);
            }
            MsgKind::SelfSized => return self.trim_self_sized(),
            _ => {}
        }

        Ok(true)
    }

    /// The last byte of a MSGX message holds its size; validate the size
    /// and the zero padding, then trim.
    fn trim_self_sized(&mut self) -> Result<bool> {
        if self.msg_bytes.is_empty() {
            self.report_problem(DecodeErrorCode::MsgxEmpty, 0)?;
            return Ok(false);
        }

        let total = self.msg_bytes.len();
        let size = usize::from(self.msg_bytes[total - 1]);

        if size > total - 1 {
            self.report_problem2(DecodeErrorCode::MsgxSizeTooLarge, size as u64, (total - 1) as u64)?;
            self.hex_dump_assembled(false)?;
            return Ok(false);
        }
        if size + 4 < total {
            self.report_problem2(DecodeErrorCode::MsgxSizeTooSmall, size as u64, (total - 4) as u64)?;
            self.hex_dump_assembled(false)?;
            return Ok(false);
        }
        if self.msg_bytes[size..total - 1].iter().any(|&b| b != 0) {
            self.report_problem(DecodeErrorCode::MsgxCorrupted, 0)?;
            self.hex_dump_assembled(false)?;
            return Ok(false);
        }

        self.msg_bytes.truncate(size);
        Ok(true)
    }

    /// Long-timestamp and timestamp-frequency system messages.
    fn process_system_message(&mut self) -> Result<()> {
        if self.msg_bytes.len() != 4 {
            self.report_problem(DecodeErrorCode::BadSystemMessage, self.msg_bytes.len() as u64)?;
            return Ok(());
        }

        let payload = u32::from_le_bytes([
            self.msg_bytes[0],
            self.msg_bytes[1],
            self.msg_bytes[2],
            self.msg_bytes[3],
        ]);

        match self.asm.fid & !1 {
            FID_LONG_TIMESTAMP => {
                if payload == 0 && self.ts.high != 0 {
                    // The embedded system was restarted
                    self.reset_statistics();
                }

                if payload == ERASED_WORD {
                    // Restart-timing marker: statistics and time start over
                    self.reset_statistics();
                    self.ts.zero();
                } else {
                    self.ts.high = payload;
                }
            }
            FID_TSTAMP_FREQUENCY => {
                if payload == 0 {
                    self.report_problem(DecodeErrorCode::TimestampFrequencyZero, 0)?;
                } else if let Some(reader) = self.reader.as_ref() {
                    let info = reader.info;
                    self.ts
                        .set_frequency(payload, info.timestamp_shift, info.fmt_id_bits);
                }
            }
            _ => {
                self.report_problem(DecodeErrorCode::Internal, u64::from(self.asm.fid))?;
            }
        }

        Ok(())
    }

    /// Host-inserted streaming system messages (date/time snapshot, overrun
    /// marker, multi-capture separator).
    fn process_streaming_message(&mut self) -> Result<()> {
        // Internal messages are not counted
        self.msg_cnt -= 1;

        let Some(reader) = self.reader.as_ref() else {
            return Ok(());
        };
        let info = reader.info;
        let sub_code = self.asm.tstamp_l >> (info.fmt_id_bits + 1 + 11);

        match sub_code {
            SYS_HOST_DATE_TIME => {
                self.decode_host_date_time();
                let date = self.date_string.clone();
                let _ = write!(self.out.main_log, "\nData sampled at: {date}");
            }
            SYS_DATA_OVERRUN => {
                self.decode_host_date_time();
                let date = self.date_string.clone();
                let _ = write!(self.out.main_log, "\nData overrun detected at: {date}");
                self.reset_statistics();
            }
            SYS_MULTIPLE_LOGGING => {
                self.decode_host_date_time();
                let date = self.date_string.clone();
                let _ = write!(self.out.main_log, "\nSnapshot captured at: {date}");
                self.multiple_logging += 1;
                self.reset_statistics();
            }
            other => {
                self.report_problem(DecodeErrorCode::UnknownSysCode, u64::from(other))?;
            }
        }

        Ok(())
    }

    /// Unpack the 43-bit host date/time from the data word plus the low
    /// timestamp bits into the `%D` date string.
    fn decode_host_date_time(&mut self) {
        let fmt_id_bits = self
            .reader
            .as_ref()
            .map(|rd| rd.info.fmt_id_bits)
            .unwrap_or(crate::core::MIN_FMT_ID_BITS);
        let word = if self.msg_bytes.len() >= 4 {
            u32::from_le_bytes([
                self.msg_bytes[0],
                self.msg_bytes[1],
                self.msg_bytes[2],
                self.msg_bytes[3],
            ])
        } else {
            0
        };

        let high = u64::from(self.asm.tstamp_l >> (fmt_id_bits + 1)) & 0x7FF;
        let date_time = u64::from(word) | (high << 32);

        self.date_string = format!(
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}.{:03}",
            ((date_time >> 36) & 0x7F) + 2023,
            ((date_time >> 32) & 0x0F) + 1,
            (date_time >> 27) & 0x1F,
            (date_time >> 22) & 0x1F,
            (date_time >> 16) & 0x3F,
            (date_time >> 10) & 0x3F,
            date_time & 0x3FF,
        );
    }

    /// Execute the plan's value slots and emit the per-message output.
    fn print_message(&mut self, plan_id: PlanId) -> Result<()> {
        self.ring.clear();

        if self.formats.plan(plan_id).slots.is_empty() {
            self.report_problem(DecodeErrorCode::NoFormatString, 0)?;
            return Ok(());
        }

        // MSGN and MSGX must not carry extended data
        let kind = self.formats.plan(plan_id).kind;
        if matches!(kind, MsgKind::NWords | MsgKind::SelfSized) && self.asm.additional_data != 0 {
            self.report_problem(
                DecodeErrorCode::UnwantedExtendedData,
                u64::from(self.asm.additional_data),
            )?;
            self.asm.additional_data = 0;
        }

        // Message header in the main log
        let _ = writeln!(self.out.main_log);
        if self.ts.mark_problem {
            let _ = write!(self.out.main_log, "#");
            self.ts.mark_problem = false;
            self.ts.suspicious += 1;
        }
        let header = format!(
            "{} {} {}: ",
            format_msg_number(&self.params, self.msg_cnt),
            format_timestamp(&self.params, self.ts.seconds),
            self.formats.plan(plan_id).name
        );
        let _ = self.out.main_log.write_all(header.as_bytes());

        self.log_timestamp_csv();
        self.msgs_since_restart += 1;

        // Slot loop: the format table stays immutable, everything else is
        // split into the print context
        let plan = self.formats.plan(plan_id);
        let mut value_no = 0u32;
        for slot in &plan.slots {
            if slot.print_kind != crate::format::PrintKind::PlainText {
                value_no += 1;
            }

            let mut ctx = PrintCtx {
                formats: &self.formats,
                enums: &mut self.enums,
                stats: &mut self.stats,
                main_log: &mut self.out.main_log,
                params: &self.params,
                ts_seconds: self.ts.seconds,
                msg_cnt: self.msg_cnt,
                msg_bytes: &self.msg_bytes,
                errors: &mut self.ring,
                value_no,
                date_string: &self.date_string,
            };
            printer::print_slot(slot, plan, &mut ctx)?;
        }

        self.flush_message_errors()?;

        let data_words = self.asm.assembled.len() as u32;
        let seconds = self.ts.seconds;
        self.formats
            .plan_mut(plan_id)
            .record_instance(data_words, seconds);

        Ok(())
    }

    /// Relative timestamps for Timestamps.csv.
    fn log_timestamp_csv(&mut self) {
        if !self.out.timestamps.is_open() {
            return;
        }

        if self.msgs_since_restart > 0 && self.ring.is_empty() {
            let mult = self.params.time_multiplier();
            let diff = (self.ts.seconds - self.prev_csv_time) * mult;
            let line = format!(
                "{};{:.6};{}\n",
                format_msg_number(&self.params, self.msg_cnt),
                self.ts.seconds * mult,
                printf::format_printf("%g", printf::PrintfArg::Double(diff)),
            );
            let _ = self.out.timestamps.write_all(line.as_bytes());
        }

        self.prev_csv_time = self.ts.seconds;
    }

    /// Emit the per-message error ring after the message's own output.
    fn flush_message_errors(&mut self) -> Result<()> {
        if self.ring.is_empty() {
            return Ok(());
        }

        let mut report = String::new();
        report.push_str(&format!(
            "\n{} decoding errors:",
            format_msg_number(&self.params, self.msg_cnt)
        ));

        if self.ring.entries.len() > MAX_ERRORS_IN_SINGLE_MESSAGE {
            report.push_str(&format!(
                " (more than {MAX_ERRORS_IN_SINGLE_MESSAGE}, first shown)"
            ));
        }

        for err in self.ring.printable() {
            if err.fmt_snippet.is_empty() {
                report.push_str(&format!(
                    "\n-->#{} ERR_{:03}: 0x{:X} 0x{:X}",
                    err.value_no,
                    err.code.code(),
                    err.data1,
                    err.data2
                ));
            } else {
                report.push_str(&format!(
                    "\n-->#{} - \"{}\"\n ERR_{:03}: {}",
                    err.value_no,
                    err.fmt_snippet,
                    err.code.code(),
                    err.code.describe(err.data1, err.data2)
                ));
            }
        }

        let _ = self.out.main_log.write_all(report.as_bytes());
        let _ = self.out.error_log.write_all(report.as_bytes());

        for err in &self.ring.entries {
            self.decode_tally.bump(err.code.code());
        }
        self.ring.clear();

        // Restart the long-timestamp hunt after a damaged message
        self.ts.no_previous = true;
        Ok(())
    }

    // ----- structural error reports --------------------------------------

    fn report_bad_block(&mut self, last_index: u64) -> Result<()> {
        self.msg_cnt += 1;
        self.debug_note_index(last_index);

        let mut words = self.asm.assembled.len() as u64;
        if words != 0 {
            words += words.div_ceil(4); // include the FMT words
        }
        let total = u64::from(self.asm.bad_packet_words) + words;

        self.report_problem(DecodeErrorCode::BadBlock, total)?;
        self.hex_dump_bad_block()?;
        Ok(())
    }

    fn report_unfinished_block(&mut self, last_index: u64) -> Result<()> {
        self.msg_cnt += 1;
        self.debug_note_index(last_index);
        self.report_problem(
            DecodeErrorCode::UnfinishedBlock,
            u64::from(self.asm.unfinished_words),
        )
    }

    fn report_too_long(&mut self, last_index: u64) -> Result<()> {
        self.msg_cnt += 1;
        self.debug_note_index(last_index);
        self.report_problem(DecodeErrorCode::MessageTooLong, 0)?;
        let _ = write!(self.out.main_log, " format ID: {}", self.asm.fid);
        self.hex_dump_assembled(true)?;
        Ok(())
    }

    fn debug_note_index(&mut self, last_index: u64) {
        if self.params.debug {
            debug!(index = last_index, "message boundary");
            let _ = write!(
                self.out.main_log,
                "\n  >>> {} index: {last_index}",
                format_msg_number(&self.params, self.msg_cnt)
            );
        }
    }

    fn debug_print_message(&mut self, last_index: u64) -> Result<()> {
        let name = self
            .formats
            .plan_for_fid(self.asm.fid)
            .map(|plan| plan.name.clone())
            .unwrap_or_default();
        let _ = write!(
            self.out.main_log,
            "\n  >>> {} index: {last_index} FMT:{}({name}) hex:",
            format_msg_number(&self.params, self.msg_cnt),
            self.asm.fid
        );
        for word in &self.asm.assembled {
            let _ = write!(self.out.main_log, " {word:08X}");
        }
        Ok(())
    }

    /// One-line decode problem report to both logs.
    fn report_problem(&mut self, code: DecodeErrorCode, data: u64) -> Result<()> {
        self.report_problem2(code, data, 0)
    }

    fn report_problem2(&mut self, code: DecodeErrorCode, data1: u64, data2: u64) -> Result<()> {
        let line = format!(
            "\n{} ERR_{:03}: {}",
            format_msg_number(&self.params, self.msg_cnt),
            code.code(),
            code.describe(data1, data2)
        );
        let _ = self.out.main_log.write_all(line.as_bytes());
        let _ = self.out.error_log.write_all(line.as_bytes());
        self.decode_tally.bump(code.code());
        Ok(())
    }

    fn hex_dump_assembled(&mut self, words: bool) -> Result<()> {
        if self.asm.assembled.is_empty() {
            return Ok(());
        }

        let name = self
            .formats
            .plan_for_fid(self.asm.fid)
            .map(|plan| plan.name.as_str())
            .unwrap_or("");
        let mut text = format!("\n  >>> format ID: {}", self.asm.fid);
        if !name.is_empty() {
            text.push_str(&format!(", {name}"));
        }
        text.push_str(" hex:");

        if words {
            for word in &self.asm.assembled {
                text.push_str(&format!(" {word:08X}"));
            }
        } else {
            for word in &self.asm.assembled {
                for byte in word.to_le_bytes() {
                    text.push_str(&format!(" {byte:02X}"));
                }
            }
        }

        let _ = self.out.main_log.write_all(text.as_bytes());
        Ok(())
    }

    fn hex_dump_bad_block(&mut self) -> Result<()> {
        if self.asm.bad_packet_words == 0 {
            return Ok(());
        }

        let mut text = String::from("\n  >>> words without a closing FMT word:");
        for word in self.asm.bad_words() {
            text.push_str(&format!(" 0x{word:08X}"));
        }
        let _ = self.out.main_log.write_all(text.as_bytes());
        Ok(())
    }

    fn report_load_notes(&mut self, reader: &mut TraceReader) -> Result<()> {
        for note in reader.take_notes() {
            self.report_problem(note.code, note.data)?;
        }
        Ok(())
    }

    // ----- banners, statistics, summaries ---------------------------------

    fn print_banner(&mut self, bin_file: &std::path::Path, reader: &TraceReader) -> Result<()> {
        let _ = writeln!(
            self.out.main_log,
            "RTEmsg v{} - RTEdbg trace decoder",
            env!("CARGO_PKG_VERSION")
        );

        if let Ok(meta) = std::fs::metadata(bin_file) {
            if let Ok(modified) = meta.modified() {
                let stamp: DateTime<Local> = modified.into();
                self.date_string = stamp.format("%Y-%m-%d %H:%M:%S").to_string();
                let _ = writeln!(
                    self.out.main_log,
                    "Binary data file: \"{}\" {}",
                    bin_file.display(),
                    self.date_string
                );
            }
        }

        let _ = writeln!(
            self.out.main_log,
            "Command line: {}",
            self.params
                .raw_args
                .iter()
                .map(|a| format!("\"{a}\""))
                .collect::<Vec<_>>()
                .join(" ")
        );

        let header = &reader.header;
        if !matches!(
            reader.info.logging_mode,
            crate::io::loader::LoggingMode::Streaming | crate::io::loader::LoggingMode::MultiCapture
        ) {
            let _ = writeln!(
                self.out.main_log,
                "Buffer size: {} words, write index: {}",
                header.buffer_size, header.last_index
            );
        }
        let _ = writeln!(
            self.out.main_log,
            "Timestamp frequency: {:.6} MHz (divider {}), logging mode: {}",
            f64::from(header.timestamp_frequency) / 1e6,
            1u32 << reader.info.timestamp_shift,
            reader.info.logging_mode.describe()
        );

        if header.filtering_enabled() {
            self.print_filter_info(reader)?;
        } else {
            let _ = writeln!(self.out.main_log, "Message filtering is disabled.");
        }

        Ok(())
    }

    fn print_filter_info(&mut self, reader: &TraceReader) -> Result<()> {
        let _ = writeln!(
            self.out.main_log,
            "Filter: 0x{:08X} (copy 0x{:08X})",
            reader.header.filter, reader.header.filter_copy
        );

        let mut lines = Vec::new();
        for (i, entry) in self.enums.filter_slots().enumerate() {
            let Some(entry) = entry else { continue };
            let name = match &entry.payload {
                EnumPayload::Filter {
                    description: Some(text),
                } => text.as_str(),
                _ => entry.name.as_str(),
            };

            let bit = 31 - i as u32;
            let enabled = (reader.header.filter >> bit) & 1;
            let copy = (reader.header.filter_copy >> bit) & 1;
            lines.push(format!("{i:3} = {enabled}({copy}) \"{name}\""));
        }

        if !lines.is_empty() {
            let _ = writeln!(self.out.main_log, "Enabled message filters:");
            for line in lines {
                let _ = writeln!(self.out.main_log, "{line}");
            }
        }
        Ok(())
    }

    fn print_intro(&mut self) -> Result<()> {
        let _ = writeln!(
            self.out.main_log,
            "Message number, timestamp {} and decoded contents:",
            self.params.time_unit.label().trim()
        );
        let _ = writeln!(
            self.out.main_log,
            "- - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - -"
        );
        Ok(())
    }

    /// Fold per-snapshot counters into the totals and restart the
    /// timestamp reference; called at snapshot boundaries and at shutdown.
    fn reset_statistics(&mut self) {
        self.error_warning_msg = self.msg_cnt + 1;
        self.formats.reset_counters();
        self.ts.restart();
        self.msgs_since_restart = 0;
    }

    fn write_statistics(&mut self) -> Result<()> {
        self.reset_statistics();

        if self.msg_cnt > 0 {
            self.write_main_statistics()?;
        }
        if self.params.msg_stats {
            self.write_message_statistics()?;
        }
        if self.msg_cnt > 0 && self.params.value_stats {
            self.write_value_statistics()?;
        }
        Ok(())
    }

    fn write_main_statistics(&mut self) -> Result<()> {
        let mut out = self.out.create_aux(STAT_MAIN_FILE)?;

        writeln!(out, "Messages processed: {}", self.msg_cnt)?;
        if self.total_bad_words > 0 {
            writeln!(out, "Words without a FMT word: {}", self.total_bad_words)?;
        }
        if self.total_unfinished > 0 {
            writeln!(out, "Unfinished (erased) words: {}", self.total_unfinished)?;
        }
        if self.multiple_logging > 1 {
            writeln!(out, "Snapshots in the file: {}", self.multiple_logging)?;
        }

        let used = self
            .formats
            .iter_unique()
            .filter(|&(fid, _)| fid < self.formats.topmost())
            .count();
        let topmost = self.formats.topmost();
        writeln!(
            out,
            "Format IDs used: {used} of {topmost} ({:.1}%)",
            100.0 * used as f64 / f64::from(topmost)
        )?;

        if self.msg_cnt > 1 {
            let top = stats::top_by_frequency(&self.formats);
            if !top.is_empty() {
                writeln!(out, "\nMessage types with the highest frequency:")?;
                for (i, entry) in top.iter().enumerate() {
                    let name = self
                        .formats
                        .plan_for_fid(entry.fid)
                        .map(|p| p.name.as_str())
                        .unwrap_or("(undefined)");
                    writeln!(out, "{:2} {:6} {name}", i + 1, entry.value)?;
                }
            }

            let top = stats::top_by_buffer_usage(&self.formats);
            if !top.is_empty() {
                writeln!(out, "\nMessage types with the highest buffer usage [bytes]:")?;
                for (i, entry) in top.iter().enumerate() {
                    let name = self
                        .formats
                        .plan_for_fid(entry.fid)
                        .map(|p| p.name.as_str())
                        .unwrap_or("(undefined)");
                    writeln!(out, "{:2} {:6} {name}", i + 1, entry.value)?;
                }
            }
        }

        out.flush()?;
        Ok(())
    }

    fn write_message_statistics(&mut self) -> Result<()> {
        let mut found = self.out.create_aux(STAT_MSGS_FOUND_FILE)?;
        let mut missing = self.out.create_aux(STAT_MSGS_MISSING_FILE)?;

        for (_, plan_id) in self.formats.iter_unique() {
            let plan = self.formats.plan(plan_id);
            if plan.counter_total == 0 {
                writeln!(missing, "{}", plan.name)?;
            } else {
                writeln!(found, "{:5} - {}", plan.counter_total, plan.name)?;
            }
        }

        found.flush()?;
        missing.flush()?;
        Ok(())
    }

    fn write_value_statistics(&mut self) -> Result<()> {
        let mut out = self.out.create_aux(STAT_VALUES_FILE)?;
        let mut found = 0;

        for stat in self.stats.iter() {
            if stat.count == 0 {
                continue;
            }
            found += 1;

            let g = |v: f64| printf::format_printf("%g", printf::PrintfArg::Double(v));

            write!(out, "\"{}\";maximums", stat.name)?;
            for (value, _) in stat.maxima() {
                write!(out, ";{}", g(*value))?;
            }
            write!(out, "\nin messages")?;
            for (_, msg_no) in stat.maxima() {
                write!(out, ";{}", format_msg_number(&self.params, *msg_no))?;
            }
            write!(out, "\nminimums")?;
            for (value, _) in stat.minima() {
                write!(out, ";{}", g(*value))?;
            }
            write!(out, "\nin messages")?;
            for (_, msg_no) in stat.minima() {
                write!(out, ";{}", format_msg_number(&self.params, *msg_no))?;
            }
            writeln!(out, "\naverage;{};count;{}", g(stat.mean()), stat.count)?;
        }

        if found == 0 {
            writeln!(out, "No value statistics were collected.")?;
        }

        out.flush()?;
        Ok(())
    }

    fn report_error_summary(&mut self) -> Result<()> {
        if self.decode_tally.total() == 0 {
            return Ok(());
        }

        let mut text = format!(
            "\n\nTotal errors detected during decoding: {}\n",
            self.decode_tally.total()
        );
        let codes: Vec<(u32, u64)> = self.decode_tally.iter().collect();
        for (code, count) in codes {
            let describe = DecodeErrorCode::describe_code(code);
            text.push_str(&format!("ERR_{code:03} ({count}x): {describe}\n"));
        }

        let _ = self.out.main_log.write_all(text.as_bytes());
        let _ = self.out.error_log.write_all(text.as_bytes());
        Ok(())
    }

    fn print_notes(&mut self) -> Result<()> {
        let long_timestamp_missing = self
            .reader
            .as_ref()
            .is_some_and(|rd| rd.info.long_timestamp_used && !self.ts.long_found);

        if !long_timestamp_missing && self.ts.suspicious == 0 {
            return Ok(());
        }

        let _ = writeln!(self.out.main_log, "\nNote:");
        if long_timestamp_missing {
            let _ = writeln!(
                self.out.main_log,
                "No long timestamp message was found; absolute times may be wrong."
            );
        }
        if self.ts.suspicious > 0 {
            let _ = writeln!(
                self.out.main_log,
                "{} messages had a suspicious timestamp (marked with '#').",
                self.ts.suspicious
            );
        }
        Ok(())
    }

    /// Filter_names.txt: one line per filter slot (compile mode only).
    fn dump_filter_names(&mut self) -> Result<()> {
        let mut out = self.out.create_aux(FILTER_NAMES_FILE)?;

        for entry in self.enums.filter_slots() {
            let name = entry
                .map(|e| match &e.payload {
                    EnumPayload::Filter {
                        description: Some(text),
                    } => text.as_str(),
                    _ => e.name.as_str(),
                })
                .unwrap_or("");
            writeln!(out, "{name}")?;
        }

        out.flush()?;
        Ok(())
    }

    /// Format.csv: full dump of the compiled plans (debug mode).
    fn dump_format_table(&mut self) -> Result<()> {
        let mut out = self.out.create_aux(FORMAT_DEBUG_FILE)?;

        writeln!(
            out,
            "FMT\tName\tType\tLength\tString\tOutput\tValue kind\tPrint kind\tAddr\tSize\t\
             Get.memo\tPut.memo\tIn.file\tOffset\tMult\tTimer\tStatistics"
        )?;

        for (fid, plan_id) in self.formats.iter_unique() {
            let plan = self.formats.plan(plan_id);
            write!(out, "{fid}\t{}\t{:?}\t{}\t", plan.name, plan.kind, plan.msg_len)?;

            for (i, slot) in plan.slots.iter().enumerate() {
                if i > 0 {
                    write!(out, "\t\t\t\t")?;
                }

                let out_name = self
                    .enums
                    .entry(slot.out_file)
                    .map(|e| e.name.as_str())
                    .unwrap_or("Main.log");
                let stat_name = slot
                    .stats
                    .map(|id| self.stats.get(id).name.as_str())
                    .unwrap_or("");
                let timer = if slot.timer_fid != 0 {
                    self.formats
                        .plan_for_fid(slot.timer_fid)
                        .map(|p| p.name.as_str())
                        .unwrap_or("")
                } else {
                    ""
                };

                writeln!(
                    out,
                    "{}\t{}{}\t{:?}\t{:?}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
                    printer_snippet(&slot.fmt),
                    if slot.also_main_log { ">>" } else { "" },
                    out_name,
                    slot.value_kind,
                    slot.print_kind,
                    slot.bit_address,
                    slot.data_bits,
                    enum_name(&self.enums, slot.get_memo),
                    enum_name(&self.enums, slot.put_memo),
                    enum_name(&self.enums, slot.in_file),
                    slot.offset,
                    slot.mult,
                    timer,
                    stat_name
                )?;
            }

            if plan.slots.is_empty() {
                writeln!(out)?;
            }
        }

        out.flush()?;
        Ok(())
    }
}

fn enum_name(enums: &EnumTable, idx: u16) -> &str {
    if idx == 0 {
        return "";
    }
    enums.entry(idx).map(|e| e.name.as_str()).unwrap_or("")
}

fn printer_snippet(fmt: &str) -> String {
    fmt.chars()
        .map(|c| if c < ' ' { '~' } else { c })
        .take(60)
        .collect()
}

impl DecodeErrorCode {
    /// Description text for the summary, looked up by numeric code.
    fn describe_code(code: u32) -> String {
        // The summary has no per-instance data; render with zeros
        ALL_DECODE_CODES
            .iter()
            .find(|c| c.code() == code)
            .map(|c| c.describe(0, 0))
            .unwrap_or_else(|| "unknown error".to_string())
    }
}

const ALL_DECODE_CODES: &[DecodeErrorCode] = &[
    DecodeErrorCode::Unknown,
    DecodeErrorCode::BadBlock,
    DecodeErrorCode::UnfinishedBlock,
    DecodeErrorCode::MessageTooLong,
    DecodeErrorCode::NoFormatDefinition,
    DecodeErrorCode::SizeMismatch,
    DecodeErrorCode::BadSystemMessage,
    DecodeErrorCode::TimestampFrequencyZero,
    DecodeErrorCode::UnknownSysCode,
    DecodeErrorCode::MsgxEmpty,
    DecodeErrorCode::MsgxSizeTooLarge,
    DecodeErrorCode::MsgxSizeTooSmall,
    DecodeErrorCode::MsgxCorrupted,
    DecodeErrorCode::UnwantedExtendedData,
    DecodeErrorCode::ValueSizeTooLarge,
    DecodeErrorCode::ValueNotInMessage,
    DecodeErrorCode::AutoAddressNot32,
    DecodeErrorCode::AutoSizeNot32,
    DecodeErrorCode::AutoWithScaling,
    DecodeErrorCode::IntSizeTooSmall,
    DecodeErrorCode::UintSizeTooSmall,
    DecodeErrorCode::FloatSizeInvalid,
    DecodeErrorCode::SizeNotByteAligned,
    DecodeErrorCode::BinaryValueType,
    DecodeErrorCode::NoFormatString,
    DecodeErrorCode::ReadBinFile,
    DecodeErrorCode::TooMuchData,
    DecodeErrorCode::NotEnoughData,
    DecodeErrorCode::SizeTruncated,
    DecodeErrorCode::IndexOutOfRange,
    DecodeErrorCode::SizeNotMultipleOf4,
    DecodeErrorCode::IndexShouldBeZero,
    DecodeErrorCode::SingleShotNotEnabled,
    DecodeErrorCode::InitialFrequencyZero,
    DecodeErrorCode::UnknownLoggingMode,
    DecodeErrorCode::CantCreateFile,
    DecodeErrorCode::Internal,
];
