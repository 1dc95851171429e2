// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! Value-slot execution: extract, convert, scale, memoize, print.
//!
//! For every decoded message the printer walks the plan's value slots in
//! order. Errors inside a slot never abort the message; they are collected
//! in a per-message ring and emitted after the message's own output.

use std::io::Write;

use crate::cli::Params;
use crate::core::enums::{EnumKind, EnumTable};
use crate::core::error::{DecodeError, DecodeErrorCode};
use crate::core::value::ValueRegs;
use crate::core::MAX_ERRORS_IN_SINGLE_MESSAGE;
use crate::decode::printf::{format_printf, PrintfArg};
use crate::decode::stats::StatRegistry;
use crate::format::{FormatTable, MsgPlan, PrintKind, ValueKind, ValueSlot};
use crate::io::output::LogFile;

/// Decode errors of the message currently being printed.
#[derive(Debug, Default)]
pub(crate) struct MsgErrorRing {
    pub entries: Vec<DecodeError>,
}

impl MsgErrorRing {
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn save(&mut self, code: DecodeErrorCode, value_no: u32, data1: u64, data2: u64, fmt: &str) {
        self.entries.push(DecodeError {
            code,
            value_no,
            data1,
            data2,
            fmt_snippet: shorten(fmt),
        });
    }

    /// Entries that are printed; the rest is only counted.
    pub fn printable(&self) -> &[DecodeError] {
        let end = self.entries.len().min(MAX_ERRORS_IN_SINGLE_MESSAGE);
        &self.entries[..end]
    }
}

/// Clean a format snippet for error reports: control characters become
/// tildes, long strings are shortened.
fn shorten(text: &str) -> String {
    let mut out: String = text
        .chars()
        .take(76)
        .map(|c| if c < ' ' { '~' } else { c })
        .collect();
    if text.chars().count() > 76 {
        out.push_str("...");
    }
    out
}

/// Everything one slot execution needs. The format table stays immutable
/// for the whole slot loop; memo cells, statistics and the output files are
/// the mutable collaborators.
pub(crate) struct PrintCtx<'a> {
    pub formats: &'a FormatTable,
    pub enums: &'a mut EnumTable,
    pub stats: &'a mut StatRegistry,
    pub main_log: &'a mut LogFile,
    pub params: &'a Params,
    /// Reconstructed timestamp of the current message in seconds.
    pub ts_seconds: f64,
    pub msg_cnt: u32,
    /// Assembled message bytes (extended data appended, MSGX trimmed).
    pub msg_bytes: &'a [u8],
    pub errors: &'a mut MsgErrorRing,
    /// Consecutive number of non-literal values in this message.
    pub value_no: u32,
    /// Date string printed by `%D`.
    pub date_string: &'a str,
}

impl PrintCtx<'_> {
    fn err(&mut self, code: DecodeErrorCode, data1: u64, data2: u64, fmt: &str) {
        self.errors.save(code, self.value_no, data1, data2, fmt);
    }
}

/// Render the message-number template.
pub(crate) fn format_msg_number(params: &Params, msg_no: u32) -> String {
    format_printf(&params.msg_no_fmt, PrintfArg::Uint(u64::from(msg_no)))
}

/// Render the timestamp template for a value in seconds.
pub(crate) fn format_timestamp(params: &Params, seconds: f64) -> String {
    format_printf(
        &params.timestamp_fmt,
        PrintfArg::Double(seconds * params.time_multiplier()),
    )
}

/// Execute one value slot: prepare the value, print it, feed statistics.
pub(crate) fn print_slot(slot: &ValueSlot, plan: &MsgPlan, ctx: &mut PrintCtx) -> std::io::Result<()> {
    let mut regs = ValueRegs::default();

    let mut target = Vec::new();
    let mut mirror = Vec::new();
    render_slot(slot, plan, ctx, &mut regs, &mut target, &mut mirror);

    // Route the rendered output
    if slot.out_file != 0 {
        let routed = match ctx.enums.out_writer_mut(slot.out_file) {
            Some(writer) => {
                writer.write_all(&target)?;
                true
            }
            None => false,
        };

        if !routed {
            if ctx.enums.kind(slot.out_file) != Some(EnumKind::OutFile) {
                ctx.err(
                    DecodeErrorCode::Internal,
                    u64::from(slot.out_file),
                    0,
                    &slot.fmt,
                );
            }
            ctx.main_log.write_all(&target)?;
        }
        if slot.also_main_log {
            ctx.main_log.write_all(&mirror)?;
        }
    } else {
        ctx.main_log.write_all(&target)?;
    }

    update_statistics(slot, plan, ctx, &regs);
    Ok(())
}

/// Produce the slot's output bytes. `mirror` is the variant duplicated to
/// the main log for `>>` routing; it omits values the main log already
/// carries in the message header (timestamp, number, name).
fn render_slot(
    slot: &ValueSlot,
    plan: &MsgPlan,
    ctx: &mut PrintCtx,
    regs: &mut ValueRegs,
    target: &mut Vec<u8>,
    mirror: &mut Vec<u8>,
) {
    let mut same_mirror = true;

    match slot.print_kind {
        PrintKind::PlainText => {
            target.extend_from_slice(format_printf(&slot.fmt, PrintfArg::None).as_bytes());
        }
        PrintKind::Uint => {
            prepare_value(slot, plan, ctx, regs, false);
            target.extend_from_slice(
                format_printf(&slot.fmt, PrintfArg::Uint(regs.u)).as_bytes(),
            );
        }
        PrintKind::Int => {
            prepare_value(slot, plan, ctx, regs, false);
            target.extend_from_slice(
                format_printf(&slot.fmt, PrintfArg::Int(regs.i)).as_bytes(),
            );
        }
        PrintKind::Double => {
            prepare_value(slot, plan, ctx, regs, false);
            target.extend_from_slice(
                format_printf(&slot.fmt, PrintfArg::Double(regs.f)).as_bytes(),
            );
        }
        PrintKind::Str => {
            let text = if slot.data_bits == 0 {
                whole_message_string(ctx.msg_bytes)
            } else {
                prepare_value(slot, plan, ctx, regs, true);
                register_string(regs, slot.data_bits)
            };
            target.extend_from_slice(format_printf(&slot.fmt, PrintfArg::Str(&text)).as_bytes());
        }
        PrintKind::SelectedText => {
            prepare_value(slot, plan, ctx, regs, false);
            target.extend_from_slice(format_printf(&slot.fmt, PrintfArg::None).as_bytes());
            let selected = ctx
                .enums
                .indexed_text(slot.in_file)
                .map(|text| text.select(regs.u));
            match selected {
                Some(text) => target.extend_from_slice(text.as_bytes()),
                None => ctx.err(
                    DecodeErrorCode::Internal,
                    u64::from(slot.in_file),
                    0,
                    &slot.fmt,
                ),
            }
        }
        PrintKind::Binary => {
            prepare_value(slot, plan, ctx, regs, false);
            target.extend_from_slice(format_printf(&slot.fmt, PrintfArg::None).as_bytes());
            if slot.value_kind == ValueKind::Uint {
                target.extend_from_slice(binary_digits(regs.u, slot.data_bits).as_bytes());
                regs.f = regs.u as f64;
            } else {
                ctx.err(DecodeErrorCode::BinaryValueType, 0, 0, &slot.fmt);
            }
        }
        PrintKind::Timestamp => {
            regs.set_double(ctx.ts_seconds);
            target.extend_from_slice(format_printf(&slot.fmt, PrintfArg::None).as_bytes());
            target.extend_from_slice(format_timestamp(ctx.params, ctx.ts_seconds).as_bytes());
            store_memo(slot, ctx, regs);
            // The main log already shows the timestamp in the header
            mirror.extend_from_slice(format_printf(&slot.fmt, PrintfArg::None).as_bytes());
            same_mirror = false;
        }
        PrintKind::DeltaTimestamp => {
            let mut value = 0.0;
            if plan.counter > 0 {
                value = ctx.ts_seconds - plan.time_last;
            }
            regs.set_double(value);
            target.extend_from_slice(format_printf(&slot.fmt, PrintfArg::None).as_bytes());
            target.extend_from_slice(format_timestamp(ctx.params, value).as_bytes());
            store_memo(slot, ctx, regs);
            mirror.extend_from_slice(format_printf(&slot.fmt, PrintfArg::None).as_bytes());
            mirror.extend_from_slice(format_timestamp(ctx.params, value).as_bytes());
            same_mirror = false;
        }
        PrintKind::MsgNumber => {
            regs.set_unsigned(u64::from(ctx.msg_cnt));
            target.extend_from_slice(format_printf(&slot.fmt, PrintfArg::None).as_bytes());
            target.extend_from_slice(format_msg_number(ctx.params, ctx.msg_cnt).as_bytes());
            store_memo(slot, ctx, regs);
            mirror.extend_from_slice(format_printf(&slot.fmt, PrintfArg::None).as_bytes());
            same_mirror = false;
        }
        PrintKind::Hex1 | PrintKind::Hex2 | PrintKind::Hex4 => {
            let item = match slot.print_kind {
                PrintKind::Hex1 => 1,
                PrintKind::Hex2 => 2,
                _ => 4,
            };
            // The compiler rejects hex dumps at unaligned cursor positions
            let skip = (slot.bit_address / 8) as usize;
            if skip <= ctx.msg_bytes.len() {
                target.extend_from_slice(format_printf(&slot.fmt, PrintfArg::None).as_bytes());
                target.extend_from_slice(hex_dump(&ctx.msg_bytes[skip..], item).as_bytes());
            }
        }
        PrintKind::BinToFile => {
            target.extend_from_slice(format_printf(&slot.fmt, PrintfArg::None).as_bytes());
            if slot.data_bits == 0 {
                target.extend_from_slice(ctx.msg_bytes);
            } else if slot.data_bits % 8 != 0 {
                ctx.err(
                    DecodeErrorCode::SizeNotByteAligned,
                    u64::from(slot.data_bits),
                    8,
                    &slot.fmt,
                );
            } else {
                prepare_value(slot, plan, ctx, regs, true);
                let bytes = regs.u.to_le_bytes();
                target.extend_from_slice(&bytes[..(slot.data_bits / 8) as usize]);
            }
        }
        PrintKind::Date => {
            target.extend_from_slice(format_printf(&slot.fmt, PrintfArg::None).as_bytes());
            target.extend_from_slice(ctx.date_string.as_bytes());
        }
        PrintKind::MsgName => {
            target.extend_from_slice(format_printf(&slot.fmt, PrintfArg::None).as_bytes());
            target.extend_from_slice(plan.name.as_bytes());
            mirror.extend_from_slice(format_printf(&slot.fmt, PrintfArg::None).as_bytes());
            same_mirror = false;
        }
    }

    if same_mirror {
        mirror.clear();
        mirror.extend_from_slice(target);
    }
}

/// Prepare the numeric views of the slot's value.
fn prepare_value(
    slot: &ValueSlot,
    plan: &MsgPlan,
    ctx: &mut PrintCtx,
    regs: &mut ValueRegs,
    byte_aligned: bool,
) {
    // Byte-range addresses are validated by the format compiler
    if byte_aligned && slot.data_bits % 8 != 0 {
        ctx.err(
            DecodeErrorCode::SizeNotByteAligned,
            u64::from(slot.data_bits),
            8,
            &slot.fmt,
        );
        return;
    }

    match slot.value_kind {
        ValueKind::Auto => prepare_auto(slot, ctx, regs),
        ValueKind::Int => {
            if slot.data_bits < 2 {
                ctx.err(
                    DecodeErrorCode::IntSizeTooSmall,
                    u64::from(slot.data_bits),
                    1,
                    &slot.fmt,
                );
                return;
            }
            if extract(slot, ctx, regs) {
                regs.f = regs.i as f64;
                regs.scale(slot.offset, slot.mult);
            }
        }
        ValueKind::Uint => {
            if slot.data_bits < 1 {
                ctx.err(
                    DecodeErrorCode::UintSizeTooSmall,
                    u64::from(slot.data_bits),
                    0,
                    &slot.fmt,
                );
                return;
            }
            if extract(slot, ctx, regs) {
                regs.f = regs.u as f64;
                regs.scale(slot.offset, slot.mult);
            }
        }
        ValueKind::Double => prepare_double(slot, ctx, regs),
        ValueKind::Str => {
            // The byte range is extracted into the unsigned register
            extract(slot, ctx, regs);
        }
        ValueKind::Timestamp => {
            regs.set_double(ctx.ts_seconds);
            regs.scale(slot.offset, slot.mult);
        }
        ValueKind::DeltaTimestamp => {
            if plan.counter > 0 {
                regs.set_double(ctx.ts_seconds - plan.time_last);
                regs.scale(slot.offset, slot.mult);
            }
        }
        ValueKind::TimeDiff => {
            if let Some(timer_plan) = ctx.formats.plan_for_fid(slot.timer_fid) {
                if timer_plan.counter > 0 {
                    regs.set_double(ctx.ts_seconds - timer_plan.time_last);
                    regs.scale(slot.offset, slot.mult);
                }
            }
        }
        ValueKind::Memo => {
            match ctx.enums.memo_value(slot.get_memo) {
                Some(value) => {
                    regs.set_double(value);
                    regs.scale(slot.offset, slot.mult);
                }
                None => ctx.err(
                    DecodeErrorCode::Internal,
                    u64::from(slot.get_memo),
                    0,
                    &slot.fmt,
                ),
            }
        }
        ValueKind::MsgNumber => {
            regs.set_unsigned(u64::from(ctx.msg_cnt));
        }
    }

    store_memo(slot, ctx, regs);
}

/// Untyped 32-bit value: reinterpreted according to the print kind.
fn prepare_auto(slot: &ValueSlot, ctx: &mut PrintCtx, regs: &mut ValueRegs) {
    if slot.bit_address % 32 != 0 {
        ctx.err(
            DecodeErrorCode::AutoAddressNot32,
            u64::from(slot.bit_address),
            32,
            &slot.fmt,
        );
        return;
    }
    if slot.data_bits != 32 {
        ctx.err(
            DecodeErrorCode::AutoSizeNot32,
            u64::from(slot.data_bits),
            32,
            &slot.fmt,
        );
        return;
    }
    if slot.mult != 0.0 {
        ctx.err(DecodeErrorCode::AutoWithScaling, 0, 0, &slot.fmt);
        return;
    }

    if !extract(slot, ctx, regs) {
        return;
    }

    match slot.print_kind {
        PrintKind::Double => {
            regs.f = f64::from(f32::from_bits(regs.u as u32));
        }
        PrintKind::Int => {
            regs.i = i64::from(regs.u as u32 as i32);
            regs.f = regs.i as f64;
        }
        PrintKind::Uint | PrintKind::Binary => {
            regs.f = regs.u as f64;
        }
        PrintKind::Str | PrintKind::BinToFile => {}
        _ => ctx.err(DecodeErrorCode::Internal, 0, 0, &slot.fmt),
    }
}

/// 16/32/64-bit float values, widened to double.
fn prepare_double(slot: &ValueSlot, ctx: &mut PrintCtx, regs: &mut ValueRegs) {
    match slot.data_bits {
        16 => {
            if extract(slot, ctx, regs) {
                regs.f = f64::from(half_to_float(regs.u as u16));
            }
        }
        32 => {
            if extract(slot, ctx, regs) {
                regs.f = f64::from(f32::from_bits(regs.u as u32));
            }
        }
        64 => {
            if extract(slot, ctx, regs) {
                regs.f = f64::from_bits(regs.u);
            }
        }
        other => {
            ctx.err(
                DecodeErrorCode::FloatSizeInvalid,
                u64::from(other),
                0,
                &slot.fmt,
            );
            return;
        }
    }

    let f = regs.f;
    regs.set_double(f);
    regs.scale(slot.offset, slot.mult);
}

/// Extract `data_bits` bits at `bit_address` from the message into the
/// unsigned and sign-extended registers. Returns false on range errors.
fn extract(slot: &ValueSlot, ctx: &mut PrintCtx, regs: &mut ValueRegs) -> bool {
    let size = slot.data_bits;
    let address = slot.bit_address;

    if size == 0 {
        return true; // whole-message forms carry no numeric value
    }
    if size > 64 {
        ctx.err(
            DecodeErrorCode::ValueSizeTooLarge,
            u64::from(size),
            64,
            &slot.fmt,
        );
        return false;
    }

    let end = u64::from(address) + u64::from(size);
    let available = ctx.msg_bytes.len() as u64 * 8;
    if end > available {
        ctx.err(DecodeErrorCode::ValueNotInMessage, end, available, &slot.fmt);
        return false;
    }

    let mut value: u64 = 0;
    if address % 8 == 0 && size % 8 == 0 {
        // Byte-aligned fast path
        let start = (address / 8) as usize;
        for (i, &byte) in ctx.msg_bytes[start..start + (size / 8) as usize]
            .iter()
            .enumerate()
        {
            value |= u64::from(byte) << (8 * i);
        }
    } else {
        for i in 0..size {
            let bit = address + i;
            let byte = ctx.msg_bytes[(bit / 8) as usize];
            if byte >> (bit % 8) & 1 != 0 {
                value |= 1u64 << i;
            }
        }
    }

    regs.u = value;
    regs.i = if size < 64 {
        let shift = 64 - size;
        ((value << shift) as i64) >> shift
    } else {
        value as i64
    };
    true
}

fn store_memo(slot: &ValueSlot, ctx: &mut PrintCtx, regs: &ValueRegs) {
    if slot.put_memo != 0 && !ctx.enums.store_memo(slot.put_memo, regs.f) {
        ctx.err(
            DecodeErrorCode::Internal,
            u64::from(slot.put_memo),
            0,
            &slot.fmt,
        );
    }
}

fn update_statistics(slot: &ValueSlot, plan: &MsgPlan, ctx: &mut PrintCtx, regs: &ValueRegs) {
    let Some(stat_id) = slot.stats else {
        return;
    };
    if !ctx.params.value_stats {
        return;
    }

    // Time differences need a previous instance of the reference message
    match slot.value_kind {
        ValueKind::DeltaTimestamp if plan.counter == 0 => return,
        ValueKind::TimeDiff => {
            if let Some(timer_plan) = ctx.formats.plan_for_fid(slot.timer_fid) {
                if timer_plan.counter == 0 {
                    return;
                }
            }
        }
        _ => {}
    }

    let numeric = matches!(
        slot.print_kind,
        PrintKind::Uint
            | PrintKind::Int
            | PrintKind::Double
            | PrintKind::Binary
            | PrintKind::Timestamp
            | PrintKind::DeltaTimestamp
    );
    if numeric {
        ctx.stats.get_mut(stat_id).add(regs.f, ctx.msg_cnt);
    }
}

/// Widen an IEEE-754 half-precision value to f32.
fn half_to_float(h: u16) -> f32 {
    let sign = u32::from(h >> 15) << 31;
    let exp = u32::from(h >> 10) & 0x1F;
    let mantissa = u32::from(h) & 0x3FF;

    let bits = if exp == 0x1F {
        // Infinity and NaN
        sign | 0x7F80_0000 | (mantissa << 13)
    } else if exp != 0 {
        sign | ((exp + 127 - 15) << 23) | (mantissa << 13)
    } else if mantissa != 0 {
        // Subnormal half: normalize into a f32
        let mut exp = 127 - 15 + 1;
        let mut mantissa = mantissa;
        while mantissa & 0x400 == 0 {
            mantissa <<= 1;
            exp -= 1;
        }
        sign | (exp << 23) | ((mantissa & 0x3FF) << 13)
    } else {
        sign // +/- zero
    };

    f32::from_bits(bits)
}

/// The message interpreted as a zero-terminated string.
fn whole_message_string(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

/// The extracted byte range as a zero-terminated string.
fn register_string(regs: &ValueRegs, data_bits: u32) -> String {
    let bytes = regs.u.to_le_bytes();
    let len = ((data_bits / 8) as usize).min(8);
    let end = bytes[..len]
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(len);
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

/// Bits MSB-first, grouped every eight with an apostrophe.
pub(crate) fn binary_digits(value: u64, size: u32) -> String {
    if size == 0 {
        return "?".to_string();
    }

    let size = size.min(64);
    let mut out = String::with_capacity(size as usize + 8);
    for i in 0..size {
        if (size - i) % 8 == 0 && i != 0 {
            out.push('\'');
        }
        let bit = (value >> (size - 1 - i)) & 1;
        out.push(if bit != 0 { '1' } else { '0' });
    }
    out
}

/// Hex dump in 16-byte rows with offsets; items are bytes, 16-bit or
/// 32-bit little-endian words.
pub(crate) fn hex_dump(bytes: &[u8], item: usize) -> String {
    let mut out = String::new();
    let mut offset = 0usize;

    while offset < bytes.len() {
        let row = &bytes[offset..(offset + 16).min(bytes.len())];
        out.push_str(&format!("\n{offset:3X}: "));

        let mut i = 0;
        while i < row.len() {
            match item {
                4 if i + 4 <= row.len() => {
                    let v = u32::from_le_bytes([row[i], row[i + 1], row[i + 2], row[i + 3]]);
                    out.push_str(&format!("{v:08X} "));
                    i += 4;
                }
                2 if i + 2 <= row.len() => {
                    let v = u16::from_le_bytes([row[i], row[i + 1]]);
                    out.push_str(&format!("{v:04X} "));
                    i += 2;
                }
                _ => {
                    out.push_str(&format!("{:02X} ", row[i]));
                    i += 1;
                }
            }
        }

        offset += 16;
    }

    if bytes.len() > 16 {
        out.push('\n');
    }
    out
}
