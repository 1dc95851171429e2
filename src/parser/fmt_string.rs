// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! Format-string compilation.
//!
//! A format string is a printf-compatible template with RTEdbg extensions
//! after each `%`: a value specifier `[..]`, scaling `(+o*m)`, inline
//! indexed text `{a|b|c}`, a memo store `<M_NAME>` and a statistics enable
//! `|name|`. The scanner walks the string once and emits one value slot per
//! `%` conversion plus a trailing slot for any leftover literal text.
//!
//! RTE-specific conversion characters are stripped from the stored template
//! so the printf interpolation only ever sees standard conversions; the
//! decoder substitutes the computed value itself.

use crate::core::enums::{EnumKind, EnumPayload, EnumTable, IndexedText};
use crate::core::error::{ParseError, ParseErrorCode, ParseResult};
use crate::decode::stats::StatRegistry;
use crate::format::{FormatTable, MsgKind, PrintKind, ValueKind, ValueSlot};

use super::cursor::Cursor;

/// Compilation context for one format string.
pub(crate) struct ScanEnv<'a> {
    pub enums: &'a mut EnumTable,
    pub formats: &'a FormatTable,
    pub stats: &'a mut StatRegistry,
    /// Expected message length in bytes; 0 = unknown.
    pub msg_len: u32,
    pub msg_kind: MsgKind,
    /// Running bit cursor, carried across strings of the same message.
    pub bit_cursor: u32,
    /// Output routing for the slots of this string.
    pub out_file: u16,
    pub also_main_log: bool,
    pub in_file_sel: u16,
    /// Check-only mode relaxes the `%Y`/indexed-text pairing check.
    pub check_only: bool,
}

/// Compile one format string into value slots.
pub(crate) fn scan_format_string(text: &str, env: &mut ScanEnv) -> ParseResult<Vec<ValueSlot>> {
    if text.is_empty() {
        return Err(ParseError::new(ParseErrorCode::EmptyString, 0, ""));
    }

    let mut cur = Cursor::new(text);
    let mut slots = Vec::new();
    let mut lit = String::new();

    while let Some(b) = cur.peek() {
        if b != b'%' {
            copy_char(&mut cur, text, &mut lit);
            continue;
        }

        if cur.peek_at(1) == Some(b'%') {
            lit.push_str("%%");
            cur.advance(2);
            continue;
        }

        cur.advance(1); // past the '%'

        let mut slot = ValueSlot::plain("");
        slot.out_file = env.out_file;
        slot.also_main_log = env.also_main_log;
        slot.in_file = env.in_file_sel;

        let mut value_spec = false;
        let mut indexed_text = false;
        let mut scaling_seen = false;

        loop {
            match cur.peek() {
                Some(b'(') => {
                    parse_scaling(&mut cur, &mut slot, value_spec, &mut scaling_seen)?
                }
                Some(b'[') => {
                    if value_spec {
                        return Err(cur.err(ParseErrorCode::ValueSpecOverdefined));
                    }
                    parse_value_spec(&mut cur, &mut slot, env)?;
                    value_spec = true;
                }
                Some(b'{') => parse_indexed_text(&mut cur, &mut slot, env, &mut indexed_text)?,
                Some(b'<') => parse_memo_store(&mut cur, &mut slot, env)?,
                Some(b'|') => parse_statistics(&mut cur, &mut slot, env)?,
                _ => break,
            }
        }

        if !value_spec {
            slot.data_bits = 32;
        }
        slot.bit_address = env.bit_cursor;

        // printf flags, width and precision; length modifiers are accepted
        let flags_start = cur.pos();
        while matches!(cur.peek(), Some(b) if b.is_ascii_digit() || b"-+#hl. ".contains(&b)) {
            cur.advance(1);
        }
        let flags = text[flags_start..cur.pos()].to_string();

        let Some(type_char) = cur.peek() else {
            return Err(ParseError::new(
                ParseErrorCode::UnfinishedFormat,
                cur.pos(),
                text,
            ));
        };
        if !b"dicouxXeEfFgGaAtTNWHYBsDM".contains(&type_char) {
            return Err(cur.err_at(ParseErrorCode::TypeUnrecognized, text));
        }
        cur.advance(1);

        finalize_slot(&cur, &mut slot, env, type_char, &flags, &lit, value_spec)?;
        check_indexed_text_pairing(&cur, &slot, env, indexed_text)?;

        env.bit_cursor += slot.data_bits;
        slots.push(slot);
        lit = String::new();
    }

    if !lit.is_empty() {
        let mut slot = ValueSlot::plain(lit);
        slot.out_file = env.out_file;
        slot.also_main_log = env.also_main_log;
        slot.bit_address = env.bit_cursor;
        slots.push(slot);
    }

    Ok(slots)
}

fn copy_char(cur: &mut Cursor, text: &str, lit: &mut String) {
    let start = cur.pos();
    let mut end = start + 1;
    while end < text.len() && !text.is_char_boundary(end) {
        end += 1;
    }
    lit.push_str(&text[start..end]);
    cur.advance(end - start);
}

/// Assign the print kind from the conversion character and run the
/// type-specific validity checks.
fn finalize_slot(
    cur: &Cursor,
    slot: &mut ValueSlot,
    env: &ScanEnv,
    type_char: u8,
    flags: &str,
    lit: &str,
    value_spec: bool,
) -> ParseResult<()> {
    match type_char {
        b'd' | b'i' => {
            slot.print_kind = PrintKind::Int;
            slot.fmt = format!("{lit}%{flags}{}", type_char as char);
        }
        b'c' | b'o' | b'u' | b'x' | b'X' => {
            slot.print_kind = PrintKind::Uint;
            slot.fmt = format!("{lit}%{flags}{}", type_char as char);
        }
        b'e' | b'E' | b'f' | b'F' | b'g' | b'G' | b'a' | b'A' => {
            slot.print_kind = PrintKind::Double;
            slot.fmt = format!("{lit}%{flags}{}", type_char as char);
        }
        b's' => {
            slot.print_kind = PrintKind::Str;
            check_byte_aligned_value(cur, slot)?;
            slot.fmt = format!("{lit}%{flags}s");
        }
        b't' | b'T' | b'N' | b'D' | b'M' => {
            slot.print_kind = match type_char {
                b't' => PrintKind::Timestamp,
                b'T' => PrintKind::DeltaTimestamp,
                b'N' => PrintKind::MsgNumber,
                b'D' => PrintKind::Date,
                _ => PrintKind::MsgName,
            };
            slot.data_bits = 0;
            require_bare(cur, flags)?;

            // A value spec is only tolerated when it restates the type
            // itself, like "%[N]N"
            let compatible = match type_char {
                b't' => slot.value_kind == ValueKind::Timestamp,
                b'T' => slot.value_kind == ValueKind::DeltaTimestamp,
                b'N' => slot.value_kind == ValueKind::MsgNumber,
                _ => false,
            };
            if value_spec && !compatible {
                return Err(cur.err(ParseErrorCode::ValueSpecNotForSpecial));
            }
            if matches!(type_char, b'D' | b'M') {
                check_no_memo_or_stats(cur, slot)?;
            }
            slot.fmt = lit.to_string();
        }
        b'W' => {
            slot.print_kind = PrintKind::BinToFile;
            if slot.value_kind == ValueKind::Auto {
                slot.data_bits = 0;
            }
            require_bare(cur, flags)?;
            check_byte_aligned_value(cur, slot)?;
            check_no_memo_or_stats(cur, slot)?;
            slot.fmt = lit.to_string();
        }
        b'H' => {
            slot.print_kind = match flags {
                "1" => PrintKind::Hex1,
                "2" => PrintKind::Hex2,
                "4" => PrintKind::Hex4,
                _ => return Err(cur.err(ParseErrorCode::TypeHex)),
            };
            if slot.value_kind != ValueKind::Auto {
                return Err(cur.err(ParseErrorCode::HexValueNotAllowed));
            }
            // The dump starts at the running cursor, which must sit on a
            // byte boundary
            check_byte_aligned_value(cur, slot)?;
            check_no_memo_or_stats(cur, slot)?;
            slot.fmt = lit.to_string();
        }
        b'Y' => {
            slot.print_kind = PrintKind::SelectedText;
            if slot.in_file == 0 {
                return Err(cur.err(ParseErrorCode::SelectedTextUndefined));
            }
            require_bare(cur, flags)?;
            slot.fmt = lit.to_string();
        }
        b'B' => {
            slot.print_kind = PrintKind::Binary;
            require_bare(cur, flags)?;
            slot.fmt = lit.to_string();
        }
        _ => unreachable!("type character validated by the caller"),
    }

    // An inline text list attached to anything but %Y is a mistake
    if type_char != b'Y'
        && slot.in_file > 0
        && env.enums.kind(slot.in_file) == Some(EnumKind::InlineText)
    {
        return Err(cur.err(ParseErrorCode::SelectedTextNotUsed));
    }

    if slot.data_bits != 0 {
        let end = slot.bit_address + slot.data_bits;
        let too_big = env.msg_len != 0 && end > env.msg_len * 8;
        let fixed_unknown = env.msg_len == 0 && env.msg_kind == MsgKind::Fixed;
        if too_big || fixed_unknown {
            return Err(cur.err(ParseErrorCode::MsgSizeExceeded));
        }

        if slot.value_kind == ValueKind::Auto && slot.bit_address % 32 != 0 {
            return Err(cur.err(ParseErrorCode::AddrNotDivisible32));
        }
    }

    Ok(())
}

/// RTE-specific conversions take no flags, width or precision.
fn require_bare(cur: &Cursor, flags: &str) -> ParseResult<()> {
    if flags.is_empty() {
        Ok(())
    } else {
        Err(cur.err(ParseErrorCode::TypeExtraFormatting))
    }
}

fn check_no_memo_or_stats(cur: &Cursor, slot: &ValueSlot) -> ParseResult<()> {
    if slot.get_memo != 0 || slot.put_memo != 0 {
        return Err(cur.err(ParseErrorCode::MemoNotAllowed));
    }
    if slot.stats.is_some() {
        return Err(cur.err(ParseErrorCode::StatisticsNotAllowed));
    }
    Ok(())
}

/// `%s` and `%W` read byte ranges: size and address must be byte aligned.
/// An untyped value means "the whole message".
fn check_byte_aligned_value(cur: &Cursor, slot: &mut ValueSlot) -> ParseResult<()> {
    if slot.value_kind == ValueKind::Auto {
        slot.data_bits = 0;
    } else if slot.data_bits % 8 != 0 {
        return Err(cur.err(ParseErrorCode::SizeNotByteAligned));
    }

    if slot.bit_address % 8 != 0 {
        return Err(cur.err(ParseErrorCode::AddrNotByteAligned));
    }
    Ok(())
}

/// `%Y` and its indexed-text list must appear together, unless the list
/// comes from an IN_FILE selection.
fn check_indexed_text_pairing(
    cur: &Cursor,
    slot: &ValueSlot,
    env: &ScanEnv,
    indexed_text: bool,
) -> ParseResult<()> {
    if indexed_text != (slot.print_kind == PrintKind::SelectedText)
        && slot.in_file == 0
        && !env.check_only
    {
        return Err(cur.err(ParseErrorCode::SelectedTextIncomplete));
    }
    Ok(())
}

/// Scaling specifier `(+offset*mult)`: sign mandatory before the offset,
/// `*` mandatory before the multiplier, at least one of the two present.
fn parse_scaling(
    cur: &mut Cursor,
    slot: &mut ValueSlot,
    value_spec: bool,
    scaling_seen: &mut bool,
) -> ParseResult<()> {
    cur.advance(1); // past the '('
    cur.skip_ws();

    let mut offset = 0.0;
    let mut mult = 1.0;

    match cur.peek() {
        Some(b'+') | Some(b'-') => {
            offset = cur
                .take_f64()
                .map_err(|_| cur.err(ParseErrorCode::ScalingFormat))?;
        }
        Some(b'*') => {}
        _ => return Err(cur.err(ParseErrorCode::ScalingFormat)),
    }

    if cur.eat(b'*') {
        mult = cur
            .take_f64()
            .map_err(|_| cur.err(ParseErrorCode::ScalingFormat))?;
    }

    if !cur.eat(b')') {
        return Err(cur.err(ParseErrorCode::ScalingFormat));
    }

    if *scaling_seen {
        return Err(cur.err(ParseErrorCode::ScalingOverdefined));
    }
    if mult == 0.0 {
        return Err(cur.err(ParseErrorCode::ScalingZeroMultiplier));
    }
    if !value_spec {
        return Err(cur.err(ParseErrorCode::ScalingNeedsValueSpec));
    }

    slot.offset = offset;
    slot.mult = mult;
    *scaling_seen = true;
    Ok(())
}

/// Value specifier: `[N]`, `[t]`, `[T]`, `[t-MSG_NAME]`, `[M_NAME]`, or a
/// bit-field form `[(+|-)addr:size<type>]` / `[size<type>]`.
fn parse_value_spec(cur: &mut Cursor, slot: &mut ValueSlot, env: &mut ScanEnv) -> ParseResult<()> {
    cur.advance(1); // past the '['

    match (cur.peek(), cur.peek_at(1)) {
        (Some(b'N'), _) => {
            cur.advance(1);
            if !cur.eat(b']') {
                return Err(cur.err(ParseErrorCode::ExpectingSquareBracket));
            }
            slot.value_kind = ValueKind::MsgNumber;
            slot.data_bits = 0;
        }
        (Some(b't'), Some(b'-')) => {
            cur.advance(2);
            let name =
                take_until(cur, b']').ok_or_else(|| cur.err(ParseErrorCode::TimerDefinition))?;
            let fid = env
                .formats
                .find_by_name(name.trim())
                .ok_or_else(|| cur.err_at(ParseErrorCode::TimerMsgNotFound, name.as_str()))?;
            slot.timer_fid = fid;
            slot.value_kind = ValueKind::TimeDiff;
            slot.data_bits = 0;
        }
        (Some(b't'), _) => {
            cur.advance(1);
            if !cur.eat(b']') {
                return Err(cur.err(ParseErrorCode::ExpectingSquareBracket));
            }
            slot.value_kind = ValueKind::Timestamp;
            slot.data_bits = 0;
        }
        (Some(b'T'), _) => {
            cur.advance(1);
            if !cur.eat(b']') {
                return Err(cur.err(ParseErrorCode::ExpectingSquareBracket));
            }
            slot.value_kind = ValueKind::DeltaTimestamp;
            slot.data_bits = 0;
        }
        (Some(b'M'), Some(b'_')) => {
            cur.skip_ws();
            let name = take_until(cur, b']')
                .ok_or_else(|| cur.err(ParseErrorCode::MemoRecallDefinition))?;
            let memo = env.enums.find(name.trim(), EnumKind::Memo);
            if memo == 0 {
                return Err(cur.err_at(ParseErrorCode::InvalidName, name.as_str()));
            }
            slot.get_memo = memo;
            slot.value_kind = ValueKind::Memo;
            slot.data_bits = 0;
        }
        _ => parse_bit_field_spec(cur, slot, env)?,
    }

    Ok(())
}

fn parse_bit_field_spec(
    cur: &mut Cursor,
    slot: &mut ValueSlot,
    env: &mut ScanEnv,
) -> ParseResult<()> {
    let mut sign = 0u8;
    if let Some(b @ (b'+' | b'-')) = cur.peek() {
        sign = b;
        cur.advance(1);
    }

    let first = cur
        .take_unsigned()
        .map_err(|_| cur.err(ParseErrorCode::ValueInvalidChar))? as u32;

    let mut address = None;
    let mut size = first;
    if cur.eat(b':') {
        address = Some(first);
        size = cur
            .take_unsigned()
            .map_err(|_| cur.err(ParseErrorCode::ValueInvalidChar))? as u32;
    }

    let mut type_char = b'u';
    if let Some(b @ (b'f' | b'u' | b'i' | b's')) = cur.peek() {
        type_char = b;
        cur.advance(1);
    }

    if !cur.eat(b']') {
        return Err(cur.err(ParseErrorCode::ValueUnfinished));
    }

    if !(1..=64).contains(&size) {
        return Err(cur.err(ParseErrorCode::ValueSize));
    }
    slot.data_bits = size;

    if let Some(addr) = address {
        match sign {
            b'+' => env.bit_cursor += addr,
            b'-' => {
                if env.bit_cursor < addr {
                    return Err(cur.err(ParseErrorCode::ValueNegativeAddress));
                }
                env.bit_cursor -= addr;
            }
            _ => env.bit_cursor = addr,
        }
    } else if sign != 0 {
        return Err(cur.err(ParseErrorCode::ValueUnexpectedSign));
    }

    match type_char {
        b's' => {
            slot.value_kind = ValueKind::Str;
            if env.bit_cursor % 8 != 0 {
                return Err(cur.err(ParseErrorCode::AddrNotByteAligned));
            }
        }
        b'i' => slot.value_kind = ValueKind::Int,
        b'f' => {
            slot.value_kind = ValueKind::Double;
            if env.bit_cursor % 8 != 0 {
                return Err(cur.err(ParseErrorCode::AddrNotByteAligned));
            }
            if !matches!(size, 16 | 32 | 64) {
                return Err(cur.err(ParseErrorCode::FloatLength));
            }
        }
        _ => slot.value_kind = ValueKind::Uint,
    }

    Ok(())
}

/// Inline indexed text `{option1|option2|...}` for `%Y`.
fn parse_indexed_text(
    cur: &mut Cursor,
    slot: &mut ValueSlot,
    env: &mut ScanEnv,
    indexed_text: &mut bool,
) -> ParseResult<()> {
    cur.advance(1); // past the '{'

    let mut options: Vec<String> = Vec::new();
    let mut current = String::new();

    loop {
        match cur.peek() {
            None => return Err(cur.err(ParseErrorCode::IndexedTextUnfinished)),
            Some(b @ (b'|' | b'}')) => {
                if current.is_empty() || current.len() > 255 {
                    return Err(cur.err(ParseErrorCode::IndexedTextLength));
                }
                options.push(std::mem::take(&mut current));
                cur.advance(1);
                if b == b'}' {
                    break;
                }
            }
            Some(_) => {
                let rest = cur.rest();
                let ch_len = rest.chars().next().map_or(1, char::len_utf8);
                current.push_str(&rest[..ch_len]);
                cur.advance(ch_len);
            }
        }
    }

    if options.len() < 2 {
        return Err(cur.err(ParseErrorCode::IndexedTextTwoOptions));
    }
    if slot.in_file != 0 {
        return Err(cur.err(ParseErrorCode::SelectedTextOverdefined));
    }

    let refs: Vec<&str> = options.iter().map(String::as_str).collect();
    let text = IndexedText::from_options(&refs).map_err(|code| cur.err(code))?;
    let idx = env
        .enums
        .add("#Y_TEXT", EnumPayload::InlineText { text })
        .map_err(|code| cur.err(code))?;

    slot.in_file = idx;
    *indexed_text = true;
    Ok(())
}

/// Memo store `<M_NAME>`: write the slot's value into the named memo.
fn parse_memo_store(cur: &mut Cursor, slot: &mut ValueSlot, env: &ScanEnv) -> ParseResult<()> {
    cur.advance(1); // past the '<'
    cur.skip_ws();

    let name = take_until(cur, b'>').ok_or_else(|| cur.err(ParseErrorCode::MemoRecallDefinition))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(cur.err(ParseErrorCode::MemoRecallDefinition));
    }

    let memo = env.enums.find(name, EnumKind::Memo);
    if memo == 0 {
        return Err(cur.err_at(ParseErrorCode::MemoRecallDefinition, name));
    }
    if slot.put_memo != 0 {
        return Err(cur.err(ParseErrorCode::MemoStoreOverdefined));
    }

    slot.put_memo = memo;
    Ok(())
}

/// Statistics enable `|name|`.
fn parse_statistics(cur: &mut Cursor, slot: &mut ValueSlot, env: &mut ScanEnv) -> ParseResult<()> {
    cur.advance(1); // past the opening '|'

    let name = take_until(cur, b'|').ok_or_else(|| cur.err(ParseErrorCode::StatsBadName))?;
    if name.is_empty() {
        return Err(cur.err(ParseErrorCode::StatsEmpty));
    }
    if slot.stats.is_some() {
        return Err(cur.err(ParseErrorCode::StatsOverdefined));
    }

    slot.stats = Some(env.stats.create(name));
    Ok(())
}

/// Consume characters up to and including `stop`. Returns the consumed text
/// or `None` when the stop character is missing.
fn take_until(cur: &mut Cursor, stop: u8) -> Option<String> {
    let mut out = String::new();
    loop {
        let b = cur.peek()?;
        if b == stop {
            cur.advance(1);
            return Some(out);
        }
        let rest = cur.rest();
        let ch_len = rest.chars().next().map_or(1, char::len_utf8);
        out.push_str(&rest[..ch_len]);
        cur.advance(ch_len);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::enums::EnumTable;
    use crate::format::{FormatTable, MsgPlan};

    struct Fixture {
        enums: EnumTable,
        formats: FormatTable,
        stats: StatRegistry,
    }

    impl Fixture {
        fn new() -> Self {
            let mut enums = EnumTable::new();
            enums
                .add("M_LAST", EnumPayload::Memo { value: 0.0 })
                .unwrap();
            let mut formats = FormatTable::new(11);
            let mut plan = MsgPlan::new(MsgKind::Fixed);
            plan.name = "MSG0_START".to_string();
            formats.assign(1, plan).unwrap();
            Fixture {
                enums,
                formats,
                stats: StatRegistry::new(),
            }
        }

        fn scan(&mut self, text: &str, msg_len: u32) -> ParseResult<(Vec<ValueSlot>, u32)> {
            let mut env = ScanEnv {
                enums: &mut self.enums,
                formats: &self.formats,
                stats: &mut self.stats,
                msg_len,
                msg_kind: MsgKind::Fixed,
                bit_cursor: 0,
                out_file: 0,
                also_main_log: false,
                in_file_sel: 0,
                check_only: false,
            };
            scan_format_string(text, &mut env).map(|slots| (slots, env.bit_cursor))
        }
    }

    #[test]
    fn test_plain_text_only() {
        let mut fx = Fixture::new();
        let (slots, cursor) = fx.scan("hello world\n", 4).unwrap();
        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].print_kind, PrintKind::PlainText);
        assert_eq!(slots[0].fmt, "hello world\n");
        assert_eq!(cursor, 0);
    }

    #[test]
    fn test_default_32_bit_slot() {
        let mut fx = Fixture::new();
        let (slots, cursor) = fx.scan("v=%u\n", 4).unwrap();
        assert_eq!(slots.len(), 2);
        assert_eq!(slots[0].print_kind, PrintKind::Uint);
        assert_eq!(slots[0].value_kind, ValueKind::Auto);
        assert_eq!(slots[0].data_bits, 32);
        assert_eq!(slots[0].fmt, "v=%u");
        assert_eq!(slots[1].fmt, "\n");
        assert_eq!(cursor, 32);
    }

    #[test]
    fn test_bit_field_with_address() {
        let mut fx = Fixture::new();
        let (slots, cursor) = fx.scan("T=%[8:16u]u", 8).unwrap();
        assert_eq!(slots[0].bit_address, 8);
        assert_eq!(slots[0].data_bits, 16);
        assert_eq!(slots[0].value_kind, ValueKind::Uint);
        assert_eq!(cursor, 24);
    }

    #[test]
    fn test_relative_bit_address() {
        let mut fx = Fixture::new();
        let (slots, cursor) = fx.scan("%[8u]u %[+8:4u]u %[-4:2u]u", 8).unwrap();
        assert_eq!(slots[0].bit_address, 0);
        // '+8' skips eight bits from the running cursor
        assert_eq!(slots[1].bit_address, 16);
        // '-4' steps back into the skipped range
        assert_eq!(slots[2].bit_address, 16);
        assert_eq!(cursor, 18);
    }

    #[test]
    fn test_cursor_advances_across_slots() {
        let mut fx = Fixture::new();
        let (slots, cursor) = fx.scan("%[8u]u %[16u]x %[3:4u]d", 8).unwrap();
        assert_eq!(slots[0].bit_address, 0);
        assert_eq!(slots[1].bit_address, 8);
        // absolute address rewinds the cursor
        assert_eq!(slots[2].bit_address, 3);
        assert_eq!(cursor, 7);
        assert_eq!(slots[2].value_kind, ValueKind::Uint);
        assert_eq!(slots[2].print_kind, PrintKind::Int);
    }

    #[test]
    fn test_scaling() {
        let mut fx = Fixture::new();
        let (slots, _) = fx.scan("%[8:16u](+0*0.1)f", 8).unwrap();
        assert_eq!(slots[0].offset, 0.0);
        assert_eq!(slots[0].mult, 0.1);
        assert_eq!(slots[0].print_kind, PrintKind::Double);
    }

    #[test]
    fn test_scaling_offset_only_defaults_multiplier() {
        let mut fx = Fixture::new();
        let (slots, _) = fx.scan("%[8u](-5)d", 8).unwrap();
        assert_eq!(slots[0].offset, -5.0);
        assert_eq!(slots[0].mult, 1.0);
    }

    #[test]
    fn test_scaling_requires_value_spec() {
        let mut fx = Fixture::new();
        let err = fx.scan("%(+1*2)u", 8).unwrap_err();
        assert_eq!(err.code, ParseErrorCode::ScalingNeedsValueSpec);
    }

    #[test]
    fn test_scaling_zero_multiplier_rejected() {
        let mut fx = Fixture::new();
        let err = fx.scan("%[8u](*0)u", 8).unwrap_err();
        assert_eq!(err.code, ParseErrorCode::ScalingZeroMultiplier);
    }

    #[test]
    fn test_indexed_text_with_y() {
        let mut fx = Fixture::new();
        let (slots, _) = fx.scan("state=%[2u]{ok|warn|err}Y", 4).unwrap();
        assert_eq!(slots[0].print_kind, PrintKind::SelectedText);
        assert!(slots[0].in_file >= 32);
        let text = fx.enums.indexed_text(slots[0].in_file).unwrap();
        assert_eq!(text.select(1), "warn");
    }

    #[test]
    fn test_indexed_text_needs_two_options() {
        let mut fx = Fixture::new();
        let err = fx.scan("%[2u]{solo}Y", 4).unwrap_err();
        assert_eq!(err.code, ParseErrorCode::IndexedTextTwoOptions);
    }

    #[test]
    fn test_y_without_text_rejected() {
        let mut fx = Fixture::new();
        let err = fx.scan("%[2u]Y", 4).unwrap_err();
        assert_eq!(err.code, ParseErrorCode::SelectedTextUndefined);
    }

    #[test]
    fn test_indexed_text_without_y_rejected() {
        let mut fx = Fixture::new();
        let err = fx.scan("%[2u]{a|b}u", 4).unwrap_err();
        assert_eq!(err.code, ParseErrorCode::SelectedTextNotUsed);
    }

    #[test]
    fn test_memo_recall_and_store() {
        let mut fx = Fixture::new();
        let (slots, _) = fx.scan("last=%[M_LAST]g now=%[32u]<M_LAST>u", 8).unwrap();
        assert_eq!(slots[0].value_kind, ValueKind::Memo);
        assert!(slots[0].get_memo >= 32);
        assert!(slots[1].put_memo >= 32);
    }

    #[test]
    fn test_unknown_memo_rejected() {
        let mut fx = Fixture::new();
        let err = fx.scan("%[M_MISSING]u", 4).unwrap_err();
        assert_eq!(err.code, ParseErrorCode::InvalidName);
    }

    #[test]
    fn test_timer_reference() {
        let mut fx = Fixture::new();
        let (slots, _) = fx.scan("dt=%[t-MSG0_START]f", 4).unwrap();
        assert_eq!(slots[0].value_kind, ValueKind::TimeDiff);
        assert_eq!(slots[0].timer_fid, 0);
    }

    #[test]
    fn test_timer_unknown_message() {
        let mut fx = Fixture::new();
        let err = fx.scan("%[t-NOBODY]f", 4).unwrap_err();
        assert_eq!(err.code, ParseErrorCode::TimerMsgNotFound);
    }

    #[test]
    fn test_special_value_specs() {
        let mut fx = Fixture::new();
        let (slots, cursor) = fx.scan("%[N]d %[t]f %[T]f", 4).unwrap();
        assert_eq!(slots[0].value_kind, ValueKind::MsgNumber);
        assert_eq!(slots[1].value_kind, ValueKind::Timestamp);
        assert_eq!(slots[2].value_kind, ValueKind::DeltaTimestamp);
        assert_eq!(cursor, 0);
    }

    #[test]
    fn test_statistics_enable() {
        let mut fx = Fixture::new();
        let (slots, _) = fx.scan("%[16u]|speed|u", 4).unwrap();
        let id = slots[0].stats.unwrap();
        assert_eq!(fx.stats.get(id).name, "speed");
    }

    #[test]
    fn test_special_types_stripped_from_template() {
        let mut fx = Fixture::new();
        let (slots, _) = fx.scan("time: %t!", 4).unwrap();
        assert_eq!(slots[0].print_kind, PrintKind::Timestamp);
        assert_eq!(slots[0].fmt, "time: ");
        assert_eq!(slots[1].fmt, "!");
    }

    #[test]
    fn test_special_type_with_flags_rejected() {
        let mut fx = Fixture::new();
        let err = fx.scan("%5t", 4).unwrap_err();
        assert_eq!(err.code, ParseErrorCode::TypeExtraFormatting);
    }

    #[test]
    fn test_value_spec_not_for_special() {
        let mut fx = Fixture::new();
        let err = fx.scan("%[8u]t", 4).unwrap_err();
        assert_eq!(err.code, ParseErrorCode::ValueSpecNotForSpecial);
    }

    #[test]
    fn test_matching_value_spec_on_special_type() {
        let mut fx = Fixture::new();
        let (slots, _) = fx.scan("hello %[N]N\n", 0).unwrap();
        assert_eq!(slots.len(), 2);
        assert_eq!(slots[0].print_kind, PrintKind::MsgNumber);
        assert_eq!(slots[0].value_kind, ValueKind::MsgNumber);
        assert_eq!(slots[0].fmt, "hello ");
        assert_eq!(slots[1].fmt, "\n");
    }

    #[test]
    fn test_hex_dump_width() {
        let mut fx = Fixture::new();
        let (slots, _) = fx.scan("dump:%2H", 4).unwrap();
        assert_eq!(slots[0].print_kind, PrintKind::Hex2);
        assert_eq!(slots[0].fmt, "dump:");

        let err = fx.scan("%H", 4).unwrap_err();
        assert_eq!(err.code, ParseErrorCode::TypeHex);
    }

    #[test]
    fn test_hex_dump_rejects_value_spec() {
        let mut fx = Fixture::new();
        let err = fx.scan("%[8u]2H", 4).unwrap_err();
        assert_eq!(err.code, ParseErrorCode::HexValueNotAllowed);
    }

    #[test]
    fn test_hex_dump_rejects_unaligned_cursor() {
        let mut fx = Fixture::new();
        // The first value leaves the cursor at bit 4
        let err = fx.scan("%[4u]u %2H", 4).unwrap_err();
        assert_eq!(err.code, ParseErrorCode::AddrNotByteAligned);
    }

    #[test]
    fn test_float_spec_checks() {
        let mut fx = Fixture::new();
        let (slots, _) = fx.scan("%[8:16f]g", 8).unwrap();
        assert_eq!(slots[0].value_kind, ValueKind::Double);

        let err = fx.scan("%[3:16f]g", 8).unwrap_err();
        assert_eq!(err.code, ParseErrorCode::AddrNotByteAligned);

        let err = fx.scan("%[8:24f]g", 8).unwrap_err();
        assert_eq!(err.code, ParseErrorCode::FloatLength);
    }

    #[test]
    fn test_value_must_fit_message() {
        let mut fx = Fixture::new();
        let err = fx.scan("%[0:64u]u", 4).unwrap_err();
        assert_eq!(err.code, ParseErrorCode::MsgSizeExceeded);
    }

    #[test]
    fn test_msg0_rejects_data_values() {
        let mut fx = Fixture::new();
        let err = fx.scan("%u", 0).unwrap_err();
        assert_eq!(err.code, ParseErrorCode::MsgSizeExceeded);
    }

    #[test]
    fn test_auto_value_needs_32_bit_alignment() {
        let mut fx = Fixture::new();
        let err = fx.scan("%[4u]u%u", 8).unwrap_err();
        assert_eq!(err.code, ParseErrorCode::AddrNotDivisible32);
    }

    #[test]
    fn test_unfinished_percent() {
        let mut fx = Fixture::new();
        let err = fx.scan("abc %", 4).unwrap_err();
        assert_eq!(err.code, ParseErrorCode::UnfinishedFormat);
    }

    #[test]
    fn test_unknown_type_char() {
        let mut fx = Fixture::new();
        let err = fx.scan("%q", 4).unwrap_err();
        assert_eq!(err.code, ParseErrorCode::TypeUnrecognized);
    }

    #[test]
    fn test_escaped_percent_is_literal() {
        let mut fx = Fixture::new();
        let (slots, cursor) = fx.scan("100%% done", 4).unwrap();
        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].fmt, "100%% done");
        assert_eq!(cursor, 0);
    }

    #[test]
    fn test_empty_string_rejected() {
        let mut fx = Fixture::new();
        let err = fx.scan("", 4).unwrap_err();
        assert_eq!(err.code, ParseErrorCode::EmptyString);
    }

    #[test]
    fn test_sign_without_address_rejected() {
        let mut fx = Fixture::new();
        let err = fx.scan("%[+8u]u", 4).unwrap_err();
        assert_eq!(err.code, ParseErrorCode::ValueUnexpectedSign);
    }

    #[test]
    fn test_negative_cursor_rejected() {
        let mut fx = Fixture::new();
        let err = fx.scan("%[-8:4u]u", 4).unwrap_err();
        assert_eq!(err.code, ParseErrorCode::ValueNegativeAddress);
    }

    #[test]
    fn test_double_value_spec_rejected() {
        let mut fx = Fixture::new();
        let err = fx.scan("%[8u][4u]u", 4).unwrap_err();
        assert_eq!(err.code, ParseErrorCode::ValueSpecOverdefined);
    }

    #[test]
    fn test_string_spec() {
        let mut fx = Fixture::new();
        let (slots, _) = fx.scan("name=%[0:16s]s", 4).unwrap();
        assert_eq!(slots[0].value_kind, ValueKind::Str);
        assert_eq!(slots[0].data_bits, 16);

        // whole-message string
        let (slots, _) = fx.scan("msg=%s", 4).unwrap();
        assert_eq!(slots[0].data_bits, 0);
    }
}
