// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! Directive handlers of the format-definition compiler.
//!
//! Each handler consumes its directive from the line cursor and updates the
//! format table, the enum table or the per-file context. Handlers raise
//! recoverable parse errors; the per-file driver resynchronizes at the next
//! line.

use std::path::PathBuf;

use crate::core::enums::{EnumKind, EnumPayload, IndexedText};
use crate::core::error::ParseErrorCode;
use crate::core::{MAX_IN_FILE_SIZE, MAX_MSG_WORDS};
use crate::format::{MsgKind, MsgPlan};

use super::cursor::Cursor;
use super::escape::process_escape_sequences;
use super::{CompileResult, Compiler, FileCtx};

/// Characters allowed in an OUT_FILE mode string.
const FILE_MODE_CHARS: &[u8] = b"wabxt+";

impl Compiler<'_> {
    /// MEMO(M_name[, initial_value])
    pub(crate) fn parse_memo(&mut self, ctx: &mut FileCtx, cur: &mut Cursor) -> CompileResult<()> {
        self.end_pending_message(ctx);
        cur.advance("MEMO".len());
        cur.expect_open()?;

        let name = self.directive_name(cur, "M_")?;

        let mut value = 0.0;
        if cur.eat(b',') {
            cur.skip_ws();
            value = cur
                .take_f64()
                .map_err(|_| cur.err(ParseErrorCode::MemoInitValue))?;
        }

        cur.expect_close()?;
        self.expect_directive_end(cur)?;

        self.enums
            .add(name, EnumPayload::Memo { value })
            .map_err(|code| cur.err(code))?;
        Ok(())
    }

    /// FILTER(F_name[, "description"])
    pub(crate) fn parse_filter(&mut self, ctx: &mut FileCtx, cur: &mut Cursor) -> CompileResult<()> {
        self.end_pending_message(ctx);

        if self.enums.filter_count() >= crate::core::FILTER_SLOTS {
            return Err(cur.err(ParseErrorCode::FilterMaxCount).into());
        }

        cur.advance("FILTER".len());
        cur.expect_open()?;

        let name = self.directive_name(cur, "F_")?;

        let mut description = None;
        if cur.eat(b',') {
            let text = cur.take_quoted(ParseErrorCode::FilterDescription)?;
            if text.is_empty() {
                return Err(cur.err(ParseErrorCode::FilterDescription).into());
            }
            description = Some(process_escape_sequences(&text));
        }

        cur.expect_close()?;
        self.expect_directive_end(cur)?;

        let slot = self
            .enums
            .add_filter(name.clone(), description)
            .map_err(|code| cur.err(code))?;

        if let Some(work) = &mut ctx.work {
            work.write_define(&name, u32::from(slot));
        }
        Ok(())
    }

    /// IN_FILE(name, "path") - load an indexed-text file.
    pub(crate) fn parse_in_file(&mut self, ctx: &mut FileCtx, cur: &mut Cursor) -> CompileResult<()> {
        self.end_pending_message(ctx);
        cur.advance("IN_FILE".len());
        cur.expect_open()?;

        let name = self.directive_name(cur, "")?;
        if !cur.eat(b',') {
            return Err(cur.err(ParseErrorCode::ExpectingComma).into());
        }

        let path = self.file_path_arg(cur)?;
        cur.expect_close()?;
        self.expect_directive_end(cur)?;

        if let Some(owner) = self.enums.path_in_use(&path, EnumKind::InFile) {
            return Err(cur
                .err_at(ParseErrorCode::FileNameUsedTwice, owner.to_string())
                .into());
        }

        let text = if self.params.check_only {
            IndexedText::empty()
        } else {
            self.load_indexed_text_file(cur, &path)?
        };

        self.enums
            .add(name, EnumPayload::InFile { text, path })
            .map_err(|code| cur.err(code))?;
        Ok(())
    }

    fn load_indexed_text_file(
        &self,
        cur: &Cursor,
        path: &PathBuf,
    ) -> CompileResult<IndexedText> {
        let full = self.params.fmt_dir.join(path);

        let meta = std::fs::metadata(&full)
            .map_err(|_| cur.err_at(ParseErrorCode::InFileOpen, full.display().to_string()))?;
        if meta.len() > MAX_IN_FILE_SIZE {
            return Err(cur
                .err_at(ParseErrorCode::InFileTooLong, full.display().to_string())
                .into());
        }

        let content = std::fs::read_to_string(&full)
            .map_err(|_| cur.err_at(ParseErrorCode::InFileOpen, full.display().to_string()))?;

        IndexedText::from_file_content(&content)
            .map_err(|code| cur.err_at(code, full.display().to_string()).into())
    }

    /// OUT_FILE(name, "path", "mode"[, "initial text"])
    pub(crate) fn parse_out_file(&mut self, ctx: &mut FileCtx, cur: &mut Cursor) -> CompileResult<()> {
        self.end_pending_message(ctx);
        cur.advance("OUT_FILE".len());
        cur.expect_open()?;

        let name = self.directive_name(cur, "")?;

        cur.skip_ws();
        if !cur.eat(b',') {
            return Err(cur.err(ParseErrorCode::ExpectingComma).into());
        }
        let path = self.file_path_arg(cur)?;

        if let Some(owner) = self.enums.path_in_use(&path, EnumKind::OutFile) {
            return Err(cur
                .err_at(ParseErrorCode::FileNameUsedTwice, owner.to_string())
                .into());
        }

        cur.skip_ws();
        if !cur.eat(b',') {
            return Err(cur.err(ParseErrorCode::ExpectingComma).into());
        }
        let mode = cur.take_quoted(ParseErrorCode::FileModeMissing)?;
        check_file_mode(cur, &mode)?;

        cur.skip_ws();
        let mut initial_text = String::new();
        if cur.eat(b',') {
            initial_text = cur.take_quoted(ParseErrorCode::OutFileInitText)?;
        }

        cur.expect_close()?;
        self.expect_directive_end(cur)?;

        let writer = if self.params.check_only {
            None
        } else {
            let mut file = self
                .out
                .create_user_file(&path, &mode)
                .map_err(|_| cur.err_at(ParseErrorCode::OutFileNotCreated, path.display().to_string()))?;

            let text = process_escape_sequences(&initial_text);
            if !text.is_empty() {
                use std::io::Write;
                let _ = file.write_all(text.as_bytes());
            }
            Some(file)
        };

        self.enums
            .add(name, EnumPayload::OutFile { writer, path })
            .map_err(|code| cur.err(code))?;
        Ok(())
    }

    /// INCLUDE("path") - recursively parse another format file.
    pub(crate) fn parse_include(
        &mut self,
        ctx: &mut FileCtx,
        cur: &mut Cursor,
        depth: usize,
    ) -> CompileResult<()> {
        self.end_pending_message(ctx);
        cur.advance("INCLUDE".len());
        cur.expect_open()?;

        let path = self.file_path_arg(cur)?;
        self.parse_file(&path.display().to_string(), depth + 1)?;

        ctx.reset_line_flags();
        cur.expect_close()?;
        self.expect_directive_end(cur)?;
        Ok(())
    }

    /// FMT_ALIGN(n) - round the allocation cursor up to a multiple of n.
    pub(crate) fn parse_fmt_align(&mut self, ctx: &mut FileCtx, cur: &mut Cursor) -> CompileResult<()> {
        self.end_pending_message(ctx);
        cur.advance("FMT_ALIGN".len());
        cur.expect_open()?;

        let value = cur.take_unsigned()? as u32;
        self.formats
            .align_to(value)
            .map_err(|code| cur.err(code))?;

        cur.expect_close()?;
        self.expect_directive_end(cur)?;
        Ok(())
    }

    /// FMT_START(n) - set the allocation cursor exactly.
    pub(crate) fn parse_fmt_start(&mut self, ctx: &mut FileCtx, cur: &mut Cursor) -> CompileResult<()> {
        self.end_pending_message(ctx);
        cur.advance("FMT_START".len());
        cur.expect_open()?;

        let value = cur.take_unsigned()? as u32;
        self.formats
            .start_at(value)
            .map_err(|code| cur.err(code))?;

        cur.expect_close()?;
        self.expect_directive_end(cur)?;
        Ok(())
    }

    /// `<NAME` - select the input file for following `%Y` lookups.
    pub(crate) fn parse_select_in(&mut self, ctx: &mut FileCtx, cur: &mut Cursor) -> CompileResult<()> {
        if ctx.in_sel_on_line {
            return Err(cur.err(ParseErrorCode::SelectInMultiple).into());
        }
        ctx.in_sel_on_line = true;

        cur.advance(1); // past the '<'
        let name = cur.take_name()?;

        if ctx.cur_plan.is_none() {
            return Err(cur.err(ParseErrorCode::InOutSelectNoMsg).into());
        }

        let idx = self.enums.find(&name, EnumKind::InFile);
        if idx == 0 {
            return Err(cur.err_at(ParseErrorCode::InSelectUndefined, name).into());
        }

        ctx.in_sel = idx;
        Ok(())
    }

    /// `>NAME` / `>>NAME` - select the output file for the pending message;
    /// the double form also mirrors to the main log.
    pub(crate) fn parse_select_out(&mut self, ctx: &mut FileCtx, cur: &mut Cursor) -> CompileResult<()> {
        if ctx.out_sel_on_line {
            return Err(cur.err(ParseErrorCode::SelectOutMultiple).into());
        }
        ctx.out_sel_on_line = true;

        cur.advance(1); // past the '>'
        let mirror = cur.eat(b'>');
        let name = cur.take_name()?;

        if ctx.cur_plan.is_none() {
            return Err(cur.err(ParseErrorCode::InOutSelectNoMsg).into());
        }

        let idx = self.enums.find(&name, EnumKind::OutFile);
        if idx == 0 {
            return Err(cur.err_at(ParseErrorCode::OutSelectUndefined, name).into());
        }

        ctx.out_sel = idx;
        ctx.mirror_main = mirror;
        Ok(())
    }

    /// Dispatch of the MSG-family directives.
    pub(crate) fn parse_msg_directives(&mut self, ctx: &mut FileCtx, cur: &mut Cursor) -> CompileResult<()> {
        let rest = cur.rest();

        if rest.starts_with("MSGN") {
            self.parse_msg_directive(ctx, cur, 4, MsgKind::NWords, Self::msgn_layout)
        } else if rest.starts_with("MSGX") {
            self.parse_msg_directive(ctx, cur, 4, MsgKind::SelfSized, Self::msgx_layout)
        } else if rest.starts_with("MSG") {
            self.parse_msg_directive(ctx, cur, 3, MsgKind::Fixed, Self::msg_layout)
        } else if rest.starts_with("EXT_MSG") {
            self.parse_msg_directive(ctx, cur, 7, MsgKind::Extended, Self::ext_msg_layout)
        } else {
            Err(cur.err(ParseErrorCode::UnrecognizedDirective).into())
        }
    }

    /// Common part of the MSG-family handlers: layout, name, ID assignment.
    fn parse_msg_directive(
        &mut self,
        ctx: &mut FileCtx,
        cur: &mut Cursor,
        prefix_len: usize,
        kind: MsgKind,
        layout: fn(&mut Cursor, &mut MsgPlan) -> CompileResult<u32>,
    ) -> CompileResult<()> {
        self.check_last_msg_empty(ctx);

        if ctx.msg_on_line {
            return Err(cur.err(ParseErrorCode::MsgMultipleInLine).into());
        }
        if ctx.in_sel_on_line || ctx.out_sel_on_line {
            return Err(cur.err(ParseErrorCode::MsgAfterInOutSelect).into());
        }

        let start = cur.pos();
        cur.advance(prefix_len);

        let mut plan = MsgPlan::new(kind);
        let id_count = layout(cur, &mut plan)?;

        // The directive name continues with '_' and at least one character
        if cur.peek() != Some(b'_')
            || !cur
                .peek_at(1)
                .is_some_and(|b| b.is_ascii_alphanumeric())
        {
            return Err(cur.err(ParseErrorCode::MsgDefinition).into());
        }

        cur.rewind_to(start);
        let name = cur.take_name()?;
        if self.formats.find_by_name(&name).is_some() {
            return Err(cur.err_at(ParseErrorCode::MsgNameExists, name).into());
        }
        plan.name = name.clone();

        let Some((fid, plan_id)) = self.formats.assign(id_count, plan) else {
            return Err(cur.err(ParseErrorCode::FmtIdNotAssigned).into());
        };

        ctx.cur_plan = Some(plan_id);
        ctx.msg_on_line = true;

        if let Some(work) = &mut ctx.work {
            work.write_define(&name, fid);
        }
        Ok(())
    }

    /// MSG<k>: 2^k IDs, fixed length of 4k bytes.
    fn msg_layout(cur: &mut Cursor, plan: &mut MsgPlan) -> CompileResult<u32> {
        let k = cur.take_unsigned()? as u32;
        if k > 4 {
            return Err(cur.err(ParseErrorCode::MsgSize0To4).into());
        }
        plan.msg_len = 4 * k;
        Ok(1 << k)
    }

    /// EXT_MSG<k>_<b>: 2^(k+b) IDs, b extended-data bits in the format ID.
    fn ext_msg_layout(cur: &mut Cursor, plan: &mut MsgPlan) -> CompileResult<u32> {
        let k = cur.take_unsigned()? as u32;
        if k > 4 {
            return Err(cur.err(ParseErrorCode::ExtMsgSize).into());
        }

        if !cur.eat(b'_') {
            return Err(cur.err(ParseErrorCode::ExpectingUnderscore).into());
        }

        let b = cur.take_unsigned()? as u32;
        if b < 1 || b > 8 - k {
            return Err(cur.err(ParseErrorCode::ExtMsgBits).into());
        }

        plan.ext_data_mask = ((1u32 << b) - 1) as u16;
        plan.msg_len = 4 + 4 * k;
        Ok(1 << (k + b))
    }

    /// MSGN[_<n>]: 16 IDs; n gives a fixed length in words, otherwise the
    /// length is unknown at compile time. The `_<n>_` segment is only a
    /// length when another `_` follows; otherwise the digits belong to the
    /// message name.
    fn msgn_layout(cur: &mut Cursor, plan: &mut MsgPlan) -> CompileResult<u32> {
        let mut length = None;

        if matches!(cur.peek(), Some(b) if b.is_ascii_digit()) {
            length = Some(cur.take_unsigned()? as u32);
        } else if cur.peek() == Some(b'_')
            && cur.peek_at(1).is_some_and(|b| b.is_ascii_digit())
        {
            let digits = cur.rest()[1..]
                .bytes()
                .take_while(u8::is_ascii_digit)
                .count();
            if cur.rest().as_bytes().get(1 + digits) == Some(&b'_') {
                cur.advance(1);
                length = Some(cur.take_unsigned()? as u32);
            }
        }

        if let Some(n) = length {
            if n > MAX_MSG_WORDS {
                return Err(cur.err(ParseErrorCode::MsgTooBig).into());
            }
            if n == 0 {
                return Err(cur.err(ParseErrorCode::MsgZeroLength).into());
            }
            plan.msg_len = 4 * n;
        }
        Ok(16)
    }

    /// MSGX: 16 IDs; the last message byte carries the size at runtime.
    fn msgx_layout(_: &mut Cursor, _: &mut MsgPlan) -> CompileResult<u32> {
        Ok(16)
    }

    /// Parse a directive name with a mandatory prefix and uniqueness checks.
    fn directive_name(&self, cur: &mut Cursor, prefix: &str) -> CompileResult<String> {
        let name = cur.take_name()?;

        if !prefix.is_empty() && !name.starts_with(prefix) {
            return Err(cur.err_at(ParseErrorCode::BadNamePrefix, prefix).into());
        }
        if self.enums.name_exists(&name) {
            return Err(cur.err_at(ParseErrorCode::EnumNameExists, name).into());
        }

        Ok(name)
    }

    /// Parse a non-empty quoted file path.
    fn file_path_arg(&self, cur: &mut Cursor) -> CompileResult<PathBuf> {
        let path = cur.take_quoted(ParseErrorCode::InOutFilePath)?;
        if path.is_empty() {
            return Err(cur.err(ParseErrorCode::InOutFilePath).into());
        }
        Ok(PathBuf::from(path))
    }

    /// Bracketed directives must end the line.
    fn expect_directive_end(&self, cur: &mut Cursor) -> CompileResult<()> {
        cur.skip_ws();
        if !cur.at_end() {
            return Err(cur.err(ParseErrorCode::SurplusText).into());
        }
        Ok(())
    }
}

fn check_file_mode(cur: &Cursor, mode: &str) -> CompileResult<()> {
    if mode.is_empty() {
        return Err(cur.err(ParseErrorCode::FileModeEmpty).into());
    }

    for byte in mode.bytes() {
        if !FILE_MODE_CHARS.contains(&byte) {
            return Err(cur.err_at(ParseErrorCode::FileModeChar, mode).into());
        }
    }
    Ok(())
}
