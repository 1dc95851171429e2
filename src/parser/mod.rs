// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! Format-definition compiler.
//!
//! The compiler reads format definition files line by line. A line is either
//! a same-line block comment, a `#` line in a generated header, or a `//`
//! statement carrying directives and format strings. Directive handlers
//! return a recoverable [`ParseError`]; the per-file driver reports it,
//! resynchronizes at the next line, and abandons the file after a bounded
//! number of diagnostics.
//!
//! In compile mode every input line is copied into a work file which, once
//! the file parses cleanly, becomes the regenerated header (see [`header`]).

pub mod cursor;
mod directive;
pub mod error;
pub mod escape;
mod fmt_string;
pub mod header;

pub use error::{ParseReporter, DEFAULT_ERROR_REPORT};

use std::fs;
use std::path::Path;

use crate::cli::Params;
use crate::core::enums::EnumTable;
use crate::core::error::{FatalError, ParseError, ParseErrorCode, Result};
use crate::core::{MAX_INCLUDE_DEPTH, MAX_INPUT_LINE_LENGTH};
use crate::decode::stats::StatRegistry;
use crate::format::{FormatTable, PlanId, ValueSlot};
use crate::io::output::OutputSet;

use cursor::Cursor;
use header::WorkFile;

/// Name of the root format definition file inside the format folder.
pub const MAIN_FMT_FILE: &str = "rte_main_fmt.h";

/// Error channel of the compile driver: parse errors recover at the next
/// line, fatal errors abort the run.
pub(crate) enum CompileError {
    Parse(ParseError),
    Fatal(FatalError),
}

impl From<ParseError> for CompileError {
    fn from(err: ParseError) -> Self {
        CompileError::Parse(err)
    }
}

impl From<FatalError> for CompileError {
    fn from(err: FatalError) -> Self {
        CompileError::Fatal(err)
    }
}

pub(crate) type CompileResult<T> = std::result::Result<T, CompileError>;

/// Per-file compilation state.
pub(crate) struct FileCtx {
    /// Path as given in the invocation or INCLUDE directive.
    pub display: String,
    pub line_no: u32,
    pub work: Option<WorkFile>,
    /// `.fmt` sources may not contain `#` lines; header inputs skip them.
    pub is_fmt_source: bool,
    pub errors_found: bool,

    /// Plan receiving the next format string, if any.
    pub cur_plan: Option<PlanId>,
    /// Plan the previous format string went to, for continuation detection.
    pub prev_plan: Option<PlanId>,
    /// Running bit cursor of the message under construction.
    pub bit_cursor: u32,

    /// Output routing selected for the pending message.
    pub out_sel: u16,
    pub in_sel: u16,
    pub mirror_main: bool,
    pub prev_out_sel: u16,

    /// Per-line flags
    pub msg_on_line: bool,
    pub in_sel_on_line: bool,
    pub out_sel_on_line: bool,
}

impl FileCtx {
    fn new(display: String, path: &Path) -> Self {
        let is_fmt_source = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("fmt"));
        FileCtx {
            display,
            line_no: 0,
            work: None,
            is_fmt_source,
            errors_found: false,
            cur_plan: None,
            prev_plan: None,
            bit_cursor: 0,
            out_sel: 0,
            in_sel: 0,
            mirror_main: false,
            prev_out_sel: 0,
            msg_on_line: false,
            in_sel_on_line: false,
            out_sel_on_line: false,
        }
    }

    fn reset_line_flags(&mut self) {
        self.msg_on_line = false;
        self.in_sel_on_line = false;
        self.out_sel_on_line = false;
    }
}

/// The format-definition compiler, borrowing the decoder's tables.
pub struct Compiler<'a> {
    pub formats: &'a mut FormatTable,
    pub enums: &'a mut EnumTable,
    pub stats: &'a mut StatRegistry,
    pub out: &'a mut OutputSet,
    pub params: &'a Params,
    pub reporter: &'a mut ParseReporter,
}

impl Compiler<'_> {
    /// Parse one format definition file (recursively via INCLUDE).
    pub fn parse_file(&mut self, rel_path: &str, depth: usize) -> Result<()> {
        if depth >= MAX_INCLUDE_DEPTH {
            return Err(FatalError::IncludeDepthExceeded(MAX_INCLUDE_DEPTH));
        }

        let path = self.params.fmt_dir.join(rel_path);
        let mut ctx = FileCtx::new(rel_path.to_string(), &path);

        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(_) => {
                let err = ParseError::new(
                    ParseErrorCode::CannotOpenFmtFile,
                    0,
                    path.display().to_string(),
                );
                self.report(&mut ctx, &err);
                return Ok(());
            }
        };

        if self.params.check_only {
            match WorkFile::create(&path, self.params.purge_defines) {
                Ok(work) => ctx.work = Some(work),
                Err(err) => {
                    self.report(&mut ctx, &err);
                    return Ok(());
                }
            }
        }

        for (idx, line) in content.lines().enumerate() {
            if self.reporter.limit_reached() {
                ctx.errors_found = true;
                break;
            }

            ctx.line_no = idx as u32 + 1;
            match self.parse_line(&mut ctx, line, depth) {
                Ok(()) => {}
                Err(CompileError::Fatal(fatal)) => {
                    if let Some(work) = ctx.work.take() {
                        let _ = work.finish(true, false);
                    }
                    return Err(fatal);
                }
                Err(CompileError::Parse(err)) => {
                    self.report(&mut ctx, &err);
                    self.recover_plan(&ctx);
                    ctx.reset_line_flags();
                }
            }
        }

        self.check_last_msg_empty(&mut ctx);

        if let Some(work) = ctx.work.take() {
            let errors = ctx.errors_found;
            if let Err(err) = work.finish(errors, self.params.create_backup) {
                self.report(&mut ctx, &err);
            }
        }

        Ok(())
    }

    /// Parse one source line: comments, `#` lines, `//` statements.
    fn parse_line(&mut self, ctx: &mut FileCtx, line: &str, depth: usize) -> CompileResult<()> {
        if line.len() >= MAX_INPUT_LINE_LENGTH {
            return Err(ParseError::new(ParseErrorCode::LineTooLong, 0, "").into());
        }

        let ws_len = line.len() - line.trim_start().len();
        let trimmed = &line[ws_len..];

        if trimmed.starts_with('#') {
            if ctx.is_fmt_source {
                return Err(ParseError::new(
                    ParseErrorCode::CDirectiveNotAllowed,
                    ws_len,
                    cursor::context_snippet(trimmed),
                )
                .into());
            }
            // Directives of an already-generated header are regenerated
            return Ok(());
        }

        if let Some(work) = &mut ctx.work {
            work.write_line(line);
        }

        let content = trimmed.trim_end();
        if content.is_empty() {
            return Ok(());
        }

        if content.len() > 3 && content.starts_with("/*") {
            if content.ends_with("*/") {
                return Ok(());
            }
            return Err(ParseError::new(
                ParseErrorCode::UnfinishedComment,
                ws_len,
                cursor::context_snippet(content),
            )
            .into());
        }

        if !content.starts_with("//") {
            return Err(ParseError::new(
                ParseErrorCode::UnrecognizedDirective,
                ws_len,
                cursor::context_snippet(line),
            )
            .into());
        }

        let mut cur = Cursor::new(line);
        cur.advance(ws_len + 2);

        loop {
            cur.skip_ws();
            if cur.at_end() {
                break;
            }
            self.dispatch(ctx, &mut cur, depth)?;
        }

        ctx.reset_line_flags();
        Ok(())
    }

    fn dispatch(&mut self, ctx: &mut FileCtx, cur: &mut Cursor, depth: usize) -> CompileResult<()> {
        let rest = cur.rest();

        if rest.starts_with('"') {
            self.parse_fmt_text(ctx, cur)?;
        } else if rest.starts_with("MEMO") {
            self.parse_memo(ctx, cur)?;
        } else if rest.starts_with('>') {
            self.parse_select_out(ctx, cur)?;
        } else if rest.starts_with('<') {
            self.parse_select_in(ctx, cur)?;
        } else if rest.starts_with('M') || rest.starts_with('E') {
            self.parse_msg_directives(ctx, cur)?;
        } else if rest.starts_with("FILTER") {
            self.parse_filter(ctx, cur)?;
        } else if rest.starts_with("INCLUDE") {
            self.parse_include(ctx, cur, depth)?;
        } else if rest.starts_with("OUT_FILE") {
            self.parse_out_file(ctx, cur)?;
        } else if rest.starts_with("IN_FILE") {
            self.parse_in_file(ctx, cur)?;
        } else if rest.starts_with("FMT_ALIGN") {
            self.parse_fmt_align(ctx, cur)?;
        } else if rest.starts_with("FMT_START") {
            self.parse_fmt_start(ctx, cur)?;
        } else {
            return Err(cur.err(ParseErrorCode::UnrecognizedDirective).into());
        }

        Ok(())
    }

    /// Compile a quoted format string and chain its slots onto the pending
    /// message.
    fn parse_fmt_text(&mut self, ctx: &mut FileCtx, cur: &mut Cursor) -> CompileResult<()> {
        cur.advance(1); // past the opening quote

        // Locate the closing quote, honoring \" and \\ escapes
        let rest = cur.rest();
        let bytes = rest.as_bytes();
        let mut end = None;
        let mut i = 0;
        while i < bytes.len() {
            match bytes[i] {
                b'\\' if matches!(bytes.get(i + 1), Some(&b'"') | Some(&b'\\')) => i += 2,
                b'"' => {
                    end = Some(i);
                    break;
                }
                _ => i += 1,
            }
        }
        let Some(end) = end else {
            return Err(cur.err(ParseErrorCode::InvalidText).into());
        };

        let raw = &rest[..end];
        cur.advance(end + 1);

        let Some(plan_id) = ctx.cur_plan else {
            return Err(cur.err(ParseErrorCode::NoPriorMsg).into());
        };

        // A new message or a changed output file restarts the bit cursor
        if ctx.prev_plan != ctx.cur_plan {
            ctx.prev_plan = ctx.cur_plan;
            ctx.bit_cursor = 0;
        }
        if ctx.prev_out_sel != ctx.out_sel {
            ctx.bit_cursor = 0;
        }
        ctx.prev_out_sel = ctx.out_sel;

        let text = escape::process_escape_sequences(raw);
        let (msg_len, msg_kind) = {
            let plan = self.formats.plan(plan_id);
            (plan.msg_len, plan.kind)
        };
        let mut env = fmt_string::ScanEnv {
            enums: &mut *self.enums,
            formats: &*self.formats,
            stats: &mut *self.stats,
            msg_len,
            msg_kind,
            bit_cursor: ctx.bit_cursor,
            out_file: ctx.out_sel,
            also_main_log: ctx.mirror_main,
            in_file_sel: ctx.in_sel,
            check_only: self.params.check_only,
        };

        let slots = fmt_string::scan_format_string(&text, &mut env)?;
        ctx.bit_cursor = env.bit_cursor;
        self.formats.plan_mut(plan_id).slots.extend(slots);

        // File selections apply to one format string only
        ctx.in_sel = 0;
        ctx.out_sel = 0;
        ctx.mirror_main = false;

        cur.skip_ws();
        if !cur.at_end() {
            return Err(cur.err(ParseErrorCode::SurplusText).into());
        }
        Ok(())
    }

    /// Report a parse error and count it; abandon parsing for the
    /// unrecoverable table-exhaustion codes.
    fn report(&mut self, ctx: &mut FileCtx, err: &ParseError) {
        ctx.errors_found = true;
        self.reporter
            .report(&mut self.out.error_log, &ctx.display, ctx.line_no, err);

        if matches!(
            err.code,
            ParseErrorCode::MaxEnums
                | ParseErrorCode::FmtAlignOverMax
                | ParseErrorCode::FmtIdNotAssigned
        ) {
            self.reporter.mark_stop();
        }
    }

    /// Give an error-struck message a placeholder slot so follow-up lines do
    /// not cascade into "message has no formatting string" reports.
    fn recover_plan(&mut self, ctx: &FileCtx) {
        if let Some(plan_id) = ctx.cur_plan {
            let plan = self.formats.plan_mut(plan_id);
            if plan.slots.is_empty() {
                plan.slots.push(ValueSlot::plain(""));
            }
        }
    }

    /// A MSG directive must be followed by at least one format string before
    /// the next directive or end of file.
    pub(crate) fn check_last_msg_empty(&mut self, ctx: &mut FileCtx) {
        if let Some(plan_id) = ctx.cur_plan {
            if self.formats.plan(plan_id).slots.is_empty() {
                let name = self.formats.plan(plan_id).name.clone();
                let err = ParseError::new(ParseErrorCode::MsgEmpty, 0, name);
                self.report(ctx, &err);
                self.recover_plan(ctx);
            }
        }
    }

    /// Common prologue of the table-building directives: finish the pending
    /// message and drop the per-message state.
    pub(crate) fn end_pending_message(&mut self, ctx: &mut FileCtx) {
        self.check_last_msg_empty(ctx);
        ctx.cur_plan = None;
        ctx.in_sel_on_line = false;
        ctx.out_sel_on_line = false;
    }
}

// Directive handlers live in `directive.rs`.
