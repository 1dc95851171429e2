// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! Parse-error reporting.
//!
//! Every parse error is rendered through a configurable report template
//! (`-e=FMT`) and written to both the console and the error log. Reporting
//! stops after a bounded number of diagnostics, but errors keep being
//! counted so the exit status and the summary stay accurate.

use std::io::Write;
use std::path::PathBuf;

use crate::core::error::{ErrorTally, ParseError};
use crate::core::MAX_ERRORS_REPORTED;
use crate::io::output::LogFile;

/// Default error report template. Substitutions: `%L` line, `%E` error code,
/// `%F` file name, `%P` full path, `%D` description, `%A` context snippet.
pub const DEFAULT_ERROR_REPORT: &str = "%F:%L: error: ERR_%E %D => \"%A\"\n";

#[derive(Debug)]
pub struct ParseReporter {
    template: String,
    fmt_dir: PathBuf,
    tally: ErrorTally,
    stop: bool,
}

impl ParseReporter {
    pub fn new(template: Option<&str>, fmt_dir: PathBuf) -> Self {
        ParseReporter {
            template: template.unwrap_or(DEFAULT_ERROR_REPORT).to_string(),
            fmt_dir,
            tally: ErrorTally::new(),
            stop: false,
        }
    }

    /// Total number of parse errors, reported or not.
    pub fn total(&self) -> u64 {
        self.tally.total()
    }

    pub fn tally(&self) -> &ErrorTally {
        &self.tally
    }

    /// True once parsing of the current run should be abandoned.
    pub fn limit_reached(&self) -> bool {
        self.stop || self.tally.total() >= MAX_ERRORS_REPORTED
    }

    /// Force the abandon state (unrecoverable table exhaustion).
    pub fn mark_stop(&mut self) {
        self.stop = true;
    }

    /// Report one parse error against a source location.
    pub fn report(&mut self, error_log: &mut LogFile, file: &str, line: u32, err: &ParseError) {
        if self.tally.total() < MAX_ERRORS_REPORTED {
            let text = self.render(file, line, err);
            eprint!("{text}");
            let _ = error_log.write_all(text.as_bytes());
        }

        self.tally.bump(err.code.code());
    }

    fn render(&self, file: &str, line: u32, err: &ParseError) -> String {
        let mut out = String::new();
        let mut chars = self.template.chars();

        while let Some(c) = chars.next() {
            if c != '%' {
                out.push(c);
                continue;
            }

            match chars.next() {
                Some('L') => out.push_str(&line.to_string()),
                Some('E') => out.push_str(&err.code.code().to_string()),
                Some('F') => out.push_str(file),
                Some('P') => out.push_str(&self.fmt_dir.join(file).display().to_string()),
                Some('D') => out.push_str(err.code.text()),
                Some('A') => out.push_str(&err.context),
                _ => out.push_str("???"),
            }
        }

        out
    }
}
