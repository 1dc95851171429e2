// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! Invocation-grammar parsing.
//!
//! Two invocation shapes are accepted:
//! - `<output_folder> <fmt_folder> [options...] <binary_file>`
//! - `@<parameter_file>` where line 1 is the output folder, line 2 the
//!   format folder, and every following non-empty line one option or the
//!   binary file name
//!
//! Folder arguments have surrounding quotes stripped and trailing path
//! separators removed. Options use the tool's historical `-key=value` form.

use std::fs;
use std::path::PathBuf;

use crate::core::error::{FatalError, Result};
use crate::parser::escape::process_escape_sequences;

/// Time unit used for timestamp output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeUnit {
    #[default]
    Seconds,
    Milliseconds,
    Microseconds,
}

impl TimeUnit {
    /// Multiplier from seconds to the selected unit.
    pub fn multiplier(self) -> f64 {
        match self {
            TimeUnit::Seconds => 1.0,
            TimeUnit::Milliseconds => 1e3,
            TimeUnit::Microseconds => 1e6,
        }
    }

    /// Unit label for the log intro.
    pub fn label(self) -> &'static str {
        match self {
            TimeUnit::Seconds => "[s] ",
            TimeUnit::Milliseconds => "[ms]",
            TimeUnit::Microseconds => "[us]",
        }
    }
}

/// The parsed command line.
#[derive(Debug, Clone)]
pub struct Params {
    /// The raw arguments, echoed into the log banner.
    pub raw_args: Vec<String>,
    pub out_dir: PathBuf,
    pub fmt_dir: PathBuf,
    pub bin_file: Option<PathBuf>,
    /// `-c`: syntax-check and header-compile only, no binary decoding.
    pub check_only: bool,
    /// `-back`: keep `.bak` copies of rewritten format files.
    pub create_backup: bool,
    /// `-stat=value` / `-stat=all`
    pub value_stats: bool,
    /// `-stat=msg` / `-stat=all`
    pub msg_stats: bool,
    pub debug: bool,
    /// `-timestamps`: produce Timestamps.csv.
    pub timestamps_file: bool,
    /// `-purge`: omit `#define` lines from generated headers.
    pub purge_defines: bool,
    /// `-newline`: blank line between message records.
    pub extra_newline: bool,
    /// `-utf8`: recorded only; output is always UTF-8.
    pub utf8_console: bool,
    /// `-locale=NAME`: recorded only; formatting always uses `.` decimals.
    pub locale: Option<String>,
    pub time_unit: TimeUnit,
    /// `-N=K`: number of format-ID bits, mandatory.
    pub fmt_id_bits: u8,
    /// Timestamp printf template (default depends on the time unit).
    pub timestamp_fmt: String,
    /// Message-number printf template.
    pub msg_no_fmt: String,
    /// `-e=FMT`: error report template.
    pub error_report: Option<String>,
    /// `-ts=neg;pos` values in milliseconds; `None` = defaults.
    pub ts_diff_ms: Option<(f64, f64)>,
}

impl Params {
    /// Parse the program arguments (without the executable name).
    pub fn from_args<I>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let args: Vec<String> = args.into_iter().collect();

        let (out_dir, fmt_dir, rest) = match args.as_slice() {
            [single] if single.starts_with('@') => read_parameter_file(&single[1..])?,
            [out, fmt, rest @ ..] => (
                clean_folder_arg(out),
                clean_folder_arg(fmt),
                rest.to_vec(),
            ),
            _ => {
                return Err(FatalError::BadParameters(
                    "expected <output_folder> <fmt_folder> [options...] <binary_file> \
                     or @<parameter_file>"
                        .to_string(),
                ))
            }
        };

        let mut params = Params {
            raw_args: args.clone(),
            out_dir: PathBuf::from(out_dir),
            fmt_dir: PathBuf::from(fmt_dir),
            bin_file: None,
            check_only: false,
            create_backup: false,
            value_stats: false,
            msg_stats: false,
            debug: false,
            timestamps_file: false,
            purge_defines: false,
            extra_newline: false,
            utf8_console: false,
            locale: None,
            time_unit: TimeUnit::Seconds,
            fmt_id_bits: 0,
            timestamp_fmt: String::new(),
            msg_no_fmt: "N%05u".to_string(),
            error_report: None,
            ts_diff_ms: None,
        };

        for arg in &rest {
            params.apply_option(arg)?;
        }

        if params.fmt_id_bits == 0 {
            return Err(FatalError::BadParameters(
                "the -N=<bits> option is mandatory".to_string(),
            ));
        }

        if params.timestamp_fmt.is_empty() {
            params.timestamp_fmt = match params.time_unit {
                TimeUnit::Seconds => "%8.6f",
                TimeUnit::Milliseconds => "%8.3f",
                TimeUnit::Microseconds => "%8.2f",
            }
            .to_string();
        }

        Ok(params)
    }

    fn apply_option(&mut self, arg: &str) -> Result<()> {
        if !arg.starts_with('-') {
            if self.bin_file.is_some() {
                return Err(FatalError::BadParameters(format!(
                    "binary file given twice or unknown option: '{arg}'"
                )));
            }
            self.bin_file = Some(PathBuf::from(clean_folder_arg(arg)));
            return Ok(());
        }

        match arg {
            "-c" => self.check_only = true,
            "-back" => self.create_backup = true,
            "-utf8" => self.utf8_console = true,
            "-debug" => self.debug = true,
            "-timestamps" => self.timestamps_file = true,
            "-purge" => self.purge_defines = true,
            "-newline" => self.extra_newline = true,
            "-stat=all" => {
                self.value_stats = true;
                self.msg_stats = true;
            }
            "-stat=msg" => self.msg_stats = true,
            "-stat=value" => self.value_stats = true,
            _ => {
                if let Some(value) = arg.strip_prefix("-nr=") {
                    self.msg_no_fmt = format!("%{value}");
                } else if let Some(value) = arg.strip_prefix("-T=") {
                    self.timestamp_fmt = format!("%{value}");
                } else if let Some(value) = arg.strip_prefix("-time=") {
                    self.time_unit = match value {
                        "s" => TimeUnit::Seconds,
                        "m" | "ms" => TimeUnit::Milliseconds,
                        "u" | "us" => TimeUnit::Microseconds,
                        _ => {
                            return Err(FatalError::BadParameters(format!(
                                "bad -time= unit: '{value}'"
                            )))
                        }
                    };
                } else if let Some(value) = arg.strip_prefix("-ts=") {
                    self.ts_diff_ms = Some(parse_ts_diff(value)?);
                } else if let Some(value) = arg.strip_prefix("-N=") {
                    let bits: u8 = value.parse().map_err(|_| {
                        FatalError::BadParameters(format!("bad -N= value: '{value}'"))
                    })?;
                    if !(crate::core::MIN_FMT_ID_BITS..=crate::core::MAX_FMT_ID_BITS)
                        .contains(&bits)
                    {
                        return Err(FatalError::BadParameters(format!(
                            "-N= must be between 9 and 16, got {bits}"
                        )));
                    }
                    self.fmt_id_bits = bits;
                } else if let Some(value) = arg.strip_prefix("-e=") {
                    let trimmed = value
                        .strip_prefix('"')
                        .and_then(|v| v.strip_suffix('"'))
                        .unwrap_or(value);
                    self.error_report = Some(process_escape_sequences(trimmed));
                } else if let Some(value) = arg.strip_prefix("-locale=") {
                    self.locale = Some(value.to_string());
                } else {
                    return Err(FatalError::BadParameters(format!(
                        "unknown option: '{arg}'"
                    )));
                }
            }
        }

        Ok(())
    }

    /// Multiplier from seconds to the output time unit.
    pub fn time_multiplier(&self) -> f64 {
        self.time_unit.multiplier()
    }
}

fn parse_ts_diff(value: &str) -> Result<(f64, f64)> {
    let mut parts = value.splitn(2, ';');
    let neg: f64 = parts
        .next()
        .and_then(|p| p.trim().parse().ok())
        .ok_or_else(|| bad_ts(value))?;
    let pos: f64 = parts
        .next()
        .and_then(|p| p.trim().parse().ok())
        .ok_or_else(|| bad_ts(value))?;

    if neg >= 0.0 || pos <= 0.0 {
        return Err(bad_ts(value));
    }

    Ok((neg, pos))
}

fn bad_ts(value: &str) -> FatalError {
    FatalError::BadParameters(format!(
        "-ts= expects 'neg;pos' with neg < 0 and pos > 0, got '{value}'"
    ))
}

/// Strip surrounding quotes and trailing path separators from a folder or
/// file argument.
fn clean_folder_arg(arg: &str) -> String {
    let mut text = arg.trim();
    if text.starts_with('"') && text.ends_with('"') && text.len() >= 2 {
        text = &text[1..text.len() - 1];
    }
    text.trim_end_matches(['/', '\\']).to_string()
}

fn read_parameter_file(path: &str) -> Result<(String, String, Vec<String>)> {
    let content = fs::read_to_string(path).map_err(|_| {
        FatalError::BadParameters(format!("cannot open the parameter file '{path}'"))
    })?;

    let mut lines = content.lines();
    let out_dir = lines
        .next()
        .map(clean_folder_arg)
        .filter(|l| !l.is_empty())
        .ok_or_else(|| {
            FatalError::BadParameters("parameter file is missing the output folder".to_string())
        })?;
    let fmt_dir = lines
        .next()
        .map(clean_folder_arg)
        .filter(|l| !l.is_empty())
        .ok_or_else(|| {
            FatalError::BadParameters("parameter file is missing the format folder".to_string())
        })?;

    let rest = lines
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|l| clean_folder_arg(l))
        .collect();

    Ok((out_dir, fmt_dir, rest))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Params> {
        Params::from_args(args.iter().map(|s| s.to_string()))
    }

    #[test]
    fn test_minimal_invocation() {
        let params = parse(&["out", "fmt", "-N=11", "data.bin"]).unwrap();
        assert_eq!(params.out_dir, PathBuf::from("out"));
        assert_eq!(params.fmt_dir, PathBuf::from("fmt"));
        assert_eq!(params.fmt_id_bits, 11);
        assert_eq!(params.bin_file, Some(PathBuf::from("data.bin")));
        assert_eq!(params.timestamp_fmt, "%8.6f");
        assert_eq!(params.msg_no_fmt, "N%05u");
    }

    #[test]
    fn test_n_is_mandatory() {
        let err = parse(&["out", "fmt", "data.bin"]).unwrap_err();
        assert_eq!(err.exit_code(), 16);
    }

    #[test]
    fn test_n_range() {
        assert!(parse(&["out", "fmt", "-N=8", "x"]).is_err());
        assert!(parse(&["out", "fmt", "-N=17", "x"]).is_err());
        assert!(parse(&["out", "fmt", "-N=16", "x"]).is_ok());
    }

    #[test]
    fn test_time_unit_sets_default_template() {
        let params = parse(&["out", "fmt", "-N=11", "-time=ms", "x"]).unwrap();
        assert_eq!(params.time_unit, TimeUnit::Milliseconds);
        assert_eq!(params.timestamp_fmt, "%8.3f");
        assert_eq!(params.time_multiplier(), 1e3);
    }

    #[test]
    fn test_templates_get_percent_prefix() {
        let params = parse(&["out", "fmt", "-N=11", "-nr=06u", "-T=10.4f", "x"]).unwrap();
        assert_eq!(params.msg_no_fmt, "%06u");
        assert_eq!(params.timestamp_fmt, "%10.4f");
    }

    #[test]
    fn test_stat_options() {
        let params = parse(&["out", "fmt", "-N=11", "-stat=all", "x"]).unwrap();
        assert!(params.value_stats && params.msg_stats);
        let params = parse(&["out", "fmt", "-N=11", "-stat=msg", "x"]).unwrap();
        assert!(!params.value_stats && params.msg_stats);
    }

    #[test]
    fn test_ts_diff_validation() {
        let params = parse(&["out", "fmt", "-N=11", "-ts=-5;10", "x"]).unwrap();
        assert_eq!(params.ts_diff_ms, Some((-5.0, 10.0)));
        assert!(parse(&["out", "fmt", "-N=11", "-ts=5;10", "x"]).is_err());
        assert!(parse(&["out", "fmt", "-N=11", "-ts=-5;-10", "x"]).is_err());
        assert!(parse(&["out", "fmt", "-N=11", "-ts=junk", "x"]).is_err());
    }

    #[test]
    fn test_unknown_option_rejected() {
        assert!(parse(&["out", "fmt", "-N=11", "-bogus", "x"]).is_err());
    }

    #[test]
    fn test_folder_cleanup() {
        let params = parse(&["\"out dir\"/", "fmt\\", "-N=11", "x"]).unwrap();
        assert_eq!(params.out_dir, PathBuf::from("\"out dir\""));
        // quotes are stripped only when they surround the whole argument
        let params = parse(&["\"out dir/\"", "fmt", "-N=11", "x"]).unwrap();
        assert_eq!(params.out_dir, PathBuf::from("out dir"));
    }

    #[test]
    fn test_check_mode_without_binary() {
        let params = parse(&["out", "fmt", "-c", "-N=11"]).unwrap();
        assert!(params.check_only);
        assert!(params.bin_file.is_none());
    }

    #[test]
    fn test_parameter_file() {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let path = std::env::temp_dir().join(format!("rtemsg_params_{nanos}.txt"));
        fs::write(&path, "out\nfmt\n-N=12\n\n-debug\ncapture.bin\n").unwrap();

        let params = parse(&[&format!("@{}", path.display())]).unwrap();
        assert_eq!(params.out_dir, PathBuf::from("out"));
        assert_eq!(params.fmt_dir, PathBuf::from("fmt"));
        assert_eq!(params.fmt_id_bits, 12);
        assert!(params.debug);
        assert_eq!(params.bin_file, Some(PathBuf::from("capture.bin")));

        fs::remove_file(&path).unwrap();
    }
}
