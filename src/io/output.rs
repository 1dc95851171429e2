// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! Output-file management for the decoder.
//!
//! All tool outputs are created in the output folder: the main log, the
//! error log, the statistics reports and any user-declared OUT_FILE targets.
//! In check-only mode no decode outputs are created and every write becomes
//! a no-op.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::core::error::{FatalError, Result};

pub const MAIN_LOG_FILE: &str = "Main.log";
pub const ERRORS_LOG_FILE: &str = "Errors.log";
pub const FILTER_NAMES_FILE: &str = "Filter_names.txt";
pub const STAT_MAIN_FILE: &str = "Stat_main.log";
pub const STAT_VALUES_FILE: &str = "Statistics.csv";
pub const STAT_MSGS_FOUND_FILE: &str = "Stat_msgs_found.txt";
pub const STAT_MSGS_MISSING_FILE: &str = "Stat_msgs_missing.txt";
pub const TIMESTAMPS_FILE: &str = "Timestamps.csv";
pub const FORMAT_DEBUG_FILE: &str = "Format.csv";

/// A log target that may be absent (check-only mode, not yet created).
/// Writes to an absent target are discarded, so the print paths do not have
/// to special-case missing files.
#[derive(Debug, Default)]
pub struct LogFile {
    inner: Option<BufWriter<File>>,
}

impl LogFile {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(LogFile {
            inner: Some(BufWriter::new(file)),
        })
    }

    pub fn absent() -> Self {
        LogFile::default()
    }

    pub fn is_open(&self) -> bool {
        self.inner.is_some()
    }
}

impl Write for LogFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut self.inner {
            Some(writer) => writer.write(buf),
            None => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.inner {
            Some(writer) => writer.flush(),
            None => Ok(()),
        }
    }
}

/// The set of tool-owned output files.
#[derive(Debug)]
pub struct OutputSet {
    out_dir: PathBuf,
    pub main_log: LogFile,
    pub error_log: LogFile,
    pub timestamps: LogFile,
}

impl OutputSet {
    /// Prepare the output folder and create the error log. The main log is
    /// created later, once format parsing has succeeded.
    pub fn create(out_dir: &Path) -> Result<Self> {
        fs::create_dir_all(out_dir)
            .map_err(|_| FatalError::OutputFolder(out_dir.display().to_string()))?;

        let error_log = LogFile::open(&out_dir.join(ERRORS_LOG_FILE))
            .map_err(|_| FatalError::CreateErrorFile(ERRORS_LOG_FILE.to_string()))?;

        Ok(OutputSet {
            out_dir: out_dir.to_path_buf(),
            main_log: LogFile::absent(),
            error_log,
            timestamps: LogFile::absent(),
        })
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    pub fn path_of(&self, name: &str) -> PathBuf {
        self.out_dir.join(name)
    }

    pub fn create_main_log(&mut self) -> Result<()> {
        self.main_log = LogFile::open(&self.path_of(MAIN_LOG_FILE))?;
        Ok(())
    }

    pub fn create_timestamps_log(&mut self) -> Result<()> {
        self.timestamps = LogFile::open(&self.path_of(TIMESTAMPS_FILE))?;
        Ok(())
    }

    /// Create an auxiliary report file (statistics, filter names, debug dump).
    pub fn create_aux(&self, name: &str) -> io::Result<BufWriter<File>> {
        Ok(BufWriter::new(File::create(self.path_of(name))?))
    }

    /// Open a user OUT_FILE target with the requested fopen-style mode.
    /// Mode characters: `w` truncate, `a` append, `x` fail-if-exists;
    /// `b`, `t` and `+` only affect the C runtime and are accepted as-is.
    pub fn create_user_file(&self, name: &Path, mode: &str) -> io::Result<BufWriter<File>> {
        let path = self.out_dir.join(name);
        let mut options = OpenOptions::new();
        options.write(true);

        if mode.contains('a') {
            options.append(true).create(true);
        } else if mode.contains('x') {
            options.create_new(true);
        } else {
            options.create(true).truncate(true);
        }

        Ok(BufWriter::new(options.open(path)?))
    }

    /// Remove output files from previous runs so a failed run does not leave
    /// stale decoded data behind.
    pub fn remove_stale_outputs(&self) {
        for name in [
            MAIN_LOG_FILE,
            STAT_MAIN_FILE,
            STAT_MSGS_FOUND_FILE,
            STAT_MSGS_MISSING_FILE,
        ] {
            let _ = fs::remove_file(self.path_of(name));
        }
    }

    pub fn flush_all(&mut self) {
        let _ = self.main_log.flush();
        let _ = self.error_log.flush();
        let _ = self.timestamps.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir() -> PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!("rtemsg_output_{}_{nanos}", std::process::id()))
    }

    #[test]
    fn test_absent_logfile_discards_writes() {
        let mut log = LogFile::absent();
        writeln!(log, "dropped").unwrap();
        assert!(!log.is_open());
    }

    #[test]
    fn test_create_outputs() {
        let dir = temp_dir();
        let mut out = OutputSet::create(&dir).unwrap();
        assert!(dir.join(ERRORS_LOG_FILE).exists());

        out.create_main_log().unwrap();
        writeln!(out.main_log, "hello").unwrap();
        out.flush_all();
        let text = fs::read_to_string(dir.join(MAIN_LOG_FILE)).unwrap();
        assert_eq!(text, "hello\n");

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_user_file_modes() {
        let dir = temp_dir();
        let out = OutputSet::create(&dir).unwrap();

        let mut file = out.create_user_file(Path::new("data.bin"), "wb").unwrap();
        file.write_all(b"abc").unwrap();
        drop(file);

        // 'x' refuses to overwrite
        assert!(out.create_user_file(Path::new("data.bin"), "wx").is_err());

        // 'a' appends
        let mut file = out.create_user_file(Path::new("data.bin"), "a").unwrap();
        file.write_all(b"def").unwrap();
        file.flush().unwrap();
        drop(file);
        assert_eq!(fs::read(dir.join("data.bin")).unwrap(), b"abcdef");

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_remove_stale_outputs() {
        let dir = temp_dir();
        let mut out = OutputSet::create(&dir).unwrap();
        out.create_main_log().unwrap();
        out.flush_all();
        out.main_log = LogFile::absent();
        assert!(dir.join(MAIN_LOG_FILE).exists());
        out.remove_stale_outputs();
        assert!(!dir.join(MAIN_LOG_FILE).exists());
        fs::remove_dir_all(&dir).unwrap();
    }
}
