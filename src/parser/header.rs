// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! Header synchronizer.
//!
//! In compile mode every parsed line is copied verbatim into a `.work` file
//! next to its source, with one `#define NAME id` appended per directive
//! that introduces a named filter or message. When the file is fully parsed
//! the work file either replaces the target (source `.fmt` files emit a
//! sibling `.h`; header inputs are regenerated in place) or is discarded if
//! the content is byte-identical, so build systems never see a spurious
//! touch.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::core::error::{ParseError, ParseErrorCode, ParseResult};

const GUARD_PREFIX: &str = "RTE_";
const MAX_GUARD_LEN: usize = 80;

const HEADER_CAVEAT: &str =
    "Generated by RTEmsg from the format definition file. Do not edit manually.";

/// Work file collecting the regenerated header content.
#[derive(Debug)]
pub struct WorkFile {
    work_path: PathBuf,
    src_path: PathBuf,
    /// Source ends in `.fmt`: emit `<src>.h` instead of replacing the source.
    emit_header: bool,
    writer: Option<BufWriter<File>>,
    purge_defines: bool,
}

impl WorkFile {
    /// Create `<src>.work` and write the include-guard prologue.
    pub fn create(src_path: &Path, purge_defines: bool) -> ParseResult<Self> {
        let emit_header = src_path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("fmt"));

        let work_path = append_extension(src_path, "work");
        let guard = include_guard(src_path);

        let file = File::create(&work_path).map_err(|_| {
            ParseError::new(
                ParseErrorCode::CannotCreateWorkFile,
                0,
                work_path.display().to_string(),
            )
        })?;
        let mut writer = BufWriter::new(file);

        let mut prologue = String::new();
        if emit_header {
            prologue.push_str(&format!("/* {HEADER_CAVEAT} */\n\n"));
        }
        prologue.push_str(&format!("#ifndef {guard}\n#define {guard}\n"));

        writer.write_all(prologue.as_bytes()).map_err(|_| {
            ParseError::new(
                ParseErrorCode::CannotCreateWorkFile,
                0,
                work_path.display().to_string(),
            )
        })?;

        Ok(WorkFile {
            work_path,
            src_path: src_path.to_path_buf(),
            emit_header,
            writer: Some(writer),
            purge_defines,
        })
    }

    pub fn emits_header(&self) -> bool {
        self.emit_header
    }

    /// Copy one source line into the work file.
    pub fn write_line(&mut self, line: &str) {
        if let Some(writer) = &mut self.writer {
            let _ = writer.write_all(line.as_bytes());
            let _ = writer.write_all(b"\n");
        }
    }

    /// Append a `#define NAME id` for a freshly assigned name.
    pub fn write_define(&mut self, name: &str, value: u32) {
        if self.purge_defines {
            return;
        }
        if let Some(writer) = &mut self.writer {
            let _ = writeln!(writer, "#define {name} {value}U");
        }
    }

    /// Close the guard and synchronize the target file.
    ///
    /// With `errors_found` the work file is simply removed. Otherwise the
    /// target is replaced only when the new content differs byte for byte;
    /// `keep_backup` renames the replaced original to `<name>.bak` first.
    pub fn finish(mut self, errors_found: bool, keep_backup: bool) -> ParseResult<()> {
        if let Some(writer) = &mut self.writer {
            let _ = writer.write_all(b"#endif\n");
            let _ = writer.flush();
        }
        self.writer = None;

        if errors_found {
            return self.remove_work();
        }

        if self.emit_header {
            let header_path = append_extension(&self.src_path, "h");
            self.replace_if_changed(&header_path, false)
        } else {
            let src = self.src_path.clone();
            self.replace_if_changed(&src, keep_backup)
        }
    }

    fn replace_if_changed(&self, target: &Path, keep_backup: bool) -> ParseResult<()> {
        if files_identical(&self.work_path, target).unwrap_or(false) {
            return self.remove_work();
        }

        if target.exists() {
            if keep_backup {
                let backup = append_extension(target, "bak");
                let _ = fs::remove_file(&backup);
                fs::rename(target, &backup).map_err(|_| {
                    ParseError::new(
                        ParseErrorCode::FmtFileRename,
                        0,
                        backup.display().to_string(),
                    )
                })?;
            } else {
                fs::remove_file(target).map_err(|_| {
                    let code = if self.emit_header {
                        ParseErrorCode::HeaderRemove
                    } else {
                        ParseErrorCode::FmtFileRemove
                    };
                    ParseError::new(code, 0, target.display().to_string())
                })?;
            }
        }

        fs::rename(&self.work_path, target).map_err(|_| {
            ParseError::new(
                ParseErrorCode::WorkFileRename,
                0,
                target.display().to_string(),
            )
        })
    }

    fn remove_work(&self) -> ParseResult<()> {
        fs::remove_file(&self.work_path).map_err(|_| {
            ParseError::new(
                ParseErrorCode::WorkFileRemove,
                0,
                self.work_path.display().to_string(),
            )
        })
    }
}

/// Append an extension after the existing one: `a/rte.fmt` -> `a/rte.fmt.h`.
fn append_extension(path: &Path, ext: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(ext);
    PathBuf::from(name)
}

/// Derive the include guard from the file name: `RTE_` plus the name after
/// the last separator, uppercased, with non-alphanumerics mapped to `_` and
/// non-ASCII bytes folded to a letter.
fn include_guard(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut guard = String::from(GUARD_PREFIX);
    for byte in name.bytes() {
        if guard.len() >= MAX_GUARD_LEN {
            break;
        }
        if byte.is_ascii() {
            let c = byte.to_ascii_uppercase() as char;
            guard.push(if c.is_ascii_alphanumeric() { c } else { '_' });
        } else {
            let folded = b'A' + ((byte & 0x0F) ^ ((byte & 0xF0) >> 4));
            guard.push(folded as char);
        }
    }

    guard
}

fn files_identical(a: &Path, b: &Path) -> io::Result<bool> {
    let data_a = fs::read(a)?;
    let data_b = fs::read(b)?;
    Ok(data_a == data_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir() -> PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("rtemsg_header_{}_{nanos}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_include_guard() {
        assert_eq!(
            include_guard(Path::new("dir/rte_main_fmt.h")),
            "RTE_RTE_MAIN_FMT_H"
        );
        assert_eq!(include_guard(Path::new("a-b.fmt")), "RTE_A_B_FMT");
    }

    #[test]
    fn test_append_extension() {
        assert_eq!(
            append_extension(Path::new("x/y.fmt"), "h"),
            PathBuf::from("x/y.fmt.h")
        );
    }

    #[test]
    fn test_fmt_emits_sibling_header() {
        let dir = temp_dir();
        let src = dir.join("msgs.fmt");
        fs::write(&src, "// MSG0_A\n").unwrap();

        let mut work = WorkFile::create(&src, false).unwrap();
        assert!(work.emits_header());
        work.write_line("// MSG0_A");
        work.write_define("MSG0_A", 4);
        work.finish(false, false).unwrap();

        let header = fs::read_to_string(dir.join("msgs.fmt.h")).unwrap();
        assert!(header.contains("#ifndef RTE_MSGS_FMT"));
        assert!(header.contains("#define MSG0_A 4U"));
        assert!(header.ends_with("#endif\n"));
        assert!(!dir.join("msgs.fmt.work").exists());

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_identical_content_is_not_replaced() {
        let dir = temp_dir();
        let src = dir.join("msgs.fmt");
        fs::write(&src, "// MSG0_A\n").unwrap();

        let mut work = WorkFile::create(&src, false).unwrap();
        work.write_line("// MSG0_A");
        work.write_define("MSG0_A", 4);
        work.finish(false, false).unwrap();

        let header_path = dir.join("msgs.fmt.h");
        let first_mtime = fs::metadata(&header_path).unwrap().modified().unwrap();

        // Second run with the same content must leave the header untouched
        let mut work = WorkFile::create(&src, false).unwrap();
        work.write_line("// MSG0_A");
        work.write_define("MSG0_A", 4);
        work.finish(false, false).unwrap();

        let second_mtime = fs::metadata(&header_path).unwrap().modified().unwrap();
        assert_eq!(first_mtime, second_mtime);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_header_input_replaced_in_place_with_backup() {
        let dir = temp_dir();
        let src = dir.join("generated.h");
        fs::write(&src, "old content\n").unwrap();

        let mut work = WorkFile::create(&src, false).unwrap();
        assert!(!work.emits_header());
        work.write_line("// FILTER(F_SYS)");
        work.write_define("F_SYS", 0);
        work.finish(false, true).unwrap();

        let new_content = fs::read_to_string(&src).unwrap();
        assert!(new_content.contains("#define F_SYS 0U"));
        assert_eq!(
            fs::read_to_string(dir.join("generated.h.bak")).unwrap(),
            "old content\n"
        );

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_errors_discard_work_file() {
        let dir = temp_dir();
        let src = dir.join("bad.fmt");
        fs::write(&src, "// junk\n").unwrap();

        let mut work = WorkFile::create(&src, false).unwrap();
        work.write_line("// junk");
        work.finish(true, false).unwrap();

        assert!(!dir.join("bad.fmt.h").exists());
        assert!(!dir.join("bad.fmt.work").exists());

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_purge_defines() {
        let dir = temp_dir();
        let src = dir.join("purged.fmt");
        fs::write(&src, "// MSG0_A\n").unwrap();

        let mut work = WorkFile::create(&src, true).unwrap();
        work.write_line("// MSG0_A");
        work.write_define("MSG0_A", 4);
        work.finish(false, false).unwrap();

        let header = fs::read_to_string(dir.join("purged.fmt.h")).unwrap();
        assert!(!header.contains("#define MSG0_A"));

        fs::remove_dir_all(&dir).unwrap();
    }
}
