//! Selection gathering
//!
//! IDEs launch `askcode` as an external tool and pass the selection in one of
//! several shapes. Macros the IDE could not expand (e.g. `$SelectionStart$`)
//! arrive verbatim and are treated as absent.
//!
//! Resolution order:
//!
//! 1. `--selection TEXT`
//! 2. `--sel-start/--sel-end` character offsets into `--filepath`
//! 3. `--sel-start-line/--sel-start-col/--sel-end-line/--sel-end-col`
//!    (1-based) into `--filepath`
//! 4. stdin, when it is not a terminal
//! 5. the whole of `--filepath`

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::Args;

/// Where the code to ask about comes from
#[derive(Args, Clone, Debug, Default)]
pub struct SelectionArgs {
    /// Display name of the file (defaults to the basename of --filepath)
    #[arg(long)]
    pub file: Option<String>,

    /// Path of the file the selection belongs to
    #[arg(long)]
    pub filepath: Option<PathBuf>,

    /// Selected text
    #[arg(long)]
    pub selection: Option<String>,

    /// Selection start, as a character offset
    #[arg(long)]
    pub sel_start: Option<String>,

    /// Selection end, as a character offset
    #[arg(long)]
    pub sel_end: Option<String>,

    #[arg(long)]
    pub sel_start_line: Option<String>,

    #[arg(long)]
    pub sel_start_col: Option<String>,

    #[arg(long)]
    pub sel_end_line: Option<String>,

    #[arg(long)]
    pub sel_end_col: Option<String>,
}

/// Code plus the name it is shown under
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Selection {
    pub code: String,
    pub title: String,
}

impl SelectionArgs {
    /// Title shown for the session
    pub fn title(&self) -> String {
        if let Some(file) = self.file.as_deref().filter(|f| !f.is_empty() && !is_macro(f)) {
            return file.to_string();
        }
        self.filepath
            .as_deref()
            .and_then(Path::file_name)
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "selection".to_string())
    }

    /// Resolve the selection
    ///
    /// `read_stdin` returns `None` when stdin is a terminal.
    pub fn resolve<F>(&self, read_stdin: F) -> anyhow::Result<Selection>
    where
        F: FnOnce() -> std::io::Result<Option<String>>,
    {
        let title = self.title();
        let code = self.resolve_code(read_stdin)?;
        let code = code.strip_suffix('\n').unwrap_or(&code).to_string();

        if code.trim().is_empty() {
            bail!("No selection: pass --selection, pipe code on stdin, or point --filepath at a file");
        }
        Ok(Selection { code, title })
    }

    fn resolve_code<F>(&self, read_stdin: F) -> anyhow::Result<String>
    where
        F: FnOnce() -> std::io::Result<Option<String>>,
    {
        if let Some(text) = self.selection.as_deref().filter(|s| !s.is_empty() && !is_macro(s)) {
            return Ok(text.to_string());
        }

        let file_text = match self.filepath {
            Some(ref path) => match std::fs::read(path) {
                Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
                Err(e) => {
                    tracing::warn!(path = ?path, error = %e, "Could not read file");
                    None
                }
            },
            None => None,
        };

        if let Some(ref text) = file_text {
            if let (Some(start), Some(end)) = (number(&self.sel_start), number(&self.sel_end)) {
                return Ok(slice_by_offsets(text, start, end));
            }
            if let (Some(sl), Some(sc), Some(el), Some(ec)) = (
                number(&self.sel_start_line),
                number(&self.sel_start_col),
                number(&self.sel_end_line),
                number(&self.sel_end_col),
            ) {
                return Ok(slice_by_line_col(text, (sl, sc), (el, ec)));
            }
        }

        if let Some(piped) = read_stdin().context("Failed to read stdin")? {
            if !piped.is_empty() {
                return Ok(piped);
            }
        }

        Ok(file_text.unwrap_or_default())
    }
}

/// Unexpanded IDE macro such as `$SelectedText$`
///
/// Real code may well contain `$` (`${x}`, `$var`), so only a whole value of
/// the form `$Name$` counts.
fn is_macro(value: &str) -> bool {
    let value = value.trim();
    value.len() > 2
        && value.starts_with('$')
        && value.ends_with('$')
        && value[1..value.len() - 1]
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn number(value: &Option<String>) -> Option<usize> {
    value
        .as_deref()
        .filter(|v| !is_macro(v))
        .and_then(|v| v.trim().parse().ok())
}

/// Slice by character offsets, clamped to the text
pub fn slice_by_offsets(text: &str, start: usize, end: usize) -> String {
    let len = text.chars().count();
    let start = start.min(len);
    let end = end.clamp(start, len);
    text.chars().skip(start).take(end - start).collect()
}

/// Slice by 1-based (line, column) positions, clamped to the text
///
/// Reversed ranges are swapped.
pub fn slice_by_line_col(text: &str, start: (usize, usize), end: (usize, usize)) -> String {
    let lines: Vec<&str> = text.split_inclusive('\n').collect();
    if lines.is_empty() {
        return String::new();
    }

    let to_offset = |(line, col): (usize, usize)| -> usize {
        let line = line.clamp(1, lines.len());
        let base: usize = lines[..line - 1].iter().map(|l| l.chars().count()).sum();
        let current = lines[line - 1].chars().count();
        base + col.saturating_sub(1).min(current)
    };

    let (mut s, mut e) = (to_offset(start), to_offset(end));
    if e < s {
        std::mem::swap(&mut s, &mut e);
    }
    slice_by_offsets(text, s, e)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    fn no_stdin() -> std::io::Result<Option<String>> {
        Ok(None)
    }

    #[test]
    fn test_explicit_selection_wins() {
        let args = SelectionArgs {
            selection: Some("x = 1\n".to_string()),
            file: Some("a.py".to_string()),
            ..Default::default()
        };
        let selection = args.resolve(|| Ok(Some("ignored".to_string()))).unwrap();
        assert_eq!(
            selection,
            Selection {
                code: "x = 1".to_string(),
                title: "a.py".to_string(),
            }
        );
    }

    #[test]
    fn test_unexpanded_macro_falls_through_to_stdin() {
        let args = SelectionArgs {
            selection: Some("$SelectedText$".to_string()),
            ..Default::default()
        };
        let selection = args.resolve(|| Ok(Some("piped".to_string()))).unwrap();
        assert_eq!(selection.code, "piped");
        assert_eq!(selection.title, "selection");
    }

    #[test]
    fn test_code_with_dollar_signs_is_kept() {
        for code in ["const s = `${x}`;", "echo $HOME", "$a = 1; $b = 2;", "$"] {
            let args = SelectionArgs {
                selection: Some(code.to_string()),
                ..Default::default()
            };
            assert_eq!(args.resolve(no_stdin).unwrap().code, code);
        }
    }

    #[test]
    fn test_macro_detection() {
        assert!(is_macro("$SelectedText$"));
        assert!(is_macro("$SelectionStartOffset$"));
        assert!(!is_macro("$a + b$"));
        assert!(!is_macro("${x}"));
        assert!(!is_macro("$$"));
    }

    #[test]
    fn test_offsets_and_line_columns_slice_the_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "first\nsecond\nthird\n").unwrap();

        let by_offset = SelectionArgs {
            filepath: Some(file.path().to_path_buf()),
            sel_start: Some("6".to_string()),
            sel_end: Some("12".to_string()),
            ..Default::default()
        };
        assert_eq!(by_offset.resolve(no_stdin).unwrap().code, "second");

        let by_line_col = SelectionArgs {
            filepath: Some(file.path().to_path_buf()),
            sel_start_line: Some("3".to_string()),
            sel_start_col: Some("1".to_string()),
            sel_end_line: Some("2".to_string()),
            sel_end_col: Some("4".to_string()),
            ..Default::default()
        };
        assert_eq!(by_line_col.resolve(no_stdin).unwrap().code, "ond");
    }

    #[test]
    fn test_macro_offsets_fall_back_to_whole_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "whole\n").unwrap();

        let args = SelectionArgs {
            filepath: Some(file.path().to_path_buf()),
            sel_start: Some("$SelectionStartOffset$".to_string()),
            sel_end: Some("3".to_string()),
            ..Default::default()
        };
        let selection = args.resolve(no_stdin).unwrap();
        assert_eq!(selection.code, "whole");
        assert_eq!(
            selection.title,
            file.path().file_name().unwrap().to_string_lossy()
        );
    }

    #[test]
    fn test_empty_selection_is_an_error() {
        let args = SelectionArgs::default();
        assert!(args.resolve(no_stdin).is_err());
        assert!(args.resolve(|| Ok(Some("  \n".to_string()))).is_err());
    }

    #[test]
    fn test_slices_are_clamped() {
        assert_eq!(slice_by_offsets("héllo", 1, 99), "éllo");
        assert_eq!(slice_by_offsets("abc", 5, 1), "");
        assert_eq!(slice_by_line_col("ab\ncd", (9, 9), (1, 2)), "b\ncd");
    }
}
