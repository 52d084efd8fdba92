use crate::Issue;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_MAX_RECORD_BYTES: usize = 10 * 1024 * 1024;
pub const BEADS_DIR_ENV: &str = "BEADS_DIR";

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];
const PREFERRED_FILES: [&str; 3] = ["issues.jsonl", "beads.jsonl", "beads.base.jsonl"];

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("no beads issues found at {}", .0.display())]
    Missing(PathBuf),
    #[error("failed to open {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("error reading issues stream: {0}")]
    Read(#[from] io::Error),
    #[error("line {line} exceeds max record size of {max} bytes")]
    RecordTooLarge { line: usize, max: usize },
    #[error("{0}")]
    Other(String),
}

impl LoadError {
    /// Whether retrying after the next file change is expected to succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            LoadError::Missing(_) => true,
            LoadError::Io { source, .. } | LoadError::Read(source) => matches!(
                source.kind(),
                io::ErrorKind::NotFound
                    | io::ErrorKind::PermissionDenied
                    | io::ErrorKind::Interrupted
                    | io::ErrorKind::WouldBlock
                    | io::ErrorKind::TimedOut
                    | io::ErrorKind::UnexpectedEof
            ),
            LoadError::RecordTooLarge { .. } | LoadError::Other(_) => false,
        }
    }

    fn open(path: &Path, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::NotFound {
            LoadError::Missing(path.to_path_buf())
        } else {
            LoadError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    }
}

/// A skipped record. Never fatal for the load as a whole.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadWarning {
    pub line: usize,
    pub message: String,
}

impl fmt::Display for LoadWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

pub struct LoadOptions<'a> {
    pub max_record_bytes: usize,
    /// Issues rejected by this predicate are dropped without a warning.
    pub retain: Option<&'a dyn Fn(&Issue) -> bool>,
    pub on_warning: Option<&'a dyn Fn(&LoadWarning)>,
    /// Backing storage for the result; cleared before use.
    pub buffer: Vec<Issue>,
}

impl Default for LoadOptions<'_> {
    fn default() -> Self {
        Self {
            max_record_bytes: DEFAULT_MAX_RECORD_BYTES,
            retain: None,
            on_warning: None,
            buffer: Vec::new(),
        }
    }
}

#[derive(Debug, Default)]
pub struct Loaded {
    pub issues: Vec<Issue>,
    pub warnings: Vec<LoadWarning>,
}

pub trait Loader: Send + Sync {
    /// Cheap estimate of how many records `path` holds.
    fn size_hint(&self, path: &Path) -> Result<usize, LoadError> {
        count_lines(path)
    }

    fn load(&self, path: &Path, options: LoadOptions<'_>) -> Result<Loaded, LoadError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonlLoader;

impl Loader for JsonlLoader {
    fn load(&self, path: &Path, options: LoadOptions<'_>) -> Result<Loaded, LoadError> {
        let file = File::open(path).map_err(|err| LoadError::open(path, err))?;
        parse_issues(BufReader::new(file), options)
    }
}

pub fn parse_issues<R: BufRead>(
    mut reader: R,
    options: LoadOptions<'_>,
) -> Result<Loaded, LoadError> {
    let LoadOptions {
        max_record_bytes,
        retain,
        on_warning,
        buffer: mut issues,
    } = options;
    issues.clear();

    let mut warnings = Vec::new();
    let mut warn = |line: usize, message: String| {
        let warning = LoadWarning { line, message };
        if let Some(callback) = on_warning {
            callback(&warning);
        }
        warnings.push(warning);
    };

    // Room for the record plus a CRLF terminator.
    let read_limit = max_record_bytes.saturating_add(2) as u64;
    let mut raw_line = Vec::new();
    let mut line_no = 0usize;
    loop {
        raw_line.clear();
        let read = reader
            .by_ref()
            .take(read_limit)
            .read_until(b'\n', &mut raw_line)?;
        if read == 0 {
            break;
        }
        line_no += 1;

        let mut record = raw_line.as_slice();
        if let Some(stripped) = record.strip_suffix(b"\n") {
            record = stripped;
        }
        if let Some(stripped) = record.strip_suffix(b"\r") {
            record = stripped;
        }
        if record.len() > max_record_bytes {
            return Err(LoadError::RecordTooLarge {
                line: line_no,
                max: max_record_bytes,
            });
        }
        if line_no == 1 {
            if let Some(stripped) = record.strip_prefix(UTF8_BOM) {
                record = stripped;
            }
        }
        if record.iter().all(u8::is_ascii_whitespace) {
            continue;
        }

        let issue: Issue = match serde_json::from_slice(record) {
            Ok(issue) => issue,
            Err(err) => {
                warn(line_no, format!("skipping malformed JSON: {err}"));
                continue;
            }
        };
        if let Err(err) = issue.validate() {
            warn(line_no, format!("skipping invalid issue: {err}"));
            continue;
        }
        if let Some(retain) = retain {
            if !retain(&issue) {
                continue;
            }
        }
        issues.push(issue);
    }

    Ok(Loaded { issues, warnings })
}

/// Counts newline-terminated lines plus a trailing unterminated one.
pub fn count_lines(path: &Path) -> Result<usize, LoadError> {
    let mut file = File::open(path).map_err(|err| LoadError::open(path, err))?;
    let mut chunk = [0u8; 32 * 1024];
    let mut lines = 0usize;
    let mut last_byte = None;
    loop {
        let n = match file.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(LoadError::Read(err)),
        };
        lines += chunk[..n].iter().filter(|byte| **byte == b'\n').count();
        last_byte = Some(chunk[n - 1]);
    }
    if matches!(last_byte, Some(byte) if byte != b'\n') {
        lines += 1;
    }
    Ok(lines)
}

/// Locates the beads JSONL file for `start`, honoring `BEADS_DIR`.
pub fn resolve_beads_path(start: &Path) -> Result<PathBuf, LoadError> {
    if let Ok(dir) = std::env::var(BEADS_DIR_ENV) {
        let trimmed = dir.trim();
        if !trimmed.is_empty() {
            return find_jsonl_in(Path::new(trimmed));
        }
    }

    for dir in start.ancestors() {
        let beads_dir = dir.join(".beads");
        if beads_dir.is_dir() {
            return find_jsonl_in(&beads_dir);
        }
    }
    Err(LoadError::Missing(start.join(".beads")))
}

fn find_jsonl_in(beads_dir: &Path) -> Result<PathBuf, LoadError> {
    let entries = fs::read_dir(beads_dir).map_err(|err| LoadError::open(beads_dir, err))?;

    let mut candidates: Vec<String> = Vec::new();
    for entry in entries.flatten() {
        if entry.file_type().map(|ty| ty.is_dir()).unwrap_or(true) {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if is_candidate_file(&name) {
            candidates.push(name);
        }
    }
    candidates.sort();

    if candidates.is_empty() {
        return Err(LoadError::Missing(beads_dir.to_path_buf()));
    }

    let non_empty = |name: &str| {
        fs::metadata(beads_dir.join(name))
            .map(|meta| meta.len() > 0)
            .unwrap_or(false)
    };
    for preferred in PREFERRED_FILES {
        if candidates.iter().any(|name| name == preferred) && non_empty(preferred) {
            return Ok(beads_dir.join(preferred));
        }
    }
    if let Some(name) = candidates.iter().find(|name| non_empty(name)) {
        return Ok(beads_dir.join(name));
    }
    Ok(beads_dir.join(&candidates[0]))
}

fn is_candidate_file(name: &str) -> bool {
    if !name.ends_with(".jsonl") || name == "deletions.jsonl" {
        return false;
    }
    if name.contains(".backup") || name.contains(".orig") || name.contains(".merge") {
        return false;
    }
    // Conflict sides left behind by git merges.
    !(name.starts_with("beads.left") || name.starts_with("beads.right"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::IssueStatus;
    use std::cell::RefCell;
    use std::io::Cursor;

    fn line(id: &str, status: &str) -> String {
        format!(r#"{{"id":"{id}","title":"Issue {id}","status":"{status}","priority":1,"issue_type":"task"}}"#)
    }

    #[test]
    fn parse_skips_malformed_and_invalid_lines_with_warnings() {
        let input = format!(
            "{}\n{{not json\n\n{}\n{}\n",
            line("bd-1", "open"),
            r#"{"id":"bd-2","title":""}"#,
            line("bd-3", "closed"),
        );
        let seen = RefCell::new(Vec::new());
        let on_warning = |warning: &LoadWarning| seen.borrow_mut().push(warning.line);
        let loaded = parse_issues(
            Cursor::new(input),
            LoadOptions {
                on_warning: Some(&on_warning),
                ..LoadOptions::default()
            },
        )
        .expect("partial success");

        let ids: Vec<_> = loaded.issues.iter().map(|issue| issue.id.as_str()).collect();
        assert_eq!(ids, vec!["bd-1", "bd-3"]);
        assert_eq!(loaded.warnings.len(), 2);
        assert_eq!(loaded.warnings[0].line, 2);
        assert_eq!(loaded.warnings[1].line, 4);
        assert_eq!(*seen.borrow(), vec![2, 4]);
    }

    #[test]
    fn parse_strips_bom_and_crlf() {
        let input = format!("\u{feff}{}\r\n{}\r\n", line("bd-1", "open"), line("bd-2", "open"));
        let loaded = parse_issues(Cursor::new(input), LoadOptions::default()).expect("parse");
        assert_eq!(loaded.issues.len(), 2);
        assert!(loaded.warnings.is_empty());
    }

    #[test]
    fn parse_applies_retain_filter_silently() {
        let input = format!("{}\n{}\n", line("bd-1", "open"), line("bd-2", "closed"));
        let open_only = |issue: &Issue| !issue.status.is_closed();
        let loaded = parse_issues(
            Cursor::new(input),
            LoadOptions {
                retain: Some(&open_only),
                ..LoadOptions::default()
            },
        )
        .expect("parse");
        assert_eq!(loaded.issues.len(), 1);
        assert_eq!(loaded.issues[0].status, IssueStatus::Open);
        assert!(loaded.warnings.is_empty());
    }

    #[test]
    fn oversized_record_is_a_hard_error() {
        let big = format!(
            r#"{{"id":"bd-1","title":"{}"}}"#,
            "x".repeat(512)
        );
        let input = format!("{}\n{big}\n", line("bd-0", "open"));
        let err = parse_issues(
            Cursor::new(input),
            LoadOptions {
                max_record_bytes: 128,
                ..LoadOptions::default()
            },
        )
        .expect_err("record too large");
        assert!(matches!(err, LoadError::RecordTooLarge { line: 2, max: 128 }));
        assert!(!err.is_transient());
    }

    #[test]
    fn parse_reuses_supplied_buffer() {
        let mut buffer = Vec::with_capacity(64);
        buffer.push(Issue::new("stale", "stale", IssueStatus::Open));
        let loaded = parse_issues(
            Cursor::new(line("bd-1", "open")),
            LoadOptions {
                buffer,
                ..LoadOptions::default()
            },
        )
        .expect("parse");
        assert_eq!(loaded.issues.len(), 1);
        assert_eq!(loaded.issues[0].id, "bd-1");
        assert!(loaded.issues.capacity() >= 64);
    }

    #[test]
    fn missing_file_is_transient() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("beads.jsonl");
        let err = JsonlLoader
            .load(&path, LoadOptions::default())
            .expect_err("missing");
        assert!(matches!(err, LoadError::Missing(_)));
        assert!(err.is_transient());
        assert!(count_lines(&path).is_err());
    }

    #[test]
    fn count_lines_handles_trailing_partial_line() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("beads.jsonl");
        fs::write(&path, "a\nb\nc").expect("write");
        assert_eq!(count_lines(&path).expect("count"), 3);
        fs::write(&path, "a\nb\n").expect("write");
        assert_eq!(count_lines(&path).expect("count"), 2);
        fs::write(&path, "").expect("write");
        assert_eq!(count_lines(&path).expect("count"), 0);
    }

    #[test]
    fn find_jsonl_prefers_canonical_names_and_skips_artifacts() {
        let dir = tempfile::tempdir().expect("tempdir");
        let beads = dir.path().join(".beads");
        fs::create_dir_all(&beads).expect("mkdir");
        fs::write(beads.join("beads.left.jsonl"), "x\n").expect("write");
        fs::write(beads.join("issues.jsonl.backup"), "x\n").expect("write");
        fs::write(beads.join("deletions.jsonl"), "x\n").expect("write");
        fs::write(beads.join("beads.jsonl"), "x\n").expect("write");
        assert_eq!(find_jsonl_in(&beads).expect("find"), beads.join("beads.jsonl"));

        fs::write(beads.join("issues.jsonl"), "x\n").expect("write");
        assert_eq!(find_jsonl_in(&beads).expect("find"), beads.join("issues.jsonl"));
    }

    #[test]
    fn find_jsonl_skips_empty_preferred_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let beads = dir.path().join(".beads");
        fs::create_dir_all(&beads).expect("mkdir");
        fs::write(beads.join("issues.jsonl"), "").expect("write");
        fs::write(beads.join("custom.jsonl"), "x\n").expect("write");
        assert_eq!(find_jsonl_in(&beads).expect("find"), beads.join("custom.jsonl"));
    }
}
