//! Flattened source buffer with stable positions
//!
//! The preprocessor operates on a mutable line-by-column character buffer so
//! diagnostics can always report exact file/line positions. Two rules keep
//! positions stable across passes:
//!
//! 1. Text is never removed, only blanked (overwritten with spaces).
//! 2. `!include` expansion splices lines in place and records an
//!    `(insert-start, length, file)` triple so a flattened position can be
//!    translated back to the originating file and line through arbitrarily
//!    deep nesting.
//!
//! Insertion records form a laminar family: a nested include is always fully
//! contained in the record of the include that pulled it in, and the outer
//! record's length is grown to cover it. Translation walks the records from
//! the most recently pushed (innermost) outward.

use std::path::{Path, PathBuf};

use crate::error::Location;

/// A position in the flattened buffer. Both coordinates are 0-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

impl Position {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

/// One spliced `!include` expansion, in flattened-buffer coordinates.
#[derive(Debug, Clone)]
struct Insertion {
    start: usize,
    len: usize,
    file: PathBuf,
}

impl Insertion {
    fn contains_line(&self, line: usize) -> bool {
        line >= self.start && line < self.start + self.len
    }

    fn contains(&self, other: &Insertion) -> bool {
        other.start >= self.start && other.start + other.len <= self.start + self.len
    }
}

/// The flattened, mutable source text.
#[derive(Debug, Clone)]
pub struct SourceBuffer {
    path: PathBuf,
    lines: Vec<Vec<char>>,
    inserts: Vec<Insertion>,
}

impl SourceBuffer {
    /// Split `text` into the line-by-column buffer. Newlines are not stored;
    /// the line index is the only line-break information.
    pub fn new(path: impl Into<PathBuf>, text: &str) -> Self {
        Self {
            path: path.into(),
            lines: split_lines(text),
            inserts: Vec::new(),
        }
    }

    /// Path of the root (outermost) file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    pub fn line(&self, index: usize) -> &[char] {
        &self.lines[index]
    }

    pub fn line_string(&self, index: usize) -> String {
        self.lines[index].iter().collect()
    }

    pub fn char_at(&self, pos: Position) -> Option<char> {
        self.lines.get(pos.line)?.get(pos.column).copied()
    }

    /// Splice the lines of `file` into the buffer in place of nothing,
    /// starting at `at` (the lines previously at `at` shift down). Existing
    /// insertion records are adjusted: records past the splice shift, records
    /// enclosing it grow.
    pub fn splice(&mut self, at: usize, file: impl Into<PathBuf>, text: &str) {
        let new_lines = split_lines(text);
        let len = new_lines.len();
        for rec in &mut self.inserts {
            if rec.start >= at {
                rec.start += len;
            } else if at < rec.start + rec.len {
                rec.len += len;
            }
        }
        self.inserts.push(Insertion {
            start: at,
            len,
            file: file.into(),
        });
        self.lines.splice(at..at, new_lines);
    }

    /// Whether `candidate` is an active ancestor at flattened line `at`:
    /// either the root file itself, or the file of any insertion record whose
    /// line range contains `at`. This is the include-loop test; identity is
    /// by path as written, not canonicalized file identity.
    pub fn is_ancestor(&self, candidate: &Path, at: usize) -> bool {
        if candidate == self.path {
            return true;
        }
        self.inserts
            .iter()
            .any(|rec| rec.contains_line(at) && rec.file == candidate)
    }

    /// Translate a flattened line index back to the originating file and
    /// 1-based line number.
    pub fn origin(&self, line: usize) -> Location {
        // Innermost containing record: records are pushed outer-first, so the
        // last match in push order is the innermost.
        let containing = self
            .inserts
            .iter()
            .rev()
            .find(|rec| rec.contains_line(line));
        match containing {
            Some(rec) => {
                let mut local = line - rec.start;
                // Lines pulled in by includes nested directly inside `rec`
                // are not lines of `rec.file`; subtract the immediate
                // children that end at or before `line`.
                for child in self.immediate_children(rec) {
                    if child.start + child.len <= line {
                        local -= child.len;
                    }
                }
                Location::new(rec.file.clone(), local + 1)
            }
            None => {
                let mut local = line;
                for rec in self.maximal_records() {
                    if rec.start + rec.len <= line {
                        local -= rec.len;
                    }
                }
                Location::new(self.path.clone(), local + 1)
            }
        }
    }

    /// Records not contained in any other record.
    fn maximal_records(&self) -> impl Iterator<Item = &Insertion> {
        self.inserts.iter().enumerate().filter_map(|(i, rec)| {
            let nested = self
                .inserts
                .iter()
                .enumerate()
                .any(|(j, other)| i != j && other.contains(rec));
            (!nested).then_some(rec)
        })
    }

    /// Records directly contained in `parent` (not through an intermediate).
    fn immediate_children<'a>(&'a self, parent: &'a Insertion) -> Vec<&'a Insertion> {
        self.inserts
            .iter()
            .enumerate()
            .filter(|&(i, rec)| {
                !std::ptr::eq(rec, parent)
                    && parent.contains(rec)
                    && !self.inserts.iter().enumerate().any(|(j, mid)| {
                        i != j
                            && !std::ptr::eq(mid, parent)
                            && parent.contains(mid)
                            && mid.contains(rec)
                    })
            })
            .map(|(_, rec)| rec)
            .collect()
    }

    /// Overwrite `[from, to)` with spaces. `to` is exclusive; the range may
    /// span lines. Line structure is untouched.
    pub fn blank(&mut self, from: Position, to: Position) {
        let mut pos = from;
        while pos < to && pos.line < self.lines.len() {
            let line_len = self.lines[pos.line].len();
            let end_col = if pos.line == to.line {
                to.column.min(line_len)
            } else {
                line_len
            };
            for col in pos.column..end_col {
                self.lines[pos.line][col] = ' ';
            }
            pos = Position::new(pos.line + 1, 0);
        }
    }

    /// Blank an entire line.
    pub fn blank_line(&mut self, line: usize) {
        let len = self.lines[line].len();
        self.blank(Position::new(line, 0), Position::new(line, len));
    }

    /// Reassemble the flattened text, one `\n` per line.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            out.extend(line.iter());
            out.push('\n');
        }
        out
    }
}

fn split_lines(text: &str) -> Vec<Vec<char>> {
    // `str::lines` would drop a trailing empty line; split keeps it, and the
    // final element after the last newline is discarded to mirror line count.
    let mut lines: Vec<Vec<char>> = text.split('\n').map(|l| l.chars().collect()).collect();
    if let Some(last) = lines.last() {
        if last.is_empty() && lines.len() > 1 {
            lines.pop();
        }
    }
    // Strip carriage returns from CRLF sources.
    for line in &mut lines {
        if line.last() == Some(&'\r') {
            line.pop();
        }
    }
    lines
}
