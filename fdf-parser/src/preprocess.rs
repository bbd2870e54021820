//! Preprocessor passes
//!
//! Runs in passes over the mutable [`SourceBuffer`] so every later
//! diagnostic can report exact file/line positions:
//!
//! 1. Comment stripping (`//`, `#`, `/* */`), respecting quoted strings.
//!    Characters are blanked, never removed.
//! 2. A single forward walk that expands `!include` (with loop detection and
//!    line remapping), evaluates `!if`/`!ifdef`/`!ifndef`/`!elseif`/`!else`/
//!    `!endif` blocks against the macro/PCD scope, and captures `DEFINE` and
//!    `SET` statements as side effects.
//!
//! Directive lines, not-taken branches, and captured statements are recorded
//! during the walk and blanked in one final pass, so a later directive's
//! position bookkeeping is unaffected by earlier blanking. Includes splice
//! strictly after the scan position, which keeps already-recorded line
//! indices stable.

use std::fs;
use std::path::PathBuf;

use log::{debug, trace};

use crate::error::{
    DirectiveError, FdfError, IncludeError, LexError, Location, Result,
};
use crate::expr::{self, EvalError};
use crate::scope::{ScopeKey, SectionKind, COMMON_ARCH};
use crate::session::CompileSession;
use crate::source::{Position, SourceBuffer};

/// Preprocess the session's FDF file into a flattened, blanked buffer.
pub fn preprocess(session: &mut CompileSession) -> Result<SourceBuffer> {
    let path = session.fdf_path.clone();
    let text = fs::read_to_string(&path)?;
    preprocess_source(&text, session)
}

/// Preprocess already-loaded source text (entry point for tests).
pub fn preprocess_source(text: &str, session: &mut CompileSession) -> Result<SourceBuffer> {
    let mut buf = SourceBuffer::new(session.fdf_path.clone(), text);
    strip_comments(&mut buf)?;
    let mut pass = DirectivePass {
        session,
        frames: Vec::new(),
        blank: Vec::new(),
    };
    pass.run(&mut buf)?;
    Ok(buf)
}

/// One open conditional block.
struct CondFrame {
    start_line: usize,
    directive: String,
    /// Whether this branch's lines are kept.
    satisfied: bool,
    /// Whether any branch of this block has already been taken.
    taken: bool,
    /// Whether the enclosing context was active when the block opened.
    parent_active: bool,
    in_else: bool,
}

struct DirectivePass<'a> {
    session: &'a mut CompileSession,
    frames: Vec<CondFrame>,
    /// Flattened line indices to blank in the final pass.
    blank: Vec<usize>,
}

impl DirectivePass<'_> {
    fn active(&self) -> bool {
        self.frames.iter().all(|f| f.satisfied)
    }

    fn run(&mut self, buf: &mut SourceBuffer) -> Result<()> {
        let mut i = 0;
        while i < buf.line_count() {
            let line = buf.line_string(i);
            let trimmed = line.trim();
            if let Some(rest) = trimmed.strip_prefix('!') {
                self.directive(buf, i, rest)?;
                self.blank.push(i);
            } else if !self.active() {
                self.blank.push(i);
            } else if trimmed.starts_with('[') {
                self.enter_section(trimmed);
            } else if let Some(rest) = keyword_rest(trimmed, "DEFINE") {
                self.capture_define(buf, i, rest)?;
                self.blank.push(i);
            } else if let Some(rest) = keyword_rest(trimmed, "SET") {
                self.capture_set(buf, i, rest)?;
                self.blank.push(i);
            }
            i += 1;
        }
        if let Some(frame) = self.frames.first() {
            return Err(DirectiveError::UnbalancedConditional {
                location: buf.origin(frame.start_line),
                directive: frame.directive.clone(),
            }
            .into());
        }
        for line in &self.blank {
            buf.blank_line(*line);
        }
        Ok(())
    }

    fn directive(&mut self, buf: &mut SourceBuffer, line: usize, rest: &str) -> Result<()> {
        let (word, arg) = rest
            .split_once(char::is_whitespace)
            .map(|(w, a)| (w, a.trim()))
            .unwrap_or((rest.trim(), ""));
        let location = buf.origin(line);
        match word.to_ascii_lowercase().as_str() {
            "if" => {
                let parent_active = self.active();
                let satisfied = if parent_active {
                    self.eval(arg, &location)?
                } else {
                    false
                };
                self.frames.push(CondFrame {
                    start_line: line,
                    directive: format!("!{}", word),
                    satisfied,
                    taken: satisfied || !parent_active,
                    parent_active,
                    in_else: false,
                });
            }
            "ifdef" | "ifndef" => {
                let parent_active = self.active();
                let name = strip_macro_parens(arg);
                let defined = self.session.scope.is_defined(name);
                let satisfied = parent_active
                    && if word.eq_ignore_ascii_case("ifdef") {
                        defined
                    } else {
                        !defined
                    };
                self.frames.push(CondFrame {
                    start_line: line,
                    directive: format!("!{}", word),
                    satisfied,
                    taken: satisfied || !parent_active,
                    parent_active,
                    in_else: false,
                });
            }
            "elseif" => {
                let eval_needed = {
                    let frame = self.top_frame(&location, "!elseif")?;
                    if frame.in_else {
                        return Err(DirectiveError::Malformed {
                            location,
                            text: "!elseif after !else".into(),
                        }
                        .into());
                    }
                    frame.parent_active && !frame.taken
                };
                let satisfied = if eval_needed {
                    self.eval(arg, &location)?
                } else {
                    false
                };
                let frame = self.frames.last_mut().expect("frame checked above");
                frame.satisfied = satisfied;
                frame.taken |= satisfied;
            }
            "else" => {
                let frame = self.top_frame(&location, "!else")?;
                if frame.in_else {
                    return Err(DirectiveError::Malformed {
                        location,
                        text: "duplicate !else".into(),
                    }
                    .into());
                }
                let satisfied = frame.parent_active && !frame.taken;
                let frame = self.frames.last_mut().expect("frame checked above");
                frame.in_else = true;
                frame.satisfied = satisfied;
                frame.taken = true;
            }
            "endif" => {
                if self.frames.pop().is_none() {
                    return Err(DirectiveError::DanglingDirective {
                        location,
                        directive: "!endif".into(),
                    }
                    .into());
                }
            }
            "include" => {
                if self.active() {
                    self.expand_include(buf, line, arg)?;
                }
            }
            other => {
                return Err(DirectiveError::Malformed {
                    location,
                    text: format!("!{}", other),
                }
                .into());
            }
        }
        Ok(())
    }

    fn top_frame(&self, location: &Location, directive: &str) -> Result<&CondFrame> {
        self.frames.last().ok_or_else(|| {
            DirectiveError::DanglingDirective {
                location: location.clone(),
                directive: directive.into(),
            }
            .into()
        })
    }

    fn eval(&self, text: &str, location: &Location) -> Result<bool> {
        expr::evaluate_bool(text, &self.session.scope).map_err(|err| match err {
            EvalError::Undefined(name) => DirectiveError::UndefinedMacro {
                location: location.clone(),
                name,
            }
            .into(),
            EvalError::Parse(reason) => DirectiveError::BadExpression {
                location: location.clone(),
                expression: text.to_string(),
                reason,
            }
            .into(),
        })
    }

    fn expand_include(&mut self, buf: &mut SourceBuffer, line: usize, arg: &str) -> Result<()> {
        let location = buf.origin(line);
        let raw = arg.trim().trim_matches('"');
        let expanded = self.session.scope.substitute(raw).map_err(|name| {
            FdfError::from(DirectiveError::UndefinedMacro {
                location: location.clone(),
                name,
            })
        })?;
        let resolved: PathBuf = self.session.resolve_path(&expanded).ok_or_else(|| {
            FdfError::from(IncludeError::NotFound {
                location: location.clone(),
                path: expanded.clone(),
            })
        })?;
        if buf.is_ancestor(&resolved, line) {
            return Err(IncludeError::Loop {
                location,
                path: expanded,
            }
            .into());
        }
        let text = fs::read_to_string(&resolved).map_err(|err| {
            FdfError::from(IncludeError::Unreadable {
                location: location.clone(),
                path: expanded.clone(),
                reason: err.to_string(),
            })
        })?;
        // Comments are stripped per file, before splicing, so a stray block
        // comment cannot leak across the include boundary.
        let mut included = SourceBuffer::new(resolved.clone(), &text);
        strip_comments(&mut included)?;
        debug!(
            "expanding !include '{}' ({} lines) at {}",
            expanded,
            included.line_count(),
            location
        );
        buf.splice(line + 1, resolved, &included.text());
        Ok(())
    }

    /// Track section headers so `DEFINE` lands in the right scope.
    fn enter_section(&mut self, header: &str) {
        let inner = header.trim_start_matches('[').trim_end_matches(']');
        let mut parts = inner.split('.');
        let kind = match parts
            .next()
            .unwrap_or_default()
            .to_ascii_uppercase()
            .as_str()
        {
            "DEFINES" => SectionKind::Defines,
            "FD" => SectionKind::Fd,
            "FV" => SectionKind::Fv,
            "CAPSULE" => SectionKind::Capsule,
            "RULE" => SectionKind::Rule,
            "OPTIONROM" => SectionKind::OptionRom,
            "FMPPAYLOAD" => SectionKind::FmpPayload,
            // Unknown headers are the parser's diagnostic, not ours.
            _ => return,
        };
        let (name, arch) = match kind {
            SectionKind::Rule => {
                let arch = parts.next().unwrap_or(COMMON_ARCH).to_string();
                (parts.collect::<Vec<_>>().join("."), arch)
            }
            _ => (
                parts.collect::<Vec<_>>().join("."),
                COMMON_ARCH.to_string(),
            ),
        };
        trace!("entering scope [{:?}.{}] arch {}", kind, name, arch);
        self.session
            .scope
            .enter(ScopeKey::new(kind, &name, &arch));
    }

    fn capture_define(&mut self, buf: &SourceBuffer, line: usize, rest: &str) -> Result<()> {
        let location = buf.origin(line);
        let (name, value) = rest.split_once('=').ok_or_else(|| {
            FdfError::from(DirectiveError::Malformed {
                location: location.clone(),
                text: format!("DEFINE {}", rest),
            })
        })?;
        let name = name.trim();
        let value = value.trim();
        trace!("{}: DEFINE {} = {}", location, name, value);
        self.session.scope.define(name, value);
        Ok(())
    }

    fn capture_set(&mut self, buf: &SourceBuffer, line: usize, rest: &str) -> Result<()> {
        let location = buf.origin(line);
        let (name, value) = rest.split_once('=').ok_or_else(|| {
            FdfError::from(DirectiveError::Malformed {
                location: location.clone(),
                text: format!("SET {}", rest),
            })
        })?;
        let name = name.trim();
        let value = self.session.scope.substitute(value.trim()).map_err(|m| {
            FdfError::from(DirectiveError::UndefinedMacro {
                location: location.clone(),
                name: m,
            })
        })?;
        trace!("{}: SET {} = {}", location, name, value);
        self.session.scope.set_pcd(name, &value);
        Ok(())
    }
}

/// `DEFINE x = y` / `SET a.b = c` keyword match: case-insensitive, must be
/// followed by whitespace.
fn keyword_rest<'a>(line: &'a str, keyword: &str) -> Option<&'a str> {
    let (head, rest) = line.split_at_checked(keyword.len())?;
    if head.eq_ignore_ascii_case(keyword) && rest.starts_with(char::is_whitespace) {
        Some(rest.trim_start())
    } else {
        None
    }
}

fn strip_macro_parens(arg: &str) -> &str {
    let arg = arg.trim();
    arg.strip_prefix("$(")
        .and_then(|s| s.strip_suffix(')'))
        .unwrap_or(arg)
}

/// Pass 1: blank `//`, `#`, and `/* */` comments, respecting quoted-string
/// context. Characters are overwritten with spaces so positions stay stable.
pub fn strip_comments(buf: &mut SourceBuffer) -> Result<()> {
    let mut in_block = false;
    let mut block_start = Position::new(0, 0);
    let mut ranges: Vec<(Position, Position)> = Vec::new();
    for line_idx in 0..buf.line_count() {
        let line: Vec<char> = buf.line(line_idx).to_vec();
        let mut col = 0;
        let mut in_string = false;
        let mut line_block_start: Option<usize> = None;
        if in_block {
            line_block_start = Some(0);
        }
        while col < line.len() {
            let c = line[col];
            let next = line.get(col + 1).copied();
            if in_block {
                if c == '*' && next == Some('/') {
                    in_block = false;
                    let start = line_block_start.take().unwrap_or(0);
                    ranges.push((
                        Position::new(line_idx, start),
                        Position::new(line_idx, col + 2),
                    ));
                    col += 2;
                    continue;
                }
                col += 1;
                continue;
            }
            if in_string {
                if c == '"' {
                    in_string = false;
                }
                col += 1;
                continue;
            }
            match c {
                '"' => {
                    in_string = true;
                    col += 1;
                }
                '/' if next == Some('/') => {
                    ranges.push((
                        Position::new(line_idx, col),
                        Position::new(line_idx, line.len()),
                    ));
                    col = line.len();
                }
                '#' => {
                    ranges.push((
                        Position::new(line_idx, col),
                        Position::new(line_idx, line.len()),
                    ));
                    col = line.len();
                }
                '/' if next == Some('*') => {
                    in_block = true;
                    block_start = Position::new(line_idx, col);
                    line_block_start = Some(col);
                    col += 2;
                }
                _ => col += 1,
            }
        }
        if in_block {
            // The rest of this line belongs to the open block comment.
            let start = line_block_start.unwrap_or(0);
            ranges.push((
                Position::new(line_idx, start),
                Position::new(line_idx, line.len()),
            ));
        }
    }
    if in_block {
        return Err(LexError::UnterminatedComment {
            location: buf.origin(block_start.line),
        }
        .into());
    }
    for (from, to) in ranges {
        buf.blank(from, to);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> CompileSession {
        CompileSession::new("test.fdf")
    }

    fn preprocess_text(text: &str) -> Result<String> {
        let mut s = session();
        preprocess_source(text, &mut s).map(|buf| buf.text())
    }

    #[test]
    fn line_comments_are_blanked_in_place() {
        let out = preprocess_text("KEEP = 1 # tail\n// whole line\nNEXT = 2\n").unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0].trim_end(), "KEEP = 1");
        assert_eq!(lines[1].trim(), "");
        assert_eq!(lines[2].trim_end(), "NEXT = 2");
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn hash_inside_string_is_not_a_comment() {
        let out = preprocess_text("NAME = \"a#b\"\n").unwrap();
        assert!(out.contains("a#b"));
    }

    #[test]
    fn block_comments_span_lines_without_moving_text() {
        let out = preprocess_text("A /* x\ny */ B\n").unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0].trim_end(), "A");
        assert_eq!(lines[1].trim(), "B");
    }

    #[test]
    fn unterminated_block_comment_is_fatal() {
        let err = preprocess_text("A /* never closed\n").unwrap_err();
        assert!(matches!(
            err,
            FdfError::Lex(LexError::UnterminatedComment { .. })
        ));
    }

    #[test]
    fn if_true_keeps_then_branch() {
        let out = preprocess_text("!if 1\nA\n!else\nB\n!endif\n").unwrap();
        assert!(out.contains('A'));
        assert!(!out.contains('B'));
    }

    #[test]
    fn if_false_keeps_else_branch() {
        let out = preprocess_text("!if 0\nA\n!else\nB\n!endif\n").unwrap();
        assert!(!out.contains('A'));
        assert!(out.contains('B'));
    }

    #[test]
    fn elseif_chains_take_first_true_branch() {
        let out =
            preprocess_text("!if 0\nA\n!elseif 1\nB\n!elseif 1\nC\n!else\nD\n!endif\n").unwrap();
        assert!(out.contains('B'));
        assert!(!out.contains('A'));
        assert!(!out.contains('C'));
        assert!(!out.contains('D'));
    }

    #[test]
    fn nested_conditionals_respect_outer_inactive() {
        let out = preprocess_text("!if 0\n!if 1\nA\n!endif\n!else\nB\n!endif\n").unwrap();
        assert!(!out.contains('A'));
        assert!(out.contains('B'));
    }

    #[test]
    fn unbalanced_if_is_fatal() {
        let err = preprocess_text("!if 1\nA\n").unwrap_err();
        assert!(matches!(
            err,
            FdfError::Directive(DirectiveError::UnbalancedConditional { .. })
        ));
    }

    #[test]
    fn dangling_endif_is_fatal() {
        let err = preprocess_text("!endif\n").unwrap_err();
        assert!(matches!(
            err,
            FdfError::Directive(DirectiveError::DanglingDirective { .. })
        ));
    }

    #[test]
    fn ifdef_tests_definedness_only() {
        let mut s = session();
        s.scope.define_cli("ZERO", "0");
        let out = preprocess_source("!ifdef ZERO\nA\n!endif\n!ifndef MISSING\nB\n!endif\n", &mut s)
            .unwrap()
            .text();
        assert!(out.contains('A'));
        assert!(out.contains('B'));
    }

    #[test]
    fn undefined_macro_in_if_is_fatal() {
        let err = preprocess_text("!if $(NOPE) == 1\nA\n!endif\n").unwrap_err();
        assert!(matches!(
            err,
            FdfError::Directive(DirectiveError::UndefinedMacro { .. })
        ));
    }

    #[test]
    fn define_is_captured_and_blanked() {
        let mut s = session();
        let out = preprocess_source("DEFINE WIDTH = 0x10\n!if $(WIDTH) == 0x10\nA\n!endif\n", &mut s)
            .unwrap()
            .text();
        assert!(out.contains('A'));
        assert!(!out.contains("WIDTH"));
        assert_eq!(s.scope.lookup("WIDTH"), Some("0x10"));
    }

    #[test]
    fn set_records_a_global_pcd_binding() {
        let mut s = session();
        let out = preprocess_source("SET gSpace.PcdBase = 0xFF000000\n", &mut s)
            .unwrap()
            .text();
        assert!(!out.contains("PcdBase"));
        assert_eq!(s.scope.pcd("gSpace.PcdBase"), Some("0xFF000000"));
    }

    #[test]
    fn conditional_directive_lines_are_blanked() {
        let out = preprocess_text("!if 1\nA\n!endif\n").unwrap();
        assert!(!out.contains("!if"));
        assert!(!out.contains("!endif"));
    }

    mod includes {
        use super::*;
        use std::fs;

        #[test]
        fn include_expands_and_remaps_lines() {
            let dir = tempfile::tempdir().unwrap();
            let inc = dir.path().join("common.fdf");
            fs::write(&inc, "INCLUDED_LINE\n").unwrap();
            let root = dir.path().join("root.fdf");
            fs::write(&root, "TOP\n!include common.fdf\nBOTTOM\n").unwrap();

            let mut s = CompileSession::new(&root);
            let buf = preprocess(&mut s).unwrap();
            let text = buf.text();
            assert!(text.contains("INCLUDED_LINE"));
            // Line 3 of the flattened buffer (0-based 2) is the spliced line.
            assert_eq!(buf.origin(2).file, inc);
            assert_eq!(buf.origin(2).line, 1);
            // BOTTOM remaps back to root.fdf line 3.
            assert_eq!(buf.origin(3).file, root);
            assert_eq!(buf.origin(3).line, 3);
        }

        #[test]
        fn include_cycle_is_fatal() {
            let dir = tempfile::tempdir().unwrap();
            let a = dir.path().join("a.fdf");
            let b = dir.path().join("b.fdf");
            fs::write(&a, "!include b.fdf\n").unwrap();
            fs::write(&b, "!include a.fdf\n").unwrap();

            let mut s = CompileSession::new(&a);
            let err = preprocess(&mut s).unwrap_err();
            assert!(matches!(err, FdfError::Include(IncludeError::Loop { .. })));
        }

        #[test]
        fn missing_include_is_fatal() {
            let dir = tempfile::tempdir().unwrap();
            let root = dir.path().join("root.fdf");
            fs::write(&root, "!include nope.fdf\n").unwrap();

            let mut s = CompileSession::new(&root);
            let err = preprocess(&mut s).unwrap_err();
            assert!(matches!(
                err,
                FdfError::Include(IncludeError::NotFound { .. })
            ));
        }

        #[test]
        fn include_path_macros_are_substituted() {
            let dir = tempfile::tempdir().unwrap();
            fs::create_dir(dir.path().join("sub")).unwrap();
            let inc = dir.path().join("sub/part.fdf");
            fs::write(&inc, "PART\n").unwrap();
            let root = dir.path().join("root.fdf");
            fs::write(&root, "!include $(DIR)/part.fdf\n").unwrap();

            let mut s = CompileSession::new(&root);
            s.scope.define_cli("DIR", "sub");
            let text = preprocess(&mut s).unwrap().text();
            assert!(text.contains("PART"));
        }

        #[test]
        fn include_inside_false_branch_is_skipped() {
            let dir = tempfile::tempdir().unwrap();
            let root = dir.path().join("root.fdf");
            fs::write(&root, "!if 0\n!include nope.fdf\n!endif\n").unwrap();

            let mut s = CompileSession::new(&root);
            assert!(preprocess(&mut s).is_ok());
        }
    }
}
