//! Directive-driven patching of existing source files.
//!
//! A directive file is a line-oriented script of records:
//!
//! ```text
//! # To replace in: "src/pkg/__init__.py"
//! # Below: "from .models import ("
//! # Replace with:
//!     BrandNewBertModel,
//! # End.
//! ```
//!
//! Every line between the anchor marker and `# End.` is inserted verbatim
//! below the first line of the target file that contains the anchor text.
//! Lines containing `##` are comments for the directive author and are
//! dropped.

use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Write};

use camino::{Utf8Path, Utf8PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::error::{GraftError, Result};

const ESCAPE_TOKEN: &str = "##";
const TARGET_MARKER: &str = "# To replace in: ";
const ANCHOR_MARKER: &str = "# Below: ";
const END_MARKER: &str = "# End.";
const RESET_MARKER: &str = "# Replace with";

/// One committed record of a directive file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    pub target: Utf8PathBuf,
    pub anchor: String,
    /// Lines to insert, each carrying its original line terminator.
    pub lines: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum State {
    Scanning,
    Targeted { target: Utf8PathBuf },
    Anchored { target: Utf8PathBuf, anchor: String },
}

impl State {
    fn name(&self) -> &'static str {
        match self {
            State::Scanning => "scanning",
            State::Targeted { .. } => "targeted",
            State::Anchored { .. } => "anchored",
        }
    }
}

/// Incremental parser for directive files.
///
/// Feed it lines in order; it yields a [`Directive`] each time a record is
/// closed by `# End.`. The last `# To replace in:` target stays in effect
/// until another one replaces it, so one target can carry several
/// `# Below:` blocks.
#[derive(Debug)]
pub struct DirectiveParser {
    source: Utf8PathBuf,
    state: State,
    buffer: Vec<String>,
}

impl DirectiveParser {
    pub fn new(source: &Utf8Path) -> Self {
        Self {
            source: source.to_owned(),
            state: State::Scanning,
            buffer: Vec::new(),
        }
    }

    /// Process one line (terminator included). `line_no` is 1-based and only
    /// used for error reporting.
    pub fn feed(&mut self, line_no: usize, line: &str) -> Result<Option<Directive>> {
        if line.contains(ESCAPE_TOKEN) {
            return Ok(None);
        }

        if line.contains(TARGET_MARKER) {
            if matches!(self.state, State::Anchored { .. }) {
                return Err(self.malformed(
                    line_no,
                    "new `# To replace in:` record started before the previous one ended with `# End.`",
                ));
            }
            let target = self.quoted(line_no, line)?;
            debug!(line = line_no, %target, "directive target");
            self.state = State::Targeted {
                target: Utf8PathBuf::from(target),
            };
            return Ok(None);
        }

        if line.contains(ANCHOR_MARKER) {
            let (State::Targeted { target } | State::Anchored { target, .. }) = &self.state else {
                return Err(self.malformed(
                    line_no,
                    "`# Below:` marker before any `# To replace in:`",
                ));
            };
            let anchor = self.quoted(line_no, line)?;
            debug!(line = line_no, %anchor, "directive anchor");
            self.state = State::Anchored {
                target: target.clone(),
                anchor: anchor.to_owned(),
            };
            return Ok(None);
        }

        if line.contains(END_MARKER) {
            let State::Anchored { target, anchor } = &self.state else {
                return Err(self.malformed(
                    line_no,
                    format!("`# End.` marker while {}", self.state.name()),
                ));
            };
            let directive = Directive {
                target: target.clone(),
                anchor: anchor.clone(),
                lines: std::mem::take(&mut self.buffer),
            };
            // The target carries over to later `# Below:` blocks.
            self.state = State::Targeted {
                target: directive.target.clone(),
            };
            return Ok(Some(directive));
        }

        if line.contains(RESET_MARKER) {
            if self.state == State::Scanning {
                return Err(self.malformed(
                    line_no,
                    format!("`# Replace with` marker while {}", self.state.name()),
                ));
            }
            if !self.buffer.is_empty() {
                debug!(line = line_no, dropped = self.buffer.len(), "insertion buffer reset");
            }
            self.buffer.clear();
            return Ok(None);
        }

        match self.state {
            State::Anchored { .. } => self.buffer.push(line.to_owned()),
            _ => debug!(line = line_no, "ignoring text outside of a record body"),
        }
        Ok(None)
    }

    /// Signal end of input. A record still waiting for `# End.` is an error.
    pub fn finish(self, last_line: usize) -> Result<()> {
        match self.state {
            State::Anchored { .. } => {
                Err(self.malformed(last_line, "record not terminated with `# End.`"))
            }
            _ => Ok(()),
        }
    }

    fn quoted<'a>(&self, line_no: usize, line: &'a str) -> Result<&'a str> {
        let value = quoted_argument(line)
            .ok_or_else(|| self.malformed(line_no, "expected a double-quoted argument"))?;
        if value.is_empty() {
            return Err(self.malformed(line_no, "quoted argument must not be empty"));
        }
        Ok(value)
    }

    fn malformed(&self, line: usize, reason: impl Into<String>) -> GraftError {
        GraftError::MalformedDirective {
            path: self.source.clone(),
            line,
            reason: reason.into(),
        }
    }
}

/// Text between the first pair of `"` characters.
fn quoted_argument(line: &str) -> Option<&str> {
    let (_, rest) = line.split_once('"')?;
    let (value, _) = rest.split_once('"')?;
    Some(value)
}

/// Parse a whole directive document without touching the filesystem.
pub fn parse_directives(source: &Utf8Path, contents: &str) -> Result<Vec<Directive>> {
    let mut parser = DirectiveParser::new(source);
    let mut directives = Vec::new();
    let mut line_no = 0;
    for line in contents.split_inclusive('\n') {
        line_no += 1;
        if let Some(directive) = parser.feed(line_no, line)? {
            directives.push(directive);
        }
    }
    parser.finish(line_no)?;
    Ok(directives)
}

/// Apply every record of `path`, resolving relative targets against the
/// current directory, then delete the directive file.
pub fn apply_directives(path: &Utf8Path) -> Result<usize> {
    apply_directives_in(path, Utf8Path::new("."))
}

/// Apply every record of `path`, resolving relative targets against `base`,
/// then delete the directive file. Returns the number of records applied.
///
/// Records are applied as they are read; a failure leaves earlier targets
/// patched and the directive file in place.
pub fn apply_directives_in(path: &Utf8Path, base: &Utf8Path) -> Result<usize> {
    let file = File::open(path)
        .map_err(|err| GraftError::io(format!("opening directive file {path}"), err))?;
    let mut reader = BufReader::new(file);
    let mut parser = DirectiveParser::new(path);
    let mut line = String::new();
    let mut line_no = 0;
    let mut applied = 0;

    loop {
        line.clear();
        let read = reader
            .read_line(&mut line)
            .map_err(|err| GraftError::io(format!("reading directive file {path}"), err))?;
        if read == 0 {
            break;
        }
        line_no += 1;

        if let Some(directive) = parser.feed(line_no, &line)? {
            let target = resolve_target(base, &directive.target);
            insert_after_anchor(&target, &directive.anchor, &directive.lines)?;
            info!(file = %target, anchor = %directive.anchor, lines = directive.lines.len(), "patched");
            applied += 1;
        }
    }
    parser.finish(line_no)?;
    drop(reader);

    fs::remove_file(path)
        .map_err(|err| GraftError::io(format!("removing directive file {path}"), err))?;
    debug!(%path, applied, "directive file consumed");
    Ok(applied)
}

pub fn resolve_target(base: &Utf8Path, target: &Utf8Path) -> Utf8PathBuf {
    if target.is_absolute() {
        target.to_owned()
    } else {
        base.join(target)
    }
}

/// Insert `lines` right after the first line of `target` containing `anchor`.
///
/// The file is rewritten through a temporary sibling that replaces the
/// original in a single rename and keeps its permission bits. If the anchor
/// never occurs the original is left untouched and the temporary is removed.
pub fn insert_after_anchor(target: &Utf8Path, anchor: &str, lines: &[String]) -> Result<()> {
    if anchor.is_empty() {
        return Err(GraftError::EmptyAnchor {
            path: target.to_owned(),
        });
    }

    let original =
        File::open(target).map_err(|err| GraftError::io(format!("opening {target}"), err))?;
    let permissions = original
        .metadata()
        .map_err(|err| GraftError::io(format!("reading metadata of {target}"), err))?
        .permissions();

    let dir = match target.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent,
        _ => Utf8Path::new("."),
    };
    let mut temp = NamedTempFile::new_in(dir)
        .map_err(|err| GraftError::io(format!("creating temporary file in {dir}"), err))?;

    let found = {
        let mut writer = BufWriter::new(temp.as_file_mut());
        let found = splice(BufReader::new(original), &mut writer, anchor, lines)
            .map_err(|err| GraftError::io(format!("rewriting {target}"), err))?;
        writer
            .flush()
            .map_err(|err| GraftError::io(format!("rewriting {target}"), err))?;
        found
    };

    if !found {
        return Err(GraftError::AnchorNotFound {
            anchor: anchor.to_owned(),
            path: target.to_owned(),
        });
    }

    fs::set_permissions(temp.path(), permissions)
        .map_err(|err| GraftError::io(format!("copying permissions of {target}"), err))?;
    temp.persist(target)
        .map_err(|err| GraftError::io(format!("replacing {target}"), err.error))?;
    Ok(())
}

/// Copy `reader` to `writer`, emitting `insertion` after the first line that
/// contains `anchor`. Returns whether the anchor was seen.
fn splice<R: BufRead, W: Write>(
    mut reader: R,
    writer: &mut W,
    anchor: &str,
    insertion: &[String],
) -> io::Result<bool> {
    let mut found = false;
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            break;
        }
        writer.write_all(line.as_bytes())?;
        if !found && line.contains(anchor) {
            found = true;
            if !line.ends_with('\n') && !insertion.is_empty() {
                writer.write_all(b"\n")?;
            }
            for extra in insertion {
                writer.write_all(extra.as_bytes())?;
            }
        }
    }
    Ok(found)
}
