use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};

use log::warn;
use thiserror::Error;

/// Upper bound on the content returned for a single include by the default
/// filesystem resolver. Content past the cap is dropped, not an error.
pub const MAX_INCLUDE_SIZE: usize = 1 << 20;

const DEFINE_PREFIX: &[u8] = b"#define";
const INCLUDE_PREFIX: &[u8] = b"#include";

/// Error type produced by [`Definer`] and [`Includer`] implementations.
pub type HookError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid define preprocessor directive: {0:?}")]
    MalformedDefine(String),

    #[error("invalid include preprocessor directive: {0:?}")]
    MalformedInclude(String),

    #[error("preprocessor error while defining {name:?} as {value:?}: {reason}")]
    Define {
        name: String,
        value: String,
        reason: HookError,
    },

    #[error("preprocessor error while including {name:?}: {reason}")]
    Include { name: String, reason: HookError },

    #[error("failed to read input source code: {0}")]
    Scan(#[from] io::Error),
}

/// Strategy deciding how `#define` directives are registered.
///
/// Invoked once per directive, after any previously defined macros have been
/// substituted into the raw value. The returned pair is what actually lands
/// in the macro table, so implementations may rename, rewrite, or validate
/// definitions. Errors halt processing.
pub trait Definer {
    fn define(&mut self, name: String, value: String) -> Result<(String, String), HookError>;
}

impl<F> Definer for F
where
    F: FnMut(String, String) -> Result<(String, String), HookError>,
{
    fn define(&mut self, name: String, value: String) -> Result<(String, String), HookError> {
        self(name, value)
    }
}

/// Default [`Definer`]: registers every definition unchanged.
#[derive(Debug, Default)]
pub struct IdentityDefiner;

impl Definer for IdentityDefiner {
    fn define(&mut self, name: String, value: String) -> Result<(String, String), HookError> {
        Ok((name, value))
    }
}

/// Strategy resolving an `#include` target name to raw content.
///
/// Errors halt processing.
pub trait Includer {
    fn include(&mut self, name: &str) -> Result<Vec<u8>, HookError>;
}

impl<F> Includer for F
where
    F: FnMut(&str) -> Result<Vec<u8>, HookError>,
{
    fn include(&mut self, name: &str) -> Result<Vec<u8>, HookError> {
        self(name)
    }
}

/// Default [`Includer`]: reads the target as a file path beneath a root
/// directory, capping content at [`MAX_INCLUDE_SIZE`] bytes.
#[derive(Debug)]
pub struct FsIncluder {
    root: PathBuf,
}

impl FsIncluder {
    pub fn new() -> Self {
        Self::with_root(".")
    }

    /// Resolve include targets relative to `root` instead of the working
    /// directory.
    pub fn with_root<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }
}

impl Default for FsIncluder {
    fn default() -> Self {
        Self::new()
    }
}

impl Includer for FsIncluder {
    fn include(&mut self, name: &str) -> Result<Vec<u8>, HookError> {
        let path = self.root.join(name);
        let file = File::open(&path)?;
        let mut content = Vec::new();
        // Read one byte past the cap so truncation is detectable.
        file.take(MAX_INCLUDE_SIZE as u64 + 1)
            .read_to_end(&mut content)?;
        if content.len() > MAX_INCLUDE_SIZE {
            content.truncate(MAX_INCLUDE_SIZE);
            warn!(
                "include {} larger than {} bytes, content truncated",
                path.display(),
                MAX_INCLUDE_SIZE
            );
        }
        Ok(content)
    }
}

/// A line-oriented macro preprocessor emulating a small subset of the C
/// preprocessor.
///
/// Reads `\n`-delimited source from its input, handling `#define` and
/// `#include` directives and applying registered macros to every other line
/// as literal substring replacement. One instance processes one stream;
/// [`Preprocessor::process`] consumes it.
pub struct Preprocessor<R, D = IdentityDefiner, I = FsIncluder> {
    scanner: Scanner<R>,
    defines: BTreeMap<String, String>,
    definer: D,
    includer: I,
}

impl<R: Read> Preprocessor<R> {
    pub fn new(input: R) -> Self {
        Self {
            scanner: Scanner::new(input),
            defines: BTreeMap::new(),
            definer: IdentityDefiner,
            includer: FsIncluder::new(),
        }
    }
}

impl<R: Read, D: Definer, I: Includer> Preprocessor<R, D, I> {
    /// Replace the `#define` strategy.
    pub fn with_definer<D2: Definer>(self, definer: D2) -> Preprocessor<R, D2, I> {
        Preprocessor {
            scanner: self.scanner,
            defines: self.defines,
            definer,
            includer: self.includer,
        }
    }

    /// Replace the `#include` strategy.
    pub fn with_includer<I2: Includer>(self, includer: I2) -> Preprocessor<R, D, I2> {
        Preprocessor {
            scanner: self.scanner,
            defines: self.defines,
            definer: self.definer,
            includer,
        }
    }

    /// Register a macro directly, as if a `#define` had already been
    /// processed. Bypasses the [`Definer`] strategy.
    pub fn define(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.defines.insert(name.into(), value.into());
    }

    /// Run the preprocessor over the whole input, returning the expanded
    /// source. Any directive, strategy, or read failure aborts the pass; no
    /// partial output is returned.
    pub fn process(mut self) -> Result<Vec<u8>, Error> {
        let mut src = Vec::new();
        while let Some(line) = self.scanner.scan() {
            let line = line?;
            if line.starts_with(DEFINE_PREFIX) {
                self.handle_define(&line)?;
            } else if line.starts_with(INCLUDE_PREFIX) {
                self.handle_include(&line, &mut src)?;
            } else {
                src.append(&mut apply_defines(&self.defines, &line));
                // The scanner strips the trailing newline, so restore it.
                src.push(b'\n');
            }
        }
        Ok(src)
    }

    // Syntax:
    //   - #define FOO_BITS 8
    //   - #define FOO_BAR "foo bar"
    fn handle_define(&mut self, line: &[u8]) -> Result<(), Error> {
        let text = String::from_utf8_lossy(line).into_owned();
        let fields: Vec<&str> = text.split_whitespace().collect();
        if fields.len() < 3 {
            return Err(Error::MalformedDefine(text.clone()));
        }

        let name = fields[1].to_owned();
        // Joining on single spaces mangles any wider spacing inside the
        // original value.
        let raw = fields[2..].join(" ");

        // Nested definitions resolve now, against the table as it stands, so
        // a macro never sees itself while being defined.
        let value = apply_defines_str(&self.defines, &raw);

        let (name, value) = self
            .definer
            .define(name.clone(), value.clone())
            .map_err(|reason| Error::Define { name, value, reason })?;
        self.defines.insert(name, value);
        Ok(())
    }

    // Syntax:
    //   - #include "foo.p4"
    //   - #include "foo/bar.p4"
    fn handle_include(&mut self, line: &[u8], src: &mut Vec<u8>) -> Result<(), Error> {
        let text = String::from_utf8_lossy(line).into_owned();
        let fields: Vec<&str> = text.split_whitespace().collect();
        if fields.len() != 2 {
            return Err(Error::MalformedInclude(text.clone()));
        }

        let name = fields[1].trim_matches('"');
        let content = self
            .includer
            .include(name)
            .map_err(|reason| Error::Include {
                name: name.to_owned(),
                reason,
            })?;

        // Included content is spliced in verbatim after substitution; it is
        // not rescanned for directives.
        src.append(&mut apply_defines(&self.defines, &content));
        Ok(())
    }
}

struct Scanner<R> {
    inner: BufReader<R>,
}

impl<R: Read> Scanner<R> {
    fn new(input: R) -> Self {
        Self {
            inner: BufReader::new(input),
        }
    }

    // One line, with the `\n` (and any preceding `\r`) stripped. A final
    // line without a terminator is still returned.
    fn scan(&mut self) -> Option<io::Result<Vec<u8>>> {
        let mut buf = Vec::new();
        match self.inner.read_until(b'\n', &mut buf) {
            Ok(0) => None,
            Ok(_) => {
                if buf.last() == Some(&b'\n') {
                    buf.pop();
                    if buf.last() == Some(&b'\r') {
                        buf.pop();
                    }
                }
                Some(Ok(buf))
            }
            Err(err) => Some(Err(err)),
        }
    }
}

// Apply every registered macro in one left-to-right scan. At each offset the
// longest matching name wins (ties broken lexically) and the emitted
// replacement is never rescanned, so expansion cannot cascade and the result
// does not depend on table iteration order.
fn apply_defines(defines: &BTreeMap<String, String>, input: &[u8]) -> Vec<u8> {
    if defines.is_empty() {
        return input.to_vec();
    }

    let mut ordered: Vec<(&str, &str)> = defines
        .iter()
        .filter(|(name, _)| !name.is_empty())
        .map(|(name, value)| (name.as_str(), value.as_str()))
        .collect();
    ordered.sort_by(|(a, _), (b, _)| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));

    let mut out = Vec::with_capacity(input.len());
    let mut i = 0;
    'scan: while i < input.len() {
        for (name, value) in &ordered {
            if input[i..].starts_with(name.as_bytes()) {
                out.extend_from_slice(value.as_bytes());
                i += name.len();
                continue 'scan;
            }
        }
        out.push(input[i]);
        i += 1;
    }
    out
}

fn apply_defines_str(defines: &BTreeMap<String, String>, input: &str) -> String {
    String::from_utf8_lossy(&apply_defines(defines, input.as_bytes())).into_owned()
}
