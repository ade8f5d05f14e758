//! Console noise filter.
//!
//! Firmware on emulated hardware is chatty: OVMF logs every boot option it
//! tries (including the DVD-ROM QEMU always attaches), and QEMU dumps each
//! CPU feature the host lacks. The filter collapses those lines into short
//! placeholders so real errors stay visible. It is line-oriented and
//! streaming: every line is written and flushed as soon as it is complete.
//!
//! Rules are anchored at the start of the line and matched against the line
//! with its terminator and ANSI CSI sequences removed. A line that matches no
//! rule is forwarded byte-for-byte.
//!
//! A line may reach the filter in several [`Chunk`]s (a prompt flushed on
//! idle, or an overlong line). Only the chunk that starts a line is matched.
//! When it is replaced, the rest of that line is dropped up to its
//! terminator; otherwise the rest is forwarded untouched.

use std::borrow::Cow;
use std::io;
use std::sync::OnceLock;
use std::time::Duration;

use netboot_profiles::{Architecture, ArchitectureProfile, NoisePattern};
use regex::bytes::Regex;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::error::{LaunchError, Result};

/// Longest line buffered before it is forwarded in pieces.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// Replacement passes tried before a line is left alone.
const MAX_REWRITES: usize = 8;

fn csi_sequence() -> &'static Regex {
    static CSI: OnceLock<Regex> = OnceLock::new();
    CSI.get_or_init(|| Regex::new(r"\x1b\[[0-?]*[ -/]*[@-~]").expect("static regex must compile"))
}

#[derive(Debug, Clone)]
struct Rule {
    regex: Regex,
    replacement: String,
}

/// A piece of console output: a whole line or part of one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub bytes: Vec<u8>,
    /// True when `bytes` begins a new line.
    pub starts_line: bool,
}

impl Chunk {
    /// A chunk holding a whole line.
    pub fn line(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
            starts_line: true,
        }
    }
}

/// Filtering state of one output stream.
#[derive(Debug, Default)]
pub struct LineState {
    /// The head of the current line was replaced; drop the rest of it.
    replaced: bool,
}

/// Compiled noise rules for one profile.
#[derive(Debug, Clone)]
pub struct DiagnosticFilter {
    rules: Vec<Rule>,
}

impl DiagnosticFilter {
    /// Compile `patterns` in order.
    ///
    /// Rejects invalid expressions and any replacement that would itself be
    /// caught by a rule.
    pub fn new(architecture: Architecture, patterns: &[NoisePattern]) -> Result<Self> {
        let mut rules = Vec::with_capacity(patterns.len());
        for p in patterns {
            let regex = Regex::new(&p.anchored()).map_err(|e| LaunchError::Configuration {
                architecture,
                detail: format!("invalid noise pattern '{}': {e}", p.pattern),
            })?;
            rules.push(Rule {
                regex,
                replacement: p.replacement.clone(),
            });
        }

        for rule in &rules {
            if let Some(other) = rules
                .iter()
                .find(|r| r.regex.is_match(rule.replacement.as_bytes()))
            {
                return Err(LaunchError::Configuration {
                    architecture,
                    detail: format!(
                        "noise replacement '{}' is matched by pattern '{}'",
                        rule.replacement,
                        other.regex.as_str()
                    ),
                });
            }
        }

        Ok(Self { rules })
    }

    /// Filter for a profile's own noise rules.
    pub fn for_profile(profile: &ArchitectureProfile) -> Result<Self> {
        Self::new(profile.architecture, &profile.noise_patterns)
    }

    /// A filter that forwards everything.
    pub fn passthrough() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Rewrite `content` (no terminator) if a rule matches it.
    ///
    /// A replacement whose expanded capture groups match a rule again is
    /// rewritten again until no rule matches, so the result is a fixed point.
    /// A line that does not settle within `MAX_REWRITES` passes is left as is.
    fn rewrite(&self, content: &[u8]) -> Option<Vec<u8>> {
        let mut current: Option<Vec<u8>> = None;
        for _ in 0..MAX_REWRITES {
            let next = {
                let input = current.as_deref().unwrap_or(content);
                let visible = csi_sequence().replace_all(input, &b""[..]);
                self.rules.iter().find_map(|rule| {
                    rule.regex.captures(&visible).map(|caps| {
                        let mut out = Vec::with_capacity(rule.replacement.len());
                        caps.expand(rule.replacement.as_bytes(), &mut out);
                        out
                    })
                })
            };
            match next {
                Some(out) => current = Some(out),
                None => return current,
            }
        }
        debug!(
            line = %String::from_utf8_lossy(content),
            "noise rules did not settle; forwarding line unchanged"
        );
        None
    }

    /// Filter one whole line (terminator included, if any).
    pub fn filter_line<'a>(&self, line: &'a [u8]) -> Cow<'a, [u8]> {
        if self.rules.is_empty() {
            return Cow::Borrowed(line);
        }

        let (content, terminator) = split_terminator(line);
        match self.rewrite(content) {
            Some(mut out) => {
                out.extend_from_slice(terminator);
                Cow::Owned(out)
            }
            None => Cow::Borrowed(line),
        }
    }

    /// Filter one chunk of a stream whose state is `state`.
    pub fn filter_chunk<'a>(&self, chunk: &'a Chunk, state: &mut LineState) -> Cow<'a, [u8]> {
        let (content, terminator) = split_terminator(&chunk.bytes);
        if chunk.starts_line {
            state.replaced = false;
            if self.rules.is_empty() {
                return Cow::Borrowed(&chunk.bytes);
            }
            return match self.rewrite(content) {
                Some(mut out) => {
                    state.replaced = terminator.is_empty();
                    out.extend_from_slice(terminator);
                    Cow::Owned(out)
                }
                None => Cow::Borrowed(&chunk.bytes),
            };
        }

        if state.replaced {
            if !terminator.is_empty() {
                state.replaced = false;
            }
            Cow::Borrowed(terminator)
        } else {
            Cow::Borrowed(&chunk.bytes)
        }
    }

    /// Filter everything `reader` produces into `writer` until end of stream.
    ///
    /// Returns the number of chunks read.
    pub async fn pump<R, W>(&self, reader: R, writer: &mut W) -> Result<u64>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = LineReader::new(reader);
        let mut state = LineState::default();
        let mut count = 0;
        while let Some(chunk) = lines.next_line().await? {
            let out = self.filter_chunk(&chunk, &mut state);
            if !out.is_empty() {
                writer.write_all(&out).await?;
                writer.flush().await?;
            }
            count += 1;
        }
        Ok(count)
    }
}

fn split_terminator(line: &[u8]) -> (&[u8], &[u8]) {
    let mut end = line.len();
    if end > 0 && line[end - 1] == b'\n' {
        end -= 1;
        if end > 0 && line[end - 1] == b'\r' {
            end -= 1;
        }
    }
    line.split_at(end)
}

/// Splits a byte stream into lines without unbounded buffering.
///
/// A chunk is returned once its `\n` arrives, once it reaches
/// [`MAX_LINE_BYTES`], or, with an idle flush set, once the stream has been
/// quiet for that long mid-line (prompts don't end in a newline). Each chunk
/// records whether it begins a line.
#[derive(Debug)]
pub struct LineReader<R> {
    inner: R,
    idle_flush: Option<Duration>,
    at_line_start: bool,
}

impl<R: AsyncBufRead + Unpin> LineReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            idle_flush: None,
            at_line_start: true,
        }
    }

    /// Forward a partial line after `idle` without new input.
    pub fn with_idle_flush(mut self, idle: Duration) -> Self {
        self.idle_flush = Some(idle);
        self
    }

    fn chunk(&mut self, bytes: Vec<u8>) -> Chunk {
        let starts_line = self.at_line_start;
        self.at_line_start = bytes.last() == Some(&b'\n');
        Chunk { bytes, starts_line }
    }

    /// Next chunk, or `None` at end of stream.
    pub async fn next_line(&mut self) -> io::Result<Option<Chunk>> {
        let mut line = Vec::new();
        loop {
            let available = match self.idle_flush {
                Some(idle) if !line.is_empty() => {
                    match tokio::time::timeout(idle, self.inner.fill_buf()).await {
                        Ok(res) => res?,
                        Err(_) => return Ok(Some(self.chunk(line))),
                    }
                }
                _ => self.inner.fill_buf().await?,
            };

            if available.is_empty() {
                return Ok(if line.is_empty() {
                    None
                } else {
                    Some(self.chunk(line))
                });
            }

            let room = MAX_LINE_BYTES - line.len();
            let window = &available[..available.len().min(room)];
            let (take, complete) = match window.iter().position(|&b| b == b'\n') {
                Some(i) => (i + 1, true),
                None => (window.len(), false),
            };
            line.extend_from_slice(&window[..take]);
            self.inner.consume(take);

            if complete || line.len() >= MAX_LINE_BYTES {
                return Ok(Some(self.chunk(line)));
            }
        }
    }
}
