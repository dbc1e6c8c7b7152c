// PRONOM-style signature matching.
//
// a format registry assigns each file format one or more *signatures*.
// a signature is a conjunction of byte *patterns*, each anchored to a
// position in the object:
//
//     x-fmt/263 (ZIP Format)
//       signature "PKZIP"
//         BOF  \x50\x4B\x03\x04
//
//     fmt/412 (Word for Windows 2007 onwards)
//       signature "OOXML word"
//         BOF      \x50\x4B\x03\x04
//         Variable \x77\x6F\x72\x64\x2F
//       has priority over: x-fmt/263
//
// an object is identified by sampling a buffer from each end of it and
// evaluating every format in the catalog against the sample. formats that
// declare priority over another matching format win; the rest are dropped.
//
// patterns operate on raw bytes, never decoded text. the compiled form is
// a `regex::bytes::Regex` with unicode disabled, so `\x00`..`\xff`
// literals match single byte values.

use regex::bytes::Regex;
use strum_macros::Display;

pub mod catalog;
pub mod matcher;
pub mod sample;
pub mod seq;

pub use crate::catalog::{Catalog, CatalogError, FormatDef, PatternDef, SignatureDef};
pub use crate::matcher::{Match, MatchTimings, Matcher, Outcome, Timings};
pub use crate::sample::{Sample, SampleError, Sampler, DEFAULT_BUFSIZE};

/// Where a pattern is tested: at the start of the head buffer, within the
/// tail buffer, or anywhere in the head buffer.
#[derive(Display, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anchor {
    BOF,
    EOF,
    Variable,
}

/// One compiled byte regex, tested at its anchor position.
///
/// Built once by the catalog loader; immutable afterwards. The original
/// source text is retained for diagnostics.
#[derive(Debug, Clone)]
pub struct Pattern {
    pub anchor: Anchor,
    pub source: String,
    re: Regex,
}

impl Pattern {
    /// Compile the given byte-regex source at the given anchor.
    ///
    /// The dialect: `.` matches any byte including newline, `^`/`$` are
    /// line anchors, and unicode is disabled so escapes like `\x89` match
    /// single raw bytes. BOF patterns are additionally pinned to offset
    /// zero of the buffer they test.
    ///
    /// ```
    /// use pronom::{Anchor, Pattern, Sample};
    ///
    /// let pat = Pattern::compile(Anchor::BOF, "\\x89PNG").unwrap();
    /// assert!(pat.test(&Sample::from_bytes(b"\x89PNG\r\n\x1a\n", 16)));
    /// assert!(!pat.test(&Sample::from_bytes(b"not a png", 16)));
    /// ```
    pub fn compile(anchor: Anchor, source: &str) -> Result<Pattern, regex::Error> {
        let pattern = match anchor {
            // the match must begin at offset zero of the buffer.
            Anchor::BOF => format!("(?ms-u)\\A(?:{})", source),
            // EOF and Variable sources place themselves within the buffer
            // (an EOF source pins its distance from the end, typically
            // with `$`).
            Anchor::EOF | Anchor::Variable => format!("(?ms-u)(?:{})", source),
        };

        let re = Regex::new(&pattern)?;

        Ok(Pattern {
            anchor,
            source: source.to_string(),
            re,
        })
    }

    /// Does this pattern match the given sample?
    ///
    /// BOF patterns must match starting at offset zero of the head buffer.
    /// EOF patterns search the tail buffer. Variable patterns search the
    /// head buffer, and never see the tail buffer.
    pub fn test(&self, sample: &Sample) -> bool {
        match self.anchor {
            Anchor::BOF | Anchor::Variable => self.re.is_match(sample.head()),
            Anchor::EOF => self.re.is_match(sample.tail()),
        }
    }
}

/// A conjunction of patterns that together identify one way a format can
/// appear on disk.
#[derive(Debug, Clone)]
pub struct Signature {
    /// registry-assigned numeric key.
    pub id: u64,
    pub name: String,
    /// order is not significant for matching, but preserved for
    /// diagnostics.
    pub patterns: Vec<Pattern>,
}

impl Signature {
    /// Test each pattern in order, short-circuiting on the first failure.
    ///
    /// Pure and deterministic: safe to invoke from multiple threads on
    /// disjoint samples.
    pub fn matches(&self, sample: &Sample) -> bool {
        self.patterns.iter().all(|pat| pat.test(sample))
    }
}

impl std::fmt::Display for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{} [{}]", self.id, self.name)
    }
}

/// A named file format: one or more signatures, plus the set of formats
/// this one has declared priority over.
#[derive(Debug, Clone)]
pub struct Format {
    /// registry-assigned numeric key.
    pub id: u64,
    /// public identifier, like `x-fmt/263`.
    pub puid: String,
    pub name: String,
    pub signatures: Vec<Signature>,

    /// this format's dense index in catalog order.
    pub(crate) index: usize,
    /// dense indices of the formats this one beats. resolved from PUID
    /// references at catalog load.
    pub(crate) priority_over: Vec<usize>,
}

impl Format {
    /// Return the first signature that matches, if any.
    ///
    /// A format yields at most one match per object; further matching
    /// signatures of the same format are not reported.
    pub fn test(&self, sample: &Sample) -> Option<&Signature> {
        self.signatures.iter().find(|sig| sig.matches(sample))
    }

    /// Does this format have declared priority over the other?
    pub fn dominates(&self, other: &Format) -> bool {
        self.priority_over.contains(&other.index)
    }
}

impl std::fmt::Display for Format {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{} [{}]", self.puid, self.name)
    }
}
