// the match algorithm.
//
// every format in the catalog is evaluated, in catalog order, against one
// sample. raw hits are then reduced by the priority relation: a format
// that some other matching format has declared priority over is dropped.
//
// pruning happens in two passes. while collecting, a format already
// beaten by something in the result set is skipped without evaluating its
// patterns; this kills most of the needless matching. a second sweep then
// drops victims whose dominator matched later in catalog order. the sweep
// is quadratic in the result size, which has been observed at seven
// matches, a couple of fours, and almost always zero or one.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use log::warn;

use crate::catalog::Catalog;
use crate::sample::Sample;
use crate::{Format, Signature};

/// A pattern evaluation slower than this is logged as a slow signature.
const SLOW_PATTERN: Duration = Duration::from_millis(50);

/// One preferred match: a format together with the signature that hit.
#[derive(Debug, Clone, Copy)]
pub struct Match<'a> {
    pub format: &'a Format,
    pub signature: &'a Signature,
}

/// Cumulative wall-clock cost keyed by format or signature id.
#[derive(Debug, Clone)]
pub struct Timings {
    pub label: String,
    pub entries: HashMap<u64, Duration>,
}

impl Timings {
    pub fn new(label: &str) -> Timings {
        Timings {
            label: label.to_string(),
            entries: HashMap::new(),
        }
    }

    fn add(&mut self, id: u64, cost: Duration) {
        *self.entries.entry(id).or_default() += cost;
    }

    /// Fold another accumulator (a per-object delta) into this one.
    pub fn merge(&mut self, delta: &Timings) {
        for (&id, &cost) in delta.entries.iter() {
            self.add(id, cost);
        }
    }

    /// The `n` most expensive entries, most expensive first. Ties break
    /// on id so the report is stable.
    pub fn top(&self, n: usize) -> Vec<(u64, Duration)> {
        let mut entries: Vec<(u64, Duration)> =
            self.entries.iter().map(|(&id, &cost)| (id, cost)).collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        entries.truncate(n);
        entries
    }
}

/// Per-invocation instrumentation delta: format and signature costs.
///
/// The driver merges deltas into its global tables between objects, so
/// the hot path never touches shared state.
#[derive(Debug, Clone)]
pub struct MatchTimings {
    pub formats: Timings,
    pub signatures: Timings,
}

impl MatchTimings {
    pub fn new() -> MatchTimings {
        MatchTimings {
            formats: Timings::new("Format"),
            signatures: Timings::new("Sig"),
        }
    }

    pub fn merge(&mut self, delta: &MatchTimings) {
        self.formats.merge(&delta.formats);
        self.signatures.merge(&delta.signatures);
    }
}

impl Default for MatchTimings {
    fn default() -> MatchTimings {
        MatchTimings::new()
    }
}

/// What one match invocation produced: the preferred matches, and the
/// timing delta when instrumentation is enabled.
pub struct Outcome<'a> {
    pub matches: Vec<Match<'a>>,
    pub timings: Option<MatchTimings>,
}

/// Evaluates the catalog against samples.
///
/// Holds only a shared reference to the catalog: matchers are cheap, and
/// any number may run concurrently on disjoint samples.
pub struct Matcher<'a> {
    catalog: &'a Catalog,
    timing: bool,
}

impl<'a> Matcher<'a> {
    pub fn new(catalog: &'a Catalog) -> Matcher<'a> {
        Matcher {
            catalog,
            timing: false,
        }
    }

    /// Like `new`, but record per-format and per-signature wall-clock
    /// cost. Results are identical either way.
    pub fn with_timing(catalog: &'a Catalog) -> Matcher<'a> {
        Matcher {
            catalog,
            timing: true,
        }
    }

    /// Match the sample against every format and return the preferred
    /// matches, in catalog order.
    ///
    /// Deterministic: for a fixed catalog and sample the result depends
    /// only on catalog order and the priority relation.
    pub fn match_sample(&self, sample: &Sample) -> Outcome<'a> {
        let mut timings = if self.timing {
            Some(MatchTimings::new())
        } else {
            None
        };

        let mut matches: Vec<Match<'a>> = vec![];

        for format in self.catalog.formats().iter() {
            // a format already beaten by something in the result set
            // never needs its patterns evaluated.
            if dominated(format, &matches) {
                continue;
            }

            let t0 = if self.timing {
                Some(Instant::now())
            } else {
                None
            };

            if let Some(signature) = self.test_format(format, sample, timings.as_mut()) {
                matches.push(Match { format, signature });
            }

            if let (Some(timings), Some(t0)) = (timings.as_mut(), t0) {
                timings.formats.add(format.id, t0.elapsed());
            }
        }

        // a dominator may have matched after its victim; sweep those out.
        let preferred: Vec<Match<'a>> = matches
            .iter()
            .filter(|m| !dominated(m.format, &matches))
            .copied()
            .collect();

        Outcome {
            matches: preferred,
            timings,
        }
    }

    /// First matching signature of the format, if any.
    fn test_format(
        &self,
        format: &'a Format,
        sample: &Sample,
        mut timings: Option<&mut MatchTimings>,
    ) -> Option<&'a Signature> {
        for signature in format.signatures.iter() {
            let t0 = if self.timing {
                Some(Instant::now())
            } else {
                None
            };

            let hit = self.test_signature(signature, sample);

            if let (Some(timings), Some(t0)) = (timings.as_mut(), t0) {
                timings.signatures.add(signature.id, t0.elapsed());
            }

            if hit {
                // one match per format is enough.
                return Some(signature);
            }
        }
        None
    }

    fn test_signature(&self, signature: &Signature, sample: &Sample) -> bool {
        if !self.timing {
            return signature.matches(sample);
        }

        for pattern in signature.patterns.iter() {
            let t0 = Instant::now();
            let hit = pattern.test(sample);
            let cost = t0.elapsed();

            if cost > SLOW_PATTERN {
                warn!(
                    "slow signature: {} pattern `{}` took {}ms",
                    signature, pattern.source, cost.as_millis()
                );
            }

            if !hit {
                return false;
            }
        }
        true
    }
}

/// Is `format` dominated by some *other* member of the candidate set?
fn dominated(format: &Format, candidates: &[Match]) -> bool {
    candidates
        .iter()
        .filter(|m| m.format.index != format.index)
        .any(|m| m.format.dominates(format))
}
