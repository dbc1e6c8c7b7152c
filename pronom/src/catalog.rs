// the compiled, immutable format catalog.
//
// a loader (e.g. the registry reader in the tool crate) produces plain
// `FormatDef` descriptions; `Catalog::load` compiles every pattern once,
// resolves priority references to dense indices, and validates that the
// priority relation is a DAG. after load the catalog is read-only and
// freely shareable across matcher invocations.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use failure::Fail;
use log::debug;

use crate::{Anchor, Format, Pattern, Signature};

/// Loader-facing description of one pattern: its anchor and regex source.
#[derive(Debug, Clone)]
pub struct PatternDef {
    pub anchor: Anchor,
    pub source: String,
}

/// Loader-facing description of one signature.
#[derive(Debug, Clone)]
pub struct SignatureDef {
    pub id: u64,
    pub name: String,
    pub patterns: Vec<PatternDef>,
}

/// Loader-facing description of one format. Priority references are PUIDs
/// of formats this one has priority over; they are resolved during load.
#[derive(Debug, Clone)]
pub struct FormatDef {
    pub id: u64,
    pub puid: String,
    pub name: String,
    pub signatures: Vec<SignatureDef>,
    pub priority_over: Vec<String>,
}

#[derive(Debug, Fail)]
pub enum CatalogError {
    #[fail(display = "{}: failed to compile pattern `{}`: {}", puid, source, cause)]
    PatternCompile {
        puid: String,
        source: String,
        cause: String,
    },
    #[fail(display = "duplicate format identifier: {}", _0)]
    DuplicateFormat(String),
    #[fail(display = "{}: unknown priority target: {}", _0, _1)]
    UnknownPriorityTarget(String, String),
    #[fail(display = "{}: signature with no patterns (or format with no signatures)", _0)]
    EmptySignature(String),
    #[fail(display = "priority cycle through format: {}", _0)]
    PriorityCycle(String),
}

/// The immutable catalog: formats in declared order, an index from PUID,
/// and the priority DAG resolved to dense indices.
#[derive(Debug)]
pub struct Catalog {
    formats: Vec<Format>,
    by_puid: HashMap<String, usize>,
    /// wall-clock cost of compiling every pattern, for the batch summary.
    pub compile_time: Duration,
}

impl Catalog {
    /// Compile the given format descriptions into a catalog.
    ///
    /// Errors:
    ///
    ///   - `PatternCompile` - a pattern source is not a legal byte regex.
    ///   - `DuplicateFormat` - two formats share a PUID.
    ///   - `UnknownPriorityTarget` - a priority reference names no format.
    ///   - `EmptySignature` - a format or signature with nothing to match.
    ///   - `PriorityCycle` - the priority relation is not a DAG.
    pub fn load(defs: Vec<FormatDef>) -> Result<Catalog, CatalogError> {
        let t0 = Instant::now();

        // pass one: assign dense indices so priority references can point
        // forward as well as backward.
        let mut by_puid: HashMap<String, usize> = HashMap::with_capacity(defs.len());
        for (index, def) in defs.iter().enumerate() {
            if by_puid.insert(def.puid.clone(), index).is_some() {
                return Err(CatalogError::DuplicateFormat(def.puid.clone()));
            }
        }

        // pass two: compile patterns and resolve priority references.
        let mut formats = Vec::with_capacity(defs.len());
        for (index, def) in defs.iter().enumerate() {
            let mut priority_over = Vec::with_capacity(def.priority_over.len());
            for target in def.priority_over.iter() {
                match by_puid.get(target) {
                    Some(&t) => priority_over.push(t),
                    None => {
                        return Err(CatalogError::UnknownPriorityTarget(
                            def.puid.clone(),
                            target.clone(),
                        ));
                    }
                }
            }

            if def.signatures.is_empty() {
                return Err(CatalogError::EmptySignature(def.puid.clone()));
            }

            let mut signatures = Vec::with_capacity(def.signatures.len());
            for sig in def.signatures.iter() {
                if sig.patterns.is_empty() {
                    return Err(CatalogError::EmptySignature(def.puid.clone()));
                }

                let mut patterns = Vec::with_capacity(sig.patterns.len());
                for pat in sig.patterns.iter() {
                    let pattern = Pattern::compile(pat.anchor, &pat.source).map_err(|e| {
                        CatalogError::PatternCompile {
                            puid: def.puid.clone(),
                            source: pat.source.clone(),
                            cause: e.to_string(),
                        }
                    })?;
                    patterns.push(pattern);
                }

                signatures.push(Signature {
                    id: sig.id,
                    name: sig.name.clone(),
                    patterns,
                });
            }

            formats.push(Format {
                id: def.id,
                puid: def.puid.clone(),
                name: def.name.clone(),
                signatures,
                index,
                priority_over,
            });
        }

        check_acyclic(&formats)?;

        let compile_time = t0.elapsed();
        debug!(
            "catalog: compiled {} formats in {}ms",
            formats.len(),
            compile_time.as_millis()
        );

        Ok(Catalog {
            formats,
            by_puid,
            compile_time,
        })
    }

    /// Formats in declared order. This is the matcher's iteration order.
    pub fn formats(&self) -> &[Format] {
        &self.formats
    }

    /// Look a format up by its public identifier.
    pub fn get(&self, puid: &str) -> Option<&Format> {
        self.by_puid.get(puid).map(|&index| &self.formats[index])
    }

    pub fn len(&self) -> usize {
        self.formats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.formats.is_empty()
    }
}

/// Reject catalogs whose priority relation contains a cycle.
fn check_acyclic(formats: &[Format]) -> Result<(), CatalogError> {
    const WHITE: u8 = 0;
    const GREY: u8 = 1;
    const BLACK: u8 = 2;

    fn visit(node: usize, formats: &[Format], marks: &mut [u8]) -> Result<(), usize> {
        marks[node] = GREY;
        for &next in formats[node].priority_over.iter() {
            match marks[next] {
                WHITE => visit(next, formats, marks)?,
                GREY => return Err(next),
                _ => {}
            }
        }
        marks[node] = BLACK;
        Ok(())
    }

    let mut marks = vec![WHITE; formats.len()];
    for node in 0..formats.len() {
        if marks[node] == WHITE {
            if let Err(offender) = visit(node, formats, &mut marks) {
                return Err(CatalogError::PriorityCycle(formats[offender].puid.clone()));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use matches::matches;

    use super::*;

    fn bof(source: &str) -> PatternDef {
        PatternDef {
            anchor: Anchor::BOF,
            source: source.to_string(),
        }
    }

    fn format_def(id: u64, puid: &str, source: &str, priority_over: &[&str]) -> FormatDef {
        FormatDef {
            id,
            puid: puid.to_string(),
            name: format!("format {}", puid),
            signatures: vec![SignatureDef {
                id: id * 10,
                name: format!("sig {}", puid),
                patterns: vec![bof(source)],
            }],
            priority_over: priority_over.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_load_preserves_declared_order() {
        let catalog = Catalog::load(vec![
            format_def(1, "fmt/1", "AA", &[]),
            format_def(2, "fmt/2", "BB", &[]),
            format_def(3, "fmt/3", "CC", &[]),
        ])
        .unwrap();

        let puids: Vec<&str> = catalog.formats().iter().map(|f| f.puid.as_str()).collect();
        assert_eq!(puids, vec!["fmt/1", "fmt/2", "fmt/3"]);
        assert_eq!(catalog.len(), 3);
    }

    #[test]
    fn test_lookup_by_puid() {
        let catalog = Catalog::load(vec![
            format_def(1, "fmt/1", "AA", &[]),
            format_def(2, "x-fmt/263", "PK", &[]),
        ])
        .unwrap();

        assert_eq!(catalog.get("x-fmt/263").unwrap().id, 2);
        assert!(catalog.get("fmt/999").is_none());
    }

    #[test]
    fn test_priority_resolves_forward_references() {
        // fmt/1 beats fmt/2, which is declared later.
        let catalog = Catalog::load(vec![
            format_def(1, "fmt/1", "AA", &["fmt/2"]),
            format_def(2, "fmt/2", "AA", &[]),
        ])
        .unwrap();

        let a = catalog.get("fmt/1").unwrap();
        let b = catalog.get("fmt/2").unwrap();
        assert!(a.dominates(b));
        assert!(!b.dominates(a));
    }

    #[test]
    fn test_duplicate_puid_rejected() {
        let err = Catalog::load(vec![
            format_def(1, "fmt/1", "AA", &[]),
            format_def(2, "fmt/1", "BB", &[]),
        ])
        .unwrap_err();

        assert!(matches!(err, CatalogError::DuplicateFormat(_)));
    }

    #[test]
    fn test_unknown_priority_target_rejected() {
        let err = Catalog::load(vec![format_def(1, "fmt/1", "AA", &["fmt/404"])]).unwrap_err();

        assert!(matches!(err, CatalogError::UnknownPriorityTarget(_, _)));
    }

    #[test]
    fn test_bad_pattern_rejected() {
        let err = Catalog::load(vec![format_def(1, "fmt/1", "(unbalanced", &[])]).unwrap_err();

        assert!(matches!(err, CatalogError::PatternCompile { .. }));
    }

    #[test]
    fn test_empty_signature_rejected() {
        let mut def = format_def(1, "fmt/1", "AA", &[]);
        def.signatures[0].patterns.clear();
        let err = Catalog::load(vec![def]).unwrap_err();
        assert!(matches!(err, CatalogError::EmptySignature(_)));

        let mut def = format_def(1, "fmt/1", "AA", &[]);
        def.signatures.clear();
        let err = Catalog::load(vec![def]).unwrap_err();
        assert!(matches!(err, CatalogError::EmptySignature(_)));
    }

    #[test]
    fn test_priority_cycle_rejected() {
        let err = Catalog::load(vec![
            format_def(1, "fmt/1", "AA", &["fmt/2"]),
            format_def(2, "fmt/2", "AA", &["fmt/3"]),
            format_def(3, "fmt/3", "AA", &["fmt/1"]),
        ])
        .unwrap_err();

        assert!(matches!(err, CatalogError::PriorityCycle(_)));
    }

    #[test]
    fn test_self_priority_rejected() {
        let err = Catalog::load(vec![format_def(1, "fmt/1", "AA", &["fmt/1"])]).unwrap_err();

        assert!(matches!(err, CatalogError::PriorityCycle(_)));
    }

    #[test]
    fn test_priority_diamond_is_legal() {
        // a beats b and c; b and c both beat d. a DAG, not a cycle.
        let catalog = Catalog::load(vec![
            format_def(1, "fmt/a", "AA", &["fmt/b", "fmt/c"]),
            format_def(2, "fmt/b", "AA", &["fmt/d"]),
            format_def(3, "fmt/c", "AA", &["fmt/d"]),
            format_def(4, "fmt/d", "AA", &[]),
        ])
        .unwrap();

        assert_eq!(catalog.len(), 4);
    }
}
