// registry export loading.
//
// the engine consumes plain `FormatDef` descriptions; this module
// produces them from a JSON export of the registry. each pattern carries
// an anchor string and either regex `source` text or a hex `sequence`
// (compiled through `pronom::seq`). a small catalog of common formats is
// embedded in the binary for use when no export is given.

use std::fs;
use std::path::Path;

use failure::{Error, Fail};
use log::debug;
use serde::Deserialize;

use pronom::{seq, Anchor, FormatDef, PatternDef, SignatureDef};

#[derive(Debug, Fail)]
pub enum RegistryError {
    #[fail(display = "{}: bad anchor: {}", _0, _1)]
    BadAnchor(String, String),
    #[fail(display = "{}: pattern carries neither `source` nor `sequence`", _0)]
    MissingPattern(String),
}

#[derive(Debug, Deserialize)]
struct RegistryDoc {
    formats: Vec<RegistryFormat>,
}

#[derive(Debug, Deserialize)]
struct RegistryFormat {
    id: u64,
    puid: String,
    name: String,
    #[serde(default)]
    priority_over: Vec<String>,
    signatures: Vec<RegistrySignature>,
}

#[derive(Debug, Deserialize)]
struct RegistrySignature {
    id: u64,
    name: String,
    patterns: Vec<RegistryPattern>,
}

#[derive(Debug, Deserialize)]
struct RegistryPattern {
    anchor: String,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    sequence: Option<String>,
}

/// The registry writes anchors as position-type strings; reduce them to
/// the engine's three anchors. An unknown string is a loader bug, not a
/// match-time concern.
fn parse_anchor(puid: &str, anchor: &str) -> Result<Anchor, RegistryError> {
    match anchor {
        "BOF" | "Absolute from BOF" => Ok(Anchor::BOF),
        "EOF" | "Absolute from EOF" => Ok(Anchor::EOF),
        "Variable" => Ok(Anchor::Variable),
        other => Err(RegistryError::BadAnchor(
            puid.to_string(),
            other.to_string(),
        )),
    }
}

fn convert(doc: RegistryDoc) -> Result<Vec<FormatDef>, Error> {
    let mut defs = Vec::with_capacity(doc.formats.len());

    for format in doc.formats.into_iter() {
        let mut signatures = Vec::with_capacity(format.signatures.len());

        for sig in format.signatures.into_iter() {
            let mut patterns = Vec::with_capacity(sig.patterns.len());

            for pat in sig.patterns.into_iter() {
                let anchor = parse_anchor(&format.puid, &pat.anchor)?;
                let source = match (pat.source, pat.sequence) {
                    (Some(source), _) => source,
                    (None, Some(sequence)) => seq::compile(&sequence)?,
                    (None, None) => {
                        return Err(RegistryError::MissingPattern(format.puid.clone()).into());
                    }
                };

                patterns.push(PatternDef { anchor, source });
            }

            signatures.push(SignatureDef {
                id: sig.id,
                name: sig.name,
                patterns,
            });
        }

        defs.push(FormatDef {
            id: format.id,
            puid: format.puid,
            name: format.name,
            signatures,
            priority_over: format.priority_over,
        });
    }

    Ok(defs)
}

/// Parse a JSON registry export.
pub fn from_json(text: &str) -> Result<Vec<FormatDef>, Error> {
    let doc: RegistryDoc = serde_json::from_str(text)?;
    convert(doc)
}

/// Load a JSON registry export from disk.
pub fn from_file(path: &Path) -> Result<Vec<FormatDef>, Error> {
    debug!("registry: loading {}", path.display());
    let text = fs::read_to_string(path)?;
    from_json(&text)
}

/// The embedded default catalog: common image, document, archive, and
/// executable formats.
pub fn builtin() -> Vec<FormatDef> {
    from_json(include_str!("../data/formats.json")).expect("embedded catalog is valid")
}

#[cfg(test)]
mod tests {
    use matches::matches;

    use super::*;

    #[test]
    fn test_minimal_export() {
        let defs = from_json(
            r#"{
                "formats": [
                    {
                        "id": 665,
                        "puid": "x-fmt/263",
                        "name": "ZIP Format",
                        "signatures": [
                            {
                                "id": 418,
                                "name": "PKZIP",
                                "patterns": [{"anchor": "BOF", "sequence": "504B0304"}]
                            }
                        ]
                    }
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].puid, "x-fmt/263");
        assert_eq!(defs[0].priority_over.len(), 0);
        assert_eq!(defs[0].signatures[0].patterns[0].source, "\\x50\\x4b\\x03\\x04");
        assert_eq!(defs[0].signatures[0].patterns[0].anchor, Anchor::BOF);
    }

    #[test]
    fn test_registry_anchor_spellings() {
        assert_eq!(parse_anchor("fmt/1", "Absolute from BOF").unwrap(), Anchor::BOF);
        assert_eq!(parse_anchor("fmt/1", "Absolute from EOF").unwrap(), Anchor::EOF);
        assert_eq!(parse_anchor("fmt/1", "Variable").unwrap(), Anchor::Variable);
    }

    #[test]
    fn test_bad_anchor_rejected() {
        let err = parse_anchor("fmt/1", "Relative to centre").unwrap_err();
        assert!(matches!(err, RegistryError::BadAnchor(_, _)));
    }

    #[test]
    fn test_pattern_without_body_rejected() {
        let result = from_json(
            r#"{
                "formats": [
                    {
                        "id": 1,
                        "puid": "fmt/1",
                        "name": "broken",
                        "signatures": [
                            {"id": 10, "name": "sig", "patterns": [{"anchor": "BOF"}]}
                        ]
                    }
                ]
            }"#,
        );

        assert!(result.is_err());
    }

    #[test]
    fn test_builtin_catalog_compiles() {
        let catalog = pronom::Catalog::load(builtin()).unwrap();
        assert!(catalog.len() >= 10);

        // the zip container and its specialisations are wired up.
        let zip = catalog.get("x-fmt/263").unwrap();
        let docx = catalog.get("fmt/412").unwrap();
        assert!(docx.dominates(zip));
    }
}
