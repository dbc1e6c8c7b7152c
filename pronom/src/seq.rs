// registry byte-sequence syntax.
//
// registry exports describe most patterns as hex byte sequences rather
// than regexes:
//
//     504B0304            four literal bytes
//     50??04              one wildcard byte
//     {4}  {2-8}  {2-*}   fixed, bounded, and open gaps
//     *                   an unbounded gap
//     [41:5A]             an inclusive byte range
//     (00|01|FF)          alternative byte strings
//
// `compile` renders such a sequence into byte-regex source text, which
// the catalog then compiles like any hand-written pattern. whitespace
// between elements is ignored.

use failure::Fail;
use nom::branch::alt;
use nom::bytes::complete::{tag, take_while_m_n};
use nom::character::complete::{char, digit1, multispace0};
use nom::combinator::{all_consuming, map, map_res, opt};
use nom::multi::{many1, separated_nonempty_list};
use nom::sequence::{delimited, preceded, terminated};
use nom::IResult;

#[derive(Debug, Fail)]
pub enum SeqError {
    #[fail(display = "invalid byte sequence: {}", _0)]
    Invalid(String),
    #[fail(display = "empty byte range: {:02x} > {:02x}", _0, _1)]
    EmptyRange(u8, u8),
}

#[derive(Debug, PartialEq)]
enum Elem {
    /// a literal byte value.
    Byte(u8),
    /// `??`: any single byte.
    Any,
    /// `{min}` / `{min-max}` / `{min-*}`: a run of arbitrary bytes.
    Gap { min: u32, max: Option<u32> },
    /// `*`: any number of arbitrary bytes.
    Unbounded,
    /// `[lo:hi]`: one byte within an inclusive range.
    Range(u8, u8),
    /// `(aa|bb..)`: one of several byte strings.
    Alt(Vec<Vec<u8>>),
}

fn is_hex_digit(c: char) -> bool {
    c.is_digit(16)
}

fn from_hex(input: &str) -> Result<u8, std::num::ParseIntError> {
    u8::from_str_radix(input, 16)
}

/// parse a single hex byte, like `AB`.
fn hex_byte(input: &str) -> IResult<&str, u8> {
    map_res(take_while_m_n(2, 2, is_hex_digit), from_hex)(input)
}

fn literal(input: &str) -> IResult<&str, Elem> {
    map(hex_byte, Elem::Byte)(input)
}

fn any_byte(input: &str) -> IResult<&str, Elem> {
    map(tag("??"), |_| Elem::Any)(input)
}

fn number(input: &str) -> IResult<&str, u32> {
    map_res(digit1, str::parse)(input)
}

/// `{4}`, `{2-8}`, `{2-*}`
fn gap(input: &str) -> IResult<&str, Elem> {
    let (input, _) = char('{')(input)?;
    let (input, min) = number(input)?;
    let (input, max) = opt(preceded(
        char('-'),
        alt((map(number, Some), map(char('*'), |_| None))),
    ))(input)?;
    let (input, _) = char('}')(input)?;

    // a lone `{4}` is an exact gap.
    let max = match max {
        None => Some(min),
        Some(max) => max,
    };

    Ok((input, Elem::Gap { min, max }))
}

fn unbounded(input: &str) -> IResult<&str, Elem> {
    map(char('*'), |_| Elem::Unbounded)(input)
}

/// `[41:5A]`
fn range(input: &str) -> IResult<&str, Elem> {
    let (input, _) = char('[')(input)?;
    let (input, lo) = hex_byte(input)?;
    let (input, _) = char(':')(input)?;
    let (input, hi) = hex_byte(input)?;
    let (input, _) = char(']')(input)?;
    Ok((input, Elem::Range(lo, hi)))
}

/// `(00|01|FF)`
fn alternatives(input: &str) -> IResult<&str, Elem> {
    map(
        delimited(
            char('('),
            separated_nonempty_list(char('|'), many1(hex_byte)),
            char(')'),
        ),
        Elem::Alt,
    )(input)
}

fn element(input: &str) -> IResult<&str, Elem> {
    preceded(
        multispace0,
        alt((any_byte, literal, gap, unbounded, range, alternatives)),
    )(input)
}

fn sequence(input: &str) -> IResult<&str, Vec<Elem>> {
    terminated(many1(element), multispace0)(input)
}

fn render(elem: &Elem, out: &mut String) -> Result<(), SeqError> {
    match elem {
        Elem::Byte(v) => out.push_str(&format!("\\x{:02x}", v)),
        Elem::Any => out.push('.'),
        Elem::Gap { min, max: Some(max) } if min == max => {
            out.push_str(&format!(".{{{}}}", min));
        }
        Elem::Gap { min, max: Some(max) } => {
            out.push_str(&format!(".{{{},{}}}", min, max));
        }
        Elem::Gap { min, max: None } => {
            out.push_str(&format!(".{{{},}}", min));
        }
        Elem::Unbounded => out.push_str(".*"),
        Elem::Range(lo, hi) => {
            if lo > hi {
                return Err(SeqError::EmptyRange(*lo, *hi));
            }
            out.push_str(&format!("[\\x{:02x}-\\x{:02x}]", lo, hi));
        }
        Elem::Alt(alts) => {
            let parts: Vec<String> = alts
                .iter()
                .map(|bytes| {
                    bytes
                        .iter()
                        .map(|v| format!("\\x{:02x}", v))
                        .collect::<Vec<String>>()
                        .join("")
                })
                .collect();
            out.push_str(&format!("(?:{})", parts.join("|")));
        }
    }
    Ok(())
}

/// Compile a registry byte sequence into byte-regex source text.
///
/// ```
/// use pronom::seq;
///
/// assert_eq!(seq::compile("504B0304").unwrap(), "\\x50\\x4b\\x03\\x04");
/// assert_eq!(seq::compile("50??04").unwrap(), "\\x50.\\x04");
/// assert_eq!(seq::compile("FF{2-8}D9").unwrap(), "\\xff.{2,8}\\xd9");
/// ```
pub fn compile(seq: &str) -> Result<String, SeqError> {
    let (_, elems) =
        all_consuming(sequence)(seq).map_err(|_| SeqError::Invalid(seq.to_string()))?;

    let mut out = String::with_capacity(seq.len() * 2);
    for elem in elems.iter() {
        render(elem, &mut out)?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use matches::matches;

    use super::*;

    #[test]
    fn test_literal_bytes() {
        assert_eq!(compile("504B0304").unwrap(), "\\x50\\x4b\\x03\\x04");
        assert_eq!(compile("1f 8b 08").unwrap(), "\\x1f\\x8b\\x08");
    }

    #[test]
    fn test_wildcard_byte() {
        assert_eq!(compile("AA??BB").unwrap(), "\\xaa.\\xbb");
    }

    #[test]
    fn test_gaps() {
        assert_eq!(compile("AA{4}BB").unwrap(), "\\xaa.{4}\\xbb");
        assert_eq!(compile("AA{2-8}BB").unwrap(), "\\xaa.{2,8}\\xbb");
        assert_eq!(compile("AA{2-*}BB").unwrap(), "\\xaa.{2,}\\xbb");
        assert_eq!(compile("AA*BB").unwrap(), "\\xaa.*\\xbb");
    }

    #[test]
    fn test_byte_range() {
        assert_eq!(compile("[41:5A]").unwrap(), "[\\x41-\\x5a]");
    }

    #[test]
    fn test_alternatives() {
        assert_eq!(compile("(00|01|FF)").unwrap(), "(?:\\x00|\\x01|\\xff)");
        assert_eq!(compile("(4949|4D4D)").unwrap(), "(?:\\x49\\x49|\\x4d\\x4d)");
    }

    #[test]
    fn test_compiled_sequence_round_trips_through_a_pattern() {
        use crate::{Anchor, Pattern, Sample};

        let source = compile("504B??04{2-4}AA").unwrap();
        let pat = Pattern::compile(Anchor::BOF, &source).unwrap();

        assert!(pat.test(&Sample::from_bytes(b"PK\x09\x04\x01\x02\xAAtrailing", 16)));
        assert!(!pat.test(&Sample::from_bytes(b"PK\x09\x04\x01\xAA", 16)));
    }

    #[test]
    fn test_odd_hex_length_rejected() {
        assert!(matches!(compile("504"), Err(SeqError::Invalid(_))));
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(matches!(compile("50ZZ"), Err(SeqError::Invalid(_))));
        assert!(matches!(compile(""), Err(SeqError::Invalid(_))));
        assert!(matches!(compile("{4"), Err(SeqError::Invalid(_))));
    }

    #[test]
    fn test_empty_range_rejected() {
        assert!(matches!(compile("[5A:41]"), Err(SeqError::EmptyRange(_, _))));
    }
}
