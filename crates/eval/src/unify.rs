//! Structural unification over s-expressions.
//!
//! PLN statements are checked by unifying them against a fixed statement
//! template. [`StructuralUnifier`] is the built-in oracle: it parses both
//! sides, keeps their variables apart, and runs Robinson unification with
//! an occurs check.

use std::collections::HashMap;
use std::fmt;

/// The template every PLN statement or query must match: a named proof of
/// a statement carrying a truth value.
pub const STATEMENT_PATTERN: &str = "(: $prf (WithTV $stmt (STV $s $c)))";

/// Deepest list nesting the parser accepts.
pub const MAX_DEPTH: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OracleError {
    #[error("parse error at byte {offset}: {message}")]
    Parse { offset: usize, message: String },
}

/// Decides whether an expression matches a pattern.
pub trait UnificationOracle: Send + Sync {
    /// `Ok(true)` when `expr` and `pattern` unify. Malformed input is an
    /// error, not a mismatch.
    fn unify(&self, expr: &str, pattern: &str) -> Result<bool, OracleError>;
}

// ──────────────────────────────────────────────
// S-expressions
// ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SExpr {
    Atom(String),
    /// `$name`. The side tag separates the variables of the two unified terms.
    Var(String, u8),
    List(Vec<SExpr>),
}

impl fmt::Display for SExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SExpr::Atom(a) => f.write_str(a),
            SExpr::Var(v, _) => write!(f, "${}", v),
            SExpr::List(items) => {
                f.write_str("(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str(")")
            }
        }
    }
}

/// Parse exactly one s-expression. Trailing input is an error.
pub fn parse(input: &str) -> Result<SExpr, OracleError> {
    parse_side(input, 0)
}

fn parse_side(input: &str, side: u8) -> Result<SExpr, OracleError> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(OracleError::Parse {
            offset: 0,
            message: "empty expression".to_string(),
        });
    }
    let mut pos = 0;
    let expr = parse_expr(&tokens, &mut pos, side, 0)?;
    if let Some(extra) = tokens.get(pos) {
        return Err(OracleError::Parse {
            offset: extra.offset,
            message: format!("unexpected trailing '{}'", extra.text),
        });
    }
    Ok(expr)
}

struct Token<'a> {
    text: &'a str,
    offset: usize,
}

fn tokenize(input: &str) -> Result<Vec<Token<'_>>, OracleError> {
    let mut tokens = Vec::new();
    let bytes = input.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        if c.is_ascii_whitespace() {
            i += 1;
        } else if c == b'(' || c == b')' {
            tokens.push(Token {
                text: &input[i..i + 1],
                offset: i,
            });
            i += 1;
        } else if c == b'"' {
            let start = i;
            i += 1;
            while i < bytes.len() && bytes[i] != b'"' {
                i += 1;
            }
            if i >= bytes.len() {
                return Err(OracleError::Parse {
                    offset: start,
                    message: "unterminated string".to_string(),
                });
            }
            i += 1;
            tokens.push(Token {
                text: &input[start..i],
                offset: start,
            });
        } else {
            let start = i;
            while i < bytes.len()
                && !bytes[i].is_ascii_whitespace()
                && bytes[i] != b'('
                && bytes[i] != b')'
            {
                i += 1;
            }
            tokens.push(Token {
                text: &input[start..i],
                offset: start,
            });
        }
    }
    Ok(tokens)
}

fn parse_expr(
    tokens: &[Token<'_>],
    pos: &mut usize,
    side: u8,
    depth: usize,
) -> Result<SExpr, OracleError> {
    let token = tokens.get(*pos).ok_or_else(|| OracleError::Parse {
        offset: tokens.last().map(|t| t.offset + t.text.len()).unwrap_or(0),
        message: "unexpected end of input".to_string(),
    })?;
    *pos += 1;
    match token.text {
        "(" if depth >= MAX_DEPTH => Err(OracleError::Parse {
            offset: token.offset,
            message: format!("nesting deeper than {}", MAX_DEPTH),
        }),
        "(" => {
            let mut items = Vec::new();
            loop {
                match tokens.get(*pos) {
                    Some(t) if t.text == ")" => {
                        *pos += 1;
                        return Ok(SExpr::List(items));
                    }
                    Some(_) => items.push(parse_expr(tokens, pos, side, depth + 1)?),
                    None => {
                        return Err(OracleError::Parse {
                            offset: token.offset,
                            message: "unclosed '('".to_string(),
                        })
                    }
                }
            }
        }
        ")" => Err(OracleError::Parse {
            offset: token.offset,
            message: "unexpected ')'".to_string(),
        }),
        text => match text.strip_prefix('$') {
            Some(name) if !name.is_empty() => Ok(SExpr::Var(name.to_string(), side)),
            _ => Ok(SExpr::Atom(text.to_string())),
        },
    }
}

// ──────────────────────────────────────────────
// Unification
// ──────────────────────────────────────────────

type VarKey = (String, u8);
type Bindings = HashMap<VarKey, SExpr>;

fn resolve<'a>(term: &'a SExpr, bindings: &'a Bindings) -> &'a SExpr {
    let mut current = term;
    while let SExpr::Var(name, side) = current {
        match bindings.get(&(name.clone(), *side)) {
            Some(bound) => current = bound,
            None => break,
        }
    }
    current
}

fn occurs(name: &str, side: u8, term: &SExpr, bindings: &Bindings) -> bool {
    match resolve(term, bindings) {
        SExpr::Var(n, s) => n == name && *s == side,
        SExpr::Atom(_) => false,
        SExpr::List(items) => items.iter().any(|t| occurs(name, side, t, bindings)),
    }
}

fn unify_terms(a: &SExpr, b: &SExpr, bindings: &mut Bindings) -> bool {
    let a = resolve(a, bindings).clone();
    let b = resolve(b, bindings).clone();
    match (&a, &b) {
        (SExpr::Var(n1, s1), SExpr::Var(n2, s2)) if n1 == n2 && s1 == s2 => true,
        (SExpr::Var(n, s), other) | (other, SExpr::Var(n, s)) => {
            if occurs(n, *s, other, bindings) {
                return false;
            }
            bindings.insert((n.clone(), *s), other.clone());
            true
        }
        (SExpr::Atom(x), SExpr::Atom(y)) => x == y,
        (SExpr::List(xs), SExpr::List(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .zip(ys.iter())
                    .all(|(x, y)| unify_terms(x, y, bindings))
        }
        _ => false,
    }
}

/// Built-in unification oracle.
#[derive(Debug, Clone, Copy, Default)]
pub struct StructuralUnifier;

impl UnificationOracle for StructuralUnifier {
    fn unify(&self, expr: &str, pattern: &str) -> Result<bool, OracleError> {
        let left = parse_side(expr, 0)?;
        let right = parse_side(pattern, 1)?;
        let mut bindings = Bindings::new();
        Ok(unify_terms(&left, &right, &mut bindings))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matches(expr: &str) -> bool {
        StructuralUnifier.unify(expr, STATEMENT_PATTERN).unwrap()
    }

    #[test]
    fn statement_matches_template() {
        assert!(matches("(: $prf (WithTV (Dog max) (STV 1.0 1.0)))"));
        assert!(matches("(: fact1 (WithTV (Implication (Dog $x) (Animal $x)) (STV 0.9 0.8)))"));
    }

    #[test]
    fn query_with_open_truth_value_matches() {
        assert!(matches("(: $query (WithTV (Predicate object) $tv))"));
    }

    #[test]
    fn wrong_shape_does_not_match() {
        assert!(!matches("(Dog max)"));
        assert!(!matches("(: p (Dog max) (STV 1.0 1.0))"));
        assert!(!matches("(: p (WithTV (Dog max) (TV 1.0 1.0)))"));
    }

    #[test]
    fn sides_do_not_share_variables() {
        // `$stmt` on the left is not the pattern's `$stmt`; if it were, the
        // occurs check would reject the binding.
        assert!(matches("(: x (WithTV (Dog $stmt) (STV 1.0 1.0)))"));
    }

    #[test]
    fn occurs_check_rejects_cycles() {
        assert!(!StructuralUnifier.unify("($x $x)", "($y (f $y))").unwrap());
    }

    #[test]
    fn malformed_input_is_error() {
        assert!(StructuralUnifier.unify("(: a", STATEMENT_PATTERN).is_err());
        assert!(StructuralUnifier.unify("(: a))", STATEMENT_PATTERN).is_err());
        assert!(StructuralUnifier.unify("", STATEMENT_PATTERN).is_err());
    }

    #[test]
    fn runaway_nesting_is_error() {
        let deep = format!("{}{}", "(".repeat(50_000), ")".repeat(50_000));
        let err = parse(&deep).unwrap_err();
        assert!(matches!(err, OracleError::Parse { offset, .. } if offset == MAX_DEPTH));

        let ok = format!("{}a{}", "(".repeat(MAX_DEPTH), ")".repeat(MAX_DEPTH));
        assert!(parse(&ok).is_ok());
    }

    #[test]
    fn display_round_trips_structure() {
        let e = parse("(: $p (WithTV  (Dog max)   (STV 1.0 1.0)))").unwrap();
        assert_eq!(e.to_string(), "(: $p (WithTV (Dog max) (STV 1.0 1.0)))");
    }
}
