//! PLN statement repair and scoring.
//!
//! A generated PLN line is first repaired for parenthesis balance, then
//! checked against the statement template by a unification oracle. The
//! line's score is the lower of the two.

use tracing::debug;

use crate::policy::LineAggregation;
use crate::unify::{UnificationOracle, STATEMENT_PATTERN};

/// Repair parenthesis balance at the end of `expr`.
///
/// - A leading `:` gets a `(` prepended and costs 0.5.
/// - Missing closing parentheses are appended; extra trailing ones are
///   stripped. Either repair costs 0.5 (floored at 0).
/// - If the excess closes are not all at the very end, the line cannot be
///   repaired safely: the original line is returned with score 0.
pub fn balance_parentheses(expr: &str) -> (String, f64) {
    let mut score: f64 = 1.0;
    let mut line = expr.to_string();
    if line.starts_with(':') {
        line.insert(0, '(');
        score = 0.5;
    }

    let opens = line.matches('(').count();
    let closes = line.matches(')').count();

    if opens > closes {
        line.push_str(&")".repeat(opens - closes));
        return (line, (score - 0.5).max(0.0));
    }
    if closes > opens {
        let excess = closes - opens;
        if !line.chars().rev().take(excess).all(|c| c == ')') {
            return (line, 0.0);
        }
        let cut = line.len() - excess;
        line.truncate(cut);
        return (line, (score - 0.5).max(0.0));
    }
    (line, score)
}

/// 1.0 when `expr` unifies with the statement template, else 0.0.
/// Oracle errors score 0.0.
pub fn check_statement(oracle: &dyn UnificationOracle, expr: &str) -> f64 {
    match oracle.unify(expr, STATEMENT_PATTERN) {
        Ok(true) => 1.0,
        Ok(false) => 0.0,
        Err(e) => {
            debug!(error = %e, line = expr, "statement check failed to parse");
            0.0
        }
    }
}

/// Balance-repaired line, discarding the score.
pub fn clean_pln(expr: &str) -> String {
    balance_parentheses(expr).0
}

/// Repair one line and score it: `min(balance, validity)`.
pub fn clean_and_score(oracle: &dyn UnificationOracle, expr: &str) -> (String, f64) {
    let (line, balance) = balance_parentheses(expr);
    let validity = check_statement(oracle, &line);
    (line, balance.min(validity))
}

/// Repair every non-blank line of a list field and fold the line scores.
///
/// Blank lines are dropped. No remaining lines scores 1.0.
pub fn clean_pln_list<S: AsRef<str>>(
    oracle: &dyn UnificationOracle,
    lines: &[S],
    aggregation: LineAggregation,
) -> (Vec<String>, f64) {
    let mut cleaned = Vec::new();
    let mut scores = Vec::new();
    for line in lines {
        let line = line.as_ref().trim();
        if line.is_empty() {
            continue;
        }
        let (repaired, score) = clean_and_score(oracle, line);
        cleaned.push(repaired);
        scores.push(score);
    }
    (cleaned, aggregation.aggregate(&scores))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unify::{OracleError, StructuralUnifier};

    struct FailingOracle;

    impl UnificationOracle for FailingOracle {
        fn unify(&self, _expr: &str, _pattern: &str) -> Result<bool, OracleError> {
            Err(OracleError::Parse {
                offset: 0,
                message: "unavailable".to_string(),
            })
        }
    }

    #[test]
    fn appends_missing_closes() {
        let (line, score) = balance_parentheses("(: $prf (WithTV (Dog max)");
        assert_eq!(line, "(: $prf (WithTV (Dog max)))");
        assert_eq!(score, 0.5);
    }

    #[test]
    fn strips_trailing_excess_closes() {
        let (line, score) = balance_parentheses("(: a)))");
        assert_eq!(line, "(: a)");
        assert_eq!(score, 0.5);
    }

    #[test]
    fn rejects_excess_not_at_end() {
        let (line, score) = balance_parentheses("(: a)) b)");
        assert_eq!(line, "(: a)) b)");
        assert_eq!(score, 0.0);
    }

    #[test]
    fn colon_prefix_costs_half() {
        let (line, score) = balance_parentheses(": p (WithTV (Dog max) (STV 1.0 1.0)))");
        assert_eq!(line, "(: p (WithTV (Dog max) (STV 1.0 1.0)))");
        assert_eq!(score, 0.5);
    }

    #[test]
    fn colon_prefix_and_repair_floor_at_zero() {
        let (line, score) = balance_parentheses(": p (Dog max");
        assert_eq!(line, "(: p (Dog max))");
        assert_eq!(score, 0.0);
    }

    #[test]
    fn balanced_valid_line_is_unchanged() {
        let line = "(: $prf (WithTV (Dog max) (STV 1.0 1.0)))";
        let (cleaned, score) = clean_and_score(&StructuralUnifier, line);
        assert_eq!(cleaned, line);
        assert_eq!(score, 1.0);

        let (again, score) = clean_and_score(&StructuralUnifier, &cleaned);
        assert_eq!(again, line);
        assert_eq!(score, 1.0);
    }

    #[test]
    fn repaired_valid_line_scores_balance_penalty() {
        let (cleaned, score) =
            clean_and_score(&StructuralUnifier, "(: $prf (WithTV (Dog max) (STV 1.0 1.0)");
        assert_eq!(cleaned, "(: $prf (WithTV (Dog max) (STV 1.0 1.0)))");
        assert_eq!(score, 0.5);
    }

    #[test]
    fn balanced_invalid_line_scores_zero() {
        let (cleaned, score) = clean_and_score(&StructuralUnifier, "(Dog max)");
        assert_eq!(cleaned, "(Dog max)");
        assert_eq!(score, 0.0);
    }

    #[test]
    fn deeply_nested_line_scores_zero() {
        let line = format!("(: p {}", "(".repeat(40_000));
        let (_, score) = clean_and_score(&StructuralUnifier, &line);
        assert_eq!(score, 0.0);
    }

    #[test]
    fn oracle_error_scores_zero() {
        assert_eq!(
            check_statement(&FailingOracle, "(: p (WithTV (Dog max) (STV 1.0 1.0)))"),
            0.0
        );
    }

    #[test]
    fn empty_list_is_vacuously_perfect() {
        let (lines, score) =
            clean_pln_list::<&str>(&StructuralUnifier, &[], LineAggregation::Mean);
        assert!(lines.is_empty());
        assert_eq!(score, 1.0);

        let (lines, score) =
            clean_pln_list(&StructuralUnifier, &["", "   "], LineAggregation::Mean);
        assert!(lines.is_empty());
        assert_eq!(score, 1.0);
    }

    #[test]
    fn list_mean_versus_min() {
        let lines = [
            "(: a (WithTV (Dog max) (STV 1.0 1.0)))",
            "",
            "(Dog max)",
        ];
        let (cleaned, mean) = clean_pln_list(&StructuralUnifier, &lines, LineAggregation::Mean);
        assert_eq!(cleaned.len(), 2);
        assert_eq!(mean, 0.5);

        let (_, min) = clean_pln_list(&StructuralUnifier, &lines, LineAggregation::Min);
        assert_eq!(min, 0.0);
    }

    #[test]
    fn clean_pln_drops_score() {
        assert_eq!(clean_pln("(: a (b"), "(: a (b))");
    }
}
