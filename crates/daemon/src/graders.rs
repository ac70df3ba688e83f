// Built-in Graders
//
// A page's content.json names a grader kind per item; these are the
// kinds every deployment has. Deployments with richer question types
// register their own graders on top of this registry at worker startup.

use gradekeep_core::error::{AppError, Result};
use gradekeep_core::port::{GradeOutcome, Grader, GraderRegistry};
use serde_json::Value;
use std::sync::Arc;

pub fn built_in_registry() -> GraderRegistry {
    let mut registry = GraderRegistry::new();
    registry.register("literal", Arc::new(LiteralGrader));
    registry.register("number", Arc::new(NumberGrader));
    registry
}

/// Exact-match grading on trimmed strings.
///
/// Item config: `{ "answer": "expected text" }`.
pub struct LiteralGrader;

impl LiteralGrader {
    fn expected(config: &Value) -> Result<&str> {
        config
            .get("answer")
            .and_then(Value::as_str)
            .ok_or_else(|| AppError::Validation("literal item config has no 'answer'".to_string()))
    }
}

impl Grader for LiteralGrader {
    fn grade(&self, submission: &Value, config: &Value) -> Result<GradeOutcome> {
        let expected = Self::expected(config)?;
        let submitted = submission.as_str().unwrap_or("");
        let correct = submitted.trim() == expected.trim();
        Ok(GradeOutcome {
            score: if correct { 1.0 } else { 0.0 },
            message: if correct {
                "Correct!".to_string()
            } else {
                "Incorrect.".to_string()
            },
            extra_data: None,
        })
    }

    fn check(&self, submission: &Value, config: &Value) -> Result<String> {
        // checks confirm the submission was received, without judging it
        Self::expected(config)?;
        let submitted = submission.as_str().unwrap_or("").trim();
        if submitted.is_empty() {
            Ok("No answer submitted.".to_string())
        } else {
            Ok(format!("Received: {submitted}"))
        }
    }
}

/// Numeric grading within an absolute tolerance.
///
/// Item config: `{ "answer": 9.81, "tolerance": 0.01 }`; tolerance
/// defaults to exact. Submissions may be JSON numbers or numeric strings.
pub struct NumberGrader;

impl NumberGrader {
    fn expected(config: &Value) -> Result<(f64, f64)> {
        let answer = config.get("answer").and_then(Value::as_f64).ok_or_else(|| {
            AppError::Validation("number item config has no numeric 'answer'".to_string())
        })?;
        let tolerance = config
            .get("tolerance")
            .and_then(Value::as_f64)
            .unwrap_or(0.0)
            .abs();
        Ok((answer, tolerance))
    }
}

fn parse_number(submission: &Value) -> Option<f64> {
    match submission {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

impl Grader for NumberGrader {
    fn grade(&self, submission: &Value, config: &Value) -> Result<GradeOutcome> {
        let (answer, tolerance) = Self::expected(config)?;
        let Some(value) = parse_number(submission) else {
            return Ok(GradeOutcome {
                score: 0.0,
                message: "Could not read your answer as a number.".to_string(),
                extra_data: None,
            });
        };
        let correct = (value - answer).abs() <= tolerance;
        Ok(GradeOutcome {
            score: if correct { 1.0 } else { 0.0 },
            message: if correct {
                "Correct!".to_string()
            } else {
                "Incorrect.".to_string()
            },
            extra_data: None,
        })
    }

    fn check(&self, submission: &Value, config: &Value) -> Result<String> {
        Self::expected(config)?;
        match parse_number(submission) {
            Some(value) => Ok(format!("Read as: {value}")),
            None => Ok("Could not read your answer as a number.".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_registry_has_built_in_kinds() {
        let registry = built_in_registry();
        assert_eq!(registry.kinds(), vec!["literal", "number"]);
        assert!(registry.resolve("literal").is_some());
        assert!(registry.resolve("essay").is_none());
    }

    #[test]
    fn test_literal_trims_before_comparing() {
        let config = json!({"answer": "paris"});
        let outcome = LiteralGrader
            .grade(&json!("  paris \n"), &config)
            .unwrap();
        assert_eq!(outcome.score, 1.0);

        let outcome = LiteralGrader.grade(&json!("london"), &config).unwrap();
        assert_eq!(outcome.score, 0.0);
        assert_eq!(outcome.message, "Incorrect.");
    }

    #[test]
    fn test_literal_non_string_submission_scores_zero() {
        let config = json!({"answer": "42"});
        let outcome = LiteralGrader.grade(&json!(42), &config).unwrap();
        assert_eq!(outcome.score, 0.0);
    }

    #[test]
    fn test_literal_missing_answer_is_config_error() {
        let err = LiteralGrader.grade(&json!("x"), &json!({})).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn test_number_within_tolerance() {
        let config = json!({"answer": 9.81, "tolerance": 0.01});
        assert_eq!(
            NumberGrader.grade(&json!(9.815), &config).unwrap().score,
            1.0
        );
        assert_eq!(NumberGrader.grade(&json!(9.75), &config).unwrap().score, 0.0);
    }

    #[test]
    fn test_number_accepts_numeric_strings() {
        let config = json!({"answer": 5});
        assert_eq!(
            NumberGrader.grade(&json!(" 5.0 "), &config).unwrap().score,
            1.0
        );
        let outcome = NumberGrader.grade(&json!("five"), &config).unwrap();
        assert_eq!(outcome.score, 0.0);
        assert!(outcome.message.contains("as a number"));
    }

    #[test]
    fn test_number_default_tolerance_is_exact() {
        let config = json!({"answer": 3});
        assert_eq!(NumberGrader.grade(&json!(3), &config).unwrap().score, 1.0);
        assert_eq!(
            NumberGrader.grade(&json!(3.0001), &config).unwrap().score,
            0.0
        );
    }

    #[test]
    fn test_check_reports_without_scoring() {
        let message = NumberGrader
            .check(&json!("12.5"), &json!({"answer": 1}))
            .unwrap();
        assert_eq!(message, "Read as: 12.5");

        let message = LiteralGrader
            .check(&json!(""), &json!({"answer": "a"}))
            .unwrap();
        assert_eq!(message, "No answer submitted.");
    }
}
