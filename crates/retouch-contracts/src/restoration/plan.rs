use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// One goal of a restoration plan. Order in the plan is execution order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStep {
    pub step: u32,
    pub goal: String,
}

impl PlanStep {
    pub fn new(step: u32, goal: impl Into<String>) -> Self {
        Self {
            step,
            goal: goal.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanValidationError {
    #[error("plan response is not valid JSON: {0}")]
    NotJson(String),
    #[error("plan response is not a sequence of steps")]
    NotSequence,
    #[error("plan entry {index} is malformed: {reason}")]
    MalformedStep { index: usize, reason: String },
    #[error("plan is empty")]
    Empty,
    #[error("plan must start at step 1, got step {0}")]
    BadStart(u32),
    #[error("step numbers must increase: step {current} follows step {previous}")]
    NotIncreasing { previous: u32, current: u32 },
    #[error("plan step {0} has an empty goal")]
    EmptyGoal(u32),
}

/// Parses a model's plan answer: a JSON array of `{step, goal}` objects,
/// optionally wrapped in a markdown code fence.
pub fn parse_plan(raw: &str) -> Result<Vec<PlanStep>, PlanValidationError> {
    let body = strip_code_fence(raw);
    let value: Value = serde_json::from_str(body)
        .map_err(|err| PlanValidationError::NotJson(err.to_string()))?;
    let Some(rows) = value.as_array() else {
        return Err(PlanValidationError::NotSequence);
    };

    let mut steps = Vec::with_capacity(rows.len());
    for (index, row) in rows.iter().enumerate() {
        steps.push(plan_step_from_value(index, row)?);
    }
    validate_plan(steps)
}

/// Checks the shape every run relies on: non-empty, numbered from 1 with
/// strictly increasing step numbers, and a non-blank goal per step. Goals
/// come back trimmed.
pub fn validate_plan(steps: Vec<PlanStep>) -> Result<Vec<PlanStep>, PlanValidationError> {
    let Some(first) = steps.first() else {
        return Err(PlanValidationError::Empty);
    };
    if first.step != 1 {
        return Err(PlanValidationError::BadStart(first.step));
    }

    let mut previous: Option<u32> = None;
    let mut out = Vec::with_capacity(steps.len());
    for step in steps {
        if let Some(previous) = previous {
            if step.step <= previous {
                return Err(PlanValidationError::NotIncreasing {
                    previous,
                    current: step.step,
                });
            }
        }
        let goal = step.goal.trim();
        if goal.is_empty() {
            return Err(PlanValidationError::EmptyGoal(step.step));
        }
        previous = Some(step.step);
        out.push(PlanStep::new(step.step, goal));
    }
    Ok(out)
}

fn plan_step_from_value(index: usize, row: &Value) -> Result<PlanStep, PlanValidationError> {
    let malformed = |reason: &str| PlanValidationError::MalformedStep {
        index,
        reason: reason.to_string(),
    };
    let Some(obj) = row.as_object() else {
        return Err(malformed("expected an object"));
    };
    let step = match obj.get("step") {
        Some(Value::Number(number)) => number.as_u64(),
        Some(Value::String(text)) => text.trim().parse::<u64>().ok(),
        _ => None,
    }
    .and_then(|value| u32::try_from(value).ok())
    .ok_or_else(|| malformed("`step` must be a positive integer"))?;
    let goal = obj
        .get("goal")
        .and_then(Value::as_str)
        .ok_or_else(|| malformed("`goal` must be a string"))?;
    Ok(PlanStep::new(step, goal))
}

fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    match rest.split_once('\n') {
        Some((lang, body)) if !lang.trim_start().starts_with('[') => body.trim(),
        _ => rest.trim(),
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_plan, validate_plan, PlanStep, PlanValidationError};

    #[test]
    fn parses_plain_array() {
        let plan = parse_plan(
            r#"[{"step": 1, "goal": "Remove scratches"}, {"step": 2, "goal": "Colorize"}]"#,
        )
        .unwrap_or_default();
        assert_eq!(
            plan,
            vec![
                PlanStep::new(1, "Remove scratches"),
                PlanStep::new(2, "Colorize"),
            ]
        );
    }

    #[test]
    fn parses_fenced_array_and_string_step_numbers() {
        let raw = "```json\n[{\"step\": \"1\", \"goal\": \"  Repair the torn corner \"}]\n```";
        let plan = parse_plan(raw).unwrap_or_default();
        assert_eq!(plan, vec![PlanStep::new(1, "Repair the torn corner")]);

        let bare_fence = "```[{\"step\": 1, \"goal\": \"Sharpen\"}]```";
        assert_eq!(
            parse_plan(bare_fence).unwrap_or_default(),
            vec![PlanStep::new(1, "Sharpen")]
        );
    }

    #[test]
    fn rejects_empty_and_non_sequence_answers() {
        assert_eq!(parse_plan("[]"), Err(PlanValidationError::Empty));
        assert_eq!(
            parse_plan(r#"{"plan": [{"step": 1, "goal": "x"}]}"#),
            Err(PlanValidationError::NotSequence)
        );
        assert!(matches!(
            parse_plan("I think the photo needs work"),
            Err(PlanValidationError::NotJson(_))
        ));
    }

    #[test]
    fn rejects_malformed_entries() {
        assert!(matches!(
            parse_plan(r#"[{"step": 1}]"#),
            Err(PlanValidationError::MalformedStep { index: 0, .. })
        ));
        assert!(matches!(
            parse_plan(r#"[{"step": 1, "goal": "a"}, "b"]"#),
            Err(PlanValidationError::MalformedStep { index: 1, .. })
        ));
        assert!(matches!(
            parse_plan(r#"[{"step": -1, "goal": "a"}]"#),
            Err(PlanValidationError::MalformedStep { index: 0, .. })
        ));
    }

    #[test]
    fn numbering_must_start_at_one_and_increase() {
        assert_eq!(
            validate_plan(vec![PlanStep::new(0, "a")]),
            Err(PlanValidationError::BadStart(0))
        );
        assert_eq!(
            validate_plan(vec![PlanStep::new(1, "a"), PlanStep::new(1, "b")]),
            Err(PlanValidationError::NotIncreasing {
                previous: 1,
                current: 1
            })
        );
        assert_eq!(
            validate_plan(vec![
                PlanStep::new(1, "a"),
                PlanStep::new(3, "b"),
                PlanStep::new(2, "c"),
            ]),
            Err(PlanValidationError::NotIncreasing {
                previous: 3,
                current: 2
            })
        );
    }

    #[test]
    fn blank_goals_are_rejected() {
        assert_eq!(
            validate_plan(vec![PlanStep::new(1, "ok"), PlanStep::new(2, "   ")]),
            Err(PlanValidationError::EmptyGoal(2))
        );
    }
}
