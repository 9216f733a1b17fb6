//! 评分引擎 - 业务能力层
//!
//! 只负责"一道题 → 一条评分记录"，不关心题目之间的顺序和并发。
//!
//! 评分模型不可信：
//! - 结论无法识别时重试
//! - 分数越界时截断并记录异常
//! - 重试耗尽时降级为 `Ungradable`，绝不让整次运行失败

use std::fmt;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer};
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::LlmError;
use crate::infrastructure::Prompt;
use crate::models::{GradingRecord, QuestionAnswerPair, Verdict};
use crate::services::arithmetic_check::check_arithmetic;
use crate::services::validated_judge::{parse_json, RetryPolicy, ValidatedJudge};
use crate::utils::logging::truncate_text;

const GRADING_SYSTEM_PROMPT: &str = "You are an expert teacher with many years of experience. \
You grade homework carefully and fairly, focusing on correctness and student understanding. \
Always double-check calculations before marking an answer wrong, and give partial credit \
for a correct method even when the final answer is wrong.";

/// 评分引擎
pub struct GradingEngine {
    judge: ValidatedJudge,
    policy: RetryPolicy,
    max_tokens: u32,
    arithmetic_check: bool,
}

impl GradingEngine {
    pub fn new(judge: ValidatedJudge, config: &Config) -> Self {
        Self {
            judge,
            policy: RetryPolicy::new(
                config.grade_max_attempts,
                config.backoff_base(),
                config.backoff_max(),
            ),
            max_tokens: config.grade_max_tokens,
            arithmetic_check: config.arithmetic_check,
        }
    }

    /// 为一道题评分
    ///
    /// 永远返回一条满足分数约束的记录；评分服务失败时返回 `Ungradable`。
    pub async fn grade(&self, pair: QuestionAnswerPair) -> GradingRecord {
        info!(
            "[题目 {}] 📚 正在评分: {}",
            pair.index,
            truncate_text(&pair.question_text, 60)
        );

        let prompt = self.build_prompt(&pair);
        let task = format!("[题目 {}] 评分", pair.index);

        let judgement = match self
            .judge
            .request(&task, &prompt, &self.policy, interpret_judgement)
            .await
        {
            Ok(judgement) => judgement,
            Err(failure) => {
                warn!(
                    "[题目 {}] ❌ 评分失败，标记为 Ungradable: {}",
                    pair.index, failure.last_error
                );
                return GradingRecord::ungradable(
                    &pair,
                    format!(
                        "The grading service could not produce a valid verdict after {} attempt(s): {}.",
                        failure.attempts,
                        failure_cause(&failure.last_error)
                    ),
                );
            }
        };

        let mut record = reconcile(&pair, judgement);
        if self.arithmetic_check {
            apply_arithmetic_check(&mut record);
        }

        info!(
            "[题目 {}] ✅ {} ({}/{})",
            record.index, record.verdict, record.points_awarded, record.max_points
        );
        record
    }

    fn build_prompt(&self, pair: &QuestionAnswerPair) -> Prompt {
        let answer = if pair.student_answer_text.is_empty() {
            "(no answer)"
        } else {
            pair.student_answer_text.as_str()
        };

        let user = format!(
            r#"Grade this question from a student's homework.

QUESTION: {question}
STUDENT ANSWER: {answer}
MAXIMUM POINTS: {max}

Grading guidelines:
1. Focus on the final answer and its correctness, not on formatting.
2. If the final answer is correct, give full credit even with minor formatting issues.
3. Be forgiving of OCR errors in the text (garbled symbols, spacing issues).
4. For math problems, check whether the numerical result is actually correct.
5. Give partial credit for a correct method with a wrong calculation.
6. Double-check your own calculations before marking something wrong.

Reply with a JSON object in exactly this format:
{{
  "verdict": "Correct" or "Incorrect" or "Partially Correct",
  "points_awarded": a number from 0 to {max} ({max} for Correct, 0 for Incorrect, strictly between for Partially Correct),
  "correct_answer": "the complete correct answer",
  "explanation": "brief, specific explanation of why the answer is right or wrong",
  "feedback": "constructive feedback for the student"
}}"#,
            question = pair.question_text,
            answer = answer,
            max = pair.max_points,
        );

        Prompt::new(GRADING_SYSTEM_PROMPT, user, self.max_tokens)
    }
}

/// 写进报告的失败原因，详细错误只进日志
fn failure_cause(error: &LlmError) -> &'static str {
    match error {
        LlmError::Timeout { .. } => "the request timed out",
        LlmError::RateLimited { .. } => "the service kept rate limiting requests",
        LlmError::ApiCallFailed { .. } => "the service returned an error",
        LlmError::EmptyContent { .. } => "the service returned an empty response",
        LlmError::MalformedJson { .. } | LlmError::SchemaViolation { .. } => {
            "the response was not in the expected format"
        }
    }
}

/// 模型给出的原始评分结构
#[derive(Debug, Deserialize)]
struct JudgeReply {
    #[serde(alias = "status", alias = "grade")]
    verdict: String,
    #[serde(
        default,
        alias = "score",
        alias = "points",
        deserialize_with = "deserialize_points"
    )]
    points_awarded: Option<f64>,
    #[serde(default)]
    correct_answer: Option<JsonValue>,
    #[serde(default)]
    explanation: Option<JsonValue>,
    #[serde(default)]
    feedback: Option<JsonValue>,
}

/// 通过校验的评分结论
#[derive(Debug, Clone, PartialEq)]
struct Judgement {
    verdict: Verdict,
    points: Option<f64>,
    correct_answer: Option<String>,
    explanation: Option<String>,
    feedback: Option<String>,
}

/// 分数既可能是数字也可能是数字字符串
fn deserialize_points<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    struct PointsVisitor;

    impl<'de> Visitor<'de> for PointsVisitor {
        type Value = Option<f64>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a number or a numeric string")
        }

        fn visit_f64<E: de::Error>(self, value: f64) -> Result<Self::Value, E> {
            Ok(Some(value))
        }

        fn visit_i64<E: de::Error>(self, value: i64) -> Result<Self::Value, E> {
            Ok(Some(value as f64))
        }

        fn visit_u64<E: de::Error>(self, value: u64) -> Result<Self::Value, E> {
            Ok(Some(value as f64))
        }

        fn visit_str<E: de::Error>(self, value: &str) -> Result<Self::Value, E> {
            value
                .trim()
                .parse::<f64>()
                .map(Some)
                .map_err(|_| E::invalid_value(de::Unexpected::Str(value), &self))
        }

        fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }
    }

    deserializer.deserialize_any(PointsVisitor)
}

fn text_field(value: Option<JsonValue>) -> Option<String> {
    let text = match value? {
        JsonValue::Null => return None,
        JsonValue::String(s) => s,
        other => other.to_string(),
    };
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

/// 校验模型输出：结论必须可识别，分数必须是有限数
fn interpret_judgement(response: &str) -> Result<Judgement, LlmError> {
    let reply: JudgeReply = parse_json(response)?;

    let verdict: Verdict = reply
        .verdict
        .parse()
        .map_err(|e: crate::models::grading::UnknownVerdict| LlmError::schema(e.to_string()))?;

    if let Some(points) = reply.points_awarded {
        if !points.is_finite() {
            return Err(LlmError::schema(format!("points_awarded 不是有限数: {}", points)));
        }
    }

    Ok(Judgement {
        verdict,
        points: reply.points_awarded,
        correct_answer: text_field(reply.correct_answer),
        explanation: text_field(reply.explanation),
        feedback: text_field(reply.feedback),
    })
}

/// 让结论与分数满足约束，越界值截断并记录异常
fn reconcile(pair: &QuestionAnswerPair, judgement: Judgement) -> GradingRecord {
    let max = pair.max_points;

    let points = judgement.points.map(|p| {
        if !(0.0..=max).contains(&p) {
            warn!(
                "[题目 {}] ⚠️ 分数 {} 超出范围 [0, {}]，已截断",
                pair.index, p, max
            );
        }
        p.clamp(0.0, max)
    });

    let (verdict, points_awarded) = match judgement.verdict {
        Verdict::Correct => {
            if points.is_some_and(|p| p != max) {
                warn!(
                    "[题目 {}] ⚠️ 结论为 Correct 但分数为 {:?}，按满分 {} 处理",
                    pair.index, points, max
                );
            }
            (Verdict::Correct, max)
        }
        Verdict::Incorrect => {
            if points.is_some_and(|p| p != 0.0) {
                warn!(
                    "[题目 {}] ⚠️ 结论为 Incorrect 但分数为 {:?}，按 0 分处理",
                    pair.index, points
                );
            }
            (Verdict::Incorrect, 0.0)
        }
        Verdict::Ungradable => (Verdict::Ungradable, 0.0),
        Verdict::PartiallyCorrect => match points {
            None => {
                debug!("[题目 {}] 部分正确但未给分数，按一半分数处理", pair.index);
                (Verdict::PartiallyCorrect, max / 2.0)
            }
            Some(p) if p <= 0.0 => {
                warn!(
                    "[题目 {}] ⚠️ 结论为 Partially Correct 但分数为 0，改为 Incorrect",
                    pair.index
                );
                (Verdict::Incorrect, 0.0)
            }
            Some(p) if p >= max => {
                warn!(
                    "[题目 {}] ⚠️ 结论为 Partially Correct 但分数为满分，改为 Correct",
                    pair.index
                );
                (Verdict::Correct, max)
            }
            Some(p) => (Verdict::PartiallyCorrect, p),
        },
    };

    GradingRecord {
        correct_answer: judgement.correct_answer,
        explanation: judgement.explanation,
        feedback: judgement.feedback,
        ..GradingRecord::for_pair(pair, verdict, points_awarded)
    }
}

/// 用算术校验结果纠正与之矛盾的结论
fn apply_arithmetic_check(record: &mut GradingRecord) {
    if record.verdict == Verdict::Ungradable {
        return;
    }
    let Some(check) = check_arithmetic(&record.question_text, &record.student_answer_text) else {
        return;
    };

    let agrees = match record.verdict {
        Verdict::Correct => check.is_correct,
        Verdict::Incorrect => !check.is_correct,
        _ => false,
    };

    if agrees {
        if !check.is_correct && record.correct_answer.is_none() {
            record.correct_answer = Some(check.expected_text());
        }
        return;
    }

    let overridden = if check.is_correct {
        Verdict::Correct
    } else {
        Verdict::Incorrect
    };
    info!(
        "[题目 {}] 🔍 算术校验覆盖结论: {} → {}",
        record.index, record.verdict, overridden
    );

    record.verdict = overridden;
    record.points_awarded = if check.is_correct {
        record.max_points
    } else {
        0.0
    };
    record.correct_answer = Some(check.expected_text());
    record.explanation = Some(check.explanation());
    record.feedback = Some(if check.is_correct {
        "Correct answer, well done.".to_string()
    } else {
        format!(
            "Double-check your arithmetic: {} = {}.",
            check.expression,
            check.expected_text()
        )
    });
}
