//! 题目切分服务 - 业务能力层
//!
//! 把 OCR 文本切分成有序的"题目 + 学生作答"。
//!
//! 流程：
//! 1. 空文本直接返回空列表
//! 2. 规则预切分（题号 + Answer: 标记），全部命中才采用
//! 3. 否则交给 LLM，结构不合法时用更严格的提示词重试
//! 4. 按题目在原文中首次出现的位置排序，重新编号

use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::{LlmError, SegmentationError};
use crate::infrastructure::Prompt;
use crate::models::{QuestionAnswerPair, RawText};
use crate::services::validated_judge::{parse_json, RetryPolicy, ValidatedJudge};

const SEGMENT_SYSTEM_PROMPT: &str = "You are a careful assistant that splits the OCR text of a student's \
homework page into questions and the student's answers. You always reply with valid JSON.";

/// 题目切分服务
pub struct QuestionSegmenter {
    judge: ValidatedJudge,
    policy: RetryPolicy,
    max_tokens: u32,
    default_max_points: f64,
    pattern_prepass: bool,
}

impl QuestionSegmenter {
    pub fn new(judge: ValidatedJudge, config: &Config) -> Self {
        Self {
            judge,
            policy: RetryPolicy::new(
                config.segment_max_retries.saturating_add(1),
                config.backoff_base(),
                config.backoff_max(),
            ),
            max_tokens: config.segment_max_tokens,
            default_max_points: config.default_max_points,
            pattern_prepass: config.pattern_prepass,
        }
    }

    /// 切分题目
    ///
    /// 返回的 `index` 从 1 开始连续编号，顺序与原文一致。
    pub async fn segment(
        &self,
        raw: &RawText,
    ) -> Result<Vec<QuestionAnswerPair>, SegmentationError> {
        if raw.is_blank() {
            info!("⚠️ 识别文本为空，没有可切分的题目");
            return Ok(Vec::new());
        }

        if self.pattern_prepass {
            if let Some(pairs) = segment_by_pattern(raw.text(), self.default_max_points) {
                info!("⚡ 规则切分成功，找到 {} 道题目", pairs.len());
                return Ok(pairs);
            }
            debug!("规则切分未能覆盖全部题目，改用 LLM 切分");
        }

        info!("🤖 使用 LLM 切分题目 (模型: {})...", self.judge.model_name());
        let prompt = self.build_prompt(raw.text());
        let default_max_points = self.default_max_points;

        let items = self
            .judge
            .request("题目切分", &prompt, &self.policy, |response| {
                validate_segments(response, default_max_points)
            })
            .await
            .map_err(|failure| {
                if failure.last_error.is_transient() {
                    SegmentationError::ExhaustedRetries {
                        attempts: failure.attempts,
                        last_error: failure.last_error,
                    }
                } else {
                    SegmentationError::Rejected(failure.last_error)
                }
            })?;

        let pairs = order_by_first_occurrence(raw.text(), items);
        info!("✓ LLM 切分完成，共 {} 道题目", pairs.len());
        Ok(pairs)
    }

    fn build_prompt(&self, text: &str) -> Prompt {
        let user = format!(
            r#"Split the following homework text into questions and the student's answers.

Return a JSON array. Each element must be an object with exactly these keys:
  "question_text":  the question, copied verbatim from the text (required, non-empty)
  "student_answer": the student's answer, copied verbatim ("" if the student left it blank)
  "max_points":     the point value printed for the question, or null when none is printed

Rules:
- Keep the questions in the order they appear in the text.
- Do not invent questions or answers that are not in the text.
- If the text contains no questions, return [].

Homework text:
<<<
{}
>>>"#,
            text
        );
        Prompt::new(SEGMENT_SYSTEM_PROMPT, user, self.max_tokens)
    }
}

/// LLM 返回的单个题目
#[derive(Debug, Deserialize)]
struct SegmentItem {
    #[serde(alias = "question")]
    question_text: String,
    #[serde(default, alias = "answer", alias = "student_answer_text")]
    student_answer: Option<String>,
    #[serde(default, alias = "points")]
    max_points: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SegmentResponse {
    List(Vec<SegmentItem>),
    Wrapped { questions: Vec<SegmentItem> },
}

/// 通过校验、尚未编号的题目
#[derive(Debug, Clone, PartialEq)]
struct ValidSegment {
    question_text: String,
    student_answer_text: String,
    max_points: f64,
}

/// 校验 LLM 返回的切分结果
///
/// 任意一项不合法都拒绝整个结果；题干为空的项被丢弃。
fn validate_segments(response: &str, default_max_points: f64) -> Result<Vec<ValidSegment>, LlmError> {
    let items = match parse_json::<SegmentResponse>(response)? {
        SegmentResponse::List(items) | SegmentResponse::Wrapped { questions: items } => items,
    };

    let mut segments = Vec::with_capacity(items.len());
    for (position, item) in items.into_iter().enumerate() {
        let question_text = item.question_text.trim();
        if question_text.is_empty() {
            debug!("丢弃第 {} 项：题干为空", position + 1);
            continue;
        }

        let max_points = match item.max_points {
            None => default_max_points,
            Some(points) if points.is_finite() && points > 0.0 => points,
            Some(points) => {
                return Err(LlmError::schema(format!(
                    "第 {} 项的 max_points 必须是正数，实际为 {}",
                    position + 1,
                    points
                )));
            }
        };

        segments.push(ValidSegment {
            question_text: question_text.to_string(),
            student_answer_text: item.student_answer.unwrap_or_default().trim().to_string(),
            max_points,
        });
    }
    Ok(segments)
}

/// 按题干在原文中首次出现的位置排序并从 1 开始编号
///
/// 找不到位置的题目跟在它在模型输出中的前一项之后。
fn order_by_first_occurrence(text: &str, segments: Vec<ValidSegment>) -> Vec<QuestionAnswerPair> {
    let haystack = normalize(text);
    let mut last_anchor = 0;
    let mut search_from = 0;

    let mut keyed: Vec<(usize, ValidSegment)> = segments
        .into_iter()
        .map(|segment| match locate(&haystack, &segment.question_text, search_from) {
            Some((start, len)) => {
                last_anchor = start;
                search_from = start + len;
                (start, segment)
            }
            None => (last_anchor, segment),
        })
        .collect();

    // 稳定排序，同一位置保持模型给出的相对顺序
    keyed.sort_by_key(|(anchor, _)| *anchor);

    keyed
        .into_iter()
        .enumerate()
        .map(|(i, (_, segment))| {
            QuestionAnswerPair::new(
                i + 1,
                segment.question_text,
                segment.student_answer_text,
                segment.max_points,
            )
        })
        .collect()
}

/// 返回匹配的起始位置和长度
///
/// 先完整题干后开头部分；每种都先在上一题之后查找，找不到再查全文，
/// 避免开头相同的题目被锚定到前面的题上。
fn locate(haystack: &str, question_text: &str, from: usize) -> Option<(usize, usize)> {
    let needle = normalize(question_text);
    if needle.is_empty() {
        return None;
    }
    // 模型可能修正了 OCR 错误，退而用开头部分匹配
    let prefix: String = needle.chars().take(24).collect();
    let prefix = (prefix.chars().count() >= 8).then_some(prefix);

    std::iter::once(needle.as_str())
        .chain(prefix.as_deref())
        .find_map(|candidate| {
            find_from(haystack, candidate, from)
                .or_else(|| haystack.find(candidate))
                .map(|start| (start, candidate.len()))
        })
}

fn find_from(haystack: &str, needle: &str, from: usize) -> Option<usize> {
    haystack
        .get(from..)?
        .find(needle)
        .map(|position| position + from)
}

fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn question_start_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^\s*(?:(?:q|question|prob|problem)\s*\d+\s*[.:)]?|\d+\s*[.:)])\s*(.*)$")
            .expect("合法的正则")
    })
}

fn answer_marker_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(?:^|\s)(?:answer|ans|solution)\s*:\s*").expect("合法的正则")
    })
}

fn points_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)[(\[]\s*(\d+(?:\.\d+)?)\s*(?:pts?|points?|marks?)\s*[)\]]")
            .expect("合法的正则")
    })
}

/// 基于题号和答案标记的规则切分
///
/// 只有每个题块都能分出非空题干和答案标记时才返回结果，否则返回 `None` 交给 LLM。
fn segment_by_pattern(text: &str, default_max_points: f64) -> Option<Vec<QuestionAnswerPair>> {
    let mut blocks: Vec<String> = Vec::new();
    for line in text.lines() {
        if let Some(caps) = question_start_re().captures(line) {
            blocks.push(caps.get(1).map_or("", |m| m.as_str()).to_string());
        } else if let Some(current) = blocks.last_mut() {
            current.push('\n');
            current.push_str(line);
        }
        // 第一道题之前的内容（标题、姓名等）忽略
    }

    if blocks.is_empty() {
        return None;
    }

    let mut pairs = Vec::with_capacity(blocks.len());
    for (i, block) in blocks.iter().enumerate() {
        // 取最后一个答案标记，避免题干中出现 "your answer:" 之类的字样
        let marker = answer_marker_re().find_iter(block).last()?;
        let mut question_text = block[..marker.start()].trim().to_string();
        let answer_text = block[marker.end()..].trim().to_string();

        let mut max_points = default_max_points;
        if let Some(caps) = points_re().captures(&question_text) {
            if let Ok(points) = caps[1].parse::<f64>() {
                if points > 0.0 {
                    max_points = points;
                    question_text = points_re().replace(&question_text, "").trim().to_string();
                }
            }
        }

        if question_text.is_empty() {
            return None;
        }
        pairs.push(QuestionAnswerPair::new(
            i + 1,
            question_text,
            answer_text,
            max_points,
        ));
    }
    Some(pairs)
}
