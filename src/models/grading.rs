use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::models::question::QuestionAnswerPair;

/// 评分结论
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Verdict {
    Correct,
    Incorrect,
    PartiallyCorrect,
    Ungradable,
}

impl Verdict {
    /// 报告中显示的标签
    pub fn label(&self) -> &'static str {
        match self {
            Verdict::Correct => "Correct",
            Verdict::Incorrect => "Incorrect",
            Verdict::PartiallyCorrect => "Partially Correct",
            Verdict::Ungradable => "Ungradable",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// 无法识别的评分结论
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVerdict(pub String);

impl fmt::Display for UnknownVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "无法识别的评分结论: '{}'", self.0)
    }
}

impl std::error::Error for UnknownVerdict {}

impl FromStr for Verdict {
    type Err = UnknownVerdict;

    /// 忽略大小写、空格、下划线、连字符以及 ✓ / ✗ 之类的装饰符号
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key: String = s
            .chars()
            .filter(|c| c.is_ascii_alphabetic())
            .map(|c| c.to_ascii_lowercase())
            .collect();

        match key.as_str() {
            "correct" => Ok(Verdict::Correct),
            "incorrect" | "wrong" => Ok(Verdict::Incorrect),
            "partiallycorrect" | "partial" | "partialcredit" => Ok(Verdict::PartiallyCorrect),
            "ungradable" => Ok(Verdict::Ungradable),
            _ => Err(UnknownVerdict(s.to_string())),
        }
    }
}

/// 单题评分记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradingRecord {
    pub index: usize,
    pub question_text: String,
    pub student_answer_text: String,
    pub verdict: Verdict,
    pub points_awarded: f64,
    pub max_points: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correct_answer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
}

impl GradingRecord {
    /// 以题目为基础创建记录，分数由调用方保证合法
    pub fn for_pair(pair: &QuestionAnswerPair, verdict: Verdict, points_awarded: f64) -> Self {
        Self {
            index: pair.index,
            question_text: pair.question_text.clone(),
            student_answer_text: pair.student_answer_text.clone(),
            verdict,
            points_awarded,
            max_points: pair.max_points,
            correct_answer: None,
            explanation: None,
            feedback: None,
        }
    }

    /// 无法评分的兜底记录，得分固定为 0
    pub fn ungradable(pair: &QuestionAnswerPair, explanation: impl Into<String>) -> Self {
        Self {
            explanation: Some(explanation.into()),
            feedback: Some("Please review this question manually.".to_string()),
            ..Self::for_pair(pair, Verdict::Ungradable, 0.0)
        }
    }

    /// 检查分数与结论是否满足约束
    pub fn is_consistent(&self) -> bool {
        let in_range = self.max_points > 0.0
            && (0.0..=self.max_points).contains(&self.points_awarded);
        let matches_verdict = match self.verdict {
            Verdict::Correct => self.points_awarded == self.max_points,
            Verdict::Incorrect | Verdict::Ungradable => self.points_awarded == 0.0,
            Verdict::PartiallyCorrect => {
                self.points_awarded > 0.0 && self.points_awarded < self.max_points
            }
        };
        in_range && matches_verdict
    }
}
