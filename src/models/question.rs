use serde::{Deserialize, Serialize};

/// 一道题目与学生作答
///
/// `index` 从 1 开始，在一次运行内连续递增；`question_text` 永不为空。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionAnswerPair {
    pub index: usize,
    pub question_text: String,
    pub student_answer_text: String,
    /// 本题满分，始终大于 0
    pub max_points: f64,
}

impl QuestionAnswerPair {
    pub fn new(
        index: usize,
        question_text: impl Into<String>,
        student_answer_text: impl Into<String>,
        max_points: f64,
    ) -> Self {
        Self {
            index,
            question_text: question_text.into(),
            student_answer_text: student_answer_text.into(),
            max_points,
        }
    }
}
