//! 简单算术题的二次校验
//!
//! 题干中恰好含有一个 `a op b =` / `a op b ?` 形式的表达式，且学生答案是一个数字时，
//! 直接计算结果，用于纠正评分模型在基础算术上的误判。

use std::sync::OnceLock;

use regex::Regex;

/// 允许的误差
const TOLERANCE: f64 = 0.01;

/// 算术校验结果
#[derive(Debug, Clone, PartialEq)]
pub struct ArithmeticCheck {
    pub expression: String,
    pub expected: f64,
    pub student: f64,
    pub is_correct: bool,
}

impl ArithmeticCheck {
    pub fn expected_text(&self) -> String {
        format_number(self.expected)
    }

    pub fn explanation(&self) -> String {
        format!(
            "Arithmetic check: {} = {}. The student answered {}, which is {}.",
            self.expression,
            self.expected_text(),
            format_number(self.student),
            if self.is_correct { "correct" } else { "incorrect" }
        )
    }
}

fn expression_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(\d+(?:\.\d+)?)\s*([+\-−×xX*÷/])\s*(\d+(?:\.\d+)?)\s*(?:=|\?)")
            .expect("合法的正则")
    })
}

fn numeric_answer_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*=?\s*(-?\d+(?:\.\d+)?)\s*\.?\s*$").expect("合法的正则")
    })
}

/// 校验题目中的算术表达式
///
/// 无法确定时返回 `None`（多个表达式、连续运算、非数字答案、除以 0 等）。
pub fn check_arithmetic(question: &str, student_answer: &str) -> Option<ArithmeticCheck> {
    let mut matches = expression_re().captures_iter(question);
    let caps = matches.next()?;
    if matches.next().is_some() {
        return None;
    }

    // 表达式前面紧跟运算符或数字时说明是连续运算，例如 "15 + 23 - 4 = ?"
    let whole = caps.get(0)?;
    let before = question[..whole.start()].trim_end();
    if before
        .chars()
        .last()
        .is_some_and(|c| c.is_ascii_digit() || "+-−×*÷/.".contains(c))
    {
        return None;
    }

    let left: f64 = caps[1].parse().ok()?;
    let right: f64 = caps[3].parse().ok()?;
    let op = caps[2].chars().next()?;

    let expected = match op {
        '+' => left + right,
        '-' | '−' => left - right,
        '×' | 'x' | 'X' | '*' => left * right,
        '÷' | '/' if right != 0.0 => left / right,
        _ => return None,
    };

    let student: f64 = numeric_answer_re()
        .captures(student_answer)?
        .get(1)?
        .as_str()
        .parse()
        .ok()?;

    Some(ArithmeticCheck {
        expression: format!("{} {} {}", &caps[1], op, &caps[3]),
        expected,
        student,
        is_correct: (student - expected).abs() < TOLERANCE,
    })
}

/// 整数不带小数点，其余最多保留 4 位小数
fn format_number(value: f64) -> String {
    if (value - value.round()).abs() < 1e-9 {
        format!("{}", value.round() as i64)
    } else {
        let text = format!("{:.4}", value);
        text.trim_end_matches('0').trim_end_matches('.').to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_sums() {
        let check = check_arithmetic("2+2=?", "4").unwrap();
        assert!(check.is_correct);
        assert_eq!(check.expected_text(), "4");

        let check = check_arithmetic("3+3=?", "7").unwrap();
        assert!(!check.is_correct);
        assert_eq!(check.expected_text(), "6");
        assert!(check.explanation().contains("3 + 3 = 6"));
    }

    #[test]
    fn test_other_operators() {
        assert!(check_arithmetic("What is 7 × 8?", "56").unwrap().is_correct);
        assert!(!check_arithmetic("What is 7 x 8?", "54").unwrap().is_correct);
        assert!(check_arithmetic("7 / 2 = ?", "3.5").unwrap().is_correct);
        assert!(check_arithmetic("10 - 4 =", "= 6").unwrap().is_correct);
        assert!(check_arithmetic("1 / 3 = ?", "0.33").unwrap().is_correct);
        assert_eq!(
            check_arithmetic("1 / 3 = ?", "0.5").unwrap().expected_text(),
            "0.3333"
        );
    }

    #[test]
    fn test_ambiguous_questions_are_skipped() {
        // 非数字答案
        assert!(check_arithmetic("2+2=?", "four").is_none());
        // 多个表达式
        assert!(check_arithmetic("If 2+3=5, what is 4+4?", "8").is_none());
        // 连续运算
        assert!(check_arithmetic("15 + 23 - 4 = ?", "34").is_none());
        // 代数题
        assert!(check_arithmetic("Solve for x: 2x + 5 = 13", "4").is_none());
        // 除以 0
        assert!(check_arithmetic("5 / 0 = ?", "0").is_none());
    }
}
