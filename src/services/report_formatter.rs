//! 报告格式化 - 业务能力层
//!
//! 纯函数：相同的记录和生成时间总是得到逐字节相同的报告。

use chrono::NaiveDateTime;

use crate::models::{GradingRecord, GradingReport, ReportSummary};

const HEAVY_RULE_WIDTH: usize = 60;
const LIGHT_RULE_WIDTH: usize = 40;

/// 格式化后的报告
#[derive(Debug, Clone, PartialEq)]
pub struct FormattedReport {
    pub text: String,
    pub summary: ReportSummary,
}

/// 报告格式化器
#[derive(Debug, Default, Clone, Copy)]
pub struct ReportFormatter;

impl ReportFormatter {
    pub fn new() -> Self {
        Self
    }

    /// 生成报告文本
    ///
    /// 记录按题号排序后输出；`generated_at` 只用于页眉。
    pub fn format(&self, records: Vec<GradingRecord>, generated_at: NaiveDateTime) -> FormattedReport {
        let report = GradingReport::new(records);
        let summary = report.summary();
        let heavy = "=".repeat(HEAVY_RULE_WIDTH);
        let light = "-".repeat(LIGHT_RULE_WIDTH);

        let mut lines: Vec<String> = vec![
            heavy.clone(),
            "HOMEWORK GRADING REPORT".to_string(),
            heavy.clone(),
            format!("Generated: {}", generated_at.format("%Y-%m-%d %H:%M:%S")),
            format!("Total Questions: {}", summary.question_count),
            format!(
                "Overall Score: {:.1}/{} ({:.1}%)",
                summary.total_points,
                format_total(summary.max_total_points),
                summary.percentage
            ),
            heavy.clone(),
            String::new(),
        ];

        for record in report.records() {
            lines.extend(record_block(record));
            lines.push(light.clone());
            lines.push(String::new());
        }

        let verdicts = &summary.verdicts;
        lines.push(heavy.clone());
        lines.push(format!(
            "Verdicts: {} correct, {} incorrect, {} partially correct, {} ungradable",
            verdicts.correct, verdicts.incorrect, verdicts.partially_correct, verdicts.ungradable
        ));
        lines.push("Report generated by homework-grader".to_string());
        lines.push(heavy);

        let mut text = lines.join("\n");
        text.push('\n');

        FormattedReport { text, summary }
    }
}

fn record_block(record: &GradingRecord) -> Vec<String> {
    let answer = if record.student_answer_text.trim().is_empty() {
        "(no answer)"
    } else {
        record.student_answer_text.as_str()
    };

    let mut block = vec![
        format!("Q{}: {}", record.index, record.question_text),
        format!("Student Answer: {}", answer),
        format!("Status: {}", record.verdict.label()),
        format!(
            "Points: {}/{}",
            format_points(record.points_awarded),
            format_points(record.max_points)
        ),
    ];

    let optional = [
        ("Correct Answer", &record.correct_answer),
        ("Explanation", &record.explanation),
        ("Feedback", &record.feedback),
    ];
    for (label, value) in optional {
        if let Some(value) = value.as_deref().filter(|v| !v.trim().is_empty()) {
            block.push(format!("{}: {}", label, value));
        }
    }

    block
}

/// 至少保留一位小数，最多两位: 1 → "1.0"，0.75 → "0.75"
fn format_points(value: f64) -> String {
    let text = format!("{:.2}", value);
    match text.strip_suffix('0') {
        Some(trimmed) => trimmed.to_string(),
        None => text,
    }
}

/// 最短形式，最多两位小数: 2 → "2"，0.1 + 0.2 → "0.3"
fn format_total(value: f64) -> String {
    let text = format!("{:.2}", value);
    text.trim_end_matches('0').trim_end_matches('.').to_string()
}
