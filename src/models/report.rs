use serde::Serialize;

use crate::models::grading::{GradingRecord, Verdict};

/// 评分报告
///
/// 只保存记录本身，总分、满分和百分比每次都从记录重新计算。
#[derive(Debug, Clone, PartialEq)]
pub struct GradingReport {
    records: Vec<GradingRecord>,
}

impl GradingReport {
    /// 记录会按 `index` 排序
    pub fn new(mut records: Vec<GradingRecord>) -> Self {
        records.sort_by_key(|r| r.index);
        Self { records }
    }

    pub fn records(&self) -> &[GradingRecord] {
        &self.records
    }

    pub fn question_count(&self) -> usize {
        self.records.len()
    }

    pub fn total_points(&self) -> f64 {
        self.records.iter().map(|r| r.points_awarded).sum()
    }

    pub fn max_total_points(&self) -> f64 {
        self.records.iter().map(|r| r.max_points).sum()
    }

    /// 没有题目时返回 0
    pub fn percentage(&self) -> f64 {
        let max = self.max_total_points();
        if max > 0.0 {
            100.0 * self.total_points() / max
        } else {
            0.0
        }
    }

    pub fn verdict_counts(&self) -> VerdictCounts {
        self.records
            .iter()
            .fold(VerdictCounts::default(), |mut counts, r| {
                match r.verdict {
                    Verdict::Correct => counts.correct += 1,
                    Verdict::Incorrect => counts.incorrect += 1,
                    Verdict::PartiallyCorrect => counts.partially_correct += 1,
                    Verdict::Ungradable => counts.ungradable += 1,
                }
                counts
            })
    }

    /// 当前记录的汇总快照
    pub fn summary(&self) -> ReportSummary {
        ReportSummary {
            question_count: self.question_count(),
            total_points: self.total_points(),
            max_total_points: self.max_total_points(),
            percentage: self.percentage(),
            verdicts: self.verdict_counts(),
        }
    }
}

/// 各评分结论的数量
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct VerdictCounts {
    pub correct: usize,
    pub incorrect: usize,
    pub partially_correct: usize,
    pub ungradable: usize,
}

/// 报告汇总
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ReportSummary {
    pub question_count: usize,
    pub total_points: f64,
    pub max_total_points: f64,
    pub percentage: f64,
    pub verdicts: VerdictCounts,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::question::QuestionAnswerPair;

    fn record(index: usize, verdict: Verdict, points: f64, max: f64) -> GradingRecord {
        let pair = QuestionAnswerPair::new(index, format!("Q{}", index), "a", max);
        GradingRecord::for_pair(&pair, verdict, points)
    }

    #[test]
    fn test_totals_are_derived_from_records() {
        let report = GradingReport::new(vec![
            record(2, Verdict::Incorrect, 0.0, 1.0),
            record(1, Verdict::Correct, 1.0, 1.0),
            record(3, Verdict::PartiallyCorrect, 1.5, 2.0),
        ]);

        assert_eq!(report.total_points(), 2.5);
        assert_eq!(report.max_total_points(), 4.0);
        assert_eq!(report.percentage(), 62.5);
        let indices: Vec<usize> = report.records().iter().map(|r| r.index).collect();
        assert_eq!(indices, vec![1, 2, 3]);
    }

    #[test]
    fn test_empty_report_has_zero_percentage() {
        let report = GradingReport::new(Vec::new());
        let summary = report.summary();
        assert_eq!(summary.question_count, 0);
        assert_eq!(summary.max_total_points, 0.0);
        assert_eq!(summary.percentage, 0.0);
    }

    #[test]
    fn test_verdict_counts() {
        let report = GradingReport::new(vec![
            record(1, Verdict::Correct, 1.0, 1.0),
            record(2, Verdict::Ungradable, 0.0, 1.0),
            record(3, Verdict::Correct, 1.0, 1.0),
        ]);
        let counts = report.verdict_counts();
        assert_eq!(counts.correct, 2);
        assert_eq!(counts.ungradable, 1);
        assert_eq!(counts.incorrect, 0);
    }
}
