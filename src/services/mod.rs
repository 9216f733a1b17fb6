//! 业务能力层（Services）
//!
//! 每个服务只处理流水线中的一个阶段，彼此之间不直接调用，由编排层串联。

pub mod arithmetic_check;
pub mod grading_engine;
pub mod question_segmenter;
pub mod report_formatter;
pub mod report_writer;
pub mod text_extractor;
pub mod validated_judge;

pub use grading_engine::GradingEngine;
pub use question_segmenter::QuestionSegmenter;
pub use report_formatter::{FormattedReport, ReportFormatter};
pub use report_writer::ReportWriter;
pub use text_extractor::TextExtractor;
pub use validated_judge::{JudgeFailure, RetryPolicy, ValidatedJudge};
