pub mod grading;
pub mod question;
pub mod raw_text;
pub mod report;

pub use grading::{GradingRecord, Verdict};
pub use question::QuestionAnswerPair;
pub use raw_text::RawText;
pub use report::{GradingReport, ReportSummary, VerdictCounts};
