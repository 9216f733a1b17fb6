//! # Homework Grader
//!
//! 一个用于自动批改作业图片的 Rust 应用程序
//!
//! ## 架构设计
//!
//! 本系统采用严格的四层架构：
//!
//! ### ① 基础设施层（Infrastructure）
//! - `infrastructure/` - 持有外部资源，只暴露能力
//! - `OcrBackend` / `TesseractOcr` - 图片文字识别能力
//! - `LanguageModel` / `OpenAiModel` - 发送提示词、拿回文本的能力
//!
//! ### ② 数据模型层（Models）
//! - `models/` - 各阶段之间传递的数据
//! - `RawText` → `QuestionAnswerPair` → `GradingRecord` → `GradingReport`
//!
//! ### ③ 业务能力层（Services）
//! - `services/` - 描述"我能做什么"，每个服务只负责一个阶段
//! - `TextExtractor` - 图片 → 文本
//! - `QuestionSegmenter` - 文本 → 题目列表
//! - `GradingEngine` - 单题 → 评分记录
//! - `ReportFormatter` / `ReportWriter` - 评分记录 → 报告文件
//! - `ValidatedJudge` - 带超时、校验和重试的 LLM 调用
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/pipeline` - 评分流水线，管理资源和阶段顺序
//! - `orchestrator/batch_grader` - 并发评分，保持题目顺序
//!
//! ## 模块结构

pub mod config;
pub mod error;
pub mod infrastructure;
pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;

// 重新导出常用类型
pub use config::Config;
pub use error::{AppError, AppResult};
pub use models::{GradingRecord, GradingReport, QuestionAnswerPair, RawText, Verdict};
pub use orchestrator::{GradingOutcome, GradingPipeline};
pub use services::FormattedReport;
