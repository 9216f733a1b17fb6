//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责把各阶段串成流水线并调度并发，是整个系统的"指挥中心"。
//!
//! ## 模块划分
//!
//! ### `pipeline` - 评分流水线
//! - 组装 OCR、LLM 客户端和各阶段服务
//! - 依次执行提取、切分、评分、报告
//! - 写入报告并输出统计信息
//!
//! ### `batch_grader` - 并发评分器
//! - 控制并发数量（Semaphore）
//! - 把 panic 的任务降级为 `Ungradable`
//! - 按题号重新排序
//!
//! ## 层次关系
//!
//! ```text
//! pipeline (处理一张图片)
//!     ↓
//! batch_grader (处理 Vec<QuestionAnswerPair>)
//!     ↓
//! services (能力层：extract / segment / grade / format / write)
//!     ↓
//! infrastructure (基础设施：OcrBackend / LanguageModel)
//! ```
//!
//! ## 设计原则
//!
//! 1. **单一职责**：pipeline 管阶段，batch_grader 管并发
//! 2. **资源隔离**：只有编排层持有 OCR 和 LLM 客户端
//! 3. **向下依赖**：编排层 → services → infrastructure
//! 4. **无业务逻辑**：只做调度和统计，不做具体评分判断

pub mod batch_grader;
pub mod pipeline;

// 重新导出主要类型
pub use batch_grader::grade_all;
pub use pipeline::{GradingOutcome, GradingPipeline};
