//! 基础设施层
//!
//! 持有外部资源（LLM 客户端、OCR 引擎），只暴露能力，不认识题目和评分。

pub mod llm_client;
pub mod ocr;

pub use llm_client::{LanguageModel, OpenAiModel, Prompt};
pub use ocr::{OcrBackend, OcrOutput, TesseractOcr};
