//! 评分流水线 - 编排层
//!
//! ## 职责
//!
//! 本模块是整个应用的入口，持有各阶段的服务并把它们串成一条流水线。
//!
//! ## 核心功能
//!
//! 1. **组装服务**：根据配置创建 OCR、LLM 客户端和各阶段服务
//! 2. **文字提取**：图片 → `RawText`
//! 3. **题目切分**：`RawText` → `Vec<QuestionAnswerPair>`
//! 4. **并发评分**：委托 `batch_grader` 处理所有题目
//! 5. **生成报告**：格式化并写入文件
//!
//! ## 设计特点
//!
//! - **唯一的装配点**：阶段之间只在这里连接
//! - **致命错误提前返回**：提取、切分、写入失败时不生成报告
//! - **评分失败不致命**：单题失败只会变成 `Ungradable`

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::NaiveDateTime;
use tracing::info;

use crate::config::Config;
use crate::error::{AppResult, ConfigError};
use crate::infrastructure::{LanguageModel, OcrBackend, OpenAiModel, TesseractOcr};
use crate::orchestrator::batch_grader;
use crate::services::{
    FormattedReport, GradingEngine, QuestionSegmenter, ReportFormatter, ReportWriter,
    TextExtractor, ValidatedJudge,
};
use crate::utils::logging::{log_stage, print_final_stats};

const TOTAL_STAGES: usize = 4;

/// 一次评分运行的结果
#[derive(Debug, Clone)]
pub struct GradingOutcome {
    pub report: FormattedReport,
    pub report_path: PathBuf,
}

/// 评分流水线
pub struct GradingPipeline {
    config: Arc<Config>,
    extractor: TextExtractor,
    segmenter: QuestionSegmenter,
    engine: Arc<GradingEngine>,
    formatter: ReportFormatter,
    writer: ReportWriter,
}

impl GradingPipeline {
    /// 使用指定的 OCR 后端和语言模型组装流水线
    pub fn new(config: Config, ocr: Arc<dyn OcrBackend>, model: Arc<dyn LanguageModel>) -> Self {
        let judge = ValidatedJudge::new(model, config.request_timeout());

        Self {
            extractor: TextExtractor::new(ocr, &config),
            segmenter: QuestionSegmenter::new(judge.clone(), &config),
            engine: Arc::new(GradingEngine::new(judge, &config)),
            formatter: ReportFormatter::new(),
            writer: ReportWriter::new(config.output_dir.clone()),
            config: Arc::new(config),
        }
    }

    /// 使用 Tesseract 和 OpenAI 兼容接口组装流水线
    pub fn from_config(config: Config) -> Result<Self, ConfigError> {
        if config.llm_api_key.trim().is_empty() {
            return Err(ConfigError::MissingCredential);
        }

        let ocr = Arc::new(TesseractOcr::new(&config));
        let model = Arc::new(OpenAiModel::new(&config));
        Ok(Self::new(config, ocr, model))
    }

    /// 提取、切分、评分并格式化，不写文件
    pub async fn grade_image(
        &self,
        image_path: &Path,
        generated_at: NaiveDateTime,
    ) -> AppResult<FormattedReport> {
        log_stage(1, TOTAL_STAGES, "文字识别");
        let raw = self.extractor.extract(image_path).await?;

        log_stage(2, TOTAL_STAGES, "题目切分");
        let pairs = self.segmenter.segment(&raw).await?;
        info!("✓ 共切分出 {} 道题目", pairs.len());

        log_stage(3, TOTAL_STAGES, "逐题评分");
        let records = batch_grader::grade_all(
            self.engine.clone(),
            pairs,
            self.config.max_concurrent_grading,
        )
        .await;

        log_stage(4, TOTAL_STAGES, "生成报告");
        Ok(self.formatter.format(records, generated_at))
    }

    /// 运行完整流水线并写入报告
    ///
    /// # 参数
    /// - `image_path`: 作业图片
    /// - `output`: 报告路径，为空时写入 `output_dir` 下带时间戳的文件
    pub async fn run(&self, image_path: &Path, output: Option<&Path>) -> AppResult<GradingOutcome> {
        let generated_at = chrono::Local::now().naive_local();

        let report = self.grade_image(image_path, generated_at).await?;
        let report_path = self.writer.write(&report.text, output, generated_at).await?;

        print_final_stats(&report.summary, &report_path);

        Ok(GradingOutcome {
            report,
            report_path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_requires_api_key() {
        let config = Config {
            llm_api_key: "  ".to_string(),
            ..Config::default()
        };

        assert!(matches!(
            GradingPipeline::from_config(config),
            Err(ConfigError::MissingCredential)
        ));
    }
}
