//! OCR 引擎 - 基础设施层
//!
//! 只负责"图片 → 文字 + 置信度"，不做文本清洗和格式校验。

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::config::Config;
use crate::error::ExtractionError;

/// OCR 识别结果
#[derive(Debug, Clone, PartialEq)]
pub struct OcrOutput {
    pub text: String,
    /// 0~1 之间的平均置信度
    pub confidence: f64,
}

/// OCR 能力
#[async_trait]
pub trait OcrBackend: Send + Sync {
    async fn recognize(&self, image_path: &Path) -> Result<OcrOutput, ExtractionError>;
}

/// 调用本地 `tesseract` 命令行的 OCR 引擎
pub struct TesseractOcr {
    command: PathBuf,
    language: String,
    timeout: Duration,
}

impl TesseractOcr {
    pub fn new(config: &Config) -> Self {
        Self {
            command: PathBuf::from(&config.tesseract_cmd),
            language: config.ocr_language.clone(),
            timeout: config.request_timeout(),
        }
    }
}

#[async_trait]
impl OcrBackend for TesseractOcr {
    async fn recognize(&self, image_path: &Path) -> Result<OcrOutput, ExtractionError> {
        debug!(
            "调用 tesseract: {} (语言: {})",
            image_path.display(),
            self.language
        );

        // --oem 3: 默认引擎; --psm 6: 视为单一文本块
        let child = Command::new(&self.command)
            .arg(image_path)
            .arg("stdout")
            .args(["--oem", "3", "--psm", "6", "-l", &self.language, "tsv"])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, child)
            .await
            .map_err(|_| ExtractionError::Timeout {
                path: image_path.to_path_buf(),
                timeout: self.timeout,
            })?
            .map_err(|e| ExtractionError::Backend {
                path: image_path.to_path_buf(),
                message: format!("无法启动 {}: {}", self.command.display(), e),
            })?;

        if !output.status.success() {
            return Err(ExtractionError::Backend {
                path: image_path.to_path_buf(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let tsv = String::from_utf8_lossy(&output.stdout);
        Ok(parse_tsv(&tsv))
    }
}

/// 解析 tesseract 的 TSV 输出
///
/// 列: level page_num block_num par_num line_num word_num left top width height conf text
/// 同一行的单词用空格连接，段落之间空一行；置信度取所有有效单词的平均值。
pub(crate) fn parse_tsv(tsv: &str) -> OcrOutput {
    let mut lines: Vec<String> = Vec::new();
    let mut current_line = String::new();
    let mut current_key: Option<(u32, u32, u32)> = None;
    let mut current_par: Option<(u32, u32)> = None;
    let mut conf_sum = 0.0;
    let mut word_count = 0usize;

    for row in tsv.lines().skip(1) {
        let cols: Vec<&str> = row.split('\t').collect();
        if cols.len() < 12 {
            continue;
        }
        // level 5 = word
        if cols[0] != "5" {
            continue;
        }
        let word = cols[11].trim();
        if word.is_empty() {
            continue;
        }
        let block: u32 = cols[2].parse().unwrap_or(0);
        let par: u32 = cols[3].parse().unwrap_or(0);
        let line: u32 = cols[4].parse().unwrap_or(0);
        let conf: f64 = cols[10].parse().unwrap_or(-1.0);

        if current_key != Some((block, par, line)) {
            if !current_line.is_empty() {
                lines.push(std::mem::take(&mut current_line));
            }
            if current_par.is_some() && current_par != Some((block, par)) {
                lines.push(String::new());
            }
            current_key = Some((block, par, line));
            current_par = Some((block, par));
        }

        if !current_line.is_empty() {
            current_line.push(' ');
        }
        current_line.push_str(word);

        if conf >= 0.0 {
            conf_sum += conf;
            word_count += 1;
        }
    }
    if !current_line.is_empty() {
        lines.push(current_line);
    }

    let confidence = if word_count > 0 {
        (conf_sum / word_count as f64 / 100.0).clamp(0.0, 1.0)
    } else {
        0.0
    };

    OcrOutput {
        text: lines.join("\n"),
        confidence,
    }
}
