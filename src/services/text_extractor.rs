//! 文字提取服务 - 业务能力层
//!
//! 只负责"图片 → RawText"，失败立即返回，不重试。

use std::path::Path;
use std::sync::{Arc, OnceLock};

use image::{ImageFormat, ImageReader};
use regex::Regex;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::ExtractionError;
use crate::infrastructure::OcrBackend;
use crate::models::RawText;
use crate::utils::logging::truncate_text;

const SUPPORTED_FORMATS: [ImageFormat; 6] = [
    ImageFormat::Png,
    ImageFormat::Jpeg,
    ImageFormat::Tiff,
    ImageFormat::Bmp,
    ImageFormat::Gif,
    ImageFormat::WebP,
];

/// 文字提取服务
pub struct TextExtractor {
    backend: Arc<dyn OcrBackend>,
    min_confidence: f64,
}

impl TextExtractor {
    pub fn new(backend: Arc<dyn OcrBackend>, config: &Config) -> Self {
        Self {
            backend,
            min_confidence: config.min_ocr_confidence,
        }
    }

    /// 提取图片中的文字
    ///
    /// 文件不存在、无法读取、格式不支持或 OCR 失败时返回 `ExtractionError`。
    pub async fn extract(&self, image_path: &Path) -> Result<RawText, ExtractionError> {
        info!("📸 正在识别图片: {}", image_path.display());

        let metadata = match tokio::fs::metadata(image_path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ExtractionError::NotFound {
                    path: image_path.to_path_buf(),
                });
            }
            Err(source) => {
                return Err(ExtractionError::ReadFailed {
                    path: image_path.to_path_buf(),
                    source,
                });
            }
        };
        if !metadata.is_file() {
            return Err(ExtractionError::NotFound {
                path: image_path.to_path_buf(),
            });
        }

        let (format, (width, height)) = inspect_image(image_path)?;
        debug!("图片格式: {:?}, 尺寸: {}x{}", format, width, height);

        let output = self.backend.recognize(image_path).await?;
        let text = clean_extracted_text(&output.text);
        let raw = RawText::new(text, image_path, output.confidence);

        info!(
            "✓ 文字识别完成，共 {} 个字符，置信度 {:.2}",
            raw.text().chars().count(),
            raw.confidence()
        );
        debug!("识别内容预览: {}", truncate_text(raw.text(), 200));

        if raw.confidence() < self.min_confidence {
            warn!(
                "⚠️ OCR 置信度 {:.2} 低于阈值 {:.2}，评分结果可能不准确",
                raw.confidence(),
                self.min_confidence
            );
        }

        Ok(raw)
    }
}

/// 按文件内容判断图片格式并读取尺寸
fn inspect_image(path: &Path) -> Result<(ImageFormat, (u32, u32)), ExtractionError> {
    let read_failed = |source| ExtractionError::ReadFailed {
        path: path.to_path_buf(),
        source,
    };

    let reader = ImageReader::open(path)
        .map_err(read_failed)?
        .with_guessed_format()
        .map_err(read_failed)?;

    let format = match reader.format() {
        Some(format) if SUPPORTED_FORMATS.contains(&format) => format,
        other => {
            return Err(ExtractionError::UnsupportedFormat {
                path: path.to_path_buf(),
                format: other.map(|f| format!("{:?}", f)),
            });
        }
    };

    let dimensions = reader
        .into_dimensions()
        .map_err(|e| ExtractionError::Undecodable {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

    Ok((format, dimensions))
}

/// 清理 OCR 文本：合并多余空白，压缩连续空行
pub(crate) fn clean_extracted_text(raw_text: &str) -> String {
    static BLANK_LINES: OnceLock<Regex> = OnceLock::new();
    static INLINE_SPACES: OnceLock<Regex> = OnceLock::new();

    let blank_lines = BLANK_LINES.get_or_init(|| Regex::new(r"\n\s*\n").expect("合法的正则"));
    let inline_spaces = INLINE_SPACES.get_or_init(|| Regex::new(r"[ \t]+").expect("合法的正则"));

    let cleaned = blank_lines.replace_all(raw_text, "\n\n");
    let cleaned = inline_spaces.replace_all(&cleaned, " ");
    cleaned.trim().to_string()
}
