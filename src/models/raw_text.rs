use std::path::{Path, PathBuf};

/// OCR 输出的原始文本
///
/// 每次运行只产生一次，构造后不可修改。
#[derive(Debug, Clone, PartialEq)]
pub struct RawText {
    text: String,
    source: PathBuf,
    confidence: f64,
}

impl RawText {
    /// 置信度会被限制在 [0, 1]，NaN 视为 0
    pub fn new(text: impl Into<String>, source: impl Into<PathBuf>, confidence: f64) -> Self {
        let confidence = if confidence.is_nan() {
            0.0
        } else {
            confidence.clamp(0.0, 1.0)
        };
        Self {
            text: text.into(),
            source: source.into(),
            confidence,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    /// 是否没有任何可用内容
    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}
