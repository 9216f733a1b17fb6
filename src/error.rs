use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// 应用程序错误类型
///
/// 只有流水线前两阶段（文字提取、题目切分）以及配置/报告写入会产生致命错误；
/// 单题评分失败在评分引擎内部被降级为 `Ungradable` 记录，不会出现在这里。
#[derive(Debug, Error)]
pub enum AppError {
    /// 文字提取错误
    #[error("文字提取错误: {0}")]
    Extraction(#[from] ExtractionError),
    /// 题目切分错误
    #[error("题目切分错误: {0}")]
    Segmentation(#[from] SegmentationError),
    /// LLM 服务错误
    #[error("LLM错误: {0}")]
    Llm(#[from] LlmError),
    /// 配置错误
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),
    /// 报告输出错误
    #[error("报告错误: {0}")]
    Report(#[from] ReportError),
}

/// 文字提取（OCR）错误
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// 图片文件不存在
    #[error("图片文件不存在: {}", .path.display())]
    NotFound { path: PathBuf },
    /// 读取图片失败
    #[error("读取图片失败 ({}): {source}", .path.display())]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// 不支持的图片格式
    #[error("不支持的图片格式 ({}): {}", .path.display(), .format.as_deref().unwrap_or("未知"))]
    UnsupportedFormat {
        path: PathBuf,
        format: Option<String>,
    },
    /// 图片无法解码
    #[error("图片无法解码 ({}): {message}", .path.display())]
    Undecodable { path: PathBuf, message: String },
    /// OCR 引擎执行失败
    #[error("OCR 引擎执行失败 ({}): {message}", .path.display())]
    Backend { path: PathBuf, message: String },
    /// OCR 引擎超时
    #[error("OCR 引擎超时 ({}), 超过 {}秒", .path.display(), .timeout.as_secs())]
    Timeout { path: PathBuf, timeout: Duration },
}

/// 题目切分错误
#[derive(Debug, Error)]
pub enum SegmentationError {
    /// 重试耗尽后模型仍未返回合法结构
    #[error("题目切分失败，已尝试 {attempts} 次: {last_error}")]
    ExhaustedRetries {
        attempts: u32,
        #[source]
        last_error: LlmError,
    },
    /// 遇到不可重试的错误
    #[error("题目切分被拒绝: {0}")]
    Rejected(#[source] LlmError),
}

/// LLM 服务错误
#[derive(Debug, Clone, Error)]
pub enum LlmError {
    /// API 调用失败
    #[error("LLM API调用失败 (模型: {model}): {message}")]
    ApiCallFailed {
        model: String,
        message: String,
        transient: bool,
    },
    /// 请求频率限制
    #[error("LLM API请求频率限制 (模型: {model})")]
    RateLimited { model: String },
    /// 请求超时
    #[error("LLM 请求超时, 超过 {}秒", .timeout.as_secs())]
    Timeout { timeout: Duration },
    /// 返回内容为空
    #[error("LLM返回内容为空 (模型: {model})")]
    EmptyContent { model: String },
    /// JSON 解析失败
    #[error("无法解析LLM返回的JSON ({message}): {response}")]
    MalformedJson { message: String, response: String },
    /// 结构不符合约定
    #[error("LLM返回的结构不合法: {reason}")]
    SchemaViolation { reason: String },
}

impl LlmError {
    /// 是否属于可以重试的瞬时故障
    pub fn is_transient(&self) -> bool {
        match self {
            LlmError::ApiCallFailed { transient, .. } => *transient,
            LlmError::RateLimited { .. }
            | LlmError::Timeout { .. }
            | LlmError::EmptyContent { .. }
            | LlmError::MalformedJson { .. }
            | LlmError::SchemaViolation { .. } => true,
        }
    }

    pub fn schema(reason: impl Into<String>) -> Self {
        LlmError::SchemaViolation {
            reason: reason.into(),
        }
    }
}

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 读取配置文件失败
    #[error("读取配置文件失败 ({}): {source}", .path.display())]
    FileReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// TOML 解析失败
    #[error("TOML解析失败 ({}): {source}", .path.display())]
    TomlParseFailed {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    /// 环境变量解析失败
    #[error("环境变量 {var_name} 解析失败: 值 '{value}' 无法转换为 {expected_type}")]
    EnvVarParseFailed {
        var_name: String,
        value: String,
        expected_type: String,
    },
    /// 配置项取值不合法
    #[error("配置项 {field} 不合法: {reason}")]
    InvalidValue { field: String, reason: String },
    /// 缺少 API 密钥
    #[error("缺少 LLM API 密钥，请设置 LLM_API_KEY 或 OPENAI_API_KEY")]
    MissingCredential,
}

/// 报告输出错误
#[derive(Debug, Error)]
pub enum ReportError {
    /// 写入报告失败
    #[error("写入报告失败 ({}): {source}", .path.display())]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

// ========== 便捷构造函数 ==========

impl ConfigError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

// ========== Result 类型别名 ==========

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;
