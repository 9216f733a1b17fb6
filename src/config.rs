use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

/// 程序配置
///
/// 启动时读取一次（默认值 → TOML 文件 → 环境变量），之后只读。
/// 各组件在构造时从这里拷贝自己需要的字段。
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    // --- LLM 配置 ---
    pub llm_api_key: String,
    pub llm_api_base_url: String,
    pub llm_model_name: String,
    pub llm_temperature: f32,
    /// 题目切分请求的最大输出 token 数
    pub segment_max_tokens: u32,
    /// 评分请求的最大输出 token 数
    pub grade_max_tokens: u32,
    /// 单次外部调用（LLM / OCR）的超时时间（秒）
    pub request_timeout_secs: u64,

    // --- 重试策略 ---
    /// 题目切分首轮之后的额外重试次数
    pub segment_max_retries: u32,
    /// 每道题最多评分尝试次数
    pub grade_max_attempts: u32,
    /// 指数退避的基础等待时间（毫秒）
    pub backoff_base_ms: u64,
    /// 指数退避的最大等待时间（毫秒）
    pub backoff_max_ms: u64,

    // --- 评分 ---
    /// 同时评分的题目数量
    pub max_concurrent_grading: usize,
    /// 未标注分值时每题的满分
    pub default_max_points: f64,
    /// 是否对简单算术题做二次校验
    pub arithmetic_check: bool,
    /// 是否先用规则切分题目，失败再交给 LLM
    pub pattern_prepass: bool,

    // --- OCR 配置 ---
    pub tesseract_cmd: String,
    pub ocr_language: String,
    /// 低于该置信度时输出警告
    pub min_ocr_confidence: f64,

    // --- 输出 ---
    /// 未指定输出路径时报告存放的目录
    pub output_dir: PathBuf,
    /// 是否显示详细日志
    pub verbose_logging: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            llm_api_key: String::new(),
            llm_api_base_url: "https://api.openai.com/v1".to_string(),
            llm_model_name: "gpt-4o-mini".to_string(),
            llm_temperature: 0.1,
            segment_max_tokens: 1500,
            grade_max_tokens: 800,
            request_timeout_secs: 60,
            segment_max_retries: 2,
            grade_max_attempts: 3,
            backoff_base_ms: 500,
            backoff_max_ms: 8_000,
            max_concurrent_grading: 4,
            default_max_points: 1.0,
            arithmetic_check: true,
            pattern_prepass: true,
            tesseract_cmd: "tesseract".to_string(),
            ocr_language: "eng".to_string(),
            min_ocr_confidence: 0.6,
            output_dir: PathBuf::from("."),
            verbose_logging: false,
        }
    }
}

impl Config {
    /// 加载配置：默认值 → TOML 文件（可选）→ 环境变量，最后校验
    pub fn load(config_file: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with(config_file, |_| {})
    }

    /// 同 `load`，但在校验之前应用命令行参数等最终覆盖
    pub fn load_with<F>(config_file: Option<&Path>, overrides: F) -> Result<Self, ConfigError>
    where
        F: FnOnce(&mut Self),
    {
        let mut config = match config_file {
            Some(path) => Self::from_toml_file(path)?,
            None => Self::default(),
        };
        config.apply_env()?;
        overrides(&mut config);
        config.validate()?;
        Ok(config)
    }

    /// 从 TOML 文件读取配置，未出现的字段使用默认值
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::FileReadFailed {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::TomlParseFailed {
            path: path.to_path_buf(),
            source,
        })
    }

    /// 使用环境变量覆盖配置
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Some(key) = env_string("LLM_API_KEY").or_else(|| env_string("OPENAI_API_KEY")) {
            self.llm_api_key = key;
        }
        if let Some(base) = env_string("LLM_API_BASE_URL") {
            self.llm_api_base_url = base;
        }
        if let Some(model) = env_string("LLM_MODEL_NAME") {
            self.llm_model_name = model;
        }
        if let Some(cmd) = env_string("TESSERACT_CMD") {
            self.tesseract_cmd = cmd;
        }
        if let Some(lang) = env_string("OCR_LANGUAGE") {
            self.ocr_language = lang;
        }
        if let Some(dir) = env_string("OUTPUT_DIR") {
            self.output_dir = PathBuf::from(dir);
        }
        override_parsed("MAX_CONCURRENT_GRADING", "usize", &mut self.max_concurrent_grading)?;
        override_parsed("GRADE_MAX_ATTEMPTS", "u32", &mut self.grade_max_attempts)?;
        override_parsed("SEGMENT_MAX_RETRIES", "u32", &mut self.segment_max_retries)?;
        override_parsed("REQUEST_TIMEOUT_SECS", "u64", &mut self.request_timeout_secs)?;
        override_parsed("DEFAULT_MAX_POINTS", "f64", &mut self.default_max_points)?;
        override_parsed("VERBOSE_LOGGING", "bool", &mut self.verbose_logging)?;
        Ok(())
    }

    /// 校验配置取值
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_grading == 0 {
            return Err(ConfigError::invalid("max_concurrent_grading", "必须至少为 1"));
        }
        if self.grade_max_attempts == 0 {
            return Err(ConfigError::invalid("grade_max_attempts", "必须至少为 1"));
        }
        if !(self.default_max_points.is_finite() && self.default_max_points > 0.0) {
            return Err(ConfigError::invalid("default_max_points", "必须是大于 0 的有限数"));
        }
        if !(0.0..=1.0).contains(&self.min_ocr_confidence) {
            return Err(ConfigError::invalid("min_ocr_confidence", "必须在 [0, 1] 之间"));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::invalid("request_timeout_secs", "必须至少为 1"));
        }
        if self.backoff_base_ms > self.backoff_max_ms {
            return Err(ConfigError::invalid("backoff_base_ms", "不能大于 backoff_max_ms"));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn override_parsed<T: FromStr>(
    var_name: &str,
    expected_type: &str,
    target: &mut T,
) -> Result<(), ConfigError> {
    if let Some(value) = env_string(var_name) {
        *target = value
            .trim()
            .parse()
            .map_err(|_| ConfigError::EnvVarParseFailed {
                var_name: var_name.to_string(),
                value,
                expected_type: expected_type.to_string(),
            })?;
    }
    Ok(())
}
