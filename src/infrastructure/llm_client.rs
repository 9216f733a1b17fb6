//! LLM 客户端 - 基础设施层
//!
//! 只暴露"发送提示词、拿回文本"的能力，不做任何结构校验。
//! 校验与重试统一由 `services::ValidatedJudge` 负责。
//!
//! ## 技术栈
//! - 使用 `async-openai` crate 进行 API 调用
//! - 兼容 OpenAI API 的服务（自定义 API 端点和模型）

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::LlmError;

/// 发送给模型的提示词
#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
    pub max_tokens: u32,
}

impl Prompt {
    pub fn new(system: impl Into<String>, user: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            max_tokens,
        }
    }

    /// 在用户消息末尾追加更严格的格式要求，用于重试
    pub fn reinforced(&self, note: &str) -> Self {
        Self {
            user: format!("{}\n\n{}", self.user, note),
            ..self.clone()
        }
    }
}

/// 语言模型能力
///
/// 返回的文本不保证符合任何结构，调用方必须自行校验。
#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn model_name(&self) -> &str;

    async fn invoke(&self, prompt: &Prompt) -> Result<String, LlmError>;
}

/// 基于 OpenAI 兼容接口的语言模型
pub struct OpenAiModel {
    client: Client<OpenAIConfig>,
    model_name: String,
    temperature: f32,
}

impl OpenAiModel {
    /// 创建新的模型客户端
    pub fn new(config: &Config) -> Self {
        // 配置 OpenAI 客户端（兼容 OpenAI API 的服务）
        let openai_config = OpenAIConfig::new()
            .with_api_key(&config.llm_api_key)
            .with_api_base(&config.llm_api_base_url);

        Self {
            client: Client::with_config(openai_config),
            model_name: config.llm_model_name.clone(),
            temperature: config.llm_temperature,
        }
    }

    fn build_request_error(&self, err: OpenAIError) -> LlmError {
        LlmError::ApiCallFailed {
            model: self.model_name.clone(),
            message: format!("构建请求失败: {}", err),
            transient: false,
        }
    }

    /// 将 SDK 错误归类为可重试 / 不可重试
    fn classify(&self, err: OpenAIError) -> LlmError {
        match err {
            OpenAIError::ApiError(api) => {
                let code = api.code.clone().unwrap_or_default();
                let kind = api.r#type.clone().unwrap_or_default();

                if code.contains("rate_limit") || kind.contains("rate_limit") {
                    return LlmError::RateLimited {
                        model: self.model_name.clone(),
                    };
                }

                let fatal = matches!(
                    kind.as_str(),
                    "invalid_request_error"
                        | "authentication_error"
                        | "permission_error"
                        | "insufficient_quota"
                ) || code == "invalid_api_key";

                LlmError::ApiCallFailed {
                    model: self.model_name.clone(),
                    message: api.message,
                    transient: !fatal,
                }
            }
            // 网络错误、响应反序列化失败等都按瞬时故障处理
            other => LlmError::ApiCallFailed {
                model: self.model_name.clone(),
                message: other.to_string(),
                transient: true,
            },
        }
    }
}

#[async_trait]
impl LanguageModel for OpenAiModel {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn invoke(&self, prompt: &Prompt) -> Result<String, LlmError> {
        debug!("调用 LLM API，模型: {}", self.model_name);
        debug!("用户消息长度: {} 字符", prompt.user.len());

        let system_msg = ChatCompletionRequestSystemMessageArgs::default()
            .content(prompt.system.as_str())
            .build()
            .map_err(|e| self.build_request_error(e))?;
        let user_msg = ChatCompletionRequestUserMessageArgs::default()
            .content(prompt.user.as_str())
            .build()
            .map_err(|e| self.build_request_error(e))?;

        let messages = vec![
            ChatCompletionRequestMessage::System(system_msg),
            ChatCompletionRequestMessage::User(user_msg),
        ];

        // 构建请求
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model_name)
            .messages(messages)
            .temperature(self.temperature)
            .max_tokens(prompt.max_tokens)
            .build()
            .map_err(|e| self.build_request_error(e))?;

        // 调用 API
        let response = self.client.chat().create(request).await.map_err(|e| {
            warn!("LLM API 调用失败: {}", e);
            self.classify(e)
        })?;

        debug!("LLM API 调用成功");

        // 提取响应内容
        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| LlmError::EmptyContent {
                model: self.model_name.clone(),
            })?;

        Ok(content.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reinforced_prompt_keeps_original_text() {
        let prompt = Prompt::new("system", "grade this", 800);
        let stricter = prompt.reinforced("Return ONLY JSON.");

        assert_eq!(stricter.system, "system");
        assert!(stricter.user.starts_with("grade this"));
        assert!(stricter.user.ends_with("Return ONLY JSON."));
        assert_eq!(stricter.max_tokens, 800);
    }

    /// 测试真实 LLM 调用
    ///
    /// 运行方式：
    /// ```bash
    /// LLM_API_KEY=... cargo test test_invoke_live -- --ignored --nocapture
    /// ```
    #[tokio::test]
    #[ignore]
    async fn test_invoke_live() {
        let _ = tracing_subscriber::fmt::try_init();

        let config = Config::load(None).expect("配置加载失败");
        let model = OpenAiModel::new(&config);
        let prompt = Prompt::new(
            "You are a concise assistant.",
            "Reply with the single word: ready",
            16,
        );

        let response = model.invoke(&prompt).await.expect("LLM 调用失败");
        println!("LLM 响应: {}", response);
        assert!(!response.is_empty());
    }
}
