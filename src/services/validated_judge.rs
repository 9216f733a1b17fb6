//! 校验型 LLM 调用 - 业务能力层
//!
//! 把不可信的 `LanguageModel` 包装成"要么返回合法结构，要么明确失败"的调用。
//! 题目切分和评分共用这一层：超时、结构校验、指数退避重试都在这里完成，
//! 调用方只需提供把文本转换为目标类型的校验函数。

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::error::LlmError;
use crate::infrastructure::{LanguageModel, Prompt};
use crate::utils::logging::truncate_text;

/// 重试策略
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// 总尝试次数（包含第一次）
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff_base: Duration, backoff_max: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff_base,
            backoff_max,
        }
    }

    /// 第 `attempt` 次（从 1 开始）失败后的等待时间: base * 2^(attempt-1)，不超过 max
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.backoff_base
            .saturating_mul(1u32 << exponent)
            .min(self.backoff_max)
    }
}

/// 重试耗尽或遇到不可重试错误
#[derive(Debug, Clone)]
pub struct JudgeFailure {
    pub attempts: u32,
    pub last_error: LlmError,
}

/// 带校验与重试的 LLM 调用器
#[derive(Clone)]
pub struct ValidatedJudge {
    model: Arc<dyn LanguageModel>,
    timeout: Duration,
}

impl ValidatedJudge {
    pub fn new(model: Arc<dyn LanguageModel>, timeout: Duration) -> Self {
        Self { model, timeout }
    }

    pub fn model_name(&self) -> &str {
        self.model.model_name()
    }

    /// 调用模型并校验结果
    ///
    /// # 参数
    /// - `task`: 日志中显示的任务名
    /// - `prompt`: 初始提示词；格式错误后的重试会追加更严格的要求
    /// - `policy`: 重试策略
    /// - `validate`: 把模型输出转换为目标类型，不合法时返回 `LlmError`
    pub async fn request<T, F>(
        &self,
        task: &str,
        prompt: &Prompt,
        policy: &RetryPolicy,
        validate: F,
    ) -> Result<T, JudgeFailure>
    where
        F: Fn(&str) -> Result<T, LlmError>,
    {
        let mut current = prompt.clone();
        let mut attempt = 0;

        loop {
            attempt += 1;
            debug!("{} - 第 {}/{} 次调用", task, attempt, policy.max_attempts);

            let outcome = match tokio::time::timeout(self.timeout, self.model.invoke(&current)).await
            {
                Ok(Ok(text)) => validate(&text),
                Ok(Err(e)) => Err(e),
                Err(_) => Err(LlmError::Timeout {
                    timeout: self.timeout,
                }),
            };

            let error = match outcome {
                Ok(value) => {
                    if attempt > 1 {
                        info!("{} - 第 {} 次尝试成功", task, attempt);
                    }
                    return Ok(value);
                }
                Err(e) => e,
            };

            if !error.is_transient() {
                warn!("{} - 不可重试的错误: {}", task, error);
                return Err(JudgeFailure {
                    attempts: attempt,
                    last_error: error,
                });
            }
            if attempt >= policy.max_attempts {
                warn!("{} - 已重试 {} 次仍失败: {}", task, attempt, error);
                return Err(JudgeFailure {
                    attempts: attempt,
                    last_error: error,
                });
            }

            let delay = policy.delay_for(attempt);
            warn!(
                "{} - 尝试 {}/{} 失败: {}，{}ms 后重试...",
                task,
                attempt,
                policy.max_attempts,
                error,
                delay.as_millis()
            );

            if matches!(
                error,
                LlmError::MalformedJson { .. } | LlmError::SchemaViolation { .. }
            ) {
                current = prompt.reinforced(&strict_format_note(&error));
            }

            sleep(delay).await;
        }
    }
}

fn strict_format_note(error: &LlmError) -> String {
    format!(
        "IMPORTANT: your previous reply was rejected because it did not match the required format ({}). \
         Reply with ONLY the JSON value described above: no prose, no markdown, no code fences.",
        error
    )
}

/// 从模型输出中取出 JSON 并反序列化
///
/// 允许输出被 ```json 代码块包裹或前后带有说明文字。
/// 语法错误返回 `MalformedJson`，结构不符返回 `SchemaViolation`。
pub fn parse_json<T: DeserializeOwned>(response: &str) -> Result<T, LlmError> {
    let payload = extract_json_payload(response);
    let value: JsonValue =
        serde_json::from_str(payload).map_err(|e| LlmError::MalformedJson {
            message: e.to_string(),
            response: truncate_text(response, 200),
        })?;
    serde_json::from_value(value).map_err(|e| LlmError::schema(e.to_string()))
}

fn extract_json_payload(response: &str) -> &str {
    let trimmed = response.trim();
    let start = trimmed.find(['{', '[']);
    let end = trimmed.rfind(['}', ']']);
    match (start, end) {
        (Some(start), Some(end)) if start < end => &trimmed[start..=end],
        _ => trimmed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde::Deserialize;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// 按顺序返回预设结果的模型
    struct ScriptedModel {
        replies: Mutex<VecDeque<Result<String, LlmError>>>,
        prompts: Mutex<Vec<Prompt>>,
    }

    impl ScriptedModel {
        fn new(replies: Vec<Result<&str, LlmError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(
                    replies
                        .into_iter()
                        .map(|r| r.map(str::to_string))
                        .collect(),
                ),
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl LanguageModel for ScriptedModel {
        fn model_name(&self) -> &str {
            "scripted"
        }

        async fn invoke(&self, prompt: &Prompt) -> Result<String, LlmError> {
            self.prompts.lock().unwrap().push(prompt.clone());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(LlmError::schema("no scripted reply left")))
        }
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Answer {
        value: u32,
    }

    fn policy(attempts: u32) -> RetryPolicy {
        RetryPolicy::new(attempts, Duration::ZERO, Duration::ZERO)
    }

    #[test]
    fn test_backoff_is_exponential_and_capped() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100), Duration::from_millis(350));
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(350));
        assert_eq!(policy.delay_for(30), Duration::from_millis(350));
    }

    #[test]
    fn test_parse_json_strips_fences_and_prose() {
        let answer: Answer = parse_json("Sure!\n```json\n{\"value\": 7}\n```").unwrap();
        assert_eq!(answer, Answer { value: 7 });

        let err = parse_json::<Answer>("not json at all").unwrap_err();
        assert!(matches!(err, LlmError::MalformedJson { .. }));

        let err = parse_json::<Answer>("{\"value\": \"seven\"}").unwrap_err();
        assert!(matches!(err, LlmError::SchemaViolation { .. }));
    }

    #[tokio::test]
    async fn test_retries_malformed_output_with_stricter_prompt() {
        let model = ScriptedModel::new(vec![Ok("I think it is 7"), Ok("{\"value\": 7}")]);
        let judge = ValidatedJudge::new(model.clone(), Duration::from_secs(5));
        let prompt = Prompt::new("sys", "give me json", 100);

        let answer = judge
            .request("测试", &prompt, &policy(3), parse_json::<Answer>)
            .await
            .unwrap();

        assert_eq!(answer, Answer { value: 7 });
        let prompts = model.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 2);
        assert_eq!(prompts[0].user, "give me json");
        assert!(prompts[1].user.contains("IMPORTANT"));
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let model = ScriptedModel::new(vec![Ok("nope"), Ok("still nope"), Ok("never")]);
        let judge = ValidatedJudge::new(model.clone(), Duration::from_secs(5));
        let prompt = Prompt::new("sys", "give me json", 100);

        let failure = judge
            .request("测试", &prompt, &policy(2), parse_json::<Answer>)
            .await
            .unwrap_err();

        assert_eq!(failure.attempts, 2);
        assert!(matches!(failure.last_error, LlmError::MalformedJson { .. }));
        assert_eq!(model.prompts.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_non_transient_error_stops_immediately() {
        let model = ScriptedModel::new(vec![Err(LlmError::ApiCallFailed {
            model: "scripted".to_string(),
            message: "invalid api key".to_string(),
            transient: false,
        })]);
        let judge = ValidatedJudge::new(model.clone(), Duration::from_secs(5));
        let prompt = Prompt::new("sys", "give me json", 100);

        let failure = judge
            .request("测试", &prompt, &policy(3), parse_json::<Answer>)
            .await
            .unwrap_err();

        assert_eq!(failure.attempts, 1);
        assert_eq!(model.prompts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rate_limit_is_retried_without_rewording() {
        let model = ScriptedModel::new(vec![
            Err(LlmError::RateLimited {
                model: "scripted".to_string(),
            }),
            Ok("{\"value\": 1}"),
        ]);
        let judge = ValidatedJudge::new(model.clone(), Duration::from_secs(5));
        let prompt = Prompt::new("sys", "give me json", 100);

        let answer = judge
            .request("测试", &prompt, &policy(3), parse_json::<Answer>)
            .await
            .unwrap();

        assert_eq!(answer.value, 1);
        let prompts = model.prompts.lock().unwrap();
        assert_eq!(prompts[1].user, "give me json");
    }

    struct SlowModel;

    #[async_trait]
    impl LanguageModel for SlowModel {
        fn model_name(&self) -> &str {
            "slow"
        }

        async fn invoke(&self, _prompt: &Prompt) -> Result<String, LlmError> {
            sleep(Duration::from_secs(5)).await;
            Ok("{\"value\": 1}".to_string())
        }
    }

    #[tokio::test]
    async fn test_timeout_counts_as_transient_failure() {
        let judge = ValidatedJudge::new(Arc::new(SlowModel), Duration::from_millis(20));
        let prompt = Prompt::new("sys", "give me json", 100);

        let failure = judge
            .request("测试", &prompt, &policy(2), parse_json::<Answer>)
            .await
            .unwrap_err();

        assert_eq!(failure.attempts, 2);
        assert!(matches!(failure.last_error, LlmError::Timeout { .. }));
    }
}
