//! 并发评分器 - 编排层
//!
//! ## 职责
//!
//! 把一组题目交给 `GradingEngine` 并发评分，并按题号重新排好顺序。
//!
//! ## 设计特点
//!
//! - **并发受限**：Semaphore 控制同时进行的评分请求数
//! - **故障隔离**：单个任务 panic 只影响该题，记录为 `Ungradable`
//! - **顺序稳定**：无论完成顺序如何，输出总是按题号排列

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::{error, info};

use crate::models::{GradingRecord, QuestionAnswerPair, Verdict};
use crate::services::GradingEngine;

/// 并发评分所有题目
///
/// # 参数
/// - `engine`: 评分引擎
/// - `pairs`: 切分好的题目
/// - `max_concurrent`: 最大并发数（至少为 1）
///
/// # 返回
/// 与输入一一对应、按题号排序的评分记录
pub async fn grade_all(
    engine: Arc<GradingEngine>,
    pairs: Vec<QuestionAnswerPair>,
    max_concurrent: usize,
) -> Vec<GradingRecord> {
    let total = pairs.len();
    if total == 0 {
        return Vec::new();
    }

    let max_concurrent = max_concurrent.max(1);
    info!("📋 共 {} 道题，最多同时评分 {} 道", total, max_concurrent);

    let semaphore = Arc::new(Semaphore::new(max_concurrent));
    let mut handles = Vec::with_capacity(total);

    for pair in pairs {
        let engine = engine.clone();
        let semaphore = semaphore.clone();
        let fallback = pair.clone();

        let handle = tokio::spawn(async move {
            // 信号量从不关闭，acquire 失败时直接评分
            let _permit = semaphore.acquire_owned().await.ok();
            engine.grade(pair).await
        });
        handles.push((fallback, handle));
    }

    let (fallbacks, handles): (Vec<_>, Vec<_>) = handles.into_iter().unzip();
    let results = join_all(handles).await;

    let mut records: Vec<GradingRecord> = fallbacks
        .into_iter()
        .zip(results)
        .map(|(pair, result)| match result {
            Ok(record) => record,
            Err(e) => {
                error!("[题目 {}] 评分任务执行失败: {}", pair.index, e);
                GradingRecord::ungradable(
                    &pair,
                    "Grading was interrupted by an internal error.",
                )
            }
        })
        .collect();

    records.sort_by_key(|record| record.index);

    let graded = records
        .iter()
        .filter(|record| record.verdict != Verdict::Ungradable)
        .count();
    info!("✓ 评分完成: 成功 {}/{}", graded, total);

    records
}
