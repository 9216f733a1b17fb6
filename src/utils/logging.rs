//! 日志工具模块
//!
//! 提供日志初始化、格式化和输出的辅助函数
use std::path::Path;

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::models::ReportSummary;

/// 初始化日志
///
/// 优先使用 `RUST_LOG`，否则默认 `homework_grader=info`（`verbose` 时为 debug）。
/// 重复调用时忽略，方便测试中多次初始化。
pub fn init(verbose: bool) {
    let default_directive = if verbose {
        "homework_grader=debug,info"
    } else {
        "homework_grader=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .compact(),
        )
        .try_init();
}

/// 记录程序启动信息
///
/// # 参数
/// - `image_path`: 待评分的图片
/// - `config`: 配置
pub fn log_startup(image_path: &Path, config: &Config) {
    info!("{}", "=".repeat(60));
    info!("🚀 程序启动 - 作业自动评分");
    info!("🖼️ 图片: {}", image_path.display());
    info!("🤖 模型: {}", config.llm_model_name);
    info!("📊 最大并发数: {}", config.max_concurrent_grading);
    info!("{}", "=".repeat(60));
}

/// 记录阶段开始信息
///
/// # 参数
/// - `step`: 阶段编号
/// - `total`: 阶段总数
/// - `title`: 阶段名称
pub fn log_stage(step: usize, total: usize, title: &str) {
    info!("\n{}", "─".repeat(60));
    info!("📦 第 {}/{} 步: {}", step, total, title);
    info!("{}", "─".repeat(60));
}

/// 打印最终统计信息
///
/// # 参数
/// - `summary`: 报告摘要
/// - `report_path`: 报告文件路径
pub fn print_final_stats(summary: &ReportSummary, report_path: &Path) {
    let verdicts = &summary.verdicts;
    info!("\n{}", "=".repeat(60));
    info!("📊 评分完成统计");
    info!(
        "完成时间: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("{}", "=".repeat(60));
    info!(
        "🎯 总分: {:.1}/{} ({:.1}%)",
        summary.total_points, summary.max_total_points, summary.percentage
    );
    info!("✅ 正确: {}", verdicts.correct);
    info!("🟡 部分正确: {}", verdicts.partially_correct);
    info!("❌ 错误: {}", verdicts.incorrect);
    info!("⚠️ 无法评分: {}", verdicts.ungradable);
    info!("{}", "=".repeat(60));
    info!("\n报告已保存至: {}", report_path.display());
}

/// 截断长文本用于日志显示
///
/// # 参数
/// - `text`: 原始文本
/// - `max_len`: 最大长度
///
/// # 返回
/// 返回截断后的文本
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}
