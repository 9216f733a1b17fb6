use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use homework_grader::infrastructure::TesseractOcr;
use homework_grader::services::TextExtractor;
use homework_grader::utils::logging;
use homework_grader::{Config, GradingPipeline};

/// 自动批改作业图片并生成评分报告
#[derive(Debug, Parser)]
#[command(name = "homework-grader", version, about)]
struct Args {
    /// 作业图片路径
    image: PathBuf,

    /// 报告输出路径（默认写入 output_dir 下带时间戳的文件）
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// TOML 配置文件
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 输出调试日志
    #[arg(short, long)]
    verbose: bool,

    /// 最大并发评分数
    #[arg(long)]
    concurrency: Option<usize>,

    /// 只做文字识别并打印结果
    #[arg(long)]
    extract_only: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 加载配置，命令行参数优先于配置文件和环境变量
    let config = Config::load_with(args.config.as_deref(), |config| {
        if let Some(concurrency) = args.concurrency {
            config.max_concurrent_grading = concurrency;
        }
    })
    .context("加载配置失败")?;

    // 初始化日志
    logging::init(args.verbose || config.verbose_logging);
    logging::log_startup(&args.image, &config);

    if args.extract_only {
        let extractor = TextExtractor::new(Arc::new(TesseractOcr::new(&config)), &config);
        let raw = extractor
            .extract(&args.image)
            .await
            .with_context(|| format!("文字识别失败: {}", args.image.display()))?;

        println!("{}", raw.text());
        println!("\nConfidence: {:.2}", raw.confidence());
        return Ok(());
    }

    let pipeline = GradingPipeline::from_config(config).context("初始化评分流水线失败")?;
    let outcome = pipeline
        .run(&args.image, args.output.as_deref())
        .await
        .with_context(|| format!("评分失败: {}", args.image.display()))?;

    info!("✅ 评分完成");
    println!("✅ 报告已保存至: {}", outcome.report_path.display());
    println!(
        "🎯 总分: {:.1}/{} ({:.1}%)",
        outcome.report.summary.total_points,
        outcome.report.summary.max_total_points,
        outcome.report.summary.percentage
    );

    Ok(())
}
