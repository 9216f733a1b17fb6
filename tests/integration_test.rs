use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use homework_grader::error::{ExtractionError, LlmError};
use homework_grader::infrastructure::{LanguageModel, OcrBackend, OcrOutput, Prompt};
use homework_grader::services::TextExtractor;
use homework_grader::{AppError, Config, GradingPipeline};
use tokio_test::{assert_err, assert_ok};

/// 固定返回一段文本的 OCR
struct FixedOcr {
    text: String,
}

#[async_trait]
impl OcrBackend for FixedOcr {
    async fn recognize(&self, _image_path: &Path) -> Result<OcrOutput, ExtractionError> {
        Ok(OcrOutput {
            text: self.text.clone(),
            confidence: 0.93,
        })
    }
}

/// 按提示词类型返回预设回复的模型
struct RoutingModel {
    segmentation_reply: String,
    grade: fn(&str) -> String,
    calls: AtomicUsize,
}

impl RoutingModel {
    fn new(segmentation_reply: &str, grade: fn(&str) -> String) -> Arc<Self> {
        Arc::new(Self {
            segmentation_reply: segmentation_reply.to_string(),
            grade,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LanguageModel for RoutingModel {
    fn model_name(&self) -> &str {
        "routing-fake"
    }

    async fn invoke(&self, prompt: &Prompt) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if prompt.user.starts_with("Split the following homework text") {
            return Ok(self.segmentation_reply.clone());
        }
        let question = prompt
            .user
            .lines()
            .find_map(|line| line.strip_prefix("QUESTION: "))
            .unwrap_or_default();
        Ok((self.grade)(question))
    }
}

fn always_correct(_question: &str) -> String {
    r#"{"verdict": "Correct", "points_awarded": 1, "feedback": "Well done"}"#.to_string()
}

fn always_garbage(_question: &str) -> String {
    "I would rather not say.".to_string()
}

fn test_config(output_dir: &Path) -> Config {
    Config {
        backoff_base_ms: 0,
        backoff_max_ms: 0,
        grade_max_attempts: 2,
        output_dir: output_dir.to_path_buf(),
        ..Config::default()
    }
}

fn write_image(dir: &Path) -> PathBuf {
    let path = dir.join("homework.png");
    image::RgbImage::new(16, 16).save(&path).unwrap();
    path
}

fn pipeline(config: Config, ocr_text: &str, model: Arc<RoutingModel>) -> GradingPipeline {
    let ocr = Arc::new(FixedOcr {
        text: ocr_text.to_string(),
    });
    GradingPipeline::new(config, ocr, model)
}

#[tokio::test]
async fn test_grades_two_questions_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let image = write_image(dir.path());
    let output = dir.path().join("out").join("report.txt");
    // 模型把 3+3=7 判为正确，算术校验会纠正
    let model = RoutingModel::new("[]", always_correct);
    let pipeline = pipeline(
        test_config(dir.path()),
        "1) 2+2=? Answer: 4\n2) 3+3=? Answer: 7",
        model.clone(),
    );

    let outcome = assert_ok!(pipeline.run(&image, Some(&output)).await);

    assert_eq!(outcome.report_path, output);
    assert_eq!(model.calls(), 2);

    let text = std::fs::read_to_string(&output).unwrap();
    assert_eq!(text, outcome.report.text);
    assert!(text.contains("Total Questions: 2"));
    assert!(text.contains("Overall Score: 1.0/2 (50.0%)"));

    let q1 = text.find("Q1: 2+2=?").unwrap();
    let q2 = text.find("Q2: 3+3=?").unwrap();
    assert!(q1 < q2);
    assert!(text[q2..].contains("Status: Incorrect"));
    assert!(text[q2..].contains("Correct Answer: 6"));
    assert_eq!(outcome.report.summary.verdicts.correct, 1);
    assert_eq!(outcome.report.summary.verdicts.incorrect, 1);
}

#[tokio::test]
async fn test_blank_page_produces_empty_report() {
    let dir = tempfile::tempdir().unwrap();
    let image = write_image(dir.path());
    let model = RoutingModel::new("[]", always_correct);
    let pipeline = pipeline(test_config(dir.path()), "   ", model.clone());

    let outcome = assert_ok!(pipeline.run(&image, None).await);

    assert_eq!(model.calls(), 0);
    assert_eq!(outcome.report_path.parent(), Some(dir.path()));
    let file_name = outcome.report_path.file_name().unwrap().to_string_lossy().to_string();
    assert!(file_name.starts_with("grading_results_"));
    assert!(file_name.ends_with(".txt"));
    assert!(outcome.report.text.contains("Total Questions: 0"));
    assert!(outcome.report.text.contains("(0.0%)"));
}

#[tokio::test]
async fn test_grading_failures_still_produce_report() {
    let dir = tempfile::tempdir().unwrap();
    let image = write_image(dir.path());
    let output = dir.path().join("report.txt");
    let model = RoutingModel::new("[]", always_garbage);
    let pipeline = pipeline(
        test_config(dir.path()),
        "1) Name a noble gas Answer: Neon\n2) Name a metal Answer: Iron",
        model.clone(),
    );

    let outcome = assert_ok!(pipeline.run(&image, Some(&output)).await);

    // 每道题尝试 2 次
    assert_eq!(model.calls(), 4);
    assert_eq!(outcome.report.summary.verdicts.ungradable, 2);
    assert_eq!(outcome.report.summary.total_points, 0.0);
    let text = std::fs::read_to_string(&output).unwrap();
    assert_eq!(text.matches("Status: Ungradable").count(), 2);
}

#[tokio::test]
async fn test_model_segmentation_path() {
    let dir = tempfile::tempdir().unwrap();
    let image = write_image(dir.path());
    let model = RoutingModel::new(
        r#"{"questions": [
            {"question_text": "Name a prime number", "student_answer": "9", "max_points": 2},
            {"question_text": "What is the capital of France?", "student_answer": "Paris"}
        ]}"#,
        |question| {
            if question.contains("prime") {
                r#"{"verdict": "Incorrect", "points_awarded": 0, "correct_answer": "7"}"#.to_string()
            } else {
                r#"{"verdict": "Correct", "points_awarded": 1}"#.to_string()
            }
        },
    );
    let pipeline = pipeline(
        test_config(dir.path()),
        "What is the capital of France?\nParis\n\nName a prime number\n9",
        model.clone(),
    );

    let report = assert_ok!(pipeline.grade_image(&image, chrono::Local::now().naive_local()).await);

    // 1 次切分 + 2 次评分
    assert_eq!(model.calls(), 3);
    let records_start = report.text.find("Q1: What is the capital of France?").unwrap();
    let second = report.text.find("Q2: Name a prime number").unwrap();
    assert!(records_start < second);
    assert!(report.text.contains("Points: 0.0/2.0"));
    assert!(report.text.contains("Overall Score: 1.0/3 (33.3%)"));
}

#[tokio::test]
async fn test_missing_image_aborts_before_report() {
    let dir = tempfile::tempdir().unwrap();
    let model = RoutingModel::new("[]", always_correct);
    let pipeline = pipeline(test_config(dir.path()), "unused", model.clone());

    let err = assert_err!(pipeline.run(&dir.path().join("missing.png"), None).await);

    assert!(matches!(
        err,
        AppError::Extraction(ExtractionError::NotFound { .. })
    ));
    assert_eq!(model.calls(), 0);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_segmentation_failure_aborts_before_report() {
    let dir = tempfile::tempdir().unwrap();
    let image = write_image(dir.path());
    let model = RoutingModel::new("this is not json", always_correct);
    let pipeline = pipeline(test_config(dir.path()), "Describe the water cycle\nrain", model.clone());

    let err = assert_err!(pipeline.run(&image, None).await);

    assert!(matches!(err, AppError::Segmentation(_)));
    // 1 次初始调用 + 2 次重试
    assert_eq!(model.calls(), 3);
    // 只剩测试图片
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
}

#[tokio::test]
async fn test_extract_only() {
    let dir = tempfile::tempdir().unwrap();
    let image = write_image(dir.path());
    let ocr = Arc::new(FixedOcr {
        text: "Q1:  2+2=?   Answer: 4".to_string(),
    });
    // 与 --extract-only 相同：只用 TextExtractor，不需要语言模型
    let extractor = TextExtractor::new(ocr, &test_config(dir.path()));

    let raw = assert_ok!(extractor.extract(&image).await);

    assert_eq!(raw.text(), "Q1: 2+2=? Answer: 4");
    assert_eq!(raw.confidence(), 0.93);
}

#[tokio::test]
#[ignore] // 默认忽略，需要 tesseract 和 LLM_API_KEY：cargo test -- --ignored
async fn test_live_pipeline() {
    homework_grader::utils::logging::init(true);

    let config = Config::load(None).expect("加载配置失败");
    let image = PathBuf::from(std::env::var("HOMEWORK_IMAGE").expect("请设置 HOMEWORK_IMAGE"));
    let dir = tempfile::tempdir().unwrap();

    let pipeline = GradingPipeline::from_config(config).expect("缺少 API 密钥");
    let outcome = pipeline
        .run(&image, Some(&dir.path().join("report.txt")))
        .await
        .expect("评分失败");

    assert!(outcome.report.text.contains("HOMEWORK GRADING REPORT"));
    assert!(outcome.report.summary.verdicts.correct <= outcome.report.summary.question_count);
}
