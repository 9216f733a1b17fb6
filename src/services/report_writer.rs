//! 报告写入

use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use tracing::info;

use crate::error::ReportError;

/// 报告写入器
#[derive(Debug, Clone)]
pub struct ReportWriter {
    output_dir: PathBuf,
}

impl ReportWriter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    /// 未指定输出路径时使用的文件名: `grading_results_<YYYYmmdd_HHMMSS>.txt`
    pub fn default_path(&self, generated_at: NaiveDateTime) -> PathBuf {
        self.output_dir.join(format!(
            "grading_results_{}.txt",
            generated_at.format("%Y%m%d_%H%M%S")
        ))
    }

    /// 写入报告，必要时创建父目录，返回实际写入的路径
    pub async fn write(
        &self,
        text: &str,
        output: Option<&Path>,
        generated_at: NaiveDateTime,
    ) -> Result<PathBuf, ReportError> {
        let path = match output {
            Some(path) => path.to_path_buf(),
            None => self.default_path(generated_at),
        };

        let write_failed = |source| ReportError::WriteFailed {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(write_failed)?;
        }
        tokio::fs::write(&path, text).await.map_err(write_failed)?;

        info!("💾 报告已保存至: {}", path.display());
        Ok(path)
    }
}
