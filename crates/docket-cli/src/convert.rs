//! Conversion handlers used by the CLI.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Local;
use docket_core::{HandlerError, Task, TaskHandler};
use serde::Deserialize;
use serde_json::{Value, json};

pub const FILE_TASK: &str = "file";
pub const URL_TASK: &str = "url";

const MARKDOWN_EXTENSIONS: &[&str] = &["md", "markdown"];

#[derive(Debug, Deserialize)]
struct FilePayload {
    source_path: PathBuf,
    #[serde(default)]
    filename: Option<String>,
    output_dir: PathBuf,
}

#[derive(Debug, Deserialize)]
struct UrlPayload {
    url: String,
}

/// Build the task for one command-line source.
pub fn task_for(source: &str, folder: &str, output_dir: &Path) -> Task {
    if source.starts_with("http://") || source.starts_with("https://") {
        return Task::new(
            URL_TASK,
            source,
            json!({ "source_type": "url", "url": source, "folder": folder }),
        );
    }

    let filename = Path::new(source)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| source.to_string());
    Task::new(
        FILE_TASK,
        filename.clone(),
        json!({
            "source_type": "file",
            "source_path": source,
            "filename": filename,
            "folder": folder,
            "output_dir": output_dir.to_string_lossy(),
        }),
    )
}

/// Reads a local file and writes it out as `<stem>.<YYYYMMDD>.md`.
pub struct FileHandler;

#[async_trait]
impl TaskHandler for FileHandler {
    async fn handle(&self, task: Task) -> Result<Value, HandlerError> {
        let payload: FilePayload = serde_json::from_value(task.payload().clone())?;
        let filename = payload.filename.unwrap_or_else(|| {
            payload
                .source_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "unknown_file".to_string())
        });

        let content = tokio::fs::read_to_string(&payload.source_path).await?;
        let date = Local::now().format("%Y%m%d").to_string();
        let output_filename = output_filename(&filename, &date);

        tokio::fs::create_dir_all(&payload.output_dir).await?;
        let output_path = payload.output_dir.join(&output_filename);
        tokio::fs::write(&output_path, render_markdown(&filename, &content)).await?;

        tracing::info!(task_id = %task.id(), output = %output_path.display(), "converted file");
        Ok(json!({
            "output_path": output_path.display().to_string(),
            "output_filename": output_filename,
        }))
    }
}

/// Remote sources are not fetched here.
pub struct UrlHandler;

#[async_trait]
impl TaskHandler for UrlHandler {
    async fn handle(&self, task: Task) -> Result<Value, HandlerError> {
        let payload: UrlPayload = serde_json::from_value(task.payload().clone())?;
        Err(HandlerError::new(format!(
            "unsupported source type: url ({})",
            payload.url
        )))
    }
}

fn output_filename(filename: &str, date: &str) -> String {
    let stem = Path::new(filename)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| filename.to_string());
    format!("{stem}.{date}.md")
}

fn is_markdown(filename: &str) -> bool {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| MARKDOWN_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
}

fn render_markdown(filename: &str, content: &str) -> String {
    if is_markdown(filename) {
        return content.to_string();
    }
    let lang = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("");
    format!("# {filename}\n\n```{lang}\n{}\n```\n", content.trim_end())
}
