mod convert;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use docket_core::{Dispatcher, DispatcherConfig, SubmitOptions, Task, TaskResult};

use convert::{FILE_TASK, FileHandler, URL_TASK, UrlHandler};

#[derive(Parser, Debug)]
#[command(name = "docket")]
#[command(about = "Convert files to markdown on the docket task dispatcher")]
struct Args {
    /// Output folder name under `output/`
    #[arg(long, default_value = "default")]
    folder: String,

    /// Write here instead of `output/<folder>`
    #[arg(long, value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// Shared pool size (overrides DOCKET_WORKERS)
    #[arg(long)]
    workers: Option<usize>,

    /// Per-task wait limit in seconds
    #[arg(long, value_name = "SECS", default_value = "60")]
    timeout: u64,

    /// Files or http(s) URLs to convert
    #[arg(required = true)]
    sources: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    // stdout carries only the JSON report
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut config = DispatcherConfig::from_env()?;
    if let Some(workers) = args.workers {
        config = config.with_workers(workers);
    }

    let dispatcher = Dispatcher::new(config);
    dispatcher.register(FILE_TASK, Arc::new(FileHandler));
    dispatcher.register(URL_TASK, Arc::new(UrlHandler));

    let output_dir = args
        .output_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from("output").join(&args.folder));

    let mut ids = Vec::with_capacity(args.sources.len());
    for source in &args.sources {
        let task = convert::task_for(source, &args.folder, &output_dir)
            .with_callback(log_result(source.clone()));
        match dispatcher.submit(task, SubmitOptions::default()) {
            Ok(task) => ids.push(task.id()),
            Err(err) => tracing::error!(source = %source, error = %err, "submit failed"),
        }
    }

    let timeout = Duration::from_secs(args.timeout);
    for id in &ids {
        if !dispatcher.await_completion(*id, Some(timeout)).await {
            tracing::warn!(task_id = %id, "timed out waiting for task");
        }
    }
    dispatcher.shutdown(true).await;

    let snapshots: Vec<Task> = ids.iter().filter_map(|id| dispatcher.get(*id)).collect();
    println!("{}", serde_json::to_string_pretty(&snapshots)?);

    let counts = dispatcher.counts();
    tracing::info!(
        success = counts.success,
        error = counts.error,
        canceled = counts.canceled,
        "all tasks settled"
    );

    let failed = args.sources.len() - counts.success;
    if failed > 0 {
        anyhow::bail!("{failed} of {} source(s) were not converted", args.sources.len());
    }
    Ok(())
}

fn log_result(source: String) -> impl Fn(TaskResult) + Send + Sync + 'static {
    move |result| match result {
        TaskResult::Success(value) => tracing::info!(
            source = %source,
            output = output_path(&value),
            "conversion finished"
        ),
        TaskResult::Failure(error) => {
            tracing::warn!(source = %source, error = %error, "conversion failed")
        }
    }
}

fn output_path(result: &serde_json::Value) -> &str {
    result["output_path"].as_str().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn output_path_is_logged_without_json_quotes() {
        let result = json!({ "output_path": "output/default/a.20260101.md" });
        assert_eq!(output_path(&result), "output/default/a.20260101.md");
        assert_eq!(output_path(&json!({})), "");
    }

    #[test]
    fn parses_sources_and_overrides() {
        let args = Args::try_parse_from([
            "docket",
            "--folder",
            "notes",
            "--workers",
            "2",
            "a.txt",
            "https://example.com",
        ])
        .unwrap();
        assert_eq!(args.folder, "notes");
        assert_eq!(args.workers, Some(2));
        assert_eq!(args.timeout, 60);
        assert_eq!(args.sources, vec!["a.txt", "https://example.com"]);

        assert!(Args::try_parse_from(["docket"]).is_err());
    }
}
