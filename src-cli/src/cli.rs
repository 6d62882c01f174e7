use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use serde::Serialize;

use folio_core::error::IngestError;
use folio_core::events::{EventSink, ProgressTick};
use folio_core::pipeline::{TaskOutcome, TaskReport, TaskStatus, UploadFile};
use folio_core::{DocumentNode, IngestPipeline, MemoryTree, ParseMode, PipelineConfig, UploadResponse};

use crate::paths::AppPaths;
use crate::uploader::DirUploader;

/// Arguments of `folio ingest`
#[derive(clap::Args, Debug)]
pub struct IngestArgs {
    /// Files to ingest, inserted in the order given
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Pipeline settings file (JSON)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override the parse mode: auto, ask, always or never
    #[arg(long)]
    pub mode: Option<ParseMode>,

    /// Directory that receives raw uploads
    #[arg(long)]
    pub out: Option<PathBuf>,

    /// Print the reports and resulting document as JSON
    #[arg(long)]
    pub json: bool,
}

/// Logs pipeline events
struct LogSink;

impl EventSink for LogSink {
    fn on_upload_success(&self, file: &UploadFile, result: &UploadResponse) {
        tracing::info!(filename = %file.filename, result = ?result, "Upload stored");
    }

    fn on_upload_error(&self, file: &UploadFile, error: &IngestError) {
        tracing::error!(filename = %file.filename, error = %error, "Upload failed");
    }

    fn on_progress(&self, tick: ProgressTick) {
        match tick {
            ProgressTick::Status { task_id, status } => {
                tracing::debug!(task_id = %task_id, status = %status, "Task status")
            }
            ProgressTick::Batch {
                task_id,
                batch,
                batches,
                ..
            } => tracing::debug!(task_id = %task_id, batch, batches, "Inserted batch"),
        }
    }
}

#[derive(Serialize)]
struct IngestOutput<'a> {
    reports: &'a [TaskReport],
    document: &'a [DocumentNode],
}

/// Ingest files from disk into an in-memory document
pub fn ingest(args: IngestArgs) {
    crate::init_logging(&["folio=info", "folio_core=info"]);

    let rt = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("Failed to create tokio runtime: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = rt.block_on(do_ingest(args)) {
        tracing::error!("Ingest failed: {:#}", e);
        std::process::exit(1);
    }
}

async fn do_ingest(args: IngestArgs) -> anyhow::Result<()> {
    let paths = AppPaths::load_or_default();

    let config_path = args.config.clone().unwrap_or(paths.config_file.clone());
    let mut config = PipelineConfig::load(&config_path)?;
    if let Some(mode) = args.mode {
        config.extraction.mode = mode;
    }

    let upload_dir = match args.out {
        Some(dir) => dir,
        None => {
            paths
                .ensure_dirs()
                .context("Failed to create upload directory")?;
            paths.upload_dir.clone()
        }
    };
    if config.upload.endpoint.is_none() {
        let upload_dir = std::path::absolute(&upload_dir)
            .with_context(|| format!("Invalid upload directory {}", upload_dir.display()))?;
        config.upload.endpoint = Some(format!("file://{}", upload_dir.display()));
    }

    let (reports, document) = ingest_files(config, &args.files).await?;

    if args.json {
        let output = IngestOutput {
            reports: &reports,
            document: &document,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        for report in &reports {
            println!("{}", summary_line(report));
        }
        println!("{} nodes in document", document.len());
    }

    let failed = reports
        .iter()
        .filter(|r| r.status == TaskStatus::Failed)
        .count();
    if failed > 0 {
        anyhow::bail!("{} of {} files failed", failed, reports.len());
    }
    Ok(())
}

async fn read_file(path: &Path) -> anyhow::Result<UploadFile> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    // No declared media type on disk; the classifier falls back to the extension
    Ok(UploadFile::new(filename, "", bytes))
}

/// Run the pipeline over `files` and return the reports and the document.
pub async fn ingest_files(
    config: PipelineConfig,
    files: &[PathBuf],
) -> anyhow::Result<(Vec<TaskReport>, Vec<DocumentNode>)> {
    let mut uploads = Vec::with_capacity(files.len());
    for path in files {
        uploads.push(read_file(path).await?);
    }

    let tree = Arc::new(MemoryTree::new());
    let pipeline = IngestPipeline::new(config, tree.clone(), Arc::new(DirUploader), Arc::new(LogSink));

    tracing::info!("Ingesting {} files", uploads.len());
    let mut reports = Vec::with_capacity(uploads.len());
    for result in pipeline.ingest_many(uploads, 0).await {
        reports.push(result.context("Failed to reserve a place in the document")?);
    }

    Ok((reports, tree.nodes().await))
}

fn summary_line(report: &TaskReport) -> String {
    let detail = match &report.outcome {
        TaskOutcome::Inserted { nodes, batches } => {
            format!("{} nodes in {} batches, {} images", nodes, batches, report.assets)
        }
        TaskOutcome::Abandoned { inserted } => format!("abandoned after {} nodes", inserted),
        TaskOutcome::RecoveredWithError { error } => error.clone(),
        TaskOutcome::Uploaded { response } => match response {
            UploadResponse::Url { url } => format!("uploaded to {}", url),
            UploadResponse::Text(text) => format!("uploaded as {}", text),
        },
        TaskOutcome::UploadFailed { error } => error.clone(),
    };
    format!(
        "{} [{}] {}: {}",
        report.filename, report.kind, report.status, detail
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ingest_files_mixed_inputs() {
        let temp_dir = tempfile::tempdir().unwrap();
        let notes = temp_dir.path().join("notes.md");
        std::fs::write(&notes, "# Notes\n\n• one\n• two\n").unwrap();
        let letter = temp_dir.path().join("letter.rtf");
        std::fs::write(&letter, "{\\rtf1 Hello}").unwrap();

        let uploads = temp_dir.path().join("uploads");
        let mut config = PipelineConfig::default();
        config.upload.endpoint = Some(format!("file://{}", uploads.display()));

        let (reports, document) = ingest_files(config, &[notes, letter]).await.unwrap();

        assert_eq!(reports.len(), 2);
        assert!(reports.iter().all(|r| r.status == TaskStatus::Done));
        assert_eq!(document[0], DocumentNode::heading(1, "Notes"));
        assert!(matches!(document[1], DocumentNode::List { .. }));
        match &document[2] {
            DocumentNode::Text { text } => assert!(text.starts_with("letter.rtf [file://")),
            other => panic!("expected upload reference, got {:?}", other),
        }
        assert_eq!(std::fs::read_dir(&uploads).unwrap().count(), 1);

        let line = summary_line(&reports[1]);
        assert!(line.starts_with("letter.rtf [unsupported] done: uploaded to file://"));
    }

    #[tokio::test]
    async fn test_missing_file_is_error() {
        let temp_dir = tempfile::tempdir().unwrap();
        let err = ingest_files(
            PipelineConfig::default(),
            &[temp_dir.path().join("absent.pdf")],
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("Failed to read"));
    }

    #[test]
    fn test_json_output_shape() {
        let document = vec![DocumentNode::heading(2, "Hi")];
        let output = IngestOutput {
            reports: &[],
            document: &document,
        };
        let json = serde_json::to_value(&output).unwrap();
        assert_eq!(json["document"][0]["type"], "heading");
        assert_eq!(json["document"][0]["level"], 2);
    }
}
