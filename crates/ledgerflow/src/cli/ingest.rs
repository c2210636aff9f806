use std::path::Path;
use std::sync::Arc;

use anyhow::{Result, bail};
use console::style;
use ledgerflow_core::{
    restore_pending, ClassificationClient, ExtractionClient, InputFile, PipelineBuilder,
    PipelineState, ServiceConfig, Storage,
};

const RESTORE_LIMIT: u32 = 500;

pub async fn run(db: &str, paths: &[String], company: &str) -> Result<()> {
    if paths.is_empty() {
        bail!("no input files given");
    }

    let mut files = Vec::with_capacity(paths.len());
    for path_str in paths {
        let path = Path::new(path_str);
        if !path.is_file() {
            bail!("file not found: {}", path.display());
        }
        let name = path
            .file_name()
            .map_or_else(|| path_str.clone(), |n| n.to_string_lossy().to_string());
        files.push(InputFile::new(name, std::fs::read(path)?));
    }

    let config = ServiceConfig::from_env();
    let extractor = Arc::new(ExtractionClient::new(&config)?);
    let classifier = Arc::new(ClassificationClient::new(&config)?);
    let storage = Arc::new(Storage::open(db).await?);

    // Rows parked while the classification service was down get another
    // pass before new files are processed.
    let restored = restore_pending(classifier.as_ref(), &storage, company, RESTORE_LIMIT).await?;
    if restored > 0 {
        eprintln!(
            "{} {} queued transaction(s) reclassified",
            style("●").cyan(),
            restored
        );
    }

    let pipeline = PipelineBuilder::new(extractor, classifier, storage)
        .with_company_id(company)
        .spawn();
    pipeline.add_files(files).await;

    let mut progress = pipeline.progress();
    let mut last_file = None;
    let outcome = loop {
        let snapshot = progress.borrow_and_update().clone();
        if snapshot.current_file != last_file {
            if let Some(file) = &snapshot.current_file {
                eprintln!("{} {}", style("→").cyan(), file);
            }
            last_file = snapshot.current_file.clone();
        }
        if matches!(
            snapshot.state,
            PipelineState::Completed | PipelineState::Error
        ) || progress.changed().await.is_err()
        {
            break snapshot;
        }
    };

    let marker = if outcome.state == PipelineState::Error {
        style("●").red()
    } else {
        style("●").green()
    };
    eprintln!(
        "{} {} file(s) processed, {} failed",
        marker,
        outcome.files_done,
        outcome.files_failed
    );
    eprintln!("  Transactions: {}", outcome.transactions);
    if outcome.registrations > 0 {
        eprintln!("  Card registrations: {}", outcome.registrations);
    }

    pipeline.shutdown().await;
    Ok(())
}
