use anyhow::Result;
use console::style;
use ledgerflow_core::{Storage, dedup};

pub async fn run(db: &str, company: &str, apply: bool) -> Result<()> {
    let storage = Storage::open(db).await?;

    let report = dedup::preview(&storage, company).await?;
    eprintln!(
        "{} {} duplicate(s) in {} group(s) across {} transactions",
        style("●").yellow(),
        report.duplicate_count,
        report.group_count,
        report.total_transactions
    );
    for sample in &report.samples {
        eprintln!(
            "  keep {} drop {:?}  [{}]",
            sample.kept_id, sample.duplicate_ids, sample.key
        );
    }

    if !apply {
        if report.duplicate_count > 0 {
            eprintln!("  Run again with --apply to delete them");
        }
        return Ok(());
    }

    let outcome = dedup::run(&storage, company).await?;
    eprintln!(
        "{} Deleted {}, {} transaction(s) remaining",
        style("●").green(),
        outcome.deleted,
        outcome.remaining
    );

    Ok(())
}
