use anyhow::Result;
use console::style;
use ledgerflow_core::Storage;

pub async fn run(db: &str, company: &str) -> Result<()> {
    let storage = Storage::open(db).await?;

    let transactions = storage.count_transactions(company).await?;
    let registrations = storage.list_registrations().await?.len();
    let queued = storage
        .pending_classifications(company, "pending", 1000)
        .await?
        .len();

    eprintln!("{} Company: {}", style("●").green(), style(company).bold());
    eprintln!("  Database: {db}");
    eprintln!("  Transactions: {transactions}");
    eprintln!("  Card registrations: {registrations}");
    eprintln!("  Awaiting classification: {queued}");

    Ok(())
}
