use crate::storage::Storage;
use crate::transaction::CardRegistration;
use crate::Result;

/// Column roles recognized in a registration header.
fn find_column(header: &[String], keywords: &[&str]) -> Option<usize> {
    header.iter().position(|cell| {
        let cell = cell.trim().to_lowercase();
        keywords.iter().any(|kw| cell.contains(kw))
    })
}

/// Import a card-registration file: structured upserts keyed by the card
/// number's last four digits. Registration files never enter the
/// transaction flow.
pub async fn import_rows(
    header: &[String],
    body: &[Vec<String>],
    storage: &Storage,
) -> Result<usize> {
    let number_col = find_column(header, &["card number", "card no"]);
    let holder_col = find_column(header, &["holder", "name"]);
    let issuer_col = find_column(header, &["issuer", "company"]);
    let expiry_col = find_column(header, &["expir", "valid"]);

    let Some(number_col) = number_col else {
        tracing::warn!("registration file has no card number column, skipping");
        return Ok(0);
    };

    let cell = |row: &[String], col: Option<usize>| -> Option<String> {
        col.and_then(|c| row.get(c))
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };

    let mut imported = 0;
    for row in body {
        let Some(number) = cell(row, Some(number_col)) else {
            continue;
        };
        let digits = number.chars().filter(char::is_ascii_digit).count();
        if digits < 4 {
            continue;
        }

        let mut registration = CardRegistration::new(number);
        registration.holder = cell(row, holder_col);
        registration.issuer = cell(row, issuer_col);
        registration.expiry = cell(row, expiry_col);

        storage.upsert_registration(&registration).await?;
        imported += 1;
    }

    tracing::info!(imported, "card registrations upserted");
    Ok(imported)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cells(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| (*s).to_string()).collect()
    }

    #[tokio::test]
    async fn imports_registration_rows() {
        let storage = Storage::open_memory().await.unwrap();
        let header = cells(&["Card Number", "Holder Name", "Expiry Date"]);
        let body = vec![
            cells(&["1234-5678-9012-3456", "Kim", "12/28"]),
            cells(&["9999-0000-1111-2222", "Lee", "03/27"]),
        ];

        let imported = import_rows(&header, &body, &storage).await.unwrap();

        assert_eq!(imported, 2);
        let regs = storage.list_registrations().await.unwrap();
        assert_eq!(regs.len(), 2);
        assert_eq!(regs[0].last4, "2222");
        assert_eq!(regs[0].holder.as_deref(), Some("Lee"));
    }

    #[tokio::test]
    async fn same_last4_upserts_instead_of_duplicating() {
        let storage = Storage::open_memory().await.unwrap();
        let header = cells(&["Card Number", "Holder Name"]);
        let body = vec![
            cells(&["1111-2222-3333-4444", "Kim"]),
            cells(&["5555-6666-7777-4444", "Park"]),
        ];

        let imported = import_rows(&header, &body, &storage).await.unwrap();

        assert_eq!(imported, 2);
        let regs = storage.list_registrations().await.unwrap();
        assert_eq!(regs.len(), 1);
        assert_eq!(regs[0].holder.as_deref(), Some("Park"));
    }

    #[tokio::test]
    async fn rows_without_card_numbers_are_skipped() {
        let storage = Storage::open_memory().await.unwrap();
        let header = cells(&["Card Number", "Holder Name"]);
        let body = vec![cells(&["", "Kim"]), cells(&["n/a", "Lee"])];

        let imported = import_rows(&header, &body, &storage).await.unwrap();

        assert_eq!(imported, 0);
        assert!(storage.list_registrations().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_number_column_imports_nothing() {
        let storage = Storage::open_memory().await.unwrap();
        let header = cells(&["Holder Name", "Expiry"]);
        let body = vec![cells(&["Kim", "12/28"])];

        assert_eq!(import_rows(&header, &body, &storage).await.unwrap(), 0);
    }
}
