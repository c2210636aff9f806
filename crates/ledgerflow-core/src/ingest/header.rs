/// Rows scanned for a header before giving up.
const SCAN_LIMIT: usize = 50;

/// A candidate row needs at least this many non-empty cells.
const MIN_CELLS: usize = 3;

/// Minimum keyword hits for a row to qualify as the header.
const MIN_SCORE: usize = 2;

/// Fixed vocabulary of canonical header keywords.
const HEADER_KEYWORDS: &[&str] = &[
    "date",
    "amount",
    "merchant",
    "approval",
    "withdrawal",
    "deposit",
    "debit",
    "credit",
    "balance",
    "description",
    "memo",
    "category",
    "card number",
    "holder",
];

/// Locate the header row within the first 50 rows of a grid.
///
/// Export files often carry title and filter rows above the real header, so
/// a fixed offset misdetects. Every row with enough non-empty cells is scored
/// by keyword hits against its concatenated text; the best row wins if it
/// reaches the minimum score, otherwise row 0 is assumed.
#[must_use]
pub fn locate_header(rows: &[Vec<String>]) -> usize {
    let mut best: Option<(usize, usize)> = None;

    for (idx, row) in rows.iter().take(SCAN_LIMIT).enumerate() {
        let cells: Vec<String> = row
            .iter()
            .map(|c| c.trim().to_lowercase())
            .filter(|c| !c.is_empty())
            .collect();

        if cells.len() < MIN_CELLS {
            continue;
        }

        let concat = cells.join(" ");
        let score = HEADER_KEYWORDS
            .iter()
            .filter(|kw| concat.contains(*kw))
            .count();

        if score >= MIN_SCORE && best.is_none_or(|(_, s)| score > s) {
            best = Some((idx, score));
        }
    }

    best.map_or(0, |(idx, _)| idx)
}
