use serde::{Deserialize, Serialize};

/// File categories the pipeline knows how to route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileFormat {
    CardRegistration,
    CardTransaction,
    BankStatement,
    CardReport,
    Unknown,
}

impl FileFormat {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CardRegistration => "card_registration",
            Self::CardTransaction => "card_transaction",
            Self::BankStatement => "bank_statement",
            Self::CardReport => "card_report",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for FileFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Matches when every keyword appears somewhere in the concatenated header.
struct PhraseRule {
    format: FileFormat,
    all: &'static [&'static str],
}

/// Matches when every group has at least one keyword contained in some
/// non-empty cell. Tolerant of column reordering caused by merged cells.
struct CellRule {
    format: FileFormat,
    groups: &'static [&'static [&'static str]],
}

// Registration rules come before transaction rules: registration keyword
// sets are near-subsets of transaction keyword sets, so trying them later
// would misclassify registration exports as transaction files.
const PHRASE_RULES: &[PhraseRule] = &[
    PhraseRule {
        format: FileFormat::CardRegistration,
        all: &["card number", "expir"],
    },
    PhraseRule {
        format: FileFormat::CardRegistration,
        all: &["card number", "issue date"],
    },
    PhraseRule {
        format: FileFormat::CardRegistration,
        all: &["cardholder"],
    },
    PhraseRule {
        format: FileFormat::CardTransaction,
        all: &["approval", "merchant"],
    },
    PhraseRule {
        format: FileFormat::CardTransaction,
        all: &["card number", "merchant"],
    },
    PhraseRule {
        format: FileFormat::CardReport,
        all: &["billing", "statement"],
    },
];

const CELL_RULES: &[CellRule] = &[
    CellRule {
        format: FileFormat::CardRegistration,
        groups: &[&["card number"], &["holder", "valid", "expir"]],
    },
    CellRule {
        format: FileFormat::CardTransaction,
        groups: &[&["approval"], &["amount", "merchant"]],
    },
    CellRule {
        format: FileFormat::BankStatement,
        groups: &[
            &["withdrawal", "deposit", "debit", "credit"],
            &["date", "balance", "memo"],
        ],
    },
    CellRule {
        format: FileFormat::CardReport,
        groups: &[&["fee", "installment", "billing"], &["amount", "total"]],
    },
];

/// Classify a header row. First matching rule wins; no match is `Unknown`.
///
/// Cells may contain gaps from merged columns; empty cells only widen the
/// concatenation and are excluded from the cell set.
#[must_use]
pub fn detect_format(header_cells: &[String]) -> FileFormat {
    let cells: Vec<String> = header_cells
        .iter()
        .map(|c| c.trim().to_lowercase())
        .filter(|c| !c.is_empty())
        .collect();

    if cells.is_empty() {
        return FileFormat::Unknown;
    }

    let concat = cells.join(" ");

    for rule in PHRASE_RULES {
        if rule.all.iter().all(|kw| concat.contains(kw)) {
            return rule.format;
        }
    }

    for rule in CELL_RULES {
        let matched = rule.groups.iter().all(|group| {
            group
                .iter()
                .any(|kw| cells.iter().any(|cell| cell.contains(kw)))
        });
        if matched {
            return rule.format;
        }
    }

    FileFormat::Unknown
}
