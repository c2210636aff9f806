use chrono::{NaiveDate, Utc};

use super::idgen::IdGenerator;
use crate::service::extract::RawRecord;
use crate::transaction::{Currency, PaymentMethod, Transaction, TxnKind};

const CARD_SYNONYMS: &[&str] = &["card", "credit card", "check card"];
const BANK_SYNONYMS: &[&str] = &["bank", "transfer", "account", "wire"];

const INCOME_HINTS: &[&str] = &["income", "deposit", "credit", "refund in"];
const EXPENSE_HINTS: &[&str] = &["expense", "withdrawal", "debit", "charge"];

/// Free-text markers that suggest a foreign-currency line. Heuristic, not
/// authoritative FX detection.
const OVERSEAS_MARKERS: &[&str] = &["overseas", "foreign", "international"];

/// Maps raw extracted records into canonical [`Transaction`]s.
#[derive(Debug, Clone)]
pub struct Normalizer {
    base_currency: Currency,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self {
            base_currency: Currency::Krw,
        }
    }
}

impl Normalizer {
    #[must_use]
    pub fn new(base_currency: Currency) -> Self {
        Self { base_currency }
    }

    #[must_use]
    pub fn base_currency(&self) -> Currency {
        self.base_currency
    }

    pub fn normalize(&self, raw: &RawRecord, ids: &mut IdGenerator) -> Transaction {
        let amount_raw = raw.amount.as_deref().unwrap_or("");
        let signed_amount = parse_amount(amount_raw);
        let amount = signed_amount.abs();

        let date = raw
            .date
            .as_deref()
            .and_then(parse_date)
            .unwrap_or_else(|| Utc::now().date_naive());

        let kind = detect_kind(raw.kind.as_deref(), signed_amount);

        let description = raw.description.clone().unwrap_or_default();
        let counterparty = raw
            .counterparty
            .clone()
            .unwrap_or_else(|| description.clone());

        let free_text = format!(
            "{} {} {}",
            counterparty,
            description,
            raw.memo.as_deref().unwrap_or("")
        );
        let currency = self.detect_currency(raw, amount_raw, &free_text);

        let (original_amount, is_converted) = if currency == self.base_currency {
            (None, true)
        } else {
            match raw.foreign_amount.as_deref().map(parse_amount) {
                Some(foreign) if foreign != 0.0 => (Some(foreign.abs()), true),
                // No conversion rate available: the foreign figure doubles as
                // the ledger amount, flagged unconverted.
                _ => (Some(amount), false),
            }
        };

        let mut txn = Transaction::new(ids.next_id(), date, kind, amount)
            .with_counterparty(counterparty)
            .with_description(description);

        txn.payment_method = detect_payment_method(raw.payment_method.as_deref());
        txn.card_number = raw.card_number.clone().filter(|s| !s.trim().is_empty());
        txn.approval_number = raw
            .approval_number
            .clone()
            .filter(|s| !s.trim().is_empty());
        txn.currency = currency;
        txn.original_amount = original_amount;
        txn.is_converted = is_converted;
        txn
    }

    fn detect_currency(&self, raw: &RawRecord, amount_raw: &str, free_text: &str) -> Currency {
        // An explicit currency field wins over the heuristics.
        if let Some(explicit) = raw
            .currency
            .as_deref()
            .and_then(|c| c.trim().to_uppercase().parse::<Currency>().ok())
        {
            return explicit;
        }

        if let Some(by_glyph) = currency_from_glyph(amount_raw) {
            return by_glyph;
        }

        let text = free_text.to_lowercase();
        if text.contains("usd") || text.contains("dollar") {
            return Currency::Usd;
        }
        if text.contains("jpy") || text.contains("yen") {
            return Currency::Jpy;
        }
        if text.contains("eur") || text.contains("euro") {
            return Currency::Eur;
        }
        if OVERSEAS_MARKERS.iter().any(|m| text.contains(m)) {
            return Currency::Usd;
        }

        self.base_currency
    }
}

/// Parse a raw amount string, tolerating thousand separators, currency
/// glyphs, and accounting-style parentheses. Non-numeric input is 0.
#[must_use]
pub fn parse_amount(raw: &str) -> f64 {
    let s = raw.trim();
    if s.is_empty() {
        return 0.0;
    }

    let (s, negated) = match s.strip_prefix('(').and_then(|v| v.strip_suffix(')')) {
        Some(inner) => (inner, true),
        None => (s, false),
    };

    let cleaned: String = s
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();

    let value = cleaned.parse::<f64>().unwrap_or(0.0);
    if negated {
        -value
    } else {
        value
    }
}

fn currency_from_glyph(raw: &str) -> Option<Currency> {
    if raw.contains('$') {
        Some(Currency::Usd)
    } else if raw.contains('¥') {
        Some(Currency::Jpy)
    } else if raw.contains('€') {
        Some(Currency::Eur)
    } else if raw.contains('₩') {
        Some(Currency::Krw)
    } else {
        None
    }
}

fn detect_kind(hint: Option<&str>, signed_amount: f64) -> TxnKind {
    if let Some(hint) = hint {
        let hint = hint.trim().to_lowercase();
        if INCOME_HINTS.iter().any(|h| hint.contains(h)) {
            return TxnKind::Income;
        }
        if EXPENSE_HINTS.iter().any(|h| hint.contains(h)) {
            return TxnKind::Expense;
        }
    }
    if signed_amount < 0.0 {
        return TxnKind::Expense;
    }
    // Card and bank exports are overwhelmingly charges.
    TxnKind::Expense
}

fn detect_payment_method(raw: Option<&str>) -> PaymentMethod {
    let Some(raw) = raw else {
        return PaymentMethod::Other;
    };
    let lowered = raw.trim().to_lowercase();
    if lowered.is_empty() {
        return PaymentMethod::Other;
    }
    if CARD_SYNONYMS.iter().any(|s| lowered.contains(s)) {
        return PaymentMethod::Card;
    }
    if BANK_SYNONYMS.iter().any(|s| lowered.contains(s)) {
        return PaymentMethod::Bank;
    }
    PaymentMethod::Other
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    for fmt in ["%Y-%m-%d", "%Y/%m/%d", "%Y.%m.%d", "%m/%d/%Y", "%d-%m-%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(raw, fmt) {
            return Some(date);
        }
    }
    // Datetime exports: keep the date part.
    raw.split_whitespace()
        .next()
        .filter(|head| *head != raw)
        .and_then(parse_date)
}
