use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Placeholder category for transactions the classification service has not
/// (or could not) enrich.
pub const UNCLASSIFIED: &str = "unclassified";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxnKind {
    Income,
    Expense,
}

impl TxnKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Income => "income",
            Self::Expense => "expense",
        }
    }
}

impl std::fmt::Display for TxnKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TxnKind {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "income" => Ok(Self::Income),
            "expense" => Ok(Self::Expense),
            _ => Err(crate::Error::InvalidKind(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Card,
    Bank,
    Other,
}

impl PaymentMethod {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Card => "card",
            Self::Bank => "bank",
            Self::Other => "other",
        }
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PaymentMethod {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "card" => Ok(Self::Card),
            "bank" => Ok(Self::Bank),
            "other" => Ok(Self::Other),
            _ => Err(crate::Error::InvalidPaymentMethod(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Krw,
    Usd,
    Jpy,
    Eur,
}

impl Currency {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Krw => "KRW",
            Self::Usd => "USD",
            Self::Jpy => "JPY",
            Self::Eur => "EUR",
        }
    }
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Currency {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "KRW" => Ok(Self::Krw),
            "USD" => Ok(Self::Usd),
            "JPY" => Ok(Self::Jpy),
            "EUR" => Ok(Self::Eur),
            _ => Err(crate::Error::InvalidCurrency(s.to_string())),
        }
    }
}

/// Classification fields written in place by the classification service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Classification {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_schedule_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_contract_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_employee_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_employee_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alternatives: Vec<String>,
}

/// Canonical unit produced by the pipeline.
///
/// `amount` is always the absolute value; sign is carried by `kind`.
/// `cancel_pair_id` is a symmetric back-reference: if it points from A to B,
/// B points back to A.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: i64,
    pub transaction_date: NaiveDate,
    pub kind: TxnKind,
    pub counterparty: String,
    pub description: String,
    pub amount: f64,
    pub payment_method: PaymentMethod,
    pub category: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub card_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub card_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval_number: Option<String>,
    pub is_cancelled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancel_pair_id: Option<i64>,
    #[serde(default)]
    pub classification: Classification,
    pub currency: Currency,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_amount: Option<f64>,
    /// False when a foreign-currency figure was stored as `amount` without
    /// conversion, so downstream aggregates can exclude it.
    pub is_converted: bool,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    #[must_use]
    pub fn new(id: i64, transaction_date: NaiveDate, kind: TxnKind, amount: f64) -> Self {
        Self {
            id,
            transaction_date,
            kind,
            counterparty: String::new(),
            description: String::new(),
            amount: amount.abs(),
            payment_method: PaymentMethod::Other,
            category: UNCLASSIFIED.to_string(),
            related_id: None,
            related_type: None,
            status: None,
            card_number: None,
            card_id: None,
            approval_number: None,
            is_cancelled: false,
            cancel_pair_id: None,
            classification: Classification::default(),
            currency: Currency::Krw,
            original_amount: None,
            is_converted: true,
            created_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_counterparty(mut self, counterparty: impl Into<String>) -> Self {
        self.counterparty = counterparty.into();
        self
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    #[must_use]
    pub fn with_payment_method(mut self, method: PaymentMethod) -> Self {
        self.payment_method = method;
        self
    }

    #[must_use]
    pub fn with_approval_number(mut self, approval: impl Into<String>) -> Self {
        self.approval_number = Some(approval.into());
        self
    }

    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn is_classified(&self) -> bool {
        self.category != UNCLASSIFIED
    }

    /// Grouping key used by the duplicate-elimination job. Distinct from the
    /// reconciliation key: cancellation linking goes through approval numbers.
    /// Counterparty matches case- and padding-insensitively and amounts at
    /// two decimals, so re-exports of the same rows group together.
    #[must_use]
    pub fn dedup_key(&self) -> String {
        format!(
            "{}|{}|{:.2}|{}",
            self.transaction_date,
            self.counterparty.trim().to_lowercase(),
            self.amount,
            self.payment_method
        )
    }
}

/// A card registration row, keyed by the card number's last four digits.
/// Produced by registration-category files; never enters the transaction flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CardRegistration {
    pub card_number: String,
    pub last4: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub holder: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiry: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl CardRegistration {
    #[must_use]
    pub fn new(card_number: impl Into<String>) -> Self {
        let card_number = card_number.into();
        let digits: String = card_number.chars().filter(char::is_ascii_digit).collect();
        let last4 = if digits.len() >= 4 {
            digits[digits.len() - 4..].to_string()
        } else {
            digits
        };
        Self {
            card_number,
            last4,
            holder: None,
            issuer: None,
            expiry: None,
            created_at: Utc::now(),
        }
    }
}
