//! Account domain model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An account statements are imported into
///
/// The import core only reads accounts; they are owned by the account
/// registry. `account_number` and `card_last4` let the normalizer compare
/// fragments found in a statement against the account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub name: String,
    /// ISO 4217 currency code, normalized to uppercase
    pub currency: String,
    pub account_number: Option<String>,
    pub card_last4: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Account {
    /// Create a new account in USD
    pub fn new(id: Uuid, name: String) -> Self {
        Self {
            id,
            name,
            currency: "USD".to_string(),
            account_number: None,
            card_last4: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_currency(mut self, currency: &str) -> Self {
        self.currency = currency.trim().to_uppercase();
        self
    }

    pub fn with_account_number(mut self, number: &str) -> Self {
        self.account_number = Some(number.to_string());
        self
    }

    pub fn with_card_last4(mut self, last4: &str) -> Self {
        self.card_last4 = Some(last4.to_string());
        self
    }

    /// Last four digits of the account number, ignoring separators
    pub fn account_number_last4(&self) -> Option<String> {
        self.account_number.as_deref().and_then(last4_digits)
    }
}

/// Last four digits found in a masked or formatted number
/// (`4505********1234`, `06062-5012345`).
pub fn last4_digits(s: &str) -> Option<String> {
    let digits: Vec<char> = s.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() < 4 {
        return None;
    }
    Some(digits[digits.len() - 4..].iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last4_digits() {
        assert_eq!(last4_digits("4505********1234"), Some("1234".to_string()));
        assert_eq!(last4_digits("06062-5012345"), Some("2345".to_string()));
        assert_eq!(last4_digits("12"), None);
    }

    #[test]
    fn test_currency_is_uppercased() {
        let account = Account::new(Uuid::new_v4(), "Visa".to_string()).with_currency(" cad ");
        assert_eq!(account.currency, "CAD");
    }
}
