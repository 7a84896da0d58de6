//! Field normalizer - raw statement rows to candidate transactions

use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use thiserror::Error;

use crate::config::{ColumnMappings, ImportOptions, ImportProfile, ImportSettings, NumberFormat};
use crate::domain::{
    last4_digits, Account, Direction, NormalizedTransaction, RawRecord, StatementFormat,
    TransactionType,
};

/// Why a single row could not be normalized. Never aborts the batch.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RowError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("unparseable date '{0}'")]
    InvalidDate(String),

    #[error("unparseable amount '{0}'")]
    InvalidAmount(String),
}

/// Columns a row's values are read from
#[derive(Debug, Clone, Default, PartialEq)]
struct ColumnLayout {
    date: Option<String>,
    posted_date: Option<String>,
    /// Joined with " - " when more than one is non-empty
    description: Vec<String>,
    merchant: Option<String>,
    amount: Option<String>,
    debit: Option<String>,
    credit: Option<String>,
    card: Option<String>,
    account_number: Option<String>,
}

impl ColumnLayout {
    fn has_debit_credit(&self) -> bool {
        self.debit.is_some() || self.credit.is_some()
    }
}

/// Normalizes the rows of one batch
///
/// Built once per processing run from the batch's format, the import
/// settings and the batch's profile.
#[derive(Debug, Clone)]
pub struct FieldNormalizer {
    format: StatementFormat,
    date_formats: Vec<String>,
    options: ImportOptions,
    mappings: Option<ColumnMappings>,
    default_category: String,
}

impl FieldNormalizer {
    pub fn new(
        format: StatementFormat,
        settings: &ImportSettings,
        profile: Option<&ImportProfile>,
    ) -> Self {
        Self {
            format,
            date_formats: settings.date_formats_for(format, profile),
            options: profile.map(|p| p.options.clone()).unwrap_or_default(),
            mappings: profile.and_then(|p| p.column_mappings.clone()),
            default_category: settings.default_category.clone(),
        }
    }

    /// Normalize one raw row against its owning account
    pub fn normalize(
        &self,
        raw: &RawRecord,
        account: &Account,
    ) -> Result<NormalizedTransaction, RowError> {
        let layout = self.layout(raw, account);

        let date_text = cell(raw, layout.date.as_deref()).ok_or(RowError::MissingField("date"))?;
        let (transaction_date, transaction_time) = parse_date(date_text, &self.date_formats)
            .ok_or_else(|| RowError::InvalidDate(date_text.to_string()))?;
        let posted_date = cell(raw, layout.posted_date.as_deref())
            .and_then(|p| parse_date(p, &self.date_formats))
            .map(|(d, _)| d);

        let description = layout
            .description
            .iter()
            .filter_map(|c| cell(raw, Some(c.as_str())))
            .map(|d| d.trim_matches('"').trim())
            .filter(|d| !d.is_empty())
            .collect::<Vec<_>>()
            .join(" - ");
        if description.is_empty() {
            return Err(RowError::MissingField("description"));
        }

        let (amount, direction) = self.amount_and_direction(raw, &layout)?;

        let card_last4 = cell(raw, layout.card.as_deref()).and_then(last4_digits);
        let account_fragment = cell(raw, layout.account_number.as_deref()).and_then(last4_digits);
        let fragment_matched = fragment_matched(account, card_last4.as_deref(), account_fragment.as_deref());
        if fragment_matched == Some(false) {
            tracing::debug!(account_id = %account.id, "statement fragment does not match account");
        }

        Ok(NormalizedTransaction {
            transaction_date,
            transaction_time,
            posted_date,
            merchant: self.merchant(raw, &layout, &description),
            transaction_type: classify(self.format, &description, direction),
            description,
            amount,
            direction,
            currency: self.currency(&layout, account),
            category_id: self.default_category.clone(),
            card_last4,
            account_fragment,
            fragment_matched,
        })
    }

    fn layout(&self, raw: &RawRecord, account: &Account) -> ColumnLayout {
        match self.format {
            StatementFormat::CibcCredit => ColumnLayout {
                date: Some("date".to_string()),
                description: vec!["description".to_string()],
                debit: Some("debit".to_string()),
                credit: Some("credit".to_string()),
                card: Some("card".to_string()),
                ..Default::default()
            },
            StatementFormat::RbcChecking => {
                let use_usd = account.currency == "USD" && cell(raw, Some("USD$")).is_some();
                ColumnLayout {
                    date: Some("Transaction Date".to_string()),
                    posted_date: raw.contains_key("Posting Date").then(|| "Posting Date".to_string()),
                    description: vec!["Description 1".to_string(), "Description 2".to_string()],
                    merchant: Some("Description 1".to_string()),
                    amount: Some(if use_usd { "USD$" } else { "CAD$" }.to_string()),
                    account_number: Some("Account Number".to_string()),
                    ..Default::default()
                }
            }
            StatementFormat::GenericCsv | StatementFormat::Excel => match &self.mappings {
                Some(m) => ColumnLayout {
                    date: Some(m.date.clone()),
                    posted_date: m.posted_date.clone(),
                    description: m.description.iter().cloned().collect(),
                    merchant: m.merchant.clone(),
                    amount: (m.debit.is_none() && m.credit.is_none()).then(|| m.amount.clone()),
                    debit: m.debit.clone(),
                    credit: m.credit.clone(),
                    card: m.card.clone(),
                    account_number: m.account_number.clone(),
                },
                None => detect_columns(raw.keys().map(String::as_str).collect::<Vec<_>>().as_slice()),
            },
        }
    }

    fn amount_and_direction(
        &self,
        raw: &RawRecord,
        layout: &ColumnLayout,
    ) -> Result<(Decimal, Direction), RowError> {
        let number_format = self.options.number_format;
        let parse = |text: &str| {
            parse_amount(text, number_format).ok_or_else(|| RowError::InvalidAmount(text.to_string()))
        };

        if layout.has_debit_credit() {
            let debit = cell(raw, layout.debit.as_deref()).map(parse).transpose()?;
            let credit = cell(raw, layout.credit.as_deref()).map(parse).transpose()?;
            return match (debit, credit) {
                (Some(d), None) => Ok((d.abs(), Direction::Outflow)),
                (None, Some(c)) => Ok((c.abs(), Direction::Inflow)),
                (Some(d), Some(c)) if d.abs() >= c.abs() => Ok((d.abs(), Direction::Outflow)),
                (Some(_), Some(c)) => Ok((c.abs(), Direction::Inflow)),
                (None, None) => Err(RowError::MissingField("amount")),
            };
        }

        let text = cell(raw, layout.amount.as_deref()).ok_or(RowError::MissingField("amount"))?;
        let mut amount = parse(text)?;
        if self.options.flip_signs {
            amount = -amount;
        }
        let direction = if amount.is_sign_negative() && !amount.is_zero() {
            Direction::Outflow
        } else {
            Direction::Inflow
        };
        Ok((amount.abs(), direction))
    }

    fn merchant(&self, raw: &RawRecord, layout: &ColumnLayout, description: &str) -> Option<String> {
        if let Some(merchant) = cell(raw, layout.merchant.as_deref()) {
            return Some(merchant.to_string());
        }
        match self.format {
            // CIBC descriptions lead with the merchant name
            StatementFormat::CibcCredit => {
                let mut words = description.split_whitespace();
                let first = words.next()?;
                words.next().map(|_| first.to_string())
            }
            StatementFormat::RbcChecking | StatementFormat::GenericCsv | StatementFormat::Excel => None,
        }
    }

    fn currency(&self, layout: &ColumnLayout, account: &Account) -> String {
        match (self.format, layout.amount.as_deref()) {
            (StatementFormat::RbcChecking, Some("USD$")) => "USD".to_string(),
            (StatementFormat::RbcChecking, _) => "CAD".to_string(),
            _ => account.currency.clone(),
        }
    }
}

/// Non-empty trimmed cell value
fn cell<'a>(raw: &'a RawRecord, column: Option<&str>) -> Option<&'a str> {
    raw.get(column?)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
}

fn fragment_matched(account: &Account, card: Option<&str>, number: Option<&str>) -> Option<bool> {
    let checks: Vec<bool> = [
        card.zip(account.card_last4.as_deref()).map(|(a, b)| a == b),
        number
            .zip(account.account_number_last4())
            .map(|(a, b)| a == b),
    ]
    .into_iter()
    .flatten()
    .collect();
    if checks.is_empty() {
        None
    } else {
        Some(checks.into_iter().all(|c| c))
    }
}

/// Derive the transaction type from the description and direction
fn classify(format: StatementFormat, description: &str, direction: Direction) -> TransactionType {
    let upper = description.to_uppercase();
    match direction {
        Direction::Inflow if upper.contains("REFUND") => TransactionType::Refund,
        Direction::Inflow if format.is_credit_card() && upper.contains("PAYMENT") => {
            TransactionType::TransferIn
        }
        Direction::Inflow if upper.contains("TRANSFER") => TransactionType::TransferIn,
        Direction::Outflow if upper.contains("TRANSFER") => TransactionType::TransferOut,
        _ => TransactionType::for_direction(direction),
    }
}

fn has_time_component(format: &str) -> bool {
    ["%H", "%I", "%M", "%S", "%T", "%R", "%p"]
        .iter()
        .any(|t| format.contains(t))
}

/// Try each format in order; the first successful parse wins
pub fn parse_date(value: &str, formats: &[String]) -> Option<(NaiveDate, Option<NaiveTime>)> {
    let value = value.trim();
    for fmt in formats {
        if has_time_component(fmt) {
            if let Ok(dt) = NaiveDateTime::parse_from_str(value, fmt) {
                return Some((dt.date(), Some(dt.time())));
            }
        } else if let Ok(date) = NaiveDate::parse_from_str(value, fmt) {
            return Some((date, None));
        }
    }
    None
}

/// Parse a statement amount
///
/// Accepts currency symbols, a three-letter currency code, whitespace and
/// thousands separators. `(12.00)` and `12.00-` are negative.
pub fn parse_amount(value: &str, number_format: NumberFormat) -> Option<Decimal> {
    let mut body = value.trim();
    let mut negative = false;

    if body.starts_with('(') && body.ends_with(')') && body.len() >= 2 {
        negative = true;
        body = body[1..body.len() - 1].trim();
    }
    if let Some(stripped) = body.strip_suffix('-') {
        negative = true;
        body = stripped.trim();
    }

    let letters: String = body.chars().filter(|c| c.is_alphabetic()).collect();
    if !letters.is_empty() && !(letters.len() == 3 && letters.chars().all(|c| c.is_ascii_uppercase())) {
        return None;
    }

    let (decimal_sep, group_sep) = match number_format {
        NumberFormat::Us => ('.', ','),
        NumberFormat::European => (',', '.'),
    };

    let mut cleaned = String::with_capacity(body.len());
    for c in body.chars() {
        if c.is_ascii_digit() || c == '-' {
            cleaned.push(c);
        } else if c == decimal_sep {
            cleaned.push('.');
        } else if c == group_sep || c == '+' || c.is_whitespace() || c.is_alphabetic() || is_currency_symbol(c) {
            continue;
        } else {
            return None;
        }
    }
    if !cleaned.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }

    let amount = Decimal::from_str(&cleaned).ok()?;
    Some(if negative { -amount.abs() } else { amount })
}

fn is_currency_symbol(c: char) -> bool {
    matches!(c, '$' | '€' | '£' | '¥' | '₹' | '₩' | '¢')
}

/// Find a column for each field by header aliases
///
/// Exact (case-insensitive) matches win over substring matches, and aliases
/// are tried in order. Aliases shorter than four characters only match
/// exactly so `cr` never matches `Description`.
fn detect_columns(headers: &[&str]) -> ColumnLayout {
    const DATE: &[&str] = &["transaction date", "date", "trans date", "txn date", "txndate", "post date", "posting date", "posted date", "dt"];
    const POSTED: &[&str] = &["posted date", "posting date", "post date", "posted"];
    const DESCRIPTION: &[&str] = &["description", "desc", "memo", "details", "narration", "payee", "name"];
    const MERCHANT: &[&str] = &["merchant", "merchant name", "payee"];
    const AMOUNT: &[&str] = &["amount", "amt", "transaction amount", "total"];
    const DEBIT: &[&str] = &["debit", "withdrawal", "withdrawals", "debit amount", "money out", "paid out", "dr"];
    const CREDIT: &[&str] = &["credit", "deposit", "deposits", "credit amount", "money in", "paid in", "cr"];
    const CARD: &[&str] = &["card", "card number", "card no"];
    const ACCOUNT: &[&str] = &["account number", "account no", "acct number"];

    let mut taken: Vec<String> = Vec::new();
    let pick = |aliases: &[&str], taken: &mut Vec<String>| -> Option<String> {
        let found = find_column(headers, aliases, taken)?;
        taken.push(found.clone());
        Some(found)
    };

    let date = pick(DATE, &mut taken);
    let posted_date = pick(POSTED, &mut taken);

    // A plain amount column wins over debit/credit pairs
    let exact_amount = headers
        .iter()
        .find(|h| AMOUNT.contains(&h.trim().to_lowercase().as_str()))
        .map(|h| h.to_string());
    let (amount, debit, credit) = match exact_amount {
        Some(a) => {
            taken.push(a.clone());
            (Some(a), None, None)
        }
        None => {
            let debit = pick(DEBIT, &mut taken);
            let credit = pick(CREDIT, &mut taken);
            if debit.is_some() || credit.is_some() {
                (None, debit, credit)
            } else {
                (pick(AMOUNT, &mut taken), None, None)
            }
        }
    };

    let description = pick(DESCRIPTION, &mut taken);
    let merchant = pick(MERCHANT, &mut taken);
    let card = pick(CARD, &mut taken);
    let account_number = pick(ACCOUNT, &mut taken);

    ColumnLayout {
        date,
        posted_date,
        description: description.into_iter().collect(),
        merchant,
        amount,
        debit,
        credit,
        card,
        account_number,
    }
}

fn find_column(headers: &[&str], aliases: &[&str], taken: &[String]) -> Option<String> {
    let available = || headers.iter().filter(|h| !taken.iter().any(|t| t == *h));
    for alias in aliases {
        if let Some(h) = available().find(|h| h.trim().to_lowercase() == *alias) {
            return Some(h.to_string());
        }
    }
    for alias in aliases.iter().filter(|a| a.len() >= 4) {
        if let Some(h) = available().find(|h| h.to_lowercase().contains(alias)) {
            return Some(h.to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn raw(pairs: &[(&str, &str)]) -> RawRecord {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn account() -> Account {
        Account::new(Uuid::new_v4(), "Chequing".to_string()).with_currency("CAD")
    }

    fn generic() -> FieldNormalizer {
        FieldNormalizer::new(StatementFormat::GenericCsv, &ImportSettings::default(), None)
    }

    #[test]
    fn test_negative_amount_becomes_outflow() {
        let tx = generic()
            .normalize(
                &raw(&[("Date", "2024-01-05"), ("Description", "Coffee Shop"), ("Amount", "-4.50")]),
                &account(),
            )
            .unwrap();
        assert_eq!(tx.amount, dec("4.50"));
        assert_eq!(tx.direction, Direction::Outflow);
        assert_eq!(tx.transaction_type, TransactionType::Expense);
        assert_eq!(tx.transaction_date, NaiveDate::from_ymd_opt(2024, 1, 5).unwrap());
        assert_eq!(tx.currency, "CAD");
        assert_eq!(tx.category_id, "uncategorized");
    }

    #[test]
    fn test_missing_and_bad_fields_are_row_errors() {
        let n = generic();
        let err = n
            .normalize(&raw(&[("Date", "2024-13-45"), ("Description", "x"), ("Amount", "1")]), &account())
            .unwrap_err();
        assert_eq!(err, RowError::InvalidDate("2024-13-45".to_string()));

        let err = n
            .normalize(&raw(&[("Date", "2024-01-01"), ("Description", ""), ("Amount", "1")]), &account())
            .unwrap_err();
        assert_eq!(err, RowError::MissingField("description"));

        let err = n
            .normalize(&raw(&[("Date", "2024-01-01"), ("Description", "x"), ("Amount", "abc")]), &account())
            .unwrap_err();
        assert_eq!(err, RowError::InvalidAmount("abc".to_string()));
    }

    #[test]
    fn test_date_formats_first_success_wins() {
        let formats = vec!["%m/%d/%Y".to_string(), "%d/%m/%Y".to_string()];
        let (d, _) = parse_date("03/04/2024", &formats).unwrap();
        assert_eq!(d, NaiveDate::from_ymd_opt(2024, 3, 4).unwrap());
        let (d, _) = parse_date("25/04/2024", &formats).unwrap();
        assert_eq!(d, NaiveDate::from_ymd_opt(2024, 4, 25).unwrap());
    }

    #[test]
    fn test_datetime_formats_keep_time() {
        let formats = vec!["%Y-%m-%d %H:%M:%S".to_string()];
        let (d, t) = parse_date("2024-06-01 14:30:00", &formats).unwrap();
        assert_eq!(d, NaiveDate::from_ymd_opt(2024, 6, 1).unwrap());
        assert_eq!(t, NaiveTime::from_hms_opt(14, 30, 0));
    }

    #[test]
    fn test_parse_amount_variants() {
        assert_eq!(parse_amount("$1,234.56", NumberFormat::Us), Some(dec("1234.56")));
        assert_eq!(parse_amount("(100.00)", NumberFormat::Us), Some(dec("-100.00")));
        assert_eq!(parse_amount("45.10-", NumberFormat::Us), Some(dec("-45.10")));
        assert_eq!(parse_amount("-€ 12,50", NumberFormat::European), Some(dec("-12.50")));
        assert_eq!(parse_amount("1.234,56 EUR", NumberFormat::European), Some(dec("1234.56")));
        assert_eq!(parse_amount("CAD 7.00", NumberFormat::Us), Some(dec("7.00")));
        assert_eq!(parse_amount("N/A", NumberFormat::Us), None);
        assert_eq!(parse_amount("", NumberFormat::Us), None);
        assert_eq!(parse_amount("12abc", NumberFormat::Us), None);
    }

    #[test]
    fn test_cibc_debit_credit_columns_are_authoritative() {
        let n = FieldNormalizer::new(StatementFormat::CibcCredit, &ImportSettings::default(), None);
        let acct = account().with_card_last4("1234");

        let charge = n
            .normalize(
                &raw(&[("date", "2024-03-01"), ("description", "TIM HORTONS #123"), ("debit", "5.25"), ("credit", ""), ("card", "4505********1234")]),
                &acct,
            )
            .unwrap();
        assert_eq!(charge.direction, Direction::Outflow);
        assert_eq!(charge.amount, dec("5.25"));
        assert_eq!(charge.merchant.as_deref(), Some("TIM"));
        assert_eq!(charge.card_last4.as_deref(), Some("1234"));
        assert_eq!(charge.fragment_matched, Some(true));

        let payment = n
            .normalize(
                &raw(&[("date", "2024-03-02"), ("description", "PAYMENT THANK YOU"), ("debit", ""), ("credit", "-500.00"), ("card", "4505********9999")]),
                &acct,
            )
            .unwrap();
        assert_eq!(payment.direction, Direction::Inflow);
        assert_eq!(payment.amount, dec("500.00"));
        assert_eq!(payment.transaction_type, TransactionType::TransferIn);
        assert_eq!(payment.fragment_matched, Some(false));
    }

    #[test]
    fn test_rbc_joins_descriptions_and_records_account_fragment() {
        let n = FieldNormalizer::new(StatementFormat::RbcChecking, &ImportSettings::default(), None);
        let acct = account().with_account_number("5012345");
        let tx = n
            .normalize(
                &raw(&[
                    ("Account Type", "Chequing"),
                    ("Account Number", "06062-5012345"),
                    ("Transaction Date", "3/4/2024"),
                    ("Cheque Number", ""),
                    ("Description 1", "PAYROLL DEPOSIT"),
                    ("Description 2", "ACME CORP"),
                    ("CAD$", "2,500.00"),
                    ("USD$", ""),
                ]),
                &acct,
            )
            .unwrap();
        assert_eq!(tx.description, "PAYROLL DEPOSIT - ACME CORP");
        assert_eq!(tx.merchant.as_deref(), Some("PAYROLL DEPOSIT"));
        assert_eq!(tx.direction, Direction::Inflow);
        assert_eq!(tx.transaction_type, TransactionType::Income);
        assert_eq!(tx.account_fragment.as_deref(), Some("2345"));
        assert_eq!(tx.fragment_matched, Some(true));
        assert_eq!(tx.currency, "CAD");
    }

    #[test]
    fn test_rbc_merchant_is_the_first_description_cell() {
        let n = FieldNormalizer::new(StatementFormat::RbcChecking, &ImportSettings::default(), None);
        let tx = n
            .normalize(
                &raw(&[
                    ("Account Number", "06062-5012345"),
                    ("Transaction Date", "3/5/2024"),
                    ("Description 1", "E-TRANSFER SENT"),
                    ("Description 2", "JOHN DOE"),
                    ("CAD$", "-40.00"),
                ]),
                &account(),
            )
            .unwrap();
        assert_eq!(tx.description, "E-TRANSFER SENT - JOHN DOE");
        assert_eq!(tx.merchant.as_deref(), Some("E-TRANSFER SENT"));
    }

    #[test]
    fn test_profile_mappings_and_flip_signs() {
        let profile = ImportProfile {
            column_mappings: Some(ColumnMappings {
                date: "Posted".to_string(),
                amount: "Value".to_string(),
                description: Some("Payee".to_string()),
                ..Default::default()
            }),
            options: ImportOptions {
                flip_signs: true,
                number_format: NumberFormat::Us,
            },
            ..Default::default()
        };
        let n = FieldNormalizer::new(StatementFormat::GenericCsv, &ImportSettings::default(), Some(&profile));
        let tx = n
            .normalize(&raw(&[("Posted", "2024-02-02"), ("Payee", "Grocer"), ("Value", "30.00")]), &account())
            .unwrap();
        assert_eq!(tx.direction, Direction::Outflow);
        assert_eq!(tx.amount, dec("30.00"));
    }

    #[test]
    fn test_detect_columns_prefers_exact_aliases() {
        let layout = detect_columns(&["Posted Date", "Transaction Date", "Description", "Debit", "Credit"]);
        assert_eq!(layout.date.as_deref(), Some("Transaction Date"));
        assert_eq!(layout.posted_date.as_deref(), Some("Posted Date"));
        assert_eq!(layout.description, vec!["Description".to_string()]);
        assert_eq!(layout.debit.as_deref(), Some("Debit"));
        assert_eq!(layout.credit.as_deref(), Some("Credit"));
        assert!(layout.amount.is_none());

        let layout = detect_columns(&["Date", "Amount", "Memo", "Debit Amount"]);
        assert_eq!(layout.amount.as_deref(), Some("Amount"));
        assert!(layout.debit.is_none());
    }

    #[test]
    fn test_transfer_classification() {
        assert_eq!(
            classify(StatementFormat::GenericCsv, "E-TRANSFER SENT", Direction::Outflow),
            TransactionType::TransferOut
        );
        assert_eq!(
            classify(StatementFormat::GenericCsv, "Amazon refund", Direction::Inflow),
            TransactionType::Refund
        );
        assert_eq!(
            classify(StatementFormat::GenericCsv, "PAYMENT RECEIVED", Direction::Inflow),
            TransactionType::Income
        );
    }
}
