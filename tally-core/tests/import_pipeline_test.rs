//! End-to-end import pipeline tests against an on-disk DuckDB store
//!
//! Run with: cargo test --test import_pipeline_test

use std::sync::Arc;

use rust_decimal::Decimal;
use tempfile::TempDir;
use uuid::Uuid;

use tally_core::domain::{
    Account, BatchStatus, Direction, MatchField, MatchType, RowStatus, StatementFormat,
    TransactionType,
};
use tally_core::ports::{AccountRegistry, BatchFilter, LedgerRepository, Pagination};
use tally_core::services::{NewImport, NewRule};
use tally_core::{Error, TallyContext};

const GENERIC_CSV: &str = "Date,Description,Amount\n\
                           2024-02-01,STARBUCKS #881,-6.75\n\
                           2024-02-02,ACME PAYROLL,2500.00\n\
                           2024-02-03,SHELL OIL 5531,-48.10\n\
                           2024-02-04,NETFLIX.COM,-15.99\n";

const CIBC_CSV: &str = "2024-03-01,STARBUCKS COFFEE #1234,5.25,,4505********1234\n\
                        2024-03-05,PAYMENT THANK YOU,,500.00,4505********1234\n\
                        2024-03-07,AMAZON.CA MARKETPLACE,42.10,,4505********1234\n";

const RBC_CSV: &str = "\"Account Type\",\"Account Number\",\"Transaction Date\",\"Cheque Number\",\"Description 1\",\"Description 2\",\"CAD$\",\"USD$\"\n\
                       Chequing,06062-5012345,03/15/2024,,\"E-TRANSFER SENT\",\"JOHN DOE\",-100.00,,\n\
                       Chequing,06062-5012345,03/16/2024,,\"PAYROLL DEPOSIT\",\"ACME CORP\",1850.25,,\n";

#[cfg(feature = "excel")]
const STATEMENT_XLSX: &[u8] = include_bytes!("fixtures/statement.xlsx");

struct Fixture {
    _dir: TempDir,
    ctx: TallyContext,
    account: Account,
}

async fn fixture() -> Fixture {
    let dir = TempDir::new().unwrap();
    let ctx = TallyContext::new(dir.path()).unwrap();
    let account = Account::new(Uuid::new_v4(), "Visa".to_string())
        .with_currency("CAD")
        .with_account_number("06062-5012345")
        .with_card_last4("1234");
    ctx.repository.add_account(&account).await.unwrap();
    Fixture {
        _dir: dir,
        ctx,
        account,
    }
}

fn upload(account: &Account, file_name: &str, bytes: &[u8]) -> NewImport {
    NewImport {
        file_name: file_name.to_string(),
        bytes: bytes.to_vec(),
        account_id: account.id,
        user_id: "local".to_string(),
        format: None,
        profile: None,
    }
}

#[tokio::test]
async fn test_generic_csv_import_commits_every_row() {
    let f = fixture().await;
    let coordinator = &f.ctx.coordinator;

    let batch = coordinator
        .create(upload(&f.account, "february.csv", GENERIC_CSV.as_bytes()))
        .await
        .unwrap();
    assert_eq!(batch.row_count, 4);
    assert_eq!(batch.statement_format, Some(StatementFormat::GenericCsv));

    let outcome = coordinator.process(batch.id, true).await.unwrap();
    assert_eq!(outcome.batch.status, BatchStatus::Completed);
    assert_eq!(outcome.batch.processed_count, 4);
    assert_eq!(outcome.committed.len(), 4);
    assert!(outcome.failed.is_empty());

    let rows = coordinator.rows(batch.id).await.unwrap();
    assert!(rows.iter().all(|r| r.status == RowStatus::Committed));
    assert!(rows.iter().all(|r| r.transaction_id.is_some()));

    let transactions = coordinator.transactions(batch.id).await.unwrap();
    assert_eq!(transactions.len(), 4);
    let payroll = transactions
        .iter()
        .find(|t| t.description == "ACME PAYROLL")
        .unwrap();
    assert_eq!(payroll.amount, Decimal::new(250000, 2));
    assert_eq!(payroll.direction, Direction::Inflow);
    assert_eq!(payroll.currency, "CAD");
    assert_eq!(payroll.metadata["raw"]["Amount"], "2500.00");
}

#[tokio::test]
async fn test_cibc_statement_is_inferred_and_signed_by_column() {
    let f = fixture().await;
    let coordinator = &f.ctx.coordinator;

    let batch = coordinator
        .create(upload(&f.account, "cibc.csv", CIBC_CSV.as_bytes()))
        .await
        .unwrap();
    assert_eq!(batch.statement_format, Some(StatementFormat::CibcCredit));

    let outcome = coordinator.process(batch.id, false).await.unwrap();
    let summary = outcome.summary();
    assert_eq!(summary.normalized, 3);
    assert_eq!(summary.errors, 0);

    let coffee = outcome.rows[0].normalized.as_ref().unwrap();
    assert_eq!(coffee.amount, Decimal::new(525, 2));
    assert_eq!(coffee.direction, Direction::Outflow);
    assert_eq!(coffee.transaction_type, TransactionType::Expense);
    assert_eq!(coffee.card_last4.as_deref(), Some("1234"));
    assert_eq!(coffee.fragment_matched, Some(true));

    let payment = outcome.rows[1].normalized.as_ref().unwrap();
    assert_eq!(payment.amount, Decimal::new(50000, 2));
    assert_eq!(payment.direction, Direction::Inflow);
    assert_eq!(payment.transaction_type, TransactionType::TransferIn);
}

#[tokio::test]
async fn test_rbc_statement_joins_descriptions() {
    let f = fixture().await;
    let coordinator = &f.ctx.coordinator;

    let batch = coordinator
        .create(upload(&f.account, "rbc.csv", RBC_CSV.as_bytes()))
        .await
        .unwrap();
    assert_eq!(batch.statement_format, Some(StatementFormat::RbcChecking));
    assert_eq!(batch.row_count, 2);

    let outcome = coordinator.process(batch.id, false).await.unwrap();
    let transfer = outcome.rows[0].normalized.as_ref().unwrap();
    assert_eq!(transfer.description, "E-TRANSFER SENT - JOHN DOE");
    assert_eq!(transfer.merchant.as_deref(), Some("E-TRANSFER SENT"));
    assert_eq!(transfer.direction, Direction::Outflow);
    assert_eq!(transfer.amount, Decimal::new(10000, 2));
    assert_eq!(transfer.transaction_type, TransactionType::TransferOut);
    assert_eq!(transfer.currency, "CAD");
    assert_eq!(transfer.account_fragment.as_deref(), Some("2345"));
    assert_eq!(transfer.fragment_matched, Some(true));

    let deposit = outcome.rows[1].normalized.as_ref().unwrap();
    assert_eq!(deposit.direction, Direction::Inflow);
    assert_eq!(deposit.amount, Decimal::new(185025, 2));
}

#[cfg(feature = "excel")]
#[tokio::test]
async fn test_excel_workbook_is_inferred_from_zip_magic() {
    let f = fixture().await;
    let coordinator = &f.ctx.coordinator;

    // no extension and no declared format
    let batch = coordinator
        .create(upload(&f.account, "download", STATEMENT_XLSX))
        .await
        .unwrap();
    assert_eq!(batch.statement_format, Some(StatementFormat::Excel));
    assert_eq!(batch.row_count, 3);

    let rows = coordinator.rows(batch.id).await.unwrap();
    let numbers: Vec<u32> = rows.iter().map(|r| r.row_number).collect();
    assert_eq!(numbers, vec![1, 2, 3]);
    assert_eq!(rows[0].raw["Date"], "2024-01-01");

    let outcome = coordinator.process(batch.id, false).await.unwrap();
    let coffee = outcome.rows[0].normalized.as_ref().unwrap();
    assert_eq!(coffee.transaction_date.to_string(), "2024-01-01");
    assert_eq!(coffee.description, "STARBUCKS #881");
    assert_eq!(coffee.direction, Direction::Outflow);
    assert_eq!(coffee.amount, Decimal::new(450, 2));

    let fuel = outcome.rows[2].normalized.as_ref().unwrap();
    assert_eq!(fuel.transaction_date.to_string(), "2024-01-03");
}

#[tokio::test]
async fn test_binary_upload_leaves_error_batch() {
    let f = fixture().await;
    let coordinator = &f.ctx.coordinator;
    let garbage: &[u8] = &[0x80, 0x81, 0xfe, 0x00, 0x12, 0x9f];

    let err = coordinator
        .create(upload(&f.account, "statement.csv", garbage))
        .await
        .unwrap_err();
    let batch_id = match err {
        Error::MalformedFile {
            batch_id: Some(id), ..
        } => id,
        other => panic!("expected a malformed file error, got {:?}", other),
    };

    let batch = coordinator.get(batch_id).await.unwrap();
    assert_eq!(batch.status, BatchStatus::Error);
    assert!(batch.error_message.is_some());
    assert_eq!(batch.row_count, 0);
    assert!(coordinator.rows(batch_id).await.unwrap().is_empty());

    let err = coordinator.process(batch_id, false).await.unwrap_err();
    assert!(matches!(err, Error::InvalidState(_)));
}

#[tokio::test]
async fn test_partial_confirmations_commit_each_row_once() {
    let f = fixture().await;
    let coordinator = &f.ctx.coordinator;

    let batch = coordinator
        .create(upload(&f.account, "february.csv", GENERIC_CSV.as_bytes()))
        .await
        .unwrap();
    coordinator.process(batch.id, false).await.unwrap();

    let first = coordinator.confirm(batch.id, Some(vec![2, 3])).await.unwrap();
    assert_eq!(first.committed.len(), 2);

    let second = coordinator
        .confirm(batch.id, Some(vec![2, 3, 4]))
        .await
        .unwrap();
    assert_eq!(second.committed.len(), 1);
    assert_eq!(second.skipped.len(), 2);

    let rows = coordinator.rows(batch.id).await.unwrap();
    let statuses: Vec<RowStatus> = rows.iter().map(|r| r.status).collect();
    assert_eq!(
        statuses,
        vec![
            RowStatus::Normalized,
            RowStatus::Committed,
            RowStatus::Committed,
            RowStatus::Committed
        ]
    );
    assert_eq!(coordinator.transactions(batch.id).await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_concurrent_confirms_do_not_duplicate() {
    let f = fixture().await;
    let batch = f
        .ctx
        .coordinator
        .create(upload(&f.account, "february.csv", GENERIC_CSV.as_bytes()))
        .await
        .unwrap();
    f.ctx.coordinator.process(batch.id, false).await.unwrap();

    let repository = Arc::clone(&f.ctx.repository);
    let coordinator = Arc::new(tally_core::services::ImportBatchCoordinator::new(
        Arc::clone(&repository),
        f.ctx.config.import.clone(),
    ));

    let mut handles = Vec::new();
    for _ in 0..4 {
        let coordinator = Arc::clone(&coordinator);
        handles.push(tokio::spawn(async move {
            coordinator.confirm(batch.id, None).await
        }));
    }

    let mut committed = 0;
    for handle in handles {
        let outcome = handle.await.unwrap().unwrap();
        assert!(outcome.failed.is_empty());
        committed += outcome.committed.len();
    }
    assert_eq!(committed, 4);
    assert_eq!(
        repository.get_transactions_by_batch(batch.id).await.unwrap().len(),
        4
    );
}

#[tokio::test]
async fn test_rules_apply_during_processing() {
    let f = fixture().await;
    f.ctx
        .rule_service
        .create(
            "local",
            NewRule {
                category_id: "entertainment_movie".to_string(),
                field: MatchField::Description,
                match_type: MatchType::Contains,
                pattern: "netflix".to_string(),
                priority: 10,
                is_active: true,
            },
        )
        .await
        .unwrap();

    let batch = f
        .ctx
        .coordinator
        .create(upload(&f.account, "february.csv", GENERIC_CSV.as_bytes()))
        .await
        .unwrap();
    let outcome = f.ctx.coordinator.process(batch.id, false).await.unwrap();

    let categories: Vec<&str> = outcome
        .rows
        .iter()
        .map(|r| r.normalized.as_ref().unwrap().category_id.as_str())
        .collect();
    assert_eq!(
        categories,
        vec![
            "uncategorized",
            "uncategorized",
            "uncategorized",
            "entertainment_movie"
        ]
    );
}

#[tokio::test]
async fn test_batches_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let account = Account::new(Uuid::new_v4(), "Chequing".to_string()).with_currency("CAD");

    let batch_id = {
        let ctx = TallyContext::new(dir.path()).unwrap();
        ctx.repository.add_account(&account).await.unwrap();
        let batch = ctx
            .coordinator
            .create(upload(&account, "february.csv", GENERIC_CSV.as_bytes()))
            .await
            .unwrap();
        ctx.coordinator.process(batch.id, false).await.unwrap();
        batch.id
    };

    let ctx = TallyContext::new(dir.path()).unwrap();
    let batch = ctx.coordinator.get(batch_id).await.unwrap();
    assert_eq!(batch.status, BatchStatus::Completed);

    let listed = ctx
        .coordinator
        .list(
            &BatchFilter {
                account_id: Some(account.id),
                ..Default::default()
            },
            Pagination::default(),
        )
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);

    let rows = ctx.coordinator.rows(batch_id).await.unwrap();
    assert_eq!(rows.len(), 4);
    assert!(rows.iter().all(|r| r.status == RowStatus::Normalized));
    assert_eq!(
        rows[0].normalized.as_ref().unwrap().amount,
        Decimal::new(675, 2)
    );
}
