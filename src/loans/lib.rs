use anyhow::Result;
use chrono::{Months, NaiveDate};
use serde::Deserialize;

use crate::catalog::Catalog;
use crate::config::LoanPolicy;
use crate::db::Database;
use crate::error::{LoanRejection, OpError, OpResult};
use crate::model::{Book, BorrowRecord};
use crate::readers::Readers;
use crate::validate::non_empty;

pub type LoanResult<T> = OpResult<T, LoanRejection>;

/// Body of `/borrow` and `/return`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoanRequest {
    #[serde(rename = "rID", default, deserialize_with = "non_empty")]
    pub reader_id: Option<String>,
    #[serde(rename = "bID", default, deserialize_with = "non_empty")]
    pub book_id: Option<String>,
}

fn iso(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub fn due_date(borrowed: NaiveDate, policy: &LoanPolicy) -> Result<NaiveDate> {
    borrowed
        .checked_add_months(Months::new(policy.loan_months))
        .ok_or_else(|| anyhow::anyhow!("due date out of range for loan starting {borrowed}"))
}

/// Borrow and return. A loan moves from outstanding to closed exactly once
/// and closed records are never touched again.
pub struct Loans<'a> {
    db: &'a Database,
    policy: LoanPolicy,
}

impl<'a> Loans<'a> {
    pub fn new(db: &'a Database, policy: LoanPolicy) -> Self {
        Self { db, policy }
    }

    pub async fn get_record(&self, id: i64) -> Result<Option<BorrowRecord>> {
        let query = format!("SELECT {} FROM borrow_records WHERE id = ?", BorrowRecord::COLUMNS);
        let mut rows = self.db.connection().query(&query, libsql::params![id]).await?;

        if let Some(row) = rows.next().await? {
            Ok(Some(BorrowRecord::from_row(&row)?))
        } else {
            Ok(None)
        }
    }

    async fn exists(&self, query: &str, params: Vec<libsql::Value>) -> Result<bool> {
        let mut rows = self.db.connection().query(query, params).await?;
        Ok(rows.next().await?.is_some())
    }

    async fn require_parties(&self, request: &LoanRequest) -> LoanResult<(String, Book)> {
        let reader_id = match request.reader_id.as_deref() {
            Some(id) if Readers::new(self.db).get_reader(id).await?.is_some() => id.to_string(),
            _ => return Err(OpError::Rejected(LoanRejection::UnknownReader)),
        };
        let book = match request.book_id.as_deref() {
            Some(id) => Catalog::new(self.db).get_book(id).await?,
            None => None,
        };
        match book {
            Some(book) => Ok((reader_id, book)),
            None => Err(OpError::Rejected(LoanRejection::UnknownBook)),
        }
    }

    /// Lends one copy of a book to a reader. Preconditions are checked in a
    /// fixed order and the first failing one is reported.
    pub async fn borrow(&self, request: LoanRequest, today: NaiveDate) -> LoanResult<BorrowRecord> {
        let tx = self.db.write().await?;
        let result = self.borrow_internal(&request, today).await;
        tx.finish(result).await
    }

    async fn borrow_internal(&self, request: &LoanRequest, today: NaiveDate) -> LoanResult<BorrowRecord> {
        let (reader_id, book) = self.require_parties(request).await?;

        // a reader asking again for a copy they hold hears that first, even
        // when it was the last copy
        let already = self
            .exists(
                "SELECT 1 FROM borrow_records WHERE reader_id = ? AND book_id = ? AND return_date IS NULL",
                vec![reader_id.clone().into(), book.id.clone().into()],
            )
            .await?;
        if already {
            return Err(OpError::Rejected(LoanRejection::AlreadyBorrowed));
        }

        if book.remaining <= 0 {
            return Err(OpError::Rejected(LoanRejection::FullyBorrowed));
        }

        let overdue = self
            .exists(
                "SELECT 1 FROM borrow_records WHERE reader_id = ? AND return_date IS NULL AND due_date < ?",
                vec![reader_id.clone().into(), iso(today).into()],
            )
            .await?;
        if overdue {
            return Err(OpError::Rejected(LoanRejection::HasOverdue));
        }

        let outstanding = Readers::new(self.db).outstanding_count(&reader_id).await?;
        if outstanding >= i64::from(self.policy.max_outstanding) {
            return Err(OpError::Rejected(LoanRejection::LimitReached));
        }

        // conditional so a copy can never be lent twice
        let taken = self
            .db
            .connection()
            .execute(
                "UPDATE books SET remaining = remaining - 1 WHERE id = ? AND remaining > 0",
                libsql::params![book.id.clone()],
            )
            .await?;
        if taken == 0 {
            return Err(OpError::Rejected(LoanRejection::FullyBorrowed));
        }

        let due = due_date(today, &self.policy)?;
        let query = format!(
            r#"
            INSERT INTO borrow_records (book_id, reader_id, borrow_date, due_date)
            VALUES (?, ?, ?, ?)
            RETURNING {}
            "#,
            BorrowRecord::COLUMNS
        );
        let mut rows = self
            .db
            .connection()
            .query(&query, libsql::params![book.id.clone(), reader_id.clone(), iso(today), iso(due)])
            .await?;

        let record = match rows.next().await? {
            Some(row) => BorrowRecord::from_row(&row)?,
            None => return Err(anyhow::anyhow!("failed to create borrow record").into()),
        };
        tracing::info!(
            record_id = record.id,
            reader_id = %reader_id,
            book_id = %book.id,
            due_date = %record.due_date,
            "book lent"
        );
        Ok(record)
    }

    /// Closes the reader's most recent outstanding loan of the book and puts
    /// the copy back on the shelf.
    pub async fn return_book(&self, request: LoanRequest, today: NaiveDate) -> LoanResult<BorrowRecord> {
        let tx = self.db.write().await?;
        let result = self.return_book_internal(&request, today).await;
        tx.finish(result).await
    }

    async fn return_book_internal(&self, request: &LoanRequest, today: NaiveDate) -> LoanResult<BorrowRecord> {
        let (reader_id, book) = self.require_parties(request).await?;

        let query = format!(
            r#"
            SELECT {} FROM borrow_records
            WHERE reader_id = ? AND book_id = ? AND return_date IS NULL
            ORDER BY id DESC
            LIMIT 1
            "#,
            BorrowRecord::COLUMNS
        );
        let mut rows = self
            .db
            .connection()
            .query(&query, libsql::params![reader_id.clone(), book.id.clone()])
            .await?;
        let record = match rows.next().await? {
            Some(row) => BorrowRecord::from_row(&row)?,
            None => return Err(OpError::Rejected(LoanRejection::NotBorrowed)),
        };
        drop(rows);

        self.db
            .connection()
            .execute(
                "UPDATE borrow_records SET return_date = ? WHERE id = ? AND return_date IS NULL",
                libsql::params![iso(today), record.id],
            )
            .await?;

        let restored = self
            .db
            .connection()
            .execute(
                "UPDATE books SET remaining = remaining + 1 WHERE id = ? AND remaining < total",
                libsql::params![book.id.clone()],
            )
            .await?;
        if restored == 0 {
            tracing::warn!(book_id = %book.id, "returned copy does not fit in book total, count left unchanged");
        }

        let closed = self
            .get_record(record.id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("borrow record {} vanished during return", record.id))?;
        tracing::info!(record_id = closed.id, reader_id = %reader_id, book_id = %book.id, "book returned");
        Ok(closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use crate::catalog::{ChangeCount, CreateBook};
    use crate::readers::CreateReader;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn request(reader: &str, book: &str) -> LoanRequest {
        LoanRequest {
            reader_id: Some(reader.to_string()),
            book_id: Some(book.to_string()),
        }
    }

    async fn add_book(db: &Database, id: &str, count: i64) {
        Catalog::new(db)
            .create_book(CreateBook {
                id: Some(id.to_string()),
                name: Some(format!("Book {id}")),
                count: Some(count.to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
    }

    async fn add_reader(db: &Database, id: &str) {
        Readers::new(db)
            .create_reader(CreateReader {
                id: Some(id.to_string()),
                name: Some(format!("Reader {id}")),
                sex: Some("female".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
    }

    async fn remaining(db: &Database, id: &str) -> i64 {
        Catalog::new(db).get_book(id).await.unwrap().unwrap().remaining
    }

    fn rejection<T: std::fmt::Debug>(result: LoanResult<T>) -> LoanRejection {
        match result {
            Err(OpError::Rejected(r)) => r,
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn test_due_date_adds_months() {
        let policy = LoanPolicy::default();
        assert_eq!(due_date(date("2024-03-15"), &policy).unwrap(), date("2024-05-15"));
        assert_eq!(due_date(date("2023-12-31"), &policy).unwrap(), date("2024-02-29"));
    }

    #[tokio::test]
    async fn test_borrow_then_return() {
        let db = Database::in_memory().await.unwrap();
        add_book(&db, "b1", 1).await;
        add_reader(&db, "r1").await;
        add_reader(&db, "r2").await;
        let loans = Loans::new(&db, LoanPolicy::default());
        let today = date("2024-03-15");

        let record = loans.borrow(request("r1", "b1"), today).await.unwrap();
        assert_eq!(record.return_date, None);
        assert_eq!(record.borrow_date, "2024-03-15");
        assert_eq!(record.due_date, "2024-05-15");
        assert_eq!(remaining(&db, "b1").await, 0);

        assert_eq!(
            rejection(loans.borrow(request("r1", "b1"), today).await),
            LoanRejection::AlreadyBorrowed
        );
        assert_eq!(
            rejection(loans.borrow(request("r2", "b1"), today).await),
            LoanRejection::FullyBorrowed
        );

        let closed = loans.return_book(request("r1", "b1"), date("2024-04-01")).await.unwrap();
        assert_eq!(closed.id, record.id);
        assert_eq!(closed.return_date.as_deref(), Some("2024-04-01"));
        assert_eq!(remaining(&db, "b1").await, 1);

        assert_eq!(
            rejection(loans.return_book(request("r1", "b1"), today).await),
            LoanRejection::NotBorrowed
        );
    }

    #[tokio::test]
    async fn test_already_borrowed_when_copies_remain() {
        let db = Database::in_memory().await.unwrap();
        add_book(&db, "b1", 2).await;
        add_reader(&db, "r1").await;
        let loans = Loans::new(&db, LoanPolicy::default());
        let today = date("2024-03-15");

        loans.borrow(request("r1", "b1"), today).await.unwrap();
        assert_eq!(
            rejection(loans.borrow(request("r1", "b1"), today).await),
            LoanRejection::AlreadyBorrowed
        );
        assert_eq!(remaining(&db, "b1").await, 1);
    }

    #[tokio::test]
    async fn test_unknown_parties() {
        let db = Database::in_memory().await.unwrap();
        add_book(&db, "b1", 1).await;
        add_reader(&db, "r1").await;
        let loans = Loans::new(&db, LoanPolicy::default());
        let today = date("2024-03-15");

        assert_eq!(rejection(loans.borrow(request("rx", "b1"), today).await), LoanRejection::UnknownReader);
        assert_eq!(rejection(loans.borrow(request("rx", "bx"), today).await), LoanRejection::UnknownReader);
        assert_eq!(rejection(loans.borrow(request("r1", "bx"), today).await), LoanRejection::UnknownBook);
        assert_eq!(
            rejection(loans.borrow(LoanRequest::default(), today).await),
            LoanRejection::UnknownReader
        );
        assert_eq!(rejection(loans.return_book(request("rx", "b1"), today).await), LoanRejection::UnknownReader);
        assert_eq!(rejection(loans.return_book(request("r1", "bx"), today).await), LoanRejection::UnknownBook);
    }

    #[tokio::test]
    async fn test_overdue_reader_is_blocked() {
        let db = Database::in_memory().await.unwrap();
        add_book(&db, "b1", 1).await;
        add_book(&db, "b2", 1).await;
        add_reader(&db, "r1").await;
        let loans = Loans::new(&db, LoanPolicy::default());

        loans.borrow(request("r1", "b1"), date("2024-01-10")).await.unwrap();
        // due 2024-03-10
        loans.borrow(request("r1", "b2"), date("2024-03-10")).await.unwrap();
        loans.return_book(request("r1", "b2"), date("2024-03-10")).await.unwrap();

        assert_eq!(
            rejection(loans.borrow(request("r1", "b2"), date("2024-03-11")).await),
            LoanRejection::HasOverdue
        );
        assert_eq!(remaining(&db, "b2").await, 1);
    }

    #[tokio::test]
    async fn test_borrow_limit() {
        let db = Database::in_memory().await.unwrap();
        add_reader(&db, "r1").await;
        for i in 0..6 {
            add_book(&db, &format!("b{i}"), 3).await;
        }
        let loans = Loans::new(&db, LoanPolicy::default());
        let today = date("2024-03-15");

        for i in 0..5 {
            loans.borrow(request("r1", &format!("b{i}")), today).await.unwrap();
        }
        assert_eq!(
            rejection(loans.borrow(request("r1", "b5"), today).await),
            LoanRejection::LimitReached
        );
        assert_eq!(remaining(&db, "b5").await, 3);
    }

    #[tokio::test]
    async fn test_configured_policy() {
        let db = Database::in_memory().await.unwrap();
        add_reader(&db, "r1").await;
        add_book(&db, "b1", 1).await;
        add_book(&db, "b2", 1).await;
        let policy = LoanPolicy {
            max_outstanding: 1,
            loan_months: 1,
        };
        let loans = Loans::new(&db, policy);

        let record = loans.borrow(request("r1", "b1"), date("2024-01-31")).await.unwrap();
        assert_eq!(record.due_date, "2024-02-29");
        assert_eq!(
            rejection(loans.borrow(request("r1", "b2"), date("2024-01-31")).await),
            LoanRejection::LimitReached
        );
    }

    #[tokio::test]
    async fn test_return_closes_latest_outstanding() {
        let db = Database::in_memory().await.unwrap();
        add_book(&db, "b1", 3).await;
        add_reader(&db, "r1").await;
        // two outstanding rows for one pair can only come from older data
        for borrowed in ["2024-01-01", "2024-01-05"] {
            db.connection()
                .execute(
                    "INSERT INTO borrow_records (book_id, reader_id, borrow_date, due_date) VALUES ('b1', 'r1', ?, '2099-01-01')",
                    libsql::params![borrowed],
                )
                .await
                .unwrap();
        }
        db.connection()
            .execute("UPDATE books SET remaining = 1 WHERE id = 'b1'", ())
            .await
            .unwrap();
        let loans = Loans::new(&db, LoanPolicy::default());

        let closed = loans.return_book(request("r1", "b1"), date("2024-02-01")).await.unwrap();
        assert_eq!(closed.borrow_date, "2024-01-05");
        let older = loans.get_record(closed.id - 1).await.unwrap().unwrap();
        assert_eq!(older.return_date, None);
        assert_eq!(remaining(&db, "b1").await, 2);
    }

    #[tokio::test]
    async fn test_counts_stay_within_bounds() {
        let db = Database::in_memory().await.unwrap();
        add_book(&db, "b1", 2).await;
        for r in ["r1", "r2", "r3"] {
            add_reader(&db, r).await;
        }
        let loans = Loans::new(&db, LoanPolicy::default());
        let today = date("2024-03-15");

        loans.borrow(request("r1", "b1"), today).await.unwrap();
        loans.borrow(request("r2", "b1"), today).await.unwrap();
        assert!(loans.borrow(request("r3", "b1"), today).await.is_err());

        // lent copies cannot be withdrawn
        let withdraw = Catalog::new(&db)
            .remove_copies(ChangeCount {
                id: Some("b1".into()),
                count: Some("1".into()),
            })
            .await;
        assert!(withdraw.is_err());

        loans.return_book(request("r1", "b1"), today).await.unwrap();
        loans.return_book(request("r2", "b1"), today).await.unwrap();
        let book = Catalog::new(&db).get_book("b1").await.unwrap().unwrap();
        assert_eq!((book.total, book.remaining), (2, 2));
    }

    #[tokio::test]
    async fn test_concurrent_borrows_share_last_copy() {
        let db = Database::in_memory().await.unwrap();
        add_book(&db, "b1", 1).await;
        add_reader(&db, "r1").await;
        add_reader(&db, "r2").await;
        let loans = Loans::new(&db, LoanPolicy::default());
        let today = date("2024-03-15");

        let (first, second) = tokio::join!(
            loans.borrow(request("r1", "b1"), today),
            loans.borrow(request("r2", "b1"), today),
        );
        let (lent, refused) = match (first, second) {
            (Ok(record), Err(e)) | (Err(e), Ok(record)) => (record, e),
            other => panic!("expected exactly one loan, got {other:?}"),
        };
        assert_eq!(rejection::<()>(Err(refused)), LoanRejection::FullyBorrowed);
        assert_eq!(lent.book_id, "b1");
        assert_eq!(remaining(&db, "b1").await, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_parallel_borrows_never_overlend() {
        let db = Arc::new(Database::in_memory().await.unwrap());
        add_book(&db, "b1", 2).await;
        let readers = ["r1", "r2", "r3", "r4", "r5"];
        for id in readers {
            add_reader(&db, id).await;
        }

        let tasks: Vec<_> = readers
            .into_iter()
            .map(|reader| {
                let db = db.clone();
                tokio::spawn(async move {
                    Loans::new(&db, LoanPolicy::default())
                        .borrow(request(reader, "b1"), date("2024-03-15"))
                        .await
                })
            })
            .collect();

        let mut lent = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => lent += 1,
                Err(e) => assert_eq!(rejection::<()>(Err(e)), LoanRejection::FullyBorrowed),
            }
        }
        assert_eq!(lent, 2);
        assert_eq!(remaining(&db, "b1").await, 0);

        let outstanding: i64 = {
            let _guard = db.lock().await;
            let mut rows = db
                .connection()
                .query("SELECT COUNT(*) FROM borrow_records WHERE return_date IS NULL", ())
                .await
                .unwrap();
            rows.next().await.unwrap().unwrap().get(0).unwrap()
        };
        assert_eq!(outstanding, 2);
    }
}
