use anyhow::Result;
use serde::Deserialize;

use crate::db::Database;
use crate::error::{BookRejection, OpError, OpResult};
use crate::model::Book;
use crate::validate::{Violations, non_empty};

pub const ID_MAX: usize = 30;
pub const TEXT_MAX: usize = 30;

pub type BookResult<T> = OpResult<T, BookRejection>;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateBook {
    #[serde(rename = "bID", default, deserialize_with = "non_empty")]
    pub id: Option<String>,
    #[serde(rename = "bName", default, deserialize_with = "non_empty")]
    pub name: Option<String>,
    #[serde(rename = "bPub", default, deserialize_with = "non_empty")]
    pub publisher: Option<String>,
    #[serde(rename = "bDate", default, deserialize_with = "non_empty")]
    pub published: Option<String>,
    #[serde(rename = "bAuthor", default, deserialize_with = "non_empty")]
    pub author: Option<String>,
    #[serde(rename = "bMem", default, deserialize_with = "non_empty")]
    pub memo: Option<String>,
    #[serde(rename = "bCnt", default, deserialize_with = "non_empty")]
    pub count: Option<String>,
}

/// Body of `/addBook` and `/delBook`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChangeCount {
    #[serde(rename = "bID", default, deserialize_with = "non_empty")]
    pub id: Option<String>,
    #[serde(rename = "bCnt", default, deserialize_with = "non_empty")]
    pub count: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateBook {
    #[serde(rename = "bID", default, deserialize_with = "non_empty")]
    pub id: Option<String>,
    #[serde(rename = "bName", default, deserialize_with = "non_empty")]
    pub name: Option<String>,
    #[serde(rename = "bPub", default, deserialize_with = "non_empty")]
    pub publisher: Option<String>,
    #[serde(rename = "bDate", default, deserialize_with = "non_empty")]
    pub published: Option<String>,
    #[serde(rename = "bAuthor", default, deserialize_with = "non_empty")]
    pub author: Option<String>,
    #[serde(rename = "bMem", default, deserialize_with = "non_empty")]
    pub memo: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchBooks {
    #[serde(rename = "bID", default, deserialize_with = "non_empty")]
    pub id: Option<String>,
    #[serde(rename = "bName", default, deserialize_with = "non_empty")]
    pub name: Option<String>,
    #[serde(rename = "bPub", default, deserialize_with = "non_empty")]
    pub publisher: Option<String>,
    #[serde(rename = "bDate0", default, deserialize_with = "non_empty")]
    pub published_from: Option<String>,
    #[serde(rename = "bDate1", default, deserialize_with = "non_empty")]
    pub published_to: Option<String>,
    #[serde(rename = "bAuthor", default, deserialize_with = "non_empty")]
    pub author: Option<String>,
    #[serde(rename = "bMem", default, deserialize_with = "non_empty")]
    pub memo: Option<String>,
}

/// Validated set of book columns to overwrite. Only `Some` fields are
/// written.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookPatch {
    pub name: Option<String>,
    pub publisher: Option<String>,
    pub published: Option<String>,
    pub author: Option<String>,
    pub memo: Option<String>,
}

impl BookPatch {
    pub fn is_empty(&self) -> bool {
        self.assignments().is_empty()
    }

    fn assignments(&self) -> Vec<(&'static str, String)> {
        [
            ("name", &self.name),
            ("publisher", &self.publisher),
            ("published", &self.published),
            ("author", &self.author),
            ("memo", &self.memo),
        ]
        .into_iter()
        .filter_map(|(column, value)| value.clone().map(|v| (column, v)))
        .collect()
    }
}

impl CreateBook {
    fn validate(&self) -> BookResult<(String, i64)> {
        let mut v = Violations::new();
        v.required("bID", self.id.as_deref(), ID_MAX);
        v.required("bName", self.name.as_deref(), TEXT_MAX);
        v.optional("bPub", self.publisher.as_deref(), TEXT_MAX);
        v.date("bDate", self.published.as_deref());
        v.optional("bAuthor", self.author.as_deref(), TEXT_MAX);
        v.optional("bMem", self.memo.as_deref(), TEXT_MAX);
        let count = v.required_positive("bCnt", self.count.as_deref());
        v.into_result()?;

        match (&self.id, count) {
            (Some(id), Some(count)) => Ok((id.clone(), count)),
            _ => Err(anyhow::anyhow!("validated book input lost its id or count").into()),
        }
    }
}

impl ChangeCount {
    fn validate(&self) -> BookResult<(String, i64)> {
        let mut v = Violations::new();
        v.required("bID", self.id.as_deref(), ID_MAX);
        let count = v.required_positive("bCnt", self.count.as_deref());
        v.into_result()?;

        match (&self.id, count) {
            (Some(id), Some(count)) => Ok((id.clone(), count)),
            _ => Err(anyhow::anyhow!("validated count input lost its id or count").into()),
        }
    }
}

impl UpdateBook {
    fn validate(self) -> BookResult<(String, BookPatch)> {
        let mut v = Violations::new();
        v.required("bID", self.id.as_deref(), ID_MAX);
        v.optional("bName", self.name.as_deref(), TEXT_MAX);
        v.optional("bPub", self.publisher.as_deref(), TEXT_MAX);
        v.date("bDate", self.published.as_deref());
        v.optional("bAuthor", self.author.as_deref(), TEXT_MAX);
        v.optional("bMem", self.memo.as_deref(), TEXT_MAX);

        let patch = BookPatch {
            name: self.name,
            publisher: self.publisher,
            published: self.published,
            author: self.author,
            memo: self.memo,
        };
        if self.id.is_some() && v.is_empty() && patch.is_empty() {
            v.push("no book field to update");
        }
        v.into_result()?;

        let id = self
            .id
            .ok_or_else(|| anyhow::anyhow!("validated update lost its book id"))?;
        Ok((id, patch))
    }
}

impl SearchBooks {
    fn validate(&self) -> BookResult<()> {
        let mut v = Violations::new();
        v.optional("bID", self.id.as_deref(), ID_MAX);
        v.optional("bName", self.name.as_deref(), TEXT_MAX);
        v.optional("bPub", self.publisher.as_deref(), TEXT_MAX);
        v.date("bDate0", self.published_from.as_deref());
        v.date("bDate1", self.published_to.as_deref());
        v.optional("bAuthor", self.author.as_deref(), TEXT_MAX);
        v.optional("bMem", self.memo.as_deref(), TEXT_MAX);
        v.into_result()
    }

    /// WHERE fragments and their parameters. Text filters are case-sensitive
    /// substring matches; the date bounds are inclusive.
    fn filters(&self) -> (Vec<&'static str>, Vec<libsql::Value>) {
        let mut clauses = Vec::new();
        let mut params: Vec<libsql::Value> = Vec::new();

        let substrings = [
            ("instr(id, ?) > 0", &self.id),
            ("instr(name, ?) > 0", &self.name),
            ("instr(publisher, ?) > 0", &self.publisher),
            ("published >= ?", &self.published_from),
            ("published <= ?", &self.published_to),
            ("instr(author, ?) > 0", &self.author),
            ("instr(memo, ?) > 0", &self.memo),
        ];
        for (clause, value) in substrings {
            if let Some(value) = value {
                clauses.push(clause);
                params.push(value.clone().into());
            }
        }
        (clauses, params)
    }
}

pub struct Catalog<'a> {
    db: &'a Database,
}

impl<'a> Catalog<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    pub async fn get_book(&self, id: &str) -> Result<Option<Book>> {
        let query = format!("SELECT {} FROM books WHERE id = ?", Book::COLUMNS);
        let mut rows = self.db.connection().query(&query, libsql::params![id]).await?;

        if let Some(row) = rows.next().await? {
            Ok(Some(Book::from_row(&row)?))
        } else {
            Ok(None)
        }
    }

    async fn require_book(&self, id: &str) -> BookResult<Book> {
        self.get_book(id)
            .await?
            .ok_or(OpError::Rejected(BookRejection::NotFound))
    }

    /// Registers a new title with all of its copies on the shelf.
    pub async fn create_book(&self, input: CreateBook) -> BookResult<Book> {
        let (id, count) = input.validate()?;

        let tx = self.db.write().await?;
        let result = self.create_book_internal(&id, count, &input).await;
        tx.finish(result).await
    }

    async fn create_book_internal(&self, id: &str, count: i64, input: &CreateBook) -> BookResult<Book> {
        if self.get_book(id).await?.is_some() {
            return Err(OpError::Rejected(BookRejection::AlreadyExists));
        }

        let query = r#"
            INSERT INTO books (id, name, publisher, published, author, memo, total, remaining)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#;
        self.db
            .connection()
            .execute(
                query,
                libsql::params![
                    id,
                    input.name.clone(),
                    input.publisher.clone(),
                    input.published.clone(),
                    input.author.clone(),
                    input.memo.clone(),
                    count,
                    count
                ],
            )
            .await?;

        self.require_book(id).await
    }

    /// Adds `bCnt` copies; both the total and the available count grow.
    pub async fn add_copies(&self, input: ChangeCount) -> BookResult<Book> {
        let (id, delta) = input.validate()?;

        let tx = self.db.write().await?;
        let result = self.add_copies_internal(&id, delta).await;
        tx.finish(result).await
    }

    async fn add_copies_internal(&self, id: &str, delta: i64) -> BookResult<Book> {
        let book = self.require_book(id).await?;
        // SQLite turns an overflowing integer sum into a REAL
        let (Some(total), Some(remaining)) = (book.total.checked_add(delta), book.remaining.checked_add(delta)) else {
            return Err(OpError::Rejected(BookRejection::TooManyCopies));
        };

        self.db
            .connection()
            .execute(
                "UPDATE books SET total = ?, remaining = ? WHERE id = ?",
                libsql::params![total, remaining, id],
            )
            .await?;
        self.require_book(id).await
    }

    /// Withdraws `bCnt` copies from the shelf. Only copies currently in stock
    /// can be withdrawn. When that empties the title completely the row is
    /// deleted and `None` is returned.
    pub async fn remove_copies(&self, input: ChangeCount) -> BookResult<Option<Book>> {
        let (id, delta) = input.validate()?;

        let tx = self.db.write().await?;
        let result = self.remove_copies_internal(&id, delta).await;
        tx.finish(result).await
    }

    async fn remove_copies_internal(&self, id: &str, delta: i64) -> BookResult<Option<Book>> {
        let book = self.require_book(id).await?;
        if delta > book.remaining {
            return Err(OpError::Rejected(BookRejection::ExceedsRemaining));
        }

        if delta == book.remaining && book.remaining == book.total {
            tracing::info!(book_id = id, "last copies withdrawn, deleting book");
            self.db
                .connection()
                .execute("DELETE FROM books WHERE id = ?", libsql::params![id])
                .await?;
            return Ok(None);
        }

        self.db
            .connection()
            .execute(
                "UPDATE books SET total = total - ?, remaining = remaining - ? WHERE id = ?",
                libsql::params![delta, delta, id],
            )
            .await?;
        Ok(Some(self.require_book(id).await?))
    }

    pub async fn update_book(&self, input: UpdateBook) -> BookResult<Book> {
        let (id, patch) = input.validate()?;

        let tx = self.db.write().await?;
        let result = self.update_book_internal(&id, &patch).await;
        tx.finish(result).await
    }

    async fn update_book_internal(&self, id: &str, patch: &BookPatch) -> BookResult<Book> {
        self.require_book(id).await?;

        let mut updates = Vec::new();
        let mut params: Vec<libsql::Value> = Vec::new();
        for (column, value) in patch.assignments() {
            updates.push(format!("{column} = ?"));
            params.push(value.into());
        }
        params.push(id.to_string().into());

        let query = format!("UPDATE books SET {} WHERE id = ?", updates.join(", "));
        self.db.connection().execute(&query, params).await?;
        self.require_book(id).await
    }

    /// Books matching every supplied filter, ordered by id. No filters lists
    /// the whole catalog.
    pub async fn search_books(&self, input: SearchBooks) -> BookResult<Vec<Book>> {
        input.validate()?;

        let (clauses, params) = input.filters();
        let mut query = format!("SELECT {} FROM books", Book::COLUMNS);
        if !clauses.is_empty() {
            query.push_str(" WHERE ");
            query.push_str(&clauses.join(" AND "));
        }
        query.push_str(" ORDER BY id");
        tracing::debug!(query = %query, "searching books");

        let _guard = self.db.lock().await;
        let mut rows = self.db.connection().query(&query, params).await?;
        let mut books = Vec::new();
        while let Some(row) = rows.next().await? {
            books.push(Book::from_row(&row)?);
        }
        Ok(books)
    }
}
