use anyhow::Result;
use chrono::NaiveDate;
use serde::Deserialize;

use crate::db::Database;
use crate::error::{OpError, OpResult, ReaderRejection};
use crate::model::{Reader, Sex, UnreturnedLoan};
use crate::validate::{Violations, char_len, non_empty};

pub const ID_MAX: usize = 8;
pub const NAME_MAX: usize = 10;
pub const DEPT_MAX: usize = 10;

pub type ReaderResult<T> = OpResult<T, ReaderRejection>;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateReader {
    #[serde(rename = "rID", default, deserialize_with = "non_empty")]
    pub id: Option<String>,
    #[serde(rename = "rName", default, deserialize_with = "non_empty")]
    pub name: Option<String>,
    #[serde(rename = "rSex", default, deserialize_with = "non_empty")]
    pub sex: Option<String>,
    #[serde(rename = "rDept", default, deserialize_with = "non_empty")]
    pub dept: Option<String>,
    #[serde(rename = "rGrade", default, deserialize_with = "non_empty")]
    pub grade: Option<String>,
}

/// Body of `/delReader` and `/unReturn`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReaderId {
    #[serde(rename = "rID", default, deserialize_with = "non_empty")]
    pub id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateReader {
    #[serde(rename = "rID", default, deserialize_with = "non_empty")]
    pub id: Option<String>,
    #[serde(rename = "rName", default, deserialize_with = "non_empty")]
    pub name: Option<String>,
    #[serde(rename = "rSex", default, deserialize_with = "non_empty")]
    pub sex: Option<String>,
    #[serde(rename = "rDept", default, deserialize_with = "non_empty")]
    pub dept: Option<String>,
    #[serde(rename = "rGrade", default, deserialize_with = "non_empty")]
    pub grade: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchReaders {
    #[serde(rename = "rID", default, deserialize_with = "non_empty")]
    pub id: Option<String>,
    #[serde(rename = "rName", default, deserialize_with = "non_empty")]
    pub name: Option<String>,
    #[serde(rename = "rSex", default, deserialize_with = "non_empty")]
    pub sex: Option<String>,
    #[serde(rename = "rDept", default, deserialize_with = "non_empty")]
    pub dept: Option<String>,
    #[serde(rename = "rGrade0", default, deserialize_with = "non_empty")]
    pub grade_from: Option<String>,
    #[serde(rename = "rGrade1", default, deserialize_with = "non_empty")]
    pub grade_to: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReaderPatch {
    pub name: Option<String>,
    pub sex: Option<Sex>,
    pub dept: Option<String>,
    pub grade: Option<i64>,
}

impl ReaderPatch {
    pub fn is_empty(&self) -> bool {
        self.assignments().is_empty()
    }

    fn assignments(&self) -> Vec<(&'static str, libsql::Value)> {
        let mut out: Vec<(&'static str, libsql::Value)> = Vec::new();
        if let Some(name) = &self.name {
            out.push(("name", name.clone().into()));
        }
        if let Some(sex) = self.sex {
            out.push(("sex", sex.as_str().into()));
        }
        if let Some(dept) = &self.dept {
            out.push(("dept", dept.clone().into()));
        }
        if let Some(grade) = self.grade {
            out.push(("grade", grade.into()));
        }
        out
    }
}

fn check_sex(v: &mut Violations, value: Option<&str>, required: bool) -> Option<Sex> {
    match value {
        None if required => {
            v.push("rSex must not be empty and must be 'male' or 'female'");
            None
        }
        None => None,
        Some(s) => {
            let sex = Sex::from_str(s);
            if sex.is_none() {
                v.push("rSex must be 'male' or 'female'");
            }
            sex
        }
    }
}

impl CreateReader {
    fn validate(&self) -> ReaderResult<Reader> {
        let mut v = Violations::new();
        v.required("rID", self.id.as_deref(), ID_MAX);
        v.required("rName", self.name.as_deref(), NAME_MAX);
        let sex = check_sex(&mut v, self.sex.as_deref(), true);
        v.optional("rDept", self.dept.as_deref(), DEPT_MAX);
        let grade = v.optional_positive("rGrade", self.grade.as_deref());
        v.into_result()?;

        match (&self.id, &self.name, sex) {
            (Some(id), Some(name), Some(sex)) => Ok(Reader {
                id: id.clone(),
                name: name.clone(),
                sex,
                dept: self.dept.clone(),
                grade,
            }),
            _ => Err(anyhow::anyhow!("validated reader input lost a required field").into()),
        }
    }
}

impl UpdateReader {
    fn validate(&self) -> ReaderResult<(String, ReaderPatch)> {
        let mut v = Violations::new();
        v.required("rID", self.id.as_deref(), ID_MAX);
        v.optional("rName", self.name.as_deref(), NAME_MAX);
        let sex = check_sex(&mut v, self.sex.as_deref(), false);
        v.optional("rDept", self.dept.as_deref(), DEPT_MAX);
        let grade = v.optional_positive("rGrade", self.grade.as_deref());

        let patch = ReaderPatch {
            name: self.name.clone(),
            sex,
            dept: self.dept.clone(),
            grade,
        };
        if self.id.is_some() && v.is_empty() && patch.is_empty() {
            v.push("no reader field to update");
        }
        v.into_result()?;

        let id = self
            .id
            .clone()
            .ok_or_else(|| anyhow::anyhow!("validated update lost its reader id"))?;
        Ok((id, patch))
    }
}

impl SearchReaders {
    fn filters(&self) -> ReaderResult<(Vec<&'static str>, Vec<libsql::Value>)> {
        let mut v = Violations::new();
        v.optional("rID", self.id.as_deref(), ID_MAX);
        v.optional("rName", self.name.as_deref(), NAME_MAX);
        let sex = check_sex(&mut v, self.sex.as_deref(), false);
        v.optional("rDept", self.dept.as_deref(), DEPT_MAX);
        let grade_from = v.optional_positive("rGrade0", self.grade_from.as_deref());
        let grade_to = v.optional_positive("rGrade1", self.grade_to.as_deref());
        v.into_result()?;

        let mut clauses = Vec::new();
        let mut params: Vec<libsql::Value> = Vec::new();
        if let Some(id) = &self.id {
            clauses.push("instr(id, ?) > 0");
            params.push(id.clone().into());
        }
        if let Some(name) = &self.name {
            clauses.push("instr(name, ?) > 0");
            params.push(name.clone().into());
        }
        if let Some(sex) = sex {
            clauses.push("sex = ?");
            params.push(sex.as_str().into());
        }
        if let Some(dept) = &self.dept {
            clauses.push("instr(dept, ?) > 0");
            params.push(dept.clone().into());
        }
        if let Some(from) = grade_from {
            clauses.push("grade >= ?");
            params.push(from.into());
        }
        if let Some(to) = grade_to {
            clauses.push("grade <= ?");
            params.push(to.into());
        }
        Ok((clauses, params))
    }
}

/// A usable reader id: present and not longer than the column allows.
fn lookup_id(id: Option<&str>) -> Option<&str> {
    id.filter(|id| char_len(id) <= ID_MAX)
}

pub struct Readers<'a> {
    db: &'a Database,
}

impl<'a> Readers<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    pub async fn get_reader(&self, id: &str) -> Result<Option<Reader>> {
        let query = format!("SELECT {} FROM readers WHERE id = ?", Reader::COLUMNS);
        let mut rows = self.db.connection().query(&query, libsql::params![id]).await?;

        if let Some(row) = rows.next().await? {
            Ok(Some(Reader::from_row(&row)?))
        } else {
            Ok(None)
        }
    }

    async fn require_reader(&self, id: &str) -> ReaderResult<Reader> {
        self.get_reader(id)
            .await?
            .ok_or(OpError::Rejected(ReaderRejection::NotFound))
    }

    pub async fn outstanding_count(&self, id: &str) -> Result<i64> {
        let mut rows = self
            .db
            .connection()
            .query(
                "SELECT COUNT(*) FROM borrow_records WHERE reader_id = ? AND return_date IS NULL",
                libsql::params![id],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(row.get(0)?),
            None => Ok(0),
        }
    }

    pub async fn create_reader(&self, input: CreateReader) -> ReaderResult<Reader> {
        let reader = input.validate()?;

        let tx = self.db.write().await?;
        let result = self.create_reader_internal(reader).await;
        tx.finish(result).await
    }

    async fn create_reader_internal(&self, reader: Reader) -> ReaderResult<Reader> {
        if self.get_reader(&reader.id).await?.is_some() {
            return Err(OpError::Rejected(ReaderRejection::AlreadyExists));
        }

        self.db
            .connection()
            .execute(
                "INSERT INTO readers (id, name, sex, dept, grade) VALUES (?, ?, ?, ?, ?)",
                libsql::params![
                    reader.id.clone(),
                    reader.name.clone(),
                    reader.sex.as_str(),
                    reader.dept.clone(),
                    reader.grade
                ],
            )
            .await?;
        Ok(reader)
    }

    /// Removes a reader who holds no outstanding loans. Closed loan history
    /// stays in `borrow_records`.
    pub async fn delete_reader(&self, input: ReaderId) -> ReaderResult<Reader> {
        let id = lookup_id(input.id.as_deref())
            .ok_or(OpError::Rejected(ReaderRejection::NotFound))?
            .to_string();

        let tx = self.db.write().await?;
        let result = self.delete_reader_internal(&id).await;
        tx.finish(result).await
    }

    async fn delete_reader_internal(&self, id: &str) -> ReaderResult<Reader> {
        let reader = self.require_reader(id).await?;
        if self.outstanding_count(id).await? > 0 {
            return Err(OpError::Rejected(ReaderRejection::HasOutstanding));
        }

        self.db
            .connection()
            .execute("DELETE FROM readers WHERE id = ?", libsql::params![id])
            .await?;
        Ok(reader)
    }

    pub async fn update_reader(&self, input: UpdateReader) -> ReaderResult<Reader> {
        let (id, patch) = input.validate()?;

        let tx = self.db.write().await?;
        let result = self.update_reader_internal(&id, patch).await;
        tx.finish(result).await
    }

    async fn update_reader_internal(&self, id: &str, patch: ReaderPatch) -> ReaderResult<Reader> {
        self.require_reader(id).await?;

        let mut updates = Vec::new();
        let mut params: Vec<libsql::Value> = Vec::new();
        for (column, value) in patch.assignments() {
            updates.push(format!("{column} = ?"));
            params.push(value);
        }
        params.push(id.to_string().into());

        let query = format!("UPDATE readers SET {} WHERE id = ?", updates.join(", "));
        self.db.connection().execute(&query, params).await?;
        self.require_reader(id).await
    }

    pub async fn search_readers(&self, input: SearchReaders) -> ReaderResult<Vec<Reader>> {
        let (clauses, params) = input.filters()?;

        let mut query = format!("SELECT {} FROM readers", Reader::COLUMNS);
        if !clauses.is_empty() {
            query.push_str(" WHERE ");
            query.push_str(&clauses.join(" AND "));
        }
        query.push_str(" ORDER BY id");
        tracing::debug!(query = %query, "searching readers");

        self.collect_readers(&query, params).await
    }

    async fn collect_readers(&self, query: &str, params: Vec<libsql::Value>) -> ReaderResult<Vec<Reader>> {
        let _guard = self.db.lock().await;
        let mut rows = self.db.connection().query(query, params).await?;
        let mut readers = Vec::new();
        while let Some(row) = rows.next().await? {
            readers.push(Reader::from_row(&row)?);
        }
        Ok(readers)
    }

    /// Outstanding loans of one reader with the book name, flagged overdue
    /// when the due date lies before `today`.
    pub async fn unreturned_loans(&self, input: ReaderId, today: NaiveDate) -> ReaderResult<Vec<UnreturnedLoan>> {
        let id = lookup_id(input.id.as_deref()).ok_or(OpError::Rejected(ReaderRejection::NotFound))?;

        let _guard = self.db.lock().await;
        self.require_reader(id).await?;

        let query = r#"
            SELECT borrow_records.book_id, books.name, borrow_records.borrow_date, borrow_records.due_date
            FROM borrow_records
            JOIN books ON borrow_records.book_id = books.id
            WHERE borrow_records.reader_id = ? AND borrow_records.return_date IS NULL
            ORDER BY borrow_records.id
        "#;
        let mut rows = self.db.connection().query(query, libsql::params![id]).await?;

        let today = today.format("%Y-%m-%d").to_string();
        let mut loans = Vec::new();
        while let Some(row) = rows.next().await? {
            let due_date: String = row.get(3)?;
            loans.push(UnreturnedLoan {
                book_id: row.get(0)?,
                book_name: row.get(1)?,
                borrow_date: row.get(2)?,
                overdue: due_date < today,
                due_date,
            });
        }
        Ok(loans)
    }

    /// Every reader holding at least one outstanding loan past its due date.
    pub async fn overdue_readers(&self, today: NaiveDate) -> ReaderResult<Vec<Reader>> {
        let query = format!(
            r#"
            SELECT {} FROM readers
            WHERE id IN (
                SELECT DISTINCT reader_id FROM borrow_records
                WHERE return_date IS NULL AND due_date < ?
            )
            ORDER BY id
            "#,
            Reader::COLUMNS
        );
        let params = vec![libsql::Value::from(today.format("%Y-%m-%d").to_string())];
        self.collect_readers(&query, params).await
    }
}
