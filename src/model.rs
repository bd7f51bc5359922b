use anyhow::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Book {
    pub id: String,
    pub name: String,
    pub publisher: Option<String>,
    pub published: Option<String>,
    pub author: Option<String>,
    pub memo: Option<String>,
    pub total: i64,
    pub remaining: i64,
}

impl Book {
    pub const COLUMNS: &'static str = "id, name, publisher, published, author, memo, total, remaining";

    pub fn from_row(row: &libsql::Row) -> Result<Self> {
        Ok(Book {
            id: row.get(0)?,
            name: row.get(1)?,
            publisher: row.get(2)?,
            published: row.get(3)?,
            author: row.get(4)?,
            memo: row.get(5)?,
            total: row.get(6)?,
            remaining: row.get(7)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sex {
    Male,
    Female,
}

impl Sex {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sex::Male => "male",
            Sex::Female => "female",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "男" => return Some(Sex::Male),
            "女" => return Some(Sex::Female),
            _ => {}
        }
        match s.to_lowercase().as_str() {
            "male" | "m" => Some(Sex::Male),
            "female" | "f" => Some(Sex::Female),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reader {
    pub id: String,
    pub name: String,
    pub sex: Sex,
    pub dept: Option<String>,
    pub grade: Option<i64>,
}

impl Reader {
    pub const COLUMNS: &'static str = "id, name, sex, dept, grade";

    pub fn from_row(row: &libsql::Row) -> Result<Self> {
        let sex: String = row.get(2)?;
        Ok(Reader {
            id: row.get(0)?,
            name: row.get(1)?,
            sex: Sex::from_str(&sex).ok_or_else(|| anyhow::anyhow!("invalid sex in readers table: {sex}"))?,
            dept: row.get(3)?,
            grade: row.get(4)?,
        })
    }
}

/// One row of `borrow_records`. `return_date == None` means the loan is
/// still outstanding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BorrowRecord {
    pub id: i64,
    pub book_id: String,
    pub reader_id: String,
    pub borrow_date: String,
    pub due_date: String,
    pub return_date: Option<String>,
}

impl BorrowRecord {
    pub const COLUMNS: &'static str = "id, book_id, reader_id, borrow_date, due_date, return_date";

    pub fn from_row(row: &libsql::Row) -> Result<Self> {
        Ok(BorrowRecord {
            id: row.get(0)?,
            book_id: row.get(1)?,
            reader_id: row.get(2)?,
            borrow_date: row.get(3)?,
            due_date: row.get(4)?,
            return_date: row.get(5)?,
        })
    }
}

/// An outstanding loan as listed for its reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnreturnedLoan {
    pub book_id: String,
    pub book_name: String,
    pub borrow_date: String,
    pub due_date: String,
    pub overdue: bool,
}
