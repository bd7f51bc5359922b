use thiserror::Error;

use crate::validate::Violations;

/// A business rule refused the request. Each kind knows the status code its
/// endpoints report for it.
pub trait Rejection: std::fmt::Display {
    fn code(&self) -> u8;
}

/// Failure of a single operation. `R` is the rejection vocabulary of the
/// operation's area (books, readers or loans).
#[derive(Debug, Error)]
pub enum OpError<R> {
    #[error("invalid input: {0}")]
    Invalid(Violations),
    #[error("{0}")]
    Rejected(R),
    #[error("storage error: {0:#}")]
    Storage(anyhow::Error),
}

impl<R> From<anyhow::Error> for OpError<R> {
    fn from(error: anyhow::Error) -> Self {
        OpError::Storage(error)
    }
}

impl<R> From<libsql::Error> for OpError<R> {
    fn from(error: libsql::Error) -> Self {
        OpError::Storage(error.into())
    }
}

pub type OpResult<T, R> = Result<T, OpError<R>>;

/// Status code for invalid form input on every endpoint that validates.
pub const INVALID_INPUT: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BookRejection {
    #[error("book already exists")]
    AlreadyExists,
    #[error("book does not exist")]
    NotFound,
    #[error("amount exceeds the copies currently in stock")]
    ExceedsRemaining,
    #[error("amount would overflow the copy count")]
    TooManyCopies,
}

impl Rejection for BookRejection {
    fn code(&self) -> u8 {
        match self {
            BookRejection::AlreadyExists => 1,
            BookRejection::NotFound => 1,
            BookRejection::ExceedsRemaining => 2,
            BookRejection::TooManyCopies => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ReaderRejection {
    #[error("reader id already exists")]
    AlreadyExists,
    #[error("reader id does not exist")]
    NotFound,
    #[error("reader still has books that are not returned")]
    HasOutstanding,
}

impl Rejection for ReaderRejection {
    fn code(&self) -> u8 {
        match self {
            ReaderRejection::AlreadyExists => 1,
            ReaderRejection::NotFound => 1,
            ReaderRejection::HasOutstanding => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LoanRejection {
    #[error("reader id does not exist")]
    UnknownReader,
    #[error("book id does not exist")]
    UnknownBook,
    #[error("reader has overdue books that are not returned")]
    HasOverdue,
    #[error("reader already borrowed this book and has not returned it")]
    AlreadyBorrowed,
    #[error("all copies of this book are borrowed")]
    FullyBorrowed,
    #[error("reader reached the borrowing limit")]
    LimitReached,
    #[error("reader has not borrowed this book")]
    NotBorrowed,
}

impl Rejection for LoanRejection {
    fn code(&self) -> u8 {
        match self {
            LoanRejection::UnknownReader => 1,
            LoanRejection::UnknownBook => 2,
            LoanRejection::HasOverdue => 3,
            LoanRejection::NotBorrowed => 3,
            LoanRejection::AlreadyBorrowed => 4,
            LoanRejection::FullyBorrowed => 5,
            LoanRejection::LimitReached => 6,
        }
    }
}
