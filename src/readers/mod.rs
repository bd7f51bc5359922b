//! Readers Module
//!
//! Library card holders and the two loan reports that are keyed on them:
//! a reader's unreturned books and the list of readers with overdue books.

mod handler;
mod lib;
mod routes;

pub use lib::*;
pub use routes::routes;
