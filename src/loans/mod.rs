//! Loans Module
//!
//! The borrow/return state machine. A `(reader, book)` loan goes from
//! outstanding (no return date) to closed (return date set) and never back.
//! Both transitions run inside one transaction under the database write lock,
//! so the availability check and the count update cannot interleave with
//! another request.

mod handler;
mod lib;
mod routes;

pub use lib::*;
pub use routes::routes;
