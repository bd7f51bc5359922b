//! Catalog Module
//!
//! Books on the shelf: registering titles, adding and withdrawing copies,
//! editing descriptive fields and searching.
//!
//! A book keeps two counters, `total` (copies owned) and `remaining` (copies
//! on the shelf). Every operation here keeps `0 <= remaining <= total`, and a
//! title whose last copies are withdrawn is deleted instead of kept at zero.

mod handler;
mod lib;
mod routes;

pub use lib::*;
pub use routes::routes;
