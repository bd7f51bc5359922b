use axum::{Form, extract::State, response::Response};

use super::{LoanRequest, Loans};
use crate::handler::{AppState, today};
use crate::render;

pub async fn borrow(State(state): State<AppState>, Form(payload): Form<LoanRequest>) -> Response {
    tracing::info!(reader_id = ?payload.reader_id, book_id = ?payload.book_id, "borrow requested");
    let loans = Loans::new(&state.db, state.policy);
    render::outcome("borrow", loans.borrow(payload, today()).await)
}

pub async fn return_book(State(state): State<AppState>, Form(payload): Form<LoanRequest>) -> Response {
    tracing::info!(reader_id = ?payload.reader_id, book_id = ?payload.book_id, "return requested");
    let loans = Loans::new(&state.db, state.policy);
    render::outcome("return", loans.return_book(payload, today()).await)
}
