//! HTTP handlers for the catalog endpoints

use axum::{Form, extract::State, response::Response};

use super::{Catalog, ChangeCount, CreateBook, SearchBooks, UpdateBook};
use crate::handler::AppState;
use crate::render;

pub async fn add_new_book(State(state): State<AppState>, Form(payload): Form<CreateBook>) -> Response {
    tracing::info!(book_id = ?payload.id, "adding new book");
    let catalog = Catalog::new(&state.db);
    render::outcome("add_new_book", catalog.create_book(payload).await)
}

pub async fn add_book(State(state): State<AppState>, Form(payload): Form<ChangeCount>) -> Response {
    tracing::info!(book_id = ?payload.id, count = ?payload.count, "adding copies");
    let catalog = Catalog::new(&state.db);
    render::outcome("add_book", catalog.add_copies(payload).await)
}

pub async fn del_book(State(state): State<AppState>, Form(payload): Form<ChangeCount>) -> Response {
    tracing::info!(book_id = ?payload.id, count = ?payload.count, "withdrawing copies");
    let catalog = Catalog::new(&state.db);
    render::outcome("del_book", catalog.remove_copies(payload).await)
}

pub async fn update_book(State(state): State<AppState>, Form(payload): Form<UpdateBook>) -> Response {
    tracing::info!(book_id = ?payload.id, "updating book");
    let catalog = Catalog::new(&state.db);
    render::outcome("update_book", catalog.update_book(payload).await)
}

pub async fn search_book(State(state): State<AppState>, Form(payload): Form<SearchBooks>) -> Response {
    let catalog = Catalog::new(&state.db);
    render::table_outcome("search_book", catalog.search_books(payload).await)
}
