use axum::{Form, extract::State, response::Response};

use super::{CreateReader, ReaderId, Readers, SearchReaders, UpdateReader};
use crate::handler::{AppState, today};
use crate::render;

pub async fn add_new_reader(State(state): State<AppState>, Form(payload): Form<CreateReader>) -> Response {
    tracing::info!(reader_id = ?payload.id, "adding new reader");
    let readers = Readers::new(&state.db);
    render::outcome("add_new_reader", readers.create_reader(payload).await)
}

pub async fn del_reader(State(state): State<AppState>, Form(payload): Form<ReaderId>) -> Response {
    tracing::info!(reader_id = ?payload.id, "deleting reader");
    let readers = Readers::new(&state.db);
    render::outcome("del_reader", readers.delete_reader(payload).await)
}

pub async fn update_reader(State(state): State<AppState>, Form(payload): Form<UpdateReader>) -> Response {
    tracing::info!(reader_id = ?payload.id, "updating reader");
    let readers = Readers::new(&state.db);
    render::outcome("update_reader", readers.update_reader(payload).await)
}

pub async fn search_reader(State(state): State<AppState>, Form(payload): Form<SearchReaders>) -> Response {
    let readers = Readers::new(&state.db);
    render::table_outcome("search_reader", readers.search_readers(payload).await)
}

pub async fn un_return(State(state): State<AppState>, Form(payload): Form<ReaderId>) -> Response {
    tracing::info!(reader_id = ?payload.id, "listing unreturned books");
    let readers = Readers::new(&state.db);
    render::table_outcome("un_return", readers.unreturned_loans(payload, today()).await)
}

pub async fn over_due(State(state): State<AppState>) -> Response {
    let readers = Readers::new(&state.db);
    render::table_outcome("over_due", readers.overdue_readers(today()).await)
}
