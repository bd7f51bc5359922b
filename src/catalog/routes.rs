use axum::{Router, routing::post};

use super::handler;
use crate::handler::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/addNewBook", post(handler::add_new_book))
        .route("/addBook", post(handler::add_book))
        .route("/delBook", post(handler::del_book))
        .route("/updateBook", post(handler::update_book))
        .route("/searchBook", post(handler::search_book))
}
