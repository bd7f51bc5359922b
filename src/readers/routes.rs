use axum::{Router, routing::post};

use super::handler;
use crate::handler::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/addNewReader", post(handler::add_new_reader))
        .route("/delReader", post(handler::del_reader))
        .route("/updateReader", post(handler::update_reader))
        .route("/searchReader", post(handler::search_reader))
        .route("/unReturn", post(handler::un_return))
        .route("/overDue", post(handler::over_due))
}
