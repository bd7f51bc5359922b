use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::NaiveDate;
use tracing::info;

use crate::config::LoanPolicy;
use crate::db::Database;
use crate::render;
use crate::{catalog, loans, readers};

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub policy: LoanPolicy,
}

/// Calendar day used for due dates and overdue checks.
pub fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

pub async fn healthcheck() -> impl IntoResponse {
    info!("got healthcheck request");
    "ok"
}

pub async fn init_db(State(state): State<AppState>) -> Response {
    if let Err(e) = state.db.migrate().await {
        tracing::error!(error = %e, "failed to apply migrations");
        return render::status_page(1, &e.to_string()).into_response();
    }

    match state.db.table_counts().await {
        Ok(counts) => {
            for (table, rows) in counts {
                info!(table = %table, rows, "table ready");
            }
        }
        Err(e) => tracing::warn!(error = %e, "failed to count table rows"),
    }

    render::success_page().into_response()
}

/// Every endpoint of the service, without middleware.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(healthcheck))
        .route("/init", post(init_db))
        .merge(catalog::routes())
        .merge(readers::routes())
        .merge(loans::routes())
        .with_state(state)
}
