//! HTML pages returned by every endpoint.
//!
//! Scripted clients read the hidden `#result` element: either a numeric status
//! code, or a table whose column order is fixed per entity.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use maud::{DOCTYPE, Markup, html};

use crate::error::{INVALID_INPUT, OpError, Rejection};
use crate::model::{Book, Reader, UnreturnedLoan};

pub const OK: u8 = 0;

/// Fixed-order cells of one result row.
pub trait TableRow {
    fn cells(&self) -> Vec<String>;
}

fn opt(value: &Option<String>) -> String {
    value.clone().unwrap_or_default()
}

impl TableRow for Book {
    fn cells(&self) -> Vec<String> {
        vec![
            self.id.clone(),
            self.name.clone(),
            self.total.to_string(),
            self.remaining.to_string(),
            opt(&self.publisher),
            opt(&self.published),
            opt(&self.author),
            opt(&self.memo),
        ]
    }
}

impl TableRow for Reader {
    fn cells(&self) -> Vec<String> {
        vec![
            self.id.clone(),
            self.name.clone(),
            self.sex.as_str().to_string(),
            opt(&self.dept),
            self.grade.map(|g| g.to_string()).unwrap_or_default(),
        ]
    }
}

impl TableRow for UnreturnedLoan {
    fn cells(&self) -> Vec<String> {
        vec![
            self.book_id.clone(),
            self.book_name.clone(),
            self.borrow_date.clone(),
            self.due_date.clone(),
            if self.overdue { "yes" } else { "no" }.to_string(),
        ]
    }
}

pub fn status_page(code: u8, message: &str) -> Markup {
    html! {
        (DOCTYPE)
        html {
            body {
                div id="result" style="display:none" { (code) }
                (message)
            }
        }
    }
}

pub fn success_page() -> Markup {
    status_page(OK, "success")
}

pub fn invalid_page(messages: &[String]) -> Markup {
    html! {
        (DOCTYPE)
        html {
            body {
                div id="result" style="display:none" { (INVALID_INPUT) }
                "invalid parameters:"
                @for msg in messages {
                    br;
                    (msg)
                }
            }
        }
    }
}

pub fn table_page<T: TableRow>(rows: &[T]) -> Markup {
    html! {
        (DOCTYPE)
        html {
            head { meta charset="utf-8"; }
            body {
                table border="1" id="result" {
                    @for row in rows {
                        tr {
                            @for cell in row.cells() {
                                td { (cell) }
                            }
                        }
                    }
                }
            }
        }
    }
}

/// Storage failures carry no status code; the details only go to the log.
pub fn failure_page() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        html! {
            (DOCTYPE)
            html { body { "operation failed, unknown error" } }
        },
    )
        .into_response()
}

/// Renders a status-code outcome of an operation.
pub fn outcome<T, R: Rejection>(action: &str, result: Result<T, OpError<R>>) -> Response {
    match result {
        Ok(_) => success_page().into_response(),
        Err(e) => error_page(action, e),
    }
}

pub fn error_page<R: Rejection>(action: &str, err: OpError<R>) -> Response {
    match err {
        OpError::Invalid(violations) => {
            tracing::info!(action, "rejected invalid input: {}", violations);
            invalid_page(violations.messages()).into_response()
        }
        OpError::Rejected(r) => {
            tracing::info!(action, code = r.code(), "request refused: {}", r);
            status_page(r.code(), &r.to_string()).into_response()
        }
        OpError::Storage(e) => {
            tracing::error!(action, error = %format!("{e:#}"), "storage failure");
            failure_page()
        }
    }
}

/// Renders a table outcome; failures fall back to the status pages.
pub fn table_outcome<T: TableRow, R: Rejection>(action: &str, result: Result<Vec<T>, OpError<R>>) -> Response {
    match result {
        Ok(rows) => {
            tracing::info!(action, rows = rows.len(), "query answered");
            table_page(&rows).into_response()
        }
        Err(e) => error_page(action, e),
    }
}
