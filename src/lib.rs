pub mod catalog;
pub mod config;
pub mod db;
pub mod error;
pub mod handler;
pub mod loans;
pub mod model;
pub mod readers;
pub mod render;
pub mod validate;
