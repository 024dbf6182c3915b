//! HTTP API for the question-answering service

pub mod handlers;
pub mod routes;

pub use routes::create_router;
