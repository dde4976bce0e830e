//! HTTP surface: envelope types, extractors, handlers and the route table.

pub mod handlers;
pub mod middleware;
pub mod response;
pub mod routes;

pub use routes::configure;

#[cfg(test)]
mod db_tests;
