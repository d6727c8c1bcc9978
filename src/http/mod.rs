//! Request/response model and network access.

mod classify;
mod fetch;
#[cfg(test)]
pub mod testing;
mod types;

pub use classify::{Classifier, RequestCategory, DEFAULT_API_HOSTS};
pub use fetch::{Fetcher, HttpFetcher};
pub use types::{Request, RequestMode, Response};
