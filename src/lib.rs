pub mod config;
pub mod error;
pub mod feed;
pub mod http;
pub mod ingest;
pub mod query;
pub mod store;

#[cfg(test)]
pub mod test_support;
