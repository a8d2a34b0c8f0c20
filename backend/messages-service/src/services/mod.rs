pub mod query_service;

pub use query_service::{QueryService, PAGE_SIZE};
