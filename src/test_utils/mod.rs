//! the test_utils folder here will share utils or test components between
//! unit tests of the client and server halves
mod common;
mod fake_repository;
mod mock_http;

pub use common::*;
pub use fake_repository::*;
pub use mock_http::*;
