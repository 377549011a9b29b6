//! Integration tests for rover kernel acceptance testing.

mod common;
mod concurrency_test;
mod dispatch_test;
mod lifecycle_test;
mod modules_test;
