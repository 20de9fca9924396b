//! Integration tests for fare-harvest

mod crawl_tests;
mod resume_tests;
mod support;
