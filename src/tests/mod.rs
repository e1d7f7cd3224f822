// Test modules

mod analyzer_pipeline_test;
pub mod common;
