pub mod query_analysis;
