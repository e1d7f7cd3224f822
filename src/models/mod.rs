pub mod query_analysis;

pub use query_analysis::*;
