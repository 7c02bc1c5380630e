pub mod audit;
pub mod chunker;
pub mod config;
pub mod exporter;
pub mod import;
pub mod llm;
pub mod paths;
pub mod query;
pub mod record;
pub mod util;
pub mod warn;
