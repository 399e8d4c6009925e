pub mod embedding;
pub mod error;
pub mod fetch;
pub mod vectordb;
