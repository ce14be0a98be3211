pub mod chroma;
pub mod database;
pub mod embeddings;
pub mod entities;
pub mod inference;
pub mod memory;
pub mod repositories;
pub mod similarity;
pub mod store;
pub mod traits;
