pub mod chunking;
pub mod config;
pub mod database;
pub mod document;
pub mod embeddings;
pub mod llm;
pub mod rag;
pub mod retrieval;
pub mod server;
