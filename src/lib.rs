pub mod api;
pub mod broadcast;
pub mod config;
pub mod dispatcher;
pub mod embeddings;
pub mod learning;
pub mod llm;
pub mod notifications;
pub mod queue;
pub mod rag;
pub mod session;
pub mod shared;
pub mod vectordb;
pub mod webhooks;
