//! HTTP API: question answering, conversation history, health and OpenAPI

pub mod chat;
pub mod conversations;
pub mod error;
pub mod health;
pub mod openapi;
