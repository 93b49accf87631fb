//! All LLM API functionality

pub mod client;
pub mod image;
pub mod sse;

// Re-export main types for convenience
pub use client::{ChatClient, ChatClientConfig, RequestHandle, RequestId, StreamOutcome};
pub use image::{ImageClient, ImageStyle};
