//! Outbound HTTP client for DSP
//!
//! Wraps `reqwest` behind a mockable trait with DSP defaults for timeouts,
//! retries and the user agent sent with webhook notifications.
//!
//! ## Features
//!
//! - **Trait-based design**: Mockable via `HttpClientTrait`
//! - **Configurable**: Timeouts, retries, proxy, user-agent
//! - **Retry middleware**: Exponential backoff for transient failures
//! - **JSON posting**: `post_json` sends a serialized body and retries it safely

pub mod client;
pub mod config;
pub mod error;
pub mod middleware;

pub use client::{shared_client, HttpClient, HttpClientTrait};
pub use config::HttpConfig;
pub use error::{HttpError, Result};
pub use middleware::{RetryConfig, RetryMiddleware};

/// Re-export commonly used types
pub use reqwest::{header, StatusCode};
