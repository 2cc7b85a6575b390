//! Campaign Export Library
//!
//! Resilient integration layer for a remote campaign service: error
//! classification, retries, local quota tracking, cached reads and bulk
//! exports with progress reporting. Without a usable API key the client
//! runs in demo mode and never touches the network.
//!
//! # Modules
//!
//! - `cache`: Keyed TTL cache with single-flight fetching.
//! - `campaign_client`: Campaign service client (live and demo modes).
//! - `circuit_breaker`: Circuit breaker in front of the remote service.
//! - `classifier`: Raw transport failures to classified errors.
//! - `config`: Configuration management.
//! - `errors`: Error handling types.
//! - `export`: Bulk export pipeline.
//! - `handlers`: HTTP request handlers.
//! - `models`: Core data models.
//! - `rate_limit`: Local request quota tracking.
//! - `reporter`: Error reporting context.
//! - `retry`: Retry policies and executor.
//! - `validation`: Local validation of export items.

pub mod cache;
pub mod campaign_client;
pub mod circuit_breaker;
pub mod classifier;
pub mod config;
pub mod errors;
pub mod export;
pub mod handlers;
pub mod models;
pub mod rate_limit;
pub mod reporter;
pub mod retry;
pub mod validation;
