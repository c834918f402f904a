//! Integration tests for the generation job service

mod config_integration;
mod decoder;
mod resilience;
mod streaming_endpoint;
