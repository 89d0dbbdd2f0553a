//! RTK CRM: a small multi-tenant CRM backend in Rust.
//!
//! Tenants, customers and third-party integration credentials (UISP,
//! Chatwoot, n8n) behind a token-authenticated REST API (Axum + sled).
//! Integration configs are encrypted at rest with AES-256-GCM.
//!
//! This lib exposes the codecs, the access gates and the storage layer.

pub mod auth;
pub mod config;
pub mod error;
pub mod models;
// REST API module: Axum router, handlers and shared AppState
pub mod rest;
pub mod storage;
// Core codecs: signed bearer tokens and the credential vault
pub mod token;
pub mod uisp;
pub mod vault;
