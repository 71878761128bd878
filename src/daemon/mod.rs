//! The components of the CMP back end itself.
pub mod audit;
pub mod auth;
pub mod config;
pub mod engine;
pub mod pending;
pub mod responder;
