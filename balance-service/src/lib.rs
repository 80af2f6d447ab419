//! Balance Service - identity-linked balances for chat communities.

pub mod commands;
pub mod config;
pub mod error;
pub mod grpc;
pub mod models;
pub mod services;
pub mod startup;
