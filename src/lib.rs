// ABOUTME: Root library for the newhorse server binary
// ABOUTME: Exposes the API router, connection manager, server state, and CLI

pub mod api;
pub mod cli;
pub mod connections;
pub mod server;

pub use connections::ConnectionManager;
pub use server::AppState;
