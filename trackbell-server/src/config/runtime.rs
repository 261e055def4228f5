//! Runtime configuration types used by the server only.
//!
//! Core settings (scheduler, carriers, messenger) live in
//! `trackbell_core::config`.

use std::net::SocketAddr;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen: SocketAddr,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}
