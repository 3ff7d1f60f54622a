use std::net::SocketAddr;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("failed to bind {addr}: {message}")]
    Bind { addr: SocketAddr, message: String },

    #[error("server task failed: {0}")]
    Task(String),
}

pub type Result<T> = std::result::Result<T, ServerError>;
