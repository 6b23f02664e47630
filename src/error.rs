// src/error.rs

use thiserror::Error;

use crate::source::ChunkId;

#[derive(Error, Debug)]
pub enum LoaderError {

    #[error("Failed to fetch chunk {chunk_id}: {message}")]
    ChunkFetch {
        chunk_id: ChunkId,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Invalid sequence limit exceeded: {dropped} dropped, at most {limit} allowed")]
    InvalidSequencesExceeded {
        dropped: u64,
        limit: u64,
    },

    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("State error: {message}")]
    State {
        message: String,
    },
}

pub type Result<T> = std::result::Result<T, LoaderError>;

// Convenience constructors
impl LoaderError {

    pub fn chunk_fetch(chunk_id: ChunkId, message: impl Into<String>) -> Self {
        Self::ChunkFetch {
            chunk_id,
            message: message.into(),
            source: None,
        }
    }

    pub fn chunk_fetch_with_source(
        chunk_id: ChunkId,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::ChunkFetch {
            chunk_id,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    pub fn config_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn state(message: impl Into<String>) -> Self {
        Self::State {
            message: message.into(),
        }
    }
}
