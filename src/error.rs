//! Error types for filstore

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Piece not known: {0}")]
    UnknownPiece(u64),

    #[error("Piece already has a payload: {0}")]
    PieceExists(u64),

    #[error("Index corrupt: {0}")]
    CorruptIndex(String),

    #[error("Invalid deal metadata: {0}")]
    InvalidDeal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
