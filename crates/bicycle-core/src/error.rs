//! Error types for bicycle

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BicycleError {
    #[error("No reference length to sync against")]
    NoReferenceLength,
    #[error("No ratio relates {len} to {base} within {max_shorten} spokes")]
    NoSyncRatio {
        base: i32,
        len: i32,
        max_shorten: i32,
    },
}

pub type Result<T> = std::result::Result<T, BicycleError>;
