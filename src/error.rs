use thiserror::Error;

use crate::providers::ProviderError;

/// Failure taxonomy shared by every pipeline component.
#[derive(Error, Debug)]
pub enum TranslateError {
    /// Rejected before any extraction or provider work.
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Extraction(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("{0}")]
    Composition(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl TranslateError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn extraction(message: impl Into<String>) -> Self {
        Self::Extraction(message.into())
    }

    pub fn composition(message: impl Into<String>) -> Self {
        Self::Composition(message.into())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Extraction(_) => "extraction",
            Self::Provider(_) => "provider",
            Self::Composition(_) => "composition",
            Self::Internal(_) => "internal",
        }
    }
}

pub type TranslateResult<T> = std::result::Result<T, TranslateError>;
