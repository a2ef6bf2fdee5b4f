use thiserror::Error;

/// EIP-1193 code for a request the user declined in the wallet UI.
pub const USER_REJECTED: i64 = 4001;
/// EIP-1193 code returned when switching to a chain the wallet does not know.
pub const UNRECOGNIZED_CHAIN: i64 = 4902;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RpcError {
    #[error("{method} rejected by wallet ({code}): {message}")]
    Rejected {
        method: String,
        code: i64,
        message: String,
    },

    #[error("unexpected {method} response: {detail}")]
    InvalidResponse { method: String, detail: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("address derivation failed: {0}")]
    Address(String),
}

impl RpcError {
    pub fn rejected(method: &str, code: i64, message: impl Into<String>) -> Self {
        Self::Rejected {
            method: method.to_owned(),
            code,
            message: message.into(),
        }
    }

    pub fn invalid_response(method: &str, detail: impl Into<String>) -> Self {
        Self::InvalidResponse {
            method: method.to_owned(),
            detail: detail.into(),
        }
    }

    pub fn code(&self) -> Option<i64> {
        match self {
            Self::Rejected { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub fn is_user_rejection(&self) -> bool {
        self.code() == Some(USER_REJECTED)
    }
}
