//! RPC Error Types
//!
//! Maps application errors to JSON-RPC error codes by failure kind.

use jsonrpsee::types::ErrorObjectOwned;
use trainwatch_core::error::{AppError, FailureKind};

/// RPC Error Codes
pub mod code {
    pub const VALIDATION_ERROR: i32 = 4000;
    pub const NOT_FOUND: i32 = 4001;
    pub const CONFLICT: i32 = 4002;
    pub const INSUFFICIENT_CREDITS: i32 = 4020;
    pub const INTERNAL_ERROR: i32 = 5000;
    pub const PROVIDER_FAILED: i32 = 5020;
    pub const GENERATION_FAILED: i32 = 5021;
    pub const TRANSIENT: i32 = 5030;
    pub const STORAGE_ERROR: i32 = 5031;
}

/// Convert AppError to JSON-RPC ErrorObject; the failure report rides along as `data`
pub fn to_rpc_error(err: AppError) -> ErrorObjectOwned {
    let report = err.report();
    let code = match (&err, report.kind) {
        (AppError::InvalidState(_), _) => code::CONFLICT,
        (_, FailureKind::Validation) => code::VALIDATION_ERROR,
        (_, FailureKind::NotFound) => code::NOT_FOUND,
        (_, FailureKind::InsufficientCredits) => code::INSUFFICIENT_CREDITS,
        (_, FailureKind::ProviderFailed) => code::PROVIDER_FAILED,
        (_, FailureKind::GenerationFailed) => code::GENERATION_FAILED,
        (_, FailureKind::Transient) => code::TRANSIENT,
        (_, FailureKind::Storage) => code::STORAGE_ERROR,
        (_, FailureKind::Internal) => code::INTERNAL_ERROR,
    };
    ErrorObjectOwned::owned(code, report.message.clone(), Some(report))
}
