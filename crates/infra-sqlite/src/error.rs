// sqlx::Error -> AppError mapping

use trainwatch_core::error::AppError;

/// Convert sqlx::Error to AppError with structured information
pub(crate) fn map_sqlx_error(err: sqlx::Error) -> AppError {
    match &err {
        sqlx::Error::Database(db_err) => match db_err.code() {
            // SQLite extended result codes: https://www.sqlite.org/rescode.html
            Some(code) => {
                let code_str = code.as_ref();
                let what = match code_str {
                    "2067" | "1555" => "Unique constraint violation",
                    "787" | "3850" => "Foreign key constraint violation",
                    "275" | "531" => "Check constraint violation",
                    "5" | "517" => "Database locked (SQLITE_BUSY)",
                    "13" => "Database full",
                    _ => "Database error",
                };
                AppError::Database(format!("{}: {} ({})", what, db_err.message(), code_str))
            }
            None => AppError::Database(format!("Database error: {}", db_err.message())),
        },
        sqlx::Error::RowNotFound => AppError::Database("Row not found".to_string()),
        sqlx::Error::ColumnNotFound(col) => {
            AppError::Database(format!("Column not found: {}", col))
        }
        // Connection, pool, protocol errors
        _ => AppError::Database(err.to_string()),
    }
}
