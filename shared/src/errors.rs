//! Shared error types for the supervisor system

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SharedError {
    #[error("Malformed diagnostic unit: {message}")]
    MalformedTraceUnit { message: String },

    #[error("Invalid schedule entry: {input} (expected HH:MM)")]
    InvalidScheduleEntry { input: String },

    #[error("Invalid instance token: {input}")]
    InvalidToken { input: String },

    #[error("Invalid configuration: {field} = {value}")]
    InvalidConfig { field: String, value: String },
}

pub type SharedResult<T> = Result<T, SharedError>;
