// Copyright © 2025 postroom.dev
// Licensed under Postroom License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use bb8::RunError;
use code::ErrorCode;
use snafu::{Location, Snafu};

use crate::raise_error;

pub mod code;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum PostroomError {
    #[snafu(display("{message}"))]
    Generic {
        message: String,
        #[snafu(implicit)]
        location: Location,
        code: ErrorCode,
    },
}

pub type PostroomResult<T, E = PostroomError> = std::result::Result<T, E>;

impl PostroomError {
    pub fn code(&self) -> ErrorCode {
        match self {
            PostroomError::Generic { code, .. } => *code,
        }
    }
}

impl From<RunError<PostroomError>> for PostroomError {
    fn from(e: RunError<PostroomError>) -> Self {
        match e {
            RunError::User(e) => e,
            RunError::TimedOut => raise_error!(
                "Timed out while attempting to acquire a connection from the pool".into(),
                ErrorCode::ConnectionPoolTimeout
            ),
        }
    }
}
