use actix_web::http::StatusCode;
use actix_web::ResponseError;
use derive_more::Display;
use sea_orm::prelude::Uuid;
use sea_orm::DbErr;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Row kinds an operation can fail to find.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum Record {
    #[display(fmt = "community")]
    Community,
    #[display(fmt = "post")]
    Post,
    #[display(fmt = "comment")]
    Comment,
}

/// Errors returned by every counter-maintaining operation.
#[derive(Debug, Display)]
pub enum Error {
    /// Vote target with neither or both of post and comment set.
    #[display(fmt = "a vote must target exactly one post or one comment")]
    InvalidTarget,
    /// Rejected user input, such as empty content.
    #[display(fmt = "{}", _0)]
    Validation(String),
    /// Reply parent lives under a different post.
    #[display(fmt = "comment {} does not belong to post {}", parent_id, post_id)]
    ParentMismatch { parent_id: Uuid, post_id: Uuid },
    /// Promotion attempted for a user outside the community.
    #[display(fmt = "user {} is not a member of community {}", user_id, community_id)]
    NotAMember { user_id: Uuid, community_id: Uuid },
    #[display(fmt = "{} {} not found", _0, _1)]
    NotFound(Record, Uuid),
    /// Unique-constraint race. Safe to retry.
    #[display(fmt = "write conflict: {}", _0)]
    Conflict(String),
    #[display(fmt = "invariant violated: {}", _0)]
    InvariantViolation(String),
    #[display(fmt = "database error: {}", _0)]
    Database(DbErr),
}

/// Coarse classification callers branch on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    InvariantViolation,
    Storage,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidTarget | Error::Validation(_) | Error::ParentMismatch { .. } => {
                ErrorKind::Validation
            }
            Error::NotFound(..) | Error::NotAMember { .. } => ErrorKind::NotFound,
            Error::Conflict(_) => ErrorKind::Conflict,
            Error::InvariantViolation(_) => ErrorKind::InvariantViolation,
            Error::Database(_) => ErrorKind::Storage,
        }
    }

    pub fn is_conflict(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Database(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbErr> for Error {
    fn from(err: DbErr) -> Self {
        Error::Database(err)
    }
}

impl ResponseError for Error {
    fn status_code(&self) -> StatusCode {
        match self.kind() {
            ErrorKind::Validation => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::InvariantViolation | ErrorKind::Storage => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parent_mismatch_is_validation() {
        let err = Error::ParentMismatch {
            parent_id: Uuid::new_v4(),
            post_id: Uuid::new_v4(),
        };
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn test_not_a_member_is_not_found() {
        let err = Error::NotAMember {
            user_id: Uuid::nil(),
            community_id: Uuid::nil(),
        };
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert!(err.to_string().contains("is not a member"));
    }

    #[test]
    fn test_database_error_has_source() {
        use std::error::Error as _;

        let err = Error::from(DbErr::Custom("boom".to_owned()));
        assert_eq!(err.kind(), ErrorKind::Storage);
        assert!(err.source().is_some());
    }
}
