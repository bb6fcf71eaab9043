use cqrs_es::{persist::PersistenceError, AggregateError};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Too few pills: count must be at least 1")]
    TooFewPills,

    #[error("Too many pills: count must be at most {max}")]
    TooManyPills { max: usize },

    #[error("Section number {section} is outside 1..=9")]
    InvalidPosition { section: u8 },

    #[error("Section would hold {requested} pills, capacity is {capacity}")]
    CapacityExceeded { requested: usize, capacity: usize },

    #[error("Section {section} has {free} free slots, {requested} requested")]
    SectionFull {
        section: u8,
        free: usize,
        requested: usize,
    },

    #[error("Dropper already has the maximum of {max} sections")]
    TooManySections { max: usize },

    #[error("Dropper not found")]
    DropperNotFound,

    #[error("Dropper has no sections")]
    SectionsEmpty,

    #[error("Section {section} not found")]
    SectionNotFound { section: u8 },

    #[error("Schedule not found: {schedule_id}")]
    ScheduleNotFound { schedule_id: String },

    #[error("Section already exists: {name}")]
    DuplicateSection { name: String },

    #[error("Schedule already exists: {name}")]
    DuplicateSchedule { name: String },

    #[error("Dropper already registered")]
    DuplicateDropper,

    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Concurrent modification, retry the request")]
    Conflict,

    #[error("Store error: {message}")]
    Store { message: String },

    #[error("Store call timed out")]
    StoreTimeout,

    #[error("Outbound command queue closed")]
    QueueClosed,
}

/// Coarse classification used by callers to decide how to surface a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Capacity,
    NotFound,
    Conflict,
    Store,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::TooFewPills
            | Error::TooManyPills { .. }
            | Error::InvalidPosition { .. }
            | Error::Validation { .. } => ErrorKind::Validation,
            Error::CapacityExceeded { .. }
            | Error::SectionFull { .. }
            | Error::TooManySections { .. } => ErrorKind::Capacity,
            Error::DropperNotFound
            | Error::SectionsEmpty
            | Error::SectionNotFound { .. }
            | Error::ScheduleNotFound { .. } => ErrorKind::NotFound,
            Error::DuplicateSection { .. }
            | Error::DuplicateSchedule { .. }
            | Error::DuplicateDropper
            | Error::Conflict => ErrorKind::Conflict,
            Error::Store { .. } | Error::StoreTimeout | Error::QueueClosed => ErrorKind::Store,
        }
    }

    /// Whether the same request may succeed if simply tried again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Conflict | Error::Store { .. } | Error::StoreTimeout)
    }

    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Error::Validation {
            message: message.into(),
        }
    }
}

impl From<AggregateError<Error>> for Error {
    fn from(err: AggregateError<Error>) -> Self {
        match err {
            AggregateError::UserError(err) => err,
            AggregateError::AggregateConflict => Error::Conflict,
            other => Error::Store {
                message: other.to_string(),
            },
        }
    }
}

impl From<PersistenceError> for Error {
    fn from(err: PersistenceError) -> Self {
        match err {
            PersistenceError::OptimisticLockError => Error::Conflict,
            other => Error::Store {
                message: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregate_errors_unwrap_to_domain_errors() {
        let err: Error = AggregateError::UserError(Error::SectionsEmpty).into();
        assert_eq!(err, Error::SectionsEmpty);

        let err: Error = AggregateError::<Error>::AggregateConflict.into();
        assert_eq!(err, Error::Conflict);
        assert!(err.is_retryable());
    }

    #[test]
    fn kinds_follow_the_taxonomy() {
        assert_eq!(Error::TooManyPills { max: 9 }.kind(), ErrorKind::Validation);
        assert_eq!(
            Error::SectionFull {
                section: 1,
                free: 0,
                requested: 1
            }
            .kind(),
            ErrorKind::Capacity
        );
        assert_eq!(Error::SectionsEmpty.kind(), ErrorKind::NotFound);
        assert_eq!(
            Error::DuplicateSection { name: "A".into() }.kind(),
            ErrorKind::Conflict
        );
        assert!(!Error::DropperNotFound.is_retryable());
        assert!(Error::StoreTimeout.is_retryable());
    }
}
