//! Error reporting.
//!
//! Every reportable condition is a [`PgError`] carrying a SQLSTATE, a primary
//! message, optional detail/hint and an optional cursor position into the
//! original query text. Callers propagate with `?`; the statement boundary in
//! [`crate::tcop`] rolls the transaction back.

use std::fmt;

/// SQLSTATE classes raised by the analyzer, planner, executor and refresh code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlState {
    SyntaxError,
    UndefinedColumn,
    UndefinedFunction,
    UndefinedTable,
    UndefinedObject,
    UndefinedParameter,
    AmbiguousFunction,
    AmbiguousColumn,
    AmbiguousAlias,
    DuplicateColumn,
    DuplicateAlias,
    DuplicateObject,
    DuplicateTable,
    DuplicateFunction,
    WrongObjectType,
    DatatypeMismatch,
    CannotCoerce,
    FeatureNotSupported,
    IndeterminateDatatype,
    TooManyArguments,
    CardinalityViolation,
    ObjectNotInPrerequisiteState,
    GroupingError,
    WindowingError,
    InvalidColumnReference,
    CollationMismatch,
    InvalidParameterValue,
    DataException,
    InvalidTextRepresentation,
    InvalidBinaryRepresentation,
    StringDataRightTruncation,
    DatetimeFieldOverflow,
    InvalidDatetimeFormat,
    DivisionByZero,
    NumericValueOutOfRange,
    ArraySubscriptError,
    ArrayElementError,
    NullValueNotAllowed,
    NotNullViolation,
    UniqueViolation,
    CheckViolation,
    InvalidRowCountInLimitClause,
    InvalidRowCountInResultOffsetClause,
    CharacterNotInRepertoire,
    InvalidArgumentForNtile,
    InvalidEscapeSequence,
    InvalidRegularExpression,
    SubstringError,
    InvalidArgumentForPowerFunction,
    InvalidJsonText,
    MoreThanOneSqlJsonItem,
    NoSqlJsonItem,
    SqlJsonScalarRequired,
    SqlJsonArrayNotFound,
    SqlJsonMemberNotFound,
    SqlJsonObjectNotFound,
    DuplicateJsonObjectKeyValue,
    InvalidSqlJsonSubscript,
    SingletonSqlJsonItemRequired,
    NonNumericSqlJsonItem,
    SyntaxErrorInJsonPath,
    UndefinedJsonPathVariable,
    InvalidObjectDefinition,
    InvalidTableDefinition,
    DependentObjectsStillExist,
    InvalidFunctionDefinition,
    InsufficientPrivilege,
    ProgramLimitExceeded,
    StatementTooComplex,
    TooManyColumns,
    QueryCanceled,
    ObjectInUse,
    InFailedSqlTransaction,
    InvalidArgumentForNthValue,
    InvalidPrecedingOrFollowingSize,
    InternalError,
}

impl SqlState {
    /// The five-character SQLSTATE code.
    pub fn code(self) -> &'static str {
        match self {
            Self::SyntaxError => "42601",
            Self::UndefinedColumn => "42703",
            Self::UndefinedFunction => "42883",
            Self::UndefinedTable => "42P01",
            Self::UndefinedObject => "42704",
            Self::UndefinedParameter => "42P02",
            Self::AmbiguousFunction => "42725",
            Self::AmbiguousColumn => "42702",
            Self::AmbiguousAlias => "42P09",
            Self::DuplicateColumn => "42701",
            Self::DuplicateAlias => "42712",
            Self::DuplicateObject => "42710",
            Self::DuplicateTable => "42P07",
            Self::DuplicateFunction => "42723",
            Self::WrongObjectType => "42809",
            Self::DatatypeMismatch => "42804",
            Self::CannotCoerce => "42846",
            Self::FeatureNotSupported => "0A000",
            Self::IndeterminateDatatype => "42P18",
            Self::TooManyArguments => "54023",
            Self::CardinalityViolation => "21000",
            Self::ObjectNotInPrerequisiteState => "55000",
            Self::GroupingError => "42803",
            Self::WindowingError => "42P20",
            Self::InvalidColumnReference => "42P10",
            Self::CollationMismatch => "42P21",
            Self::InvalidParameterValue => "22023",
            Self::DataException => "22000",
            Self::InvalidTextRepresentation => "22P02",
            Self::InvalidBinaryRepresentation => "22P03",
            Self::StringDataRightTruncation => "22001",
            Self::DatetimeFieldOverflow => "22008",
            Self::InvalidDatetimeFormat => "22007",
            Self::DivisionByZero => "22012",
            Self::NumericValueOutOfRange => "22003",
            Self::ArraySubscriptError => "2202E",
            Self::ArrayElementError => "2202E",
            Self::NullValueNotAllowed => "22004",
            Self::NotNullViolation => "23502",
            Self::UniqueViolation => "23505",
            Self::CheckViolation => "23514",
            Self::InvalidRowCountInLimitClause => "2201W",
            Self::InvalidRowCountInResultOffsetClause => "2201X",
            Self::CharacterNotInRepertoire => "22021",
            Self::InvalidArgumentForNtile => "22014",
            Self::InvalidEscapeSequence => "22025",
            Self::InvalidRegularExpression => "2201B",
            Self::SubstringError => "22011",
            Self::InvalidArgumentForPowerFunction => "2201F",
            Self::InvalidJsonText => "22032",
            Self::MoreThanOneSqlJsonItem => "22034",
            Self::NoSqlJsonItem => "22035",
            Self::SqlJsonScalarRequired => "2203F",
            Self::SqlJsonArrayNotFound => "22039",
            Self::SqlJsonMemberNotFound => "2203A",
            Self::SqlJsonObjectNotFound => "2203C",
            Self::DuplicateJsonObjectKeyValue => "22030",
            Self::InvalidSqlJsonSubscript => "22033",
            Self::SingletonSqlJsonItemRequired => "22038",
            Self::NonNumericSqlJsonItem => "2203B",
            Self::SyntaxErrorInJsonPath => "42601",
            Self::UndefinedJsonPathVariable => "42704",
            Self::InvalidObjectDefinition => "42P17",
            Self::InvalidTableDefinition => "42P16",
            Self::DependentObjectsStillExist => "2BP01",
            Self::InvalidFunctionDefinition => "42P13",
            Self::InsufficientPrivilege => "42501",
            Self::ProgramLimitExceeded => "54000",
            Self::StatementTooComplex => "54001",
            Self::TooManyColumns => "54011",
            Self::QueryCanceled => "57014",
            Self::ObjectInUse => "55006",
            Self::InFailedSqlTransaction => "25P02",
            Self::InvalidArgumentForNthValue => "22016",
            Self::InvalidPrecedingOrFollowingSize => "22013",
            Self::InternalError => "XX000",
        }
    }
}

impl fmt::Display for SqlState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// A structured error report.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct PgError {
    pub sqlstate: SqlState,
    pub message: String,
    pub detail: Option<String>,
    pub hint: Option<String>,
    /// Byte offset into the statement text, when the failing node had one.
    pub position: Option<usize>,
    /// Where the error happened, innermost first (e.g. inside a SQL function).
    pub context: Option<String>,
}

pub type PgResult<T> = Result<T, PgError>;

impl PgError {
    pub fn new(sqlstate: SqlState, message: impl Into<String>) -> Self {
        Self {
            sqlstate,
            message: message.into(),
            detail: None,
            hint: None,
            position: None,
            context: None,
        }
    }

    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    #[must_use]
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Attach a cursor position unless one is already set.
    #[must_use]
    pub fn at(mut self, location: Option<usize>) -> Self {
        if self.position.is_none() {
            self.position = location;
        }
        self
    }

    /// Append a context line. The cursor position refers to text the
    /// caller did not write, so it is dropped.
    #[must_use]
    pub fn with_context(mut self, line: impl Into<String>) -> Self {
        let line = line.into();
        self.context = Some(match self.context.take() {
            Some(inner) => format!("{inner}\n{line}"),
            None => line,
        });
        self.position = None;
        self
    }

    pub fn code(&self) -> &'static str {
        self.sqlstate.code()
    }
}

/// Internal consistency failure (`elog(ERROR, ...)`).
pub fn elog(message: impl Into<String>) -> PgError {
    PgError::new(SqlState::InternalError, message)
}

pub(crate) fn syntax_error(message: impl Into<String>, location: Option<usize>) -> PgError {
    PgError::new(SqlState::SyntaxError, message).at(location)
}

pub(crate) fn feature_not_supported(message: impl Into<String>) -> PgError {
    PgError::new(SqlState::FeatureNotSupported, message)
}

pub(crate) fn datatype_mismatch(message: impl Into<String>) -> PgError {
    PgError::new(SqlState::DatatypeMismatch, message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_five_characters() {
        for state in [
            SqlState::SyntaxError,
            SqlState::CardinalityViolation,
            SqlState::ObjectNotInPrerequisiteState,
            SqlState::FeatureNotSupported,
            SqlState::InternalError,
        ] {
            assert_eq!(state.code().len(), 5);
        }
    }

    #[test]
    fn position_is_sticky() {
        let err = PgError::new(SqlState::UndefinedColumn, "column \"x\" does not exist")
            .at(Some(7))
            .at(Some(42));
        assert_eq!(err.position, Some(7));
        assert_eq!(err.to_string(), "column \"x\" does not exist");
        assert_eq!(err.code(), "42703");
    }
}
