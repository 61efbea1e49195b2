use num_enum::IntoPrimitive;
use thiserror::Error;

pub type BookResult<T = ()> = Result<T, BookError>;

#[repr(u8)]
#[derive(Debug, Clone, Eq, PartialEq, Copy)]
pub enum SourceFileId {
    Critbit = 0,
    BookSide = 1,
    Matching = 2,
    State = 3,
}

impl std::fmt::Display for SourceFileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceFileId::Critbit => write!(f, "src/critbit.rs"),
            SourceFileId::BookSide => write!(f, "src/bookside.rs"),
            SourceFileId::Matching => write!(f, "src/matching.rs"),
            SourceFileId::State => write!(f, "src/state.rs"),
        }
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum BookError {
    #[error("{book_error_code}; {source_file_id}:{line}")]
    BookErrorCode { book_error_code: BookErrorCode, line: u32, source_file_id: SourceFileId },
}

impl BookError {
    pub fn code(&self) -> BookErrorCode {
        match self {
            BookError::BookErrorCode { book_error_code, .. } => *book_error_code,
        }
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq, IntoPrimitive)]
#[repr(u32)]
pub enum BookErrorCode {
    #[error("BookErrorCode::InvalidOraclePrice oracle price is not a whole number of lots")]
    InvalidOraclePrice,
    #[error("BookErrorCode::InvalidInputLots lot budgets must not be negative")]
    InvalidInputLots,

    #[error("BookErrorCode::Default Check the source code for more info")]
    Default = u32::MAX,
}

#[inline]
pub fn check_assert(
    cond: bool,
    book_error_code: BookErrorCode,
    line: u32,
    source_file_id: SourceFileId,
) -> BookResult<()> {
    if cond {
        Ok(())
    } else {
        Err(BookError::BookErrorCode { book_error_code, line, source_file_id })
    }
}

macro_rules! declare_check_assert_macros {
    ($source_file_id:expr) => {
        #[allow(unused_macros)]
        macro_rules! throw {
            () => {
                crate::error::BookError::BookErrorCode {
                    book_error_code: crate::error::BookErrorCode::Default,
                    line: line!(),
                    source_file_id: $source_file_id,
                }
            };
        }

        #[allow(unused_macros)]
        macro_rules! throw_err {
            ($err:expr) => {
                crate::error::BookError::BookErrorCode {
                    book_error_code: $err,
                    line: line!(),
                    source_file_id: $source_file_id,
                }
            };
        }

        #[allow(unused_macros)]
        macro_rules! check {
            ($cond:expr, $err:expr) => {
                check_assert($cond, $err, line!(), $source_file_id)
            };
        }

        #[allow(unused_macros)]
        macro_rules! check_eq {
            ($x:expr, $y:expr, $err:expr) => {
                check_assert($x == $y, $err, line!(), $source_file_id)
            };
        }
    };
}
