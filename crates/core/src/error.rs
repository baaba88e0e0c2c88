//! Error types and process exit codes for hrwsi

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for hrwsi operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid raster dimensions: {width}x{height}")]
    InvalidDimensions { width: usize, height: usize },

    #[error("Index out of bounds: ({row}, {col}) in raster of size ({rows}, {cols})")]
    IndexOutOfBounds {
        row: usize,
        col: usize,
        rows: usize,
        cols: usize,
    },

    #[error("Raster size mismatch: expected ({er}, {ec}), got ({ar}, {ac})")]
    SizeMismatch { er: usize, ec: usize, ar: usize, ac: usize },

    #[error("CRS mismatch: {0} vs {1}")]
    CrsMismatch(String, String),

    #[error("Unsupported data type: {0}")]
    UnsupportedDataType(String),

    #[error("GDAL error: {0}")]
    #[cfg(feature = "gdal")]
    Gdal(String),

    #[error("Invalid parameter: {name} = {value} ({reason})")]
    InvalidParameter {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("Invalid expression `{expr}` at column {position}: {reason}")]
    Expression {
        expr: String,
        position: usize,
        reason: String,
    },

    #[error("Input file missing: {}", .0.display())]
    MissingInput(PathBuf),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Algorithm error: {0}")]
    Algorithm(String),

    #[error("{0}")]
    Other(String),
}

#[cfg(feature = "gdal")]
impl From<gdal::errors::GdalError> for Error {
    fn from(e: gdal::errors::GdalError) -> Self {
        Error::Gdal(e.to_string())
    }
}

impl Error {
    /// Exit code a batch job should terminate with when failing on this error
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Error::InvalidParameter { .. } | Error::Expression { .. } | Error::Config(_) => {
                ExitCode::WrongInputParameters
            }
            Error::MissingInput(_) => ExitCode::MainInputFileError,
            Error::SizeMismatch { .. }
            | Error::CrsMismatch(..)
            | Error::UnsupportedDataType(_)
            | Error::InvalidDimensions { .. } => ExitCode::RuntimeInputFileError,
            Error::Io(_) => ExitCode::OsError,
            Error::IndexOutOfBounds { .. } => ExitCode::ProgramInternalTestError,
            #[cfg(feature = "gdal")]
            Error::Gdal(_) => ExitCode::Default,
            Error::Algorithm(_) | Error::Other(_) => ExitCode::Default,
        }
    }
}

/// Result type alias for hrwsi operations
pub type Result<T> = std::result::Result<T, Error>;

/// Exit code convention shared by the processing routines.
///
/// Ranges:
/// - `[10, 50)`: most likely cannot be solved by restarting the job
/// - `[50, 100)`: unlikely to be solved by a restart, worth one more try
/// - `[100, 200)`: likely solved by restarting; `129..=192` are kill signals
/// - `[200, 255]`: terminal states that are not errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExitCode {
    Success,
    /// Unhandled error
    Default,
    /// Programming error, needs a developer
    ProgramInternalTestError,
    WrongInputParameters,
    /// May be solved by restarting if input files were being copied
    MainInputFileError,
    RuntimeInputFileError,
    SubprocessUserDefinedTimeout,
    DiasDbConnexionProblem,
    RuntimeArgError,
    OsError,
    DiskLimit,
    MemoryLimit,
    /// Terminated by signal 1..=64
    Killed(u8),
    /// Any other value, kept verbatim
    Other(u8),
}

impl ExitCode {
    /// Numeric process exit status
    pub fn code(self) -> u8 {
        match self {
            ExitCode::Success => 0,
            ExitCode::Default => 1,
            ExitCode::ProgramInternalTestError => 2,
            ExitCode::WrongInputParameters => 10,
            ExitCode::MainInputFileError => 11,
            ExitCode::RuntimeInputFileError => 12,
            ExitCode::SubprocessUserDefinedTimeout => 50,
            ExitCode::DiasDbConnexionProblem => 51,
            ExitCode::RuntimeArgError => 52,
            ExitCode::OsError => 100,
            ExitCode::DiskLimit => 101,
            ExitCode::MemoryLimit => 102,
            ExitCode::Killed(signal) => 128u8.saturating_add(signal),
            ExitCode::Other(code) => code,
        }
    }

    /// Decode a numeric exit status
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => ExitCode::Success,
            1 => ExitCode::Default,
            2 => ExitCode::ProgramInternalTestError,
            10 => ExitCode::WrongInputParameters,
            11 => ExitCode::MainInputFileError,
            12 => ExitCode::RuntimeInputFileError,
            50 => ExitCode::SubprocessUserDefinedTimeout,
            51 => ExitCode::DiasDbConnexionProblem,
            52 => ExitCode::RuntimeArgError,
            100 => ExitCode::OsError,
            101 => ExitCode::DiskLimit,
            102 => ExitCode::MemoryLimit,
            129..=192 => ExitCode::Killed(code - 128),
            other => ExitCode::Other(other),
        }
    }

    /// Whether restarting the job from scratch has a chance to succeed
    pub fn is_retryable(self) -> bool {
        (50..200).contains(&self.code())
    }

    /// Whether this status reports a failure.
    ///
    /// Codes 200 and above are terminal states such as "too cloudy".
    pub fn is_error(self) -> bool {
        let code = self.code();
        code != 0 && code < 200
    }
}

impl fmt::Display for ExitCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitCode::Killed(signal) => write!(f, "killed by signal {} ({})", signal, self.code()),
            other => write!(f, "{:?} ({})", other, other.code()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_roundtrip_for_named_codes() {
        for code in [0u8, 1, 2, 10, 11, 12, 50, 51, 52, 100, 101, 102, 129, 192, 201] {
            assert_eq!(ExitCode::from_code(code).code(), code);
        }
        assert_eq!(ExitCode::from_code(137), ExitCode::Killed(9));
    }

    #[test]
    fn test_exit_code_categories() {
        assert!(!ExitCode::Success.is_error());
        assert!(ExitCode::WrongInputParameters.is_error());
        assert!(!ExitCode::WrongInputParameters.is_retryable());
        assert!(ExitCode::SubprocessUserDefinedTimeout.is_retryable());
        assert!(ExitCode::MemoryLimit.is_retryable());
        assert!(ExitCode::Killed(15).is_retryable());
        assert!(!ExitCode::Other(200).is_error());
        assert!(!ExitCode::Other(200).is_retryable());
    }

    #[test]
    fn test_error_exit_codes() {
        let err = Error::Expression {
            expr: "A0 +".into(),
            position: 4,
            reason: "unexpected end of expression".into(),
        };
        assert_eq!(err.exit_code(), ExitCode::WrongInputParameters);
        assert_eq!(
            Error::MissingInput(PathBuf::from("cloud.tif")).exit_code().code(),
            11
        );
        assert_eq!(
            Error::SizeMismatch { er: 1, ec: 1, ar: 2, ac: 2 }.exit_code(),
            ExitCode::RuntimeInputFileError
        );
        let io = Error::from(std::io::Error::new(std::io::ErrorKind::Other, "disk"));
        assert_eq!(io.exit_code(), ExitCode::OsError);
    }
}
