use std::fmt::Display;

/// emberdb blob subsystem errors.
#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    /// Invalid on-disk data: bad magic, bad CRC, key mismatch, unknown
    /// compression tag, or a malformed blob index.
    Corruption(String),
    /// An IO error, including a missing blob file.
    IO(String),
    /// A cache-only read missed the cache. This is a signal to the caller,
    /// not a fault.
    Incomplete(String),
    /// The cache could not admit an entry. Callers treat the triggering
    /// request as successful.
    CacheFull,
    /// Malformed caller input, typically a decoder given the wrong shape.
    InvalidArgument(String),
}

impl std::error::Error for Error {}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::Corruption(msg) => write!(f, "corruption: {msg}"),
            Error::IO(msg) => write!(f, "io error: {msg}"),
            Error::Incomplete(msg) => write!(f, "incomplete: {msg}"),
            Error::CacheFull => write!(f, "cache full"),
            Error::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
        }
    }
}

impl Error {
    /// True for errors that abort the surrounding operation. `Incomplete`
    /// and `CacheFull` are reported but never fatal.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Corruption(_) | Error::IO(_) | Error::InvalidArgument(_)
        )
    }
}

/// Constructs an Error::Corruption for the given format string.
#[macro_export]
macro_rules! corruption {
    ($($args:tt)*) => { $crate::error::Error::Corruption(format!($($args)*)) };
}

/// Constructs an Error::InvalidArgument for the given format string.
#[macro_export]
macro_rules! invalid_argument {
    ($($args:tt)*) => { $crate::error::Error::InvalidArgument(format!($($args)*)) };
}

/// An emberdb Result returning Error.
pub type Result<T> = std::result::Result<T, Error>;

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::IO(err.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Error::IO(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_kind() {
        let err = Error::Corruption("bad record crc".to_string());
        assert_eq!(err.to_string(), "corruption: bad record crc");

        let err = Error::IO("no such file".to_string());
        assert_eq!(err.to_string(), "io error: no such file");
    }

    #[test]
    fn macros_build_the_right_variant() {
        let err = corruption!("magic mismatch at {}", 42);
        assert_eq!(err, Error::Corruption("magic mismatch at 42".to_string()));

        let err = invalid_argument!("empty input");
        assert_eq!(err, Error::InvalidArgument("empty input".to_string()));
    }

    #[test]
    fn fatality() {
        assert!(Error::Corruption(String::new()).is_fatal());
        assert!(Error::IO(String::new()).is_fatal());
        assert!(!Error::Incomplete(String::new()).is_fatal());
        assert!(!Error::CacheFull.is_fatal());
    }

    #[test]
    fn io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: Error = io.into();
        assert!(matches!(err, Error::IO(_)));
    }
}
