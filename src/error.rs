use std::io;

use snafu::Snafu;

/// Crate-wide result alias.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Error that can occur anywhere in the core OCF tooling.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    /// A configuration or usage precondition was violated: unsupported URL
    /// scheme, unsupported codec, destination already exists, malformed
    /// partition filename, and so on.
    #[snafu(display("configuration error: {message}"))]
    Config { message: String },

    /// A schema failed to parse, or a forward-compatibility check failed.
    #[snafu(display("schema error: {message}"))]
    Schema { message: String },

    /// An OCF block or header could not be framed correctly.
    #[snafu(display("framing error: {message}"))]
    Framing { message: String },

    /// The underlying storage backend failed.
    #[snafu(display("storage I/O error: {source}"))]
    Io { source: io::Error },

    /// The Avro codec rejected a record on encode or decode.
    #[snafu(display("record error: {source}"))]
    Record { source: apache_avro::Error },
}

impl From<io::Error> for Error {
    fn from(source: io::Error) -> Self {
        Error::Io { source }
    }
}

impl From<apache_avro::Error> for Error {
    fn from(source: apache_avro::Error) -> Self {
        Error::Record { source }
    }
}

impl Error {
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
        }
    }

    pub fn schema(message: impl Into<String>) -> Self {
        Error::Schema {
            message: message.into(),
        }
    }

    pub fn framing(message: impl Into<String>) -> Self {
        Error::Framing {
            message: message.into(),
        }
    }
}
