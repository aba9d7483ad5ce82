use std::io;

use thiserror::Error;

/// A set of errors describing how decoding a RAW file might fail.
///
/// All variants are fatal to the operation that produced them; the format is
/// deterministic, so a failure indicates either a truncated file or a schema
/// the decoder does not know. Entries from the file's own error log are *not*
/// represented here; they are surfaced as [`InstrumentError`] values through
/// the reader's handler instead.
#[derive(Debug, Error)]
pub enum RawFileError {
    /// The source failed, or ended before the declared length of a field.
    #[error("I/O error at offset {offset} while reading `{path}`: {source}")]
    Io {
        path: String,
        offset: u64,
        #[source]
        source: io::Error,
    },

    /// A decoded value contradicts the declared layout.
    #[error("format error at `{path}`: {detail}")]
    Format { path: String, detail: String },

    /// The file header carries a schema version this decoder does not know.
    #[error("unsupported file schema version {0}")]
    UnsupportedVersion(u32),

    /// Both acquisition streams claim trailer events; the file is malformed.
    #[error("ambiguous run header: both acquisition streams carry trailer events ({0} and {1})")]
    AmbiguousRunHeader(u32, u32),

    /// No acquisition stream claims trailer events; the file is malformed.
    #[error("missing run header: no acquisition stream carries trailer events ({0} and {1})")]
    MissingRunHeader(u32, u32),

    /// The requested scan range cannot be served.
    #[error("invalid scan range [{from}, {to}]: {reason}")]
    Range { from: u32, to: u32, reason: String },

    /// Profile data was required but the scan stores none.
    #[error("scan {0} has no profile data")]
    NoProfile(u32),
}

impl RawFileError {
    pub(crate) fn format(path: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Format {
            path: path.into(),
            detail: detail.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, RawFileError>;

/// One entry from the instrument's own error log.
///
/// These record acquisition-time diagnostics and do not make the file
/// undecodable, so they are reported through a logging callback rather than
/// aborting the decode.
#[derive(Debug, Clone, PartialEq)]
pub struct InstrumentError {
    /// Retention time of the event, in minutes.
    pub time: f64,
    pub message: String,
}
