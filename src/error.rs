use snafu::Snafu;
use std::path::PathBuf;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("missing header: patch does not start with \"PATCH\""))]
    MissingHeader,

    #[snafu(display(
        "truncated record at patch offset {:#x}: needed {} bytes, {} available",
        offset,
        needed,
        available
    ))]
    TruncatedRecord {
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[snafu(display("missing terminator: patch ended at offset {:#x} without \"EOF\"", offset))]
    MissingTerminator { offset: usize },

    #[snafu(display(
        "target buffer of {} bytes exceeds the limit of {} bytes",
        requested,
        limit
    ))]
    ResourceLimitExceeded { requested: usize, limit: usize },

    #[snafu(display("no patch is associated with fingerprint {}", fingerprint))]
    NoMatchingPatch { fingerprint: String },

    #[snafu(display("manifest names \"{}\" but no such entry was found", name))]
    MissingEntry { name: String },

    #[snafu(display("patch #{} failed: {}", index, source))]
    PatchFailed {
        index: usize,
        #[snafu(source(from(Error, Box::new)))]
        source: Box<Error>,
    },

    #[snafu(display("unable to access {}: {}", path.display(), source))]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("invalid manifest {}: {}", path.display(), source))]
    Manifest {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[snafu(display("invalid bundle: {}", source))]
    Bundle { source: bincode::Error },

    #[snafu(display("unable to encode JSON: {}", source))]
    Json { source: serde_json::Error },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// True when the patch stream itself violates the IPS grammar.
    pub fn is_format_error(&self) -> bool {
        match self {
            Error::MissingHeader
            | Error::TruncatedRecord { .. }
            | Error::MissingTerminator { .. } => true,
            Error::PatchFailed { source, .. } => source.is_format_error(),
            _ => false,
        }
    }

    /// Byte offset into the patch stream at which parsing stopped, if known.
    pub fn patch_offset(&self) -> Option<usize> {
        match self {
            Error::MissingHeader => Some(0),
            Error::TruncatedRecord { offset, .. } | Error::MissingTerminator { offset } => {
                Some(*offset)
            }
            Error::PatchFailed { source, .. } => source.patch_offset(),
            _ => None,
        }
    }
}
