use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// The first failure that aborted an extraction.
///
/// Entries applied before the failure stay on disk; nothing is rolled back.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// The tar stream itself is malformed, or reading it failed.
    #[error("failed to decode tar stream: {0}")]
    Decode(#[source] io::Error),

    /// A filesystem operation on behalf of an entry failed.
    #[error("{context}: {source}")]
    Io {
        /// What was being attempted, naming the entry and its destination.
        context: String,
        /// The underlying failure.
        #[source]
        source: io::Error,
    },

    /// An entry would be written outside of the volume, either through a
    /// `..` component or through a symlink unpacked earlier.
    #[error("entry `{entry}` resolves outside of `{}`", volume.display())]
    Traversal {
        /// Name of the offending entry as recorded in the archive.
        entry: String,
        /// The volume being populated.
        volume: PathBuf,
    },
}

impl ExtractError {
    pub(crate) fn io(context: impl Into<String>, source: io::Error) -> ExtractError {
        ExtractError::Io {
            context: context.into(),
            source,
        }
    }
}
