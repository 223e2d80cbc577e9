// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Error types.

use std::path::PathBuf;

use epa_graph::GraphError;
use thiserror::Error;

/// Hardware import failures. Any of these aborts the import for one host.
#[derive(Debug, Error)]
pub enum ImportError {
    /// The hardware description is not well-formed.
    #[error("[HW_PARSE] {0}")]
    Parse(String),
    /// An object lacks an attribute needed for its unique name.
    #[error("[HW_ATTR] {object} object is missing `{attribute}`")]
    MissingAttribute {
        /// Object type (`Cache`, `PU`, ...).
        object: String,
        /// Missing attribute name.
        attribute: &'static str,
    },
    /// An input file could not be read.
    #[error("[HW_IO] {path}: {source}")]
    Io {
        /// File that failed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// The graph rejected a write.
    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// SDN controller failures.
#[derive(Debug, Error)]
pub enum SdnError {
    /// Connection refused, timed out, or non-success status.
    #[error("[SDN_UNREACHABLE] {0}")]
    Unreachable(String),
    /// Body was not the expected JSON.
    #[error("[SDN_DECODE] {0}")]
    Decode(String),
}

/// Inventory source failures.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The source could not be queried.
    #[error("[SOURCE_UNREACHABLE] {0}")]
    Unreachable(String),
    /// The source returned malformed data.
    #[error("[SOURCE_DECODE] {0}")]
    Decode(String),
}

/// Errors surfaced to callers of the controller.
#[derive(Debug, Error)]
pub enum EpaError {
    /// Graph backend, SDN controller or inventory source is unavailable.
    #[error("[BACKEND_UNREACHABLE] {0}")]
    BackendUnreachable(String),
    /// Resource, link or facility does not exist.
    #[error("[NOT_FOUND] {0}")]
    NotFound(String),
    /// Facility exists but lacks a linked-service endpoint or credentials.
    #[error("[FACILITY_CONFIG] facility {pop} has no {what}")]
    MissingFacilityConfiguration {
        /// Facility identifier.
        pop: String,
        /// What is missing.
        what: &'static str,
    },
    /// Malformed request (e.g. link id without `->`).
    #[error("[INVALID_REQUEST] {0}")]
    InvalidRequest(String),
    /// Hardware import failed.
    #[error(transparent)]
    Import(#[from] ImportError),
}

impl EpaError {
    /// Shorthand for [`EpaError::NotFound`].
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// True for conditions callers report as "missing".
    pub const fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_) | Self::MissingFacilityConfiguration { .. }
        )
    }

    /// True for conditions callers report as "broken".
    pub const fn is_unavailable(&self) -> bool {
        matches!(
            self,
            Self::BackendUnreachable(_) | Self::Import(ImportError::Graph(_))
        )
    }
}

impl From<GraphError> for EpaError {
    fn from(err: GraphError) -> Self {
        Self::BackendUnreachable(err.to_string())
    }
}

impl From<SdnError> for EpaError {
    fn from(err: SdnError) -> Self {
        Self::BackendUnreachable(err.to_string())
    }
}

impl From<SourceError> for EpaError {
    fn from(err: SourceError) -> Self {
        Self::BackendUnreachable(err.to_string())
    }
}
