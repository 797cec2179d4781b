//! # kinfit-core
//!
//! This is an internal crate used by `kinfit`. It holds the event model, the constrained
//! kinematic fitter, the cut machinery and the candidate types shared by every finder.
#![warn(clippy::perf, clippy::style)]
#![allow(clippy::excessive_precision)]

use thiserror::Error;

/// Reconstructed decay candidates and the per-event collections that own them.
pub mod candidate;
/// Cut-flow counters and typed cut registries.
pub mod cuts;
/// Methods for loading and validating [`Event`]-based data.
pub mod data;
/// The constrained least-squares kinematic fitter.
pub mod fit;
/// Reading events and configuration tables from disk.
pub mod io;
/// Sinks which receive reconstruction results after each event.
pub mod observer;
/// Utility functions, enums, and vector types
pub mod utils;

pub use crate::candidate::{CandidateLists, DecayCandidate, EventCandidates, FittedDaughter};
pub use crate::cuts::{CutFlow, CutRegistry};
pub use crate::data::{Event, EventBuilder, McParticle, McParticleId, Track, TrackId, Vertex, VertexId};
pub use crate::fit::{Constraint, FitParticle, FitResult, FitSettings, KinFitter, MassConstraint};
pub use crate::observer::{FinderSummary, MassHistograms, NullObserver, Observer};
pub use crate::utils::enums::{DecayKind, FitStatus, Mode, Species, TruthMatch, VertexKind};
pub use crate::utils::vectors::{Vec3, Vec4};

/// The speed of light in cm/ps, used to convert decay lengths into proper lifetimes.
pub const SPEED_OF_LIGHT: f64 = 0.0299792458;

pub type KinFitResult<T> = Result<T, KinFitError>;

/// The error type used by all `kinfit` internal methods
#[derive(Error, Debug)]
pub enum KinFitError {
    /// An alias for [`std::io::Error`].
    #[error("IO Error: {0}")]
    IOError(#[from] std::io::Error),
    /// An alias for [`serde_json::Error`].
    #[error("JSON Error: {0}")]
    JsonError(#[from] serde_json::Error),
    /// An alias for [`toml::de::Error`].
    #[error("TOML Error: {0}")]
    TomlError(#[from] toml::de::Error),
    /// An alias for [`shellexpand::LookupError`].
    #[error("Failed to expand path: {0}")]
    LookupError(#[from] shellexpand::LookupError<std::env::VarError>),
    /// The fitter produced a negative chi-square, which can only happen if the covariance or the
    /// linear solve is broken. This is never recoverable.
    #[error("Kinematic fit \"{fit}\" returned a negative chi-square ({chi2})!")]
    NegativeChi2 {
        /// Description of the fit which failed
        fit: String,
        /// The offending chi-square
        chi2: f64,
    },
    /// A finder which needs the primary vertex was handed an event without one.
    #[error("{finder}: event {event} has no primary vertex!")]
    MissingPrimaryVertex {
        /// Name of the finder
        finder: String,
        /// Event number
        event: u64,
    },
    /// A finder was asked to run in a reconstruction mode it does not implement.
    #[error("{finder} does not support reconstruction mode \"{mode}\"!")]
    InvalidMode {
        /// Name of the finder
        finder: String,
        /// The requested mode
        mode: String,
    },
    /// An event whose identifiers or cross references are inconsistent.
    #[error("Invalid event: {reason}")]
    InvalidEvent {
        /// What is wrong with the event
        reason: String,
    },
    /// An error which occurs when a configuration refers to a cut which was never registered for
    /// the target finder.
    #[error("No cut named \"{name}\" is registered for {finder}!")]
    UnknownCut {
        /// Name of the cut which failed lookup
        name: String,
        /// Name of the finder
        finder: String,
    },
    /// An error which occurs when the user tries to parse an invalid string of text, typically
    /// into an enum variant.
    #[error("Failed to parse string: \"{name}\" does not correspond to a valid \"{object}\"!")]
    ParseError {
        /// The string which was parsed
        name: String,
        /// The name of the object it failed to parse into
        object: String,
    },
    /// An error type for [`rayon`] thread pools
    #[cfg(feature = "rayon")]
    #[error("Error building thread pool: {0}")]
    ThreadPoolError(#[from] rayon::ThreadPoolBuildError),
    /// A custom fallback error for errors too complex or too infrequent to warrant their own error
    /// category.
    #[error("{0}")]
    Custom(String),
}

impl Clone for KinFitError {
    // Most wrapped error types are not cloneable, so a clone keeps only the message
    fn clone(&self) -> Self {
        let err_string = self.to_string();
        KinFitError::Custom(err_string)
    }
}
