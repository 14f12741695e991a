//! Beacon Domain Layer
//!
//! This crate contains the core business logic and domain model for Beacon.
//! It performs no I/O and defines the fundamental concepts, value objects, and
//! trait interfaces that all other layers depend upon.
//!
//! ## Key Concepts
//!
//! - **Student**: The aggregate root owning factor samples and alerts
//! - **Risk factor sample**: An immutable standing measurement (0-100, 100 is best)
//! - **Risk profile**: A derived view (composite score, band, trend), never authoritative
//! - **Alert**: A threshold crossing with a forward-only lifecycle
//! - **Intervention**: A separate aggregate with an append-only progress/outcome log
//!
//! ## Architecture
//!
//! This crate follows Clean Architecture:
//! - Pure business logic only (scoring math lives in [`scoring`])
//! - Infrastructure implementations live in other crates
//! - Trait definitions for all external interactions live in [`traits`]

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod alert;
pub mod clock;
pub mod error;
pub mod factor;
pub mod ids;
pub mod intervention;
pub mod notification;
pub mod ordering;
pub mod period;
pub mod profile;
pub mod scoring;
pub mod student;
pub mod traits;
pub mod trend;

// Re-exports for convenience
pub use alert::{
    status_before, Alert, AlertDetails, AlertSeverity, AlertStatus, AlertTransition, AlertType,
};
pub use clock::{Clock, FixedClock, SystemClock};
pub use error::{DomainError, RepoError};
pub use factor::{FactorKind, FactorWeights, RiskFactorSample, WeightTable};
pub use ids::{AlertId, AttemptId, InterventionId, SampleId, StudentId};
pub use intervention::{
    Effectiveness, Intervention, InterventionKind, InterventionStatus, NewIntervention,
    OutcomeDelta, OutcomeTally, ProgressEntry,
};
pub use notification::{
    AttemptStatus, Cadence, Channel, ChannelAttempt, ChannelFlags, DeliveryIntent,
    NotificationPreference, Schedule,
};
pub use period::CalendarPeriod;
pub use profile::{BandThresholds, FactorReading, RiskBand, RiskProfile, RiskWatermark, Trend};
pub use scoring::{MitigationConfig, MitigationSource, ScoringConfig};
pub use student::{EnrollmentStatus, Student};
pub use traits::{AlertQuery, AlertUpsert, ExpenseEntry, RiskStore};
pub use trend::{BandCounts, CohortTrendPoint};
