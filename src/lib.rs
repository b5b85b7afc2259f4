//! embargo-panelkit: panel estimation engine for the food-embargo wage
//! analysis.
//!
//! Loads repeated cross-section/panel survey extracts, constructs
//! treatment and event-time variables, fits fixed-effects regressions
//! with cluster-robust variance, aggregates event-study and DiD results,
//! and runs synthetic-control/placebo diagnostics. The export layer
//! writes the published result tables as CSV.

pub mod config;
pub mod error;
pub mod estimator;
pub mod event_study;
pub mod event_time;
pub mod export;
pub mod sample;
pub mod schema;
pub mod stats;
pub mod synth;

pub use config::{CollinearityPolicy, RunConfig, RunSpec, SpecFilter};
pub use error::{DataQualityReport, PanelError, Result};
pub use estimator::{Estimate, FitResult, WaldTest};
pub use event_study::{EventStudyResult, EventStudySpec};
pub use event_time::EventWindow;
pub use synth::{DonorSeries, SynthInput, WeightScheme};
