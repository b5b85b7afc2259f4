//! Treatment and event-time construction.
//!
//! Derives `event_time = time_period - onset`, generates one interaction
//! dummy (`treatment_group × 1[event_time = k]`) per studied event time
//! with exactly one omitted reference category, and builds the plain DiD
//! `post` / `treated × post` columns.

use polars::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{PanelError, Result};
use crate::schema::{derived, obs};

/// Studied event-time window with its omitted reference category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventWindow {
    pub min: i64,
    pub max: i64,
    /// The normalized category; its coefficient is identically zero.
    pub reference: i64,
}

impl EventWindow {
    /// A window `min..=max` omitting `reference`.
    pub fn new(min: i64, max: i64, reference: i64) -> Result<Self> {
        if min >= max {
            return Err(PanelError::Configuration(format!(
                "event window is empty: min {min}, max {max}"
            )));
        }
        if reference < min || reference > max {
            return Err(PanelError::Configuration(format!(
                "reference event time {reference} lies outside the window {min}..={max}"
            )));
        }
        Ok(Self {
            min,
            max,
            reference,
        })
    }

    /// Conventional window: reference at event time -1.
    pub fn with_reference_minus_one(min: i64, max: i64) -> Result<Self> {
        Self::new(min, max, -1)
    }

    /// Build from an explicit list of event times to include as dummies.
    /// Including the reference itself is a configuration error: exactly
    /// one category must stay omitted.
    pub fn from_times(times: &[i64], reference: i64) -> Result<Self> {
        if times.is_empty() {
            return Err(PanelError::Configuration(
                "event window needs at least one included event time".into(),
            ));
        }
        if times.contains(&reference) {
            return Err(PanelError::Configuration(format!(
                "reference event time {reference} must be omitted, not included as a dummy"
            )));
        }
        let mut min = reference;
        let mut max = reference;
        for &k in times {
            min = min.min(k);
            max = max.max(k);
        }
        Self::new(min, max, reference)
    }

    /// Event times that get a dummy column, in ascending order.
    pub fn included_times(&self) -> Vec<i64> {
        (self.min..=self.max)
            .filter(|&k| k != self.reference)
            .collect()
    }

    /// All window event times including the reference.
    pub fn all_times(&self) -> Vec<i64> {
        (self.min..=self.max).collect()
    }

    /// Pre-treatment event times excluding the reference (pre-trend set).
    pub fn pre_times(&self) -> Vec<i64> {
        (self.min..0).filter(|&k| k != self.reference).collect()
    }

    /// Post-treatment event times (0 onward) excluding the reference.
    pub fn post_times(&self) -> Vec<i64> {
        (0.max(self.min)..=self.max)
            .filter(|&k| k != self.reference)
            .collect()
    }
}

/// Stable dummy column name for an event time, e.g. `evt_m2`, `evt_0`,
/// `evt_p3`.
pub fn dummy_name(event_time: i64) -> String {
    if event_time < 0 {
        format!("evt_m{}", -event_time)
    } else if event_time == 0 {
        "evt_0".to_string()
    } else {
        format!("evt_p{event_time}")
    }
}

/// Add `event_time = time_period - onset`.
pub fn derive_event_time(df: DataFrame, onset: i64) -> Result<DataFrame> {
    crate::sample::require_columns(&df, &[obs::TIME_PERIOD])?;
    Ok(df
        .lazy()
        .with_columns([(col(obs::TIME_PERIOD).cast(DataType::Int64) - lit(onset))
            .alias(derived::EVENT_TIME)])
        .collect()?)
}

/// Add one `treatment_group × 1[event_time = k]` dummy per included
/// event time.
///
/// Observations outside the window keep all dummies at zero but stay in
/// the sample; filtering is the caller's decision. Returns the augmented
/// frame and the (event_time, column name) pairs generated.
pub fn add_event_dummies(
    df: DataFrame,
    window: &EventWindow,
    onset: i64,
) -> Result<(DataFrame, Vec<(i64, String)>)> {
    crate::sample::require_columns(&df, &[obs::TIME_PERIOD, obs::TREATMENT_GROUP])?;
    let df = derive_event_time(df, onset)?;

    let times = window.included_times();
    let mut names = Vec::with_capacity(times.len());
    let mut exprs = Vec::with_capacity(times.len());
    for &k in &times {
        let name = dummy_name(k);
        exprs.push(
            (col(obs::TREATMENT_GROUP).cast(DataType::Float64)
                * col(derived::EVENT_TIME)
                    .eq(lit(k))
                    .cast(DataType::Float64))
            .alias(name.as_str()),
        );
        names.push((k, name));
    }

    let out = df.lazy().with_columns(exprs).collect()?;
    Ok((out, names))
}

/// Add the plain DiD columns: `post = 1[time_period >= onset]` and
/// `treated_post = treatment_group × post`.
pub fn add_did_columns(df: DataFrame, onset: i64) -> Result<DataFrame> {
    crate::sample::require_columns(&df, &[obs::TIME_PERIOD, obs::TREATMENT_GROUP])?;
    Ok(df
        .lazy()
        .with_columns([col(obs::TIME_PERIOD)
            .cast(DataType::Int64)
            .gt_eq(lit(onset))
            .cast(DataType::Float64)
            .alias(derived::POST)])
        .with_columns([(col(obs::TREATMENT_GROUP).cast(DataType::Float64)
            * col(derived::POST))
        .alias(derived::TREATED_POST)])
        .collect()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn panel() -> DataFrame {
        df![
            obs::UNIT_ID => [1i64, 1, 1, 2, 2, 2],
            obs::TIME_PERIOD => [2012i64, 2013, 2015, 2012, 2013, 2015],
            obs::TREATMENT_GROUP => [1.0, 1.0, 1.0, 0.0, 0.0, 0.0],
        ]
        .unwrap()
    }

    #[test]
    fn window_rejects_reference_outside_range() {
        assert!(EventWindow::new(-3, 2, -5).is_err());
        assert!(EventWindow::new(2, -3, -1).is_err());
        let w = EventWindow::with_reference_minus_one(-3, 2).unwrap();
        assert_eq!(w.included_times(), vec![-3, -2, 0, 1, 2]);
        assert_eq!(w.pre_times(), vec![-3, -2]);
        assert_eq!(w.post_times(), vec![0, 1, 2]);
    }

    #[test]
    fn explicit_times_cannot_include_the_reference() {
        match EventWindow::from_times(&[-2, -1, 0, 1], -1) {
            Err(PanelError::Configuration(msg)) => {
                assert!(msg.contains("omitted"));
            }
            other => panic!("expected ConfigurationError, got {other:?}"),
        }
        assert!(EventWindow::from_times(&[-2, 0, 1], -1).is_ok());
    }

    #[test]
    fn dummy_names_are_sign_stable() {
        assert_eq!(dummy_name(-3), "evt_m3");
        assert_eq!(dummy_name(0), "evt_0");
        assert_eq!(dummy_name(2), "evt_p2");
    }

    #[test]
    fn event_dummies_interact_treatment_and_relative_time() {
        let window = EventWindow::with_reference_minus_one(-2, 1).unwrap();
        let (out, names) = add_event_dummies(panel(), &window, 2014).unwrap();
        assert_eq!(
            names.iter().map(|(k, _)| *k).collect::<Vec<_>>(),
            vec![-2, 0, 1]
        );

        let ev = out.column(derived::EVENT_TIME).unwrap().i64().unwrap();
        assert_eq!(ev.get(0), Some(-2));
        assert_eq!(ev.get(2), Some(1));

        // Treated unit, event time -2 → evt_m2 = 1.
        let m2 = out.column("evt_m2").unwrap().f64().unwrap();
        assert_eq!(m2.get(0), Some(1.0));
        // Control unit never activates a dummy.
        assert_eq!(m2.get(3), Some(0.0));
        // 2013 is the reference year (-1): no dummy column at all.
        assert!(out.column("evt_m1").is_err());
        // 2013 rows are retained in the sample.
        assert_eq!(out.height(), 6);
    }

    #[test]
    fn did_columns_split_at_onset() {
        let out = add_did_columns(panel(), 2014).unwrap();
        let post = out.column(derived::POST).unwrap().f64().unwrap();
        let tp = out.column(derived::TREATED_POST).unwrap().f64().unwrap();
        assert_eq!(post.get(1), Some(0.0)); // 2013
        assert_eq!(post.get(2), Some(1.0)); // 2015
        assert_eq!(tp.get(2), Some(1.0)); // treated × post
        assert_eq!(tp.get(5), Some(0.0)); // control × post
    }
}
