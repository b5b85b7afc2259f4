//! Export layer: builds the output tables in their published shapes and
//! writes them as CSV under the run's output directory.

use std::fs::File;
use std::path::PathBuf;

use polars::prelude::*;

use crate::config::RunConfig;
use crate::error::Result;
use crate::event_study::{DidRow, EventStudyResult};
use crate::schema;
use crate::synth::{PlaceboResult, SynthResult};

/// Event-study table: [event_time, coefficient, standard_error, ci_lo, ci_hi].
pub fn event_study_table(result: &EventStudyResult) -> Result<DataFrame> {
    use schema::event_study as cols;
    let rows = result.rows();
    let mut event_time = Vec::with_capacity(rows.len());
    let mut coefficient = Vec::with_capacity(rows.len());
    let mut std_error = Vec::with_capacity(rows.len());
    let mut ci_lo = Vec::with_capacity(rows.len());
    let mut ci_hi = Vec::with_capacity(rows.len());
    for row in rows {
        let (lo, hi) = row.estimate().ci();
        event_time.push(row.event_time);
        coefficient.push(row.coefficient);
        std_error.push(row.std_error);
        ci_lo.push(lo);
        ci_hi.push(hi);
    }
    Ok(DataFrame::new(vec![
        Column::new(cols::EVENT_TIME.into(), event_time),
        Column::new(cols::COEFFICIENT.into(), coefficient),
        Column::new(cols::STANDARD_ERROR.into(), std_error),
        Column::new(cols::CI_LO.into(), ci_lo),
        Column::new(cols::CI_HI.into(), ci_hi),
    ])?)
}

/// DiD summary table:
/// [specification_label, coefficient, standard_error, n_obs, r_squared].
pub fn did_summary_table(rows: &[DidRow]) -> Result<DataFrame> {
    use schema::did_summary as cols;
    let label: Vec<&str> = rows.iter().map(|r| r.label.as_str()).collect();
    let coefficient: Vec<f64> = rows.iter().map(|r| r.estimate.coefficient).collect();
    let std_error: Vec<f64> = rows.iter().map(|r| r.estimate.std_error).collect();
    let n_obs: Vec<u64> = rows.iter().map(|r| r.n_obs as u64).collect();
    let r_squared: Vec<f64> = rows.iter().map(|r| r.r_squared).collect();
    Ok(DataFrame::new(vec![
        Column::new(cols::SPECIFICATION_LABEL.into(), label),
        Column::new(cols::COEFFICIENT.into(), coefficient),
        Column::new(cols::STANDARD_ERROR.into(), std_error),
        Column::new(cols::N_OBS.into(), n_obs),
        Column::new(cols::R_SQUARED.into(), r_squared),
    ])?)
}

/// Synthetic-control table: [time_period, actual, synthetic, gap].
pub fn synth_table(result: &SynthResult) -> Result<DataFrame> {
    use schema::synth as cols;
    Ok(DataFrame::new(vec![
        Column::new(cols::TIME_PERIOD.into(), result.periods.clone()),
        Column::new(cols::ACTUAL.into(), result.actual.clone()),
        Column::new(cols::SYNTHETIC.into(), result.synthetic.clone()),
        Column::new(cols::GAP.into(), result.gap.clone()),
    ])?)
}

/// Placebo table: [unit_label, pre_rmspe, post_rmspe, ratio], the treated
/// unit first, then every surviving placebo donor.
pub fn placebo_table(result: &PlaceboResult) -> Result<DataFrame> {
    use schema::placebo as cols;
    let all = std::iter::once(&result.actual).chain(result.placebos.iter());
    let mut label = Vec::with_capacity(result.placebos.len() + 1);
    let mut pre = Vec::with_capacity(result.placebos.len() + 1);
    let mut post = Vec::with_capacity(result.placebos.len() + 1);
    let mut ratio = Vec::with_capacity(result.placebos.len() + 1);
    for row in all {
        label.push(row.label.as_str());
        pre.push(row.pre_rmspe);
        post.push(row.post_rmspe);
        ratio.push(row.ratio);
    }
    Ok(DataFrame::new(vec![
        Column::new(cols::UNIT_LABEL.into(), label),
        Column::new(cols::PRE_RMSPE.into(), pre),
        Column::new(cols::POST_RMSPE.into(), post),
        Column::new(cols::RATIO.into(), ratio),
    ])?)
}

/// Write a table as CSV under the run's output directory, creating it if
/// needed. Returns the written path.
pub fn write_csv(df: &mut DataFrame, config: &RunConfig, filename: &str) -> Result<PathBuf> {
    let dir = config.ensure_output_dir()?;
    let path = dir.join(filename);
    let file = File::create(&path)?;
    CsvWriter::new(file).finish(df)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimator::Estimate;
    use crate::synth::{construct, DonorSeries, SynthInput, WeightScheme};

    fn did_rows() -> Vec<DidRow> {
        vec![
            DidRow {
                label: "baseline".into(),
                estimate: Estimate {
                    coefficient: -0.08,
                    std_error: 0.03,
                },
                n_obs: 1200,
                r_squared: 0.41,
            },
            DidRow {
                label: "with_covariates".into(),
                estimate: Estimate {
                    coefficient: -0.06,
                    std_error: 0.025,
                },
                n_obs: 1100,
                r_squared: 0.47,
            },
        ]
    }

    #[test]
    fn did_summary_has_published_columns() {
        let table = did_summary_table(&did_rows()).unwrap();
        assert_eq!(
            table.get_column_names_str(),
            vec![
                "specification_label",
                "coefficient",
                "standard_error",
                "n_obs",
                "r_squared"
            ]
        );
        assert_eq!(table.height(), 2);
    }

    #[test]
    fn synth_table_round_trips_through_csv() {
        let input = SynthInput {
            periods: vec![2012, 2013, 2014, 2015],
            treated: vec![1.0, 1.2, 2.0, 2.1],
            donors: vec![
                DonorSeries::new("a", vec![1.0, 1.1, 1.2, 1.3]),
                DonorSeries::new("b", vec![0.9, 1.25, 1.15, 1.3]),
            ],
            treatment_period: 2014,
        };
        let result = construct(&input, WeightScheme::MeanMatched).unwrap();
        let mut table = synth_table(&result).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let config = RunConfig::new(dir.path(), dir.path().join("out"));
        let path = write_csv(&mut table, &config, "synthetic_control.csv").unwrap();
        assert!(path.exists());

        let text = std::fs::read_to_string(path).unwrap();
        assert!(text.starts_with("time_period,actual,synthetic,gap"));
        assert_eq!(text.lines().count(), 5); // header + 4 periods
    }
}
