//! End-to-end pipeline tests: CSV input through estimation to exported
//! tables, over generated panels with known effects.

use std::fmt::Write as _;
use std::fs;

use polars::prelude::*;

use embargo_panelkit::event_study;
use embargo_panelkit::export;
use embargo_panelkit::sample;
use embargo_panelkit::schema::{derived, obs};
use embargo_panelkit::synth;
use embargo_panelkit::{
    DonorSeries, EventStudySpec, EventWindow, PanelError, RunConfig, RunSpec, SynthInput,
    WeightScheme,
};

/// Deterministic noise in [-0.5, 0.5) from a unit/period pair.
fn noise(u: i64, p: i64) -> f64 {
    (((u * 2654435761 + p * 40503) % 1000) as f64) / 1000.0 - 0.5
}

/// Write a panel CSV: half the units treated, effect applied to treated
/// units from `onset` on, unit and period levels plus scaled noise.
fn write_panel_csv(
    path: &std::path::Path,
    n_units: i64,
    periods: std::ops::RangeInclusive<i64>,
    onset: i64,
    effect: f64,
    noise_scale: f64,
) {
    let mut text = String::from("unit_id,time_period,outcome,treatment_group,cluster_id\n");
    for u in 0..n_units {
        let treated = u % 2 == 0;
        for p in periods.clone() {
            let hit = if treated && p >= onset { effect } else { 0.0 };
            let y = u as f64 * 0.02 + (p - periods.start()) as f64 * 0.1
                + hit
                + noise_scale * noise(u, p);
            writeln!(
                text,
                "{u},{p},{y},{},region{}",
                if treated { 1 } else { 0 },
                u % 10
            )
            .unwrap();
        }
    }
    fs::write(path, text).unwrap();
}

#[test]
fn two_period_did_recovers_unit_effect_exactly() {
    // unit 1..100, periods 0/1, outcome = treated x period, zero noise.
    let dir = tempfile::tempdir().unwrap();
    let config = RunConfig::new(dir.path(), dir.path().join("out"));
    write_panel_csv(&config.input_file("panel.csv"), 100, 0..=1, 1, 1.0, 0.0);

    let df = sample::load_observations(&config, "panel.csv").unwrap();
    sample::check_unique_unit_period(&df).unwrap();
    assert_eq!(df.height(), 200);

    let row = event_study::run_did(&df, 1, &RunSpec::new("scenario_a", derived::TREATED_POST))
        .unwrap();
    assert!((row.estimate.coefficient - 1.0).abs() < 1e-8);
    assert_eq!(row.n_obs, 200);
}

#[test]
fn event_study_pipeline_exports_all_tables() {
    let dir = tempfile::tempdir().unwrap();
    let config = RunConfig::new(dir.path(), dir.path().join("out"));
    write_panel_csv(&config.input_file("panel.csv"), 80, 2010..=2017, 2014, 0.2, 0.05);

    let df = sample::load_observations(&config, "panel.csv").unwrap();

    // Event study.
    let window = EventWindow::with_reference_minus_one(-4, 3).unwrap();
    let spec = EventStudySpec::new("embargo", 2014, window);
    let result = event_study::run(&df, &spec).unwrap();

    let pre = result.pre_period_mean().unwrap();
    let post = result.post_period_mean().unwrap();
    assert!(pre.coefficient.abs() < 0.05);
    assert!((post.coefficient - 0.2).abs() < 0.05);

    let wald = result.pre_trend_test().unwrap();
    assert_eq!(wald.df, 3); // -4, -3, -2 (reference -1 omitted)
    assert!(wald.statistic >= 0.0);
    assert!((0.0..=1.0).contains(&wald.p_value));

    let mut table = export::event_study_table(&result).unwrap();
    // CI columns follow coef ± 1.96 SE.
    let coef = table.column("coefficient").unwrap().f64().unwrap();
    let se = table.column("standard_error").unwrap().f64().unwrap();
    let lo = table.column("ci_lo").unwrap().f64().unwrap();
    for i in 0..table.height() {
        let expected = coef.get(i).unwrap() - 1.96 * se.get(i).unwrap();
        assert!((lo.get(i).unwrap() - expected).abs() < 1e-12);
    }
    export::write_csv(&mut table, &config, "event_study.csv").unwrap();

    // DiD batch: baseline plus a deliberately broken sibling.
    let baseline = RunSpec::new("baseline", derived::TREATED_POST);
    let mut broken = RunSpec::new("broken", derived::TREATED_POST);
    broken.cluster = "missing_column".to_string();
    let batch = event_study::run_batch(&df, 2014, &[baseline, broken]);
    assert_eq!(batch.rows.len(), 1);
    assert_eq!(batch.failures.len(), 1);
    let mut did = export::did_summary_table(&batch.rows).unwrap();
    export::write_csv(&mut did, &config, "did_summary.csv").unwrap();

    // Synthetic control over region-level mean outcomes.
    let input = regional_series(&df, 2014);
    let sc = synth::construct(&input, WeightScheme::MeanMatched).unwrap();
    let mut sc_table = export::synth_table(&sc).unwrap();
    export::write_csv(&mut sc_table, &config, "synthetic_control.csv").unwrap();

    let placebo = synth::placebo_distribution(&input, WeightScheme::MeanMatched, "region0")
        .unwrap();
    let k = placebo.placebos.len() as f64;
    assert!(placebo.p_value >= 1.0 / (k + 1.0) - 1e-12);
    assert!(placebo.p_value <= 1.0);
    let mut placebo_csv = export::placebo_table(&placebo).unwrap();
    export::write_csv(&mut placebo_csv, &config, "placebo.csv").unwrap();

    for file in [
        "event_study.csv",
        "did_summary.csv",
        "synthetic_control.csv",
        "placebo.csv",
    ] {
        assert!(config.output_dir.join(file).exists(), "{file} missing");
    }
}

/// Collapse the panel to per-cluster mean outcomes: region0 becomes the
/// treated series, every other region a donor.
fn regional_series(df: &DataFrame, onset: i64) -> SynthInput {
    let collapsed = df
        .clone()
        .lazy()
        .group_by([col(obs::CLUSTER_ID), col(obs::TIME_PERIOD)])
        .agg([col(obs::OUTCOME).mean().alias("mean_outcome")])
        .sort(
            [obs::CLUSTER_ID, obs::TIME_PERIOD],
            Default::default(),
        )
        .collect()
        .unwrap();

    let regions = collapsed.column(obs::CLUSTER_ID).unwrap().str().unwrap();
    let periods_col = collapsed.column(obs::TIME_PERIOD).unwrap().i64().unwrap();
    let means = collapsed.column("mean_outcome").unwrap().f64().unwrap();

    let mut by_region: std::collections::BTreeMap<String, Vec<(i64, f64)>> = Default::default();
    for i in 0..collapsed.height() {
        by_region
            .entry(regions.get(i).unwrap().to_string())
            .or_default()
            .push((periods_col.get(i).unwrap(), means.get(i).unwrap()));
    }

    let mut periods: Vec<i64> = by_region
        .values()
        .next()
        .unwrap()
        .iter()
        .map(|(p, _)| *p)
        .collect();
    periods.sort();

    let treated = by_region
        .remove("region0")
        .unwrap()
        .into_iter()
        .map(|(_, v)| v)
        .collect();
    let donors = by_region
        .into_iter()
        .map(|(label, series)| {
            DonorSeries::new(label, series.into_iter().map(|(_, v)| v).collect())
        })
        .collect();

    SynthInput {
        periods,
        treated,
        donors,
        treatment_period: onset,
    }
}

#[test]
fn single_cluster_specification_is_fatal_but_isolated() {
    let dir = tempfile::tempdir().unwrap();
    let config = RunConfig::new(dir.path(), dir.path().join("out"));
    write_panel_csv(&config.input_file("panel.csv"), 40, 2012..=2015, 2014, 0.1, 0.0);
    let mut df = sample::load_observations(&config, "panel.csv").unwrap();
    let n = df.height();
    df.with_column(Column::new(obs::CLUSTER_ID.into(), vec!["all"; n]))
        .unwrap();

    // Direct call: typed inference error.
    let spec = RunSpec::new("degenerate", derived::TREATED_POST);
    match event_study::run_did(&df, 2014, &spec) {
        Err(PanelError::Inference(_)) => {}
        other => panic!("expected InferenceError, got {other:?}"),
    }

    // In a batch the sibling still completes.
    let mut good_df = sample::load_observations(&config, "panel.csv").unwrap();
    let clusters: Vec<String> = (0..n).map(|i| format!("r{}", i % 5)).collect();
    good_df
        .with_column(Column::new(obs::CLUSTER_ID.into(), clusters))
        .unwrap();
    let outcome = event_study::run_batch(
        &good_df,
        2014,
        &[RunSpec::new("ok", derived::TREATED_POST)],
    );
    assert_eq!(outcome.rows.len(), 1);
    assert!(outcome.failures.is_empty());
}

#[test]
fn split_year_periods_feed_event_time_construction() {
    // Raw survey extract with interview months straddling an August
    // embargo start.
    let dir = tempfile::tempdir().unwrap();
    let mut text = String::from("unit_id,year,interview_month,age,employed,wage,sector,cluster_id\n");
    for u in 0..30i64 {
        for (year, month) in [(2013i64, 3i64), (2013, 10), (2014, 3), (2014, 10)] {
            let sector = if u % 3 == 0 { "agriculture" } else { "services" };
            writeln!(
                text,
                "{u},{year},{month},{},1,{},{sector},region{}",
                25 + u % 40,
                20000 + u * 100 + year * 7 + month * 11,
                u % 6
            )
            .unwrap();
        }
    }
    let path = dir.path().join("survey.csv");
    fs::write(&path, text).unwrap();

    let raw = sample::read_csv_as_strings(&path).unwrap();
    let raw = sample::parse_int(raw, "year").unwrap();
    let raw = sample::parse_int(raw, "interview_month").unwrap();
    let raw = sample::parse_float(raw, "age").unwrap();
    let raw = sample::parse_int(raw, "employed").unwrap();
    let raw = sample::parse_float(raw, "wage").unwrap();

    let filter = sample::EligibilityFilter {
        min_age: Some(18.0),
        max_age: Some(65.0),
        employed_only: true,
        min_year: None,
        max_year: None,
    };
    let df = filter.apply(&raw).unwrap();
    let df = sample::derive_log_wage(df).unwrap();
    let df = sample::derive_treatment_from_sector(df, "sector", "agriculture").unwrap();
    let df = sample::derive_period_split_year(df, 8).unwrap();

    // Onset is the second half of 2014.
    let onset = 2 * 2014 + 1;
    let df = embargo_panelkit::event_time::derive_event_time(df, onset).unwrap();
    let ev = df.column(derived::EVENT_TIME).unwrap().i64().unwrap();
    let periods = df.column(obs::TIME_PERIOD).unwrap().i64().unwrap();
    for i in 0..df.height() {
        assert_eq!(ev.get(i).unwrap(), periods.get(i).unwrap() - onset);
    }
    // March 2014 sits one half-year before onset.
    let idx = (0..df.height())
        .find(|&i| periods.get(i).unwrap() == 2 * 2014)
        .unwrap();
    assert_eq!(ev.get(idx), Some(-1));

    // Attrition spans cover the full split-year range for every unit.
    let spans = sample::attrition_spans(&df).unwrap();
    let first = spans.column(derived::FIRST_PERIOD).unwrap().i64().unwrap();
    let last = spans.column(derived::LAST_PERIOD).unwrap().i64().unwrap();
    for i in 0..spans.height() {
        assert_eq!(first.get(i), Some(2 * 2013));
        assert_eq!(last.get(i), Some(2 * 2014 + 1));
    }
}
