/// Column-name constants for the embargo-panelkit schema.
/// Single source of truth - input and output tables share these names.

// ── Observation columns ─────────────────────────────────────────────────────
pub mod obs {
    pub const UNIT_ID: &str = "unit_id";
    pub const TIME_PERIOD: &str = "time_period";
    pub const OUTCOME: &str = "outcome";
    pub const TREATMENT_GROUP: &str = "treatment_group";
    pub const CLUSTER_ID: &str = "cluster_id";

    pub const REQUIRED: [&str; 5] = [
        UNIT_ID,
        TIME_PERIOD,
        OUTCOME,
        TREATMENT_GROUP,
        CLUSTER_ID,
    ];
}

// ── Raw survey columns consumed by the sample builder ───────────────────────
pub mod raw {
    pub const YEAR: &str = "year";
    pub const INTERVIEW_MONTH: &str = "interview_month";
    pub const AGE: &str = "age";
    pub const EMPLOYED: &str = "employed";
    pub const WAGE: &str = "wage";
}

// ── Derived columns ─────────────────────────────────────────────────────────
pub mod derived {
    pub const EVENT_TIME: &str = "event_time";
    pub const POST: &str = "post";
    pub const TREATED_POST: &str = "treated_post";
    pub const AGE_SQ: &str = "age_sq";
    pub const FIRST_PERIOD: &str = "first_period";
    pub const LAST_PERIOD: &str = "last_period";
}

// ── Event-study result table ────────────────────────────────────────────────
pub mod event_study {
    pub const EVENT_TIME: &str = "event_time";
    pub const COEFFICIENT: &str = "coefficient";
    pub const STANDARD_ERROR: &str = "standard_error";
    pub const CI_LO: &str = "ci_lo";
    pub const CI_HI: &str = "ci_hi";
}

// ── DiD summary table ───────────────────────────────────────────────────────
pub mod did_summary {
    pub const SPECIFICATION_LABEL: &str = "specification_label";
    pub const COEFFICIENT: &str = "coefficient";
    pub const STANDARD_ERROR: &str = "standard_error";
    pub const N_OBS: &str = "n_obs";
    pub const R_SQUARED: &str = "r_squared";
}

// ── Synthetic-control table ─────────────────────────────────────────────────
pub mod synth {
    pub const TIME_PERIOD: &str = "time_period";
    pub const ACTUAL: &str = "actual";
    pub const SYNTHETIC: &str = "synthetic";
    pub const GAP: &str = "gap";
}

// ── Placebo table ───────────────────────────────────────────────────────────
pub mod placebo {
    pub const UNIT_LABEL: &str = "unit_label";
    pub const PRE_RMSPE: &str = "pre_rmspe";
    pub const POST_RMSPE: &str = "post_rmspe";
    pub const RATIO: &str = "ratio";
}
