use crate::cell_filter::{DEFAULT_MIN_AVG_READS_PER_UMI, DEFAULT_MIN_UMI_PER_CELL};
use crate::errors::LineageQcError;
use crate::inter_doublet::DEFAULT_RULE;
use crate::intra_doublet::DEFAULT_PROP;
use crate::umi::DEFAULT_MAX_UMI_DISTANCE;
use anyhow::{Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Parameters of a pipeline run, read from TOML. Every field is optional in
/// the file and falls back to its default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FilterParams {
    /// Maximum proportion of conflicting UMIs a cell may carry.
    pub prop: f64,
    /// Minimum kinship of a cell to its assigned lineage group.
    pub rule: f64,
    /// intBC prevalence cutoff used when inspecting kinships.
    pub thresh: Option<f64>,
    /// Report stage counters at info rather than debug.
    pub verbose: bool,
    /// Grouping columns for upstream prior estimation. Recorded with the
    /// metrics, not read by any stage.
    pub group_var: Vec<String>,
    /// Keep one row per (cellBC, UMI) before consensus.
    pub resolve_umis: bool,
    /// Collapse UMIs within `max_umi_distance` mismatches before consensus.
    pub correct_umis: bool,
    /// Remove cells failing `min_umi_per_cell` or `min_avg_reads_per_umi`.
    pub filter_cells: bool,
    pub max_umi_distance: u32,
    pub min_umi_per_cell: u64,
    pub min_avg_reads_per_umi: f64,
}

const DEFAULT_PARAMS: FilterParams = FilterParams {
    prop: DEFAULT_PROP,
    rule: DEFAULT_RULE,
    thresh: None,
    verbose: false,
    group_var: Vec::new(),
    resolve_umis: false,
    correct_umis: false,
    filter_cells: false,
    max_umi_distance: DEFAULT_MAX_UMI_DISTANCE,
    min_umi_per_cell: DEFAULT_MIN_UMI_PER_CELL,
    min_avg_reads_per_umi: DEFAULT_MIN_AVG_READS_PER_UMI,
};

impl Default for FilterParams {
    fn default() -> Self {
        DEFAULT_PARAMS
    }
}

macro_rules! warn_non_default {
    ($params:ident, $($field:ident),+) => {
        $(
            if DEFAULT_PARAMS.$field != $params.$field {
                warn!("using non-default {} = {:?}", stringify!($field), $params.$field);
            }
        )+
    };
}

impl FilterParams {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let params: FilterParams = toml::from_str(s)?;
        params.validate()?;
        Ok(params)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path).with_context(|| path.display().to_string())?;
        Self::from_toml_str(&s).with_context(|| path.display().to_string())
    }

    /// Check that every proportion lies within [0, 1].
    pub fn validate(&self) -> Result<(), LineageQcError> {
        LineageQcError::check_fraction("prop", self.prop)?;
        LineageQcError::check_fraction("rule", self.rule)?;
        if let Some(thresh) = self.thresh {
            LineageQcError::check_fraction("thresh", thresh)?;
        }
        if self.min_avg_reads_per_umi.is_nan() || self.min_avg_reads_per_umi < 0.0 {
            return Err(LineageQcError::InvalidParameter {
                name: "min_avg_reads_per_umi",
                value: self.min_avg_reads_per_umi,
                min: 0.0,
                max: f64::INFINITY,
            });
        }
        Ok(())
    }

    /// Warn about every parameter that differs from its default.
    pub fn report_non_default(&self) {
        let params = self;
        warn_non_default!(
            params,
            prop,
            rule,
            thresh,
            verbose,
            group_var,
            resolve_umis,
            correct_umis,
            filter_cells,
            max_umi_distance,
            min_umi_per_cell,
            min_avg_reads_per_umi
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_file_gives_defaults() {
        let params = FilterParams::from_toml_str("").unwrap();
        assert_eq!(params, FilterParams::default());
        assert_eq!(params.prop, 0.1);
        assert_eq!(params.rule, 0.35);
        assert_eq!(params.thresh, None);
        assert!(!params.correct_umis);
    }

    #[test]
    fn test_overrides() {
        let params = FilterParams::from_toml_str(
            r#"
            prop = 0.2
            thresh = 0.5
            group_var = ["sample"]
            correct_umis = true
            max_umi_distance = 1
            "#,
        )
        .unwrap();
        assert_eq!(params.prop, 0.2);
        assert_eq!(params.rule, DEFAULT_RULE);
        assert_eq!(params.thresh, Some(0.5));
        assert_eq!(params.group_var, vec!["sample".to_string()]);
        assert!(params.correct_umis);
        assert_eq!(params.max_umi_distance, 1);
        params.report_non_default();
    }

    #[test]
    fn test_rejects_unknown_and_out_of_range() {
        assert!(FilterParams::from_toml_str("proportion = 0.2").is_err());
        let err = FilterParams::from_toml_str("rule = 1.5").unwrap_err();
        assert_eq!(
            err.downcast_ref::<LineageQcError>(),
            Some(&LineageQcError::InvalidParameter {
                name: "rule",
                value: 1.5,
                min: 0.0,
                max: 1.0,
            })
        );
    }

    #[test]
    fn test_from_path() -> Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        writeln!(file, "rule = 0.5")?;
        let params = FilterParams::from_path(file.path())?;
        assert_eq!(params.rule, 0.5);
        assert!(FilterParams::from_path(Path::new("/nonexistent/params.toml")).is_err());
        Ok(())
    }
}
