//! Executes an analysis configuration end to end.

use super::config::{AnalysisConfig, ModelStep};
use super::report::{BracketReport, FigureReport, ModelReport, Report};
use crate::aggregate::aggregate_mean;
use crate::data::{AggregatedTable, TrialTable};
use crate::error::{AnalysisError, Result};
use crate::filter::{apply_filters, keep_equal, Condition, FilterSummary};
use crate::model::fit_glmm;
use crate::plot::{draw_figure, significance_label, Bracket, FigureSpec};
use crate::recode::apply_steps;
use crate::test::{anova, post_hoc};
use std::path::{Path, PathBuf};
use tracing::info;

/// Options that are not part of the analysis itself.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Input file overriding the configured one.
    pub input: Option<PathBuf>,
    /// Directory figures are written to.
    pub output_dir: PathBuf,
    /// Resolve figures without drawing them.
    pub skip_plots: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            input: None,
            output_dir: PathBuf::from("."),
            skip_plots: false,
        }
    }
}

/// Filtered trials ready for modeling.
#[derive(Debug, Clone)]
pub struct PreparedTrials {
    pub trials: TrialTable,
    pub n_loaded: usize,
    pub filters: Vec<FilterSummary>,
}

fn step<T>(name: &str, f: impl FnOnce() -> Result<T>) -> Result<T> {
    f().map_err(|e| AnalysisError::Pipeline(format!("{} failed: {}", name, e)))
}

/// Load, recode and filter the trials of an analysis.
pub fn prepare_trials(config: &AnalysisConfig, input: &Path) -> Result<PreparedTrials> {
    let delimiter = config.delimiter_byte()?;
    let mut trials = step("load", || {
        TrialTable::from_delimited(input, delimiter, &config.columns)
    })?;
    let n_loaded = trials.n_rows();
    info!("Loaded {} trials from {}", n_loaded, input.display());

    step("recode", || apply_steps(&mut trials, &config.recode))?;
    let (trials, filters) = step("filter", || apply_filters(&trials, &config.filter))?;

    Ok(PreparedTrials {
        trials,
        n_loaded,
        filters,
    })
}

/// Rows satisfying every condition. Fails if none remain.
pub fn subset_trials(trials: &TrialTable, conditions: &[Condition]) -> Result<TrialTable> {
    let mut current = trials.clone();
    for condition in conditions {
        let (kept, _) = keep_equal(&current, &condition.column, &condition.equals)?;
        current = kept;
    }
    if current.n_rows() == 0 {
        let described: Vec<String> = conditions.iter().map(|c| c.to_string()).collect();
        return Err(AnalysisError::EmptyData(format!(
            "No trials where {}",
            described.join(" and ")
        )));
    }
    Ok(current)
}

/// Fit one model step with its omnibus table and post-hoc analyses.
pub fn run_model(trials: &TrialTable, model: &ModelStep) -> Result<ModelReport> {
    let data = subset_trials(trials, &model.subset)?;
    let fit = fit_glmm(&data, &model.spec)?;
    let table = if model.anova { Some(anova(&fit)?) } else { None };
    let post_hocs = model
        .post_hoc
        .iter()
        .map(|spec| post_hoc(&fit, spec))
        .collect::<Result<Vec<_>>>()?;
    ModelReport::from_fit(
        &model.name,
        model.subset.iter().map(|c| c.to_string()).collect(),
        &fit,
        table,
        post_hocs,
    )
}

/// Resolve annotation labels, deriving stars from model contrasts.
pub fn resolve_brackets(figure: &FigureSpec, models: &[ModelReport]) -> Result<Vec<Bracket>> {
    figure
        .annotations
        .iter()
        .map(|a| {
            let label = match (&a.label, &a.from_model) {
                (Some(label), _) => label.clone(),
                (None, Some(source)) => {
                    let model = models.iter().find(|m| m.name == source.model).ok_or_else(|| {
                        AnalysisError::InvalidParameter(format!(
                            "Unknown model '{}'",
                            source.model
                        ))
                    })?;
                    let contrast = model
                        .find_contrast(&source.first, &source.second)
                        .ok_or_else(|| {
                            AnalysisError::InvalidParameter(format!(
                                "Model '{}' has no contrast {} - {}",
                                source.model, source.first, source.second
                            ))
                        })?;
                    significance_label(contrast.p_adjusted).to_string()
                }
                (None, None) => {
                    return Err(AnalysisError::InvalidParameter(format!(
                        "Annotation {} - {} has no label",
                        a.pair[0], a.pair[1]
                    )))
                }
            };
            Ok(Bracket {
                first: a.pair[0].clone(),
                second: a.pair[1].clone(),
                panel: a.panel.clone(),
                label,
            })
        })
        .collect()
}

/// Aggregate the data of a figure.
pub fn figure_data(trials: &TrialTable, figure: &FigureSpec) -> Result<AggregatedTable> {
    let data = subset_trials(trials, &figure.subset)?;
    aggregate_mean(&data, &figure.group_by, &figure.outcome)
}

fn run_figure(
    trials: &TrialTable,
    figure: &FigureSpec,
    models: &[ModelReport],
    options: &RunOptions,
) -> Result<FigureReport> {
    let table = figure_data(trials, figure)?;
    let brackets = resolve_brackets(figure, models)?;

    let written = if options.skip_plots {
        crate::plot::build_panels(&table, figure, &brackets)?;
        false
    } else {
        std::fs::create_dir_all(&options.output_dir)?;
        draw_figure(&options.output_dir.join(&figure.file), &table, figure, &brackets)?;
        true
    };

    Ok(FigureReport {
        file: figure.file.clone(),
        written,
        brackets: brackets
            .into_iter()
            .map(|b| BracketReport {
                first: b.first,
                second: b.second,
                panel: b.panel,
                label: b.label,
            })
            .collect(),
        table: figure.print_table.then_some(table),
    })
}

/// Run a complete analysis.
pub fn run(config: &AnalysisConfig, options: &RunOptions) -> Result<Report> {
    config.validate()?;
    let input = options
        .input
        .clone()
        .unwrap_or_else(|| PathBuf::from(&config.input));
    let prepared = prepare_trials(config, &input)?;
    let trials = &prepared.trials;

    let mut models = Vec::with_capacity(config.models.len());
    for model in &config.models {
        info!(model = %model.name, "running model step");
        let report = step(&format!("model '{}'", model.name), || run_model(trials, model))?;
        models.push(report);
    }

    let mut figures = Vec::with_capacity(config.figures.len());
    for figure in &config.figures {
        let report = step(&format!("figure '{}'", figure.file), || {
            run_figure(trials, figure, &models, options)
        })?;
        figures.push(report);
    }

    Ok(Report {
        name: config.name.clone(),
        input: input.display().to_string(),
        n_loaded: prepared.n_loaded,
        n_trials: trials.n_rows(),
        filters: prepared.filters,
        models,
        figures,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plot::{Annotation, ModelContrast};
    use crate::test::{Contrast, PostHoc};
    use crate::correct::PAdjust;
    use crate::model::{CoefficientTest, Family, Link};
    use std::io::Write;
    use tempfile::NamedTempFile;

    const MINIMAL: &str = r#"
name: minimal
input: trials.csv
columns:
  - { name: Subject, kind: text }
  - { name: Region, kind: text }
  - { name: Target.ACC, kind: number }
  - { name: TargetPresence, kind: text }
recode:
  - op: replace
    column: Region
    mapping: { F: FEF, V: Vertex }
"#;

    fn write_csv(rows: &[&str]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "Subject;Region;Target.ACC;TargetPresence").unwrap();
        for row in rows {
            writeln!(file, "{}", row).unwrap();
        }
        file.flush().unwrap();
        file
    }

    fn model_report(p_adjusted: f64) -> ModelReport {
        ModelReport {
            name: "accuracy".into(),
            subset: vec![],
            formula: "Target.ACC ~ Region + (1|Subject)".into(),
            family: Family::Binomial,
            link: Link::Logit,
            n_obs: 10,
            grouping: "Subject".into(),
            n_groups: 2,
            iterations: 3,
            converged: true,
            singular: false,
            tau2: 0.1,
            dispersion: 1.0,
            icc: 0.09,
            reml_criterion: 0.0,
            coefficients: Vec::<CoefficientTest>::new(),
            anova: None,
            post_hoc: vec![PostHoc {
                marginal_vars: vec!["Region".into()],
                by: vec![],
                adjust: PAdjust::Bonferroni,
                df: None,
                means: vec![],
                contrasts: vec![Contrast {
                    contrast: "FEF - Vertex".into(),
                    first: "FEF".into(),
                    second: "Vertex".into(),
                    by: vec![],
                    estimate: 1.0,
                    std_error: 0.3,
                    statistic: 3.3,
                    p_value: p_adjusted,
                    p_adjusted,
                }],
            }],
        }
    }

    #[test]
    fn test_prepare_trials() {
        let file = write_csv(&[
            "S1;F;1;Present",
            "S1;V;0;Present",
            "S2;F;;Present",
            "S2;V;1;Absent",
        ]);
        let config = AnalysisConfig::from_yaml(MINIMAL).unwrap();
        let prepared = prepare_trials(&config, file.path()).unwrap();

        assert_eq!(prepared.n_loaded, 4);
        assert_eq!(prepared.trials.n_rows(), 2);
        assert_eq!(prepared.filters.len(), 2);
        assert_eq!(prepared.filters[0].n_after, 3);
        assert_eq!(prepared.trials.text_column("Region").unwrap(), vec!["FEF", "Vertex"]);
    }

    #[test]
    fn test_load_error_names_step() {
        let config = AnalysisConfig::from_yaml(MINIMAL).unwrap();
        let err = prepare_trials(&config, Path::new("/nonexistent/trials.csv")).unwrap_err();
        assert!(err.to_string().contains("load failed"));
    }

    #[test]
    fn test_subset_trials() {
        let file = write_csv(&["S1;F;1;Present", "S1;V;0;Present", "S2;F;1;Present"]);
        let config = AnalysisConfig::from_yaml(MINIMAL).unwrap();
        let trials = prepare_trials(&config, file.path()).unwrap().trials;

        let fef = subset_trials(&trials, &[Condition::new("Region", "FEF")]).unwrap();
        assert_eq!(fef.n_rows(), 2);
        assert!(subset_trials(&trials, &[Condition::new("Region", "PPC")]).is_err());
        assert_eq!(subset_trials(&trials, &[]).unwrap().n_rows(), 3);
    }

    #[test]
    fn test_resolve_brackets() {
        let figure = FigureSpec::new("ACC_Region.png", &["Region", "Subject"], "Target.ACC", "Region", "Accuracy")
            .annotate(Annotation::literal("FEF", "Vertex", "*"))
            .annotate(Annotation {
                pair: ["FEF".into(), "Vertex".into()],
                panel: None,
                label: None,
                from_model: Some(ModelContrast {
                    model: "accuracy".into(),
                    first: "Vertex".into(),
                    second: "FEF".into(),
                }),
            });

        let brackets = resolve_brackets(&figure, &[model_report(0.003)]).unwrap();
        assert_eq!(brackets[0].label, "*");
        assert_eq!(brackets[1].label, "**");

        let brackets = resolve_brackets(&figure, &[model_report(0.2)]).unwrap();
        assert_eq!(brackets[1].label, "ns");

        assert!(resolve_brackets(&figure, &[]).is_err());
    }

    #[test]
    fn test_run_without_models() {
        let file = write_csv(&[
            "S1;F;1;Present",
            "S1;V;0;Present",
            "S2;F;0;Present",
            "S2;V;1;Present",
        ]);
        let mut config = AnalysisConfig::from_yaml(MINIMAL).unwrap();
        config.figures.push(FigureSpec {
            print_table: true,
            ..FigureSpec::new("ACC_Region.png", &["Region", "Subject"], "Target.ACC", "Region", "Accuracy")
                .annotate(Annotation::literal("FEF", "Vertex", "*"))
        });
        let options = RunOptions {
            input: Some(file.path().to_path_buf()),
            skip_plots: true,
            ..Default::default()
        };

        let report = run(&config, &options).unwrap();
        assert_eq!(report.n_trials, 4);
        let figure = &report.figures[0];
        assert!(!figure.written);
        assert_eq!(figure.table.as_ref().unwrap().n_rows(), 4);
        assert_eq!(figure.brackets[0].label, "*");
    }

    #[test]
    fn test_unknown_annotation_category() {
        let file = write_csv(&["S1;F;1;Present", "S1;V;0;Present"]);
        let mut config = AnalysisConfig::from_yaml(MINIMAL).unwrap();
        config.figures.push(
            FigureSpec::new("RT.png", &["Region", "Subject"], "Target.ACC", "Region", "Accuracy")
                .annotate(Annotation::literal("Alerting", "Orienting", "*")),
        );
        let options = RunOptions {
            input: Some(file.path().to_path_buf()),
            skip_plots: true,
            ..Default::default()
        };
        let err = run(&config, &options).unwrap_err();
        assert!(matches!(err, AnalysisError::Pipeline(_)));
        assert!(err.to_string().contains("RT.png"));
    }
}
