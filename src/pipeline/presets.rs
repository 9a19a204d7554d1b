//! Built-in analyses of the awareness × attention experiment.

use super::config::{AnalysisConfig, ModelStep};
use crate::data::{Coding, ColumnSpec, FactorSpec};
use crate::error::{AnalysisError, Result};
use crate::filter::{Condition, FilterConfig};
use crate::model::{Family, GlmmSpec};
use crate::plot::{Annotation, Estimator, FigureSpec, ModelContrast, Palette};
use crate::recode::RecodeStep;
use crate::test::PostHocSpec;
use std::collections::BTreeMap;

/// Names accepted by [`preset`].
pub const PRESETS: &[&str] = &["acc", "rt"];

/// Get a preset by name.
pub fn preset(name: &str) -> Result<AnalysisConfig> {
    match name {
        "acc" => Ok(acc()),
        "rt" => Ok(rt()),
        other => Err(AnalysisError::InvalidParameter(format!(
            "Unknown preset '{}' (expected one of {:?})",
            other, PRESETS
        ))),
    }
}

fn mapping(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn awareness_lookup(source: &str) -> RecodeStep {
    RecodeStep::Lookup {
        source: source.to_string(),
        target: "Awareness".to_string(),
        mapping: mapping(&[("1", "Seen"), ("0", "Unseen")]),
    }
}

fn region_names() -> RecodeStep {
    RecodeStep::Replace {
        column: "Region".to_string(),
        mapping: mapping(&[("F", "FEF"), ("V", "Vertex")]),
    }
}

fn factors() -> Vec<FactorSpec> {
    vec![
        FactorSpec::new("Awareness", &["Seen", "Unseen"]),
        FactorSpec::new("Attention", &["Attended", "Unattended"]),
        FactorSpec::new("Region", &["FEF", "Vertex"]),
        FactorSpec::new("Task", &["Alerting", "Orienting"]),
    ]
}

fn model(name: &str, formula: &str, family: Family) -> ModelStep {
    ModelStep::new(
        name,
        GlmmSpec::new(formula, family)
            .with_factors(factors())
            .with_coding(Coding::Polynomial),
    )
}

fn from_model(first: &str, second: &str, model: &str, cells: (&str, &str)) -> Annotation {
    Annotation {
        pair: [first.to_string(), second.to_string()],
        panel: None,
        label: None,
        from_model: Some(ModelContrast {
            model: model.to_string(),
            first: cells.0.to_string(),
            second: cells.1.to_string(),
        }),
    }
}

/// Accuracy and detection analysis of `raw_data_all.csv`.
///
/// The 0/1 `Awareness` code is copied to `Seen` (the detection outcome)
/// and `Awareness` is relabelled `Seen`/`Unseen`.
pub fn acc() -> AnalysisConfig {
    AnalysisConfig {
        name: "acc".to_string(),
        description: Some("Accuracy and detection mixed models".to_string()),
        input: "raw_data_all.csv".to_string(),
        delimiter: ';',
        columns: vec![
            ColumnSpec::text("Subject"),
            ColumnSpec::text("Awareness"),
            ColumnSpec::text("Attention"),
            ColumnSpec::text("Region"),
            ColumnSpec::text("Task"),
            ColumnSpec::number("Target.ACC"),
            ColumnSpec::text("TargetPresence"),
        ],
        recode: vec![
            RecodeStep::Copy {
                source: "Awareness".to_string(),
                target: "Seen".to_string(),
            },
            awareness_lookup("Seen"),
            region_names(),
            RecodeStep::ToNumeric {
                column: "Seen".to_string(),
            },
        ],
        filter: FilterConfig::default(),
        models: vec![
            model(
                "accuracy",
                "Target.ACC ~ Awareness*Attention*Region*Task + (1|Subject)",
                Family::Binomial,
            )
            .post_hoc(PostHocSpec::new(&["Region"])),
            model(
                "detection",
                "Seen ~ Attention*Region*Task + (1|Subject)",
                Family::Binomial,
            )
            .post_hoc(PostHocSpec::new(&["Task"]))
            .post_hoc(PostHocSpec::new(&["Attention"])),
        ],
        figures: vec![
            FigureSpec::new(
                "ACC_Region.png",
                &["Region", "Task", "Subject"],
                "Target.ACC",
                "Region",
                "Accuracy",
            )
            .with_estimator(Estimator::Median)
            .annotate(from_model("FEF", "Vertex", "accuracy", ("FEF", "Vertex"))),
            FigureSpec::new(
                "Seen_Region.png",
                &["Region", "Task", "Attention", "Subject"],
                "Seen",
                "Region",
                "Proportion Seen",
            )
            .with_estimator(Estimator::Median)
            .annotate(Annotation::literal("FEF", "Vertex", "*")),
        ],
    }
}

/// Reaction-time analysis of `rt_filtered.csv`.
pub fn rt() -> AnalysisConfig {
    let y_label = "Reaction times (ms)";
    let seen = vec![Condition::new("Awareness", "Seen")];

    AnalysisConfig {
        name: "rt".to_string(),
        description: Some("Reaction-time mixed models".to_string()),
        input: "rt_filtered.csv".to_string(),
        delimiter: ';',
        columns: vec![
            ColumnSpec::text("Subject"),
            ColumnSpec::text("Seen"),
            ColumnSpec::text("Attention"),
            ColumnSpec::text("Region"),
            ColumnSpec::text("Task"),
            ColumnSpec::number("Target.RT"),
            ColumnSpec::text("TargetPresence"),
        ],
        recode: vec![awareness_lookup("Seen"), region_names()],
        filter: FilterConfig::default(),
        models: vec![
            model(
                "rt_all",
                "Target.RT ~ Awareness*Attention*Region*Task + (1|Subject)",
                Family::InverseGaussian,
            )
            .post_hoc(PostHocSpec::new(&["Task"]))
            .post_hoc(PostHocSpec::new(&["Attention"])),
            model(
                "rt_seen",
                "Target.RT ~ Attention*Region*Task + (1|Subject)",
                Family::InverseGaussian,
            )
            .subset("Awareness", "Seen")
            .post_hoc(PostHocSpec::new(&["Attention", "Region"]))
            .post_hoc(PostHocSpec::new(&["Task", "Region"])),
            model(
                "rt_unseen",
                "Target.RT ~ Attention*Region*Task + (1|Subject)",
                Family::InverseGaussian,
            )
            .subset("Awareness", "Unseen"),
            model(
                "rt_alerting",
                "Target.RT ~ Attention*Region + (1|Subject)",
                Family::InverseGaussian,
            )
            .subset("Task", "Alerting"),
            model(
                "rt_orienting",
                "Target.RT ~ Attention*Region + (1|Subject)",
                Family::InverseGaussian,
            )
            .subset("Task", "Orienting"),
        ],
        figures: vec![
            FigureSpec {
                print_table: true,
                ..FigureSpec::new(
                    "RT_Region.png",
                    &["Region", "Task", "Subject"],
                    "Target.RT",
                    "Region",
                    y_label,
                )
                .annotate(Annotation::literal("FEF", "Vertex", "*"))
            },
            FigureSpec {
                print_table: true,
                ..FigureSpec::new(
                    "RT_TaskxRegion.png",
                    &["Region", "Task", "Subject"],
                    "Target.RT",
                    "Region",
                    y_label,
                )
                .with_panels("Task", &["Alerting", "Orienting"])
                .annotate(Annotation::literal("FEF", "Vertex", "*"))
            },
            FigureSpec::new(
                "RT_AttentionxRegion.png",
                &["Region", "Attention", "Subject"],
                "Target.RT",
                "Attention",
                y_label,
            )
            .with_panels("Region", &["FEF", "Vertex"])
            .with_palette(Palette::Set3)
            .annotate(Annotation::literal("Attended", "Unattended", "*")),
            FigureSpec::new(
                "RT_AttentionxRegion_aware.png",
                &["Region", "Attention", "Subject"],
                "Target.RT",
                "Attention",
                y_label,
            )
            .with_subset(seen.clone())
            .with_panels("Region", &["FEF", "Vertex"])
            .with_palette(Palette::Set3)
            .annotate(
                from_model("Attended", "Unattended", "rt_seen", ("Attended FEF", "Unattended FEF"))
                    .on_panel("FEF"),
            )
            .annotate(
                from_model(
                    "Attended",
                    "Unattended",
                    "rt_seen",
                    ("Attended Vertex", "Unattended Vertex"),
                )
                .on_panel("Vertex"),
            ),
            FigureSpec {
                print_table: true,
                ..FigureSpec::new(
                    "RT_TaskxRegion_aware.png",
                    &["Region", "Task", "Subject"],
                    "Target.RT",
                    "Region",
                    y_label,
                )
                .with_subset(seen)
                .with_panels("Task", &["Alerting", "Orienting"])
                .annotate(
                    from_model("FEF", "Vertex", "rt_seen", ("Alerting FEF", "Alerting Vertex"))
                        .on_panel("Alerting"),
                )
            },
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_validate() {
        for name in PRESETS {
            let config = preset(name).unwrap();
            config.validate().unwrap();
        }
        assert!(preset("detection").is_err());
    }

    #[test]
    fn test_presets_round_trip() {
        for name in PRESETS {
            let config = preset(name).unwrap();
            let parsed = AnalysisConfig::from_yaml(&config.to_yaml().unwrap()).unwrap();
            assert_eq!(parsed, config);
        }
    }

    #[test]
    fn test_acc_outputs() {
        let config = acc();
        let files: Vec<&str> = config.figures.iter().map(|f| f.file.as_str()).collect();
        assert_eq!(files, vec!["ACC_Region.png", "Seen_Region.png"]);
        assert_eq!(config.models.len(), 2);
        assert!(config.models.iter().all(|m| m.spec.coding == Coding::Polynomial));
    }

    #[test]
    fn test_rt_models_and_subsets() {
        let config = rt();
        let names: Vec<&str> = config.models.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["rt_all", "rt_seen", "rt_unseen", "rt_alerting", "rt_orienting"]
        );
        assert_eq!(config.model("rt_unseen").unwrap().subset[0].equals, "Unseen");
        assert!(config
            .models
            .iter()
            .all(|m| m.spec.family == Family::InverseGaussian));
        assert_eq!(config.figures.len(), 5);
    }
}
