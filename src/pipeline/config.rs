//! Declarative analysis configuration.

use crate::data::ColumnSpec;
use crate::error::{AnalysisError, Result};
use crate::filter::{Condition, FilterConfig};
use crate::model::GlmmSpec;
use crate::plot::FigureSpec;
use crate::recode::RecodeStep;
use crate::test::PostHocSpec;
use serde::{Deserialize, Serialize};
use std::path::Path;

fn default_delimiter() -> char {
    ';'
}

fn default_true() -> bool {
    true
}

/// A mixed model fitted on (a subset of) the filtered trials.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelStep {
    /// Name used in the report and by figure annotations.
    pub name: String,
    /// Trial subset the model is fitted on.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subset: Vec<Condition>,
    #[serde(flatten)]
    pub spec: GlmmSpec,
    /// Report the omnibus table.
    #[serde(default = "default_true")]
    pub anova: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub post_hoc: Vec<PostHocSpec>,
}

impl ModelStep {
    pub fn new(name: &str, spec: GlmmSpec) -> Self {
        Self {
            name: name.to_string(),
            subset: Vec::new(),
            spec,
            anova: true,
            post_hoc: Vec::new(),
        }
    }

    /// Builder: restrict to trials where `column == equals`.
    pub fn subset(mut self, column: &str, equals: &str) -> Self {
        self.subset.push(Condition::new(column, equals));
        self
    }

    /// Builder: add a post-hoc analysis.
    pub fn post_hoc(mut self, spec: PostHocSpec) -> Self {
        self.post_hoc.push(spec);
        self
    }
}

/// One analysis: load, recode, filter, then models and figures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Name of the analysis.
    pub name: String,
    /// Description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Input file.
    pub input: String,
    /// Field delimiter.
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
    /// Columns to load, with their kinds.
    pub columns: Vec<ColumnSpec>,
    /// Recoding steps, in order.
    #[serde(default)]
    pub recode: Vec<RecodeStep>,
    #[serde(default)]
    pub filter: FilterConfig,
    #[serde(default)]
    pub models: Vec<ModelStep>,
    #[serde(default)]
    pub figures: Vec<FigureSpec>,
}

impl AnalysisConfig {
    /// Load from YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Save to YAML string.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(AnalysisError::from)
    }

    /// Load from a YAML file.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml(&yaml)
    }

    /// Delimiter as a byte.
    pub fn delimiter_byte(&self) -> Result<u8> {
        if !self.delimiter.is_ascii() {
            return Err(AnalysisError::InvalidParameter(format!(
                "Delimiter {:?} is not an ASCII character",
                self.delimiter
            )));
        }
        Ok(self.delimiter as u8)
    }

    pub fn model(&self, name: &str) -> Option<&ModelStep> {
        self.models.iter().find(|m| m.name == name)
    }

    /// Structural checks that do not need data.
    pub fn validate(&self) -> Result<()> {
        self.delimiter_byte()?;
        if self.columns.is_empty() {
            return Err(AnalysisError::InvalidParameter(
                "Configuration declares no columns".to_string(),
            ));
        }
        for (i, model) in self.models.iter().enumerate() {
            if self.models[..i].iter().any(|m| m.name == model.name) {
                return Err(AnalysisError::InvalidParameter(format!(
                    "Duplicate model name '{}'",
                    model.name
                )));
            }
        }
        for figure in &self.figures {
            figure.validate()?;
            for a in &figure.annotations {
                if let Some(source) = &a.from_model {
                    let model = self.model(&source.model).ok_or_else(|| {
                        AnalysisError::InvalidParameter(format!(
                            "Figure '{}' refers to unknown model '{}'",
                            figure.file, source.model
                        ))
                    })?;
                    if model.post_hoc.is_empty() {
                        return Err(AnalysisError::InvalidParameter(format!(
                            "Figure '{}': model '{}' has no post-hoc analysis",
                            figure.file, source.model
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}
