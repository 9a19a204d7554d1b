//! Box, strip and point figures of aggregated data.
//!
//! A figure has one panel, or one panel per level of a panel column. Each
//! panel places the categories of the x column side by side and draws, per
//! category, the quartile box, the jittered per-group values and the
//! estimator point; points are joined by a dashed line. Brackets mark pairs
//! of categories with a significance label.

pub mod geometry;
mod render;

pub use geometry::{jitter_offsets, significance_label, y_range, BoxStats};
pub use render::draw_figure;

use crate::data::AggregatedTable;
use crate::error::{AnalysisError, Result};
use crate::filter::Condition;
use serde::{Deserialize, Serialize};

/// Summary drawn as the point of each category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Estimator {
    #[default]
    Mean,
    Median,
}

impl Estimator {
    /// Apply to finite values; NaN when none.
    pub fn estimate(&self, values: &[f64]) -> f64 {
        let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
        if finite.is_empty() {
            return f64::NAN;
        }
        match self {
            Estimator::Mean => finite.iter().sum::<f64>() / finite.len() as f64,
            Estimator::Median => BoxStats::from_values(&finite).map_or(f64::NAN, |b| b.median),
        }
    }
}

/// Category fill colors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Palette {
    #[default]
    Deep,
    Set3,
}

impl Palette {
    /// RGB colors, cycled over categories.
    pub fn colors(&self) -> &'static [(u8, u8, u8)] {
        match self {
            Palette::Deep => &[
                (76, 114, 176),
                (221, 132, 82),
                (85, 168, 104),
                (196, 78, 82),
                (129, 114, 179),
                (147, 120, 96),
                (218, 139, 195),
                (140, 140, 140),
                (204, 185, 116),
                (100, 181, 205),
            ],
            Palette::Set3 => &[
                (141, 211, 199),
                (255, 255, 179),
                (190, 186, 218),
                (251, 128, 114),
                (128, 177, 211),
                (253, 180, 98),
                (179, 222, 105),
                (252, 205, 229),
                (217, 217, 217),
                (188, 128, 189),
                (204, 235, 197),
                (255, 237, 111),
            ],
        }
    }

    pub fn color(&self, index: usize) -> (u8, u8, u8) {
        let colors = self.colors();
        colors[index % colors.len()]
    }
}

/// Split a figure into side-by-side panels by a grouping column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PanelSpec {
    pub column: String,
    /// Panel order; also the panel titles.
    pub levels: Vec<String>,
}

/// Contrast of a fitted model used to label a bracket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelContrast {
    /// Name of the model step.
    pub model: String,
    /// Cell labels of the contrast, in either order.
    pub first: String,
    pub second: String,
}

/// A significance bracket between two categories.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    pub pair: [String; 2],
    /// Panel to annotate; every panel when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub panel: Option<String>,
    /// Literal label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Derive the label from a post-hoc contrast.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_model: Option<ModelContrast>,
}

impl Annotation {
    pub fn literal(first: &str, second: &str, label: &str) -> Self {
        Self {
            pair: [first.to_string(), second.to_string()],
            panel: None,
            label: Some(label.to_string()),
            from_model: None,
        }
    }

    /// Builder: restrict to one panel.
    pub fn on_panel(mut self, panel: &str) -> Self {
        self.panel = Some(panel.to_string());
        self
    }
}

/// An annotation with its label resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bracket {
    pub first: String,
    pub second: String,
    pub panel: Option<String>,
    pub label: String,
}

fn default_seed() -> u64 {
    42
}

fn default_width() -> u32 {
    800
}

fn default_height() -> u32 {
    600
}

/// One output figure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FigureSpec {
    /// Output file name, relative to the output directory.
    pub file: String,
    /// Trial subset plotted (applied before aggregation).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subset: Vec<Condition>,
    /// Aggregation keys; must include `x` and the panel column.
    pub group_by: Vec<String>,
    /// Trial-level outcome that is averaged.
    pub outcome: String,
    /// Category axis.
    pub x: String,
    pub y_label: String,
    #[serde(default)]
    pub estimator: Estimator,
    #[serde(default)]
    pub palette: Palette,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub panel: Option<PanelSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub annotations: Vec<Annotation>,
    /// Print the aggregated table in the report.
    #[serde(default)]
    pub print_table: bool,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
}

impl FigureSpec {
    pub fn new(file: &str, group_by: &[&str], outcome: &str, x: &str, y_label: &str) -> Self {
        Self {
            file: file.to_string(),
            subset: Vec::new(),
            group_by: group_by.iter().map(|c| c.to_string()).collect(),
            outcome: outcome.to_string(),
            x: x.to_string(),
            y_label: y_label.to_string(),
            estimator: Estimator::default(),
            palette: Palette::default(),
            panel: None,
            annotations: Vec::new(),
            print_table: false,
            seed: default_seed(),
            width: default_width(),
            height: default_height(),
        }
    }

    /// Builder: set the estimator.
    pub fn with_estimator(mut self, estimator: Estimator) -> Self {
        self.estimator = estimator;
        self
    }

    /// Builder: set the palette.
    pub fn with_palette(mut self, palette: Palette) -> Self {
        self.palette = palette;
        self
    }

    /// Builder: split into panels.
    pub fn with_panels(mut self, column: &str, levels: &[&str]) -> Self {
        self.panel = Some(PanelSpec {
            column: column.to_string(),
            levels: levels.iter().map(|l| l.to_string()).collect(),
        });
        self.width = 1200;
        self
    }

    /// Builder: restrict to a trial subset.
    pub fn with_subset(mut self, subset: Vec<Condition>) -> Self {
        self.subset = subset;
        self
    }

    /// Builder: add an annotation.
    pub fn annotate(mut self, annotation: Annotation) -> Self {
        self.annotations.push(annotation);
        self
    }

    /// Check that the x and panel columns are aggregation keys.
    pub fn validate(&self) -> Result<()> {
        let mut needed = vec![&self.x];
        if let Some(panel) = &self.panel {
            needed.push(&panel.column);
            if panel.levels.is_empty() {
                return Err(AnalysisError::InvalidParameter(format!(
                    "Figure '{}' has a panel column without levels",
                    self.file
                )));
            }
        }
        for column in needed {
            if !self.group_by.contains(column) {
                return Err(AnalysisError::InvalidParameter(format!(
                    "Figure '{}': '{}' must be one of the group_by columns",
                    self.file, column
                )));
            }
        }
        for a in &self.annotations {
            if a.label.is_none() && a.from_model.is_none() {
                return Err(AnalysisError::InvalidParameter(format!(
                    "Figure '{}': annotation {} - {} needs a label or from_model",
                    self.file, a.pair[0], a.pair[1]
                )));
            }
        }
        Ok(())
    }
}

/// Values of one x category within a panel.
#[derive(Debug, Clone, PartialEq)]
pub struct Category {
    pub name: String,
    pub values: Vec<f64>,
}

/// One panel of a figure.
#[derive(Debug, Clone, PartialEq)]
pub struct Panel {
    /// Panel level, or `None` for a single-panel figure.
    pub title: Option<String>,
    pub categories: Vec<Category>,
}

impl Panel {
    pub fn position(&self, category: &str) -> Option<usize> {
        self.categories.iter().position(|c| c.name == category)
    }

    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.categories.iter().flat_map(|c| c.values.iter().copied())
    }

    /// Brackets drawn on this panel.
    pub fn brackets<'a>(&self, brackets: &'a [Bracket]) -> Vec<&'a Bracket> {
        brackets
            .iter()
            .filter(|b| match (&b.panel, &self.title) {
                (None, _) => true,
                (Some(p), Some(t)) => p == t,
                (Some(_), None) => false,
            })
            .collect()
    }
}

/// Split aggregated data into panels of x categories.
///
/// Categories keep the table's sorted order. Every bracket must name
/// categories present in the panels it is drawn on.
pub fn build_panels(
    table: &AggregatedTable,
    spec: &FigureSpec,
    brackets: &[Bracket],
) -> Result<Vec<Panel>> {
    spec.validate()?;
    let categories = table.categories(&spec.x)?;

    let sources: Vec<(Option<String>, AggregatedTable)> = match &spec.panel {
        None => vec![(None, table.clone())],
        Some(panel) => {
            let observed = table.categories(&panel.column)?;
            panel
                .levels
                .iter()
                .map(|level| {
                    if !observed.contains(level) {
                        return Err(AnalysisError::InvalidValue {
                            column: panel.column.clone(),
                            value: level.clone(),
                            reason: format!("no data for panel in figure '{}'", spec.file),
                        });
                    }
                    Ok((Some(level.clone()), table.subset(&panel.column, level)?))
                })
                .collect::<Result<_>>()?
        }
    };

    let mut panels = Vec::with_capacity(sources.len());
    for (title, data) in sources {
        let panel = Panel {
            title,
            categories: categories
                .iter()
                .map(|name| {
                    Ok(Category {
                        name: name.clone(),
                        values: data.values_for(&spec.x, name)?,
                    })
                })
                .collect::<Result<_>>()?,
        };
        for b in panel.brackets(brackets) {
            for category in [&b.first, &b.second] {
                if panel.position(category).is_none() {
                    return Err(AnalysisError::InvalidValue {
                        column: spec.x.clone(),
                        value: category.clone(),
                        reason: format!("unknown category in figure '{}'", spec.file),
                    });
                }
            }
        }
        panels.push(panel);
    }

    if let Some(b) = brackets.iter().find(|b| {
        b.panel
            .as_ref()
            .is_some_and(|p| !panels.iter().any(|panel| panel.title.as_ref() == Some(p)))
    }) {
        return Err(AnalysisError::InvalidParameter(format!(
            "Figure '{}': annotation refers to unknown panel '{}'",
            spec.file,
            b.panel.as_deref().unwrap_or_default()
        )));
    }

    Ok(panels)
}
