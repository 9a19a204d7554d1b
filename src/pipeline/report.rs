//! Run report, rendered as text tables or JSON.

use crate::data::AggregatedTable;
use crate::error::Result;
use crate::filter::FilterSummary;
use crate::model::{CoefficientTest, Family, GlmmFit, Link};
use crate::test::{AnovaTable, PostHoc, TestStatistic};
use serde::Serialize;
use std::fmt::Write;

/// Results of one model step.
#[derive(Debug, Clone, Serialize)]
pub struct ModelReport {
    pub name: String,
    /// Subset conditions, as text.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub subset: Vec<String>,
    pub formula: String,
    pub family: Family,
    pub link: Link,
    pub n_obs: usize,
    pub grouping: String,
    pub n_groups: usize,
    pub iterations: usize,
    pub converged: bool,
    pub singular: bool,
    /// Random-intercept variance (working scale).
    pub tau2: f64,
    pub dispersion: f64,
    pub icc: f64,
    pub reml_criterion: f64,
    pub coefficients: Vec<CoefficientTest>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anova: Option<AnovaTable>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub post_hoc: Vec<PostHoc>,
}

impl ModelReport {
    pub fn from_fit(
        name: &str,
        subset: Vec<String>,
        fit: &GlmmFit,
        anova: Option<AnovaTable>,
        post_hoc: Vec<PostHoc>,
    ) -> Result<Self> {
        Ok(Self {
            name: name.to_string(),
            subset,
            formula: fit.formula.clone(),
            family: fit.family,
            link: fit.link,
            n_obs: fit.n_obs,
            grouping: fit.grouping.clone(),
            n_groups: fit.n_groups,
            iterations: fit.iterations,
            converged: fit.converged,
            singular: fit.singular,
            tau2: fit.tau2,
            dispersion: fit.dispersion,
            icc: fit.icc(),
            reml_criterion: fit.reml_criterion,
            coefficients: fit.coefficient_tests()?,
            anova,
            post_hoc,
        })
    }

    /// Find a contrast between two cell labels across all post-hoc analyses.
    pub fn find_contrast(&self, a: &str, b: &str) -> Option<&crate::test::Contrast> {
        self.post_hoc.iter().find_map(|ph| ph.find(a, b))
    }

    /// Whether Wald tests use t rather than z.
    fn linear(&self) -> bool {
        self.family == Family::Gaussian && self.link == Link::Identity
    }
}

/// A resolved significance bracket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BracketReport {
    pub first: String,
    pub second: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub panel: Option<String>,
    pub label: String,
}

/// Outcome of one figure.
#[derive(Debug, Clone, Serialize)]
pub struct FigureReport {
    pub file: String,
    /// Whether the PNG was written.
    pub written: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub brackets: Vec<BracketReport>,
    /// Aggregated data, when requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table: Option<AggregatedTable>,
}

/// Everything a run produced.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub name: String,
    pub input: String,
    pub n_loaded: usize,
    pub filters: Vec<FilterSummary>,
    pub n_trials: usize,
    pub models: Vec<ModelReport>,
    pub figures: Vec<FigureReport>,
}

impl Report {
    pub fn model(&self, name: &str) -> Option<&ModelReport> {
        self.models.iter().find(|m| m.name == name)
    }

    /// Pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Plain-text report with 3-decimal numbers.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Analysis: {}", self.name);
        let _ = writeln!(out, "Input: {} ({} trials)", self.input, self.n_loaded);
        for f in &self.filters {
            let _ = writeln!(out, "  {}", f);
        }
        let _ = writeln!(out, "Trials analyzed: {}", self.n_trials);

        for model in &self.models {
            out.push('\n');
            write_model(&mut out, model);
        }
        for figure in &self.figures {
            out.push('\n');
            write_figure(&mut out, figure);
        }
        out
    }
}

impl std::fmt::Display for Report {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_text())
    }
}

/// Three decimals; scientific notation below 1e-3 so that values on the
/// inverse-squared link scale stay readable.
fn num(v: f64) -> String {
    if v.is_nan() {
        "NA".to_string()
    } else if v != 0.0 && v.abs() < 1e-3 {
        format!("{:.3e}", v)
    } else {
        format!("{:.3}", v)
    }
}

/// Columns separated by two spaces; the first column left-aligned, the
/// rest right-aligned.
fn render_table(out: &mut String, header: &[&str], rows: &[Vec<String>]) {
    let mut widths: Vec<usize> = header.iter().map(|h| h.len()).collect();
    for row in rows {
        for (w, cell) in widths.iter_mut().zip(row) {
            *w = (*w).max(cell.chars().count());
        }
    }
    let mut line = |cells: Vec<&str>| {
        let mut text = String::from("  ");
        for (i, (cell, w)) in cells.iter().zip(&widths).enumerate() {
            if i > 0 {
                text.push_str("  ");
            }
            if i == 0 {
                let _ = write!(text, "{:<width$}", cell, width = *w);
            } else {
                let _ = write!(text, "{:>width$}", cell, width = *w);
            }
        }
        let _ = writeln!(out, "{}", text.trim_end());
    };
    line(header.to_vec());
    for row in rows {
        line(row.iter().map(|c| c.as_str()).collect());
    }
}

fn write_model(out: &mut String, model: &ModelReport) {
    let _ = writeln!(out, "Model: {}", model.name);
    let _ = writeln!(out, "Formula: {}", model.formula);
    let _ = writeln!(out, "Family: {} (link = {})", model.family, model.link);
    if !model.subset.is_empty() {
        let _ = writeln!(out, "Subset: {}", model.subset.join(", "));
    }
    let _ = writeln!(
        out,
        "Observations: {}; groups ({}): {}",
        model.n_obs, model.grouping, model.n_groups
    );
    let _ = writeln!(
        out,
        "Random intercept variance: {}; dispersion: {}; ICC: {}",
        num(model.tau2),
        num(model.dispersion),
        num(model.icc)
    );
    if !model.converged {
        let _ = writeln!(
            out,
            "WARNING: model did not converge after {} iterations; estimates are unreliable",
            model.iterations
        );
    }
    if model.singular {
        let _ = writeln!(out, "WARNING: singular fit (random intercept variance is zero)");
    }

    let stat = if model.linear() { "t" } else { "z" };
    let _ = writeln!(out, "Fixed effects:");
    let rows: Vec<Vec<String>> = model
        .coefficients
        .iter()
        .map(|c| {
            vec![
                c.name.clone(),
                num(c.estimate),
                num(c.std_error),
                num(c.statistic),
                num(c.p_value),
            ]
        })
        .collect();
    render_table(out, &["term", "estimate", "std.error", stat, "p"], &rows);

    if let Some(anova) = &model.anova {
        write_anova(out, anova);
    }
    for ph in &model.post_hoc {
        write_post_hoc(out, ph, stat);
    }
}

fn write_anova(out: &mut String, anova: &AnovaTable) {
    let _ = writeln!(out, "Type III Wald tests:");
    let rows: Vec<Vec<String>> = anova
        .rows
        .iter()
        .map(|r| {
            let mut row = vec![r.term.clone(), num(r.statistic), r.df.to_string()];
            if let Some(den) = r.df_denominator {
                row.push(den.to_string());
            }
            row.push(num(r.p_value));
            row
        })
        .collect();
    match anova.statistic {
        TestStatistic::Chisq => render_table(out, &["term", "Chisq", "Df", "Pr(>Chisq)"], &rows),
        TestStatistic::F => render_table(out, &["term", "F", "NumDF", "DenDF", "Pr(>F)"], &rows),
    }
}

fn write_post_hoc(out: &mut String, ph: &PostHoc, stat: &str) {
    let mut title = format!("Post-hoc: {}", ph.marginal_vars.join(" x "));
    if !ph.by.is_empty() {
        let _ = write!(title, " by {}", ph.by.join(" x "));
    }
    let _ = writeln!(out, "{} (p adjustment: {})", title, ph.adjust);

    let by = !ph.by.is_empty();
    let means: Vec<Vec<String>> = ph
        .means
        .iter()
        .map(|m| {
            let mut row = vec![m.label()];
            if by {
                row.push(m.by.join(" "));
            }
            row.extend([
                num(m.estimate),
                num(m.std_error),
                num(m.lower),
                num(m.upper),
                num(m.response),
            ]);
            row
        })
        .collect();
    let mut header = vec!["cell"];
    if by {
        header.push("by");
    }
    header.extend(["estimate", "std.error", "lower", "upper", "response"]);
    render_table(out, &header, &means);

    let contrasts: Vec<Vec<String>> = ph
        .contrasts
        .iter()
        .map(|c| {
            let mut row = vec![c.contrast.clone()];
            if by {
                row.push(c.by.join(" "));
            }
            row.extend([
                num(c.estimate),
                num(c.std_error),
                num(c.statistic),
                num(c.p_value),
                num(c.p_adjusted),
            ]);
            row
        })
        .collect();
    let mut header = vec!["contrast"];
    if by {
        header.push("by");
    }
    header.extend(["estimate", "std.error", stat, "p", "p.adj"]);
    render_table(out, &header, &contrasts);
}

fn write_figure(out: &mut String, figure: &FigureReport) {
    let status = if figure.written { "written" } else { "skipped" };
    let _ = writeln!(out, "Figure: {} ({})", figure.file, status);
    for b in &figure.brackets {
        match &b.panel {
            Some(panel) => {
                let _ = writeln!(out, "  [{}] {} - {}: {}", panel, b.first, b.second, b.label);
            }
            None => {
                let _ = writeln!(out, "  {} - {}: {}", b.first, b.second, b.label);
            }
        }
    }
    if let Some(table) = &figure.table {
        let _ = write!(out, "{}", table.to_table_string());
    }
}
