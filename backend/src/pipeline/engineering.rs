//! Feature construction and selection on top of [`Dataset`].

use ckd_shared::{FeatureScore, Label};
use ndarray::{Array2, Axis, concatenate};

use super::dataset::{Dataset, PipelineError};
use crate::stats::descriptive;

fn with_columns(ds: &Dataset, names: Vec<String>, extra: Array2<f64>) -> Result<Dataset, PipelineError> {
    if names.is_empty() {
        return Ok(ds.clone());
    }
    let features = concatenate(Axis(1), &[ds.features.view(), extra.view()])?;
    let mut feature_names = ds.feature_names.clone();
    feature_names.extend(names);
    Dataset::new(feature_names, features, ds.labels.clone())
}

/// Appends `{col}_pow{d}` for every requested column and each power 2..=degree.
pub fn polynomial_features(ds: &Dataset, columns: &[&str], degree: u32) -> Result<Dataset, PipelineError> {
    let mut names = Vec::new();
    let mut values: Vec<Vec<f64>> = Vec::new();
    for &column in columns {
        let idx = ds
            .column_index(column)
            .ok_or_else(|| PipelineError::MissingColumn(column.to_string()))?;
        for power in 2..=degree {
            names.push(format!("{column}_pow{power}"));
            values.push(ds.features.column(idx).iter().map(|v| v.powi(power as i32)).collect());
        }
    }
    with_columns(ds, names, columns_to_array(ds.len(), values)?)
}

/// Appends `{a}_x_{b}` products. Without explicit pairs each column is paired
/// with the next two columns.
pub fn interaction_features(ds: &Dataset, pairs: Option<&[(String, String)]>) -> Result<Dataset, PipelineError> {
    let pairs: Vec<(String, String)> = match pairs {
        Some(pairs) => pairs.to_vec(),
        None => {
            let n = ds.n_features();
            (0..n)
                .flat_map(|i| ((i + 1)..(i + 3).min(n)).map(move |j| (i, j)))
                .map(|(i, j)| (ds.feature_names[i].clone(), ds.feature_names[j].clone()))
                .collect()
        }
    };

    let mut names = Vec::new();
    let mut values: Vec<Vec<f64>> = Vec::new();
    for (a, b) in pairs {
        let (Some(ia), Some(ib)) = (ds.column_index(&a), ds.column_index(&b)) else {
            log::debug!("Skipping interaction {a} x {b}: column not present");
            continue;
        };
        let product = ds
            .features
            .column(ia)
            .iter()
            .zip(ds.features.column(ib).iter())
            .map(|(x, y)| x * y)
            .collect();
        names.push(format!("{a}_x_{b}"));
        values.push(product);
    }
    with_columns(ds, names, columns_to_array(ds.len(), values)?)
}

/// Per-row mean, std, max, min and range across all feature columns.
pub fn statistical_features(ds: &Dataset) -> Result<Dataset, PipelineError> {
    if ds.n_features() < 2 {
        return Ok(ds.clone());
    }
    let mut extra = Array2::zeros((ds.len(), 5));
    for (i, row) in ds.features.outer_iter().enumerate() {
        let values = row.to_vec();
        let max = descriptive::max(&values).unwrap_or(f64::NAN);
        let min = descriptive::min(&values).unwrap_or(f64::NAN);
        extra[[i, 0]] = descriptive::mean(&values).unwrap_or(f64::NAN);
        extra[[i, 1]] = descriptive::sample_std(&values).unwrap_or(f64::NAN);
        extra[[i, 2]] = max;
        extra[[i, 3]] = min;
        extra[[i, 4]] = max - min;
    }
    let names = ["features_mean", "features_std", "features_max", "features_min", "features_range"]
        .map(String::from)
        .to_vec();
    with_columns(ds, names, extra)
}

fn columns_to_array(rows: usize, columns: Vec<Vec<f64>>) -> Result<Array2<f64>, PipelineError> {
    let n_cols = columns.len();
    let mut out = Array2::zeros((rows, n_cols));
    for (j, column) in columns.into_iter().enumerate() {
        if column.len() != rows {
            return Err(PipelineError::InvalidArgument(format!(
                "column {j} has {} values, expected {rows}",
                column.len()
            )));
        }
        for (i, value) in column.into_iter().enumerate() {
            out[[i, j]] = value;
        }
    }
    Ok(out)
}

/// One-way ANOVA F statistic of each column against the diagnosis label.
/// Columns with zero within-class variance score `f64::MAX` when the class
/// means differ and zero otherwise.
pub fn f_scores(ds: &Dataset) -> Vec<FeatureScore> {
    let n = ds.len() as f64;
    ds.feature_names
        .iter()
        .enumerate()
        .map(|(col, name)| {
            let groups = [ds.class_column(col, Label::Ckd), ds.class_column(col, Label::NotCkd)];
            let all: Vec<f64> = groups.iter().flatten().copied().collect();
            let f_score = match descriptive::mean(&all) {
                Some(grand) if groups.iter().all(|g| !g.is_empty()) && n > 2.0 => {
                    let mut between = 0.0;
                    let mut within = 0.0;
                    for group in &groups {
                        let mean = descriptive::mean(group).unwrap_or(grand);
                        between += group.len() as f64 * (mean - grand).powi(2);
                        within += group.iter().map(|v| (v - mean).powi(2)).sum::<f64>();
                    }
                    let df_within = all.len() as f64 - 2.0;
                    if within <= f64::EPSILON {
                        if between > f64::EPSILON { f64::MAX } else { 0.0 }
                    } else {
                        between / (within / df_within)
                    }
                }
                _ => 0.0,
            };
            FeatureScore {
                feature: name.clone(),
                f_score,
            }
        })
        .collect()
}

/// Keeps the `k` highest scoring columns, preserving their original order.
pub fn select_k_best(ds: &Dataset, k: usize) -> Result<(Dataset, Vec<String>), PipelineError> {
    if k == 0 {
        return Err(PipelineError::InvalidArgument("k must be at least 1".into()));
    }
    let k = k.min(ds.n_features());
    let scores = f_scores(ds);
    let mut ranked: Vec<usize> = (0..scores.len()).collect();
    ranked.sort_by(|&a, &b| scores[b].f_score.total_cmp(&scores[a].f_score));
    let mut keep: Vec<usize> = ranked.into_iter().take(k).collect();
    keep.sort_unstable();

    let selected: Vec<String> = keep.iter().map(|&i| ds.feature_names[i].clone()).collect();
    let dataset = Dataset::new(selected.clone(), ds.features.select(Axis(1), &keep), ds.labels.clone())?;
    Ok((dataset, selected))
}
