//! Stage planning: correlated groups become joint Cartesian grids,
//! remaining parameters become singleton stages. Every stage carries
//! adaptive metadata for the coarse-to-fine refinement rounds.

use std::collections::{BTreeMap, BTreeSet};

use garde::Validate;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ParameterRange {
    #[garde(skip)]
    pub min: f64,
    #[garde(custom(range_max_gte_min(&self.min)))]
    pub max: f64,
    #[garde(range(min = 0.000_000_1))]
    pub step: f64,
    #[garde(skip)]
    pub default: f64,
}

fn range_max_gte_min(min: &f64) -> impl FnOnce(&f64, &()) -> garde::Result + '_ {
    move |max: &f64, (): &()| {
        if min > max {
            return Err(garde::Error::new(format!(
                "min ({min}) must be <= max ({max})"
            )));
        }
        Ok(())
    }
}

/// Override of a schema range coming in on the optimization request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RangeOverride {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub step: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct OptimizationSchema {
    #[garde(dive)]
    pub parameters: BTreeMap<String, ParameterRange>,
    #[serde(default)]
    #[garde(skip)]
    pub correlated_groups: Vec<Vec<String>>,
}

impl OptimizationSchema {
    /// Each group member must exist, and no parameter may sit in two groups.
    pub fn validate_groups(&self) -> Result<(), EngineError> {
        let mut seen: BTreeSet<&str> = BTreeSet::new();
        for group in &self.correlated_groups {
            for name in group {
                if !self.parameters.contains_key(name) {
                    return Err(EngineError::ParameterInvalid(format!(
                        "correlated group references unknown parameter '{name}'; available: {:?}",
                        self.parameters.keys().collect::<Vec<_>>()
                    )));
                }
                if !seen.insert(name) {
                    return Err(EngineError::ParameterInvalid(format!(
                        "parameter '{name}' appears in multiple correlated groups"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Per-parameter refinement state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptiveMeta {
    pub target_step: f64,
    pub current_step: f64,
    pub min: f64,
    pub max: f64,
    pub integer: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stage {
    pub stage_num: usize,
    pub name: String,
    pub parameters: Vec<String>,
    /// One value list per parameter; `grid_mode` takes their product.
    pub values: Vec<Vec<f64>>,
    pub grid_mode: bool,
    pub adaptive: BTreeMap<String, AdaptiveMeta>,
}

impl Stage {
    pub fn grid_size(&self) -> usize {
        self.values.iter().map(Vec::len).product()
    }

    /// Concrete combinations: the Cartesian product of the value lists,
    /// each merged over the locked best from earlier stages.
    pub fn combos(&self, locked: &BTreeMap<String, f64>) -> Vec<BTreeMap<String, f64>> {
        let mut out = Vec::with_capacity(self.grid_size());
        let mut idx = vec![0usize; self.values.len()];
        if self.values.iter().any(Vec::is_empty) {
            return out;
        }
        loop {
            let mut combo = locked.clone();
            for (p, param) in self.parameters.iter().enumerate() {
                combo.insert(param.clone(), self.values[p][idx[p]]);
            }
            out.push(combo);

            // Odometer increment, last dimension fastest.
            let mut d = self.values.len();
            loop {
                if d == 0 {
                    return out;
                }
                d -= 1;
                idx[d] += 1;
                if idx[d] < self.values[d].len() {
                    break;
                }
                idx[d] = 0;
            }
        }
    }

    /// The parameter values of one combination restricted to this stage.
    pub fn stage_params(&self, combo: &BTreeMap<String, f64>) -> BTreeMap<String, f64> {
        self.parameters
            .iter()
            .filter_map(|p| combo.get(p).map(|v| (p.clone(), *v)))
            .collect()
    }
}

/// Build the stage list: one joint-grid stage per correlated group, then a
/// singleton stage per remaining parameter. The advisory cap only warns.
pub fn plan_stages(
    schema: &OptimizationSchema,
    custom_ranges: Option<&BTreeMap<String, RangeOverride>>,
    max_grid_size: usize,
) -> Result<Vec<Stage>, EngineError> {
    schema.validate_groups()?;

    let mut stages = Vec::new();
    let mut stage_num = 1usize;
    let mut grouped: BTreeSet<&str> = BTreeSet::new();

    for group in &schema.correlated_groups {
        let mut parameters = Vec::new();
        let mut values = Vec::new();
        let mut adaptive = BTreeMap::new();
        for name in group {
            let range = effective_range(schema, custom_ranges, name);
            let integer = is_integer_range(&range);
            let coarse = coarse_step(range.min, range.max, range.step, integer);
            parameters.push(name.clone());
            values.push(range_values(range.min, range.max, coarse, integer));
            adaptive.insert(
                name.clone(),
                AdaptiveMeta {
                    target_step: range.step,
                    current_step: coarse,
                    min: range.min,
                    max: range.max,
                    integer,
                },
            );
            grouped.insert(name.as_str());
        }
        let stage = Stage {
            stage_num,
            name: format!("grid: {}", parameters.join(", ")),
            parameters,
            values,
            grid_mode: true,
            adaptive,
        };
        let size = stage.grid_size();
        if size > max_grid_size {
            tracing::warn!(
                stage = stage.name,
                size,
                cap = max_grid_size,
                "stage grid exceeds the advisory cap; consider a larger step or narrower range"
            );
        }
        tracing::info!(stage = stage.name, combinations = size, "planned grid stage");
        stages.push(stage);
        stage_num += 1;
    }

    for name in schema.parameters.keys() {
        if grouped.contains(name.as_str()) {
            continue;
        }
        let range = effective_range(schema, custom_ranges, name);
        let integer = is_integer_range(&range);
        let coarse = coarse_step(range.min, range.max, range.step, integer);
        let mut adaptive = BTreeMap::new();
        adaptive.insert(
            name.clone(),
            AdaptiveMeta {
                target_step: range.step,
                current_step: coarse,
                min: range.min,
                max: range.max,
                integer,
            },
        );
        stages.push(Stage {
            stage_num,
            name: format!("sweep: {name}"),
            parameters: vec![name.clone()],
            values: vec![range_values(range.min, range.max, coarse, integer)],
            grid_mode: false,
            adaptive,
        });
        stage_num += 1;
    }

    Ok(stages)
}

fn effective_range(
    schema: &OptimizationSchema,
    custom_ranges: Option<&BTreeMap<String, RangeOverride>>,
    name: &str,
) -> ParameterRange {
    let base = schema.parameters[name].clone();
    let Some(over) = custom_ranges.and_then(|c| c.get(name)) else {
        return base;
    };
    ParameterRange {
        min: over.min.unwrap_or(base.min),
        max: over.max.unwrap_or(base.max),
        step: over.step.unwrap_or(base.step),
        default: base.default,
    }
}

fn is_integer_range(range: &ParameterRange) -> bool {
    range.min.fract() == 0.0 && range.max.fract() == 0.0 && range.step.fract() == 0.0
}

/// Round-1 step: cover the range in roughly 4-6 samples per dimension.
pub fn coarse_step(min: f64, max: f64, target_step: f64, integer: bool) -> f64 {
    let range = max - min;
    if integer {
        if range <= 5.0 {
            return 1.0;
        }
        return (range / 4.0).floor().max(1.0);
    }
    if target_step > 0.0 {
        return (target_step * 5.0).max(range / 4.0);
    }
    if range < 0.1 {
        range / 4.0
    } else if range < 1.0 {
        0.1
    } else if range < 10.0 {
        1.0
    } else {
        5.0
    }
}

/// Inclusive value list from `min` to `max`, rounded to the step's decimal
/// precision so float accumulation noise never leaks into parameter maps.
pub fn range_values(min: f64, max: f64, step: f64, integer: bool) -> Vec<f64> {
    let mut values = Vec::new();
    if step <= 0.0 {
        return values;
    }
    let epsilon = if integer { 0.0 } else { step / 1000.0 };
    let decimals = step_decimals(step);
    let mut current = min;
    while current <= max + epsilon {
        let v = if integer {
            current.round()
        } else {
            round_to(current, decimals)
        };
        values.push(v);
        current += step;
    }
    values.dedup_by(|a, b| (*a - *b).abs() < f64::EPSILON);
    values
}

fn step_decimals(step: f64) -> u32 {
    if step >= 1.0 {
        0
    } else if step >= 0.1 {
        1
    } else if step >= 0.01 {
        2
    } else if step >= 0.001 {
        3
    } else {
        4
    }
}

fn round_to(v: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (v * factor).round() / factor
}

/// Zoom every parameter of the stage around the round's best value:
/// window `[best - old_step, best + old_step]` clamped to the schema
/// bounds, step halved (floored at the target for floats, at 1 for
/// integers). Regenerated values are deduplicated and sorted.
pub fn refine_stage(stage: &mut Stage, best: &BTreeMap<String, f64>) {
    if stage.adaptive.is_empty() {
        return;
    }
    let mut new_values = Vec::with_capacity(stage.values.len());
    for (i, param) in stage.parameters.iter().enumerate() {
        let Some(meta) = stage.adaptive.get_mut(param) else {
            new_values.push(stage.values[i].clone());
            continue;
        };
        let Some(&best_val) = best.get(param) else {
            new_values.push(stage.values[i].clone());
            continue;
        };

        let old_step = meta.current_step;
        let new_step = if meta.integer {
            (old_step / 2.0).floor().max(1.0)
        } else {
            (old_step / 2.0).max(meta.target_step)
        };
        meta.current_step = new_step;

        let lo = (best_val - old_step).max(meta.min);
        let hi = (best_val + old_step).min(meta.max);
        // Values are generated outward from the best so the winner always
        // survives into the refined grid regardless of step divisibility.
        let decimals = step_decimals(new_step);
        let epsilon = if meta.integer { 0.0 } else { new_step / 1000.0 };
        let mut vals = Vec::new();
        let mut v = best_val;
        while v >= lo - epsilon {
            vals.push(if meta.integer { v.round() } else { round_to(v, decimals) });
            v -= new_step;
        }
        let mut v = best_val + new_step;
        while v <= hi + epsilon {
            vals.push(if meta.integer { v.round() } else { round_to(v, decimals) });
            v += new_step;
        }
        vals.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        vals.dedup_by(|a, b| (*a - *b).abs() < f64::EPSILON);
        tracing::info!(
            param,
            best = best_val,
            old_step,
            new_step,
            lo,
            hi,
            "refined search window"
        );
        new_values.push(vals);
    }
    stage.values = new_values;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn param(min: f64, max: f64, step: f64) -> ParameterRange {
        ParameterRange {
            min,
            max,
            step,
            default: min,
        }
    }

    fn triple_ma_schema() -> OptimizationSchema {
        let mut parameters = BTreeMap::new();
        parameters.insert("short".to_string(), param(3.0, 15.0, 1.0));
        parameters.insert("medium".to_string(), param(10.0, 40.0, 1.0));
        parameters.insert("long".to_string(), param(20.0, 60.0, 2.0));
        OptimizationSchema {
            parameters,
            correlated_groups: vec![vec![
                "short".to_string(),
                "medium".to_string(),
                "long".to_string(),
            ]],
        }
    }

    #[test]
    fn group_validation_rejects_unknown_and_duplicates() {
        let mut schema = triple_ma_schema();
        schema.correlated_groups = vec![vec!["short".into(), "bogus".into()]];
        assert!(schema.validate_groups().is_err());

        let mut schema = triple_ma_schema();
        schema.correlated_groups =
            vec![vec!["short".into()], vec!["short".into(), "long".into()]];
        assert!(schema.validate_groups().is_err());
    }

    #[test]
    fn coarse_step_integer_heuristics() {
        assert!((coarse_step(3.0, 15.0, 1.0, true) - 3.0).abs() < f64::EPSILON); // range 12 -> 3
        assert!((coarse_step(10.0, 40.0, 1.0, true) - 7.0).abs() < f64::EPSILON); // range 30 -> 7
        assert!((coarse_step(1.0, 5.0, 1.0, true) - 1.0).abs() < f64::EPSILON); // small range
    }

    #[test]
    fn coarse_step_float_uses_target() {
        // 5x the target step, or a quarter of the range, whichever is larger
        let s = coarse_step(0.01, 0.10, 0.01, false);
        assert!((s - 0.05).abs() < 1e-12);
        let s = coarse_step(0.0, 10.0, 0.1, false);
        assert!((s - 2.5).abs() < 1e-12);
    }

    #[test]
    fn range_values_inclusive_and_rounded() {
        assert_eq!(range_values(10.0, 20.0, 5.0, true), vec![10.0, 15.0, 20.0]);
        let vals = range_values(0.1, 0.3, 0.1, false);
        assert_eq!(vals, vec![0.1, 0.2, 0.3]);
    }

    #[test]
    fn plan_groups_then_singletons() {
        let mut schema = triple_ma_schema();
        schema
            .parameters
            .insert("stop_loss".to_string(), param(0.02, 0.10, 0.01));
        let stages = plan_stages(&schema, None, 1000).unwrap();
        assert_eq!(stages.len(), 2);
        assert!(stages[0].grid_mode);
        assert_eq!(stages[0].parameters.len(), 3);
        assert!(!stages[1].grid_mode);
        assert_eq!(stages[1].parameters, vec!["stop_loss".to_string()]);

        // Coarse round covers each dimension in ~4-6 samples.
        for vals in &stages[0].values {
            assert!(vals.len() >= 4 && vals.len() <= 6, "got {}", vals.len());
        }
    }

    #[test]
    fn combos_are_cartesian_and_merge_locked() {
        let stage = Stage {
            stage_num: 1,
            name: "grid".into(),
            parameters: vec!["a".into(), "b".into()],
            values: vec![vec![1.0, 2.0], vec![10.0, 20.0, 30.0]],
            grid_mode: true,
            adaptive: BTreeMap::new(),
        };
        let mut locked = BTreeMap::new();
        locked.insert("c".to_string(), 99.0);
        let combos = stage.combos(&locked);
        assert_eq!(combos.len(), 6);
        assert!((combos[0]["a"] - 1.0).abs() < f64::EPSILON);
        assert!((combos[0]["b"] - 10.0).abs() < f64::EPSILON);
        assert!((combos[0]["c"] - 99.0).abs() < f64::EPSILON);
        // Last dimension varies fastest
        assert!((combos[1]["b"] - 20.0).abs() < f64::EPSILON);
        assert!((combos[5]["a"] - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn custom_ranges_override_schema() {
        let schema = triple_ma_schema();
        let mut overrides = BTreeMap::new();
        overrides.insert(
            "short".to_string(),
            RangeOverride {
                min: Some(5.0),
                max: Some(9.0),
                step: None,
            },
        );
        let stages = plan_stages(&schema, Some(&overrides), 1000).unwrap();
        let short_idx = stages[0]
            .parameters
            .iter()
            .position(|p| p == "short")
            .unwrap();
        let vals = &stages[0].values[short_idx];
        assert_eq!(vals.first().copied().unwrap(), 5.0);
        assert_eq!(vals.last().copied().unwrap(), 9.0);
    }

    #[test]
    fn refinement_shrinks_step_and_contains_best() {
        let schema = triple_ma_schema();
        let mut stages = plan_stages(&schema, None, 1000).unwrap();
        let mut best = BTreeMap::new();
        best.insert("short".to_string(), 9.0);
        best.insert("medium".to_string(), 24.0);
        best.insert("long".to_string(), 40.0);

        // Four refinement rounds drive every integer step to 1.
        for _ in 0..4 {
            let stage = &mut stages[0];
            refine_stage(stage, &best);
            for (i, p) in stage.parameters.iter().enumerate() {
                assert!(
                    stage.values[i].iter().any(|v| (*v - best[p]).abs() < 1e-9),
                    "refined grid for {p} must contain the best value"
                );
            }
        }
        for meta in stages[0].adaptive.values() {
            assert!((meta.current_step - 1.0).abs() < f64::EPSILON);
        }
        // Final grids are tight around the best
        assert!(stages[0].grid_size() <= 50);
    }

    #[test]
    fn refinement_clamps_to_schema_bounds() {
        let schema = triple_ma_schema();
        let mut stages = plan_stages(&schema, None, 1000).unwrap();
        let mut best = BTreeMap::new();
        best.insert("short".to_string(), 3.0); // at the lower bound
        best.insert("medium".to_string(), 40.0); // at the upper bound
        best.insert("long".to_string(), 20.0);
        refine_stage(&mut stages[0], &best);
        let short_idx = stages[0]
            .parameters
            .iter()
            .position(|p| p == "short")
            .unwrap();
        assert!(stages[0].values[short_idx].iter().all(|&v| v >= 3.0));
        let med_idx = stages[0]
            .parameters
            .iter()
            .position(|p| p == "medium")
            .unwrap();
        assert!(stages[0].values[med_idx].iter().all(|&v| v <= 40.0));
    }

    #[test]
    fn advisory_cap_does_not_reject() {
        let mut parameters = BTreeMap::new();
        parameters.insert("a".to_string(), param(1.0, 200.0, 1.0));
        parameters.insert("b".to_string(), param(1.0, 200.0, 1.0));
        let schema = OptimizationSchema {
            parameters,
            correlated_groups: vec![vec!["a".into(), "b".into()]],
        };
        // Over the cap -> still planned (warning only)
        let stages = plan_stages(&schema, None, 10).unwrap();
        assert_eq!(stages.len(), 1);
    }
}
