//! Box-bounded Nelder-Mead on top of `argmin`.
//!
//! Parameters are clamped into their bounds before every evaluation and in
//! the reported optimum, so the objective never sees an out-of-range trial.

use crate::domain::{FitError, FitResult};
use argmin::core::{CostFunction, Error, Executor};
use argmin::solver::neldermead::NelderMead;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;

const RELATIVE_STEP: f64 = 0.05;
const ZERO_STEP: f64 = 0.00025;

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct Bounds {
    pub lower: f64,
    pub upper: f64,
}

impl Bounds {
    pub const fn new(lower: f64, upper: f64) -> Self {
        Self { lower, upper }
    }

    pub fn around(center: f64, half_width: f64) -> Self {
        Self::new(center - half_width, center + half_width)
    }

    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.lower, self.upper)
    }

    pub fn is_valid(&self) -> bool {
        self.lower.is_finite() && self.upper.is_finite() && self.lower <= self.upper
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimplexOptions {
    pub max_iters: u64,
    pub sd_tolerance: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimplexOutcome {
    pub parameters: Vec<f64>,
    pub cost: f64,
    pub iterations: u64,
}

/// The argmin cost wrapper. argmin unwraps the costs of the initial simplex,
/// so objective errors are parked in `failure` and reported as an infinite
/// cost; once one is parked the objective is not called again.
struct BoundedCost<'a, F> {
    objective: &'a F,
    bounds: &'a [Bounds],
    failure: &'a RefCell<Option<FitError>>,
}

impl<F> CostFunction for BoundedCost<'_, F>
where
    F: Fn(&[f64]) -> FitResult<f64>,
{
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, param: &Self::Param) -> Result<Self::Output, Error> {
        if self.failure.borrow().is_some() {
            return Ok(f64::INFINITY);
        }
        let clamped = clamp_all(param, self.bounds);
        match (self.objective)(&clamped) {
            Ok(cost) if cost.is_finite() => Ok(cost),
            Ok(_) => Ok(f64::MAX),
            Err(error) => {
                *self.failure.borrow_mut() = Some(error);
                Ok(f64::INFINITY)
            }
        }
    }
}

/// Minimizes `objective` from `start` within `bounds`.
///
/// Errors returned by the objective abort the search and come back unchanged.
pub fn minimize_bounded<F>(
    objective: F,
    start: &[f64],
    bounds: &[Bounds],
    options: SimplexOptions,
) -> FitResult<SimplexOutcome>
where
    F: Fn(&[f64]) -> FitResult<f64>,
{
    if start.is_empty() || start.len() != bounds.len() {
        return Err(FitError::internal(
            "SYS.SIMPLEX_DIMENSION",
            format!(
                "simplex start has {} parameter(s) for {} bound(s)",
                start.len(),
                bounds.len()
            ),
        ));
    }
    if let Some(invalid) = bounds.iter().find(|bound| !bound.is_valid()) {
        return Err(FitError::input_validation(
            "INPUT.SIMPLEX_BOUNDS",
            format!(
                "search bounds [{}, {}] are not an ordered finite interval",
                invalid.lower, invalid.upper
            ),
        ));
    }

    let start = clamp_all(start, bounds);
    if options.max_iters == 0 {
        let cost = objective(&start)?;
        return Ok(SimplexOutcome {
            parameters: start,
            cost,
            iterations: 0,
        });
    }

    let failure = RefCell::new(None);
    let problem = BoundedCost {
        objective: &objective,
        bounds,
        failure: &failure,
    };
    let solver: NelderMead<Vec<f64>, f64> = NelderMead::new(initial_simplex(&start, bounds))
        .with_sd_tolerance(options.sd_tolerance)
        .map_err(simplex_error)?;

    let result = Executor::new(problem, solver)
        .configure(|state| state.max_iters(options.max_iters))
        .run();
    if let Some(error) = failure.take() {
        return Err(error);
    }
    let result = result.map_err(simplex_error)?;

    let state = result.state;
    let parameters = clamp_all(&state.best_param.unwrap_or(start), bounds);
    Ok(SimplexOutcome {
        parameters,
        cost: state.best_cost,
        iterations: state.iter,
    })
}

/// Start vertex plus one vertex per dimension, stepped 5% (or a fixed small
/// step from zero) towards the interior of the bounds.
fn initial_simplex(start: &[f64], bounds: &[Bounds]) -> Vec<Vec<f64>> {
    let mut vertices = vec![start.to_vec()];
    for (dimension, bound) in bounds.iter().enumerate() {
        let origin = start[dimension];
        let step = if origin != 0.0 {
            RELATIVE_STEP * origin.abs()
        } else {
            ZERO_STEP
        };

        let mut vertex = start.to_vec();
        vertex[dimension] = if origin + step <= bound.upper {
            origin + step
        } else {
            bound.clamp(origin - step)
        };
        vertices.push(vertex);
    }
    vertices
}

fn clamp_all(values: &[f64], bounds: &[Bounds]) -> Vec<f64> {
    values
        .iter()
        .zip(bounds)
        .map(|(value, bound)| bound.clamp(*value))
        .collect()
}

fn simplex_error(error: Error) -> FitError {
    match error.downcast::<FitError>() {
        Ok(error) => error,
        Err(other) => FitError::computation(
            "RUN.SIMPLEX",
            format!("nelder-mead minimization failed: {other}"),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::{Bounds, SimplexOptions, initial_simplex, minimize_bounded};
    use crate::domain::FitError;
    use std::cell::Cell;

    const OPTIONS: SimplexOptions = SimplexOptions {
        max_iters: 500,
        sd_tolerance: 1e-14,
    };

    #[test]
    fn finds_interior_minimum_of_a_quadratic() {
        let outcome = minimize_bounded(
            |p| Ok((p[0] - 1.2).powi(2) + 3.0 * (p[1] + 0.4).powi(2)),
            &[0.0, 1.0],
            &[Bounds::new(-5.0, 5.0), Bounds::new(-5.0, 5.0)],
            OPTIONS,
        )
        .expect("minimization should succeed");

        assert!((outcome.parameters[0] - 1.2).abs() < 1e-3);
        assert!((outcome.parameters[1] + 0.4).abs() < 1e-3);
        assert!(outcome.cost < 1e-6);
    }

    #[test]
    fn optimum_outside_bounds_is_clamped_to_the_edge() {
        let outcome = minimize_bounded(
            |p| Ok((p[0] - 10.0).powi(2)),
            &[7.5],
            &[Bounds::around(7.5, 1.0)],
            OPTIONS,
        )
        .expect("minimization should succeed");

        assert!((outcome.parameters[0] - 8.5).abs() < 1e-6);
        assert!(outcome.parameters[0] <= 8.5);
    }

    #[test]
    fn objective_never_sees_out_of_bound_trials() {
        let bounds = [Bounds::new(0.0, 1.0)];
        minimize_bounded(
            |p| {
                assert!((0.0..=1.0).contains(&p[0]), "trial {} escaped", p[0]);
                Ok(-p[0])
            },
            &[0.5],
            &bounds,
            OPTIONS,
        )
        .expect("minimization should succeed");
    }

    #[test]
    fn zero_iterations_evaluate_the_start_only() {
        let calls = Cell::new(0);
        let outcome = minimize_bounded(
            |p| {
                calls.set(calls.get() + 1);
                Ok(p[0] * p[0])
            },
            &[3.0],
            &[Bounds::new(-1.0, 2.0)],
            SimplexOptions {
                max_iters: 0,
                sd_tolerance: 1e-10,
            },
        )
        .expect("evaluation should succeed");

        assert_eq!(calls.get(), 1);
        assert_eq!(outcome.parameters, vec![2.0]);
        assert_eq!(outcome.cost, 4.0);
    }

    #[test]
    fn objective_errors_are_propagated_unchanged() {
        let error = minimize_bounded(
            |_| Err(FitError::computation("RUN.SYNTH_SUBPROCESS", "synthesizer exited with 1")),
            &[1.0],
            &[Bounds::new(0.0, 2.0)],
            OPTIONS,
        )
        .expect_err("objective failure should abort");

        assert_eq!(error.placeholder(), "RUN.SYNTH_SUBPROCESS");
    }

    #[test]
    fn errors_after_the_initial_simplex_stop_the_search() {
        let calls = Cell::new(0);
        let error = minimize_bounded(
            |p| {
                calls.set(calls.get() + 1);
                if calls.get() > 4 {
                    Err(FitError::computation("RUN.SYNTH_TIMEOUT", "synthesizer timed out"))
                } else {
                    Ok((p[0] - 0.3).powi(2) + p[1] * p[1])
                }
            },
            &[1.0, 1.0],
            &[Bounds::new(-2.0, 2.0), Bounds::new(-2.0, 2.0)],
            OPTIONS,
        )
        .expect_err("late objective failure should abort");

        assert_eq!(error.placeholder(), "RUN.SYNTH_TIMEOUT");
        assert_eq!(calls.get(), 5);
    }

    #[test]
    fn invalid_bounds_are_rejected() {
        let error = minimize_bounded(|p| Ok(p[0]), &[1.0], &[Bounds::new(2.0, 0.0)], OPTIONS)
            .expect_err("reversed bounds should fail");
        assert_eq!(error.placeholder(), "INPUT.SIMPLEX_BOUNDS");
    }

    #[test]
    fn initial_simplex_steps_inside_the_bounds() {
        let simplex = initial_simplex(&[0.0, 4.2], &[Bounds::new(-1.0, 1.0), Bounds::new(3.5, 4.2)]);
        assert_eq!(simplex.len(), 3);
        assert_eq!(simplex[0], vec![0.0, 4.2]);
        assert_eq!(simplex[1], vec![0.00025, 4.2]);
        assert!((simplex[2][1] - 3.99).abs() < 1e-12);
    }
}
