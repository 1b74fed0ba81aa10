// Curve fitter - bounded least squares fit of a * exp(b * t), t in days since window start
use crate::domain::error::PipelineError;
use crate::domain::series::{Series, SeriesPoint};
use chrono::NaiveDate;
use serde::Deserialize;

const MIN_POINTS: usize = 2;

/// Box constraints on `(a, b)`. Unconstrained fits tend to run off on noisy
/// low-count tails.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParameterBounds {
    pub lower: [f64; 2],
    pub upper: [f64; 2],
}

impl Default for ParameterBounds {
    fn default() -> Self {
        Self {
            lower: [0.0, -5.0],
            upper: [1000.0, 5.0],
        }
    }
}

impl ParameterBounds {
    fn clamp(&self, params: [f64; 2]) -> [f64; 2] {
        [
            params[0].clamp(self.lower[0], self.upper[0]),
            params[1].clamp(self.lower[1], self.upper[1]),
        ]
    }
}

/// Solver budget and tolerances
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitOptions {
    pub bounds: ParameterBounds,
    pub max_iterations: usize,
    /// Relative cost reduction below which the fit is considered converged
    pub ftol: f64,
    /// Relative parameter step below which the fit is considered converged
    pub xtol: f64,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            bounds: ParameterBounds::default(),
            max_iterations: 200,
            ftol: 1e-10,
            xtol: 1e-10,
        }
    }
}

/// Epidemiological constants used to derive R from the growth rate
#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
#[serde(default)]
pub struct Epidemiology {
    /// Incubation time in days
    pub latency_days: f64,
    /// Days a person stays infectious
    pub infectious_days: f64,
}

impl Default for Epidemiology {
    fn default() -> Self {
        Self {
            latency_days: 5.1,
            infectious_days: 5.0,
        }
    }
}

impl Epidemiology {
    /// Mean time between infections in a transmission chain, assuming
    /// infectiousness starts a day before symptom onset and most
    /// transmissions happen early in the infectious window.
    pub fn mean_generation_interval(&self) -> f64 {
        (self.latency_days - 1.0) + self.infectious_days / 4.0
    }

    /// Delta-distributed generation interval: `R = exp(b * Tg)`
    pub fn reproduction_number(&self, growth_rate: f64) -> f64 {
        (growth_rate * self.mean_generation_interval()).exp()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExponentialFit {
    pub a: f64,
    pub b: f64,
    /// Parameter covariance, infinite when it cannot be estimated
    pub covariance: [[f64; 2]; 2],
    pub start: NaiveDate,
    pub points_used: usize,
    pub iterations: usize,
}

impl ExponentialFit {
    pub fn evaluate(&self, t: f64) -> f64 {
        model(self.a, self.b, t)
    }

    pub fn evaluate_on(&self, date: NaiveDate) -> f64 {
        self.evaluate((date - self.start).num_days() as f64)
    }

    /// The model over every date of `series` from the fit start onward,
    /// undefined before it. Dates past the fit window become a forward
    /// extrapolation.
    pub fn curve_over(&self, series: &Series) -> Series {
        Series::new(
            series
                .points()
                .iter()
                .map(|p| {
                    let value = (p.date >= self.start).then(|| self.evaluate_on(p.date));
                    SeriesPoint::new(p.date, value)
                })
                .collect(),
        )
    }

    pub fn std_errors(&self) -> [f64; 2] {
        [self.covariance[0][0].sqrt(), self.covariance[1][1].sqrt()]
    }
}

fn model(a: f64, b: f64, t: f64) -> f64 {
    a * (b * t).exp()
}

pub fn fit(series: &Series, start: NaiveDate, end: NaiveDate) -> Result<ExponentialFit, PipelineError> {
    fit_with_options(series, start, end, &FitOptions::default())
}

pub fn fit_with_options(
    series: &Series,
    start: NaiveDate,
    end: NaiveDate,
    options: &FitOptions,
) -> Result<ExponentialFit, PipelineError> {
    let samples: Vec<(f64, f64)> = series
        .between(start, end)
        .defined()
        .map(|(date, value)| ((date - start).num_days() as f64, value))
        .collect();

    if samples.len() < MIN_POINTS {
        return Err(PipelineError::InsufficientData {
            required: MIN_POINTS,
            actual: samples.len(),
        });
    }

    let bounds = &options.bounds;
    let mut params = bounds.clamp(initial_guess(&samples));
    let mut cost = sum_of_squares(&samples, params);
    let mut lambda = 1e-3;

    for iteration in 1..=options.max_iterations {
        let (jtj, jtr) = normal_equations(&samples, params);

        let Some(step) = bounded_step(jtj, jtr, lambda, params, bounds) else {
            lambda *= 10.0;
            continue;
        };

        let candidate = bounds.clamp([params[0] + step[0], params[1] + step[1]]);
        let moved = norm([candidate[0] - params[0], candidate[1] - params[1]]);
        if moved <= options.xtol * (norm(params) + options.xtol) {
            return Ok(finish(&samples, params, start, iteration));
        }

        let candidate_cost = sum_of_squares(&samples, candidate);
        if candidate_cost.is_finite() && candidate_cost < cost {
            let reduction = cost - candidate_cost;
            let previous = cost;
            params = candidate;
            cost = candidate_cost;
            lambda = (lambda / 10.0).max(1e-12);
            if reduction <= options.ftol * previous {
                return Ok(finish(&samples, params, start, iteration));
            }
        } else {
            lambda *= 10.0;
        }
    }

    Err(PipelineError::FitDidNotConverge {
        iterations: options.max_iterations,
    })
}

/// Log-linear least squares on the positive samples, or `(1, 0)` when there
/// are not enough of them.
fn initial_guess(samples: &[(f64, f64)]) -> [f64; 2] {
    let logs: Vec<(f64, f64)> = samples
        .iter()
        .filter(|(_, y)| *y > 0.0)
        .map(|(t, y)| (*t, y.ln()))
        .collect();

    if logs.len() < MIN_POINTS {
        return [1.0, 0.0];
    }

    let n = logs.len() as f64;
    let sum_t: f64 = logs.iter().map(|(t, _)| t).sum();
    let sum_y: f64 = logs.iter().map(|(_, y)| y).sum();
    let sum_tt: f64 = logs.iter().map(|(t, _)| t * t).sum();
    let sum_ty: f64 = logs.iter().map(|(t, y)| t * y).sum();

    let denominator = n * sum_tt - sum_t * sum_t;
    if denominator.abs() < 1e-12 {
        return [1.0, 0.0];
    }

    let slope = (n * sum_ty - sum_t * sum_y) / denominator;
    let intercept = (sum_y - slope * sum_t) / n;
    [intercept.exp(), slope]
}

fn sum_of_squares(samples: &[(f64, f64)], params: [f64; 2]) -> f64 {
    samples
        .iter()
        .map(|(t, y)| (y - model(params[0], params[1], *t)).powi(2))
        .sum()
}

/// `J^T J` and `J^T r` for residuals `r = y - f(t)`
fn normal_equations(samples: &[(f64, f64)], params: [f64; 2]) -> ([[f64; 2]; 2], [f64; 2]) {
    let [a, b] = params;
    let mut jtj = [[0.0; 2]; 2];
    let mut jtr = [0.0; 2];

    for (t, y) in samples {
        let growth = (b * t).exp();
        let jacobian = [growth, a * t * growth];
        let residual = y - a * growth;

        for i in 0..2 {
            jtr[i] += jacobian[i] * residual;
            for j in 0..2 {
                jtj[i][j] += jacobian[i] * jacobian[j];
            }
        }
    }

    (jtj, jtr)
}

/// Solves `(J^T J + lambda * diag(J^T J)) step = J^T r`
fn solve_damped(jtj: [[f64; 2]; 2], jtr: [f64; 2], lambda: f64) -> Option<[f64; 2]> {
    let mut m = jtj;
    for i in 0..2 {
        m[i][i] += lambda * jtj[i][i].max(f64::EPSILON);
    }
    solve_2x2(m, jtr)
}

/// Damped step with parameters pinned when they sit on a bound and the
/// step would push them further out. The remaining parameter is solved alone.
fn bounded_step(
    jtj: [[f64; 2]; 2],
    jtr: [f64; 2],
    lambda: f64,
    params: [f64; 2],
    bounds: &ParameterBounds,
) -> Option<[f64; 2]> {
    let step = solve_damped(jtj, jtr, lambda)?;
    let pinned: [bool; 2] = std::array::from_fn(|i| {
        (params[i] <= bounds.lower[i] && step[i] < 0.0) || (params[i] >= bounds.upper[i] && step[i] > 0.0)
    });

    match pinned {
        [false, false] => Some(step),
        [true, true] => Some([0.0, 0.0]),
        _ => {
            let free = if pinned[0] { 1 } else { 0 };
            let diagonal = jtj[free][free] + lambda * jtj[free][free].max(f64::EPSILON);
            if !diagonal.is_finite() || diagonal <= 0.0 {
                return None;
            }
            let mut reduced = [0.0; 2];
            reduced[free] = jtr[free] / diagonal;
            Some(reduced)
        }
    }
}

fn solve_2x2(m: [[f64; 2]; 2], rhs: [f64; 2]) -> Option<[f64; 2]> {
    let det = m[0][0] * m[1][1] - m[0][1] * m[1][0];
    if !det.is_finite() || det.abs() < f64::MIN_POSITIVE {
        return None;
    }
    let x = [
        (rhs[0] * m[1][1] - m[0][1] * rhs[1]) / det,
        (m[0][0] * rhs[1] - m[1][0] * rhs[0]) / det,
    ];
    x.iter().all(|v| v.is_finite()).then_some(x)
}

fn invert_2x2(m: [[f64; 2]; 2]) -> Option<[[f64; 2]; 2]> {
    let det = m[0][0] * m[1][1] - m[0][1] * m[1][0];
    if !det.is_finite() || det.abs() < f64::MIN_POSITIVE {
        return None;
    }
    Some([[m[1][1] / det, -m[0][1] / det], [-m[1][0] / det, m[0][0] / det]])
}

fn norm(v: [f64; 2]) -> f64 {
    v[0].hypot(v[1])
}

fn finish(samples: &[(f64, f64)], params: [f64; 2], start: NaiveDate, iterations: usize) -> ExponentialFit {
    let dof = samples.len().saturating_sub(2);
    let (jtj, _) = normal_equations(samples, params);

    // residual variance scales the covariance, as with relative sigma
    let covariance = match (dof, invert_2x2(jtj)) {
        (dof, Some(inverse)) if dof > 0 => {
            let variance = sum_of_squares(samples, params) / dof as f64;
            inverse.map(|row| row.map(|c| c * variance))
        }
        _ => [[f64::INFINITY; 2]; 2],
    };

    tracing::debug!(
        "fit converged after {} iterations: a={:.4} b={:.6} over {} points",
        iterations,
        params[0],
        params[1],
        samples.len()
    );

    ExponentialFit {
        a: params[0],
        b: params[1],
        covariance,
        start,
        points_used: samples.len(),
        iterations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn start() -> NaiveDate {
        NaiveDate::from_ymd_opt(2020, 3, 24).unwrap()
    }

    fn synthetic(a: f64, b: f64, days: usize) -> Series {
        let values: Vec<Option<f64>> = (0..days).map(|t| Some(model(a, b, t as f64))).collect();
        Series::from_daily(start(), &values)
    }

    fn end_of(series: &Series) -> NaiveDate {
        series.points().last().unwrap().date
    }

    #[test]
    fn test_recovers_noiseless_parameters() {
        for (a0, b0) in [(1.0, 1.0), (250.0, -0.05), (3.0, 0.2), (999.0, -1.5), (0.5, 2.0), (2.0, -5.0), (42.0, 0.0)] {
            let series = synthetic(a0, b0, 12);
            let fit = fit(&series, start(), end_of(&series)).unwrap();
            assert!((fit.a - a0).abs() <= 1e-6 * a0.max(1.0), "a: {} vs {}", fit.a, a0);
            assert!((fit.b - b0).abs() <= 1e-6, "b: {} vs {}", fit.b, b0);
        }
    }

    #[test]
    fn test_three_points_near_e_to_the_t() {
        let series = Series::from_daily(start(), &[Some(1.0), Some(2.7), Some(7.4)]);
        let fit = fit(&series, start(), start() + Duration::days(2)).unwrap();
        assert!((fit.a - 1.0).abs() < 0.1, "a = {}", fit.a);
        assert!((fit.b - 1.0).abs() < 0.1, "b = {}", fit.b);
    }

    #[test]
    fn test_noisy_decay_starting_from_a_poor_guess() {
        // alternating +-8% noise on a decaying curve
        let values: Vec<Option<f64>> = (0..40)
            .map(|t| {
                let noise = if t % 2 == 0 { 1.08 } else { 0.92 };
                Some(model(180.0, -0.04, t as f64) * noise)
            })
            .collect();
        let series = Series::from_daily(start(), &values);
        let fit = fit(&series, start(), end_of(&series)).unwrap();

        assert!((fit.b + 0.04).abs() < 0.005, "b = {}", fit.b);
        assert!((fit.a - 180.0).abs() < 15.0, "a = {}", fit.a);
        assert!(fit.std_errors().iter().all(|e| e.is_finite() && *e > 0.0));
    }

    #[test]
    fn test_only_window_points_are_used() {
        let mut values: Vec<Option<f64>> = (0..20).map(|t| Some(model(10.0, 0.1, t as f64))).collect();
        // garbage outside the window
        values[15] = Some(1e6);
        let series = Series::from_daily(start(), &values);
        let fit = fit(&series, start(), start() + Duration::days(10)).unwrap();

        assert_eq!(fit.points_used, 11);
        assert!((fit.b - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_gaps_are_skipped() {
        let values = [Some(2.0), None, Some(2.0 * 0.3f64.exp().powi(2)), None, Some(2.0 * 0.3f64.exp().powi(4))];
        let series = Series::from_daily(start(), &values);
        let fit = fit(&series, start(), end_of(&series)).unwrap();

        assert_eq!(fit.points_used, 3);
        assert!((fit.b - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_insufficient_data() {
        let series = Series::from_daily(start(), &[Some(5.0), None, None]);
        let err = fit(&series, start(), end_of(&series)).unwrap_err();
        assert_eq!(err, PipelineError::InsufficientData { required: 2, actual: 1 });
    }

    #[test]
    fn test_parameters_stay_within_bounds() {
        let series = synthetic(5000.0, -0.1, 15);
        let fit = fit(&series, start(), end_of(&series)).unwrap();
        assert!(fit.a <= 1000.0);
        assert!((-5.0..=5.0).contains(&fit.b));
    }

    #[test]
    fn test_iteration_budget_exhausted() {
        let values: Vec<Option<f64>> = (0..30)
            .map(|t| Some(model(50.0, 0.05, t as f64) + if t % 3 == 0 { 20.0 } else { -10.0 }))
            .collect();
        let series = Series::from_daily(start(), &values);
        let options = FitOptions {
            max_iterations: 1,
            ..FitOptions::default()
        };

        let err = fit_with_options(&series, start(), end_of(&series), &options).unwrap_err();
        assert_eq!(err, PipelineError::FitDidNotConverge { iterations: 1 });
    }

    #[test]
    fn test_curve_extends_past_fit_window() {
        let series = synthetic(10.0, 0.1, 30);
        let fit = fit(&series, start() + Duration::days(5), start() + Duration::days(15)).unwrap();
        let curve = fit.curve_over(&series);

        assert_eq!(curve.len(), 30);
        assert!(curve.values()[..5].iter().all(|v| v.is_none()));
        let last = curve.values()[29].unwrap();
        let expected = model(10.0, 0.1, 29.0);
        assert!((last - expected).abs() < 1e-6 * expected);
    }

    #[test]
    fn test_reproduction_number() {
        let epi = Epidemiology::default();
        assert!((epi.mean_generation_interval() - 5.35).abs() < 1e-12);
        assert_eq!(epi.reproduction_number(0.0), 1.0);

        let rates = [-0.2, -0.05, 0.0, 0.03, 0.1];
        let r: Vec<f64> = rates.iter().map(|b| epi.reproduction_number(*b)).collect();
        assert!(r.windows(2).all(|w| w[0] < w[1]));
    }
}
