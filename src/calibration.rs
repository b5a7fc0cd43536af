use serde::Serialize;

use crate::config::Calibration;
use crate::fusion::calibrate;

/// One graded prediction: the pre-calibration probability and whether the event happened.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Graded {
    pub p: f64,
    pub hit: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Metrics {
    pub samples: usize,
    pub brier: f64,
    pub log_loss: f64,
    /// Share of predictions on the right side of 0.5.
    pub accuracy: f64,
    pub base_rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CalibrationBin {
    pub bucket_start: f64,
    pub bucket_end: f64,
    pub count: usize,
    pub avg_pred: f64,
    pub actual_rate: f64,
}

pub fn evaluate(graded: &[Graded]) -> Metrics {
    if graded.is_empty() {
        return Metrics::default();
    }

    let mut brier_sum = 0.0_f64;
    let mut log_loss_sum = 0.0_f64;
    let mut correct = 0usize;
    let mut hits = 0usize;

    for g in graded {
        let p = g.p.clamp(0.0, 1.0);
        let y = if g.hit { 1.0 } else { 0.0 };
        brier_sum += (p - y).powi(2);
        let actual_prob = if g.hit { p } else { 1.0 - p }.clamp(1e-12, 1.0);
        log_loss_sum += -actual_prob.ln();
        if (p >= 0.5) == g.hit {
            correct += 1;
        }
        hits += usize::from(g.hit);
    }

    let n = graded.len() as f64;
    Metrics {
        samples: graded.len(),
        brier: brier_sum / n,
        log_loss: log_loss_sum / n,
        accuracy: correct as f64 / n,
        base_rate: hits as f64 / n,
    }
}

fn evaluate_calibrated(graded: &[Graded], cal: &Calibration) -> Metrics {
    let calibrated: Vec<Graded> = graded
        .iter()
        .map(|g| Graded {
            p: calibrate(g.p, cal),
            hit: g.hit,
        })
        .collect();
    evaluate(&calibrated)
}

/// Grid search of the temperature minimising log loss, keeping `floor` and `ceiling`.
pub fn fit_temperature(graded: &[Graded], base: Calibration) -> (Calibration, Metrics) {
    if graded.is_empty() {
        return (base, Metrics::default());
    }

    let mut best = Calibration {
        temperature: 1.0,
        ..base
    };
    let mut best_metrics = evaluate_calibrated(graded, &best);

    for step in 35..=100 {
        let temperature = step as f64 / 50.0; // 0.70..2.00
        let cal = Calibration {
            temperature,
            ..base
        };
        let metrics = evaluate_calibrated(graded, &cal);
        if metrics.log_loss < best_metrics.log_loss {
            best_metrics = metrics;
            best = cal;
        }
    }

    (best, best_metrics)
}

pub fn calibration_bins(graded: &[Graded], bins: usize) -> Vec<CalibrationBin> {
    let bins = bins.max(2);
    let mut counts = vec![0usize; bins];
    let mut pred_sum = vec![0.0_f64; bins];
    let mut actual_sum = vec![0.0_f64; bins];

    for g in graded {
        let p = g.p.clamp(0.0, 1.0);
        let idx = ((p * bins as f64).floor() as usize).min(bins - 1);
        counts[idx] += 1;
        pred_sum[idx] += p;
        if g.hit {
            actual_sum[idx] += 1.0;
        }
    }

    (0..bins)
        .map(|i| {
            let count = counts[i];
            let (avg_pred, actual_rate) = if count > 0 {
                (pred_sum[i] / count as f64, actual_sum[i] / count as f64)
            } else {
                (0.0, 0.0)
            };
            CalibrationBin {
                bucket_start: i as f64 / bins as f64,
                bucket_end: (i + 1) as f64 / bins as f64,
                count,
                avg_pred,
                actual_rate,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{Graded, calibration_bins, evaluate, fit_temperature};
    use crate::config::Calibration;

    #[test]
    fn perfect_predictions_have_zero_brier() {
        let graded = vec![
            Graded { p: 1.0, hit: true },
            Graded { p: 0.0, hit: false },
        ];
        let m = evaluate(&graded);
        assert_eq!(m.samples, 2);
        assert!(m.brier < 1e-12);
        assert_eq!(m.accuracy, 1.0);
        assert_eq!(m.base_rate, 0.5);
    }

    #[test]
    fn overconfident_predictions_get_cooled() {
        // Predicts 0.9 but the event lands 60% of the time.
        let mut graded = Vec::new();
        for i in 0..100 {
            graded.push(Graded {
                p: 0.9,
                hit: i % 5 < 3,
            });
        }
        let (cal, fitted) = fit_temperature(&graded, Calibration::default());
        assert!(cal.temperature > 1.0);
        assert!(fitted.log_loss < evaluate(&graded).log_loss);
    }

    #[test]
    fn bins_cover_unit_interval() {
        let graded = vec![
            Graded { p: 0.05, hit: false },
            Graded { p: 0.95, hit: true },
            Graded { p: 1.0, hit: true },
        ];
        let bins = calibration_bins(&graded, 10);
        assert_eq!(bins.len(), 10);
        assert_eq!(bins[0].count, 1);
        assert_eq!(bins[9].count, 2);
        assert_eq!(bins[9].actual_rate, 1.0);
    }
}
