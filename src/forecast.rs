use chrono::{DateTime, Datelike, Duration, Utc};
use tracing::warn;

use crate::models::{band_ordinal, AttendanceRecord, Forecast, GradeRecord, ParticipationRecord};

const EPS: f64 = 1e-12;

/// Tuning knobs for the estimator, passed explicitly at call time.
#[derive(Debug, Clone)]
pub struct EstimatorSettings {
    /// Maximum number of most-recent records fed to a model.
    pub window: usize,
    pub min_grade_history: usize,
    pub min_attendance_history: usize,
    pub min_participation_history: usize,
    /// Fixed confidence reported by the participation heuristic.
    pub participation_confidence: f64,
}

impl Default for EstimatorSettings {
    fn default() -> Self {
        Self {
            window: 5,
            min_grade_history: 3,
            min_attendance_history: 3,
            min_participation_history: 2,
            participation_confidence: 0.7,
        }
    }
}

/// Computes all three forecasts for one student from their full ascending
/// history. Pure and deterministic; nothing survives past the call.
///
/// `now` is the evaluation instant. The attendance model's synthetic next
/// point takes its weekday from `now + 1 day` rather than from the last
/// record's date; that quirk is part of the preserved behavior, so callers
/// pass the clock in instead of the function reading it.
pub fn estimate(
    grades: &[GradeRecord],
    attendance: &[AttendanceRecord],
    participation: &[ParticipationRecord],
    now: DateTime<Utc>,
    settings: &EstimatorSettings,
) -> Forecast {
    let mut forecast = Forecast {
        predicted_grade: None,
        predicted_attendance: false,
        predicted_participation: false,
        grade_confidence: 0.0,
        attendance_confidence: 0.0,
        participation_confidence: 0.0,
        recent_grades: recency_window(grades, settings.window).to_vec(),
        recent_attendance: recency_window(attendance, settings.window).to_vec(),
        recent_participation: recency_window(participation, settings.window).to_vec(),
    };

    if grades.len() >= settings.min_grade_history {
        if let Some((value, fit)) = forecast_grade(grades, settings) {
            forecast.predicted_grade = Some(value);
            forecast.grade_confidence = fit;
        }
    }

    if attendance.len() >= settings.min_attendance_history {
        if let Some((present, fit)) = forecast_attendance(attendance, now, settings) {
            forecast.predicted_attendance = present;
            forecast.attendance_confidence = fit;
        }
    }

    if participation.len() >= settings.min_participation_history {
        let window = recency_window(participation, settings.window);
        // Windows of size 3..=5 predict participation; a window of exactly 2
        // clears the history gate but still predicts false with confidence 0.
        if window.len() > 2 {
            forecast.predicted_participation = true;
            forecast.participation_confidence = settings.participation_confidence;
        }
    }

    forecast
}

/// Last `window` elements, still ascending by timestamp.
fn recency_window<T>(records: &[T], window: usize) -> &[T] {
    &records[records.len().saturating_sub(window)..]
}

/// Fits a least-squares model on the recency window and extrapolates one day
/// past the most recent record. Returns the rounded prediction and the
/// in-sample R² (optimistic by construction; there is no held-out data).
fn forecast_grade(grades: &[GradeRecord], settings: &EstimatorSettings) -> Option<(i32, f64)> {
    let window = recency_window(grades, settings.window);
    let first = window[0].recorded_at;

    let rows: Vec<[f64; 2]> = window
        .iter()
        .map(|g| {
            [
                (g.recorded_at - first).num_days() as f64,
                band_ordinal(g.band),
            ]
        })
        .collect();
    let targets: Vec<f64> = window.iter().map(|g| f64::from(g.value)).collect();

    let scaler = Scaler::fit(&rows);
    let scaled: Vec<[f64; 2]> = rows.iter().map(|r| scaler.transform(r)).collect();

    let model = match LinearModel::fit(&scaled, &targets, &scaler.informative) {
        Some(model) => model,
        None => {
            warn!(samples = window.len(), "degenerate grade fit, omitting forecast");
            return None;
        }
    };

    let last = &rows[rows.len() - 1];
    let next = scaler.transform(&[last[0] + 1.0, last[1]]);
    let predicted = model.predict(&next).round() as i32;

    let fitted: Vec<f64> = scaled.iter().map(|r| model.predict(r)).collect();
    Some((predicted, in_sample_fit_score(&targets, &fitted)))
}

/// Fits the attendance classifier on the recency window and classifies the
/// synthetic next point. Confidence is the in-sample accuracy.
fn forecast_attendance(
    attendance: &[AttendanceRecord],
    now: DateTime<Utc>,
    settings: &EstimatorSettings,
) -> Option<(bool, f64)> {
    let window = recency_window(attendance, settings.window);
    let first = window[0].recorded_at;

    let rows: Vec<[f64; 2]> = window
        .iter()
        .map(|a| {
            [
                (a.recorded_at - first).num_days() as f64,
                f64::from(a.recorded_at.weekday().num_days_from_monday()),
            ]
        })
        .collect();
    let labels: Vec<bool> = window.iter().map(|a| a.present).collect();

    let stump = Stump::fit(&rows, &labels)?;

    let tomorrow = now + Duration::days(1);
    let next = [
        rows[rows.len() - 1][0] + 1.0,
        f64::from(tomorrow.weekday().num_days_from_monday()),
    ];

    Some((stump.predict(&next), stump.in_sample_accuracy))
}

/// Column-wise standardization statistics over the training window.
/// Zero-variance columns keep scale 1.0 and are flagged uninformative so the
/// regression leaves them out of the normal system.
struct Scaler {
    means: [f64; 2],
    scales: [f64; 2],
    informative: [bool; 2],
}

impl Scaler {
    fn fit(rows: &[[f64; 2]]) -> Self {
        let n = rows.len() as f64;
        let mut means = [0.0; 2];
        let mut scales = [1.0; 2];
        let mut informative = [false; 2];

        for col in 0..2 {
            means[col] = rows.iter().map(|r| r[col]).sum::<f64>() / n;
            let variance =
                rows.iter().map(|r| (r[col] - means[col]).powi(2)).sum::<f64>() / n;
            let std = variance.sqrt();
            if std > EPS {
                scales[col] = std;
                informative[col] = true;
            }
        }

        Self {
            means,
            scales,
            informative,
        }
    }

    fn transform(&self, row: &[f64; 2]) -> [f64; 2] {
        [
            (row[0] - self.means[0]) / self.scales[0],
            (row[1] - self.means[1]) / self.scales[1],
        ]
    }
}

/// Ordinary least squares with intercept over the informative columns,
/// solved from the normal equations.
struct LinearModel {
    intercept: f64,
    coefficients: [f64; 2],
}

impl LinearModel {
    fn fit(rows: &[[f64; 2]], targets: &[f64], informative: &[bool; 2]) -> Option<Self> {
        let kept: Vec<usize> = (0..2).filter(|&c| informative[c]).collect();
        let dim = kept.len() + 1;

        // gram = X'X, moment = X'y with an implicit leading 1 per row
        let mut gram = vec![vec![0.0; dim]; dim];
        let mut moment = vec![0.0; dim];

        for (row, &y) in rows.iter().zip(targets) {
            let mut design = Vec::with_capacity(dim);
            design.push(1.0);
            design.extend(kept.iter().map(|&c| row[c]));

            for i in 0..dim {
                for j in 0..dim {
                    gram[i][j] += design[i] * design[j];
                }
                moment[i] += design[i] * y;
            }
        }

        let solution = solve(gram, moment)?;

        let mut coefficients = [0.0; 2];
        for (slot, &col) in kept.iter().enumerate() {
            coefficients[col] = solution[slot + 1];
        }

        Some(Self {
            intercept: solution[0],
            coefficients,
        })
    }

    fn predict(&self, row: &[f64; 2]) -> f64 {
        self.intercept + self.coefficients[0] * row[0] + self.coefficients[1] * row[1]
    }
}

/// Gaussian elimination with partial pivoting. None on a singular system.
fn solve(mut matrix: Vec<Vec<f64>>, mut rhs: Vec<f64>) -> Option<Vec<f64>> {
    let n = rhs.len();

    for col in 0..n {
        let pivot = (col..n)
            .max_by(|&a, &b| {
                matrix[a][col]
                    .abs()
                    .partial_cmp(&matrix[b][col].abs())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .unwrap_or(col);
        if matrix[pivot][col].abs() < EPS {
            return None;
        }
        matrix.swap(col, pivot);
        rhs.swap(col, pivot);

        for row in (col + 1)..n {
            let factor = matrix[row][col] / matrix[col][col];
            for k in col..n {
                matrix[row][k] -= factor * matrix[col][k];
            }
            rhs[row] -= factor * rhs[col];
        }
    }

    let mut solution = vec![0.0; n];
    for row in (0..n).rev() {
        let mut value = rhs[row];
        for col in (row + 1)..n {
            value -= matrix[row][col] * solution[col];
        }
        solution[row] = value / matrix[row][row];
    }

    Some(solution)
}

/// R² of fitted values against the training targets, clamped to [0, 1].
/// With no target variance at all, zero residuals count as a perfect fit.
fn in_sample_fit_score(targets: &[f64], fitted: &[f64]) -> f64 {
    let n = targets.len() as f64;
    let mean = targets.iter().sum::<f64>() / n;
    let ss_res: f64 = targets
        .iter()
        .zip(fitted)
        .map(|(y, f)| (y - f).powi(2))
        .sum();
    let ss_tot: f64 = targets.iter().map(|y| (y - mean).powi(2)).sum();

    if ss_tot < EPS {
        if ss_res < 1e-6 {
            1.0
        } else {
            0.0
        }
    } else {
        (1.0 - ss_res / ss_tot).clamp(0.0, 1.0)
    }
}

/// Single best-threshold decision stump over the two features. The smallest
/// deterministic classifier that still yields a meaningful training accuracy;
/// a threshold below the feature minimum doubles as a constant classifier for
/// uniform labels.
struct Stump {
    feature: usize,
    threshold: f64,
    above_is_positive: bool,
    in_sample_accuracy: f64,
}

impl Stump {
    fn fit(rows: &[[f64; 2]], labels: &[bool]) -> Option<Self> {
        if rows.is_empty() {
            return None;
        }

        let mut best: Option<Stump> = None;

        for feature in 0..2 {
            let mut values: Vec<f64> = rows.iter().map(|r| r[feature]).collect();
            values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            values.dedup();

            let mut thresholds = vec![values[0] - 1.0];
            thresholds.extend(values.windows(2).map(|pair| (pair[0] + pair[1]) / 2.0));

            for threshold in thresholds {
                for above_is_positive in [true, false] {
                    let correct = rows
                        .iter()
                        .zip(labels)
                        .filter(|(row, &label)| {
                            ((row[feature] > threshold) == above_is_positive) == label
                        })
                        .count();
                    let accuracy = correct as f64 / rows.len() as f64;

                    let improves = match &best {
                        Some(current) => accuracy > current.in_sample_accuracy,
                        None => true,
                    };
                    if improves {
                        best = Some(Stump {
                            feature,
                            threshold,
                            above_is_positive,
                            in_sample_accuracy: accuracy,
                        });
                    }
                }
            }
        }

        best
    }

    fn predict(&self, row: &[f64; 2]) -> bool {
        (row[self.feature] > self.threshold) == self.above_is_positive
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PerformanceBand;
    use chrono::TimeZone;

    fn day(offset: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 8, 0, 0).unwrap() + Duration::days(offset)
    }

    fn grade(id: i64, value: i32, offset: i64, band: Option<PerformanceBand>) -> GradeRecord {
        GradeRecord {
            id,
            student_id: 42,
            course_offering_id: 7,
            value,
            description: None,
            band,
            recorded_at: day(offset),
        }
    }

    fn attendance(id: i64, present: bool, offset: i64) -> AttendanceRecord {
        AttendanceRecord {
            id,
            student_id: 42,
            course_offering_id: 7,
            present,
            recorded_at: day(offset),
        }
    }

    fn participation(id: i64, offset: i64) -> ParticipationRecord {
        ParticipationRecord {
            id,
            student_id: 42,
            course_offering_id: 7,
            level: Some("alta".to_string()),
            note: None,
            recorded_at: day(offset),
        }
    }

    fn settings() -> EstimatorSettings {
        EstimatorSettings::default()
    }

    fn eval_instant() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 15, 12, 0, 0).unwrap()
    }

    #[test]
    fn empty_history_skips_every_forecast() {
        let forecast = estimate(&[], &[], &[], eval_instant(), &settings());

        assert_eq!(forecast.predicted_grade, None);
        assert!(!forecast.predicted_attendance);
        assert!(!forecast.predicted_participation);
        assert_eq!(forecast.grade_confidence, 0.0);
        assert_eq!(forecast.attendance_confidence, 0.0);
        assert_eq!(forecast.participation_confidence, 0.0);
        assert!(forecast.recent_grades.is_empty());
    }

    #[test]
    fn short_grade_history_returns_records_without_forecast() {
        let grades = vec![grade(1, 60, 0, None), grade(2, 65, 5, None)];
        let forecast = estimate(&grades, &[], &[], eval_instant(), &settings());

        assert_eq!(forecast.predicted_grade, None);
        assert_eq!(forecast.grade_confidence, 0.0);
        assert_eq!(forecast.recent_grades.len(), 2);
    }

    #[test]
    fn identical_grades_predict_the_same_value() {
        let grades = vec![
            grade(1, 70, 0, None),
            grade(2, 70, 5, None),
            grade(3, 70, 9, None),
        ];
        let forecast = estimate(&grades, &[], &[], eval_instant(), &settings());

        assert_eq!(forecast.predicted_grade, Some(70));
        assert_eq!(forecast.grade_confidence, 1.0);
    }

    #[test]
    fn near_linear_grades_extrapolate_the_trend() {
        let grades = vec![
            grade(1, 60, 0, Some(PerformanceBand::Low)),
            grade(2, 65, 10, Some(PerformanceBand::Low)),
            grade(3, 70, 20, Some(PerformanceBand::Medium)),
        ];
        let forecast = estimate(&grades, &[], &[], eval_instant(), &settings());

        let predicted = forecast.predicted_grade.expect("forecast should run");
        assert!((70..=78).contains(&predicted), "predicted {predicted}");
        assert!(forecast.grade_confidence > 0.99);
        assert_eq!(forecast.recent_grades.len(), 3);
    }

    #[test]
    fn collinear_features_omit_the_grade_forecast() {
        // Band ordinal rises in lockstep with the day offset, so the two
        // standardized columns are identical and the normal system singular.
        let grades = vec![
            grade(1, 60, 0, Some(PerformanceBand::Low)),
            grade(2, 65, 10, Some(PerformanceBand::Medium)),
            grade(3, 70, 20, Some(PerformanceBand::High)),
        ];
        let forecast = estimate(&grades, &[], &[], eval_instant(), &settings());

        assert_eq!(forecast.predicted_grade, None);
        assert_eq!(forecast.grade_confidence, 0.0);
        assert_eq!(forecast.recent_grades.len(), 3);
    }

    #[test]
    fn grade_window_keeps_only_the_five_most_recent() {
        let mut grades: Vec<GradeRecord> = (0..12i64)
            .map(|i| grade(i, 50 + i as i32, i * 3, None))
            .collect();
        grades.sort_by_key(|g| g.recorded_at);

        let forecast = estimate(&grades, &[], &[], eval_instant(), &settings());

        assert_eq!(forecast.recent_grades.len(), 5);
        assert_eq!(forecast.recent_grades[0].id, 7);
        assert_eq!(forecast.recent_grades[4].id, 11);
        assert!(forecast.predicted_grade.is_some());
    }

    #[test]
    fn all_present_history_predicts_attendance() {
        let records: Vec<AttendanceRecord> =
            (0..6i64).map(|i| attendance(i, true, i * 2)).collect();
        let forecast = estimate(&[], &records, &[], eval_instant(), &settings());

        assert!(forecast.predicted_attendance);
        assert_eq!(forecast.attendance_confidence, 1.0);
        assert_eq!(forecast.recent_attendance.len(), 5);
    }

    #[test]
    fn all_absent_history_predicts_absence() {
        let records: Vec<AttendanceRecord> =
            (0..4i64).map(|i| attendance(i, false, i * 2)).collect();
        let forecast = estimate(&[], &records, &[], eval_instant(), &settings());

        assert!(!forecast.predicted_attendance);
        assert_eq!(forecast.attendance_confidence, 1.0);
    }

    #[test]
    fn weekday_pattern_drives_the_attendance_forecast() {
        // 2026-03-02 is a Monday. Present every Monday, absent every
        // Thursday; the stump splits on the weekday column.
        let records = vec![
            attendance(1, true, 0),
            attendance(2, false, 3),
            attendance(3, true, 7),
            attendance(4, false, 10),
            attendance(5, true, 14),
        ];
        // Sunday evening: the synthetic next point lands on a Monday.
        let now = Utc.with_ymd_and_hms(2026, 3, 15, 18, 0, 0).unwrap();
        let forecast = estimate(&[], &records, &[], now, &settings());

        assert!(forecast.predicted_attendance);
        assert_eq!(forecast.attendance_confidence, 1.0);
    }

    #[test]
    fn two_participation_records_predict_false_with_zero_confidence() {
        let records = vec![participation(1, 0), participation(2, 4)];
        let forecast = estimate(&[], &[], &records, eval_instant(), &settings());

        assert!(!forecast.predicted_participation);
        assert_eq!(forecast.participation_confidence, 0.0);
        assert_eq!(forecast.recent_participation.len(), 2);
    }

    #[test]
    fn three_participation_records_predict_true() {
        let records = vec![participation(1, 0), participation(2, 4), participation(3, 8)];
        let forecast = estimate(&[], &[], &records, eval_instant(), &settings());

        assert!(forecast.predicted_participation);
        assert_eq!(forecast.participation_confidence, 0.7);
    }

    #[test]
    fn recent_windows_cap_at_five_even_without_forecasts() {
        let participations: Vec<ParticipationRecord> =
            (0..9i64).map(|i| participation(i, i * 2)).collect();
        let attendance_records = vec![attendance(1, true, 0), attendance(2, false, 2)];

        let forecast = estimate(
            &[],
            &attendance_records,
            &participations,
            eval_instant(),
            &settings(),
        );

        // Attendance below the history gate still returns its raw records.
        assert!(!forecast.predicted_attendance);
        assert_eq!(forecast.attendance_confidence, 0.0);
        assert_eq!(forecast.recent_attendance.len(), 2);
        assert_eq!(forecast.recent_participation.len(), 5);
    }

    #[test]
    fn repeated_calls_yield_identical_forecasts() {
        let grades = vec![
            grade(1, 55, 0, Some(PerformanceBand::Low)),
            grade(2, 62, 7, Some(PerformanceBand::Medium)),
            grade(3, 68, 12, Some(PerformanceBand::Medium)),
            grade(4, 71, 19, Some(PerformanceBand::High)),
        ];
        let records: Vec<AttendanceRecord> = (0..5i64)
            .map(|i| attendance(i, i % 2 == 0, i * 2))
            .collect();
        let participations: Vec<ParticipationRecord> =
            (0..4i64).map(|i| participation(i, i * 3)).collect();

        let now = eval_instant();
        let first = estimate(&grades, &records, &participations, now, &settings());
        let second = estimate(&grades, &records, &participations, now, &settings());

        assert_eq!(first, second);
    }
}
