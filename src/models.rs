use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Coarse performance label attached to a grade record. Stored as Spanish
/// lowercase text (`bajo` / `medio` / `alto`), which is also the wire form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PerformanceBand {
    #[serde(rename = "bajo")]
    Low,
    #[serde(rename = "medio")]
    Medium,
    #[serde(rename = "alto")]
    High,
}

impl PerformanceBand {
    pub fn from_text(text: &str) -> Self {
        match text {
            "bajo" => PerformanceBand::Low,
            "medio" => PerformanceBand::Medium,
            _ => PerformanceBand::High,
        }
    }
}

/// Ordinal encoding used as a regression feature. A missing band encodes as
/// the highest ordinal, matching the stored data's historical convention.
pub fn band_ordinal(band: Option<PerformanceBand>) -> f64 {
    match band {
        Some(PerformanceBand::Low) => 0.0,
        Some(PerformanceBand::Medium) => 1.0,
        _ => 2.0,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GradeRecord {
    pub id: i64,
    #[serde(rename = "estudiante_id")]
    pub student_id: i64,
    #[serde(rename = "curso_materia_id")]
    pub course_offering_id: i64,
    #[serde(rename = "valor")]
    pub value: i32,
    #[serde(rename = "descripcion")]
    pub description: Option<String>,
    #[serde(rename = "rendimiento")]
    pub band: Option<PerformanceBand>,
    #[serde(rename = "fecha")]
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttendanceRecord {
    pub id: i64,
    #[serde(rename = "estudiante_id")]
    pub student_id: i64,
    #[serde(rename = "curso_materia_id")]
    pub course_offering_id: i64,
    #[serde(rename = "valor")]
    pub present: bool,
    #[serde(rename = "fecha")]
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParticipationRecord {
    pub id: i64,
    #[serde(rename = "estudiante_id")]
    pub student_id: i64,
    #[serde(rename = "curso_materia_id")]
    pub course_offering_id: i64,
    #[serde(rename = "participacion_clase")]
    pub level: Option<String>,
    #[serde(rename = "observacion")]
    pub note: Option<String>,
    #[serde(rename = "fecha")]
    pub recorded_at: DateTime<Utc>,
}

/// Public profile fields returned alongside a forecast.
#[derive(Debug, Clone, Serialize)]
pub struct StudentProfile {
    pub id: i64,
    #[serde(rename = "usuario_id")]
    pub user_id: i64,
    #[serde(rename = "nombre")]
    pub first_name: String,
    #[serde(rename = "apellido")]
    pub last_name: String,
    pub email: String,
    #[serde(rename = "direccion")]
    pub address: Option<String>,
    #[serde(rename = "fecha_nacimiento")]
    pub date_of_birth: Option<DateTime<Utc>>,
}

/// Output of one estimator call. Never persisted; lives only in the response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Forecast {
    #[serde(rename = "prediccion_nota")]
    pub predicted_grade: Option<i32>,
    #[serde(rename = "prediccion_asistencia")]
    pub predicted_attendance: bool,
    #[serde(rename = "prediccion_participacion")]
    pub predicted_participation: bool,
    #[serde(rename = "confianza_nota")]
    pub grade_confidence: f64,
    #[serde(rename = "confianza_asistencia")]
    pub attendance_confidence: f64,
    #[serde(rename = "confianza_participacion")]
    pub participation_confidence: f64,
    #[serde(rename = "ultimas_notas")]
    pub recent_grades: Vec<GradeRecord>,
    #[serde(rename = "ultimas_asistencias")]
    pub recent_attendance: Vec<AttendanceRecord>,
    #[serde(rename = "ultimas_participaciones")]
    pub recent_participation: Vec<ParticipationRecord>,
}

#[derive(Debug, Deserialize)]
pub struct PredictRequest {
    #[serde(rename = "estudiante_id")]
    pub student_id: i64,
}

/// Full wire response for the prediction endpoint.
#[derive(Debug, Serialize)]
pub struct ForecastResponse {
    #[serde(rename = "estudiante")]
    pub student: StudentProfile,
    #[serde(flatten)]
    pub forecast: Forecast,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn band_parses_known_labels_and_defaults_high() {
        assert_eq!(PerformanceBand::from_text("bajo"), PerformanceBand::Low);
        assert_eq!(PerformanceBand::from_text("medio"), PerformanceBand::Medium);
        assert_eq!(PerformanceBand::from_text("alto"), PerformanceBand::High);
        assert_eq!(PerformanceBand::from_text("???"), PerformanceBand::High);
    }

    #[test]
    fn band_ordinal_matches_encoding() {
        assert_eq!(band_ordinal(Some(PerformanceBand::Low)), 0.0);
        assert_eq!(band_ordinal(Some(PerformanceBand::Medium)), 1.0);
        assert_eq!(band_ordinal(Some(PerformanceBand::High)), 2.0);
        assert_eq!(band_ordinal(None), 2.0);
    }

    #[test]
    fn forecast_serializes_with_wire_field_names() {
        let forecast = Forecast {
            predicted_grade: Some(71),
            predicted_attendance: true,
            predicted_participation: false,
            grade_confidence: 1.0,
            attendance_confidence: 0.8,
            participation_confidence: 0.0,
            recent_grades: vec![GradeRecord {
                id: 1,
                student_id: 42,
                course_offering_id: 7,
                value: 70,
                description: None,
                band: Some(PerformanceBand::Medium),
                recorded_at: Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap(),
            }],
            recent_attendance: vec![],
            recent_participation: vec![],
        };

        let value = serde_json::to_value(&forecast).unwrap();
        assert_eq!(value["prediccion_nota"], 71);
        assert_eq!(value["prediccion_asistencia"], true);
        assert_eq!(value["confianza_participacion"], 0.0);
        assert_eq!(value["ultimas_notas"][0]["valor"], 70);
        assert_eq!(value["ultimas_notas"][0]["rendimiento"], "medio");
        assert!(value["ultimas_asistencias"].as_array().unwrap().is_empty());
    }
}
