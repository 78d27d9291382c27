use anyhow::Context;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::{PgPool, Row};

use crate::models::{
    AttendanceRecord, GradeRecord, ParticipationRecord, PerformanceBand, StudentProfile,
};

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn find_student(pool: &PgPool, id: i64) -> Result<Option<StudentProfile>, sqlx::Error> {
    let row = sqlx::query(
        "SELECT id, usuario_id, nombre, apellido, email, direccion, fecha_nacimiento \
         FROM aula_digital.estudiantes WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|row| StudentProfile {
        id: row.get("id"),
        user_id: row.get("usuario_id"),
        first_name: row.get("nombre"),
        last_name: row.get("apellido"),
        email: row.get("email"),
        address: row.get("direccion"),
        date_of_birth: row.get("fecha_nacimiento"),
    }))
}

pub async fn list_grades(pool: &PgPool, student_id: i64) -> Result<Vec<GradeRecord>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT id, estudiante_id, curso_materia_id, valor, descripcion, rendimiento, fecha \
         FROM aula_digital.notas WHERE estudiante_id = $1 ORDER BY fecha",
    )
    .bind(student_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| GradeRecord {
            id: row.get("id"),
            student_id: row.get("estudiante_id"),
            course_offering_id: row.get("curso_materia_id"),
            value: row.get("valor"),
            description: row.get("descripcion"),
            band: row
                .get::<Option<String>, _>("rendimiento")
                .map(|text| PerformanceBand::from_text(&text)),
            recorded_at: row.get("fecha"),
        })
        .collect())
}

pub async fn list_attendance(
    pool: &PgPool,
    student_id: i64,
) -> Result<Vec<AttendanceRecord>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT id, estudiante_id, curso_materia_id, valor, fecha \
         FROM aula_digital.asistencias WHERE estudiante_id = $1 ORDER BY fecha",
    )
    .bind(student_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| AttendanceRecord {
            id: row.get("id"),
            student_id: row.get("estudiante_id"),
            course_offering_id: row.get("curso_materia_id"),
            present: row.get("valor"),
            recorded_at: row.get("fecha"),
        })
        .collect())
}

pub async fn list_participation(
    pool: &PgPool,
    student_id: i64,
) -> Result<Vec<ParticipationRecord>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT id, estudiante_id, curso_materia_id, participacion_clase, observacion, fecha \
         FROM aula_digital.participaciones WHERE estudiante_id = $1 ORDER BY fecha",
    )
    .bind(student_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| ParticipationRecord {
            id: row.get("id"),
            student_id: row.get("estudiante_id"),
            course_offering_id: row.get("curso_materia_id"),
            level: row.get("participacion_clase"),
            note: row.get("observacion"),
            recorded_at: row.get("fecha"),
        })
        .collect())
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let students = vec![
        (42i64, 1042i64, "María", "Quispe", "maria.quispe@auladigital.edu", "Av. Arce 2100"),
        (43i64, 1043i64, "Jorge", "Mamani", "jorge.mamani@auladigital.edu", "Calle Sagárnaga 314"),
        (44i64, 1044i64, "Lucía", "Flores", "lucia.flores@auladigital.edu", "Av. Busch 980"),
    ];

    for (id, user_id, first_name, last_name, email, address) in students {
        sqlx::query(
            r#"
            INSERT INTO aula_digital.estudiantes (id, usuario_id, nombre, apellido, email, direccion)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (email) DO UPDATE
            SET nombre = EXCLUDED.nombre, apellido = EXCLUDED.apellido, direccion = EXCLUDED.direccion
            "#,
        )
        .bind(id)
        .bind(user_id)
        .bind(first_name)
        .bind(last_name)
        .bind(email)
        .bind(address)
        .execute(pool)
        .await?;
    }

    // Explicit ids bypass the BIGSERIAL sequence; bump it so later
    // default-id inserts (the CSV import path) don't collide.
    sqlx::query(
        "SELECT setval(pg_get_serial_sequence('aula_digital.estudiantes', 'id'), \
         (SELECT MAX(id) FROM aula_digital.estudiantes))",
    )
    .execute(pool)
    .await?;

    let grades = vec![
        (42i64, 7i64, 60, Some("Examen parcial"), "bajo", at(2026, 2, 2)?),
        (42, 7, 65, Some("Práctica calificada"), "bajo", at(2026, 2, 12)?),
        (42, 7, 70, Some("Examen parcial"), "medio", at(2026, 2, 22)?),
        (43, 7, 85, None, "alto", at(2026, 2, 5)?),
        (43, 7, 88, None, "alto", at(2026, 2, 15)?),
    ];

    for (student_id, offering_id, value, description, band, recorded_at) in grades {
        sqlx::query(
            r#"
            INSERT INTO aula_digital.notas
            (estudiante_id, curso_materia_id, valor, descripcion, rendimiento, fecha)
            SELECT $1, $2, $3, $4, $5, $6
            WHERE NOT EXISTS (
                SELECT 1 FROM aula_digital.notas
                WHERE estudiante_id = $1 AND curso_materia_id = $2 AND fecha = $6
            )
            "#,
        )
        .bind(student_id)
        .bind(offering_id)
        .bind(value)
        .bind(description)
        .bind(band)
        .bind(recorded_at)
        .execute(pool)
        .await?;
    }

    let attendance = vec![
        (42i64, 7i64, true, at(2026, 2, 2)?),
        (42, 7, true, at(2026, 2, 9)?),
        (42, 7, false, at(2026, 2, 16)?),
        (42, 7, true, at(2026, 2, 23)?),
        (42, 7, true, at(2026, 3, 2)?),
    ];

    for (student_id, offering_id, present, recorded_at) in attendance {
        sqlx::query(
            r#"
            INSERT INTO aula_digital.asistencias (estudiante_id, curso_materia_id, valor, fecha)
            SELECT $1, $2, $3, $4
            WHERE NOT EXISTS (
                SELECT 1 FROM aula_digital.asistencias
                WHERE estudiante_id = $1 AND curso_materia_id = $2 AND fecha = $4
            )
            "#,
        )
        .bind(student_id)
        .bind(offering_id)
        .bind(present)
        .bind(recorded_at)
        .execute(pool)
        .await?;
    }

    let participation = vec![
        (42i64, 7i64, Some("alta"), Some("Expuso en clase"), at(2026, 2, 9)?),
        (42, 7, Some("media"), None, at(2026, 2, 23)?),
        (42, 7, Some("alta"), None, at(2026, 3, 2)?),
    ];

    for (student_id, offering_id, level, note, recorded_at) in participation {
        sqlx::query(
            r#"
            INSERT INTO aula_digital.participaciones
            (estudiante_id, curso_materia_id, participacion_clase, observacion, fecha)
            SELECT $1, $2, $3, $4, $5
            WHERE NOT EXISTS (
                SELECT 1 FROM aula_digital.participaciones
                WHERE estudiante_id = $1 AND curso_materia_id = $2 AND fecha = $5
            )
            "#,
        )
        .bind(student_id)
        .bind(offering_id)
        .bind(level)
        .bind(note)
        .bind(recorded_at)
        .execute(pool)
        .await?;
    }

    Ok(())
}

fn at(year: i32, month: u32, day: u32) -> anyhow::Result<DateTime<Utc>> {
    Utc.with_ymd_and_hms(year, month, day, 8, 0, 0)
        .single()
        .context("invalid seed date")
}

/// Imports grade history from a CSV export. Students are matched by email
/// and created on first sight; duplicate rows (same student, offering, and
/// timestamp) are skipped.
pub async fn import_grades_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        email: String,
        nombre: String,
        apellido: String,
        curso_materia_id: i64,
        valor: i32,
        descripcion: Option<String>,
        rendimiento: Option<String>,
        fecha: DateTime<Utc>,
    }

    let mut reader = csv::Reader::from_path(csv_path)?;
    let mut inserted = 0usize;
    let mut next_user_id: i64 = sqlx::query("SELECT COALESCE(MAX(usuario_id), 2000) AS top FROM aula_digital.estudiantes")
        .fetch_one(pool)
        .await?
        .get::<i64, _>("top");

    for result in reader.deserialize::<CsvRow>() {
        let row = result?;
        next_user_id += 1;

        let student_id: i64 = sqlx::query(
            r#"
            INSERT INTO aula_digital.estudiantes (usuario_id, nombre, apellido, email)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (email) DO UPDATE
            SET nombre = EXCLUDED.nombre, apellido = EXCLUDED.apellido
            RETURNING id
            "#,
        )
        .bind(next_user_id)
        .bind(&row.nombre)
        .bind(&row.apellido)
        .bind(&row.email)
        .fetch_one(pool)
        .await?
        .get("id");

        let result = sqlx::query(
            r#"
            INSERT INTO aula_digital.notas
            (estudiante_id, curso_materia_id, valor, descripcion, rendimiento, fecha)
            SELECT $1, $2, $3, $4, $5, $6
            WHERE NOT EXISTS (
                SELECT 1 FROM aula_digital.notas
                WHERE estudiante_id = $1 AND curso_materia_id = $2 AND fecha = $6
            )
            "#,
        )
        .bind(student_id)
        .bind(row.curso_materia_id)
        .bind(row.valor)
        .bind(&row.descripcion)
        .bind(&row.rendimiento)
        .bind(row.fecha)
        .execute(pool)
        .await?;

        if result.rows_affected() > 0 {
            inserted += 1;
        }
    }

    Ok(inserted)
}
