use std::collections::HashMap;

use anyhow::Context;
use chrono::NaiveDate;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::{ExamSummary, MarkEntry, MonthlyExam, RankingRecord};
use crate::ranking::{self, RankingError};

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let batch_id = Uuid::parse_str("8f2c1a34-5b6d-4e7f-9a0b-1c2d3e4f5a6b")?;
    sqlx::query(
        r#"
        INSERT INTO tuition.batches (id, name)
        VALUES ($1, $2)
        ON CONFLICT (name) DO NOTHING
        "#,
    )
    .bind(batch_id)
    .bind("Morning Batch A")
    .execute(pool)
    .await?;

    let students = vec![
        (
            Uuid::parse_str("3d7f5d6f-24f7-4e8e-8b4b-3e7e44b4a7b2")?,
            "Arif Hossain",
            "arif.hossain@example.com",
            "+8801710000001",
        ),
        (
            Uuid::parse_str("0c22f1f1-9184-4fd4-9b21-28c68a6a89dc")?,
            "Bithi Akter",
            "bithi.akter@example.com",
            "+8801710000002",
        ),
        (
            Uuid::parse_str("d5a0a1a2-2a3c-44c2-8f73-60b7897a9dd2")?,
            "Chayan Das",
            "chayan.das@example.com",
            "+8801710000003",
        ),
        (
            Uuid::parse_str("7b8c9d0e-1f2a-43b4-8c5d-6e7f8a9b0c1d")?,
            "Dipa Roy",
            "dipa.roy@example.com",
            "+8801710000004",
        ),
    ];

    for (id, name, email, phone) in &students {
        sqlx::query(
            r#"
            INSERT INTO tuition.students (id, batch_id, full_name, email, guardian_phone)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (email) DO UPDATE
            SET full_name = EXCLUDED.full_name, guardian_phone = EXCLUDED.guardian_phone
            "#,
        )
        .bind(id)
        .bind(batch_id)
        .bind(name)
        .bind(email)
        .bind(phone)
        .execute(pool)
        .await?;
    }

    let january = Uuid::parse_str("a1b2c3d4-0001-4000-8000-000000000001")?;
    let february = Uuid::parse_str("a1b2c3d4-0002-4000-8000-000000000002")?;
    let exams = vec![
        (
            january,
            "January Monthly Exam",
            NaiveDate::from_ymd_opt(2026, 1, 1).context("invalid date")?,
        ),
        (
            february,
            "February Monthly Exam",
            NaiveDate::from_ymd_opt(2026, 2, 1).context("invalid date")?,
        ),
    ];

    for (id, title, exam_month) in &exams {
        sqlx::query(
            r#"
            INSERT INTO tuition.monthly_exams (id, batch_id, title, exam_month)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (batch_id, exam_month) DO NOTHING
            "#,
        )
        .bind(id)
        .bind(batch_id)
        .bind(title)
        .bind(exam_month)
        .execute(pool)
        .await?;
    }

    // (monthly exam, subject test, student email, marks)
    let marks = vec![
        (january, "Algebra Test", "arif.hossain@example.com", 50.0),
        (january, "Geometry Test", "arif.hossain@example.com", 40.0),
        (january, "Algebra Test", "bithi.akter@example.com", 45.0),
        (january, "Geometry Test", "bithi.akter@example.com", 45.0),
        (january, "Algebra Test", "chayan.das@example.com", 30.0),
        (january, "Geometry Test", "chayan.das@example.com", 40.0),
        (february, "Algebra Test", "arif.hossain@example.com", 80.0),
        (february, "Algebra Test", "chayan.das@example.com", 95.0),
        (february, "Algebra Test", "dipa.roy@example.com", 60.0),
    ];

    for (monthly_exam_id, exam_title, email, obtained) in marks {
        let individual_exam_id: Uuid = sqlx::query(
            r#"
            INSERT INTO tuition.individual_exams (id, monthly_exam_id, title, full_marks)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (monthly_exam_id, title) DO UPDATE SET full_marks = EXCLUDED.full_marks
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(monthly_exam_id)
        .bind(exam_title)
        .bind(100.0f64)
        .fetch_one(pool)
        .await?
        .get("id");

        let student_id: Uuid =
            sqlx::query("SELECT id FROM tuition.students WHERE email = $1")
                .bind(email)
                .fetch_one(pool)
                .await?
                .get("id");

        sqlx::query(
            r#"
            INSERT INTO tuition.marks (id, student_id, individual_exam_id, marks_obtained)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (student_id, individual_exam_id) DO UPDATE
            SET marks_obtained = EXCLUDED.marks_obtained
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(student_id)
        .bind(individual_exam_id)
        .bind(obtained)
        .execute(pool)
        .await?;
    }

    Ok(())
}

pub async fn fetch_monthly_exam(pool: &PgPool, id: Uuid) -> anyhow::Result<MonthlyExam> {
    let row = sqlx::query(
        r#"
        SELECT e.id, e.batch_id, b.name AS batch_name, e.title, e.exam_month
        FROM tuition.monthly_exams e
        JOIN tuition.batches b ON b.id = e.batch_id
        WHERE e.id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .with_context(|| format!("monthly exam {id} not found"))?;

    Ok(MonthlyExam {
        id: row.get("id"),
        batch_id: row.get("batch_id"),
        batch_name: row.get("batch_name"),
        title: row.get("title"),
        exam_month: row.get("exam_month"),
    })
}

async fn fetch_marks(
    tx: &mut sqlx::PgConnection,
    monthly_exam_id: Uuid,
) -> anyhow::Result<Vec<MarkEntry>> {
    let rows = sqlx::query(
        r#"
        SELECT m.student_id, s.full_name, m.individual_exam_id, m.marks_obtained
        FROM tuition.marks m
        JOIN tuition.individual_exams ie ON ie.id = m.individual_exam_id
        JOIN tuition.students s ON s.id = m.student_id
        WHERE ie.monthly_exam_id = $1
        "#,
    )
    .bind(monthly_exam_id)
    .fetch_all(tx)
    .await?;

    let mut marks = Vec::new();
    for row in rows {
        marks.push(MarkEntry {
            student_id: row.get("student_id"),
            student_name: row.get("full_name"),
            individual_exam_id: row.get("individual_exam_id"),
            marks_obtained: row.get("marks_obtained"),
        });
    }
    Ok(marks)
}

/// Roll numbers from the most recent finalized ranking of the batch strictly
/// before `before_month`. Empty when no prior month was finalized.
async fn fetch_prior_finalized_rolls(
    tx: &mut sqlx::PgConnection,
    batch_id: Uuid,
    before_month: NaiveDate,
) -> anyhow::Result<HashMap<Uuid, i32>> {
    let rows = sqlx::query(
        r#"
        SELECT r.student_id, r.roll_number
        FROM tuition.monthly_rankings r
        JOIN tuition.monthly_exams e ON e.id = r.monthly_exam_id
        WHERE r.is_final = TRUE
          AND e.batch_id = $1
          AND e.exam_month = (
              SELECT MAX(e2.exam_month)
              FROM tuition.monthly_exams e2
              JOIN tuition.monthly_rankings r2 ON r2.monthly_exam_id = e2.id
              WHERE e2.batch_id = $1
                AND e2.exam_month < $2
                AND r2.is_final = TRUE
          )
        "#,
    )
    .bind(batch_id)
    .bind(before_month)
    .fetch_all(tx)
    .await?;

    let mut rolls = HashMap::new();
    for row in rows {
        rolls.insert(row.get("student_id"), row.get("roll_number"));
    }
    Ok(rolls)
}

async fn is_finalized(
    tx: &mut sqlx::PgConnection,
    monthly_exam_id: Uuid,
) -> anyhow::Result<bool> {
    let finalized: bool = sqlx::query(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM tuition.monthly_rankings
            WHERE monthly_exam_id = $1 AND is_final = TRUE
        ) AS finalized
        "#,
    )
    .bind(monthly_exam_id)
    .fetch_one(tx)
    .await?
    .get("finalized");
    Ok(finalized)
}

/// Compute and store the draft ranking for one monthly exam.
///
/// The whole read-compute-write sequence runs inside a single transaction so
/// a concurrent run over the same exam cannot interleave with it, and a
/// failure leaves the stored draft untouched. Rejects finalized exams.
/// No marks at all yields an empty list without writing anything.
pub async fn generate_ranking(
    pool: &PgPool,
    monthly_exam_id: Uuid,
) -> anyhow::Result<Vec<RankingRecord>> {
    let exam = fetch_monthly_exam(pool, monthly_exam_id).await?;
    let mut tx = pool.begin().await?;

    if is_finalized(&mut tx, monthly_exam_id).await? {
        return Err(RankingError::AlreadyFinalized(monthly_exam_id).into());
    }

    let marks = fetch_marks(&mut tx, monthly_exam_id).await?;
    if marks.is_empty() {
        return Ok(Vec::new());
    }

    let prior_rolls =
        fetch_prior_finalized_rolls(&mut tx, exam.batch_id, exam.exam_month).await?;
    let records = ranking::compute_ranking(&marks, &prior_rolls);

    sqlx::query(
        "DELETE FROM tuition.monthly_rankings WHERE monthly_exam_id = $1 AND is_final = FALSE",
    )
    .bind(monthly_exam_id)
    .execute(&mut *tx)
    .await?;

    for record in &records {
        sqlx::query(
            r#"
            INSERT INTO tuition.monthly_rankings
            (monthly_exam_id, student_id, total_marks, position, roll_number, is_final)
            VALUES ($1, $2, $3, $4, $5, FALSE)
            "#,
        )
        .bind(monthly_exam_id)
        .bind(record.student_id)
        .bind(record.total_marks)
        .bind(record.position)
        .bind(record.roll_number)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(records)
}

/// Lock the draft ranking as immutable history. All-or-nothing: every row of
/// the set flips to final inside one transaction.
pub async fn finalize_ranking(pool: &PgPool, monthly_exam_id: Uuid) -> anyhow::Result<u64> {
    let mut tx = pool.begin().await?;

    if is_finalized(&mut tx, monthly_exam_id).await? {
        return Err(RankingError::AlreadyFinalized(monthly_exam_id).into());
    }

    let updated = sqlx::query(
        "UPDATE tuition.monthly_rankings SET is_final = TRUE WHERE monthly_exam_id = $1",
    )
    .bind(monthly_exam_id)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    if updated == 0 {
        return Err(RankingError::NoDraft(monthly_exam_id).into());
    }

    tx.commit().await?;
    Ok(updated)
}

pub async fn fetch_ranking(
    pool: &PgPool,
    monthly_exam_id: Uuid,
) -> anyhow::Result<Vec<RankingRecord>> {
    let rows = sqlx::query(
        r#"
        SELECT r.student_id, s.full_name, r.total_marks, r.position, r.roll_number, r.is_final
        FROM tuition.monthly_rankings r
        JOIN tuition.students s ON s.id = r.student_id
        WHERE r.monthly_exam_id = $1
        ORDER BY r.position ASC, r.roll_number ASC
        "#,
    )
    .bind(monthly_exam_id)
    .fetch_all(pool)
    .await?;

    let mut records = Vec::new();
    for row in rows {
        records.push(RankingRecord {
            student_id: row.get("student_id"),
            student_name: row.get("full_name"),
            total_marks: row.get("total_marks"),
            position: row.get("position"),
            roll_number: row.get("roll_number"),
            is_final: row.get("is_final"),
        });
    }
    Ok(records)
}

pub async fn fetch_exam_summaries(
    pool: &PgPool,
    monthly_exam_id: Uuid,
) -> anyhow::Result<Vec<ExamSummary>> {
    let rows = sqlx::query(
        r#"
        SELECT ie.title, ie.full_marks,
               COUNT(m.id) AS entry_count,
               COALESCE(AVG(m.marks_obtained), 0) AS avg_marks,
               COALESCE(MAX(m.marks_obtained), 0) AS highest_marks
        FROM tuition.individual_exams ie
        LEFT JOIN tuition.marks m ON m.individual_exam_id = ie.id
        WHERE ie.monthly_exam_id = $1
        GROUP BY ie.id, ie.title, ie.full_marks
        ORDER BY ie.title
        "#,
    )
    .bind(monthly_exam_id)
    .fetch_all(pool)
    .await?;

    let mut summaries = Vec::new();
    for row in rows {
        let entry_count: i64 = row.get("entry_count");
        summaries.push(ExamSummary {
            title: row.get("title"),
            full_marks: row.get("full_marks"),
            entry_count: entry_count as usize,
            avg_marks: row.get("avg_marks"),
            highest_marks: row.get("highest_marks"),
        });
    }
    Ok(summaries)
}

pub async fn import_marks_csv(
    pool: &PgPool,
    monthly_exam_id: Uuid,
    csv_path: &std::path::Path,
) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        full_name: String,
        email: String,
        guardian_phone: Option<String>,
        individual_exam: String,
        full_marks: Option<f64>,
        marks_obtained: f64,
    }

    let exam = fetch_monthly_exam(pool, monthly_exam_id).await?;
    let mut reader = csv::Reader::from_path(csv_path)?;
    let mut imported = 0usize;

    for result in reader.deserialize::<CsvRow>() {
        let row = result?;
        let student_id: Uuid = sqlx::query(
            r#"
            INSERT INTO tuition.students (id, batch_id, full_name, email, guardian_phone)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (email) DO UPDATE
            SET full_name = EXCLUDED.full_name,
                guardian_phone = COALESCE(EXCLUDED.guardian_phone, tuition.students.guardian_phone)
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(exam.batch_id)
        .bind(&row.full_name)
        .bind(&row.email)
        .bind(&row.guardian_phone)
        .fetch_one(pool)
        .await?
        .get("id");

        let individual_exam_id: Uuid = sqlx::query(
            r#"
            INSERT INTO tuition.individual_exams (id, monthly_exam_id, title, full_marks)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (monthly_exam_id, title) DO UPDATE SET full_marks = EXCLUDED.full_marks
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(monthly_exam_id)
        .bind(&row.individual_exam)
        .bind(row.full_marks.unwrap_or(100.0))
        .fetch_one(pool)
        .await?
        .get("id");

        let result = sqlx::query(
            r#"
            INSERT INTO tuition.marks (id, student_id, individual_exam_id, marks_obtained)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (student_id, individual_exam_id) DO UPDATE
            SET marks_obtained = EXCLUDED.marks_obtained
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(student_id)
        .bind(individual_exam_id)
        .bind(row.marks_obtained)
        .execute(pool)
        .await?;

        if result.rows_affected() > 0 {
            imported += 1;
        }
    }

    Ok(imported)
}
