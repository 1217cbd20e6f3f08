use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::{Case, CaseChat, Evaluation, Section, Snapshot, Student, MAX_SCORE};

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

const SECTIONS: [(&str, &str, &str, bool); 3] = [
    ("6f1c2a8e-3d4b-4a51-9a0e-1b2c3d4e5f01", "MGMT 410 Strategy", "Fall 2026", true),
    ("6f1c2a8e-3d4b-4a51-9a0e-1b2c3d4e5f02", "MGMT 520 Negotiation", "Fall 2026", true),
    ("6f1c2a8e-3d4b-4a51-9a0e-1b2c3d4e5f03", "MGMT 410 Strategy", "Spring 2026", false),
];

const CASES: [(&str, &str, bool); 3] = [
    ("a2d4f6b8-1c3e-4f5a-8b7c-9d0e1f2a3b01", "Harbor Foods Expansion", true),
    ("a2d4f6b8-1c3e-4f5a-8b7c-9d0e1f2a3b02", "Northwind Pricing Dispute", true),
    ("a2d4f6b8-1c3e-4f5a-8b7c-9d0e1f2a3b03", "Legacy Telecom Turnaround", false),
];

const STUDENTS: [(&str, &str, &str, &str, usize); 6] = [
    ("c7e9a1b3-5d7f-4a9c-8e1f-2a3b4c5d6e01", "Avery", "Lee", "avery.lee@school.edu", 0),
    ("c7e9a1b3-5d7f-4a9c-8e1f-2a3b4c5d6e02", "Jules", "Moreno", "jules.moreno@school.edu", 0),
    ("c7e9a1b3-5d7f-4a9c-8e1f-2a3b4c5d6e03", "Kiara", "Patel", "kiara.patel@school.edu", 0),
    ("c7e9a1b3-5d7f-4a9c-8e1f-2a3b4c5d6e04", "Sam", "Ortiz", "sam.ortiz@school.edu", 1),
    ("c7e9a1b3-5d7f-4a9c-8e1f-2a3b4c5d6e05", "Noor", "Haddad", "noor.haddad@school.edu", 1),
    ("c7e9a1b3-5d7f-4a9c-8e1f-2a3b4c5d6e06", "Mateo", "Silva", "mateo.silva@school.edu", 1),
];

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    for (id, title, term, enabled) in SECTIONS {
        sqlx::query(
            r#"
            INSERT INTO casestudy.sections (id, title, term, enabled)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE
            SET title = EXCLUDED.title, term = EXCLUDED.term, enabled = EXCLUDED.enabled
            "#,
        )
        .bind(Uuid::parse_str(id)?)
        .bind(title)
        .bind(term)
        .bind(enabled)
        .execute(pool)
        .await?;
    }

    for (id, title, enabled) in CASES {
        sqlx::query(
            r#"
            INSERT INTO casestudy.cases (id, title, enabled)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE
            SET title = EXCLUDED.title, enabled = EXCLUDED.enabled
            "#,
        )
        .bind(Uuid::parse_str(id)?)
        .bind(title)
        .bind(enabled)
        .execute(pool)
        .await?;
    }

    for (id, first_name, last_name, email, section) in STUDENTS {
        let student_id = Uuid::parse_str(id)?;
        sqlx::query(
            r#"
            INSERT INTO casestudy.students (id, first_name, last_name, email)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE
            SET first_name = EXCLUDED.first_name,
                last_name = EXCLUDED.last_name,
                email = EXCLUDED.email
            "#,
        )
        .bind(student_id)
        .bind(first_name)
        .bind(last_name)
        .bind(email)
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO casestudy.student_sections (student_id, section_id)
            VALUES ($1, $2)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(student_id)
        .bind(Uuid::parse_str(SECTIONS[section].0)?)
        .execute(pool)
        .await?;
    }

    let now = Utc::now();
    let evaluations = [
        ("seed-eval-001", 0, 0, Some(13.0), Some(1), Some(4.5), 2),
        ("seed-eval-002", 1, 0, Some(9.0), Some(3), Some(4.0), 5),
        ("seed-eval-003", 3, 0, Some(6.5), Some(5), None, 9),
        ("seed-eval-004", 4, 1, Some(11.0), Some(2), Some(3.5), 12),
        ("seed-eval-005", 0, 1, None, None, Some(5.0), 40),
    ];

    for (source_key, student, case, score, hints, helpful, days_ago) in evaluations {
        sqlx::query(
            r#"
            INSERT INTO casestudy.evaluations
            (id, student_id, case_id, score, hints, helpful, created_at, source_key)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (source_key) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(Uuid::parse_str(STUDENTS[student].0)?)
        .bind(Uuid::parse_str(CASES[case].0)?)
        .bind(score)
        .bind(hints)
        .bind(helpful)
        .bind(now - Duration::days(days_ago))
        .bind(source_key)
        .execute(pool)
        .await?;
    }

    let chat_exists: bool =
        sqlx::query("SELECT EXISTS (SELECT 1 FROM casestudy.case_chats) AS present")
            .fetch_one(pool)
            .await?
            .try_get("present")?;

    if !chat_exists {
        let chats = [
            (0, 0, "Skeptical CFO", "Expand to the north", "Delay expansion", 2),
            (1, 0, "Supportive COO", "Delay expansion", "Delay expansion", 5),
            (2, 0, "Skeptical CFO", "Expand to the north", "", 0),
            (5, 1, "Union representative", "Hold prices", "", 1),
        ];
        for (student, case, persona, initial, final_position, days_ago) in chats {
            sqlx::query(
                r#"
                INSERT INTO casestudy.case_chats
                (id, student_id, case_id, persona, initial_position, final_position, created_at)
                VALUES ($1, $2, $3, $4, $5, NULLIF($6, ''), $7)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(Uuid::parse_str(STUDENTS[student].0)?)
            .bind(Uuid::parse_str(CASES[case].0)?)
            .bind(persona)
            .bind(initial)
            .bind(final_position)
            .bind(now - Duration::days(days_ago))
            .execute(pool)
            .await?;
        }
    }

    Ok(())
}

fn section_from_row(row: &PgRow) -> Result<Section, sqlx::Error> {
    Ok(Section {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        term: row.try_get("term")?,
        enabled: row.try_get("enabled")?,
    })
}

fn student_from_row(row: &PgRow) -> Result<Student, sqlx::Error> {
    Ok(Student {
        id: row.try_get("id")?,
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
        email: row.try_get("email")?,
        section_ids: row.try_get("section_ids")?,
        completed_at: row.try_get("completed_at")?,
    })
}

fn evaluation_from_row(row: &PgRow) -> Result<Evaluation, sqlx::Error> {
    let hints: Option<i32> = row.try_get("hints")?;
    Ok(Evaluation {
        id: row.try_get("id")?,
        student_id: row.try_get("student_id")?,
        case_id: row.try_get("case_id")?,
        score: row.try_get("score")?,
        hints: hints.and_then(|h| u32::try_from(h).ok()),
        helpful: row.try_get("helpful")?,
        created_at: row.try_get("created_at")?,
        allow_rechat: row.try_get("allow_rechat")?,
    })
}

fn case_from_row(row: &PgRow) -> Result<Case, sqlx::Error> {
    Ok(Case {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        enabled: row.try_get("enabled")?,
    })
}

fn chat_from_row(row: &PgRow) -> Result<CaseChat, sqlx::Error> {
    Ok(CaseChat {
        id: row.try_get("id")?,
        student_id: row.try_get("student_id")?,
        case_id: row.try_get("case_id")?,
        persona: row.try_get("persona")?,
        initial_position: row.try_get("initial_position")?,
        final_position: row.try_get("final_position")?,
        created_at: row.try_get("created_at")?,
    })
}

pub async fn fetch_snapshot(pool: &PgPool) -> anyhow::Result<Snapshot> {
    let sections = sqlx::query(
        "SELECT id, title, term, enabled FROM casestudy.sections ORDER BY created_at, title",
    )
    .fetch_all(pool)
    .await
    .context("failed to fetch sections")?
    .iter()
    .map(section_from_row)
    .collect::<Result<Vec<_>, _>>()?;

    let students = sqlx::query(
        "SELECT st.id, st.first_name, st.last_name, st.email, st.completed_at, \
         COALESCE(array_agg(ss.section_id) FILTER (WHERE ss.section_id IS NOT NULL), '{}') \
         AS section_ids \
         FROM casestudy.students st \
         LEFT JOIN casestudy.student_sections ss ON ss.student_id = st.id \
         GROUP BY st.id \
         ORDER BY st.last_name, st.first_name",
    )
    .fetch_all(pool)
    .await
    .context("failed to fetch students")?
    .iter()
    .map(student_from_row)
    .collect::<Result<Vec<_>, _>>()?;

    let evaluations = sqlx::query(
        "SELECT id, student_id, case_id, score, hints, helpful, created_at, allow_rechat \
         FROM casestudy.evaluations ORDER BY created_at",
    )
    .fetch_all(pool)
    .await
    .context("failed to fetch evaluations")?
    .iter()
    .map(evaluation_from_row)
    .collect::<Result<Vec<_>, _>>()?;

    let cases = sqlx::query("SELECT id, title, enabled FROM casestudy.cases ORDER BY title")
        .fetch_all(pool)
        .await
        .context("failed to fetch cases")?
        .iter()
        .map(case_from_row)
        .collect::<Result<Vec<_>, _>>()?;

    let chats = sqlx::query(
        "SELECT id, student_id, case_id, persona, initial_position, final_position, created_at \
         FROM casestudy.case_chats ORDER BY created_at",
    )
    .fetch_all(pool)
    .await
    .context("failed to fetch case chats")?
    .iter()
    .map(chat_from_row)
    .collect::<Result<Vec<_>, _>>()?;

    info!(
        sections = sections.len(),
        students = students.len(),
        evaluations = evaluations.len(),
        "loaded snapshot from Postgres"
    );

    Ok(Snapshot {
        sections,
        students,
        evaluations,
        cases,
        chats,
    })
}

pub async fn set_rechat(pool: &PgPool, evaluation_id: Uuid, allow: bool) -> anyhow::Result<bool> {
    let result = sqlx::query("UPDATE casestudy.evaluations SET allow_rechat = $2 WHERE id = $1")
        .bind(evaluation_id)
        .bind(allow)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub inserted: usize,
    pub duplicates: usize,
    pub skipped: usize,
}

#[derive(Debug, serde::Deserialize)]
pub struct CsvRow {
    pub student_email: String,
    pub case_title: String,
    pub score: Option<f64>,
    pub hints: Option<u32>,
    pub helpful: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub source_key: Option<String>,
}

impl CsvRow {
    /// Describes the first out-of-range value, if any.
    pub fn problem(&self) -> Option<String> {
        if let Some(score) = self.score {
            if !(0.0..=f64::from(MAX_SCORE)).contains(&score) {
                return Some(format!("score {score} outside 0-{MAX_SCORE}"));
            }
        }
        if let Some(hints) = self.hints {
            if i32::try_from(hints).is_err() {
                return Some(format!("hint count {hints} is too large"));
            }
        }
        if let Some(helpful) = self.helpful {
            if !(0.0..=5.0).contains(&helpful) {
                return Some(format!("helpful rating {helpful} outside 0-5"));
            }
        }
        None
    }
}

pub async fn import_csv(
    pool: &PgPool,
    csv_path: &std::path::Path,
) -> anyhow::Result<ImportSummary> {
    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let mut summary = ImportSummary::default();

    for (line, result) in reader.deserialize::<CsvRow>().enumerate() {
        let row = result.with_context(|| format!("invalid row {}", line + 2))?;

        if let Some(problem) = row.problem() {
            warn!(line = line + 2, %problem, "skipping row");
            summary.skipped += 1;
            continue;
        }

        let student_id: Option<Uuid> =
            sqlx::query("SELECT id FROM casestudy.students WHERE lower(email) = lower($1)")
                .bind(row.student_email.trim())
                .fetch_optional(pool)
                .await?
                .map(|found| found.try_get("id"))
                .transpose()?;
        let case_id: Option<Uuid> = sqlx::query("SELECT id FROM casestudy.cases WHERE title = $1")
            .bind(row.case_title.trim())
            .fetch_optional(pool)
            .await?
            .map(|found| found.try_get("id"))
            .transpose()?;

        let (Some(student_id), Some(case_id)) = (student_id, case_id) else {
            warn!(
                line = line + 2,
                email = %row.student_email,
                case = %row.case_title,
                "unknown student or case; skipping row"
            );
            summary.skipped += 1;
            continue;
        };

        let source_key = row
            .source_key
            .clone()
            .unwrap_or_else(|| format!("import-{}", Uuid::new_v4()));

        let result = sqlx::query(
            r#"
            INSERT INTO casestudy.evaluations
            (id, student_id, case_id, score, hints, helpful, created_at, source_key)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (source_key) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(student_id)
        .bind(case_id)
        .bind(row.score)
        .bind(row.hints.map(i32::try_from).transpose()?)
        .bind(row.helpful)
        .bind(row.created_at)
        .bind(source_key)
        .execute(pool)
        .await?;

        if result.rows_affected() > 0 {
            summary.inserted += 1;
        } else {
            summary.duplicates += 1;
        }
    }

    Ok(summary)
}
