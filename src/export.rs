use std::fmt;
use std::io::Write;
use std::path::Path;
use std::str::FromStr;

use anyhow::Context;

use crate::models::ResultRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    Student,
    Section,
    Case,
    Status,
    InitialPosition,
    FinalPosition,
    Persona,
    Score,
    Hints,
    Helpful,
    CompletedAt,
}

impl Column {
    pub const DEFAULT: [Column; 11] = [
        Column::Student,
        Column::Section,
        Column::Case,
        Column::Status,
        Column::InitialPosition,
        Column::FinalPosition,
        Column::Persona,
        Column::Score,
        Column::Hints,
        Column::Helpful,
        Column::CompletedAt,
    ];

    pub fn header(self) -> &'static str {
        match self {
            Column::Student => "Student",
            Column::Section => "Section",
            Column::Case => "Case",
            Column::Status => "Status",
            Column::InitialPosition => "Initial Position",
            Column::FinalPosition => "Final Position",
            Column::Persona => "Persona",
            Column::Score => "Score",
            Column::Hints => "Hints",
            Column::Helpful => "Helpful",
            Column::CompletedAt => "Completed At",
        }
    }

    fn key(self) -> &'static str {
        match self {
            Column::Student => "student",
            Column::Section => "section",
            Column::Case => "case",
            Column::Status => "status",
            Column::InitialPosition => "initial_position",
            Column::FinalPosition => "final_position",
            Column::Persona => "persona",
            Column::Score => "score",
            Column::Hints => "hints",
            Column::Helpful => "helpful",
            Column::CompletedAt => "completed_at",
        }
    }

    pub fn cell(self, row: &ResultRow) -> String {
        match self {
            Column::Student => row.student_name.clone(),
            Column::Section => row.section_title.clone(),
            Column::Case => row.case_title.clone(),
            Column::Status => row.status.to_string(),
            Column::InitialPosition => row.initial_position.clone().unwrap_or_default(),
            Column::FinalPosition => row.final_position.clone().unwrap_or_default(),
            Column::Persona => row.persona.clone().unwrap_or_default(),
            Column::Score => one_decimal(row.score),
            Column::Hints => row.hints.map(|h| h.to_string()).unwrap_or_default(),
            Column::Helpful => one_decimal(row.helpful),
            Column::CompletedAt => row
                .completed_at
                .map(|at| at.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_default(),
        }
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Column {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase().replace('-', "_");
        Column::DEFAULT
            .into_iter()
            .find(|column| column.key() == normalized)
            .ok_or_else(|| format!("unknown column '{value}'"))
    }
}

fn one_decimal(value: Option<f64>) -> String {
    value.map(|v| format!("{v:.1}")).unwrap_or_default()
}

pub fn write_csv<W: Write>(
    writer: W,
    rows: &[ResultRow],
    columns: &[Column],
) -> anyhow::Result<()> {
    let mut out = csv::Writer::from_writer(writer);
    out.write_record(columns.iter().map(|column| column.header()))?;
    for row in rows {
        out.write_record(columns.iter().map(|column| column.cell(row)))?;
    }
    out.flush()?;
    Ok(())
}

pub fn export_to_path(
    path: &Path,
    rows: &[ResultRow],
    columns: &[Column],
) -> anyhow::Result<usize> {
    let file = std::fs::File::create(path)
        .with_context(|| format!("failed to create export file {}", path.display()))?;
    write_csv(file, rows, columns)?;
    tracing::info!(rows = rows.len(), path = %path.display(), "exported results");
    Ok(rows.len())
}
