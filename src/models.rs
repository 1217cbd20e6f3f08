use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Highest score an evaluation can carry.
pub const MAX_SCORE: u8 = 15;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub id: Uuid,
    pub title: String,
    #[serde(default)]
    pub term: String,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Student {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub section_ids: Vec<Uuid>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Student {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name).trim().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub id: Uuid,
    pub student_id: Uuid,
    pub case_id: Uuid,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub hints: Option<u32>,
    #[serde(default)]
    pub helpful: Option<f64>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub allow_rechat: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Case {
    pub id: Uuid,
    pub title: String,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseChat {
    pub id: Uuid,
    pub student_id: Uuid,
    pub case_id: Uuid,
    #[serde(default)]
    pub persona: Option<String>,
    #[serde(default)]
    pub initial_position: Option<String>,
    #[serde(default)]
    pub final_position: Option<String>,
    pub created_at: DateTime<Utc>,
}

fn enabled_by_default() -> bool {
    true
}

/// Everything the aggregator and the results view read in one pass.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub sections: Vec<Section>,
    pub students: Vec<Student>,
    pub evaluations: Vec<Evaluation>,
    pub cases: Vec<Case>,
    pub chats: Vec<CaseChat>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trend {
    Up,
    Down,
    Flat,
}

impl Trend {
    pub fn symbol(self) -> &'static str {
        match self {
            Trend::Up => "▲",
            Trend::Down => "▼",
            Trend::Flat => "▬",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WeeklyDelta {
    pub this_week: usize,
    pub prior_week: usize,
    pub trend: Trend,
}

impl WeeklyDelta {
    pub fn delta(&self) -> i64 {
        self.this_week as i64 - self.prior_week as i64
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OverallStats {
    pub section_count: usize,
    pub student_count: usize,
    pub completions: usize,
    pub avg_score: Option<f64>,
    pub avg_hints: Option<f64>,
    pub avg_helpful: Option<f64>,
    pub completion_rate: f64,
    pub weekly: WeeklyDelta,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SectionPerformance {
    pub section_id: Uuid,
    pub title: String,
    pub term: String,
    pub student_count: usize,
    pub completed_count: usize,
    pub avg_score: Option<f64>,
    pub avg_hints: Option<f64>,
    pub avg_helpful: Option<f64>,
    pub completion_rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
    Unrated,
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Difficulty::Easy => "Easy",
            Difficulty::Medium => "Medium",
            Difficulty::Hard => "Hard",
            Difficulty::Unrated => "—",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CasePerformance {
    pub case_id: Uuid,
    pub title: String,
    pub attempts: usize,
    pub student_count: usize,
    pub avg_score: Option<f64>,
    pub avg_hints: Option<f64>,
    pub avg_helpful: Option<f64>,
    pub completion_rate: f64,
    pub difficulty: Difficulty,
}

/// Counts of evaluations per integer score, indexed 0 through 15.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreDistribution {
    pub buckets: [usize; MAX_SCORE as usize + 1],
}

impl ScoreDistribution {
    pub fn total(&self) -> usize {
        self.buckets.iter().sum()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Dashboard {
    pub generated_at: DateTime<Utc>,
    pub range: crate::filter::DateRange,
    pub overall: OverallStats,
    pub sections: Vec<SectionPerformance>,
    pub cases: Vec<CasePerformance>,
    pub distribution: ScoreDistribution,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Completed,
    InProgress,
    NotStarted,
}

impl ResultStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ResultStatus::Completed => "completed",
            ResultStatus::InProgress => "in_progress",
            ResultStatus::NotStarted => "not_started",
        }
    }
}

impl fmt::Display for ResultStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResultStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "completed" => Ok(ResultStatus::Completed),
            "in_progress" => Ok(ResultStatus::InProgress),
            "not_started" => Ok(ResultStatus::NotStarted),
            other => Err(format!("unknown status '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRow {
    pub student_id: Uuid,
    pub student_name: String,
    pub section_title: String,
    #[serde(default)]
    pub section_ids: Vec<Uuid>,
    pub case_id: Uuid,
    pub case_title: String,
    pub status: ResultStatus,
    #[serde(default)]
    pub initial_position: Option<String>,
    #[serde(default)]
    pub final_position: Option<String>,
    #[serde(default)]
    pub persona: Option<String>,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub hints: Option<u32>,
    #[serde(default)]
    pub helpful: Option<f64>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub evaluation_id: Option<Uuid>,
    #[serde(default)]
    pub allow_rechat: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultsSummary {
    pub total: usize,
    pub completed: usize,
    pub in_progress: usize,
    pub not_started: usize,
    pub avg_score: Option<f64>,
    pub avg_hints: Option<f64>,
    pub avg_helpful: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultsPage {
    pub summary: ResultsSummary,
    pub rows: Vec<ResultRow>,
    pub total_rows: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterOptions {
    pub sections: Vec<Section>,
    pub cases: Vec<Case>,
}
