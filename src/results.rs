use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use uuid::Uuid;

use crate::analytics::mean;
use crate::filter::ResultsFilter;
use crate::models::{
    CaseChat, Evaluation, FilterOptions, ResultRow, ResultStatus, ResultsPage, ResultsSummary,
    Snapshot,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    #[default]
    StudentName,
    SectionTitle,
    CaseTitle,
    Status,
    InitialPosition,
    FinalPosition,
    Persona,
    Score,
    Hints,
    Helpful,
    CompletedAt,
}

impl SortKey {
    pub const ALL: [SortKey; 11] = [
        SortKey::StudentName,
        SortKey::SectionTitle,
        SortKey::CaseTitle,
        SortKey::Status,
        SortKey::InitialPosition,
        SortKey::FinalPosition,
        SortKey::Persona,
        SortKey::Score,
        SortKey::Hints,
        SortKey::Helpful,
        SortKey::CompletedAt,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SortKey::StudentName => "student_name",
            SortKey::SectionTitle => "section_title",
            SortKey::CaseTitle => "case_title",
            SortKey::Status => "status",
            SortKey::InitialPosition => "initial_position",
            SortKey::FinalPosition => "final_position",
            SortKey::Persona => "persona",
            SortKey::Score => "score",
            SortKey::Hints => "hints",
            SortKey::Helpful => "helpful",
            SortKey::CompletedAt => "completed_at",
        }
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SortKey {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase().replace('-', "_");
        SortKey::ALL
            .into_iter()
            .find(|key| key.as_str() == normalized)
            .ok_or_else(|| format!("unknown sort key '{value}'"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
        }
    }
}

impl FromStr for SortDirection {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "asc" | "ascending" => Ok(SortDirection::Asc),
            "desc" | "descending" => Ok(SortDirection::Desc),
            other => Err(format!("unknown sort direction '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResultsQuery {
    pub filter: ResultsFilter,
    pub limit: usize,
    pub offset: usize,
    pub sort: SortKey,
    pub direction: SortDirection,
}

impl Default for ResultsQuery {
    fn default() -> Self {
        Self {
            filter: ResultsFilter::default(),
            limit: 25,
            offset: 0,
            sort: SortKey::default(),
            direction: SortDirection::default(),
        }
    }
}

/// One row per (student, enabled case) for every student enrolled in a known section.
pub fn build_rows(snapshot: &Snapshot) -> Vec<ResultRow> {
    let section_titles: HashMap<Uuid, &str> = snapshot
        .sections
        .iter()
        .filter(|section| section.enabled)
        .map(|section| (section.id, section.title.as_str()))
        .collect();

    let mut latest_evaluation: HashMap<(Uuid, Uuid), &Evaluation> = HashMap::new();
    for evaluation in &snapshot.evaluations {
        let key = (evaluation.student_id, evaluation.case_id);
        let newer = latest_evaluation
            .get(&key)
            .map_or(true, |current| evaluation.created_at >= current.created_at);
        if newer {
            latest_evaluation.insert(key, evaluation);
        }
    }

    let mut latest_chat: HashMap<(Uuid, Uuid), &CaseChat> = HashMap::new();
    for chat in &snapshot.chats {
        let key = (chat.student_id, chat.case_id);
        let newer = latest_chat
            .get(&key)
            .map_or(true, |current| chat.created_at >= current.created_at);
        if newer {
            latest_chat.insert(key, chat);
        }
    }

    let mut rows = Vec::new();
    for student in &snapshot.students {
        let titles: Vec<&str> = student
            .section_ids
            .iter()
            .filter_map(|id| section_titles.get(id).copied())
            .collect();
        if titles.is_empty() {
            continue;
        }
        let section_title = titles.join(", ");

        for case in snapshot.cases.iter().filter(|case| case.enabled) {
            let key = (student.id, case.id);
            let evaluation = latest_evaluation.get(&key).copied();
            let chat = latest_chat.get(&key).copied();
            let status = match (evaluation, chat) {
                (Some(_), _) => ResultStatus::Completed,
                (None, Some(_)) => ResultStatus::InProgress,
                (None, None) => ResultStatus::NotStarted,
            };

            rows.push(ResultRow {
                student_id: student.id,
                student_name: student.full_name(),
                section_title: section_title.clone(),
                section_ids: student.section_ids.clone(),
                case_id: case.id,
                case_title: case.title.clone(),
                status,
                initial_position: chat.and_then(|c| c.initial_position.clone()),
                final_position: chat.and_then(|c| c.final_position.clone()),
                persona: chat.and_then(|c| c.persona.clone()),
                score: evaluation.and_then(|e| e.score),
                hints: evaluation.and_then(|e| e.hints),
                helpful: evaluation.and_then(|e| e.helpful),
                completed_at: evaluation.map(|e| e.created_at),
                evaluation_id: evaluation.map(|e| e.id),
                allow_rechat: evaluation.is_some_and(|e| e.allow_rechat),
            });
        }
    }

    rows
}

pub fn summarize(rows: &[&ResultRow]) -> ResultsSummary {
    let count = |status: ResultStatus| rows.iter().filter(|row| row.status == status).count();

    ResultsSummary {
        total: rows.len(),
        completed: count(ResultStatus::Completed),
        in_progress: count(ResultStatus::InProgress),
        not_started: count(ResultStatus::NotStarted),
        avg_score: mean(rows.iter().filter_map(|row| row.score)),
        avg_hints: mean(rows.iter().filter_map(|row| row.hints.map(f64::from))),
        avg_helpful: mean(rows.iter().filter_map(|row| row.helpful)),
    }
}

fn compare_folded(a: &str, b: &str) -> Ordering {
    a.to_lowercase().cmp(&b.to_lowercase())
}

fn compare_text(a: &Option<String>, b: &Option<String>) -> Option<Ordering> {
    match (a, b) {
        (Some(a), Some(b)) => Some(compare_folded(a, b)),
        _ => None,
    }
}

fn compare_float(a: Option<f64>, b: Option<f64>) -> Option<Ordering> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.partial_cmp(&b).unwrap_or(Ordering::Equal)),
        _ => None,
    }
}

fn present(row: &ResultRow, key: SortKey) -> bool {
    match key {
        SortKey::InitialPosition => row.initial_position.is_some(),
        SortKey::FinalPosition => row.final_position.is_some(),
        SortKey::Persona => row.persona.is_some(),
        SortKey::Score => row.score.is_some(),
        SortKey::Hints => row.hints.is_some(),
        SortKey::Helpful => row.helpful.is_some(),
        SortKey::CompletedAt => row.completed_at.is_some(),
        SortKey::StudentName | SortKey::SectionTitle | SortKey::CaseTitle | SortKey::Status => true,
    }
}

fn compare_present(a: &ResultRow, b: &ResultRow, key: SortKey) -> Ordering {
    let ordering = match key {
        SortKey::StudentName => Some(compare_folded(&a.student_name, &b.student_name)),
        SortKey::SectionTitle => Some(compare_folded(&a.section_title, &b.section_title)),
        SortKey::CaseTitle => Some(compare_folded(&a.case_title, &b.case_title)),
        SortKey::Status => Some(a.status.as_str().cmp(b.status.as_str())),
        SortKey::InitialPosition => compare_text(&a.initial_position, &b.initial_position),
        SortKey::FinalPosition => compare_text(&a.final_position, &b.final_position),
        SortKey::Persona => compare_text(&a.persona, &b.persona),
        SortKey::Score => compare_float(a.score, b.score),
        SortKey::Hints => a.hints.zip(b.hints).map(|(a, b)| a.cmp(&b)),
        SortKey::Helpful => compare_float(a.helpful, b.helpful),
        SortKey::CompletedAt => a.completed_at.zip(b.completed_at).map(|(a, b)| a.cmp(&b)),
    };
    ordering.unwrap_or(Ordering::Equal)
}

/// Sorts in place; rows missing the sort value go last in either direction.
pub fn sort_rows(rows: &mut [&ResultRow], key: SortKey, direction: SortDirection) {
    rows.sort_by(|a, b| match (present(a, key), present(b, key)) {
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => Ordering::Equal,
        (true, true) => {
            let ordering = compare_present(a, b, key);
            match direction {
                SortDirection::Asc => ordering,
                SortDirection::Desc => ordering.reverse(),
            }
        }
    });
}

pub fn run_query(rows: &[ResultRow], query: &ResultsQuery) -> ResultsPage {
    let mut matched = query.filter.apply(rows);
    sort_rows(&mut matched, query.sort, query.direction);

    let summary = summarize(&matched);
    let total_rows = matched.len();
    let page = matched
        .into_iter()
        .skip(query.offset)
        .take(query.limit.max(1))
        .cloned()
        .collect();

    ResultsPage {
        summary,
        rows: page,
        total_rows,
    }
}

pub fn filter_options(snapshot: &Snapshot) -> FilterOptions {
    let mut sections: Vec<_> = snapshot.sections.iter().filter(|s| s.enabled).cloned().collect();
    sections.sort_by(|a, b| a.title.cmp(&b.title));
    let mut cases: Vec<_> = snapshot.cases.iter().filter(|c| c.enabled).cloned().collect();
    cases.sort_by(|a, b| a.title.cmp(&b.title));
    FilterOptions { sections, cases }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::Selection;
    use crate::models::{Case, Section, Student};
    use chrono::{Duration, Utc};

    fn fixture() -> Snapshot {
        let section = Section {
            id: Uuid::new_v4(),
            title: "MGMT 410".to_string(),
            term: "Fall 2026".to_string(),
            enabled: true,
        };
        let case = Case {
            id: Uuid::new_v4(),
            title: "Harbor Foods".to_string(),
            enabled: true,
        };
        let hidden_case = Case {
            id: Uuid::new_v4(),
            title: "Retired Case".to_string(),
            enabled: false,
        };
        let names = [("Avery", "Lee"), ("Jules", "Moreno"), ("Kiara", "Patel")];
        let students: Vec<Student> = names
            .iter()
            .map(|(first, last)| Student {
                id: Uuid::new_v4(),
                first_name: first.to_string(),
                last_name: last.to_string(),
                email: None,
                section_ids: vec![section.id],
                completed_at: None,
            })
            .collect();
        let unenrolled = Student {
            id: Uuid::new_v4(),
            first_name: "Sam".to_string(),
            last_name: "Ortiz".to_string(),
            email: None,
            section_ids: vec![Uuid::new_v4()],
            completed_at: None,
        };

        let now = Utc::now();
        let evaluations = vec![
            Evaluation {
                id: Uuid::new_v4(),
                student_id: students[0].id,
                case_id: case.id,
                score: Some(6.0),
                hints: Some(4),
                helpful: Some(3.0),
                created_at: now - Duration::days(3),
                allow_rechat: false,
            },
            Evaluation {
                id: Uuid::new_v4(),
                student_id: students[0].id,
                case_id: case.id,
                score: Some(12.0),
                hints: Some(1),
                helpful: Some(5.0),
                created_at: now - Duration::days(1),
                allow_rechat: true,
            },
        ];
        let chats = vec![CaseChat {
            id: Uuid::new_v4(),
            student_id: students[1].id,
            case_id: case.id,
            persona: Some("CFO".to_string()),
            initial_position: Some("Expand".to_string()),
            final_position: None,
            created_at: now - Duration::hours(5),
        }];

        let mut all_students = students;
        all_students.push(unenrolled);
        Snapshot {
            sections: vec![section],
            students: all_students,
            evaluations,
            cases: vec![case, hidden_case],
            chats,
        }
    }

    #[test]
    fn rows_derive_status_from_latest_records() {
        let rows = build_rows(&fixture());
        assert_eq!(rows.len(), 3);

        let avery = rows.iter().find(|row| row.student_name == "Avery Lee").unwrap();
        assert_eq!(avery.status, ResultStatus::Completed);
        assert_eq!(avery.score, Some(12.0));
        assert!(avery.allow_rechat);

        let jules = rows.iter().find(|row| row.student_name == "Jules Moreno").unwrap();
        assert_eq!(jules.status, ResultStatus::InProgress);
        assert_eq!(jules.persona.as_deref(), Some("CFO"));

        let kiara = rows.iter().find(|row| row.student_name == "Kiara Patel").unwrap();
        assert_eq!(kiara.status, ResultStatus::NotStarted);
    }

    #[test]
    fn absent_values_sort_last_in_both_directions() {
        let rows = build_rows(&fixture());
        for direction in [SortDirection::Asc, SortDirection::Desc] {
            let query = ResultsQuery {
                sort: SortKey::Score,
                direction,
                ..ResultsQuery::default()
            };
            let page = run_query(&rows, &query);
            assert_eq!(page.rows[0].score, Some(12.0));
            assert!(page.rows[1..].iter().all(|row| row.score.is_none()));
        }
    }

    #[test]
    fn sorts_names_descending() {
        let rows = build_rows(&fixture());
        let query = ResultsQuery {
            sort: SortKey::StudentName,
            direction: SortDirection::Desc,
            ..ResultsQuery::default()
        };
        let page = run_query(&rows, &query);
        let names: Vec<&str> = page.rows.iter().map(|row| row.student_name.as_str()).collect();
        assert_eq!(names, vec!["Kiara Patel", "Jules Moreno", "Avery Lee"]);
    }

    #[test]
    fn pagination_reports_total_over_filtered_rows() {
        let rows = build_rows(&fixture());
        let query = ResultsQuery {
            limit: 2,
            offset: 2,
            ..ResultsQuery::default()
        };
        let page = run_query(&rows, &query);
        assert_eq!(page.rows.len(), 1);
        assert_eq!(page.total_rows, 3);
        assert_eq!(page.summary.total, 3);
        assert_eq!(page.summary.completed, 1);
        assert_eq!(page.summary.in_progress, 1);
        assert_eq!(page.summary.not_started, 1);
        assert_eq!(page.summary.avg_hints, Some(1.0));
    }

    #[test]
    fn status_filter_narrows_summary() {
        let rows = build_rows(&fixture());
        let query = ResultsQuery {
            filter: ResultsFilter {
                statuses: Selection::from_values([
                    ResultStatus::NotStarted,
                    ResultStatus::InProgress,
                ]),
                ..ResultsFilter::default()
            },
            ..ResultsQuery::default()
        };
        let page = run_query(&rows, &query);
        assert_eq!(page.total_rows, 2);
        assert_eq!(page.summary.avg_score, None);
    }

    #[test]
    fn parses_sort_keys() {
        assert_eq!("completed-at".parse::<SortKey>(), Ok(SortKey::CompletedAt));
        assert_eq!("Helpful".parse::<SortKey>(), Ok(SortKey::Helpful));
        assert!("grade".parse::<SortKey>().is_err());
        assert_eq!("DESC".parse::<SortDirection>(), Ok(SortDirection::Desc));
    }

    #[test]
    fn students_only_in_archived_sections_have_no_rows() {
        let mut snapshot = fixture();
        let archived = Section {
            id: Uuid::new_v4(),
            title: "MGMT 410".to_string(),
            term: "Spring 2026".to_string(),
            enabled: false,
        };
        snapshot.students[0].section_ids = vec![archived.id];
        snapshot.sections.push(archived);

        let rows = build_rows(&snapshot);
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|row| row.student_name != "Avery Lee"));
        assert!(rows.iter().all(|row| row.section_title == "MGMT 410"));
    }

    #[test]
    fn filter_options_list_enabled_entries() {
        let options = filter_options(&fixture());
        assert_eq!(options.sections.len(), 1);
        assert_eq!(options.cases.len(), 1);
        assert_eq!(options.cases[0].title, "Harbor Foods");
    }
}
