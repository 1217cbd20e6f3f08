use std::collections::HashSet;
use std::fmt;
use std::hash::Hash;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::models::{Evaluation, ResultRow, ResultStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DateRange {
    Last7Days,
    #[default]
    Last30Days,
    Last90Days,
    AllTime,
}

impl DateRange {
    pub fn days(self) -> Option<i64> {
        match self {
            DateRange::Last7Days => Some(7),
            DateRange::Last30Days => Some(30),
            DateRange::Last90Days => Some(90),
            DateRange::AllTime => None,
        }
    }

    /// Earliest creation time still inside the window, or `None` for all time.
    pub fn cutoff(self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.days().map(|days| now - Duration::days(days))
    }

    pub fn label(self) -> &'static str {
        match self {
            DateRange::Last7Days => "last 7 days",
            DateRange::Last30Days => "last 30 days",
            DateRange::Last90Days => "last 90 days",
            DateRange::AllTime => "all time",
        }
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for DateRange {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "7d" | "7" | "week" => Ok(DateRange::Last7Days),
            "30d" | "30" | "month" => Ok(DateRange::Last30Days),
            "90d" | "90" | "quarter" => Ok(DateRange::Last90Days),
            "all" | "all-time" | "alltime" => Ok(DateRange::AllTime),
            other => Err(format!("unknown date range '{other}' (use 7d, 30d, 90d or all)")),
        }
    }
}

pub fn filter_by_date(
    evaluations: &[Evaluation],
    range: DateRange,
    now: DateTime<Utc>,
) -> Vec<Evaluation> {
    match range.cutoff(now) {
        None => evaluations.to_vec(),
        Some(cutoff) => evaluations
            .iter()
            .filter(|evaluation| evaluation.created_at >= cutoff)
            .cloned()
            .collect(),
    }
}

/// One filter axis: either unrestricted or limited to an explicit set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection<T: Eq + Hash> {
    All,
    Only(HashSet<T>),
}

impl<T: Eq + Hash> Default for Selection<T> {
    fn default() -> Self {
        Selection::All
    }
}

impl<T: Eq + Hash> Selection<T> {
    /// An empty list means no restriction, matching the "all" sentinel.
    pub fn from_values(values: impl IntoIterator<Item = T>) -> Self {
        let set: HashSet<T> = values.into_iter().collect();
        if set.is_empty() {
            Selection::All
        } else {
            Selection::Only(set)
        }
    }

    pub fn allows(&self, value: &T) -> bool {
        match self {
            Selection::All => true,
            Selection::Only(set) => set.contains(value),
        }
    }

    pub fn allows_any<'a>(&self, mut values: impl Iterator<Item = &'a T>) -> bool
    where
        T: 'a,
    {
        match self {
            Selection::All => true,
            Selection::Only(set) => values.any(|value| set.contains(value)),
        }
    }

    pub fn values(&self) -> Vec<&T> {
        match self {
            Selection::All => Vec::new(),
            Selection::Only(set) => set.iter().collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultsFilter {
    pub sections: Selection<Uuid>,
    pub cases: Selection<Uuid>,
    pub statuses: Selection<ResultStatus>,
}

impl ResultsFilter {
    pub fn matches(&self, row: &ResultRow) -> bool {
        self.sections.allows_any(row.section_ids.iter())
            && self.cases.allows(&row.case_id)
            && self.statuses.allows(&row.status)
    }

    pub fn apply<'a>(&self, rows: &'a [ResultRow]) -> Vec<&'a ResultRow> {
        rows.iter().filter(|row| self.matches(row)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn evaluation(days_ago: i64, now: DateTime<Utc>) -> Evaluation {
        Evaluation {
            id: Uuid::new_v4(),
            student_id: Uuid::new_v4(),
            case_id: Uuid::new_v4(),
            score: Some(10.0),
            hints: Some(1),
            helpful: Some(4.0),
            created_at: now - Duration::days(days_ago),
            allow_rechat: false,
        }
    }

    fn row(section: Uuid, case: Uuid, status: ResultStatus) -> ResultRow {
        ResultRow {
            student_id: Uuid::new_v4(),
            student_name: "Avery Lee".to_string(),
            section_title: "MGMT 410".to_string(),
            section_ids: vec![section],
            case_id: case,
            case_title: "Harbor Foods".to_string(),
            status,
            initial_position: None,
            final_position: None,
            persona: None,
            score: None,
            hints: None,
            helpful: None,
            completed_at: None,
            evaluation_id: None,
            allow_rechat: false,
        }
    }

    #[test]
    fn all_time_keeps_everything() {
        let now = Utc::now();
        let evaluations = vec![evaluation(1, now), evaluation(400, now)];
        assert_eq!(filter_by_date(&evaluations, DateRange::AllTime, now), evaluations);
    }

    #[test]
    fn windows_keep_records_on_or_after_cutoff() {
        let now = Utc::now();
        let evaluations = vec![
            evaluation(2, now),
            evaluation(7, now),
            evaluation(8, now),
            evaluation(45, now),
            evaluation(120, now),
        ];

        assert_eq!(filter_by_date(&evaluations, DateRange::Last7Days, now).len(), 2);
        assert_eq!(filter_by_date(&evaluations, DateRange::Last30Days, now).len(), 3);
        assert_eq!(filter_by_date(&evaluations, DateRange::Last90Days, now).len(), 4);
    }

    #[test]
    fn parses_range_labels() {
        assert_eq!("7d".parse::<DateRange>(), Ok(DateRange::Last7Days));
        assert_eq!("ALL".parse::<DateRange>(), Ok(DateRange::AllTime));
        assert!("fortnight".parse::<DateRange>().is_err());
    }

    #[test]
    fn empty_selection_means_all() {
        let selection: Selection<Uuid> = Selection::from_values(Vec::new());
        assert_eq!(selection, Selection::All);
        assert!(selection.allows(&Uuid::new_v4()));
    }

    #[test]
    fn axes_combine_with_and() {
        let section = Uuid::new_v4();
        let case = Uuid::new_v4();
        let rows = vec![
            row(section, case, ResultStatus::Completed),
            row(section, case, ResultStatus::NotStarted),
            row(Uuid::new_v4(), case, ResultStatus::Completed),
            row(section, Uuid::new_v4(), ResultStatus::Completed),
        ];

        let filter = ResultsFilter {
            sections: Selection::from_values([section]),
            cases: Selection::from_values([case]),
            statuses: Selection::from_values([ResultStatus::Completed]),
        };

        let matched = filter.apply(&rows);
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].status, ResultStatus::Completed);
    }

    #[test]
    fn default_filter_restricts_nothing() {
        let rows = vec![
            row(Uuid::new_v4(), Uuid::new_v4(), ResultStatus::InProgress),
            row(Uuid::new_v4(), Uuid::new_v4(), ResultStatus::NotStarted),
        ];
        assert_eq!(ResultsFilter::default().apply(&rows).len(), 2);
    }
}
