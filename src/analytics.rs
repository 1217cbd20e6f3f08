use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::filter::{self, DateRange};
use crate::models::{
    CasePerformance, Dashboard, Difficulty, Evaluation, OverallStats, ScoreDistribution,
    SectionPerformance, Snapshot, Trend, WeeklyDelta, MAX_SCORE,
};

/// Arithmetic mean, `None` for an empty input so that a real zero stays distinguishable.
pub fn mean(values: impl IntoIterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values
        .into_iter()
        .fold((0.0, 0usize), |(sum, count), value| (sum + value, count + 1));
    if count == 0 {
        None
    } else {
        Some(sum / count as f64)
    }
}

pub fn completion_rate(completed: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (completed as f64 / total as f64 * 100.0).clamp(0.0, 100.0)
}

pub fn difficulty(avg_score: Option<f64>) -> Difficulty {
    match avg_score {
        None => Difficulty::Unrated,
        Some(score) if score >= 12.0 => Difficulty::Easy,
        Some(score) if score >= 9.0 => Difficulty::Medium,
        Some(_) => Difficulty::Hard,
    }
}

/// Per-metric means over the records that carry each metric.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MetricMeans {
    pub score: Option<f64>,
    pub hints: Option<f64>,
    pub helpful: Option<f64>,
}

pub fn metric_means<'a>(
    evaluations: impl IntoIterator<Item = &'a Evaluation> + Clone,
) -> MetricMeans {
    MetricMeans {
        score: mean(evaluations.clone().into_iter().filter_map(|e| e.score)),
        hints: mean(evaluations.clone().into_iter().filter_map(|e| e.hints.map(f64::from))),
        helpful: mean(evaluations.into_iter().filter_map(|e| e.helpful)),
    }
}

pub fn score_distribution(evaluations: &[Evaluation]) -> ScoreDistribution {
    let mut buckets = [0usize; MAX_SCORE as usize + 1];
    for score in evaluations.iter().filter_map(|e| e.score) {
        if !score.is_finite() {
            continue;
        }
        // Scores are non-negative, so f64::round is round-half-up here.
        let bucket = score.round().clamp(0.0, f64::from(MAX_SCORE)) as usize;
        buckets[bucket] += 1;
    }
    ScoreDistribution { buckets }
}

/// Compares evaluations created in the last seven days against the seven before that.
pub fn weekly_delta(evaluations: &[Evaluation], now: DateTime<Utc>) -> WeeklyDelta {
    let week_ago = now - Duration::days(7);
    let two_weeks_ago = now - Duration::days(14);

    let this_week = evaluations
        .iter()
        .filter(|e| e.created_at >= week_ago && e.created_at < now)
        .count();
    let prior_week = evaluations
        .iter()
        .filter(|e| e.created_at >= two_weeks_ago && e.created_at < week_ago)
        .count();

    let trend = match this_week.cmp(&prior_week) {
        std::cmp::Ordering::Greater => Trend::Up,
        std::cmp::Ordering::Less => Trend::Down,
        std::cmp::Ordering::Equal => Trend::Flat,
    };

    WeeklyDelta {
        this_week,
        prior_week,
        trend,
    }
}

/// Evaluations from students missing here are left out of completion counts.
fn roster_ids(snapshot: &Snapshot) -> HashSet<Uuid> {
    snapshot.students.iter().map(|student| student.id).collect()
}

/// `filtered` is the date-filtered set; `all_evaluations` feeds the week-over-week delta.
pub fn overall_stats(
    snapshot: &Snapshot,
    filtered: &[Evaluation],
    all_evaluations: &[Evaluation],
    now: DateTime<Utc>,
) -> OverallStats {
    let means = metric_means(filtered.iter());
    let roster = roster_ids(snapshot);
    let completed_students: HashSet<Uuid> = filtered
        .iter()
        .map(|e| e.student_id)
        .filter(|id| roster.contains(id))
        .collect();
    let student_count = roster.len();

    OverallStats {
        section_count: snapshot.sections.iter().filter(|s| s.enabled).count(),
        student_count,
        completions: filtered.len(),
        avg_score: means.score,
        avg_hints: means.hints,
        avg_helpful: means.helpful,
        completion_rate: completion_rate(completed_students.len(), student_count),
        weekly: weekly_delta(all_evaluations, now),
    }
}

pub fn section_rollup(snapshot: &Snapshot, filtered: &[Evaluation]) -> Vec<SectionPerformance> {
    let mut by_student: HashMap<Uuid, Vec<&Evaluation>> = HashMap::new();
    for evaluation in filtered {
        by_student.entry(evaluation.student_id).or_default().push(evaluation);
    }

    let mut rows: Vec<SectionPerformance> = snapshot
        .sections
        .iter()
        .filter(|section| section.enabled)
        .map(|section| {
            let members: Vec<Uuid> = snapshot
                .students
                .iter()
                .filter(|student| student.section_ids.contains(&section.id))
                .map(|student| student.id)
                .collect();

            let section_evaluations: Vec<&Evaluation> = members
                .iter()
                .filter_map(|id| by_student.get(id))
                .flatten()
                .copied()
                .collect();
            let completed_count = members.iter().filter(|id| by_student.contains_key(id)).count();
            let means = metric_means(section_evaluations.iter().copied());

            SectionPerformance {
                section_id: section.id,
                title: section.title.clone(),
                term: section.term.clone(),
                student_count: members.len(),
                completed_count,
                avg_score: means.score,
                avg_hints: means.hints,
                avg_helpful: means.helpful,
                completion_rate: completion_rate(completed_count, members.len()),
            }
        })
        .collect();

    rows.sort_by(|a, b| {
        b.completion_rate
            .partial_cmp(&a.completion_rate)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    rows
}

pub fn case_rollup(snapshot: &Snapshot, filtered: &[Evaluation]) -> Vec<CasePerformance> {
    let roster = roster_ids(snapshot);
    let total_students = roster.len();

    let mut rows: Vec<CasePerformance> = snapshot
        .cases
        .iter()
        .filter(|case| case.enabled)
        .filter_map(|case| {
            let attempts: Vec<&Evaluation> =
                filtered.iter().filter(|e| e.case_id == case.id).collect();
            if attempts.is_empty() {
                return None;
            }

            let students: HashSet<Uuid> = attempts
                .iter()
                .map(|e| e.student_id)
                .filter(|id| roster.contains(id))
                .collect();
            let means = metric_means(attempts.iter().copied());

            Some(CasePerformance {
                case_id: case.id,
                title: case.title.clone(),
                attempts: attempts.len(),
                student_count: students.len(),
                avg_score: means.score,
                avg_hints: means.hints,
                avg_helpful: means.helpful,
                completion_rate: completion_rate(students.len(), total_students),
                difficulty: difficulty(means.score),
            })
        })
        .collect();

    rows.sort_by(|a, b| b.attempts.cmp(&a.attempts));
    rows
}

pub fn build_dashboard(snapshot: &Snapshot, range: DateRange, now: DateTime<Utc>) -> Dashboard {
    let filtered = filter::filter_by_date(&snapshot.evaluations, range, now);
    tracing::debug!(
        range = %range,
        total = snapshot.evaluations.len(),
        kept = filtered.len(),
        "filtered evaluations"
    );

    Dashboard {
        generated_at: now,
        range,
        overall: overall_stats(snapshot, &filtered, &snapshot.evaluations, now),
        sections: section_rollup(snapshot, &filtered),
        cases: case_rollup(snapshot, &filtered),
        distribution: score_distribution(&filtered),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Case, Section, Student};

    fn sample_section(title: &str, enabled: bool) -> Section {
        Section {
            id: Uuid::new_v4(),
            title: title.to_string(),
            term: "Fall 2026".to_string(),
            enabled,
        }
    }

    fn sample_student(section_id: Uuid) -> Student {
        Student {
            id: Uuid::new_v4(),
            first_name: "Avery".to_string(),
            last_name: "Lee".to_string(),
            email: Some("avery@example.com".to_string()),
            section_ids: vec![section_id],
            completed_at: None,
        }
    }

    fn sample_case(title: &str) -> Case {
        Case {
            id: Uuid::new_v4(),
            title: title.to_string(),
            enabled: true,
        }
    }

    fn sample_evaluation(
        student_id: Uuid,
        case_id: Uuid,
        score: Option<f64>,
        days_ago: i64,
    ) -> Evaluation {
        Evaluation {
            id: Uuid::new_v4(),
            student_id,
            case_id,
            score,
            hints: None,
            helpful: None,
            created_at: Utc::now() - Duration::days(days_ago),
            allow_rechat: false,
        }
    }

    #[test]
    fn mean_of_empty_set_is_absent() {
        assert_eq!(mean(Vec::new()), None);
        assert_eq!(mean(vec![0.0]), Some(0.0));
        assert_eq!(mean(vec![2.0, 4.0, 9.0]), Some(5.0));
    }

    #[test]
    fn completion_rate_handles_zero_total() {
        assert_eq!(completion_rate(0, 0), 0.0);
        assert_eq!(completion_rate(4, 10), 40.0);
        assert_eq!(completion_rate(5, 5), 100.0);
    }

    #[test]
    fn difficulty_follows_score_thresholds() {
        assert_eq!(difficulty(Some(12.0)), Difficulty::Easy);
        assert_eq!(difficulty(Some(11.9)), Difficulty::Medium);
        assert_eq!(difficulty(Some(9.0)), Difficulty::Medium);
        assert_eq!(difficulty(Some(8.99)), Difficulty::Hard);
        assert_eq!(difficulty(None), Difficulty::Unrated);
        assert_eq!(Difficulty::Unrated.to_string(), "—");
    }

    #[test]
    fn null_scores_are_excluded_from_average_and_histogram() {
        let student = Uuid::new_v4();
        let case = Uuid::new_v4();
        let evaluations: Vec<Evaluation> = [Some(15.0), Some(9.0), Some(9.0), Some(3.0), None]
            .into_iter()
            .map(|score| sample_evaluation(student, case, score, 1))
            .collect();

        let means = metric_means(evaluations.iter());
        assert!((means.score.unwrap_or_default() - 9.0).abs() < 0.001);
        assert_eq!(means.hints, None);

        let distribution = score_distribution(&evaluations);
        assert_eq!(distribution.buckets[15], 1);
        assert_eq!(distribution.buckets[9], 2);
        assert_eq!(distribution.buckets[3], 1);
        assert_eq!(distribution.total(), 4);
        assert_eq!(distribution.buckets.iter().filter(|count| **count == 0).count(), 13);
    }

    #[test]
    fn histogram_rounds_half_up_and_clamps() {
        let student = Uuid::new_v4();
        let case = Uuid::new_v4();
        let evaluations: Vec<Evaluation> = [Some(7.5), Some(7.49), Some(16.2), Some(-0.3)]
            .into_iter()
            .map(|score| sample_evaluation(student, case, score, 1))
            .collect();

        let distribution = score_distribution(&evaluations);
        assert_eq!(distribution.buckets[8], 1);
        assert_eq!(distribution.buckets[7], 1);
        assert_eq!(distribution.buckets[15], 1);
        assert_eq!(distribution.buckets[0], 1);
    }

    #[test]
    fn sections_sort_by_completion_rate() {
        let a = sample_section("A", true);
        let b = sample_section("B", true);
        let c = sample_section("C", true);
        let case = sample_case("Harbor Foods");

        let mut students = Vec::new();
        let mut evaluations = Vec::new();
        for (section, size, completed) in [(&a, 10, 4), (&b, 0, 0), (&c, 5, 5)] {
            for index in 0..size {
                let student = sample_student(section.id);
                if index < completed {
                    evaluations.push(sample_evaluation(student.id, case.id, Some(10.0), 2));
                }
                students.push(student);
            }
        }

        let snapshot = Snapshot {
            sections: vec![a, b, c],
            students,
            evaluations: evaluations.clone(),
            cases: vec![case],
            chats: Vec::new(),
        };

        let rows = section_rollup(&snapshot, &evaluations);
        let titles: Vec<&str> = rows.iter().map(|row| row.title.as_str()).collect();
        let rates: Vec<f64> = rows.iter().map(|row| row.completion_rate).collect();
        assert_eq!(titles, vec!["C", "A", "B"]);
        assert_eq!(rates, vec![100.0, 40.0, 0.0]);
        assert_eq!(rows[2].student_count, 0);
        assert_eq!(rows[2].avg_score, None);
    }

    #[test]
    fn section_ties_keep_original_order() {
        let first = sample_section("First", true);
        let second = sample_section("Second", true);
        let snapshot = Snapshot {
            sections: vec![first, second],
            ..Snapshot::default()
        };

        let rows = section_rollup(&snapshot, &[]);
        assert_eq!(rows[0].title, "First");
        assert_eq!(rows[1].title, "Second");
    }

    #[test]
    fn disabled_sections_and_dangling_students_are_skipped() {
        let enabled = sample_section("Open", true);
        let archived = sample_section("Archived", false);
        let orphan = sample_student(Uuid::new_v4());
        let member = sample_student(enabled.id);
        let case = sample_case("Harbor Foods");
        let evaluations = vec![
            sample_evaluation(orphan.id, case.id, Some(12.0), 1),
            sample_evaluation(member.id, case.id, Some(6.0), 1),
        ];

        let snapshot = Snapshot {
            sections: vec![enabled, archived],
            students: vec![orphan, member],
            evaluations: evaluations.clone(),
            cases: vec![case],
            chats: Vec::new(),
        };

        let rows = section_rollup(&snapshot, &evaluations);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].student_count, 1);
        assert_eq!(rows[0].avg_score, Some(6.0));
    }

    #[test]
    fn case_rollup_drops_unattempted_cases() {
        let section = sample_section("A", true);
        let students: Vec<Student> = (0..4).map(|_| sample_student(section.id)).collect();
        let popular = sample_case("Popular");
        let niche = sample_case("Niche");
        let untouched = sample_case("Untouched");

        let mut evaluations = vec![
            sample_evaluation(students[0].id, popular.id, Some(13.0), 1),
            sample_evaluation(students[1].id, popular.id, Some(12.0), 1),
            sample_evaluation(students[1].id, popular.id, Some(14.0), 1),
        ];
        evaluations.push(sample_evaluation(students[2].id, niche.id, None, 1));

        let snapshot = Snapshot {
            sections: vec![section],
            students,
            evaluations: evaluations.clone(),
            cases: vec![niche, untouched, popular],
            chats: Vec::new(),
        };

        let rows = case_rollup(&snapshot, &evaluations);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].title, "Popular");
        assert_eq!(rows[0].attempts, 3);
        assert_eq!(rows[0].student_count, 2);
        assert_eq!(rows[0].difficulty, Difficulty::Easy);
        assert_eq!(rows[0].completion_rate, 50.0);
        assert_eq!(rows[1].title, "Niche");
        assert_eq!(rows[1].difficulty, Difficulty::Unrated);
        assert!(rows.iter().all(|row| row.attempts > 0));
    }

    #[test]
    fn weekly_delta_compares_adjacent_weeks() {
        let student = Uuid::new_v4();
        let case = Uuid::new_v4();
        let now = Utc::now();
        let evaluations = vec![
            sample_evaluation(student, case, Some(10.0), 1),
            sample_evaluation(student, case, Some(10.0), 3),
            sample_evaluation(student, case, Some(10.0), 9),
            sample_evaluation(student, case, Some(10.0), 20),
        ];

        let delta = weekly_delta(&evaluations, now);
        assert_eq!(delta.this_week, 2);
        assert_eq!(delta.prior_week, 1);
        assert_eq!(delta.trend, Trend::Up);
        assert_eq!(delta.delta(), 1);

        assert_eq!(weekly_delta(&[], now).trend, Trend::Flat);
    }

    #[test]
    fn overall_stats_use_unique_students() {
        let section = sample_section("A", true);
        let archived = sample_section("B", false);
        let students: Vec<Student> = (0..4).map(|_| sample_student(section.id)).collect();
        let case = sample_case("Harbor Foods");
        let evaluations = vec![
            sample_evaluation(students[0].id, case.id, Some(10.0), 1),
            sample_evaluation(students[0].id, case.id, Some(12.0), 2),
            sample_evaluation(students[1].id, case.id, None, 3),
        ];
        let snapshot = Snapshot {
            sections: vec![section, archived],
            students,
            evaluations: evaluations.clone(),
            cases: vec![case],
            chats: Vec::new(),
        };

        let stats = overall_stats(&snapshot, &evaluations, &evaluations, Utc::now());
        assert_eq!(stats.section_count, 1);
        assert_eq!(stats.student_count, 4);
        assert_eq!(stats.completions, 3);
        assert_eq!(stats.completion_rate, 50.0);
        assert_eq!(stats.avg_score, Some(11.0));
        assert_eq!(stats.avg_helpful, None);
    }

    #[test]
    fn evaluations_from_unknown_students_do_not_count_as_completions() {
        let section = sample_section("A", true);
        let students: Vec<Student> = (0..2).map(|_| sample_student(section.id)).collect();
        let case = sample_case("Harbor Foods");
        let evaluations = vec![
            sample_evaluation(Uuid::new_v4(), case.id, Some(10.0), 1),
            sample_evaluation(Uuid::new_v4(), case.id, Some(12.0), 2),
        ];
        let snapshot = Snapshot {
            sections: vec![section],
            students,
            evaluations: evaluations.clone(),
            cases: vec![case],
            chats: Vec::new(),
        };

        let stats = overall_stats(&snapshot, &evaluations, &evaluations, Utc::now());
        assert_eq!(stats.student_count, 2);
        assert_eq!(stats.completion_rate, 0.0);

        let cases = case_rollup(&snapshot, &evaluations);
        assert_eq!(cases[0].attempts, 2);
        assert_eq!(cases[0].student_count, 0);
        assert_eq!(cases[0].completion_rate, 0.0);
    }

    #[test]
    fn dashboard_applies_date_range() {
        let section = sample_section("A", true);
        let student = sample_student(section.id);
        let case = sample_case("Harbor Foods");
        let snapshot = Snapshot {
            evaluations: vec![
                sample_evaluation(student.id, case.id, Some(15.0), 2),
                sample_evaluation(student.id, case.id, Some(3.0), 60),
            ],
            sections: vec![section],
            students: vec![student],
            cases: vec![case],
            chats: Vec::new(),
        };

        let recent = build_dashboard(&snapshot, DateRange::Last7Days, Utc::now());
        assert_eq!(recent.overall.completions, 1);
        assert_eq!(recent.distribution.total(), 1);

        let everything = build_dashboard(&snapshot, DateRange::AllTime, Utc::now());
        assert_eq!(everything.overall.completions, 2);
        assert_eq!(everything.overall.avg_score, Some(9.0));
    }
}
