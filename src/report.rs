use std::fmt::Write;

use crate::models::{Dashboard, ResultsPage};

fn one_decimal(value: Option<f64>) -> String {
    value.map_or_else(|| "—".to_string(), |v| format!("{v:.1}"))
}

fn percent(value: f64) -> String {
    format!("{value:.0}%")
}

pub fn build_report(dashboard: &Dashboard) -> String {
    let mut output = String::new();
    let overall = &dashboard.overall;

    let _ = writeln!(output, "# Case Study Analytics");
    let _ = writeln!(
        output,
        "Generated {} for {}",
        dashboard.generated_at.format("%Y-%m-%d %H:%M UTC"),
        dashboard.range
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Overview");
    let _ = writeln!(output, "- Active sections: {}", overall.section_count);
    let _ = writeln!(output, "- Students: {}", overall.student_count);
    let _ = writeln!(
        output,
        "- Completions: {} ({} completion rate)",
        overall.completions,
        percent(overall.completion_rate)
    );
    let _ = writeln!(
        output,
        "- This week: {} {} ({:+} vs prior week)",
        overall.weekly.this_week,
        overall.weekly.trend.symbol(),
        overall.weekly.delta()
    );
    let _ = writeln!(
        output,
        "- Avg score {} / 15, avg hints {}, avg helpful {} / 5",
        one_decimal(overall.avg_score),
        one_decimal(overall.avg_hints),
        one_decimal(overall.avg_helpful)
    );

    let _ = writeln!(output);
    let _ = writeln!(output, "## Section Performance");

    if dashboard.sections.is_empty() {
        let _ = writeln!(output, "No active sections.");
    } else {
        let _ = writeln!(
            output,
            "| Section | Term | Students | Completed | Rate | Avg Score | Avg Hints | Helpful |"
        );
        let _ = writeln!(output, "|---|---|---:|---:|---:|---:|---:|---:|");
        for section in &dashboard.sections {
            let _ = writeln!(
                output,
                "| {} | {} | {} | {} | {} | {} | {} | {} |",
                section.title,
                section.term,
                section.student_count,
                section.completed_count,
                percent(section.completion_rate),
                one_decimal(section.avg_score),
                one_decimal(section.avg_hints),
                one_decimal(section.avg_helpful)
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Case Performance");

    if dashboard.cases.is_empty() {
        let _ = writeln!(output, "No case attempts in this window.");
    } else {
        let _ = writeln!(
            output,
            "| Case | Attempts | Students | Avg Score | Avg Hints | Helpful | Difficulty |"
        );
        let _ = writeln!(output, "|---|---:|---:|---:|---:|---:|---|");
        for case in &dashboard.cases {
            let _ = writeln!(
                output,
                "| {} | {} | {} | {} | {} | {} | {} |",
                case.title,
                case.attempts,
                case.student_count,
                one_decimal(case.avg_score),
                one_decimal(case.avg_hints),
                one_decimal(case.avg_helpful),
                case.difficulty
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Score Distribution");
    let _ = writeln!(output, "{} scored evaluations", dashboard.distribution.total());

    let peak = dashboard.distribution.buckets.iter().copied().max().unwrap_or(0);
    for (score, count) in dashboard.distribution.buckets.iter().enumerate() {
        let width = if peak == 0 { 0 } else { count * 30 / peak };
        let _ = writeln!(output, "{score:>2} | {:<30} {count}", "#".repeat(width));
    }

    output
}

pub fn build_results_table(page: &ResultsPage, offset: usize) -> String {
    let mut output = String::new();
    let summary = &page.summary;

    let _ = writeln!(
        output,
        "{} results: {} completed, {} in progress, {} not started (avg score {})",
        summary.total,
        summary.completed,
        summary.in_progress,
        summary.not_started,
        one_decimal(summary.avg_score)
    );

    if page.rows.is_empty() {
        let _ = writeln!(output, "No results match these filters.");
        return output;
    }

    let _ = writeln!(
        output,
        "| Student | Section | Case | Status | Persona | Score | Hints | Helpful | Rechat |"
    );
    let _ = writeln!(output, "|---|---|---|---|---|---:|---:|---:|---|");
    for row in &page.rows {
        let _ = writeln!(
            output,
            "| {} | {} | {} | {} | {} | {} | {} | {} | {} |",
            row.student_name,
            row.section_title,
            row.case_title,
            row.status,
            row.persona.as_deref().unwrap_or("—"),
            one_decimal(row.score),
            row.hints.map_or_else(|| "—".to_string(), |h| h.to_string()),
            one_decimal(row.helpful),
            if row.allow_rechat { "yes" } else { "no" }
        );
    }

    let shown_to = (offset + page.rows.len()).min(page.total_rows);
    let _ = writeln!(output, "Showing {}-{} of {}", offset + 1, shown_to, page.total_rows);
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::build_dashboard;
    use crate::filter::DateRange;
    use crate::models::{
        Case, Evaluation, ResultRow, ResultStatus, ResultsSummary, Section, Snapshot, Student,
    };
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    fn sample_snapshot() -> Snapshot {
        let section = Section {
            id: Uuid::new_v4(),
            title: "MGMT 410 Strategy".to_string(),
            term: "Fall 2026".to_string(),
            enabled: true,
        };
        let case = Case {
            id: Uuid::new_v4(),
            title: "Harbor Foods Expansion".to_string(),
            enabled: true,
        };
        let student = Student {
            id: Uuid::new_v4(),
            first_name: "Avery".to_string(),
            last_name: "Lee".to_string(),
            email: None,
            section_ids: vec![section.id],
            completed_at: None,
        };
        let evaluation = Evaluation {
            id: Uuid::new_v4(),
            student_id: student.id,
            case_id: case.id,
            score: Some(12.0),
            hints: Some(2),
            helpful: None,
            created_at: Utc::now() - Duration::days(1),
            allow_rechat: false,
        };
        Snapshot {
            sections: vec![section],
            students: vec![student],
            evaluations: vec![evaluation],
            cases: vec![case],
            chats: Vec::new(),
        }
    }

    #[test]
    fn report_lists_every_section_of_the_dashboard() {
        let dashboard = build_dashboard(&sample_snapshot(), DateRange::Last30Days, Utc::now());
        let report = build_report(&dashboard);

        assert!(report.contains("## Overview"));
        assert!(report.contains(
            "| MGMT 410 Strategy | Fall 2026 | 1 | 1 | 100% | 12.0 | 2.0 | — |"
        ));
        assert!(report.contains("| Harbor Foods Expansion | 1 | 1 | 12.0 | 2.0 | — | Easy |"));
        assert!(report.contains("1 scored evaluations"));
        assert!(report.contains("12 | ##############################"));
        let histogram = report
            .lines()
            .filter(|line| line.contains(" | ") && line.len() < 50)
            .count();
        assert_eq!(histogram, 16);
    }

    #[test]
    fn empty_dashboard_renders_placeholders() {
        let dashboard = build_dashboard(&Snapshot::default(), DateRange::AllTime, Utc::now());
        let report = build_report(&dashboard);
        assert!(report.contains("No active sections."));
        assert!(report.contains("No case attempts in this window."));
        assert!(report.contains("Avg score — / 15"));
    }

    #[test]
    fn results_table_reports_position() {
        let row = ResultRow {
            student_id: Uuid::new_v4(),
            student_name: "Avery Lee".to_string(),
            section_title: "MGMT 410 Strategy".to_string(),
            section_ids: Vec::new(),
            case_id: Uuid::new_v4(),
            case_title: "Harbor Foods Expansion".to_string(),
            status: ResultStatus::Completed,
            initial_position: None,
            final_position: None,
            persona: Some("Skeptical CFO".to_string()),
            score: Some(11.0),
            hints: Some(3),
            helpful: Some(4.0),
            completed_at: None,
            evaluation_id: None,
            allow_rechat: true,
        };
        let page = ResultsPage {
            summary: ResultsSummary {
                total: 30,
                completed: 30,
                ..ResultsSummary::default()
            },
            rows: vec![row],
            total_rows: 30,
        };

        let table = build_results_table(&page, 25);
        assert!(table.contains(
            "| Avery Lee | MGMT 410 Strategy | Harbor Foods Expansion | completed | Skeptical CFO \
             | 11.0 | 3 | 4.0 | yes |"
        ));
        assert!(table.contains("Showing 26-26 of 30"));
    }
}
