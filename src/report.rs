use std::fmt::Write;

use crate::models::{ExamSummary, MonthlyExam, RankingRecord};

pub fn build_report(
    exam: &MonthlyExam,
    summaries: &[ExamSummary],
    records: &[RankingRecord],
) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# {} — {}", exam.title, exam.batch_name);
    let _ = writeln!(output, "Exam month: {}", exam.exam_month.format("%B %Y"));
    let status = if records.iter().any(|r| r.is_final) {
        "final"
    } else {
        "draft"
    };
    let _ = writeln!(output, "Ranking status: {status}");
    let _ = writeln!(output);
    let _ = writeln!(output, "## Subject Tests");

    if summaries.is_empty() {
        let _ = writeln!(output, "No subject tests recorded for this exam.");
    } else {
        for summary in summaries.iter() {
            let _ = writeln!(
                output,
                "- {}: {} entries, avg {:.1} / {:.0}, highest {:.1}",
                summary.title,
                summary.entry_count,
                summary.avg_marks,
                summary.full_marks,
                summary.highest_marks
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Ranking");

    if records.is_empty() {
        let _ = writeln!(output, "No ranking has been generated for this exam.");
    } else {
        let _ = writeln!(output, "| Position | Roll | Student | Total Marks |");
        let _ = writeln!(output, "|---|---|---|---|");
        for record in records.iter() {
            let _ = writeln!(
                output,
                "| {} | {} | {} | {:.1} |",
                record.position, record.roll_number, record.student_name, record.total_marks
            );
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use uuid::Uuid;

    fn exam() -> MonthlyExam {
        MonthlyExam {
            id: Uuid::from_u128(1),
            batch_id: Uuid::from_u128(2),
            batch_name: "Morning Batch A".to_string(),
            title: "January Monthly Exam".to_string(),
            exam_month: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
        }
    }

    #[test]
    fn report_lists_ranked_students_in_order() {
        let records = vec![
            RankingRecord {
                student_id: Uuid::from_u128(10),
                student_name: "Arif Hossain".to_string(),
                total_marks: 90.0,
                position: 1,
                roll_number: 1,
                is_final: false,
            },
            RankingRecord {
                student_id: Uuid::from_u128(11),
                student_name: "Chayan Das".to_string(),
                total_marks: 70.0,
                position: 2,
                roll_number: 3,
                is_final: false,
            },
        ];
        let report = build_report(&exam(), &[], &records);

        assert!(report.contains("# January Monthly Exam — Morning Batch A"));
        assert!(report.contains("Ranking status: draft"));
        let arif = report.find("Arif Hossain").unwrap();
        let chayan = report.find("Chayan Das").unwrap();
        assert!(arif < chayan);
    }

    #[test]
    fn report_handles_missing_ranking() {
        let report = build_report(&exam(), &[], &[]);
        assert!(report.contains("No ranking has been generated"));
    }

    #[test]
    fn finalized_records_flip_the_status_line() {
        let records = vec![RankingRecord {
            student_id: Uuid::from_u128(10),
            student_name: "Dipa Roy".to_string(),
            total_marks: 60.0,
            position: 1,
            roll_number: 4,
            is_final: true,
        }];
        let report = build_report(&exam(), &[], &records);
        assert!(report.contains("Ranking status: final"));
    }
}
