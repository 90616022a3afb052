use chrono::NaiveDate;
use uuid::Uuid;

/// One student's marks in one individual exam, joined with student identity.
#[derive(Debug, Clone)]
pub struct MarkEntry {
    pub student_id: Uuid,
    pub student_name: String,
    pub individual_exam_id: Uuid,
    pub marks_obtained: f64,
}

/// One row of a monthly ranking, draft or final.
#[derive(Debug, Clone, PartialEq)]
pub struct RankingRecord {
    pub student_id: Uuid,
    pub student_name: String,
    pub total_marks: f64,
    pub position: i32,
    pub roll_number: i32,
    pub is_final: bool,
}

#[derive(Debug, Clone)]
pub struct MonthlyExam {
    pub id: Uuid,
    pub batch_id: Uuid,
    pub batch_name: String,
    pub title: String,
    pub exam_month: NaiveDate,
}

/// Aggregate stats for one individual exam within a monthly exam.
#[derive(Debug, Clone)]
pub struct ExamSummary {
    pub title: String,
    pub full_marks: f64,
    pub entry_count: usize,
    pub avg_marks: f64,
    pub highest_marks: f64,
}
