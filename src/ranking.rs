use std::collections::HashMap;

use thiserror::Error;
use uuid::Uuid;

use crate::models::{MarkEntry, RankingRecord};

#[derive(Debug, Error)]
pub enum RankingError {
    #[error("ranking for monthly exam {0} is already finalized")]
    AlreadyFinalized(Uuid),
    #[error("no draft ranking exists for monthly exam {0}")]
    NoDraft(Uuid),
}

/// Compute a draft ranking from raw mark entries.
///
/// Students are ranked by the sum of their marks across every individual exam
/// of the month, highest first. Positions are dense: equal totals share a
/// position and the next distinct total continues at position + 1. Ties are
/// ordered by student id so repeated runs over the same marks produce the
/// same record set.
///
/// `prior_rolls` maps student id to the roll number held in the most recent
/// finalized month of the same batch. Students found there keep that roll
/// number; everyone else gets the next unused integer above the highest
/// carried roll, handed out in rank order.
pub fn compute_ranking(
    marks: &[MarkEntry],
    prior_rolls: &HashMap<Uuid, i32>,
) -> Vec<RankingRecord> {
    let mut totals: HashMap<Uuid, (String, f64)> = HashMap::new();
    for entry in marks {
        let slot = totals
            .entry(entry.student_id)
            .or_insert_with(|| (entry.student_name.clone(), 0.0));
        slot.1 += entry.marks_obtained;
    }

    let mut ranked: Vec<(Uuid, String, f64)> = totals
        .into_iter()
        .map(|(id, (name, total))| (id, name, total))
        .collect();
    ranked.sort_by(|a, b| b.2.total_cmp(&a.2).then_with(|| a.0.cmp(&b.0)));

    let max_carried = ranked
        .iter()
        .filter_map(|(id, _, _)| prior_rolls.get(id).copied())
        .max()
        .unwrap_or(0);
    let mut next_roll = max_carried + 1;

    let mut records = Vec::with_capacity(ranked.len());
    let mut position = 0i32;
    let mut prev_total: Option<f64> = None;

    for (student_id, student_name, total_marks) in ranked {
        if prev_total != Some(total_marks) {
            position += 1;
            prev_total = Some(total_marks);
        }

        let roll_number = match prior_rolls.get(&student_id) {
            Some(roll) => *roll,
            None => {
                let roll = next_roll;
                next_roll += 1;
                roll
            }
        };

        records.push(RankingRecord {
            student_id,
            student_name,
            total_marks,
            position,
            roll_number,
            is_final: false,
        });
    }

    records
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uid(n: u128) -> Uuid {
        Uuid::from_u128(n)
    }

    fn mark(student: u128, exam: u128, obtained: f64) -> MarkEntry {
        MarkEntry {
            student_id: uid(student),
            student_name: format!("Student {student}"),
            individual_exam_id: uid(exam),
            marks_obtained: obtained,
        }
    }

    #[test]
    fn sums_marks_across_individual_exams() {
        let marks = vec![mark(1, 100, 40.0), mark(1, 101, 35.0), mark(2, 100, 60.0)];
        let records = compute_ranking(&marks, &HashMap::new());

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].student_id, uid(1));
        assert!((records[0].total_marks - 75.0).abs() < f64::EPSILON);
        assert_eq!(records[1].student_id, uid(2));
        assert!((records[1].total_marks - 60.0).abs() < f64::EPSILON);
    }

    #[test]
    fn ties_share_a_dense_position() {
        // S1:90, S2:90, S3:70 -> positions 1, 1, 2 and rolls 1, 2, 3.
        let marks = vec![mark(1, 100, 90.0), mark(2, 100, 90.0), mark(3, 100, 70.0)];
        let records = compute_ranking(&marks, &HashMap::new());

        assert_eq!(records[0].student_id, uid(1));
        assert_eq!(records[0].position, 1);
        assert_eq!(records[0].roll_number, 1);
        assert_eq!(records[1].student_id, uid(2));
        assert_eq!(records[1].position, 1);
        assert_eq!(records[1].roll_number, 2);
        assert_eq!(records[2].student_id, uid(3));
        assert_eq!(records[2].position, 2);
        assert_eq!(records[2].roll_number, 3);
    }

    #[test]
    fn carries_roll_numbers_forward_by_identity() {
        // Finalized prior month gave S1 roll 1, S2 roll 2, S3 roll 3. This
        // month S2 is absent, S4 is new, and S3 outranks S1.
        let prior: HashMap<Uuid, i32> =
            [(uid(1), 1), (uid(2), 2), (uid(3), 3)].into_iter().collect();
        let marks = vec![mark(1, 200, 80.0), mark(3, 200, 95.0), mark(4, 200, 60.0)];
        let records = compute_ranking(&marks, &prior);

        assert_eq!(records[0].student_id, uid(3));
        assert_eq!(records[0].position, 1);
        assert_eq!(records[0].roll_number, 3);
        assert_eq!(records[1].student_id, uid(1));
        assert_eq!(records[1].position, 2);
        assert_eq!(records[1].roll_number, 1);
        assert_eq!(records[2].student_id, uid(4));
        assert_eq!(records[2].position, 3);
        assert_eq!(records[2].roll_number, 4);
    }

    #[test]
    fn new_rolls_start_above_max_carried() {
        // Only roll 5 carries into this month, so the two new students get
        // 6 and 7 in rank order.
        let prior: HashMap<Uuid, i32> = [(uid(2), 5)].into_iter().collect();
        let marks = vec![mark(1, 300, 50.0), mark(2, 300, 40.0), mark(3, 300, 30.0)];
        let records = compute_ranking(&marks, &prior);

        assert_eq!(records[0].roll_number, 6);
        assert_eq!(records[1].roll_number, 5);
        assert_eq!(records[2].roll_number, 7);
    }

    #[test]
    fn recompute_is_idempotent() {
        let prior: HashMap<Uuid, i32> = [(uid(1), 2)].into_iter().collect();
        let marks = vec![
            mark(1, 400, 55.0),
            mark(2, 400, 55.0),
            mark(3, 400, 70.0),
            mark(3, 401, 10.0),
        ];

        let first = compute_ranking(&marks, &prior);
        let second = compute_ranking(&marks, &prior);
        assert_eq!(first, second);
    }

    #[test]
    fn no_marks_means_no_records() {
        let records = compute_ranking(&[], &HashMap::new());
        assert!(records.is_empty());
    }
}
