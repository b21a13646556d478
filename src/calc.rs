use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::warn;

use crate::store::{BulletinError, GradeStore};

/// Fixed component weights: 25% quiz average, 25% homework average,
/// 50% exam. They must sum to 1.0.
pub const INTERRO_WEIGHT: f64 = 0.25;
pub const DEVOIR_WEIGHT: f64 = 0.25;
pub const COMPO_WEIGHT: f64 = 0.50;

/// Subjects without a stored coefficient weigh in at 2.
pub const DEFAULT_COEFFICIENT: f64 = 2.0;

/// Threshold for both the per-subject remark and the pass verdict.
pub const PASS_MARK: f64 = 10.0;

pub fn subject_average(interro: f64, devoir: f64, compo: f64) -> f64 {
    interro * INTERRO_WEIGHT + devoir * DEVOIR_WEIGHT + compo * COMPO_WEIGHT
}

pub fn appreciation(average: f64) -> &'static str {
    if average >= PASS_MARK {
        "Passable"
    } else {
        "Faible"
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectAverage {
    pub subject: String,
    pub coefficient: f64,
    pub interro: f64,
    pub devoir: f64,
    pub compo: f64,
    pub average: f64,
    pub appreciation: &'static str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentAggregate {
    pub subjects: Vec<SubjectAverage>,
    pub overall_average: f64,
}

/// Aggregates one student's grade rows for a period into per-subject
/// weighted averages and an overall average.
///
/// Returns `Ok(None)` when the student has no rows for the period. Rows
/// whose subject cannot be resolved are skipped without error; missing
/// component scores count as zero, not as exclusions.
pub fn aggregate(
    store: &dyn GradeStore,
    student_id: &str,
    period_id: &str,
) -> Result<Option<StudentAggregate>, BulletinError> {
    let records = store.grades(student_id, period_id)?;
    if records.is_empty() {
        return Ok(None);
    }

    let mut subjects: Vec<SubjectAverage> = Vec::with_capacity(records.len());
    let mut total_points = 0.0_f64;
    let mut total_coef = 0.0_f64;

    for record in &records {
        let Some(subject) = store.subject(&record.subject_id)? else {
            // Dangling subject reference; the row contributes nothing.
            continue;
        };

        let interro = record.interro_avg.unwrap_or(0.0);
        let devoir = record.devoir_avg.unwrap_or(0.0);
        let compo = record.compo_grade.unwrap_or(0.0);
        let average = subject_average(interro, devoir, compo);
        let coefficient = subject.coefficient.unwrap_or(DEFAULT_COEFFICIENT);

        total_points += average * coefficient;
        total_coef += coefficient;
        subjects.push(SubjectAverage {
            subject: subject.name,
            coefficient,
            interro,
            devoir,
            compo,
            average,
            appreciation: appreciation(average),
        });
    }

    let overall_average = if total_coef > 0.0 {
        total_points / total_coef
    } else {
        0.0
    };

    Ok(Some(StudentAggregate {
        subjects,
        overall_average,
    }))
}

pub fn format_rank(rank: usize) -> String {
    if rank == 1 {
        "1er".to_string()
    } else {
        format!("{}e", rank)
    }
}

/// Overall averages for every student in a class who has data for the
/// period, computed in one batch pass. Rank lookups for any number of
/// students reuse it instead of re-aggregating the whole class per request.
///
/// A storage fault while aggregating one student never fails the pass:
/// the student is left out of the ranking and the error is kept for the
/// caller to count or re-raise.
pub struct ClassStanding {
    sorted_desc: Vec<f64>,
    by_student: HashMap<String, StudentAggregate>,
    failures: HashMap<String, BulletinError>,
}

pub fn class_standing(
    store: &dyn GradeStore,
    class_id: &str,
    period_id: &str,
) -> Result<ClassStanding, BulletinError> {
    let enrollments = store.enrollments_for_class(class_id)?;

    let mut by_student = HashMap::with_capacity(enrollments.len());
    let mut failures = HashMap::new();
    for enrollment in &enrollments {
        match aggregate(store, &enrollment.student_id, period_id) {
            Ok(Some(agg)) => {
                by_student.insert(enrollment.student_id.clone(), agg);
            }
            Ok(None) => {}
            Err(e) => {
                warn!(student_id = %enrollment.student_id, error = %e, "aggregation failed; excluding from standing");
                failures.insert(enrollment.student_id.clone(), e);
            }
        }
    }

    let mut sorted_desc: Vec<f64> = by_student.values().map(|a| a.overall_average).collect();
    sorted_desc.sort_by(|a, b| b.partial_cmp(a).unwrap_or(Ordering::Equal));

    Ok(ClassStanding {
        sorted_desc,
        by_student,
        failures,
    })
}

impl ClassStanding {
    pub fn aggregate_for(&self, student_id: &str) -> Option<&StudentAggregate> {
        self.by_student.get(student_id)
    }

    /// The storage error that excluded a student from the standing, if any.
    pub fn failure_for(&self, student_id: &str) -> Option<&BulletinError> {
        self.failures.get(student_id)
    }

    pub fn failed_count(&self) -> usize {
        self.failures.len()
    }

    /// Ordinal rank label for one student.
    ///
    /// Rank is 1 + the position of the first average equal to the student's
    /// own, so tied students all resolve to the first occurrence's rank.
    /// Students with no data look up a default of 0.0 and resolve to "-"
    /// unless some classmate's average is exactly 0.0.
    pub fn rank_label(&self, student_id: &str) -> String {
        let average = self
            .by_student
            .get(student_id)
            .map(|a| a.overall_average)
            .unwrap_or(0.0);
        match self.sorted_desc.iter().position(|v| *v == average) {
            Some(pos) => format_rank(pos + 1),
            None => "-".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::testutil::MemStore;

    fn store_with_class() -> MemStore {
        let mut store = MemStore::default();
        store
            .classes
            .insert("c1".to_string(), "6e A".to_string());
        store
    }

    #[test]
    fn subject_average_uses_fixed_weights() {
        assert_eq!(subject_average(10.0, 12.0, 16.0), 13.5);
        assert_eq!(subject_average(0.0, 0.0, 0.0), 0.0);
        assert!((INTERRO_WEIGHT + DEVOIR_WEIGHT + COMPO_WEIGHT - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn appreciation_threshold_is_ten() {
        assert_eq!(appreciation(10.0), "Passable");
        assert_eq!(appreciation(9.99), "Faible");
    }

    #[test]
    fn overall_average_is_coefficient_weighted() {
        let mut store = store_with_class();
        store.add_student("s1", "Ama", "Koffi", "M001");
        store.add_subject("math", "Mathématiques", Some(2.0));
        store.add_subject("fr", "Français", Some(4.0));
        // subject averages 10.0 and 16.0
        store.add_grade("s1", "math", "T1", Some(10.0), Some(10.0), Some(10.0));
        store.add_grade("s1", "fr", "T1", Some(16.0), Some(16.0), Some(16.0));

        let agg = aggregate(&store, "s1", "T1").unwrap().unwrap();
        assert_eq!(agg.subjects.len(), 2);
        assert!((agg.overall_average - 14.0).abs() < 1e-9);
    }

    #[test]
    fn missing_components_count_as_zero() {
        let mut store = store_with_class();
        store.add_subject("math", "Mathématiques", None);
        store.add_grade("s1", "math", "T1", None, Some(12.0), Some(16.0));

        let agg = aggregate(&store, "s1", "T1").unwrap().unwrap();
        let subject = &agg.subjects[0];
        assert_eq!(subject.interro, 0.0);
        assert!((subject.average - (0.25 * 12.0 + 0.5 * 16.0)).abs() < 1e-9);
        assert_eq!(subject.coefficient, DEFAULT_COEFFICIENT);
    }

    #[test]
    fn unresolved_subject_is_skipped() {
        let mut store = store_with_class();
        store.add_subject("math", "Mathématiques", Some(2.0));
        store.add_grade("s1", "math", "T1", Some(12.0), Some(12.0), Some(12.0));
        store.add_grade("s1", "ghost", "T1", Some(20.0), Some(20.0), Some(20.0));

        let agg = aggregate(&store, "s1", "T1").unwrap().unwrap();
        assert_eq!(agg.subjects.len(), 1);
        assert!((agg.overall_average - 12.0).abs() < 1e-9);
    }

    #[test]
    fn no_rows_means_absent() {
        let store = store_with_class();
        assert!(aggregate(&store, "s1", "T1").unwrap().is_none());
    }

    #[test]
    fn zero_total_coefficient_yields_zero_overall() {
        let mut store = store_with_class();
        store.add_subject("opt", "Option", Some(0.0));
        store.add_grade("s1", "opt", "T1", Some(18.0), Some(18.0), Some(18.0));

        let agg = aggregate(&store, "s1", "T1").unwrap().unwrap();
        assert_eq!(agg.overall_average, 0.0);
    }

    #[test]
    fn rank_formatting() {
        assert_eq!(format_rank(1), "1er");
        assert_eq!(format_rank(2), "2e");
        assert_eq!(format_rank(11), "11e");
    }

    fn seed_class_with_averages(store: &mut MemStore, scores: &[(&str, f64)]) {
        store.add_subject("math", "Mathématiques", Some(2.0));
        for (sid, avg) in scores {
            store.enroll(sid, "c1");
            // uniform components so the subject average equals `avg`
            store.add_grade(sid, "math", "T1", Some(*avg), Some(*avg), Some(*avg));
        }
    }

    #[test]
    fn ties_resolve_to_first_match_rank() {
        let mut store = store_with_class();
        seed_class_with_averages(
            &mut store,
            &[("s1", 18.0), ("s2", 15.0), ("s3", 15.0), ("s4", 10.0)],
        );

        let standing = class_standing(&store, "c1", "T1").unwrap();
        assert_eq!(standing.rank_label("s1"), "1er");
        // Both 15s share the first occurrence's rank; nobody is 3e.
        assert_eq!(standing.rank_label("s2"), "2e");
        assert_eq!(standing.rank_label("s3"), "2e");
        assert_eq!(standing.rank_label("s4"), "4e");
    }

    #[test]
    fn student_without_data_ranks_as_dash() {
        let mut store = store_with_class();
        seed_class_with_averages(&mut store, &[("s1", 18.0), ("s2", 12.0)]);
        store.enroll("s3", "c1");

        let standing = class_standing(&store, "c1", "T1").unwrap();
        assert_eq!(standing.rank_label("s3"), "-");
        assert!(standing.aggregate_for("s3").is_none());
    }

    #[test]
    fn standing_survives_one_students_storage_failure() {
        let mut store = store_with_class();
        seed_class_with_averages(&mut store, &[("s1", 18.0), ("s2", 12.0)]);
        store.fail_grades = Some("s2".to_string());

        let standing = class_standing(&store, "c1", "T1").unwrap();
        assert_eq!(standing.rank_label("s1"), "1er");
        assert!(standing.aggregate_for("s2").is_none());
        assert_eq!(standing.failed_count(), 1);
        assert_eq!(
            standing.failure_for("s2").map(|e| e.code.as_str()),
            Some("db_query_failed")
        );
    }

    #[test]
    fn no_data_student_matches_a_zero_average_classmate() {
        // Legacy first-match quirk: the no-data default of 0.0 collides with
        // a classmate whose average really is 0.0.
        let mut store = store_with_class();
        seed_class_with_averages(&mut store, &[("s1", 12.0), ("s2", 0.0)]);
        store.enroll("s3", "c1");

        let standing = class_standing(&store, "c1", "T1").unwrap();
        assert_eq!(standing.rank_label("s2"), "2e");
        assert_eq!(standing.rank_label("s3"), "2e");
    }
}
