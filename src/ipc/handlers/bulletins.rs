use crate::calc::{self, SubjectAverage};
use crate::db::SqliteStore;
use crate::export::{self, CancelToken};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::report::{self, StudentHeader};
use crate::store::{BulletinError, GradeStore};
use serde_json::json;
use std::path::PathBuf;

use super::{core_err, db_conn, period_id, required_str};

/// Resolves one student's bulletin inputs: identity, enrollment, class,
/// batch class standing, rank and aggregate. Shared by the JSON model and
/// the document endpoint so both report identical numbers.
fn build_bulletin(
    store: &dyn GradeStore,
    student_id: &str,
    period: &str,
) -> Result<(StudentHeader, Vec<SubjectAverage>), BulletinError> {
    let Some(student) = store.student(student_id)? else {
        return Err(BulletinError::new("not_found", "student not found"));
    };
    let Some(enrollment) = store.enrollment_for_student(student_id)? else {
        return Err(BulletinError::new(
            "not_found",
            "student not enrolled in any class",
        ));
    };
    let class_name = store
        .class_name(&enrollment.class_id)?
        .unwrap_or_else(|| "Unknown".to_string());

    let standing = calc::class_standing(store, &enrollment.class_id, period)?;
    // The standing pass tolerates per-student storage faults for the sake
    // of the rest of the class; for the requested student the fault is the
    // answer.
    if let Some(e) = standing.failure_for(student_id) {
        return Err(e.clone());
    }
    let Some(aggregate) = standing.aggregate_for(student_id) else {
        return Err(BulletinError::new(
            "no_grades",
            "no grades found for this period",
        ));
    };

    let academic_year = match enrollment.academic_year_id.as_deref() {
        Some(year_id) => store
            .academic_year_label(year_id)?
            .unwrap_or_else(|| "-".to_string()),
        None => "-".to_string(),
    };

    let header = StudentHeader {
        name: student.display_name(),
        matricule: student.registration_number,
        academic_year,
        period: report::period_label(period),
        class_name,
        rank: standing.rank_label(student_id),
        overall_average: aggregate.overall_average,
    };
    Ok((header, aggregate.subjects.clone()))
}

fn handle_summary_model(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let period = period_id(req);

    let store = SqliteStore::new(conn);
    match build_bulletin(&store, &student_id, &period) {
        Ok((header, subjects)) => ok(
            &req.id,
            json!({
                "student": {
                    "id": student_id,
                    "name": header.name,
                    "matricule": header.matricule,
                },
                "class": header.class_name,
                "academicYear": header.academic_year,
                "periodId": period,
                "periodLabel": header.period,
                "rank": header.rank,
                "overallAverage": header.overall_average,
                "verdict": report::verdict(header.overall_average),
                "subjects": subjects,
            }),
        ),
        Err(e) => core_err(req, e),
    }
}

fn handle_single(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let out_path = match required_str(req, "outPath") {
        Ok(v) => PathBuf::from(v),
        Err(e) => return e,
    };
    let period = period_id(req);

    let store = SqliteStore::new(conn);
    let (header, subjects) = match build_bulletin(&store, &student_id, &period) {
        Ok(v) => v,
        Err(e) => return core_err(req, e),
    };
    let school = match store.school() {
        Ok(v) => v.unwrap_or_default(),
        Err(e) => return core_err(req, e),
    };

    // Render failures are fatal for a single-student request.
    let document = match report::render_bulletin(&header, &subjects, &school) {
        Ok(v) => v,
        Err(e) => return core_err(req, e),
    };

    if let Some(parent) = out_path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            return err(&req.id, "io_failed", e.to_string(), None);
        }
    }
    let byte_count = document.len();
    if let Err(e) = std::fs::write(&out_path, document) {
        return err(&req.id, "io_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({
            "outPath": out_path.to_string_lossy(),
            "fileName": report::bulletin_file_name(&header.matricule),
            "byteCount": byte_count,
            "rank": header.rank,
            "overallAverage": header.overall_average,
        }),
    )
}

fn handle_bulk(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let out_path = match required_str(req, "outPath") {
        Ok(v) => PathBuf::from(v),
        Err(e) => return e,
    };
    let period = period_id(req);

    let store = SqliteStore::new(conn);
    let outcome = match export::export_class(&store, &class_id, &period, &CancelToken::new()) {
        Ok(v) => v,
        Err(e) => return core_err(req, e),
    };

    if let Some(parent) = out_path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            return err(&req.id, "io_failed", e.to_string(), None);
        }
    }
    if let Err(e) = std::fs::write(&out_path, &outcome.archive) {
        return err(&req.id, "io_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({
            "outPath": out_path.to_string_lossy(),
            "fileName": export::archive_file_name(&class_id),
            "documentCount": outcome.document_count,
            "skippedNoData": outcome.skipped_no_data,
            "failed": outcome.failed,
            "cancelled": outcome.cancelled,
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "bulletins.summaryModel" => Some(handle_summary_model(state, req)),
        "bulletins.single" => Some(handle_single(state, req)),
        "bulletins.bulk" => Some(handle_bulk(state, req)),
        _ => None,
    }
}
