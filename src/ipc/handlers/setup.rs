use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use uuid::Uuid;

use super::{db_conn, period_id, required_str};

fn optional_str(req: &Request, key: &str) -> Option<String> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
}

/// The one data-entry validation in scope: scores are clamped into the
/// 0..=20 grading scale.
fn clamped_score(req: &Request, key: &str) -> Option<f64> {
    req.params
        .get(key)
        .and_then(|v| v.as_f64())
        .map(|v| v.clamp(0.0, 20.0))
}

fn handle_school_set(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let address = optional_str(req, "address").unwrap_or_default();
    let phone = optional_str(req, "phone").unwrap_or_default();

    // Single-establishment workspace; keep one row.
    if let Err(e) = conn.execute(
        "INSERT INTO establishments(id, name, address, phone) VALUES('school', ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET name = excluded.name,
                                       address = excluded.address,
                                       phone = excluded.phone",
        (&name, &address, &phone),
    ) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "name": name }))
}

fn handle_years_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let label = match required_str(req, "label") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let year_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO academic_years(id, label) VALUES(?, ?)",
        (&year_id, &label),
    ) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "yearId": year_id, "label": label }))
}

fn handle_classes_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v.trim().to_string(),
        Err(e) => return e,
    };
    if name.is_empty() {
        return err(&req.id, "bad_params", "name must not be empty", None);
    }
    let academic_year_id = optional_str(req, "academicYearId");

    let class_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO classes(id, name, academic_year_id) VALUES(?, ?, ?)",
        (&class_id, &name, &academic_year_id),
    ) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "classId": class_id, "name": name }))
}

fn handle_subjects_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let coefficient = req.params.get("coefficient").and_then(|v| v.as_f64());

    let subject_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO subjects(id, name, coefficient) VALUES(?, ?, ?)",
        (&subject_id, &name, &coefficient),
    ) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "subjectId": subject_id }))
}

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let first_name = match required_str(req, "firstName") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let last_name = match required_str(req, "lastName") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let registration_number = match required_str(req, "registrationNumber") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let student_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO students(id, first_name, last_name, registration_number)
         VALUES(?, ?, ?, ?)",
        (&student_id, &first_name, &last_name, &registration_number),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }
    ok(&req.id, json!({ "studentId": student_id }))
}

fn handle_students_enroll(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let academic_year_id = optional_str(req, "academicYearId");

    let enrollment_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO enrollments(id, student_id, class_id, academic_year_id)
         VALUES(?, ?, ?, ?)",
        (&enrollment_id, &student_id, &class_id, &academic_year_id),
    ) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "enrollmentId": enrollment_id }))
}

fn handle_grades_set(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let subject_id = match required_str(req, "subjectId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let period = period_id(req);
    let interro = clamped_score(req, "interro");
    let devoir = clamped_score(req, "devoir");
    let compo = clamped_score(req, "compo");
    let updated_at = chrono::Utc::now().to_rfc3339();

    let grade_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO grades(id, student_id, subject_id, period_id,
                            interro_avg, devoir_avg, compo_grade, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(student_id, subject_id, period_id) DO UPDATE SET
             interro_avg = excluded.interro_avg,
             devoir_avg = excluded.devoir_avg,
             compo_grade = excluded.compo_grade,
             updated_at = excluded.updated_at",
        (
            &grade_id,
            &student_id,
            &subject_id,
            &period,
            &interro,
            &devoir,
            &compo,
            &updated_at,
        ),
    ) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }
    ok(
        &req.id,
        json!({
            "studentId": student_id,
            "subjectId": subject_id,
            "periodId": period,
            "interro": interro,
            "devoir": devoir,
            "compo": compo
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "school.set" => Some(handle_school_set(state, req)),
        "years.create" => Some(handle_years_create(state, req)),
        "classes.create" => Some(handle_classes_create(state, req)),
        "subjects.create" => Some(handle_subjects_create(state, req)),
        "students.create" => Some(handle_students_create(state, req)),
        "students.enroll" => Some(handle_students_enroll(state, req)),
        "grades.set" => Some(handle_grades_set(state, req)),
        _ => None,
    }
}
