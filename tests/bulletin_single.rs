use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_bulletind");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn bulletind");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({ "id": id, "method": method, "params": params });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown error")
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn error_code(value: &serde_json::Value) -> &str {
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
}

struct Sidecar {
    child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    seq: u64,
}

impl Sidecar {
    fn open(workspace: &PathBuf) -> Self {
        let (child, mut stdin, mut reader) = spawn_sidecar();
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            "ws",
            "workspace.select",
            json!({ "path": workspace.to_string_lossy() }),
        );
        Self {
            child,
            stdin,
            reader,
            seq: 0,
        }
    }

    fn call_ok(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        self.seq += 1;
        let id = format!("r{}", self.seq);
        request_ok(&mut self.stdin, &mut self.reader, &id, method, params)
    }

    fn call(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        self.seq += 1;
        let id = format!("r{}", self.seq);
        request(&mut self.stdin, &mut self.reader, &id, method, params)
    }

    fn str_of(result: &serde_json::Value, key: &str) -> String {
        result
            .get(key)
            .and_then(|v| v.as_str())
            .unwrap_or_else(|| panic!("missing {}", key))
            .to_string()
    }
}

impl Drop for Sidecar {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// One student, two subjects. Checks the rendered document's fixed blocks
/// and the weighted numbers end to end.
#[test]
fn single_bulletin_document() {
    let workspace = temp_dir("bulletind-single");
    let mut sc = Sidecar::open(&workspace);

    sc.call_ok(
        "school.set",
        json!({
            "name": "Lycée Moderne de Tokoin",
            "address": "Lomé, Togo",
            "phone": "+228 22 21 00 00"
        }),
    );
    let year = sc.call_ok("years.create", json!({ "label": "2023-2024" }));
    let year_id = Sidecar::str_of(&year, "yearId");
    let class = sc.call_ok(
        "classes.create",
        json!({ "name": "6e A", "academicYearId": year_id }),
    );
    let class_id = Sidecar::str_of(&class, "classId");

    let math = sc.call_ok(
        "subjects.create",
        json!({ "name": "Mathématiques", "coefficient": 2 }),
    );
    let math_id = Sidecar::str_of(&math, "subjectId");
    let fr = sc.call_ok(
        "subjects.create",
        json!({ "name": "Français", "coefficient": 4 }),
    );
    let fr_id = Sidecar::str_of(&fr, "subjectId");

    let student = sc.call_ok(
        "students.create",
        json!({
            "firstName": "Ama",
            "lastName": "Koffi",
            "registrationNumber": "M001"
        }),
    );
    let student_id = Sidecar::str_of(&student, "studentId");
    sc.call_ok(
        "students.enroll",
        json!({ "studentId": student_id, "classId": class_id, "academicYearId": year_id }),
    );

    // math subject average 10.0, français 16.0 -> overall (10*2+16*4)/6 = 14.0
    sc.call_ok(
        "grades.set",
        json!({
            "studentId": student_id, "subjectId": math_id, "periodId": "T1",
            "interro": 10, "devoir": 10, "compo": 10
        }),
    );
    sc.call_ok(
        "grades.set",
        json!({
            "studentId": student_id, "subjectId": fr_id, "periodId": "T1",
            "interro": 16, "devoir": 16, "compo": 16
        }),
    );

    let model = sc.call_ok(
        "bulletins.summaryModel",
        json!({ "studentId": student_id, "periodId": "T1" }),
    );
    assert_eq!(model.get("rank").and_then(|v| v.as_str()), Some("1er"));
    assert_eq!(
        model.get("overallAverage").and_then(|v| v.as_f64()),
        Some(14.0)
    );
    assert_eq!(model.get("verdict").and_then(|v| v.as_str()), Some("PASSAGE"));
    assert_eq!(
        model.get("periodLabel").and_then(|v| v.as_str()),
        Some("Trimestre 1")
    );
    assert_eq!(
        model
            .get("subjects")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(2)
    );

    let out_path = workspace.join("out").join("bulletin_M001.html");
    let result = sc.call_ok(
        "bulletins.single",
        json!({
            "studentId": student_id,
            "periodId": "T1",
            "outPath": out_path.to_string_lossy()
        }),
    );
    assert_eq!(
        result.get("fileName").and_then(|v| v.as_str()),
        Some("bulletin_M001.html")
    );

    let text = std::fs::read_to_string(&out_path).expect("read bulletin");
    assert!(text.contains("Lycée Moderne de Tokoin"));
    assert!(text.contains("BULLETIN DE NOTES"));
    assert!(text.contains("Année Scolaire: 2023-2024"));
    assert!(text.contains("Période: Trimestre 1"));
    assert!(text.contains("Élève: Ama Koffi"));
    assert!(text.contains("Rang: 1er"));
    assert!(text.contains("14.00 / 20"));
    assert!(text.contains("PASSAGE"));
    assert!(text.contains("Le Chef d'Établissement"));

    // Same inputs, same bytes.
    let first = std::fs::read(&out_path).expect("read first render");
    sc.call_ok(
        "bulletins.single",
        json!({
            "studentId": student_id,
            "periodId": "T1",
            "outPath": out_path.to_string_lossy()
        }),
    );
    let second = std::fs::read(&out_path).expect("read second render");
    assert_eq!(first, second);
}

#[test]
fn single_bulletin_error_paths() {
    let workspace = temp_dir("bulletind-single-errors");
    let mut sc = Sidecar::open(&workspace);

    let class = sc.call_ok("classes.create", json!({ "name": "6e B" }));
    let class_id = Sidecar::str_of(&class, "classId");

    let out_path = workspace.join("bulletin.html");

    // Unknown student.
    let resp = sc.call(
        "bulletins.single",
        json!({ "studentId": "missing", "outPath": out_path.to_string_lossy() }),
    );
    assert_eq!(error_code(&resp), "not_found");

    // Known student, no enrollment.
    let stray = sc.call_ok(
        "students.create",
        json!({ "firstName": "Sans", "lastName": "Classe", "registrationNumber": "M900" }),
    );
    let stray_id = Sidecar::str_of(&stray, "studentId");
    let resp = sc.call(
        "bulletins.single",
        json!({ "studentId": stray_id, "outPath": out_path.to_string_lossy() }),
    );
    assert_eq!(error_code(&resp), "not_found");

    // Enrolled student with no grade rows for the period.
    let student = sc.call_ok(
        "students.create",
        json!({ "firstName": "Kodjo", "lastName": "Mensah", "registrationNumber": "M901" }),
    );
    let student_id = Sidecar::str_of(&student, "studentId");
    sc.call_ok(
        "students.enroll",
        json!({ "studentId": student_id, "classId": class_id }),
    );
    let resp = sc.call(
        "bulletins.single",
        json!({ "studentId": student_id, "outPath": out_path.to_string_lossy() }),
    );
    assert_eq!(error_code(&resp), "no_grades");
    assert!(!out_path.exists());
}

#[test]
fn scores_are_clamped_into_grading_scale() {
    let workspace = temp_dir("bulletind-clamp");
    let mut sc = Sidecar::open(&workspace);

    let class = sc.call_ok("classes.create", json!({ "name": "6e C" }));
    let class_id = Sidecar::str_of(&class, "classId");
    let subject = sc.call_ok("subjects.create", json!({ "name": "Physique" }));
    let subject_id = Sidecar::str_of(&subject, "subjectId");
    let student = sc.call_ok(
        "students.create",
        json!({ "firstName": "Afi", "lastName": "Dogbe", "registrationNumber": "M050" }),
    );
    let student_id = Sidecar::str_of(&student, "studentId");
    sc.call_ok(
        "students.enroll",
        json!({ "studentId": student_id, "classId": class_id }),
    );

    let saved = sc.call_ok(
        "grades.set",
        json!({
            "studentId": student_id, "subjectId": subject_id,
            "interro": 25, "devoir": -3, "compo": 12
        }),
    );
    assert_eq!(saved.get("interro").and_then(|v| v.as_f64()), Some(20.0));
    assert_eq!(saved.get("devoir").and_then(|v| v.as_f64()), Some(0.0));
    assert_eq!(saved.get("compo").and_then(|v| v.as_f64()), Some(12.0));

    // 20*0.25 + 0*0.25 + 12*0.5 = 11.0
    let model = sc.call_ok(
        "bulletins.summaryModel",
        json!({ "studentId": student_id }),
    );
    assert_eq!(
        model.get("overallAverage").and_then(|v| v.as_f64()),
        Some(11.0)
    );
}

/// A line that is not JSON still gets a parseable error line back, and the
/// daemon keeps serving afterwards.
#[test]
fn malformed_request_line_yields_parseable_error() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    writeln!(stdin, "{{\"id\": \"r1\", \"method\"").expect("write garbage line");
    stdin.flush().expect("flush");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read error line");
    let value: serde_json::Value =
        serde_json::from_str(line.trim()).expect("error response must be valid json");
    assert_eq!(value.get("ok").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(
        value
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str()),
        Some("bad_json")
    );

    let health = request(&mut stdin, &mut reader, "r2", "health", json!({}));
    assert_eq!(health.get("ok").and_then(|v| v.as_bool()), Some(true));

    let _ = child.kill();
    let _ = child.wait();
}
