use serde::Serialize;

/// Error shape every core component reports through. The IPC layer maps
/// `code` straight onto the wire envelope.
#[derive(Debug, Clone, Serialize)]
pub struct BulletinError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl BulletinError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }
}

impl std::fmt::Display for BulletinError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for BulletinError {}

#[derive(Debug, Clone, Default)]
pub struct SchoolInfo {
    pub name: String,
    pub address: String,
    pub phone: String,
}

#[derive(Debug, Clone)]
pub struct StudentIdentity {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub registration_number: String,
}

impl StudentIdentity {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

#[derive(Debug, Clone)]
pub struct Enrollment {
    pub student_id: String,
    pub class_id: String,
    pub academic_year_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SubjectInfo {
    pub id: String,
    pub name: String,
    /// Weight in the overall average; rows without one fall back to the
    /// default applied in `calc`.
    pub coefficient: Option<f64>,
}

/// One raw grade row: the three component scores for a
/// (student, subject, period) triple. Absent components count as zero.
#[derive(Debug, Clone)]
pub struct GradeRecord {
    pub student_id: String,
    pub subject_id: String,
    pub period_id: String,
    pub interro_avg: Option<f64>,
    pub devoir_avg: Option<f64>,
    pub compo_grade: Option<f64>,
}

/// Read-only view of the storage collaborator. The aggregation, ranking and
/// export pipeline depends on this capability set only, never on a concrete
/// store.
pub trait GradeStore {
    fn school(&self) -> Result<Option<SchoolInfo>, BulletinError>;
    fn student(&self, student_id: &str) -> Result<Option<StudentIdentity>, BulletinError>;
    fn class_name(&self, class_id: &str) -> Result<Option<String>, BulletinError>;
    fn subject(&self, subject_id: &str) -> Result<Option<SubjectInfo>, BulletinError>;
    fn academic_year_label(&self, year_id: &str) -> Result<Option<String>, BulletinError>;
    fn enrollment_for_student(&self, student_id: &str)
        -> Result<Option<Enrollment>, BulletinError>;
    fn enrollments_for_class(&self, class_id: &str) -> Result<Vec<Enrollment>, BulletinError>;
    fn grades(&self, student_id: &str, period_id: &str)
        -> Result<Vec<GradeRecord>, BulletinError>;
}
