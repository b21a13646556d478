use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

use crate::store::{
    BulletinError, Enrollment, GradeRecord, GradeStore, SchoolInfo, StudentIdentity, SubjectInfo,
};

pub const DB_FILE: &str = "bulletins.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(db_path)?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS establishments(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            address TEXT NOT NULL DEFAULT '',
            phone TEXT NOT NULL DEFAULT ''
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS academic_years(
            id TEXT PRIMARY KEY,
            label TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            academic_year_id TEXT,
            FOREIGN KEY(academic_year_id) REFERENCES academic_years(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            coefficient REAL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            registration_number TEXT NOT NULL UNIQUE
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS enrollments(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            class_id TEXT NOT NULL,
            academic_year_id TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(academic_year_id) REFERENCES academic_years(id),
            UNIQUE(student_id, class_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_enrollments_class ON enrollments(class_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_enrollments_student ON enrollments(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS grades(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            period_id TEXT NOT NULL,
            interro_avg REAL,
            devoir_avg REAL,
            compo_grade REAL,
            updated_at TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id),
            UNIQUE(student_id, subject_id, period_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grades_student_period ON grades(student_id, period_id)",
        [],
    )?;

    Ok(())
}

fn query_err(e: rusqlite::Error) -> BulletinError {
    BulletinError::new("db_query_failed", e.to_string())
}

/// `GradeStore` backed by the workspace database.
pub struct SqliteStore<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl GradeStore for SqliteStore<'_> {
    fn school(&self) -> Result<Option<SchoolInfo>, BulletinError> {
        self.conn
            .query_row(
                "SELECT name, address, phone FROM establishments ORDER BY rowid LIMIT 1",
                [],
                |r| {
                    Ok(SchoolInfo {
                        name: r.get(0)?,
                        address: r.get(1)?,
                        phone: r.get(2)?,
                    })
                },
            )
            .optional()
            .map_err(query_err)
    }

    fn student(&self, student_id: &str) -> Result<Option<StudentIdentity>, BulletinError> {
        self.conn
            .query_row(
                "SELECT id, first_name, last_name, registration_number
                 FROM students WHERE id = ?",
                [student_id],
                |r| {
                    Ok(StudentIdentity {
                        id: r.get(0)?,
                        first_name: r.get(1)?,
                        last_name: r.get(2)?,
                        registration_number: r.get(3)?,
                    })
                },
            )
            .optional()
            .map_err(query_err)
    }

    fn class_name(&self, class_id: &str) -> Result<Option<String>, BulletinError> {
        self.conn
            .query_row("SELECT name FROM classes WHERE id = ?", [class_id], |r| {
                r.get(0)
            })
            .optional()
            .map_err(query_err)
    }

    fn subject(&self, subject_id: &str) -> Result<Option<SubjectInfo>, BulletinError> {
        self.conn
            .query_row(
                "SELECT id, name, coefficient FROM subjects WHERE id = ?",
                [subject_id],
                |r| {
                    Ok(SubjectInfo {
                        id: r.get(0)?,
                        name: r.get(1)?,
                        coefficient: r.get(2)?,
                    })
                },
            )
            .optional()
            .map_err(query_err)
    }

    fn academic_year_label(&self, year_id: &str) -> Result<Option<String>, BulletinError> {
        self.conn
            .query_row(
                "SELECT label FROM academic_years WHERE id = ?",
                [year_id],
                |r| r.get(0),
            )
            .optional()
            .map_err(query_err)
    }

    fn enrollment_for_student(
        &self,
        student_id: &str,
    ) -> Result<Option<Enrollment>, BulletinError> {
        self.conn
            .query_row(
                "SELECT student_id, class_id, academic_year_id
                 FROM enrollments WHERE student_id = ? ORDER BY rowid LIMIT 1",
                [student_id],
                |r| {
                    Ok(Enrollment {
                        student_id: r.get(0)?,
                        class_id: r.get(1)?,
                        academic_year_id: r.get(2)?,
                    })
                },
            )
            .optional()
            .map_err(query_err)
    }

    fn enrollments_for_class(&self, class_id: &str) -> Result<Vec<Enrollment>, BulletinError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT student_id, class_id, academic_year_id
                 FROM enrollments WHERE class_id = ? ORDER BY rowid",
            )
            .map_err(query_err)?;
        stmt.query_map([class_id], |r| {
            Ok(Enrollment {
                student_id: r.get(0)?,
                class_id: r.get(1)?,
                academic_year_id: r.get(2)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_err)
    }

    fn grades(
        &self,
        student_id: &str,
        period_id: &str,
    ) -> Result<Vec<GradeRecord>, BulletinError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT student_id, subject_id, period_id, interro_avg, devoir_avg, compo_grade
                 FROM grades WHERE student_id = ? AND period_id = ? ORDER BY rowid",
            )
            .map_err(query_err)?;
        stmt.query_map([student_id, period_id], |r| {
            Ok(GradeRecord {
                student_id: r.get(0)?,
                subject_id: r.get(1)?,
                period_id: r.get(2)?,
                interro_avg: r.get(3)?,
                devoir_avg: r.get(4)?,
                compo_grade: r.get(5)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_err)
    }
}
