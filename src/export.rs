use serde_json::json;
use sha2::{Digest, Sha256};
use std::io::{Cursor, Write};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use tracing::warn;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::calc::{self, SubjectAverage};
use crate::report::{self, StudentHeader};
use crate::store::{BulletinError, GradeStore, SchoolInfo};

pub const ARCHIVE_FORMAT: &str = "bulletins-archive-v1";
const MANIFEST_ENTRY: &str = "manifest.json";

/// Render workers stop picking up new students once the token is set; the
/// archive built so far stays valid.
#[derive(Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub struct ExportOutcome {
    pub archive: Vec<u8>,
    pub document_count: usize,
    pub skipped_no_data: usize,
    pub failed: usize,
    pub cancelled: bool,
}

struct RenderJob {
    student_id: String,
    matricule: String,
    header: StudentHeader,
    subjects: Vec<SubjectAverage>,
}

pub fn archive_file_name(class_id: &str) -> String {
    format!("bulletins_{}.zip", class_id)
}

/// Renders a bulletin for every enrolled student with data and packs the
/// results into one zip archive.
///
/// Per-student faults (aggregation, identity lookup, rendering) are logged
/// and counted, never fatal for the batch; students without grade rows are
/// skipped without being counted as failures. A class where nobody yields
/// a document still produces a valid archive.
pub fn export_class(
    store: &dyn GradeStore,
    class_id: &str,
    period_id: &str,
    cancel: &CancelToken,
) -> Result<ExportOutcome, BulletinError> {
    let Some(class_name) = store.class_name(class_id)? else {
        return Err(BulletinError::new("not_found", "class not found"));
    };
    let school = store.school()?.unwrap_or_default();
    let standing = calc::class_standing(store, class_id, period_id)?;
    let enrollments = store.enrollments_for_class(class_id)?;

    let mut skipped_no_data = 0_usize;
    // Students whose aggregation failed were already logged by the
    // standing pass; count them here and skip them below.
    let mut failed = standing.failed_count();
    let mut jobs: Vec<RenderJob> = Vec::with_capacity(enrollments.len());

    for enrollment in &enrollments {
        if standing.failure_for(&enrollment.student_id).is_some() {
            continue;
        }

        let student = match store.student(&enrollment.student_id) {
            Ok(Some(s)) => s,
            Ok(None) => {
                warn!(student_id = %enrollment.student_id, "enrolled student has no identity row; skipping");
                failed += 1;
                continue;
            }
            Err(e) => {
                warn!(student_id = %enrollment.student_id, error = %e, "identity read failed; skipping");
                failed += 1;
                continue;
            }
        };

        let Some(agg) = standing.aggregate_for(&student.id) else {
            skipped_no_data += 1;
            continue;
        };

        let academic_year = match enrollment.academic_year_id.as_deref() {
            Some(year_id) => match store.academic_year_label(year_id) {
                Ok(label) => label.unwrap_or_else(|| "-".to_string()),
                Err(e) => {
                    warn!(student_id = %student.id, error = %e, "academic year read failed; skipping");
                    failed += 1;
                    continue;
                }
            },
            None => "-".to_string(),
        };

        jobs.push(RenderJob {
            student_id: student.id.clone(),
            matricule: student.registration_number.clone(),
            header: StudentHeader {
                name: student.display_name(),
                matricule: student.registration_number.clone(),
                academic_year,
                period: report::period_label(period_id),
                class_name: class_name.clone(),
                rank: standing.rank_label(&student.id),
                overall_average: agg.overall_average,
            },
            subjects: agg.subjects.clone(),
        });
    }

    let rendered = render_jobs(&jobs, &school, cancel, &mut failed);
    let (archive, document_count) = write_archive(class_id, period_id, rendered)?;

    Ok(ExportOutcome {
        archive,
        document_count,
        skipped_no_data,
        failed,
        cancelled: cancel.is_cancelled(),
    })
}

/// Fan-out/fan-in render phase. Jobs are independent and side-effect-free;
/// results funnel through one channel so the archive writer stays a single
/// serialized consumer.
fn render_jobs(
    jobs: &[RenderJob],
    school: &SchoolInfo,
    cancel: &CancelToken,
    failed: &mut usize,
) -> Vec<(String, Vec<u8>)> {
    let (tx, rx) = mpsc::channel::<Result<(String, Vec<u8>), (String, BulletinError)>>();
    let next = AtomicUsize::new(0);
    let worker_count = jobs.len().clamp(1, 4);

    std::thread::scope(|scope| {
        for _ in 0..worker_count {
            let tx = tx.clone();
            let next = &next;
            scope.spawn(move || loop {
                if cancel.is_cancelled() {
                    break;
                }
                let i = next.fetch_add(1, Ordering::SeqCst);
                let Some(job) = jobs.get(i) else {
                    break;
                };
                let result = report::render_bulletin(&job.header, &job.subjects, school)
                    .map(|bytes| (report::bulletin_file_name(&job.matricule), bytes))
                    .map_err(|e| (job.student_id.clone(), e));
                if tx.send(result).is_err() {
                    break;
                }
            });
        }
    });
    drop(tx);

    let mut rendered: Vec<(String, Vec<u8>)> = Vec::with_capacity(jobs.len());
    for result in rx {
        match result {
            Ok(entry) => rendered.push(entry),
            Err((student_id, e)) => {
                warn!(student_id = %student_id, error = %e, "bulletin render failed; skipping");
                *failed += 1;
            }
        }
    }
    // Workers finish in arbitrary order; sort so identical inputs give
    // identical archives.
    rendered.sort_by(|a, b| a.0.cmp(&b.0));
    rendered
}

fn zip_err(e: impl std::fmt::Display) -> BulletinError {
    BulletinError::new("zip_write_failed", e.to_string())
}

fn write_archive(
    class_id: &str,
    period_id: &str,
    rendered: Vec<(String, Vec<u8>)>,
) -> Result<(Vec<u8>, usize), BulletinError> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut manifest_docs = Vec::with_capacity(rendered.len());
    for (name, bytes) in &rendered {
        zip.start_file(name.as_str(), opts).map_err(zip_err)?;
        zip.write_all(bytes).map_err(zip_err)?;
        manifest_docs.push(json!({
            "name": name,
            "sha256": sha256_hex(bytes),
        }));
    }

    let manifest = json!({
        "format": ARCHIVE_FORMAT,
        "version": 1,
        "appVersion": env!("CARGO_PKG_VERSION"),
        "classId": class_id,
        "periodId": period_id,
        "documents": manifest_docs,
    });
    zip.start_file(MANIFEST_ENTRY, opts).map_err(zip_err)?;
    zip.write_all(
        serde_json::to_string_pretty(&manifest)
            .map_err(zip_err)?
            .as_bytes(),
    )
    .map_err(zip_err)?;

    let cursor = zip.finish().map_err(zip_err)?;
    Ok((cursor.into_inner(), rendered.len()))
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}
