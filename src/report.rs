use std::fmt::Write as _;

use crate::calc::{SubjectAverage, PASS_MARK};
use crate::store::{BulletinError, SchoolInfo};

/// Identity and summary fields printed on one bulletin.
#[derive(Debug, Clone)]
pub struct StudentHeader {
    pub name: String,
    pub matricule: String,
    pub academic_year: String,
    pub period: String,
    pub class_name: String,
    pub rank: String,
    pub overall_average: f64,
}

pub fn verdict(overall_average: f64) -> &'static str {
    if overall_average >= PASS_MARK {
        "PASSAGE"
    } else {
        "REDOUBLEMENT"
    }
}

/// "T1" style period ids print as their French trimester label; anything
/// else passes through verbatim.
pub fn period_label(period_id: &str) -> String {
    match period_id {
        "T1" => "Trimestre 1".to_string(),
        "T2" => "Trimestre 2".to_string(),
        "T3" => "Trimestre 3".to_string(),
        other => other.to_string(),
    }
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

fn render_err(e: std::fmt::Error) -> BulletinError {
    BulletinError::new("render_failed", e.to_string())
}

/// Lays out one bulletin as a self-contained HTML document.
///
/// The block order is fixed: school header, title block, student identity
/// row, grade table, summary, signatures. Output depends only on the
/// arguments, so identical inputs yield byte-identical documents.
pub fn render_bulletin(
    student: &StudentHeader,
    subjects: &[SubjectAverage],
    school: &SchoolInfo,
) -> Result<Vec<u8>, BulletinError> {
    let mut html = String::with_capacity(4096);

    html.push_str("<!DOCTYPE html>\n<html lang=\"fr\">\n<head>\n<meta charset=\"utf-8\">\n");
    write!(html, "<title>Bulletin {}</title>\n", escape(&student.matricule)).map_err(render_err)?;
    html.push_str(
        "<style>\n\
         body { font-family: Helvetica, Arial, sans-serif; font-size: 10pt; margin: 2cm; }\n\
         h1 { font-size: 14pt; margin: 0; }\n\
         h2 { font-size: 12pt; margin: 1cm 0 0.2cm 0; }\n\
         table { border-collapse: collapse; width: 100%; margin-top: 0.5cm; }\n\
         .grades th, .grades td { border: 0.5pt solid #000; padding: 4pt; text-align: center; }\n\
         .grades th { background: #808080; color: #f5f5f5; }\n\
         .grades td { background: #f5f5dc; }\n\
         .grades td.subject { text-align: left; }\n\
         .summary td { border: 1pt solid #000; padding: 6pt; background: #d3d3d3; font-weight: bold; font-size: 12pt; }\n\
         .identity td { font-weight: bold; padding: 3pt 0; }\n\
         .signatures td { padding-top: 2cm; width: 33%; }\n\
         </style>\n</head>\n<body>\n",
    );

    // 1. School header.
    write!(html, "<h1>{}</h1>\n", escape(&school.name)).map_err(render_err)?;
    write!(html, "<p>{}</p>\n", escape(&school.address)).map_err(render_err)?;
    write!(html, "<p>Contact: {}</p>\n", escape(&school.phone)).map_err(render_err)?;

    // 2. Title block.
    html.push_str("<h2>BULLETIN DE NOTES</h2>\n");
    write!(
        html,
        "<p>Année Scolaire: {}</p>\n<p>Période: {}</p>\n",
        escape(&student.academic_year),
        escape(&student.period)
    )
    .map_err(render_err)?;

    // 3. Student identity row.
    write!(
        html,
        "<table class=\"identity\">\n<tr><td>Élève: {}</td><td>Matricule: {}</td></tr>\n\
         <tr><td>Classe: {}</td><td>Rang: {}</td></tr>\n</table>\n",
        escape(&student.name),
        escape(&student.matricule),
        escape(&student.class_name),
        escape(&student.rank)
    )
    .map_err(render_err)?;

    // 4. Grade table.
    html.push_str(
        "<table class=\"grades\">\n<tr><th>Matière</th><th>Coef</th><th>Interro</th>\
         <th>Devoir</th><th>Compo</th><th>Moyenne</th><th>Appréciation</th></tr>\n",
    );
    for s in subjects {
        write!(
            html,
            "<tr><td class=\"subject\">{}</td><td>{}</td><td>{:.2}</td><td>{:.2}</td>\
             <td>{:.2}</td><td><strong>{:.2}</strong></td><td>{}</td></tr>\n",
            escape(&s.subject),
            s.coefficient,
            s.interro,
            s.devoir,
            s.compo,
            s.average,
            escape(s.appreciation)
        )
        .map_err(render_err)?;
    }
    html.push_str("</table>\n");

    // 5. Summary.
    write!(
        html,
        "<table class=\"summary\">\n<tr><td>MOYENNE GÉNÉRALE</td><td>{:.2} / 20</td></tr>\n\
         <tr><td>RÉSULTAT</td><td>{}</td></tr>\n</table>\n",
        student.overall_average,
        verdict(student.overall_average)
    )
    .map_err(render_err)?;

    // 6. Signatures.
    html.push_str(
        "<table class=\"signatures\">\n<tr><td>Le Parent</td><td></td>\
         <td>Le Chef d'Établissement</td></tr>\n</table>\n</body>\n</html>\n",
    );

    Ok(html.into_bytes())
}

pub fn bulletin_file_name(matricule: &str) -> String {
    format!("bulletin_{}.html", matricule)
}
