//! services/api/src/adapters/renderer.rs
//!
//! Writes finalized papers as plain-text documents under the generated papers
//! directory. Implements the `PaperRenderer` port.

use async_trait::async_trait;
use chrono::Utc;
use exam_paper_core::domain::{Question, QuestionId};
use exam_paper_core::ports::{PaperRenderer, PaperRequest, RenderError, RenderedPaper};
use std::collections::HashMap;
use std::fmt::Write;
use std::path::PathBuf;
use tracing::info;

#[derive(Clone)]
pub struct FilePaperRenderer {
    root: PathBuf,
}

impl FilePaperRenderer {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

/// `QP_<course>_draft_<id>_<timestamp>.txt`, with unsafe course characters replaced.
pub fn paper_file_name(course_code: &str, request: &PaperRequest) -> String {
    let course: String = course_code
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!(
        "QP_{}_draft_{}_{}.txt",
        course,
        request.draft_id,
        Utc::now().format("%Y%m%d%H%M%S")
    )
}

/// Lays out the header and both parts of a paper.
pub fn layout(request: &PaperRequest) -> Result<String, RenderError> {
    let by_id: HashMap<QuestionId, &Question> =
        request.questions.iter().map(|q| (q.id, q)).collect();
    let meta = &request.metadata;
    let mut doc = String::new();
    let fail = |e: std::fmt::Error| RenderError::Template(e.to_string());

    writeln!(doc, "{} - {}", meta.course_code, meta.course_title).map_err(fail)?;
    writeln!(doc, "{} | Semester: {}", meta.exam_type, meta.semester).map_err(fail)?;
    writeln!(
        doc,
        "Date: {}    Duration: {}    Maximum Marks: {}",
        meta.exam_date, meta.duration, meta.max_marks
    )
    .map_err(fail)?;
    let faculty = match &meta.faculty_department {
        Some(department) => writeln!(doc, "Faculty: {} ({department})", meta.faculty_name),
        None => writeln!(doc, "Faculty: {}", meta.faculty_name),
    };
    faculty.map_err(fail)?;

    let mut number = 0;
    for (part, ids) in &request.selections {
        if ids.is_empty() {
            continue;
        }
        let marks: u32 = ids.iter().filter_map(|id| by_id.get(id)).map(|q| q.marks).sum();
        writeln!(doc, "\nPART {part} ({marks} Marks)\n").map_err(fail)?;
        for id in ids {
            let question = by_id
                .get(id)
                .ok_or_else(|| RenderError::Template(format!("question {id} is missing")))?;
            number += 1;
            writeln!(
                doc,
                "{number}. {} [{} Marks] [{}] [{}]",
                question.text, question.marks, question.co, question.bt
            )
            .map_err(fail)?;
        }
    }

    if number == 0 {
        return Err(RenderError::NoQuestions);
    }
    Ok(doc)
}

#[async_trait]
impl PaperRenderer for FilePaperRenderer {
    async fn render_paper(&self, request: &PaperRequest) -> Result<RenderedPaper, RenderError> {
        let document = layout(request)?;
        let file_name = paper_file_name(&request.metadata.course_code, request);

        tokio::fs::create_dir_all(&self.root).await?;
        tokio::fs::write(self.root.join(&file_name), document).await?;
        info!(draft_id = %request.draft_id, file = %file_name, "paper written");

        Ok(RenderedPaper {
            relative_path: file_name.clone(),
            file_name,
        })
    }
}
