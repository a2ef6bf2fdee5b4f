use anyhow::{Context, Result};
use axum::{
    Json,
    extract::State,
    http::header,
    response::{IntoResponse, Response},
};
use bh_api_types::CertificateRequest;
use lopdf::content::Content;
use lopdf::{Document, Object};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::{ApiError, AppState, bad_request, internal_error};

const MANIFEST_FILE: &str = "courses.json";
const USER_NAME_TOKEN: &[u8] = b"{{userName}}";
const COURSE_NAME_TOKEN: &[u8] = b"{{courseName}}";
const DATE_TOKEN: &[u8] = b"{{date}}";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CourseTemplate {
    pub(crate) template: String,
    pub(crate) course_name: String,
}

/// Course id to PDF template, read from `courses.json` in the template
/// directory.
#[derive(Debug, Default)]
pub(crate) struct CertificateTemplates {
    dir: PathBuf,
    courses: HashMap<String, CourseTemplate>,
}

impl CertificateTemplates {
    pub(crate) async fn load(dir: &Path) -> Result<Self> {
        let manifest_path = dir.join(MANIFEST_FILE);
        let raw = tokio::fs::read(&manifest_path)
            .await
            .with_context(|| format!("failed to read {}", manifest_path.display()))?;
        let courses: HashMap<String, CourseTemplate> =
            serde_json::from_slice(&raw).with_context(|| format!("{} is not a course manifest", manifest_path.display()))?;
        info!(count = courses.len(), dir = %dir.display(), "loaded certificate templates");
        Ok(Self::new(dir.to_path_buf(), courses))
    }

    pub(crate) fn new(dir: PathBuf, courses: HashMap<String, CourseTemplate>) -> Self {
        Self { dir, courses }
    }

    async fn render(&self, course: &CourseTemplate, user_name: &str, date: &str) -> Result<Vec<u8>> {
        let path = self.dir.join(&course.template);
        let template = tokio::fs::read(&path)
            .await
            .with_context(|| format!("failed to read template {}", path.display()))?;
        fill_template(&template, user_name, &course.course_name, date)
            .with_context(|| format!("failed to fill template {}", path.display()))
    }
}

fn replace_all(haystack: &[u8], token: &[u8], value: &[u8]) -> Vec<u8> {
    let mut output = Vec::with_capacity(haystack.len());
    let mut rest = haystack;
    while let Some(position) = rest.windows(token.len()).position(|window| window == token) {
        output.extend_from_slice(&rest[..position]);
        output.extend_from_slice(value);
        rest = &rest[position + token.len()..];
    }
    output.extend_from_slice(rest);
    output
}

fn fill_operand(operand: &mut Object, fields: &[(&[u8], &str)]) -> bool {
    match operand {
        Object::String(bytes, _) => {
            let mut changed = false;
            for (token, value) in fields {
                if bytes.windows(token.len()).any(|window| window == *token) {
                    *bytes = replace_all(bytes, token, value.as_bytes());
                    changed = true;
                }
            }
            changed
        }
        Object::Array(items) => items
            .iter_mut()
            .fold(false, |changed, item| fill_operand(item, fields) | changed),
        _ => false,
    }
}

/// Replaces the placeholders inside the text-showing operators of every
/// page and writes the document back out, so stream lengths and the xref
/// table match the new content.
pub(crate) fn fill_template(template: &[u8], user_name: &str, course_name: &str, date: &str) -> Result<Vec<u8>> {
    let mut document = Document::load_mem(template).context("template is not a readable PDF")?;
    let fields: [(&[u8], &str); 3] = [
        (USER_NAME_TOKEN, user_name),
        (COURSE_NAME_TOKEN, course_name),
        (DATE_TOKEN, date),
    ];

    for (page_number, page_id) in document.get_pages() {
        let raw = document
            .get_page_content(page_id)
            .with_context(|| format!("page {page_number} has no readable content"))?;
        let mut content = Content::decode(&raw).with_context(|| format!("page {page_number} content is malformed"))?;
        let mut changed = false;
        for operation in &mut content.operations {
            if !matches!(operation.operator.as_str(), "Tj" | "TJ" | "'" | "\"") {
                continue;
            }
            for operand in &mut operation.operands {
                changed |= fill_operand(operand, &fields);
            }
        }
        if changed {
            let encoded = content.encode().context("failed to encode page content")?;
            document
                .change_page_content(page_id, encoded)
                .with_context(|| format!("failed to update page {page_number}"))?;
        }
    }

    let mut output = Vec::new();
    document.save_to(&mut output).context("failed to write certificate")?;
    Ok(output)
}

pub(crate) async fn generate_certificate(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CertificateRequest>,
) -> Result<Response, ApiError> {
    let user_name = request.user_name.trim();
    if user_name.is_empty() {
        return Err(bad_request("userName is required"));
    }

    let course_id = request.course_id.trim();
    let Some(course) = state.certificates.courses.get(course_id) else {
        warn!(course_id, "certificate requested for unknown course");
        return Err(internal_error(format!("No certificate template found for course: {course_id}")));
    };

    let date = chrono::Utc::now().format("%B %-d, %Y").to_string();
    let pdf = state
        .certificates
        .render(course, user_name, &date)
        .await
        .map_err(|err| internal_error(format!("Failed to generate certificate: {err:#}")))?;

    info!(course_id, bytes = pdf.len(), "certificate generated");
    Ok((
        [
            (header::CONTENT_TYPE, "application/pdf".to_owned()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{course_id}-certificate.pdf\""),
            ),
        ],
        pdf,
    )
        .into_response())
}

/// Single-page Helvetica document with one `Tj` per line, used as a
/// certificate template in tests.
#[cfg(test)]
pub(crate) fn template_pdf(lines: &[&str]) -> Vec<u8> {
    use lopdf::content::Operation;
    use lopdf::{Stream, dictionary};

    let mut document = Document::with_version("1.5");
    let pages_id = document.new_object_id();
    let font_id = document.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let resources_id = document.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut operations = vec![
        Operation::new("BT", vec![]),
        Operation::new("Tf", vec!["F1".into(), Object::Integer(24)]),
        Operation::new("Td", vec![Object::Integer(72), Object::Integer(700)]),
    ];
    for line in lines {
        operations.push(Operation::new("Tj", vec![Object::string_literal(*line)]));
        operations.push(Operation::new("Td", vec![Object::Integer(0), Object::Integer(-40)]));
    }
    operations.push(Operation::new("ET", vec![]));
    let content = Content { operations }.encode().expect("encode template content");
    let content_id = document.add_object(Stream::new(dictionary! {}, content));

    let page_id = document.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
    });
    let pages = dictionary! {
        "Type" => "Pages",
        "Kids" => vec![page_id.into()],
        "Count" => 1,
        "Resources" => resources_id,
        "MediaBox" => vec![0.into(), 0.into(), 842.into(), 595.into()],
    };
    document.objects.insert(pages_id, Object::Dictionary(pages));
    let catalog_id = document.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    document.trailer.set("Root", catalog_id);

    let mut output = Vec::new();
    document.save_to(&mut output).expect("save template");
    output
}

/// Every string shown with `Tj`, page by page.
#[cfg(test)]
pub(crate) fn shown_text(pdf: &[u8]) -> Vec<String> {
    let document = Document::load_mem(pdf).expect("certificate re-parses");
    let mut shown = Vec::new();
    for page_id in document.get_pages().into_values() {
        let raw = document.get_page_content(page_id).expect("page content");
        let content = Content::decode(&raw).expect("content decodes");
        for operation in content.operations.iter().filter(|operation| operation.operator == "Tj") {
            for operand in &operation.operands {
                if let Object::String(bytes, _) = operand {
                    shown.push(String::from_utf8_lossy(bytes).into_owned());
                }
            }
        }
    }
    shown
}
