use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::services::processor::AggregatedData;

/// Record summaries listed in full before the rest is collapsed.
const SUMMARY_PREVIEW: usize = 10;

/// Input of a render: the aggregated data plus its heading.
#[derive(Debug, Clone)]
pub struct ReportContent {
    pub title: String,
    pub report_type: String,
    pub generated_at: DateTime<Utc>,
    pub data: AggregatedData,
}

#[derive(Debug, Clone)]
pub struct RenderedDocument {
    pub bytes: Vec<u8>,
    pub content_type: &'static str,
    pub extension: &'static str,
    /// Plain-text rendering for the email body.
    pub text: String,
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("nothing to render: {0}")]
    Empty(String),

    #[error("render failed: {0}")]
    Failed(String),
}

pub trait ReportRenderer: Send + Sync {
    fn render(&self, content: &ReportContent) -> Result<RenderedDocument, RenderError>;
}

/// Renders a self-contained HTML document.
#[derive(Debug, Default, Clone)]
pub struct HtmlReportRenderer;

fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn text_report(content: &ReportContent) -> String {
    let data = &content.data;
    let mut text = format!(
        "Agworld Report\n{}\n\nTitle: {}\nGenerated: {}\nTotal records: {}\n",
        "-".repeat(50),
        content.title,
        content.generated_at.format("%Y-%m-%d %H:%M:%S UTC"),
        data.total_records
    );
    for (data_type, count) in &data.data_types {
        let _ = writeln!(text, "  {}: {}", data_type, count);
    }
    let _ = writeln!(text, "Total area: {:.2}\nTotal cost: {:.2}", data.total_area, data.total_cost);
    text
}

impl ReportRenderer for HtmlReportRenderer {
    fn render(&self, content: &ReportContent) -> Result<RenderedDocument, RenderError> {
        let data = &content.data;
        let mut html = String::new();

        let _ = write!(
            html,
            "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>{title}</title>\n</head>\n<body>\n\
             <h1>{title}</h1>\n<table>\n\
             <tr><th>Generated:</th><td>{generated}</td></tr>\n\
             <tr><th>Type:</th><td>{report_type}</td></tr>\n\
             <tr><th>Total records:</th><td>{total}</td></tr>\n\
             </table>\n",
            title = escape_html(&content.title),
            generated = content.generated_at.format("%Y-%m-%d %H:%M:%S UTC"),
            report_type = escape_html(&content.report_type),
            total = data.total_records,
        );

        html.push_str("<h2>Data Summary</h2>\n<table>\n<tr><th>Data type</th><th>Records</th></tr>\n");
        for (data_type, count) in &data.data_types {
            let _ = writeln!(html, "<tr><td>{}</td><td>{}</td></tr>", escape_html(data_type), count);
        }
        let _ = write!(
            html,
            "<tr><td>Total area</td><td>{:.2}</td></tr>\n<tr><td>Total cost</td><td>{:.2}</td></tr>\n</table>\n",
            data.total_area, data.total_cost
        );

        if !data.summaries.is_empty() {
            html.push_str("<h2>Records</h2>\n<ul>\n");
            for summary in data.summaries.iter().take(SUMMARY_PREVIEW) {
                let _ = writeln!(html, "<li>{}</li>", escape_html(summary));
            }
            if data.summaries.len() > SUMMARY_PREVIEW {
                let _ = writeln!(html, "<li>... and {} more</li>", data.summaries.len() - SUMMARY_PREVIEW);
            }
            html.push_str("</ul>\n");
        }

        html.push_str("</body>\n</html>\n");

        Ok(RenderedDocument {
            bytes: html.into_bytes(),
            content_type: "text/html",
            extension: "html",
            text: text_report(content),
        })
    }
}

/// Writes a rendered document under `dir` as `<report_type>_<id>.<ext>`.
pub async fn write_report(
    dir: &Path,
    report_type: &str,
    id: Uuid,
    document: &RenderedDocument,
) -> std::io::Result<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(format!("{}_{}.{}", report_type, id, document.extension));
    tokio::fs::write(&path, &document.bytes).await?;
    info!("📄 Report written to {}", path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn content(summaries: Vec<String>) -> ReportContent {
        let mut data_types = BTreeMap::new();
        data_types.insert("field".to_string(), summaries.len());
        ReportContent {
            title: "Daily <Farm> Summary".into(),
            report_type: "daily_summary".into(),
            generated_at: Utc::now(),
            data: AggregatedData {
                total_records: summaries.len(),
                data_types,
                total_area: 12.5,
                total_cost: 300.0,
                summaries,
                aggregated_at: Utc::now(),
            },
        }
    }

    #[test]
    fn test_html_escapes_and_collapses_summaries() {
        let summaries = (0..13).map(|i| format!("Field: F{}", i)).collect();
        let doc = HtmlReportRenderer.render(&content(summaries)).unwrap();
        let html = String::from_utf8(doc.bytes).unwrap();

        assert!(html.contains("<h1>Daily &lt;Farm&gt; Summary</h1>"));
        assert!(html.contains("<li>Field: F9</li>"));
        assert!(!html.contains("<li>Field: F10</li>"));
        assert!(html.contains("... and 3 more"));
        assert!(html.contains("<td>12.50</td>"));
        assert_eq!(doc.content_type, "text/html");
        assert!(doc.text.contains("Total records: 13"));
    }

    #[tokio::test]
    async fn test_write_report_creates_file() {
        let dir = std::env::temp_dir().join(format!("agworld-reports-{}", Uuid::new_v4()));
        let doc = HtmlReportRenderer.render(&content(vec!["x".into()])).unwrap();
        let id = Uuid::new_v4();

        let path = write_report(&dir, "daily_summary", id, &doc).await.unwrap();
        assert!(path.ends_with(format!("daily_summary_{}.html", id)));
        assert_eq!(tokio::fs::read(&path).await.unwrap(), doc.bytes);

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
