use serde_json::json;

use fidelis_core::{Result, Session, Severity, UnifiedResult};

/// Supported report formats for `GET .../report?format=`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Json,
    Html,
    Markdown,
}

impl ReportFormat {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_lowercase().as_str() {
            "json" => Some(ReportFormat::Json),
            "html" => Some(ReportFormat::Html),
            "md" | "markdown" => Some(ReportFormat::Markdown),
            _ => None,
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ReportFormat::Json => "application/json",
            ReportFormat::Html => "text/html; charset=utf-8",
            ReportFormat::Markdown => "text/markdown; charset=utf-8",
        }
    }
}

pub fn render(session: &Session, result: &UnifiedResult, format: ReportFormat) -> Result<String> {
    match format {
        ReportFormat::Json => render_json(session, result),
        ReportFormat::Markdown => Ok(render_markdown(session, result)),
        ReportFormat::Html => Ok(render_html(session, result)),
    }
}

fn render_json(session: &Session, result: &UnifiedResult) -> Result<String> {
    let (critical, warning, info) = result.severity_counts();
    let report = json!({
        "request_id": session.request_id,
        "source_technology": session.source_technology,
        "target_technology": session.target_technology,
        "scope": session.scope,
        "created_at": session.created_at,
        "severity_counts": {
            "critical": critical,
            "warning": warning,
            "info": info,
        },
        "result": result,
    });
    Ok(serde_json::to_string_pretty(&report)?)
}

fn severity_section(result: &UnifiedResult, severity: Severity, heading: &str, out: &mut String) {
    let matching: Vec<_> = result
        .discrepancies
        .iter()
        .filter(|d| d.severity == severity)
        .collect();
    if matching.is_empty() {
        return;
    }
    out.push_str(&format!("\n## {} ({})\n\n", heading, matching.len()));
    for discrepancy in matching {
        out.push_str(&format!("- **{}**: {}", discrepancy.kind, discrepancy.description));
        if let Some(recommendation) = &discrepancy.recommendation {
            out.push_str(&format!("\n  - Recommendation: {}", recommendation));
        }
        out.push('\n');
    }
}

fn render_markdown(session: &Session, result: &UnifiedResult) -> String {
    let mut out = String::new();
    out.push_str("# Migration Validation Report\n\n");
    out.push_str(&format!("- Request: `{}`\n", session.request_id));
    out.push_str(&format!(
        "- Migration: {} -> {}\n",
        session.source_technology.name, session.target_technology.name
    ));
    out.push_str(&format!("- Scope: {}\n", session.scope));
    out.push_str(&format!("- Overall status: **{}**\n", result.overall_status));
    out.push_str(&format!("- Fidelity score: **{:.4}**\n", result.fidelity_score));
    out.push_str(&format!(
        "- Execution time: {:.1}s\n",
        result.total_execution_time_secs
    ));
    out.push_str(&format!("\n{}\n", result.summary));

    severity_section(result, Severity::Critical, "Critical issues", &mut out);
    severity_section(result, Severity::Warning, "Warnings", &mut out);
    severity_section(result, Severity::Info, "Informational", &mut out);

    if !result.stages.is_empty() {
        out.push_str("\n## Stages\n\n");
        out.push_str("| Stage | Status | Score | Time |\n|---|---|---|---|\n");
        for stage in &result.stages {
            out.push_str(&format!(
                "| {} | {} | {:.4} | {:.1}s |\n",
                stage.stage_kind, stage.status, stage.fidelity_score, stage.execution_time_secs
            ));
        }
    }
    out
}

fn escape_html(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn render_html(session: &Session, result: &UnifiedResult) -> String {
    let (critical, warning, info) = result.severity_counts();
    let status_class = match result.overall_status {
        fidelis_core::OverallStatus::Approved => "approved",
        fidelis_core::OverallStatus::ApprovedWithWarnings => "warnings",
        _ => "rejected",
    };
    let mut rows = String::new();
    for discrepancy in &result.discrepancies {
        rows.push_str(&format!(
            "<tr class=\"{sev}\"><td>{sev}</td><td>{kind}</td><td>{desc}</td><td>{rec}</td></tr>\n",
            sev = discrepancy.severity,
            kind = discrepancy.kind,
            desc = escape_html(&discrepancy.description),
            rec = escape_html(discrepancy.recommendation.as_deref().unwrap_or("-")),
        ));
    }
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>Migration Validation Report — {request_id}</title>
<style>
body {{ font-family: sans-serif; margin: 2rem; color: #222; }}
.score {{ font-size: 2rem; }}
.approved {{ color: #2e7d32; }}
.warnings {{ color: #f9a825; }}
.rejected {{ color: #c62828; }}
table {{ border-collapse: collapse; width: 100%; margin-top: 1rem; }}
th, td {{ border: 1px solid #ccc; padding: 0.4rem 0.6rem; text-align: left; }}
tr.critical td:first-child {{ color: #c62828; font-weight: bold; }}
tr.warning td:first-child {{ color: #f9a825; }}
</style>
</head>
<body>
<h1>Migration Validation Report</h1>
<p>Request <code>{request_id}</code> — {source} &rarr; {target} ({scope})</p>
<p class="score {status_class}">{status} · fidelity {score:.4}</p>
<p>{summary}</p>
<p>{critical} critical · {warning} warnings · {info} info · {time:.1}s</p>
<table>
<tr><th>Severity</th><th>Kind</th><th>Description</th><th>Recommendation</th></tr>
{rows}
</table>
</body>
</html>
"#,
        request_id = session.request_id,
        source = escape_html(&session.source_technology.name),
        target = escape_html(&session.target_technology.name),
        scope = session.scope,
        status_class = status_class,
        status = result.overall_status,
        score = result.fidelity_score,
        summary = escape_html(&result.summary),
        critical = critical,
        warning = warning,
        info = info,
        time = result.total_execution_time_secs,
        rows = rows,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use fidelis_core::{
        BehavioralSpec, Discrepancy, DiscrepancyKind, InputBundle, OverallStatus, ResultKind,
        TechnologyContext, ValidationScope,
    };

    fn fixtures() -> (Session, UnifiedResult) {
        let session = Session::new(
            ValidationScope::Full,
            TechnologyContext::new("python-flask"),
            TechnologyContext::new("java-spring"),
            InputBundle::default(),
            InputBundle::default(),
            BehavioralSpec::default(),
            "default",
        );
        let result = UnifiedResult {
            overall_status: OverallStatus::ApprovedWithWarnings,
            fidelity_score: 0.8754,
            summary: "mostly faithful".into(),
            discrepancies: vec![Discrepancy::new(
                DiscrepancyKind::UiTextChanged,
                Severity::Warning,
                "button copy <changed>",
            )
            .recommend("check with design")],
            stages: Vec::new(),
            result_kind: ResultKind::StaticOnly,
            total_execution_time_secs: 12.5,
            timestamp: Utc::now(),
            error_annotation: None,
        };
        (session, result)
    }

    #[test]
    fn json_report_round_trips() {
        let (session, result) = fixtures();
        let rendered = render(&session, &result, ReportFormat::Json).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(parsed["request_id"], session.request_id.as_str());
        assert_eq!(parsed["severity_counts"]["warning"], 1);
        let embedded: UnifiedResult =
            serde_json::from_value(parsed["result"].clone()).unwrap();
        assert_eq!(embedded.fidelity_score, result.fidelity_score);
        assert_eq!(embedded.overall_status, result.overall_status);
    }

    #[test]
    fn markdown_groups_by_severity() {
        let (session, result) = fixtures();
        let rendered = render(&session, &result, ReportFormat::Markdown).unwrap();
        assert!(rendered.contains("## Warnings (1)"));
        assert!(!rendered.contains("## Critical"));
        assert!(rendered.contains("0.8754"));
    }

    #[test]
    fn html_is_escaped_and_self_contained() {
        let (session, result) = fixtures();
        let rendered = render(&session, &result, ReportFormat::Html).unwrap();
        assert!(rendered.contains("&lt;changed&gt;"));
        assert!(rendered.starts_with("<!DOCTYPE html>"));
        assert!(rendered.contains("<style>"));
    }

    #[test]
    fn format_parsing() {
        assert_eq!(ReportFormat::parse("md"), Some(ReportFormat::Markdown));
        assert_eq!(ReportFormat::parse("HTML"), Some(ReportFormat::Html));
        assert!(ReportFormat::parse("pdf").is_none());
    }
}
