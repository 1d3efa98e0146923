use axum::extract::multipart::Multipart;
use serde::Deserialize;

use fidelis_core::{
    check_compatibility, BehavioralSpec, CodeFile, FidelisError, Fingerprint, InputBundle,
    Result, ScenarioSpec, Session, TechnologyContext, UploadConfig, ValidationScope,
};

/// JSON half of the multipart request.
#[derive(Debug, Deserialize)]
pub struct ValidateConfig {
    pub source_technology: TechnologyContext,
    pub target_technology: TechnologyContext,
    pub scope: ValidationScope,
    #[serde(default)]
    pub source_url: Option<String>,
    #[serde(default)]
    pub target_url: Option<String>,
    #[serde(default)]
    pub behavioral: Option<BehavioralSpec>,
    #[serde(default)]
    pub tenant: Option<String>,
}

/// Body of `POST /api/behavioral/validate`.
#[derive(Debug, Deserialize)]
pub struct BehavioralRequest {
    pub source_url: String,
    pub target_url: String,
    pub scenarios: Vec<ScenarioSpec>,
    #[serde(default)]
    pub credentials: Option<fidelis_core::Credentials>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub tenant: Option<String>,
}

/// Reject path traversal, control characters and empty names. Returns the
/// sanitized basename.
pub fn sanitize_filename(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(FidelisError::ValidationInput("empty filename".into()));
    }
    if trimmed.contains("..") || trimmed.contains('\\') || trimmed.starts_with('/') {
        return Err(FidelisError::ValidationInput(format!(
            "invalid filename: {}",
            trimmed
        )));
    }
    if trimmed.chars().any(char::is_control) {
        return Err(FidelisError::ValidationInput(
            "filename contains control characters".into(),
        ));
    }
    Ok(trimmed.to_string())
}

fn enforce_ceilings(bundle: &InputBundle, limits: &UploadConfig) -> Result<()> {
    if bundle.artifact_count() > limits.max_file_count {
        return Err(FidelisError::ValidationInput(format!(
            "bundle exceeds {} artifacts",
            limits.max_file_count
        )));
    }
    if bundle.total_bytes() > limits.max_bundle_bytes {
        return Err(FidelisError::ValidationInput(format!(
            "bundle exceeds {} bytes",
            limits.max_bundle_bytes
        )));
    }
    Ok(())
}

fn accept_file(
    bundle: &mut InputBundle,
    limits: &UploadConfig,
    name: &str,
    bytes: &[u8],
) -> Result<()> {
    // A file at exactly the ceiling is accepted; one byte over is not.
    if bytes.len() > limits.max_file_bytes {
        return Err(FidelisError::ValidationInput(format!(
            "file {} exceeds {} bytes",
            name, limits.max_file_bytes
        )));
    }
    let path = sanitize_filename(name)?;
    if is_image(&path) {
        bundle.screenshots.push(fidelis_core::ScreenshotRef {
            fingerprint: Fingerprint::for_image(&path, bytes),
            path,
        });
    } else {
        let content = String::from_utf8_lossy(bytes).into_owned();
        bundle.files.push(CodeFile::new(path, content));
    }
    Ok(())
}

fn is_image(path: &str) -> bool {
    let lowered = path.to_lowercase();
    [".png", ".jpg", ".jpeg", ".gif", ".webp"]
        .iter()
        .any(|ext| lowered.ends_with(ext))
}

/// Parse the multipart body of `POST /api/validate` / `/api/validate/hybrid`
/// into a session, enforcing bundle ceilings as parts stream in.
pub async fn parse_validate_request(
    mut multipart: Multipart,
    limits: &UploadConfig,
) -> Result<Session> {
    let mut config: Option<ValidateConfig> = None;
    let mut source = InputBundle::default();
    let mut target = InputBundle::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| FidelisError::ValidationInput(format!("malformed multipart: {}", e)))?
    {
        let field_name = field.name().unwrap_or_default().to_string();
        let file_name = field.file_name().map(str::to_string);
        let bytes = field
            .bytes()
            .await
            .map_err(|e| FidelisError::ValidationInput(format!("unreadable part: {}", e)))?;

        match field_name.as_str() {
            "config" => {
                config = Some(serde_json::from_slice(&bytes)?);
            }
            "source_files" | "source_screenshots" => {
                let name = file_name
                    .ok_or_else(|| FidelisError::ValidationInput("file part without name".into()))?;
                accept_file(&mut source, limits, &name, &bytes)?;
            }
            "target_files" | "target_screenshots" => {
                let name = file_name
                    .ok_or_else(|| FidelisError::ValidationInput("file part without name".into()))?;
                accept_file(&mut target, limits, &name, &bytes)?;
            }
            other => {
                return Err(FidelisError::ValidationInput(format!(
                    "unexpected multipart field: {}",
                    other
                )));
            }
        }
    }

    let config =
        config.ok_or_else(|| FidelisError::ValidationInput("missing config part".into()))?;
    enforce_ceilings(&source, limits)?;
    enforce_ceilings(&target, limits)?;

    source.url = config.source_url.clone();
    target.url = config.target_url.clone();
    build_session(config, source, target)
}

/// Shared request validation: technology support, scope constraints, and
/// bundle presence.
pub fn build_session(
    config: ValidateConfig,
    source: InputBundle,
    target: InputBundle,
) -> Result<Session> {
    let compatibility = check_compatibility(
        &config.source_technology.name,
        &config.target_technology.name,
        config.scope,
    );
    if !compatibility.compatible {
        return Err(FidelisError::ValidationInput(
            compatibility.issues.join("; "),
        ));
    }

    let behavioral = config.behavioral.unwrap_or_default();
    if config.scope.requires_behavioral() {
        if behavioral.scenarios.is_empty() {
            return Err(FidelisError::ValidationInput(
                "behavioral scope requires at least one scenario".into(),
            ));
        }
        if source.url.is_none() || target.url.is_none() {
            return Err(FidelisError::ValidationInput(
                "behavioral scope requires source and target URLs".into(),
            ));
        }
    }
    if config.scope.requires_static() && source.files.is_empty() && source.screenshots.is_empty() {
        return Err(FidelisError::ValidationInput(
            "source bundle is empty".into(),
        ));
    }
    if config.scope.requires_static() && target.files.is_empty() && target.screenshots.is_empty() {
        return Err(FidelisError::ValidationInput(
            "target bundle is empty".into(),
        ));
    }

    Ok(Session::new(
        config.scope,
        config.source_technology,
        config.target_technology,
        source,
        target,
        behavioral,
        config.tenant.unwrap_or_else(|| "default".to_string()),
    ))
}

/// Build a behavioral-only session from the JSON request body.
pub fn build_behavioral_session(request: BehavioralRequest) -> Result<Session> {
    if request.scenarios.is_empty() {
        return Err(FidelisError::ValidationInput(
            "at least one scenario is required".into(),
        ));
    }
    let mut behavioral = BehavioralSpec {
        scenarios: request.scenarios,
        credentials: request.credentials,
        ..BehavioralSpec::default()
    };
    if let Some(timeout) = request.timeout_secs {
        behavioral.scenario_timeout_secs = timeout;
    }
    let source = InputBundle {
        url: Some(request.source_url),
        ..Default::default()
    };
    let target = InputBundle {
        url: Some(request.target_url),
        ..Default::default()
    };
    Ok(Session::new(
        ValidationScope::Behavioral,
        TechnologyContext::new("javascript-react"),
        TechnologyContext::new("javascript-react"),
        source,
        target,
        behavioral,
        request.tenant.unwrap_or_else(|| "default".to_string()),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn traversal_and_control_names_are_rejected() {
        assert!(sanitize_filename("../etc/passwd").is_err());
        assert!(sanitize_filename("/abs/path.py").is_err());
        assert!(sanitize_filename("bad\u{0}name.py").is_err());
        assert!(sanitize_filename("  ").is_err());
        assert_eq!(sanitize_filename("app/models.py").unwrap(), "app/models.py");
    }

    #[test]
    fn file_at_ceiling_is_accepted_one_byte_over_rejected() {
        let limits = UploadConfig {
            max_file_bytes: 8,
            ..UploadConfig::default()
        };
        let mut bundle = InputBundle::default();
        assert!(accept_file(&mut bundle, &limits, "a.py", &[b'x'; 8]).is_ok());
        let err = accept_file(&mut bundle, &limits, "b.py", &[b'x'; 9]).unwrap_err();
        assert_eq!(err.code(), "validation-input");
    }

    #[test]
    fn screenshots_split_from_code_files() {
        let limits = UploadConfig::default();
        let mut bundle = InputBundle::default();
        accept_file(&mut bundle, &limits, "shot.png", b"binary").unwrap();
        accept_file(&mut bundle, &limits, "app.py", b"def f(): pass").unwrap();
        assert_eq!(bundle.screenshots.len(), 1);
        assert_eq!(bundle.files.len(), 1);
    }

    #[test]
    fn behavioral_scope_requires_scenarios_and_urls() {
        let config = ValidateConfig {
            source_technology: TechnologyContext::new("javascript-react"),
            target_technology: TechnologyContext::new("typescript-react"),
            scope: ValidationScope::Behavioral,
            source_url: None,
            target_url: None,
            behavioral: None,
            tenant: None,
        };
        let err =
            build_session(config, InputBundle::default(), InputBundle::default()).unwrap_err();
        assert!(err.to_string().contains("scenario"));
    }

    #[test]
    fn cross_paradigm_request_is_rejected() {
        let config = ValidateConfig {
            source_technology: TechnologyContext::new("python-flask"),
            target_technology: TechnologyContext::new("javascript-react"),
            scope: ValidationScope::Full,
            source_url: None,
            target_url: None,
            behavioral: None,
            tenant: None,
        };
        let err =
            build_session(config, InputBundle::default(), InputBundle::default()).unwrap_err();
        assert_eq!(err.code(), "validation-input");
    }
}
