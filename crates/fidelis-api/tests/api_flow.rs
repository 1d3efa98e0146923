use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::extract::{Path, Query, State};

use fidelis_api::handlers::{self, admit_config};
use fidelis_api::AppState;
use fidelis_behavioral::{InteractionTrace, PageState, Prober, StepOutcome, TraceStep};
use fidelis_core::{
    ActionKind, BehavioralSpec, CodeFile, Credentials, FidelisConfig, InputBundle, PriorityBand,
    Result, ScenarioAction, ScenarioSpec, SessionStatus, TechnologyContext, ValidationScope,
};

use fidelis_api::intake::ValidateConfig;

async fn wait_terminal(state: &AppState, request_id: &str) -> SessionStatus {
    for _ in 0..300 {
        let session = state
            .manager
            .store()
            .load(request_id)
            .await
            .unwrap()
            .unwrap();
        if session.status.is_terminal() {
            return session.status;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("session {} never reached a terminal state", request_id);
}

fn jsx_bundle(button_label: &str, input_id: &str) -> InputBundle {
    let source = format!(
        r#"function LoginForm() {{
  return (
    <form>
      <input id="{input_id}" placeholder="User Name" />
      <button id="submit_btn">{button_label}</button>
    </form>
  );
}}"#
    );
    InputBundle {
        files: vec![CodeFile::new("Login.jsx", source)],
        ..Default::default()
    }
}

#[tokio::test]
async fn ui_validation_end_to_end() {
    let state = AppState::build_ephemeral(FidelisConfig::default(), None)
        .await
        .unwrap();

    let config = ValidateConfig {
        source_technology: TechnologyContext::new("javascript-react"),
        target_technology: TechnologyContext::new("javascript-react"),
        scope: ValidationScope::Ui,
        source_url: None,
        target_url: None,
        behavioral: None,
        tenant: None,
    };
    let request_id = admit_config(
        &state,
        config,
        jsx_bundle("Submit", "user_name"),
        jsx_bundle("Save", "userName"),
        PriorityBand::Interactive,
    )
    .await
    .unwrap();

    assert_eq!(
        wait_terminal(&state, &request_id).await,
        SessionStatus::Completed
    );

    // Status endpoint reflects completion and result availability.
    let status = handlers::get_status(State(state.clone()), Path(request_id.clone()))
        .await
        .unwrap();
    assert_eq!(status.0["status"], "completed");
    assert_eq!(status.0["result_available"], true);

    // Result carries the UI warnings and the blended score.
    let session = state
        .manager
        .store()
        .load(&request_id)
        .await
        .unwrap()
        .unwrap();
    let result = session.result.unwrap();
    assert_eq!(result.overall_status.to_string(), "approved-with-warnings");
    assert!(result
        .discrepancies
        .iter()
        .any(|d| d.kind.to_string() == "ui_text_changed"));

    // Markdown report renders.
    let report = handlers::get_report(
        State(state.clone()),
        Path(request_id.clone()),
        Query(serde_json::from_value(serde_json::json!({"format": "md"})).unwrap()),
    )
    .await
    .unwrap();
    let body = axum::body::to_bytes(report.into_body(), usize::MAX)
        .await
        .unwrap();
    assert!(String::from_utf8_lossy(&body).contains("Migration Validation Report"));

    // Logs were appended through the lifecycle.
    let logs = state.manager.store().logs(&request_id).await.unwrap();
    assert!(logs.iter().any(|l| l.message.contains("semantic comparison")));
}

struct StableProber;

#[async_trait]
impl Prober for StableProber {
    async fn run_scenario(
        &self,
        url: &str,
        scenario: &ScenarioSpec,
        _credentials: Option<&Credentials>,
        _deadline: Instant,
    ) -> Result<InteractionTrace> {
        Ok(InteractionTrace {
            scenario: scenario.name.clone(),
            steps: vec![TraceStep {
                action: ScenarioAction {
                    kind: ActionKind::Navigate,
                    selector: None,
                    input: None,
                },
                outcome: StepOutcome::Ok,
                state: PageState {
                    url: format!("{}/home", url.split("//").nth(1).unwrap_or("app")),
                    state_fingerprint: "stable".into(),
                    validation_errors: Vec::new(),
                    messages: Vec::new(),
                },
                duration_ms: 40,
            }],
        })
    }
}

#[tokio::test]
async fn behavioral_validation_end_to_end() {
    let state = AppState::build_ephemeral(FidelisConfig::default(), Some(Arc::new(StableProber)))
        .await
        .unwrap();

    let config = ValidateConfig {
        source_technology: TechnologyContext::new("javascript-react"),
        target_technology: TechnologyContext::new("javascript-react"),
        scope: ValidationScope::Behavioral,
        source_url: Some("http://source.app".into()),
        target_url: Some("http://target.app".into()),
        behavioral: Some(BehavioralSpec {
            scenarios: vec![ScenarioSpec {
                name: "smoke".into(),
                actions: Vec::new(),
            }],
            credentials: None,
            scenario_timeout_secs: 5,
        }),
        tenant: None,
    };
    let request_id = admit_config(
        &state,
        config,
        InputBundle {
            url: Some("http://source.app".into()),
            ..Default::default()
        },
        InputBundle {
            url: Some("http://target.app".into()),
            ..Default::default()
        },
        PriorityBand::Interactive,
    )
    .await
    .unwrap();

    assert_eq!(
        wait_terminal(&state, &request_id).await,
        SessionStatus::Completed
    );
    let session = state
        .manager
        .store()
        .load(&request_id)
        .await
        .unwrap()
        .unwrap();
    let result = session.result.unwrap();
    // Same URL path and fingerprint on both sides: full behavioral match.
    assert_eq!(result.fidelity_score, 1.0);
}

#[tokio::test]
async fn cancel_transitions_session_to_cancelled() {
    let state = AppState::build_ephemeral(FidelisConfig::default(), None)
        .await
        .unwrap();
    let config = ValidateConfig {
        source_technology: TechnologyContext::new("python-flask"),
        target_technology: TechnologyContext::new("python-django"),
        scope: ValidationScope::BackendLogic,
        source_url: None,
        target_url: None,
        behavioral: None,
        tenant: None,
    };
    let bundle = InputBundle {
        files: vec![CodeFile::new("app.py", "def handler(x):\n    return x\n")],
        ..Default::default()
    };
    let request_id = admit_config(
        &state,
        config,
        bundle.clone(),
        bundle,
        PriorityBand::Interactive,
    )
    .await
    .unwrap();

    state.scheduler.cancel(&request_id).await.unwrap();
    state.scheduler.cancel(&request_id).await.unwrap();
    let status = wait_terminal(&state, &request_id).await;
    // Either the worker finished first or the cancel landed; both are
    // legal terminal outcomes, never a stuck session.
    assert!(matches!(
        status,
        SessionStatus::Cancelled | SessionStatus::Completed
    ));
}
