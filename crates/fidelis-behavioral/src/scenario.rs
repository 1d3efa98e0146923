use fidelis_core::{ActionKind, ScenarioAction, ScenarioSpec};

/// Expand a scenario that carries only a name into its default action
/// sequence. Scenarios with explicit actions pass through untouched.
pub fn expand_scenario(spec: &ScenarioSpec) -> ScenarioSpec {
    if !spec.actions.is_empty() {
        return spec.clone();
    }
    let actions = match spec.name.as_str() {
        "login" => vec![
            action(ActionKind::Navigate, None, None),
            action(ActionKind::Fill, Some("input[name=username]"), Some("{username}")),
            action(ActionKind::Fill, Some("input[type=password]"), Some("{password}")),
            action(ActionKind::Submit, Some("form"), None),
            action(ActionKind::Capture, None, None),
        ],
        "form_submission" => vec![
            action(ActionKind::Navigate, None, None),
            action(ActionKind::Fill, Some("form input"), Some("{sample}")),
            action(ActionKind::Submit, Some("form"), None),
            action(ActionKind::Wait, None, None),
            action(ActionKind::Capture, None, None),
        ],
        _ => vec![
            action(ActionKind::Navigate, None, None),
            action(ActionKind::Capture, None, None),
        ],
    };
    ScenarioSpec {
        name: spec.name.clone(),
        actions,
    }
}

fn action(kind: ActionKind, selector: Option<&str>, input: Option<&str>) -> ScenarioAction {
    ScenarioAction {
        kind,
        selector: selector.map(str::to_string),
        input: input.map(str::to_string),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_template_expands() {
        let expanded = expand_scenario(&ScenarioSpec {
            name: "login".into(),
            actions: Vec::new(),
        });
        assert_eq!(expanded.actions.len(), 5);
        assert_eq!(expanded.actions[0].kind, ActionKind::Navigate);
        assert_eq!(expanded.actions[3].kind, ActionKind::Submit);
    }

    #[test]
    fn explicit_actions_pass_through() {
        let spec = ScenarioSpec {
            name: "custom".into(),
            actions: vec![action(ActionKind::Click, Some("#buy"), None)],
        };
        let expanded = expand_scenario(&spec);
        assert_eq!(expanded.actions.len(), 1);
        assert_eq!(expanded.actions[0].selector.as_deref(), Some("#buy"));
    }

    #[test]
    fn unknown_name_gets_navigate_capture() {
        let expanded = expand_scenario(&ScenarioSpec {
            name: "smoke".into(),
            actions: Vec::new(),
        });
        assert_eq!(expanded.actions.len(), 2);
    }
}
