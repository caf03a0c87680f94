use chrono::Utc;
use platform_models::{Condition, ConditionStatus, ConditionType, PlatformState};

pub fn timestamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

pub fn new_condition(message: impl Into<String>, type_: ConditionType) -> Condition {
    Condition {
        type_,
        status: ConditionStatus::True,
        message: Some(message.into()),
        last_transition_time: Some(timestamp()),
    }
}

pub fn has_condition(conditions: &[Condition], type_: ConditionType) -> bool {
    conditions.iter().any(|c| c.type_ == type_)
}

pub fn has_any_condition(conditions: &[Condition], types: &[ConditionType]) -> bool {
    conditions.iter().any(|c| types.contains(&c.type_))
}

pub fn remove_conditions(
    conditions: &[Condition],
    types: &[ConditionType],
) -> Vec<Condition> {
    conditions
        .iter()
        .filter(|c| !types.contains(&c.type_))
        .cloned()
        .collect()
}

/// Replaces any condition of the same type and appends `cond` last, so the
/// newest transition is always at the end.
pub fn append_condition(conditions: &mut Vec<Condition>, cond: Condition) {
    conditions.retain(|c| c.type_ != cond.type_);
    conditions.push(cond);
}

pub fn condition_to_state(type_: ConditionType) -> PlatformState {
    match type_ {
        ConditionType::PreInstall | ConditionType::InstallStarted => {
            PlatformState::Installing
        }
        ConditionType::UpgradeStarted => PlatformState::Upgrading,
        ConditionType::UpgradePaused => PlatformState::Paused,
        ConditionType::UninstallStarted => PlatformState::Uninstalling,
        ConditionType::InstallComplete
        | ConditionType::UpgradeComplete
        | ConditionType::UninstallComplete => PlatformState::Ready,
        ConditionType::InstallFailed
        | ConditionType::UpgradeFailed
        | ConditionType::UninstallFailed => PlatformState::Failed,
        ConditionType::Unknown => PlatformState::Reconciling,
    }
}
