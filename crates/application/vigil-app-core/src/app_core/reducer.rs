use std::time::Duration;

use vigil_core::StatusEvent;

use crate::domain::{UiState, UiStatus};

use super::events::DomainEvent;

/// Ceiling for the estimated percentage until the run actually ends.
const MAX_RUNNING_PERCENTAGE: f64 = 0.99;

pub fn reduce(mut state: UiState, ev: DomainEvent) -> UiState {
    match ev {
        DomainEvent::RunStarted {
            run_id,
            estimate,
            continues_batch,
        } => {
            let (errors, carried_failure) = if continues_batch {
                (
                    std::mem::take(&mut state.errors),
                    state.carried_failure || state.status == UiStatus::Bad,
                )
            } else {
                (Vec::new(), false)
            };
            state = UiState {
                status: UiStatus::Working,
                label: "Starting".into(),
                run_id: Some(run_id),
                estimate,
                errors,
                carried_failure,
                ..UiState::default()
            };
        }

        DomainEvent::Status { run_id: _, event } => apply_status_event(&mut state, event),

        DomainEvent::Progress { run_id: _, elapsed } => {
            if !state.finished {
                let estimated = estimated_percentage(elapsed, state.estimate);
                state.percentage = state.percentage.max(estimated);
            }
        }

        DomainEvent::RunFinished { .. } => finish(&mut state),

        DomainEvent::UserError(msg) => {
            state.label = msg.clone();
            state.errors.push(msg);
        }
    }
    state.refresh_actions();
    state
}

fn estimated_percentage(elapsed: Duration, estimate: Option<Duration>) -> f64 {
    match estimate {
        Some(estimate) if !estimate.is_zero() => {
            (elapsed.as_secs_f64() / estimate.as_secs_f64()).clamp(0.0, MAX_RUNNING_PERCENTAGE)
        }
        Some(_) => MAX_RUNNING_PERCENTAGE,
        None => 0.0,
    }
}

fn finish(state: &mut UiState) {
    if !state.finished {
        state.percentage = 1.0;
        state.finished = true;
    }
}

fn report_error(state: &mut UiState, message: String) {
    state.status = UiStatus::Bad;
    state.label = message.clone();
    state.errors.push(message);
}

fn apply_status_event(state: &mut UiState, event: StatusEvent) {
    match event {
        StatusEvent::BuildSuccess { built, total, .. } => {
            state.status = UiStatus::Working;
            state.label = format!("Building {built}/{total}");
        }

        StatusEvent::TestSuccess { .. } => {
            if state.status != UiStatus::Bad {
                state.status = UiStatus::Working;
                state.label = "Testing".into();
            }
        }

        StatusEvent::TestError { message } => report_error(state, message),

        StatusEvent::BuildError { project, message, .. } => {
            report_error(state, format!("{project}: {message}"));
            finish(state);
        }

        StatusEvent::ArgumentError { message }
        | StatusEvent::MiscellaneousError { message }
        | StatusEvent::ProjectLoadingError { message }
        | StatusEvent::UnhandledException { message } => {
            report_error(state, message);
            finish(state);
        }

        StatusEvent::Success { passed } => {
            state.status = if state.carried_failure {
                UiStatus::Bad
            } else {
                UiStatus::Ok
            };
            state.label = format!("{passed} test(s) passed");
            finish(state);
        }

        StatusEvent::Skipped { message } => {
            state.status = if state.carried_failure {
                UiStatus::Bad
            } else {
                UiStatus::Default
            };
            state.label = message.unwrap_or_else(|| "Skipped".into());
            finish(state);
        }

        StatusEvent::Canceled => {
            state.status = UiStatus::Default;
            state.label = "Canceled".into();
            finish(state);
        }

        StatusEvent::ParentFailed { message } => {
            state.status = UiStatus::BadParent;
            state.label = message.unwrap_or_else(|| "Parent commit failed".into());
            finish(state);
        }
    }
}
