use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use ci_reporter_core::AppError;
use ci_reporter_github::{
    handler::{self, WorkflowRun},
    webhook::GitHubEvent,
};
use octocrab::models::webhook_events::{
    payload::{InstallationWebhookEventAction, WorkflowRunWebhookEventAction},
    EventInstallation, WebhookEventPayload,
};

use crate::AppState;

/// Webhook entry point. Completed workflow runs are processed on a spawned
/// task so the response returns before GitHub's delivery timeout.
pub async fn webhook(
    State(state): State<AppState>,
    GitHubEvent { event }: GitHubEvent,
) -> Result<Response, AppError> {
    if let Some(repository) = &event.repository {
        if let Some(full_name) = &repository.full_name {
            tracing::info!(
                "Received webhook event {:?} from repository {}",
                event.kind,
                full_name
            );
        }
    }
    let installation_id = match &event.installation {
        Some(EventInstallation::Full(installation)) => Some(installation.id),
        Some(EventInstallation::Minimal(installation)) => Some(installation.id),
        None => None,
    };

    match &event.specific {
        WebhookEventPayload::WorkflowRun(inner) => {
            if inner.action != WorkflowRunWebhookEventAction::Completed {
                return Ok((StatusCode::OK, "Ignored").into_response());
            }
            let run: WorkflowRun = match serde_json::from_value(inner.workflow_run.clone()) {
                Ok(run) => run,
                Err(e) => {
                    tracing::error!("Received workflow_run event with invalid workflow_run: {e}");
                    return Ok((StatusCode::OK, "Invalid workflow run").into_response());
                }
            };
            tracing::info!("Processing workflow run {} ({})", run.id, run.name);
            let github = state.github.clone();
            let config = state.config.clone();
            tokio::spawn(async move {
                if let Err(e) =
                    handler::process_workflow_run(&github, &config, installation_id, &run).await
                {
                    tracing::error!("Failed to process workflow run {}: {:?}", run.id, e);
                }
            });
        }
        WebhookEventPayload::Installation(inner) => {
            if inner.action == InstallationWebhookEventAction::Deleted {
                if let Some(installation_id) = installation_id {
                    state.github.forget_installation(installation_id).await;
                }
            }
        }
        _ => {}
    }
    Ok((StatusCode::OK, "Event processed").into_response())
}
