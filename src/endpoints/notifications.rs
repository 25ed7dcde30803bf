use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Json, debug_handler};
use serde::Deserialize;
use serde_json::Value;
use tracing::instrument;

use crate::hub::dispatcher::DispatchError;
use crate::hub::{ConnectionId, TargetSelector};
use crate::ingress::{BroadcastRequest, IngressError};
use crate::state::SharedState;

/// Optional narrowing of a broadcast; at most one field may be set.
#[derive(Deserialize, Debug, Default)]
#[must_use]
pub struct TargetQuery {
    pub group: Option<String>,
    pub connection: Option<u64>,
}

impl TargetQuery {
    fn into_selector(self) -> Result<TargetSelector, IngressError> {
        match (self.group, self.connection) {
            (None, None) => Ok(TargetSelector::All),
            (Some(group), None) => Ok(TargetSelector::Group(group)),
            (None, Some(id)) => Ok(TargetSelector::Single(ConnectionId::from(id))),
            (Some(_), Some(_)) => Err(IngressError::ConflictingTargets),
        }
    }
}

/// Accepts any JSON body as the payload and answers once delivery has been
/// attempted. Per-client failures are never reported here.
#[instrument(skip_all, fields(target = ?query), err(Debug))]
#[debug_handler]
pub async fn broadcast(
    State(state): State<SharedState>,
    Query(query): Query<TargetQuery>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<StatusCode, IngressError> {
    let target = query.into_selector()?;
    let Json(payload) =
        payload.map_err(|rejection| IngressError::MalformedPayload(rejection.body_text()))?;

    let request = BroadcastRequest::to_all(payload).with_target(target);
    state.ingress.accept(request).await?;
    Ok(StatusCode::ACCEPTED)
}

impl IntoResponse for IngressError {
    fn into_response(self) -> Response {
        match self {
            Self::MissingPayload | Self::ConflictingTargets => {
                StatusCode::BAD_REQUEST.into_response()
            }
            Self::MalformedPayload(reason) => (StatusCode::BAD_REQUEST, reason).into_response(),
            Self::Dispatch(DispatchError::Registry(_)) => {
                StatusCode::SERVICE_UNAVAILABLE.into_response()
            }
            Self::Dispatch(DispatchError::Encode(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        }
    }
}
