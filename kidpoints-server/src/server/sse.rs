use axum::extract::{Query, State};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use futures::Stream;
use kidpoints_shared::api::ServerEvent;
use serde::Deserialize;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;

use super::{AppError, AppState, auth};

/// One realtime message tagged with the family it belongs to. The
/// broadcast channel is shared by all connections; each SSE stream
/// filters down to its own family.
#[derive(Debug, Clone)]
pub struct FamilyEvent {
    pub family_id: String,
    pub event: ServerEvent,
}

#[derive(Deserialize)]
pub struct SseQuery {
    token: String,
}

/// `GET /api/v1/sse?token=...`: the token rides a query parameter
/// because EventSource cannot set request headers.
pub async fn sse_handler(
    State(state): State<AppState>,
    Query(q): Query<SseQuery>,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, std::convert::Infallible>>>, AppError> {
    let claims = auth::authenticate_token(&state, &q.token).await?;
    let Some(family_id) = claims.family_id else {
        return Err(AppError::forbidden());
    };
    tracing::debug!(user_id = %claims.sub, family_id = %family_id, "sse: stream opened");

    let rx = state.subscribe_events();
    // Lagging receivers drop messages; clients resync on the next
    // change notification (eventual consistency is all that is promised).
    let stream = BroadcastStream::new(rx).filter_map(move |item| match item {
        Ok(ev) if ev.family_id == family_id => serde_json::to_string(&ev.event)
            .ok()
            .map(|data| Ok::<_, std::convert::Infallible>(SseEvent::default().data(data))),
        _ => None,
    });
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
