//! Live-update event stream
//!
//! Each connection registers a broadcaster subscription, sends `connected`,
//! then forwards every published message until the client goes away or the
//! server closes all subscriptions on shutdown.

use crate::AppState;
use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use defirates_common::SseMessage;
use futures::stream::Stream;
use std::convert::Infallible;
use std::time::Duration;
use tracing::{debug, info};

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// GET /events
pub async fn event_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    // The guard lives inside the stream: dropping the stream on disconnect unsubscribes
    let mut subscription = state.broadcaster.subscribe_guarded();
    info!(subscriber_id = subscription.id(), "Live-update client connected");

    let stream = async_stream::stream! {
        yield Ok(to_event(&SseMessage::connected()));

        while let Some(message) = subscription.recv().await {
            debug!(subscriber_id = subscription.id(), event = %message.event, "Forwarding event");
            yield Ok(to_event(&message));
        }

        debug!(subscriber_id = subscription.id(), "Live-update stream closed by server");
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(KEEP_ALIVE_INTERVAL)
            .text("heartbeat"),
    )
}

fn to_event(message: &SseMessage) -> Event {
    Event::default().event(&message.event).data(&message.data)
}
