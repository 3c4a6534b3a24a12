//! Bridges broadcast-bus topics onto client websockets. One socket, one
//! topic; clients open one connection per subscription.

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use log::debug;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::broadcast::{events, topics, MessageBus};
use crate::notifications::PresenceRegistry;
use crate::shared::state::AppState;

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub topic: String,
    /// Present for support users; drives the presence registry.
    pub user_id: Option<Uuid>,
    /// Support consoles also name the agent whose team presence channel
    /// should see their online/offline transitions.
    pub agent_id: Option<Uuid>,
}

pub async fn ws_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<WsParams>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| serve_socket(state, params, socket))
}

async fn serve_socket(state: Arc<AppState>, params: WsParams, mut socket: WebSocket) {
    let mut rx = state.bus.subscribe(&params.topic).await;
    if let Some(user_id) = params.user_id {
        announce_presence(&state.bus, &state.presence, user_id, params.agent_id, true).await;
    }
    debug!("ws subscribed to {}", params.topic);

    loop {
        tokio::select! {
            event = rx.recv() => {
                let Ok(payload) = event else { break };
                let text = payload.to_string();
                if socket.send(WsMessage::Text(text)).await.is_err() {
                    break;
                }
            }
            frame = socket.recv() => {
                // Inbound frames are only pings/closes; chat goes over HTTP.
                match frame {
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    if let Some(user_id) = params.user_id {
        announce_presence(&state.bus, &state.presence, user_id, params.agent_id, false).await;
    }
    debug!("ws closed for {}", params.topic);
}

/// Records the transition in the registry and mirrors it onto the team
/// presence topic when the connection names an agent.
async fn announce_presence(
    bus: &Arc<dyn MessageBus>,
    presence: &PresenceRegistry,
    user_id: Uuid,
    agent_id: Option<Uuid>,
    online: bool,
) {
    if online {
        presence.mark_online(user_id);
    } else {
        presence.mark_offline(user_id);
    }
    if let Some(agent_id) = agent_id {
        bus.publish(
            &topics::presence_agent_support(agent_id),
            events::presence_changed(user_id, online),
        )
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::BroadcastBus;

    #[tokio::test]
    async fn presence_transitions_reach_the_team_topic() {
        let bus: Arc<dyn MessageBus> = Arc::new(BroadcastBus::new());
        let presence = PresenceRegistry::new();
        let user_id = Uuid::new_v4();
        let agent_id = Uuid::new_v4();
        let mut rx = bus
            .subscribe(&topics::presence_agent_support(agent_id))
            .await;

        announce_presence(&bus, &presence, user_id, Some(agent_id), true).await;
        assert!(presence.is_online(user_id));
        let online = rx.recv().await.unwrap();
        assert_eq!(online["user_id"], user_id.to_string());
        assert_eq!(online["online"], true);

        announce_presence(&bus, &presence, user_id, Some(agent_id), false).await;
        assert!(!presence.is_online(user_id));
        let offline = rx.recv().await.unwrap();
        assert_eq!(offline["online"], false);
    }

    #[tokio::test]
    async fn end_user_connections_announce_nothing() {
        let bus: Arc<dyn MessageBus> = Arc::new(BroadcastBus::new());
        let presence = PresenceRegistry::new();
        let user_id = Uuid::new_v4();

        announce_presence(&bus, &presence, user_id, None, true).await;
        assert!(presence.is_online(user_id));
    }
}
