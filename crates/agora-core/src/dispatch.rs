//! Command dispatch.
//!
//! Every command envelope resolves to exactly one reply: a
//! `command_response` on success, an `error` with a stable code otherwise.
//! The dispatcher owns all command-driven routing table mutation; nothing
//! else creates or deletes channels on behalf of a client.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;

use agora_protocol::{timestamp, Envelope, PROTOCOL_VERSION};

use crate::auth::Capability;
use crate::channel::ChannelKey;
use crate::hub::Hub;
use crate::registry::ClientHandle;
use crate::routing::RoutingError;
use crate::store::StoreError;
use crate::telemetry::TelemetryEvent;

/// Default page size for `history` when the client sends no limit.
const DEFAULT_HISTORY_LIMIT: usize = 50;
/// Hard ceiling on one `history` page.
const MAX_HISTORY_LIMIT: usize = 500;

#[derive(Debug, Error)]
enum CommandError {
    #[error("unknown command: {0}")]
    Unknown(String),
    #[error("{0}")]
    InvalidArgs(String),
    #[error("requires the {0} capability")]
    Unauthorized(&'static str),
    #[error(transparent)]
    Routing(#[from] RoutingError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl CommandError {
    fn code(&self) -> &'static str {
        match self {
            Self::Unknown(_) => "UNKNOWN_COMMAND",
            Self::InvalidArgs(_) => "INVALID_ARGS",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::Routing(e) => e.code(),
            Self::Store(e) => e.code(),
        }
    }

    fn outcome(&self) -> &'static str {
        match self {
            Self::Unknown(_) | Self::InvalidArgs(_) | Self::Unauthorized(_) => "rejected",
            Self::Routing(_) | Self::Store(_) => "failed",
        }
    }
}

#[derive(Deserialize)]
struct RouteArgs {
    room: String,
    channel: String,
}

#[derive(Deserialize)]
struct CreateArgs {
    room: String,
    channel: String,
    #[serde(default)]
    strict: bool,
    #[serde(default)]
    metadata: Value,
}

#[derive(Deserialize)]
struct RoomArgs {
    room: String,
}

#[derive(Deserialize)]
struct HistoryArgs {
    room: String,
    channel: String,
    limit: Option<usize>,
    before: Option<u64>,
}

/// Execute one command envelope and build its reply.
pub(crate) async fn dispatch(hub: &Hub, client: &Arc<ClientHandle>, request: &Envelope) -> Envelope {
    let command = request.command_name().unwrap_or("").to_string();

    let (outcome, reply) = match execute(hub, client, &command, request).await {
        Ok(payload) => (
            "responded",
            Envelope::command_response(request.id.clone(), payload),
        ),
        Err(e) => (
            e.outcome(),
            Envelope::error_reply(Some(&request.id), e.code(), &e.to_string()),
        ),
    };

    hub.telemetry.emit(TelemetryEvent::CommandExecuted {
        client_id: client.id().to_string(),
        command: command.clone(),
        outcome,
    });
    debug!(client = %client.id(), command = %command, outcome, "Dispatched command");

    reply
}

async fn execute(
    hub: &Hub,
    client: &Arc<ClientHandle>,
    command: &str,
    request: &Envelope,
) -> Result<Value, CommandError> {
    if request.command_name().is_none() {
        return Err(CommandError::InvalidArgs(
            "command payload must be a string".to_string(),
        ));
    }

    let required = match command {
        "status" | "list_channels" | "channel_info" => Some(Capability::Inspect),
        "create_channel" | "delete_channel" => Some(Capability::Manage),
        "join_channel" | "leave_channel" | "history" => Some(Capability::Subscribe),
        "ping" => None,
        other => return Err(CommandError::Unknown(other.to_string())),
    };
    if let Some(capability) = required {
        if !hub.authorizer.capabilities(client).contains(capability) {
            return Err(CommandError::Unauthorized(capability.as_str()));
        }
    }

    match command {
        "status" => {
            let counts = hub.counts();
            let mut payload = serde_json::to_value(&counts).unwrap_or(Value::Null);
            if let Value::Object(map) = &mut payload {
                map.insert("server_time".to_string(), json!(timestamp::now()));
                map.insert(
                    "protocol_version".to_string(),
                    json!(PROTOCOL_VERSION.to_string()),
                );
            }
            Ok(payload)
        }
        "create_channel" => {
            let args: CreateArgs = parse_args(&request.args)?;
            let descriptor = hub.routing.create_channel(
                &args.room,
                &args.channel,
                crate::channel::CreateOptions {
                    strict: args.strict,
                    metadata: args.metadata,
                },
            )?;
            Ok(serde_json::to_value(descriptor).unwrap_or(Value::Null))
        }
        "delete_channel" => {
            let args: RouteArgs = parse_args(&request.args)?;
            let key = ChannelKey::new(args.room, args.channel);
            let evicted = hub.delete_channel(&key).await?;
            Ok(json!({ "deleted": key.to_string(), "evicted": evicted }))
        }
        "join_channel" => {
            let args: RouteArgs = parse_args(&request.args)?;
            let key = ChannelKey::new(args.room, args.channel);
            let descriptor = hub.join_channel(client, &key)?;
            Ok(serde_json::to_value(descriptor).unwrap_or(Value::Null))
        }
        "leave_channel" => {
            let args: RouteArgs = parse_args(&request.args)?;
            let key = ChannelKey::new(args.room, args.channel);
            let left = hub.leave_channel(client, &key)?;
            Ok(json!({ "left": left }))
        }
        "list_channels" => {
            let args: RoomArgs = parse_args(&request.args)?;
            let channels = hub.routing.list_channels(&args.room)?;
            Ok(json!({ "room": args.room, "channels": channels }))
        }
        "channel_info" => {
            let args: RouteArgs = parse_args(&request.args)?;
            let key = ChannelKey::new(args.room, args.channel);
            let descriptor = hub.routing.channel_info(&key)?;
            Ok(serde_json::to_value(descriptor).unwrap_or(Value::Null))
        }
        "ping" => Ok(json!({ "pong": true, "server_time": timestamp::now() })),
        "history" => {
            let args: HistoryArgs = parse_args(&request.args)?;
            let key = ChannelKey::new(args.room, args.channel);
            if !hub.routing.contains(&key) {
                return Err(RoutingError::NotFound(key.to_string()).into());
            }
            let limit = args.limit.unwrap_or(DEFAULT_HISTORY_LIMIT).min(MAX_HISTORY_LIMIT);
            let entries = hub.store.history(&key, limit, args.before).await?;
            Ok(json!({
                "room": key.room,
                "channel": key.channel,
                "count": entries.len(),
                "entries": entries,
            }))
        }
        _ => unreachable!("gated above"),
    }
}

fn parse_args<T: serde::de::DeserializeOwned>(args: &Value) -> Result<T, CommandError> {
    serde_json::from_value(args.clone()).map_err(|e| CommandError::InvalidArgs(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticAuthorizer;
    use crate::hub::HubConfig;
    use crate::registry::{ClientType, ConnectParams};
    use crate::store::MemoryStore;
    use crate::telemetry::NullSink;
    use agora_protocol::EnvelopeType;

    fn test_hub() -> Hub {
        Hub::new(
            HubConfig::default(),
            Arc::new(MemoryStore::default()),
            Arc::new(StaticAuthorizer::default()),
            Arc::new(NullSink),
        )
    }

    fn connect(hub: &Hub, id: &str, client_type: ClientType) -> Arc<ClientHandle> {
        let handle = hub
            .connect(ConnectParams {
                client_id: Some(id.to_string()),
                client_type,
                metadata: Value::Null,
            })
            .unwrap();
        let _ = handle.queue().try_next();
        handle
    }

    async fn run(hub: &Hub, client: &Arc<ClientHandle>, name: &str, args: Value) -> Envelope {
        let request = Envelope::command(name, args);
        dispatch(hub, client, &request).await
    }

    #[tokio::test]
    async fn test_unknown_command() {
        let hub = test_hub();
        let alice = connect(&hub, "alice", ClientType::Human);

        let reply = run(&hub, &alice, "destroy_everything", Value::Null).await;
        assert_eq!(reply.kind, EnvelopeType::Error);
        assert_eq!(reply.payload["code"], "UNKNOWN_COMMAND");
    }

    #[tokio::test]
    async fn test_replies_carry_request_id() {
        let hub = test_hub();
        let alice = connect(&hub, "alice", ClientType::Human);

        let request = Envelope::command("ping", Value::Null);
        let reply = dispatch(&hub, &alice, &request).await;
        assert_eq!(reply.reply_to.as_deref(), Some(request.id.as_str()));
        assert_eq!(reply.kind, EnvelopeType::CommandResponse);
        assert_eq!(reply.payload["pong"], true);
    }

    #[tokio::test]
    async fn test_missing_args_rejected() {
        let hub = test_hub();
        let alice = connect(&hub, "alice", ClientType::Human);

        let reply = run(&hub, &alice, "join_channel", Value::Null).await;
        assert_eq!(reply.payload["code"], "INVALID_ARGS");
    }

    #[tokio::test]
    async fn test_create_requires_manage_capability() {
        let hub = test_hub();
        let board = connect(&hub, "board", ClientType::Dashboard);

        let reply = run(
            &hub,
            &board,
            "create_channel",
            json!({"room": "science", "channel": "general"}),
        )
        .await;
        assert_eq!(reply.payload["code"], "UNAUTHORIZED");
        assert!(!hub.routing.contains(&ChannelKey::new("science", "general")));
    }

    #[tokio::test]
    async fn test_channel_lifecycle_via_commands() {
        let hub = test_hub();
        let svc = connect(&hub, "svc", ClientType::Service);

        let created = run(
            &hub,
            &svc,
            "create_channel",
            json!({"room": "science", "channel": "general"}),
        )
        .await;
        assert_eq!(created.kind, EnvelopeType::CommandResponse);
        assert_eq!(created.payload["room"], "science");

        let joined = run(
            &hub,
            &svc,
            "join_channel",
            json!({"room": "science", "channel": "general"}),
        )
        .await;
        assert_eq!(joined.payload["member_count"], 1);

        let info = run(
            &hub,
            &svc,
            "channel_info",
            json!({"room": "science", "channel": "general"}),
        )
        .await;
        assert_eq!(info.payload["member_count"], 1);

        let listed = run(&hub, &svc, "list_channels", json!({"room": "science"})).await;
        assert_eq!(listed.payload["channels"][0]["channel"], "general");

        let left = run(
            &hub,
            &svc,
            "leave_channel",
            json!({"room": "science", "channel": "general"}),
        )
        .await;
        assert_eq!(left.payload["left"], true);
    }

    #[tokio::test]
    async fn test_create_twice_non_strict_then_strict() {
        let hub = test_hub();
        let svc = connect(&hub, "svc", ClientType::Service);
        let args = json!({"room": "science", "channel": "explore"});

        let first = run(&hub, &svc, "create_channel", args.clone()).await;
        let second = run(&hub, &svc, "create_channel", args.clone()).await;
        assert_eq!(first.payload["created_at"], second.payload["created_at"]);

        let strict = run(
            &hub,
            &svc,
            "create_channel",
            json!({"room": "science", "channel": "explore", "strict": true}),
        )
        .await;
        assert_eq!(strict.payload["code"], "ALREADY_EXISTS");
    }

    #[tokio::test]
    async fn test_history_pages_newest_first() {
        let hub = test_hub();
        let alice = connect(&hub, "alice", ClientType::Human);
        let key = ChannelKey::new("science", "general");
        hub.join_channel(&alice, &key).unwrap();

        for n in 1..=5 {
            let raw = Envelope::message("science", "general", json!({"n": n}))
                .to_bytes()
                .unwrap();
            hub.handle_inbound("alice", &raw).await;
        }

        let page = run(
            &hub,
            &alice,
            "history",
            json!({"room": "science", "channel": "general", "limit": 2}),
        )
        .await;
        assert_eq!(page.payload["count"], 2);
        assert_eq!(page.payload["entries"][0]["seq"], 5);
        assert_eq!(page.payload["entries"][1]["seq"], 4);

        let older = run(
            &hub,
            &alice,
            "history",
            json!({"room": "science", "channel": "general", "limit": 2, "before": 4}),
        )
        .await;
        assert_eq!(older.payload["entries"][0]["seq"], 3);
        assert_eq!(older.payload["entries"][1]["seq"], 2);
    }

    #[tokio::test]
    async fn test_history_for_unknown_channel() {
        let hub = test_hub();
        let alice = connect(&hub, "alice", ClientType::Human);

        let reply = run(
            &hub,
            &alice,
            "history",
            json!({"room": "no", "channel": "where"}),
        )
        .await;
        assert_eq!(reply.payload["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_status_reports_counts() {
        let hub = test_hub();
        let alice = connect(&hub, "alice", ClientType::Human);
        hub.join_channel(&alice, &ChannelKey::new("science", "general")).unwrap();

        let reply = run(&hub, &alice, "status", Value::Null).await;
        assert_eq!(reply.payload["clients"], 1);
        assert_eq!(reply.payload["channels"], 1);
        assert_eq!(reply.payload["history_backend"], "memory");
        assert!(reply.payload["server_time"].is_string());
        assert_eq!(reply.payload["protocol_version"], "1.0");
    }

    #[tokio::test]
    async fn test_delete_channel_reports_evicted() {
        let hub = test_hub();
        let svc = connect(&hub, "svc", ClientType::Service);
        let alice = connect(&hub, "alice", ClientType::Human);
        hub.join_channel(&alice, &ChannelKey::new("science", "general")).unwrap();

        let reply = run(
            &hub,
            &svc,
            "delete_channel",
            json!({"room": "science", "channel": "general"}),
        )
        .await;
        assert_eq!(reply.payload["evicted"], 1);
        assert!(!hub.routing.contains(&ChannelKey::new("science", "general")));
    }

    #[tokio::test]
    async fn test_command_without_string_payload() {
        let hub = test_hub();
        let alice = connect(&hub, "alice", ClientType::Human);

        let mut request = Envelope::command("ping", Value::Null);
        request.payload = json!({"not": "a string"});
        let reply = dispatch(&hub, &alice, &request).await;
        assert_eq!(reply.payload["code"], "INVALID_ARGS");
    }
}
