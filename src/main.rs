//! synckit-server: reference TCP host for the SyncKit sync protocol.
//!
//! Accepts connections, frames them with the binary wire codec, and routes
//! incoming messages into a [`server::ServerCore`] shared across
//! connections.

use std::sync::Arc;

use synckit_crdt::OpKind;
use synckit_proto::Message;
use synckit_server::auth::AllowAll;
use synckit_server::config::Config;
use synckit_server::metrics;
use synckit_server::server::{DocumentKind, ServerCore};
use synckit_server::storage::MemoryStorage;
use synckit_server::transport::{TcpTransport, TransportAdapter};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

fn resolve_config_path() -> String {
    std::env::args().nth(1).unwrap_or_else(|| "config.toml".to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = resolve_config_path();
    let config = Config::load(&config_path).map_err(|err| {
        eprintln!("ERROR: failed to load config from {config_path}: {err}");
        err
    })?;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).with_target(true).json().init();

    metrics::init();

    info!(
        replica_id = %config.replica_id,
        bind_addr = %config.bind_addr,
        auth_required = config.auth_required,
        "starting synckit-server"
    );

    let storage = Arc::new(MemoryStorage::new());
    let auth = Arc::new(AllowAll);
    let core = Arc::new(ServerCore::new(storage, auth));

    let listener = TcpListener::bind(config.bind_addr).await?;

    loop {
        let (stream, peer_addr) = listener.accept().await?;
        let connection_id = uuid::Uuid::new_v4().to_string();
        info!(connection_id, %peer_addr, "accepted connection");

        let transport: Arc<dyn TransportAdapter> = TcpTransport::spawn(stream);
        let dispatch_core = core.clone();
        let dispatch_transport = transport.clone();
        let dispatch_connection_id = connection_id.clone();

        transport.on_message(Box::new(move |message| {
            let core = dispatch_core.clone();
            let transport = dispatch_transport.clone();
            let connection_id = dispatch_connection_id.clone();
            tokio::spawn(async move {
                handle_message(&core, &transport, &connection_id, message).await;
            });
        }));
    }
}

/// Route one decoded message from `connection_id` into the server core,
/// sending back whatever reply (ack, error, snapshot) it produces.
///
/// `connection_id` doubles as the `user` identity passed to `AuthGuard`:
/// this reference binary has no authentication layer of its own, matching
/// `AllowAll`'s "single-tenant deployment" scope.
async fn handle_message(core: &ServerCore, transport: &Arc<dyn TransportAdapter>, connection_id: &str, message: Message) {
    match message {
        Message::Subscribe { document_id } => {
            core.register_document(&document_id, DocumentKind::Lww);
            if let Err(err) = core.subscribe(&document_id, connection_id, transport.clone()) {
                warn!(connection_id, document_id, error = %err, "subscribe failed");
            }
        }
        Message::Unsubscribe { document_id } => {
            if let Err(err) = core.unsubscribe(&document_id, connection_id) {
                warn!(connection_id, document_id, error = %err, "unsubscribe failed");
            }
        }
        Message::Delta { document_id, delta, .. } => {
            if let Ok(op) = serde_json::from_value::<synckit_crdt::Operation>(delta.clone()) {
                let kind = match op.kind {
                    OpKind::DocumentSet | OpKind::DocumentDelete => DocumentKind::Lww,
                    _ => DocumentKind::CrdtIntrinsic,
                };
                core.register_document(&document_id, kind);
            }
            match core.handle_delta(connection_id, connection_id, &document_id, &delta).await {
                Ok(ack) => {
                    if let Err(err) = transport.send(ack) {
                        warn!(connection_id, error = %err, "failed to send ack");
                    }
                }
                Err(err) => {
                    warn!(connection_id, document_id, error = %err, "delta rejected");
                    let _ = transport.send(Message::Error { error: err.to_string(), details: None });
                }
            }
        }
        Message::AwarenessUpdate { document_id, client_id, state, clock } => {
            core.register_document(&document_id, DocumentKind::Lww);
            if let Err(err) =
                core.handle_awareness_update(connection_id, connection_id, &document_id, &client_id, state, clock)
            {
                warn!(connection_id, document_id, error = %err, "awareness update rejected");
            }
        }
        Message::AwarenessSubscribe { document_id } => match core.awareness_snapshot(&document_id) {
            Ok(snapshot) => {
                let _ = transport.send(snapshot);
            }
            Err(err) => warn!(connection_id, document_id, error = %err, "awareness snapshot failed"),
        },
        Message::Ping {} => {
            let _ = transport.send(Message::Pong {});
        }
        other => {
            debug!(connection_id, kind = other.type_code(), "unhandled message kind");
        }
    }
}
