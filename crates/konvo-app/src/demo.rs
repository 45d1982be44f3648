//! End-to-end walk through presence and unread bookkeeping on the
//! in-memory backend.

use std::sync::Arc;
use std::time::Duration;

use konvo_common::{Clock, KonvoError, Result, SystemClock};
use konvo_config::KonvoConfig;
use konvo_social::{
    ConversationConfig, ConversationService, MemoryBackend, NewConversation, PresenceConfig,
    PresenceEvent, PresenceMirror, PresenceTracker,
};
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tracing::{info, warn};

const ALICE: &str = "alice";
const BOB: &str = "bob";

/// How long to wait for background presence tasks.
const SETTLE_TIMEOUT: Duration = Duration::from_secs(2);

pub fn presence_config(config: &KonvoConfig) -> PresenceConfig {
    PresenceConfig {
        status_root: config.presence.status_root.clone(),
        users_collection: config.presence.users_collection.clone(),
    }
}

pub fn conversation_config(config: &KonvoConfig) -> ConversationConfig {
    ConversationConfig {
        collection: config.conversations.collection.clone(),
        messages_collection: config.conversations.messages_collection.clone(),
    }
}

struct Demo {
    backend: Arc<MemoryBackend>,
    presence: PresenceConfig,
    conversations: ConversationConfig,
}

impl Demo {
    fn document(&self, collection: &str, id: &str) -> Value {
        self.backend.document(collection, id).unwrap_or(Value::Null)
    }

    fn profile(&self, user_id: &str) -> Value {
        self.document(&self.presence.users_collection, user_id)
    }

    fn status(&self, user_id: &str) -> Value {
        self.backend
            .value(&self.presence.status_path(user_id))
            .unwrap_or(Value::Null)
    }

    fn conversation(&self, id: &str) -> Value {
        self.document(&self.conversations.collection, id)
    }
}

fn print_step(step: &str, body: Value) {
    let report = json!({ "step": step, "state": body });
    match serde_json::to_string_pretty(&report) {
        Ok(text) => println!("{text}"),
        Err(e) => warn!("Failed to render demo output: {e}"),
    }
}

async fn wait_for_online(events: &mut broadcast::Receiver<PresenceEvent>) -> bool {
    let wait = async {
        loop {
            match events.recv().await {
                Ok(PresenceEvent::Online { .. }) => return true,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return false,
            }
        }
    };
    tokio::time::timeout(SETTLE_TIMEOUT, wait)
        .await
        .unwrap_or(false)
}

async fn wait_until<F>(check: F) -> bool
where
    F: Fn() -> bool,
{
    let poll = async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    tokio::time::timeout(SETTLE_TIMEOUT, poll).await.is_ok()
}

/// Run the scenarios and print each intermediate state as JSON.
pub async fn run(config: &KonvoConfig, hold: bool) -> Result<()> {
    let backend = Arc::new(MemoryBackend::new());
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let demo = Demo {
        backend: Arc::clone(&backend),
        presence: presence_config(config),
        conversations: conversation_config(config),
    };

    let service = ConversationService::new(backend.clone(), demo.conversations.clone());
    let mirror = PresenceMirror::new(backend.clone(), demo.presence.clone());
    let tracker = PresenceTracker::new(backend.clone(), clock, demo.presence.clone());
    let mut events = tracker.subscribe();

    let presence_enabled = config.presence.enabled;
    if presence_enabled {
        mirror.watch(ALICE);
        tracker.setup_presence(ALICE).await;
        backend.connect();
        if !wait_for_online(&mut events).await {
            return Err(KonvoError::Other("presence never came online".into()));
        }
        // The first Online is the setup write; the second follows "connected".
        wait_for_online(&mut events).await;
        print_step(
            "alice connected",
            json!({ "status": demo.status(ALICE), "profile": demo.profile(ALICE) }),
        );
    } else {
        info!("Presence disabled in config; skipping presence steps");
    }

    let started = service
        .start_conversation(NewConversation {
            participant_ids: vec![ALICE.into(), BOB.into()],
            sender_id: ALICE.into(),
            initial_message: "Hi Bob!".into(),
            is_group: false,
            group_name: None,
        })
        .await?;
    let conversation_id = started.conversation_id;
    service
        .send_message(&conversation_id, ALICE, "Are you around?")
        .await?;
    let bob_unread = service.unread_for(&conversation_id, BOB).await?;
    print_step(
        "alice sent two messages",
        json!({
            "conversation": demo.conversation(&conversation_id),
            "bobUnread": bob_unread,
        }),
    );

    service.mark_read(&conversation_id, BOB).await;
    print_step(
        "bob read the conversation",
        json!({ "conversation": demo.conversation(&conversation_id) }),
    );

    if !presence_enabled {
        return Ok(());
    }

    let users = demo.presence.users_collection.clone();
    backend.disconnect();
    let probe = Arc::clone(&backend);
    let mirrored = wait_until(move || {
        probe
            .document(&users, ALICE)
            .and_then(|doc| doc["status"]["state"].as_str().map(|s| s == "offline"))
            .unwrap_or(false)
    })
    .await;
    if !mirrored {
        warn!("Profile did not reflect the disconnect in time");
    }
    print_step(
        "alice's connection dropped",
        json!({ "status": demo.status(ALICE), "profile": demo.profile(ALICE) }),
    );

    if hold {
        backend.connect();
        wait_for_online(&mut events).await;
        info!("Holding presence online; press Ctrl-C to exit");
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {e}");
        }
        tracker.handle_before_unload().await;
        tracker.cleanup().await;
        print_step(
            "shutdown",
            json!({ "status": demo.status(ALICE), "profile": demo.profile(ALICE) }),
        );
    } else {
        tracker.sign_out().await;
    }

    mirror.clear();
    Ok(())
}
