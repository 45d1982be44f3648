pub mod backend;
pub mod presence;
pub mod unread;

pub use backend::{
    Backend, Connectivity, FaultPlan, Fields, MemoryBackend, StorePath, Subscription,
    SubscriptionHandle, SubscriptionSet,
};
pub use presence::{
    format_relative_time, format_status_time, update_interval, PresenceConfig, PresenceEvent,
    PresenceMirror, PresencePhase, PresenceState, PresenceStatus, PresenceTracker, SetupOutcome,
    StatusStream, StatusWatcher,
};
pub use unread::{
    ConversationConfig, ConversationRecord, ConversationService, NewConversation,
    ReconcileOutcome, SkipReason, UnreadReconciler, UnreadSnapshot,
};
