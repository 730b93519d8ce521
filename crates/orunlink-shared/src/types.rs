use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! id_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(
    /// Identity of a user, issued by the backend's auth service.
    UserId
);
id_type!(ProjectId);
id_type!(CommentId);
id_type!(MessageId);
id_type!(
    /// Identity of a join request.
    RequestId
);
id_type!(NotificationId);

/// Lifecycle of a join request.
///
/// `Pending` is the only non-terminal state; `Accepted` and `Rejected`
/// admit no further transitions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Accepted,
    Rejected,
}

impl RequestStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Accepted | Self::Rejected)
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
        };
        write!(f, "{s}")
    }
}

/// Role of a user inside a project's group chat.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantRole {
    Creator,
    Admin,
    Member,
}

impl ParticipantRole {
    /// Only creators and admins may change group chat settings.
    pub fn can_edit_settings(&self) -> bool {
        matches!(self, Self::Creator | Self::Admin)
    }
}

/// The presence-toggle families.  Each kind maps to its own table; a row's
/// presence is the toggle's `true` state, its absence the `false` state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ToggleKind {
    Like,
    Save,
    Follow,
}

/// What a toggle points at: likes and saves target a project, follows
/// target another user.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ToggleTarget {
    Project(ProjectId),
    User(UserId),
}

impl ToggleTarget {
    /// The raw id stored in the toggle row's `target` column.
    pub fn id(&self) -> Uuid {
        match self {
            Self::Project(p) => p.0,
            Self::User(u) => u.0,
        }
    }
}

/// Addressing for a chat conversation: a project's group channel or a
/// direct-message pair.
///
/// Direct pairs are normalized so that `direct(a, b)` and `direct(b, a)`
/// name the same conversation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Conversation {
    Project(ProjectId),
    Direct { a: UserId, b: UserId },
}

impl Conversation {
    /// A direct conversation between two users, order-independent.
    pub fn direct(x: UserId, y: UserId) -> Self {
        if x <= y {
            Self::Direct { a: x, b: y }
        } else {
            Self::Direct { a: y, b: x }
        }
    }

    /// The filterable key stored in each message row's `conversation`
    /// column and used to scope realtime subscriptions.
    pub fn key(&self) -> String {
        match self {
            Self::Project(p) => format!("project:{}", p.0),
            Self::Direct { a, b } => format!("direct:{}:{}", a.0, b.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_conversation_is_order_independent() {
        let x = UserId::new();
        let y = UserId::new();
        assert_eq!(Conversation::direct(x, y), Conversation::direct(y, x));
        assert_eq!(
            Conversation::direct(x, y).key(),
            Conversation::direct(y, x).key()
        );
    }

    #[test]
    fn terminal_states() {
        assert!(!RequestStatus::Pending.is_terminal());
        assert!(RequestStatus::Accepted.is_terminal());
        assert!(RequestStatus::Rejected.is_terminal());
    }
}
