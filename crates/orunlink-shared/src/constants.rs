/// Application name
pub const APP_NAME: &str = "Orunlink";

/// Default page size for list queries (projects, messages, comments)
pub const DEFAULT_PAGE_SIZE: u32 = 50;

/// Hard cap on a single list query
pub const MAX_PAGE_SIZE: u32 = 200;

/// Maximum chat message length in characters
pub const MAX_MESSAGE_LEN: usize = 4_000;

/// Maximum comment length in characters
pub const MAX_COMMENT_LEN: usize = 2_000;

/// Maximum upload size in bytes (25 MiB)
pub const MAX_UPLOAD_SIZE: usize = 25 * 1024 * 1024;

/// Capacity of the backend's broadcast change feed
pub const FEED_SOURCE_CAPACITY: usize = 256;

/// Capacity of each subscription's delivery buffer
pub const SUBSCRIPTION_BUFFER: usize = 64;

/// Storage bucket for project media
pub const BUCKET_PROJECT_MEDIA: &str = "project-media";

/// Storage bucket for avatars (user and group chat)
pub const BUCKET_AVATARS: &str = "avatars";

/// File name of the cached session inside the app data directory
pub const SESSION_CACHE_FILE: &str = "session.json";

/// File name of the moderation unlock flag inside the app data directory
pub const MODERATION_FLAG_FILE: &str = "moderation.json";
