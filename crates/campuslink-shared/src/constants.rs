/// Application name
pub const APP_NAME: &str = "campuslink";

/// Feed item id prefix for pending connection requests (`req-<fromUserId>`)
pub const FEED_PREFIX_REQUEST: &str = "req-";

/// Feed item id prefix for direct message counters (`msg-<counterpartId>`)
pub const FEED_PREFIX_MESSAGE: &str = "msg-";

/// Feed item id prefix for group message counters (`gmsg-<groupId>`)
pub const FEED_PREFIX_GROUP_MESSAGE: &str = "gmsg-";

/// Display name used when the profile directory has no entry for a user
pub const UNKNOWN_USER_NAME: &str = "Unknown User";

/// Display name used when the group directory has no entry for a group
pub const UNKNOWN_GROUP_NAME: &str = "a group";

/// Header carrying the acting user's id, set by the upstream gateway
pub const ACTING_USER_HEADER: &str = "x-user-id";

/// Default HTTP API port
pub const DEFAULT_HTTP_PORT: u16 = 8080;
