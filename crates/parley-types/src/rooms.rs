use std::fmt;

/// Fan-out room identifier.
///
/// Channel rooms are keyed by the bare channel id; the others carry a prefix
/// so that ids from different namespaces never collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RoomKey {
    Channel(String),
    Group(String),
    User(String),
    /// Call room. The id doubles as the parent channel id.
    Video(String),
}

impl fmt::Display for RoomKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Channel(id) => write!(f, "{id}"),
            Self::Group(id) => write!(f, "group_{id}"),
            Self::User(id) => write!(f, "user_{id}"),
            Self::Video(id) => write!(f, "video_{id}"),
        }
    }
}
