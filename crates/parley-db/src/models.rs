/// Row types as stored in SQLite.
/// Distinct from parley-types models to keep the DB layer independent.

pub struct MessageRow {
    pub id: i64,
    pub channel_id: String,
    pub user_id: String,
    pub username: String,
    pub text: String,
    pub image_path: Option<String>,
    pub reply_to: Option<i64>,
    pub created_at: String,
}

pub struct ReactionRow {
    pub message_id: i64,
    pub user_id: String,
    pub emoji: String,
}

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub is_super_admin: bool,
}
