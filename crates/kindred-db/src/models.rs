//! Database row types for tables that have no domain model in kindred-types.

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub password: String,
    pub disabled: bool,
    pub created_at: String,
}
