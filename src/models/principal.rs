use serde::{Deserialize, Serialize};

/// The authenticated identity attached to one request.
///
/// Built fresh for every request from the user record, so `active` always
/// reflects the latest stored state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: i64,
    pub email: String,
    pub name: String,
    pub active: bool,
}
