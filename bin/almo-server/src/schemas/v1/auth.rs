use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::AuthPermission;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AuthPermissionResponse {
    pub permission: AuthPermission,
}
