use serde::{Deserialize, Serialize};

/// JWT payload. The caller's organization rides along so tenancy checks do
/// not need a user lookup on every guarded request.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: i64,
    pub org: i64,
    pub exp: usize,
    pub admin: bool,
}

#[derive(Debug, Clone)]
pub struct AuthUser(pub Claims);
