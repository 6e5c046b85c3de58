use serde::{Deserialize, Serialize};

/// 后端用户对象中用到的字段
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

impl SessionUser {
    pub fn display_name(&self) -> &str {
        self.email.as_deref().unwrap_or(&self.id)
    }
}

/// 已认证的会话：后端签发的访问令牌及其对应用户，显式传给每个后端调用
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserSession {
    pub access_token: String,
    pub user: SessionUser,
}

impl UserSession {
    pub fn user_id(&self) -> &str {
        &self.user.id
    }
}

/// Access-token claims issued by the identity provider.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: i64,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}
