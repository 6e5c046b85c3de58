use crate::{
    config::Config,
    error::{AppError, Result},
    models::{
        bookmark::{Bookmark, NewBookmark},
        user::{SessionUser, UserSession},
    },
    services::{
        backend::{Backend, ChangeFeed},
        realtime::RealtimeClient,
    },
};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Supabase 适配器：GoTrue 认证、PostgREST 数据访问和 Realtime 变更订阅
#[derive(Clone)]
pub struct SupabaseBackend {
    base_url: String,
    anon_key: String,
    table: String,
    http_client: Client,
    realtime: RealtimeClient,
}

#[derive(Debug, Serialize)]
struct PkceTokenRequest<'a> {
    auth_code: &'a str,
    code_verifier: &'a str,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    user: SessionUser,
}

impl SupabaseBackend {
    pub fn new(config: &Config) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.http_timeout))
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        let base_url = config.supabase_url.trim_end_matches('/').to_string();
        let realtime = RealtimeClient::new(
            &base_url,
            &config.supabase_anon_key,
            &config.bookmarks_table,
            Duration::from_secs(config.realtime_heartbeat),
        )?;

        Ok(Self {
            base_url,
            anon_key: config.supabase_anon_key.clone(),
            table: config.bookmarks_table.clone(),
            http_client,
            realtime,
        })
    }

    fn auth_endpoint(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.base_url, path)
    }

    fn rest_endpoint(&self) -> String {
        format!("{}/rest/v1/{}", self.base_url, self.table)
    }

    /// 每个请求都需要 apikey；带令牌时由行级安全策略按用户过滤
    fn with_keys(&self, request: RequestBuilder, access_token: Option<&str>) -> RequestBuilder {
        let bearer = access_token.unwrap_or(&self.anon_key);
        request
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {}", bearer))
    }

    async fn check(response: reqwest::Response, operation: &str) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        warn!("Supabase {} failed with {}: {}", operation, status, body);
        Err(AppError::Backend(format!("{} failed with status {}", operation, status)))
    }
}

#[async_trait]
impl Backend for SupabaseBackend {
    fn authorize_url(&self, provider: &str, redirect_to: &str, code_challenge: &str) -> Result<String> {
        let mut url = url::Url::parse(&self.auth_endpoint("authorize"))?;
        url.query_pairs_mut()
            .append_pair("provider", provider)
            .append_pair("redirect_to", redirect_to)
            .append_pair("code_challenge", code_challenge)
            .append_pair("code_challenge_method", "s256");
        Ok(url.to_string())
    }

    async fn exchange_code(&self, auth_code: &str, code_verifier: &str) -> Result<UserSession> {
        let request = self
            .http_client
            .post(self.auth_endpoint("token"))
            .query(&[("grant_type", "pkce")])
            .json(&PkceTokenRequest {
                auth_code,
                code_verifier,
            });

        let response = self
            .with_keys(request, None)
            .send()
            .await
            .map_err(|e| {
                error!("Failed to reach Supabase auth: {}", e);
                AppError::ExternalService("Failed to exchange authorization code".to_string())
            })?;

        if !response.status().is_success() {
            warn!("Supabase code exchange returned {}", response.status());
            return Err(AppError::Authentication("Authorization code rejected".to_string()));
        }

        let token: TokenResponse = response.json().await.map_err(|e| {
            error!("Failed to parse Supabase token response: {}", e);
            AppError::Authentication("Invalid response from Supabase auth".to_string())
        })?;

        info!("Exchanged authorization code for user {}", token.user.id);
        Ok(UserSession {
            access_token: token.access_token,
            user: token.user,
        })
    }

    async fn get_user(&self, access_token: &str) -> Result<Option<SessionUser>> {
        let request = self.http_client.get(self.auth_endpoint("user"));
        let response = self.with_keys(request, Some(access_token)).send().await?;

        match response.status() {
            status if status.is_success() => Ok(Some(response.json::<SessionUser>().await?)),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                debug!("Supabase rejected access token");
                Ok(None)
            }
            status => Err(AppError::Backend(format!("user lookup failed with status {}", status))),
        }
    }

    async fn sign_out(&self, access_token: &str) -> Result<()> {
        let request = self.http_client.post(self.auth_endpoint("logout"));
        let response = self.with_keys(request, Some(access_token)).send().await?;
        Self::check(response, "sign-out").await?;
        Ok(())
    }

    async fn select_bookmarks(&self, session: &UserSession) -> Result<Vec<Bookmark>> {
        let owner_filter = format!("eq.{}", session.user_id());
        let request = self.http_client.get(self.rest_endpoint()).query(&[
            ("select", "*"),
            ("user_id", owner_filter.as_str()),
            ("order", "created_at.desc"),
        ]);

        let response = self
            .with_keys(request, Some(&session.access_token))
            .send()
            .await?;
        let response = Self::check(response, "select").await?;
        Ok(response.json::<Vec<Bookmark>>().await?)
    }

    async fn insert_bookmark(&self, session: &UserSession, row: NewBookmark) -> Result<()> {
        let request = self
            .http_client
            .post(self.rest_endpoint())
            .header("Prefer", "return=minimal")
            .json(&[row]);

        let response = self
            .with_keys(request, Some(&session.access_token))
            .send()
            .await?;
        Self::check(response, "insert").await?;
        Ok(())
    }

    async fn delete_bookmark(&self, session: &UserSession, id: &str) -> Result<()> {
        let id_filter = format!("eq.{}", id);
        let request = self
            .http_client
            .delete(self.rest_endpoint())
            .query(&[("id", id_filter.as_str())]);

        let response = self
            .with_keys(request, Some(&session.access_token))
            .send()
            .await?;
        Self::check(response, "delete").await?;
        Ok(())
    }

    async fn subscribe(&self, session: &UserSession) -> Result<ChangeFeed> {
        self.realtime.subscribe(session).await
    }
}
