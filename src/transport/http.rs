use super::{DirectTransport, SessionCookies, ThreadAction};
use crate::config::{InboxConfig, SessionConfig};
use crate::direct::error::DirectError;
use crate::direct::types::{InboxSnapshot, InboxVariant, SendResult, Thread, UserProfile};
use async_trait::async_trait;
use rand::Rng;
use reqwest::{Client, Method};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Cookie-authenticated client for the private direct-message API.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    api_base: String,
    user_agent: String,
    app_id: String,
    device_id: String,
    cookies: SessionCookies,
    restricted_codes: Vec<i64>,
    thread_message_limit: u32,
    page_limit: u32,
}

impl HttpTransport {
    pub fn new(
        session: &SessionConfig,
        inbox: &InboxConfig,
        cookies: SessionCookies,
    ) -> Result<Self, DirectError> {
        cookies
            .validate()
            .map_err(|e| DirectError::NotLoggedIn(e.to_string()))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(session.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_base: session.base_url.trim_end_matches('/').to_string(),
            user_agent: session.user_agent.clone(),
            app_id: session.app_id.clone(),
            device_id: format!("android-{}", &Uuid::new_v4().simple().to_string()[..16]),
            cookies,
            restricted_codes: inbox.restricted_codes.clone(),
            thread_message_limit: inbox.thread_message_limit,
            page_limit: inbox.limit,
        })
    }

    pub fn user_id(&self) -> Option<&str> {
        self.cookies.user_id()
    }

    fn rank_token(&self) -> String {
        format!("{}_{}", self.cookies.user_id().unwrap_or(""), Uuid::new_v4())
    }

    fn url(&self, endpoint: &str) -> String {
        if endpoint.starts_with("http") {
            endpoint.to_string()
        } else {
            format!("{}{}", self.api_base, endpoint)
        }
    }

    fn base_request(&self, method: Method, url: &str) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .request(method, url)
            .header("User-Agent", &self.user_agent)
            .header("Accept", "*/*")
            .header("Accept-Language", "en-US")
            .header("Cookie", self.cookies.header_value())
            .header("X-CSRFToken", self.cookies.csrf_token().unwrap_or(""))
            .header("X-IG-App-ID", &self.app_id)
            .header("X-IG-Capabilities", "3brTv10=")
            .header("X-IG-Connection-Type", "WIFI")
            .header("X-Device-ID", &self.device_id)
            .header("X-FB-HTTP-Engine", "Liger")
            .header(
                "X-Pigeon-Rawclienttime",
                format!("{:.3}", chrono::Utc::now().timestamp_millis() as f64 / 1000.0),
            );
        if let Some(mid) = self.cookies.mid() {
            builder = builder.header("X-MID", mid);
        }
        builder
    }

    async fn request(
        &self,
        method: Method,
        endpoint: &str,
        form: Option<Vec<(&str, String)>>,
    ) -> Result<Value, DirectError> {
        let url = self.url(endpoint);
        debug!("{} {}", method, endpoint);

        let mut builder = self.base_request(method, &url);
        if let Some(form) = form {
            builder = builder.form(&form);
        }

        let resp = builder.send().await?;
        let status = resp.status().as_u16();
        let retry_after = resp
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let text = resp.text().await?;
        let body: Value = serde_json::from_str(&text).unwrap_or(Value::Null);

        classify_response(status, retry_after, &body, &self.restricted_codes)?;

        if body.is_null() {
            return Err(DirectError::InvalidResponse(format!(
                "non-JSON body from {}: {}",
                endpoint,
                truncate(&text, 200)
            )));
        }
        Ok(body)
    }

    fn inbox_endpoint(&self, variant: InboxVariant) -> String {
        match variant {
            InboxVariant::Full => format!(
                "/direct_v2/inbox/?visual_message_return_type=unseen&thread_message_limit={}&persistentBadging=true&limit={}&fetch_reason=initial_snapshot",
                self.thread_message_limit, self.page_limit
            ),
            InboxVariant::Simplified => "/direct_v2/inbox/".to_string(),
        }
    }

    async fn broadcast(
        &self,
        kind: &str,
        mut form: Vec<(&str, String)>,
    ) -> Result<SendResult, DirectError> {
        let client_context = Uuid::new_v4().to_string();
        form.extend([
            ("action", "send_item".to_string()),
            ("is_shh_mode", "0".to_string()),
            ("send_attribution", "inbox".to_string()),
            ("client_context", client_context.clone()),
            ("device_id", self.device_id.clone()),
            ("mutation_token", client_context.clone()),
            ("offline_threading_id", client_context),
        ]);

        let body = self
            .request(
                Method::POST,
                &format!("/direct_v2/threads/broadcast/{}/", kind),
                Some(form),
            )
            .await?;
        parse_send_result(&body)
    }

    /// Upload endpoints live beside the API root, not under it.
    fn upload_url(&self, path: &str) -> String {
        let host = self.api_base.trim_end_matches("/api/v1");
        format!("{}{}", host, path)
    }

    async fn upload(&self, kind: UploadKind, bytes: &[u8]) -> Result<String, DirectError> {
        let upload_id = chrono::Utc::now().timestamp_millis().to_string();
        let suffix: u64 = rand::thread_rng().gen_range(1_000_000_000..10_000_000_000);
        let name = format!("{}_0_{}", upload_id, suffix);
        let retry_context = json!({
            "num_step_auto_retry": 0,
            "num_reupload": 0,
            "num_step_manual_retry": 0
        })
        .to_string();

        let (path, entity_type, params) = match kind {
            UploadKind::Photo => (
                format!("/rupload_igphoto/{}", name),
                "image/jpeg",
                json!({
                    "retry_context": retry_context,
                    "media_type": "1",
                    "upload_id": upload_id,
                    "xsharing_user_ids": "[]",
                    "image_compression": json!({
                        "lib_name": "moz",
                        "lib_version": "3.1.m",
                        "quality": "80"
                    }).to_string(),
                }),
            ),
            UploadKind::Video => (
                format!("/rupload_igvideo/{}", name),
                "video/mp4",
                json!({
                    "retry_context": retry_context,
                    "media_type": "2",
                    "upload_id": upload_id,
                    "xsharing_user_ids": "[]",
                    "direct_v2": "1",
                }),
            ),
            UploadKind::Voice => (
                format!("/rupload_igvideo/{}", name),
                "audio/mp4",
                json!({
                    "retry_context": retry_context,
                    "media_type": "11",
                    "upload_id": upload_id,
                    "xsharing_user_ids": "[]",
                    "is_direct_voice": "1",
                }),
            ),
        };

        debug!("Uploading {} bytes as {:?}", bytes.len(), kind);
        let resp = self
            .base_request(Method::POST, &self.upload_url(&path))
            .header("X-Entity-Type", entity_type)
            .header("Offset", "0")
            .header("X-Instagram-Rupload-Params", params.to_string())
            .header("X-Entity-Name", &name)
            .header("X-Entity-Length", bytes.len().to_string())
            .header("Content-Type", "application/octet-stream")
            .body(bytes.to_vec())
            .send()
            .await?;

        let status = resp.status().as_u16();
        let body: Value = resp.json().await.unwrap_or(Value::Null);
        classify_response(status, None, &body, &self.restricted_codes)?;

        let upload_id = body
            .get("upload_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or(upload_id);

        if kind != UploadKind::Photo {
            self.request(
                Method::POST,
                "/media/upload_finish/?video=1",
                Some(vec![
                    ("upload_id", upload_id.clone()),
                    ("source_type", "4".to_string()),
                    ("device_id", self.device_id.clone()),
                ]),
            )
            .await?;
        }
        Ok(upload_id)
    }

    async fn fetch_user(&self, endpoint: &str) -> Result<UserProfile, DirectError> {
        let body = self.request(Method::GET, endpoint, None).await?;
        let user = body
            .get("user")
            .cloned()
            .ok_or_else(|| DirectError::InvalidResponse("missing user".to_string()))?;
        Ok(serde_json::from_value(user)?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UploadKind {
    Photo,
    Video,
    Voice,
}

/// Flat placeholder waveform sent with voice notes.
fn voice_waveform() -> String {
    json!(vec![0.5f32; 20]).to_string()
}

#[async_trait]
impl DirectTransport for HttpTransport {
    async fn fetch_inbox(&self, variant: InboxVariant) -> Result<InboxSnapshot, DirectError> {
        let body = self
            .request(Method::GET, &self.inbox_endpoint(variant), None)
            .await?;
        parse_inbox(&body)
    }

    async fn fetch_pending_inbox(&self) -> Result<InboxSnapshot, DirectError> {
        let body = self
            .request(Method::GET, "/direct_v2/pending_inbox/", None)
            .await?;
        parse_inbox(&body)
    }

    async fn fetch_thread(&self, thread_id: &str) -> Result<Thread, DirectError> {
        let body = self
            .request(
                Method::GET,
                &format!("/direct_v2/threads/{}/", thread_id),
                None,
            )
            .await?;
        let thread = body
            .get("thread")
            .cloned()
            .ok_or_else(|| DirectError::InvalidResponse("missing thread".to_string()))?;
        Ok(serde_json::from_value(thread)?)
    }

    async fn send_text(&self, thread_id: &str, text: &str) -> Result<SendResult, DirectError> {
        self.broadcast(
            "text",
            vec![
                ("recipient_users", "[]".to_string()),
                ("text", text.to_string()),
                ("thread_ids", json!([thread_id]).to_string()),
            ],
        )
        .await
    }

    async fn send_text_to_users(
        &self,
        user_ids: &[String],
        text: &str,
    ) -> Result<SendResult, DirectError> {
        self.broadcast(
            "text",
            vec![
                ("recipient_users", json!([user_ids]).to_string()),
                ("text", text.to_string()),
            ],
        )
        .await
    }

    async fn send_photo(&self, thread_id: &str, photo: &[u8]) -> Result<SendResult, DirectError> {
        let upload_id = self.upload(UploadKind::Photo, photo).await?;
        self.broadcast(
            "configure_photo",
            vec![
                ("upload_id", upload_id),
                ("allow_full_aspect_ratio", "true".to_string()),
                ("thread_ids", json!([thread_id]).to_string()),
            ],
        )
        .await
    }

    async fn send_video(&self, thread_id: &str, video: &[u8]) -> Result<SendResult, DirectError> {
        let upload_id = self.upload(UploadKind::Video, video).await?;
        self.broadcast(
            "configure_video",
            vec![
                ("upload_id", upload_id),
                ("video_result", String::new()),
                ("sampled", "true".to_string()),
                ("thread_ids", json!([thread_id]).to_string()),
            ],
        )
        .await
    }

    async fn send_voice_note(
        &self,
        thread_id: &str,
        audio: &[u8],
    ) -> Result<SendResult, DirectError> {
        let upload_id = self.upload(UploadKind::Voice, audio).await?;
        self.broadcast(
            "share_voice",
            vec![
                ("upload_id", upload_id),
                ("waveform", voice_waveform()),
                ("waveform_sampling_frequency_hz", "10".to_string()),
                ("thread_ids", json!([thread_id]).to_string()),
            ],
        )
        .await
    }

    async fn send_link(
        &self,
        thread_id: &str,
        url: &str,
        text: &str,
    ) -> Result<SendResult, DirectError> {
        let link_text = if text.is_empty() { url } else { text };
        self.broadcast(
            "link",
            vec![
                ("link_text", link_text.to_string()),
                ("link_urls", json!([url]).to_string()),
                ("thread_ids", json!([thread_id]).to_string()),
            ],
        )
        .await
    }

    async fn thread_action(
        &self,
        thread_id: &str,
        action: ThreadAction,
    ) -> Result<(), DirectError> {
        let thread_path = format!("/direct_v2/threads/{}", thread_id);
        let thread_ids = json!([thread_id]).to_string();

        let (endpoint, form): (String, Vec<(&str, String)>) = match action {
            ThreadAction::MarkSeen { item_id } => (
                format!("{}/items/{}/seen/", thread_path, item_id),
                vec![
                    ("action", "mark_seen".to_string()),
                    ("thread_id", thread_id.to_string()),
                    ("item_id", item_id),
                ],
            ),
            ThreadAction::Approve => (
                format!("{}/approve/", thread_path),
                vec![("filter", "DEFAULT".to_string())],
            ),
            ThreadAction::React { item_id, emoji } => (
                "/direct_v2/threads/broadcast/reaction/".to_string(),
                reaction_form(thread_ids, item_id, Some(emoji)),
            ),
            ThreadAction::RemoveReaction { item_id } => (
                "/direct_v2/threads/broadcast/reaction/".to_string(),
                reaction_form(thread_ids, item_id, None),
            ),
            ThreadAction::Unsend { item_id } => (
                format!("{}/items/{}/delete/", thread_path, item_id),
                vec![("is_shh_mode", "0".to_string())],
            ),
            ThreadAction::Typing { active } => (
                "/direct_v2/threads/broadcast/indicate_activity/".to_string(),
                vec![
                    ("activity_status", (if active { "1" } else { "0" }).to_string()),
                    ("thread_ids", thread_ids),
                    ("client_context", Uuid::new_v4().to_string()),
                ],
            ),
            ThreadAction::Mute => (format!("{}/mute/", thread_path), vec![]),
            ThreadAction::Unmute => (format!("{}/unmute/", thread_path), vec![]),
            ThreadAction::Hide => (format!("{}/hide/", thread_path), vec![]),
            ThreadAction::Leave => (format!("{}/leave/", thread_path), vec![]),
            ThreadAction::UpdateTitle(title) => (
                format!("{}/update_title/", thread_path),
                vec![("title", title)],
            ),
            ThreadAction::AddUsers(user_ids) => (
                format!("{}/add_user/", thread_path),
                vec![("user_ids", json!(user_ids).to_string())],
            ),
        };

        self.request(Method::POST, &endpoint, Some(form)).await?;
        Ok(())
    }

    async fn fetch_user_by_username(&self, username: &str) -> Result<UserProfile, DirectError> {
        self.fetch_user(&format!("/users/{}/usernameinfo/", username))
            .await
    }

    async fn fetch_user_info(&self, user_id: &str) -> Result<UserProfile, DirectError> {
        self.fetch_user(&format!("/users/{}/info/", user_id)).await
    }

    async fn search_users(&self, query: &str) -> Result<Vec<UserProfile>, DirectError> {
        let rank_token = self.rank_token();
        let url = reqwest::Url::parse_with_params(
            &self.url("/users/search/"),
            &[("q", query), ("rank_token", rank_token.as_str())],
        )
        .map_err(|e| DirectError::InvalidResponse(format!("bad search url: {}", e)))?;
        let body = self.request(Method::GET, url.as_str(), None).await?;
        parse_users(&body)
    }
}

fn reaction_form(
    thread_ids: String,
    item_id: String,
    emoji: Option<String>,
) -> Vec<(&'static str, String)> {
    let status = if emoji.is_some() { "created" } else { "deleted" };
    let mut form = vec![
        ("item_type", "reaction".to_string()),
        ("reaction_type", "like".to_string()),
        ("node_type", "item".to_string()),
        ("item_id", item_id),
        ("reaction_status", status.to_string()),
        ("thread_ids", thread_ids),
        ("client_context", Uuid::new_v4().to_string()),
    ];
    if let Some(emoji) = emoji {
        form.push(("emoji", emoji));
    }
    form
}

/// Maps an API response onto the error taxonomy. `Ok(())` means the body is usable.
pub fn classify_response(
    status: u16,
    retry_after: Option<String>,
    body: &Value,
    restricted_codes: &[i64],
) -> Result<(), DirectError> {
    let error_type = body
        .get("error_type")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string();
    let message = body
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format!("Request failed with status {}", status));

    if status == 401 {
        error!("Session expired - please login again ({})", error_type);
        return Err(DirectError::Unauthorized { error_type });
    }

    if status == 429 {
        warn!(
            "Rate limited, retry after: {}",
            retry_after.as_deref().unwrap_or("unknown")
        );
        return Err(DirectError::RateLimited { retry_after });
    }

    if status >= 500 {
        return Err(DirectError::ServerError { status, message });
    }

    let failed = status >= 400 || body.get("status").and_then(Value::as_str) == Some("fail");
    if !failed {
        return Ok(());
    }

    if let Some(challenge) = body.get("challenge") {
        let path = challenge
            .get("api_path")
            .or_else(|| challenge.get("url"))
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        error!("Challenge required ({}): {}", error_type, path);
        return Err(DirectError::ChallengeRequired { path });
    }

    if let Some(code) = body.get("error_code").and_then(Value::as_i64) {
        if restricted_codes.contains(&code) {
            return Err(DirectError::Restricted { code, message });
        }
    }

    let spam = body.get("spam").and_then(Value::as_bool).unwrap_or(false);
    if spam || error_type == "feedback_required" || message.contains("feedback_required") {
        return Err(DirectError::Throttled(message));
    }

    Err(DirectError::Api {
        status,
        error_type,
        message,
    })
}

fn parse_inbox(body: &Value) -> Result<InboxSnapshot, DirectError> {
    let inbox = body
        .get("inbox")
        .cloned()
        .ok_or_else(|| DirectError::InvalidResponse("missing inbox".to_string()))?;
    let mut snapshot: InboxSnapshot = serde_json::from_value(inbox)?;
    if let Some(total) = body.get("pending_requests_total").and_then(Value::as_u64) {
        snapshot.pending_requests_total = total as u32;
    }
    Ok(snapshot)
}

fn parse_users(body: &Value) -> Result<Vec<UserProfile>, DirectError> {
    let users = body
        .get("users")
        .cloned()
        .ok_or_else(|| DirectError::InvalidResponse("missing users".to_string()))?;
    Ok(serde_json::from_value(users)?)
}

fn parse_send_result(body: &Value) -> Result<SendResult, DirectError> {
    let payload = body
        .get("payload")
        .cloned()
        .ok_or_else(|| DirectError::InvalidResponse(format!("missing payload: {}", body)))?;
    Ok(serde_json::from_value(payload)?)
}

pub(crate) fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max_chars).collect();
        format!("{}...", cut)
    }
}
