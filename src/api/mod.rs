//! HTTP 接口
//!
//! 薄映射层：JSON 请求 → ChatService 调用，ChatError → HTTP 状态码。

pub mod schemas;

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde_json::json;

use crate::config::AppSection;
use crate::core::ChatError;
use crate::memory::ConversationSnapshot;
use crate::service::{ChatReply, ChatService};
use schemas::{ChatRequest, ClearResponse, ErrorResponse, HealthResponse};

pub const API_PREFIX: &str = "/api/v1";

/// HTTP 服务状态
pub struct ApiState {
    pub service: Arc<ChatService>,
    pub app: AppSection,
}

/// 接口错误：包装 ChatError 并决定状态码
#[derive(Debug)]
pub struct ApiError(pub ChatError);

impl From<ChatError> for ApiError {
    fn from(err: ChatError) -> Self {
        Self(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self.0 {
            ChatError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ChatError::NotFound(_) => StatusCode::NOT_FOUND,
            ChatError::QuotaExceeded => StatusCode::PAYMENT_REQUIRED,
            ChatError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            ChatError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ChatError::ConnectionFailure(_) => StatusCode::SERVICE_UNAVAILABLE,
            ChatError::ProviderError(_) | ChatError::Config(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(kind = self.0.kind(), "Request failed: {}", self.0);
        }
        let body = ErrorResponse {
            error: self.0.kind(),
            message: self.0.to_string(),
            timestamp: Utc::now(),
        };
        (status, Json(body)).into_response()
    }
}

/// 创建路由
pub fn create_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/api/v1/", get(api_info))
        .route("/api/v1/health", get(health))
        .route("/api/v1/chat", post(chat))
        .route(
            "/api/v1/conversation/:id",
            get(conversation_history).delete(clear_conversation),
        )
        .with_state(state)
}

fn endpoints() -> serde_json::Value {
    json!({
        "health": format!("GET {API_PREFIX}/health"),
        "chat": format!("POST {API_PREFIX}/chat"),
        "conversation": format!("GET {API_PREFIX}/conversation/{{id}}"),
        "clear_conversation": format!("DELETE {API_PREFIX}/conversation/{{id}}"),
    })
}

/// GET / - 服务信息与用法示例
async fn root(State(state): State<Arc<ApiState>>) -> Json<serde_json::Value> {
    Json(json!({
        "message": format!("{} is running", state.app.name),
        "status": "active",
        "version": state.app.version,
        "endpoints": endpoints(),
        "usage_example": {
            "method": "POST",
            "url": format!("{API_PREFIX}/chat"),
            "body": {
                "message": "I need help with my order",
                "customer_name": "John Doe",
                "conversation_id": "optional_conversation_id"
            }
        }
    }))
}

/// GET /api/v1/ - 接口列表
async fn api_info(State(state): State<Arc<ApiState>>) -> Json<serde_json::Value> {
    Json(json!({
        "name": state.app.name,
        "version": state.app.version,
        "status": "active",
        "endpoints": endpoints(),
    }))
}

/// GET /api/v1/health - 健康检查
async fn health(State(state): State<Arc<ApiState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        timestamp: Utc::now(),
        version: state.app.version.clone(),
        active_conversations: state.service.store().active_count().await,
        offline_mode: state.service.is_offline(),
    })
}

/// POST /api/v1/chat - 处理客户消息并返回回复
async fn chat(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatReply>, ApiError> {
    req.validate()?;
    tracing::info!(
        "Chat request - conversation: {}, message length: {}",
        req.conversation_id.as_deref().unwrap_or("new"),
        req.message.chars().count()
    );

    let reply = state
        .service
        .chat(
            &req.message,
            req.conversation_id.as_deref(),
            req.customer_name.as_deref(),
        )
        .await?;
    Ok(Json(reply))
}

/// GET /api/v1/conversation/:id - 查询会话历史
async fn conversation_history(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> Result<Json<ConversationSnapshot>, ApiError> {
    state
        .service
        .store()
        .snapshot(&id)
        .await
        .map(Json)
        .ok_or(ApiError(ChatError::NotFound(id)))
}

/// DELETE /api/v1/conversation/:id - 清除会话
async fn clear_conversation(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<ClearResponse>), ApiError> {
    if state.service.store().clear(&id).await {
        Ok((
            StatusCode::OK,
            Json(ClearResponse {
                message: "Conversation cleared successfully",
                conversation_id: id,
            }),
        ))
    } else {
        Err(ApiError(ChatError::NotFound(id)))
    }
}
