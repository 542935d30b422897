//! Message intake and read endpoints.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use courier_db::models::{DeadLetterMessage, Message, MessageStatus};

use crate::error::{ApiError, ApiResult};
use crate::router::ApiState;
use courier_dispatch::service::{normalize_page, normalize_page_size};

#[derive(Debug, Deserialize)]
pub struct CreateMessageRequest {
    #[serde(default)]
    pub phone_number: String,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct CreateMessageResponse {
    pub id: Uuid,
    pub phone_number: String,
    pub content: String,
    pub status: MessageStatus,
    pub created_at: DateTime<Utc>,
}

/// `POST /api/messages` — queue a message for delivery.
pub async fn create_message_handler(
    State(state): State<ApiState>,
    Json(request): Json<CreateMessageRequest>,
) -> ApiResult<(StatusCode, Json<CreateMessageResponse>)> {
    if request.phone_number.trim().is_empty() {
        return Err(ApiError::BadRequest("phone number is required".to_string()));
    }
    if request.content.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "message content is required".to_string(),
        ));
    }

    let message = state
        .service
        .create(&request.phone_number, &request.content)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateMessageResponse {
            id: message.id,
            phone_number: message.phone_number,
            content: message.content,
            status: message.status,
            created_at: message.created_at,
        }),
    ))
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

/// A delivered message as returned by the sent list.
#[derive(Debug, Serialize)]
pub struct SentMessage {
    pub id: Uuid,
    pub phone_number: String,
    pub content: String,
    pub remote_id: String,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct SentMessagesResponse {
    pub messages: Vec<SentMessage>,
    pub page: i64,
    pub page_size: i64,
}

/// `GET /api/messages/sent` — paginated list of delivered messages.
pub async fn sent_messages_handler(
    State(state): State<ApiState>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<SentMessagesResponse>> {
    let page = normalize_page(query.page);
    let page_size = normalize_page_size(query.page_size);

    let messages = state.service.sent_messages(Some(page), Some(page_size)).await?;

    let messages = messages.into_iter().filter_map(to_sent_message).collect();

    Ok(Json(SentMessagesResponse {
        messages,
        page,
        page_size,
    }))
}

fn to_sent_message(message: Message) -> Option<SentMessage> {
    if message.status != MessageStatus::Sent {
        return None;
    }
    Some(SentMessage {
        id: message.id,
        phone_number: message.phone_number,
        content: message.content,
        remote_id: message.remote_id?,
        sent_at: message.sent_at?,
    })
}

#[derive(Debug, Serialize)]
pub struct DeadLetterMessagesResponse {
    pub messages: Vec<DeadLetterMessage>,
    pub page: i64,
    pub page_size: i64,
}

/// `GET /api/messages/dead-letter` — paginated list of dead-lettered
/// messages.
pub async fn dead_letter_messages_handler(
    State(state): State<ApiState>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<DeadLetterMessagesResponse>> {
    let page = normalize_page(query.page);
    let page_size = normalize_page_size(query.page_size);

    let messages = state
        .service
        .dead_letter_messages(Some(page), Some(page_size))
        .await?;

    Ok(Json(DeadLetterMessagesResponse {
        messages,
        page,
        page_size,
    }))
}
