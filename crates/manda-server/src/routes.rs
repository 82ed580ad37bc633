use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use serde::Deserialize;
use serde_json::{Value, json};

use manda_db::{Contact, CredentialStats, Instance, InstanceOverview, Message};

use crate::AppState;
use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};

#[derive(Debug, Deserialize)]
pub struct CreateInstanceRequest {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    #[serde(default)]
    pub to: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct MessagesQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

fn required<'a>(field: &str, value: &'a str) -> ApiResult<&'a str> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ApiError::BadRequest(format!("{field} must not be empty")));
    }
    Ok(value)
}

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "sessions": state.worker.manager().registry().len().await,
        "subscribers": state.worker.fanout().user_count().await,
    }))
}

pub async fn create_instance(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(body): Json<CreateInstanceRequest>,
) -> ApiResult<(StatusCode, Json<Instance>)> {
    let name = required("name", &body.name)?;
    let instance = state.worker.create_instance(&user.id, name).await?;
    Ok((StatusCode::CREATED, Json(instance)))
}

pub async fn list_instances(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> ApiResult<Json<Vec<InstanceOverview>>> {
    Ok(Json(state.worker.list_instances(&user.id).await?))
}

pub async fn get_instance(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> ApiResult<Json<Instance>> {
    Ok(Json(state.worker.get_instance(&id, &user.id).await?))
}

pub async fn delete_instance(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    state.worker.delete_instance(&id, &user.id).await?;
    Ok(Json(json!({ "message": "Instance deleted" })))
}

pub async fn connect_instance(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    state.worker.connect_instance(&id, &user.id).await?;
    Ok(Json(json!({ "message": "Connecting instance" })))
}

pub async fn disconnect_instance(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    state.worker.disconnect_instance(&id, &user.id).await?;
    Ok(Json(json!({ "message": "Instance disconnected" })))
}

pub async fn get_messages(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
    Query(query): Query<MessagesQuery>,
) -> ApiResult<Json<Vec<Message>>> {
    let messages = state
        .worker
        .get_messages(&id, &user.id, query.page, query.limit)
        .await?;
    Ok(Json(messages))
}

pub async fn send_message(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
    Json(body): Json<SendMessageRequest>,
) -> ApiResult<Json<Value>> {
    let to = required("to", &body.to)?;
    let text = required("message", &body.message)?;

    let message_id = state.worker.send_message(&id, &user.id, to, text).await?;
    Ok(Json(json!({ "message": "Message sent", "messageId": message_id })))
}

pub async fn get_contacts(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<Contact>>> {
    Ok(Json(state.worker.get_contacts(&id, &user.id).await?))
}

pub async fn auth_stats(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> ApiResult<Json<CredentialStats>> {
    Ok(Json(state.worker.auth_stats(&id, &user.id).await?))
}
