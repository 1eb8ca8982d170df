use axum::{
    extract::{rejection::JsonRejection, Path, State},
    Json,
};
use tracing::info;

use jobbox_core::protocol::NewUser;
use jobbox_core::types::{Fields, InsertResult, UserDocument};
use jobbox_core::DocumentId;

use crate::error::ApiError;
use crate::router::{AppState, Envelope};

pub async fn create(
    State(state): State<AppState>,
    payload: Result<Json<Fields>, JsonRejection>,
) -> Result<Json<InsertResult>, ApiError> {
    let Json(fields) = payload?;
    let user = NewUser { fields }.into_document(DocumentId::generate())?;
    let result = state.storage().users().insert(&user, state.now()).await?;

    info!(stage = "users", user_id = %result.inserted_id, "user created");
    Ok(Json(result))
}

pub async fn by_email(
    State(state): State<AppState>,
    Path(email): Path<String>,
) -> Result<Json<Envelope<UserDocument>>, ApiError> {
    let user = state.storage().users().find_by_email(&email).await?;
    Ok(Json(Envelope::from_option(user)))
}
