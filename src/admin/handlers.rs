use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;

use crate::admin::AdminState;
use crate::config::AllowOrigin;
use crate::registry::{ClientId, CloseOutcome};

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub path: String,
    pub allow_origin: AllowOrigin,
    pub limit_by_ip: i64,
    pub with_credentials: bool,
    pub clients: usize,
}

#[derive(Serialize)]
pub struct ClientList {
    pub count: usize,
    pub ids: Vec<ClientId>,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    let registry = &state.registry;
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        path: registry.path().to_string(),
        allow_origin: registry.allow_origin().clone(),
        limit_by_ip: registry.limit_by_ip(),
        with_credentials: registry.with_credentials(),
        clients: registry.client_count(),
    })
}

pub async fn get_clients(State(state): State<AdminState>) -> Json<ClientList> {
    let ids = state.registry.client_ids();
    Json(ClientList {
        count: ids.len(),
        ids,
    })
}

pub async fn close_client(
    State(state): State<AdminState>,
    Path(id): Path<String>,
) -> StatusCode {
    match state.registry.close(&ClientId::from(id)) {
        CloseOutcome::Closed => StatusCode::NO_CONTENT,
        CloseOutcome::NotFound => StatusCode::NOT_FOUND,
    }
}
