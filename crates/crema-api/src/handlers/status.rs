//! /status handler.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crema_services::ConnectStatus;

use super::ApiState;

#[derive(Debug, Default, Serialize)]
pub struct AddressCounts {
    pub pending: usize,
    pub success: usize,
    pub failure: usize,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub games: usize,
    pub addresses: AddressCounts,
    /// Live `/updates` listeners.
    pub subscribers: usize,
    pub league_address: String,
}

pub async fn handle_status(State(state): State<ApiState>) -> Json<StatusResponse> {
    let snapshot = state.cache.get().await;

    let mut addresses = AddressCounts::default();
    for status in snapshot.values().flat_map(|e| e.addrs.values()) {
        match status {
            ConnectStatus::Pending => addresses.pending += 1,
            ConnectStatus::Success => addresses.success += 1,
            ConnectStatus::Failure => addresses.failure += 1,
        }
    }

    Json(StatusResponse {
        games: snapshot.len(),
        addresses,
        subscribers: state.cache.subscriber_count(),
        league_address: state.client_address.clone(),
    })
}
