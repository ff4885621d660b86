//! /games and /games/{id} handlers.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;

use crema_core::game::GameId;

use super::{ApiState, GameView};

pub async fn handle_games(State(state): State<ApiState>) -> Json<Vec<GameView>> {
    let mut games: Vec<GameView> = state
        .cache
        .get()
        .await
        .into_iter()
        .map(|(id, entry)| GameView::new(id, entry))
        .collect();
    games.sort_by_key(|g| g.id);
    Json(games)
}

pub async fn handle_game(
    State(state): State<ApiState>,
    Path(id): Path<GameId>,
) -> Result<Json<GameView>, (StatusCode, String)> {
    let entry = state
        .cache
        .get()
        .await
        .remove(&id)
        .ok_or((StatusCode::NOT_FOUND, "game not found".to_string()))?;
    Ok(Json(GameView::new(id, entry)))
}
