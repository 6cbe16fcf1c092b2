use super::handlers;
use super::types::{AppState, Request};
use crate::ipc::error::err;

pub fn handle_request(state: &mut AppState, req: Request) -> serde_json::Value {
    if let Some(resp) = handlers::core::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::categories::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::items::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::import_menu::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::cart::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::orders::try_handle(state, &req) {
        return resp;
    }

    err(
        &req.id,
        "not_implemented",
        format!("unknown method: {}", req.method),
        None,
    )
}
