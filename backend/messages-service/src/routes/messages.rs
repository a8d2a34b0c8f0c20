use crate::error::AppError;
use crate::models::Conversation;
use crate::state::AppState;
use actix_web::{get, web, HttpResponse};
use serde::{Deserialize, Serialize};
use tracing::error;

pub const MISSING_PARTICIPANTS_MESSAGE: &str = "missing sender and receiver query params";

/// Raw query string; `page` stays a string so a malformed value can fall back to 1
#[derive(Debug, Deserialize)]
pub struct MessagesQuery {
    pub sender: Option<String>,
    pub receiver: Option<String>,
    pub page: Option<String>,
}

/// Success body of `GET /api/messages`
#[derive(Debug, Serialize)]
pub struct ConversationResponse {
    pub conv: Conversation,
}

/// Page number from the query string; anything that is not a positive integer is page 1
pub fn parse_page(raw: Option<&str>) -> u32 {
    raw.and_then(|p| p.trim().parse::<u32>().ok())
        .filter(|p| *p >= 1)
        .unwrap_or(1)
}

fn participant(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

/// Get one page of the conversation between two participants
/// GET /api/messages?sender=..&receiver=..&page=..
#[get("/api/messages")]
pub async fn get_messages(
    state: web::Data<AppState>,
    query: web::Query<MessagesQuery>,
) -> Result<HttpResponse, AppError> {
    let (Some(sender), Some(receiver)) =
        (participant(&query.sender), participant(&query.receiver))
    else {
        return Err(AppError::BadRequest(MISSING_PARTICIPANTS_MESSAGE.into()));
    };
    let page = parse_page(query.page.as_deref());

    let conversation = state
        .query_service
        .get_conversation_with_messages(sender, receiver, page)
        .await
        .map_err(|e| {
            error!(sender, receiver, page, error = %e, "Conversation query failed");
            AppError::Internal(e.to_string())
        })?;

    Ok(HttpResponse::Ok().json(ConversationResponse { conv: conversation }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_page() {
        assert_eq!(parse_page(None), 1);
        assert_eq!(parse_page(Some("3")), 3);
        assert_eq!(parse_page(Some(" 2 ")), 2);
        assert_eq!(parse_page(Some("0")), 1);
        assert_eq!(parse_page(Some("-4")), 1);
        assert_eq!(parse_page(Some("abc")), 1);
        assert_eq!(parse_page(Some("")), 1);
    }

    #[test]
    fn test_blank_participant_is_missing() {
        assert_eq!(participant(&Some(String::new())), None);
        assert_eq!(participant(&None), None);
        assert_eq!(participant(&Some("foo".into())), Some("foo"));
    }
}
