use crate::services::QueryService;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub query_service: Arc<QueryService>,
}
