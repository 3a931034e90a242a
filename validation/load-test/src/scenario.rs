//! Simulated user behaviors.

use crate::session::HttpSession;
use async_trait::async_trait;

/// What one simulated user does each time the runner invokes it.
///
/// Implementations issue requests through the session and ignore the
/// outcome; recording successes and failures is the session's job.
#[async_trait]
pub trait Scenario: Send + Sync {
    /// Name shown in reports.
    fn name(&self) -> &str;

    /// Run one task.
    async fn run(&self, session: &HttpSession);
}

/// Path requested by [`QueryUser`].
pub const QUERY_PATH: &str = "/query";

/// A user that calls `GET /query` on every task invocation.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryUser;

#[async_trait]
impl Scenario for QueryUser {
    fn name(&self) -> &str {
        "query_user"
    }

    async fn run(&self, session: &HttpSession) {
        session.get(QUERY_PATH).await;
    }
}
