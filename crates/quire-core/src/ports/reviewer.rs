//! TermReviewer port - human confirmation of newly discovered terms.

use async_trait::async_trait;

use crate::domain::DiscoveredTerm;
use crate::error::PipelineError;

#[async_trait]
pub trait TermReviewer: Send + Sync {
    /// Returns the approved (possibly edited or trimmed) terms, or `None` when
    /// the reviewer cancels.
    async fn review(
        &self,
        terms: Vec<DiscoveredTerm>,
    ) -> Result<Option<Vec<DiscoveredTerm>>, PipelineError>;
}
