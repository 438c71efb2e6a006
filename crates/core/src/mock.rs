//! Mock element operator with canned replies, for tests and the demo CLI.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::callback::QueryCallback;
use crate::error::BrokerError;
use crate::traits::ElementOperator;
use crate::types::{ElementId, ElementInfo, QueryPayload, RequestId, SearchMode};

/// One recorded invocation on a [`MockElementOperator`].
#[derive(Debug, Clone, PartialEq)]
pub enum MockCall {
    Search {
        element_id: ElementId,
        request_id: RequestId,
        mode: SearchMode,
    },
    ClearFocus,
    OutsideTouch,
}

/// An in-process operator that answers searches with a canned payload.
///
/// Without a configured reply it accepts searches and never answers, which
/// is how tests exercise the bounded-wait timeout path.
pub struct MockElementOperator {
    reply: Option<QueryPayload>,
    calls: Mutex<Vec<MockCall>>,
    death: CancellationToken,
}

impl MockElementOperator {
    pub fn new() -> Self {
        Self {
            reply: None,
            calls: Mutex::new(Vec::new()),
            death: CancellationToken::new(),
        }
    }

    /// Answer every search with `payload`.
    pub fn with_reply(mut self, payload: QueryPayload) -> Self {
        self.reply = Some(payload);
        self
    }

    /// Answer every search with an elements-by-id batch.
    pub fn with_elements(self, elements: Vec<ElementInfo>) -> Self {
        self.with_reply(QueryPayload::ElementsById(elements))
    }

    /// Simulate the remote process dying.
    pub fn kill(&self) {
        self.death.cancel();
    }

    /// Everything invoked on this operator so far, in order.
    pub async fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().await.clone()
    }
}

impl Default for MockElementOperator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ElementOperator for MockElementOperator {
    async fn search_element_info_by_accessibility_id(
        &self,
        element_id: ElementId,
        request_id: RequestId,
        callback: Arc<QueryCallback>,
        mode: SearchMode,
    ) -> Result<(), BrokerError> {
        self.calls.lock().await.push(MockCall::Search {
            element_id,
            request_id,
            mode,
        });
        if let Some(reply) = &self.reply {
            callback.deliver(Ok(reply.clone()));
        }
        Ok(())
    }

    async fn clear_focus(&self) -> Result<(), BrokerError> {
        self.calls.lock().await.push(MockCall::ClearFocus);
        Ok(())
    }

    async fn outside_touch(&self) {
        self.calls.lock().await.push(MockCall::OutsideTouch);
    }

    fn death_token(&self) -> CancellationToken {
        self.death.clone()
    }
}
