use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::warn;

use crate::config::Config;
use crate::diagnostics::{self, LivenessCheck};
use crate::event::{self, InboundEvent};
use crate::filter::{self, FilterDecision, RejectReason, SourceSet};
use crate::platform::TelegramApi;
use crate::relay::{Dispatcher, RelayOutcome};

/// What happened to one inbound update.
#[derive(Debug)]
pub enum EventOutcome {
    Undecodable,
    LivenessCheck,
    Rejected(RejectReason),
    Relayed(RelayOutcome),
}

/// decode -> filter -> dispatch, logging every step. Rejected events may
/// still be a liveness check.
pub struct Pipeline {
    api: Arc<dyn TelegramApi>,
    sources: SourceSet,
    dispatcher: Dispatcher,
    liveness: LivenessCheck,
    request_timeout: Duration,
}

impl Pipeline {
    pub fn new(
        api: Arc<dyn TelegramApi>,
        sources: SourceSet,
        dispatcher: Dispatcher,
        liveness: LivenessCheck,
        request_timeout: Duration,
    ) -> Self {
        Self {
            api,
            sources,
            dispatcher,
            liveness,
            request_timeout,
        }
    }

    pub fn from_config(api: Arc<dyn TelegramApi>, config: &Config) -> Self {
        let dispatcher = Dispatcher::new(
            api.clone(),
            config.target,
            config.relay_mode,
            config.request_timeout,
        )
        .with_ordering(config.ordering, &config.sources);

        Self::new(
            api,
            config.sources.clone(),
            dispatcher,
            LivenessCheck::new(config.ping_command.clone()),
            config.request_timeout,
        )
    }

    pub fn api(&self) -> &Arc<dyn TelegramApi> {
        &self.api
    }

    pub async fn handle_raw(&self, raw: Value) -> EventOutcome {
        let update_id = event::peek_update_id(&raw);
        match InboundEvent::decode(raw) {
            Ok(event) => self.handle(event).await,
            Err(e) => {
                diagnostics::decode_failed(update_id, &e);
                EventOutcome::Undecodable
            }
        }
    }

    pub async fn handle(&self, event: InboundEvent) -> EventOutcome {
        let decision = filter::classify(&event, &self.sources);
        diagnostics::inbound(&event, &decision);
        diagnostics::decision(&event, &decision);

        match decision {
            FilterDecision::Accept(req) => {
                let outcome = self.dispatcher.dispatch(req).await;
                diagnostics::outcome(&req, &outcome);
                EventOutcome::Relayed(outcome)
            }
            FilterDecision::Reject(reason) => match self.liveness.matches(&event) {
                Some(msg) => {
                    let reply = self.liveness.answer(self.api.as_ref(), msg);
                    if tokio::time::timeout(self.request_timeout, reply).await.is_err() {
                        warn!(chat_id = msg.chat_id, "Liveness reply timed out");
                    }
                    EventOutcome::LivenessCheck
                }
                None => EventOutcome::Rejected(reason),
            },
        }
    }
}
