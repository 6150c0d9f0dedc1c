//! Chat turn engine.
//!
//! One turn: throttle check, fresh fetch of the open ticket, optional
//! evidence gathering for the selected mode, context synthesis, then one
//! provider call. Empty evidence short-circuits before the provider is asked
//! anything.

use chrono::Utc;
use deskmate_shared::{
    ConfigurationRecord, ThrottleResult, TicketRecord, TurnThrottle, RATE_LIMIT_MESSAGE,
};
use futures_util::future::{join_all, try_join_all};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::completion::{ChatMessage, CompletionError, CompletionProvider, CompletionStream};
use crate::config::DeskmateConfig;
use crate::evidence::{
    find_similar, ContextSynthesizer, MinedCandidate, RankedEvidence, ResolutionMiner,
    SimilarBlock,
};
use crate::gateway::{fetch_bundle, timed, GatewayError, TicketGateway};
use crate::prompts;

pub const NO_SIMILAR_MESSAGE: &str =
    "I couldn't find any similar tickets for this one. Try rewording the ticket summary with more specific terms.";

pub const NO_CONFIGURATION_MESSAGE: &str =
    "There is no configuration history for this ticket: no configurations are attached to it.";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnMode {
    #[default]
    Ask,
    SimilarTickets,
    SimilarResolutions,
    ConfigurationHistory,
}

impl TurnMode {
    /// Question asked when the member sent none (quick-action buttons)
    pub fn default_question(&self) -> &'static str {
        match self {
            TurnMode::Ask => "Summarize this ticket and suggest next steps.",
            TurnMode::SimilarTickets => {
                "Which of the similar tickets look most relevant to this one, and why?"
            }
            TurnMode::SimilarResolutions => {
                "Based on how the similar tickets were resolved, what should I try on this ticket?"
            }
            TurnMode::ConfigurationHistory => {
                "Summarize the attached configurations and anything in their history relevant to this ticket."
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnRequest {
    pub member_id: String,
    pub ticket_id: i64,
    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub mode: TurnMode,
    /// Earlier messages of this conversation, oldest first
    #[serde(default)]
    pub history: Vec<ChatMessage>,
}

impl TurnRequest {
    fn effective_question(&self) -> &str {
        let question = self.question.trim();
        if question.is_empty() {
            self.mode.default_question()
        } else {
            question
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyKind {
    Answer,
    Throttled,
    NothingFound,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnReply {
    pub turn_id: Uuid,
    pub kind: ReplyKind,
    pub message: String,
}

impl TurnReply {
    fn new(turn_id: Uuid, kind: ReplyKind, message: impl Into<String>) -> Self {
        Self {
            turn_id,
            kind,
            message: message.into(),
        }
    }
}

/// Outcome of everything before the provider call
#[derive(Debug, Clone, PartialEq)]
pub enum Prepared {
    /// Answered without the provider
    Reply(TurnReply),
    /// Ready for the provider
    Prompt {
        turn_id: Uuid,
        messages: Vec<ChatMessage>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TurnError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Completion(#[from] CompletionError),
}

impl TurnError {
    pub fn is_retryable(&self) -> bool {
        match self {
            TurnError::Gateway(e) => e.is_retryable(),
            TurnError::Completion(e) => e.is_retryable(),
        }
    }
}

pub struct TurnEngine {
    gateway: Arc<dyn TicketGateway>,
    provider: Arc<dyn CompletionProvider>,
    throttle: TurnThrottle,
    miner: ResolutionMiner,
    synthesizer: ContextSynthesizer,
    config: DeskmateConfig,
}

impl TurnEngine {
    pub fn new(
        gateway: Arc<dyn TicketGateway>,
        provider: Arc<dyn CompletionProvider>,
        config: DeskmateConfig,
    ) -> Self {
        let throttle = TurnThrottle::new(
            config.throttle.max_turns,
            Duration::from_secs(config.throttle.window_secs),
        );
        Self::with_throttle(gateway, provider, config, throttle)
    }

    pub fn with_throttle(
        gateway: Arc<dyn TicketGateway>,
        provider: Arc<dyn CompletionProvider>,
        config: DeskmateConfig,
        throttle: TurnThrottle,
    ) -> Self {
        Self {
            miner: ResolutionMiner::new(&config.lexicon, config.mining.clone()),
            synthesizer: ContextSynthesizer::new(config.context.max_chars),
            gateway,
            provider,
            throttle,
            config,
        }
    }

    pub fn throttle(&self) -> &TurnThrottle {
        &self.throttle
    }

    /// Everything up to the provider call
    pub async fn prepare(&self, request: &TurnRequest) -> Result<Prepared, TurnError> {
        let turn_id = Uuid::new_v4();

        if let ThrottleResult::Limited { retry_after } =
            self.throttle.try_acquire(&request.member_id)
        {
            info!(
                "Turn {} throttled for member {} (retry in {}s)",
                turn_id,
                request.member_id,
                retry_after.as_secs()
            );
            return Ok(Prepared::Reply(TurnReply::new(
                turn_id,
                ReplyKind::Throttled,
                RATE_LIMIT_MESSAGE,
            )));
        }

        info!(
            "Turn {} on ticket {} ({:?})",
            turn_id, request.ticket_id, request.mode
        );
        let limit = self.config.gateway.timeout();
        let mut bundle = fetch_bundle(self.gateway.as_ref(), request.ticket_id, limit).await?;

        let context = match request.mode {
            TurnMode::Ask => self.synthesizer.synthesize(&bundle, None),

            TurnMode::SimilarTickets => {
                let outcome = find_similar(
                    self.gateway.as_ref(),
                    &bundle.ticket,
                    &self.config.search,
                    &self.config.lexicon,
                    Utc::now(),
                    limit,
                )
                .await?;
                let candidates = outcome.candidates();
                if candidates.is_empty() {
                    return Ok(nothing_found(turn_id, NO_SIMILAR_MESSAGE));
                }
                self.synthesizer
                    .synthesize(&bundle, Some(SimilarBlock::Plain(candidates)))
            }

            TurnMode::SimilarResolutions => {
                let outcome = find_similar(
                    self.gateway.as_ref(),
                    &bundle.ticket,
                    &self.config.search,
                    &self.config.lexicon,
                    Utc::now(),
                    limit,
                )
                .await?;
                if outcome.candidates().is_empty() {
                    return Ok(nothing_found(turn_id, NO_SIMILAR_MESSAGE));
                }
                let mined = self.mine_candidates(outcome.candidates(), limit).await;
                self.synthesizer
                    .synthesize(&bundle, Some(SimilarBlock::Mined(&mined)))
            }

            TurnMode::ConfigurationHistory => {
                if bundle.configurations.is_empty() {
                    return Ok(nothing_found(turn_id, NO_CONFIGURATION_MESSAGE));
                }
                bundle.configurations =
                    self.configuration_details(&bundle.configurations, limit).await?;
                self.synthesizer.synthesize(&bundle, None)
            }
        };

        debug!("Turn {} context is {} chars", turn_id, context.chars().count());
        let messages = prompts::build_messages(
            &context,
            &request.history,
            request.effective_question(),
            self.config.completion.history_messages,
        );
        Ok(Prepared::Prompt { turn_id, messages })
    }

    /// Run a full turn and wait for the whole answer
    pub async fn run(&self, request: &TurnRequest) -> Result<TurnReply, TurnError> {
        match self.prepare(request).await? {
            Prepared::Reply(reply) => Ok(reply),
            Prepared::Prompt { turn_id, messages } => {
                let limit = self.config.completion.timeout();
                let answer = match tokio::time::timeout(limit, self.provider.complete(&messages))
                    .await
                {
                    Ok(result) => result?,
                    Err(_) => return Err(CompletionError::Timeout(limit).into()),
                };
                info!("Turn {} answered ({} chars)", turn_id, answer.len());
                Ok(TurnReply::new(turn_id, ReplyKind::Answer, answer))
            }
        }
    }

    /// Open a provider stream for a prepared prompt
    pub async fn stream(&self, messages: &[ChatMessage]) -> Result<CompletionStream, TurnError> {
        let limit = self.config.completion.timeout();
        match tokio::time::timeout(limit, self.provider.complete_stream(messages)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(CompletionError::Timeout(limit).into()),
        }
    }

    /// Fetch notes for each closed candidate concurrently and mine them. A
    /// candidate whose notes cannot be fetched is kept without evidence.
    async fn mine_candidates(
        &self,
        candidates: &[TicketRecord],
        limit: Duration,
    ) -> Vec<MinedCandidate> {
        let lexicon = &self.config.lexicon;
        let fetches = candidates.iter().map(|ticket| async move {
            if !lexicon.is_closed_status(ticket.status_name()) {
                return RankedEvidence::default();
            }
            match timed(limit, self.gateway.get_notes(ticket.id)).await {
                Ok(notes) => self.miner.mine_candidate(ticket, &notes, lexicon),
                Err(e) => {
                    warn!("Skipping resolution notes for ticket {}: {}", ticket.id, e);
                    RankedEvidence::default()
                }
            }
        });
        let evidence = join_all(fetches).await;

        candidates
            .iter()
            .cloned()
            .zip(evidence)
            .map(|(ticket, evidence)| MinedCandidate { ticket, evidence })
            .collect()
    }

    /// Full records for every attached configuration, same order
    async fn configuration_details(
        &self,
        attached: &[ConfigurationRecord],
        limit: Duration,
    ) -> Result<Vec<ConfigurationRecord>, GatewayError> {
        try_join_all(
            attached
                .iter()
                .map(|config| timed(limit, self.gateway.get_configuration(config.id))),
        )
        .await
    }
}

fn nothing_found(turn_id: Uuid, message: &str) -> Prepared {
    info!("Turn {} found no evidence, provider not called", turn_id);
    Prepared::Reply(TurnReply::new(turn_id, ReplyKind::NothingFound, message))
}
