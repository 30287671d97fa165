use std::sync::Arc;

use tracing::{info, warn};

use crate::context::AgentContext;
use crate::provider::AiProvider;
use crate::response::{AgentAction, AiResponse};

/// Below this the engine does not trust the model's own plan for the turn
/// and hands the customer to a human instead.
pub const MIN_ACTIONABLE_CONFIDENCE: f32 = 0.3;

const FALLBACK_TRANSFER_REPLY: &str =
    "Estou com dificuldade técnica no momento. Vou chamar um de nossos atendentes para \
     continuar com você, um instante!";

const LOW_CONFIDENCE_NOTICE: &str =
    "Vou chamar um de nossos atendentes para te ajudar melhor com isso.";

/// Ordered provider chain. The first provider that answers wins; when the
/// whole chain fails the customer still gets a reply, as a handoff.
pub struct AgentService {
    providers: Vec<Arc<dyn AiProvider>>,
}

impl AgentService {
    pub fn new(providers: Vec<Arc<dyn AiProvider>>) -> Self {
        Self { providers }
    }

    pub async fn respond(&self, context: &AgentContext) -> AiResponse {
        for provider in &self.providers {
            match provider.generate(context).await {
                Ok(response) => {
                    info!(
                        provider = provider.name(),
                        action = ?response.action,
                        confidence = response.confidence,
                        "model turn produced"
                    );
                    return apply_confidence_guard(response);
                }
                Err(error) => {
                    warn!(
                        provider = provider.name(),
                        error = %error,
                        "provider failed, trying next in chain"
                    );
                }
            }
        }

        warn!(phone_number = %context.phone_number, "all providers failed, synthesizing handoff");
        AiResponse::fallback_transfer(FALLBACK_TRANSFER_REPLY)
    }
}

fn apply_confidence_guard(mut response: AiResponse) -> AiResponse {
    if response.confidence < MIN_ACTIONABLE_CONFIDENCE {
        // A reply that already announces the handoff needs no extra notice.
        if response.action != AgentAction::Transfer
            && !response.reply.contains(LOW_CONFIDENCE_NOTICE)
        {
            if !response.reply.trim().is_empty() {
                response.reply.push(' ');
            }
            response.reply.push_str(LOW_CONFIDENCE_NOTICE);
        }
        response.action = AgentAction::Transfer;
    }
    response
}
