use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};

use leadflow_core::domain::message::MessageSender;

use crate::context::AgentContext;
use crate::provider::{AiProvider, ProviderError};
use crate::response::AiResponse;

/// Chat-completions provider for OpenAI-compatible endpoints. The fallback
/// endpoint in the chain is just a second instance of this with its own
/// base URL, model and key.
pub struct OpenAiProvider {
    name: String,
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: SecretString,
}

impl OpenAiProvider {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: SecretString,
        timeout_secs: u64,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs.max(1)))
            .build()
            .map_err(|err| ProviderError::NotConfigured(err.to_string()))?;

        Ok(Self {
            name: name.into(),
            client,
            base_url: base_url.into(),
            model: model.into(),
            api_key,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

#[async_trait]
impl AiProvider for OpenAiProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, context: &AgentContext) -> Result<AiResponse, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let body = json!({
            "model": self.model,
            "messages": chat_messages(context),
            "response_format": {"type": "json_object"},
            "temperature": 0.4,
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|err| ProviderError::Request(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(ProviderError::Request(format!("{status}: {detail}")));
        }

        let completion: ChatCompletionResponse =
            response.json().await.map_err(|err| ProviderError::Decode(err.to_string()))?;
        let content = completion
            .choices
            .first()
            .map(|choice| choice.message.content.as_str())
            .ok_or_else(|| ProviderError::Decode("completion had no choices".to_string()))?;

        serde_json::from_str(content).map_err(|err| ProviderError::Decode(err.to_string()))
    }
}

fn chat_messages(context: &AgentContext) -> Vec<Value> {
    let mut messages = vec![json!({"role": "system", "content": system_prompt(context)})];

    for entry in &context.history {
        let role = match entry.sender {
            MessageSender::Customer => "user",
            MessageSender::Bot | MessageSender::Agent => "assistant",
        };
        messages.push(json!({"role": role, "content": entry.content}));
    }

    messages
}

fn system_prompt(context: &AgentContext) -> String {
    let mut prompt = format!(
        "Você é {bot}, atendente virtual da loja de veículos {brand}. Converse em português \
         do Brasil, de forma simpática e objetiva, com mensagens curtas de WhatsApp. Seu \
         objetivo é qualificar o lead (nome, veículo de interesse, cidade, intenção) e \
         oferecer um horário de visita à loja.\n\nHoje é {today}.\n",
        bot = context.bot_name,
        brand = context.brand_name,
        today = context.today.format("%d/%m/%Y"),
    );

    prompt.push_str("\nFicha do lead até agora:\n");
    push_sheet_line(&mut prompt, "nome", context.customer_name.as_deref());
    push_sheet_line(&mut prompt, "veículo", context.vehicle.as_deref());
    push_sheet_line(&mut prompt, "cidade", context.city.as_deref());
    prompt.push_str(&format!("- intenção: {}\n", context.intention));
    prompt.push_str(&format!("- temperatura: {}\n", context.lead_temperature));

    if !context.prior_appointments.is_empty() {
        prompt.push_str("\nVisitas anteriores deste cliente:\n");
        for visit in &context.prior_appointments {
            prompt.push_str(&format!(
                "- {} às {} ({})\n",
                visit.date.format("%d/%m/%Y"),
                visit.time,
                visit.status,
            ));
        }
    }

    if context.availability.is_empty() {
        prompt.push_str("\nNão há horários de visita disponíveis no momento.\n");
    } else {
        prompt.push_str("\nHorários de visita disponíveis:\n");
        for day in &context.availability {
            prompt.push_str(&format!(
                "- {} ({}): {}\n",
                day.weekday,
                day.date.format("%d/%m"),
                day.times.join(", "),
            ));
        }
    }

    prompt.push_str(
        "\nResponda SEMPRE com um único objeto JSON, sem texto fora dele, no formato:\n\
         {\"reply\": \"texto para o cliente\", \
         \"action\": \"none|schedule|transfer|follow_up|close\", \
         \"extracted\": {\"customer_name\": null, \"vehicle\": null, \"city\": null, \
         \"intention\": null, \"temperature\": null, \"desired_date\": null, \
         \"desired_time\": null}, \"confidence\": 0.0}\n\
         Use \"schedule\" apenas quando o cliente confirmar data e horário. Use \"transfer\" \
         quando ele pedir para falar com uma pessoa ou quando você não souber ajudar. Use \
         \"follow_up\" quando o cliente disser que vai pensar ou responder mais tarde. Preencha \
         em \"extracted\" somente o que apareceu na conversa.",
    );

    prompt
}

fn push_sheet_line(prompt: &mut String, label: &str, value: Option<&str>) {
    match value {
        Some(value) => prompt.push_str(&format!("- {label}: {value}\n")),
        None => prompt.push_str(&format!("- {label}: (não informado)\n")),
    }
}
