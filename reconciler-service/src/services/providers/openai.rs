//! OpenAI-backed extraction and edit interpretation.
//!
//! Receipt images go through the vision input of the chat-completions API;
//! everything else is plain text prompting with a JSON contract. Responses
//! are parsed defensively: models wrap JSON in code fences and mix number
//! and string encodings for monetary values.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{Duration, NaiveDate, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{instrument, warn};

use super::{EditInterpreter, Extraction, ExtractionProvider, ProviderError};
use crate::config::OpenAiConfig;
use crate::models::draft::{ClassificationDraft, Draft, ExpenseDraft, Item, TransferDraft};
use crate::models::patch::PatchOp;
use crate::models::taxonomy::Taxonomy;

/// OpenAI chat-completions endpoint.
const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

/// Transfers dated further back than this are treated as extraction noise
/// and clamped to today.
const MAX_TRANSFER_AGE_DAYS: i64 = 30;

const DEFAULT_ESTABLISHMENT: &str = "Estabelecimento não identificado";

pub struct OpenAiProvider {
    config: OpenAiConfig,
    client: Client,
}

impl OpenAiProvider {
    pub fn new(config: OpenAiConfig) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .expect("Failed to create HTTP client");

        Self { config, client }
    }

    fn api_key(&self) -> Result<&str, ProviderError> {
        self.config
            .api_key
            .as_deref()
            .ok_or_else(|| ProviderError::NotConfigured("OPENAI_API_KEY is not set".to_string()))
    }

    /// Run one completion and return the raw text content.
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        max_tokens: u32,
    ) -> Result<String, ProviderError> {
        let api_key = self.api_key()?;

        let request = ChatRequest {
            model: &self.config.model,
            messages: &messages,
            max_tokens,
            temperature: Some(0.1),
        };

        let response = self
            .client
            .post(OPENAI_API_URL)
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() {
                    ProviderError::Unavailable(e.to_string())
                } else {
                    ProviderError::Malformed(e.to_string())
                }
            })?;

        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(ProviderError::NotConfigured(format!(
                "authentication failed: {}",
                status
            )));
        }
        if status.as_u16() == 429 || status.is_server_error() {
            return Err(ProviderError::Unavailable(format!("status {}", status)));
        }
        if !status.is_success() {
            return Err(ProviderError::Malformed(format!("status {}", status)));
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;

        body.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| ProviderError::Malformed("empty completion".to_string()))
    }

    async fn complete_json(
        &self,
        messages: Vec<ChatMessage>,
        max_tokens: u32,
    ) -> Result<Value, ProviderError> {
        let content = self.complete(messages, max_tokens).await?;
        let cleaned = strip_code_fences(&content);
        serde_json::from_str(cleaned).map_err(|e| {
            warn!(error = %e, "capability returned unparseable JSON");
            ProviderError::Malformed(format!("invalid JSON: {}", e))
        })
    }

    fn itemized_contract(&self, taxonomy: &Taxonomy) -> String {
        format!(
            "Allowed categories: {:?}. Respond with JSON only, shaped as \
             {{\"establishment\": string, \"date\": \"YYYY-MM-DD\", \"items\": \
             [{{\"description\": string, \"value\": decimal string, \"category\": string}}]}}. \
             Pick each category from the allowed list; if none fits, keep the \
             literal category you read. Use \"{}\" when the establishment is \
             unreadable and today's date ({}) when the date is.",
            taxonomy.categories,
            DEFAULT_ESTABLISHMENT,
            Utc::now().date_naive()
        )
    }
}

#[async_trait]
impl ExtractionProvider for OpenAiProvider {
    #[instrument(skip(self, image, taxonomy), fields(image_bytes = image.len()))]
    async fn extract_receipt(
        &self,
        image: &[u8],
        taxonomy: &Taxonomy,
    ) -> Result<Extraction, ProviderError> {
        let prompt = format!(
            "Read this Brazilian receipt. Extract every line item with its \
             value, classify each item, and identify the establishment and \
             the purchase date. {}",
            self.itemized_contract(taxonomy)
        );

        let data_url = format!("data:image/jpeg;base64,{}", BASE64.encode(image));
        let messages = vec![ChatMessage {
            role: "user",
            content: MessageContent::Parts(vec![
                ContentPart::Text { text: prompt },
                ContentPart::ImageUrl {
                    image_url: ImageUrl { url: data_url },
                },
            ]),
        }];

        let value = self.complete_json(messages, self.config.max_tokens).await?;
        parse_itemized(&value, taxonomy)
    }

    #[instrument(skip(self, text, taxonomy))]
    async fn extract_statement(
        &self,
        text: &str,
        taxonomy: &Taxonomy,
    ) -> Result<Extraction, ProviderError> {
        let system = format!(
            "You turn free-text purchase statements into itemized \
             classifications. Create one item per purchase mentioned. {}",
            self.itemized_contract(taxonomy)
        );
        let messages = vec![
            ChatMessage {
                role: "system",
                content: MessageContent::Text(system),
            },
            ChatMessage {
                role: "user",
                content: MessageContent::Text(text.to_string()),
            },
        ];

        let value = self.complete_json(messages, self.config.max_tokens).await?;
        parse_itemized(&value, taxonomy)
    }

    #[instrument(skip(self, text, taxonomy))]
    async fn extract_expense(
        &self,
        text: &str,
        taxonomy: &Taxonomy,
    ) -> Result<Extraction, ProviderError> {
        let system = format!(
            "You extract a single expense from a short message. Allowed \
             categories: {:?}. Respond with JSON only, shaped as \
             {{\"description\": string, \"date\": \"YYYY-MM-DD\", \"value\": \
             decimal string, \"category\": string}}. Use today's date ({}) \
             unless the message clearly states another.",
            taxonomy.categories,
            Utc::now().date_naive()
        );
        let messages = vec![
            ChatMessage {
                role: "system",
                content: MessageContent::Text(system),
            },
            ChatMessage {
                role: "user",
                content: MessageContent::Text(text.to_string()),
            },
        ];

        let value = self.complete_json(messages, self.config.max_tokens).await?;
        parse_expense(&value, taxonomy)
    }

    #[instrument(skip(self, text, taxonomy))]
    async fn extract_transfer(
        &self,
        text: &str,
        taxonomy: &Taxonomy,
    ) -> Result<Extraction, ProviderError> {
        let system = format!(
            "You extract a transfer between two accounts from a short \
             message. Known accounts: {:?}. Match mentioned accounts to the \
             closest known name; keep the user's wording when nothing is \
             close. Respond with JSON only, shaped as {{\"value\": decimal \
             string, \"source_account\": string, \"destination_account\": \
             string, \"date\": \"YYYY-MM-DD\", \"description\": string or \
             null}}. Use today's date ({}) unless the message clearly states \
             another.",
            taxonomy.accounts,
            Utc::now().date_naive()
        );
        let messages = vec![
            ChatMessage {
                role: "system",
                content: MessageContent::Text(system),
            },
            ChatMessage {
                role: "user",
                content: MessageContent::Text(text.to_string()),
            },
        ];

        let value = self.complete_json(messages, self.config.max_tokens).await?;
        parse_transfer(&value, taxonomy)
    }
}

#[async_trait]
impl EditInterpreter for OpenAiProvider {
    #[instrument(skip(self, draft, instruction, taxonomy))]
    async fn interpret_edit(
        &self,
        draft: &Draft,
        instruction: &str,
        taxonomy: &Taxonomy,
    ) -> Result<Vec<PatchOp>, ProviderError> {
        let draft_json =
            serde_json::to_string(draft).map_err(|e| ProviderError::Malformed(e.to_string()))?;
        let system = format!(
            "You translate a correction request against a pending financial \
             draft into patch operations. Allowed categories: {:?}. Known \
             accounts: {:?}. Respond with a JSON array only. Each element is \
             one of: \
             {{\"op\":\"rename_category\",\"item\":<index or description>,\"category\":string}}, \
             {{\"op\":\"adjust_value\",\"item\":<index or description>,\"value\":decimal string}}, \
             {{\"op\":\"add_item\",\"description\":string,\"value\":decimal string,\"category\":string}}, \
             {{\"op\":\"remove_item\",\"item\":<index or description>}}, \
             {{\"op\":\"change_account\",\"slot\":\"entry\"|\"source\"|\"destination\",\"account\":string}}, \
             {{\"op\":\"change_date\",\"date\":\"YYYY-MM-DD\"}}, \
             {{\"op\":\"set_description\",\"description\":string or null}}, \
             {{\"op\":\"set_total\",\"value\":decimal string}}. \
             Use the category and account names exactly as the user wrote \
             them. Return [] when the request is not a correction.",
            taxonomy.categories, taxonomy.accounts
        );
        let user = format!("Current draft: {}\nRequest: {}", draft_json, instruction);
        let messages = vec![
            ChatMessage {
                role: "system",
                content: MessageContent::Text(system),
            },
            ChatMessage {
                role: "user",
                content: MessageContent::Text(user),
            },
        ];

        let content = self.complete(messages, self.config.max_tokens).await?;
        let cleaned = strip_code_fences(&content);
        let ops: Vec<PatchOp> = serde_json::from_str(cleaned)
            .map_err(|e| ProviderError::Malformed(format!("invalid patch set: {}", e)))?;

        if ops.is_empty() {
            return Err(ProviderError::Unrecognized);
        }
        Ok(ops)
    }
}

// -----------------------------------------------------------------------------
// Response parsing
// -----------------------------------------------------------------------------

/// Strip markdown code fences the model likes to wrap JSON in.
fn strip_code_fences(content: &str) -> &str {
    let trimmed = content.trim();
    let trimmed = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    trimmed.strip_suffix("```").unwrap_or(trimmed).trim()
}

fn decimal_field(value: &Value, field: &str) -> Result<Decimal, ProviderError> {
    let raw = value
        .get(field)
        .ok_or_else(|| ProviderError::Malformed(format!("missing field '{}'", field)))?;
    decimal_from_value(raw)
        .ok_or_else(|| ProviderError::Malformed(format!("field '{}' is not a decimal", field)))
}

/// Accept both `"25.00"` and `25.0`; numbers go through their literal
/// string form so the decimal stays exact.
fn decimal_from_value(value: &Value) -> Option<Decimal> {
    match value {
        Value::String(s) => s.trim().replace(',', ".").parse().ok(),
        Value::Number(n) => n.to_string().parse().ok(),
        _ => None,
    }
}

fn string_field(value: &Value, field: &str) -> Option<String> {
    value
        .get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty() && !s.eq_ignore_ascii_case("null"))
        .map(str::to_string)
}

fn date_field(value: &Value, field: &str) -> NaiveDate {
    value
        .get(field)
        .and_then(Value::as_str)
        .and_then(|s| NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok())
        .unwrap_or_else(|| Utc::now().date_naive())
}

/// Map a raw category onto the taxonomy, collecting the ones that miss.
fn map_category(raw: String, taxonomy: &Taxonomy, unmapped: &mut Vec<String>) -> String {
    match taxonomy.find_category(&raw) {
        Some(canonical) => canonical.to_string(),
        None => {
            unmapped.push(raw.clone());
            raw
        }
    }
}

fn parse_itemized(value: &Value, taxonomy: &Taxonomy) -> Result<Extraction, ProviderError> {
    let raw_items = value
        .get("items")
        .and_then(Value::as_array)
        .filter(|items| !items.is_empty())
        .ok_or_else(|| ProviderError::Malformed("no items extracted".to_string()))?;

    let mut unmapped = Vec::new();
    let mut items = Vec::with_capacity(raw_items.len());
    for raw in raw_items {
        let description = string_field(raw, "description")
            .ok_or_else(|| ProviderError::Malformed("item without description".to_string()))?;
        let item_value = decimal_field(raw, "value")?;
        if item_value < Decimal::ZERO {
            return Err(ProviderError::Malformed(format!(
                "negative value for item '{}'",
                description
            )));
        }
        let category = string_field(raw, "category")
            .ok_or_else(|| ProviderError::Malformed("item without category".to_string()))?;
        items.push(Item {
            description,
            value: item_value,
            category: map_category(category, taxonomy, &mut unmapped),
        });
    }

    let draft = Draft::Classification(ClassificationDraft {
        establishment: string_field(value, "establishment")
            .unwrap_or_else(|| DEFAULT_ESTABLISHMENT.to_string()),
        purchase_date: date_field(value, "date"),
        items,
        account: None,
    });

    Ok(Extraction {
        draft,
        unmapped_categories: unmapped,
    })
}

fn parse_expense(value: &Value, taxonomy: &Taxonomy) -> Result<Extraction, ProviderError> {
    let amount = decimal_field(value, "value")?;
    if amount <= Decimal::ZERO {
        return Err(ProviderError::Malformed(
            "expense value must be positive".to_string(),
        ));
    }
    let category = string_field(value, "category")
        .ok_or_else(|| ProviderError::Malformed("expense without category".to_string()))?;

    let mut unmapped = Vec::new();
    let draft = Draft::Expense(ExpenseDraft {
        value: amount,
        category: map_category(category, taxonomy, &mut unmapped),
        account: None,
        date: date_field(value, "date"),
        description: string_field(value, "description"),
    });

    Ok(Extraction {
        draft,
        unmapped_categories: unmapped,
    })
}

fn parse_transfer(value: &Value, taxonomy: &Taxonomy) -> Result<Extraction, ProviderError> {
    let amount = decimal_field(value, "value")?;
    if amount <= Decimal::ZERO {
        return Err(ProviderError::Malformed(
            "transfer value must be positive".to_string(),
        ));
    }

    let source = string_field(value, "source_account")
        .ok_or_else(|| ProviderError::Malformed("transfer without source account".to_string()))?;
    let destination = string_field(value, "destination_account").ok_or_else(|| {
        ProviderError::Malformed("transfer without destination account".to_string())
    })?;
    if source == destination {
        return Err(ProviderError::Malformed(
            "source and destination accounts are the same".to_string(),
        ));
    }

    let today = Utc::now().date_naive();
    let mut date = date_field(value, "date");
    if today - date > Duration::days(MAX_TRANSFER_AGE_DAYS) {
        warn!(extracted_date = %date, "transfer date too old, using today");
        date = today;
    }

    let canonical = |name: String| {
        taxonomy
            .find_account(&name)
            .map(str::to_string)
            .unwrap_or(name)
    };

    let draft = Draft::Transfer(TransferDraft {
        value: amount,
        source_account: canonical(source),
        destination_account: canonical(destination),
        transfer_date: date,
        description: string_field(value, "description"),
    });

    Ok(Extraction::clean(draft))
}

// -----------------------------------------------------------------------------
// Wire types
// -----------------------------------------------------------------------------

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: MessageContent,
}

#[derive(Serialize)]
#[serde(untagged)]
enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn taxonomy() -> Taxonomy {
        Taxonomy::new(
            vec!["alimentação".to_string(), "limpeza".to_string()],
            vec!["Conta A".to_string(), "Conta B".to_string()],
        )
    }

    #[test]
    fn fences_are_stripped() {
        assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("{\"a\":1}"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```\n[]\n```"), "[]");
    }

    #[test]
    fn decimals_accept_numbers_and_strings() {
        assert_eq!(
            decimal_from_value(&serde_json::json!("25,50")),
            Some("25.50".parse().unwrap())
        );
        assert_eq!(
            decimal_from_value(&serde_json::json!(8.5)),
            Some("8.5".parse().unwrap())
        );
        assert_eq!(decimal_from_value(&serde_json::json!(null)), None);
    }

    #[test]
    fn itemized_parse_maps_categories_and_flags_unmapped() {
        let value = serde_json::json!({
            "establishment": "Supermercado",
            "date": "2024-05-01",
            "items": [
                {"description": "Arroz", "value": "25.00", "category": "Alimentação"},
                {"description": "Esponja", "value": "3.00", "category": "cozinha"}
            ]
        });
        let extraction = parse_itemized(&value, &taxonomy()).unwrap();
        assert_eq!(extraction.unmapped_categories, vec!["cozinha".to_string()]);
        match extraction.draft {
            Draft::Classification(c) => {
                assert_eq!(c.items[0].category, "alimentação");
                assert_eq!(c.items[1].category, "cozinha");
            }
            _ => panic!("expected classification draft"),
        }
    }

    #[test]
    fn itemized_parse_rejects_empty_items() {
        let value = serde_json::json!({"establishment": "X", "items": []});
        assert!(parse_itemized(&value, &taxonomy()).is_err());
    }

    #[test]
    fn transfer_parse_clamps_old_dates() {
        let value = serde_json::json!({
            "value": "500.00",
            "source_account": "conta a",
            "destination_account": "Conta B",
            "date": "2001-01-01",
            "description": null
        });
        let extraction = parse_transfer(&value, &taxonomy()).unwrap();
        match extraction.draft {
            Draft::Transfer(t) => {
                assert_eq!(t.source_account, "Conta A");
                assert_eq!(t.transfer_date, Utc::now().date_naive());
                assert_eq!(t.description, None);
            }
            _ => panic!("expected transfer draft"),
        }
    }
}
