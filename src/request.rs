//! Wire types for batch request artifacts.
//!
//! Each line of a request artifact wraps one API call in the envelope the
//! batch endpoint expects: a correlation ID, an HTTP method, an endpoint
//! path, and the request payload itself. Humans diff these artifacts, so the
//! structs below declare fields in wire order and serialization is kept
//! byte-stable.

use std::fmt;

use clap::ValueEnum;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// How source files are turned into request payloads.
#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum RequestMode {
    /// Extract document text and ask a chat model to summarize it.
    Summary,
    /// Send image files to a vision model.
    Image,
    /// Rasterize scanned PDFs and send page images to a vision model.
    Scan,
    /// Extract document text and build embedding requests.
    Embed,
}

impl RequestMode {
    /// The `custom_id` prefix marking requests built by this mode.
    pub fn prefix(self) -> &'static str {
        match self {
            RequestMode::Summary => "summary-",
            RequestMode::Image => "image-",
            RequestMode::Scan => "scan-",
            RequestMode::Embed => "embed-",
        }
    }

    /// Does this mode build chat completion requests (as opposed to
    /// embedding requests)?
    pub fn is_chat(self) -> bool {
        !matches!(self, RequestMode::Embed)
    }
}

impl fmt::Display for RequestMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RequestMode::Summary => "summary",
            RequestMode::Image => "image",
            RequestMode::Scan => "scan",
            RequestMode::Embed => "embed",
        };
        f.write_str(name)
    }
}

/// A single line of a batch request artifact.
#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
pub struct BatchRequestRecord {
    /// Caller-chosen identifier, echoed back verbatim in the matching result
    /// record. This is the only link between a request and its result.
    pub custom_id: String,

    /// HTTP method for the wrapped request. Always `POST`.
    pub method: String,

    /// Endpoint path for the wrapped request.
    pub url: String,

    /// The wrapped request payload.
    pub body: RequestBody,
}

impl BatchRequestRecord {
    /// Wrap a chat completion payload in the batch envelope.
    pub fn chat(
        custom_id: String,
        url: &str,
        model: String,
        messages: Vec<Message>,
        max_tokens: u32,
    ) -> Self {
        Self {
            custom_id,
            method: "POST".to_owned(),
            url: url.to_owned(),
            body: RequestBody::Chat(ChatBody {
                model,
                messages,
                max_tokens,
            }),
        }
    }

    /// Wrap an embedding payload in the batch envelope.
    pub fn embedding(custom_id: String, url: &str, model: String, input: String) -> Self {
        Self {
            custom_id,
            method: "POST".to_owned(),
            url: url.to_owned(),
            body: RequestBody::Embedding(EmbeddingBody { model, input }),
        }
    }
}

/// The payload of a wrapped request.
///
/// Chat payloads carry `messages`, embedding payloads carry `input`, so the
/// untagged representation is unambiguous in both directions.
#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
#[serde(untagged)]
pub enum RequestBody {
    /// A chat completion request.
    Chat(ChatBody),

    /// An embedding request.
    Embedding(EmbeddingBody),
}

/// A chat completion payload.
#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
pub struct ChatBody {
    /// The model to run.
    pub model: String,

    /// The conversation. For batch building this is always a single user
    /// message.
    pub messages: Vec<Message>,

    /// Output token ceiling for this request.
    pub max_tokens: u32,
}

/// An embedding payload.
#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
pub struct EmbeddingBody {
    /// The model to run.
    pub model: String,

    /// The text to embed.
    pub input: String,
}

/// A chat message.
#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
pub struct Message {
    /// The message role, normally `user`.
    pub role: String,

    /// The message content.
    pub content: MessageContent,
}

impl Message {
    /// A plain-text user message.
    pub fn user_text(text: String) -> Self {
        Self {
            role: "user".to_owned(),
            content: MessageContent::Text(text),
        }
    }

    /// A user message with leading text followed by inline images.
    pub fn user_with_images(text: String, image_urls: Vec<String>) -> Self {
        let mut parts = vec![ContentPart::Text { text }];
        parts.extend(
            image_urls
                .into_iter()
                .map(|url| ContentPart::ImageUrl {
                    image_url: ImageUrl { url },
                }),
        );
        Self {
            role: "user".to_owned(),
            content: MessageContent::Parts(parts),
        }
    }
}

/// Message content: either a bare string or a list of typed parts.
#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
#[serde(untagged)]
pub enum MessageContent {
    /// Plain text content.
    Text(String),

    /// Multi-part content, used for vision requests.
    Parts(Vec<ContentPart>),
}

/// One part of a multi-part message.
#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// A text part.
    Text {
        /// The text itself.
        text: String,
    },

    /// An image part.
    ImageUrl {
        /// Where to find the image.
        image_url: ImageUrl,
    },
}

/// An image reference. For batch building this is always a `data:` URL.
#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
pub struct ImageUrl {
    /// The image URL.
    pub url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_prefixes_are_stable() {
        assert_eq!(RequestMode::Summary.prefix(), "summary-");
        assert_eq!(RequestMode::Image.prefix(), "image-");
        assert_eq!(RequestMode::Scan.prefix(), "scan-");
        assert_eq!(RequestMode::Embed.prefix(), "embed-");
    }

    #[test]
    fn chat_record_serializes_in_wire_order() {
        let record = BatchRequestRecord::chat(
            "summary-report".to_owned(),
            "/v1/chat/completions",
            "qwen-vl".to_owned(),
            vec![Message::user_text("Summarize.".to_owned())],
            500,
        );
        let json = serde_json::to_string(&record).expect("should serialize");
        assert_eq!(
            json,
            "{\"custom_id\":\"summary-report\",\"method\":\"POST\",\
             \"url\":\"/v1/chat/completions\",\"body\":{\"model\":\"qwen-vl\",\
             \"messages\":[{\"role\":\"user\",\"content\":\"Summarize.\"}],\
             \"max_tokens\":500}}"
        );
    }

    #[test]
    fn vision_message_serializes_text_then_images() {
        let message = Message::user_with_images(
            "Describe these pages.".to_owned(),
            vec!["data:image/png;base64,AAAA".to_owned()],
        );
        let json = serde_json::to_string(&message).expect("should serialize");
        assert_eq!(
            json,
            "{\"role\":\"user\",\"content\":[\
             {\"type\":\"text\",\"text\":\"Describe these pages.\"},\
             {\"type\":\"image_url\",\"image_url\":{\"url\":\"data:image/png;base64,AAAA\"}}]}"
        );
    }

    #[test]
    fn embedding_record_has_no_max_tokens() {
        let record = BatchRequestRecord::embedding(
            "embed-notes-chunk1".to_owned(),
            "/v1/embeddings",
            "BAAI/bge-en-icl".to_owned(),
            "Some text.".to_owned(),
        );
        let json = serde_json::to_string(&record).expect("should serialize");
        assert_eq!(
            json,
            "{\"custom_id\":\"embed-notes-chunk1\",\"method\":\"POST\",\
             \"url\":\"/v1/embeddings\",\"body\":{\"model\":\"BAAI/bge-en-icl\",\
             \"input\":\"Some text.\"}}"
        );
        assert!(!json.contains("max_tokens"));
    }

    #[test]
    fn body_variant_is_recovered_when_parsing() {
        let chat = "{\"custom_id\":\"summary-a\",\"method\":\"POST\",\
                    \"url\":\"/v1/chat/completions\",\"body\":{\"model\":\"m\",\
                    \"messages\":[{\"role\":\"user\",\"content\":\"hi\"}],\
                    \"max_tokens\":10}}";
        let record: BatchRequestRecord =
            serde_json::from_str(chat).expect("should parse");
        assert!(matches!(record.body, RequestBody::Chat(_)));

        let embed = "{\"custom_id\":\"embed-a-chunk1\",\"method\":\"POST\",\
                     \"url\":\"/v1/embeddings\",\"body\":{\"model\":\"m\",\
                     \"input\":\"hi\"}}";
        let record: BatchRequestRecord =
            serde_json::from_str(embed).expect("should parse");
        assert!(matches!(record.body, RequestBody::Embedding(_)));
    }
}
