//! Topic naming follows `{base}/{kind-keyword}/{clientId}/{timestamp}`.
//!
//! Reply topics are derived from the inbound request topic by a literal
//! keyword substitution, NOT by structured topic parsing: the deployed
//! device fleet and broker rules depend on the exact keyword strings, so the
//! substitution must stay a plain substring replace.

/// One request-to-reply keyword pair. The issuer swaps the request keyword
/// for the response keyword; the processor swaps it for the
/// acknowledgement keyword.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyKeywords {
    request: String,
    reply: String,
}

impl ReplyKeywords {
    pub fn new(request: impl Into<String>, reply: impl Into<String>) -> Self {
        Self {
            request: request.into(),
            reply: reply.into(),
        }
    }

    pub fn reply_topic(&self, request_topic: &str) -> String {
        request_topic.replace(&self.request, &self.reply)
    }
}

/// Formats the topic a device publishes its upload request on.
pub fn request_topic(base: &str, request_keyword: &str, client_id: &str, timestamp: &str) -> String {
    format!("{base}/{request_keyword}/{client_id}/{timestamp}")
}
