#![deny(missing_docs)]
//! The webhook notifier: a side-effect-only collaborator that posts a
//! rendered template to an operator-supplied URL. Failures are logged and
//! swallowed (spec §9, "Webhook isolation") rather than propagated to the
//! caller.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use draind_types::{InterruptionEvent, WebhookError};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// A side-effect-only notification collaborator. Implementations must never
/// let a delivery failure propagate into the drain flow — the Handler calls
/// `notify` and only logs the result.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Render and deliver a notification for `event` on `node_name`.
    async fn notify(&self, event: &InterruptionEvent, node_name: &str) -> Result<(), WebhookError>;
}

/// `reqwest`-based [`Notifier`] posting a `{{field}}`-templated body to a
/// fixed URL with fixed headers.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
    headers: Vec<(String, String)>,
    body_template: String,
}

impl WebhookNotifier {
    /// Build a notifier posting `body_template` (with `{{field}}`
    /// placeholders) to `url` with the given extra headers.
    #[must_use]
    pub fn new(url: impl Into<String>, headers: Vec<(String, String)>, body_template: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
            url: url.into(),
            headers,
            body_template: body_template.into(),
        }
    }
}

/// Build the template context for `event`/`node_name`: every field name the
/// spec's "full event and node metadata" contract promises, flattened to
/// strings since the template language is a literal `{{field}}`
/// substitution, not a full expression language (spec §1 Non-goals).
#[must_use]
pub fn template_context(event: &InterruptionEvent, node_name: &str) -> HashMap<String, String> {
    let mut ctx = HashMap::new();
    ctx.insert("event_id".to_string(), event.event_id.clone());
    ctx.insert("kind".to_string(), format!("{:?}", event.kind));
    ctx.insert("description".to_string(), event.description.clone());
    ctx.insert("state".to_string(), event.state.clone());
    ctx.insert("node_name".to_string(), node_name.to_string());
    ctx.insert("start_time".to_string(), event.start_time.to_rfc3339());
    if let Some(end_time) = event.end_time {
        ctx.insert("end_time".to_string(), end_time.to_rfc3339());
    }
    if let Some(instance_id) = &event.instance_id {
        ctx.insert("instance_id".to_string(), instance_id.clone());
    }
    if let Some(provider_id) = &event.provider_id {
        ctx.insert("provider_id".to_string(), provider_id.clone());
    }
    ctx
}

/// Minimal `{{field}}` substitution: unknown placeholders are left intact
/// rather than erroring, matching a "best-effort template" collaborator
/// (spec §1 Non-goals: "the webhook notifier's template language beyond a
/// minimal `{{field}}` substitution" is out of scope for anything richer).
#[must_use]
pub fn render(template: &str, context: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                let key = after[..end].trim();
                match context.get(key) {
                    Some(value) => out.push_str(value),
                    None => {
                        out.push_str("{{");
                        out.push_str(&after[..end]);
                        out.push_str("}}");
                    }
                }
                rest = &after[end + 2..];
            }
            None => {
                out.push_str("{{");
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, event: &InterruptionEvent, node_name: &str) -> Result<(), WebhookError> {
        let context = template_context(event, node_name);
        let body = render(&self.body_template, &context);

        let mut request = self.client.post(&self.url).body(body);
        for (key, value) in &self.headers {
            request = request.header(key, value);
        }

        let resp = request
            .send()
            .await
            .map_err(|e| WebhookError::Delivery(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(WebhookError::Delivery(format!("HTTP {}", resp.status())));
        }
        Ok(())
    }
}

/// Deliver via `notifier`, logging and swallowing any failure — the only
/// call shape the Handler is allowed to use (spec §9, "Webhook isolation").
pub async fn notify_best_effort(notifier: &dyn Notifier, event: &InterruptionEvent, node_name: &str) {
    if let Err(err) = notifier.notify(event, node_name).await {
        tracing::warn!(event_id = %event.event_id, node_name, error = %err, "webhook notification failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use draind_types::EventKind;

    #[test]
    fn render_substitutes_known_fields() {
        let mut ctx = HashMap::new();
        ctx.insert("node_name".to_string(), "node-a".to_string());
        let out = render("node {{node_name}} is draining", &ctx);
        assert_eq!(out, "node node-a is draining");
    }

    #[test]
    fn render_leaves_unknown_placeholders_intact() {
        let ctx = HashMap::new();
        let out = render("value: {{missing}}", &ctx);
        assert_eq!(out, "value: {{missing}}");
    }

    #[test]
    fn template_context_includes_description_and_start_time() {
        let event = InterruptionEvent::new("e1", EventKind::SpotInterruption, "spot notice", Utc::now());
        let ctx = template_context(&event, "node-a");
        assert_eq!(ctx.get("description").unwrap(), "spot notice");
        assert_eq!(ctx.get("node_name").unwrap(), "node-a");
        assert!(ctx.contains_key("start_time"));
    }

    struct FailingNotifier;

    #[async_trait]
    impl Notifier for FailingNotifier {
        async fn notify(&self, _event: &InterruptionEvent, _node_name: &str) -> Result<(), WebhookError> {
            Err(WebhookError::Delivery("boom".to_string()))
        }
    }

    #[tokio::test]
    async fn best_effort_swallows_failures() {
        let notifier = FailingNotifier;
        let event = InterruptionEvent::new("e1", EventKind::SpotInterruption, "d", Utc::now());
        notify_best_effort(&notifier, &event, "node-a").await;
    }
}
