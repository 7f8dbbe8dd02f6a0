//! Outline generation.

use crate::config::MAX_UNITS;
use crate::error::{PipelineError, Result};
use crate::exec_ctx::ExecCtx;
use crate::output_parser::decode;
use crate::prompt::outline_prompt;
use crate::retry::{with_retry, RetryNotice};
use crate::types::CurriculumOutline;

/// Ask the service for the unit titles of a course on `topic`.
///
/// One call under the outline retry policy. Titles are trimmed, blank
/// titles dropped, and the list capped at 25. An outline with no usable
/// title is a structural failure, and is retried like one.
pub async fn generate_outline(ctx: &ExecCtx, topic: &str) -> Result<CurriculumOutline> {
    let topic = topic.trim();
    if topic.is_empty() {
        return Err(PipelineError::InvalidInput("topic is empty".into()));
    }
    let prompt = outline_prompt(topic, ctx.settings.effective_unit_count());

    let mut on_retry = |notice: &RetryNotice<'_>| ctx.notify_retry(notice);
    let outline = with_retry(
        "outline",
        &ctx.settings.outline_retry,
        &ctx.cancellation,
        Some(&mut on_retry),
        |_attempt| {
            let prompt = prompt.clone();
            async move {
                let response = ctx.call_text("outline", prompt).await?;
                let outline: CurriculumOutline = decode(&response.text)?;
                normalize(outline)
            }
        },
    )
    .await?;

    tracing::info!(topic, units = outline.titles.len(), "outline generated");
    Ok(outline)
}

fn normalize(outline: CurriculumOutline) -> Result<CurriculumOutline> {
    let mut titles = Vec::with_capacity(outline.titles.len());
    let mut descriptions = Vec::new();
    for (i, title) in outline.titles.iter().enumerate() {
        let title = title.trim();
        if title.is_empty() {
            continue;
        }
        if titles.len() == MAX_UNITS {
            tracing::warn!(
                returned = outline.titles.len(),
                kept = MAX_UNITS,
                "outline longer than supported, truncating"
            );
            break;
        }
        titles.push(title.to_string());
        descriptions.push(outline.description(i).unwrap_or_default().to_string());
    }
    if titles.is_empty() {
        return Err(PipelineError::structural("outline contains no unit titles"));
    }
    if descriptions.iter().all(String::is_empty) {
        descriptions.clear();
    }
    Ok(CurriculumOutline {
        titles,
        descriptions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MockBackend, MockReply};
    use crate::config::PipelineSettings;
    use crate::retry::{classify, ErrorClass};
    use std::sync::Arc;

    fn ctx(mock: Arc<MockBackend>) -> ExecCtx {
        ExecCtx::builder("http://unused")
            .backend(mock)
            .settings(PipelineSettings::default().without_delays())
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn trims_and_drops_blank_titles() {
        let mock = Arc::new(MockBackend::fixed(
            r#"```json
{"titles": ["  PPE Selection ", "", "Lockout/Tagout"], "descriptions": ["Gear", "skip", "Energy isolation"]}
```"#,
        ));
        let outline = generate_outline(&ctx(mock.clone()), " Electrical Safety ").await.unwrap();
        assert_eq!(outline.titles, vec!["PPE Selection", "Lockout/Tagout"]);
        assert_eq!(outline.description(1), Some("Energy isolation"));
        assert!(mock.prompts()[0].contains("\"Electrical Safety\""));
        assert!(mock.prompts()[0].contains("exactly 12 units"));
    }

    #[tokio::test]
    async fn caps_at_max_units() {
        let titles: Vec<String> = (0..40).map(|i| format!("\"Unit {}\"", i)).collect();
        let mock = Arc::new(MockBackend::fixed(format!("{{\"titles\": [{}]}}", titles.join(","))));
        let outline = generate_outline(&ctx(mock), "Hydraulics").await.unwrap();
        assert_eq!(outline.titles.len(), MAX_UNITS);
        assert!(outline.descriptions.is_empty());
    }

    #[tokio::test]
    async fn empty_outline_retried_then_fails_structurally() {
        let mock = Arc::new(MockBackend::fixed(r#"{"titles": ["  "]}"#));
        let err = generate_outline(&ctx(mock.clone()), "Hydraulics").await.unwrap_err();
        assert_eq!(classify(&err), ErrorClass::StructuralFailure);
        assert_eq!(mock.text_calls(), 3);
    }

    #[tokio::test]
    async fn recovers_after_rate_limit() {
        let mock = Arc::new(MockBackend::new(vec![
            MockReply::RateLimited,
            MockReply::text(r#"{"titles": ["Pumps"]}"#),
        ]));
        let outline = generate_outline(&ctx(mock.clone()), "Hydraulics").await.unwrap();
        assert_eq!(outline.titles, vec!["Pumps"]);
        assert_eq!(mock.text_calls(), 2);
    }

    #[tokio::test]
    async fn blank_topic_rejected_without_call() {
        let mock = Arc::new(MockBackend::fixed("{}"));
        let err = generate_outline(&ctx(mock.clone()), "   ").await.unwrap_err();
        assert!(matches!(err, PipelineError::InvalidInput(_)));
        assert_eq!(mock.text_calls(), 0);
    }
}
