//! Prompt text for the outline, unit, and thumbnail calls.

/// System instruction sent with every text call.
pub const SYSTEM_PROMPT: &str = "You are a senior instructional designer who writes \
rigorous technical training material. Always answer with a single JSON document and \
nothing else: no markdown fences, no commentary.";

const OUTLINE_TEMPLATE: &str = "Design a training course on the topic \"{topic}\".
Produce exactly {unit_count} units that progress from fundamentals to advanced practice.

Return JSON: {{\"titles\": [\"Unit title\", ...], \"descriptions\": [\"One sentence per unit\", ...]}}";

const UNIT_TEMPLATE: &str = "Write a technical manual and a quiz for the unit \"{unit}\" of the course \"{course}\".

MANUAL:
- Dense, professional Markdown: table of contents, fundamentals, best practices, \
step-by-step procedures where relevant, technical specifications.
- Teach the subject itself; do not pad with unrelated material.

QUIZ:
- Exactly 3 multiple-choice questions about the manual, each with exactly 4 options \
and exactly one correct answer.

FORMAT RULES:
- Escape every double quote inside strings as \\\" and every newline as \\n.
- The \"content\" field holds only the manual. Never put quiz questions in it.

Return JSON: {{\"content\": \"Markdown...\", \"quiz\": [{{\"question\": \"...\", \"options\": [\"...\", \"...\", \"...\", \"...\"], \"correctIndex\": 0}}]}}";

const THUMBNAIL_TEMPLATE: &str = "Professional cinematic photography of {topic}. \
High-tech equipment, 8k resolution, professional lighting, sharp textures, depth of field. \
Unique technical perspective.";

const FALLBACK_IMAGE_TEMPLATE: &str = "Professional industrial photography of {topic}, 8k, cinematic";

/// Build a prompt string with variable substitution.
///
/// Replaces `{key}` placeholders in the template with the paired values.
/// Use `{{` to insert a literal `{` and `}}` to insert a literal `}`.
///
/// # Example
///
/// ```
/// use curriculum_forge::prompt::render;
///
/// let result = render("Hello {name}, here is JSON: {{\"key\": \"val\"}}", &[("name", "Alice")]);
/// assert_eq!(result, r#"Hello Alice, here is JSON: {"key": "val"}"#);
/// ```
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut rendered = String::with_capacity(template.len());
    let mut rest = template;
    // Values are copied verbatim; placeholders inside them are never expanded.
    while let Some(pos) = rest.find(['{', '}']) {
        rendered.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        if tail.starts_with("{{") || tail.starts_with("}}") {
            rendered.push_str(&tail[..1]);
            rest = &tail[2..];
            continue;
        }
        let value = tail.strip_prefix('{').and_then(|inner| {
            let close = inner.find('}')?;
            let key = &inner[..close];
            vars.iter()
                .find(|(name, _)| *name == key)
                .map(|(_, value)| (*value, close + 2))
        });
        match value {
            Some((value, consumed)) => {
                rendered.push_str(value);
                rest = &tail[consumed..];
            }
            None => {
                rendered.push_str(&tail[..1]);
                rest = &tail[1..];
            }
        }
    }
    rendered.push_str(rest);
    rendered
}

pub fn outline_prompt(topic: &str, unit_count: usize) -> String {
    render(
        OUTLINE_TEMPLATE,
        &[("topic", topic), ("unit_count", &unit_count.to_string())],
    )
}

pub fn unit_prompt(course_title: &str, unit_title: &str) -> String {
    render(UNIT_TEMPLATE, &[("course", course_title), ("unit", unit_title)])
}

pub fn thumbnail_prompt(topic: &str) -> String {
    render(THUMBNAIL_TEMPLATE, &[("topic", topic)])
}

/// Prompt for the public prompt-to-image service.
pub fn fallback_image_prompt(topic: &str) -> String {
    render(FALLBACK_IMAGE_TEMPLATE, &[("topic", topic)])
}
