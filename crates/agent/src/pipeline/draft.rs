use mimic_core::types::{
    DraftSettings, EmailClassification, Memory, OriginalEmail, PersonalizationContext, Verbosity,
    WritingStyle,
};

pub const GENERATOR_SYSTEM: &str = "You write email replies on behalf of the user, in the user's own voice. \
Match their writing style exactly, even where it is terser or more casual than a generic assistant would be. \
Do not invent facts, commitments or dates that are not in the email or the user's notes. \
Respond ONLY with JSON: {\"subject\": \"string\", \"body\": \"string\", \"reasoning\": \"string\"}.";

pub fn style_guidance(style: Option<&WritingStyle>) -> String {
    let Some(style) = style else {
        return "No learned style profile yet. Keep the reply brief, plain and natural; \
avoid stock assistant phrasing."
            .to_string();
    };

    let mut lines = vec![format!(
        "Formality {:.1}/1, warmth {:.1}/1, verbosity {} (about {} words on average).",
        style.formality_score, style.warmth_score, style.verbosity, style.avg_length_words
    )];
    if !style.greeting_patterns.is_empty() {
        lines.push(format!("Typical greetings: {}", quoted(&style.greeting_patterns)));
    }
    if !style.signoff_patterns.is_empty() {
        lines.push(format!("Typical sign-offs: {}", quoted(&style.signoff_patterns)));
    }
    if !style.common_phrases.is_empty() {
        lines.push(format!("Phrases they use: {}", quoted(&style.common_phrases)));
    }
    lines.push(if style.uses_emoji {
        "Emoji are fine where the user would use them.".to_string()
    } else {
        "Never use emoji.".to_string()
    });
    if style.uses_bullets {
        lines.push("Bullet points are fine for lists.".to_string());
    }
    lines.join("\n")
}

fn quoted(items: &[String]) -> String {
    items
        .iter()
        .map(|s| format!("\"{}\"", s))
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn memories_block(memories: &[Memory]) -> String {
    if memories.is_empty() {
        return "None.".to_string();
    }
    memories
        .iter()
        .map(|m| format!("- [{}] {}: {}", m.category, m.key, m.value))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Target length: the user's habit, capped by their setting.
pub fn length_policy(style: Option<&WritingStyle>, settings: &DraftSettings) -> String {
    let cap = settings.max_response_words;
    match style {
        Some(style) if style.avg_length_words > 0 => {
            let target = style.avg_length_words.min(cap);
            let hint = match style.verbosity {
                Verbosity::Terse => "One or two sentences is normal for this user.",
                Verbosity::Concise => "Short paragraphs, no filler.",
                Verbosity::Moderate => "A few short paragraphs at most.",
                Verbosity::Detailed => "Thorough answers are normal, but stay on topic.",
            };
            format!("Aim for about {} words, never more than {}. {}", target, cap, hint)
        }
        _ => format!("Never more than {} words.", cap),
    }
}

pub fn generation_prompt(
    email: &OriginalEmail,
    classification: &EmailClassification,
    context: &PersonalizationContext,
    settings: &DraftSettings,
    body_chars: usize,
) -> String {
    let body: String = email.body_text.chars().take(body_chars).collect();
    let points = if classification.suggested_points.is_empty() {
        "None given.".to_string()
    } else {
        classification
            .suggested_points
            .iter()
            .map(|p| format!("- {}", p))
            .collect::<Vec<_>>()
            .join("\n")
    };
    let signature = if settings.include_signature && settings.signature.is_some() {
        "Do not add a signature block; it is appended automatically."
    } else {
        "End with a sign-off the user would write."
    };

    format!(
        "## Writing style
{style}

## What you know about the user
{memories}

## Length
{length}

## Points to cover
{points}

## Email to reply to ({kind}, urgency {urgency})
From: {from}
Subject: {subject}

{body}

Reply with subject \"{reply_subject}\" unless the user's style suggests otherwise. \
Prioritise sounding like the user over sounding polite. {signature}",
        style = style_guidance(context.style.as_ref()),
        memories = memories_block(&context.memories),
        length = length_policy(context.style.as_ref(), settings),
        points = points,
        kind = classification.response_type,
        urgency = classification.urgency,
        from = email.sender_display(),
        subject = email.subject,
        body = body,
        reply_subject = email.reply_subject(),
        signature = signature,
    )
}

pub fn with_signature(body: &str, settings: &DraftSettings) -> String {
    match (&settings.signature, settings.include_signature) {
        (Some(signature), true) if !signature.trim().is_empty() => {
            format!("{}\n\n{}", body.trim_end(), signature.trim())
        }
        _ => body.to_string(),
    }
}

/// Plain text to minimal HTML: escaped, one `<p>` per paragraph.
pub fn render_html(body: &str) -> String {
    body.split("\n\n")
        .filter(|p| !p.trim().is_empty())
        .map(|p| format!("<p>{}</p>", escape_html(p.trim()).replace('\n', "<br>")))
        .collect::<Vec<_>>()
        .join("\n")
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}
