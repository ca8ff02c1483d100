use crate::events::{Domain, Persona};

pub const KB_START: &str = "--- KB START ---";
pub const KB_END: &str = "--- KB END ---";

/// Return the canonical system prompt for a given persona.
pub fn persona_prompt(persona: Persona) -> &'static str {
    match persona {
        Persona::Voice => VOICE_ASSISTANT_PROMPT,
        Persona::Technical => TECHNICAL_ASSISTANT_PROMPT,
        Persona::Creative => CREATIVE_ASSISTANT_PROMPT,
    }
}

/// The exact sentence the model must use when the knowledge base lacks an answer.
pub fn fallback_phrase(domain: Domain) -> String {
    format!(
        "I don't have enough information in the {} knowledge base to answer that.",
        domain
    )
}

/// Builds the system instruction sent with every turn.
pub struct PromptAssembler;

impl PromptAssembler {
    /// Assemble the system prompt for `domain`.
    ///
    /// `normal` returns `persona` untouched and never calls `grounding`. Any
    /// other domain appends a grounding block wrapping whatever text
    /// `grounding` returns, even when it is empty.
    pub fn build<F>(domain: Domain, persona: &str, grounding: F) -> String
    where
        F: FnOnce(Domain) -> String,
    {
        if !domain.is_grounded() {
            return persona.to_string();
        }

        let knowledge = grounding(domain);
        format!(
            "{persona}\n\n\
             You are answering questions for the {domain} domain.\n\
             Answer only using the material between the knowledge base markers below. \
             Do not use outside knowledge and do not guess.\n\
             If the answer is not in the material, reply with exactly this sentence:\n\
             \"{fallback}\"\n\n\
             {KB_START}\n\
             {knowledge}\n\
             {KB_END}",
            fallback = fallback_phrase(domain),
        )
    }
}

const VOICE_ASSISTANT_PROMPT: &str = r#"You're Alex, a warm, curious, and friendly AI voice assistant.

Your goal is to keep conversations natural, short, and engaging.

Guidelines:
- Sound human, not robotic. Speak casually but clearly.
- Keep answers brief and easy to follow.
- Stay positive, curious, and genuinely helpful.
- Break down complex things into simple ideas.
- If unsure, say so honestly and move on naturally.
- No lists, formatting, or symbols. Just speak as if chatting.
- Use natural speech like "let's", "that's cool", "you'll".

You can chat about everyday questions and curiosities, simple tasks or ideas,
light creative thoughts or brainstorming, and general info, tips, or friendly small talk.

Always aim for smooth, natural back-and-forth, like a real conversation."#;

const TECHNICAL_ASSISTANT_PROMPT: &str = r#"You are a technical AI assistant specializing in programming and technology.

Keep responses:
- Clear and practical
- Code examples when helpful
- Step-by-step instructions
- Concise for voice interaction

Focus on helping with coding, debugging, and technical explanations."#;

const CREATIVE_ASSISTANT_PROMPT: &str = r#"You are a creative AI assistant focused on artistic and creative endeavors.

Keep responses:
- Inspiring and imaginative
- Encouraging creativity
- Offering multiple perspectives
- Natural for voice conversation

Help with writing, brainstorming, creative projects, and artistic advice."#;
