//! Consultant persona and the declared booking tool.
//!
//! The system instruction is assembled from two layers:
//!
//! 1. **Consultant instruction** ([`CONSULTANT_INSTRUCTION`]): the built-in
//!    sales-consultant persona and conversation flow.
//! 2. **Add-on**: optional free-text appended from the user's config.
//!
//! A config may also replace layer 1 entirely via `live.system_instruction`.

use serde_json::{Value, json};

/// Name of the single callable action declared to the remote model.
pub const BOOKING_TOOL_NAME: &str = "bookDemoMeeting";

/// Required argument names of [`BOOKING_TOOL_NAME`], in the order the
/// consultant collects them.
pub const BOOKING_REQUIRED_FIELDS: [&str; 4] =
    ["fullName", "mobileNumber", "emailAddress", "preferredTime"];

/// Optional free-text summary argument.
pub const BOOKING_SUMMARY_FIELD: &str = "callSummary";

/// Built-in consultant persona.
pub const CONSULTANT_INSTRUCTION: &str = "\
You are an AI voice business consultant for Cheshta IT Solution.\n\
Handle website visitors professionally, understand their business needs, and turn them into \
qualified leads by booking a FREE 10-minute demo meeting.\n\
\n\
Language and tone:\n\
- Speak simple Hinglish (Hindi + English).\n\
- Friendly, confident, professional. Natural, never robotic.\n\
- Short, clear answers.\n\
\n\
Persona:\n\
- You are female; use feminine Hindi grammar for yourself (\"karti hoon\", \"rahi hoon\").\n\
- Address the visitor as \"Sir\" with masculine Hindi grammar.\n\
- You work for Cheshta IT Solution as a consultant, not as the owner.\n\
\n\
Services:\n\
- Digital marketing: web development, SEO, Google/Facebook ads, social media.\n\
- AI and automation: voice call bots, AI assistants, WhatsApp automation.\n\
\n\
Conversation flow:\n\
1. Greet the visitor and introduce yourself as the Cheshta IT Solution AI Assistant.\n\
2. Ask what business he runs.\n\
3. Ask about his growth challenges (leads, sales, marketing, automation).\n\
4. Offer a relevant solution and the FREE 10-minute demo (analysis, strategy, roadmap).\n\
5. If he agrees, collect name, then mobile number, then email, then preferred time.\n\
6. Call bookDemoMeeting once every detail is known, then confirm professionally.\n\
\n\
Rules:\n\
- Never ask more than one question at a time.\n\
- Keep moving toward the demo booking.";

/// Synthetic first turn sent right after the session opens so the agent
/// speaks first.
pub const OPENING_PROMPT: &str = "Greet the visitor as 'Sir' professionally. Introduce yourself \
as the Cheshta IT Solution AI Assistant and ask him what business he runs.";

/// Assemble the system instruction sent in the session setup.
///
/// An empty `base` falls back to [`CONSULTANT_INSTRUCTION`]; a non-empty
/// `add_on` is appended after a blank line.
pub fn assemble_instruction(base: &str, add_on: &str) -> String {
    let base = if base.trim().is_empty() {
        CONSULTANT_INSTRUCTION
    } else {
        base.trim()
    };
    let add_on = add_on.trim();
    if add_on.is_empty() {
        base.to_owned()
    } else {
        format!("{base}\n\n{add_on}")
    }
}

/// Function declaration for [`BOOKING_TOOL_NAME`] in the remote schema dialect.
pub fn booking_tool_declaration() -> Value {
    json!({
        "name": BOOKING_TOOL_NAME,
        "description": "Book a FREE 10-minute demo meeting with Cheshta IT Solution.",
        "parameters": {
            "type": "OBJECT",
            "properties": {
                "fullName": { "type": "STRING" },
                "mobileNumber": { "type": "STRING" },
                "emailAddress": { "type": "STRING" },
                "preferredTime": { "type": "STRING" },
                "callSummary": {
                    "type": "STRING",
                    "description": "One or two sentences on the visitor's business and needs."
                }
            },
            "required": BOOKING_REQUIRED_FIELDS,
        }
    })
}
