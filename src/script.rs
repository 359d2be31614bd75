//! Fixed call scripts
//!
//! The greeting and closings are spoken verbatim. The system framing is
//! sent ahead of the transcript on every reply.

/// Spoken when the call is answered
pub const GREETING: &str = "Hello! Thank you for calling our investment advisory service. \
My name is Alex, and I'm here to help you explore investment opportunities. \
I have a few quick questions to understand your investment goals better. \
First, what type of investments are you interested in? \
For example, stocks, bonds, real estate, or cryptocurrency?";

/// Spoken to a caller whose interest, amount, and risk tolerance are known
pub const CLOSING_QUALIFIED: &str = "Thank you so much for sharing that information! \
You sound like a great fit for our services. \
I'll have one of our senior advisors give you a call within 24 hours \
to discuss your investment options in detail. \
Have a wonderful day!";

/// Spoken to every other caller, including after a failure
pub const CLOSING_NOT_QUALIFIED: &str = "Thank you for your time today. \
If you'd like to learn more about our investment services, \
feel free to call us back anytime. Have a great day!";

/// Advisor persona sent as the system message
pub const SYSTEM_PROMPT: &str = "You are Alex, a professional investment advisor AI assistant. \
Your goal is to qualify leads by understanding their investment interests and financial goals.

Ask targeted questions to determine:
1. Type of investments they're interested in
2. Investment amount they're considering
3. Risk tolerance (conservative, moderate, aggressive)
4. Investment timeline

Be friendly, professional, and conversational. Keep responses concise (2-3 sentences).
After gathering information, qualify the lead and offer to connect them with a human advisor.";

/// Pick the closing script for a finished conversation
#[must_use]
pub const fn closing_for(qualified: bool) -> &'static str {
    if qualified {
        CLOSING_QUALIFIED
    } else {
        CLOSING_NOT_QUALIFIED
    }
}
