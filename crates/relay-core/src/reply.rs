//! Automatic reply generation for inbound chat lines.
//!
//! The reply engine is a pure function from one inbound line to one
//! outbound line. Matching is case-insensitive on the trimmed input,
//! and the keyword checks take precedence over the special-character
//! check, so `"Hi!!"` is greeted rather than rejected.

/// Reply to lines containing a greeting keyword.
pub const GREETING_REPLY: &str = "Hello! How can I assist you?";

/// Reply to lines asking how the server is doing.
pub const STATUS_REPLY: &str = "I'm a server, always running!";

/// Reply to lines containing a farewell keyword.
pub const FAREWELL_REPLY: &str = "Goodbye!";

/// Reply to lines that contain punctuation but no recognized keyword.
pub const NOT_UNDERSTOOD_REPLY: &str = "Message not understood.";

/// Punctuation that marks a line as not understood when no keyword matches.
const SPECIAL_CHARACTERS: &[char] = &[
    '!', '@', '#', '$', '%', '^', '&', '*', '(', ')', '_', '+', '=', '[', ']', '{', '}', ';', ':',
    '\'', '"', ',', '.', '<', '>', '/', '?', '`', '~',
];

/// Computes the automatic reply for one inbound line.
///
/// The input is trimmed and lowercased before matching. Checks run in
/// order: greeting, status, farewell, special characters, echo. The
/// echo reply quotes the trimmed lowercased text.
pub fn reply(line: &str) -> String {
    let msg = line.trim().to_lowercase();

    if msg.contains("hello") || msg.contains("hi") {
        GREETING_REPLY.to_string()
    } else if msg.contains("how are you") {
        STATUS_REPLY.to_string()
    } else if msg.contains("bye") || msg.contains("exit") {
        FAREWELL_REPLY.to_string()
    } else if msg.contains(SPECIAL_CHARACTERS) {
        NOT_UNDERSTOOD_REPLY.to_string()
    } else {
        format!("You said: '{msg}'")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_greeting_keywords() {
        assert_eq!(reply("hello"), GREETING_REPLY);
        assert_eq!(reply("hi there"), GREETING_REPLY);
        assert_eq!(reply("HELLO SERVER"), GREETING_REPLY);
    }

    #[test]
    fn test_greeting_beats_special_characters() {
        // Precedence: keyword checks run before the punctuation check.
        assert_eq!(reply("Hi!!"), GREETING_REPLY);
        assert_eq!(reply("hello, anyone?"), GREETING_REPLY);
    }

    #[test]
    fn test_status_is_trimmed_and_case_insensitive() {
        assert_eq!(reply("  HOW ARE YOU?  "), STATUS_REPLY);
        assert_eq!(reply("how are you"), STATUS_REPLY);
    }

    #[test]
    fn test_farewell_keywords() {
        assert_eq!(reply("bye"), FAREWELL_REPLY);
        assert_eq!(reply("I will exit now"), FAREWELL_REPLY);
        assert_eq!(reply("GOODBYE"), FAREWELL_REPLY);
    }

    #[test]
    fn test_special_characters_not_understood() {
        assert_eq!(reply("what now?"), NOT_UNDERSTOOD_REPLY);
        assert_eq!(reply("#%&"), NOT_UNDERSTOOD_REPLY);
        assert_eq!(reply("a.b"), NOT_UNDERSTOOD_REPLY);
    }

    #[test]
    fn test_echo_quotes_trimmed_lowercased_text() {
        assert_eq!(reply("just a normal day"), "You said: 'just a normal day'");
        assert_eq!(reply("  Mixed Case  "), "You said: 'mixed case'");
    }

    #[test]
    fn test_keyword_matches_anywhere_in_line() {
        // Substring semantics: "this" and "nothing" both contain "hi".
        assert_eq!(reply("this"), GREETING_REPLY);
        assert_eq!(reply("nothing special"), GREETING_REPLY);
    }

    #[test]
    fn test_empty_line_is_echoed() {
        assert_eq!(reply(""), "You said: ''");
        assert_eq!(reply("   "), "You said: ''");
    }
}
