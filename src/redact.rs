//! Log redaction for remote commands.
//!
//! Redaction only affects the text that reaches the logs. The command that
//! executes on the remote host is never altered.

/// Replacement written in place of a masked value.
pub const MASK: &str = "********";

/// Key names whose values are credentials.
pub const SECRET_KEYS: [&str; 3] = [
    "aws_access_key_id",
    "aws_secret_access_key",
    "aws_session_token",
];

/// Masks credential values in command strings before they are logged.
///
/// Two kinds of secret are recognised: the value following a secret-bearing
/// key name (`aws_secret_access_key = VALUE`, `aws_secret_access_key VALUE`)
/// and any literal registered through [`Redactor::register_secret`].
#[derive(Clone, Debug)]
pub struct Redactor {
    keys: Vec<String>,
    secrets: Vec<String>,
}

impl Default for Redactor {
    fn default() -> Self {
        Self {
            keys: SECRET_KEYS.iter().map(|key| (*key).to_owned()).collect(),
            secrets: Vec::new(),
        }
    }
}

impl Redactor {
    /// Creates a redactor that knows the standard AWS credential keys.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a literal value, such as a generated password, that must
    /// never be logged. Empty values are ignored.
    pub fn register_secret(&mut self, secret: impl Into<String>) {
        let value = secret.into();
        if !value.is_empty() && !self.secrets.contains(&value) {
            self.secrets.push(value);
        }
    }

    /// Returns the loggable form of `text`.
    #[must_use]
    pub fn redact(&self, text: &str) -> String {
        let masked = self.mask_key_values(text);
        self.secrets
            .iter()
            .fold(masked, |acc, secret| acc.replace(secret.as_str(), MASK))
    }

    fn mask_key_values(&self, text: &str) -> String {
        let lowered = text.to_ascii_lowercase();
        let mut output = String::with_capacity(text.len());
        let mut cursor = 0;

        while let Some((key_start, key_len)) = self.next_key(&lowered, cursor) {
            let key_end = key_start + key_len;
            let after_key = skip_while(text, key_end, is_separator);
            let (value_start, value_end) = opening_quote(text, key_end, after_key).map_or_else(
                || (after_key, skip_while(text, after_key, |ch| !is_terminator(ch))),
                |quote| {
                    let start = after_key + quote.len_utf8();
                    (start, skip_while(text, start, |ch| ch != quote))
                },
            );
            output.push_str(text.get(cursor..value_start).unwrap_or_default());
            if value_end > value_start {
                output.push_str(MASK);
            }
            cursor = value_end;
        }
        output.push_str(text.get(cursor..).unwrap_or_default());
        output
    }

    fn next_key(&self, lowered: &str, from: usize) -> Option<(usize, usize)> {
        let haystack = lowered.get(from..)?;
        self.keys
            .iter()
            .filter_map(|key| haystack.find(key.as_str()).map(|at| (from + at, key.len())))
            .min_by_key(|(at, _)| *at)
    }
}

/// A quote directly after the separators opens a quoted value. A quote
/// touching the key closes the quoting around the key itself.
fn opening_quote(text: &str, key_end: usize, after_key: usize) -> Option<char> {
    if after_key == key_end {
        return None;
    }
    text.get(after_key..)
        .and_then(|rest| rest.chars().next())
        .filter(|ch| matches!(ch, '\'' | '"'))
}

const fn is_separator(ch: char) -> bool {
    matches!(ch, ' ' | '\t' | '=' | ':')
}

const fn is_terminator(ch: char) -> bool {
    ch.is_ascii_whitespace() || matches!(ch, '\'' | '"' | ';' | '&' | '|')
}

fn skip_while(text: &str, from: usize, keep: impl Fn(char) -> bool) -> usize {
    text.get(from..).map_or(from, |rest| {
        rest.char_indices()
            .find(|(_, ch)| !keep(*ch))
            .map_or(text.len(), |(offset, _)| from + offset)
    })
}
