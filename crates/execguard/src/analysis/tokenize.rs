//! Quote-aware shell splitting.
//!
//! The POSIX lexer understands single quotes, double quotes and backslash
//! escapes, splits top-level `&&`, `||` and `;` into chain parts and `|` into
//! pipeline segments, and refuses anything whose meaning depends on running
//! the shell: command or process substitution, redirections, subshells,
//! background jobs and multi-line input.

/// Tokens of one simple command plus its source text.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct RawSegment {
    pub raw: String,
    pub argv: Vec<String>,
}

/// Chain parts, each a pipeline of segments.
pub(crate) type RawChains = Vec<Vec<RawSegment>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Quote {
    None,
    Single,
    Double,
}

#[derive(Default)]
struct Lexer {
    chains: RawChains,
    pipeline: Vec<RawSegment>,
    segment: RawSegment,
    word: String,
    in_word: bool,
    /// Last control operator seen with nothing after it yet.
    pending: Option<&'static str>,
}

impl Lexer {
    fn push_raw(&mut self, ch: char) {
        self.segment.raw.push(ch);
    }

    fn push_char(&mut self, ch: char) {
        self.word.push(ch);
        self.in_word = true;
        self.pending = None;
    }

    fn open_quote(&mut self) {
        self.in_word = true;
        self.pending = None;
    }

    fn end_word(&mut self) {
        if self.in_word {
            self.segment.argv.push(std::mem::take(&mut self.word));
            self.in_word = false;
        }
    }

    fn end_segment(&mut self) -> Result<(), String> {
        self.end_word();
        let mut segment = std::mem::take(&mut self.segment);
        if segment.argv.is_empty() {
            return Err("empty command segment".to_string());
        }
        segment.raw = segment.raw.trim().to_string();
        self.pipeline.push(segment);
        Ok(())
    }

    fn end_chain(&mut self) -> Result<(), String> {
        self.end_segment()?;
        self.chains.push(std::mem::take(&mut self.pipeline));
        Ok(())
    }

    fn finish(mut self) -> Result<RawChains, String> {
        let trailing_empty = !self.in_word && self.segment.argv.is_empty();
        if trailing_empty && self.pipeline.is_empty() && !self.chains.is_empty() {
            // A single trailing `;` is harmless; a dangling `&&` or `||` is not.
            return match self.pending {
                Some(";") | None => Ok(self.chains),
                Some(op) => Err(format!("command ends with '{op}'")),
            };
        }
        self.end_chain()?;
        Ok(self.chains)
    }
}

/// Split a POSIX shell command into chains of pipelines of argv.
pub(crate) fn split_posix(command: &str) -> Result<RawChains, String> {
    let mut lexer = Lexer::default();
    let mut quote = Quote::None;
    let mut chars = command.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '\n' || ch == '\r' {
            return Err("multi-line commands are not supported".to_string());
        }
        match quote {
            Quote::Single => {
                lexer.push_raw(ch);
                if ch == '\'' {
                    quote = Quote::None;
                } else {
                    lexer.push_char(ch);
                }
            }
            Quote::Double => {
                lexer.push_raw(ch);
                match ch {
                    '"' => quote = Quote::None,
                    '`' => return Err("command substitution is not supported".to_string()),
                    '$' if chars.peek() == Some(&'(') => {
                        return Err("command substitution is not supported".to_string());
                    }
                    '\\' => match chars.next() {
                        Some(next @ ('$' | '`' | '"' | '\\')) => {
                            lexer.push_raw(next);
                            lexer.push_char(next);
                        }
                        Some('\n' | '\r') | None => {
                            return Err("unterminated escape in double quotes".to_string());
                        }
                        Some(next) => {
                            lexer.push_raw(next);
                            lexer.push_char('\\');
                            lexer.push_char(next);
                        }
                    },
                    other => lexer.push_char(other),
                }
            }
            Quote::None => {
                match ch {
                    ' ' | '\t' => {
                        lexer.push_raw(ch);
                        lexer.end_word();
                    }
                    '\'' => {
                        lexer.push_raw(ch);
                        lexer.open_quote();
                        quote = Quote::Single;
                    }
                    '"' => {
                        lexer.push_raw(ch);
                        lexer.open_quote();
                        quote = Quote::Double;
                    }
                    '\\' => {
                        let Some(next) = chars.next() else {
                            return Err("trailing backslash".to_string());
                        };
                        if next == '\n' || next == '\r' {
                            return Err("multi-line commands are not supported".to_string());
                        }
                        lexer.push_raw(ch);
                        lexer.push_raw(next);
                        lexer.push_char(next);
                    }
                    '&' => {
                        if chars.next_if_eq(&'&').is_none() {
                            return Err("background jobs and '&' redirection are not supported".to_string());
                        }
                        lexer.end_chain()?;
                        lexer.pending = Some("&&");
                    }
                    '|' => {
                        if chars.next_if_eq(&'|').is_some() {
                            lexer.end_chain()?;
                            lexer.pending = Some("||");
                        } else if chars.peek() == Some(&'&') {
                            return Err("'|&' is not supported".to_string());
                        } else {
                            lexer.end_segment()?;
                        }
                    }
                    ';' => {
                        lexer.end_chain()?;
                        lexer.pending = Some(";");
                    }
                    '>' | '<' => return Err("redirections are not supported".to_string()),
                    '`' => return Err("command substitution is not supported".to_string()),
                    '(' | ')' => return Err("subshells are not supported".to_string()),
                    '$' if chars.peek() == Some(&'(') => {
                        return Err("command substitution is not supported".to_string());
                    }
                    '#' if !lexer.in_word => break,
                    other => {
                        lexer.push_raw(other);
                        lexer.push_char(other);
                    }
                }
            }
        }
    }

    if quote != Quote::None {
        return Err("unmatched quote".to_string());
    }
    lexer.finish()
}

/// Characters `cmd.exe` interprets outside quotes.
const WINDOWS_METACHARS: &[char] = &['&', '|', '<', '>', '^', '(', ')', '%', '!'];

/// Tokenize a Windows command line as one segment.
///
/// Only double quotes group; `%` and `!` expansion is refused everywhere
/// because `cmd.exe` expands them inside quotes too.
pub(crate) fn split_windows(command: &str) -> Result<RawChains, String> {
    let mut segment = RawSegment {
        raw: command.trim().to_string(),
        argv: Vec::new(),
    };
    let mut word = String::new();
    let mut in_word = false;
    let mut in_quotes = false;

    for ch in command.chars() {
        if ch == '\n' || ch == '\r' {
            return Err("multi-line commands are not supported".to_string());
        }
        if ch == '"' {
            in_quotes = !in_quotes;
            in_word = true;
            continue;
        }
        if ch == '%' || ch == '!' {
            return Err(format!("'{ch}' expansion is not supported"));
        }
        if in_quotes {
            word.push(ch);
            continue;
        }
        if WINDOWS_METACHARS.contains(&ch) {
            return Err(format!("'{ch}' is not supported in Windows commands"));
        }
        if ch == ' ' || ch == '\t' {
            if in_word {
                segment.argv.push(std::mem::take(&mut word));
                in_word = false;
            }
            continue;
        }
        word.push(ch);
        in_word = true;
    }

    if in_quotes {
        return Err("unmatched quote".to_string());
    }
    if in_word {
        segment.argv.push(word);
    }
    if segment.argv.is_empty() {
        return Err("empty command".to_string());
    }
    Ok(vec![vec![segment]])
}
