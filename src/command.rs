//! Replay-command tokenization and flag rewriting.
//!
//! A replay command arrives as one line of report text. Downstream
//! invocation hands the subprocess an argument array directly (no shell),
//! so quoting has to be resolved here: double-quoted substrings become
//! single tokens with the quotes stripped. Model-parameter strings like
//! `"GTR{1,2}+FU{0.1,0.2}"` depend on this, and some tool versions quote
//! strings with interior spaces.

/// Split a command line into tokens on unquoted whitespace.
///
/// Double-quoted substrings stay together as one token, quotes stripped;
/// an empty quoted string yields an empty token. An unterminated quote
/// runs to the end of the line.
pub fn tokenize(command: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut had_quotes = false;

    for ch in command.chars() {
        if ch == '"' {
            in_quotes = !in_quotes;
            had_quotes = true;
        } else if ch.is_whitespace() && !in_quotes {
            if !current.is_empty() || had_quotes {
                tokens.push(std::mem::take(&mut current));
            }
            had_quotes = false;
        } else {
            current.push(ch);
        }
    }
    if !current.is_empty() || had_quotes {
        tokens.push(current);
    }
    tokens
}

/// Copy `tokens` with `flag`'s value replaced, or the flag (and value)
/// appended when the flag is absent.
///
/// With `flag_only` the flag carries no value: an existing occurrence
/// makes this a no-op, an absent one appends just the flag. Only the first
/// occurrence of `flag` is rewritten. A flag sitting at the very end of
/// the input with nothing after it is malformed; the new value is appended
/// rather than indexing past the end.
pub fn replace_or_append(
    tokens: &[String],
    flag: &str,
    new_value: &str,
    flag_only: bool,
) -> Vec<String> {
    let mut out = tokens.to_vec();
    match out.iter().position(|t| t == flag) {
        Some(_) if flag_only => out,
        Some(i) if i + 1 < out.len() => {
            out[i + 1] = new_value.to_string();
            out
        }
        Some(_) => {
            out.push(new_value.to_string());
            out
        }
        None => {
            out.push(flag.to_string());
            if !flag_only {
                out.push(new_value.to_string());
            }
            out
        }
    }
}
