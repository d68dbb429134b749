// src/bash/dump.rs

//! Parser for `declare -p` / `declare -f` output
//!
//! Bash prints one variable per line (`declare -- name="value"`,
//! `declare -a name=([0]="v")`, `declare -A name=([k]="v" )`) followed
//! by pretty-printed function definitions. Values containing special
//! characters use ANSI-C `$'...'` quoting, so a declaration never
//! spans lines; function bodies do, and are closed by a `}` in column
//! zero.

use super::{Functions, Value, Variables};
use crate::error::{Error, Result};
use std::collections::BTreeMap;

/// Parse the combined `declare -p` + `declare -f` dump.
pub fn parse_declarations(dump: &str) -> Result<(Variables, Functions)> {
    let mut variables = Variables::new();
    let mut functions = Functions::new();

    let mut lines = dump.lines();

    while let Some(line) = lines.next() {
        let trimmed = line.trim_end();
        if trimmed.is_empty() {
            continue;
        }

        if let Some(rest) = trimmed.strip_prefix("declare ") {
            let (name, value) = parse_variable(rest)?;
            if let Some(value) = value {
                variables.insert(name, value);
            }
            continue;
        }

        // Function header: `name () `, sometimes `function name () `
        let header = trimmed.strip_prefix("function ").unwrap_or(trimmed);
        if let Some(name) = header.strip_suffix("()").map(str::trim_end) {
            if !name.is_empty() && !name.contains(char::is_whitespace) {
                let brace = lines.next().map(str::trim_end);
                if brace != Some("{") {
                    return Err(unparseable(trimmed));
                }

                let mut body_lines = Vec::new();
                loop {
                    match lines.next() {
                        Some(l) if l.trim_end() == "}" => break,
                        Some(body_line) => body_lines.push(body_line),
                        None => return Err(unparseable(trimmed)),
                    }
                }

                functions.insert(name.to_string(), body_lines.join("\n"));
                continue;
            }
        }

        return Err(unparseable(trimmed));
    }

    Ok((variables, functions))
}

fn unparseable(line: &str) -> Error {
    Error::ShellEvaluation(format!("unparseable declaration: {}", line))
}

/// Parse one `declare` line after the `declare ` prefix.
///
/// Returns `None` for declared-but-unset variables and for name
/// references (`declare -n`), which recipes have no use for.
fn parse_variable(rest: &str) -> Result<(String, Option<Value>)> {
    let (flags, decl) = rest
        .split_once(' ')
        .ok_or_else(|| unparseable(rest))?;

    let (name, assigned) = match decl.split_once('=') {
        Some((name, value)) => (name, Some(value)),
        None => (decl, None),
    };

    if !is_identifier(name) {
        return Err(unparseable(rest));
    }

    let Some(assigned) = assigned else {
        return Ok((name.to_string(), None));
    };

    if flags.contains('n') {
        return Ok((name.to_string(), None));
    }

    let chars: Vec<char> = assigned.chars().collect();
    let mut pos = 0;

    let value = if flags.contains('A') {
        let entries = parse_array_body(&chars, &mut pos)?;
        Value::Assoc(entries.into_iter().collect::<BTreeMap<_, _>>())
    } else if flags.contains('a') {
        let entries = parse_array_body(&chars, &mut pos)?;
        Value::Indexed(entries.into_iter().map(|(_, v)| v).collect())
    } else {
        Value::Scalar(parse_word(&chars, &mut pos)?)
    };

    Ok((name.to_string(), Some(value)))
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Parse `([key]=value [key]=value )` into ordered entries.
fn parse_array_body(chars: &[char], pos: &mut usize) -> Result<Vec<(String, String)>> {
    expect(chars, pos, '(')?;
    let mut entries = Vec::new();

    loop {
        skip_spaces(chars, pos);
        match chars.get(*pos) {
            Some(')') => {
                *pos += 1;
                break;
            }
            Some('[') => {
                *pos += 1;
                let key = parse_word(chars, pos)?;
                expect(chars, pos, ']')?;
                expect(chars, pos, '=')?;
                let value = parse_word(chars, pos)?;
                entries.push((key, value));
            }
            _ => return Err(Error::ShellEvaluation("malformed array entry".to_string())),
        }
    }

    Ok(entries)
}

/// Parse one possibly-quoted word at the cursor.
fn parse_word(chars: &[char], pos: &mut usize) -> Result<String> {
    match chars.get(*pos) {
        Some('"') => parse_double_quoted(chars, pos),
        Some('\'') => parse_single_quoted(chars, pos),
        Some('$') if chars.get(*pos + 1) == Some(&'\'') => parse_ansi_quoted(chars, pos),
        _ => {
            let mut out = String::new();
            while let Some(&c) = chars.get(*pos) {
                if c == ' ' || c == ')' || c == ']' {
                    break;
                }
                out.push(c);
                *pos += 1;
            }
            Ok(out)
        }
    }
}

/// `"..."` with backslash escaping of `"` `\` `$` and backtick.
fn parse_double_quoted(chars: &[char], pos: &mut usize) -> Result<String> {
    expect(chars, pos, '"')?;
    let mut out = String::new();

    loop {
        match chars.get(*pos) {
            Some('"') => {
                *pos += 1;
                return Ok(out);
            }
            Some('\\') => {
                *pos += 1;
                match chars.get(*pos) {
                    Some(&c @ ('"' | '\\' | '$' | '`')) => {
                        out.push(c);
                        *pos += 1;
                    }
                    Some(&c) => {
                        out.push('\\');
                        out.push(c);
                        *pos += 1;
                    }
                    None => return Err(unterminated()),
                }
            }
            Some(&c) => {
                out.push(c);
                *pos += 1;
            }
            None => return Err(unterminated()),
        }
    }
}

/// `'...'` — no escapes inside.
fn parse_single_quoted(chars: &[char], pos: &mut usize) -> Result<String> {
    expect(chars, pos, '\'')?;
    let mut out = String::new();

    loop {
        match chars.get(*pos) {
            Some('\'') => {
                *pos += 1;
                return Ok(out);
            }
            Some(&c) => {
                out.push(c);
                *pos += 1;
            }
            None => return Err(unterminated()),
        }
    }
}

/// ANSI-C `$'...'` quoting, used by bash for control characters.
fn parse_ansi_quoted(chars: &[char], pos: &mut usize) -> Result<String> {
    expect(chars, pos, '$')?;
    expect(chars, pos, '\'')?;
    let mut out = String::new();

    loop {
        match chars.get(*pos) {
            Some('\'') => {
                *pos += 1;
                return Ok(out);
            }
            Some('\\') => {
                *pos += 1;
                let escape = chars.get(*pos).ok_or_else(unterminated)?;
                *pos += 1;
                match escape {
                    'n' => out.push('\n'),
                    't' => out.push('\t'),
                    'r' => out.push('\r'),
                    'a' => out.push('\x07'),
                    'b' => out.push('\x08'),
                    'e' | 'E' => out.push('\x1b'),
                    'f' => out.push('\x0c'),
                    'v' => out.push('\x0b'),
                    '\\' => out.push('\\'),
                    '\'' => out.push('\''),
                    '"' => out.push('"'),
                    '?' => out.push('?'),
                    'x' => {
                        let mut code = 0u32;
                        let mut digits = 0;
                        while digits < 2 {
                            match chars.get(*pos).and_then(|c| c.to_digit(16)) {
                                Some(d) => {
                                    code = code * 16 + d;
                                    *pos += 1;
                                    digits += 1;
                                }
                                None => break,
                            }
                        }
                        if digits == 0 {
                            return Err(Error::ShellEvaluation(
                                "empty \\x escape in ANSI-C string".to_string(),
                            ));
                        }
                        out.push(char::from_u32(code).unwrap_or('\u{fffd}'));
                    }
                    '0'..='7' => {
                        let mut code = escape.to_digit(8).unwrap_or(0);
                        let mut digits = 1;
                        while digits < 3 {
                            match chars.get(*pos).and_then(|c| c.to_digit(8)) {
                                Some(d) => {
                                    code = code * 8 + d;
                                    *pos += 1;
                                    digits += 1;
                                }
                                None => break,
                            }
                        }
                        out.push(char::from_u32(code).unwrap_or('\u{fffd}'));
                    }
                    other => {
                        out.push('\\');
                        out.push(*other);
                    }
                }
            }
            Some(&c) => {
                out.push(c);
                *pos += 1;
            }
            None => return Err(unterminated()),
        }
    }
}

fn unterminated() -> Error {
    Error::ShellEvaluation("unterminated quoted string".to_string())
}

fn expect(chars: &[char], pos: &mut usize, want: char) -> Result<()> {
    if chars.get(*pos) == Some(&want) {
        *pos += 1;
        Ok(())
    } else {
        Err(Error::ShellEvaluation(format!(
            "expected '{}' at offset {}",
            want, pos
        )))
    }
}

fn skip_spaces(chars: &[char], pos: &mut usize) {
    while chars.get(*pos) == Some(&' ') {
        *pos += 1;
    }
}
