//! A minimal command language for ranks that have no embedded interpreter.
//!
//! Commands are separated by newlines or `;`. Words are split on whitespace;
//! `{...}` groups a word literally, `"..."` groups it with substitution and
//! `$name` substitutes a variable. Lines starting with `#` are comments.

use super::{ScriptEngine, ScriptError};
use crate::transport::Rank;
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct MiniInterp {
    /// Global variables.
    vars: HashMap<String, String>,
    /// Every line written by `puts`.
    output: Vec<String>,
    /// Set by `exit`; stops further evaluation.
    exit_code: Option<i32>,
    /// Whether `puts` also prints to stdout.
    echo: bool,
}

impl MiniInterp {
    pub fn new() -> Self {
        Self::default()
    }

    /// An interpreter whose `puts` also writes to stdout.
    pub fn with_stdout() -> Self {
        Self {
            echo: true,
            ..Self::default()
        }
    }

    pub fn var(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    /// Lines written by `puts`, oldest first.
    pub fn output(&self) -> &[String] {
        &self.output
    }

    fn run(&mut self, script: &str) -> Result<String, ScriptError> {
        let mut result = String::new();
        for command in split_commands(script)? {
            if self.exit_code.is_some() {
                break;
            }
            let words = self.split_words(&command)?;
            if words.is_empty() {
                continue;
            }
            result = self.execute(&words)?;
        }
        Ok(result)
    }

    fn execute(&mut self, words: &[String]) -> Result<String, ScriptError> {
        let args = &words[1..];
        match words[0].as_str() {
            "set" => match args {
                [name] => self
                    .vars
                    .get(name)
                    .cloned()
                    .ok_or_else(|| ScriptError::NoSuchVariable(name.clone())),
                [name, value] => {
                    self.vars.insert(name.clone(), value.clone());
                    Ok(value.clone())
                }
                _ => Err(ScriptError::WrongArgs("set varName ?newValue?")),
            },
            "unset" => {
                if args.is_empty() {
                    return Err(ScriptError::WrongArgs("unset varName ?varName ...?"));
                }
                for name in args {
                    self.vars
                        .remove(name)
                        .ok_or_else(|| ScriptError::NoSuchVariable(name.clone()))?;
                }
                Ok(String::new())
            }
            "incr" => {
                let (name, by) = match args {
                    [name] => (name, 1),
                    [name, by] => (name, parse_int(by)?),
                    _ => return Err(ScriptError::WrongArgs("incr varName ?increment?")),
                };
                let current = match self.vars.get(name) {
                    Some(value) => parse_int(value)?,
                    None => 0,
                };
                let value = (current + by).to_string();
                self.vars.insert(name.clone(), value.clone());
                Ok(value)
            }
            "append" => {
                let (name, values) = args
                    .split_first()
                    .ok_or(ScriptError::WrongArgs("append varName ?value ...?"))?;
                let entry = self.vars.entry(name.clone()).or_default();
                for value in values {
                    entry.push_str(value);
                }
                Ok(entry.clone())
            }
            "lappend" => {
                let (name, items) = args
                    .split_first()
                    .ok_or(ScriptError::WrongArgs("lappend varName ?value ...?"))?;
                let entry = self.vars.entry(name.clone()).or_default();
                for item in items {
                    if !entry.is_empty() {
                        entry.push(' ');
                    }
                    entry.push_str(&list_element(item));
                }
                Ok(entry.clone())
            }
            "puts" => {
                let line = args.join(" ");
                if self.echo {
                    println!("{}", line);
                }
                self.output.push(line);
                Ok(String::new())
            }
            "exit" => {
                let code = match args {
                    [] => 0,
                    [code] => i32::try_from(parse_int(code)?)
                        .map_err(|_| ScriptError::NotAnInteger(code.clone()))?,
                    _ => return Err(ScriptError::WrongArgs("exit ?returnCode?")),
                };
                self.exit_code = Some(code);
                Ok(String::new())
            }
            other => Err(ScriptError::UnknownCommand(other.to_string())),
        }
    }

    fn split_words(&self, command: &str) -> Result<Vec<String>, ScriptError> {
        tokenize(command)?
            .into_iter()
            .map(|word| match word {
                Word::Literal(text) => Ok(text),
                Word::Substituted(raw) => self.substitute(&raw),
            })
            .collect()
    }

    fn substitute(&self, raw: &str) -> Result<String, ScriptError> {
        let mut out = String::with_capacity(raw.len());
        let mut chars = raw.chars().peekable();
        while let Some(c) = chars.next() {
            if c != '$' {
                out.push(c);
                continue;
            }
            let mut name = String::new();
            while let Some(&next) = chars.peek() {
                if next.is_alphanumeric() || next == '_' {
                    name.push(next);
                    chars.next();
                } else {
                    break;
                }
            }
            if name.is_empty() {
                out.push('$');
            } else {
                let value = self
                    .vars
                    .get(&name)
                    .ok_or(ScriptError::NoSuchVariable(name))?;
                out.push_str(value);
            }
        }
        Ok(out)
    }
}

impl ScriptEngine for MiniInterp {
    fn eval_global(&mut self, script: &str) -> Result<String, ScriptError> {
        self.run(script)
    }

    fn call_handler(
        &mut self,
        handler: &str,
        source: Rank,
        data: &str,
    ) -> Result<String, ScriptError> {
        let mut words = self.split_words(handler)?;
        if words.is_empty() {
            return Ok(String::new());
        }
        words.push(source.to_string());
        words.push(data.to_string());
        self.execute(&words)
    }

    fn exit_requested(&self) -> Option<i32> {
        self.exit_code
    }
}

enum Word {
    Literal(String),
    Substituted(String),
}

fn tokenize(command: &str) -> Result<Vec<Word>, ScriptError> {
    let chars: Vec<char> = command.chars().collect();
    let mut words = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        if chars[i].is_whitespace() {
            i += 1;
            continue;
        }
        match chars[i] {
            '{' => {
                let end = matching_brace(&chars, i)?;
                words.push(Word::Literal(chars[i + 1..end].iter().collect()));
                i = end + 1;
            }
            '"' => {
                let end = chars[i + 1..]
                    .iter()
                    .position(|&c| c == '"')
                    .map(|offset| i + 1 + offset)
                    .ok_or_else(|| ScriptError::Parse("missing \"".to_string()))?;
                words.push(Word::Substituted(chars[i + 1..end].iter().collect()));
                i = end + 1;
            }
            _ => {
                let start = i;
                while i < chars.len() && !chars[i].is_whitespace() {
                    i += 1;
                }
                words.push(Word::Substituted(chars[start..i].iter().collect()));
            }
        }
    }
    Ok(words)
}

/// Split `text` into words using brace and quote grouping, without any
/// variable substitution.
pub fn split_list(text: &str) -> Result<Vec<String>, ScriptError> {
    Ok(tokenize(text)?
        .into_iter()
        .map(|word| match word {
            Word::Literal(text) | Word::Substituted(text) => text,
        })
        .collect())
}

fn parse_int(text: &str) -> Result<i64, ScriptError> {
    text.trim()
        .parse()
        .map_err(|_| ScriptError::NotAnInteger(text.to_string()))
}

/// Quote `item` so it survives as one list element.
fn list_element(item: &str) -> String {
    if item.is_empty() || item.chars().any(|c| c.is_whitespace() || c == ';') {
        format!("{{{}}}", item)
    } else {
        item.to_string()
    }
}

fn matching_brace(chars: &[char], open: usize) -> Result<usize, ScriptError> {
    let mut depth = 0;
    for (i, &c) in chars.iter().enumerate().skip(open) {
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Ok(i);
                }
            }
            _ => {}
        }
    }
    Err(ScriptError::Parse("missing close-brace".to_string()))
}

/// Split a script into commands at newlines and `;` outside braces and quotes.
fn split_commands(script: &str) -> Result<Vec<String>, ScriptError> {
    let mut commands = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut quoted = false;

    for c in script.chars() {
        match c {
            '{' if !quoted => depth += 1,
            '}' if !quoted => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| ScriptError::Parse("unexpected close-brace".to_string()))?;
            }
            '"' if depth == 0 => quoted = !quoted,
            '\n' | ';' if depth == 0 && !quoted => {
                commands.push(std::mem::take(&mut current));
                continue;
            }
            _ => {}
        }
        current.push(c);
    }
    if depth != 0 {
        return Err(ScriptError::Parse("missing close-brace".to_string()));
    }
    if quoted {
        return Err(ScriptError::Parse("missing \"".to_string()));
    }
    commands.push(current);

    Ok(commands
        .into_iter()
        .filter(|command| {
            let trimmed = command.trim();
            !trimmed.is_empty() && !trimmed.starts_with('#')
        })
        .collect())
}
