//! Structural command authorization.
//!
//! Candidates are split into segments at shell control operators, each segment
//! is tokenized with shell-word rules, and patterns are compared against the
//! parsed program name and arguments rather than the raw text. `rm -rf`
//! therefore matches `rm -fr /` and `/bin/rm -r -f x`, but not `firm -rf` or
//! `echo 'rm -rf'`.

use anyhow::{bail, Context, Result};
use regex::Regex;
use std::collections::BTreeSet;

const MAX_SHELL_DEPTH: usize = 4;
const REGEX_PREFIX: &str = "re:";
const SHELLS: &[&str] = &["sh", "bash", "zsh", "dash", "ksh", "ash"];
const RESERVED_WORDS: &[&str] = &["!", "if", "then", "else", "elif", "do", "while", "until"];

/// A command that runs its arguments as another command.
struct Wrapper {
    name: &'static str,
    /// Options that consume the following token.
    value_options: &'static [&'static str],
    /// Positional arguments to skip before the wrapped command.
    positional: usize,
}

const WRAPPERS: &[Wrapper] = &[
    Wrapper {
        name: "sudo",
        value_options: &["-u", "-g", "-C", "-D", "-h", "-p", "-r", "-t", "-U"],
        positional: 0,
    },
    Wrapper {
        name: "doas",
        value_options: &["-u", "-C"],
        positional: 0,
    },
    Wrapper {
        name: "env",
        value_options: &["-u", "-C"],
        positional: 0,
    },
    Wrapper {
        name: "nohup",
        value_options: &[],
        positional: 0,
    },
    Wrapper {
        name: "time",
        value_options: &["-f", "-o"],
        positional: 0,
    },
    Wrapper {
        name: "nice",
        value_options: &["-n"],
        positional: 0,
    },
    Wrapper {
        name: "ionice",
        value_options: &["-c", "-n"],
        positional: 0,
    },
    Wrapper {
        name: "command",
        value_options: &[],
        positional: 0,
    },
    Wrapper {
        name: "exec",
        value_options: &["-a"],
        positional: 0,
    },
    Wrapper {
        name: "xargs",
        value_options: &["-I", "-n", "-P", "-L", "-s", "-d", "-E", "-a"],
        positional: 0,
    },
    Wrapper {
        name: "timeout",
        value_options: &["-s", "-k"],
        positional: 1,
    },
    Wrapper {
        name: "stdbuf",
        value_options: &["-i", "-o", "-e"],
        positional: 0,
    },
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandDecision {
    Permit,
    Reject { reason: String },
}

impl CommandDecision {
    pub fn is_permitted(&self) -> bool {
        matches!(self, CommandDecision::Permit)
    }
}

/// One command after tokenization.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ParsedCommand {
    program: String,
    args: Vec<String>,
    short_flags: BTreeSet<char>,
    long_flags: BTreeSet<String>,
    operands: Vec<String>,
    text: String,
}

impl ParsedCommand {
    fn from_tokens(tokens: &[String]) -> Option<Self> {
        let (first, rest) = tokens.split_first()?;
        let mut short_flags = BTreeSet::new();
        let mut long_flags = BTreeSet::new();
        let mut operands = Vec::new();
        let mut options_done = false;

        for arg in rest {
            if options_done {
                operands.push(arg.clone());
            } else if arg == "--" {
                options_done = true;
            } else if let Some(long) = arg.strip_prefix("--") {
                let name = long.split('=').next().unwrap_or(long);
                long_flags.insert(format!("--{}", name));
            } else if arg.len() > 1 && arg.starts_with('-') {
                short_flags.extend(arg.chars().skip(1));
            } else {
                operands.push(arg.clone());
            }
        }

        Some(Self {
            program: basename(first).to_string(),
            args: rest.to_vec(),
            short_flags,
            long_flags,
            operands,
            text: tokens.join(" "),
        })
    }
}

/// A command as seen through each layer of wrappers, outermost first.
#[derive(Debug, Clone)]
struct Invocation {
    views: Vec<ParsedCommand>,
}

impl Invocation {
    fn innermost(&self) -> Option<&ParsedCommand> {
        self.views.last()
    }
}

#[derive(Debug, Clone)]
enum Matcher {
    Structural(ParsedCommand),
    Regex(Regex),
}

#[derive(Debug, Clone)]
pub struct CommandPattern {
    source: String,
    matcher: Matcher,
}

impl CommandPattern {
    pub fn parse(source: &str) -> Result<Self> {
        let trimmed = source.trim();
        if let Some(expr) = trimmed.strip_prefix(REGEX_PREFIX) {
            let regex = Regex::new(expr)
                .with_context(|| format!("Invalid regex pattern: {}", expr))?;
            return Ok(Self {
                source: trimmed.to_string(),
                matcher: Matcher::Regex(regex),
            });
        }

        let tokens = match shlex::split(trimmed) {
            Some(tokens) => tokens,
            None => bail!("Unbalanced quotes in command pattern: {}", trimmed),
        };
        let Some(parsed) = ParsedCommand::from_tokens(&tokens) else {
            bail!("Command pattern is empty");
        };
        Ok(Self {
            source: trimmed.to_string(),
            matcher: Matcher::Structural(parsed),
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    fn matches(&self, command: &ParsedCommand) -> bool {
        match &self.matcher {
            Matcher::Regex(regex) => regex.is_match(&command.text),
            Matcher::Structural(pattern) => {
                pattern.program == command.program
                    && pattern.short_flags.is_subset(&command.short_flags)
                    && pattern.long_flags.is_subset(&command.long_flags)
                    && pattern
                        .operands
                        .iter()
                        .all(|operand| command.operands.contains(operand))
            }
        }
    }
}

/// Whitelist/blacklist evaluator for shell-like command text.
#[derive(Debug, Clone, Default)]
pub struct CommandGuard {
    whitelist: Vec<CommandPattern>,
    blacklist: Vec<CommandPattern>,
}

impl CommandGuard {
    pub fn compile(whitelist: &[String], blacklist: &[String]) -> Result<Self> {
        let compile_all = |patterns: &[String]| -> Result<Vec<CommandPattern>> {
            patterns
                .iter()
                .filter(|p| !p.trim().is_empty())
                .map(|p| {
                    CommandPattern::parse(p)
                        .with_context(|| format!("Failed to compile command pattern: {}", p))
                })
                .collect()
        };
        Ok(Self {
            whitelist: compile_all(whitelist)?,
            blacklist: compile_all(blacklist)?,
        })
    }

    pub fn whitelist_len(&self) -> usize {
        self.whitelist.len()
    }

    pub fn blacklist_len(&self) -> usize {
        self.blacklist.len()
    }

    /// Decide whether shell-like command text may run.
    pub fn authorize(&self, candidate: &str) -> CommandDecision {
        let decision = parse_script(candidate, 0).and_then(|invocations| self.evaluate(&invocations));
        self.finish(candidate, decision)
    }

    /// Decide whether an already split argv may run. Used for commands that
    /// are spawned directly rather than through a shell.
    pub fn authorize_argv(&self, argv: &[String]) -> CommandDecision {
        let mut invocations = Vec::new();
        let decision = collect_invocations(argv.to_vec(), 0, &mut invocations)
            .and_then(|_| self.evaluate(&invocations));
        self.finish(&argv.join(" "), decision)
    }

    /// Blacklisted pattern matched by `text`, if any. Whitelisting is not
    /// applied; used for strings that may end up in a shell without being
    /// a complete command themselves. Text the shell parser refuses is
    /// matched as plain whitespace-separated words.
    pub fn blacklisted(&self, text: &str) -> Option<String> {
        let invocations = parse_script(text, 0).or_else(|_| {
            let mut invocations = Vec::new();
            let words = text.split_whitespace().map(str::to_string).collect();
            collect_invocations(words, 0, &mut invocations).map(|_| invocations)
        });
        self.check_blacklist(&invocations.ok()?).err()
    }

    fn finish(&self, candidate: &str, decision: Result<(), String>) -> CommandDecision {
        match decision {
            Ok(()) => {
                tracing::debug!("✅ Command permitted: {}", crate::logging::log_preview(candidate));
                CommandDecision::Permit
            }
            Err(reason) => {
                tracing::info!(
                    "🚫 Command rejected: {} ({})",
                    crate::logging::log_preview(candidate),
                    reason
                );
                CommandDecision::Reject { reason }
            }
        }
    }

    fn evaluate(&self, invocations: &[Invocation]) -> Result<(), String> {
        if invocations.is_empty() {
            return Err("empty command".to_string());
        }

        // Blacklist always wins
        self.check_blacklist(invocations)?;

        if self.whitelist.is_empty() {
            return Ok(());
        }

        for invocation in invocations {
            let Some(command) = invocation.innermost() else {
                continue;
            };
            if !self.whitelist.iter().any(|p| p.matches(command)) {
                return Err(format!("'{}' is not in the command whitelist", command.program));
            }
        }
        Ok(())
    }

    /// Every wrapper layer of every invocation is matched.
    fn check_blacklist(&self, invocations: &[Invocation]) -> Result<(), String> {
        for invocation in invocations {
            for view in &invocation.views {
                if let Some(pattern) = self.blacklist.iter().find(|p| p.matches(view)) {
                    return Err(format!("matches blacklisted pattern '{}'", pattern.source()));
                }
            }
        }
        Ok(())
    }
}

/// Argv of `text` when it is a single command that needs no shell to run:
/// one segment, no redirections, balanced quotes.
pub fn single_command_argv(text: &str) -> Option<Vec<String>> {
    let segments = split_segments(text).ok()?;
    let [segment] = segments.as_slice() else {
        return None;
    };
    if has_unquoted(segment, &['<', '>']) {
        return None;
    }
    shlex::split(segment).filter(|argv| !argv.is_empty())
}

fn has_unquoted(text: &str, needles: &[char]) -> bool {
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for c in text.chars() {
        if escaped {
            escaped = false;
            continue;
        }
        match (quote, c) {
            (Some('\''), '\'') => quote = None,
            (Some('\''), _) => {}
            (_, '\\') => escaped = true,
            (Some(_), '"') => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(c),
            (None, _) if needles.contains(&c) => return true,
            (None, _) => {}
        }
    }
    false
}

fn parse_script(script: &str, depth: usize) -> Result<Vec<Invocation>, String> {
    if depth > MAX_SHELL_DEPTH {
        return Err("shell nesting is too deep".to_string());
    }

    let mut invocations = Vec::new();
    for segment in split_segments(script)? {
        let tokens = shlex::split(&segment).ok_or_else(|| "unbalanced quotes".to_string())?;
        collect_invocations(tokens, depth, &mut invocations)?;
    }
    Ok(invocations)
}

/// Expand one segment into its invocation, plus any commands it runs
/// indirectly (`sh -c`, `eval`, `find -exec`).
fn collect_invocations(
    tokens: Vec<String>,
    depth: usize,
    out: &mut Vec<Invocation>,
) -> Result<(), String> {
    let views = expand_views(tokens);
    let nested = views.last().map(nested_commands).unwrap_or_default();
    if !views.is_empty() {
        out.push(Invocation { views });
    }

    for nested in nested {
        match nested {
            Nested::Script(script) => out.extend(parse_script(&script, depth + 1)?),
            Nested::Argv(argv) => {
                if depth + 1 > MAX_SHELL_DEPTH {
                    return Err("shell nesting is too deep".to_string());
                }
                collect_invocations(argv, depth + 1, out)?;
            }
        }
    }
    Ok(())
}

enum Nested {
    Script(String),
    Argv(Vec<String>),
}

fn nested_commands(command: &ParsedCommand) -> Vec<Nested> {
    let program = command.program.as_str();
    if SHELLS.contains(&program) {
        let mut args = command.args.iter();
        while let Some(arg) = args.next() {
            let is_command_flag =
                arg.starts_with('-') && !arg.starts_with("--") && arg.chars().skip(1).any(|c| c == 'c');
            if is_command_flag {
                return args
                    .find(|a| !a.starts_with('-'))
                    .map(|script| vec![Nested::Script(script.clone())])
                    .unwrap_or_default();
            }
        }
        return Vec::new();
    }

    if program == "eval" && !command.args.is_empty() {
        return vec![Nested::Script(command.args.join(" "))];
    }

    if program == "find" {
        let mut found = Vec::new();
        let mut args = command.args.iter();
        while let Some(arg) = args.next() {
            if matches!(arg.as_str(), "-exec" | "-execdir" | "-ok" | "-okdir") {
                let argv: Vec<String> = args
                    .by_ref()
                    .take_while(|a| a.as_str() != ";" && a.as_str() != "+")
                    .cloned()
                    .collect();
                if !argv.is_empty() {
                    found.push(Nested::Argv(argv));
                }
            }
        }
        return found;
    }

    Vec::new()
}

fn expand_views(mut tokens: Vec<String>) -> Vec<ParsedCommand> {
    let mut views = Vec::new();
    loop {
        strip_noise(&mut tokens);
        let Some(first) = tokens.first().cloned() else {
            break;
        };

        // A quoted program name such as env -S 'rm -rf /'
        if first.chars().any(char::is_whitespace) {
            if let Some(inner) = shlex::split(&first) {
                if inner.len() > 1 {
                    tokens.splice(0..1, inner);
                    continue;
                }
            }
        }

        let Some(view) = ParsedCommand::from_tokens(&tokens) else {
            break;
        };
        views.push(view);

        match WRAPPERS.iter().find(|w| w.name == basename(&first)) {
            Some(wrapper) => strip_wrapper(&mut tokens, wrapper),
            None => break,
        }
    }
    views
}

fn strip_wrapper(tokens: &mut Vec<String>, wrapper: &Wrapper) {
    let mut index = 1;
    while let Some(token) = tokens.get(index) {
        if token == "--" {
            index += 1;
            break;
        }
        if !(token.len() > 1 && token.starts_with('-')) {
            break;
        }
        index += if wrapper.value_options.contains(&token.as_str()) {
            2
        } else {
            1
        };
    }
    index += wrapper.positional;
    tokens.drain(..index.min(tokens.len()));
}

/// Drop assignments, reserved words and grouping characters around a command.
fn strip_noise(tokens: &mut Vec<String>) {
    loop {
        let Some(first) = tokens.first_mut() else {
            return;
        };
        if is_assignment(first) || RESERVED_WORDS.contains(&first.as_str()) {
            tokens.remove(0);
            continue;
        }
        let kept = first.trim_start_matches(['(', '{']).len();
        if kept == 0 {
            tokens.remove(0);
            continue;
        }
        let cut = first.len() - kept;
        first.drain(..cut);
        break;
    }
    while tokens
        .last()
        .is_some_and(|t| !t.is_empty() && t.chars().all(|c| c == ')' || c == '}'))
    {
        tokens.pop();
    }
}

fn is_assignment(token: &str) -> bool {
    let Some((name, _)) = token.split_once('=') else {
        return false;
    };
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn basename(program: &str) -> &str {
    program.rsplit('/').next().unwrap_or(program)
}

/// Split at `;`, `|`, `&` and newlines outside quotes. Redirections such as
/// `2>&1` and `&>file` stay inside their segment.
fn split_segments(input: &str) -> Result<Vec<String>, String> {
    const SUBSTITUTION: &str = "command substitution is not allowed";

    let chars: Vec<char> = input.chars().collect();
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut i = 0;

    let flush = |current: &mut String, segments: &mut Vec<String>| {
        let trimmed = current.trim();
        if !trimmed.is_empty() {
            segments.push(trimmed.to_string());
        }
        current.clear();
    };

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        match quote {
            Some('\'') => {
                current.push(c);
                if c == '\'' {
                    quote = None;
                }
            }
            Some(_) => {
                current.push(c);
                match c {
                    '\\' => {
                        if let Some(escaped) = next {
                            current.push(escaped);
                            i += 1;
                        }
                    }
                    '"' => quote = None,
                    '`' => return Err(SUBSTITUTION.to_string()),
                    '$' if next == Some('(') => return Err(SUBSTITUTION.to_string()),
                    _ => {}
                }
            }
            None => match c {
                '\\' => {
                    current.push(c);
                    if let Some(escaped) = next {
                        current.push(escaped);
                        i += 1;
                    }
                }
                '\'' | '"' => {
                    quote = Some(c);
                    current.push(c);
                }
                '`' => return Err(SUBSTITUTION.to_string()),
                '$' if next == Some('(') => return Err(SUBSTITUTION.to_string()),
                '<' | '>' if next == Some('(') => {
                    return Err("process substitution is not allowed".to_string())
                }
                ';' | '\n' | '|' => flush(&mut current, &mut segments),
                '&' => {
                    let prev = i.checked_sub(1).map(|p| chars[p]);
                    let is_redirection =
                        matches!(prev, Some('>') | Some('<')) || next == Some('>');
                    if is_redirection {
                        current.push(c);
                    } else {
                        flush(&mut current, &mut segments);
                    }
                }
                _ => current.push(c),
            },
        }
        i += 1;
    }

    if quote.is_some() {
        return Err("unbalanced quotes".to_string());
    }
    flush(&mut current, &mut segments);
    Ok(segments)
}
