//! Pull code blocks and command candidates out of generated text.

use super::classify::detect_language;
use super::sandbox::canonical_language;
use regex::Regex;
use std::sync::OnceLock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeBlock {
    /// Fence tag, lowercased. `None` for untagged fences.
    pub language: Option<String>,
    pub code: String,
}

impl CodeBlock {
    /// Language the block runs as: its canonical fence tag, or a guess from
    /// the code itself when the fence is untagged.
    pub fn resolved_language(&self) -> &str {
        match &self.language {
            Some(tag) => canonical_language(tag),
            None => detect_language(&self.code),
        }
    }

    pub fn is_shell(&self) -> bool {
        self.resolved_language() == "shell"
    }
}

/// A command a script hands to the OS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmbeddedCommand {
    /// Command line for a shell, as in `os.system("ls -la")`.
    Line(String),
    /// Program and arguments spawned directly, as in
    /// `subprocess.run(["ls", "-la"])`.
    Argv(Vec<String>),
}

impl EmbeddedCommand {
    pub fn display(&self) -> String {
        match self {
            EmbeddedCommand::Line(line) => line.clone(),
            EmbeddedCommand::Argv(argv) => argv.join(" "),
        }
    }
}

fn spawn_calls() -> Option<&'static Regex> {
    static CALLS: OnceLock<Option<Regex>> = OnceLock::new();
    CALLS
        .get_or_init(|| {
            let expr = r"\b(?:os\.(?:system|popen|exec\w*|spawn\w*)|subprocess\.\w+|commands\.getoutput|(?:child_process\.)?(?:execSync|execFileSync|execFile|exec|spawnSync|spawn)|exec\.Command(?:Context)?|Command::new|ProcessBuilder|shell_exec|passthru|proc_open|system|popen|Popen)\s*\(";
            match Regex::new(expr) {
                Ok(regex) => Some(regex),
                Err(e) => {
                    tracing::error!("Invalid spawn call pattern: {}", e);
                    None
                }
            }
        })
        .as_ref()
}

/// Fenced (```` ``` ````) blocks in order of appearance. An unterminated
/// final fence runs to the end of the text.
pub fn code_blocks(text: &str) -> Vec<CodeBlock> {
    let mut blocks = Vec::new();
    let mut current: Option<(Option<String>, Vec<&str>)> = None;

    for line in text.lines() {
        let trimmed = line.trim_start();
        match current.take() {
            None => {
                if let Some(tag) = trimmed.strip_prefix("```") {
                    let tag = tag.trim().to_lowercase();
                    current = Some(((!tag.is_empty()).then_some(tag), Vec::new()));
                }
            }
            Some((language, lines)) if trimmed.starts_with("```") => {
                blocks.push(CodeBlock {
                    language,
                    code: lines.join("\n"),
                });
            }
            Some((language, mut lines)) => {
                lines.push(line);
                current = Some((language, lines));
            }
        }
    }

    if let Some((language, lines)) = current {
        blocks.push(CodeBlock {
            language,
            code: lines.join("\n"),
        });
    }
    blocks.retain(|block| !block.code.trim().is_empty());
    blocks
}

/// Commands inside a shell block: one per logical line, comments dropped,
/// `\` continuations joined and a leading `$ ` prompt removed.
pub fn shell_commands(code: &str) -> Vec<String> {
    let mut commands = Vec::new();
    let mut pending = String::new();

    for line in code.lines() {
        let line = line.trim();
        if pending.is_empty() && (line.is_empty() || line.starts_with('#')) {
            continue;
        }
        match line.strip_suffix('\\') {
            Some(head) => {
                pending.push_str(head.trim_end());
                pending.push(' ');
            }
            None => {
                pending.push_str(line);
                let command = pending.trim();
                let command = command.strip_prefix("$ ").unwrap_or(command).trim();
                if !command.is_empty() {
                    commands.push(command.to_string());
                }
                pending.clear();
            }
        }
    }

    let command = pending.trim();
    if !command.is_empty() {
        commands.push(command.strip_prefix("$ ").unwrap_or(command).to_string());
    }
    commands
}

/// Every string in `text` that looks like a command someone might run:
/// lines of shell blocks plus `$ `-prefixed lines anywhere. Deduplicated,
/// in order of appearance.
pub fn command_candidates(text: &str) -> Vec<String> {
    let mut candidates: Vec<String> = Vec::new();
    let mut push = |candidate: String| {
        if !candidates.contains(&candidate) {
            candidates.push(candidate);
        }
    };

    for block in code_blocks(text) {
        if block.is_shell() {
            shell_commands(&block.code).into_iter().for_each(&mut push);
        }
    }

    for line in text.lines() {
        if let Some(command) = line.trim_start().strip_prefix("$ ") {
            let command = command.trim();
            if !command.is_empty() {
                push(command.to_string());
            }
        }
    }

    candidates
}

/// Commands passed as string literals to the usual process-spawning calls
/// of Python, JavaScript, Go, Rust, Java, PHP and C. A call whose first
/// literal contains whitespace is a shell command line; otherwise its
/// literals form an argv. Calls built only from variables are not found.
pub fn embedded_commands(code: &str) -> Vec<EmbeddedCommand> {
    let Some(calls) = spawn_calls() else {
        return Vec::new();
    };
    let chars: Vec<char> = code.chars().collect();
    calls
        .find_iter(code)
        .filter_map(|call| {
            let start = code[..call.end()].chars().count();
            let mut literals = literals_in(&chars, start, true);
            if literals.is_empty() {
                None
            } else if literals[0].contains(char::is_whitespace) {
                Some(EmbeddedCommand::Line(literals.swap_remove(0)))
            } else {
                Some(EmbeddedCommand::Argv(literals))
            }
        })
        .collect()
}

/// Non-empty quoted literals (`"..."`, `'...'`, `` `...` ``) anywhere in
/// `code`. Quotes left open at the end of a line are not literals.
pub fn string_literals(code: &str) -> Vec<String> {
    let chars: Vec<char> = code.chars().collect();
    literals_in(&chars, 0, false)
}

/// Scan from `start`; with `call_only` stop at the bracket closing the
/// argument list that `start` is inside.
fn literals_in(chars: &[char], start: usize, call_only: bool) -> Vec<String> {
    let mut literals = Vec::new();
    let mut depth = 1usize;
    let mut i = start;
    while i < chars.len() {
        match chars[i] {
            '"' | '\'' | '`' => {
                if let Some((text, next)) = read_literal(chars, i) {
                    if !text.is_empty() {
                        literals.push(text);
                    }
                    i = next;
                    continue;
                }
            }
            '(' | '[' | '{' if call_only => depth += 1,
            ')' | ']' | '}' if call_only => {
                depth -= 1;
                if depth == 0 {
                    break;
                }
            }
            _ => {}
        }
        i += 1;
    }
    literals
}

/// Contents of the literal opened at `chars[start]` and the index past its
/// closing quote. Backticks may span lines; other quotes may not.
fn read_literal(chars: &[char], start: usize) -> Option<(String, usize)> {
    let quote = chars[start];
    let mut text = String::new();
    let mut i = start + 1;
    while i < chars.len() {
        match chars[i] {
            '\\' if i + 1 < chars.len() => {
                text.push(chars[i + 1]);
                i += 2;
                continue;
            }
            c if c == quote => return Some((text, i + 1)),
            '\n' if quote != '`' => return None,
            c => text.push(c),
        }
        i += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const ANSWER: &str = "Here you go:\n\n```python\nprint('hi')\n```\n\nRun it with:\n\n```bash\n# install first\npip install requests\npython3 main.py \\\n  --verbose\n```\n\nor just type\n$ python3 main.py\n";

    #[test]
    fn test_code_blocks() {
        let blocks = code_blocks(ANSWER);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].language.as_deref(), Some("python"));
        assert_eq!(blocks[0].code, "print('hi')");
        assert!(!blocks[0].is_shell());
        assert!(blocks[1].is_shell());
    }

    #[test]
    fn test_unterminated_fence_and_untagged() {
        let blocks = code_blocks("```\nls\n```\n```sh\necho one");
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].language, None);
        assert_eq!(blocks[1].code, "echo one");
    }

    #[test]
    fn test_command_candidates() {
        assert_eq!(
            command_candidates(ANSWER),
            vec![
                "pip install requests".to_string(),
                "python3 main.py --verbose".to_string(),
                "python3 main.py".to_string(),
            ]
        );
    }

    #[test]
    fn test_prompt_lines_inside_shell_blocks_are_deduplicated() {
        let text = "```console\n$ rm -rf /tmp/x\n```";
        assert_eq!(command_candidates(text), vec!["rm -rf /tmp/x".to_string()]);
    }

    #[test]
    fn test_untagged_shebang_block_is_shell() {
        let text = "```\n#!/bin/sh\nrm -rf /srv/data\necho wiped\n```";
        let blocks = code_blocks(text);
        assert_eq!(blocks[0].resolved_language(), "shell");
        assert!(blocks[0].is_shell());
        assert_eq!(
            command_candidates(text),
            vec!["rm -rf /srv/data".to_string(), "echo wiped".to_string()]
        );
    }

    #[test]
    fn test_resolved_language() {
        let block = |language: Option<&str>, code: &str| CodeBlock {
            language: language.map(str::to_string),
            code: code.to_string(),
        };
        assert_eq!(block(Some("py"), "print(1)").resolved_language(), "python");
        assert_eq!(block(Some("zsh"), "ls").resolved_language(), "shell");
        assert_eq!(block(None, "#!/usr/bin/env node\nconsole.log(1)").resolved_language(), "javascript");
        assert_eq!(block(None, "package main\nfunc main() {}").resolved_language(), "go");
        // The tag wins over the shebang
        assert!(!block(Some("python"), "#!/bin/sh\nls").is_shell());
    }

    #[test]
    fn test_embedded_commands() {
        let python = "import os, subprocess\nos.system(\"rm -rf /\")\nsubprocess.run([\"rm\", \"-rf\", \"/\"], check=True)\n";
        assert_eq!(
            embedded_commands(python),
            vec![
                EmbeddedCommand::Line("rm -rf /".to_string()),
                EmbeddedCommand::Argv(vec!["rm".to_string(), "-rf".to_string(), "/".to_string()]),
            ]
        );

        let js = "const { execSync } = require('child_process');\nexecSync(`ls -la ${dir}`, { stdio: 'inherit' });";
        assert_eq!(
            embedded_commands(js),
            vec![EmbeddedCommand::Line("ls -la ${dir}".to_string())]
        );

        let go = "cmd := exec.Command(\"sh\", \"-c\", \"echo hi\")";
        assert_eq!(embedded_commands(go)[0].display(), "sh -c echo hi");
    }

    #[test]
    fn test_calls_without_literals_are_skipped() {
        assert!(embedded_commands("os.system(cmd)\nplatform.system()").is_empty());
    }

    #[test]
    fn test_string_literals() {
        let code = "# don't run this\ncmd = \"rm -rf /\"\nname = 'it\\'s'\nempty = \"\"";
        assert_eq!(
            string_literals(code),
            vec!["rm -rf /".to_string(), "it's".to_string()]
        );
    }

    #[test]
    fn test_no_candidates_in_plain_code() {
        assert!(command_candidates("```python\nimport os\nos.system('ls')\n```").is_empty());
    }
}
