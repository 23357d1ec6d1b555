use regex::Regex;
use uuid::Uuid;

/// A recognized chat command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCommand {
    Task {
        project_identifier: String,
        description: String,
    },
    ListProjects,
    RecentLogs {
        count: i64,
    },
    Cancel {
        task_id: Uuid,
    },
    Status,
    Help,
}

/// Typed parse outcome, replacing free-text splitting at call sites.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandParse {
    Ok(ChatCommand),
    MissingArgument {
        command: &'static str,
        usage: &'static str,
    },
    Unknown {
        keyword: String,
    },
}

pub const TASK_USAGE: &str = "task <project> <description...>";
pub const RECENT_USAGE: &str = "recent logs [n]";
pub const CANCEL_USAGE: &str = "cancel <task-id>";

const DEFAULT_LOG_COUNT: i64 = 10;

/// Parse one inbound chat message. Mention tokens (`<@U123>`) are
/// stripped first so the grammar is platform-independent.
pub fn parse_command(text: &str) -> CommandParse {
    let mention = Regex::new(r"<@[A-Za-z0-9]+>").unwrap();
    let text = mention.replace_all(text, "");
    let text = text.trim();

    let (keyword, rest) = split_word(text);
    if keyword.is_empty() {
        return CommandParse::Ok(ChatCommand::Help);
    }

    match keyword.to_lowercase().as_str() {
        "task" => {
            let (project, description) = split_word(rest);
            if project.is_empty() || description.is_empty() {
                return CommandParse::MissingArgument {
                    command: "task",
                    usage: TASK_USAGE,
                };
            }
            CommandParse::Ok(ChatCommand::Task {
                project_identifier: project.to_string(),
                description: description.to_string(),
            })
        }
        "list" => {
            let (noun, _) = split_word(rest);
            if noun.eq_ignore_ascii_case("projects") {
                CommandParse::Ok(ChatCommand::ListProjects)
            } else {
                CommandParse::MissingArgument {
                    command: "list",
                    usage: "list projects",
                }
            }
        }
        "recent" => {
            let (noun, count_text) = split_word(rest);
            if !noun.eq_ignore_ascii_case("logs") {
                return CommandParse::MissingArgument {
                    command: "recent",
                    usage: RECENT_USAGE,
                };
            }
            let (count_word, _) = split_word(count_text);
            if count_word.is_empty() {
                return CommandParse::Ok(ChatCommand::RecentLogs {
                    count: DEFAULT_LOG_COUNT,
                });
            }
            match count_word.parse::<i64>() {
                Ok(n) if n > 0 => CommandParse::Ok(ChatCommand::RecentLogs { count: n }),
                _ => CommandParse::MissingArgument {
                    command: "recent",
                    usage: RECENT_USAGE,
                },
            }
        }
        "cancel" => {
            let (id_word, _) = split_word(rest);
            match Uuid::parse_str(id_word) {
                Ok(task_id) => CommandParse::Ok(ChatCommand::Cancel { task_id }),
                Err(_) => CommandParse::MissingArgument {
                    command: "cancel",
                    usage: CANCEL_USAGE,
                },
            }
        }
        "status" => CommandParse::Ok(ChatCommand::Status),
        "help" => CommandParse::Ok(ChatCommand::Help),
        other => CommandParse::Unknown {
            keyword: other.to_string(),
        },
    }
}

/// Split off the first whitespace-delimited word; the remainder keeps
/// its internal spacing so descriptions survive verbatim.
fn split_word(text: &str) -> (&str, &str) {
    let text = text.trim_start();
    match text.find(char::is_whitespace) {
        Some(at) => (&text[..at], text[at..].trim_start()),
        None => (text, ""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_command_keeps_description_verbatim() {
        let parsed = parse_command("<@U0BOT> task inhhale-v2 Fix the  login bug!");

        assert_eq!(
            parsed,
            CommandParse::Ok(ChatCommand::Task {
                project_identifier: "inhhale-v2".to_string(),
                description: "Fix the  login bug!".to_string(),
            })
        );
    }

    #[test]
    fn task_without_description_is_missing_argument() {
        let parsed = parse_command("task inhhale-v2");

        assert_eq!(
            parsed,
            CommandParse::MissingArgument {
                command: "task",
                usage: TASK_USAGE,
            }
        );
    }

    #[test]
    fn recent_logs_defaults_and_accepts_count() {
        assert_eq!(
            parse_command("recent logs"),
            CommandParse::Ok(ChatCommand::RecentLogs { count: 10 })
        );
        assert_eq!(
            parse_command("recent logs 25"),
            CommandParse::Ok(ChatCommand::RecentLogs { count: 25 })
        );
        assert_eq!(
            parse_command("recent logs nope"),
            CommandParse::MissingArgument {
                command: "recent",
                usage: RECENT_USAGE,
            }
        );
    }

    #[test]
    fn unknown_keyword_is_reported() {
        assert_eq!(
            parse_command("deploy everything"),
            CommandParse::Unknown {
                keyword: "deploy".to_string(),
            }
        );
    }

    #[test]
    fn bare_mention_is_help() {
        assert_eq!(parse_command("<@U0BOT>  "), CommandParse::Ok(ChatCommand::Help));
        assert_eq!(parse_command("list projects"), CommandParse::Ok(ChatCommand::ListProjects));
    }
}
