// Copyright (C) 2025 AmbonMUD contributors. This program is free software:
// you can redistribute it and/or modify it under the terms of the GNU General
// Public License as published by the Free Software Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Command parsing. A command is a tagged variant; the parser operates on a
//! trimmed input line. Verb aliases match longest-first so shorter verbs
//! cannot shadow longer ones.

use ambonmud_common::ids::Direction;
use once_cell::sync::Lazy;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Noop,
    Say { msg: String },
    Gossip { msg: String },
    Tell { target: String, msg: String },
    Who,
    Look,
    Stats,
    Inventory,
    Get { item: String },
    Drop { item: String },
    Equip { item: String },
    Remove { item: String },
    Attack { target: String },
    Flee,
    Move { dir: Direction },
    DialogueChoice { choice: u8 },
    Ansi { enabled: bool },
    Clear,
    Help,
    Quit,
    Kick { target: String },
    Shutdown,
    Transfer { target: String, room: String },
    Unknown { raw: String },
    Invalid { command: &'static str, usage: &'static str },
}

/// Discriminant used as the router's dispatch key.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Noop,
    Say,
    Gossip,
    Tell,
    Who,
    Look,
    Stats,
    Inventory,
    Get,
    Drop,
    Equip,
    Remove,
    Attack,
    Flee,
    Move,
    DialogueChoice,
    Ansi,
    Clear,
    Help,
    Quit,
    Kick,
    Shutdown,
    Transfer,
    Unknown,
    Invalid,
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::Noop => CommandKind::Noop,
            Command::Say { .. } => CommandKind::Say,
            Command::Gossip { .. } => CommandKind::Gossip,
            Command::Tell { .. } => CommandKind::Tell,
            Command::Who => CommandKind::Who,
            Command::Look => CommandKind::Look,
            Command::Stats => CommandKind::Stats,
            Command::Inventory => CommandKind::Inventory,
            Command::Get { .. } => CommandKind::Get,
            Command::Drop { .. } => CommandKind::Drop,
            Command::Equip { .. } => CommandKind::Equip,
            Command::Remove { .. } => CommandKind::Remove,
            Command::Attack { .. } => CommandKind::Attack,
            Command::Flee => CommandKind::Flee,
            Command::Move { .. } => CommandKind::Move,
            Command::DialogueChoice { .. } => CommandKind::DialogueChoice,
            Command::Ansi { .. } => CommandKind::Ansi,
            Command::Clear => CommandKind::Clear,
            Command::Help => CommandKind::Help,
            Command::Quit => CommandKind::Quit,
            Command::Kick { .. } => CommandKind::Kick,
            Command::Shutdown => CommandKind::Shutdown,
            Command::Transfer { .. } => CommandKind::Transfer,
            Command::Unknown { .. } => CommandKind::Unknown,
            Command::Invalid { .. } => CommandKind::Invalid,
        }
    }

    /// Canonical textual form. Parsing a line and re-serializing the result
    /// is stable: `parse(canonical(parse(line))) == parse(line)`.
    pub fn canonical(&self) -> String {
        match self {
            Command::Noop => String::new(),
            Command::Say { msg } => format!("say {msg}"),
            Command::Gossip { msg } => format!("gossip {msg}"),
            Command::Tell { target, msg } => format!("tell {target} {msg}"),
            Command::Who => "who".to_string(),
            Command::Look => "look".to_string(),
            Command::Stats => "stats".to_string(),
            Command::Inventory => "inventory".to_string(),
            Command::Get { item } => format!("get {item}"),
            Command::Drop { item } => format!("drop {item}"),
            Command::Equip { item } => format!("equip {item}"),
            Command::Remove { item } => format!("remove {item}"),
            Command::Attack { target } => format!("attack {target}"),
            Command::Flee => "flee".to_string(),
            Command::Move { dir } => dir.to_string(),
            Command::DialogueChoice { choice } => choice.to_string(),
            Command::Ansi { enabled } => {
                format!("ansi {}", if *enabled { "on" } else { "off" })
            }
            Command::Clear => "clear".to_string(),
            Command::Help => "help".to_string(),
            Command::Quit => "quit".to_string(),
            Command::Kick { target } => format!("kick {target}"),
            Command::Shutdown => "shutdown".to_string(),
            Command::Transfer { target, room } => format!("transfer {target} {room}"),
            Command::Unknown { raw } => raw.clone(),
            Command::Invalid { command, .. } => (*command).to_string(),
        }
    }
}

type VerbParser = fn(&str) -> Command;

struct Verb {
    aliases: &'static [&'static str],
    parse_args: VerbParser,
}

fn require_arg(
    args: &str,
    command: &'static str,
    usage: &'static str,
    build: impl Fn(String) -> Command,
) -> Command {
    let args = args.trim();
    if args.is_empty() {
        Command::Invalid { command, usage }
    } else {
        build(args.to_string())
    }
}

fn split_two(args: &str) -> Option<(String, String)> {
    let args = args.trim();
    let (first, rest) = args.split_once(char::is_whitespace)?;
    let rest = rest.trim();
    if rest.is_empty() {
        return None;
    }
    Some((first.to_string(), rest.to_string()))
}

static VERBS: Lazy<Vec<Verb>> = Lazy::new(|| {
    let mut verbs = vec![
        Verb {
            aliases: &["look", "l"],
            parse_args: |_| Command::Look,
        },
        Verb {
            aliases: &["say"],
            parse_args: |args| {
                require_arg(args, "say", "say <message>", |msg| Command::Say { msg })
            },
        },
        Verb {
            aliases: &["gossip", "gos"],
            parse_args: |args| {
                require_arg(args, "gossip", "gossip <message>", |msg| Command::Gossip {
                    msg,
                })
            },
        },
        Verb {
            aliases: &["tell", "t"],
            parse_args: |args| match split_two(args) {
                Some((target, msg)) => Command::Tell { target, msg },
                None => Command::Invalid {
                    command: "tell",
                    usage: "tell <player> <message>",
                },
            },
        },
        Verb {
            aliases: &["who"],
            parse_args: |_| Command::Who,
        },
        Verb {
            aliases: &["stats", "score"],
            parse_args: |_| Command::Stats,
        },
        Verb {
            aliases: &["inventory", "inv", "i"],
            parse_args: |_| Command::Inventory,
        },
        Verb {
            aliases: &["get", "take"],
            parse_args: |args| {
                require_arg(args, "get", "get <item>", |item| Command::Get { item })
            },
        },
        Verb {
            aliases: &["drop"],
            parse_args: |args| {
                require_arg(args, "drop", "drop <item>", |item| Command::Drop { item })
            },
        },
        Verb {
            aliases: &["equip", "wield", "wear"],
            parse_args: |args| {
                require_arg(args, "equip", "equip <item>", |item| Command::Equip { item })
            },
        },
        Verb {
            aliases: &["remove", "unequip"],
            parse_args: |args| {
                require_arg(args, "remove", "remove <item>", |item| Command::Remove {
                    item,
                })
            },
        },
        Verb {
            aliases: &["attack", "kill", "k"],
            parse_args: |args| {
                require_arg(args, "attack", "attack <target>", |target| Command::Attack {
                    target,
                })
            },
        },
        Verb {
            aliases: &["flee"],
            parse_args: |_| Command::Flee,
        },
        Verb {
            aliases: &["ansi"],
            parse_args: |args| match args.trim() {
                "on" => Command::Ansi { enabled: true },
                "off" => Command::Ansi { enabled: false },
                _ => Command::Invalid {
                    command: "ansi",
                    usage: "ansi on|off",
                },
            },
        },
        Verb {
            aliases: &["clear", "cls"],
            parse_args: |_| Command::Clear,
        },
        Verb {
            aliases: &["help", "?"],
            parse_args: |_| Command::Help,
        },
        Verb {
            aliases: &["quit", "logout"],
            parse_args: |_| Command::Quit,
        },
        Verb {
            aliases: &["kick"],
            parse_args: |args| {
                require_arg(args, "kick", "kick <player>", |target| Command::Kick {
                    target,
                })
            },
        },
        Verb {
            aliases: &["shutdown"],
            parse_args: |_| Command::Shutdown,
        },
        Verb {
            aliases: &["transfer"],
            parse_args: |args| match split_two(args) {
                Some((target, room)) => Command::Transfer { target, room },
                None => Command::Invalid {
                    command: "transfer",
                    usage: "transfer <player> <zone:room>",
                },
            },
        },
    ];
    // Longest alias first, so e.g. `kick` can never be swallowed by `k`.
    verbs.sort_by_key(|v| std::cmp::Reverse(v.aliases.iter().map(|a| a.len()).max().unwrap_or(0)));
    verbs
});

/// Flattened (alias, verb index) pairs, longest alias first.
static ALIASES: Lazy<Vec<(&'static str, usize)>> = Lazy::new(|| {
    let mut aliases: Vec<(&'static str, usize)> = VERBS
        .iter()
        .enumerate()
        .flat_map(|(idx, verb)| verb.aliases.iter().map(move |a| (*a, idx)))
        .collect();
    aliases.sort_by_key(|(alias, _)| std::cmp::Reverse(alias.len()));
    aliases
});

pub fn parse_command(line: &str) -> Command {
    let line = line.trim();
    if line.is_empty() {
        return Command::Noop;
    }

    if let Some(msg) = line.strip_prefix('\'') {
        let msg = msg.trim();
        if msg.is_empty() {
            return Command::Invalid {
                command: "say",
                usage: "say <message>",
            };
        }
        return Command::Say {
            msg: msg.to_string(),
        };
    }

    let (verb_word, args) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest),
        None => (line, ""),
    };
    let verb_lower = verb_word.to_lowercase();
    for (alias, idx) in ALIASES.iter() {
        if verb_lower == *alias {
            return (VERBS[*idx].parse_args)(args);
        }
    }

    // Bare directions and their single letter forms move the player.
    if args.is_empty() {
        if let Some(dir) = Direction::parse(&verb_lower) {
            return Command::Move { dir };
        }
        // A bare digit answers an open dialogue.
        if let Ok(n) = verb_lower.parse::<u8>() {
            if (1..=9).contains(&n) {
                return Command::DialogueChoice { choice: n };
            }
        }
    }

    Command::Unknown {
        raw: line.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn empty_is_noop() {
        assert_eq!(parse_command(""), Command::Noop);
        assert_eq!(parse_command("   "), Command::Noop);
    }

    #[test]
    fn quote_prefix_is_say() {
        assert_eq!(
            parse_command("'hello there"),
            Command::Say {
                msg: "hello there".into()
            }
        );
    }

    #[test]
    fn directions_and_letters_move() {
        assert_eq!(
            parse_command("north"),
            Command::Move {
                dir: Direction::North
            }
        );
        assert_eq!(
            parse_command("U"),
            Command::Move { dir: Direction::Up }
        );
    }

    #[test]
    fn bare_digits_are_dialogue_choices() {
        assert_eq!(parse_command("3"), Command::DialogueChoice { choice: 3 });
        assert_eq!(
            parse_command("0"),
            Command::Unknown { raw: "0".into() }
        );
        assert_eq!(
            parse_command("12"),
            Command::Unknown { raw: "12".into() }
        );
    }

    #[test]
    fn kick_is_not_shadowed_by_the_kill_alias() {
        assert_eq!(
            parse_command("kick Brin"),
            Command::Kick {
                target: "Brin".into()
            }
        );
        assert_eq!(
            parse_command("k rat"),
            Command::Attack {
                target: "rat".into()
            }
        );
    }

    #[test]
    fn missing_arguments_are_invalid_with_usage() {
        assert_eq!(
            parse_command("tell Brin"),
            Command::Invalid {
                command: "tell",
                usage: "tell <player> <message>"
            }
        );
        assert_eq!(
            parse_command("say"),
            Command::Invalid {
                command: "say",
                usage: "say <message>"
            }
        );
        assert_eq!(
            parse_command("attack   "),
            Command::Invalid {
                command: "attack",
                usage: "attack <target>"
            }
        );
    }

    #[test]
    fn verbs_are_case_insensitive_and_keep_arg_case() {
        assert_eq!(
            parse_command("TELL Brin Hello There"),
            Command::Tell {
                target: "Brin".into(),
                msg: "Hello There".into()
            }
        );
    }

    #[test]
    fn unknown_falls_through() {
        assert_eq!(
            parse_command("dance wildly"),
            Command::Unknown {
                raw: "dance wildly".into()
            }
        );
    }

    #[test]
    fn canonical_form_is_stable() {
        let lines = [
            "'hi everyone",
            "tell Brin how are you",
            "north",
            "attack rat",
            "ansi on",
            "transfer Brin midgaard:temple",
            "7",
            "who",
        ];
        for line in lines {
            let parsed = parse_command(line);
            let reparsed = parse_command(&parsed.canonical());
            assert_eq!(parsed, reparsed, "canonical form of {line:?} drifted");
        }
    }
}
