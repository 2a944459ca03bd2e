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

//! Renderers convert outbound events into wire text. Every rendered line is
//! `\r\n`-terminated; prompts are not.

use ambonmud_common::{MessageKind, PromptSpec};

const SGR_RESET: &str = "\x1b[0m";
const SGR_CYAN: &str = "\x1b[36m";
const SGR_RED_BOLD: &str = "\x1b[1;31m";
const SGR_GREEN: &str = "\x1b[32m";
const SGR_BLUE: &str = "\x1b[34m";
const SGR_YELLOW: &str = "\x1b[33m";
const CLEAR_SCREEN: &str = "\x1b[2J\x1b[H";

pub trait Renderer: Send {
    fn render_line(&self, text: &str, kind: MessageKind) -> String;
    fn render_prompt(&self, spec: &PromptSpec) -> String;
    fn clear_screen(&self) -> String;
    fn login_screen(&self) -> String;
    fn ansi_demo(&self) -> String;
    fn ansi_enabled(&self) -> bool;
}

pub struct PlainRenderer;

impl Renderer for PlainRenderer {
    fn render_line(&self, text: &str, kind: MessageKind) -> String {
        match kind {
            MessageKind::Normal | MessageKind::Info => format!("{text}\r\n"),
            MessageKind::Error => format!("! {text}\r\n"),
        }
    }

    fn render_prompt(&self, spec: &PromptSpec) -> String {
        spec.text.clone()
    }

    fn clear_screen(&self) -> String {
        format!("{}\r\n", "-".repeat(70))
    }

    fn login_screen(&self) -> String {
        login_screen_text(None)
    }

    fn ansi_demo(&self) -> String {
        "ANSI is currently off. Use `ansi on` to enable color.\r\n".to_string()
    }

    fn ansi_enabled(&self) -> bool {
        false
    }
}

pub struct AnsiRenderer;

impl Renderer for AnsiRenderer {
    fn render_line(&self, text: &str, kind: MessageKind) -> String {
        match kind {
            MessageKind::Normal => format!("{text}\r\n"),
            MessageKind::Info => format!("{SGR_CYAN}{text}{SGR_RESET}\r\n"),
            MessageKind::Error => format!("{SGR_RED_BOLD}{text}{SGR_RESET}\r\n"),
        }
    }

    fn render_prompt(&self, spec: &PromptSpec) -> String {
        if spec.max_hp > 0 {
            format!(
                "{SGR_GREEN}[{}/{}hp {}/{}m]{SGR_RESET} {}",
                spec.hp, spec.max_hp, spec.mana, spec.max_mana, spec.text
            )
        } else {
            spec.text.clone()
        }
    }

    fn clear_screen(&self) -> String {
        CLEAR_SCREEN.to_string()
    }

    fn login_screen(&self) -> String {
        login_screen_text(Some((SGR_YELLOW, SGR_RESET)))
    }

    fn ansi_demo(&self) -> String {
        format!(
            "ANSI color demo:\r\n  {SGR_CYAN}info{SGR_RESET} \
             {SGR_RED_BOLD}error{SGR_RESET} {SGR_GREEN}green{SGR_RESET} \
             {SGR_BLUE}blue{SGR_RESET} {SGR_YELLOW}yellow{SGR_RESET}\r\n"
        )
    }

    fn ansi_enabled(&self) -> bool {
        true
    }
}

fn login_screen_text(accent: Option<(&str, &str)>) -> String {
    let (on, off) = accent.unwrap_or(("", ""));
    format!(
        "{on}    .---.                 .                 .   .  . . .   .--.{off}\r\n\
         {on}   /     \\   .--.--.     |.-.    .-.      .-.|  |\\ /| |   |  |  :{off}\r\n\
         {on}   |  A  |   |  |  |     |   |  (   )    (   |  | V | |   |  |  |{off}\r\n\
         {on}   '---'     '  '  `--'  '`-'    `-'      `-'`  '   ' `---'  `--'{off}\r\n\
         \r\n\
         Welcome to AmbonMUD.\r\n\
         \r\n\
         1) login\r\n\
         2) create a character\r\n\
         3) play as a guest\r\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn plain_lines_are_crlf_terminated() {
        let r = PlainRenderer;
        assert_eq!(r.render_line("hi", MessageKind::Normal), "hi\r\n");
        assert_eq!(r.render_line("nope", MessageKind::Error), "! nope\r\n");
    }

    #[test]
    fn plain_prompt_is_spec_text_verbatim() {
        let r = PlainRenderer;
        assert_eq!(r.render_prompt(&PromptSpec::default()), "> ");
    }

    #[test]
    fn ansi_error_is_sgr_wrapped() {
        let r = AnsiRenderer;
        let line = r.render_line("bad", MessageKind::Error);
        assert!(line.starts_with("\x1b[1;31m"));
        assert!(line.ends_with("\x1b[0m\r\n"));
    }

    #[test]
    fn ansi_prompt_carries_vitals() {
        let r = AnsiRenderer;
        let prompt = r.render_prompt(&PromptSpec {
            text: "> ".into(),
            hp: 18,
            max_hp: 20,
            mana: 5,
            max_mana: 10,
        });
        assert!(prompt.contains("18/20hp"));
        assert!(prompt.ends_with("> "));
    }
}
