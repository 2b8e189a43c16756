use std::fmt::Write;

use clap::Command;

use crate::commands::{drop, force, run, version};
use crate::output::ARROW;

#[derive(Clone, Copy)]
pub struct ExampleGroup {
    pub title: &'static str,
    pub commands: &'static [&'static str],
}

#[derive(Clone, Copy)]
pub struct CommandExample {
    pub name: &'static str,
    pub groups: &'static [ExampleGroup],
}

pub fn command_examples() -> &'static [CommandExample] {
    &[
        CommandExample {
            name: "version",
            groups: version::EXAMPLES,
        },
        CommandExample {
            name: "force",
            groups: force::EXAMPLES,
        },
        CommandExample {
            name: "run",
            groups: run::EXAMPLES,
        },
        CommandExample {
            name: "drop",
            groups: drop::EXAMPLES,
        },
    ]
}

/// Appends each subcommand's examples to its `--help` output.
pub fn attach(mut command: Command) -> Command {
    for example in command_examples() {
        if let Some(subcommand) = command.find_subcommand_mut(example.name) {
            *subcommand = subcommand.clone().after_long_help(render(example.groups));
        }
    }
    command
}

fn render(groups: &[ExampleGroup]) -> String {
    let mut buffer = String::from("Examples:\n");
    for (index, group) in groups.iter().enumerate() {
        if index > 0 {
            buffer.push('\n');
        }
        let _ = writeln!(buffer, "  {}", group.title);
        for command in group.commands {
            let _ = writeln!(buffer, "    {ARROW} {command}");
        }
    }
    buffer
}
