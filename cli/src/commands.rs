//! Interactive commands typed while the server is supervised.

use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleCommand {
    Restart,
    Update,
    Run,
    Status,
    Help,
    Quit,
}

pub const HELP: &str = "commands: restart, update, run, status, help, quit";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown command `{0}` ({help})", help = HELP)]
pub struct UnknownCommand(pub String);

impl FromStr for ConsoleCommand {
    type Err = UnknownCommand;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "restart" | "r" => Ok(Self::Restart),
            "update" | "u" => Ok(Self::Update),
            "run" => Ok(Self::Run),
            "status" | "s" => Ok(Self::Status),
            "help" | "?" => Ok(Self::Help),
            "quit" | "exit" | "q" => Ok(Self::Quit),
            other => Err(UnknownCommand(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_names_and_shortcuts() {
        assert_eq!("restart".parse(), Ok(ConsoleCommand::Restart));
        assert_eq!("  Update \n".parse(), Ok(ConsoleCommand::Update));
        assert_eq!("run".parse(), Ok(ConsoleCommand::Run));
        assert_eq!("s".parse(), Ok(ConsoleCommand::Status));
        assert_eq!("exit".parse(), Ok(ConsoleCommand::Quit));
    }

    #[test]
    fn unknown_command_lists_help() {
        let err = "build".parse::<ConsoleCommand>().unwrap_err();
        assert_eq!(err, UnknownCommand("build".to_string()));
        assert_eq!(
            err.to_string(),
            "unknown command `build` (commands: restart, update, run, status, help, quit)"
        );
    }
}
