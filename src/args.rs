//! Command-line argument parsing.
//!
//! `shd` with no command runs the light daemon. `shd on <ADDR>` and
//! `shd off <ADDR>` switch a single device and exit.

/// What the process was asked to do.
#[derive(Debug, PartialEq)]
pub enum CliAction {
    /// Run the daemon.
    Run {
        debug_enabled: bool,
        config_path: Option<String>,
        log_file: Option<String>,
    },
    /// Switch one device on or off in the foreground.
    Switch {
        on: bool,
        address: String,
        debug_enabled: bool,
        config_path: Option<String>,
    },
    ShowHelp,
    ShowVersion,
    /// Unknown or incomplete arguments.
    ShowHelpDueToError,
}

pub struct ParsedArgs {
    pub action: CliAction,
}

impl ParsedArgs {
    /// Parse `args`, where the first item is the program name.
    pub fn parse<I, S>(args: I) -> ParsedArgs
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let args_vec: Vec<String> = args
            .into_iter()
            .skip(1)
            .map(|s| s.as_ref().to_string())
            .collect();

        let mut debug_enabled = false;
        let mut display_help = false;
        let mut display_version = false;
        let mut unknown_arg_found = false;
        let mut config_path: Option<String> = None;
        let mut log_file: Option<String> = None;
        let mut positional: Vec<String> = Vec::new();

        let mut iter = args_vec.into_iter();
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--debug" | "-d" => debug_enabled = true,
                "--help" | "-h" => display_help = true,
                "--version" | "-V" | "-v" => display_version = true,
                "--config" | "-c" => match iter.next() {
                    Some(path) => config_path = Some(path),
                    None => {
                        log_warning!("{} requires a file path", arg);
                        unknown_arg_found = true;
                    }
                },
                "--log" | "-l" => match iter.next() {
                    Some(path) => log_file = Some(path),
                    None => {
                        log_warning!("{} requires a file path", arg);
                        unknown_arg_found = true;
                    }
                },
                _ if arg.starts_with('-') => {
                    log_warning!("Unknown argument: {}", arg);
                    unknown_arg_found = true;
                }
                _ => positional.push(arg),
            }
        }

        let action = if display_version {
            CliAction::ShowVersion
        } else if display_help {
            CliAction::ShowHelp
        } else if unknown_arg_found {
            CliAction::ShowHelpDueToError
        } else {
            match positional.as_slice() {
                [] => CliAction::Run {
                    debug_enabled,
                    config_path,
                    log_file,
                },
                [command, address] if command == "on" || command == "off" => CliAction::Switch {
                    on: command == "on",
                    address: address.clone(),
                    debug_enabled,
                    config_path,
                },
                [command] if command == "on" || command == "off" => {
                    log_warning!("'{}' requires a device address", command);
                    CliAction::ShowHelpDueToError
                }
                [command, ..] => {
                    log_warning!("Unknown command: {}", command);
                    CliAction::ShowHelpDueToError
                }
            }
        };

        ParsedArgs { action }
    }

    pub fn from_env() -> ParsedArgs {
        Self::parse(std::env::args())
    }
}

pub fn display_version_info() {
    log_version!();
    log_pipe!();
    println!("┗ {}", env!("CARGO_PKG_DESCRIPTION"));
}

pub fn display_help() {
    log_version!();
    log_block_start!(env!("CARGO_PKG_DESCRIPTION"));
    log_block_start!("Usage:");
    log_indented!("shd [OPTIONS]             Run the light daemon");
    log_indented!("shd [OPTIONS] on <addr>   Switch a device on");
    log_indented!("shd [OPTIONS] off <addr>  Switch a device off");
    log_block_start!("Options:");
    log_indented!("-c, --config <file>    Use a custom configuration file");
    log_indented!("-d, --debug            Stay in the foreground with debug output");
    log_indented!("-l, --log <file>       Write log output to a file");
    log_indented!("-h, --help             Print help information");
    log_indented!("-V, --version          Print version information");
    log_block_start!("Addresses are six hex digits, e.g. 22.6A.8F or 226A8F");
    log_end!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_no_args() {
        let parsed = ParsedArgs::parse(vec!["shd"]);
        assert_eq!(
            parsed.action,
            CliAction::Run {
                debug_enabled: false,
                config_path: None,
                log_file: None,
            }
        );
    }

    #[test]
    fn test_parse_run_options() {
        let parsed = ParsedArgs::parse(vec!["shd", "-d", "--config", "/tmp/shd.toml", "-l", "/tmp/shd.log"]);
        assert_eq!(
            parsed.action,
            CliAction::Run {
                debug_enabled: true,
                config_path: Some("/tmp/shd.toml".to_string()),
                log_file: Some("/tmp/shd.log".to_string()),
            }
        );
    }

    #[test]
    fn test_parse_help_and_version() {
        assert_eq!(ParsedArgs::parse(vec!["shd", "--help"]).action, CliAction::ShowHelp);
        assert_eq!(ParsedArgs::parse(vec!["shd", "-h"]).action, CliAction::ShowHelp);
        assert_eq!(ParsedArgs::parse(vec!["shd", "-V"]).action, CliAction::ShowVersion);
        assert_eq!(ParsedArgs::parse(vec!["shd", "-v"]).action, CliAction::ShowVersion);
    }

    #[test]
    fn test_parse_multiple_flags() {
        // Help takes precedence
        let parsed = ParsedArgs::parse(vec!["shd", "--debug", "--help"]);
        assert_eq!(parsed.action, CliAction::ShowHelp);
    }

    #[test]
    fn test_parse_switch_commands() {
        assert_eq!(
            ParsedArgs::parse(vec!["shd", "on", "22.6A.8F"]).action,
            CliAction::Switch {
                on: true,
                address: "22.6A.8F".to_string(),
                debug_enabled: false,
                config_path: None,
            }
        );
        assert_eq!(
            ParsedArgs::parse(vec!["shd", "-c", "a.toml", "off", "226A8F", "-d"]).action,
            CliAction::Switch {
                on: false,
                address: "226A8F".to_string(),
                debug_enabled: true,
                config_path: Some("a.toml".to_string()),
            }
        );
    }

    #[test]
    fn test_parse_errors() {
        for args in [
            vec!["shd", "--unknown"],
            vec!["shd", "on"],
            vec!["shd", "dim", "226A8F"],
            vec!["shd", "on", "226A8F", "extra"],
            vec!["shd", "--config"],
        ] {
            assert_eq!(
                ParsedArgs::parse(args.clone()).action,
                CliAction::ShowHelpDueToError,
                "{args:?}"
            );
        }
    }
}
