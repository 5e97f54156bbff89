//! Tests for pause, resume, cancel, completions and man.

use super::parse;
use crate::cli::{Cli, CliCommand};
use clap::Parser;
use clap_complete::Shell;

#[test]
fn cli_parse_pause() {
    match parse(&["mdm", "pause", "item_1"]) {
        CliCommand::Pause { name } => assert_eq!(name, "item_1"),
        _ => panic!("expected Pause"),
    }
}

#[test]
fn cli_parse_resume() {
    match parse(&["mdm", "resume", "eps.zip"]) {
        CliCommand::Resume { name } => assert_eq!(name, "eps.zip"),
        _ => panic!("expected Resume"),
    }
}

#[test]
fn cli_parse_cancel() {
    match parse(&["mdm", "cancel", "item_3"]) {
        CliCommand::Cancel { name } => assert_eq!(name, "item_3"),
        _ => panic!("expected Cancel"),
    }
}

#[test]
fn cli_parse_pause_requires_name() {
    assert!(Cli::try_parse_from(["mdm", "pause"]).is_err());
}

#[test]
fn cli_parse_completions() {
    match parse(&["mdm", "completions", "bash"]) {
        CliCommand::Completions { shell } => assert_eq!(shell, Shell::Bash),
        _ => panic!("expected Completions"),
    }
}

#[test]
fn cli_parse_man() {
    assert!(matches!(parse(&["mdm", "man"]), CliCommand::Man));
}

#[test]
fn cli_definition_is_consistent() {
    use clap::CommandFactory;
    Cli::command().debug_assert();
}
