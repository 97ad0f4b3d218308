//! Tests for the reconstruct subcommand.

use super::parse;
use crate::cli::{Cli, CliCommand, KindArg};
use clap::Parser;
use std::path::PathBuf;

#[test]
fn cli_parse_reconstruct_body() {
    match parse(&["fitroom", "reconstruct", "--kind", "body", "a.jpg", "b.png"]) {
        CliCommand::Reconstruct {
            kind,
            images,
            keep_resident,
        } => {
            assert_eq!(kind, KindArg::Body);
            assert_eq!(images, vec![PathBuf::from("a.jpg"), PathBuf::from("b.png")]);
            assert!(!keep_resident);
        }
        _ => panic!("expected Reconstruct"),
    }
}

#[test]
fn cli_parse_reconstruct_clothes_alias_keep_resident() {
    match parse(&[
        "fitroom",
        "reconstruct",
        "--kind",
        "clothes",
        "--keep-resident",
        "shirt.webp",
    ]) {
        CliCommand::Reconstruct {
            kind,
            images,
            keep_resident,
        } => {
            assert_eq!(kind, KindArg::Clothing);
            assert_eq!(images.len(), 1);
            assert!(keep_resident);
        }
        _ => panic!("expected Reconstruct with --keep-resident"),
    }
}

#[test]
fn cli_reconstruct_requires_image() {
    assert!(Cli::try_parse_from(["fitroom", "reconstruct", "--kind", "body"]).is_err());
}

#[test]
fn cli_reconstruct_rejects_unknown_kind() {
    assert!(Cli::try_parse_from(["fitroom", "reconstruct", "--kind", "hat", "x.png"]).is_err());
}
