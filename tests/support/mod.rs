#![allow(dead_code)]

pub mod harness;
pub mod net;
pub mod origin;

pub use harness::*;
pub use net::*;
pub use origin::*;

use anyhow::{Context, Result, anyhow};

/// Splits a raw response into its head (without the blank line) and body.
pub fn split_response(response: &[u8]) -> Result<(String, Vec<u8>)> {
    let pos = response
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .ok_or_else(|| anyhow!("response has no header terminator"))?;
    let head = String::from_utf8(response[..pos].to_vec()).context("response head is not UTF-8")?;
    Ok((head, response[pos + 4..].to_vec()))
}

pub fn status_code(response: &[u8]) -> Result<u16> {
    let (head, _) = split_response(response)?;
    head.split_whitespace()
        .nth(1)
        .ok_or_else(|| anyhow!("missing status code in response line"))?
        .parse::<u16>()
        .map_err(|err| anyhow!("invalid status code: {err}"))
}

/// Value of the first header named `name`, compared case-insensitively.
pub fn header_value(head: &str, name: &str) -> Option<String> {
    head.lines().skip(1).find_map(|line| {
        let (key, value) = line.split_once(':')?;
        key.trim()
            .eq_ignore_ascii_case(name)
            .then(|| value.trim().to_string())
    })
}
