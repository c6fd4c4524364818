use anyhow::{Context, Result, bail};
use std::io::Read;

use crate::core::config::DEFAULT_HMAC_KEY;
use crate::core::signature::{SIGNATURE_HEADER, compute_signature};
use crate::core::terminal::{print_info, print_success};

struct SignArgs {
    key: Option<String>,
    source: Option<String>,
    quiet: bool,
}

fn parse_sign_args(args: &[String], start: usize) -> SignArgs {
    let mut parsed = SignArgs {
        key: None,
        source: None,
        quiet: false,
    };
    let mut i = start;
    while i < args.len() {
        match args[i].as_str() {
            "--hmac-key" | "-k" => {
                if i + 1 < args.len() {
                    parsed.key = Some(args[i + 1].clone());
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--quiet" | "-q" => {
                parsed.quiet = true;
                i += 1;
            }
            other => {
                parsed.source = Some(other.to_string());
                i += 1;
            }
        }
    }
    parsed
}

/// `runtask sign [--hmac-key K] [--quiet] <file|->`
///
/// Signs the exact bytes of the file (or stdin), newline included if present.
pub fn run_sign(args: &[String], start: usize) -> Result<()> {
    let parsed = parse_sign_args(args, start);
    let key = parsed
        .key
        .or_else(|| std::env::var("HMAC_KEY").ok().filter(|k| !k.is_empty()))
        .unwrap_or_else(|| DEFAULT_HMAC_KEY.to_string());

    let body = match parsed.source.as_deref() {
        Some("-") => {
            let mut buf = Vec::new();
            std::io::stdin()
                .read_to_end(&mut buf)
                .context("failed to read body from stdin")?;
            buf
        }
        Some(path) => std::fs::read(path).with_context(|| format!("failed to read {path}"))?,
        None => bail!("Missing body: pass a file path or '-' for stdin"),
    };

    let signature = compute_signature(key.as_bytes(), &body)?;
    if parsed.quiet {
        println!("{signature}");
        return Ok(());
    }

    if key == DEFAULT_HMAC_KEY {
        print_info("Signed with the placeholder key (set HMAC_KEY or pass --hmac-key).");
    }
    print_success(&format!("Signed {} bytes", body.len()));
    println!("{SIGNATURE_HEADER}: {signature}");
    Ok(())
}
