mod serve;
mod sign;

use anyhow::Result;
use console::style;

use crate::core::terminal::{self, print_error};

fn print_help() {
    terminal::print_banner();

    println!("{}", style("Commands").bold().underlined());
    println!("  {:<8} Start the run task receiver (default)", style("serve").green());
    println!("  {:<8} Print the signature header value for a request body", style("sign").green());
    println!("  {:<8} Show this help", style("help").green());

    println!("\n{}", style("Serve flags (environment variable in brackets)").bold().underlined());
    for (flag, env, about) in [
        ("--host <addr>", "HOST", "bind address, default 0.0.0.0"),
        ("--port <port>", "PORT", "listen port, default 3000"),
        ("--hmac-key <key>", "HMAC_KEY", "shared signing secret"),
        ("--download-dir <dir>", "DOWNLOAD_DIR", "where configuration archives go, default ."),
        ("--config-max-redirects <n>", "CONFIG_MAX_REDIRECTS", "default 20"),
        ("--plan-max-redirects <n>", "PLAN_MAX_REDIRECTS", "default 1"),
        ("--result-message <text>", "RESULT_MESSAGE", "message sent with passed results"),
        ("--result-url <url>", "RESULT_URL", "details URL sent with results"),
        ("--log-level <level>", "LOG_LEVEL", "trace, debug, info, warn or error"),
    ] {
        println!("  {:<28} {} [{}]", flag, about, style(env).dim());
    }

    println!(
        "\n {} {} [command] [flags]",
        style("Usage:").bold(),
        style("runtask").green()
    );
    println!(
        " {} {} sign --hmac-key <key> <file|->\n",
        style("      ").bold(),
        style("runtask").green()
    );
}

pub async fn run_main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let cmd = args.get(1).map(String::as_str).unwrap_or("serve");

    match cmd {
        "serve" => serve::run_serve(&args, 2).await,
        // Bare flags mean `serve`.
        flag if flag.starts_with("--") && flag != "--help" => serve::run_serve(&args, 1).await,
        "sign" => sign::run_sign(&args, 2),
        "help" | "--help" | "-h" => {
            print_help();
            Ok(())
        }
        other => {
            print_error(&format!("Unknown command: {other}"));
            print_help();
            Ok(())
        }
    }
}
