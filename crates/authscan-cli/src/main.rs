use authscan_cli::Overrides;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "authscan",
    about = "Find login forms, OAuth buttons and passwordless flows on a web page",
    version,
    after_help = "Logging defaults to 'authscan=info'; override with RUST_LOG."
)]
struct Cli {
    /// Path to a JSON config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print the result as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Enable debug logging
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a URL in Chromium and scan it
    Scan {
        /// Page to scan
        url: String,
        /// Skip the AI-assisted path even if an API key is configured
        #[arg(long)]
        no_ai: bool,
        /// Take snippets from the static markup instead of the live page
        #[arg(long)]
        offline_snippets: bool,
    },
    /// Scan saved HTML without a browser ("-" reads stdin)
    Offline {
        /// HTML file, or "-" for stdin
        source: String,
    },
    /// Generate shell completion scripts
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Commands::Completions { shell } = cli.command {
        clap_complete::generate(shell, &mut Cli::command(), "authscan", &mut std::io::stdout());
        return;
    }

    authscan_cli::init_logging(cli.verbose, cli.log_json);

    let json = cli.json;
    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) if json => {
            println!("{}", serde_json::json!({ "success": false, "error": format!("{e:#}") }));
            1
        }
        Err(e) => {
            eprintln!("Error: {e:#}");
            1
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    let result = match cli.command {
        Commands::Scan {
            url,
            no_ai,
            offline_snippets,
        } => {
            let overrides = Overrides {
                no_ai,
                offline_snippets,
            };
            let config = authscan_cli::load_config(cli.config.as_deref(), overrides)?;
            authscan_cli::scan(config, &url).await
        }
        Commands::Offline { source } => {
            let config = authscan_cli::load_config(cli.config.as_deref(), Overrides::default())?;
            authscan_cli::scan_offline(config, &source)?
        }
        Commands::Completions { .. } => return Ok(0),
    };

    if cli.json {
        println!("{}", authscan_cli::render_json(&result)?);
    } else {
        print!("{}", authscan_cli::render_text(&result));
    }
    Ok(authscan_cli::exit_code(&result))
}
