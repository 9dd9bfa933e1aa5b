use karcher_home::cli::{self, CliInvocation};
use std::io::{self, Write};
use tracing_subscriber::EnvFilter;

fn main() {
    let args = std::env::args().collect::<Vec<_>>();
    let invocation = match cli::parse_invocation(&args) {
        Ok(invocation) => invocation,
        Err(error) => {
            let mut err = io::stderr().lock();
            let _ = writeln!(err, "{error}");
            let _ = writeln!(err);
            print_help();
            std::process::exit(2);
        }
    };

    match invocation {
        CliInvocation::PrintHelp => print_help(),
        CliInvocation::PrintVersion => {
            let mut out = io::stdout().lock();
            let _ = writeln!(out, "{}", env!("CARGO_PKG_VERSION"));
        }
        CliInvocation::Command { options, command } => {
            init_tracing(options.debug);
            if let Err(error) = cli::run(&options, command) {
                tracing::debug!(?error, "command failed");
                let rendered = cli::render_json(options.output, &error.to_json())
                    .unwrap_or_else(|_| error.to_string());
                let mut out = io::stdout().lock();
                let _ = writeln!(out, "{rendered}");
                std::process::exit(1);
            }
        }
    }
}

/// Logs go to stderr so stdout stays valid JSON.
fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

fn print_help() {
    let text = format!(
        "{name} - Kärcher Home Robots cloud client\n\nUSAGE:\n  {name} [GLOBAL FLAGS] urls                                  Print the region's REST and broker endpoints\n  {name} [GLOBAL FLAGS] login -u USER -p PASS                 Log in and print the session tokens\n  {name} [GLOBAL FLAGS] devices AUTH                          List devices bound to the account\n  {name} [GLOBAL FLAGS] profile AUTH                          Print the account profile\n  {name} [GLOBAL FLAGS] properties --sn SERIAL AUTH           Fetch a device's live properties over MQTT\n  {name} [GLOBAL FLAGS] map --sn SERIAL [--kind N] AUTH       Download and decode a stored map (default kind: 1)\n  {name} --help | --version\n\nAUTH:\n  -u, --username USER      Account email or phone number (logged out again afterwards)\n  -p, --password PASS      Account password\n  -t, --token TOKEN        Previously issued auth token (instead of username/password)\n  -m, --mqtt-token TOKEN   Broker token issued with the auth token\n\nGLOBAL FLAGS:\n  -r, --region REGION      eu|us|cn (default: eu)\n  -c, --country CODE       ISO country code sent with map requests (default: GB)\n  -o, --output FORMAT      json|json_pretty (default: json)\n  -d, --debug              Verbose logs on stderr\n\nOUTPUT:\n  JSON on stdout. Failures print {{\"code\": N, \"message\": \"...\"}} and exit 1.\n\nENV:\n  KARCHER_REGION, KARCHER_COUNTRY, KARCHER_LANGUAGE     Defaults for the matching flags\n  KARCHER_PROPERTY_WAIT_SECS                            Seconds to wait for a property reply (default: 5)\n  RUST_LOG                                              Log filter when --debug is not given (default: warn)\n",
        name = env!("CARGO_PKG_NAME")
    );
    let mut out = io::stdout().lock();
    let _ = write!(out, "{text}");
}
