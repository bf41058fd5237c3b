//! invitecard CLI
//!
//! Commands: serve, generate, send, send-all, lookup, audit
//! Machine-readable results go to stdout as JSON, logs go to stderr.
//! Exit 0 on success, 1 on failure, 2 when an audit finds errors.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

use invitecard::config::{AppConfig, DEFAULT_CONFIG_FILE};
use invitecard::dispatch::log::DispatchLog;
use invitecard::dispatch::provider::MessagingProvider;
use invitecard::dispatch::{
    preview, DispatchSettings, Dispatcher, Outcome, SmsCredentials, SmsGateway, TwilioCredentials,
    TwilioWhatsApp,
};
use invitecard::{
    Auditor, CardRenderer, CardTemplate, GenerationPipeline, MessageTemplates, OdsSource, Registry,
    SpreadsheetRegistry, TabularSource, VerificationServer, VerificationService,
};

#[derive(Parser)]
#[command(name = "invitecard")]
#[command(about = "Invitation cards - generate, send and verify")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the JSON config file
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Guest spreadsheet (.ods), overrides the config
    #[arg(short, long, global = true)]
    registry: Option<PathBuf>,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the verification web service
    Serve {
        /// Listen address, e.g. 0.0.0.0:5000
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Generate a card and message files for every guest
    Generate {
        /// Output directory
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Card layout JSON
        #[arg(short, long)]
        layout: Option<PathBuf>,
    },

    /// Send one invitation
    Send {
        /// Phone number, local or international
        phone: String,

        /// Invitation code
        code: String,

        #[command(flatten)]
        dispatch: DispatchArgs,
    },

    /// Send invitations to every guest with a phone number
    SendAll {
        /// Skip the interactive confirmation
        #[arg(short, long)]
        yes: bool,

        #[command(flatten)]
        dispatch: DispatchArgs,
    },

    /// Look up a code the way the web service does
    Lookup {
        code: String,
    },

    /// Report data problems in the guest sheet
    Audit,
}

#[derive(Args)]
struct DispatchArgs {
    /// Do everything except contacting the provider
    #[arg(long)]
    dry_run: bool,

    #[arg(long, value_enum, default_value_t = ChannelArg::Whatsapp)]
    channel: ChannelArg,

    /// Dispatch log (NDJSON), overrides the config
    #[arg(long)]
    log: Option<PathBuf>,

    #[arg(long, env = "TWILIO_ACCOUNT_SID", hide_env_values = true)]
    account_sid: Option<String>,

    #[arg(long, env = "TWILIO_AUTH_TOKEN", hide_env_values = true)]
    auth_token: Option<String>,

    /// Twilio WhatsApp sender, e.g. whatsapp:+14155238886
    #[arg(long, env = "TWILIO_FROM_NUMBER")]
    from_number: Option<String>,

    /// Twilio content template SID, overrides the config
    #[arg(long, env = "TWILIO_CONTENT_SID")]
    content_sid: Option<String>,

    #[arg(long, env = "SMS_USERNAME")]
    sms_username: Option<String>,

    #[arg(long, env = "SMS_PASSWORD", hide_env_values = true)]
    sms_password: Option<String>,

    #[arg(long, env = "SMS_SENDER_ID")]
    sms_sender_id: Option<String>,
}

#[derive(Clone, Copy, ValueEnum)]
enum ChannelArg {
    Whatsapp,
    Sms,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = match AppConfig::load(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    if let Some(registry) = cli.registry {
        config.registry = registry;
    }

    match cli.command {
        Commands::Serve { bind } => serve(&config, bind),
        Commands::Generate { out, layout } => generate(&config, out, layout),
        Commands::Send { phone, code, dispatch } => send_one(&config, &phone, &code, &dispatch),
        Commands::SendAll { yes, dispatch } => send_all(&config, yes, &dispatch),
        Commands::Lookup { code } => lookup(&config, &code),
        Commands::Audit => audit(&config),
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("invitecard={level}")));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

/// Write a JSON result to stdout. A closed pipe is not an error.
fn print_json(value: &impl serde::Serialize) {
    if let Err(e) = write_json(&mut io::stdout().lock(), value) {
        debug!("cannot write output: {e}");
    }
}

fn write_json(out: &mut impl Write, value: &impl serde::Serialize) -> io::Result<()> {
    let text = serde_json::to_string_pretty(value)?;
    writeln!(out, "{text}")
}

fn load_registry(config: &AppConfig) -> Option<Registry> {
    match Registry::try_load(&OdsSource::new(&config.registry)) {
        Ok(registry) => Some(registry),
        Err(e) => {
            error!("{e}");
            None
        }
    }
}

fn serve(config: &AppConfig, bind: Option<String>) -> ExitCode {
    let addr = bind.unwrap_or_else(|| config.server.bind.clone());
    let service = VerificationService::new(SpreadsheetRegistry::new(&config.registry));
    let server = match VerificationServer::bind(&addr, service) {
        Ok(server) => server,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    match server.run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn generate(config: &AppConfig, out: Option<PathBuf>, layout: Option<PathBuf>) -> ExitCode {
    let Some(registry) = load_registry(config) else {
        return ExitCode::FAILURE;
    };

    let layout = layout.unwrap_or_else(|| config.card.layout.clone());
    let template = match CardTemplate::load(&layout) {
        Ok(t) => t,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    let renderer = match CardRenderer::new(template, &config.verify_base_url) {
        Ok(r) => r,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    let messages = MessageTemplates::load(&config.card.whatsapp_template, &config.card.sms_template);
    let out_dir = out.unwrap_or_else(|| config.card.out_dir.clone());

    let pipeline = GenerationPipeline::new(renderer, messages, out_dir);
    match pipeline.run(registry.guests()) {
        Ok(manifest) => {
            print_json(&serde_json::json!({
                "success": true,
                "run_id": manifest.run_id,
                "generated": manifest.generated(),
                "failed": manifest.failed(),
                "failures": manifest.failures,
                "manifest_hash": manifest.manifest_hash,
            }));
            ExitCode::SUCCESS
        }
        Err(e) => {
            print_json(&serde_json::json!({ "success": false, "error": e.to_string() }));
            ExitCode::FAILURE
        }
    }
}

fn build_provider(config: &AppConfig, args: &DispatchArgs) -> Result<Box<dyn MessagingProvider>, String> {
    // Dry runs never reach the network, placeholders are enough.
    let need = |value: &Option<String>, var: &str| -> Result<String, String> {
        match value {
            Some(v) if !v.is_empty() => Ok(v.clone()),
            _ if args.dry_run => Ok("dry_run".to_string()),
            _ => Err(format!("missing credential: pass the flag or set {var}")),
        }
    };

    match args.channel {
        ChannelArg::Whatsapp => {
            let credentials = TwilioCredentials {
                account_sid: need(&args.account_sid, "TWILIO_ACCOUNT_SID")?,
                auth_token: need(&args.auth_token, "TWILIO_AUTH_TOKEN")?,
                from: need(&args.from_number, "TWILIO_FROM_NUMBER")?,
            };
            let content_sid = args
                .content_sid
                .clone()
                .or_else(|| config.dispatch.whatsapp_content_sid.clone());
            TwilioWhatsApp::new(credentials, content_sid)
                .map(|p| Box::new(p) as Box<dyn MessagingProvider>)
                .map_err(|e| e.to_string())
        }
        ChannelArg::Sms => {
            let credentials = SmsCredentials {
                username: need(&args.sms_username, "SMS_USERNAME")?,
                password: need(&args.sms_password, "SMS_PASSWORD")?,
                sender_id: args.sms_sender_id.clone(),
            };
            SmsGateway::new(config.dispatch.sms_api_url.clone(), credentials)
                .map(|p| Box::new(p) as Box<dyn MessagingProvider>)
                .map_err(|e| e.to_string())
        }
    }
}

fn dispatcher<'a>(config: &AppConfig, args: &DispatchArgs, provider: &'a dyn MessagingProvider) -> Dispatcher<'a> {
    let log = DispatchLog::new(args.log.clone().unwrap_or_else(|| config.dispatch.log.clone()));
    let messages = MessageTemplates::load(&config.card.whatsapp_template, &config.card.sms_template);
    let settings = DispatchSettings {
        dial_code: config.dial_code.clone(),
        card_base_url: config.card_base_url.clone(),
        dry_run: args.dry_run,
    };
    Dispatcher::new(provider, messages, log, settings)
}

fn send_one(config: &AppConfig, phone: &str, code: &str, args: &DispatchArgs) -> ExitCode {
    let provider = match build_provider(config, args) {
        Ok(p) => p,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    let dispatcher = dispatcher(config, args, provider.as_ref());

    match dispatcher.send_code(phone, code, None) {
        Ok(outcome) => {
            let (status, detail) = match &outcome {
                Outcome::Sent { message_id } => ("sent", message_id.clone()),
                Outcome::DryRun => ("dry_run", None),
                Outcome::Skipped(reason) => ("skipped", Some(reason.clone())),
                Outcome::Failed(reason) => ("error", Some(reason.clone())),
            };
            print_json(&serde_json::json!({
                "success": outcome.is_success(),
                "status": status,
                "detail": detail,
                "batch_id": dispatcher.batch_id(),
            }));
            if outcome.is_success() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(e) => {
            print_json(&serde_json::json!({ "success": false, "error": e.to_string() }));
            ExitCode::FAILURE
        }
    }
}

fn send_all(config: &AppConfig, yes: bool, args: &DispatchArgs) -> ExitCode {
    let Some(registry) = load_registry(config) else {
        return ExitCode::FAILURE;
    };
    let provider = match build_provider(config, args) {
        Ok(p) => p,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let rows = preview(registry.guests(), provider.as_ref(), &config.dial_code);
    if let Err(e) = print_preview(&rows) {
        debug!("stdout closed: {e}");
    }

    if !args.dry_run && !yes && !confirm() {
        let _ = writeln!(io::stdout().lock(), "Cancelled. Use --dry-run to preview without sending.");
        return ExitCode::SUCCESS;
    }

    let dispatcher = dispatcher(config, args, provider.as_ref());
    match dispatcher.send_batch(registry.guests()) {
        Ok(summary) => {
            print_json(&serde_json::json!({
                "success": true,
                "batch_id": dispatcher.batch_id(),
                "summary": summary,
            }));
            ExitCode::SUCCESS
        }
        Err(e) => {
            print_json(&serde_json::json!({ "success": false, "error": e.to_string() }));
            ExitCode::FAILURE
        }
    }
}

fn print_preview(rows: &[invitecard::dispatch::PreviewRow]) -> io::Result<()> {
    let mut out = io::stdout().lock();
    writeln!(out, "{:<30} {:<20} {:<10} {:<5}", "Name", "Phone", "Code", "Phone?")?;
    writeln!(out, "{}", "-".repeat(68))?;
    for row in rows {
        writeln!(
            out,
            "{:<30} {:<20} {:<10} {:<5}",
            row.name,
            row.phone.as_deref().unwrap_or("N/A"),
            row.code,
            if row.phone.is_some() { "yes" } else { "no" }
        )?;
    }
    let with_phone = rows.iter().filter(|r| r.phone.is_some()).count();
    writeln!(out, "{}", "-".repeat(68))?;
    writeln!(
        out,
        "Total guests: {}  with phone: {}  without phone: {}",
        rows.len(),
        with_phone,
        rows.len() - with_phone
    )
}

fn confirm() -> bool {
    let mut out = io::stdout().lock();
    if write!(out, "Type 'SEND' to confirm: ").and_then(|_| out.flush()).is_err() {
        return false;
    }
    drop(out);
    let mut line = String::new();
    match io::stdin().lock().read_line(&mut line) {
        Ok(_) => line.trim() == "SEND",
        Err(_) => false,
    }
}

fn lookup(config: &AppConfig, code: &str) -> ExitCode {
    let service = VerificationService::new(SpreadsheetRegistry::new(&config.registry));
    let verdict = service.verify(code);
    print_json(&verdict);
    if verdict.found {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn audit(config: &AppConfig) -> ExitCode {
    let source = OdsSource::new(&config.registry);
    let rows = match source.rows() {
        Ok(rows) => rows,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    let report = Auditor::new(&config.dial_code).audit(&rows);
    print_json(&report);
    if report.has_errors() {
        ExitCode::from(2)
    } else {
        ExitCode::SUCCESS
    }
}
