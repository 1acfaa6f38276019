use std::io::Write;
use std::sync::Arc;
use std::time::Instant;

use streamchat_rs::client::FailoverStreamClient;
use streamchat_rs::config::{load_config, AppConfig};
use streamchat_rs::observability::{init_tracing, log_turn_complete};
use streamchat_rs::reconcile::{ReconciliationEngine, UpdateKind};
use streamchat_rs::transport::HttpTransport;
use streamchat_rs::turn::{drive_turn, TurnOutcome};

const CONFIG_PATH_ENV: &str = "STREAMCHAT_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config.yaml";

fn main() {
    let prompt = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    if prompt.trim().is_empty() {
        eprintln!("Usage: streamchat <prompt>");
        std::process::exit(2);
    }

    let config_path =
        std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let config = load_config(&config_path).unwrap_or_else(|e| {
        eprintln!("Failed to load configuration from '{config_path}': {e}");
        eprintln!("Please copy 'config.example.yaml' to 'config.yaml' and modify as needed.");
        std::process::exit(1);
    });

    init_tracing(&config.features.log_level, config.features.log_format);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_io()
        .enable_time()
        .build()
        .unwrap_or_else(|e| {
            eprintln!("Failed to initialize Tokio runtime: {e}");
            std::process::exit(1);
        });

    let code = runtime.block_on(run(config, prompt));
    std::process::exit(code);
}

async fn run(config: AppConfig, prompt: String) -> i32 {
    let transport = Arc::new(HttpTransport::new(&config.transport));
    if let Err(err) = transport.initialize() {
        eprintln!("{}", err.user_message());
        return 1;
    }
    let client = FailoverStreamClient::new(Arc::clone(&transport), &config);
    let mut engine = ReconciliationEngine::from_config(&config.reconcile);
    let message_id = uuid::Uuid::new_v4().to_string();
    engine.begin_message(&message_id);

    let request = config.chat.to_request(&prompt);
    let stream = match client.stream_chat_response(&request, Vec::new()) {
        Ok(stream) => stream,
        Err(err) => {
            eprintln!("{}", err.user_message());
            transport.close();
            return 1;
        }
    };

    let canceller = stream.canceller();
    let ctrl_c = canceller.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    tracing::info!(
        message_id = %message_id,
        backends = config.backends.len(),
        concurrent = client.is_concurrent(),
        "sending prompt"
    );

    let started = Instant::now();
    let mut printed = 0usize;
    let mut stdout = std::io::stdout();
    let stop = canceller.clone();
    let outcome = drive_turn(stream, &canceller, &mut engine, &message_id, |update| {
        if update.kind != UpdateKind::Text || stop.is_cancelled() {
            return;
        }
        if let Err(err) = write_tail(&mut stdout, &update.content, &mut printed) {
            tracing::warn!(error = %err, "stdout closed, stopping turn");
            stop.cancel();
        }
    })
    .await;
    println!();

    if let Some(message) = engine.accumulator(&message_id) {
        log_turn_complete(outcome.label(), message, started);
        for call in &message.tool_calls {
            eprintln!("[tool call] {} {}", call.name, call.arguments);
        }
        for result in &message.search_results {
            eprintln!("[{}] {} <{}>", result.index, result.title, result.href);
        }
        for url in &message.image_urls {
            eprintln!("[image] {url}");
        }
        if let Some(error) = &message.last_error {
            eprintln!("[backend error] {error}");
        }
    }

    transport.close();
    match outcome {
        TurnOutcome::Completed => 0,
        TurnOutcome::Cancelled => 130,
        TurnOutcome::Failed(err) => {
            eprintln!("{}", err.user_message());
            1
        }
    }
}

/// Write the part of `content` past `printed`.
///
/// Snapshot replacement can rewrite text already printed; only the new tail
/// is written.
fn write_tail(out: &mut impl Write, content: &str, printed: &mut usize) -> std::io::Result<()> {
    let Some(tail) = content.get(*printed..).filter(|tail| !tail.is_empty()) else {
        return Ok(());
    };
    out.write_all(tail.as_bytes())?;
    out.flush()?;
    *printed = content.len();
    Ok(())
}
