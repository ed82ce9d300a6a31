mod cli;
mod config;
mod demo;
mod tracing_init;

use std::sync::Arc;

use clap::Parser;
use rt_domain::{EventPayload, Message, Session};
use rt_events::{CallbackSink, MultiSink, Replayer, Sink, TraceReader, TraceWriter, TraceWriterSink};
use rt_executor::ParallelExecutor;
use rt_providers::FailoverOrchestrator;
use rt_runtime::memory_store::InMemorySessionStore;
use rt_runtime::runtime::{RunContext, RuntimeBuilder};

use cli::{Cli, Command, ConfigAction};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_init::init();
    let cli = Cli::parse();
    let (cfg, cfg_path) = config::load_config()?;

    match cli.command {
        Command::Config { action } => match action {
            ConfigAction::Show => config::show(&cfg),
            ConfigAction::Validate => {
                if !config::validate(&cfg, &cfg_path) {
                    std::process::exit(1);
                }
            }
        },
        Command::Run {
            message,
            session,
            max_iterations,
        } => {
            run_turn(cfg, session, message, max_iterations).await?;
        }
        Command::Replay { path, speed } => {
            replay_trace(path, speed).await?;
        }
    }

    Ok(())
}

async fn run_turn(
    mut cfg: rt_domain::Config,
    session_id: String,
    message: String,
    max_iterations: Option<u32>,
) -> anyhow::Result<()> {
    if let Some(max) = max_iterations {
        cfg.loop_config.max_iterations = max;
    }

    let backend = Arc::new(FailoverOrchestrator::new(
        vec![Arc::new(demo::EchoBackend)],
        cfg.failover.clone(),
    ));
    let executor = Arc::new(ParallelExecutor::new(
        demo::demo_tool_catalogue(),
        cfg.loop_config.executor.clone(),
    ));
    let session_store = Arc::new(InMemorySessionStore::new());

    let stdout_sink: Arc<dyn Sink> = Arc::new(CallbackSink::new(print_event));
    let trace_path = format!("trace-{session_id}.jsonl");
    let trace_file = std::fs::File::create(&trace_path)?;
    let trace_sink: Arc<dyn Sink> = Arc::new(TraceWriterSink::new(TraceWriter::new(
        trace_file,
        uuid::Uuid::new_v4().to_string(),
        env!("CARGO_PKG_VERSION"),
        "cli",
    )));

    let runtime = RuntimeBuilder::new(backend, executor, session_store, cfg.loop_config)
        .with_backpressure_config(cfg.backpressure)
        .with_sink(trace_sink)
        .with_sink(stdout_sink)
        .build();
    let runtime = Arc::new(runtime);

    let session = Session {
        id: session_id,
        agent_id: "demo-agent".to_string(),
        channel: "cli".to_string(),
        channel_id: "local".to_string(),
    };

    let handle = runtime.run(session, Message::user(message), RunContext::default())?;
    println!("run {} started, trace -> {trace_path}", handle.run_id);

    let mut events = handle.events;
    while events.recv().await.is_some() {}

    if let Some(record) = runtime.run_status(&handle.run_id) {
        println!("final status: {:?}", record.status);
    }

    Ok(())
}

async fn replay_trace(path: std::path::PathBuf, speed: f64) -> anyhow::Result<()> {
    let file = std::fs::File::open(&path)?;
    let reader = TraceReader::new(std::io::BufReader::new(file))?;

    let sink: Arc<dyn Sink> = Arc::new(CallbackSink::new(print_event));
    let replayer = Replayer::new(Arc::new(MultiSink::new(vec![sink]))).with_speed(speed);
    let report = replayer.replay(reader).await?;

    println!(
        "replayed {} events, valid={}",
        report.events_replayed, report.valid
    );
    for err in &report.errors {
        eprintln!("  {err}");
    }
    if !report.valid {
        std::process::exit(1);
    }
    Ok(())
}

fn print_event(event: &rt_domain::AgentEvent) {
    match &event.payload {
        Some(EventPayload::Stream(payload)) => {
            if let Some(text) = &payload.text {
                print!("{text}");
                use std::io::Write;
                let _ = std::io::stdout().flush();
            }
        }
        Some(EventPayload::Tool(payload)) => {
            println!("\n[tool:{:?}] {}", event.event_type, payload.call_id);
        }
        Some(EventPayload::Error(payload)) => {
            println!("\n[error] {}: {}", payload.code, payload.message);
        }
        _ => {
            if event.event_type.is_run_terminal() {
                println!("\n[{:?}]", event.event_type);
            }
        }
    }
}
