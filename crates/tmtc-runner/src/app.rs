//! Wiring of a route, its device connection and the operator console.

use crate::cli::Cli;
use crate::command::{parse_command, OperatorCommand};
use crate::error::RunnerResult;
use crate::executor::Executor;
use crate::link::DeviceLink;
use crate::scheduler::PeriodicScheduler;
use crate::session::run_client;
use crate::sink::JsonLinesSink;
use std::io::BufRead;
use std::sync::Arc;
use std::thread;
use tmtc_common::TimerService;
use tmtc_protocol::{CommandLink, Route, RouteConfig, ThreadTimer};
use tokio::sync::Notify;
use tracing::{info, warn};

/// Run the route described by `cli` until Ctrl-C or a `quit` command.
pub fn run(cli: &Cli) -> RunnerResult<()> {
    let config = RouteConfig::from_path(&cli.config)?;
    let framing = cli.framing_config()?;

    let timer: Arc<dyn TimerService> = Arc::new(ThreadTimer::new(&config.name)?);
    let sink = Arc::new(
        JsonLinesSink::new(std::io::stdout(), Arc::clone(&timer), "tmtcd")
            .with_executor(Executor::new(&config.name)?),
    );
    let route = config.build(sink)?;
    let source = cli.source_name();
    route.set_source(source.clone());
    let link = Arc::new(DeviceLink::new(source));
    tmtc_metrics::describe_metrics();

    let scheduler = PeriodicScheduler::start(&route, link.clone(), Arc::clone(&timer));
    info!(
        "Route {} loaded, {} periodic command(s)",
        route.name(),
        scheduler.mappings().len()
    );

    let shutdown = Arc::new(Notify::new());
    {
        let shutdown = Arc::clone(&shutdown);
        ctrlc::set_handler(move || {
            info!("Interrupted, shutting down");
            shutdown.notify_one();
        })?;
    }
    spawn_console(route.clone(), Arc::clone(&link), Arc::clone(&shutdown))?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let stopped = {
        let shutdown = Arc::clone(&shutdown);
        async move { shutdown.notified().await }
    };
    let result = runtime.block_on(run_client(
        &cli.connect,
        route.clone(),
        link,
        &framing,
        cli.retry(),
        stopped,
    ));

    scheduler.stop();
    route.dispose();
    info!("Route {} disposed", route.name());
    result?;
    Ok(())
}

/// Read operator commands from stdin on a dedicated thread.
///
/// End of input only stops the console; the route keeps running.
fn spawn_console(
    route: Route,
    link: Arc<DeviceLink>,
    shutdown: Arc<Notify>,
) -> std::io::Result<()> {
    thread::Builder::new()
        .name("console".to_string())
        .spawn(move || {
            let stdin = std::io::stdin();
            let mut occurrence = 0u64;
            for line in stdin.lock().lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(e) => {
                        warn!("Console read failed: {}", e);
                        break;
                    }
                };
                match parse_command(&line, occurrence) {
                    Ok(None) => {}
                    Ok(Some(OperatorCommand::Invoke(invocation))) => {
                        occurrence += 1;
                        let link: Arc<dyn CommandLink> = link.clone();
                        if let Err(e) = route.submit_activity(invocation, link) {
                            warn!("Invocation rejected: {}", e);
                        }
                    }
                    Ok(Some(OperatorCommand::Send(mapping_id))) => {
                        if let Err(e) = route.dispatch_internal(&mapping_id, link.as_ref()) {
                            warn!("Command {} failed: {}", mapping_id, e);
                        }
                    }
                    Ok(Some(OperatorCommand::Quit)) => {
                        shutdown.notify_one();
                        break;
                    }
                    Err(e) => warn!("{}", e),
                }
            }
        })?;
    Ok(())
}
