use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use spindle_core::{OperationError, Queue, QueueConfig, ResultStream};
use tokio::time::{Duration, sleep};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// `--config <file>` if given, defaults otherwise; `SPINDLE_*` env wins.
fn load_config() -> Result<QueueConfig, Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    let mut config = QueueConfig::default();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                let path = args.next().ok_or("--config needs a path")?;
                config = QueueConfig::from_file(path)?;
            }
            other => return Err(format!("unknown argument: {other}").into()),
        }
    }
    Ok(config.apply_env()?)
}

/// Stand-in for a publisher that is down for the first `n` calls.
struct FlakyPublisher {
    remaining_failures: AtomicU32,
}

impl FlakyPublisher {
    fn new(n: u32) -> Self {
        Self {
            remaining_failures: AtomicU32::new(n),
        }
    }

    async fn publish(&self, event: &str) -> Result<(), OperationError> {
        sleep(Duration::from_millis(5)).await;
        let left = self.remaining_failures.load(Ordering::Relaxed);
        if left > 0 {
            self.remaining_failures.fetch_sub(1, Ordering::Relaxed);
            return Err(format!("broker unavailable (left={left})").into());
        }
        println!("published {event}");
        Ok(())
    }
}

async fn report(name: &str, mut stream: ResultStream) {
    let mut received = 0;
    while let Some(result) = stream.recv().await {
        received += 1;
        match &result.err {
            None => println!("[{name}] attempt {} succeeded", result.attempt),
            Some(e) if result.done => println!("[{name}] attempt {} failed, giving up: {e}", result.attempt),
            Some(e) => println!("[{name}] attempt {} failed, retrying: {e}", result.attempt),
        }
    }
    if received == 0 {
        println!("[{name}] discarded under load (cancelled={})", stream.is_cancelled());
    }
}

async fn demo(config: QueueConfig) -> Result<(), Box<dyn std::error::Error>> {
    let queue = Queue::new(config)?;
    queue.run()?;

    let publisher = Arc::new(FlakyPublisher::new(2));
    let flaky = queue
        .do_task({
            let publisher = Arc::clone(&publisher);
            move || {
                let publisher = Arc::clone(&publisher);
                async move { publisher.publish("user.created").await }
            }
        })
        .await?;

    let doomed = queue
        .do_task(|| async { Err::<(), _>("cache write rejected") })
        .await?;

    let mut writes = 0;
    let cache = queue
        .do_blocking(move || {
            writes += 1;
            std::thread::sleep(std::time::Duration::from_millis(2));
            info!(writes, "cache entry written");
            Ok::<(), OperationError>(())
        })
        .await?;

    tokio::join!(
        report("publish", flaky),
        report("doomed", doomed),
        report("cache", cache),
    );

    queue.finish().await?;
    queue.join().await?;

    println!("{}", serde_json::to_string_pretty(&queue.stats())?);
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "failed to load config");
            return ExitCode::FAILURE;
        }
    };
    info!(?config, "starting spindle demo");

    match demo(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "demo failed");
            ExitCode::FAILURE
        }
    }
}
