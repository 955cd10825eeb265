use futures::StreamExt;

use sandboxide::runner::{Runner, RunnerConfig};
use sandboxide::{OutputKind, OutputLog};

#[async_std::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let (runner, mut handler) = Runner::new(RunnerConfig::builder().build()?);

    let handle = async_std::task::spawn(async move {
        while handler.next().await.is_some() {}
    });

    let mut output = runner.output_listener().await?;

    runner.create().await?;
    runner
        .submit(r#"console.log("2 + 2 =", 2 + 2); console.log("goodbye");"#)
        .await?;

    let mut log = OutputLog::new();
    while let Some(line) = output.next().await {
        println!("{line}");
        let done = matches!(line.kind, OutputKind::Done | OutputKind::Error);
        log.push(line);
        if done {
            break;
        }
    }
    println!("captured {} output lines", log.lines().len());

    runner.stop().await?;
    drop(runner);
    handle.await;
    Ok(())
}
