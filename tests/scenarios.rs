//! End-to-end scenarios driving real context processes.
//!
//! Host-side properties are exercised with `/bin/sh` speaking the message
//! protocol, so they run anywhere; the JavaScript scenarios need a `node`
//! binary and are skipped when none is installed.

#![cfg(unix)]

use std::time::Duration;

use futures::{FutureExt, StreamExt};
use futures_timer::Delay;

use sandboxide::runner::{default_executable, Runner, RunnerConfig, RunnerConfigBuilder};
use sandboxide::{OutputKind, OutputLine, OutputStream, RunnerError};

/// A fake context that answers every request with two logs and a `done`.
const ECHO_PROTOCOL: &str = r#"
echo '{"type":"ready","msg":"sandbox ready"}'
while IFS= read -r line; do
  echo '{"type":"log","msg":"a"}'
  echo '{"type":"log","msg":"b"}'
  echo '{"type":"done","msg":"execution finished"}'
done
"#;

/// A fake context that fails every request.
const FAILING_PROTOCOL: &str = r#"
echo '{"type":"ready","msg":"sandbox ready"}'
while IFS= read -r line; do
  echo '{"type":"error","msg":"boom"}'
done
"#;

/// A fake context that swallows every request without answering.
const HANGING_PROTOCOL: &str = r#"
echo '{"type":"ready","msg":"sandbox ready"}'
while IFS= read -r line; do :; done
"#;

/// A fake context that interleaves garbage with valid frames.
const NOISY_PROTOCOL: &str = r#"
echo '{"type":"ready","msg":"sandbox ready"}'
while IFS= read -r line; do
  echo 'this is not json'
  echo '{"type":"log","msg":"a"}'
  echo '{"type":"done","msg":"execution finished"}'
done
"#;

/// A fake context that closes its stdin before reporting ready, so every
/// delivered request hits a broken pipe.
const DEAF_PROTOCOL: &str = r#"
exec 0<&-
echo '{"type":"ready","msg":"sandbox ready"}'
while :; do sleep 0.1; done
"#;

/// A fake context that reports its own pid and then logs it forever.
const TICKING_PROTOCOL: &str = r#"
echo "{\"type\":\"ready\",\"msg\":\"pid $$\"}"
while :; do echo "{\"type\":\"log\",\"msg\":\"tick $$\"}"; sleep 0.05; done
"#;

fn sh_config(script: &'static str) -> RunnerConfigBuilder {
    RunnerConfig::builder()
        .executable("/bin/sh")
        .eval_flag("-c")
        .bootstrap(script)
}

async fn spawn(config: RunnerConfig) -> (Runner, OutputStream, async_std::task::JoinHandle<()>) {
    let (runner, mut handler) = Runner::new(config);
    let handle = async_std::task::spawn(async move { while handler.next().await.is_some() {} });
    let output = runner.output_listener().await.unwrap();
    (runner, output, handle)
}

async fn next_line(output: &mut OutputStream) -> OutputLine {
    futures::select! {
        line = output.next().fuse() => line.expect("output stream ended"),
        _ = Delay::new(Duration::from_secs(5)).fuse() => panic!("timed out waiting for output"),
    }
}

/// Assert that no further line arrives within the given window.
async fn expect_silence(output: &mut OutputStream, window: Duration) {
    futures::select! {
        line = output.next().fuse() => panic!("unexpected output line: {line:?}"),
        _ = Delay::new(window).fuse() => {}
    }
}

async fn shutdown(runner: Runner, handle: async_std::task::JoinHandle<()>) {
    runner.stop().await.unwrap();
    drop(runner);
    handle.await;
}

#[async_std::test]
async fn logs_arrive_in_order_before_the_terminal_done() {
    let (runner, mut output, handle) = spawn(sh_config(ECHO_PROTOCOL).build().unwrap()).await;

    runner.create().await.unwrap();
    runner.submit("whatever").await.unwrap();

    assert_eq!(next_line(&mut output).await, OutputLine::info("sandbox ready"));
    assert_eq!(next_line(&mut output).await, OutputLine::log("a"));
    assert_eq!(next_line(&mut output).await, OutputLine::log("b"));
    assert_eq!(
        next_line(&mut output).await,
        OutputLine::done("execution finished")
    );

    shutdown(runner, handle).await;
}

#[async_std::test]
async fn a_failing_run_emits_one_error_and_no_done() {
    let (runner, mut output, handle) = spawn(sh_config(FAILING_PROTOCOL).build().unwrap()).await;

    runner.create().await.unwrap();
    runner.submit("whatever").await.unwrap();

    assert_eq!(next_line(&mut output).await, OutputLine::info("sandbox ready"));
    assert_eq!(next_line(&mut output).await, OutputLine::error("boom"));
    expect_silence(&mut output, Duration::from_millis(300)).await;

    shutdown(runner, handle).await;
}

#[async_std::test]
async fn submit_without_context_is_rejected() {
    let (runner, _output, handle) = spawn(sh_config(ECHO_PROTOCOL).build().unwrap()).await;

    let err = runner.submit("console.log(1)").await.unwrap_err();
    assert!(matches!(err, RunnerError::NoContext));

    shutdown(runner, handle).await;
}

#[async_std::test]
async fn stop_without_context_is_a_harmless_noop() {
    let (runner, mut output, handle) = spawn(sh_config(ECHO_PROTOCOL).build().unwrap()).await;

    runner.stop().await.unwrap();
    runner.stop().await.unwrap();
    assert_eq!(
        next_line(&mut output).await,
        OutputLine::info("no process running")
    );
    assert_eq!(
        next_line(&mut output).await,
        OutputLine::info("no process running")
    );

    shutdown(runner, handle).await;
}

#[async_std::test]
async fn stop_tears_down_a_live_context() {
    let (runner, mut output, handle) = spawn(sh_config(HANGING_PROTOCOL).build().unwrap()).await;

    runner.create().await.unwrap();
    assert_eq!(next_line(&mut output).await, OutputLine::info("sandbox ready"));

    runner.stop().await.unwrap();
    assert_eq!(
        next_line(&mut output).await,
        OutputLine::info("process stopped")
    );

    shutdown(runner, handle).await;
}

#[async_std::test]
async fn garbage_on_the_protocol_stream_is_dropped_without_killing_the_context() {
    let (runner, mut output, handle) = spawn(sh_config(NOISY_PROTOCOL).build().unwrap()).await;

    runner.create().await.unwrap();
    runner.submit("whatever").await.unwrap();

    assert_eq!(next_line(&mut output).await, OutputLine::info("sandbox ready"));
    assert_eq!(next_line(&mut output).await, OutputLine::log("a"));
    assert_eq!(
        next_line(&mut output).await,
        OutputLine::done("execution finished")
    );

    // the context survived the garbage and still serves requests
    runner.submit("again").await.unwrap();
    assert_eq!(next_line(&mut output).await, OutputLine::log("a"));
    assert_eq!(
        next_line(&mut output).await,
        OutputLine::done("execution finished")
    );

    shutdown(runner, handle).await;
}

#[async_std::test]
async fn a_failed_delivery_is_reported_and_disposes_the_context() {
    let (runner, mut output, handle) = spawn(sh_config(DEAF_PROTOCOL).build().unwrap()).await;

    runner.create().await.unwrap();
    assert_eq!(next_line(&mut output).await, OutputLine::info("sandbox ready"));

    runner.submit("whatever").await.unwrap();
    let line = next_line(&mut output).await;
    assert_eq!(line.kind, OutputKind::Info);
    assert!(
        line.text.contains("could not deliver code to the sandbox"),
        "unexpected line: {line:?}"
    );

    // the broken context is gone, so submitting is a caller error again
    let err = runner.submit("again").await.unwrap_err();
    assert!(matches!(err, RunnerError::NoContext));

    shutdown(runner, handle).await;
}

#[async_std::test]
async fn create_twice_discards_output_of_the_disposed_context() {
    let (runner, mut output, handle) = spawn(sh_config(TICKING_PROTOCOL).build().unwrap()).await;

    runner.create().await.unwrap();
    let first_ready = next_line(&mut output).await;
    assert_eq!(first_ready.kind, OutputKind::Info);
    let first_pid = first_ready.text.strip_prefix("pid ").unwrap().to_string();

    runner.create().await.unwrap();

    // skip over ticks of the first context until its replacement reports in
    let second_pid = loop {
        let line = next_line(&mut output).await;
        if line.kind == OutputKind::Info {
            break line.text.strip_prefix("pid ").unwrap().to_string();
        }
    };
    assert_ne!(first_pid, second_pid);

    // from here on every tick must belong to the live context
    for _ in 0..5 {
        let line = next_line(&mut output).await;
        assert_eq!(line.kind, OutputKind::Log);
        assert_eq!(line.text, format!("tick {second_pid}"));
    }

    shutdown(runner, handle).await;
}

#[async_std::test]
async fn a_run_exceeding_its_budget_is_evicted() {
    let config = sh_config(HANGING_PROTOCOL)
        .execution_timeout(Duration::from_millis(200))
        .build()
        .unwrap();
    let (runner, mut output, handle) = spawn(config).await;

    runner.create().await.unwrap();
    runner.submit("spin forever").await.unwrap();

    assert_eq!(next_line(&mut output).await, OutputLine::info("sandbox ready"));
    let line = next_line(&mut output).await;
    assert_eq!(line.kind, OutputKind::Error);
    assert!(line.text.contains("timed out"), "unexpected line: {line:?}");

    shutdown(runner, handle).await;
}

#[async_std::test]
async fn a_context_that_never_reports_ready_is_evicted() {
    let config = sh_config("sleep 5")
        .ready_timeout(Duration::from_millis(200))
        .build()
        .unwrap();
    let (runner, mut output, handle) = spawn(config).await;

    runner.create().await.unwrap();
    let line = next_line(&mut output).await;
    assert_eq!(line.kind, OutputKind::Error);
    assert!(line.text.contains("not ready"), "unexpected line: {line:?}");

    shutdown(runner, handle).await;
}

#[async_std::test]
async fn a_context_that_exits_on_its_own_is_reported() {
    let config = sh_config("echo '{\"type\":\"ready\",\"msg\":\"sandbox ready\"}'")
        .build()
        .unwrap();
    let (runner, mut output, handle) = spawn(config).await;

    runner.create().await.unwrap();
    assert_eq!(next_line(&mut output).await, OutputLine::info("sandbox ready"));
    assert_eq!(
        next_line(&mut output).await,
        OutputLine::info("the sandbox terminated")
    );

    shutdown(runner, handle).await;
}

/// The remaining scenarios execute real JavaScript and need a node binary.
fn node_config() -> Option<RunnerConfigBuilder> {
    match default_executable() {
        Ok(_) => Some(RunnerConfig::builder()),
        Err(err) => {
            eprintln!("skipping node scenario: {err}");
            None
        }
    }
}

#[async_std::test]
async fn node_logs_are_relayed_in_emission_order() {
    let Some(builder) = node_config() else { return };
    let (runner, mut output, handle) = spawn(builder.build().unwrap()).await;

    runner.create().await.unwrap();
    runner
        .submit(r#"console.log("a"); console.log("b");"#)
        .await
        .unwrap();

    assert_eq!(next_line(&mut output).await, OutputLine::info("sandbox ready"));
    assert_eq!(next_line(&mut output).await, OutputLine::log("a"));
    assert_eq!(next_line(&mut output).await, OutputLine::log("b"));
    assert_eq!(next_line(&mut output).await.kind, OutputKind::Done);

    shutdown(runner, handle).await;
}

#[async_std::test]
async fn node_thrown_errors_are_terminal() {
    let Some(builder) = node_config() else { return };
    let (runner, mut output, handle) = spawn(builder.build().unwrap()).await;

    runner.create().await.unwrap();
    runner
        .submit(r#"console.log("x"); throw new Error("boom");"#)
        .await
        .unwrap();

    assert_eq!(next_line(&mut output).await, OutputLine::info("sandbox ready"));
    assert_eq!(next_line(&mut output).await, OutputLine::log("x"));
    let line = next_line(&mut output).await;
    assert_eq!(line.kind, OutputKind::Error);
    assert!(line.text.contains("boom"), "unexpected line: {line:?}");
    expect_silence(&mut output, Duration::from_millis(300)).await;

    shutdown(runner, handle).await;
}

#[async_std::test]
async fn node_syntax_errors_are_reported_without_done() {
    let Some(builder) = node_config() else { return };
    let (runner, mut output, handle) = spawn(builder.build().unwrap()).await;

    runner.create().await.unwrap();
    runner.submit("this is not javascript").await.unwrap();

    assert_eq!(next_line(&mut output).await, OutputLine::info("sandbox ready"));
    let line = next_line(&mut output).await;
    assert_eq!(line.kind, OutputKind::Error);
    expect_silence(&mut output, Duration::from_millis(300)).await;

    shutdown(runner, handle).await;
}
