//! The fixed script pre-loaded into every execution context.
//!
//! The bootstrap speaks the line-delimited JSON protocol from
//! [`sandboxide_types::ContextMessage`] over the process' standard streams:
//! it announces itself with a single `ready` message, then executes every
//! incoming `request` and reports `log`/`error` output followed by exactly
//! one terminal `done` or `error` per request.

/// Bootstrap for a Node.js interpreter, passed via `node -e`.
///
/// Console output and uncaught errors are rerouted as messages before any
/// user code runs. Isolation comes from the process boundary: the submitted
/// source shares no memory with the host and reaches it only through the
/// message stream, though inside its own process it can still touch
/// `process.stdout` or `require` like any other Node program.
pub const DEFAULT_BOOTSTRAP: &str = r#"
(() => {
  const send = (m) => process.stdout.write(JSON.stringify(m) + "\n");
  const text = (args) => args.map(String).join(" ");
  console.log = (...args) => send({ type: "log", msg: text(args) });
  console.error = (...args) => send({ type: "error", msg: text(args) });
  process.on("uncaughtException", (err) => {
    send({ type: "error", msg: err && err.message ? err.message : String(err) });
  });
  const readline = require("readline");
  const rl = readline.createInterface({ input: process.stdin, terminal: false });
  rl.on("line", (line) => {
    let code = "";
    try {
      const data = JSON.parse(line);
      code = data && data.code ? data.code : "";
    } catch (_) {
      return;
    }
    try {
      new Function(code)();
      send({ type: "done", msg: "execution finished" });
    } catch (err) {
      send({ type: "error", msg: err && err.message ? err.message : String(err) });
    }
  });
  send({ type: "ready", msg: "sandbox ready" });
})();
"#;
