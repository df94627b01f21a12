//! `hostloop console`: interactive console on its own thread.
//!
//! Lines are read with line editing and history on a foreign thread. Each
//! command is submitted through the gateway and runs on the loop thread;
//! the reply is printed back on the console thread.

use super::new_loop;
use crate::output::StyledOutput;
use hostloop_core::bindings::{delay_from_script, exit_code_from_script, timer_id_from_script};
use hostloop_core::{step_task, GatewayError, LoopConfig, LoopContext, LoopHandle, Step, StepTask};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::thread;
use std::time::Duration;
use termcolor::ColorChoice;

const PROMPT: &str = "hostloop> ";

/// A parsed console line.
#[derive(Debug, Clone, PartialEq)]
enum ConsoleCommand {
    Timeout { delay: Duration, text: String },
    Interval { period: Duration, text: String },
    Clear { id: f64 },
    Yield,
    Spawn { tasks: usize, steps: usize },
    Status,
    Help,
    Exit { code: i32 },
}

impl ConsoleCommand {
    fn parse(line: &str) -> Result<Self, String> {
        let mut words = line.split_whitespace();
        let Some(name) = words.next() else {
            return Err("empty command".to_string());
        };
        let rest: Vec<&str> = words.collect();

        match name {
            "timeout" | "interval" => {
                let (ms, text) = match rest.split_first() {
                    Some((ms, text)) => (parse_number(ms)?, text.join(" ")),
                    None => return Err(format!("usage: {} <ms> <text>", name)),
                };
                let delay = delay_from_script(ms);
                Ok(if name == "timeout" {
                    ConsoleCommand::Timeout { delay, text }
                } else {
                    ConsoleCommand::Interval { period: delay, text }
                })
            }
            "clear" => match rest.as_slice() {
                [id] => Ok(ConsoleCommand::Clear {
                    id: parse_number(id)?,
                }),
                _ => Err("usage: clear <id>".to_string()),
            },
            "yield" => Ok(ConsoleCommand::Yield),
            "spawn" => match rest.as_slice() {
                [tasks, steps] => Ok(ConsoleCommand::Spawn {
                    tasks: parse_count(tasks)?,
                    steps: parse_count(steps)?,
                }),
                _ => Err("usage: spawn <tasks> <steps>".to_string()),
            },
            "status" => Ok(ConsoleCommand::Status),
            "help" => Ok(ConsoleCommand::Help),
            "exit" | "quit" => match rest.as_slice() {
                [] => Ok(ConsoleCommand::Exit { code: 0 }),
                [code] => Ok(ConsoleCommand::Exit {
                    code: exit_code_from_script(parse_number(code)?),
                }),
                _ => Err("usage: exit [code]".to_string()),
            },
            other => Err(format!("unknown command: {} (try help)", other)),
        }
    }

    /// Run on the loop thread; the returned line is shown to the user.
    fn run(self, cx: &mut LoopContext<'_>) -> String {
        match self {
            ConsoleCommand::Timeout { delay, text } => {
                let id = cx.set_timeout(
                    move |_| {
                        println!("{}", text);
                        Ok(())
                    },
                    delay,
                );
                format!("timer {}", id)
            }
            ConsoleCommand::Interval { period, text } => {
                let id = cx.set_interval(
                    move |_| {
                        println!("{}", text);
                        Ok(())
                    },
                    period,
                );
                format!("timer {}", id)
            }
            ConsoleCommand::Clear { id } => match timer_id_from_script(id) {
                Some(id) => {
                    cx.cancel(id);
                    format!("cleared {}", id)
                }
                None => "no such timer".to_string(),
            },
            ConsoleCommand::Yield => {
                cx.request_yield(|cx| {
                    println!("yield resolved ({} so far)", cx.yield_count());
                    Ok(())
                });
                "yield requested".to_string()
            }
            ConsoleCommand::Spawn { tasks, steps } => {
                let set: Vec<Box<dyn StepTask>> = (0..tasks).map(|_| counting_task(steps)).collect();
                let id = cx.run_round_robin(set, move |_| {
                    println!("{} tasks x {} steps done", tasks, steps);
                    Ok(())
                });
                format!("round-robin set {}", id)
            }
            ConsoleCommand::Status => {
                let timers = cx.handle().timers();
                format!(
                    "timers: {} active, {} pending; yields resolved: {}; round-robin sets: {}",
                    timers.active_timers(),
                    timers.pending_count(),
                    cx.yield_count(),
                    cx.scheduler().active_sets()
                )
            }
            ConsoleCommand::Help => HELP.to_string(),
            ConsoleCommand::Exit { code } => {
                cx.exit(code);
                format!("exiting with {}", code)
            }
        }
    }
}

const HELP: &str = "\
Commands:
  timeout <ms> <text>    Print text once after ms
  interval <ms> <text>   Print text every ms
  clear <id>             Cancel a timer
  yield                  Resolve on the next loop turn
  spawn <tasks> <steps>  Start a round-robin set
  status                 Show timer and scheduler counters
  exit [code]            Stop the loop (also Ctrl-D)";

fn parse_number(word: &str) -> Result<f64, String> {
    word.parse::<f64>().map_err(|_| format!("not a number: {}", word))
}

fn parse_count(word: &str) -> Result<usize, String> {
    word.parse::<usize>().map_err(|_| format!("not a count: {}", word))
}

fn counting_task(steps: usize) -> Box<dyn StepTask> {
    let mut taken = 0;
    step_task(move |_| {
        taken += 1;
        Ok(if taken >= steps { Step::Done } else { Step::Pending })
    })
}

pub fn execute(config: LoopConfig, color: ColorChoice) -> anyhow::Result<i32> {
    let mut event_loop = new_loop(config)?;
    let handle = event_loop.handle();

    let console = thread::Builder::new()
        .name("hostloop-console".to_string())
        .spawn(move || read_loop(handle, color))?;

    let code = event_loop.run();
    match console.join() {
        Ok(result) => result?,
        Err(_) => anyhow::bail!("console thread panicked"),
    }
    Ok(code)
}

fn read_loop(handle: LoopHandle, color: ColorChoice) -> anyhow::Result<()> {
    let mut out = StyledOutput::new(color);
    let mut editor = DefaultEditor::new()?;

    let history_path = dirs::home_dir().map(|h| h.join(".hostloop").join("console_history"));
    if let Some(ref path) = history_path {
        let _ = editor.load_history(path);
    }

    out.heading(&format!("hostloop v{} console", env!("CARGO_PKG_VERSION")));
    out.plain("Type help for help, exit to quit\n\n");

    loop {
        let command = match editor.readline(PROMPT) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let _ = editor.add_history_entry(line);
                match ConsoleCommand::parse(line) {
                    Ok(command) => command,
                    Err(message) => {
                        out.error(&message);
                        continue;
                    }
                }
            }
            Err(ReadlineError::Interrupted) => {
                out.plain("(To exit, press Ctrl+D or type exit)\n");
                continue;
            }
            Err(ReadlineError::Eof) => ConsoleCommand::Exit { code: 0 },
            Err(err) => {
                out.error(&err.to_string());
                ConsoleCommand::Exit { code: 1 }
            }
        };

        let exiting = matches!(command, ConsoleCommand::Exit { .. });
        tracing::debug!(?command, "submitting console command");
        match handle.submit(move |cx| Ok(command.run(cx))) {
            Ok(reply) => {
                out.info(&reply);
                out.newline();
            }
            Err(GatewayError::Rejected) => {
                out.error("event loop is no longer running");
                break;
            }
            Err(err) => out.error(&err.to_string()),
        }
        if exiting {
            break;
        }
    }

    if let Some(ref path) = history_path {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let _ = editor.save_history(path);
    }
    Ok(())
}
