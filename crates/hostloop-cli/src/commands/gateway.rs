//! `hostloop gateway`: foreign threads submitting work to the loop.

use super::{millis, new_loop};
use crate::output::StyledOutput;
use hostloop_core::LoopConfig;
use std::thread;
use std::time::{Duration, Instant};
use termcolor::ColorChoice;

struct ClientStats {
    completed: usize,
    failed: usize,
    total: Duration,
    worst: Duration,
}

pub fn execute(config: LoopConfig, color: ColorChoice, threads: usize, submissions: usize) -> anyhow::Result<i32> {
    let mut event_loop = new_loop(config)?;
    let handle = event_loop.handle();

    let clients: Vec<_> = (0..threads)
        .map(|client| {
            let handle = handle.clone();
            thread::spawn(move || {
                let mut stats = ClientStats {
                    completed: 0,
                    failed: 0,
                    total: Duration::ZERO,
                    worst: Duration::ZERO,
                };
                for n in 0..submissions {
                    let sent = Instant::now();
                    match handle.submit(move |cx| Ok((client, n, cx.handle().is_loop_thread()))) {
                        Ok((_, _, true)) => stats.completed += 1,
                        Ok(_) | Err(_) => stats.failed += 1,
                    }
                    let elapsed = sent.elapsed();
                    stats.total += elapsed;
                    stats.worst = stats.worst.max(elapsed);
                }
                stats
            })
        })
        .collect();

    let closer = thread::spawn(move || {
        let stats: Vec<ClientStats> = clients.into_iter().filter_map(|client| client.join().ok()).collect();
        handle.request_exit(0);
        stats
    });

    let code = event_loop.run();
    let stats = closer
        .join()
        .map_err(|_| anyhow::anyhow!("gateway client thread panicked"))?;

    let completed: usize = stats.iter().map(|s| s.completed).sum();
    let failed: usize = stats.iter().map(|s| s.failed).sum();
    let total: Duration = stats.iter().map(|s| s.total).sum();
    let worst = stats.iter().map(|s| s.worst).max().unwrap_or_default();

    let mut out = StyledOutput::new(color);
    out.heading(&format!("{} threads x {} submissions", threads, submissions));
    out.row("completed on loop thread", &completed.to_string());
    out.row("failed", &failed.to_string());
    if completed + failed > 0 {
        out.row("mean round trip", &millis(total / (completed + failed) as u32));
    }
    out.row("worst round trip", &millis(worst));
    if failed == 0 {
        out.success("all submissions completed");
        out.newline();
    } else {
        out.error(&format!("{} submissions failed", failed));
    }
    Ok(code)
}
