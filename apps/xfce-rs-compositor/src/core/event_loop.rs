use std::time::{Duration, Instant};

use tokio::io::unix::AsyncFd;
use tracing::{info, warn};

use crate::compositor::backend::Backend;
use crate::compositor::manager::Compositor;
use crate::compositor::render::RenderBackend;
use crate::core::error::Result;

const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Dispatch events, run fades and paint until another compositor takes
/// over. Returns an error only if the X connection fails.
pub async fn run(compositor: &mut Compositor<RenderBackend>) -> Result<()> {
    let fd = AsyncFd::new(compositor.backend().connection_fd())?;
    let mut last_health_check = Instant::now();

    loop {
        while let Some(event) = compositor.backend_mut().poll_event()? {
            if compositor.handle_event(event, Instant::now()).is_break() {
                compositor.backend().flush()?;
                return Ok(());
            }
        }
        if compositor.settings().synchronous {
            compositor.backend_mut().sync()?;
        }

        let now = Instant::now();
        compositor.run_fades(now);
        compositor.check_paint(now);
        compositor.backend().flush()?;

        if last_health_check.elapsed() >= HEALTH_CHECK_INTERVAL {
            last_health_check = Instant::now();
            let health = compositor.backend().health_check();
            if !health.is_healthy {
                warn!(
                    "Unexpected X errors: core {}, render {}, damage {}, other {}",
                    health.core_errors, health.render_errors, health.damage_errors, health.other_errors
                );
            }
        }

        // Replies read while painting may have queued events behind them.
        if compositor.backend_mut().has_queued_events()? {
            continue;
        }

        let readable = fd.readable();
        let ready = match compositor.next_timeout(Instant::now()) {
            Some(Duration::ZERO) => continue,
            Some(timeout) => match tokio::time::timeout(timeout, readable).await {
                Ok(ready) => Some(ready?),
                Err(_) => None,
            },
            None => Some(readable.await?),
        };
        if let Some(mut guard) = ready {
            guard.clear_ready();
        }
    }
}

/// Log the final frame count on the way out.
pub fn report_shutdown(compositor: &Compositor<RenderBackend>) {
    info!("Painted {} frames", compositor.frames());
}
