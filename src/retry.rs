macro_rules! retry_fetch_operation {
    ($context:expr, $operation:expr) => {{
        const MAX_ATTEMPTS: u32 = 3;
        const BASE_DELAY_MS: u64 = 1_000;
        const MAX_DELAY_MS: u64 = 8_000;

        let context_value: String = $context.into();
        let mut attempt = 1;

        loop {
            match ($operation).await {
                Ok(value) => break Ok(value),
                Err(err) if attempt >= MAX_ATTEMPTS => break Err(err),
                Err(err) => {
                    let delay_ms =
                        (BASE_DELAY_MS * 2_u64.pow(attempt - 1)).min(MAX_DELAY_MS);
                    let jitter_range = delay_ms / 4;
                    let jitter = fastrand::u64(0..=jitter_range * 2);
                    let final_delay = delay_ms
                        .saturating_sub(jitter_range)
                        .saturating_add(jitter);
                    log::warn!(
                        "Attempt {}/{} for {} failed: {}. Retrying in {}ms.",
                        attempt,
                        MAX_ATTEMPTS,
                        context_value,
                        err,
                        final_delay
                    );
                    tokio::time::sleep(std::time::Duration::from_millis(final_delay)).await;
                    attempt += 1;
                }
            }
        }
    }};
}

pub(crate) use retry_fetch_operation;
