use std::process::ExitCode;
use std::time::Duration;

use runway::prelude::*;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct StatusQuery {
    reason: Option<String>,
    log_message: Option<String>,
}

/// Respond with the requested status; codes of 400 and up go through the
/// error pipeline.
async fn status(
    Path(code): Path<u16>,
    Query(query): Query<StatusQuery>,
) -> std::result::Result<StatusCode, HttpError> {
    let status = StatusCode::from_u16(code).map_err(|e| {
        HttpError::from_error(StatusCode::BAD_REQUEST, e).with_reason("Unknown status code")
    })?;

    if status.as_u16() < 400 {
        return Ok(status);
    }

    let mut error = HttpError::new(status);
    if let Some(reason) = query.reason {
        error = error.with_reason(reason);
    }
    if let Some(log_message) = query.log_message {
        error = error.with_log_message(log_message);
    }
    Err(error)
}

fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let config = ConfigService::new();
    for (key, value) in [("PORT", "8888"), ("DEBUG", "true"), ("SERVICE", "status-server")] {
        if config.get(key).is_none() {
            config.set(key, value);
        }
    }

    Application::builder()
        .config(config)
        .router(Router::new().route("/status/{code}", get(status)))
        .before_run(
            "check-config",
            |app: &Application, _: &LoopHandle| -> std::result::Result<(), BoxError> {
                if app.settings().port == 0 {
                    return Err("PORT must be set to a fixed port".into());
                }
                Ok(())
            },
        )
        .on_start("announce", |app: Application, _: LoopHandle| async move {
            tracing::info!(port = app.settings().port, "Accepting requests");
        })
        .on_shutdown(
            "flush-sessions",
            |app: &Application| -> std::result::Result<ShutdownResult, BoxError> {
                let Some(handle) = app.event_loop() else {
                    return Ok(ShutdownResult::Immediate);
                };
                let flush = DeferredHandle::spawn(handle, async {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    Ok::<_, BoxError>("sessions flushed")
                });
                Ok(flush.into())
            },
        )
        .run()
}
