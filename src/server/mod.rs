//! Server
//!
//! The transport, the middleware stack around the application routes, the
//! supervisor that ties a run together, and [`run`], the process entry
//! point.

use std::io;
use std::process::ExitCode;

use tracing::Instrument;

use crate::config::Settings;
use crate::error::Error;
use crate::lifecycle::ApplicationBuilder;
use crate::logging;

mod stack;
mod supervisor;
mod transport;

pub use stack::service_stack;
pub use supervisor::{ShutdownHandle, Supervisor};
pub use transport::{HttpTransport, Transport, TransportOptions};

/// Run an application until it shuts down and report how it ended.
///
/// Settings come from the builder (or the process environment), logging is
/// initialized from them, and the supervisor runs on a tokio runtime:
/// current-thread in debug mode, multi-threaded otherwise with
/// `NUMBER_OF_WORKERS` threads (0 lets tokio decide).
///
/// Exits with status 70 when a pre-start callback cancels the start.
pub fn run(builder: ApplicationBuilder) -> ExitCode {
    let (app, registry) = match builder.build() {
        Ok(built) => built,
        Err(e) => {
            logging::init(&Settings::default());
            let error = Error::from(e);
            tracing::error!(error = %error, "Failed to load settings");
            return ExitCode::from(error.exit_code());
        }
    };

    let settings = app.settings().clone();
    logging::init(&settings);

    let runtime = match build_runtime(&settings) {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!(error = %e, "Failed to build runtime");
            return ExitCode::from(Error::from(e).exit_code());
        }
    };

    let span = logging::root_span(&settings);
    let result = runtime.block_on(
        async move {
            tracing::info!(
                port = settings.port,
                debug = settings.debug,
                workers = settings.number_of_workers,
                "Starting application"
            );
            Supervisor::new(app, registry)
                .run(settings.port, settings.number_of_workers)
                .await
        }
        .instrument(span),
    );

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Application stopped with an error");
            ExitCode::from(e.exit_code())
        }
    }
}

fn build_runtime(settings: &Settings) -> io::Result<tokio::runtime::Runtime> {
    if settings.debug {
        return tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build();
    }

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    if settings.number_of_workers > 0 {
        builder.worker_threads(settings.number_of_workers);
    }
    builder.enable_all().build()
}
