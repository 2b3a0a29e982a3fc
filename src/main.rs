use std::{process, sync::Arc};

use nbconvert_http::{
    application::{
        convert::Converter, error::AppError, export::ConversionDefaults, pool::ConversionPool,
        templates::TemplateStore,
    },
    config,
    infra::{
        error::InfraError,
        http::{self, AppState},
        nbconvert::NbconvertEngine,
        telemetry,
    },
};
use tokio::signal;
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
    }
}

struct ServiceContext {
    state: AppState,
    pool: Arc<ConversionPool>,
}

fn build_service_context(settings: &config::Settings) -> Result<ServiceContext, AppError> {
    if let Some(template) = settings.conversion.latex_template.as_ref()
        && !template.is_file()
    {
        return Err(AppError::from(InfraError::configuration(format!(
            "conversion.latex_template `{}` is not a readable file",
            template.display()
        ))));
    }

    let engine = Arc::new(NbconvertEngine::new(
        settings.engine.command.clone(),
        settings.engine.extra_args.clone(),
    ));
    let templates = TemplateStore::new(settings.conversion.latex_template.clone());
    let converter = Converter::new(engine, templates, settings.pool.render_timeout);
    let pool = Arc::new(ConversionPool::new(converter, settings.pool.workers));

    let defaults = ConversionDefaults {
        extract_tags: settings.conversion.extract_tags.clone(),
    };

    Ok(ServiceContext {
        state: AppState::new(pool.clone(), defaults),
        pool,
    })
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let context = build_service_context(&settings)?;
    let body_limit = usize::try_from(settings.uploads.max_request_bytes.get()).unwrap_or(usize::MAX);
    let router = http::build_router(context.state, body_limit);

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    info!(
        target = "nbconvert_http::server",
        addr = %settings.server.addr,
        workers = settings.pool.workers.get(),
        render_timeout_secs = settings.pool.render_timeout.as_secs(),
        engine = %settings.engine.command.display(),
        "listening"
    );

    let served = axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await;

    context.pool.shutdown(settings.server.graceful_shutdown).await;
    info!(target = "nbconvert_http::server", "shutdown complete");

    served.map_err(|err| AppError::unexpected(format!("server error: {err}")))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(target = "nbconvert_http::server", error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!(target = "nbconvert_http::server", error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!(target = "nbconvert_http::server", "shutdown signal received; draining");
}
