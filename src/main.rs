use std::process::ExitCode;
use std::sync::Arc;

use tfvc2git::term_out::ProgressPrint;
use tfvc2git::{authors, cli, migrate, term_out, tfvc};

fn main() -> ExitCode {
    match main_inner() {
        Ok(()) => ExitCode::SUCCESS,
        Err(()) => ExitCode::from(1),
    }
}

fn main_inner() -> Result<(), ()> {
    let start = std::time::Instant::now();

    let args = match <cli::Cli as clap::Parser>::try_parse() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{e}");
            return Err(());
        }
    };

    let term_out = term_out::init(start, !args.no_progress);
    let progress_print = term_out.progress_print();

    let stderr_log_level = args
        .stderr_log_level
        .unwrap_or(cli::LogLevel::Warn)
        .to_level();
    let file_log_level = args.file_log_level.map(cli::LogLevel::to_level);

    if let Err(e) = init_logger(
        stderr_log_level,
        args.log_file.as_deref(),
        file_log_level,
        progress_print.clone(),
    ) {
        eprintln!("failed to initialize logging: {e}");
        return Err(());
    }

    let authors_file = match std::fs::OpenOptions::new().read(true).open(&args.authors) {
        Ok(f) => f,
        Err(e) => {
            tracing::error!("failed to open authors file {:?}: {e}", args.authors);
            return Err(());
        }
    };
    let authors = match authors::AuthorsMap::parse(&mut std::io::BufReader::new(authors_file))
    {
        Ok(authors) => authors,
        Err(e) => {
            tracing::error!("failed to read authors file {:?}: {e}", args.authors);
            return Err(());
        }
    };

    let options = migrate::MigrateOptions {
        root_path: args.root_path.clone(),
        out_dir: args.out_dir.clone(),
        trunk_name: args.trunk_name.clone(),
        min_changeset: args.min_changeset,
        max_changeset: args.max_changeset,
        root_path_changes: args.root_path_changes.clone(),
        parallelism: args.parallelism,
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!("failed to build the async runtime: {e}");
            return Err(());
        }
    };

    let cancel = tokio_util::sync::CancellationToken::new();
    {
        let cancel = cancel.clone();
        runtime.spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received, finishing the current changeset");
                cancel.cancel();
            }
        });
    }

    let source: Arc<dyn tfvc::HistorySource> =
        match tfvc::client::TfsClient::new(&args.collection_url, args.pat.clone(), cancel.clone())
        {
            Ok(client) => Arc::new(client),
            Err(e) => {
                tracing::error!("{e}");
                return Err(());
            }
        };

    let result = runtime.block_on(migrate::run(
        source,
        &authors,
        &options,
        &progress_print,
        &cancel,
    ));

    term_out.finish();

    match result {
        Ok(()) => Ok(()),
        Err(error) => {
            // details were logged where the failure happened
            eprintln!("migration failed: {error}");
            Err(())
        }
    }
}

fn init_logger(
    stderr_level: tracing::Level,
    file_path: Option<&std::path::Path>,
    file_level: Option<tracing::Level>,
    progress_print: ProgressPrint,
) -> Result<(), std::io::Error> {
    use tracing_subscriber::layer::{Layer as _, SubscriberExt as _};
    use tracing_subscriber::util::SubscriberInitExt as _;

    let stderr_sub = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(MakeLogPrinter::new(progress_print))
        .with_filter(tracing_subscriber::filter::LevelFilter::from_level(
            stderr_level,
        ));

    let file_sub = if let Some(file_path) = file_path {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(file_path)?;

        let filter = tracing_subscriber::filter::LevelFilter::from_level(
            file_level.unwrap_or(tracing::Level::DEBUG),
        );
        Some(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(file)
                .with_filter(filter),
        )
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(stderr_sub)
        .with(file_sub)
        .init();

    Ok(())
}

struct MakeLogPrinter {
    progress_print: ProgressPrint,
}

impl MakeLogPrinter {
    fn new(progress_print: ProgressPrint) -> Self {
        Self { progress_print }
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for MakeLogPrinter {
    type Writer = LogPrinter<'a>;

    fn make_writer(&'a self) -> LogPrinter<'a> {
        LogPrinter {
            progress_print: &self.progress_print,
            buf: Vec::new(),
        }
    }
}

struct LogPrinter<'a> {
    progress_print: &'a ProgressPrint,
    buf: Vec<u8>,
}

impl Drop for LogPrinter<'_> {
    fn drop(&mut self) {
        self.progress_print.print_line(self.buf.clone());
    }
}

impl std::io::Write for LogPrinter<'_> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buf.extend(buf);
        Ok(buf.len())
    }

    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.buf.extend(buf);
        Ok(())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
