use std::path::PathBuf;

use crate::migrate::RootPathChange;

#[derive(clap::Parser)]
#[command(
    name = "tfvc2git",
    about = "Migrates the history of a TFVC project into a new Git repository"
)]
pub struct Cli {
    #[arg(
        value_name = "COLLECTION_URL",
        help = "Project collection URL (e.g. https://tfs.example.com/tfs/DefaultCollection)"
    )]
    pub collection_url: String,
    #[arg(
        value_name = "ROOT_PATH",
        help = "Server path of the project to migrate ($/...)"
    )]
    pub root_path: String,
    #[arg(
        long = "authors",
        value_name = "PATH",
        help = "File mapping TFVC identities to Git authors (NAME = Display Name <email>)"
    )]
    pub authors: PathBuf,
    #[arg(
        long = "out-dir",
        value_name = "PATH",
        help = "Directory where the new Git repository will be created"
    )]
    pub out_dir: PathBuf,
    #[arg(
        long = "trunk-name",
        value_name = "NAME",
        default_value = "main",
        help = "Git branch name for the trunk"
    )]
    pub trunk_name: String,
    #[arg(
        long = "min-changeset",
        value_name = "N",
        help = "First changeset to migrate (inclusive)"
    )]
    pub min_changeset: Option<u32>,
    #[arg(
        long = "max-changeset",
        value_name = "N",
        help = "Last changeset to migrate (inclusive)"
    )]
    pub max_changeset: Option<u32>,
    #[arg(
        long = "root-path-changes",
        value_name = "CS:$/PATH",
        num_args = 1..,
        value_parser = parse_root_path_change,
        help = "Changesets at which the migration root moved (e.g. CS1234:$/New/Path)"
    )]
    pub root_path_changes: Vec<RootPathChange>,
    #[arg(long = "pat", value_name = "TOKEN", help = "Personal access token")]
    pub pat: Option<String>,
    #[arg(
        long = "parallelism",
        value_name = "N",
        default_value_t = 8,
        help = "Degree of parallelism for content downloads"
    )]
    pub parallelism: usize,
    #[arg(
        long = "stderr-log-level",
        value_name = "LEVEL",
        value_enum,
        help = "Maximum stderr log level (warn by default)"
    )]
    pub stderr_log_level: Option<LogLevel>,
    #[arg(
        long = "log-file",
        value_name = "PATH",
        help = "File to write logs (besides stderr)"
    )]
    pub log_file: Option<PathBuf>,
    #[arg(
        long = "file-log-level",
        value_name = "LEVEL",
        value_enum,
        help = "Maximum file log level (debug by default)"
    )]
    pub file_log_level: Option<LogLevel>,
    #[arg(long = "no-progress", help = "Do not print progress")]
    pub no_progress: bool,
}

#[derive(Copy, Clone, Debug, clap::ValueEnum)]
pub enum LogLevel {
    #[value(name = "error")]
    Error,
    #[value(name = "warn")]
    Warn,
    #[value(name = "info")]
    Info,
    #[value(name = "debug")]
    Debug,
    #[value(name = "trace")]
    Trace,
}

impl LogLevel {
    pub fn to_level(self) -> tracing::Level {
        match self {
            Self::Error => tracing::Level::ERROR,
            Self::Warn => tracing::Level::WARN,
            Self::Info => tracing::Level::INFO,
            Self::Debug => tracing::Level::DEBUG,
            Self::Trace => tracing::Level::TRACE,
        }
    }
}

fn parse_root_path_change(raw: &str) -> Result<RootPathChange, String> {
    let (changeset, new_root_path) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected CS:$/PATH, got {raw:?}"))?;

    let changeset = changeset
        .strip_prefix("CS")
        .or_else(|| changeset.strip_prefix("cs"))
        .unwrap_or(changeset);
    let changeset: u32 = changeset
        .parse()
        .map_err(|_| format!("invalid changeset number {changeset:?}"))?;

    if !new_root_path.starts_with("$/") || new_root_path.ends_with('/') {
        return Err(format!(
            "root path {new_root_path:?} must be absolute ($/...) without a trailing slash",
        ));
    }

    Ok(RootPathChange {
        changeset,
        new_root_path: new_root_path.to_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::parse_root_path_change;

    #[test]
    fn parses_root_path_changes() {
        let change = parse_root_path_change("CS123:$/New/Root").unwrap();
        assert_eq!(change.changeset, 123);
        assert_eq!(change.new_root_path, "$/New/Root");

        let change = parse_root_path_change("45:$/Other").unwrap();
        assert_eq!(change.changeset, 45);

        assert!(parse_root_path_change("$/MissingNumber").is_err());
        assert!(parse_root_path_change("CSx:$/P").is_err());
        assert!(parse_root_path_change("12:relative/path").is_err());
        assert!(parse_root_path_change("12:$/trailing/").is_err());
    }
}
