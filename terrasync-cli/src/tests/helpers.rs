//! Test helpers for layering sync options the way configuration merging
//! does: CLI flags first, then environment, then configuration files.

use super::*;
use camino::Utf8PathBuf;
use tempfile::TempDir;

#[derive(Debug, Clone, Default)]
pub(super) struct LayerOverrides {
    pub(super) database: Option<Utf8PathBuf>,
    pub(super) username: Option<String>,
    pub(super) password: Option<String>,
    pub(super) page_size: Option<u64>,
}

pub(super) struct Workspace {
    dir: TempDir,
}

impl Workspace {
    pub(super) fn new() -> Self {
        Self {
            dir: TempDir::new().expect("tempdir"),
        }
    }

    pub(super) fn root(&self) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(self.dir.path().to_path_buf()).expect("utf-8 workspace")
    }

    pub(super) fn database(&self, name: &str) -> Utf8PathBuf {
        self.root().join(name)
    }
}

pub(super) fn parse_sync(args: &[String]) -> Result<SyncArgs, CliError> {
    let mut invocation = vec!["terrasync".to_owned(), "sync".to_owned()];
    invocation.extend(args.iter().cloned());
    let cli = Cli::try_parse_from(invocation).map_err(CliError::ArgumentParsing)?;
    match cli.command {
        Command::Sync(args) => Ok(args),
    }
}

pub(super) fn merge_layers(
    mut cli_args: SyncArgs,
    file_layer: Option<&LayerOverrides>,
    env_layer: Option<&LayerOverrides>,
) -> Result<SyncConfig, CliError> {
    merge_field(
        &mut cli_args.database,
        extract_field(env_layer, |layer| &layer.database),
        extract_field(file_layer, |layer| &layer.database),
    );
    merge_field(
        &mut cli_args.username,
        extract_field(env_layer, |layer| &layer.username),
        extract_field(file_layer, |layer| &layer.username),
    );
    merge_field(
        &mut cli_args.password,
        extract_field(env_layer, |layer| &layer.password),
        extract_field(file_layer, |layer| &layer.password),
    );
    merge_field(
        &mut cli_args.page_size,
        extract_field(env_layer, |layer| &layer.page_size),
        extract_field(file_layer, |layer| &layer.page_size),
    );
    SyncConfig::try_from(cli_args)
}

fn merge_field<T: Clone>(target: &mut Option<T>, env_value: Option<T>, file_value: Option<T>) {
    if target.is_none()
        && let Some(value) = env_value.or(file_value)
    {
        *target = Some(value);
    }
}

fn extract_field<T: Clone>(
    layer: Option<&LayerOverrides>,
    accessor: fn(&LayerOverrides) -> &Option<T>,
) -> Option<T> {
    layer.and_then(|entry| accessor(entry).clone())
}
