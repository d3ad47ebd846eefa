// Per-server execution engine

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{Local, NaiveDate};
use tracing::{debug, info, warn};

use super::backup::{self, BackupOutcome};
use super::{Connection, Connector, EngineConfig, Operation, Target};
use crate::compiler::CompiledTask;
use crate::output::errors::DeployError;
use crate::output::terminal::{ServerReport, TerminalOutput};

/// Runs one compiled task at a time over a single command session
pub struct Engine<'a> {
    connector: &'a dyn Connector,
    output: &'a TerminalOutput,
    config: EngineConfig,
}

impl<'a> Engine<'a> {
    pub fn new(connector: &'a dyn Connector, output: &'a TerminalOutput, config: EngineConfig) -> Self {
        Engine {
            connector,
            output,
            config,
        }
    }

    pub fn output(&self) -> &TerminalOutput {
        self.output
    }

    /// Connection details for a task, with the prompted password filled in
    pub fn target_for(&self, task: &CompiledTask) -> Target {
        Target::from_task(task).with_fallback_password(self.config.fallback_password.as_deref())
    }

    fn backup_date(&self) -> NaiveDate {
        self.config
            .date
            .unwrap_or_else(|| Local::now().date_naive())
    }

    /// Run every command of `task`, stopping at the first failure
    ///
    /// The command session is closed whether or not the commands succeeded.
    pub async fn execute(&self, task: &CompiledTask) -> Result<ServerReport, DeployError> {
        let target = self.target_for(task);

        info!(server = ?target, commands = task.commands.len(), "connecting");
        let conn = self.connector.connect(&target).await?;
        self.output.print_connected(conn.host_name());

        let mut report = ServerReport::new(&task.host);
        let result = self
            .run_commands(conn.as_ref(), &target, &task.commands, &mut report)
            .await;

        conn.close().await;
        debug!(host = %target.host, "session closed");

        result.map(|_| report)
    }

    async fn run_commands(
        &self,
        conn: &dyn Connection,
        target: &Target,
        commands: &[String],
        report: &mut ServerReport,
    ) -> Result<(), DeployError> {
        for command in commands {
            let operation = Operation::parse(command);
            info!(host = %target.host, kind = operation.kind(), command = %command, "running");
            self.output.print_command(command, &operation);

            self.dispatch(conn, target, &operation, report).await?;
            report.executed += 1;
        }

        Ok(())
    }

    async fn dispatch(
        &self,
        conn: &dyn Connection,
        target: &Target,
        operation: &Operation,
        report: &mut ServerReport,
    ) -> Result<(), DeployError> {
        match operation {
            Operation::Raw(command) => {
                let result = conn.exec(command).await?;
                self.output.print_command_output(&result);

                if !result.success() {
                    return Err(DeployError::remote_exit(
                        conn.host_name(),
                        command,
                        result.exit_code,
                        &result.stderr,
                    ));
                }
            }

            Operation::Upload {
                source,
                destination,
            } => {
                self.upload_file(target, Path::new(source), destination).await?;
                report.uploaded += 1;
            }

            Operation::UploadDir {
                source,
                destination,
                limit,
            } => {
                let files = select_upload_files(Path::new(source), *limit).await?;
                debug!(dir = %source, selected = files.len(), limit, "directory upload");

                for file in files {
                    let remote = remote_child(destination, &file);
                    self.upload_file(target, &file, &remote).await?;
                    report.uploaded += 1;
                }
            }

            Operation::Backup { path } => {
                let outcome = backup::rename_backup(conn, path, self.backup_date()).await?;
                self.record_backup(target, &outcome, report);
            }

            Operation::ZipBackup { archive, paths } => {
                let outcome =
                    backup::archive_backup(conn, archive, paths, self.backup_date()).await?;
                self.record_backup(target, &outcome, report);
            }
        }

        Ok(())
    }

    fn record_backup(&self, target: &Target, outcome: &BackupOutcome, report: &mut ServerReport) {
        if let BackupOutcome::AlreadyExists(path) = outcome {
            warn!(host = %target.host, path = %path, "backup already exists, skipping");
        }
        self.output.print_backup(outcome);
        report.record_backup(outcome);
    }

    /// Upload one file over its own transfer session
    async fn upload_file(
        &self,
        target: &Target,
        local: &Path,
        remote: &str,
    ) -> Result<(), DeployError> {
        let metadata = tokio::fs::metadata(local).await.map_err(|e| {
            DeployError::filesystem(format!("Upload source not readable: {}", e), local)
        })?;
        if !metadata.is_file() {
            return Err(DeployError::filesystem("Upload source is not a file", local));
        }

        let transfer = self.connector.connect_transfer(target).await?;

        let label = local
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| local.display().to_string());
        let pb = self.output.create_upload_progress(&label, metadata.len());
        let mut progress = |sent: u64, total: u64| {
            pb.set_length(total);
            pb.set_position(sent);
        };

        let result = transfer.upload(local, remote, &mut progress).await;
        transfer.close().await;
        pb.finish_and_clear();

        result?;
        info!(host = %target.host, local = %local.display(), remote, bytes = metadata.len(), "uploaded");
        self.output.print_upload_done(remote);
        Ok(())
    }
}

/// Files directly inside `dir`, newest first and capped at `limit` when it is non-zero
///
/// Without a limit every file is returned, sorted by name.
pub async fn select_upload_files(dir: &Path, limit: usize) -> Result<Vec<PathBuf>, DeployError> {
    let mut entries = tokio::fs::read_dir(dir).await.map_err(|e| {
        DeployError::filesystem(format!("Upload directory not readable: {}", e), dir)
    })?;

    let mut files: Vec<(SystemTime, PathBuf)> = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(|e| {
        DeployError::filesystem(format!("Failed to list upload directory: {}", e), dir)
    })? {
        let path = entry.path();

        let Ok(metadata) = tokio::fs::metadata(&path).await else {
            continue;
        };
        if !metadata.is_file() {
            continue;
        }

        let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        files.push((modified, path));
    }

    if limit > 0 {
        files.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
        files.truncate(limit);
    } else {
        files.sort_by(|a, b| a.1.cmp(&b.1));
    }

    Ok(files.into_iter().map(|(_, path)| path).collect())
}

/// `remote_dir/<file name of local>`
fn remote_child(remote_dir: &str, local: &Path) -> String {
    let name = local
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    format!("{}/{}", remote_dir.trim_end_matches('/'), name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::testing::FakeConnector;
    use pretty_assertions::assert_eq;
    use std::fs::{self, File};
    use std::time::Duration;

    fn task(host: &str, commands: &[&str]) -> CompiledTask {
        CompiledTask {
            host: host.to_string(),
            port: 22,
            username: "deploy".to_string(),
            password: "pw".to_string(),
            commands: commands.iter().map(|c| c.to_string()).collect(),
        }
    }

    fn config() -> EngineConfig {
        EngineConfig {
            date: NaiveDate::from_ymd_opt(2024, 1, 1),
            ..Default::default()
        }
    }

    /// Five files whose mtimes increase with their number
    fn dir_with_files() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let base = SystemTime::now() - Duration::from_secs(3600);

        for i in 1..=5u64 {
            let path = dir.path().join(format!("build-{}.tar", i));
            fs::write(&path, vec![b'x'; 10 * i as usize]).unwrap();
            File::options()
                .write(true)
                .open(&path)
                .unwrap()
                .set_modified(base + Duration::from_secs(60 * i))
                .unwrap();
        }
        fs::create_dir(dir.path().join("nested")).unwrap();
        dir
    }

    #[tokio::test]
    async fn test_raw_commands_run_in_order_on_one_session() {
        let connector = FakeConnector::new();
        let output = TerminalOutput::silent();
        let engine = Engine::new(&connector, &output, config());

        let report = engine
            .execute(&task("web1", &["cd /srv && ls", "systemctl restart app"]))
            .await
            .unwrap();

        assert_eq!(report.executed, 2);
        assert_eq!(
            connector.events(),
            vec![
                "connect web1",
                "exec web1 cd /srv && ls",
                "exec web1 systemctl restart app",
                "close web1",
            ]
        );
    }

    #[tokio::test]
    async fn test_failure_stops_remaining_commands_and_closes_session() {
        let connector = FakeConnector::new().fail("false", 1);
        let output = TerminalOutput::silent();
        let engine = Engine::new(&connector, &output, config());

        let err = engine
            .execute(&task("web1", &["echo one", "false", "echo three"]))
            .await
            .unwrap_err();

        assert!(matches!(err, DeployError::Remote(_)));
        assert_eq!(
            connector.events(),
            vec!["connect web1", "exec web1 echo one", "exec web1 false", "close web1"]
        );
    }

    #[tokio::test]
    async fn test_connection_failure_runs_nothing() {
        let connector = FakeConnector::new().refuse("web1");
        let output = TerminalOutput::silent();
        let engine = Engine::new(&connector, &output, config());

        let err = engine.execute(&task("web1", &["uptime"])).await.unwrap_err();
        assert!(matches!(err, DeployError::Connection { .. }));
        assert_eq!(connector.events(), vec!["connect web1"]);
    }

    #[tokio::test]
    async fn test_backup_dispatch_uses_dated_path() {
        let connector = FakeConnector::new();
        let output = TerminalOutput::silent();
        let engine = Engine::new(&connector, &output, config());

        let report = engine
            .execute(&task("web1", &["bak /etc/app.conf"]))
            .await
            .unwrap();

        assert_eq!(report.backups_created, 1);
        assert!(connector
            .events()
            .contains(&"exec web1 mv /etc/app.conf /etc/app.conf-20240101".to_string()));
    }

    #[tokio::test]
    async fn test_existing_backup_is_skipped_not_failed() {
        let connector = FakeConnector::new()
            .respond("ls -al /etc/app.conf-20240101", "/etc/app.conf-20240101\n");
        let output = TerminalOutput::silent();
        let engine = Engine::new(&connector, &output, config());

        let report = engine
            .execute(&task("web1", &["bak /etc/app.conf", "uptime"]))
            .await
            .unwrap();

        assert_eq!(report.backups_skipped, 1);
        assert_eq!(report.executed, 2);
        assert!(!connector.events().iter().any(|e| e.contains("mv ")));
    }

    #[tokio::test]
    async fn test_zipbak_dispatch_archives_all_paths() {
        let connector = FakeConnector::new().respond("command -v zip", "/usr/bin/zip\n");
        let output = TerminalOutput::silent();
        let engine = Engine::new(&connector, &output, config());

        engine
            .execute(&task("web1", &["zipbak app.zip /a /b"]))
            .await
            .unwrap();

        let zips: Vec<String> = connector
            .events()
            .into_iter()
            .filter(|e| e.contains(" -r "))
            .collect();
        assert_eq!(
            zips,
            vec!["exec web1 /usr/bin/zip -r app.zip.20240101.bak.zip /a /b"]
        );
    }

    #[tokio::test]
    async fn test_upload_opens_its_own_transfer_session() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("app.jar");
        fs::write(&local, b"jar-bytes").unwrap();

        let connector = FakeConnector::new();
        let output = TerminalOutput::silent();
        let engine = Engine::new(&connector, &output, config());

        let command = format!("upload {} /opt/app/app.jar", local.display());
        let report = engine.execute(&task("web1", &[command.as_str()])).await.unwrap();

        assert_eq!(report.uploaded, 1);
        assert_eq!(
            connector.events(),
            vec![
                "connect web1",
                "transfer web1",
                "upload web1 app.jar -> /opt/app/app.jar",
                "transfer-close web1",
                "close web1",
            ]
        );
    }

    #[tokio::test]
    async fn test_upload_missing_source_is_filesystem_error() {
        let connector = FakeConnector::new();
        let output = TerminalOutput::silent();
        let engine = Engine::new(&connector, &output, config());

        let err = engine
            .execute(&task("web1", &["upload /does/not/exist.jar /opt/app.jar", "uptime"]))
            .await
            .unwrap_err();

        assert!(matches!(err, DeployError::Filesystem { .. }));
        assert!(!connector.events().iter().any(|e| e.starts_with("transfer ")));
        assert!(!connector.events().contains(&"exec web1 uptime".to_string()));
    }

    #[tokio::test]
    async fn test_uploaddir_with_limit_takes_most_recent() {
        let dir = dir_with_files();
        let connector = FakeConnector::new();
        let output = TerminalOutput::silent();
        let engine = Engine::new(&connector, &output, config());

        let command = format!("uploaddir2 {} /srv/releases/", dir.path().display());
        let report = engine.execute(&task("web1", &[command.as_str()])).await.unwrap();

        assert_eq!(report.uploaded, 2);
        let uploads: Vec<String> = connector
            .events()
            .into_iter()
            .filter(|e| e.starts_with("upload "))
            .collect();
        assert_eq!(
            uploads,
            vec![
                "upload web1 build-5.tar -> /srv/releases/build-5.tar",
                "upload web1 build-4.tar -> /srv/releases/build-4.tar",
            ]
        );
    }

    #[tokio::test]
    async fn test_uploaddir_without_limit_uploads_all_files() {
        let dir = dir_with_files();
        let connector = FakeConnector::new();
        let output = TerminalOutput::silent();
        let engine = Engine::new(&connector, &output, config());

        let command = format!("uploaddir {} /srv/releases", dir.path().display());
        let report = engine.execute(&task("web1", &[command.as_str()])).await.unwrap();

        assert_eq!(report.uploaded, 5);
        let transfers = connector
            .events()
            .iter()
            .filter(|e| e.starts_with("transfer web1"))
            .count();
        assert_eq!(transfers, 5);
    }

    #[tokio::test]
    async fn test_uploaddir_missing_directory_fails() {
        let connector = FakeConnector::new();
        let output = TerminalOutput::silent();
        let engine = Engine::new(&connector, &output, config());

        let err = engine
            .execute(&task("web1", &["uploaddir /no/such/dir /srv"]))
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::Filesystem { .. }));
        assert_eq!(connector.events(), vec!["connect web1", "close web1"]);
    }

    #[tokio::test]
    async fn test_select_upload_files_skips_directories() {
        let dir = dir_with_files();
        let files = select_upload_files(dir.path(), 0).await.unwrap();

        assert_eq!(files.len(), 5);
        assert!(files.iter().all(|f| f.is_file()));
        assert!(files[0].ends_with("build-1.tar"));
    }

    #[tokio::test]
    async fn test_select_upload_files_limit_larger_than_dir() {
        let dir = dir_with_files();
        let files = select_upload_files(dir.path(), 50).await.unwrap();

        assert_eq!(files.len(), 5);
        assert!(files[0].ends_with("build-5.tar"));
        assert!(files[4].ends_with("build-1.tar"));
    }

    #[test]
    fn test_remote_child() {
        assert_eq!(remote_child("/srv/", Path::new("/tmp/a.txt")), "/srv/a.txt");
        assert_eq!(remote_child("/srv", Path::new("a.txt")), "/srv/a.txt");
        assert_eq!(remote_child("/", Path::new("a.txt")), "/a.txt");
    }

    #[test]
    fn test_fallback_password_reaches_target() {
        let connector = FakeConnector::new();
        let output = TerminalOutput::silent();
        let engine = Engine::new(
            &connector,
            &output,
            EngineConfig {
                fallback_password: Some("typed".to_string()),
                ..config()
            },
        );

        let mut t = task("web1", &[]);
        t.password = String::new();
        assert_eq!(engine.target_for(&t).password, "typed");
    }
}
