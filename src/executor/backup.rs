// Dated backups on the remote host
//
// Both backup kinds are idempotent per day: when today's backup already
// exists the step is skipped. `bak` renames the original away, `zipbak`
// leaves its sources in place. Paths go to the remote shell as written so
// variables and globs expand there, same as in raw commands.

use chrono::NaiveDate;
use tracing::debug;

use super::Connection;
use crate::output::errors::DeployError;

/// What a backup step did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupOutcome {
    Created(String),
    AlreadyExists(String),
}

/// YYYYMMDD
pub fn date_stamp(date: NaiveDate) -> String {
    date.format("%Y%m%d").to_string()
}

/// `/etc/app.conf` -> `/etc/app.conf-20240101`
pub fn rename_backup_path(path: &str, date: NaiveDate) -> String {
    format!("{}-{}", path, date_stamp(date))
}

/// `app.zip` -> `app.zip.20240101.bak.zip`
pub fn archive_backup_path(archive: &str, date: NaiveDate) -> String {
    format!("{}.{}.bak.zip", archive, date_stamp(date))
}

/// A path counts as present when listing it prints anything
///
/// The exit code is ignored: a missing path makes `ls` fail with empty stdout.
pub async fn remote_exists(conn: &dyn Connection, path: &str) -> Result<bool, DeployError> {
    let listing = conn.exec(&format!("ls -al {}", path)).await?;
    debug!(host = conn.host_name(), path, found = !listing.stdout.trim().is_empty(), "existence check");
    Ok(!listing.stdout.trim().is_empty())
}

/// Move `path` aside to its dated name
pub async fn rename_backup(
    conn: &dyn Connection,
    path: &str,
    date: NaiveDate,
) -> Result<BackupOutcome, DeployError> {
    let backup = rename_backup_path(path, date);
    if remote_exists(conn, &backup).await? {
        return Ok(BackupOutcome::AlreadyExists(backup));
    }

    let command = format!("mv {} {}", path, backup);
    run_checked(conn, &command).await?;
    Ok(BackupOutcome::Created(backup))
}

/// Zip `paths` into the dated archive; sources stay where they are
pub async fn archive_backup(
    conn: &dyn Connection,
    archive: &str,
    paths: &[String],
    date: NaiveDate,
) -> Result<BackupOutcome, DeployError> {
    let backup = archive_backup_path(archive, date);
    if remote_exists(conn, &backup).await? {
        return Ok(BackupOutcome::AlreadyExists(backup));
    }

    let zip = resolve_zip(conn).await?;
    let command = format!("{} -r {} {}", zip, backup, paths.join(" "));
    run_checked(conn, &command).await?;
    Ok(BackupOutcome::Created(backup))
}

/// Locate `zip` through the remote login shell; PATH differs between hosts
async fn resolve_zip(conn: &dyn Connection) -> Result<String, DeployError> {
    let lookup = "command -v zip";
    let result = conn.exec(lookup).await?;
    let zip = result.stdout.lines().next().unwrap_or("").trim().to_string();

    if zip.is_empty() {
        return Err(DeployError::remote(
            conn.host_name(),
            lookup,
            "zip is not installed on the remote host",
        ));
    }

    debug!(host = conn.host_name(), zip = %zip, "resolved zip binary");
    Ok(zip)
}

async fn run_checked(conn: &dyn Connection, command: &str) -> Result<(), DeployError> {
    let result = conn.exec(command).await?;
    if !result.success() {
        return Err(DeployError::remote_exit(
            conn.host_name(),
            command,
            result.exit_code,
            &result.stderr,
        ));
    }
    Ok(())
}
