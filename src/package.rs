//! APK install/uninstall and device reboot, built from the `sync:` and
//! `shell:`/`reboot:` services.

use crate::error::AdbError;
use crate::stream::StreamEngine;
use crate::sync::SyncSession;
use crate::transport::Transport;
use std::path::Path;

const REMOTE_STAGING_DIR: &str = "/data/local/tmp";

/// Pushes `apk` to `/data/local/tmp` and runs `pm install -r` on it,
/// cleaning up the staged file whether or not install succeeds.
pub fn install(transport: &mut impl Transport, engine: &mut StreamEngine, apk: &Path) -> Result<String, AdbError> {
    let file_name = apk
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| AdbError::ProtocolError("apk path has no file name".into()))?;
    let remote_path = format!("{REMOTE_STAGING_DIR}/{file_name}");
    log::debug!("package: installing {} via {remote_path}", apk.display());

    {
        let mut session = SyncSession::open(transport, engine)?;
        let result = session.push(apk, &remote_path);
        let _ = session.quit();
        result?;
    }

    let install_result = crate::shell::shell(transport, engine, &format!("pm install -r {remote_path}"), false);
    let cleanup = crate::shell::shell(transport, engine, &format!("rm {remote_path}"), false);
    cleanup?;

    let output = install_result?;
    let output = String::from_utf8_lossy(&output).into_owned();
    if output.contains("Failure") {
        log::warn!("package: pm install failed: {}", output.trim());
        return Err(AdbError::ProtocolError(format!("pm install failed: {}", output.trim())));
    }
    log::debug!("package: install of {file_name} succeeded");
    Ok(output)
}

/// Runs `pm uninstall` for `package`.
pub fn uninstall(transport: &mut impl Transport, engine: &mut StreamEngine, package: &str) -> Result<String, AdbError> {
    log::debug!("package: uninstalling {package}");
    let output = crate::shell::shell(transport, engine, &format!("pm uninstall {package}"), false)?;
    let output = String::from_utf8_lossy(&output).into_owned();
    if output.contains("Failure") {
        log::warn!("package: pm uninstall failed: {}", output.trim());
        return Err(AdbError::ProtocolError(format!("pm uninstall failed: {}", output.trim())));
    }
    Ok(output)
}

/// Opens a `reboot:` stream and waits for the device to close it.
pub fn reboot(transport: &mut impl Transport, engine: &mut StreamEngine) -> Result<(), AdbError> {
    log::debug!("package: rebooting device");
    let stream = engine.open(transport, "reboot:")?;
    let result = engine.read_to_end(transport, &stream);
    let _ = engine.close(transport, &stream);
    result.map(|_| ())
}
