use anyhow::{Context, Result};
use tokio::process::Command;

/// Shows a desktop notification through the platform's own tooling.
pub async fn show_toast(title: &str, message: &str) -> Result<()> {
    let mut cmd = toast_command(title, message);
    let output = cmd
        .output()
        .await
        .context("failed to launch notification command")?;
    if !output.status.success() {
        anyhow::bail!(
            "notification command failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(())
}

#[cfg(target_os = "windows")]
fn toast_command(title: &str, message: &str) -> Command {
    let script = format!(
        "Add-Type -AssemblyName System.Windows.Forms; \
         $notify = New-Object System.Windows.Forms.NotifyIcon; \
         $notify.Icon = [System.Drawing.SystemIcons]::Information; \
         $notify.BalloonTipTitle = '{}'; \
         $notify.BalloonTipText = '{}'; \
         $notify.Visible = $true; \
         $notify.ShowBalloonTip(5000); \
         Start-Sleep -Seconds 6; \
         $notify.Dispose()",
        escape_single_quotes(title),
        escape_single_quotes(message)
    );
    let mut cmd = Command::new("powershell");
    cmd.args(["-NoProfile", "-Command", &script]);
    cmd
}

#[cfg(target_os = "macos")]
fn toast_command(title: &str, message: &str) -> Command {
    let script = format!(
        "display notification \"{}\" with title \"{}\"",
        message.replace('"', "\\\""),
        title.replace('"', "\\\"")
    );
    let mut cmd = Command::new("osascript");
    cmd.args(["-e", &script]);
    cmd
}

#[cfg(all(unix, not(target_os = "macos")))]
fn toast_command(title: &str, message: &str) -> Command {
    let mut cmd = Command::new("notify-send");
    cmd.arg(title).arg(message);
    cmd
}

#[cfg(not(any(unix, target_os = "windows")))]
fn toast_command(title: &str, message: &str) -> Command {
    let mut cmd = Command::new("echo");
    cmd.arg(format!("{title}: {message}"));
    cmd
}

#[cfg(target_os = "windows")]
fn escape_single_quotes(input: &str) -> String {
    input.replace('\'', "''")
}
