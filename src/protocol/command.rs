//! Interactive command protocol: run one shell command inside the guest and
//! classify its outcome from pixels.
//!
//! Per attempt: open the run dialog (oracle-verified; a lock screen here is
//! a hard failure for the whole run), launch the primary shell, start the
//! interactive secondary shell inside it, type the command character by
//! character (the transport has no reliable clipboard, so no paste), submit,
//! capture the output and ask the oracle whether error indicators are
//! present. A detected error consumes one of the bounded attempts; an
//! exhausted cap is a failed step, never a failed run.

use crate::oracle::adapter::{command_error, lock_screen_detected};

use super::context::RunContext;
use super::types::{ProtocolError, ProtocolResult, StepResult};

const RUN_DIALOG_STATE: &str = "A Run dialog box is open on the screen, showing a text input \
     field with an 'Open:' label. The dialog should have OK and Cancel buttons.";

const SHELL_PROMPT_STATE: &str = "Command window showing a PowerShell prompt (PS C:\\...> or \
     similar). The prompt should be visible in the terminal window. Note: PowerShell is running \
     inside cmd.exe, so there will be NO blue background.";

fn command_output_state(command: &str) -> String {
    format!(
        "Terminal window showing PowerShell output after executing '{}'. The command should \
         show its output/results. Note: this is PowerShell running inside cmd.exe, so NO blue \
         background is expected. IMPORTANT: ONLY mark as FAIL if you see RED TEXT indicating an \
         error, or if the terminal shows actual error messages (like 'cannot be found', 'access \
         denied', etc.). If you see normal command output (even if white/gray text), mark as \
         VERIFIED.",
        command
    )
}

/// Execute one shell command interactively with bounded retries.
///
/// `Ok(true)` means the output was clean, `Ok(false)` means the attempt cap
/// was exhausted (a failed step). `Err` carries only hard conditions — lock
/// screen, connection loss, cancellation — which end the whole run.
pub fn run_shell_command(ctx: &mut RunContext, command: &str) -> ProtocolResult<bool> {
    log::info!("Running shell command interactively: {}", command);
    let max_retries = ctx.run.max_retries.max(1);

    for attempt in 1..=max_retries {
        if attempt > 1 {
            log::info!("Retrying shell command (attempt {}/{})...", attempt, max_retries);
        }

        if !open_run_dialog(ctx, attempt, max_retries)? {
            if attempt < max_retries {
                ctx.pause(ctx.pacing.window_close_settle)?;
                continue;
            }
            log::error!("Max retries reached - run dialog never opened");
            return Ok(false);
        }

        launch_shells(ctx, attempt)?;
        type_command(ctx, command)?;

        let label = format!("10_command_output_attempt{}", attempt);
        let has_error = match ctx.capture_and_verify(&label, &command_output_state(command)) {
            Some(verdict) => match command_error(&verdict) {
                Some(indicator) => {
                    log::error!("[FAIL] Command error detected on attempt {}", attempt);
                    log::error!("  Error indicator: {:?}", indicator);
                    log::error!("  Oracle saw: {}", truncate(&verdict.description, 300));
                    true
                }
                None => {
                    if verdict.verified {
                        log::info!("[OK] Command verified - output visible");
                    } else {
                        log::info!("[OK] No errors detected in command output");
                        log::info!("  Oracle saw: {}", truncate(&verdict.description, 200));
                    }
                    false
                }
            },
            None => {
                log::info!("No frame to verify - assuming the command executed");
                false
            }
        };

        if has_error {
            ctx.send_key("Alt+F4")?;
            ctx.pause(ctx.pacing.window_close_settle)?;
            if attempt < max_retries {
                log::warn!("Retrying due to detected error");
                continue;
            }
            log::error!("Shell command failed after {} attempts", max_retries);
            return Ok(false);
        }

        // Clean output; close the terminal and report success
        ctx.pause(ctx.pacing.window_close_settle)?;
        ctx.send_key("Alt+F4")?;
        ctx.pause(ctx.pacing.pre_submit_settle)?;
        log::info!("Shell command completed successfully");
        return Ok(true);
    }

    Ok(false)
}

/// Open the run dialog and verify it. `Ok(false)` means "not open, retry".
/// A lock screen detected here ends the run: everything after it would fail
/// the same way.
fn open_run_dialog(ctx: &mut RunContext, attempt: u32, max_retries: u32) -> ProtocolResult<bool> {
    ctx.log_action("Open run dialog", "Pressing Meta+R");
    ctx.focus()?;
    ctx.send_key("Meta+R")?;
    ctx.pause(ctx.pacing.run_dialog_settle)?;

    let label = format!("09_run_dialog_opened_attempt{}", attempt);
    match ctx.capture_and_verify(&label, RUN_DIALOG_STATE) {
        Some(verdict) => {
            if lock_screen_detected(&verdict) {
                log::error!("[FAIL] Screen is locked! Oracle saw: {}", verdict.description);
                log::error!("The session locked mid-run; remaining steps cannot proceed");
                return Err(ProtocolError::ScreenLocked(verdict.description));
            }
            if !verdict.verified {
                log::error!(
                    "[FAIL] Run dialog did not open on attempt {}/{}",
                    attempt,
                    max_retries
                );
                log::error!("  Oracle saw: {}", verdict.description);
                return Ok(false);
            }
            log::info!("[OK] Run dialog is open and ready");
            Ok(true)
        }
        None => {
            log::warn!("No frame to verify - assuming the run dialog is open");
            Ok(true)
        }
    }
}

/// Launch cmd.exe from the run dialog, then PowerShell inside it
fn launch_shells(ctx: &mut RunContext, attempt: u32) -> ProtocolResult<()> {
    log::info!("Typing cmd.exe in the run dialog");
    ctx.console.type_text("cmd.exe").map_err(ProtocolError::from)?;
    ctx.pause(ctx.pacing.pre_submit_settle)?;
    let _ = ctx.capture(&format!("09_run_dialog_typed_attempt{}", attempt));

    log::info!("Launching cmd.exe");
    ctx.send_key("Enter")?;
    ctx.pause(ctx.pacing.shell_launch_wait)?;
    let _ = ctx.capture(&format!("09_shell_window_attempt{}", attempt));

    ctx.log_action("Launch secondary shell", "Typing powershell.exe in cmd");
    log::info!("Starting PowerShell inside cmd");
    ctx.console.type_text("powershell.exe").map_err(ProtocolError::from)?;
    ctx.pause(ctx.pacing.pre_submit_settle)?;
    ctx.send_key("Enter")?;
    ctx.pause(ctx.pacing.inner_shell_wait)?;

    // Informational only: a missed prompt check never blocks the command
    let label = format!("09_shell_prompt_attempt{}", attempt);
    match ctx.capture_and_verify(&label, SHELL_PROMPT_STATE) {
        Some(verdict) if verdict.verified => log::info!("[OK] Shell prompt verified"),
        Some(verdict) => {
            log::info!("Shell prompt not verified - continuing anyway");
            log::info!("  Oracle saw: {}", verdict.description);
        }
        None => log::info!("No frame for the prompt check - continuing"),
    }
    Ok(())
}

/// Type the command character by character and submit it
fn type_command(ctx: &mut RunContext, command: &str) -> ProtocolResult<()> {
    ctx.log_action(
        &format!("Execute command: {}", command),
        "Typing command in the interactive shell",
    );
    log::info!("Typing command: {}", command);
    ctx.type_shifted(command, ctx.pacing.command_char_delay, false)?;
    ctx.pause(ctx.pacing.pre_submit_settle)?;
    ctx.send_key("Enter")?;
    ctx.pause(ctx.pacing.command_output_wait)
}

/// Run one free-text custom step: translate it to a shell command via the
/// text oracle and execute it; translation failure degrades to a
/// screenshot-only observation step.
pub fn run_custom_step(
    ctx: &mut RunContext,
    step_number: usize,
    index: usize,
    task: &str,
) -> ProtocolResult<StepResult> {
    log::info!("Performing custom step {}: {}", index, task);
    ctx.log_action(&format!("Custom step {}", index), task);

    match ctx.oracle.translate_task(task) {
        Some(command) => {
            log::info!("Oracle generated command: {}", command);
            let success = run_shell_command(ctx, &command)?;
            let description = format!("Custom: {} (executed: {})", task, command);
            if success {
                Ok(StepResult::ok(step_number, description))
            } else {
                Ok(StepResult::failed(
                    step_number,
                    description,
                    "command reported errors after all attempts",
                ))
            }
        }
        None => {
            log::warn!("Task translation failed - recording a screenshot-only observation");
            ctx.focus()?;
            let label = format!("custom_step_{:02}", index);
            let _ = ctx.capture_and_verify(&label, &format!("Desktop showing the result of: {}", task));
            Ok(StepResult::ok(
                step_number,
                format!("Custom: {} (no automation - screenshot only)", task),
            ))
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max).collect();
        format!("{}...", cut)
    }
}
